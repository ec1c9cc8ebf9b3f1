//! Agent bootstrap.
//!
//! The host runtime calls its agent entry point once at process start. [`Agent::premain`]
//! turns that call into a running instrumentation facility:
//!
//! 1. resolve [`AgentOptions`] from the argument string or `LINEPROBE_OPTIONS`
//! 2. install a `tracing` subscriber (an existing one is kept)
//! 3. open the configured sink, falling back to memory if it can not be opened
//! 4. install the recorder unit through the host, aborting on failure
//! 5. publish the process wide [`HitRecorder`]
//! 6. register the [`Dispatcher`] with the host
//!
//! Step 4 is the only one allowed to fail the host: without a reachable recorder every probe
//! would break the instrumented program.

use std::{io::Write, sync::Arc};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::AgentOptions,
    dispatcher::{Dispatcher, ExclusionSet, LoaderId},
    isolation::{ClassDefiner, RecorderInstaller},
    recorder::{self, HitRecorder, MemorySink},
    rewriter::TimestampSource,
    Result,
};

/// Host hook invoked for every class load.
pub trait ClassFileTransformer: Send + Sync {
    /// Return replacement bytes, or `None` to keep `bytes`.
    ///
    /// Must not panic and must not fail: the host is in the middle of loading a class.
    fn transform(
        &self,
        loader: Option<LoaderId>,
        class_name: Option<&str>,
        being_redefined: bool,
        bytes: &[u8],
    ) -> Option<Vec<u8>>;
}

/// The instrumentation facility of the host runtime.
pub trait HostInstrumentation: ClassDefiner {
    /// Call `transformer` for every class loaded from now on.
    ///
    /// # Errors
    ///
    /// Any error the host reports.
    fn add_transformer(&self, transformer: Arc<dyn ClassFileTransformer>) -> Result<()>;
}

/// Install a stderr `fmt` subscriber filtered by `filter`.
///
/// Returns `false` if a global subscriber was already set; it is left in place.
pub fn init_logging(filter: &str) -> bool {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// A running instrumentation facility.
#[derive(Debug)]
pub struct Agent {
    options: AgentOptions,
    recorder: Arc<HitRecorder>,
    dispatcher: Arc<Dispatcher>,
}

impl Agent {
    /// The host's agent entry point.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Config`] for unreadable options or a second call in one process
    /// - [`crate::Error::RecorderUnreachable`] if the recorder unit could not be installed;
    ///   the host must not run application code in that case
    pub fn premain(arguments: Option<&str>, host: &dyn HostInstrumentation) -> Result<Agent> {
        let options = AgentOptions::resolve(arguments)?;
        init_logging(&options.log_filter());

        let agent = Self::bootstrap(options, host, RecorderInstaller::global())?;
        recorder::install(agent.recorder.clone())?;
        agent.register(host)?;
        info!(
            sink = %agent.options.sink,
            timestamp = %agent.options.timestamp,
            exclusions = agent.dispatcher.exclusions().prefixes().len(),
            "lineprobe agent active"
        );
        Ok(agent)
    }

    /// Build the recorder and dispatcher and install the recorder unit through `host`.
    ///
    /// Neither the global recorder nor the transformer registration are touched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RecorderUnreachable`] if `installer` fails or failed before.
    pub fn bootstrap(
        options: AgentOptions,
        host: &dyn HostInstrumentation,
        installer: &RecorderInstaller,
    ) -> Result<Agent> {
        let sink = options.build_sink().unwrap_or_else(|error| {
            warn!(
                path = %options.path.display(),
                %error,
                "hit sink unavailable, keeping hits in memory"
            );
            Arc::new(MemorySink::new())
        });
        let recorder = Arc::new(HitRecorder::new(sink));

        let timed = options.timestamp == TimestampSource::Probe;
        if let Err(failure) = installer.install(host, timed) {
            error!(%failure, "instrumentation disabled");
            return Err(failure);
        }

        let exclusions = ExclusionSet::with_prefixes(options.exclude.iter().cloned())
            .with_method_filter(options.methods.clone());
        let dispatcher = Arc::new(Dispatcher::with_rewriter(
            exclusions,
            options.probe_config(),
        ));

        Ok(Agent {
            options,
            recorder,
            dispatcher,
        })
    }

    /// Register the dispatcher with `host`.
    ///
    /// # Errors
    ///
    /// Any error the host reports.
    pub fn register(&self, host: &dyn HostInstrumentation) -> Result<()> {
        host.add_transformer(self.dispatcher.clone())
    }

    /// The resolved options.
    #[must_use]
    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// The hit recorder.
    #[must_use]
    pub fn recorder(&self) -> &Arc<HitRecorder> {
        &self.recorder
    }

    /// The dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Flush the sink and write the per-line report to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Sink`] if flushing or writing fails.
    pub fn shutdown<W: Write>(&self, out: W) -> Result<()> {
        self.recorder.flush()?;
        self.recorder.report(out)
    }
}
