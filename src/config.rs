//! Agent options.
//!
//! Options arrive as the agent argument string of the host, `key=value` pairs separated by
//! commas. Multi-valued options separate their values with `;`.
//!
//! | Key         | Values                          | Default              |
//! |-------------|---------------------------------|----------------------|
//! | `sink`      | `memory`, `console`, `file`     | `file`               |
//! | `path`      | file sink destination           | `lineprobe-hits.csv` |
//! | `format`    | `csv`, `coz`                    | `csv`                |
//! | `exclude`   | unit name prefixes, `a/;b/c/`   | none                 |
//! | `methods`   | method name substrings          | all methods          |
//! | `timestamp` | `recorder`, `probe`             | `recorder`           |
//! | `log`       | filter directives, `a=debug;b`  | `LINEPROBE_LOG`      |
//! | `max_major` | newest class file major version | `71` (Java SE 27)    |
//!
//! # Examples
//!
//! ```rust
//! use lineprobe::{config::AgentOptions, recorder::SinkKind};
//!
//! let options = AgentOptions::parse("sink=memory,exclude=com/acme/generated/")?;
//! assert_eq!(options.sink, SinkKind::Memory);
//! assert_eq!(options.exclude, ["com/acme/generated/"]);
//! # Ok::<(), lineprobe::Error>(())
//! ```

use std::{path::PathBuf, str::FromStr, sync::Arc};

use crate::{
    classfile::MAX_MAJOR_VERSION,
    recorder::{ConsoleSink, FileSink, HitFormat, HitSink, MemorySink, SinkKind},
    rewriter::{ProbeConfig, TimestampSource},
    Error, Result,
};

/// Environment variable read when the host passes no agent arguments.
pub const OPTIONS_ENV: &str = "LINEPROBE_OPTIONS";
/// Environment variable holding the log filter when `log=` is not given.
pub const LOG_ENV: &str = "LINEPROBE_LOG";
/// Default destination of the file sink.
pub const DEFAULT_HIT_LOG: &str = "lineprobe-hits.csv";

/// Parsed agent options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    /// Sink policy of the hit recorder
    pub sink: SinkKind,
    /// File sink destination
    pub path: PathBuf,
    /// Line format of console and file sinks
    pub format: HitFormat,
    /// Unit name prefixes never rewritten, on top of the recorder itself
    pub exclude: Vec<String>,
    /// Method name substrings; empty instruments every method
    pub methods: Vec<String>,
    /// Where hit timestamps are taken
    pub timestamp: TimestampSource,
    /// Log filter directive
    pub log: Option<String>,
    /// Newest class file major version to rewrite; newer classes load unchanged
    pub max_major: u16,
}

impl Default for AgentOptions {
    fn default() -> Self {
        AgentOptions {
            sink: SinkKind::default(),
            path: PathBuf::from(DEFAULT_HIT_LOG),
            format: HitFormat::default(),
            exclude: Vec::new(),
            methods: Vec::new(),
            timestamp: TimestampSource::default(),
            log: None,
            max_major: MAX_MAJOR_VERSION,
        }
    }
}

fn parse_enum<T: FromStr>(key: &str, value: &str) -> Result<T> {
    T::from_str(value).map_err(|_| Error::Config(format!("Invalid value '{value}' for '{key}'")))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl AgentOptions {
    /// Parse an agent argument string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown keys, pairs without `=`, and unknown sink or
    /// timestamp names. Unknown formats fall back to `csv`.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = AgentOptions::default();
        for pair in options.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("Expected key=value, got '{pair}'")))?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "sink" => parsed.sink = parse_enum(key, value)?,
                "path" => parsed.path = PathBuf::from(value),
                "format" => parsed.format = HitFormat::from_name(value),
                "exclude" => parsed.exclude.extend(split_list(value)),
                "methods" => parsed.methods.extend(split_list(value)),
                "timestamp" => parsed.timestamp = parse_enum(key, value)?,
                // `,` already separates options, directives use `;`
                "log" => parsed.log = Some(value.replace(';', ",")),
                "max_major" => {
                    parsed.max_major = value.parse().map_err(|_| {
                        Error::Config(format!("Invalid value '{value}' for '{key}'"))
                    })?;
                }
                _ => return Err(Error::Config(format!("Unknown option '{key}'"))),
            }
        }
        Ok(parsed)
    }

    /// Options from the agent arguments, or [`OPTIONS_ENV`] if there are none.
    ///
    /// # Errors
    ///
    /// See [`AgentOptions::parse`].
    pub fn resolve(arguments: Option<&str>) -> Result<Self> {
        match arguments.map(str::trim).filter(|a| !a.is_empty()) {
            Some(arguments) => Self::parse(arguments),
            None => match std::env::var(OPTIONS_ENV) {
                Ok(options) => Self::parse(&options),
                Err(_) => Ok(Self::default()),
            },
        }
    }

    /// The log filter: `log=`, then [`LOG_ENV`], then `warn`.
    #[must_use]
    pub fn log_filter(&self) -> String {
        self.log
            .clone()
            .or_else(|| std::env::var(LOG_ENV).ok())
            .unwrap_or_else(|| "warn".to_string())
    }

    /// Probe configuration for the rewriter.
    #[must_use]
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            max_major_version: self.max_major,
            ..ProbeConfig::with_timestamp(self.timestamp)
        }
    }

    /// Open the configured sink.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if the file sink can not be opened.
    pub fn build_sink(&self) -> Result<Arc<dyn HitSink>> {
        Ok(match self.sink {
            SinkKind::Memory => Arc::new(MemorySink::new()),
            SinkKind::Console => Arc::new(ConsoleSink::new(self.format)),
            SinkKind::File => Arc::new(FileSink::open(&self.path, self.format)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = AgentOptions::parse("").unwrap();
        assert_eq!(options, AgentOptions::default());
        assert_eq!(options.sink, SinkKind::File);
        assert_eq!(options.path, PathBuf::from(DEFAULT_HIT_LOG));
        assert_eq!(options.format, HitFormat::Csv);
        assert_eq!(options.timestamp, TimestampSource::Recorder);
    }

    #[test]
    fn every_key() {
        let options = AgentOptions::parse(
            "sink=console, path=/tmp/h.log,format=coz,exclude=a/;b/c/,methods=run;main,\
             timestamp=probe,log=lineprobe=debug,exclude=d/",
        )
        .unwrap();
        assert_eq!(options.sink, SinkKind::Console);
        assert_eq!(options.path, PathBuf::from("/tmp/h.log"));
        assert_eq!(options.format, HitFormat::Coz);
        assert_eq!(options.exclude, ["a/", "b/c/", "d/"]);
        assert_eq!(options.methods, ["run", "main"]);
        assert_eq!(options.timestamp, TimestampSource::Probe);
        assert_eq!(options.log.as_deref(), Some("lineprobe=debug"));
        assert_eq!(options.log_filter(), "lineprobe=debug");
    }

    #[test]
    fn log_directives() {
        let options = AgentOptions::parse("log=lineprobe=debug;warn,sink=memory").unwrap();
        assert_eq!(options.log_filter(), "lineprobe=debug,warn");
        assert_eq!(options.sink, SinkKind::Memory);
        assert!(tracing_subscriber::EnvFilter::try_new(options.log_filter()).is_ok());
    }

    #[test]
    fn version_limit() {
        assert_eq!(AgentOptions::default().probe_config().max_major_version, 71);
        let options = AgentOptions::parse("max_major=75,timestamp=probe").unwrap();
        let config = options.probe_config();
        assert_eq!(config.max_major_version, 75);
        assert_eq!(config.timestamp, TimestampSource::Probe);
        assert!(matches!(AgentOptions::parse("max_major=next"), Err(Error::Config(_))));
    }

    #[test]
    fn errors() {
        assert!(matches!(AgentOptions::parse("color=red"), Err(Error::Config(_))));
        assert!(matches!(AgentOptions::parse("sink"), Err(Error::Config(_))));
        assert!(matches!(AgentOptions::parse("sink=kafka"), Err(Error::Config(_))));
        assert!(matches!(AgentOptions::parse("timestamp=tsc"), Err(Error::Config(_))));
        // unknown formats degrade
        assert_eq!(
            AgentOptions::parse("format=xml").unwrap().format,
            HitFormat::Csv
        );
    }

    #[test]
    fn sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.csv");
        let options = AgentOptions::parse(&format!("path={}", path.display())).unwrap();
        assert_eq!(options.build_sink().unwrap().kind(), SinkKind::File);
        assert!(path.exists());

        let options = AgentOptions::parse("sink=memory").unwrap();
        assert_eq!(options.build_sink().unwrap().kind(), SinkKind::Memory);
    }
}
