//! The unit rewriter.
//!
//! [`UnitRewriter`] takes the bytes of one class file and returns a new class file in which
//! every line transition of every method calls the hit recorder. The rewrite is a pure
//! function of its input: one rewriter can serve any number of threads without locking.
//!
//! # Architecture
//!
//! - [`transitions`] - the per-method `lastLine` state machine and probe planning
//! - [`probe`] - the probe instruction sequence and the inspection helper [`probe_sites`]
//! - `method` - re-encoding of one `Code` attribute and relocation of everything that
//!   addresses bytecode by offset
//!
//! # Examples
//!
//! ```rust,no_run
//! use lineprobe::rewriter::{ProbeConfig, RewriteOutcome, UnitRewriter};
//!
//! let bytes = std::fs::read("Worker.class")?;
//! let rewriter = UnitRewriter::new(ProbeConfig::default());
//! match rewriter.rewrite(&bytes, "com/acme/Worker")? {
//!     RewriteOutcome::Rewritten { bytes, summary } => {
//!         println!("{} probes in {} methods", summary.probes_inserted, summary.methods_instrumented);
//!         std::fs::write("Worker.class", bytes)?;
//!     }
//!     RewriteOutcome::Unchanged(reason) => println!("left alone: {reason}"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod method;
pub mod probe;
pub mod transitions;

pub use probe::{probe_sites, ProbeConfig, ProbeSequence, ProbeSite, TimestampSource};
pub use transitions::{plan_probes, LineTransitions, PlannedProbe};

use strum::Display;
use tracing::debug;

use crate::{
    classfile::{
        attributes::{names, Attribute},
        ClassFile,
    },
    Result,
};

/// Why a unit was left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnchangedReason {
    /// The unit declares no methods
    NoMethods,
    /// No method had line numbers on an instruction boundary (or passed the method filter)
    NoLineNumbers,
    /// The unit carries the instrumentation marker
    AlreadyInstrumented,
}

/// What a rewrite did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    /// Methods that received at least one probe
    pub methods_instrumented: usize,
    /// Probes inserted over all methods
    pub probes_inserted: usize,
}

/// Result of [`UnitRewriter::rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The unit was rewritten into `bytes`
    Rewritten {
        /// The new class file
        bytes: Vec<u8>,
        /// What was changed
        summary: RewriteSummary,
    },
    /// The input bytes should be used as they are
    Unchanged(UnchangedReason),
}

impl RewriteOutcome {
    /// The rewritten bytes, if any.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            RewriteOutcome::Rewritten { bytes, .. } => Some(bytes),
            RewriteOutcome::Unchanged(_) => None,
        }
    }
}

/// The seam between the dispatcher and the rewriter.
pub trait UnitTransform: Send + Sync {
    /// Rewrite one unit.
    ///
    /// # Errors
    ///
    /// Parse failures and rewrite failures; the caller decides how to degrade.
    fn rewrite(&self, bytes: &[u8], unit_name: &str) -> Result<RewriteOutcome>;
}

/// Inserts line probes into class files.
#[derive(Debug, Clone, Default)]
pub struct UnitRewriter {
    config: ProbeConfig,
    method_filter: Vec<String>,
}

impl UnitRewriter {
    /// A rewriter instrumenting every method.
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        UnitRewriter {
            config,
            method_filter: Vec::new(),
        }
    }

    /// Only instrument methods whose name contains one of `filter`.
    ///
    /// An empty filter instruments every method.
    #[must_use]
    pub fn with_method_filter(mut self, filter: Vec<String>) -> Self {
        self.method_filter = filter;
        self
    }

    /// The probe configuration.
    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn wants_method(&self, name: &str) -> bool {
        self.method_filter.is_empty()
            || self
                .method_filter
                .iter()
                .any(|pattern| name.contains(pattern.as_str()))
    }

    /// Rewrite the class file in `bytes`, reporting hits as `unit_name`.
    ///
    /// # Errors
    ///
    /// - Parse failures ([`crate::Error::is_parse_failure`]) if `bytes` is not a class file
    /// - [`crate::Error::BranchOutOfRange`], [`crate::Error::CodeTooLarge`],
    ///   [`crate::Error::ConstantPoolOverflow`] or [`crate::Error::StackAnalysis`] if a
    ///   method can not be rewritten safely
    pub fn rewrite(&self, bytes: &[u8], unit_name: &str) -> Result<RewriteOutcome> {
        let mut class = ClassFile::parse_with_max_major(bytes, self.config.max_major_version)?;
        if class.has_attribute(names::INSTRUMENTED_MARKER) {
            return Ok(RewriteOutcome::Unchanged(
                UnchangedReason::AlreadyInstrumented,
            ));
        }
        if class.methods.is_empty() {
            return Ok(RewriteOutcome::Unchanged(UnchangedReason::NoMethods));
        }

        let summary = self.rewrite_class(&mut class, unit_name)?;
        if summary.methods_instrumented == 0 {
            return Ok(RewriteOutcome::Unchanged(UnchangedReason::NoLineNumbers));
        }

        let marker = class.constant_pool.add_utf8(names::INSTRUMENTED_MARKER)?;
        class.attributes.push(Attribute {
            name_index: marker,
            info: Vec::new(),
        });

        debug!(
            unit = unit_name,
            methods = summary.methods_instrumented,
            probes = summary.probes_inserted,
            "unit rewritten"
        );
        Ok(RewriteOutcome::Rewritten {
            bytes: class.to_bytes()?,
            summary,
        })
    }

    /// Rewrite the methods of an already parsed class in place.
    ///
    /// The probe constants are added to the pool on the first method that has code. The
    /// marker attribute is not added.
    ///
    /// # Errors
    ///
    /// See [`UnitRewriter::rewrite`].
    pub fn rewrite_class(&self, class: &mut ClassFile, unit_name: &str) -> Result<RewriteSummary> {
        let mut summary = RewriteSummary::default();
        let mut sequence: Option<ProbeSequence> = None;

        for index in 0..class.methods.len() {
            let name = class.member_name(&class.methods[index])?;
            if !self.wants_method(&name) {
                debug!(unit = unit_name, method = %name, "method filtered out");
                continue;
            }
            let Some(position) =
                class.methods[index].attribute_position(&class.constant_pool, names::CODE)
            else {
                continue;
            };

            let probe = match sequence {
                Some(probe) => probe,
                None => {
                    let probe =
                        ProbeSequence::prepare(&mut class.constant_pool, unit_name, &self.config)?;
                    sequence = Some(probe);
                    probe
                }
            };

            let info = &class.methods[index].attributes[position].info;
            if let Some(rewritten) =
                method::rewrite_code(info, &mut class.constant_pool, &probe, &name)?
            {
                class.methods[index].attributes[position].info = rewritten.info;
                summary.methods_instrumented += 1;
                summary.probes_inserted += rewritten.probes;
            }
        }
        Ok(summary)
    }
}

impl UnitTransform for UnitRewriter {
    fn rewrite(&self, bytes: &[u8], unit_name: &str) -> Result<RewriteOutcome> {
        UnitRewriter::rewrite(self, bytes, unit_name)
    }
}
