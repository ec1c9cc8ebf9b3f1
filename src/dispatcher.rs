//! The transform dispatcher.
//!
//! The host calls [`Dispatcher::on_load`] synchronously for every class it loads, possibly
//! from many threads at once. The dispatcher applies its decision table and either hands
//! the bytes to the rewriter or lets them through untouched:
//!
//! | Condition                                   | Result                          |
//! |---------------------------------------------|---------------------------------|
//! | no defining loader (bootstrap)              | [`PassReason::BootstrapLoader`] |
//! | the class is being redefined                | [`PassReason::Redefinition`]    |
//! | no class name                               | [`PassReason::Anonymous`]       |
//! | the name matches the [`ExclusionSet`]       | [`PassReason::Excluded`]        |
//! | otherwise                                   | [`Decision::Rewrite`]           |
//!
//! A rewrite never fails from the host's point of view. Parse failures, rewrite failures and
//! even panics in the rewriter degrade to "unchanged" and are kept as [`TransformFailure`]s
//! for diagnostics.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashSet;
use strum::Display;
use tracing::{debug, warn};

use crate::{
    agent::ClassFileTransformer,
    rewriter::{ProbeConfig, RewriteOutcome, UnitRewriter, UnitTransform},
};

/// Prefix of every unit belonging to the recorder runtime; always excluded.
pub const RUNTIME_PREFIX: &str = "lineprobe/runtime/";

/// Identity of a defining loader as the host reports it.
///
/// The dispatcher remembers which `(loader, class)` pairs it already rewrote, so an id must
/// not be handed to a second loader while the first one is remembered. Hosts that recycle
/// ids of unloaded loaders call [`Dispatcher::forget_loader`] before reusing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(pub u64);

/// One class load as seen by the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    /// Defining loader, `None` for the bootstrap loader
    pub loader: Option<LoaderId>,
    /// Internal class name, `None` for anonymous and hidden classes
    pub unit_name: Option<&'a str>,
    /// Whether an already active class is being redefined or retransformed
    pub being_redefined: bool,
    /// The class file bytes
    pub bytes: &'a [u8],
}

/// Why bytes were passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PassReason {
    /// Defined by the bootstrap loader
    BootstrapLoader,
    /// A redefinition of an active class
    Redefinition,
    /// The class has no name
    Anonymous,
    /// Matched the exclusion set
    Excluded,
    /// This loader already had this class rewritten once
    Duplicate,
    /// The rewriter found nothing to instrument
    NotInstrumentable,
    /// The bytes are not a readable class file
    ParseFailure,
    /// The class could not be re-emitted safely
    RewriteFailure,
}

/// Outcome of the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Leave the bytes alone
    PassThrough(PassReason),
    /// Hand the bytes to the rewriter
    Rewrite,
}

/// Result of [`Dispatcher::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Replacement class file bytes
    Rewritten(Vec<u8>),
    /// The host keeps its bytes
    Unchanged(PassReason),
}

impl Dispatched {
    /// Replacement bytes, `None` meaning "no change" to the host.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Dispatched::Rewritten(bytes) => Some(bytes),
            Dispatched::Unchanged(_) => None,
        }
    }
}

/// Unit names the dispatcher never rewrites, and methods the rewriter should instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    prefixes: Vec<String>,
    method_filter: Vec<String>,
}

impl Default for ExclusionSet {
    fn default() -> Self {
        ExclusionSet {
            prefixes: vec![RUNTIME_PREFIX.to_string()],
            method_filter: Vec::new(),
        }
    }
}

impl ExclusionSet {
    /// The mandatory recorder exclusion only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The mandatory exclusion plus `prefixes`.
    #[must_use]
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for prefix in prefixes {
            set.add(prefix);
        }
        set
    }

    /// Exclude every unit whose name starts with `prefix`.
    pub fn add(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if !prefix.is_empty() && !self.prefixes.contains(&prefix) {
            self.prefixes.push(prefix);
        }
    }

    /// Stop excluding `prefix`; returns `false` if it was not present or is mandatory.
    pub fn remove(&mut self, prefix: &str) -> bool {
        if prefix == RUNTIME_PREFIX {
            return false;
        }
        let before = self.prefixes.len();
        self.prefixes.retain(|existing| existing != prefix);
        self.prefixes.len() != before
    }

    /// Restrict instrumentation to methods whose name contains one of `filter`.
    #[must_use]
    pub fn with_method_filter(mut self, filter: Vec<String>) -> Self {
        self.method_filter = filter;
        self
    }

    /// Current prefixes, the mandatory one first.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Current method filter.
    #[must_use]
    pub fn method_filter(&self) -> &[String] {
        &self.method_filter
    }

    /// Returns `true` if `unit_name` must not be rewritten.
    #[must_use]
    pub fn is_excluded(&self, unit_name: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| unit_name.starts_with(prefix.as_str()))
    }
}

/// Kind of a [`TransformFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The bytes could not be parsed
    Parse,
    /// The class could not be rewritten
    Rewrite,
    /// The rewriter panicked
    Panic,
}

/// A class that stayed unchanged because the rewrite failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformFailure {
    /// Internal class name
    pub unit: String,
    /// Failure class
    pub kind: FailureKind,
    /// Description
    pub message: String,
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Loads seen
    pub seen: AtomicU64,
    /// Loads answered with rewritten bytes
    pub rewritten: AtomicU64,
    /// Loads passed through by the decision table or the rewriter
    pub passed: AtomicU64,
    /// Loads passed through because the rewrite failed
    pub failed: AtomicU64,
}

impl DispatchStats {
    /// `(seen, rewritten, passed, failed)` at this instant.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.seen.load(Ordering::Relaxed),
            self.rewritten.load(Ordering::Relaxed),
            self.passed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Routes class loads to the rewriter.
pub struct Dispatcher {
    exclusions: ExclusionSet,
    transform: Arc<dyn UnitTransform>,
    rewritten: DashSet<(LoaderId, String)>,
    stats: DispatchStats,
    failures: boxcar::Vec<TransformFailure>,
}

impl Dispatcher {
    /// A dispatcher feeding `transform`.
    pub fn new(exclusions: ExclusionSet, transform: Arc<dyn UnitTransform>) -> Self {
        Dispatcher {
            exclusions,
            transform,
            rewritten: DashSet::new(),
            stats: DispatchStats::default(),
            failures: boxcar::Vec::new(),
        }
    }

    /// A dispatcher feeding a [`UnitRewriter`] that honors the exclusion set's method filter.
    #[must_use]
    pub fn with_rewriter(exclusions: ExclusionSet, config: ProbeConfig) -> Self {
        let rewriter =
            UnitRewriter::new(config).with_method_filter(exclusions.method_filter().to_vec());
        Self::new(exclusions, Arc::new(rewriter))
    }

    /// The exclusion set.
    #[must_use]
    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// The counters.
    #[must_use]
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Every failure so far.
    #[must_use]
    pub fn failures(&self) -> Vec<TransformFailure> {
        self.failures
            .iter()
            .map(|(_, failure)| failure.clone())
            .collect()
    }

    /// Apply the decision table to `request`.
    #[must_use]
    pub fn decide(&self, request: &LoadRequest<'_>) -> Decision {
        if request.loader.is_none() {
            return Decision::PassThrough(PassReason::BootstrapLoader);
        }
        if request.being_redefined {
            return Decision::PassThrough(PassReason::Redefinition);
        }
        match request.unit_name {
            None => Decision::PassThrough(PassReason::Anonymous),
            Some(name) if self.exclusions.is_excluded(name) => {
                Decision::PassThrough(PassReason::Excluded)
            }
            Some(_) => Decision::Rewrite,
        }
    }

    /// Handle one load.
    pub fn dispatch(&self, request: &LoadRequest<'_>) -> Dispatched {
        self.stats.seen.fetch_add(1, Ordering::Relaxed);

        let (loader, unit) = match (self.decide(request), request.loader, request.unit_name) {
            (Decision::Rewrite, Some(loader), Some(unit)) => (loader, unit),
            (Decision::PassThrough(reason), _, unit) => return self.pass(unit, reason),
            (Decision::Rewrite, _, unit) => return self.pass(unit, PassReason::Anonymous),
        };
        if !self.rewritten.insert((loader, unit.to_string())) {
            return self.pass(Some(unit), PassReason::Duplicate);
        }

        let transform = &self.transform;
        let result = catch_unwind(AssertUnwindSafe(|| transform.rewrite(request.bytes, unit)));
        match result {
            Ok(Ok(RewriteOutcome::Rewritten { bytes, summary })) => {
                self.stats.rewritten.fetch_add(1, Ordering::Relaxed);
                debug!(
                    unit,
                    probes = summary.probes_inserted,
                    size = bytes.len(),
                    "class rewritten"
                );
                Dispatched::Rewritten(bytes)
            }
            Ok(Ok(RewriteOutcome::Unchanged(reason))) => {
                debug!(unit, %reason, "nothing to instrument");
                self.pass(Some(unit), PassReason::NotInstrumentable)
            }
            Ok(Err(error)) => {
                let (kind, reason) = if error.is_parse_failure() {
                    (FailureKind::Parse, PassReason::ParseFailure)
                } else {
                    (FailureKind::Rewrite, PassReason::RewriteFailure)
                };
                self.fail(unit, kind, error.to_string());
                Dispatched::Unchanged(reason)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "rewriter panicked".to_string());
                self.fail(unit, FailureKind::Panic, message);
                Dispatched::Unchanged(PassReason::RewriteFailure)
            }
        }
    }

    /// Drop everything remembered about `loader`, typically after the host unloaded it.
    ///
    /// Returns the number of classes that had been rewritten for it.
    pub fn forget_loader(&self, loader: LoaderId) -> usize {
        let before = self.rewritten.len();
        self.rewritten.retain(|(owner, _)| *owner != loader);
        let forgotten = before.saturating_sub(self.rewritten.len());
        debug!(loader = loader.0, forgotten, "loader forgotten");
        forgotten
    }

    /// Handle one load the way the host expects: `None` keeps the original bytes.
    pub fn on_load(&self, request: &LoadRequest<'_>) -> Option<Vec<u8>> {
        self.dispatch(request).into_bytes()
    }

    fn pass(&self, unit: Option<&str>, reason: PassReason) -> Dispatched {
        self.stats.passed.fetch_add(1, Ordering::Relaxed);
        debug!(unit = unit.unwrap_or("<anonymous>"), %reason, "class passed through");
        Dispatched::Unchanged(reason)
    }

    fn fail(&self, unit: &str, kind: FailureKind, message: String) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        warn!(unit, %kind, %message, "class left unchanged");
        self.failures.push(TransformFailure {
            unit: unit.to_string(),
            kind,
            message,
        });
    }
}

impl ClassFileTransformer for Dispatcher {
    fn transform(
        &self,
        loader: Option<LoaderId>,
        class_name: Option<&str>,
        being_redefined: bool,
        bytes: &[u8],
    ) -> Option<Vec<u8>> {
        self.on_load(&LoadRequest {
            loader,
            unit_name: class_name,
            being_redefined,
            bytes,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("exclusions", &self.exclusions)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{isolation::RECORDER_CLASS, test::builders::counter_class, Error, Result};

    struct Exploding;

    impl UnitTransform for Exploding {
        fn rewrite(&self, _: &[u8], _: &str) -> Result<RewriteOutcome> {
            panic!("boom");
        }
    }

    struct Failing;

    impl UnitTransform for Failing {
        fn rewrite(&self, _: &[u8], _: &str) -> Result<RewriteOutcome> {
            Err(Error::CodeTooLarge(70_000))
        }
    }

    fn request<'a>(name: Option<&'a str>, bytes: &'a [u8]) -> LoadRequest<'a> {
        LoadRequest {
            loader: Some(LoaderId(1)),
            unit_name: name,
            being_redefined: false,
            bytes,
        }
    }

    #[test]
    fn decision_table() {
        let dispatcher = Dispatcher::with_rewriter(
            ExclusionSet::with_prefixes(["com/acme/gen/"]),
            ProbeConfig::default(),
        );
        let bytes = [0u8; 4];

        let mut bootstrap = request(Some("java/lang/String"), &bytes);
        bootstrap.loader = None;
        assert_eq!(
            dispatcher.decide(&bootstrap),
            Decision::PassThrough(PassReason::BootstrapLoader)
        );

        let mut redefined = request(Some("demo/Counter"), &bytes);
        redefined.being_redefined = true;
        assert_eq!(
            dispatcher.decide(&redefined),
            Decision::PassThrough(PassReason::Redefinition)
        );

        assert_eq!(
            dispatcher.decide(&request(None, &bytes)),
            Decision::PassThrough(PassReason::Anonymous)
        );
        assert_eq!(
            dispatcher.decide(&request(Some(RECORDER_CLASS), &bytes)),
            Decision::PassThrough(PassReason::Excluded)
        );
        assert_eq!(
            dispatcher.decide(&request(Some("com/acme/gen/Proxy1"), &bytes)),
            Decision::PassThrough(PassReason::Excluded)
        );
        assert_eq!(
            dispatcher.decide(&request(Some("com/acme/Worker"), &bytes)),
            Decision::Rewrite
        );
    }

    #[test]
    fn recorder_prefix_is_mandatory() {
        let mut set = ExclusionSet::with_prefixes(["a/"]);
        assert!(!set.remove(RUNTIME_PREFIX));
        assert!(set.remove("a/"));
        assert!(!set.remove("a/"));
        assert_eq!(set.prefixes(), [RUNTIME_PREFIX]);
        assert!(set.is_excluded(RECORDER_CLASS));
    }

    #[test]
    fn rewrites_once_per_loader() {
        let dispatcher = Dispatcher::with_rewriter(ExclusionSet::new(), ProbeConfig::default());
        let bytes = counter_class().to_bytes().unwrap();
        assert!(dispatcher
            .on_load(&request(Some("demo/Counter"), &bytes))
            .is_some());
        assert_eq!(
            dispatcher.dispatch(&request(Some("demo/Counter"), &bytes)),
            Dispatched::Unchanged(PassReason::Duplicate)
        );

        let mut other_loader = request(Some("demo/Counter"), &bytes);
        other_loader.loader = Some(LoaderId(2));
        assert!(dispatcher.on_load(&other_loader).is_some());
        assert_eq!(dispatcher.stats().snapshot(), (3, 2, 1, 0));
    }

    #[test]
    fn recycled_loader_ids_are_rewritten_again() {
        let dispatcher = Dispatcher::with_rewriter(ExclusionSet::new(), ProbeConfig::default());
        let bytes = counter_class().to_bytes().unwrap();
        let mut second = request(Some("demo/Counter"), &bytes);
        second.loader = Some(LoaderId(2));

        assert!(dispatcher.on_load(&request(Some("demo/Counter"), &bytes)).is_some());
        assert!(dispatcher.on_load(&second).is_some());
        assert_eq!(
            dispatcher.dispatch(&request(Some("demo/Counter"), &bytes)),
            Dispatched::Unchanged(PassReason::Duplicate)
        );

        // loader 1 was unloaded and its id handed to a new loader
        assert_eq!(dispatcher.forget_loader(LoaderId(1)), 1);
        assert_eq!(dispatcher.forget_loader(LoaderId(1)), 0);
        assert!(dispatcher.on_load(&request(Some("demo/Counter"), &bytes)).is_some());
        assert_eq!(
            dispatcher.dispatch(&second),
            Dispatched::Unchanged(PassReason::Duplicate)
        );
    }

    #[test]
    fn failures_degrade_to_pass_through() {
        let dispatcher = Dispatcher::with_rewriter(ExclusionSet::new(), ProbeConfig::default());
        assert_eq!(
            dispatcher.dispatch(&request(Some("demo/Broken"), b"\xCA\xFE\xBA\xBE")),
            Dispatched::Unchanged(PassReason::ParseFailure)
        );

        let failing = Dispatcher::new(ExclusionSet::new(), Arc::new(Failing));
        assert_eq!(
            failing.dispatch(&request(Some("demo/Huge"), b"")),
            Dispatched::Unchanged(PassReason::RewriteFailure)
        );

        let exploding = Dispatcher::new(ExclusionSet::new(), Arc::new(Exploding));
        assert_eq!(
            exploding.dispatch(&request(Some("demo/Bad"), b"")),
            Dispatched::Unchanged(PassReason::RewriteFailure)
        );

        let failures = dispatcher.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Parse);
        assert_eq!(failing.failures()[0].kind, FailureKind::Rewrite);
        assert_eq!(exploding.failures()[0].kind, FailureKind::Panic);
        assert_eq!(exploding.failures()[0].message, "boom");
    }
}
