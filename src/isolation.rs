//! Installation of the hit recorder unit.
//!
//! Probes call `lineprobe/runtime/HitRecorder.registerHit` from every instrumented class, so
//! the recorder unit must be visible from every loader. [`RecorderInstaller`] hands its
//! compiled form to the host through [`ClassDefiner::define_isolated`], which defines it in
//! a context every other loader delegates to, and binds its `native` methods to
//! [`crate::recorder::register_hit`].
//!
//! The generated recorder unit declares only `native` methods. It has no `Code` attribute
//! and no line numbers, so even if it reached the rewriter it would come back unchanged.
//! The dispatcher excludes it by name as well.
//!
//! Installation happens once per process. If it fails, every later attempt reports the same
//! [`Error::RecorderUnreachable`].

use std::sync::OnceLock;

use tracing::{debug, error};

use crate::{
    classfile::{
        builder::{ClassBuilder, MethodBuilder},
        AccessFlags,
    },
    recorder,
    rewriter::probe::{RECORDER_METHOD, TIMED_DESCRIPTOR, UNTIMED_DESCRIPTOR},
    Error, Result,
};

/// Internal name of the recorder unit probes call.
pub const RECORDER_CLASS: &str = "lineprobe/runtime/HitRecorder";

/// Native implementation behind one recorder method.
#[derive(Debug, Clone, Copy)]
pub enum NativeEntry {
    /// `registerHit(String, int)`
    Untimed(fn(&str, u32)),
    /// `registerHit(String, int, long)`
    Timed(fn(&str, u32, i64)),
}

/// A `native` method of the recorder unit and the function it binds to.
#[derive(Debug, Clone, Copy)]
pub struct NativeMethod {
    /// Method name
    pub name: &'static str,
    /// Method descriptor
    pub descriptor: &'static str,
    /// Implementation
    pub entry: NativeEntry,
}

/// The natives of the recorder unit.
#[must_use]
pub fn recorder_natives(timed: bool) -> Vec<NativeMethod> {
    let mut natives = vec![NativeMethod {
        name: RECORDER_METHOD,
        descriptor: UNTIMED_DESCRIPTOR,
        entry: NativeEntry::Untimed(recorder::register_hit),
    }];
    if timed {
        natives.push(NativeMethod {
            name: RECORDER_METHOD,
            descriptor: TIMED_DESCRIPTOR,
            entry: NativeEntry::Timed(recorder::register_hit_timed),
        });
    }
    natives
}

/// Host capability to define classes outside the regular loader hierarchy.
pub trait ClassDefiner: Send + Sync {
    /// Define `bytes` as `name` in a context reachable from every loader.
    ///
    /// # Errors
    ///
    /// Any error; the installer reports it as [`Error::RecorderUnreachable`].
    fn define_isolated(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Bind the `native` methods of the class `name`.
    ///
    /// # Errors
    ///
    /// Any error; the installer reports it as [`Error::RecorderUnreachable`].
    fn bind_natives(&self, name: &str, methods: &[NativeMethod]) -> Result<()>;
}

/// Compiled form of the recorder unit.
///
/// A `public final` class with a `public static native` method per entry point. With
/// `timed` the `(Ljava/lang/String;IJ)V` overload is declared as well.
///
/// # Errors
///
/// Only if the class builder rejects the layout, which does not happen for this fixed shape.
pub fn recorder_stub_bytes(timed: bool) -> Result<Vec<u8>> {
    let native = AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::NATIVE;
    let mut builder = ClassBuilder::new(RECORDER_CLASS)
        .access(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER);
    for method in recorder_natives(timed) {
        builder = builder.method(
            MethodBuilder::new(method.name, method.descriptor)
                .access(native)
                .native(),
        );
    }
    builder.to_bytes()
}

/// One-time installation of the recorder unit.
#[derive(Debug, Default)]
pub struct RecorderInstaller {
    outcome: OnceLock<std::result::Result<(), String>>,
}

impl RecorderInstaller {
    /// A fresh installer that has not installed anything yet.
    #[must_use]
    pub const fn new() -> Self {
        RecorderInstaller {
            outcome: OnceLock::new(),
        }
    }

    /// The installer shared by the whole process.
    pub fn global() -> &'static RecorderInstaller {
        static INSTALLER: RecorderInstaller = RecorderInstaller::new();
        &INSTALLER
    }

    /// Returns `true` once the recorder unit was installed successfully.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(())))
    }

    /// Define the recorder unit through `definer` and bind its natives.
    ///
    /// Only the first call does any work; later calls return its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecorderUnreachable`] if the first installation failed.
    pub fn install<D: ClassDefiner + ?Sized>(&self, definer: &D, timed: bool) -> Result<()> {
        let outcome = self.outcome.get_or_init(|| {
            Self::define(definer, timed).map_err(|error| {
                error!(unit = RECORDER_CLASS, %error, "recorder installation failed");
                error.to_string()
            })
        });
        outcome.clone().map_err(Error::RecorderUnreachable)
    }

    fn define<D: ClassDefiner + ?Sized>(definer: &D, timed: bool) -> Result<()> {
        let bytes = recorder_stub_bytes(timed)?;
        definer.define_isolated(RECORDER_CLASS, &bytes)?;
        definer.bind_natives(RECORDER_CLASS, &recorder_natives(timed))?;
        debug!(unit = RECORDER_CLASS, size = bytes.len(), "recorder unit installed");
        Ok(())
    }
}
