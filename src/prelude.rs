//! # lineprobe Prelude
//!
//! The most commonly used types of the crate in one import.
//!
//! ```rust
//! use lineprobe::prelude::*;
//!
//! let rewriter = UnitRewriter::new(ProbeConfig::default());
//! let dispatcher = Dispatcher::with_rewriter(ExclusionSet::new(), rewriter.config().clone());
//! assert!(dispatcher.exclusions().is_excluded(RECORDER_CLASS));
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all lineprobe operations
pub use crate::Error;

/// The result type used throughout lineprobe
pub use crate::Result;

// ================================================================================================
// Class Files and Bytecode
// ================================================================================================

pub use crate::classfile::{
    builder::{ClassBuilder, MethodBuilder},
    AccessFlags, ClassFile, CodeAttribute, ConstantPool,
};

pub use crate::assembly::{decode_code, Instruction, InstructionEncoder, Label, Operand};

// ================================================================================================
// Rewriting
// ================================================================================================

pub use crate::rewriter::{
    probe_sites, ProbeConfig, RewriteOutcome, RewriteSummary, TimestampSource, UnchangedReason,
    UnitRewriter, UnitTransform,
};

// ================================================================================================
// Runtime
// ================================================================================================

pub use crate::{
    agent::{Agent, ClassFileTransformer, HostInstrumentation},
    config::AgentOptions,
    dispatcher::{Decision, Dispatcher, ExclusionSet, LoadRequest, LoaderId, PassReason},
    isolation::{ClassDefiner, RecorderInstaller, RECORDER_CLASS},
    recorder::{HitFormat, HitRecord, HitRecorder, HitSink, HitThread, MemorySink, SinkKind},
};
