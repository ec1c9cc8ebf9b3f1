// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # lineprobe
//!
//! Load-time instrumentation of JVM class files for progress point discovery.
//!
//! `lineprobe` rewrites class files as the host runtime loads them so that every time
//! execution crosses into a new source line, a probe reports `(unit, line, timestamp)` to a
//! hit recorder. The recorded stream feeds a causal profiler looking for progress points:
//! lines whose execution rate follows the throughput of the whole program.
//!
//! ## Features
//!
//! - **Lossless class file model** - constant pool, attributes, stack map frames and line
//!   tables, with unknown attributes re-emitted byte for byte
//! - **Bytecode assembly** - decoding and re-encoding with label based relocation, `wide`
//!   handling, switch padding and operand stack depth analysis
//! - **Frame preserving rewrites** - probes are stack neutral, so branches, exception
//!   tables, line and local variable tables and stack map frames are relocated, not rebuilt
//! - **Concurrent recording** - lock-free in-memory, console or durable file sinks
//! - **Fail-safe dispatch** - a class that can not be rewritten is loaded unchanged
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lineprobe::prelude::*;
//!
//! let bytes = std::fs::read("Worker.class")?;
//! let rewriter = UnitRewriter::new(ProbeConfig::default());
//! if let RewriteOutcome::Rewritten { bytes, summary } = rewriter.rewrite(&bytes, "com/acme/Worker")? {
//!     println!("inserted {} probes", summary.probes_inserted);
//!     std::fs::write("Worker.class", bytes)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! Data flows one way, from the host's class loading hook to the recorder:
//!
//! - [`agent`] - bootstrap: options, logging, recorder installation, transformer registration
//! - [`dispatcher`] - the decision table deciding which loads reach the rewriter
//! - [`rewriter`] - probe planning and insertion per method
//! - [`assembly`] - bytecode decoding, encoding and stack analysis
//! - [`classfile`] - the structural class file model and a small class builder
//! - [`isolation`] - one-time installation of the recorder unit
//! - [`recorder`] - the hit recorder and its sinks
//! - [`config`] - the agent option string
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Parse and rewrite failures never reach
//! the instrumented program: the dispatcher turns them into "load unchanged". The only fatal
//! error is [`Error::RecorderUnreachable`].
//!
//! ```rust
//! use lineprobe::{rewriter::{ProbeConfig, UnitRewriter}, Error};
//!
//! let rewriter = UnitRewriter::new(ProbeConfig::default());
//! match rewriter.rewrite(b"\xCA\xFE", "demo/Truncated") {
//!     Err(Error::OutOfBounds) => println!("truncated class file"),
//!     other => println!("{other:?}"),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo bench --bench rewrite
//! cargo +nightly fuzz run dispatch --release
//! ```

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

pub mod agent;
pub mod assembly;
pub mod classfile;
pub mod config;
pub mod dispatcher;
pub mod file;
pub mod isolation;
pub mod recorder;
pub mod rewriter;

/// `lineprobe` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `lineprobe` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the failure
/// classes and how each one is handled.
pub use error::Error;

/// Cursor over a byte buffer with bounds-checked big-endian reads.
pub use file::parser::Parser;
