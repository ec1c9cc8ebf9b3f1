//! Byte-level access to class file buffers.
//!
//! Class files arrive as plain byte slices handed over by the host runtime, so this module
//! only provides the big-endian primitives ([`io`]) and the cursor ([`parser::Parser`]) the
//! structural parser is built on.

pub mod io;
pub mod parser;
