//! JVM bytecode decoding, encoding and analysis.
//!
//! The rewriter works on decoded instruction lists: [`decode_code`] turns a method's `code`
//! array into [`Instruction`]s whose branch targets are [`Label`]s, the
//! [`InstructionEncoder`] lays out an edited list again and patches every label reference,
//! and [`compute_max_stack`] recomputes the operand stack depth of the result.
//!
//! # Key Components
//!
//! - [`opcodes`] - Raw opcode byte constants
//! - [`INSTRUCTIONS`] - Static metadata for every opcode
//! - [`decode_code`] / [`decode_instruction`] - Bytecode to [`Instruction`]s
//! - [`InstructionEncoder`] - [`Instruction`]s to bytecode, with label fixups
//! - [`compute_max_stack`] - Work-list stack depth analysis
//! - [`descriptor`] - Slot sizes of field and method descriptors

pub mod descriptor;
pub mod opcodes;

mod decoder;
mod encoder;
mod instruction;
mod stack;

pub use decoder::{decode_code, decode_instruction};
pub use encoder::{opcode_for, EncodedCode, InstructionEncoder, LabelFixup};
pub use instruction::{
    FlowType, Instruction, JvmInstruction, Label, Operand, OperandType, StackEffect, INSTRUCTIONS,
};
pub use stack::{compute_max_stack, stack_effect};
