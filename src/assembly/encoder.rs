//! JVM bytecode encoding.
//!
//! The encoder is the counterpart of the [`crate::assembly::decoder`]: it consumes the same
//! [`Instruction`] values and the same [`INSTRUCTIONS`] table, so decoding and re-encoding an
//! unedited method reproduces its bytes.
//!
//! Branch targets are [`Label`]s. A label is bound to the current position with
//! [`InstructionEncoder::define_label`] and every reference to it is patched in
//! [`InstructionEncoder::finalize`]. Because instruction sizes only depend on already emitted
//! bytes (switch padding is measured from the code start), a single pass fixes the layout.
//!
//! # Examples
//!
//! ```rust
//! use lineprobe::assembly::{InstructionEncoder, Label, Operand};
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit_instruction("iload_0", Operand::None)?;
//! encoder.emit_instruction("ifeq", Operand::Branch(Label(1)))?;
//! encoder.emit_instruction("iinc", Operand::Iinc { index: 0, delta: 1 })?;
//! encoder.define_label(Label(1))?;
//! encoder.emit_instruction("return", Operand::None)?;
//!
//! let encoded = encoder.finalize()?;
//! assert_eq!(encoded.code, [0x1A, 0x99, 0x00, 0x06, 0x84, 0x00, 0x01, 0xB1]);
//! # Ok::<(), lineprobe::Error>(())
//! ```

use std::{collections::HashMap, sync::OnceLock};

use crate::{
    assembly::{
        instruction::{Instruction, Label, Operand, OperandType, INSTRUCTIONS},
        opcodes,
    },
    classfile::ConstantPool,
    file::io::{write_be_at, write_be_to},
    Error, Result,
};

/// Mnemonic to opcode lookup, built from [`INSTRUCTIONS`] on first use.
static MNEMONIC_TO_OPCODE: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();

fn get_mnemonic_lookup() -> &'static HashMap<&'static str, u8> {
    MNEMONIC_TO_OPCODE.get_or_init(|| {
        INSTRUCTIONS
            .iter()
            .zip(0..=u8::MAX)
            .filter(|(instr, _)| !instr.is_reserved())
            .map(|(instr, opcode)| (instr.mnemonic, opcode))
            .collect()
    })
}

/// Resolve a mnemonic to its opcode.
///
/// # Errors
///
/// Returns [`Error::Malformed`] for unknown mnemonics.
pub fn opcode_for(mnemonic: &str) -> Result<u8> {
    get_mnemonic_lookup()
        .get(mnemonic)
        .copied()
        .ok_or_else(|| malformed_error!("Unknown mnemonic '{}'", mnemonic))
}

/// A reference to a label that still has to be patched.
#[derive(Debug, Clone)]
pub struct LabelFixup {
    /// The referenced label
    pub label: Label,
    /// Position of the offset field
    pub fixup_position: usize,
    /// Size of the offset field, 2 or 4 bytes
    pub offset_size: u8,
    /// Position of the branching instruction, which offsets are relative to
    pub instruction_position: usize,
}

/// Output of [`InstructionEncoder::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCode {
    /// The bytecode
    pub code: Vec<u8>,
    /// Final position of every defined label
    pub labels: HashMap<Label, u32>,
}

impl EncodedCode {
    /// Final position of `label`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the label was never defined.
    pub fn position(&self, label: Label) -> Result<u32> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| malformed_error!("Label {} was never defined", label.0))
    }
}

/// Bytecode encoder with label resolution.
///
/// Not [`Sync`]: create one encoder per method body.
#[derive(Debug, Default)]
pub struct InstructionEncoder {
    /// Generated bytecode
    bytecode: Vec<u8>,
    /// Defined label positions
    labels: HashMap<Label, u32>,
    /// Pending label references
    fixups: Vec<LabelFixup>,
}

impl InstructionEncoder {
    /// Create an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with room for `capacity` bytes of code.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        InstructionEncoder {
            bytecode: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Position the next instruction will be emitted at.
    #[must_use]
    pub fn current_position(&self) -> u32 {
        self.bytecode.len() as u32
    }

    /// Position of an already defined label.
    #[must_use]
    pub fn label_position(&self, label: Label) -> Option<u32> {
        self.labels.get(&label).copied()
    }

    /// Bind `label` to the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the label is already defined.
    pub fn define_label(&mut self, label: Label) -> Result<()> {
        let position = self.current_position();
        if self.labels.insert(label, position).is_some() {
            return Err(malformed_error!("Label {} defined twice", label.0));
        }
        Ok(())
    }

    /// Emit an instruction by mnemonic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for unknown mnemonics or operands that do not fit the
    /// instruction.
    pub fn emit_instruction(&mut self, mnemonic: &str, operand: Operand) -> Result<()> {
        let opcode = opcode_for(mnemonic)?;
        self.emit(&Instruction::new(opcode, operand))
    }

    /// Emit a decoded or constructed instruction.
    ///
    /// Local variable instructions are widened when their operands need it or when the
    /// instruction was decoded with a `wide` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the operand does not match the opcode's layout.
    pub fn emit(&mut self, instruction: &Instruction) -> Result<()> {
        let opcode = instruction.opcode;
        let info = &INSTRUCTIONS[usize::from(opcode)];
        let position = self.bytecode.len();

        match (info.operand, &instruction.operand) {
            (OperandType::None, Operand::None) => self.bytecode.push(opcode),
            (OperandType::Byte, Operand::Byte(value)) => {
                self.bytecode.push(opcode);
                write_be_to(&mut self.bytecode, *value);
            }
            (OperandType::Short, Operand::Short(value)) => {
                self.bytecode.push(opcode);
                write_be_to(&mut self.bytecode, *value);
            }
            (OperandType::Local, Operand::Local(index)) => {
                if instruction.wide || *index > 0xFF {
                    self.bytecode.push(opcodes::WIDE);
                    self.bytecode.push(opcode);
                    write_be_to(&mut self.bytecode, *index);
                } else {
                    self.bytecode.push(opcode);
                    self.bytecode.push(*index as u8);
                }
            }
            (OperandType::Iinc, Operand::Iinc { index, delta }) => {
                let narrow = i8::try_from(*delta).ok().filter(|_| *index <= 0xFF);
                match narrow {
                    Some(delta) if !instruction.wide => {
                        self.bytecode.push(opcode);
                        self.bytecode.push(*index as u8);
                        write_be_to(&mut self.bytecode, delta);
                    }
                    _ => {
                        self.bytecode.push(opcodes::WIDE);
                        self.bytecode.push(opcode);
                        write_be_to(&mut self.bytecode, *index);
                        write_be_to(&mut self.bytecode, *delta);
                    }
                }
            }
            (OperandType::Constant8, Operand::Constant(index)) => {
                let narrow = u8::try_from(*index).map_err(|_| {
                    malformed_error!("{} can not address constant #{}", info.mnemonic, index)
                })?;
                self.bytecode.push(opcode);
                self.bytecode.push(narrow);
            }
            (OperandType::Constant16, Operand::Constant(index)) => {
                self.bytecode.push(opcode);
                write_be_to(&mut self.bytecode, *index);
            }
            (OperandType::Branch16, Operand::Branch(label)) => {
                self.bytecode.push(opcode);
                self.push_fixup(*label, 2, position);
            }
            (OperandType::Branch32, Operand::Branch(label)) => {
                self.bytecode.push(opcode);
                self.push_fixup(*label, 4, position);
            }
            (
                OperandType::TableSwitch,
                Operand::TableSwitch {
                    default,
                    low,
                    high,
                    targets,
                },
            ) => {
                if i64::from(*high) - i64::from(*low) + 1 != targets.len() as i64 {
                    return Err(malformed_error!(
                        "tableswitch {}..={} with {} targets",
                        low,
                        high,
                        targets.len()
                    ));
                }
                self.bytecode.push(opcode);
                self.pad_to_word();
                self.push_fixup(*default, 4, position);
                write_be_to(&mut self.bytecode, *low);
                write_be_to(&mut self.bytecode, *high);
                for target in targets {
                    self.push_fixup(*target, 4, position);
                }
            }
            (OperandType::LookupSwitch, Operand::LookupSwitch { default, pairs }) => {
                let count = i32::try_from(pairs.len())
                    .map_err(|_| malformed_error!("lookupswitch with {} pairs", pairs.len()))?;
                self.bytecode.push(opcode);
                self.pad_to_word();
                self.push_fixup(*default, 4, position);
                write_be_to(&mut self.bytecode, count);
                for (key, target) in pairs {
                    write_be_to(&mut self.bytecode, *key);
                    self.push_fixup(*target, 4, position);
                }
            }
            (OperandType::InvokeInterface, Operand::InvokeInterface { index, count }) => {
                self.bytecode.push(opcode);
                write_be_to(&mut self.bytecode, *index);
                self.bytecode.push(*count);
                self.bytecode.push(0);
            }
            (OperandType::InvokeDynamic, Operand::InvokeDynamic(index)) => {
                self.bytecode.push(opcode);
                write_be_to(&mut self.bytecode, *index);
                self.bytecode.extend_from_slice(&[0, 0]);
            }
            (OperandType::MultiANewArray, Operand::MultiANewArray { index, dimensions }) => {
                self.bytecode.push(opcode);
                write_be_to(&mut self.bytecode, *index);
                self.bytecode.push(*dimensions);
            }
            (OperandType::ArrayType, Operand::ArrayType(code)) => {
                self.bytecode.push(opcode);
                self.bytecode.push(*code);
            }
            (expected, operand) => {
                return Err(malformed_error!(
                    "Operand {:?} does not fit '{}' (expects {:?})",
                    operand,
                    info.mnemonic,
                    expected
                ));
            }
        }

        Ok(())
    }

    /// Emit `ldc` or `ldc_w`, whichever can address `index`.
    ///
    /// # Errors
    ///
    /// Never fails for valid pool indices; the `Result` mirrors [`Self::emit`].
    pub fn emit_ldc(&mut self, index: u16) -> Result<()> {
        let opcode = if index <= 0xFF {
            opcodes::LDC
        } else {
            opcodes::LDC_W
        };
        self.emit(&Instruction::new(opcode, Operand::Constant(index)))
    }

    /// Emit the shortest instruction that pushes the `int` constant `value`.
    ///
    /// Values outside the `sipush` range are loaded from a `CONSTANT_Integer`, which is
    /// added to `pool` if it is not present yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstantPoolOverflow`] if the constant does not fit in the pool.
    pub fn emit_push_int(&mut self, value: i32, pool: &mut ConstantPool) -> Result<()> {
        match value {
            -1..=5 => {
                let opcode = (i32::from(opcodes::ICONST_0) + value) as u8;
                self.emit(&Instruction::new(opcode, Operand::None))
            }
            v if i8::try_from(v).is_ok() => {
                self.emit(&Instruction::new(opcodes::BIPUSH, Operand::Byte(v as i8)))
            }
            v if i16::try_from(v).is_ok() => {
                self.emit(&Instruction::new(opcodes::SIPUSH, Operand::Short(v as i16)))
            }
            v => {
                let index = pool.add_integer(v)?;
                self.emit_ldc(index)
            }
        }
    }

    /// Resolve every label reference and return the finished code.
    ///
    /// # Errors
    ///
    /// - [`Error::CodeTooLarge`] if the code exceeds 65535 bytes
    /// - [`Error::BranchOutOfRange`] if a 16-bit branch can not reach its target
    /// - [`Error::Malformed`] if a referenced label was never defined
    pub fn finalize(mut self) -> Result<EncodedCode> {
        if self.bytecode.len() > usize::from(u16::MAX) {
            return Err(Error::CodeTooLarge(self.bytecode.len()));
        }

        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let target = self.labels.get(&fixup.label).copied().ok_or_else(|| {
                malformed_error!(
                    "Branch at {} references undefined label {}",
                    fixup.instruction_position,
                    fixup.label.0
                )
            })?;
            let offset = i64::from(target) - fixup.instruction_position as i64;
            let mut at = fixup.fixup_position;
            if fixup.offset_size == 2 {
                let narrow = i16::try_from(offset).map_err(|_| Error::BranchOutOfRange {
                    at: fixup.instruction_position,
                    offset,
                })?;
                write_be_at(&mut self.bytecode, &mut at, narrow)?;
            } else {
                // code is capped at 65535 bytes, so every offset fits 32 bits
                write_be_at(&mut self.bytecode, &mut at, offset as i32)?;
            }
        }

        Ok(EncodedCode {
            code: self.bytecode,
            labels: self.labels,
        })
    }

    fn push_fixup(&mut self, label: Label, offset_size: u8, instruction_position: usize) {
        self.fixups.push(LabelFixup {
            label,
            fixup_position: self.bytecode.len(),
            offset_size,
            instruction_position,
        });
        self.bytecode
            .extend(std::iter::repeat(0).take(usize::from(offset_size)));
    }

    fn pad_to_word(&mut self) {
        while self.bytecode.len() % 4 != 0 {
            self.bytecode.push(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::decode_code;

    #[test]
    fn decode_encode_is_identity() {
        #[rustfmt::skip]
        let code = [
            0x1A,                   // 0: iload_0
            0xAA, 0x00, 0x00,       // 1: tableswitch
            0x00, 0x00, 0x00, 0x17,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x17,
            0x00, 0x00, 0x00, 0x18,
            0x00, 0xB1,             // 24: nop, 25: return
        ];
        let mut encoder = InstructionEncoder::new();
        for instr in decode_code(&code).unwrap() {
            encoder.define_label(Label(instr.offset)).unwrap();
            encoder.emit(&instr).unwrap();
        }
        assert_eq!(encoder.finalize().unwrap().code, code);
    }

    #[test]
    fn switch_padding_follows_position() {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_instruction("nop", Operand::None).unwrap();
        encoder.emit_instruction("nop", Operand::None).unwrap();
        encoder.emit_instruction("iload_0", Operand::None).unwrap();
        encoder
            .emit_instruction(
                "lookupswitch",
                Operand::LookupSwitch {
                    default: Label(9),
                    pairs: vec![],
                },
            )
            .unwrap();
        encoder.define_label(Label(9)).unwrap();
        encoder.emit_instruction("return", Operand::None).unwrap();

        let encoded = encoder.finalize().unwrap();
        // opcode at 3, no padding needed, default at 4..8, count at 8..12
        assert_eq!(encoded.code.len(), 13);
        assert_eq!(&encoded.code[4..8], [0, 0, 0, 9]);
        assert_eq!(encoded.position(Label(9)).unwrap(), 12);
    }

    #[test]
    fn widens_locals_and_iinc() {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_instruction("aload", Operand::Local(256)).unwrap();
        encoder
            .emit_instruction("iinc", Operand::Iinc { index: 1, delta: 200 })
            .unwrap();
        encoder.emit_instruction("iload", Operand::Local(3)).unwrap();
        let code = encoder.finalize().unwrap().code;
        assert_eq!(
            code,
            [0xC4, 0x19, 0x01, 0x00, 0xC4, 0x84, 0x00, 0x01, 0x00, 0xC8, 0x15, 0x03]
        );
    }

    #[test]
    fn push_int_picks_the_smallest_form() {
        let mut pool = ConstantPool::new();
        let mut encoder = InstructionEncoder::new();
        for value in [-1, 5, 6, -128, 300, 70_000] {
            encoder.emit_push_int(value, &mut pool).unwrap();
        }
        let code = encoder.finalize().unwrap().code;
        assert_eq!(
            code,
            [0x02, 0x08, 0x10, 0x06, 0x10, 0x80, 0x11, 0x01, 0x2C, 0x12, 0x01]
        );
        assert_eq!(pool.find(&crate::classfile::Constant::Integer(70_000)), Some(1));
    }

    #[test]
    fn ldc_needs_a_narrow_index() {
        let mut encoder = InstructionEncoder::new();
        assert!(encoder.emit_instruction("ldc", Operand::Constant(300)).is_err());
        encoder.emit_ldc(300).unwrap();
        encoder.emit_ldc(3).unwrap();
        assert_eq!(encoder.finalize().unwrap().code, [0x13, 0x01, 0x2C, 0x12, 0x03]);
    }

    #[test]
    fn branch_out_of_range() {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_instruction("goto", Operand::Branch(Label(1))).unwrap();
        for _ in 0..40_000 {
            encoder.emit_instruction("nop", Operand::None).unwrap();
        }
        encoder.define_label(Label(1)).unwrap();
        encoder.emit_instruction("return", Operand::None).unwrap();
        assert!(matches!(
            encoder.finalize(),
            Err(Error::BranchOutOfRange { at: 0, offset: 40_003 })
        ));
    }

    #[test]
    fn code_too_large() {
        let mut encoder = InstructionEncoder::new();
        for _ in 0..65_536 {
            encoder.emit_instruction("nop", Operand::None).unwrap();
        }
        assert!(matches!(encoder.finalize(), Err(Error::CodeTooLarge(65_536))));
    }

    #[test]
    fn label_errors() {
        let mut encoder = InstructionEncoder::new();
        encoder.define_label(Label(0)).unwrap();
        assert!(encoder.define_label(Label(0)).is_err());
        encoder.emit_instruction("goto", Operand::Branch(Label(5))).unwrap();
        assert!(encoder.finalize().is_err());

        let mut encoder = InstructionEncoder::new();
        assert!(encoder.emit_instruction("goto", Operand::Local(1)).is_err());
        assert!(encoder.emit_instruction("frobnicate", Operand::None).is_err());
    }

    #[test]
    fn lookup_table_is_complete() {
        assert_eq!(get_mnemonic_lookup().len(), 202);
        assert_eq!(opcode_for("invokestatic").unwrap(), opcodes::INVOKESTATIC);
    }
}
