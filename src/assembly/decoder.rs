//! JVM bytecode decoding.
//!
//! [`decode_code`] turns the `code` array of a method into a linear list of
//! [`Instruction`]s. Branch offsets are made absolute and stored as [`Label`]s carrying the
//! target offset, so the instruction list can be edited and re-encoded without tracking
//! relative displacements by hand.
//!
//! # Examples
//!
//! ```rust
//! use lineprobe::assembly::{decode_code, Label, Operand};
//!
//! // iconst_0, ifeq +4, nop, return
//! let code = [0x03, 0x99, 0x00, 0x04, 0x00, 0xB1];
//! let instructions = decode_code(&code)?;
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[1].operand, Operand::Branch(Label(5)));
//! # Ok::<(), lineprobe::Error>(())
//! ```

use std::collections::HashSet;

use crate::{
    assembly::{
        instruction::{Instruction, Label, Operand, OperandType, INSTRUCTIONS},
        opcodes,
    },
    file::parser::Parser,
    Result,
};

/// Decode a single instruction at the parser's position.
///
/// The parser must be positioned relative to the start of the code array, since the padding
/// of `tableswitch` and `lookupswitch` is measured from there.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for reserved opcodes, opcodes that can not follow
/// `wide`, or invalid switch tables, and [`crate::Error::OutOfBounds`] for truncated code.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let offset = u32::try_from(start).map_err(|_| crate::Error::CodeTooLarge(start))?;
    let mut opcode = parser.read_be::<u8>()?;
    let wide = opcode == opcodes::WIDE;
    if wide {
        opcode = parser.read_be::<u8>()?;
        if !matches!(
            opcode,
            opcodes::ILOAD..=opcodes::ALOAD
                | opcodes::ISTORE..=opcodes::ASTORE
                | opcodes::RET
                | opcodes::IINC
        ) {
            return Err(malformed_error!(
                "Opcode 0x{:02X} can not be widened (at {})",
                opcode,
                start
            ));
        }
    }

    let info = &INSTRUCTIONS[usize::from(opcode)];
    if info.is_reserved() {
        return Err(malformed_error!(
            "Reserved opcode 0x{:02X} at {}",
            opcode,
            start
        ));
    }

    let relative = |delta: i64| -> Result<Label> {
        let target = i64::from(offset) + delta;
        u32::try_from(target)
            .map(Label)
            .map_err(|_| malformed_error!("Branch at {} targets {}", start, target))
    };

    let operand = match info.operand {
        OperandType::None => Operand::None,
        OperandType::Byte => Operand::Byte(parser.read_be()?),
        OperandType::Short => Operand::Short(parser.read_be()?),
        OperandType::Local if wide => Operand::Local(parser.read_be()?),
        OperandType::Local => Operand::Local(u16::from(parser.read_be::<u8>()?)),
        OperandType::Constant8 => Operand::Constant(u16::from(parser.read_be::<u8>()?)),
        OperandType::Constant16 => Operand::Constant(parser.read_be()?),
        OperandType::Iinc if wide => Operand::Iinc {
            index: parser.read_be()?,
            delta: parser.read_be()?,
        },
        OperandType::Iinc => Operand::Iinc {
            index: u16::from(parser.read_be::<u8>()?),
            delta: i16::from(parser.read_be::<i8>()?),
        },
        OperandType::Branch16 => Operand::Branch(relative(i64::from(parser.read_be::<i16>()?))?),
        OperandType::Branch32 => Operand::Branch(relative(i64::from(parser.read_be::<i32>()?))?),
        OperandType::TableSwitch => {
            parser.align(4)?;
            let default = relative(i64::from(parser.read_be::<i32>()?))?;
            let low = parser.read_be::<i32>()?;
            let high = parser.read_be::<i32>()?;
            if low > high {
                return Err(malformed_error!(
                    "tableswitch at {} has low {} above high {}",
                    start,
                    low,
                    high
                ));
            }
            let count = i64::from(high) - i64::from(low) + 1;
            if count * 4 > parser.remaining() as i64 {
                return Err(crate::Error::OutOfBounds);
            }
            let targets = (0..count)
                .map(|_| relative(i64::from(parser.read_be::<i32>()?)))
                .collect::<Result<Vec<_>>>()?;
            Operand::TableSwitch {
                default,
                low,
                high,
                targets,
            }
        }
        OperandType::LookupSwitch => {
            parser.align(4)?;
            let default = relative(i64::from(parser.read_be::<i32>()?))?;
            let count = parser.read_be::<i32>()?;
            if count < 0 || i64::from(count) * 8 > parser.remaining() as i64 {
                return Err(malformed_error!(
                    "lookupswitch at {} has {} pairs",
                    start,
                    count
                ));
            }
            let pairs = (0..count)
                .map(|_| {
                    let key = parser.read_be::<i32>()?;
                    Ok((key, relative(i64::from(parser.read_be::<i32>()?))?))
                })
                .collect::<Result<Vec<_>>>()?;
            Operand::LookupSwitch { default, pairs }
        }
        OperandType::InvokeInterface => {
            let index = parser.read_be()?;
            let count = parser.read_be()?;
            parser.advance_by(1)?;
            Operand::InvokeInterface { index, count }
        }
        OperandType::InvokeDynamic => {
            let index = parser.read_be()?;
            parser.advance_by(2)?;
            Operand::InvokeDynamic(index)
        }
        OperandType::MultiANewArray => Operand::MultiANewArray {
            index: parser.read_be()?,
            dimensions: parser.read_be()?,
        },
        OperandType::ArrayType => Operand::ArrayType(parser.read_be()?),
        OperandType::Wide => {
            return Err(malformed_error!("Nested wide prefix at {}", start));
        }
    };

    Ok(Instruction {
        offset,
        opcode,
        wide,
        operand,
    })
}

/// Decode a complete `code` array.
///
/// # Errors
///
/// Returns [`crate::Error::Empty`] for empty code, [`crate::Error::Malformed`] for invalid
/// instructions and for branch targets that do not land on the start of an instruction.
pub fn decode_code(code: &[u8]) -> Result<Vec<Instruction>> {
    if code.is_empty() {
        return Err(crate::Error::Empty);
    }

    let mut parser = Parser::new(code);
    let mut instructions = Vec::with_capacity(code.len() / 2);
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    let starts: HashSet<u32> = instructions.iter().map(|instr| instr.offset).collect();
    for instr in &instructions {
        for target in instr.targets() {
            if !starts.contains(&target.0) {
                return Err(malformed_error!(
                    "{} at {} targets {}, which is not an instruction boundary",
                    instr.mnemonic(),
                    instr.offset,
                    target.0
                ));
            }
        }
    }

    Ok(instructions)
}
