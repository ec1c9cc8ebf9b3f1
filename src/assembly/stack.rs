//! Operand stack depth analysis.
//!
//! [`compute_max_stack`] runs a work-list data flow over a decoded method and returns the
//! deepest operand stack any path can build, in slots. Descriptor dependent effects (field
//! access, invocations, `multianewarray`) are resolved through the constant pool. Exception
//! handlers are entered with exactly the thrown reference on the stack.

use std::collections::HashMap;

use crate::{
    assembly::{
        descriptor::{field_slots, method_slots},
        instruction::{FlowType, Instruction, Operand, StackEffect},
        opcodes,
    },
    classfile::ConstantPool,
    Error, Result,
};

/// Stack slots consumed and produced by `instruction`.
///
/// # Errors
///
/// Returns [`Error::StackAnalysis`] if a descriptor dependent effect can not be resolved.
pub fn stack_effect(instruction: &Instruction, pool: &ConstantPool) -> Result<(u16, u16)> {
    if let StackEffect::Fixed { pops, pushes } = instruction.info().stack {
        return Ok((u16::from(pops), u16::from(pushes)));
    }

    let resolve = |error: Error| {
        Error::StackAnalysis(format!(
            "{} at {}: {}",
            instruction.mnemonic(),
            instruction.offset,
            error
        ))
    };

    match (instruction.opcode, &instruction.operand) {
        (opcodes::GETSTATIC..=opcodes::PUTFIELD, Operand::Constant(index)) => {
            let member = pool.member_ref(*index).map_err(resolve)?;
            let size = field_slots(&member.descriptor).map_err(resolve)?;
            Ok(match instruction.opcode {
                opcodes::GETSTATIC => (0, size),
                opcodes::PUTSTATIC => (size, 0),
                opcodes::GETFIELD => (1, size),
                _ => (1 + size, 0),
            })
        }
        (opcodes::INVOKEVIRTUAL..=opcodes::INVOKESTATIC, Operand::Constant(index))
        | (opcodes::INVOKEINTERFACE, Operand::InvokeInterface { index, .. }) => {
            let member = pool.member_ref(*index).map_err(resolve)?;
            let (arguments, returns) = method_slots(&member.descriptor).map_err(resolve)?;
            let receiver = u16::from(instruction.opcode != opcodes::INVOKESTATIC);
            Ok((arguments + receiver, returns))
        }
        (opcodes::INVOKEDYNAMIC, Operand::InvokeDynamic(index)) => {
            let descriptor = pool.dynamic_descriptor(*index).map_err(resolve)?;
            method_slots(&descriptor).map_err(resolve)
        }
        (opcodes::MULTIANEWARRAY, Operand::MultiANewArray { dimensions, .. }) => {
            Ok((u16::from(*dimensions), 1))
        }
        _ => Err(Error::StackAnalysis(format!(
            "No stack effect for {} at {}",
            instruction.mnemonic(),
            instruction.offset
        ))),
    }
}

/// Deepest operand stack reachable in `instructions`.
///
/// `handlers` are the offsets of exception handlers; they are analyzed as additional entry
/// points with a depth of one. Code that is not reachable from the entry or a handler does
/// not contribute.
///
/// # Errors
///
/// Returns [`Error::StackAnalysis`] if the stack underflows, two paths reach an instruction
/// with different depths, a branch leaves the method, or an effect can not be resolved.
pub fn compute_max_stack(
    instructions: &[Instruction],
    handlers: &[u32],
    pool: &ConstantPool,
) -> Result<u16> {
    if instructions.is_empty() {
        return Ok(0);
    }

    let index_of: HashMap<u32, usize> = instructions
        .iter()
        .enumerate()
        .map(|(index, instr)| (instr.offset, index))
        .collect();
    let lookup = |offset: u32| -> Result<usize> {
        index_of.get(&offset).copied().ok_or_else(|| {
            Error::StackAnalysis(format!("Control flow reaches {offset}, not an instruction"))
        })
    };

    let mut depths: Vec<Option<u32>> = vec![None; instructions.len()];
    let mut worklist: Vec<usize> = Vec::new();
    let mut max: u32 = 0;

    let enter = |index: usize,
                 depth: u32,
                 depths: &mut Vec<Option<u32>>,
                 worklist: &mut Vec<usize>|
     -> Result<()> {
        match depths[index] {
            None => {
                depths[index] = Some(depth);
                worklist.push(index);
                Ok(())
            }
            Some(known) if known == depth => Ok(()),
            Some(known) => Err(Error::StackAnalysis(format!(
                "Inconsistent stack depth at {}: {} and {}",
                instructions[index].offset, known, depth
            ))),
        }
    };

    enter(0, 0, &mut depths, &mut worklist)?;
    for handler in handlers {
        enter(lookup(*handler)?, 1, &mut depths, &mut worklist)?;
    }
    max = max.max(u32::from(!handlers.is_empty()));

    while let Some(index) = worklist.pop() {
        let instr = &instructions[index];
        let depth = depths[index].unwrap_or_default();
        let (pops, pushes) = stack_effect(instr, pool)?;
        let (pops, pushes) = (u32::from(pops), u32::from(pushes));
        if depth < pops {
            return Err(Error::StackAnalysis(format!(
                "Stack underflow at {} ({}): depth {}, pops {}",
                instr.offset,
                instr.mnemonic(),
                depth,
                pops
            )));
        }
        let after = depth - pops + pushes;
        max = max.max(after);

        let next = index + 1;
        match instr.flow() {
            FlowType::Sequential => {
                if next < instructions.len() {
                    enter(next, after, &mut depths, &mut worklist)?;
                }
            }
            FlowType::ConditionalBranch => {
                for target in instr.targets() {
                    enter(lookup(target.0)?, after, &mut depths, &mut worklist)?;
                }
                if next < instructions.len() {
                    enter(next, after, &mut depths, &mut worklist)?;
                }
            }
            FlowType::UnconditionalBranch | FlowType::Switch => {
                for target in instr.targets() {
                    enter(lookup(target.0)?, after, &mut depths, &mut worklist)?;
                }
            }
            FlowType::Subroutine => {
                // the subroutine sees the return address, the caller resumes without it
                for target in instr.targets() {
                    enter(lookup(target.0)?, after, &mut depths, &mut worklist)?;
                }
                if next < instructions.len() {
                    enter(next, depth, &mut depths, &mut worklist)?;
                }
            }
            FlowType::SubroutineReturn | FlowType::Return | FlowType::Throw => {}
        }
    }

    u16::try_from(max)
        .map_err(|_| Error::StackAnalysis(format!("Stack depth {max} exceeds 65535")))
}
