//! Rewriting of one method body.
//!
//! The instructions are decoded, every line transition gets a probe in front of it, and the
//! body is re-encoded. Each original instruction offset becomes a [`Label`] placed *before*
//! the probes inserted at that offset, which gives the relocation rules:
//!
//! - branch and switch targets, exception ranges and handlers, line number and local
//!   variable ranges and stack map frames move to the label, so a jump to the start of a
//!   line executes that line's probe
//! - `Uninitialized` verification types move to the `new` instruction itself, behind the
//!   probe
//!
//! Code level type annotations address instructions by offset in ways this module does not
//! model, so they are dropped from rewritten methods.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{
    assembly::{compute_max_stack, decode_code, EncodedCode, InstructionEncoder, Label},
    classfile::{
        attributes::{names, Attribute, CodeAttribute, LineNumber, LocalVariable},
        stackmap, ConstantPool,
    },
    rewriter::{probe::ProbeSequence, transitions::plan_probes},
    Result,
};

/// Result of rewriting one `Code` attribute.
#[derive(Debug)]
pub(crate) struct RewrittenCode {
    /// The new `Code` attribute payload
    pub info: Vec<u8>,
    /// Number of probes inserted
    pub probes: usize,
}

/// Offsets of the original code in the rewritten code.
struct Relocation {
    encoded: EncodedCode,
    /// Original instruction offset to the offset of that instruction, behind its probes
    instructions: HashMap<u32, u32>,
}

impl Relocation {
    fn label(&self, offset: u32) -> Result<u32> {
        self.encoded.position(Label(offset))
    }

    fn label_u16(&self, offset: u16) -> Result<u16> {
        Ok(self.label(u32::from(offset))? as u16)
    }

    fn instruction(&self, offset: u32) -> Result<u32> {
        self.instructions.get(&offset).copied().ok_or_else(|| {
            malformed_error!("Offset {} is not the start of an instruction", offset)
        })
    }
}

/// Rewrite the payload of one `Code` attribute.
///
/// Returns `Ok(None)` if the method has no line numbers and is left alone.
pub(crate) fn rewrite_code(
    info: &[u8],
    pool: &mut ConstantPool,
    probe: &ProbeSequence,
    method_name: &str,
) -> Result<Option<RewrittenCode>> {
    let mut code = CodeAttribute::parse(info)?;
    let lines = code.line_numbers(pool)?;
    if lines.is_empty() {
        return Ok(None);
    }

    let instructions = decode_code(&code.code)?;
    let boundaries: HashSet<u32> = instructions.iter().map(|instr| instr.offset).collect();
    let (planned, skipped) = plan_probes(&lines, &boundaries);
    for entry in &skipped {
        debug!(
            method = method_name,
            start_pc = entry.start_pc,
            line = entry.line,
            "line number entry is not on an instruction boundary, no probe"
        );
    }
    if planned.is_empty() {
        return Ok(None);
    }

    let mut probes_at: HashMap<u32, Vec<u16>> = HashMap::new();
    for probe_point in &planned {
        probes_at
            .entry(probe_point.offset)
            .or_default()
            .push(probe_point.line);
    }

    let mut encoder = InstructionEncoder::with_capacity(code.code.len() + planned.len() * 8);
    let mut moved = HashMap::with_capacity(instructions.len());
    for instr in &instructions {
        encoder.define_label(Label(instr.offset))?;
        if let Some(lines) = probes_at.get(&instr.offset) {
            for line in lines {
                probe.emit(&mut encoder, pool, *line)?;
            }
        }
        moved.insert(instr.offset, encoder.current_position());
        encoder.emit(instr)?;
    }
    let code_length = code.code.len() as u32;
    encoder.define_label(Label(code_length))?;
    moved.insert(code_length, encoder.current_position());

    let relocation = Relocation {
        encoded: encoder.finalize()?,
        instructions: moved,
    };

    for entry in &mut code.exception_table {
        entry.start_pc = relocation.label_u16(entry.start_pc)?;
        entry.end_pc = relocation.label_u16(entry.end_pc)?;
        entry.handler_pc = relocation.label_u16(entry.handler_pc)?;
    }

    let nested = std::mem::take(&mut code.attributes);
    for attribute in nested {
        if let Some(attribute) = relocate_attribute(attribute, pool, &relocation, method_name)? {
            code.attributes.push(attribute);
        }
    }

    let rewritten = decode_code(&relocation.encoded.code)?;
    let handlers: Vec<u32> = code
        .exception_table
        .iter()
        .map(|entry| u32::from(entry.handler_pc))
        .collect();
    let computed = compute_max_stack(&rewritten, &handlers, pool)?;
    code.max_stack = code.max_stack.max(computed);
    code.code = relocation.encoded.code;

    Ok(Some(RewrittenCode {
        info: code.to_info()?,
        probes: planned.len(),
    }))
}

/// Relocate one attribute nested in `Code`; `None` drops it.
fn relocate_attribute(
    mut attribute: Attribute,
    pool: &ConstantPool,
    relocation: &Relocation,
    method_name: &str,
) -> Result<Option<Attribute>> {
    if attribute.is_named(pool, names::LINE_NUMBER_TABLE) {
        let rows = LineNumber::parse_table(&attribute.info)?
            .into_iter()
            .filter_map(|row| match relocation.label_u16(row.start_pc) {
                Ok(start_pc) => Some(LineNumber {
                    start_pc,
                    line: row.line,
                }),
                Err(_) => None,
            })
            .collect::<Vec<_>>();
        attribute.info = LineNumber::write_table(&rows)?;
    } else if attribute.is_named(pool, names::LOCAL_VARIABLE_TABLE)
        || attribute.is_named(pool, names::LOCAL_VARIABLE_TYPE_TABLE)
    {
        let rows = LocalVariable::parse_table(&attribute.info)?
            .into_iter()
            .map(|row| {
                let start = relocation.label(u32::from(row.start_pc))?;
                let end = relocation.label(u32::from(row.start_pc) + u32::from(row.length))?;
                Ok(LocalVariable {
                    start_pc: start as u16,
                    length: (end - start) as u16,
                    ..row
                })
            })
            .collect::<Result<Vec<_>>>()?;
        attribute.info = LocalVariable::write_table(&rows)?;
    } else if attribute.is_named(pool, names::STACK_MAP_TABLE) {
        let mut frames = stackmap::parse(&attribute.info)?;
        for frame in &mut frames {
            frame.relocate(
                |offset| relocation.label(offset),
                |offset| relocation.instruction(offset),
            )?;
        }
        attribute.info = stackmap::write(&frames)?;
    } else if attribute.is_named(pool, names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS)
        || attribute.is_named(pool, names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS)
    {
        debug!(method = method_name, "dropping code type annotations");
        return Ok(None);
    }
    Ok(Some(attribute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classfile::{
            builder::{ClassBuilder, MethodBuilder},
            stackmap::{FrameKind, VerificationType},
            AccessFlags, ClassFile,
        },
        rewriter::probe::ProbeConfig,
        Error,
    };

    fn rewrite(class: &mut ClassFile) -> Option<(CodeAttribute, usize)> {
        let probe =
            ProbeSequence::prepare(&mut class.constant_pool, "demo/Loop", &ProbeConfig::default())
                .unwrap();
        let info = class.methods[0].attributes[0].info.clone();
        let rewritten = rewrite_code(&info, &mut class.constant_pool, &probe, "run").unwrap()?;
        Some((CodeAttribute::parse(&rewritten.info).unwrap(), rewritten.probes))
    }

    #[test]
    fn relocates_branches_handlers_and_frames() {
        // line 1: i = 0; line 2: while (i < 10) line 3: i++; line 4: return
        let mut class = ClassBuilder::new("demo/Loop")
            .method(
                MethodBuilder::new("run", "()V")
                    .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                    .body(|body| {
                        let head = body.new_label();
                        let exit = body.new_label();
                        let handler = body.new_label();
                        body.line(1);
                        body.op("iconst_0")?;
                        body.local("istore", 0)?;
                        body.place(head)?;
                        body.line(2);
                        body.local("iload", 0)?;
                        body.push_int(10)?;
                        body.branch("if_icmpge", exit)?;
                        body.line(3);
                        body.iinc(0, 1)?;
                        body.branch("goto", head)?;
                        body.place(exit)?;
                        body.line(4);
                        body.op("return")?;
                        body.place(handler)?;
                        body.op("athrow")?;
                        body.try_catch(head, exit, handler, None);
                        body.frame(head, FrameKind::Append(vec![VerificationType::Integer]));
                        body.frame(exit, FrameKind::Same);
                        let throwable = body.pool().add_class("java/lang/Throwable")?;
                        body.frame(
                            handler,
                            FrameKind::SameLocals1(VerificationType::Object(throwable)),
                        );
                        Ok(())
                    }),
            )
            .build()
            .unwrap();

        let (code, probes) = rewrite(&mut class).unwrap();
        assert_eq!(probes, 4);

        let instructions = decode_code(&code.code).unwrap();
        let mnemonics: Vec<&str> = instructions.iter().map(|i| i.mnemonic()).collect();
        assert_eq!(
            mnemonics,
            [
                "ldc", "iconst_1", "invokestatic", "iconst_0", "istore", // line 1
                "ldc", "iconst_2", "invokestatic", "iload", "bipush", "if_icmpge", // line 2
                "ldc", "iconst_3", "invokestatic", "iinc", "goto", // line 3
                "ldc", "iconst_4", "invokestatic", "return", // line 4
                "athrow",
            ]
        );

        // the loop head and the exit point at their probes
        let head = instructions[5].offset;
        let exit = instructions[16].offset;
        assert_eq!(instructions[10].targets(), [Label(exit)]);
        assert_eq!(instructions[15].targets(), [Label(head)]);

        let entry = code.exception_table[0];
        assert_eq!(u32::from(entry.start_pc), head);
        assert_eq!(u32::from(entry.end_pc), exit);
        assert_eq!(u32::from(entry.handler_pc), instructions[20].offset);

        let lines = code.line_numbers(&class.constant_pool).unwrap();
        let starts: Vec<u32> = lines.iter().map(|l| u32::from(l.start_pc)).collect();
        assert_eq!(starts, [0, head, instructions[11].offset, exit]);

        let smt = code
            .attributes
            .iter()
            .find(|a| a.is_named(&class.constant_pool, names::STACK_MAP_TABLE))
            .unwrap();
        let offsets: Vec<u32> = stackmap::parse(&smt.info)
            .unwrap()
            .iter()
            .map(|f| f.offset)
            .collect();
        assert_eq!(offsets, [head, exit, instructions[20].offset]);
        assert!(code.max_stack >= 2);
    }

    #[test]
    fn uninitialized_follows_the_new_instruction() {
        let mut class = ClassBuilder::new("demo/Loop")
            .method(
                MethodBuilder::new("run", "(Z)Ljava/lang/Object;")
                    .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                    .body(|body| {
                        let join = body.new_label();
                        body.line(5);
                        let new_at = body.position();
                        body.type_op("new", "java/lang/Object")?;
                        body.op("dup")?;
                        body.local("iload", 0)?;
                        body.branch("ifeq", join)?;
                        body.op("nop")?;
                        body.place(join)?;
                        body.line(6);
                        body.invoke("invokespecial", "java/lang/Object", "<init>", "()V")?;
                        body.op("areturn")?;
                        let uninit = VerificationType::Uninitialized(new_at as u16);
                        body.frame(
                            join,
                            FrameKind::Full {
                                locals: vec![VerificationType::Integer],
                                stack: vec![uninit, uninit],
                            },
                        );
                        Ok(())
                    }),
            )
            .build()
            .unwrap();

        let (code, probes) = rewrite(&mut class).unwrap();
        assert_eq!(probes, 2);
        let instructions = decode_code(&code.code).unwrap();
        let new_offset = instructions
            .iter()
            .find(|i| i.mnemonic() == "new")
            .unwrap()
            .offset;
        assert_ne!(new_offset, 0);

        let smt = code
            .attributes
            .iter()
            .find(|a| a.is_named(&class.constant_pool, names::STACK_MAP_TABLE))
            .unwrap();
        let frames = stackmap::parse(&smt.info).unwrap();
        assert_eq!(
            frames[0].kind,
            FrameKind::Full {
                locals: vec![VerificationType::Integer],
                stack: vec![
                    VerificationType::Uninitialized(new_offset as u16),
                    VerificationType::Uninitialized(new_offset as u16)
                ],
            }
        );
    }

    #[test]
    fn no_lines_means_no_rewrite() {
        let mut class = ClassBuilder::new("demo/Loop")
            .method(MethodBuilder::new("run", "()V").body(|body| body.op("return")))
            .build()
            .unwrap();
        assert!(rewrite(&mut class).is_none());
    }

    #[test]
    fn branch_overflow_is_reported() {
        let mut class = ClassBuilder::new("demo/Loop")
            .method(
                MethodBuilder::new("run", "()V")
                    .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                    .body(|body| {
                        let end = body.new_label();
                        body.line(1);
                        body.branch("goto", end)?;
                        // 16000 bytes in 4000 lines, each gaining a probe of up to 8 bytes
                        for line in 0..4000u16 {
                            body.line(line + 2);
                            body.op("iconst_0")?;
                            body.op("pop")?;
                            body.op("nop")?;
                            body.op("nop")?;
                        }
                        body.place(end)?;
                        body.op("return")
                    }),
            )
            .build()
            .unwrap();

        let probe =
            ProbeSequence::prepare(&mut class.constant_pool, "demo/Loop", &ProbeConfig::default())
                .unwrap();
        let info = class.methods[0].attributes[0].info.clone();
        let result = rewrite_code(&info, &mut class.constant_pool, &probe, "run");
        assert!(matches!(result, Err(Error::BranchOutOfRange { .. })));
    }
}
