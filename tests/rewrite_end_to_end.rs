//! End-to-end rewriting of synthesized class files.
//!
//! Every test builds a class with the class builder, runs it through the rewriter and
//! inspects the re-parsed result: probe placement, relocation of everything that addresses
//! bytecode by offset, and preservation of what the rewriter does not touch.

use std::{collections::HashSet, sync::Arc};

use lineprobe::{
    assembly::{compute_max_stack, decode_code, Instruction},
    classfile::{
        attributes::names,
        constpool::Constant,
        stackmap::{self, FrameKind, VerificationType},
    },
    prelude::*,
    recorder::MemorySink,
};

fn rewrite(class: ClassFile, unit: &str) -> Result<ClassFile> {
    let bytes = class.to_bytes()?;
    let rewriter = UnitRewriter::new(ProbeConfig::default());
    match rewriter.rewrite(&bytes, unit)? {
        RewriteOutcome::Rewritten { bytes, .. } => ClassFile::parse(&bytes),
        RewriteOutcome::Unchanged(reason) => panic!("{unit} left unchanged: {reason}"),
    }
}

fn code_of(
    class: &ClassFile,
    name: &str,
    descriptor: &str,
) -> Result<(CodeAttribute, Vec<Instruction>)> {
    let method = class.method(name, descriptor).expect("method exists");
    let code = class.code(method)?.expect("method has code");
    let instructions = decode_code(&code.code)?;
    Ok((code, instructions))
}

enum Value {
    Str(String),
    Int(i32),
}

/// Run straight-line code that only pushes constants, calls the recorder and returns,
/// forwarding every `registerHit` call to `recorder`.
fn execute(
    class: &ClassFile,
    name: &str,
    descriptor: &str,
    recorder: &HitRecorder,
) -> Result<()> {
    let (_, instructions) = code_of(class, name, descriptor)?;
    let pool = &class.constant_pool;
    let mut stack = Vec::new();
    for instr in &instructions {
        match (instr.mnemonic(), &instr.operand) {
            ("nop", _) => {}
            ("return", _) => return Ok(()),
            ("iconst_m1", _) => stack.push(Value::Int(-1)),
            (mnemonic, _) if mnemonic.starts_with("iconst_") => {
                let value = mnemonic["iconst_".len()..].parse().expect("iconst value");
                stack.push(Value::Int(value));
            }
            ("bipush", Operand::Byte(value)) => stack.push(Value::Int(i32::from(*value))),
            ("sipush", Operand::Short(value)) => stack.push(Value::Int(i32::from(*value))),
            ("ldc" | "ldc_w", Operand::Constant(index)) => match pool.get(*index)? {
                Constant::String { string_index } => {
                    stack.push(Value::Str(pool.utf8(*string_index)?));
                }
                Constant::Integer(value) => stack.push(Value::Int(*value)),
                other => panic!("unexpected constant {other:?}"),
            },
            ("invokestatic", Operand::Constant(index)) => {
                let member = pool.member_ref(*index)?;
                assert_eq!(member.class, RECORDER_CLASS);
                assert_eq!(member.name, "registerHit");
                let (Some(Value::Int(line)), Some(Value::Str(unit))) = (stack.pop(), stack.pop())
                else {
                    panic!("registerHit called with the wrong operands");
                };
                recorder.register_hit(&unit, line as u32);
            }
            (mnemonic, _) => panic!("unexpected {mnemonic} in straight-line code"),
        }
    }
    panic!("{name} fell off the end of its code")
}

/// Lines 10, 10, 11, 11, 11, 12 record exactly three hits, in order, when the rewritten
/// method runs once.
#[test]
fn three_runs_three_hits() -> Result<()> {
    let class = ClassBuilder::new("demo/Runs")
        .method(
            MethodBuilder::new("run", "()V")
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .body(|body| {
                    for line in [10, 10, 11, 11, 11, 12] {
                        body.line(line);
                        body.op("nop")?;
                    }
                    body.op("return")
                }),
        )
        .build()?;
    let class = rewrite(class, "demo/Runs")?;

    let sink = Arc::new(MemorySink::new());
    let recorder = HitRecorder::new(sink.clone());
    execute(&class, "run", "()V", &recorder)?;

    let hits: Vec<(String, u32)> = sink
        .records()
        .iter()
        .map(|record| (record.unit.to_string(), record.line))
        .collect();
    assert_eq!(
        hits,
        [
            ("demo/Runs".to_string(), 10),
            ("demo/Runs".to_string(), 11),
            ("demo/Runs".to_string(), 12)
        ]
    );
    Ok(())
}

fn switch_class() -> Result<ClassFile> {
    ClassBuilder::new("demo/Switch")
        .source_file("Switch.java")
        .attribute("DemoCustom", vec![1, 2, 3])
        .method(
            MethodBuilder::new("pick", "(I)I")
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .body(|body| {
                    let one = body.new_label();
                    let two = body.new_label();
                    let fallback = body.new_label();
                    let hundred = body.new_label();
                    let other = body.new_label();
                    let try_end = body.new_label();
                    let handler = body.new_label();

                    body.line(1);
                    body.local("iload", 0)?;
                    body.table_switch(0, fallback, vec![one, two])?;
                    body.place(one)?;
                    body.line(2);
                    body.push_int(1)?;
                    body.op("ireturn")?;
                    body.place(two)?;
                    body.line(3);
                    body.push_int(2)?;
                    body.op("ireturn")?;
                    body.place(fallback)?;
                    body.line(4);
                    body.local("iload", 0)?;
                    body.lookup_switch(other, vec![(100, hundred)])?;
                    body.place(hundred)?;
                    body.line(5);
                    body.push_int(100)?;
                    body.op("ireturn")?;
                    body.place(other)?;
                    body.line(6);
                    body.ldc_string("fallback")?;
                    body.invoke("invokevirtual", "java/lang/String", "length", "()I")?;
                    body.op("ireturn")?;
                    body.place(try_end)?;
                    body.place(handler)?;
                    body.line(7);
                    body.op("pop")?;
                    body.push_int(-1)?;
                    body.op("ireturn")?;

                    body.try_catch(other, try_end, handler, Some("java/lang/RuntimeException"));
                    for label in [one, two, fallback, hundred, other] {
                        body.frame(label, FrameKind::Same);
                    }
                    let caught = body.pool().add_class("java/lang/RuntimeException")?;
                    body.frame(handler, FrameKind::SameLocals1(VerificationType::Object(caught)));
                    Ok(())
                }),
        )
        .method(
            MethodBuilder::new("wide", "()V")
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .body(|body| {
                    body.line(20);
                    body.push_int(7)?;
                    body.local("istore", 300)?;
                    body.line(21);
                    body.local("iload", 300)?;
                    body.op("pop")?;
                    body.op("return")
                }),
        )
        .build()
}

/// Switch targets, handlers, frames and line entries all land on probe starts.
#[test]
fn relocation_keeps_the_method_well_formed() -> Result<()> {
    let class = rewrite(switch_class()?, "demo/Switch")?;
    let (code, instructions) = code_of(&class, "pick", "(I)I")?;
    let boundaries: HashSet<u32> = instructions.iter().map(|i| i.offset).collect();
    let at = |offset: u32| {
        instructions
            .iter()
            .find(|i| i.offset == offset)
            .map(|i| i.mnemonic())
    };

    // every switch target starts a new line, so it must point at that line's probe
    for instr in instructions.iter().filter(|i| i.mnemonic().ends_with("switch")) {
        for target in instr.targets() {
            assert_eq!(at(target.0), Some("ldc"), "switch target {}", target.0);
        }
    }

    let entry = code.exception_table[0];
    assert_eq!(at(u32::from(entry.start_pc)), Some("ldc"));
    assert_eq!(at(u32::from(entry.handler_pc)), Some("ldc"));
    assert!(boundaries.contains(&u32::from(entry.end_pc)));

    let pool = &class.constant_pool;
    for line in code.line_numbers(pool)? {
        assert_eq!(at(u32::from(line.start_pc)), Some("ldc"), "line {}", line.line);
    }

    let table = code
        .attributes
        .iter()
        .find(|a| a.is_named(pool, names::STACK_MAP_TABLE))
        .expect("stack map kept");
    for frame in stackmap::parse(&table.info)? {
        assert!(boundaries.contains(&frame.offset), "frame at {}", frame.offset);
    }

    let handlers = [u32::from(entry.handler_pc)];
    assert!(compute_max_stack(&instructions, &handlers, pool)? <= code.max_stack);
    Ok(())
}

#[test]
fn wide_locals_survive() -> Result<()> {
    let class = rewrite(switch_class()?, "demo/Switch")?;
    let (_, instructions) = code_of(&class, "wide", "()V")?;
    let wide: Vec<&str> = instructions
        .iter()
        .filter(|i| i.wide)
        .map(|i| i.mnemonic())
        .collect();
    assert_eq!(wide, ["istore", "iload"]);

    let method = class.method("wide", "()V").expect("method exists");
    let lines: Vec<u32> = probe_sites(&class, method, RECORDER_CLASS)?
        .iter()
        .map(|site| site.line)
        .collect();
    assert_eq!(lines, [20, 21]);
    Ok(())
}

#[test]
fn untouched_parts_are_preserved() -> Result<()> {
    let original = switch_class()?;
    let class = rewrite(original.clone(), "demo/Switch")?;

    assert_eq!(class.name()?, "demo/Switch");
    assert_eq!(class.major_version, original.major_version);
    assert_eq!(class.methods.len(), original.methods.len());
    let custom = class
        .attributes
        .iter()
        .find(|a| a.is_named(&class.constant_pool, "DemoCustom"))
        .expect("custom attribute kept");
    assert_eq!(custom.info, [1, 2, 3]);
    assert!(class.has_attribute(names::SOURCE_FILE));
    assert!(class.has_attribute(names::INSTRUMENTED_MARKER));
    Ok(())
}

#[test]
fn line_less_and_native_only_classes_are_unchanged() -> Result<()> {
    let rewriter = UnitRewriter::new(ProbeConfig::default());

    let no_lines = ClassBuilder::new("demo/NoLines")
        .method(MethodBuilder::new("run", "()V").body(|body| body.op("return")))
        .to_bytes()?;
    assert_eq!(
        rewriter.rewrite(&no_lines, "demo/NoLines")?,
        RewriteOutcome::Unchanged(UnchangedReason::NoLineNumbers)
    );

    let empty = ClassBuilder::new("demo/Empty").to_bytes()?;
    assert_eq!(
        rewriter.rewrite(&empty, "demo/Empty")?,
        RewriteOutcome::Unchanged(UnchangedReason::NoMethods)
    );
    Ok(())
}
