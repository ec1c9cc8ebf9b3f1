//! Synthesis of small, well-formed class files.
//!
//! [`ClassBuilder`] assembles a class from [`MethodBuilder`]s whose bodies are written with a
//! [`BodyBuilder`]: instructions by mnemonic, labels for branches, source lines, exception
//! handlers and stack map frames. `max_stack` is computed by the stack analysis and
//! `max_locals` from the descriptor and the local variable instructions, unless set
//! explicitly.
//!
//! # Examples
//!
//! ```rust
//! use lineprobe::classfile::{builder::{ClassBuilder, MethodBuilder}, AccessFlags, ClassFile};
//!
//! let bytes = ClassBuilder::new("demo/Adder")
//!     .source_file("Adder.java")
//!     .method(
//!         MethodBuilder::new("add", "(II)I")
//!             .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
//!             .body(|body| {
//!                 body.line(3);
//!                 body.op("iload_0")?;
//!                 body.op("iload_1")?;
//!                 body.op("iadd")?;
//!                 body.line(4);
//!                 body.op("ireturn")
//!             }),
//!     )
//!     .to_bytes()?;
//!
//! let class = ClassFile::parse(&bytes)?;
//! let code = class.code(class.method("add", "(II)I").unwrap())?.unwrap();
//! assert_eq!((code.max_stack, code.max_locals), (2, 2));
//! # Ok::<(), lineprobe::Error>(())
//! ```

use crate::{
    assembly::{
        compute_max_stack, decode_code, descriptor::method_slots, opcode_for, opcodes,
        Instruction, InstructionEncoder, Label, Operand,
    },
    classfile::{
        attributes::{names, Attribute, CodeAttribute, ExceptionEntry, LineNumber, LocalVariable},
        stackmap::{self, Frame, FrameKind},
        AccessFlags, ClassFile, ConstantPool, MemberInfo,
    },
    Result,
};

type BodyFn = Box<dyn FnOnce(&mut BodyBuilder) -> Result<()>>;

/// Writes one method body.
pub struct BodyBuilder<'p> {
    pool: &'p mut ConstantPool,
    encoder: InstructionEncoder,
    lines: Vec<LineNumber>,
    handlers: Vec<(Label, Label, Label, Option<String>)>,
    locals: Vec<(Label, Label, String, String, u16)>,
    frames: Vec<(Label, FrameKind)>,
    next_label: u32,
}

impl<'p> BodyBuilder<'p> {
    fn new(pool: &'p mut ConstantPool) -> Self {
        BodyBuilder {
            pool,
            encoder: InstructionEncoder::new(),
            lines: Vec::new(),
            handlers: Vec::new(),
            locals: Vec::new(),
            frames: Vec::new(),
            next_label: 0,
        }
    }

    /// The constant pool of the class under construction.
    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut *self.pool
    }

    /// Offset the next instruction is emitted at.
    #[must_use]
    pub fn position(&self) -> u32 {
        self.encoder.current_position()
    }

    /// Attribute the following instructions to source line `line`.
    pub fn line(&mut self, line: u16) {
        self.lines.push(LineNumber {
            start_pc: self.position() as u16,
            line,
        });
    }

    /// A fresh, not yet placed label.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind `label` to the current position.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the label was already placed.
    pub fn place(&mut self, label: Label) -> Result<()> {
        self.encoder.define_label(label)
    }

    /// An instruction without operands.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for unknown mnemonics and instructions that need
    /// an operand.
    pub fn op(&mut self, mnemonic: &str) -> Result<()> {
        self.encoder.emit_instruction(mnemonic, Operand::None)
    }

    /// The shortest push of an `int` constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if a needed constant does not fit.
    pub fn push_int(&mut self, value: i32) -> Result<()> {
        self.encoder.emit_push_int(value, self.pool)
    }

    /// A local variable instruction such as `iload` or `astore`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `mnemonic` takes no local index.
    pub fn local(&mut self, mnemonic: &str, index: u16) -> Result<()> {
        self.encoder
            .emit_instruction(mnemonic, Operand::Local(index))
    }

    /// `iinc`.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` mirrors the encoder.
    pub fn iinc(&mut self, index: u16, delta: i16) -> Result<()> {
        self.encoder
            .emit_instruction("iinc", Operand::Iinc { index, delta })
    }

    /// A branch to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `mnemonic` is not a branch.
    pub fn branch(&mut self, mnemonic: &str, target: Label) -> Result<()> {
        self.encoder
            .emit_instruction(mnemonic, Operand::Branch(target))
    }

    /// `ldc`/`ldc_w` of a string constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the constant does not fit.
    pub fn ldc_string(&mut self, value: &str) -> Result<()> {
        let index = self.pool.add_string(value)?;
        self.encoder.emit_ldc(index)
    }

    /// An invocation; `invokeinterface` gets its argument count from the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or a non-invoke mnemonic.
    pub fn invoke(
        &mut self,
        mnemonic: &str,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let opcode = opcode_for(mnemonic)?;
        let operand = match opcode {
            opcodes::INVOKEINTERFACE => {
                let index = self.pool.add_interface_method_ref(class, name, descriptor)?;
                let (arguments, _) = method_slots(descriptor)?;
                Operand::InvokeInterface {
                    index,
                    count: (arguments + 1) as u8,
                }
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKESTATIC => {
                Operand::Constant(self.pool.add_method_ref(class, name, descriptor)?)
            }
            _ => return Err(malformed_error!("'{}' is not an invocation", mnemonic)),
        };
        self.encoder.emit(&Instruction::new(opcode, operand))
    }

    /// A field access such as `getstatic`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a non-field mnemonic.
    pub fn field(
        &mut self,
        mnemonic: &str,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let index = self.pool.add_field_ref(class, name, descriptor)?;
        self.encoder
            .emit_instruction(mnemonic, Operand::Constant(index))
    }

    /// An instruction taking a class operand: `new`, `checkcast`, `instanceof`, `anewarray`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for other mnemonics.
    pub fn type_op(&mut self, mnemonic: &str, class: &str) -> Result<()> {
        let index = self.pool.add_class(class)?;
        self.encoder
            .emit_instruction(mnemonic, Operand::Constant(index))
    }

    /// A `tableswitch` over `low..low + targets.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an empty or oversized jump table.
    pub fn table_switch(&mut self, low: i32, default: Label, targets: Vec<Label>) -> Result<()> {
        let count = i32::try_from(targets.len())
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| malformed_error!("tableswitch with {} targets", targets.len()))?;
        self.encoder.emit_instruction(
            "tableswitch",
            Operand::TableSwitch {
                default,
                low,
                high: low + count - 1,
                targets,
            },
        )
    }

    /// A `lookupswitch`; `pairs` are sorted by key.
    ///
    /// # Errors
    ///
    /// Never fails for reasonable pair counts; the `Result` mirrors the encoder.
    pub fn lookup_switch(&mut self, default: Label, mut pairs: Vec<(i32, Label)>) -> Result<()> {
        pairs.sort_by_key(|(key, _)| *key);
        self.encoder
            .emit_instruction("lookupswitch", Operand::LookupSwitch { default, pairs })
    }

    /// Protect `start..end` with a handler at `handler`, catching `catch` or anything.
    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, catch: Option<&str>) {
        self.handlers
            .push((start, end, handler, catch.map(str::to_string)));
    }

    /// Declare a local variable over `start..end`.
    pub fn local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        index: u16,
        start: Label,
        end: Label,
    ) {
        self.locals
            .push((start, end, name.to_string(), descriptor.to_string(), index));
    }

    /// Attach a stack map frame to `label`.
    pub fn frame(&mut self, label: Label, kind: FrameKind) {
        self.frames.push((label, kind));
    }

    fn finish(
        self,
        descriptor: &str,
        is_static: bool,
        max_locals: Option<u16>,
    ) -> Result<CodeAttribute> {
        let BodyBuilder {
            pool,
            encoder,
            lines,
            handlers,
            locals,
            frames,
            ..
        } = self;
        let encoded = encoder.finalize()?;

        let exception_table = handlers
            .iter()
            .map(|(start, end, handler, catch)| {
                Ok(ExceptionEntry {
                    start_pc: encoded.position(*start)? as u16,
                    end_pc: encoded.position(*end)? as u16,
                    handler_pc: encoded.position(*handler)? as u16,
                    catch_type: match catch {
                        Some(class) => pool.add_class(class)?,
                        None => 0,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let instructions = decode_code(&encoded.code)?;
        let handler_offsets: Vec<u32> = exception_table
            .iter()
            .map(|entry| u32::from(entry.handler_pc))
            .collect();
        let max_stack = compute_max_stack(&instructions, &handler_offsets, pool)?;
        let max_locals = match max_locals {
            Some(max_locals) => max_locals,
            None => {
                let (arguments, _) = method_slots(descriptor)?;
                let parameters = arguments + u16::from(!is_static);
                instructions
                    .iter()
                    .filter_map(local_extent)
                    .fold(parameters, u16::max)
            }
        };

        let mut attributes = Vec::new();
        if !lines.is_empty() {
            attributes.push(Attribute {
                name_index: pool.add_utf8(names::LINE_NUMBER_TABLE)?,
                info: LineNumber::write_table(&lines)?,
            });
        }
        if !locals.is_empty() {
            let rows = locals
                .iter()
                .map(|(start, end, name, descriptor, index)| {
                    let start_pc = encoded.position(*start)?;
                    Ok(LocalVariable {
                        start_pc: start_pc as u16,
                        length: (encoded.position(*end)? - start_pc) as u16,
                        name_index: pool.add_utf8(name)?,
                        descriptor_index: pool.add_utf8(descriptor)?,
                        index: *index,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            attributes.push(Attribute {
                name_index: pool.add_utf8(names::LOCAL_VARIABLE_TABLE)?,
                info: LocalVariable::write_table(&rows)?,
            });
        }
        if !frames.is_empty() {
            let mut resolved = frames
                .into_iter()
                .map(|(label, kind)| {
                    Ok(Frame {
                        offset: encoded.position(label)?,
                        kind,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            resolved.sort_by_key(|frame| frame.offset);
            attributes.push(Attribute {
                name_index: pool.add_utf8(names::STACK_MAP_TABLE)?,
                info: stackmap::write(&resolved)?,
            });
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code: encoded.code,
            exception_table,
            attributes,
        })
    }
}

/// First local slot past the variable an instruction touches.
fn local_extent(instruction: &Instruction) -> Option<u16> {
    let wide_value = matches!(
        instruction.opcode,
        opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE
    );
    match (instruction.opcode, &instruction.operand) {
        (_, Operand::Local(index)) => Some(index.saturating_add(if wide_value { 2 } else { 1 })),
        (_, Operand::Iinc { index, .. }) => Some(index.saturating_add(1)),
        (opcode @ opcodes::ILOAD_0..=opcodes::ALOAD_3, _) => {
            let relative = opcode - opcodes::ILOAD_0;
            let size = if matches!(relative / 4, 1 | 3) { 2 } else { 1 };
            Some(u16::from(relative % 4) + size)
        }
        (opcode @ opcodes::ISTORE_0..=opcodes::ASTORE_3, _) => {
            let relative = opcode - opcodes::ISTORE_0;
            let size = if matches!(relative / 4, 1 | 3) { 2 } else { 1 };
            Some(u16::from(relative % 4) + size)
        }
        _ => None,
    }
}

/// Describes one method of a [`ClassBuilder`].
pub struct MethodBuilder {
    name: String,
    descriptor: String,
    access: AccessFlags,
    max_locals: Option<u16>,
    body: Option<BodyFn>,
}

impl MethodBuilder {
    /// A public method without a body yet.
    #[must_use]
    pub fn new(name: &str, descriptor: &str) -> Self {
        MethodBuilder {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: AccessFlags::PUBLIC,
            max_locals: None,
            body: None,
        }
    }

    /// Replace the access flags.
    #[must_use]
    pub fn access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Make the method `native`; native methods carry no `Code`.
    #[must_use]
    pub fn native(mut self) -> Self {
        self.access |= AccessFlags::NATIVE;
        self.body = None;
        self
    }

    /// Override the computed `max_locals`.
    #[must_use]
    pub fn max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = Some(max_locals);
        self
    }

    /// Provide the method body.
    #[must_use]
    pub fn body<F>(mut self, body: F) -> Self
    where
        F: FnOnce(&mut BodyBuilder) -> Result<()> + 'static,
    {
        self.body = Some(Box::new(body));
        self
    }

    fn build(self, pool: &mut ConstantPool) -> Result<MemberInfo> {
        let name_index = pool.add_utf8(&self.name)?;
        let descriptor_index = pool.add_utf8(&self.descriptor)?;

        let mut attributes = Vec::new();
        match self.body {
            Some(_) if self.access.is_bodyless() => {
                return Err(malformed_error!(
                    "Method {} is native or abstract but has a body",
                    self.name
                ));
            }
            Some(body) => {
                let mut builder = BodyBuilder::new(pool);
                body(&mut builder)?;
                let code = builder.finish(
                    &self.descriptor,
                    self.access.contains(AccessFlags::STATIC),
                    self.max_locals,
                )?;
                attributes.push(Attribute {
                    name_index: pool.add_utf8(names::CODE)?,
                    info: code.to_info()?,
                });
            }
            None if !self.access.is_bodyless() => {
                return Err(malformed_error!("Method {} has no body", self.name));
            }
            None => {}
        }

        Ok(MemberInfo {
            access_flags: self.access,
            name_index,
            descriptor_index,
            attributes,
        })
    }
}

/// Assembles a class file.
pub struct ClassBuilder {
    name: String,
    super_name: String,
    access: AccessFlags,
    major_version: u16,
    minor_version: u16,
    source_file: Option<String>,
    methods: Vec<MethodBuilder>,
    attributes: Vec<(String, Vec<u8>)>,
}

impl ClassBuilder {
    /// A public class extending `java/lang/Object`, class file version 52 (Java 8).
    #[must_use]
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            super_name: "java/lang/Object".to_string(),
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            major_version: 52,
            minor_version: 0,
            source_file: None,
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Replace the class access flags.
    #[must_use]
    pub fn access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Set the class file version.
    #[must_use]
    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    /// Set the superclass.
    #[must_use]
    pub fn super_class(mut self, name: &str) -> Self {
        self.super_name = name.to_string();
        self
    }

    /// Add a `SourceFile` attribute.
    #[must_use]
    pub fn source_file(mut self, name: &str) -> Self {
        self.source_file = Some(name.to_string());
        self
    }

    /// Add a method.
    #[must_use]
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Add a class level attribute with a raw payload.
    #[must_use]
    pub fn attribute(mut self, name: &str, info: Vec<u8>) -> Self {
        self.attributes.push((name.to_string(), info));
        self
    }

    /// Build the structural form.
    ///
    /// # Errors
    ///
    /// Returns an error if a method body fails to assemble or the pool overflows.
    pub fn build(self) -> Result<ClassFile> {
        let mut pool = ConstantPool::new();
        let this_class = pool.add_class(&self.name)?;
        let super_class = pool.add_class(&self.super_name)?;

        let methods = self
            .methods
            .into_iter()
            .map(|method| method.build(&mut pool))
            .collect::<Result<Vec<_>>>()?;

        let mut attributes = Vec::new();
        if let Some(source_file) = &self.source_file {
            let name_index = pool.add_utf8(names::SOURCE_FILE)?;
            let file_index = pool.add_utf8(source_file)?;
            attributes.push(Attribute {
                name_index,
                info: file_index.to_be_bytes().to_vec(),
            });
        }
        for (name, info) in self.attributes {
            attributes.push(Attribute {
                name_index: pool.add_utf8(&name)?,
                info,
            });
        }

        Ok(ClassFile {
            minor_version: self.minor_version,
            major_version: self.major_version,
            constant_pool: pool,
            access_flags: self.access,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods,
            attributes,
        })
    }

    /// Build and serialize.
    ///
    /// # Errors
    ///
    /// See [`ClassBuilder::build`].
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        self.build()?.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::stackmap::VerificationType;

    #[test]
    fn computes_locals_and_stack() {
        let class = ClassBuilder::new("demo/Sum")
            .method(
                MethodBuilder::new("sum", "(J)J").body(|body| {
                    body.local("lload", 1)?;
                    body.local("lstore", 3)?;
                    body.local("lload", 3)?;
                    body.op("lreturn")
                }),
            )
            .build()
            .unwrap();
        let code = class.code(&class.methods[0]).unwrap().unwrap();
        assert_eq!(code.max_locals, 5);
        assert_eq!(code.max_stack, 2);
    }

    #[test]
    fn shorthand_local_extent() {
        let extent = |opcode| local_extent(&Instruction::new(opcode, Operand::None));
        assert_eq!(extent(opcodes::ILOAD_0), Some(1));
        assert_eq!(extent(opcodes::LLOAD_1), Some(3));
        assert_eq!(extent(opcodes::DSTORE_3), Some(5));
        assert_eq!(extent(opcodes::ASTORE_2), Some(3));
        assert_eq!(extent(opcodes::IADD), None);
    }

    #[test]
    fn handlers_frames_and_locals() {
        let class = ClassBuilder::new("demo/Guarded")
            .method(
                MethodBuilder::new("run", "()V")
                    .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                    .body(|body| {
                        let start = body.new_label();
                        let end = body.new_label();
                        let handler = body.new_label();
                        let exit = body.new_label();
                        body.place(start)?;
                        body.line(7);
                        body.invoke("invokestatic", "demo/Guarded", "work", "()V")?;
                        body.place(end)?;
                        body.branch("goto", exit)?;
                        body.place(handler)?;
                        body.line(9);
                        body.local("astore", 0)?;
                        body.place(exit)?;
                        body.op("return")?;
                        body.try_catch(start, end, handler, Some("java/lang/RuntimeException"));
                        let exception = body.pool().add_class("java/lang/RuntimeException")?;
                        body.frame(
                            handler,
                            FrameKind::SameLocals1(VerificationType::Object(exception)),
                        );
                        body.frame(exit, FrameKind::Same);
                        body.local_variable("e", "Ljava/lang/RuntimeException;", 0, exit, exit);
                        Ok(())
                    }),
            )
            .method(MethodBuilder::new("work", "()V").native())
            .build()
            .unwrap();

        let code = class.code(&class.methods[0]).unwrap().unwrap();
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 1);
        assert_eq!(code.exception_table.len(), 1);
        assert_eq!(code.exception_table[0].handler_pc, 6);
        assert_eq!(code.attributes.len(), 3);
        let lines = code.line_numbers(&class.constant_pool).unwrap();
        assert_eq!(
            lines,
            [
                LineNumber { start_pc: 0, line: 7 },
                LineNumber { start_pc: 6, line: 9 }
            ]
        );
        assert!(class.code(&class.methods[1]).unwrap().is_none());
    }

    #[test]
    fn bodies_must_match_access() {
        assert!(ClassBuilder::new("demo/Bad")
            .method(MethodBuilder::new("run", "()V"))
            .build()
            .is_err());
        assert!(ClassBuilder::new("demo/Bad")
            .method(
                MethodBuilder::new("run", "()V")
                    .access(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
                    .body(|body| body.op("return"))
            )
            .build()
            .is_err());
    }
}
