//! JVM instruction representation, operand layouts and the static instruction table.
//!
//! Every opcode is described once in [`INSTRUCTIONS`]: its mnemonic, the layout of its
//! operand bytes, its effect on the operand stack and how it transfers control. The decoder,
//! the encoder and the stack depth analysis all read from this one table.
//!
//! # Key Components
//!
//! - [`Instruction`] - One decoded instruction with its original offset
//! - [`Operand`] - Typed operand values; branch targets are [`Label`]s
//! - [`JvmInstruction`] - Static metadata for one opcode
//! - [`FlowType`] - Control flow classification
//! - [`StackEffect`] - Operand stack effect in slots
//!
//! # Examples
//!
//! ```rust
//! use lineprobe::assembly::{opcodes, FlowType, INSTRUCTIONS};
//!
//! let goto = &INSTRUCTIONS[usize::from(opcodes::GOTO)];
//! assert_eq!(goto.mnemonic, "goto");
//! assert_eq!(goto.flow, FlowType::UnconditionalBranch);
//! ```

use std::fmt;

/// Layout of the operand bytes that follow an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand bytes
    None,
    /// Signed byte (`bipush`)
    Byte,
    /// Signed 16-bit value (`sipush`)
    Short,
    /// Local variable index, one byte or two after `wide`
    Local,
    /// One byte constant pool index (`ldc`)
    Constant8,
    /// Two byte constant pool index
    Constant16,
    /// Local index and signed increment, widened after `wide`
    Iinc,
    /// Signed 16-bit branch offset
    Branch16,
    /// Signed 32-bit branch offset
    Branch32,
    /// Padding, default, low, high and a jump table
    TableSwitch,
    /// Padding, default, pair count and sorted match/offset pairs
    LookupSwitch,
    /// Constant pool index, argument count and a zero byte
    InvokeInterface,
    /// Constant pool index and two zero bytes
    InvokeDynamic,
    /// Constant pool index and dimension count
    MultiANewArray,
    /// Primitive array type code (`newarray`)
    ArrayType,
    /// The `wide` prefix, which modifies the instruction that follows it
    Wide,
}

/// Effect of an instruction on the operand stack, counted in slots.
///
/// `long` and `double` values take two slots, everything else one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    /// The same for every occurrence of the opcode
    Fixed {
        /// Slots consumed
        pops: u8,
        /// Slots produced
        pushes: u8,
    },
    /// Depends on a descriptor in the constant pool or on an operand
    Dynamic,
}

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Either jumps to its target or falls through
    ConditionalBranch,
    /// Always jumps to its target
    UnconditionalBranch,
    /// `jsr` and `jsr_w`
    Subroutine,
    /// `ret`
    SubroutineReturn,
    /// Leaves the method normally
    Return,
    /// `athrow`
    Throw,
    /// `tableswitch` and `lookupswitch`
    Switch,
}

/// Static metadata of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JvmInstruction {
    /// Mnemonic as used by the JVMS, empty for reserved opcodes
    pub mnemonic: &'static str,
    /// Operand layout
    pub operand: OperandType,
    /// Operand stack effect
    pub stack: StackEffect,
    /// Control flow behavior
    pub flow: FlowType,
}

impl JvmInstruction {
    /// Returns `true` for opcodes that never appear in a valid class file.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.mnemonic.is_empty()
    }
}

const RESERVED: JvmInstruction = JvmInstruction {
    mnemonic: "",
    operand: OperandType::None,
    stack: StackEffect::Fixed { pops: 0, pushes: 0 },
    flow: FlowType::Sequential,
};

macro_rules! op {
    ($mnemonic:literal, $operand:ident, dynamic) => {
        JvmInstruction {
            mnemonic: $mnemonic,
            operand: OperandType::$operand,
            stack: StackEffect::Dynamic,
            flow: FlowType::Sequential,
        }
    };
    ($mnemonic:literal, $operand:ident, $pops:literal => $pushes:literal) => {
        op!($mnemonic, $operand, $pops => $pushes, Sequential)
    };
    ($mnemonic:literal, $operand:ident, $pops:literal => $pushes:literal, $flow:ident) => {
        JvmInstruction {
            mnemonic: $mnemonic,
            operand: OperandType::$operand,
            stack: StackEffect::Fixed {
                pops: $pops,
                pushes: $pushes,
            },
            flow: FlowType::$flow,
        }
    };
}

/// Metadata of every opcode, indexed by opcode byte.
#[rustfmt::skip]
pub static INSTRUCTIONS: [JvmInstruction; 256] = [
    /* 0x00 */ op!("nop", None, 0 => 0),
    /* 0x01 */ op!("aconst_null", None, 0 => 1),
    /* 0x02 */ op!("iconst_m1", None, 0 => 1),
    /* 0x03 */ op!("iconst_0", None, 0 => 1),
    /* 0x04 */ op!("iconst_1", None, 0 => 1),
    /* 0x05 */ op!("iconst_2", None, 0 => 1),
    /* 0x06 */ op!("iconst_3", None, 0 => 1),
    /* 0x07 */ op!("iconst_4", None, 0 => 1),
    /* 0x08 */ op!("iconst_5", None, 0 => 1),
    /* 0x09 */ op!("lconst_0", None, 0 => 2),
    /* 0x0A */ op!("lconst_1", None, 0 => 2),
    /* 0x0B */ op!("fconst_0", None, 0 => 1),
    /* 0x0C */ op!("fconst_1", None, 0 => 1),
    /* 0x0D */ op!("fconst_2", None, 0 => 1),
    /* 0x0E */ op!("dconst_0", None, 0 => 2),
    /* 0x0F */ op!("dconst_1", None, 0 => 2),
    /* 0x10 */ op!("bipush", Byte, 0 => 1),
    /* 0x11 */ op!("sipush", Short, 0 => 1),
    /* 0x12 */ op!("ldc", Constant8, 0 => 1),
    /* 0x13 */ op!("ldc_w", Constant16, 0 => 1),
    /* 0x14 */ op!("ldc2_w", Constant16, 0 => 2),
    /* 0x15 */ op!("iload", Local, 0 => 1),
    /* 0x16 */ op!("lload", Local, 0 => 2),
    /* 0x17 */ op!("fload", Local, 0 => 1),
    /* 0x18 */ op!("dload", Local, 0 => 2),
    /* 0x19 */ op!("aload", Local, 0 => 1),
    /* 0x1A */ op!("iload_0", None, 0 => 1),
    /* 0x1B */ op!("iload_1", None, 0 => 1),
    /* 0x1C */ op!("iload_2", None, 0 => 1),
    /* 0x1D */ op!("iload_3", None, 0 => 1),
    /* 0x1E */ op!("lload_0", None, 0 => 2),
    /* 0x1F */ op!("lload_1", None, 0 => 2),
    /* 0x20 */ op!("lload_2", None, 0 => 2),
    /* 0x21 */ op!("lload_3", None, 0 => 2),
    /* 0x22 */ op!("fload_0", None, 0 => 1),
    /* 0x23 */ op!("fload_1", None, 0 => 1),
    /* 0x24 */ op!("fload_2", None, 0 => 1),
    /* 0x25 */ op!("fload_3", None, 0 => 1),
    /* 0x26 */ op!("dload_0", None, 0 => 2),
    /* 0x27 */ op!("dload_1", None, 0 => 2),
    /* 0x28 */ op!("dload_2", None, 0 => 2),
    /* 0x29 */ op!("dload_3", None, 0 => 2),
    /* 0x2A */ op!("aload_0", None, 0 => 1),
    /* 0x2B */ op!("aload_1", None, 0 => 1),
    /* 0x2C */ op!("aload_2", None, 0 => 1),
    /* 0x2D */ op!("aload_3", None, 0 => 1),
    /* 0x2E */ op!("iaload", None, 2 => 1),
    /* 0x2F */ op!("laload", None, 2 => 2),
    /* 0x30 */ op!("faload", None, 2 => 1),
    /* 0x31 */ op!("daload", None, 2 => 2),
    /* 0x32 */ op!("aaload", None, 2 => 1),
    /* 0x33 */ op!("baload", None, 2 => 1),
    /* 0x34 */ op!("caload", None, 2 => 1),
    /* 0x35 */ op!("saload", None, 2 => 1),
    /* 0x36 */ op!("istore", Local, 1 => 0),
    /* 0x37 */ op!("lstore", Local, 2 => 0),
    /* 0x38 */ op!("fstore", Local, 1 => 0),
    /* 0x39 */ op!("dstore", Local, 2 => 0),
    /* 0x3A */ op!("astore", Local, 1 => 0),
    /* 0x3B */ op!("istore_0", None, 1 => 0),
    /* 0x3C */ op!("istore_1", None, 1 => 0),
    /* 0x3D */ op!("istore_2", None, 1 => 0),
    /* 0x3E */ op!("istore_3", None, 1 => 0),
    /* 0x3F */ op!("lstore_0", None, 2 => 0),
    /* 0x40 */ op!("lstore_1", None, 2 => 0),
    /* 0x41 */ op!("lstore_2", None, 2 => 0),
    /* 0x42 */ op!("lstore_3", None, 2 => 0),
    /* 0x43 */ op!("fstore_0", None, 1 => 0),
    /* 0x44 */ op!("fstore_1", None, 1 => 0),
    /* 0x45 */ op!("fstore_2", None, 1 => 0),
    /* 0x46 */ op!("fstore_3", None, 1 => 0),
    /* 0x47 */ op!("dstore_0", None, 2 => 0),
    /* 0x48 */ op!("dstore_1", None, 2 => 0),
    /* 0x49 */ op!("dstore_2", None, 2 => 0),
    /* 0x4A */ op!("dstore_3", None, 2 => 0),
    /* 0x4B */ op!("astore_0", None, 1 => 0),
    /* 0x4C */ op!("astore_1", None, 1 => 0),
    /* 0x4D */ op!("astore_2", None, 1 => 0),
    /* 0x4E */ op!("astore_3", None, 1 => 0),
    /* 0x4F */ op!("iastore", None, 3 => 0),
    /* 0x50 */ op!("lastore", None, 4 => 0),
    /* 0x51 */ op!("fastore", None, 3 => 0),
    /* 0x52 */ op!("dastore", None, 4 => 0),
    /* 0x53 */ op!("aastore", None, 3 => 0),
    /* 0x54 */ op!("bastore", None, 3 => 0),
    /* 0x55 */ op!("castore", None, 3 => 0),
    /* 0x56 */ op!("sastore", None, 3 => 0),
    /* 0x57 */ op!("pop", None, 1 => 0),
    /* 0x58 */ op!("pop2", None, 2 => 0),
    /* 0x59 */ op!("dup", None, 1 => 2),
    /* 0x5A */ op!("dup_x1", None, 2 => 3),
    /* 0x5B */ op!("dup_x2", None, 3 => 4),
    /* 0x5C */ op!("dup2", None, 2 => 4),
    /* 0x5D */ op!("dup2_x1", None, 3 => 5),
    /* 0x5E */ op!("dup2_x2", None, 4 => 6),
    /* 0x5F */ op!("swap", None, 2 => 2),
    /* 0x60 */ op!("iadd", None, 2 => 1),
    /* 0x61 */ op!("ladd", None, 4 => 2),
    /* 0x62 */ op!("fadd", None, 2 => 1),
    /* 0x63 */ op!("dadd", None, 4 => 2),
    /* 0x64 */ op!("isub", None, 2 => 1),
    /* 0x65 */ op!("lsub", None, 4 => 2),
    /* 0x66 */ op!("fsub", None, 2 => 1),
    /* 0x67 */ op!("dsub", None, 4 => 2),
    /* 0x68 */ op!("imul", None, 2 => 1),
    /* 0x69 */ op!("lmul", None, 4 => 2),
    /* 0x6A */ op!("fmul", None, 2 => 1),
    /* 0x6B */ op!("dmul", None, 4 => 2),
    /* 0x6C */ op!("idiv", None, 2 => 1),
    /* 0x6D */ op!("ldiv", None, 4 => 2),
    /* 0x6E */ op!("fdiv", None, 2 => 1),
    /* 0x6F */ op!("ddiv", None, 4 => 2),
    /* 0x70 */ op!("irem", None, 2 => 1),
    /* 0x71 */ op!("lrem", None, 4 => 2),
    /* 0x72 */ op!("frem", None, 2 => 1),
    /* 0x73 */ op!("drem", None, 4 => 2),
    /* 0x74 */ op!("ineg", None, 1 => 1),
    /* 0x75 */ op!("lneg", None, 2 => 2),
    /* 0x76 */ op!("fneg", None, 1 => 1),
    /* 0x77 */ op!("dneg", None, 2 => 2),
    /* 0x78 */ op!("ishl", None, 2 => 1),
    /* 0x79 */ op!("lshl", None, 3 => 2),
    /* 0x7A */ op!("ishr", None, 2 => 1),
    /* 0x7B */ op!("lshr", None, 3 => 2),
    /* 0x7C */ op!("iushr", None, 2 => 1),
    /* 0x7D */ op!("lushr", None, 3 => 2),
    /* 0x7E */ op!("iand", None, 2 => 1),
    /* 0x7F */ op!("land", None, 4 => 2),
    /* 0x80 */ op!("ior", None, 2 => 1),
    /* 0x81 */ op!("lor", None, 4 => 2),
    /* 0x82 */ op!("ixor", None, 2 => 1),
    /* 0x83 */ op!("lxor", None, 4 => 2),
    /* 0x84 */ op!("iinc", Iinc, 0 => 0),
    /* 0x85 */ op!("i2l", None, 1 => 2),
    /* 0x86 */ op!("i2f", None, 1 => 1),
    /* 0x87 */ op!("i2d", None, 1 => 2),
    /* 0x88 */ op!("l2i", None, 2 => 1),
    /* 0x89 */ op!("l2f", None, 2 => 1),
    /* 0x8A */ op!("l2d", None, 2 => 2),
    /* 0x8B */ op!("f2i", None, 1 => 1),
    /* 0x8C */ op!("f2l", None, 1 => 2),
    /* 0x8D */ op!("f2d", None, 1 => 2),
    /* 0x8E */ op!("d2i", None, 2 => 1),
    /* 0x8F */ op!("d2l", None, 2 => 2),
    /* 0x90 */ op!("d2f", None, 2 => 1),
    /* 0x91 */ op!("i2b", None, 1 => 1),
    /* 0x92 */ op!("i2c", None, 1 => 1),
    /* 0x93 */ op!("i2s", None, 1 => 1),
    /* 0x94 */ op!("lcmp", None, 4 => 1),
    /* 0x95 */ op!("fcmpl", None, 2 => 1),
    /* 0x96 */ op!("fcmpg", None, 2 => 1),
    /* 0x97 */ op!("dcmpl", None, 4 => 1),
    /* 0x98 */ op!("dcmpg", None, 4 => 1),
    /* 0x99 */ op!("ifeq", Branch16, 1 => 0, ConditionalBranch),
    /* 0x9A */ op!("ifne", Branch16, 1 => 0, ConditionalBranch),
    /* 0x9B */ op!("iflt", Branch16, 1 => 0, ConditionalBranch),
    /* 0x9C */ op!("ifge", Branch16, 1 => 0, ConditionalBranch),
    /* 0x9D */ op!("ifgt", Branch16, 1 => 0, ConditionalBranch),
    /* 0x9E */ op!("ifle", Branch16, 1 => 0, ConditionalBranch),
    /* 0x9F */ op!("if_icmpeq", Branch16, 2 => 0, ConditionalBranch),
    /* 0xA0 */ op!("if_icmpne", Branch16, 2 => 0, ConditionalBranch),
    /* 0xA1 */ op!("if_icmplt", Branch16, 2 => 0, ConditionalBranch),
    /* 0xA2 */ op!("if_icmpge", Branch16, 2 => 0, ConditionalBranch),
    /* 0xA3 */ op!("if_icmpgt", Branch16, 2 => 0, ConditionalBranch),
    /* 0xA4 */ op!("if_icmple", Branch16, 2 => 0, ConditionalBranch),
    /* 0xA5 */ op!("if_acmpeq", Branch16, 2 => 0, ConditionalBranch),
    /* 0xA6 */ op!("if_acmpne", Branch16, 2 => 0, ConditionalBranch),
    /* 0xA7 */ op!("goto", Branch16, 0 => 0, UnconditionalBranch),
    /* 0xA8 */ op!("jsr", Branch16, 0 => 1, Subroutine),
    /* 0xA9 */ op!("ret", Local, 0 => 0, SubroutineReturn),
    /* 0xAA */ op!("tableswitch", TableSwitch, 1 => 0, Switch),
    /* 0xAB */ op!("lookupswitch", LookupSwitch, 1 => 0, Switch),
    /* 0xAC */ op!("ireturn", None, 1 => 0, Return),
    /* 0xAD */ op!("lreturn", None, 2 => 0, Return),
    /* 0xAE */ op!("freturn", None, 1 => 0, Return),
    /* 0xAF */ op!("dreturn", None, 2 => 0, Return),
    /* 0xB0 */ op!("areturn", None, 1 => 0, Return),
    /* 0xB1 */ op!("return", None, 0 => 0, Return),
    /* 0xB2 */ op!("getstatic", Constant16, dynamic),
    /* 0xB3 */ op!("putstatic", Constant16, dynamic),
    /* 0xB4 */ op!("getfield", Constant16, dynamic),
    /* 0xB5 */ op!("putfield", Constant16, dynamic),
    /* 0xB6 */ op!("invokevirtual", Constant16, dynamic),
    /* 0xB7 */ op!("invokespecial", Constant16, dynamic),
    /* 0xB8 */ op!("invokestatic", Constant16, dynamic),
    /* 0xB9 */ op!("invokeinterface", InvokeInterface, dynamic),
    /* 0xBA */ op!("invokedynamic", InvokeDynamic, dynamic),
    /* 0xBB */ op!("new", Constant16, 0 => 1),
    /* 0xBC */ op!("newarray", ArrayType, 1 => 1),
    /* 0xBD */ op!("anewarray", Constant16, 1 => 1),
    /* 0xBE */ op!("arraylength", None, 1 => 1),
    /* 0xBF */ op!("athrow", None, 1 => 0, Throw),
    /* 0xC0 */ op!("checkcast", Constant16, 1 => 1),
    /* 0xC1 */ op!("instanceof", Constant16, 1 => 1),
    /* 0xC2 */ op!("monitorenter", None, 1 => 0),
    /* 0xC3 */ op!("monitorexit", None, 1 => 0),
    /* 0xC4 */ op!("wide", Wide, 0 => 0),
    /* 0xC5 */ op!("multianewarray", MultiANewArray, dynamic),
    /* 0xC6 */ op!("ifnull", Branch16, 1 => 0, ConditionalBranch),
    /* 0xC7 */ op!("ifnonnull", Branch16, 1 => 0, ConditionalBranch),
    /* 0xC8 */ op!("goto_w", Branch32, 0 => 0, UnconditionalBranch),
    /* 0xC9 */ op!("jsr_w", Branch32, 0 => 1, Subroutine),
    /* 0xCA */ RESERVED,
    /* 0xCB */ RESERVED,
    /* 0xCC */ RESERVED,
    /* 0xCD */ RESERVED,
    /* 0xCE */ RESERVED,
    /* 0xCF */ RESERVED,
    /* 0xD0 */ RESERVED,
    /* 0xD1 */ RESERVED,
    /* 0xD2 */ RESERVED,
    /* 0xD3 */ RESERVED,
    /* 0xD4 */ RESERVED,
    /* 0xD5 */ RESERVED,
    /* 0xD6 */ RESERVED,
    /* 0xD7 */ RESERVED,
    /* 0xD8 */ RESERVED,
    /* 0xD9 */ RESERVED,
    /* 0xDA */ RESERVED,
    /* 0xDB */ RESERVED,
    /* 0xDC */ RESERVED,
    /* 0xDD */ RESERVED,
    /* 0xDE */ RESERVED,
    /* 0xDF */ RESERVED,
    /* 0xE0 */ RESERVED,
    /* 0xE1 */ RESERVED,
    /* 0xE2 */ RESERVED,
    /* 0xE3 */ RESERVED,
    /* 0xE4 */ RESERVED,
    /* 0xE5 */ RESERVED,
    /* 0xE6 */ RESERVED,
    /* 0xE7 */ RESERVED,
    /* 0xE8 */ RESERVED,
    /* 0xE9 */ RESERVED,
    /* 0xEA */ RESERVED,
    /* 0xEB */ RESERVED,
    /* 0xEC */ RESERVED,
    /* 0xED */ RESERVED,
    /* 0xEE */ RESERVED,
    /* 0xEF */ RESERVED,
    /* 0xF0 */ RESERVED,
    /* 0xF1 */ RESERVED,
    /* 0xF2 */ RESERVED,
    /* 0xF3 */ RESERVED,
    /* 0xF4 */ RESERVED,
    /* 0xF5 */ RESERVED,
    /* 0xF6 */ RESERVED,
    /* 0xF7 */ RESERVED,
    /* 0xF8 */ RESERVED,
    /* 0xF9 */ RESERVED,
    /* 0xFA */ RESERVED,
    /* 0xFB */ RESERVED,
    /* 0xFC */ RESERVED,
    /* 0xFD */ RESERVED,
    /* 0xFE */ RESERVED,
    /* 0xFF */ RESERVED,
];

/// A branch target.
///
/// Decoded code uses the absolute offset of the target instruction in the original code as
/// the label value; synthesized code may use any value as long as it is defined exactly
/// once in the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// Typed operand of a decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// `bipush` value
    Byte(i8),
    /// `sipush` value
    Short(i16),
    /// Local variable index
    Local(u16),
    /// Constant pool index
    Constant(u16),
    /// `iinc` operands
    Iinc {
        /// Local variable index
        index: u16,
        /// Signed increment
        delta: i16,
    },
    /// Target of a branch, `jsr`, `goto` or their wide forms
    Branch(Label),
    /// `tableswitch` operands
    TableSwitch {
        /// Target when the key is out of range
        default: Label,
        /// Lowest key
        low: i32,
        /// Highest key
        high: i32,
        /// One target per key from `low` to `high`
        targets: Vec<Label>,
    },
    /// `lookupswitch` operands
    LookupSwitch {
        /// Target when no key matches
        default: Label,
        /// Match values and their targets, sorted by match value
        pairs: Vec<(i32, Label)>,
    },
    /// `invokeinterface` operands
    InvokeInterface {
        /// `CONSTANT_InterfaceMethodref` index
        index: u16,
        /// Argument slot count including the receiver
        count: u8,
    },
    /// `invokedynamic` call site index
    InvokeDynamic(u16),
    /// `multianewarray` operands
    MultiANewArray {
        /// Array class index
        index: u16,
        /// Number of dimensions to create
        dimensions: u8,
    },
    /// `newarray` primitive type code
    ArrayType(u8),
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the first byte (the `wide` prefix, if any) in the decoded code
    pub offset: u32,
    /// The opcode, never `wide` itself
    pub opcode: u8,
    /// Whether the instruction was prefixed by `wide`
    pub wide: bool,
    /// Operand value
    pub operand: Operand,
}

impl Instruction {
    /// Create an instruction without a meaningful offset, for emission.
    #[must_use]
    pub fn new(opcode: u8, operand: Operand) -> Self {
        Instruction {
            offset: 0,
            opcode,
            wide: false,
            operand,
        }
    }

    /// Static metadata of this instruction's opcode.
    #[must_use]
    pub fn info(&self) -> &'static JvmInstruction {
        &INSTRUCTIONS[usize::from(self.opcode)]
    }

    /// The mnemonic of this instruction.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.info().mnemonic
    }

    /// Control flow behavior.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        self.info().flow
    }

    /// Returns `true` if execution never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow(),
            FlowType::UnconditionalBranch
                | FlowType::SubroutineReturn
                | FlowType::Return
                | FlowType::Throw
                | FlowType::Switch
        )
    }

    /// Every explicit branch target of this instruction, in operand order.
    #[must_use]
    pub fn targets(&self) -> Vec<Label> {
        match &self.operand {
            Operand::Branch(label) => vec![*label],
            Operand::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Operand::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, label)| *label))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Constant pool index referenced by this instruction, if any.
    #[must_use]
    pub fn constant_index(&self) -> Option<u16> {
        match self.operand {
            Operand::Constant(index)
            | Operand::InvokeInterface { index, .. }
            | Operand::InvokeDynamic(index)
            | Operand::MultiANewArray { index, .. } => Some(index),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:5}: ", self.offset)?;
        if self.wide {
            f.write_str("wide ")?;
        }
        f.write_str(self.mnemonic())?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Byte(value) => write!(f, " {value}"),
            Operand::Short(value) => write!(f, " {value}"),
            Operand::Local(index) => write!(f, " {index}"),
            Operand::Constant(index) | Operand::InvokeDynamic(index) => write!(f, " #{index}"),
            Operand::Iinc { index, delta } => write!(f, " {index} {delta}"),
            Operand::Branch(label) => write!(f, " {}", label.0),
            Operand::TableSwitch {
                default,
                low,
                high,
                ..
            } => write!(f, " {low}..={high} default {}", default.0),
            Operand::LookupSwitch { default, pairs } => {
                write!(f, " {} pairs default {}", pairs.len(), default.0)
            }
            Operand::InvokeInterface { index, count } => write!(f, " #{index} {count}"),
            Operand::MultiANewArray { index, dimensions } => write!(f, " #{index} {dimensions}"),
            Operand::ArrayType(code) => write!(f, " {code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes;

    #[test]
    fn table_matches_opcode_constants() {
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::NOP)].mnemonic, "nop");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::LDC_W)].mnemonic, "ldc_w");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::INVOKESTATIC)].mnemonic, "invokestatic");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::JSR_W)].mnemonic, "jsr_w");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::TABLESWITCH)].flow, FlowType::Switch);
        assert_eq!(
            INSTRUCTIONS[usize::from(opcodes::LADD)].stack,
            StackEffect::Fixed { pops: 4, pushes: 2 }
        );
    }

    #[test]
    fn reserved_opcodes() {
        let valid = INSTRUCTIONS.iter().filter(|i| !i.is_reserved()).count();
        assert_eq!(valid, 202);
        assert!(INSTRUCTIONS[0xCA].is_reserved());
        assert!(INSTRUCTIONS[0xFF].is_reserved());
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for instr in INSTRUCTIONS.iter().filter(|i| !i.is_reserved()) {
            assert!(seen.insert(instr.mnemonic), "duplicate {}", instr.mnemonic);
        }
    }

    #[test]
    fn targets_and_terminal() {
        let switch = Instruction::new(
            opcodes::LOOKUPSWITCH,
            Operand::LookupSwitch {
                default: Label(30),
                pairs: vec![(1, Label(10)), (7, Label(20))],
            },
        );
        assert_eq!(switch.targets(), [Label(30), Label(10), Label(20)]);
        assert!(switch.is_terminal());

        let branch = Instruction::new(opcodes::IFEQ, Operand::Branch(Label(4)));
        assert_eq!(branch.targets(), [Label(4)]);
        assert!(!branch.is_terminal());
    }

    #[test]
    fn display() {
        let mut instr = Instruction::new(opcodes::INVOKESTATIC, Operand::Constant(12));
        instr.offset = 7;
        assert_eq!(instr.to_string(), "    7: invokestatic #12");
    }
}
