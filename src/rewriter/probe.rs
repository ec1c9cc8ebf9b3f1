//! The probe instruction sequence.
//!
//! A probe reports one line transition to the hit recorder:
//!
//! ```text
//! ldc        "com/acme/Worker"          // unit name, ldc_w for wide indices
//! sipush     42                         // line, smallest int push
//! invokestatic java/lang/System.nanoTime()J     // only with probe timestamps
//! invokestatic lineprobe/runtime/HitRecorder.registerHit(Ljava/lang/String;I)V
//! ```
//!
//! The sequence consumes everything it pushes and touches no local variable, so the frame
//! after a probe equals the frame before it.

use strum::{Display, EnumIter, EnumString};

use crate::{
    assembly::{decode_code, opcodes, Instruction, InstructionEncoder, Operand},
    classfile::{ClassFile, Constant, ConstantPool, MemberInfo, MAX_MAJOR_VERSION},
    isolation::RECORDER_CLASS,
    Result,
};

/// Name of the recorder entry point every probe calls.
pub const RECORDER_METHOD: &str = "registerHit";
/// Entry point descriptor when the recorder takes the timestamp.
pub const UNTIMED_DESCRIPTOR: &str = "(Ljava/lang/String;I)V";
/// Entry point descriptor when the probe passes a `System.nanoTime()` timestamp.
pub const TIMED_DESCRIPTOR: &str = "(Ljava/lang/String;IJ)V";

/// Where the timestamp of a hit is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum TimestampSource {
    /// The recorder stamps each hit on arrival
    #[default]
    Recorder,
    /// The probe calls `System.nanoTime()` and passes the value along
    Probe,
}

impl TimestampSource {
    /// Descriptor of the recorder entry point for this source.
    #[must_use]
    pub fn descriptor(self) -> &'static str {
        match self {
            TimestampSource::Recorder => UNTIMED_DESCRIPTOR,
            TimestampSource::Probe => TIMED_DESCRIPTOR,
        }
    }
}

/// Which recorder entry point probes call, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Internal name of the recorder unit
    pub recorder_class: String,
    /// Name of the static entry point
    pub recorder_method: String,
    /// Timestamp policy
    pub timestamp: TimestampSource,
    /// Newest class file major version that is rewritten
    pub max_major_version: u16,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            recorder_class: RECORDER_CLASS.to_string(),
            recorder_method: RECORDER_METHOD.to_string(),
            timestamp: TimestampSource::default(),
            max_major_version: MAX_MAJOR_VERSION,
        }
    }
}

impl ProbeConfig {
    /// Default recorder with the given timestamp policy.
    #[must_use]
    pub fn with_timestamp(timestamp: TimestampSource) -> Self {
        ProbeConfig {
            timestamp,
            ..Self::default()
        }
    }

    /// Extra operand stack slots a probe needs at its peak.
    #[must_use]
    pub fn peak_stack(&self) -> u16 {
        match self.timestamp {
            TimestampSource::Recorder => 2,
            TimestampSource::Probe => 4,
        }
    }
}

/// Constant pool indices shared by every probe of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSequence {
    unit_name: u16,
    register_hit: u16,
    nano_time: Option<u16>,
}

impl ProbeSequence {
    /// Add the constants probes of `unit_name` need to `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if they do not fit.
    pub fn prepare(pool: &mut ConstantPool, unit_name: &str, config: &ProbeConfig) -> Result<Self> {
        let unit_name = pool.add_string(unit_name)?;
        let register_hit = pool.add_method_ref(
            &config.recorder_class,
            &config.recorder_method,
            config.timestamp.descriptor(),
        )?;
        let nano_time = match config.timestamp {
            TimestampSource::Probe => {
                Some(pool.add_method_ref("java/lang/System", "nanoTime", "()J")?)
            }
            TimestampSource::Recorder => None,
        };
        Ok(ProbeSequence {
            unit_name,
            register_hit,
            nano_time,
        })
    }

    /// Emit one probe for `line`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if a line above 32767 needs a new
    /// `CONSTANT_Integer` and the pool is full.
    pub fn emit(
        &self,
        encoder: &mut InstructionEncoder,
        pool: &mut ConstantPool,
        line: u16,
    ) -> Result<()> {
        encoder.emit_ldc(self.unit_name)?;
        encoder.emit_push_int(i32::from(line), pool)?;
        if let Some(nano_time) = self.nano_time {
            encoder.emit(&Instruction::new(
                opcodes::INVOKESTATIC,
                Operand::Constant(nano_time),
            ))?;
        }
        encoder.emit(&Instruction::new(
            opcodes::INVOKESTATIC,
            Operand::Constant(self.register_hit),
        ))
    }
}

/// A probe found in a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSite {
    /// Unit name the probe reports
    pub unit: String,
    /// Line the probe reports
    pub line: u32,
    /// Offset of the probe's first instruction
    pub offset: u32,
    /// Whether the probe passes its own timestamp
    pub timed: bool,
}

/// List the probes in `method`, in bytecode order.
///
/// A probe is recognized by its call to `recorder_class.registerHit` and the constant pushes
/// in front of it. Methods without code have no probes.
///
/// # Errors
///
/// Returns an error if the method's code can not be decoded.
pub fn probe_sites(
    class: &ClassFile,
    method: &MemberInfo,
    recorder_class: &str,
) -> Result<Vec<ProbeSite>> {
    let Some(code) = class.code(method)? else {
        return Ok(Vec::new());
    };
    let pool = &class.constant_pool;
    let instructions = decode_code(&code.code)?;

    let mut sites = Vec::new();
    for (index, instr) in instructions.iter().enumerate() {
        if !is_static_call(instr, pool, recorder_class, RECORDER_METHOD) {
            continue;
        }

        let mut cursor = index;
        let timed = cursor > 0
            && is_static_call(&instructions[cursor - 1], pool, "java/lang/System", "nanoTime");
        if timed {
            cursor -= 1;
        }
        if cursor < 2 {
            continue;
        }

        let Some(line) = int_value(&instructions[cursor - 1], pool) else {
            continue;
        };
        let Some(unit) = string_value(&instructions[cursor - 2], pool) else {
            continue;
        };
        sites.push(ProbeSite {
            unit,
            line: line as u32,
            offset: instructions[cursor - 2].offset,
            timed,
        });
    }
    Ok(sites)
}

fn is_static_call(instr: &Instruction, pool: &ConstantPool, class: &str, name: &str) -> bool {
    match (instr.opcode, &instr.operand) {
        (opcodes::INVOKESTATIC, Operand::Constant(index)) => pool
            .member_ref(*index)
            .is_ok_and(|member| member.class == class && member.name == name),
        _ => false,
    }
}

fn int_value(instr: &Instruction, pool: &ConstantPool) -> Option<i32> {
    match (instr.opcode, &instr.operand) {
        (opcodes::ICONST_M1..=opcodes::ICONST_5, _) => {
            Some(i32::from(instr.opcode) - i32::from(opcodes::ICONST_0))
        }
        (_, Operand::Byte(value)) => Some(i32::from(*value)),
        (_, Operand::Short(value)) => Some(i32::from(*value)),
        (opcodes::LDC | opcodes::LDC_W, Operand::Constant(index)) => match pool.get(*index) {
            Ok(Constant::Integer(value)) => Some(*value),
            _ => None,
        },
        _ => None,
    }
}

fn string_value(instr: &Instruction, pool: &ConstantPool) -> Option<String> {
    match (instr.opcode, &instr.operand) {
        (opcodes::LDC | opcodes::LDC_W, Operand::Constant(index)) => match pool.get(*index) {
            Ok(Constant::String { string_index }) => pool.utf8(*string_index).ok(),
            _ => None,
        },
        _ => None,
    }
}
