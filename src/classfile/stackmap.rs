//! The `StackMapTable` attribute (JVMS §4.7.4).
//!
//! Frames are held with absolute bytecode offsets instead of the deltas of the serialized
//! form, so moving code around only means rewriting offsets; the compact encodings are
//! chosen again when the table is written back.

use crate::{
    file::{io::write_be_to, parser::Parser},
    Result,
};

/// Type of one local variable or operand stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    /// Tag 0
    Top,
    /// Tag 1
    Integer,
    /// Tag 2
    Float,
    /// Tag 3
    Double,
    /// Tag 4
    Long,
    /// Tag 5
    Null,
    /// Tag 6, `this` before the super constructor ran
    UninitializedThis,
    /// Tag 7, constant pool index of a `CONSTANT_Class`
    Object(u16),
    /// Tag 8, bytecode offset of the `new` that created the value
    Uninitialized(u16),
}

impl VerificationType {
    fn parse(parser: &mut Parser) -> Result<VerificationType> {
        Ok(match parser.read_be::<u8>()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(parser.read_be()?),
            8 => VerificationType::Uninitialized(parser.read_be()?),
            tag => return Err(malformed_error!("Unknown verification type tag {}", tag)),
        })
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            VerificationType::Top => out.push(0),
            VerificationType::Integer => out.push(1),
            VerificationType::Float => out.push(2),
            VerificationType::Double => out.push(3),
            VerificationType::Long => out.push(4),
            VerificationType::Null => out.push(5),
            VerificationType::UninitializedThis => out.push(6),
            VerificationType::Object(index) => {
                out.push(7);
                write_be_to(out, index);
            }
            VerificationType::Uninitialized(offset) => {
                out.push(8);
                write_be_to(out, offset);
            }
        }
    }
}

/// Shape of a frame relative to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Same locals, empty stack
    Same,
    /// Same locals, one stack item
    SameLocals1(VerificationType),
    /// The last `k` locals are gone, empty stack
    Chop(u8),
    /// Additional locals, empty stack
    Append(Vec<VerificationType>),
    /// Everything spelled out
    Full {
        /// Local variable types
        locals: Vec<VerificationType>,
        /// Operand stack types
        stack: Vec<VerificationType>,
    },
}

/// One stack map frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Absolute bytecode offset the frame applies to
    pub offset: u32,
    /// Frame contents
    pub kind: FrameKind,
}

impl Frame {
    /// Move the frame and the values it describes to new offsets.
    ///
    /// `frame` maps the frame's own offset, `uninitialized` maps the offsets of the `new`
    /// instructions referenced by `Uninitialized` entries. The two differ when code is
    /// inserted in front of an instruction: branches land in front of the inserted code,
    /// while the created object still belongs to the `new` instruction itself.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by either map.
    pub fn relocate<F, G>(&mut self, frame: F, mut uninitialized: G) -> Result<()>
    where
        F: FnOnce(u32) -> Result<u32>,
        G: FnMut(u32) -> Result<u32>,
    {
        self.offset = frame(self.offset)?;

        let mut remap = |types: &mut [VerificationType]| -> Result<()> {
            for vt in types {
                if let VerificationType::Uninitialized(offset) = vt {
                    let moved = uninitialized(u32::from(*offset))?;
                    *offset = u16::try_from(moved)
                        .map_err(|_| crate::Error::CodeTooLarge(moved as usize))?;
                }
            }
            Ok(())
        };

        match &mut self.kind {
            FrameKind::Same | FrameKind::Chop(_) => Ok(()),
            FrameKind::SameLocals1(vt) => remap(std::slice::from_mut(vt)),
            FrameKind::Append(locals) => remap(locals),
            FrameKind::Full { locals, stack } => {
                remap(locals)?;
                remap(stack)
            }
        }
    }
}

/// Parse the payload of a `StackMapTable` attribute.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for reserved frame types and unknown verification
/// tags, [`crate::Error::OutOfBounds`] for truncated input.
pub fn parse(info: &[u8]) -> Result<Vec<Frame>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut frames = Vec::with_capacity(usize::from(count));
    let mut previous: Option<u32> = None;

    for _ in 0..count {
        let frame_type = parser.read_be::<u8>()?;
        let (delta, kind) = match frame_type {
            0..=63 => (u16::from(frame_type), FrameKind::Same),
            64..=127 => (
                u16::from(frame_type - 64),
                FrameKind::SameLocals1(VerificationType::parse(&mut parser)?),
            ),
            247 => {
                let delta = parser.read_be::<u16>()?;
                (
                    delta,
                    FrameKind::SameLocals1(VerificationType::parse(&mut parser)?),
                )
            }
            248..=250 => (parser.read_be::<u16>()?, FrameKind::Chop(251 - frame_type)),
            251 => (parser.read_be::<u16>()?, FrameKind::Same),
            252..=254 => {
                let delta = parser.read_be::<u16>()?;
                let locals = (0..frame_type - 251)
                    .map(|_| VerificationType::parse(&mut parser))
                    .collect::<Result<Vec<_>>>()?;
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = parser.read_be::<u16>()?;
                let local_count = parser.read_be::<u16>()?;
                let locals = (0..local_count)
                    .map(|_| VerificationType::parse(&mut parser))
                    .collect::<Result<Vec<_>>>()?;
                let stack_count = parser.read_be::<u16>()?;
                let stack = (0..stack_count)
                    .map(|_| VerificationType::parse(&mut parser))
                    .collect::<Result<Vec<_>>>()?;
                (delta, FrameKind::Full { locals, stack })
            }
            reserved => return Err(malformed_error!("Reserved stack map frame type {}", reserved)),
        };

        let offset = match previous {
            None => u32::from(delta),
            Some(prev) => prev + u32::from(delta) + 1,
        };
        previous = Some(offset);
        frames.push(Frame { offset, kind });
    }

    Ok(frames)
}

/// Serialize frames into the payload of a `StackMapTable` attribute.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the frames are not in strictly increasing offset
/// order or a delta does not fit in 16 bits.
pub fn write(frames: &[Frame]) -> Result<Vec<u8>> {
    let count = u16::try_from(frames.len())
        .map_err(|_| malformed_error!("{} stack map frames", frames.len()))?;
    let mut out = Vec::with_capacity(2 + frames.len() * 4);
    write_be_to(&mut out, count);

    let mut previous: Option<u32> = None;
    for frame in frames {
        let raw_delta = match previous {
            None => Some(frame.offset),
            Some(prev) => frame.offset.checked_sub(prev + 1),
        };
        let delta = raw_delta
            .and_then(|delta| u16::try_from(delta).ok())
            .ok_or_else(|| {
                malformed_error!("Stack map frame at {} is out of order", frame.offset)
            })?;
        previous = Some(frame.offset);

        match &frame.kind {
            FrameKind::Same if delta <= 63 => out.push(delta as u8),
            FrameKind::Same => {
                out.push(251);
                write_be_to(&mut out, delta);
            }
            FrameKind::SameLocals1(vt) if delta <= 63 => {
                out.push(64 + delta as u8);
                vt.write(&mut out);
            }
            FrameKind::SameLocals1(vt) => {
                out.push(247);
                write_be_to(&mut out, delta);
                vt.write(&mut out);
            }
            FrameKind::Chop(k) => {
                if !(1..=3).contains(k) {
                    return Err(malformed_error!("Chop frame removing {} locals", k));
                }
                out.push(251 - k);
                write_be_to(&mut out, delta);
            }
            FrameKind::Append(locals) => {
                if !(1..=3).contains(&locals.len()) {
                    return Err(malformed_error!("Append frame adding {} locals", locals.len()));
                }
                out.push(251 + locals.len() as u8);
                write_be_to(&mut out, delta);
                for vt in locals {
                    vt.write(&mut out);
                }
            }
            FrameKind::Full { locals, stack } => {
                out.push(255);
                write_be_to(&mut out, delta);
                write_be_to(&mut out, locals.len() as u16);
                for vt in locals {
                    vt.write(&mut out);
                }
                write_be_to(&mut out, stack.len() as u16);
                for vt in stack {
                    vt.write(&mut out);
                }
            }
        }
    }

    Ok(out)
}
