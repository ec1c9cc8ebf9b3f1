//! Attributes of classes, members and method bodies (JVMS §4.7).
//!
//! Attributes are carried as raw [`Attribute`] values unless the rewriter has to look inside
//! them. The `Code` attribute and the offset-bearing attributes nested in it are parsed into
//! dedicated types so their bytecode offsets can be relocated.

use crate::{
    classfile::ConstantPool,
    file::{io::write_be_to, parser::Parser},
    Result,
};

/// Names of the attributes this crate interprets.
#[allow(missing_docs)]
pub mod names {
    pub const CODE: &str = "Code";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
    pub const SOURCE_FILE: &str = "SourceFile";
    /// Marker left on every class this crate rewrote
    pub const INSTRUMENTED_MARKER: &str = "LineProbeInstrumented";
}

/// An attribute in its serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Constant pool index of the attribute name
    pub name_index: u16,
    /// Attribute payload, without the six byte header
    pub info: Vec<u8>,
}

impl Attribute {
    /// Parse one attribute.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse(parser: &mut Parser) -> Result<Attribute> {
        let name_index = parser.read_be::<u16>()?;
        let info = parser.read_u32_prefixed()?.to_vec();
        Ok(Attribute { name_index, info })
    }

    /// Parse a `u16` counted list of attributes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse_list(parser: &mut Parser) -> Result<Vec<Attribute>> {
        let count = parser.read_be::<u16>()?;
        (0..count).map(|_| Attribute::parse(parser)).collect()
    }

    /// Serialize one attribute with its header.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the payload exceeds `u32::MAX` bytes.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let length = u32::try_from(self.info.len())
            .map_err(|_| malformed_error!("Attribute payload of {} bytes", self.info.len()))?;
        write_be_to(out, self.name_index);
        write_be_to(out, length);
        out.extend_from_slice(&self.info);
        Ok(())
    }

    /// Serialize a `u16` counted list of attributes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for more than 65535 attributes.
    pub fn write_list(attributes: &[Attribute], out: &mut Vec<u8>) -> Result<()> {
        let count = u16::try_from(attributes.len())
            .map_err(|_| malformed_error!("{} attributes in one list", attributes.len()))?;
        write_be_to(out, count);
        for attribute in attributes {
            attribute.write(out)?;
        }
        Ok(())
    }

    /// Returns `true` if this attribute's name is `name`.
    #[must_use]
    pub fn is_named(&self, pool: &ConstantPool, name: &str) -> bool {
        pool.utf8_eq(self.name_index, name)
    }
}

/// One row of a `Code` attribute's exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First covered bytecode offset (inclusive)
    pub start_pc: u16,
    /// End of the covered range (exclusive)
    pub end_pc: u16,
    /// Offset of the handler
    pub handler_pc: u16,
    /// Constant pool index of the caught class, 0 for `finally`
    pub catch_type: u16,
}

/// One row of a `LineNumberTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// Offset of the first instruction attributed to `line`
    pub start_pc: u16,
    /// Source line number
    pub line: u16,
}

impl LineNumber {
    /// Parse the payload of a `LineNumberTable` attribute.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse_table(info: &[u8]) -> Result<Vec<LineNumber>> {
        let mut parser = Parser::new(info);
        let count = parser.read_be::<u16>()?;
        (0..count)
            .map(|_| {
                Ok(LineNumber {
                    start_pc: parser.read_be()?,
                    line: parser.read_be()?,
                })
            })
            .collect()
    }

    /// Serialize the payload of a `LineNumberTable` attribute.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for more than 65535 rows.
    pub fn write_table(rows: &[LineNumber]) -> Result<Vec<u8>> {
        let count = u16::try_from(rows.len())
            .map_err(|_| malformed_error!("{} rows in a LineNumberTable", rows.len()))?;
        let mut out = Vec::with_capacity(2 + rows.len() * 4);
        write_be_to(&mut out, count);
        for row in rows {
            write_be_to(&mut out, row.start_pc);
            write_be_to(&mut out, row.line);
        }
        Ok(out)
    }
}

/// One row of a `LocalVariableTable` or `LocalVariableTypeTable`.
///
/// Both tables share this layout; the fourth field is a descriptor in the former and a
/// generic signature in the latter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    /// First offset at which the variable has a value
    pub start_pc: u16,
    /// Length of the range in bytes
    pub length: u16,
    /// Constant pool index of the variable name
    pub name_index: u16,
    /// Constant pool index of the descriptor or signature
    pub descriptor_index: u16,
    /// Local variable slot
    pub index: u16,
}

impl LocalVariable {
    /// Parse the payload of a local variable table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse_table(info: &[u8]) -> Result<Vec<LocalVariable>> {
        let mut parser = Parser::new(info);
        let count = parser.read_be::<u16>()?;
        (0..count)
            .map(|_| {
                Ok(LocalVariable {
                    start_pc: parser.read_be()?,
                    length: parser.read_be()?,
                    name_index: parser.read_be()?,
                    descriptor_index: parser.read_be()?,
                    index: parser.read_be()?,
                })
            })
            .collect()
    }

    /// Serialize the payload of a local variable table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for more than 65535 rows.
    pub fn write_table(rows: &[LocalVariable]) -> Result<Vec<u8>> {
        let count = u16::try_from(rows.len())
            .map_err(|_| malformed_error!("{} rows in a local variable table", rows.len()))?;
        let mut out = Vec::with_capacity(2 + rows.len() * 10);
        write_be_to(&mut out, count);
        for row in rows {
            write_be_to(&mut out, row.start_pc);
            write_be_to(&mut out, row.length);
            write_be_to(&mut out, row.name_index);
            write_be_to(&mut out, row.descriptor_index);
            write_be_to(&mut out, row.index);
        }
        Ok(out)
    }
}

/// A parsed `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum depth of the operand stack, in slots
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// The bytecode
    pub code: Vec<u8>,
    /// Exception handlers, in priority order
    pub exception_table: Vec<ExceptionEntry>,
    /// Nested attributes (`LineNumberTable`, `StackMapTable`, ...)
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    /// Parse the payload of a `Code` attribute.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated input and
    /// [`crate::Error::Malformed`] for an empty code array or trailing bytes.
    pub fn parse(info: &[u8]) -> Result<CodeAttribute> {
        let mut parser = Parser::new(info);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;
        let code = parser.read_u32_prefixed()?.to_vec();
        if code.is_empty() || code.len() > usize::from(u16::MAX) {
            return Err(malformed_error!("Code array of {} bytes", code.len()));
        }

        let handlers = parser.read_be::<u16>()?;
        let exception_table = (0..handlers)
            .map(|_| {
                Ok(ExceptionEntry {
                    start_pc: parser.read_be()?,
                    end_pc: parser.read_be()?,
                    handler_pc: parser.read_be()?,
                    catch_type: parser.read_be()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let attributes = Attribute::parse_list(&mut parser)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after Code attribute",
                parser.remaining()
            ));
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Serialize the payload of a `Code` attribute.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CodeTooLarge`] for code over 65535 bytes and
    /// [`crate::Error::Malformed`] for oversized tables.
    pub fn to_info(&self) -> Result<Vec<u8>> {
        if self.code.len() > usize::from(u16::MAX) {
            return Err(crate::Error::CodeTooLarge(self.code.len()));
        }
        let handlers = u16::try_from(self.exception_table.len()).map_err(|_| {
            malformed_error!("{} exception handlers", self.exception_table.len())
        })?;

        let mut out = Vec::with_capacity(self.code.len() + 32);
        write_be_to(&mut out, self.max_stack);
        write_be_to(&mut out, self.max_locals);
        write_be_to(&mut out, self.code.len() as u32);
        out.extend_from_slice(&self.code);
        write_be_to(&mut out, handlers);
        for entry in &self.exception_table {
            write_be_to(&mut out, entry.start_pc);
            write_be_to(&mut out, entry.end_pc);
            write_be_to(&mut out, entry.handler_pc);
            write_be_to(&mut out, entry.catch_type);
        }
        Attribute::write_list(&self.attributes, &mut out)?;
        Ok(out)
    }

    /// All `LineNumberTable` rows, merged across tables in attribute order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if a table is truncated.
    pub fn line_numbers(&self, pool: &ConstantPool) -> Result<Vec<LineNumber>> {
        let mut rows = Vec::new();
        for attribute in &self.attributes {
            if attribute.is_named(pool, names::LINE_NUMBER_TABLE) {
                rows.extend(LineNumber::parse_table(&attribute.info)?);
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    const CODE_INFO: [u8; 38] = [
        0x00, 0x02,             // max_stack
        0x00, 0x01,             // max_locals
        0x00, 0x00, 0x00, 0x04, // code_length
        0x03, 0x3B, 0x00, 0xB1, // iconst_0, istore_0, nop, return
        0x00, 0x01,             // one handler
        0x00, 0x00, 0x00, 0x03, 0x00, 0x03, 0x00, 0x00,
        0x00, 0x01,             // one attribute
        0x00, 0x05,             // name #5
        0x00, 0x00, 0x00, 0x08, // length
        0x00, 0x02, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x02,
    ];

    #[test]
    fn code_attribute_round_trip() {
        let code = CodeAttribute::parse(&CODE_INFO).unwrap();
        assert_eq!(code.max_stack, 2);
        assert_eq!(code.max_locals, 1);
        assert_eq!(code.code, [0x03, 0x3B, 0x00, 0xB1]);
        assert_eq!(
            code.exception_table,
            [ExceptionEntry {
                start_pc: 0,
                end_pc: 3,
                handler_pc: 3,
                catch_type: 0
            }]
        );
        assert_eq!(code.attributes.len(), 1);
        assert_eq!(code.to_info().unwrap(), CODE_INFO);
    }

    #[test]
    fn line_number_table() {
        // the nested table of CODE_INFO claims two rows but carries one
        let truncated = LineNumber::parse_table(&CODE_INFO[30..]).unwrap_err();
        assert!(matches!(truncated, crate::Error::OutOfBounds));

        let rows = LineNumber::parse_table(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x02, 0x00, 0x0B])
            .unwrap();
        assert_eq!(
            rows,
            [
                LineNumber { start_pc: 0, line: 10 },
                LineNumber { start_pc: 2, line: 11 }
            ]
        );
        assert_eq!(
            LineNumber::write_table(&rows).unwrap(),
            [0x00, 0x02, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x02, 0x00, 0x0B]
        );
    }

    #[test]
    fn local_variable_table() {
        let row = LocalVariable {
            start_pc: 2,
            length: 7,
            name_index: 9,
            descriptor_index: 10,
            index: 1,
        };
        let info = LocalVariable::write_table(&[row]).unwrap();
        assert_eq!(info.len(), 12);
        assert_eq!(LocalVariable::parse_table(&info).unwrap(), [row]);
    }

    #[test]
    fn rejects_trailing_bytes_and_empty_code() {
        let mut data = CODE_INFO.to_vec();
        data.push(0);
        assert!(CodeAttribute::parse(&data).is_err());

        let empty = [0, 1, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(CodeAttribute::parse(&empty).is_err());
    }
}
