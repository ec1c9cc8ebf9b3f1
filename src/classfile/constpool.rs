//! The class file constant pool (JVMS §4.4).
//!
//! Entries are kept in their structural form so a parsed pool re-serializes byte-for-byte.
//! `CONSTANT_Utf8` payloads stay in modified UTF-8 and are only decoded on request, which
//! keeps strings with unpaired surrogates intact.
//!
//! # Examples
//!
//! ```rust
//! use lineprobe::classfile::{Constant, ConstantPool};
//!
//! let mut pool = ConstantPool::new();
//! let string = pool.add_string("com/acme/Worker")?;
//! let hit = pool.add_method_ref("lineprobe/runtime/HitRecorder", "registerHit", "(Ljava/lang/String;I)V")?;
//!
//! // Lookups are deduplicated
//! assert_eq!(pool.add_string("com/acme/Worker")?, string);
//! assert!(matches!(pool.get(hit)?, Constant::Methodref { .. }));
//!
//! let member = pool.member_ref(hit)?;
//! assert_eq!(member.name, "registerHit");
//! # Ok::<(), lineprobe::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    classfile::mutf8,
    file::{io::write_be_to, parser::Parser},
    Error, Result,
};

/// Tag bytes of the constant pool entry kinds.
#[allow(missing_docs)]
pub mod tags {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// Highest slot count a constant pool can declare.
pub const MAX_POOL_SLOTS: usize = u16::MAX as usize;

/// One constant pool entry.
///
/// Floating point values are stored as raw bits so that pool deduplication compares NaN
/// payloads exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Constant {
    /// Slot 0 and the slot following a `Long` or `Double`
    Unusable,
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl Constant {
    /// Number of pool slots this entry occupies.
    #[must_use]
    pub fn slots(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// A resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Internal name of the owning class
    pub class: String,
    /// Member name
    pub name: String,
    /// Field or method descriptor
    pub descriptor: String,
}

/// The constant pool of one class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    /// Index 0 is always [`Constant::Unusable`]; long and double entries are followed by one.
    entries: Vec<Constant>,
    /// First slot holding each distinct entry
    index: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
            index: HashMap::new(),
        }
    }

    /// Parse a pool, starting at its `constant_pool_count`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated input and
    /// [`crate::Error::Malformed`] for unknown tags or a wide entry in the last slot.
    pub fn parse(parser: &mut Parser) -> Result<ConstantPool> {
        let count = usize::from(parser.read_be::<u16>()?);
        if count == 0 {
            return Err(malformed_error!("constant_pool_count must be at least 1"));
        }

        let mut entries = Vec::with_capacity(count);
        let mut index = HashMap::with_capacity(count);
        entries.push(Constant::Unusable);

        while entries.len() < count {
            let tag = parser.read_be::<u8>()?;
            let constant = match tag {
                tags::UTF8 => Constant::Utf8(parser.read_u16_prefixed()?.to_vec()),
                tags::INTEGER => Constant::Integer(parser.read_be()?),
                tags::FLOAT => Constant::Float(parser.read_be()?),
                tags::LONG => Constant::Long(parser.read_be()?),
                tags::DOUBLE => Constant::Double(parser.read_be()?),
                tags::CLASS => Constant::Class {
                    name_index: parser.read_be()?,
                },
                tags::STRING => Constant::String {
                    string_index: parser.read_be()?,
                },
                tags::FIELDREF => Constant::Fieldref {
                    class_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::METHODREF => Constant::Methodref {
                    class_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::INTERFACE_METHODREF => Constant::InterfaceMethodref {
                    class_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::NAME_AND_TYPE => Constant::NameAndType {
                    name_index: parser.read_be()?,
                    descriptor_index: parser.read_be()?,
                },
                tags::METHOD_HANDLE => Constant::MethodHandle {
                    reference_kind: parser.read_be()?,
                    reference_index: parser.read_be()?,
                },
                tags::METHOD_TYPE => Constant::MethodType {
                    descriptor_index: parser.read_be()?,
                },
                tags::DYNAMIC => Constant::Dynamic {
                    bootstrap_method_attr_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap_method_attr_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::MODULE => Constant::Module {
                    name_index: parser.read_be()?,
                },
                tags::PACKAGE => Constant::Package {
                    name_index: parser.read_be()?,
                },
                _ => {
                    return Err(malformed_error!(
                        "Unknown constant pool tag {} at slot {}",
                        tag,
                        entries.len()
                    ))
                }
            };

            let wide = constant.slots() == 2;
            if let Ok(slot) = u16::try_from(entries.len()) {
                index.entry(constant.clone()).or_insert(slot);
            }
            entries.push(constant);
            if wide {
                if entries.len() >= count {
                    return Err(malformed_error!(
                        "Long or Double constant in the last constant pool slot"
                    ));
                }
                entries.push(Constant::Unusable);
            }
        }

        Ok(ConstantPool { entries, index })
    }

    /// Serialize the pool, including its leading `constant_pool_count`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool grew past 65535 slots.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let count = u16::try_from(self.entries.len())
            .map_err(|_| Error::ConstantPoolOverflow(self.entries.len()))?;
        write_be_to(out, count);

        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(bytes) => {
                    let length = u16::try_from(bytes.len())
                        .map_err(|_| malformed_error!("Utf8 constant longer than 65535 bytes"))?;
                    write_be_to(out, tags::UTF8);
                    write_be_to(out, length);
                    out.extend_from_slice(bytes);
                }
                Constant::Integer(value) => {
                    write_be_to(out, tags::INTEGER);
                    write_be_to(out, *value);
                }
                Constant::Float(bits) => {
                    write_be_to(out, tags::FLOAT);
                    write_be_to(out, *bits);
                }
                Constant::Long(value) => {
                    write_be_to(out, tags::LONG);
                    write_be_to(out, *value);
                }
                Constant::Double(bits) => {
                    write_be_to(out, tags::DOUBLE);
                    write_be_to(out, *bits);
                }
                Constant::Class { name_index } => {
                    write_be_to(out, tags::CLASS);
                    write_be_to(out, *name_index);
                }
                Constant::String { string_index } => {
                    write_be_to(out, tags::STRING);
                    write_be_to(out, *string_index);
                }
                Constant::Fieldref {
                    class_index,
                    name_and_type_index,
                } => write_pair(out, tags::FIELDREF, *class_index, *name_and_type_index),
                Constant::Methodref {
                    class_index,
                    name_and_type_index,
                } => write_pair(out, tags::METHODREF, *class_index, *name_and_type_index),
                Constant::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => write_pair(
                    out,
                    tags::INTERFACE_METHODREF,
                    *class_index,
                    *name_and_type_index,
                ),
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => write_pair(out, tags::NAME_AND_TYPE, *name_index, *descriptor_index),
                Constant::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    write_be_to(out, tags::METHOD_HANDLE);
                    write_be_to(out, *reference_kind);
                    write_be_to(out, *reference_index);
                }
                Constant::MethodType { descriptor_index } => {
                    write_be_to(out, tags::METHOD_TYPE);
                    write_be_to(out, *descriptor_index);
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => write_pair(
                    out,
                    tags::DYNAMIC,
                    *bootstrap_method_attr_index,
                    *name_and_type_index,
                ),
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => write_pair(
                    out,
                    tags::INVOKE_DYNAMIC,
                    *bootstrap_method_attr_index,
                    *name_and_type_index,
                ),
                Constant::Module { name_index } => {
                    write_be_to(out, tags::MODULE);
                    write_be_to(out, *name_index);
                }
                Constant::Package { name_index } => {
                    write_be_to(out, tags::PACKAGE);
                    write_be_to(out, *name_index);
                }
            }
        }

        Ok(())
    }

    /// Number of slots, i.e. the `constant_pool_count` this pool serializes with.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no usable entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Fetch the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for index 0, out of range indices, and the
    /// unusable slot that follows a long or double.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {} (pool has {} slots)",
                index,
                self.entries.len()
            )),
            Some(constant) => Ok(constant),
        }
    }

    /// Raw modified UTF-8 bytes of the `CONSTANT_Utf8` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a `CONSTANT_Utf8`.
    pub fn utf8_bytes(&self, index: u16) -> Result<&[u8]> {
        match self.get(index)? {
            Constant::Utf8(bytes) => Ok(bytes),
            other => Err(malformed_error!(
                "Expected Utf8 at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Decoded `CONSTANT_Utf8` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a `CONSTANT_Utf8` or does not
    /// decode.
    pub fn utf8(&self, index: u16) -> Result<String> {
        mutf8::decode(self.utf8_bytes(index)?)
    }

    /// Returns `true` if the `CONSTANT_Utf8` at `index` equals `value`.
    #[must_use]
    pub fn utf8_eq(&self, index: u16, value: &str) -> bool {
        self.utf8_bytes(index)
            .is_ok_and(|bytes| bytes == mutf8::encode(value).as_slice())
    }

    /// Internal name referenced by the `CONSTANT_Class` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a `CONSTANT_Class`.
    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            other => Err(malformed_error!(
                "Expected Class at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Name and descriptor referenced by the `CONSTANT_NameAndType` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a `CONSTANT_NameAndType`.
    pub fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            other => Err(malformed_error!(
                "Expected NameAndType at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Resolve a `Fieldref`, `Methodref` or `InterfaceMethodref`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a member reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        match self.get(index)? {
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | Constant::Methodref {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok(MemberRef {
                    class: self.class_name(*class_index)?,
                    name,
                    descriptor,
                })
            }
            other => Err(malformed_error!(
                "Expected member reference at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Descriptor of the `CONSTANT_InvokeDynamic` or `CONSTANT_Dynamic` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for any other entry kind.
    pub fn dynamic_descriptor(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::InvokeDynamic {
                name_and_type_index,
                ..
            }
            | Constant::Dynamic {
                name_and_type_index,
                ..
            } => Ok(self.name_and_type(*name_and_type_index)?.1),
            other => Err(malformed_error!(
                "Expected dynamic constant at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Find an existing entry equal to `constant`.
    #[must_use]
    pub fn find(&self, constant: &Constant) -> Option<u16> {
        self.index.get(constant).copied()
    }

    /// Add `constant`, reusing an identical existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entry does not fit.
    pub fn add(&mut self, constant: Constant) -> Result<u16> {
        if constant == Constant::Unusable {
            return Err(malformed_error!("Can not add an unusable constant"));
        }
        if let Some(index) = self.find(&constant) {
            return Ok(index);
        }

        let required = self.entries.len() + constant.slots();
        if required > MAX_POOL_SLOTS {
            return Err(Error::ConstantPoolOverflow(required));
        }

        let slot =
            u16::try_from(self.entries.len()).map_err(|_| Error::ConstantPoolOverflow(required))?;
        let wide = constant.slots() == 2;
        self.index.insert(constant.clone(), slot);
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }

        Ok(slot)
    }

    /// Add a `CONSTANT_Utf8`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entry does not fit.
    pub fn add_utf8(&mut self, value: &str) -> Result<u16> {
        self.add(Constant::Utf8(mutf8::encode(value)))
    }

    /// Add a `CONSTANT_Class` and the name it refers to.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entries do not fit.
    pub fn add_class(&mut self, internal_name: &str) -> Result<u16> {
        let name_index = self.add_utf8(internal_name)?;
        self.add(Constant::Class { name_index })
    }

    /// Add a `CONSTANT_String` and its payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entries do not fit.
    pub fn add_string(&mut self, value: &str) -> Result<u16> {
        let string_index = self.add_utf8(value)?;
        self.add(Constant::String { string_index })
    }

    /// Add a `CONSTANT_Integer`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entry does not fit.
    pub fn add_integer(&mut self, value: i32) -> Result<u16> {
        self.add(Constant::Integer(value))
    }

    /// Add a `CONSTANT_NameAndType` and both strings.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entries do not fit.
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.add(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Add a `CONSTANT_Methodref` with its class and name-and-type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entries do not fit.
    pub fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Methodref {
            class_index,
            name_and_type_index,
        })
    }

    /// Add a `CONSTANT_InterfaceMethodref` with its class and name-and-type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entries do not fit.
    pub fn add_interface_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::InterfaceMethodref {
            class_index,
            name_and_type_index,
        })
    }

    /// Add a `CONSTANT_Fieldref` with its class and name-and-type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the entries do not fit.
    pub fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Fieldref {
            class_index,
            name_and_type_index,
        })
    }
}

fn write_pair(out: &mut Vec<u8>, tag: u8, first: u16, second: u16) {
    write_be_to(out, tag);
    write_be_to(out, first);
    write_be_to(out, second);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_write_are_symmetric() {
        #[rustfmt::skip]
        let data = [
            0x00, 0x07,                         // count = 7
            0x01, 0x00, 0x03, b'F', b'o', b'o', // #1 Utf8 "Foo"
            0x07, 0x00, 0x01,                   // #2 Class #1
            0x05, 0, 0, 0, 0, 0, 0, 0, 42,      // #3 Long 42 (+ #4 unusable)
            0x08, 0x00, 0x01,                   // #5 String #1
            0x03, 0xFF, 0xFF, 0xFF, 0xFF,       // #6 Integer -1
        ];

        let mut parser = Parser::new(&data);
        let pool = ConstantPool::parse(&mut parser).unwrap();
        assert!(!parser.has_more_data());
        assert_eq!(pool.len(), 7);
        assert_eq!(pool.class_name(2).unwrap(), "Foo");
        assert_eq!(pool.get(3).unwrap(), &Constant::Long(42));
        assert!(pool.get(4).is_err());
        assert_eq!(pool.get(6).unwrap(), &Constant::Integer(-1));

        let mut out = Vec::new();
        pool.write(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn rejects_wide_entry_in_last_slot() {
        let data = [0x00, 0x02, 0x06, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut parser = Parser::new(&data);
        assert!(ConstantPool::parse(&mut parser).is_err());
    }

    #[test]
    fn rejects_unknown_tag() {
        let data = [0x00, 0x02, 0x02, 0x00];
        let mut parser = Parser::new(&data);
        assert!(matches!(
            ConstantPool::parse(&mut parser),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn additions_are_deduplicated() {
        let mut pool = ConstantPool::new();
        let first = pool.add_method_ref("a/B", "run", "()V").unwrap();
        let size = pool.len();
        let second = pool.add_method_ref("a/B", "run", "()V").unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.len(), size);

        let member = pool.member_ref(first).unwrap();
        assert_eq!(
            member,
            MemberRef {
                class: "a/B".to_string(),
                name: "run".to_string(),
                descriptor: "()V".to_string(),
            }
        );
        assert!(pool.utf8_eq(1, "a/B"));
    }

    #[test]
    fn overflow_is_reported() {
        let mut pool = ConstantPool::new();
        for value in 1..MAX_POOL_SLOTS {
            pool.add_integer(value as i32).unwrap();
        }
        assert_eq!(pool.len(), MAX_POOL_SLOTS);
        assert!(matches!(
            pool.add_integer(-7),
            Err(Error::ConstantPoolOverflow(_))
        ));
        // existing entries are still found
        assert_eq!(pool.add_integer(1).unwrap(), 1);
    }
}
