//! The structural form of a JVM class file (JVMS chapter 4).
//!
//! [`ClassFile::parse`] turns the bytes handed over by the host runtime into an editable
//! representation, and [`ClassFile::to_bytes`] serializes it back. Everything the rewriter
//! does not touch is carried through verbatim: unknown attributes keep their exact payload,
//! and the constant pool keeps its slot layout so existing indices stay valid.
//!
//! # Key Components
//!
//! - [`ClassFile`] - The whole unit
//! - [`MemberInfo`] - A field or method, with its raw attributes
//! - [`ConstantPool`] - Indexed constants with deduplicating `add_*` helpers
//! - [`attributes::CodeAttribute`] - A parsed method body
//! - [`stackmap`] - Stack map frames with absolute offsets
//! - [`builder::ClassBuilder`] - Synthesizes small class files from scratch
//!
//! # Examples
//!
//! ```rust
//! use lineprobe::classfile::{builder::ClassBuilder, ClassFile};
//!
//! let bytes = ClassBuilder::new("demo/Empty").to_bytes()?;
//! let class = ClassFile::parse(&bytes)?;
//! assert_eq!(class.name()?, "demo/Empty");
//! assert_eq!(class.to_bytes()?, bytes);
//! # Ok::<(), lineprobe::Error>(())
//! ```

pub mod access;
pub mod attributes;
pub mod builder;
pub mod constpool;
pub mod mutf8;
pub mod stackmap;

pub use access::AccessFlags;
pub use attributes::{Attribute, CodeAttribute};
pub use constpool::{Constant, ConstantPool, MemberRef};

use crate::{
    file::{io::write_be_to, parser::Parser},
    Error, Result,
};

/// The `u4` every class file starts with.
pub const MAGIC: u32 = 0xCAFE_BABE;
/// Oldest class file major version this crate accepts (JDK 1.1).
pub const MIN_MAJOR_VERSION: u16 = 45;
/// Newest class file major version [`ClassFile::parse`] accepts (Java SE 27).
///
/// Newer versions can be admitted with [`ClassFile::parse_with_max_major`].
pub const MAX_MAJOR_VERSION: u16 = 71;
/// First major version whose verifier requires a `StackMapTable` (Java SE 7).
pub const STACK_MAP_MAJOR_VERSION: u16 = 50;

/// A field or a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Access and property flags
    pub access_flags: AccessFlags,
    /// Constant pool index of the member name
    pub name_index: u16,
    /// Constant pool index of the descriptor
    pub descriptor_index: u16,
    /// Attributes, `Code` among them for concrete methods
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    fn parse(parser: &mut Parser) -> Result<MemberInfo> {
        Ok(MemberInfo {
            access_flags: AccessFlags::from_bits_retain(parser.read_be()?),
            name_index: parser.read_be()?,
            descriptor_index: parser.read_be()?,
            attributes: Attribute::parse_list(parser)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        write_be_to(out, self.access_flags.bits());
        write_be_to(out, self.name_index);
        write_be_to(out, self.descriptor_index);
        Attribute::write_list(&self.attributes, out)
    }

    /// Position of the first attribute named `name`.
    #[must_use]
    pub fn attribute_position(&self, pool: &ConstantPool, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.is_named(pool, name))
    }
}

/// A parsed class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// The constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: AccessFlags,
    /// `CONSTANT_Class` index of this class
    pub this_class: u16,
    /// `CONSTANT_Class` index of the superclass, 0 for `java/lang/Object`
    pub super_class: u16,
    /// `CONSTANT_Class` indices of the direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Declared fields
    pub fields: Vec<MemberInfo>,
    /// Declared methods
    pub methods: Vec<MemberInfo>,
    /// Class level attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parse a class file.
    ///
    /// # Errors
    ///
    /// - [`Error::Empty`] for an empty buffer
    /// - [`Error::Malformed`] for a bad magic number, invalid constants or trailing bytes
    /// - [`Error::UnsupportedVersion`] for versions outside 45 through [`MAX_MAJOR_VERSION`]
    /// - [`Error::OutOfBounds`] for truncated input
    pub fn parse(data: &[u8]) -> Result<ClassFile> {
        Self::parse_with_max_major(data, MAX_MAJOR_VERSION)
    }

    /// Parse a class file whose major version may be as new as `max_major`.
    ///
    /// Constant tags and attributes introduced after [`MAX_MAJOR_VERSION`] are still
    /// unknown: an unknown constant tag fails the parse, unknown attributes are kept as raw
    /// bytes.
    ///
    /// # Errors
    ///
    /// See [`ClassFile::parse`].
    pub fn parse_with_max_major(data: &[u8], max_major: u16) -> Result<ClassFile> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut parser = Parser::new(data);
        let magic = parser.read_be::<u32>()?;
        if magic != MAGIC {
            return Err(malformed_error!("Invalid magic 0x{:08X}", magic));
        }

        let minor_version = parser.read_be::<u16>()?;
        let major_version = parser.read_be::<u16>()?;
        if !(MIN_MAJOR_VERSION..=max_major).contains(&major_version) {
            return Err(Error::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        let constant_pool = ConstantPool::parse(&mut parser)?;
        let access_flags = AccessFlags::from_bits_retain(parser.read_be()?);
        let this_class = parser.read_be::<u16>()?;
        let super_class = parser.read_be::<u16>()?;

        let interface_count = parser.read_be::<u16>()?;
        let interfaces = (0..interface_count)
            .map(|_| parser.read_be::<u16>())
            .collect::<Result<Vec<_>>>()?;

        let field_count = parser.read_be::<u16>()?;
        let fields = (0..field_count)
            .map(|_| MemberInfo::parse(&mut parser))
            .collect::<Result<Vec<_>>>()?;

        let method_count = parser.read_be::<u16>()?;
        let methods = (0..method_count)
            .map(|_| MemberInfo::parse(&mut parser))
            .collect::<Result<Vec<_>>>()?;

        let attributes = Attribute::parse_list(&mut parser)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after the last attribute",
                parser.remaining()
            ));
        }

        let class = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        // this_class has to resolve, every unit name check depends on it
        class.name()?;
        Ok(class)
    }

    /// Serialize the class file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if a table outgrew its `u16` count, or
    /// [`Error::ConstantPoolOverflow`] for an oversized pool.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1024);
        write_be_to(&mut out, MAGIC);
        write_be_to(&mut out, self.minor_version);
        write_be_to(&mut out, self.major_version);
        self.constant_pool.write(&mut out)?;
        write_be_to(&mut out, self.access_flags.bits());
        write_be_to(&mut out, self.this_class);
        write_be_to(&mut out, self.super_class);

        write_be_to(&mut out, count_u16(self.interfaces.len(), "interfaces")?);
        for interface in &self.interfaces {
            write_be_to(&mut out, *interface);
        }

        write_be_to(&mut out, count_u16(self.fields.len(), "fields")?);
        for field in &self.fields {
            field.write(&mut out)?;
        }

        write_be_to(&mut out, count_u16(self.methods.len(), "methods")?);
        for method in &self.methods {
            method.write(&mut out)?;
        }

        Attribute::write_list(&self.attributes, &mut out)?;
        Ok(out)
    }

    /// Internal name of this class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `this_class` does not resolve.
    pub fn name(&self) -> Result<String> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Name of a method or field of this class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the name index does not resolve.
    pub fn member_name(&self, member: &MemberInfo) -> Result<String> {
        self.constant_pool.utf8(member.name_index)
    }

    /// Descriptor of a method or field of this class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the descriptor index does not resolve.
    pub fn member_descriptor(&self, member: &MemberInfo) -> Result<String> {
        self.constant_pool.utf8(member.descriptor_index)
    }

    /// Find a method by name and descriptor.
    #[must_use]
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MemberInfo> {
        self.methods.iter().find(|method| {
            self.constant_pool.utf8_eq(method.name_index, name)
                && self.constant_pool.utf8_eq(method.descriptor_index, descriptor)
        })
    }

    /// Parsed `Code` attribute of `method`, if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the attribute is present but damaged.
    pub fn code(&self, method: &MemberInfo) -> Result<Option<CodeAttribute>> {
        match method.attribute_position(&self.constant_pool, attributes::names::CODE) {
            Some(position) => Ok(Some(CodeAttribute::parse(
                &method.attributes[position].info,
            )?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if a class level attribute named `name` is present.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes
            .iter()
            .any(|attribute| attribute.is_named(&self.constant_pool, name))
    }

    /// Returns `true` if the verifier of this class version expects stack map frames.
    #[must_use]
    pub fn uses_stack_maps(&self) -> bool {
        self.major_version >= STACK_MAP_MAJOR_VERSION
    }
}

fn count_u16(count: usize, what: &str) -> Result<u16> {
    u16::try_from(count).map_err(|_| malformed_error!("{} {} in one class", count, what))
}
