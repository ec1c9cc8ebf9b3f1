//! Access flags of classes, fields and methods.

use bitflags::bitflags;

bitflags! {
    /// Access and property flags of classes, fields and methods (JVMS §4.1, §4.5, §4.6).
    ///
    /// Several bits carry a different meaning depending on where they appear
    /// (`ACC_SUPER` on a class is `ACC_SYNCHRONIZED` on a method), so both names are
    /// provided for the same bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final
        const FINAL = 0x0010;
        /// Class: treat superclass methods specially when invoked by `invokespecial`
        const SUPER = 0x0020;
        /// Method: invocation is wrapped by a monitor use
        const SYNCHRONIZED = 0x0020;
        /// Field: declared volatile
        const VOLATILE = 0x0040;
        /// Method: a bridge method, generated by the compiler
        const BRIDGE = 0x0040;
        /// Field: declared transient
        const TRANSIENT = 0x0080;
        /// Method: declared with a variable number of arguments
        const VARARGS = 0x0080;
        /// Method: implemented in a language other than Java
        const NATIVE = 0x0100;
        /// Class: is an interface
        const INTERFACE = 0x0200;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Method: floating-point mode is FP-strict
        const STRICT = 0x0800;
        /// Not present in the source code
        const SYNTHETIC = 0x1000;
        /// Class: declared as an annotation interface
        const ANNOTATION = 0x2000;
        /// Declared as an enum class or enum constant
        const ENUM = 0x4000;
        /// Class: is a module, not a class or interface
        const MODULE = 0x8000;
    }
}

impl AccessFlags {
    /// Returns `true` for methods that carry no `Code` attribute.
    #[must_use]
    pub fn is_bodyless(self) -> bool {
        self.intersects(AccessFlags::NATIVE | AccessFlags::ABSTRACT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_bits() {
        assert_eq!(AccessFlags::SUPER.bits(), AccessFlags::SYNCHRONIZED.bits());
        let flags = AccessFlags::from_bits_retain(0x0109);
        assert!(flags.contains(AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::NATIVE));
        assert!(flags.is_bodyless());
        assert!(!AccessFlags::PUBLIC.is_bodyless());
    }
}
