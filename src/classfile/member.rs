//! Fields, methods, attributes and their access flags.
//!
//! Members are kept close to their on-disk shape: names and descriptors stay as constant pool
//! indices and every attribute keeps its raw payload. Only the `Code` attribute of a method
//! that a patch actually changed is ever replaced.

use bitflags::bitflags;

use crate::{
    classfile::constant_pool::ConstantPool,
    file::{io::write_be, parser::Parser},
    Error, Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Class access and property flags (JVMS §4.1)
    pub struct ClassAccessFlags: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared final
        const FINAL = 0x0010;
        /// Treat superclass methods specially in invokespecial
        const SUPER = 0x0020;
        /// Is an interface
        const INTERFACE = 0x0200;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// Declared as an annotation interface
        const ANNOTATION = 0x2000;
        /// Declared as an enum class
        const ENUM = 0x4000;
        /// Is a module, not a class
        const MODULE = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method access and property flags (JVMS §4.6)
    pub struct MethodAccessFlags: u16 {
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
        /// Declared synchronized
        const SYNCHRONIZED = 0x0020;
        /// A compiler-generated bridge method
        const BRIDGE = 0x0040;
        /// Declared with variable arity
        const VARARGS = 0x0080;
        /// Declared native
        const NATIVE = 0x0100;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Floating-point mode is FP-strict
        const STRICT = 0x0800;
        /// Not present in source
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field access and property flags (JVMS §4.5)
    pub struct FieldAccessFlags: u16 {
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
        /// Declared volatile
        const VOLATILE = 0x0040;
        /// Declared transient
        const TRANSIENT = 0x0080;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// Element of an enum class
        const ENUM = 0x4000;
    }
}

/// A raw attribute: name index plus uninterpreted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Constant pool index of the attribute name
    pub name_index: u16,
    /// Attribute payload without the 6-byte header
    pub info: Vec<u8>,
}

impl Attribute {
    pub(crate) fn read(parser: &mut Parser<'_>) -> Result<Attribute> {
        let name_index = parser.read_be::<u16>()?;
        let info = parser.read_u32_prefixed()?.to_vec();
        Ok(Attribute { name_index, info })
    }

    pub(crate) fn read_list(parser: &mut Parser<'_>) -> Result<Vec<Attribute>> {
        let count = parser.read_be::<u16>()?;
        // Each attribute has at least a 6-byte header
        parser.ensure_remaining(usize::from(count) * 6)?;
        (0..count).map(|_| Attribute::read(parser)).collect()
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let length = u32::try_from(self.info.len()).map_err(|_| {
            Error::LimitExceeded(format!("attribute of {} bytes", self.info.len()))
        })?;
        write_be(out, self.name_index);
        write_be(out, length);
        out.extend_from_slice(&self.info);
        Ok(())
    }

    pub(crate) fn write_list(attributes: &[Attribute], out: &mut Vec<u8>) -> Result<()> {
        let count = u16::try_from(attributes.len())
            .map_err(|_| Error::LimitExceeded(format!("{} attributes", attributes.len())))?;
        write_be(out, count);
        for attribute in attributes {
            attribute.write(out)?;
        }
        Ok(())
    }

    /// Resolves the attribute name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the name index is not a Utf8 constant.
    pub fn name(&self, pool: &ConstantPool) -> Result<String> {
        pool.utf8(self.name_index)
    }
}

/// Reads the shared `access_flags, name_index, descriptor_index, attributes` layout.
fn read_member(parser: &mut Parser<'_>) -> Result<(u16, u16, u16, Vec<Attribute>)> {
    let access = parser.read_be::<u16>()?;
    let name_index = parser.read_be::<u16>()?;
    let descriptor_index = parser.read_be::<u16>()?;
    let attributes = Attribute::read_list(parser)?;
    Ok((access, name_index, descriptor_index, attributes))
}

fn write_member(
    out: &mut Vec<u8>,
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: &[Attribute],
) -> Result<()> {
    write_be(out, access);
    write_be(out, name_index);
    write_be(out, descriptor_index);
    Attribute::write_list(attributes, out)
}

/// A field declared by the class. Fields are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Access flags; unknown bits are retained
    pub access_flags: FieldAccessFlags,
    /// Utf8 index of the field name
    pub name_index: u16,
    /// Utf8 index of the field descriptor
    pub descriptor_index: u16,
    /// Raw field attributes
    pub attributes: Vec<Attribute>,
}

impl FieldInfo {
    pub(crate) fn read(parser: &mut Parser<'_>) -> Result<FieldInfo> {
        let (access, name_index, descriptor_index, attributes) = read_member(parser)?;
        Ok(FieldInfo {
            access_flags: FieldAccessFlags::from_bits_retain(access),
            name_index,
            descriptor_index,
            attributes,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        write_member(
            out,
            self.access_flags.bits(),
            self.name_index,
            self.descriptor_index,
            &self.attributes,
        )
    }
}

/// A method declared by the class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Access flags; unknown bits are retained
    pub access_flags: MethodAccessFlags,
    /// Utf8 index of the method name
    pub name_index: u16,
    /// Utf8 index of the method descriptor
    pub descriptor_index: u16,
    /// Raw method attributes, including `Code`
    pub attributes: Vec<Attribute>,
}

impl MethodInfo {
    pub(crate) fn read(parser: &mut Parser<'_>) -> Result<MethodInfo> {
        let (access, name_index, descriptor_index, attributes) = read_member(parser)?;
        Ok(MethodInfo {
            access_flags: MethodAccessFlags::from_bits_retain(access),
            name_index,
            descriptor_index,
            attributes,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        write_member(
            out,
            self.access_flags.bits(),
            self.name_index,
            self.descriptor_index,
            &self.attributes,
        )
    }

    /// Resolves the method name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the name index is not a Utf8 constant.
    pub fn name(&self, pool: &ConstantPool) -> Result<String> {
        pool.utf8(self.name_index)
    }

    /// Resolves the method descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor index is not a Utf8 constant.
    pub fn descriptor(&self, pool: &ConstantPool) -> Result<String> {
        pool.utf8(self.descriptor_index)
    }

    /// `true` for static methods (no `this` in slot 0).
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Position of the `Code` attribute in [`MethodInfo::attributes`], if the method has one.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an attribute name cannot be resolved.
    pub fn code_attribute(&self, pool: &ConstantPool) -> Result<Option<usize>> {
        for (position, attribute) in self.attributes.iter().enumerate() {
            if attribute.name(pool)? == "Code" {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }
}
