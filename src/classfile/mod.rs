//! JVM class file model.
//!
//! [`ClassBinary`] is the parsed form of one class file. It keeps the structure close to the
//! on-disk layout so that a class written back without modification reproduces the input
//! byte-for-byte: the constant pool is append-only, members keep their raw attributes, and
//! only a method whose instructions were rewritten gets a freshly encoded `Code` attribute.
//!
//! # Key Types
//! - [`ClassBinary`] - A parsed class file
//! - [`ConstantPool`] / [`Constant`] - The symbol table
//! - [`MethodInfo`] / [`FieldInfo`] / [`Attribute`] - Members and their attributes
//! - [`FieldType`] / [`MethodDescriptor`] - Parsed descriptors
//!
//! # Example
//! ```rust,no_run
//! use hotpatch::ClassBinary;
//!
//! let bytes = std::fs::read("JndiLookup.class")?;
//! let class = ClassBinary::parse(&bytes)?;
//! println!("{} has {} methods", class.name()?, class.methods.len());
//! assert_eq!(class.to_bytes()?, bytes);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod constant_pool;
pub mod descriptor;
pub mod member;

pub use constant_pool::{
    decode_modified_utf8, encode_modified_utf8, Constant, ConstantPool, MemberRef, MemberRefKind,
};
pub use descriptor::{FieldType, MethodDescriptor};
pub use member::{
    Attribute, ClassAccessFlags, FieldAccessFlags, FieldInfo, MethodAccessFlags, MethodInfo,
};

use crate::{
    assembly::{decode_code, encode_code, MethodBody, MethodContext},
    file::{io::write_be, parser::Parser},
    Error, Result,
};

/// Class file format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassVersion {
    /// `major_version` (52 = Java 8)
    pub major: u16,
    /// `minor_version`
    pub minor: u16,
}

/// One parsed class file.
#[derive(Debug, Clone)]
pub struct ClassBinary {
    /// Format version
    pub version: ClassVersion,
    /// The constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: ClassAccessFlags,
    /// Class constant index of this class
    pub this_class: u16,
    /// Class constant index of the superclass, 0 for `java/lang/Object`
    pub super_class: u16,
    /// Class constant indices of the implemented interfaces
    pub interfaces: Vec<u16>,
    /// Declared fields
    pub fields: Vec<FieldInfo>,
    /// Declared methods
    pub methods: Vec<MethodInfo>,
    /// Class attributes
    pub attributes: Vec<Attribute>,
}

fn count_u16(count: usize, what: &str) -> Result<u16> {
    u16::try_from(count).map_err(|_| Error::LimitExceeded(format!("{count} {what}")))
}

impl ClassBinary {
    /// The class file magic number.
    pub const MAGIC: u32 = 0xCAFE_BABE;

    /// Creates an empty public class with the given internal names and major version.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the constant pool overflows (it cannot for
    /// reasonable names).
    pub fn new(name: &str, super_name: Option<&str>, major_version: u16) -> Result<ClassBinary> {
        let mut constant_pool = ConstantPool::default();
        let this_class = constant_pool.class_index(name)?;
        let super_class = match super_name {
            Some(super_name) => constant_pool.class_index(super_name)?,
            None => 0,
        };

        Ok(ClassBinary {
            version: ClassVersion {
                major: major_version,
                minor: 0,
            },
            constant_pool,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Parses a class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a bad magic number, invalid constant pool
    /// contents or trailing bytes, and [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse(data: &[u8]) -> Result<ClassBinary> {
        let mut parser = Parser::new(data);

        let magic = parser.read_be::<u32>()?;
        if magic != Self::MAGIC {
            return Err(malformed_error!("Invalid class file magic 0x{:08X}", magic));
        }
        let minor = parser.read_be::<u16>()?;
        let major = parser.read_be::<u16>()?;

        let constant_pool = ConstantPool::parse(&mut parser)?;
        let access_flags = ClassAccessFlags::from_bits_retain(parser.read_be::<u16>()?);
        let this_class = parser.read_be::<u16>()?;
        let super_class = parser.read_be::<u16>()?;
        let interfaces = parser.read_u16_list()?;

        let field_count = parser.read_be::<u16>()?;
        let fields = (0..field_count)
            .map(|_| FieldInfo::read(&mut parser))
            .collect::<Result<Vec<_>>>()?;

        let method_count = parser.read_be::<u16>()?;
        let methods = (0..method_count)
            .map(|_| MethodInfo::read(&mut parser))
            .collect::<Result<Vec<_>>>()?;

        let attributes = Attribute::read_list(&mut parser)?;

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after class file",
                parser.remaining()
            ));
        }

        let class = ClassBinary {
            version: ClassVersion { major, minor },
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };

        class.name()?;
        class.super_name()?;
        for interface in &class.interfaces {
            class.constant_pool.class_name(*interface)?;
        }
        for method in &class.methods {
            method.name(&class.constant_pool)?;
            method.descriptor(&class.constant_pool)?;
        }

        Ok(class)
    }

    /// Serializes the class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if a count or length does not fit the format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_be(&mut out, Self::MAGIC);
        write_be(&mut out, self.version.minor);
        write_be(&mut out, self.version.major);
        self.constant_pool.write(&mut out)?;
        write_be(&mut out, self.access_flags.bits());
        write_be(&mut out, self.this_class);
        write_be(&mut out, self.super_class);

        write_be(&mut out, count_u16(self.interfaces.len(), "interfaces")?);
        for interface in &self.interfaces {
            write_be(&mut out, *interface);
        }

        write_be(&mut out, count_u16(self.fields.len(), "fields")?);
        for field in &self.fields {
            field.write(&mut out)?;
        }

        write_be(&mut out, count_u16(self.methods.len(), "methods")?);
        for method in &self.methods {
            method.write(&mut out)?;
        }

        Attribute::write_list(&self.attributes, &mut out)?;
        Ok(out)
    }

    /// Internal (slash-separated) name of this class.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `this_class` is not a Class constant.
    pub fn name(&self) -> Result<String> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass, `None` for `java/lang/Object` and modules.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `super_class` is neither 0 nor a Class constant.
    pub fn super_name(&self) -> Result<Option<String>> {
        match self.super_class {
            0 => Ok(None),
            index => self.constant_pool.class_name(index).map(Some),
        }
    }

    /// Positions of the methods called `name`, in declaration order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a method name cannot be resolved.
    pub fn methods_named(&self, name: &str) -> Result<Vec<usize>> {
        let mut found = Vec::new();
        for (index, method) in self.methods.iter().enumerate() {
            if method.name(&self.constant_pool)? == name {
                found.push(index);
            }
        }
        Ok(found)
    }

    /// The identity of method `index` as needed by the code decoder and encoder.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index and
    /// [`crate::Error::Malformed`] if names cannot be resolved.
    pub fn method_context(&self, index: usize) -> Result<MethodContext> {
        let method = self.methods.get(index).ok_or(Error::OutOfBounds)?;
        Ok(MethodContext {
            class_name: self.name()?,
            method_name: method.name(&self.constant_pool)?,
            descriptor: method.descriptor(&self.constant_pool)?,
            is_static: method.is_static(),
            major_version: self.version.major,
        })
    }

    /// Decodes the `Code` attribute of method `index`; `None` for abstract and native methods.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] if the code cannot
    /// be decoded.
    pub fn decode_method(&self, index: usize) -> Result<Option<MethodBody>> {
        let context = self.method_context(index)?;
        let method = &self.methods[index];
        match method.code_attribute(&self.constant_pool)? {
            Some(position) => Ok(Some(decode_code(
                &method.attributes[position].info,
                &self.constant_pool,
                &context,
            )?)),
            None => Ok(None),
        }
    }

    /// Replaces (or adds) the `Code` attribute of method `index` with the encoding of `body`.
    ///
    /// # Errors
    /// Propagates every error of [`crate::assembly::encode_code`].
    pub fn encode_method(&mut self, index: usize, body: &MethodBody) -> Result<()> {
        let context = self.method_context(index)?;
        let info = encode_code(body, &context, &mut self.constant_pool)?;
        let position = self.methods[index].code_attribute(&self.constant_pool)?;

        let method = &mut self.methods[index];
        match position {
            Some(position) => method.attributes[position].info = info,
            None => {
                let name_index = self.constant_pool.utf8_index("Code")?;
                method.attributes.push(Attribute { name_index, info });
            }
        }
        Ok(())
    }

    /// Declares a new method, encoding `body` as its code if given. Returns the method index.
    ///
    /// # Errors
    /// Propagates constant pool and encoding errors.
    pub fn add_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        body: Option<&MethodBody>,
    ) -> Result<usize> {
        MethodDescriptor::parse(descriptor)?;
        let name_index = self.constant_pool.utf8_index(name)?;
        let descriptor_index = self.constant_pool.utf8_index(descriptor)?;
        self.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });

        let index = self.methods.len() - 1;
        if let Some(body) = body {
            self.encode_method(index, body)?;
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{jndi_lookup_class, simple_class};

    #[test]
    fn roundtrip_is_identical() {
        let bytes = jndi_lookup_class();
        let class = ClassBinary::parse(&bytes).unwrap();
        assert_eq!(
            class.name().unwrap(),
            "org/apache/logging/log4j/core/lookup/JndiLookup"
        );
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn bad_magic() {
        let mut bytes = simple_class();
        bytes[0] = 0xCB;
        assert!(matches!(
            ClassBinary::parse(&bytes),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn truncated_and_trailing() {
        let bytes = simple_class();
        assert!(ClassBinary::parse(&bytes[..bytes.len() - 1]).is_err());

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            ClassBinary::parse(&extended),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn methods_and_bodies() {
        let class = ClassBinary::parse(&jndi_lookup_class()).unwrap();
        let lookup = class.methods_named("lookup").unwrap();
        assert_eq!(lookup.len(), 1);

        let context = class.method_context(lookup[0]).unwrap();
        assert!(!context.is_static);
        let body = class.decode_method(lookup[0]).unwrap().unwrap();
        assert!(!body.instructions.is_empty());
        assert!(class.method_context(99).is_err());
    }

    #[test]
    fn encode_method_keeps_other_methods() {
        let bytes = jndi_lookup_class();
        let mut class = ClassBinary::parse(&bytes).unwrap();
        let original = class.methods.clone();
        let lookup = class.methods_named("lookup").unwrap()[0];

        let body = class.decode_method(lookup).unwrap().unwrap();
        class.encode_method(lookup, &body).unwrap();

        for (index, method) in class.methods.iter().enumerate() {
            if index != lookup {
                assert_eq!(method, &original[index]);
            }
        }
        let reparsed = ClassBinary::parse(&class.to_bytes().unwrap()).unwrap();
        assert!(reparsed.decode_method(lookup).unwrap().is_some());
    }
}
