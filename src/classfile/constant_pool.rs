//! The class file constant pool.
//!
//! The constant pool is the symbol table of a class: every string, class name, member
//! reference and numeric literal used by the bytecode lives here and is referenced by a
//! one-based `u16` index. Entries for `long` and `double` occupy two indices; the second is
//! represented by [`Constant::Unusable`].
//!
//! Rewriting never reorders or removes entries. New constants are interned: an identical
//! existing entry is reused, otherwise the entry is appended. Indices held by untouched
//! methods, fields and attributes therefore stay valid, which is what allows those parts of
//! the class to be written back byte-for-byte.

use std::collections::HashMap;

use crate::{
    file::{io::write_be, parser::Parser},
    Error, Result,
};

/// Constant pool tag values (JVMS §4.4).
pub mod tags {
    #![allow(missing_docs)]
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// The largest index a constant pool can hold; the entry count is stored as a `u16`.
const MAX_ENTRIES: usize = u16::MAX as usize;

/// One constant pool entry, kept in its on-disk shape.
///
/// Floating point values are stored as raw bits so that entries are `Eq + Hash` and
/// re-encode bit-exactly (including NaN payloads).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Index 0 and the upper half of a `long`/`double` entry.
    Unusable,
    /// Modified UTF-8 bytes exactly as stored.
    Utf8(Vec<u8>),
    /// `CONSTANT_Integer`
    Integer(i32),
    /// `CONSTANT_Float`, as IEEE-754 bits
    Float(u32),
    /// `CONSTANT_Long`
    Long(i64),
    /// `CONSTANT_Double`, as IEEE-754 bits
    Double(u64),
    /// `CONSTANT_Class` pointing at a Utf8 name
    Class(u16),
    /// `CONSTANT_String` pointing at a Utf8 value
    String(u16),
    /// `CONSTANT_Fieldref`
    FieldRef {
        /// Owner class entry
        class: u16,
        /// Name and type entry
        name_and_type: u16,
    },
    /// `CONSTANT_Methodref`
    MethodRef {
        /// Owner class entry
        class: u16,
        /// Name and type entry
        name_and_type: u16,
    },
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethodRef {
        /// Owner class entry
        class: u16,
        /// Name and type entry
        name_and_type: u16,
    },
    /// `CONSTANT_NameAndType`
    NameAndType {
        /// Utf8 name entry
        name: u16,
        /// Utf8 descriptor entry
        descriptor: u16,
    },
    /// `CONSTANT_MethodHandle`
    MethodHandle {
        /// Reference kind (1..=9)
        kind: u8,
        /// Referenced member entry
        reference: u16,
    },
    /// `CONSTANT_MethodType` pointing at a Utf8 descriptor
    MethodType(u16),
    /// `CONSTANT_Dynamic`
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap: u16,
        /// Name and type entry
        name_and_type: u16,
    },
    /// `CONSTANT_InvokeDynamic`
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap: u16,
        /// Name and type entry
        name_and_type: u16,
    },
    /// `CONSTANT_Module`
    Module(u16),
    /// `CONSTANT_Package`
    Package(u16),
}

impl Constant {
    /// Whether this entry occupies two constant pool slots.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    fn tag(&self) -> Option<u8> {
        Some(match self {
            Constant::Unusable => return None,
            Constant::Utf8(_) => tags::UTF8,
            Constant::Integer(_) => tags::INTEGER,
            Constant::Float(_) => tags::FLOAT,
            Constant::Long(_) => tags::LONG,
            Constant::Double(_) => tags::DOUBLE,
            Constant::Class(_) => tags::CLASS,
            Constant::String(_) => tags::STRING,
            Constant::FieldRef { .. } => tags::FIELD_REF,
            Constant::MethodRef { .. } => tags::METHOD_REF,
            Constant::InterfaceMethodRef { .. } => tags::INTERFACE_METHOD_REF,
            Constant::NameAndType { .. } => tags::NAME_AND_TYPE,
            Constant::MethodHandle { .. } => tags::METHOD_HANDLE,
            Constant::MethodType(_) => tags::METHOD_TYPE,
            Constant::Dynamic { .. } => tags::DYNAMIC,
            Constant::InvokeDynamic { .. } => tags::INVOKE_DYNAMIC,
            Constant::Module(_) => tags::MODULE,
            Constant::Package(_) => tags::PACKAGE,
        })
    }

    fn read(parser: &mut Parser<'_>) -> Result<Constant> {
        let tag = parser.read_be::<u8>()?;
        Ok(match tag {
            tags::UTF8 => Constant::Utf8(parser.read_u16_prefixed()?.to_vec()),
            tags::INTEGER => Constant::Integer(parser.read_be()?),
            tags::FLOAT => Constant::Float(parser.read_be()?),
            tags::LONG => Constant::Long(parser.read_be()?),
            tags::DOUBLE => Constant::Double(parser.read_be()?),
            tags::CLASS => Constant::Class(parser.read_be()?),
            tags::STRING => Constant::String(parser.read_be()?),
            tags::FIELD_REF => Constant::FieldRef {
                class: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            tags::METHOD_REF => Constant::MethodRef {
                class: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            tags::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                class: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            tags::NAME_AND_TYPE => Constant::NameAndType {
                name: parser.read_be()?,
                descriptor: parser.read_be()?,
            },
            tags::METHOD_HANDLE => Constant::MethodHandle {
                kind: parser.read_be()?,
                reference: parser.read_be()?,
            },
            tags::METHOD_TYPE => Constant::MethodType(parser.read_be()?),
            tags::DYNAMIC => Constant::Dynamic {
                bootstrap: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            tags::MODULE => Constant::Module(parser.read_be()?),
            tags::PACKAGE => Constant::Package(parser.read_be()?),
            _ => {
                return Err(malformed_error!(
                    "Invalid constant pool tag {} at offset {}",
                    tag,
                    parser.pos() - 1
                ))
            }
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let Some(tag) = self.tag() else {
            return Ok(());
        };
        write_be(out, tag);

        match self {
            Constant::Unusable => {}
            Constant::Utf8(bytes) => {
                let length = u16::try_from(bytes.len()).map_err(|_| {
                    Error::LimitExceeded(format!("Utf8 constant of {} bytes", bytes.len()))
                })?;
                write_be(out, length);
                out.extend_from_slice(bytes);
            }
            Constant::Integer(value) => write_be(out, *value),
            Constant::Float(bits) => write_be(out, *bits),
            Constant::Long(value) => write_be(out, *value),
            Constant::Double(bits) => write_be(out, *bits),
            Constant::Class(index)
            | Constant::String(index)
            | Constant::MethodType(index)
            | Constant::Module(index)
            | Constant::Package(index) => write_be(out, *index),
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
            }
            | Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => {
                write_be(out, *class);
                write_be(out, *name_and_type);
            }
            Constant::NameAndType { name, descriptor } => {
                write_be(out, *name);
                write_be(out, *descriptor);
            }
            Constant::MethodHandle { kind, reference } => {
                write_be(out, *kind);
                write_be(out, *reference);
            }
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                write_be(out, *bootstrap);
                write_be(out, *name_and_type);
            }
        }

        Ok(())
    }
}

/// Which kind of member reference a [`MemberRef`] was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRefKind {
    /// `CONSTANT_Fieldref`
    Field,
    /// `CONSTANT_Methodref`
    Method,
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethod,
}

/// A fully resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// The kind of constant this was resolved from
    pub kind: MemberRefKind,
    /// Internal name of the owning class (or array descriptor)
    pub owner: String,
    /// Member name
    pub name: String,
    /// Field or method descriptor
    pub descriptor: String,
}

/// The constant pool of one class.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
            lookup: HashMap::new(),
        }
    }
}

impl ConstantPool {
    /// Reads `constant_pool_count` and the entries that follow it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown tags, a zero count, a wide entry in the
    /// last slot or references to entries of the wrong kind, and
    /// [`crate::Error::OutOfBounds`] if the data is truncated.
    pub fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let count = usize::from(parser.read_be::<u16>()?);
        if count == 0 {
            return Err(malformed_error!("Constant pool count must be at least 1"));
        }

        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);

        while entries.len() < count {
            let constant = Constant::read(parser)?;
            let wide = constant.is_wide();
            entries.push(constant);

            if wide {
                if entries.len() >= count {
                    return Err(malformed_error!(
                        "Eight-byte constant at index {} overflows the pool",
                        entries.len() - 1
                    ));
                }
                entries.push(Constant::Unusable);
            }
        }

        let mut pool = ConstantPool {
            entries,
            lookup: HashMap::new(),
        };
        pool.validate()?;
        pool.rebuild_lookup();
        Ok(pool)
    }

    /// Writes the count and all entries.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if a Utf8 entry is longer than 65535 bytes.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let count = u16::try_from(self.entries.len()).map_err(|_| {
            Error::LimitExceeded(format!("{} constant pool entries", self.entries.len()))
        })?;
        write_be(out, count);

        for constant in &self.entries[1..] {
            constant.write(out)?;
        }

        Ok(())
    }

    /// The `constant_pool_count` value (number of slots including index 0).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no usable entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for index 0, out-of-range indices and the unusable
    /// upper half of wide entries.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {} (pool size {})",
                index,
                self.entries.len()
            )),
            Some(constant) => Ok(constant),
        }
    }

    /// Decodes the Utf8 entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not Utf8 or not valid modified UTF-8,
    /// and [`crate::Error::NotSupported`] for strings with unpaired surrogates.
    pub fn utf8(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Utf8(bytes) => decode_modified_utf8(bytes),
            other => Err(malformed_error!(
                "Constant {} is not Utf8: {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `CONSTANT_Class` entry to its internal name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry has the wrong kind.
    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(malformed_error!(
                "Constant {} is not a Class: {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `CONSTANT_NameAndType` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry has the wrong kind.
    pub fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(malformed_error!(
                "Constant {} is not a NameAndType: {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a field, method or interface method reference.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a member reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (kind, class, name_and_type) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => (MemberRefKind::Field, *class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
            } => (MemberRefKind::Method, *class, *name_and_type),
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => (MemberRefKind::InterfaceMethod, *class, *name_and_type),
            other => {
                return Err(malformed_error!(
                    "Constant {} is not a member reference: {:?}",
                    index,
                    other
                ))
            }
        };

        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            kind,
            owner: self.class_name(class)?,
            name,
            descriptor,
        })
    }

    /// Looks up an existing Utf8 entry without modifying the pool.
    #[must_use]
    pub fn find_utf8(&self, value: &str) -> Option<u16> {
        self.lookup
            .get(&Constant::Utf8(encode_modified_utf8(value)))
            .copied()
    }

    /// Interns `constant`, returning the index of an identical existing entry or of the
    /// newly appended one.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn intern(&mut self, constant: Constant) -> Result<u16> {
        if let Some(index) = self.lookup.get(&constant) {
            return Ok(*index);
        }

        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > MAX_ENTRIES {
            return Err(Error::LimitExceeded(
                "constant pool is full (65535 entries)".to_string(),
            ));
        }

        let index = u16::try_from(self.entries.len())
            .map_err(|_| Error::LimitExceeded("constant pool index".to_string()))?;
        self.lookup.insert(constant.clone(), index);
        self.entries.push(constant);
        if slots == 2 {
            self.entries.push(Constant::Unusable);
        }

        Ok(index)
    }

    /// Interns a Utf8 entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn utf8_index(&mut self, value: &str) -> Result<u16> {
        self.intern(Constant::Utf8(encode_modified_utf8(value)))
    }

    /// Interns a `CONSTANT_Class` for an internal name or array descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn class_index(&mut self, internal_name: &str) -> Result<u16> {
        let name = self.utf8_index(internal_name)?;
        self.intern(Constant::Class(name))
    }

    /// Interns a `CONSTANT_String`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn string_index(&mut self, value: &str) -> Result<u16> {
        let utf8 = self.utf8_index(value)?;
        self.intern(Constant::String(utf8))
    }

    /// Interns a `CONSTANT_MethodType`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn method_type_index(&mut self, descriptor: &str) -> Result<u16> {
        let utf8 = self.utf8_index(descriptor)?;
        self.intern(Constant::MethodType(utf8))
    }

    /// Interns a `CONSTANT_NameAndType`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.utf8_index(name)?;
        let descriptor = self.utf8_index(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
    }

    /// Interns a `CONSTANT_Fieldref`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn field_ref_index(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, descriptor)?;
        self.intern(Constant::FieldRef {
            class,
            name_and_type,
        })
    }

    /// Interns a `CONSTANT_Methodref` or, for interface owners, a `CONSTANT_InterfaceMethodref`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn method_ref_index(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, descriptor)?;
        if interface {
            self.intern(Constant::InterfaceMethodRef {
                class,
                name_and_type,
            })
        } else {
            self.intern(Constant::MethodRef {
                class,
                name_and_type,
            })
        }
    }

    fn rebuild_lookup(&mut self) {
        self.lookup.clear();
        for (index, constant) in self.entries.iter().enumerate() {
            if matches!(constant, Constant::Unusable) {
                continue;
            }
            // Entries were read from a u16-counted table, the cast cannot truncate.
            #[allow(clippy::cast_possible_truncation)]
            self.lookup.entry(constant.clone()).or_insert(index as u16);
        }
    }

    /// Checks that every cross-reference points at an entry of the expected kind.
    fn validate(&self) -> Result<()> {
        let expect = |index: u16, what: &str, ok: fn(&Constant) -> bool| -> Result<()> {
            let constant = self.get(index)?;
            if ok(constant) {
                Ok(())
            } else {
                Err(malformed_error!(
                    "Constant {} should be {}, found {:?}",
                    index,
                    what,
                    constant
                ))
            }
        };
        let is_utf8 = |c: &Constant| matches!(c, Constant::Utf8(_));
        let is_class = |c: &Constant| matches!(c, Constant::Class(_));
        let is_nat = |c: &Constant| matches!(c, Constant::NameAndType { .. });
        let is_member = |c: &Constant| {
            matches!(
                c,
                Constant::FieldRef { .. }
                    | Constant::MethodRef { .. }
                    | Constant::InterfaceMethodRef { .. }
            )
        };

        for constant in &self.entries {
            match constant {
                Constant::Class(index)
                | Constant::String(index)
                | Constant::MethodType(index)
                | Constant::Module(index)
                | Constant::Package(index) => expect(*index, "Utf8", is_utf8)?,
                Constant::FieldRef {
                    class,
                    name_and_type,
                }
                | Constant::MethodRef {
                    class,
                    name_and_type,
                }
                | Constant::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => {
                    expect(*class, "Class", is_class)?;
                    expect(*name_and_type, "NameAndType", is_nat)?;
                }
                Constant::NameAndType { name, descriptor } => {
                    expect(*name, "Utf8", is_utf8)?;
                    expect(*descriptor, "Utf8", is_utf8)?;
                }
                Constant::MethodHandle { kind, reference } => {
                    if !(1..=9).contains(kind) {
                        return Err(malformed_error!("Invalid method handle kind {}", kind));
                    }
                    expect(*reference, "member reference", is_member)?;
                }
                Constant::Dynamic { name_and_type, .. }
                | Constant::InvokeDynamic { name_and_type, .. } => {
                    expect(*name_and_type, "NameAndType", is_nat)?;
                }
                Constant::Unusable
                | Constant::Utf8(_)
                | Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_) => {}
            }
        }

        Ok(())
    }
}

/// Decodes the JVM's modified UTF-8 into a Rust string.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for invalid byte sequences and
/// [`crate::Error::NotSupported`] for unpaired surrogates, which Rust strings cannot hold.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    if bytes.iter().all(|b| (1..0x80).contains(b)) {
        return Ok(bytes.iter().map(|&b| char::from(b)).collect());
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    let continuation = |byte: Option<u8>| -> Result<u16> {
        match byte {
            Some(b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
            _ => Err(malformed_error!("Truncated modified UTF-8 sequence")),
        }
    };

    while let Some(first) = iter.next() {
        let unit = match first {
            0x01..=0x7F => u16::from(first),
            0xC0..=0xDF => (u16::from(first & 0x1F) << 6) | continuation(iter.next())?,
            0xE0..=0xEF => {
                let second = continuation(iter.next())?;
                let third = continuation(iter.next())?;
                (u16::from(first & 0x0F) << 12) | (second << 6) | third
            }
            _ => {
                return Err(malformed_error!(
                    "Invalid modified UTF-8 lead byte 0x{:02X}",
                    first
                ))
            }
        };
        units.push(unit);
    }

    String::from_utf16(&units)
        .map_err(|_| Error::NotSupported("Utf8 constant with unpaired surrogate".to_string()))
}

/// Encodes a Rust string as modified UTF-8 (NUL as two bytes, supplementary characters as
/// surrogate pairs).
#[must_use]
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) as u8 & 0x1F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) as u8 & 0x0F));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_bytes() -> Vec<u8> {
        let mut data = vec![0x00, 0x07];
        // #1 Utf8 "Foo"
        data.extend_from_slice(&[tags::UTF8, 0x00, 0x03, b'F', b'o', b'o']);
        // #2 Class #1
        data.extend_from_slice(&[tags::CLASS, 0x00, 0x01]);
        // #3 Long 1 (occupies #3 and #4)
        data.extend_from_slice(&[tags::LONG, 0, 0, 0, 0, 0, 0, 0, 1]);
        // #5 String #1
        data.extend_from_slice(&[tags::STRING, 0x00, 0x01]);
        // #6 Integer 42
        data.extend_from_slice(&[tags::INTEGER, 0, 0, 0, 42]);
        data
    }

    #[test]
    fn parse_and_write_roundtrip() {
        let data = pool_bytes();
        let mut parser = Parser::new(&data);
        let pool = ConstantPool::parse(&mut parser).unwrap();

        assert_eq!(pool.len(), 7);
        assert_eq!(pool.class_name(2).unwrap(), "Foo");
        assert_eq!(pool.get(3).unwrap(), &Constant::Long(1));
        assert!(pool.get(4).is_err());
        assert_eq!(pool.get(6).unwrap(), &Constant::Integer(42));

        let mut out = Vec::new();
        pool.write(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn intern_reuses_existing_entries() {
        let data = pool_bytes();
        let mut parser = Parser::new(&data);
        let mut pool = ConstantPool::parse(&mut parser).unwrap();

        assert_eq!(pool.class_index("Foo").unwrap(), 2);
        assert_eq!(pool.string_index("Foo").unwrap(), 5);
        assert_eq!(pool.len(), 7);

        let index = pool.string_index("Bar").unwrap();
        assert_eq!(index, 8);
        assert_eq!(pool.len(), 9);
        assert_eq!(pool.utf8(7).unwrap(), "Bar");
    }

    #[test]
    fn intern_wide_takes_two_slots() {
        let mut pool = ConstantPool::default();
        assert_eq!(pool.intern(Constant::Double(0)).unwrap(), 1);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.intern(Constant::Integer(1)).unwrap(), 3);
    }

    #[test]
    fn member_ref_resolution() {
        let mut pool = ConstantPool::default();
        let index = pool
            .method_ref_index("java/lang/String", "equals", "(Ljava/lang/Object;)Z", false)
            .unwrap();

        let member = pool.member_ref(index).unwrap();
        assert_eq!(member.kind, MemberRefKind::Method);
        assert_eq!(member.owner, "java/lang/String");
        assert_eq!(member.name, "equals");
        assert_eq!(member.descriptor, "(Ljava/lang/Object;)Z");
    }

    #[test]
    fn invalid_tag() {
        let data = [0x00, 0x02, 0x02, 0x00];
        let mut parser = Parser::new(&data);
        assert!(matches!(
            ConstantPool::parse(&mut parser),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn wrong_reference_kind() {
        // #1 Integer, #2 Class -> #1
        let data = [
            0x00,
            0x03,
            tags::INTEGER,
            0,
            0,
            0,
            1,
            tags::CLASS,
            0x00,
            0x01,
        ];
        let mut parser = Parser::new(&data);
        assert!(matches!(
            ConstantPool::parse(&mut parser),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn wide_constant_in_last_slot() {
        let data = [0x00, 0x02, tags::LONG, 0, 0, 0, 0, 0, 0, 0, 1];
        let mut parser = Parser::new(&data);
        assert!(ConstantPool::parse(&mut parser).is_err());
    }

    #[test]
    fn modified_utf8() {
        assert_eq!(encode_modified_utf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode_modified_utf8(&[b'a', 0xC0, 0x80, b'b']).unwrap(), "a\0b");

        let emoji = "\u{1F600}";
        let encoded = encode_modified_utf8(emoji);
        assert_eq!(encoded.len(), 6);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), emoji);

        assert_eq!(decode_modified_utf8("é".as_bytes()).unwrap(), "é");
        assert!(decode_modified_utf8(&[0xFF]).is_err());
        assert!(decode_modified_utf8(&[0xE0, 0x80]).is_err());
    }
}
