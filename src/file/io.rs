//! Byte order and bounds-checked reading/writing utilities for class file processing.
//!
//! The JVM class file format stores every multi-byte quantity in big-endian order. This
//! module provides the [`crate::file::io::ClassIO`] trait, which abstracts over the primitive
//! types that appear in class files, and a small set of free functions that read from a byte
//! slice at an offset (advancing it) or append to an output buffer.
//!
//! # Key Components
//!
//! - [`crate::file::io::ClassIO`] - Endian conversion for primitive types
//! - [`crate::file::io::read_be`] / [`crate::file::io::read_be_at`] - Bounds-checked reads
//! - [`crate::file::io::write_be`] - Appending writes
//! - [`crate::file::io::write_be_at`] - Patching writes into an existing buffer
//!
//! # Examples
//!
//! ```rust,ignore
//! use hotpatch::file::io::{read_be_at, write_be};
//!
//! let data = [0x00, 0x01, 0x00, 0x02];
//! let mut offset = 0;
//! assert_eq!(read_be_at::<u16>(&data, &mut offset)?, 1);
//! assert_eq!(read_be_at::<u16>(&data, &mut offset)?, 2);
//!
//! let mut out = Vec::new();
//! write_be(&mut out, 0xCAFE_BABE_u32);
//! assert_eq!(out, [0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok::<(), hotpatch::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! All functions are pure conversions over caller-owned buffers and can be used concurrently.

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific safe binary data reading and writing operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`). The trait
/// methods convert these byte arrays to the target type and back.
pub trait ClassIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; $len];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
}

/// Safely reads a value of type `T` in big-endian byte order from the start of a buffer.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be<T: ClassIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Safely reads a value of type `T` in big-endian byte order at `offset`.
///
/// The offset is advanced by the number of bytes read on success and left untouched
/// on failure.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Appends `value` in big-endian byte order to `out`.
pub fn write_be<T: ClassIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_be_bytes().as_ref());
}

/// Overwrites the bytes at `offset` with `value` in big-endian byte order.
///
/// Used to back-patch lengths and branch offsets once they are known. The offset is
/// advanced past the written bytes.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit in the buffer.
pub fn write_be_at<T: ClassIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_be_bytes();
    let bytes = bytes.as_ref();
    let end = offset.checked_add(bytes.len()).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;

    Ok(())
}
