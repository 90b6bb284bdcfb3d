//! Cursor-based byte stream parser for class file decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a bounds-checked cursor over a
//! byte slice. Every structure in a class file (constant pool, members, attributes, bytecode) is
//! read through it so that truncated or hostile input surfaces as [`crate::Error::OutOfBounds`]
//! instead of a panic.
//!
//! # Usage Examples
//!
//! ```rust
//! use hotpatch::Parser;
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_be::<u32>()?, 0xCAFE_BABE);
//! assert_eq!(parser.read_be::<u16>()?, 52);
//! assert!(!parser.has_more_data());
//! # Ok::<(), hotpatch::Error>(())
//! ```

use crate::{
    file::io::{read_be_at, ClassIO},
    Error::OutOfBounds,
    Result,
};

/// A generic binary data parser for reading class file structures.
///
/// `Parser` maintains an internal position cursor and validates every read against the
/// underlying buffer.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there are unread bytes left.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to an absolute position. Seeking to the very end is allowed.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies beyond the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Move the cursor forward by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if this would move past the end of the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.calc_end_position(step)?;
        self.position = end;
        Ok(())
    }

    /// Returns the current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Returns the full underlying buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Peek at the byte under the cursor without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data.get(self.position).copied().ok_or(OutOfBounds)
    }

    /// Read a big-endian value of type `T` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_be<T: ClassIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Advance the cursor to the next multiple of `alignment`, measured from `base`.
    ///
    /// `tableswitch` and `lookupswitch` pad their operands to a 4-byte boundary relative to
    /// the start of the method's code, which is not necessarily the start of this buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding runs past the end of the data.
    pub fn align_from(&mut self, base: usize, alignment: usize) -> Result<()> {
        let relative = self.position.checked_sub(base).ok_or(OutOfBounds)?;
        let padding = (alignment - (relative % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Ensures that at least `needed` bytes are available from the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `needed` bytes remain.
    pub fn ensure_remaining(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(OutOfBounds);
        }
        Ok(())
    }

    /// Calculates `position + length` with overflow and bounds checking.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the result overflows or exceeds the data.
    pub fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self.position.checked_add(length).ok_or(OutOfBounds)?;

        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(end)
    }

    /// Reads a slice of `length` bytes and advances past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading `length` bytes would exceed the data.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Reads a `u16` length followed by that many bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data is truncated.
    pub fn read_u16_prefixed(&mut self) -> Result<&'a [u8]> {
        let length = self.read_be::<u16>()?;
        self.read_bytes(usize::from(length))
    }

    /// Reads a `u32` length followed by that many bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data is truncated.
    pub fn read_u32_prefixed(&mut self) -> Result<&'a [u8]> {
        let length = self.read_be::<u32>()?;
        let length = usize::try_from(length).map_err(|_| OutOfBounds)?;
        self.read_bytes(length)
    }

    /// Reads a `u16` count followed by that many `u16` values.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data is truncated.
    pub fn read_u16_list(&mut self) -> Result<Vec<u16>> {
        let count = self.read_be::<u16>()?;
        self.ensure_remaining(usize::from(count) * 2)?;
        (0..count).map(|_| self.read_be::<u16>()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_be::<u16>().unwrap(), 0x0102);
        assert_eq!(parser.read_be::<u32>().unwrap(), 0x0304_0506);
        assert!(!parser.has_more_data());
        assert!(parser.read_be::<u8>().is_err());
    }

    #[test]
    fn seek_to_end_is_allowed() {
        let data = [0x01, 0x02];
        let mut parser = Parser::new(&data);

        parser.seek(2).unwrap();
        assert_eq!(parser.remaining(), 0);
        assert!(parser.seek(3).is_err());
    }

    #[test]
    fn prefixed_reads() {
        let data = [0x00, 0x02, 0xAA, 0xBB, 0x00, 0x00, 0x00, 0x01, 0xCC];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_u16_prefixed().unwrap(), &[0xAA, 0xBB]);
        assert_eq!(parser.read_u32_prefixed().unwrap(), &[0xCC]);
    }

    #[test]
    fn prefixed_read_truncated() {
        let data = [0x00, 0x05, 0xAA];
        let mut parser = Parser::new(&data);

        assert!(matches!(
            parser.read_u16_prefixed(),
            Err(crate::Error::OutOfBounds)
        ));
    }

    #[test]
    fn align_relative_to_base() {
        let data = [0u8; 16];
        let mut parser = Parser::new(&data);

        // Code starts at 2; an opcode at code offset 0 leaves the cursor at code offset 1.
        parser.seek(3).unwrap();
        parser.align_from(2, 4).unwrap();
        assert_eq!(parser.pos(), 6);

        parser.align_from(2, 4).unwrap();
        assert_eq!(parser.pos(), 6);
    }

    #[test]
    fn u16_list() {
        let data = [0x00, 0x02, 0x00, 0x07, 0x00, 0x09];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_u16_list().unwrap(), vec![7, 9]);
    }
}
