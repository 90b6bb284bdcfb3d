//! Low-level byte access for class file parsing and generation.
//!
//! - [`io`] - big-endian primitive reads and writes over byte buffers
//! - [`parser`] - the bounds-checked [`parser::Parser`] cursor used by every decoder

pub mod io;
pub mod parser;
