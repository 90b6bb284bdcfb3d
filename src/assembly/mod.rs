//! JVM bytecode decoding, analysis and re-encoding.
//!
//! This module turns the payload of a `Code` attribute into an editable [`MethodBody`] and
//! back. Patch strategies only ever see the [`Instruction`] event list; every offset-dependent
//! structure (branch displacements, switch padding, exception ranges, debug tables, stack
//! map frames) is tied to symbolic [`Label`]s and regenerated by [`encode_code`].
//!
//! # Key Types
//! - [`Instruction`] - One event of a method's instruction stream
//! - [`Label`] / [`LabelAllocator`] - Symbolic jump targets
//! - [`MethodBody`] - A decoded `Code` attribute
//! - [`Frame`] / [`VerificationType`] - Stack map frames
//!
//! # Main Functions
//! - [`decode_code`] - Decode a `Code` attribute payload
//! - [`analyze`] - Type-flow analysis of an event list
//! - [`encode_code`] - Encode a body back into a `Code` attribute payload
//!
//! # Example
//! ```rust
//! use hotpatch::assembly::{decode_code, encode_code, Instruction, MethodContext};
//! use hotpatch::classfile::ConstantPool;
//!
//! // max_stack 1, max_locals 1, code: iload_0; ireturn
//! let code = [0, 1, 0, 1, 0, 0, 0, 2, 0x1A, 0xAC, 0, 0, 0, 0];
//! let method = MethodContext {
//!     class_name: "Example".into(),
//!     method_name: "identity".into(),
//!     descriptor: "(I)I".into(),
//!     is_static: true,
//!     major_version: 52,
//! };
//!
//! let mut pool = ConstantPool::default();
//! let body = decode_code(&code, &pool, &method)?;
//! assert_eq!(body.instructions.len(), 2);
//! assert_eq!(encode_code(&body, &method, &mut pool)?, code);
//! # Ok::<(), hotpatch::Error>(())
//! ```

mod analysis;
mod body;
mod decoder;
mod encoder;
mod frames;
mod instruction;
pub mod opcodes;

pub use analysis::{analyze, Analysis, FlowState};
pub use body::{
    ExceptionHandler, LabelAllocator, LineNumber, LocalVariable, MethodBody, MethodContext,
};
pub use decoder::{decode_code, MAX_CODE_LENGTH};
pub use encoder::encode_code;
pub use frames::{
    decode_stack_map, encode_stack_map, from_slots, to_slots, Frame, VerificationType,
};
pub use instruction::{
    ConstantValue, FieldAccessKind, Instruction, InvokeKind, JumpKind, Label, ReturnKind,
    TypeOp, ValueKind,
};
