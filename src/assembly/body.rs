//! Decoded method bodies.

use crate::{
    assembly::{frames::Frame, instruction::Instruction, instruction::Label},
    classfile::member::Attribute,
};

/// Hands out fresh [`Label`]s for one method body.
#[derive(Debug, Clone, Default)]
pub struct LabelAllocator {
    next: u32,
}

impl LabelAllocator {
    /// Creates an allocator whose first label is `L0`.
    #[must_use]
    pub fn new() -> Self {
        LabelAllocator::default()
    }

    /// Returns a label distinct from every label this allocator handed out before.
    pub fn allocate(&mut self) -> Label {
        let label = Label(self.next);
        self.next += 1;
        label
    }

    /// Number of labels allocated so far.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

/// One exception table entry. The protected range is `start..end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First protected instruction
    pub start: Label,
    /// End of the protected range (exclusive)
    pub end: Label,
    /// Handler entry point
    pub handler: Label,
    /// Caught class, `None` for `finally`-style handlers
    pub catch_type: Option<String>,
}

/// A `LineNumberTable` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    /// First instruction of the line
    pub start: Label,
    /// Source line number
    pub line: u16,
}

/// A `LocalVariableTable` or `LocalVariableTypeTable` entry.
///
/// Name and descriptor (or signature) stay as constant pool indices; the pool is append-only
/// so they remain valid after rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Start of the live range
    pub start: Label,
    /// End of the live range (exclusive)
    pub end: Label,
    /// Utf8 index of the variable name
    pub name_index: u16,
    /// Utf8 index of the descriptor (or signature)
    pub descriptor_index: u16,
    /// Local slot
    pub slot: u16,
}

/// Identity of the method a body belongs to, needed to derive its entry frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodContext {
    /// Internal name of the declaring class
    pub class_name: String,
    /// Method name
    pub method_name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Whether the method is static
    pub is_static: bool,
    /// Class file major version; stack maps are only written for 50 and above
    pub major_version: u16,
}

/// A method's `Code` attribute in event form.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// `max_stack` as decoded; recomputed on encode
    pub max_stack: u16,
    /// `max_locals` as decoded; the encoder never emits less
    pub max_locals: u16,
    /// The instruction event stream
    pub instructions: Vec<Instruction>,
    /// Exception table in declaration order
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Line number entries
    pub line_numbers: Vec<LineNumber>,
    /// Local variable entries
    pub local_variables: Vec<LocalVariable>,
    /// Local variable type (generic signature) entries
    pub local_variable_types: Vec<LocalVariable>,
    /// Stack map frames of the original code, bound to labels
    pub frames: Vec<(Label, Frame)>,
    /// Other code attributes, kept raw
    pub attributes: Vec<Attribute>,
    /// Allocator that continues after every label used by this body
    pub labels: LabelAllocator,
}

impl MethodBody {
    /// Creates an empty body for hand-built instruction streams.
    #[must_use]
    pub fn new(max_locals: u16) -> Self {
        MethodBody {
            max_locals,
            ..MethodBody::default()
        }
    }
}
