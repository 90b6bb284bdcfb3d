//! # hotpatch Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the hotpatch library. Import this module to get quick access to the essential
//! types for dispatching, writing patches and embedding the agent.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all hotpatch operations
pub use crate::Error;

/// Boundary classification of errors
pub use crate::ErrorKind;

/// The result type used throughout hotpatch
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Routing classes to patches and the outcomes it produces
pub use crate::dispatcher::{Dispatcher, Rewrite, RewriteResult};

/// Versioned patch families
pub use crate::registry::{PatchRegistry, PatchSet};

/// Agent configuration
pub use crate::config::HotPatchConfig;

/// Host glue
pub use crate::agent::{
    ClassFileEvent, ClassFileKind, HotPatchAgent, InMemoryVersionRecord, VersionRecord,
};

/// Diagnostics
pub use crate::logger::{Logger, NullLogger, TracingLogger};

// ================================================================================================
// Class Files and Bytecode
// ================================================================================================

/// Parsed class files
pub use crate::classfile::{ClassBinary, ConstantPool};

/// Instruction events and method bodies
pub use crate::assembly::{
    ConstantValue, FieldAccessKind, Instruction, InvokeKind, JumpKind, Label, LabelAllocator,
    MethodBody, ReturnKind, ValueKind,
};

// ================================================================================================
// Writing Patches
// ================================================================================================

/// Patch definition and the transformer pipeline
pub use crate::patch::{
    ClassMatcher, EventTransformer, MethodTransform, Patch, PatchOutcome, PatternMismatch,
    TransformContext, Transition,
};

/// Built-in strategies
pub use crate::patch::strategies::{Adjacency, BranchInversion, ConstantReturn, GuardInjection};
