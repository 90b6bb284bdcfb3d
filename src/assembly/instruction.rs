//! The instruction event model.
//!
//! A method body is represented as an ordered list of [`Instruction`] events. Branch targets
//! are symbolic [`Label`]s placed in the list with [`Instruction::Label`]; all constant pool
//! operands are resolved to their values (strings, class names, member references), so
//! events can be created, compared and matched without access to a constant pool.
//!
//! The decoder produces events in bytecode order and the encoder lays them out again,
//! choosing compact encodings and recomputing every offset.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::assembly::opcodes;

/// An opaque jump target within one method body.
///
/// Labels are allocated by [`crate::assembly::LabelAllocator`]. A label referenced by any
/// event must be placed exactly once in the emitted event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Numeric identity of this label, unique within its method body.
    #[must_use]
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// The value category of a local variable load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ValueKind {
    /// `int`, `short`, `char`, `byte`, `boolean`
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Object and array references (and `returnAddress` for `astore`)
    Reference,
}

impl ValueKind {
    /// Local slots (and operand stack words) taken by a value of this kind.
    #[must_use]
    pub fn slots(self) -> u16 {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }

    pub(crate) fn from_offset(offset: u8) -> ValueKind {
        match offset {
            0 => ValueKind::Int,
            1 => ValueKind::Long,
            2 => ValueKind::Float,
            3 => ValueKind::Double,
            _ => ValueKind::Reference,
        }
    }

    pub(crate) fn offset(self) -> u8 {
        match self {
            ValueKind::Int => 0,
            ValueKind::Long => 1,
            ValueKind::Float => 2,
            ValueKind::Double => 3,
            ValueKind::Reference => 4,
        }
    }
}

/// The kind of a `*return` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ReturnKind {
    /// `ireturn`
    Int,
    /// `lreturn`
    Long,
    /// `freturn`
    Float,
    /// `dreturn`
    Double,
    /// `areturn`
    Reference,
    /// `return`
    Void,
}

impl ReturnKind {
    pub(crate) fn opcode(self) -> u8 {
        match self {
            ReturnKind::Int => opcodes::IRETURN,
            ReturnKind::Long => opcodes::LRETURN,
            ReturnKind::Float => opcodes::FRETURN,
            ReturnKind::Double => opcodes::DRETURN,
            ReturnKind::Reference => opcodes::ARETURN,
            ReturnKind::Void => opcodes::RETURN,
        }
    }

    pub(crate) fn from_opcode(opcode: u8) -> Option<ReturnKind> {
        Some(match opcode {
            opcodes::IRETURN => ReturnKind::Int,
            opcodes::LRETURN => ReturnKind::Long,
            opcodes::FRETURN => ReturnKind::Float,
            opcodes::DRETURN => ReturnKind::Double,
            opcodes::ARETURN => ReturnKind::Reference,
            opcodes::RETURN => ReturnKind::Void,
            _ => return None,
        })
    }

    /// Operand stack words consumed by the return.
    #[must_use]
    pub fn words(self) -> usize {
        match self {
            ReturnKind::Void => 0,
            ReturnKind::Long | ReturnKind::Double => 2,
            _ => 1,
        }
    }
}

/// The condition of a jump instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum JumpKind {
    /// `ifeq`
    IfEq,
    /// `ifne`
    IfNe,
    /// `iflt`
    IfLt,
    /// `ifge`
    IfGe,
    /// `ifgt`
    IfGt,
    /// `ifle`
    IfLe,
    /// `if_icmpeq`
    #[strum(serialize = "if_icmpeq")]
    IfICmpEq,
    /// `if_icmpne`
    #[strum(serialize = "if_icmpne")]
    IfICmpNe,
    /// `if_icmplt`
    #[strum(serialize = "if_icmplt")]
    IfICmpLt,
    /// `if_icmpge`
    #[strum(serialize = "if_icmpge")]
    IfICmpGe,
    /// `if_icmpgt`
    #[strum(serialize = "if_icmpgt")]
    IfICmpGt,
    /// `if_icmple`
    #[strum(serialize = "if_icmple")]
    IfICmpLe,
    /// `if_acmpeq`
    #[strum(serialize = "if_acmpeq")]
    IfACmpEq,
    /// `if_acmpne`
    #[strum(serialize = "if_acmpne")]
    IfACmpNe,
    /// `goto` / `goto_w`
    Goto,
    /// `jsr` / `jsr_w`
    Jsr,
    /// `ifnull`
    IfNull,
    /// `ifnonnull`
    IfNonNull,
}

impl JumpKind {
    /// Short-form opcode of this jump.
    #[must_use]
    pub fn opcode(self) -> u8 {
        match self {
            JumpKind::IfEq => opcodes::IFEQ,
            JumpKind::IfNe => opcodes::IFNE,
            JumpKind::IfLt => opcodes::IFLT,
            JumpKind::IfGe => opcodes::IFGE,
            JumpKind::IfGt => opcodes::IFGT,
            JumpKind::IfLe => opcodes::IFLE,
            JumpKind::IfICmpEq => opcodes::IF_ICMPEQ,
            JumpKind::IfICmpNe => opcodes::IF_ICMPNE,
            JumpKind::IfICmpLt => opcodes::IF_ICMPLT,
            JumpKind::IfICmpGe => opcodes::IF_ICMPGE,
            JumpKind::IfICmpGt => opcodes::IF_ICMPGT,
            JumpKind::IfICmpLe => opcodes::IF_ICMPLE,
            JumpKind::IfACmpEq => opcodes::IF_ACMPEQ,
            JumpKind::IfACmpNe => opcodes::IF_ACMPNE,
            JumpKind::Goto => opcodes::GOTO,
            JumpKind::Jsr => opcodes::JSR,
            JumpKind::IfNull => opcodes::IFNULL,
            JumpKind::IfNonNull => opcodes::IFNONNULL,
        }
    }

    /// Maps a jump opcode (short or wide form) to its kind.
    #[must_use]
    pub fn from_opcode(opcode: u8) -> Option<JumpKind> {
        Some(match opcode {
            opcodes::IFEQ => JumpKind::IfEq,
            opcodes::IFNE => JumpKind::IfNe,
            opcodes::IFLT => JumpKind::IfLt,
            opcodes::IFGE => JumpKind::IfGe,
            opcodes::IFGT => JumpKind::IfGt,
            opcodes::IFLE => JumpKind::IfLe,
            opcodes::IF_ICMPEQ => JumpKind::IfICmpEq,
            opcodes::IF_ICMPNE => JumpKind::IfICmpNe,
            opcodes::IF_ICMPLT => JumpKind::IfICmpLt,
            opcodes::IF_ICMPGE => JumpKind::IfICmpGe,
            opcodes::IF_ICMPGT => JumpKind::IfICmpGt,
            opcodes::IF_ICMPLE => JumpKind::IfICmpLe,
            opcodes::IF_ACMPEQ => JumpKind::IfACmpEq,
            opcodes::IF_ACMPNE => JumpKind::IfACmpNe,
            opcodes::GOTO | opcodes::GOTO_W => JumpKind::Goto,
            opcodes::JSR | opcodes::JSR_W => JumpKind::Jsr,
            opcodes::IFNULL => JumpKind::IfNull,
            opcodes::IFNONNULL => JumpKind::IfNonNull,
            _ => return None,
        })
    }

    /// `true` for every jump except `goto` and `jsr`.
    #[must_use]
    pub fn is_conditional(self) -> bool {
        !matches!(self, JumpKind::Goto | JumpKind::Jsr)
    }

    /// The jump taken exactly when this one is not. `None` for `goto` and `jsr`.
    #[must_use]
    pub fn inverted(self) -> Option<JumpKind> {
        Some(match self {
            JumpKind::IfEq => JumpKind::IfNe,
            JumpKind::IfNe => JumpKind::IfEq,
            JumpKind::IfLt => JumpKind::IfGe,
            JumpKind::IfGe => JumpKind::IfLt,
            JumpKind::IfGt => JumpKind::IfLe,
            JumpKind::IfLe => JumpKind::IfGt,
            JumpKind::IfICmpEq => JumpKind::IfICmpNe,
            JumpKind::IfICmpNe => JumpKind::IfICmpEq,
            JumpKind::IfICmpLt => JumpKind::IfICmpGe,
            JumpKind::IfICmpGe => JumpKind::IfICmpLt,
            JumpKind::IfICmpGt => JumpKind::IfICmpLe,
            JumpKind::IfICmpLe => JumpKind::IfICmpGt,
            JumpKind::IfACmpEq => JumpKind::IfACmpNe,
            JumpKind::IfACmpNe => JumpKind::IfACmpEq,
            JumpKind::IfNull => JumpKind::IfNonNull,
            JumpKind::IfNonNull => JumpKind::IfNull,
            JumpKind::Goto | JumpKind::Jsr => return None,
        })
    }

    /// Operand stack words consumed by the comparison.
    #[must_use]
    pub fn operand_words(self) -> usize {
        match self {
            JumpKind::Goto | JumpKind::Jsr => 0,
            JumpKind::IfEq
            | JumpKind::IfNe
            | JumpKind::IfLt
            | JumpKind::IfGe
            | JumpKind::IfGt
            | JumpKind::IfLe
            | JumpKind::IfNull
            | JumpKind::IfNonNull => 1,
            _ => 2,
        }
    }
}

/// The kind of a field instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum FieldAccessKind {
    /// `getstatic`
    GetStatic,
    /// `putstatic`
    PutStatic,
    /// `getfield`
    GetField,
    /// `putfield`
    PutField,
}

impl FieldAccessKind {
    pub(crate) fn opcode(self) -> u8 {
        match self {
            FieldAccessKind::GetStatic => opcodes::GETSTATIC,
            FieldAccessKind::PutStatic => opcodes::PUTSTATIC,
            FieldAccessKind::GetField => opcodes::GETFIELD,
            FieldAccessKind::PutField => opcodes::PUTFIELD,
        }
    }
}

/// The kind of a method invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum InvokeKind {
    /// `invokevirtual`
    Virtual,
    /// `invokespecial`
    Special,
    /// `invokestatic`
    Static,
    /// `invokeinterface`
    Interface,
}

impl InvokeKind {
    pub(crate) fn opcode(self) -> u8 {
        match self {
            InvokeKind::Virtual => opcodes::INVOKEVIRTUAL,
            InvokeKind::Special => opcodes::INVOKESPECIAL,
            InvokeKind::Static => opcodes::INVOKESTATIC,
            InvokeKind::Interface => opcodes::INVOKEINTERFACE,
        }
    }
}

/// Instructions taking a single class operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TypeOp {
    /// `new`
    New,
    /// `anewarray`
    ANewArray,
    /// `checkcast`
    CheckCast,
    /// `instanceof`
    InstanceOf,
}

impl TypeOp {
    pub(crate) fn opcode(self) -> u8 {
        match self {
            TypeOp::New => opcodes::NEW,
            TypeOp::ANewArray => opcodes::ANEWARRAY,
            TypeOp::CheckCast => opcodes::CHECKCAST,
            TypeOp::InstanceOf => opcodes::INSTANCEOF,
        }
    }
}

/// A constant pushed by `aconst_null`, `*const_*`, `bipush`, `sipush` or `ldc*`.
///
/// Floating point values are carried as IEEE-754 bits so constants compare and hash exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    /// `null`
    Null,
    /// An `int` (also `boolean`, `byte`, `char`, `short`)
    Int(i32),
    /// A `long`
    Long(i64),
    /// A `float`, as bits
    Float(u32),
    /// A `double`, as bits
    Double(u64),
    /// A `java.lang.String` literal
    String(String),
    /// A `java.lang.Class` literal, by internal name or array descriptor
    Class(String),
    /// A `java.lang.invoke.MethodType` by descriptor
    MethodType(String),
    /// A `java.lang.invoke.MethodHandle`, by its existing constant pool index
    MethodHandle(u16),
    /// A dynamically-computed constant, by its existing constant pool index
    Dynamic {
        /// Index of the `CONSTANT_Dynamic` entry
        index: u16,
        /// Field descriptor of the produced value
        descriptor: String,
    },
}

impl ConstantValue {
    /// Operand stack words taken by the value.
    #[must_use]
    pub fn words(&self) -> usize {
        match self {
            ConstantValue::Long(_) | ConstantValue::Double(_) => 2,
            ConstantValue::Dynamic { descriptor, .. } if descriptor == "J" || descriptor == "D" => 2,
            _ => 1,
        }
    }
}

/// One event of a method's instruction stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Places a label at this position
    Label(Label),
    /// Pushes a constant
    LoadConstant(ConstantValue),
    /// `xload` from a local slot
    LoadLocal(ValueKind, u16),
    /// `xstore` to a local slot
    StoreLocal(ValueKind, u16),
    /// `iinc`
    Increment {
        /// Local slot
        slot: u16,
        /// Signed increment
        delta: i16,
    },
    /// Conditional or unconditional jump
    Jump(JumpKind, Label),
    /// `tableswitch`
    TableSwitch {
        /// Lowest key
        low: i32,
        /// Highest key
        high: i32,
        /// Target for keys outside `low..=high`
        default: Label,
        /// One target per key, starting at `low`
        targets: Vec<Label>,
    },
    /// `lookupswitch`
    LookupSwitch {
        /// Target for unmatched keys
        default: Label,
        /// Key/target pairs in ascending key order
        pairs: Vec<(i32, Label)>,
    },
    /// `getstatic`, `putstatic`, `getfield`, `putfield`
    FieldAccess {
        /// Access kind
        kind: FieldAccessKind,
        /// Owner internal name
        owner: String,
        /// Field name
        name: String,
        /// Field descriptor
        descriptor: String,
    },
    /// `invokevirtual`, `invokespecial`, `invokestatic`, `invokeinterface`
    MethodCall {
        /// Invocation kind
        kind: InvokeKind,
        /// Owner internal name (or array descriptor)
        owner: String,
        /// Method name
        name: String,
        /// Method descriptor
        descriptor: String,
        /// Whether the reference is a `CONSTANT_InterfaceMethodref`
        interface: bool,
    },
    /// `invokedynamic`, keeping its existing constant pool index
    InvokeDynamic {
        /// Index of the `CONSTANT_InvokeDynamic` entry
        index: u16,
        /// Call site name
        name: String,
        /// Call site descriptor
        descriptor: String,
    },
    /// `new`, `anewarray`, `checkcast`, `instanceof`
    Type(TypeOp, String),
    /// `newarray` with its primitive array type code
    NewArray(u8),
    /// `multianewarray`
    MultiANewArray {
        /// Array class
        class: String,
        /// Number of dimensions to allocate
        dimensions: u8,
    },
    /// `*return`
    Return(ReturnKind),
    /// `ret` (subroutine return)
    Ret(u16),
    /// Any single-byte instruction without operands (arithmetic, stack, array, monitor,
    /// `athrow`, ...)
    Raw(u8),
}

impl Instruction {
    /// `ldc` of a string literal.
    #[must_use]
    pub fn ldc_string(value: &str) -> Instruction {
        Instruction::LoadConstant(ConstantValue::String(value.to_string()))
    }

    /// `ldc` of a class literal.
    #[must_use]
    pub fn ldc_class(internal_name: &str) -> Instruction {
        Instruction::LoadConstant(ConstantValue::Class(internal_name.to_string()))
    }

    /// `aload` of a local slot.
    #[must_use]
    pub fn aload(slot: u16) -> Instruction {
        Instruction::LoadLocal(ValueKind::Reference, slot)
    }

    /// `invokevirtual` of a class method.
    #[must_use]
    pub fn invoke_virtual(owner: &str, name: &str, descriptor: &str) -> Instruction {
        Instruction::MethodCall {
            kind: InvokeKind::Virtual,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            interface: false,
        }
    }

    /// `getstatic` of a field.
    #[must_use]
    pub fn get_static(owner: &str, name: &str, descriptor: &str) -> Instruction {
        Instruction::FieldAccess {
            kind: FieldAccessKind::GetStatic,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    /// `true` if control never falls through to the next event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Instruction::Jump(JumpKind::Goto, _)
            | Instruction::TableSwitch { .. }
            | Instruction::LookupSwitch { .. }
            | Instruction::Return(_)
            | Instruction::Ret(_) => true,
            Instruction::Raw(opcode) => *opcode == opcodes::ATHROW,
            _ => false,
        }
    }

    /// Every label this event can transfer control to.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<Label> {
        match self {
            Instruction::Jump(_, label) => vec![*label],
            Instruction::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Instruction::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, label)| *label))
                .collect(),
            _ => Vec::new(),
        }
    }
}
