//! `StackMapTable` frames (JVMS §4.7.4).
//!
//! Frames are kept in their declared form: `locals` and `stack` list one entry per value, with
//! `long` and `double` taking a single entry. The type-flow analysis works on a slot-indexed
//! form instead; [`to_slots`] and [`from_slots`] convert between the two.
//!
//! Frame offsets are bound to [`Label`]s as soon as they are decoded so that frames survive
//! instruction insertion and removal.

use crate::{
    assembly::instruction::Label,
    classfile::{
        constant_pool::ConstantPool,
        descriptor::{FieldType, MethodDescriptor},
    },
    file::{io::write_be, parser::Parser},
    Error, Result,
};

const ITEM_TOP: u8 = 0;
const ITEM_INTEGER: u8 = 1;
const ITEM_FLOAT: u8 = 2;
const ITEM_DOUBLE: u8 = 3;
const ITEM_LONG: u8 = 4;
const ITEM_NULL: u8 = 5;
const ITEM_UNINITIALIZED_THIS: u8 = 6;
const ITEM_OBJECT: u8 = 7;
const ITEM_UNINITIALIZED: u8 = 8;

const SAME_LOCALS_1_STACK_ITEM: u8 = 64;
const SAME_LOCALS_1_STACK_ITEM_EXTENDED: u8 = 247;
const CHOP: u8 = 248;
const SAME_EXTENDED: u8 = 251;
const FULL: u8 = 255;

/// A verification type (JVMS §4.10.1.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    /// Unusable or unknown value
    Top,
    /// `int` and smaller integral types
    Integer,
    /// `float`
    Float,
    /// `long` (two slots)
    Long,
    /// `double` (two slots)
    Double,
    /// The `null` reference
    Null,
    /// `this` inside a constructor before the super constructor call
    UninitializedThis,
    /// A class or array type by internal name or array descriptor
    Object(String),
    /// The result of the `new` instruction placed at the label
    Uninitialized(Label),
}

impl VerificationType {
    /// `true` for `long` and `double`.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }

    /// `true` for every reference-like type.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Object(_)
                | VerificationType::Uninitialized(_)
        )
    }

    /// The verification type of a value of the given field type.
    #[must_use]
    pub fn from_field_type(field_type: &FieldType) -> VerificationType {
        match field_type {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Boolean
            | FieldType::Int => VerificationType::Integer,
            FieldType::Float => VerificationType::Float,
            FieldType::Long => VerificationType::Long,
            FieldType::Double => VerificationType::Double,
            FieldType::Object(name) | FieldType::Array(name) => {
                VerificationType::Object(name.clone())
            }
        }
    }

    fn read(
        parser: &mut Parser<'_>,
        pool: &ConstantPool,
        label_at: &mut dyn FnMut(usize) -> Label,
    ) -> Result<VerificationType> {
        let tag = parser.read_be::<u8>()?;
        Ok(match tag {
            ITEM_TOP => VerificationType::Top,
            ITEM_INTEGER => VerificationType::Integer,
            ITEM_FLOAT => VerificationType::Float,
            ITEM_DOUBLE => VerificationType::Double,
            ITEM_LONG => VerificationType::Long,
            ITEM_NULL => VerificationType::Null,
            ITEM_UNINITIALIZED_THIS => VerificationType::UninitializedThis,
            ITEM_OBJECT => VerificationType::Object(pool.class_name(parser.read_be()?)?),
            ITEM_UNINITIALIZED => {
                let offset = parser.read_be::<u16>()?;
                VerificationType::Uninitialized(label_at(usize::from(offset)))
            }
            _ => return Err(malformed_error!("Invalid verification type tag {}", tag)),
        })
    }

    fn write(
        &self,
        out: &mut Vec<u8>,
        pool: &mut ConstantPool,
        offset_of: &dyn Fn(Label) -> Result<usize>,
    ) -> Result<()> {
        match self {
            VerificationType::Top => write_be(out, ITEM_TOP),
            VerificationType::Integer => write_be(out, ITEM_INTEGER),
            VerificationType::Float => write_be(out, ITEM_FLOAT),
            VerificationType::Double => write_be(out, ITEM_DOUBLE),
            VerificationType::Long => write_be(out, ITEM_LONG),
            VerificationType::Null => write_be(out, ITEM_NULL),
            VerificationType::UninitializedThis => write_be(out, ITEM_UNINITIALIZED_THIS),
            VerificationType::Object(name) => {
                write_be(out, ITEM_OBJECT);
                write_be(out, pool.class_index(name)?);
            }
            VerificationType::Uninitialized(label) => {
                write_be(out, ITEM_UNINITIALIZED);
                write_be(out, to_u16(offset_of(*label)?, "uninitialized offset")?);
            }
        }
        Ok(())
    }
}

/// One stack map frame in declared form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Frame {
    /// Local variable types, one entry per value
    pub locals: Vec<VerificationType>,
    /// Operand stack types, bottom first, one entry per value
    pub stack: Vec<VerificationType>,
}

impl Frame {
    /// The implicit frame at method entry: `this` (or `uninitializedThis` in constructors)
    /// followed by the parameters.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor is invalid.
    pub fn entry(
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Result<Frame> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        let mut locals = Vec::with_capacity(descriptor.parameters.len() + 1);

        if !is_static {
            if method_name == "<init>" && class_name != "java/lang/Object" {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::Object(class_name.to_string()));
            }
        }
        locals.extend(
            descriptor
                .parameters
                .iter()
                .map(VerificationType::from_field_type),
        );

        Ok(Frame {
            locals,
            stack: Vec::new(),
        })
    }
}

/// Expands declared-form types into one entry per slot (`long`/`double` followed by `Top`).
#[must_use]
pub fn to_slots(types: &[VerificationType]) -> Vec<VerificationType> {
    let mut slots = Vec::with_capacity(types.len());
    for value in types {
        slots.push(value.clone());
        if value.is_wide() {
            slots.push(VerificationType::Top);
        }
    }
    slots
}

/// Collapses slot form into declared form. With `trim`, trailing `Top` entries are dropped
/// (used for locals).
#[must_use]
pub fn from_slots(slots: &[VerificationType], trim: bool) -> Vec<VerificationType> {
    let mut types = Vec::with_capacity(slots.len());
    let mut index = 0;
    while index < slots.len() {
        let value = &slots[index];
        types.push(value.clone());
        index += if value.is_wide() { 2 } else { 1 };
    }

    if trim {
        while types.last() == Some(&VerificationType::Top) {
            types.pop();
        }
    }
    types
}

fn to_u16(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::LimitExceeded(format!("{what} {value}")))
}

/// Decodes a `StackMapTable` attribute payload.
///
/// `label_at` maps a bytecode offset to its label, creating one if needed; it is used for
/// frame positions and `Uninitialized` offsets. Returns the frames in table order together
/// with their bytecode offsets.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved frame types or chops past the first
/// local, and [`crate::Error::OutOfBounds`] for truncated data.
pub fn decode_stack_map(
    data: &[u8],
    pool: &ConstantPool,
    initial: &Frame,
    label_at: &mut dyn FnMut(usize) -> Label,
) -> Result<Vec<(usize, Frame)>> {
    let mut parser = Parser::new(data);
    let count = parser.read_be::<u16>()?;
    let mut frames = Vec::with_capacity(usize::from(count));
    let mut previous = initial.clone();
    let mut previous_offset: Option<usize> = None;

    for _ in 0..count {
        let frame_type = parser.read_be::<u8>()?;
        let (delta, frame) = match frame_type {
            0..=63 => (
                usize::from(frame_type),
                Frame {
                    locals: previous.locals.clone(),
                    stack: Vec::new(),
                },
            ),
            64..=127 => {
                let item = VerificationType::read(&mut parser, pool, label_at)?;
                (
                    usize::from(frame_type - SAME_LOCALS_1_STACK_ITEM),
                    Frame {
                        locals: previous.locals.clone(),
                        stack: vec![item],
                    },
                )
            }
            SAME_LOCALS_1_STACK_ITEM_EXTENDED => {
                let delta = parser.read_be::<u16>()?;
                let item = VerificationType::read(&mut parser, pool, label_at)?;
                (
                    usize::from(delta),
                    Frame {
                        locals: previous.locals.clone(),
                        stack: vec![item],
                    },
                )
            }
            CHOP..=250 => {
                let delta = parser.read_be::<u16>()?;
                let chopped = usize::from(SAME_EXTENDED - frame_type);
                if chopped > previous.locals.len() {
                    return Err(malformed_error!(
                        "Chop frame removes {} of {} locals",
                        chopped,
                        previous.locals.len()
                    ));
                }
                let keep = previous.locals.len() - chopped;
                (
                    usize::from(delta),
                    Frame {
                        locals: previous.locals[..keep].to_vec(),
                        stack: Vec::new(),
                    },
                )
            }
            SAME_EXTENDED => (
                usize::from(parser.read_be::<u16>()?),
                Frame {
                    locals: previous.locals.clone(),
                    stack: Vec::new(),
                },
            ),
            252..=254 => {
                let delta = parser.read_be::<u16>()?;
                let mut locals = previous.locals.clone();
                for _ in 0..(frame_type - SAME_EXTENDED) {
                    locals.push(VerificationType::read(&mut parser, pool, label_at)?);
                }
                (
                    usize::from(delta),
                    Frame {
                        locals,
                        stack: Vec::new(),
                    },
                )
            }
            FULL => {
                let delta = parser.read_be::<u16>()?;
                let local_count = parser.read_be::<u16>()?;
                let mut locals = Vec::with_capacity(usize::from(local_count));
                for _ in 0..local_count {
                    locals.push(VerificationType::read(&mut parser, pool, label_at)?);
                }
                let stack_count = parser.read_be::<u16>()?;
                let mut stack = Vec::with_capacity(usize::from(stack_count));
                for _ in 0..stack_count {
                    stack.push(VerificationType::read(&mut parser, pool, label_at)?);
                }
                (usize::from(delta), Frame { locals, stack })
            }
            _ => {
                return Err(malformed_error!(
                    "Reserved stack map frame type {}",
                    frame_type
                ))
            }
        };

        let offset = match previous_offset {
            None => delta,
            Some(last) => last + delta + 1,
        };
        previous_offset = Some(offset);
        previous = frame.clone();
        frames.push((offset, frame));
    }

    if parser.has_more_data() {
        return Err(malformed_error!("Trailing bytes after StackMapTable frames"));
    }

    Ok(frames)
}

/// Encodes frames (sorted by offset, one per offset) as a `StackMapTable` payload, choosing
/// the most compact frame type for each.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if offsets are not strictly increasing, and
/// [`crate::Error::LimitExceeded`] if a count does not fit the format.
pub fn encode_stack_map(
    frames: &[(usize, Frame)],
    initial: &Frame,
    pool: &mut ConstantPool,
    offset_of: &dyn Fn(Label) -> Result<usize>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_be(&mut out, to_u16(frames.len(), "stack map frame count")?);

    let mut previous = initial;
    let mut previous_offset: Option<usize> = None;

    for (offset, frame) in frames {
        let delta = match previous_offset {
            None => *offset,
            Some(last) if *offset > last => offset - last - 1,
            Some(last) => {
                return Err(malformed_error!(
                    "Stack map frame at {} does not follow frame at {}",
                    offset,
                    last
                ))
            }
        };
        let delta = to_u16(delta, "stack map offset delta")?;
        let same_locals = frame.locals == previous.locals;
        let local_growth = frame.locals.len().checked_sub(previous.locals.len());
        let local_shrink = previous.locals.len().checked_sub(frame.locals.len());

        if same_locals && frame.stack.is_empty() {
            if delta < 64 {
                write_be(&mut out, delta as u8);
            } else {
                write_be(&mut out, SAME_EXTENDED);
                write_be(&mut out, delta);
            }
        } else if same_locals && frame.stack.len() == 1 {
            if delta < 64 {
                write_be(&mut out, SAME_LOCALS_1_STACK_ITEM + delta as u8);
            } else {
                write_be(&mut out, SAME_LOCALS_1_STACK_ITEM_EXTENDED);
                write_be(&mut out, delta);
            }
            frame.stack[0].write(&mut out, pool, offset_of)?;
        } else if frame.stack.is_empty()
            && matches!(local_growth, Some(1..=3))
            && frame.locals.starts_with(&previous.locals)
        {
            let added = &frame.locals[previous.locals.len()..];
            write_be(&mut out, SAME_EXTENDED + added.len() as u8);
            write_be(&mut out, delta);
            for value in added {
                value.write(&mut out, pool, offset_of)?;
            }
        } else if frame.stack.is_empty()
            && matches!(local_shrink, Some(1..=3))
            && previous.locals.starts_with(&frame.locals)
        {
            let removed = previous.locals.len() - frame.locals.len();
            write_be(&mut out, SAME_EXTENDED - removed as u8);
            write_be(&mut out, delta);
        } else {
            write_be(&mut out, FULL);
            write_be(&mut out, delta);
            write_be(&mut out, to_u16(frame.locals.len(), "frame locals")?);
            for value in &frame.locals {
                value.write(&mut out, pool, offset_of)?;
            }
            write_be(&mut out, to_u16(frame.stack.len(), "frame stack")?);
            for value in &frame.stack {
                value.write(&mut out, pool, offset_of)?;
            }
        }

        previous = frame;
        previous_offset = Some(*offset);
    }

    Ok(out)
}
