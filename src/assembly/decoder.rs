//! `Code` attribute decoding into instruction events.
//!
//! Decoding runs in two passes over the bytecode. The first pass reads every instruction and
//! records branch targets as raw offsets. Once every offset that needs a label is known
//! (branch and switch targets, exception and debug table boundaries, stack map positions and
//! `new` instructions) labels are allocated in offset order and the second pass builds the
//! event list with labels placed in front of the instructions they mark.
//!
//! Every label offset must fall on an instruction boundary (or at the end of the code);
//! anything else is reported as [`crate::Error::Malformed`].

use std::collections::{BTreeMap, HashSet};

use crate::{
    assembly::{
        body::{
            ExceptionHandler, LabelAllocator, LineNumber, LocalVariable, MethodBody,
            MethodContext,
        },
        frames::{decode_stack_map, Frame},
        instruction::{
            ConstantValue, FieldAccessKind, Instruction, InvokeKind, JumpKind, Label, ReturnKind,
            TypeOp, ValueKind,
        },
        opcodes,
    },
    classfile::{
        constant_pool::{Constant, ConstantPool, MemberRefKind},
        member::Attribute,
    },
    file::parser::Parser,
    Result,
};

/// Largest legal `code_length` (JVMS §4.7.3).
pub const MAX_CODE_LENGTH: usize = 65535;

/// An instruction whose branch targets are still raw offsets.
enum Pending {
    Ready(Instruction),
    Jump(JumpKind, usize),
    TableSwitch {
        low: i32,
        high: i32,
        default: usize,
        targets: Vec<usize>,
    },
    LookupSwitch {
        default: usize,
        pairs: Vec<(i32, usize)>,
    },
}

/// Resolves an `ldc`/`ldc_w` (`wide == false`) or `ldc2_w` operand.
fn constant_value(pool: &ConstantPool, index: u16, wide: bool) -> Result<ConstantValue> {
    let value = match pool.get(index)? {
        Constant::Integer(value) => ConstantValue::Int(*value),
        Constant::Float(bits) => ConstantValue::Float(*bits),
        Constant::Long(value) => ConstantValue::Long(*value),
        Constant::Double(bits) => ConstantValue::Double(*bits),
        Constant::String(utf8) => ConstantValue::String(pool.utf8(*utf8)?),
        Constant::Class(utf8) => ConstantValue::Class(pool.utf8(*utf8)?),
        Constant::MethodType(utf8) => ConstantValue::MethodType(pool.utf8(*utf8)?),
        Constant::MethodHandle { .. } => ConstantValue::MethodHandle(index),
        Constant::Dynamic { name_and_type, .. } => ConstantValue::Dynamic {
            index,
            descriptor: pool.name_and_type(*name_and_type)?.1,
        },
        other => {
            return Err(malformed_error!(
                "Constant {} cannot be loaded by ldc: {:?}",
                index,
                other
            ))
        }
    };

    if (value.words() == 2) != wide {
        return Err(malformed_error!(
            "Constant {} has the wrong category for {}",
            index,
            if wide { "ldc2_w" } else { "ldc" }
        ));
    }
    Ok(value)
}

fn branch_target(offset: usize, delta: i32) -> Result<usize> {
    let target = i64::try_from(offset).unwrap_or(i64::MAX) + i64::from(delta);
    usize::try_from(target)
        .map_err(|_| malformed_error!("Branch at {} targets negative offset {}", offset, target))
}

/// Reads one instruction starting at the parser position.
fn decode_instruction(parser: &mut Parser<'_>, pool: &ConstantPool) -> Result<Pending> {
    let offset = parser.pos();
    let opcode = parser.read_be::<u8>()?;

    let instruction = match opcode {
        opcodes::ACONST_NULL => Instruction::LoadConstant(ConstantValue::Null),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            Instruction::LoadConstant(ConstantValue::Int(i32::from(opcode) - 3))
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => {
            Instruction::LoadConstant(ConstantValue::Long(i64::from(opcode - opcodes::LCONST_0)))
        }
        opcodes::FCONST_0..=opcodes::FCONST_2 => Instruction::LoadConstant(ConstantValue::Float(
            f32::from(opcode - opcodes::FCONST_0).to_bits(),
        )),
        opcodes::DCONST_0 | opcodes::DCONST_1 => Instruction::LoadConstant(
            ConstantValue::Double(f64::from(opcode - opcodes::DCONST_0).to_bits()),
        ),
        opcodes::BIPUSH => {
            Instruction::LoadConstant(ConstantValue::Int(i32::from(parser.read_be::<i8>()?)))
        }
        opcodes::SIPUSH => {
            Instruction::LoadConstant(ConstantValue::Int(i32::from(parser.read_be::<i16>()?)))
        }
        opcodes::LDC => Instruction::LoadConstant(constant_value(
            pool,
            u16::from(parser.read_be::<u8>()?),
            false,
        )?),
        opcodes::LDC_W => {
            Instruction::LoadConstant(constant_value(pool, parser.read_be()?, false)?)
        }
        opcodes::LDC2_W => {
            Instruction::LoadConstant(constant_value(pool, parser.read_be()?, true)?)
        }
        opcodes::ILOAD..=opcodes::ALOAD => Instruction::LoadLocal(
            ValueKind::from_offset(opcode - opcodes::ILOAD),
            u16::from(parser.read_be::<u8>()?),
        ),
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = opcode - opcodes::ILOAD_0;
            Instruction::LoadLocal(ValueKind::from_offset(relative / 4), u16::from(relative % 4))
        }
        opcodes::ISTORE..=opcodes::ASTORE => Instruction::StoreLocal(
            ValueKind::from_offset(opcode - opcodes::ISTORE),
            u16::from(parser.read_be::<u8>()?),
        ),
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let relative = opcode - opcodes::ISTORE_0;
            Instruction::StoreLocal(ValueKind::from_offset(relative / 4), u16::from(relative % 4))
        }
        opcodes::IINC => Instruction::Increment {
            slot: u16::from(parser.read_be::<u8>()?),
            delta: i16::from(parser.read_be::<i8>()?),
        },
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let delta = i32::from(parser.read_be::<i16>()?);
            let Some(kind) = JumpKind::from_opcode(opcode) else {
                return Err(malformed_error!("Invalid jump opcode 0x{:02X}", opcode));
            };
            return Ok(Pending::Jump(kind, branch_target(offset, delta)?));
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let delta = parser.read_be::<i32>()?;
            let kind = if opcode == opcodes::GOTO_W {
                JumpKind::Goto
            } else {
                JumpKind::Jsr
            };
            return Ok(Pending::Jump(kind, branch_target(offset, delta)?));
        }
        opcodes::RET => Instruction::Ret(u16::from(parser.read_be::<u8>()?)),
        opcodes::TABLESWITCH => {
            parser.align_from(0, 4)?;
            let default = branch_target(offset, parser.read_be()?)?;
            let low = parser.read_be::<i32>()?;
            let high = parser.read_be::<i32>()?;
            if low > high {
                return Err(malformed_error!(
                    "tableswitch at {} has low {} > high {}",
                    offset,
                    low,
                    high
                ));
            }
            let count = usize::try_from(i64::from(high) - i64::from(low) + 1)
                .map_err(|_| malformed_error!("tableswitch at {} is too large", offset))?;
            parser.ensure_remaining(count.saturating_mul(4))?;
            let targets = (0..count)
                .map(|_| branch_target(offset, parser.read_be()?))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Pending::TableSwitch {
                low,
                high,
                default,
                targets,
            });
        }
        opcodes::LOOKUPSWITCH => {
            parser.align_from(0, 4)?;
            let default = branch_target(offset, parser.read_be()?)?;
            let count = parser.read_be::<i32>()?;
            let count = usize::try_from(count).map_err(|_| {
                malformed_error!("lookupswitch at {} has negative pair count", offset)
            })?;
            parser.ensure_remaining(count.saturating_mul(8))?;
            let mut pairs = Vec::with_capacity(count);
            for _ in 0..count {
                let key = parser.read_be::<i32>()?;
                let target = branch_target(offset, parser.read_be()?)?;
                if pairs.last().is_some_and(|(last, _)| *last >= key) {
                    return Err(malformed_error!(
                        "lookupswitch at {} keys are not sorted",
                        offset
                    ));
                }
                pairs.push((key, target));
            }
            return Ok(Pending::LookupSwitch { default, pairs });
        }
        opcodes::IRETURN..=opcodes::RETURN => match ReturnKind::from_opcode(opcode) {
            Some(kind) => Instruction::Return(kind),
            None => return Err(malformed_error!("Invalid return opcode 0x{:02X}", opcode)),
        },
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let member = pool.member_ref(parser.read_be()?)?;
            if member.kind != MemberRefKind::Field {
                return Err(malformed_error!(
                    "Field instruction at {} references a method",
                    offset
                ));
            }
            let kind = match opcode {
                opcodes::GETSTATIC => FieldAccessKind::GetStatic,
                opcodes::PUTSTATIC => FieldAccessKind::PutStatic,
                opcodes::GETFIELD => FieldAccessKind::GetField,
                _ => FieldAccessKind::PutField,
            };
            Instruction::FieldAccess {
                kind,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
            }
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let member = pool.member_ref(parser.read_be()?)?;
            let kind = match opcode {
                opcodes::INVOKEVIRTUAL => InvokeKind::Virtual,
                opcodes::INVOKESPECIAL => InvokeKind::Special,
                opcodes::INVOKESTATIC => InvokeKind::Static,
                _ => {
                    // count and a reserved zero byte
                    parser.advance_by(2)?;
                    InvokeKind::Interface
                }
            };
            let interface = match member.kind {
                MemberRefKind::Field => {
                    return Err(malformed_error!(
                        "Invoke instruction at {} references a field",
                        offset
                    ))
                }
                MemberRefKind::Method if kind == InvokeKind::Interface => {
                    return Err(malformed_error!(
                        "invokeinterface at {} references a class method",
                        offset
                    ))
                }
                MemberRefKind::Method => false,
                MemberRefKind::InterfaceMethod => true,
            };
            Instruction::MethodCall {
                kind,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
                interface,
            }
        }
        opcodes::INVOKEDYNAMIC => {
            let index = parser.read_be::<u16>()?;
            parser.advance_by(2)?;
            let Constant::InvokeDynamic { name_and_type, .. } = pool.get(index)? else {
                return Err(malformed_error!(
                    "invokedynamic at {} does not reference an InvokeDynamic constant",
                    offset
                ));
            };
            let (name, descriptor) = pool.name_and_type(*name_and_type)?;
            Instruction::InvokeDynamic {
                index,
                name,
                descriptor,
            }
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            let class = pool.class_name(parser.read_be()?)?;
            let op = match opcode {
                opcodes::NEW => TypeOp::New,
                opcodes::ANEWARRAY => TypeOp::ANewArray,
                opcodes::CHECKCAST => TypeOp::CheckCast,
                _ => TypeOp::InstanceOf,
            };
            Instruction::Type(op, class)
        }
        opcodes::NEWARRAY => {
            let atype = parser.read_be::<u8>()?;
            if !(4..=11).contains(&atype) {
                return Err(malformed_error!(
                    "newarray at {} has invalid type {}",
                    offset,
                    atype
                ));
            }
            Instruction::NewArray(atype)
        }
        opcodes::WIDE => {
            let modified = parser.read_be::<u8>()?;
            match modified {
                opcodes::ILOAD..=opcodes::ALOAD => Instruction::LoadLocal(
                    ValueKind::from_offset(modified - opcodes::ILOAD),
                    parser.read_be()?,
                ),
                opcodes::ISTORE..=opcodes::ASTORE => Instruction::StoreLocal(
                    ValueKind::from_offset(modified - opcodes::ISTORE),
                    parser.read_be()?,
                ),
                opcodes::RET => Instruction::Ret(parser.read_be()?),
                opcodes::IINC => Instruction::Increment {
                    slot: parser.read_be()?,
                    delta: parser.read_be()?,
                },
                _ => {
                    return Err(malformed_error!(
                        "wide at {} modifies invalid opcode 0x{:02X}",
                        offset,
                        modified
                    ))
                }
            }
        }
        opcodes::MULTIANEWARRAY => {
            let class = pool.class_name(parser.read_be()?)?;
            let dimensions = parser.read_be::<u8>()?;
            if dimensions == 0 {
                return Err(malformed_error!(
                    "multianewarray at {} has zero dimensions",
                    offset
                ));
            }
            Instruction::MultiANewArray { class, dimensions }
        }
        opcodes::NOP
        | opcodes::IALOAD..=opcodes::SALOAD
        | opcodes::IASTORE..=opcodes::LXOR
        | opcodes::I2L..=opcodes::DCMPG
        | opcodes::ARRAYLENGTH
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => Instruction::Raw(opcode),
        _ => {
            return Err(malformed_error!(
                "Invalid opcode 0x{:02X} at offset {}",
                opcode,
                offset
            ))
        }
    };

    Ok(Pending::Ready(instruction))
}

/// Assigns labels to bytecode offsets, in ascending offset order once finalized.
struct LabelMap {
    offsets: BTreeMap<usize, Option<Label>>,
}

impl LabelMap {
    fn new() -> Self {
        LabelMap {
            offsets: BTreeMap::new(),
        }
    }

    fn mark(&mut self, offset: usize) {
        self.offsets.entry(offset).or_insert(None);
    }

    /// Allocates labels in offset order and validates every offset.
    fn finalize(
        &mut self,
        allocator: &mut LabelAllocator,
        boundaries: &HashSet<usize>,
        code_length: usize,
    ) -> Result<()> {
        for (offset, label) in &mut self.offsets {
            if *offset != code_length && !boundaries.contains(offset) {
                return Err(malformed_error!(
                    "Offset {} is not an instruction boundary",
                    offset
                ));
            }
            *label = Some(allocator.allocate());
        }
        Ok(())
    }

    fn get(&self, offset: usize) -> Result<Label> {
        match self.offsets.get(&offset) {
            Some(Some(label)) => Ok(*label),
            _ => Err(malformed_error!("No label at offset {}", offset)),
        }
    }
}

struct RawTables {
    exceptions: Vec<(usize, usize, usize, u16)>,
    lines: Vec<(usize, u16)>,
    variables: Vec<(usize, usize, u16, u16, u16)>,
    variable_types: Vec<(usize, usize, u16, u16, u16)>,
    stack_map: Option<Vec<u8>>,
    attributes: Vec<Attribute>,
}

fn read_local_variables(data: &[u8]) -> Result<Vec<(usize, usize, u16, u16, u16)>> {
    let mut parser = Parser::new(data);
    let count = parser.read_be::<u16>()?;
    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let start = usize::from(parser.read_be::<u16>()?);
        let length = usize::from(parser.read_be::<u16>()?);
        entries.push((
            start,
            start + length,
            parser.read_be()?,
            parser.read_be()?,
            parser.read_be()?,
        ));
    }
    Ok(entries)
}

fn read_line_numbers(data: &[u8]) -> Result<Vec<(usize, u16)>> {
    let mut parser = Parser::new(data);
    let count = parser.read_be::<u16>()?;
    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        entries.push((usize::from(parser.read_be::<u16>()?), parser.read_be()?));
    }
    Ok(entries)
}

/// Decodes a `Code` attribute payload into a [`MethodBody`].
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for invalid opcodes or operands, branch targets that
/// are not instruction boundaries, and inconsistent tables; [`crate::Error::OutOfBounds`]
/// for truncated data.
pub fn decode_code(
    data: &[u8],
    pool: &ConstantPool,
    method: &MethodContext,
) -> Result<MethodBody> {
    let mut parser = Parser::new(data);
    let max_stack = parser.read_be::<u16>()?;
    let max_locals = parser.read_be::<u16>()?;
    let code = parser.read_u32_prefixed()?;
    if code.is_empty() || code.len() > MAX_CODE_LENGTH {
        return Err(malformed_error!(
            "Invalid code length {} in {}.{}",
            code.len(),
            method.class_name,
            method.method_name
        ));
    }

    // Pass 1: instructions with raw offsets
    let mut pending = Vec::new();
    let mut boundaries = HashSet::new();
    let mut labels = LabelMap::new();
    let mut code_parser = Parser::new(code);
    while code_parser.has_more_data() {
        let offset = code_parser.pos();
        boundaries.insert(offset);
        let instruction = decode_instruction(&mut code_parser, pool)?;
        match &instruction {
            Pending::Jump(_, target) => labels.mark(*target),
            Pending::TableSwitch {
                default, targets, ..
            } => {
                labels.mark(*default);
                targets.iter().for_each(|target| labels.mark(*target));
            }
            Pending::LookupSwitch { default, pairs } => {
                labels.mark(*default);
                pairs.iter().for_each(|(_, target)| labels.mark(*target));
            }
            Pending::Ready(Instruction::Type(TypeOp::New, _)) => labels.mark(offset),
            Pending::Ready(_) => {}
        }
        pending.push((offset, instruction));
    }

    // Exception table and code attributes
    let mut tables = RawTables {
        exceptions: Vec::new(),
        lines: Vec::new(),
        variables: Vec::new(),
        variable_types: Vec::new(),
        stack_map: None,
        attributes: Vec::new(),
    };
    let exception_count = parser.read_be::<u16>()?;
    for _ in 0..exception_count {
        let start = usize::from(parser.read_be::<u16>()?);
        let end = usize::from(parser.read_be::<u16>()?);
        let handler = usize::from(parser.read_be::<u16>()?);
        let catch_type = parser.read_be::<u16>()?;
        if start >= end || end > code.len() || handler >= code.len() {
            return Err(malformed_error!(
                "Invalid exception range {}..{} -> {}",
                start,
                end,
                handler
            ));
        }
        tables.exceptions.push((start, end, handler, catch_type));
    }

    for attribute in Attribute::read_list(&mut parser)? {
        match attribute.name(pool)?.as_str() {
            "LineNumberTable" => tables.lines.extend(read_line_numbers(&attribute.info)?),
            "LocalVariableTable" => tables
                .variables
                .extend(read_local_variables(&attribute.info)?),
            "LocalVariableTypeTable" => tables
                .variable_types
                .extend(read_local_variables(&attribute.info)?),
            "StackMapTable" => tables.stack_map = Some(attribute.info),
            _ => tables.attributes.push(attribute),
        }
    }

    if parser.has_more_data() {
        return Err(malformed_error!(
            "Trailing bytes after Code attribute of {}.{}",
            method.class_name,
            method.method_name
        ));
    }

    for (start, end, handler, _) in &tables.exceptions {
        labels.mark(*start);
        labels.mark(*end);
        labels.mark(*handler);
    }
    for (start, _) in &tables.lines {
        labels.mark(*start);
    }
    for (start, end, ..) in tables.variables.iter().chain(&tables.variable_types) {
        if *end > code.len() {
            return Err(malformed_error!(
                "Local variable range {}..{} exceeds code",
                start,
                end
            ));
        }
        labels.mark(*start);
        labels.mark(*end);
    }

    // Stack map offsets (including uninitialized types) are discovered while decoding, so the
    // frames are decoded against provisional labels and remapped after allocation.
    let initial = Frame::entry(
        &method.class_name,
        &method.method_name,
        &method.descriptor,
        method.is_static,
    )?;
    let raw_frames = match &tables.stack_map {
        Some(data) => {
            let mut provisional = Vec::new();
            let frames = decode_stack_map(data, pool, &initial, &mut |offset| {
                provisional.push(offset);
                Label(u32::try_from(provisional.len() - 1).unwrap_or(u32::MAX))
            })?;
            for (offset, _) in &frames {
                labels.mark(*offset);
            }
            for offset in &provisional {
                labels.mark(*offset);
            }
            Some((frames, provisional))
        }
        None => None,
    };

    let mut allocator = LabelAllocator::new();
    labels.finalize(&mut allocator, &boundaries, code.len())?;

    // Pass 2: events
    let mut instructions = Vec::with_capacity(pending.len() + labels.offsets.len());
    for (offset, instruction) in pending {
        if let Some(Some(label)) = labels.offsets.get(&offset) {
            instructions.push(Instruction::Label(*label));
        }
        instructions.push(match instruction {
            Pending::Ready(instruction) => instruction,
            Pending::Jump(kind, target) => Instruction::Jump(kind, labels.get(target)?),
            Pending::TableSwitch {
                low,
                high,
                default,
                targets,
            } => Instruction::TableSwitch {
                low,
                high,
                default: labels.get(default)?,
                targets: targets
                    .into_iter()
                    .map(|target| labels.get(target))
                    .collect::<Result<_>>()?,
            },
            Pending::LookupSwitch { default, pairs } => Instruction::LookupSwitch {
                default: labels.get(default)?,
                pairs: pairs
                    .into_iter()
                    .map(|(key, target)| -> Result<(i32, Label)> {
                        Ok((key, labels.get(target)?))
                    })
                    .collect::<Result<_>>()?,
            },
        });
    }
    if let Some(Some(label)) = labels.offsets.get(&code.len()) {
        instructions.push(Instruction::Label(*label));
    }

    let exception_handlers = tables
        .exceptions
        .iter()
        .map(|(start, end, handler, catch_type)| -> Result<ExceptionHandler> {
            Ok(ExceptionHandler {
                start: labels.get(*start)?,
                end: labels.get(*end)?,
                handler: labels.get(*handler)?,
                catch_type: match catch_type {
                    0 => None,
                    index => Some(pool.class_name(*index)?),
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let line_numbers = tables
        .lines
        .iter()
        .map(|(start, line)| -> Result<LineNumber> {
            Ok(LineNumber {
                start: labels.get(*start)?,
                line: *line,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let to_variable = |entry: &(usize, usize, u16, u16, u16)| -> Result<LocalVariable> {
        let (start, end, name_index, descriptor_index, slot) = entry;
        Ok(LocalVariable {
            start: labels.get(*start)?,
            end: labels.get(*end)?,
            name_index: *name_index,
            descriptor_index: *descriptor_index,
            slot: *slot,
        })
    };
    let local_variables = tables
        .variables
        .iter()
        .map(to_variable)
        .collect::<Result<Vec<_>>>()?;
    let local_variable_types = tables
        .variable_types
        .iter()
        .map(to_variable)
        .collect::<Result<Vec<_>>>()?;

    let frames = match raw_frames {
        Some((frames, provisional)) => frames
            .into_iter()
            .map(|(offset, frame)| -> Result<(Label, Frame)> {
                Ok((
                    labels.get(offset)?,
                    remap_uninitialized(frame, &provisional, &labels)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(MethodBody {
        max_stack,
        max_locals,
        instructions,
        exception_handlers,
        line_numbers,
        local_variables,
        local_variable_types,
        frames,
        attributes: tables.attributes,
        labels: allocator,
    })
}

/// Replaces provisional `Uninitialized` labels (indices into `provisional`) with real ones.
fn remap_uninitialized(frame: Frame, provisional: &[usize], labels: &LabelMap) -> Result<Frame> {
    use crate::assembly::frames::VerificationType;

    let remap = |value: VerificationType| -> Result<VerificationType> {
        match value {
            VerificationType::Uninitialized(Label(index)) => {
                let offset = provisional
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| malformed_error!("Unknown uninitialized offset"))?;
                Ok(VerificationType::Uninitialized(labels.get(offset)?))
            }
            other => Ok(other),
        }
    };

    Ok(Frame {
        locals: frame
            .locals
            .into_iter()
            .map(remap)
            .collect::<Result<_>>()?,
        stack: frame.stack.into_iter().map(remap).collect::<Result<_>>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn context() -> MethodContext {
        MethodContext {
            class_name: "Test".to_string(),
            method_name: "run".to_string(),
            descriptor: "(I)I".to_string(),
            is_static: true,
            major_version: 52,
        }
    }

    fn code_attribute(max_stack: u16, max_locals: u16, code: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&max_stack.to_be_bytes());
        data.extend_from_slice(&max_locals.to_be_bytes());
        data.extend_from_slice(&(code.len() as u32).to_be_bytes());
        data.extend_from_slice(code);
        data.extend_from_slice(&[0, 0, 0, 0]);
        data
    }

    #[test]
    fn branches_get_labels() {
        // iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
        let code = [0x1A, 0x99, 0x00, 0x05, 0x04, 0xAC, 0x03, 0xAC];
        let pool = ConstantPool::default();
        let body = decode_code(&code_attribute(1, 1, &code), &pool, &context()).unwrap();

        assert_eq!(body.max_stack, 1);
        assert_eq!(
            body.instructions,
            vec![
                Instruction::LoadLocal(ValueKind::Int, 0),
                Instruction::Jump(JumpKind::IfEq, Label(0)),
                Instruction::LoadConstant(ConstantValue::Int(1)),
                Instruction::Return(ReturnKind::Int),
                Instruction::Label(Label(0)),
                Instruction::LoadConstant(ConstantValue::Int(0)),
                Instruction::Return(ReturnKind::Int),
            ]
        );
        assert_eq!(body.labels.allocated(), 1);
    }

    #[test]
    fn branch_into_operand_is_malformed() {
        // ifeq +2 lands inside its own operand
        let code = [0x1A, 0x99, 0x00, 0x02, 0xAC];
        let pool = ConstantPool::default();
        assert!(matches!(
            decode_code(&code_attribute(1, 1, &code), &pool, &context()),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn invalid_opcode() {
        let pool = ConstantPool::default();
        assert!(decode_code(&code_attribute(0, 1, &[0xCA]), &pool, &context()).is_err());
    }

    #[test]
    fn truncated_operand() {
        let pool = ConstantPool::default();
        assert!(matches!(
            decode_code(&code_attribute(0, 1, &[0x11, 0x00]), &pool, &context()),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn wide_and_switch() {
        // wide iinc 300 by -2; iload_0; tableswitch 0..=1 (no padding at offset 7)
        let mut code = vec![0xC4, 0x84, 0x01, 0x2C, 0xFF, 0xFE, 0x1A, 0xAA];
        code.extend_from_slice(&[0, 0, 0, 21]); // default -> 28
        code.extend_from_slice(&[0, 0, 0, 0]); // low
        code.extend_from_slice(&[0, 0, 0, 1]); // high
        code.extend_from_slice(&[0, 0, 0, 21]); // 0 -> 28
        code.extend_from_slice(&[0, 0, 0, 22]); // 1 -> 29
        code.extend_from_slice(&[0x03, 0xAC]);

        let pool = ConstantPool::default();
        let body = decode_code(&code_attribute(1, 301, &code), &pool, &context()).unwrap();
        assert_eq!(
            body.instructions[0],
            Instruction::Increment {
                slot: 300,
                delta: -2
            }
        );
        assert!(matches!(
            &body.instructions[2],
            Instruction::TableSwitch { low: 0, high: 1, targets, .. } if targets.len() == 2
        ));
        assert_eq!(body.labels.allocated(), 2);
    }

    #[test]
    fn trailing_bytes_after_code() {
        let mut data = code_attribute(0, 0, &[0xB1]);
        data.push(0);
        let pool = ConstantPool::default();
        assert!(decode_code(&data, &pool, &context()).is_err());
    }
}
