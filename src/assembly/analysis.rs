//! Forward type-flow analysis over an instruction event list.
//!
//! The analysis computes, for every event, the verification types of the locals and the
//! operand stack on entry (or `None` if the event is unreachable). The results drive the three
//! pieces of metadata the encoder has to regenerate for a rewritten method: which events are
//! dead, the `max_stack`/`max_locals` bounds and the `StackMapTable`.
//!
//! Stack map frames decoded from the original method act as authoritative hints: when control
//! reaches a label that carried a frame, the frame is taken as the state there instead of the
//! merge of the incoming states. This keeps declared types (interfaces, common supertypes) the
//! analysis could not infer without loading classes. Where no hint exists, differing reference
//! types merge to `java/lang/Object` and other differing types to `Top`.
//!
//! Values are tracked in slot form: `long` and `double` occupy two entries, the second `Top`.

use std::collections::HashMap;

use crate::{
    assembly::{
        body::{ExceptionHandler, MethodContext},
        frames::{from_slots, to_slots, Frame, VerificationType},
        instruction::{ConstantValue, FieldAccessKind, Instruction, InvokeKind, JumpKind, Label},
        instruction::{TypeOp, ValueKind},
        opcodes,
    },
    classfile::descriptor::{FieldType, MethodDescriptor},
    Error, Result,
};

const OBJECT: &str = "java/lang/Object";

/// The verification state on entry to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowState {
    /// Local types by slot
    pub locals: Vec<VerificationType>,
    /// Operand stack types by word, bottom first
    pub stack: Vec<VerificationType>,
}

impl FlowState {
    fn from_frame(frame: &Frame) -> FlowState {
        FlowState {
            locals: to_slots(&frame.locals),
            stack: to_slots(&frame.stack),
        }
    }

    /// Converts the state back into declared stack map form.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame {
            locals: from_slots(&self.locals, true),
            stack: from_slots(&self.stack, false),
        }
    }

    fn push(&mut self, value: VerificationType) {
        let wide = value.is_wide();
        self.stack.push(value);
        if wide {
            self.stack.push(VerificationType::Top);
        }
    }

    fn pop_words(&mut self, words: usize) -> Result<Vec<VerificationType>> {
        if self.stack.len() < words {
            return Err(malformed_error!(
                "Operand stack underflow: need {} words, have {}",
                words,
                self.stack.len()
            ));
        }
        Ok(self.stack.split_off(self.stack.len() - words))
    }

    /// Pops `words` words and returns the type of the value that started at the lowest one.
    fn pop_value(&mut self, words: usize) -> Result<VerificationType> {
        let mut popped = self.pop_words(words)?;
        Ok(if popped.is_empty() {
            VerificationType::Top
        } else {
            popped.swap_remove(0)
        })
    }

    fn set_local(&mut self, slot: u16, value: VerificationType) {
        let slot = usize::from(slot);
        let wide = value.is_wide();
        let needed = slot + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VerificationType::Top);
        }
        if slot > 0 && self.locals[slot - 1].is_wide() {
            self.locals[slot - 1] = VerificationType::Top;
        }
        self.locals[slot] = value;
        if wide {
            self.locals[slot + 1] = VerificationType::Top;
        }
    }

    fn replace_all(&mut self, from: &VerificationType, to: &VerificationType) {
        for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if value == from {
                *value = to.clone();
            }
        }
    }
}

/// Merges two types at a control flow join.
fn merge_type(existing: &VerificationType, incoming: &VerificationType) -> VerificationType {
    use VerificationType as V;

    match (existing, incoming) {
        (a, b) if a == b => a.clone(),
        (V::Null, V::Object(name)) | (V::Object(name), V::Null) => V::Object(name.clone()),
        (V::Object(_), V::Object(_)) => V::Object(OBJECT.to_string()),
        _ => V::Top,
    }
}

/// Merges `incoming` into `existing`, returning whether `existing` changed.
fn merge_state(existing: &mut FlowState, incoming: &FlowState, index: usize) -> Result<bool> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(malformed_error!(
            "Stack height mismatch at event {}: {} vs {}",
            index,
            existing.stack.len(),
            incoming.stack.len()
        ));
    }

    let mut changed = false;
    for (slot, value) in existing.stack.iter_mut().enumerate() {
        let merged = merge_type(value, &incoming.stack[slot]);
        if merged == VerificationType::Top && *value != VerificationType::Top {
            return Err(malformed_error!(
                "Incompatible stack types at event {}: {:?} vs {:?}",
                index,
                value,
                incoming.stack[slot]
            ));
        }
        if merged != *value {
            *value = merged;
            changed = true;
        }
    }

    let length = existing.locals.len().max(incoming.locals.len());
    for slot in 0..length {
        let current = existing
            .locals
            .get(slot)
            .cloned()
            .unwrap_or(VerificationType::Top);
        let other = incoming
            .locals
            .get(slot)
            .cloned()
            .unwrap_or(VerificationType::Top);
        let merged = merge_type(&current, &other);
        if merged != current {
            if existing.locals.len() <= slot {
                existing.locals.resize(slot + 1, VerificationType::Top);
            }
            existing.locals[slot] = merged;
            changed = true;
        }
    }

    Ok(changed)
}

fn array_of(element: &str) -> String {
    if element.starts_with('[') {
        format!("[{element}")
    } else {
        format!("[L{element};")
    }
}

fn element_of(array: &VerificationType) -> VerificationType {
    match array {
        VerificationType::Null => VerificationType::Null,
        VerificationType::Object(descriptor) => match descriptor.strip_prefix('[') {
            Some(element) if element.starts_with('[') => {
                VerificationType::Object(element.to_string())
            }
            Some(element) => match FieldType::parse(element) {
                Ok(field_type) => VerificationType::from_field_type(&field_type),
                Err(_) => VerificationType::Object(OBJECT.to_string()),
            },
            None => VerificationType::Object(OBJECT.to_string()),
        },
        _ => VerificationType::Object(OBJECT.to_string()),
    }
}

fn constant_type(value: &ConstantValue) -> Result<VerificationType> {
    Ok(match value {
        ConstantValue::Null => VerificationType::Null,
        ConstantValue::Int(_) => VerificationType::Integer,
        ConstantValue::Long(_) => VerificationType::Long,
        ConstantValue::Float(_) => VerificationType::Float,
        ConstantValue::Double(_) => VerificationType::Double,
        ConstantValue::String(_) => VerificationType::Object("java/lang/String".to_string()),
        ConstantValue::Class(_) => VerificationType::Object("java/lang/Class".to_string()),
        ConstantValue::MethodType(_) => {
            VerificationType::Object("java/lang/invoke/MethodType".to_string())
        }
        ConstantValue::MethodHandle(_) => {
            VerificationType::Object("java/lang/invoke/MethodHandle".to_string())
        }
        ConstantValue::Dynamic { descriptor, .. } => {
            VerificationType::from_field_type(&FieldType::parse(descriptor)?)
        }
    })
}

/// Stack effect of an operand-less opcode: words popped and the value pushed.
fn raw_effect(opcode: u8) -> Option<(usize, Option<VerificationType>)> {
    use VerificationType as V;

    let typed = |offset: u8| match offset % 4 {
        0 => V::Integer,
        1 => V::Long,
        2 => V::Float,
        _ => V::Double,
    };
    let words = |value: &V| if value.is_wide() { 2 } else { 1 };

    Some(match opcode {
        opcodes::NOP => (0, None),
        opcodes::IALOAD | opcodes::BALOAD | opcodes::CALOAD | opcodes::SALOAD => {
            (2, Some(V::Integer))
        }
        opcodes::LALOAD => (2, Some(V::Long)),
        opcodes::FALOAD => (2, Some(V::Float)),
        opcodes::DALOAD => (2, Some(V::Double)),
        opcodes::LASTORE | opcodes::DASTORE => (4, None),
        opcodes::IASTORE..=opcodes::SASTORE => (3, None),
        opcodes::POP | opcodes::MONITORENTER | opcodes::MONITOREXIT | opcodes::ATHROW => {
            (1, None)
        }
        opcodes::POP2 => (2, None),
        opcodes::IADD..=opcodes::DREM => {
            let value = typed(opcode - opcodes::IADD);
            (2 * words(&value), Some(value))
        }
        opcodes::INEG..=opcodes::DNEG => {
            let value = typed(opcode - opcodes::INEG);
            (words(&value), Some(value))
        }
        opcodes::ISHL | opcodes::ISHR | opcodes::IUSHR => (2, Some(V::Integer)),
        opcodes::LSHL | opcodes::LSHR | opcodes::LUSHR => (3, Some(V::Long)),
        opcodes::IAND | opcodes::IOR | opcodes::IXOR => (2, Some(V::Integer)),
        opcodes::LAND | opcodes::LOR | opcodes::LXOR => (4, Some(V::Long)),
        opcodes::I2L => (1, Some(V::Long)),
        opcodes::I2F => (1, Some(V::Float)),
        opcodes::I2D => (1, Some(V::Double)),
        opcodes::L2I => (2, Some(V::Integer)),
        opcodes::L2F => (2, Some(V::Float)),
        opcodes::L2D => (2, Some(V::Double)),
        opcodes::F2I => (1, Some(V::Integer)),
        opcodes::F2L => (1, Some(V::Long)),
        opcodes::F2D => (1, Some(V::Double)),
        opcodes::D2I => (2, Some(V::Integer)),
        opcodes::D2L => (2, Some(V::Long)),
        opcodes::D2F => (2, Some(V::Float)),
        opcodes::I2B | opcodes::I2C | opcodes::I2S => (1, Some(V::Integer)),
        opcodes::LCMP | opcodes::DCMPL | opcodes::DCMPG => (4, Some(V::Integer)),
        opcodes::FCMPL | opcodes::FCMPG => (2, Some(V::Integer)),
        opcodes::ARRAYLENGTH => (1, Some(V::Integer)),
        _ => return None,
    })
}

/// Duplicates the top `count` words and inserts them `depth` words further down.
fn duplicate(state: &mut FlowState, count: usize, depth: usize) -> Result<()> {
    let length = state.stack.len();
    if length < count + depth {
        return Err(malformed_error!(
            "Operand stack underflow in dup: need {} words, have {}",
            count + depth,
            length
        ));
    }
    let copied = state.stack[length - count..].to_vec();
    let position = length - count - depth;
    state.stack.splice(position..position, copied);
    Ok(())
}

fn descriptor_words(descriptor: &str) -> Result<usize> {
    Ok(usize::from(FieldType::parse(descriptor)?.slots()))
}

/// Results of [`analyze`].
#[derive(Debug)]
pub struct Analysis {
    states: Vec<Option<FlowState>>,
    /// Largest operand stack size in words
    pub max_stack: u16,
    /// Largest local slot touched plus one, never below the declared value
    pub max_locals: u16,
}

impl Analysis {
    /// State on entry to the event at `index`, `None` if it is unreachable.
    #[must_use]
    pub fn state(&self, index: usize) -> Option<&FlowState> {
        self.states.get(index).and_then(Option::as_ref)
    }

    /// Whether the event at `index` can execute.
    #[must_use]
    pub fn is_reachable(&self, index: usize) -> bool {
        self.state(index).is_some()
    }
}

struct Flow<'a> {
    instructions: &'a [Instruction],
    method: &'a MethodContext,
    run_start: Vec<usize>,
    labels: HashMap<Label, usize>,
    hints: HashMap<usize, FlowState>,
    states: Vec<Option<FlowState>>,
    pending: Vec<usize>,
    queued: Vec<bool>,
    max_stack: usize,
}

impl Flow<'_> {
    fn target(&self, label: Label) -> Result<usize> {
        self.labels
            .get(&label)
            .map(|index| self.run_start[*index])
            .ok_or(Error::UndefinedLabel(label.id()))
    }

    fn flow_to(&mut self, index: usize, incoming: &FlowState) -> Result<()> {
        if index >= self.instructions.len() {
            return Err(malformed_error!(
                "Control falls off the end of {}.{}",
                self.method.class_name,
                self.method.method_name
            ));
        }

        self.max_stack = self.max_stack.max(incoming.stack.len());

        let changed = if let Some(hint) = self.hints.get(&index) {
            if hint.stack.len() != incoming.stack.len() {
                return Err(malformed_error!(
                    "Stack height {} does not match the declared frame ({}) at event {}",
                    incoming.stack.len(),
                    hint.stack.len(),
                    index
                ));
            }
            if self.states[index].is_none() {
                self.states[index] = Some(hint.clone());
                true
            } else {
                false
            }
        } else {
            match &mut self.states[index] {
                Some(existing) => merge_state(existing, incoming, index)?,
                slot @ None => {
                    *slot = Some(incoming.clone());
                    true
                }
            }
        };

        if changed && !self.queued[index] {
            self.queued[index] = true;
            self.pending.push(index);
        }
        Ok(())
    }

    /// Applies the event at `index` to `state`, returning the jump targets it transfers to
    /// (with the state on arrival) and whether control falls through.
    fn execute(
        &self,
        index: usize,
        state: &mut FlowState,
    ) -> Result<(Vec<(usize, FlowState)>, bool)> {
        use VerificationType as V;

        let mut targets = Vec::new();
        let instruction = &self.instructions[index];

        match instruction {
            Instruction::Label(_) => {}
            Instruction::LoadConstant(value) => state.push(constant_type(value)?),
            Instruction::LoadLocal(kind, slot) => {
                let value = match kind {
                    ValueKind::Int => V::Integer,
                    ValueKind::Long => V::Long,
                    ValueKind::Float => V::Float,
                    ValueKind::Double => V::Double,
                    ValueKind::Reference => match state.locals.get(usize::from(*slot)) {
                        Some(value) if value.is_reference() => value.clone(),
                        _ => V::Object(OBJECT.to_string()),
                    },
                };
                state.push(value);
            }
            Instruction::StoreLocal(kind, slot) => {
                let value = state.pop_value(usize::from(kind.slots()))?;
                let value = match kind {
                    ValueKind::Int => V::Integer,
                    ValueKind::Long => V::Long,
                    ValueKind::Float => V::Float,
                    ValueKind::Double => V::Double,
                    ValueKind::Reference => value,
                };
                state.set_local(*slot, value);
            }
            Instruction::Increment { slot, .. } => state.set_local(*slot, V::Integer),
            Instruction::Jump(JumpKind::Jsr, label) => {
                let mut subroutine = state.clone();
                subroutine.push(V::Top);
                targets.push((self.target(*label)?, subroutine));
            }
            Instruction::Jump(kind, label) => {
                state.pop_words(kind.operand_words())?;
                targets.push((self.target(*label)?, state.clone()));
            }
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => {
                state.pop_words(1)?;
                for label in instruction.branch_targets() {
                    targets.push((self.target(label)?, state.clone()));
                }
            }
            Instruction::FieldAccess {
                kind, descriptor, ..
            } => {
                let field_type = FieldType::parse(descriptor)?;
                let words = usize::from(field_type.slots());
                match kind {
                    FieldAccessKind::GetStatic => {
                        state.push(V::from_field_type(&field_type));
                    }
                    FieldAccessKind::PutStatic => {
                        state.pop_words(words)?;
                    }
                    FieldAccessKind::GetField => {
                        state.pop_words(1)?;
                        state.push(V::from_field_type(&field_type));
                    }
                    FieldAccessKind::PutField => {
                        state.pop_words(words + 1)?;
                    }
                }
            }
            Instruction::MethodCall {
                kind,
                owner,
                name,
                descriptor,
                ..
            } => {
                let parsed = MethodDescriptor::parse(descriptor)?;
                state.pop_words(usize::from(parsed.parameter_slots()))?;
                if *kind != InvokeKind::Static {
                    let receiver = state.pop_value(1)?;
                    if *kind == InvokeKind::Special && name == "<init>" {
                        let initialized = match &receiver {
                            V::UninitializedThis => V::Object(self.method.class_name.clone()),
                            V::Uninitialized(label) => {
                                V::Object(self.new_class(*label).unwrap_or(owner).to_string())
                            }
                            _ => V::Top,
                        };
                        if initialized != V::Top {
                            state.replace_all(&receiver, &initialized);
                        }
                    }
                }
                if let Some(return_type) = &parsed.return_type {
                    state.push(V::from_field_type(return_type));
                }
            }
            Instruction::InvokeDynamic { descriptor, .. } => {
                let parsed = MethodDescriptor::parse(descriptor)?;
                state.pop_words(usize::from(parsed.parameter_slots()))?;
                if let Some(return_type) = &parsed.return_type {
                    state.push(V::from_field_type(return_type));
                }
            }
            Instruction::Type(op, class) => match op {
                TypeOp::New => {
                    let Some(Instruction::Label(label)) =
                        index.checked_sub(1).map(|i| &self.instructions[i])
                    else {
                        return Err(Error::NotSupported(format!(
                            "new {class} without a preceding label"
                        )));
                    };
                    state.push(V::Uninitialized(*label));
                }
                TypeOp::ANewArray => {
                    state.pop_words(1)?;
                    state.push(V::Object(array_of(class)));
                }
                TypeOp::CheckCast => {
                    state.pop_words(1)?;
                    state.push(V::Object(class.clone()));
                }
                TypeOp::InstanceOf => {
                    state.pop_words(1)?;
                    state.push(V::Integer);
                }
            },
            Instruction::NewArray(atype) => {
                state.pop_words(1)?;
                let element = match atype {
                    4 => 'Z',
                    5 => 'C',
                    6 => 'F',
                    7 => 'D',
                    8 => 'B',
                    9 => 'S',
                    10 => 'I',
                    _ => 'J',
                };
                state.push(V::Object(format!("[{element}")));
            }
            Instruction::MultiANewArray { class, dimensions } => {
                state.pop_words(usize::from(*dimensions))?;
                state.push(V::Object(class.clone()));
            }
            Instruction::Return(kind) => {
                state.pop_words(kind.words())?;
            }
            Instruction::Ret(_) => {}
            Instruction::Raw(opcode) => match *opcode {
                opcodes::DUP => duplicate(state, 1, 0)?,
                opcodes::DUP_X1 => duplicate(state, 1, 1)?,
                opcodes::DUP_X2 => duplicate(state, 1, 2)?,
                opcodes::DUP2 => duplicate(state, 2, 0)?,
                opcodes::DUP2_X1 => duplicate(state, 2, 1)?,
                opcodes::DUP2_X2 => duplicate(state, 2, 2)?,
                opcodes::SWAP => {
                    let mut top = state.pop_words(2)?;
                    top.swap(0, 1);
                    state.stack.extend(top);
                }
                opcodes::AALOAD => {
                    let mut popped = state.pop_words(2)?;
                    let array = popped.swap_remove(0);
                    state.push(element_of(&array));
                }
                other => {
                    let Some((pops, push)) = raw_effect(other) else {
                        return Err(malformed_error!("Unknown opcode 0x{:02X}", other));
                    };
                    state.pop_words(pops)?;
                    if let Some(value) = push {
                        state.push(value);
                    }
                }
            },
        }

        Ok((targets, !instruction.is_terminal()))
    }

    /// The class allocated by the `new` that follows `label`.
    fn new_class(&self, label: Label) -> Option<&str> {
        let index = *self.labels.get(&label)?;
        self.instructions[index + 1..]
            .iter()
            .find(|instruction| !matches!(instruction, Instruction::Label(_)))
            .and_then(|instruction| match instruction {
                Instruction::Type(TypeOp::New, class) => Some(class.as_str()),
                _ => None,
            })
    }
}

/// Runs the type-flow analysis.
///
/// # Errors
/// Returns [`crate::Error::DuplicateLabel`]/[`crate::Error::UndefinedLabel`] for inconsistent
/// labels, and [`crate::Error::Malformed`] for stack underflow, stack height mismatches at
/// joins, and control falling off the end of the code.
pub fn analyze(
    instructions: &[Instruction],
    handlers: &[ExceptionHandler],
    hints: &[(Label, Frame)],
    method: &MethodContext,
    declared_max_locals: u16,
) -> Result<Analysis> {
    let mut labels = HashMap::new();
    let mut run_start = Vec::with_capacity(instructions.len());
    for (index, instruction) in instructions.iter().enumerate() {
        let start = match (instruction, index.checked_sub(1)) {
            (Instruction::Label(_), Some(previous))
                if matches!(instructions[previous], Instruction::Label(_)) =>
            {
                run_start[previous]
            }
            _ => index,
        };
        run_start.push(start);
        if let Instruction::Label(label) = instruction {
            if labels.insert(*label, index).is_some() {
                return Err(Error::DuplicateLabel(label.id()));
            }
        }
    }

    let mut hint_states = HashMap::new();
    for (label, frame) in hints {
        if let Some(index) = labels.get(label) {
            hint_states
                .entry(run_start[*index])
                .or_insert_with(|| FlowState::from_frame(frame));
        }
    }

    let mut flow = Flow {
        instructions,
        method,
        run_start,
        labels,
        hints: hint_states,
        states: vec![None; instructions.len()],
        pending: Vec::new(),
        queued: vec![false; instructions.len()],
        max_stack: 0,
    };

    // handler index -> (first covered event, end event, handler target, caught type)
    let mut ranges = Vec::with_capacity(handlers.len());
    for handler in handlers {
        let start = flow.target(handler.start)?;
        let end = flow.target(handler.end)?;
        let target = flow.target(handler.handler)?;
        let caught = VerificationType::Object(
            handler
                .catch_type
                .clone()
                .unwrap_or_else(|| "java/lang/Throwable".to_string()),
        );
        ranges.push((start, end, target, caught));
    }

    let entry = Frame::entry(
        &method.class_name,
        &method.method_name,
        &method.descriptor,
        method.is_static,
    )?;
    let entry = FlowState::from_frame(&entry);
    let mut max_locals = entry.locals.len().max(usize::from(declared_max_locals));

    if instructions.is_empty() {
        return Err(malformed_error!(
            "Empty code in {}.{}",
            method.class_name,
            method.method_name
        ));
    }
    flow.flow_to(0, &entry)?;

    while let Some(index) = flow.pending.pop() {
        flow.queued[index] = false;
        let Some(state) = flow.states[index].clone() else {
            continue;
        };

        let mut after = state.clone();
        let (targets, falls_through) = flow.execute(index, &mut after)?;
        flow.max_stack = flow.max_stack.max(after.stack.len());
        max_locals = max_locals.max(after.locals.len());

        for (start, end, target, caught) in &ranges {
            if (*start..*end).contains(&index) {
                for locals in [&state.locals, &after.locals] {
                    let handler_state = FlowState {
                        locals: locals.clone(),
                        stack: vec![caught.clone()],
                    };
                    flow.flow_to(*target, &handler_state)?;
                }
            }
        }

        for (target, arrival) in targets {
            flow.flow_to(target, &arrival)?;
        }
        if falls_through {
            flow.flow_to(index + 1, &after)?;
        }
    }

    for state in flow.states.iter().flatten() {
        max_locals = max_locals.max(state.locals.len());
    }

    Ok(Analysis {
        states: flow.states,
        max_stack: u16::try_from(flow.max_stack)
            .map_err(|_| Error::LimitExceeded(format!("max_stack {}", flow.max_stack)))?,
        max_locals: u16::try_from(max_locals)
            .map_err(|_| Error::LimitExceeded(format!("max_locals {max_locals}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::instruction::ReturnKind;

    fn context(descriptor: &str, is_static: bool) -> MethodContext {
        MethodContext {
            class_name: "Test".to_string(),
            method_name: "run".to_string(),
            descriptor: descriptor.to_string(),
            is_static,
            major_version: 52,
        }
    }

    #[test]
    fn straight_line_max_stack() {
        let code = vec![
            Instruction::LoadConstant(ConstantValue::Long(1)),
            Instruction::LoadConstant(ConstantValue::Long(2)),
            Instruction::Raw(opcodes::IADD + 1), // ladd
            Instruction::Return(ReturnKind::Long),
        ];
        let analysis = analyze(&code, &[], &[], &context("()J", true), 0).unwrap();
        assert_eq!(analysis.max_stack, 4);
        assert_eq!(analysis.max_locals, 0);
    }

    #[test]
    fn dead_code_is_unreachable() {
        let code = vec![
            Instruction::LoadConstant(ConstantValue::Null),
            Instruction::Return(ReturnKind::Reference),
            Instruction::aload(0),
            Instruction::Return(ReturnKind::Reference),
        ];
        let analysis =
            analyze(&code, &[], &[], &context("()Ljava/lang/Object;", false), 1).unwrap();
        assert!(analysis.is_reachable(1));
        assert!(!analysis.is_reachable(2));
        assert!(!analysis.is_reachable(3));
    }

    #[test]
    fn reference_merge_to_object() {
        let (else_label, join) = (Label(0), Label(1));
        let code = vec![
            Instruction::LoadLocal(ValueKind::Int, 0),
            Instruction::Jump(JumpKind::IfEq, else_label),
            Instruction::ldc_string("s"),
            Instruction::Jump(JumpKind::Goto, join),
            Instruction::Label(else_label),
            Instruction::ldc_class("java/lang/Integer"),
            Instruction::Label(join),
            Instruction::Return(ReturnKind::Reference),
        ];
        let analysis =
            analyze(&code, &[], &[], &context("(I)Ljava/lang/Object;", true), 1).unwrap();
        let state = analysis.state(6).unwrap();
        assert_eq!(
            state.stack,
            vec![VerificationType::Object(OBJECT.to_string())]
        );
    }

    #[test]
    fn stack_height_mismatch_is_malformed() {
        let (else_label, join) = (Label(0), Label(1));
        let code = vec![
            Instruction::LoadLocal(ValueKind::Int, 0),
            Instruction::Jump(JumpKind::IfEq, else_label),
            Instruction::ldc_string("s"),
            Instruction::Jump(JumpKind::Goto, join),
            Instruction::Label(else_label),
            Instruction::Label(join),
            Instruction::Return(ReturnKind::Void),
        ];
        assert!(matches!(
            analyze(&code, &[], &[], &context("(I)V", true), 1),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn hint_is_authoritative() {
        let (head, exit) = (Label(0), Label(1));
        let declared = Frame {
            locals: vec![VerificationType::Object("java/util/List".to_string())],
            stack: Vec::new(),
        };
        let code = vec![
            Instruction::Label(head),
            Instruction::aload(0),
            Instruction::Jump(JumpKind::IfNull, exit),
            Instruction::ldc_string("x"),
            Instruction::StoreLocal(ValueKind::Reference, 0),
            Instruction::Jump(JumpKind::Goto, head),
            Instruction::Label(exit),
            Instruction::Return(ReturnKind::Void),
        ];
        let analysis = analyze(
            &code,
            &[],
            &[(head, declared.clone())],
            &context("(Ljava/util/List;)V", true),
            1,
        )
        .unwrap();
        assert_eq!(analysis.state(0).unwrap().to_frame(), declared);
    }

    #[test]
    fn constructor_initializes_this() {
        let code = vec![
            Instruction::aload(0),
            Instruction::MethodCall {
                kind: InvokeKind::Special,
                owner: OBJECT.to_string(),
                name: "<init>".to_string(),
                descriptor: "()V".to_string(),
                interface: false,
            },
            Instruction::Return(ReturnKind::Void),
        ];
        let mut method = context("()V", false);
        method.method_name = "<init>".to_string();
        let analysis = analyze(&code, &[], &[], &method, 1).unwrap();
        assert_eq!(
            analysis.state(0).unwrap().locals,
            vec![VerificationType::UninitializedThis]
        );
        assert_eq!(
            analysis.state(2).unwrap().locals,
            vec![VerificationType::Object("Test".to_string())]
        );
    }

    #[test]
    fn handler_receives_exception() {
        let (start, end, handler) = (Label(0), Label(1), Label(2));
        let code = vec![
            Instruction::Label(start),
            Instruction::Return(ReturnKind::Void),
            Instruction::Label(end),
            Instruction::Label(handler),
            Instruction::Raw(opcodes::ATHROW),
        ];
        let handlers = [ExceptionHandler {
            start,
            end,
            handler,
            catch_type: Some("java/io/IOException".to_string()),
        }];
        let analysis = analyze(&code, &handlers, &[], &context("()V", true), 0).unwrap();
        assert_eq!(
            analysis.state(3).unwrap().stack,
            vec![VerificationType::Object("java/io/IOException".to_string())]
        );
        assert_eq!(analysis.max_stack, 1);
    }

    #[test]
    fn falling_off_the_end() {
        let code = vec![Instruction::Raw(opcodes::NOP)];
        assert!(analyze(&code, &[], &[], &context("()V", true), 0).is_err());
    }

    #[test]
    fn undefined_label() {
        let code = vec![
            Instruction::Jump(JumpKind::Goto, Label(9)),
            Instruction::Return(ReturnKind::Void),
        ];
        assert!(matches!(
            analyze(&code, &[], &[], &context("()V", true), 0),
            Err(Error::UndefinedLabel(9))
        ));
    }
}
