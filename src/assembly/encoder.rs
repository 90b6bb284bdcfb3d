//! Encoding of instruction event lists back into `Code` attributes.
//!
//! The encoder is the reverse of [`crate::assembly::decode_code`]. Encoding a body runs:
//!
//! 1. label validation (every referenced label placed exactly once)
//! 2. type-flow analysis and dead code removal (labels of removed code are kept so tables
//!    referencing them collapse to empty ranges)
//! 3. layout: offsets are assigned iteratively, widening `goto`/`jsr` to their `_w` forms and
//!    rewriting out-of-range conditional jumps as an inverted jump over a `goto_w`
//! 4. emission with the most compact encoding for constants, locals and `iinc`
//! 5. regeneration of the exception table, debug tables and `StackMapTable`
//!
//! # Example
//!
//! ```rust
//! use hotpatch::assembly::{encode_code, ConstantValue, Instruction, MethodBody, MethodContext, ReturnKind};
//! use hotpatch::classfile::ConstantPool;
//!
//! let mut body = MethodBody::new(0);
//! body.instructions = vec![
//!     Instruction::LoadConstant(ConstantValue::Int(1000)),
//!     Instruction::Return(ReturnKind::Int),
//! ];
//! let method = MethodContext {
//!     class_name: "Example".into(),
//!     method_name: "answer".into(),
//!     descriptor: "()I".into(),
//!     is_static: true,
//!     major_version: 52,
//! };
//!
//! let mut pool = ConstantPool::default();
//! let code = encode_code(&body, &method, &mut pool)?;
//! // max_stack, max_locals, code_length, then sipush 1000; ireturn
//! assert_eq!(&code[..12], &[0, 1, 0, 0, 0, 0, 0, 4, 0x11, 0x03, 0xE8, 0xAC]);
//! # Ok::<(), hotpatch::Error>(())
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    assembly::{
        analysis::{analyze, Analysis, FlowState},
        body::{LabelAllocator, LocalVariable, MethodBody, MethodContext},
        decoder::MAX_CODE_LENGTH,
        frames::{encode_stack_map, Frame},
        instruction::{ConstantValue, Instruction, InvokeKind, JumpKind, Label},
        opcodes,
    },
    classfile::{
        constant_pool::{Constant, ConstantPool},
        descriptor::MethodDescriptor,
        member::Attribute,
    },
    file::io::write_be,
    Error, Result,
};

/// Code attributes that become invalid when offsets change and are not regenerated.
const DROPPED_ATTRIBUTES: [&str; 2] = [
    "RuntimeVisibleTypeAnnotations",
    "RuntimeInvisibleTypeAnnotations",
];

/// The encoding chosen for a constant load.
#[derive(Debug, Clone, Copy)]
enum ConstantForm {
    Opcode(u8),
    Byte(i8),
    Short(i16),
    Ldc(u8),
    LdcW(u16),
    Ldc2W(u16),
}

impl ConstantForm {
    fn size(self) -> usize {
        match self {
            ConstantForm::Opcode(_) => 1,
            ConstantForm::Byte(_) | ConstantForm::Ldc(_) => 2,
            ConstantForm::Short(_) | ConstantForm::LdcW(_) | ConstantForm::Ldc2W(_) => 3,
        }
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            ConstantForm::Opcode(opcode) => out.push(opcode),
            ConstantForm::Byte(value) => {
                out.push(opcodes::BIPUSH);
                write_be(out, value);
            }
            ConstantForm::Short(value) => {
                out.push(opcodes::SIPUSH);
                write_be(out, value);
            }
            ConstantForm::Ldc(index) => {
                out.push(opcodes::LDC);
                out.push(index);
            }
            ConstantForm::LdcW(index) => {
                out.push(opcodes::LDC_W);
                write_be(out, index);
            }
            ConstantForm::Ldc2W(index) => {
                out.push(opcodes::LDC2_W);
                write_be(out, index);
            }
        }
    }
}

fn ldc(index: u16) -> ConstantForm {
    match u8::try_from(index) {
        Ok(short) => ConstantForm::Ldc(short),
        Err(_) => ConstantForm::LdcW(index),
    }
}

/// Picks the shortest encoding of a constant, interning pool entries as needed.
fn constant_form(value: &ConstantValue, pool: &mut ConstantPool) -> Result<ConstantForm> {
    Ok(match value {
        ConstantValue::Null => ConstantForm::Opcode(opcodes::ACONST_NULL),
        ConstantValue::Int(value) => match *value {
            -1..=5 => ConstantForm::Opcode(
                u8::try_from(i32::from(opcodes::ICONST_0) + value).unwrap_or(opcodes::NOP),
            ),
            value => {
                if let Ok(byte) = i8::try_from(value) {
                    ConstantForm::Byte(byte)
                } else if let Ok(short) = i16::try_from(value) {
                    ConstantForm::Short(short)
                } else {
                    ldc(pool.intern(Constant::Integer(value))?)
                }
            }
        },
        ConstantValue::Long(0) => ConstantForm::Opcode(opcodes::LCONST_0),
        ConstantValue::Long(1) => ConstantForm::Opcode(opcodes::LCONST_1),
        ConstantValue::Long(value) => ConstantForm::Ldc2W(pool.intern(Constant::Long(*value))?),
        ConstantValue::Float(bits) => {
            if *bits == 0.0f32.to_bits() {
                ConstantForm::Opcode(opcodes::FCONST_0)
            } else if *bits == 1.0f32.to_bits() {
                ConstantForm::Opcode(opcodes::FCONST_1)
            } else if *bits == 2.0f32.to_bits() {
                ConstantForm::Opcode(opcodes::FCONST_2)
            } else {
                ldc(pool.intern(Constant::Float(*bits))?)
            }
        }
        ConstantValue::Double(bits) => {
            if *bits == 0.0f64.to_bits() {
                ConstantForm::Opcode(opcodes::DCONST_0)
            } else if *bits == 1.0f64.to_bits() {
                ConstantForm::Opcode(opcodes::DCONST_1)
            } else {
                ConstantForm::Ldc2W(pool.intern(Constant::Double(*bits))?)
            }
        }
        ConstantValue::String(value) => ldc(pool.string_index(value)?),
        ConstantValue::Class(name) => ldc(pool.class_index(name)?),
        ConstantValue::MethodType(descriptor) => ldc(pool.method_type_index(descriptor)?),
        ConstantValue::MethodHandle(index) => ldc(*index),
        ConstantValue::Dynamic { index, .. } if value.words() == 2 => ConstantForm::Ldc2W(*index),
        ConstantValue::Dynamic { index, .. } => ldc(*index),
    })
}

/// Writes a local variable instruction (`xload`, `xstore`, `ret`) in its shortest form.
/// `compact` is the opcode of the `_0` form, if the instruction has one.
fn write_local(out: &mut Vec<u8>, opcode: u8, compact: Option<u8>, slot: u16) {
    match (compact, u8::try_from(slot)) {
        (Some(base), Ok(short)) if short <= 3 => out.push(base + short),
        (_, Ok(short)) => {
            out.push(opcode);
            out.push(short);
        }
        (_, Err(_)) => {
            out.push(opcodes::WIDE);
            out.push(opcode);
            write_be(out, slot);
        }
    }
}

fn local_size(compact: bool, slot: u16) -> usize {
    match slot {
        0..=3 if compact => 1,
        0..=255 => 2,
        _ => 4,
    }
}

fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

/// A branch whose displacement is resolved once label offsets are final.
#[derive(Debug, Clone, Copy)]
struct LabelFixup {
    /// Offset of the branch opcode (displacements are relative to it)
    origin: usize,
    /// Position of the displacement in the code buffer
    position: usize,
    /// Branch target
    target: Label,
    /// Whether the displacement is 4 bytes
    wide: bool,
}

/// Encodes one pruned and laid-out event list into bytecode.
struct InstructionEncoder<'a> {
    code: Vec<u8>,
    fixups: Vec<LabelFixup>,
    pool: &'a mut ConstantPool,
}

impl InstructionEncoder<'_> {
    /// Size of `instruction` at `offset`.
    fn size(&mut self, instruction: &Instruction, offset: usize, wide_jump: bool) -> Result<usize> {
        Ok(match instruction {
            Instruction::Label(_) => 0,
            Instruction::LoadConstant(value) => constant_form(value, self.pool)?.size(),
            Instruction::LoadLocal(_, slot) | Instruction::StoreLocal(_, slot) => {
                local_size(true, *slot)
            }
            Instruction::Ret(slot) => local_size(false, *slot),
            Instruction::Increment { slot, delta } => {
                if *slot <= 255 && i8::try_from(*delta).is_ok() {
                    3
                } else {
                    6
                }
            }
            Instruction::Jump(..) => {
                if wide_jump {
                    5
                } else {
                    3
                }
            }
            Instruction::TableSwitch { targets, .. } => {
                1 + switch_padding(offset) + 12 + 4 * targets.len()
            }
            Instruction::LookupSwitch { pairs, .. } => {
                1 + switch_padding(offset) + 8 + 8 * pairs.len()
            }
            Instruction::MethodCall {
                kind: InvokeKind::Interface,
                ..
            }
            | Instruction::InvokeDynamic { .. } => 5,
            Instruction::FieldAccess { .. }
            | Instruction::MethodCall { .. }
            | Instruction::Type(..) => 3,
            Instruction::NewArray(_) => 2,
            Instruction::MultiANewArray { .. } => 4,
            Instruction::Return(_) | Instruction::Raw(_) => 1,
        })
    }

    fn branch(&mut self, opcode: u8, target: Label, wide: bool) {
        let origin = self.code.len();
        self.code.push(opcode);
        self.fixups.push(LabelFixup {
            origin,
            position: self.code.len(),
            target,
            wide,
        });
        self.code
            .extend_from_slice(if wide { &[0; 4][..] } else { &[0; 2][..] });
    }

    fn emit(&mut self, instruction: &Instruction, wide_jump: bool) -> Result<()> {
        let origin = self.code.len();
        match instruction {
            Instruction::Label(_) => {}
            Instruction::LoadConstant(value) => {
                constant_form(value, self.pool)?.write(&mut self.code);
            }
            Instruction::LoadLocal(kind, slot) => write_local(
                &mut self.code,
                opcodes::ILOAD + kind.offset(),
                Some(opcodes::ILOAD_0 + kind.offset() * 4),
                *slot,
            ),
            Instruction::StoreLocal(kind, slot) => write_local(
                &mut self.code,
                opcodes::ISTORE + kind.offset(),
                Some(opcodes::ISTORE_0 + kind.offset() * 4),
                *slot,
            ),
            Instruction::Ret(slot) => write_local(&mut self.code, opcodes::RET, None, *slot),
            Instruction::Increment { slot, delta } => {
                match (u8::try_from(*slot), i8::try_from(*delta)) {
                    (Ok(slot), Ok(delta)) => {
                        self.code.push(opcodes::IINC);
                        self.code.push(slot);
                        write_be(&mut self.code, delta);
                    }
                    _ => {
                        self.code.push(opcodes::WIDE);
                        self.code.push(opcodes::IINC);
                        write_be(&mut self.code, *slot);
                        write_be(&mut self.code, *delta);
                    }
                }
            }
            Instruction::Jump(kind, target) => {
                let opcode = match (kind, wide_jump) {
                    (JumpKind::Goto, true) => opcodes::GOTO_W,
                    (JumpKind::Jsr, true) => opcodes::JSR_W,
                    (kind, false) => kind.opcode(),
                    (kind, true) => {
                        return Err(malformed_error!("Conditional jump {} cannot be widened", kind))
                    }
                };
                self.branch(opcode, *target, wide_jump);
            }
            Instruction::TableSwitch {
                low,
                high,
                default,
                targets,
            } => {
                self.code.push(opcodes::TABLESWITCH);
                self.code.resize(self.code.len() + switch_padding(origin), 0);
                self.switch_target(origin, *default);
                write_be(&mut self.code, *low);
                write_be(&mut self.code, *high);
                for target in targets {
                    self.switch_target(origin, *target);
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                self.code.push(opcodes::LOOKUPSWITCH);
                self.code.resize(self.code.len() + switch_padding(origin), 0);
                self.switch_target(origin, *default);
                let count = i32::try_from(pairs.len())
                    .map_err(|_| Error::LimitExceeded(format!("{} switch cases", pairs.len())))?;
                write_be(&mut self.code, count);
                for (key, target) in pairs {
                    write_be(&mut self.code, *key);
                    self.switch_target(origin, *target);
                }
            }
            Instruction::FieldAccess {
                kind,
                owner,
                name,
                descriptor,
            } => {
                let index = self.pool.field_ref_index(owner, name, descriptor)?;
                self.code.push(kind.opcode());
                write_be(&mut self.code, index);
            }
            Instruction::MethodCall {
                kind,
                owner,
                name,
                descriptor,
                interface,
            } => {
                let index = self
                    .pool
                    .method_ref_index(owner, name, descriptor, *interface)?;
                self.code.push(kind.opcode());
                write_be(&mut self.code, index);
                if *kind == InvokeKind::Interface {
                    let count = MethodDescriptor::parse(descriptor)?.parameter_slots() + 1;
                    self.code.push(u8::try_from(count).map_err(|_| {
                        Error::LimitExceeded(format!("{count} interface call arguments"))
                    })?);
                    self.code.push(0);
                }
            }
            Instruction::InvokeDynamic { index, .. } => {
                self.code.push(opcodes::INVOKEDYNAMIC);
                write_be(&mut self.code, *index);
                write_be(&mut self.code, 0u16);
            }
            Instruction::Type(op, class) => {
                let index = self.pool.class_index(class)?;
                self.code.push(op.opcode());
                write_be(&mut self.code, index);
            }
            Instruction::NewArray(atype) => {
                self.code.push(opcodes::NEWARRAY);
                self.code.push(*atype);
            }
            Instruction::MultiANewArray { class, dimensions } => {
                let index = self.pool.class_index(class)?;
                self.code.push(opcodes::MULTIANEWARRAY);
                write_be(&mut self.code, index);
                self.code.push(*dimensions);
            }
            Instruction::Return(kind) => self.code.push(kind.opcode()),
            Instruction::Raw(opcode) => self.code.push(*opcode),
        }
        Ok(())
    }

    fn switch_target(&mut self, origin: usize, target: Label) {
        self.fixups.push(LabelFixup {
            origin,
            position: self.code.len(),
            target,
            wide: true,
        });
        self.code.extend_from_slice(&[0; 4]);
    }

    /// Writes every branch displacement.
    fn resolve(&mut self, offsets: &HashMap<Label, usize>) -> Result<()> {
        for fixup in &self.fixups {
            let target = *offsets
                .get(&fixup.target)
                .ok_or(Error::UndefinedLabel(fixup.target.id()))?;
            let delta = i64::try_from(target).unwrap_or(i64::MAX)
                - i64::try_from(fixup.origin).unwrap_or(i64::MAX);
            let bytes = if fixup.wide {
                i32::try_from(delta)
                    .map_err(|_| Error::LimitExceeded(format!("branch displacement {delta}")))?
                    .to_be_bytes()
                    .to_vec()
            } else {
                i16::try_from(delta)
                    .map_err(|_| Error::LimitExceeded(format!("branch displacement {delta}")))?
                    .to_be_bytes()
                    .to_vec()
            };
            self.code[fixup.position..fixup.position + bytes.len()].copy_from_slice(&bytes);
        }
        Ok(())
    }
}

/// Checks that every label referenced by the body is placed exactly once.
fn validate_labels(body: &MethodBody) -> Result<()> {
    let mut placed = HashSet::new();
    for instruction in &body.instructions {
        if let Instruction::Label(label) = instruction {
            if !placed.insert(*label) {
                return Err(Error::DuplicateLabel(label.id()));
            }
        }
    }

    let check = |label: &Label| -> Result<()> {
        if placed.contains(label) {
            Ok(())
        } else {
            Err(Error::UndefinedLabel(label.id()))
        }
    };

    for instruction in &body.instructions {
        instruction.branch_targets().iter().try_for_each(check)?;
    }
    for handler in &body.exception_handlers {
        [handler.start, handler.end, handler.handler]
            .iter()
            .try_for_each(check)?;
    }
    for line in &body.line_numbers {
        check(&line.start)?;
    }
    for variable in body.local_variables.iter().chain(&body.local_variable_types) {
        check(&variable.start)?;
        check(&variable.end)?;
    }
    Ok(())
}

/// Removes unreachable events, keeping every label.
fn prune(
    instructions: &[Instruction],
    analysis: &Analysis,
) -> (Vec<Instruction>, Vec<Option<FlowState>>) {
    instructions
        .iter()
        .enumerate()
        .filter(|(index, instruction)| {
            matches!(instruction, Instruction::Label(_)) || analysis.is_reachable(*index)
        })
        .map(|(index, instruction)| (instruction.clone(), analysis.state(index).cloned()))
        .unzip()
}

/// Rewrites the conditional jumps at `positions` as an inverted jump over a `goto`.
fn expand_conditionals(
    instructions: Vec<Instruction>,
    positions: &HashSet<usize>,
    labels: &mut LabelAllocator,
) -> Result<Vec<Instruction>> {
    let mut expanded = Vec::with_capacity(instructions.len() + 3 * positions.len());
    for (index, instruction) in instructions.into_iter().enumerate() {
        match instruction {
            Instruction::Jump(kind, target) if positions.contains(&index) => {
                let inverted = kind
                    .inverted()
                    .ok_or_else(|| malformed_error!("Jump {} has no inverted form", kind))?;
                let skip = labels.allocate();
                expanded.push(Instruction::Jump(inverted, skip));
                expanded.push(Instruction::Jump(JumpKind::Goto, target));
                expanded.push(Instruction::Label(skip));
            }
            other => expanded.push(other),
        }
    }
    Ok(expanded)
}

/// Final event list with offsets.
struct Layout {
    instructions: Vec<Instruction>,
    states: Vec<Option<FlowState>>,
    analysis_max_stack: u16,
    analysis_max_locals: u16,
    offsets: Vec<usize>,
    wide: HashSet<usize>,
    code_length: usize,
}

fn layout(
    body: &MethodBody,
    method: &MethodContext,
    pool: &mut ConstantPool,
) -> Result<Layout> {
    let mut instructions = body.instructions.clone();
    let mut labels = body.labels.clone();

    loop {
        let analysis = analyze(
            &instructions,
            &body.exception_handlers,
            &body.frames,
            method,
            body.max_locals,
        )?;
        let (pruned, states) = prune(&instructions, &analysis);

        let mut encoder = InstructionEncoder {
            code: Vec::new(),
            fixups: Vec::new(),
            pool: &mut *pool,
        };
        let mut wide = HashSet::new();
        let (offsets, code_length, overflowing) = loop {
            let mut offsets = Vec::with_capacity(pruned.len());
            let mut label_offsets = HashMap::new();
            let mut position = 0usize;
            for (index, instruction) in pruned.iter().enumerate() {
                offsets.push(position);
                if let Instruction::Label(label) = instruction {
                    label_offsets.insert(*label, position);
                }
                position += encoder.size(instruction, position, wide.contains(&index))?;
            }

            let mut widened = false;
            let mut overflowing = HashSet::new();
            for (index, instruction) in pruned.iter().enumerate() {
                let Instruction::Jump(kind, target) = instruction else {
                    continue;
                };
                if wide.contains(&index) {
                    continue;
                }
                let target = *label_offsets
                    .get(target)
                    .ok_or(Error::UndefinedLabel(target.id()))?;
                let delta = i64::try_from(target).unwrap_or(i64::MAX)
                    - i64::try_from(offsets[index]).unwrap_or(i64::MAX);
                if i16::try_from(delta).is_err() {
                    if kind.is_conditional() {
                        overflowing.insert(index);
                    } else {
                        wide.insert(index);
                        widened = true;
                    }
                }
            }

            if !overflowing.is_empty() || !widened {
                break (offsets, position, overflowing);
            }
        };

        if !overflowing.is_empty() {
            instructions = expand_conditionals(pruned, &overflowing, &mut labels)?;
            continue;
        }

        return Ok(Layout {
            instructions: pruned,
            states,
            analysis_max_stack: analysis.max_stack,
            analysis_max_locals: analysis.max_locals,
            offsets,
            wide,
            code_length,
        });
    }
}

fn table_attribute(pool: &mut ConstantPool, name: &str, info: Vec<u8>) -> Result<Attribute> {
    Ok(Attribute {
        name_index: pool.utf8_index(name)?,
        info,
    })
}

fn variable_table(
    variables: &[LocalVariable],
    offsets: &HashMap<Label, usize>,
) -> Result<Option<Vec<u8>>> {
    let mut entries = Vec::new();
    for variable in variables {
        let (Some(start), Some(end)) = (offsets.get(&variable.start), offsets.get(&variable.end))
        else {
            continue;
        };
        if start < end {
            entries.push((*start, end - start, variable));
        }
    }
    if entries.is_empty() {
        return Ok(None);
    }

    let mut info = Vec::new();
    write_be(
        &mut info,
        u16::try_from(entries.len())
            .map_err(|_| Error::LimitExceeded(format!("{} local variables", entries.len())))?,
    );
    for (start, length, variable) in entries {
        write_be(&mut info, u16::try_from(start).unwrap_or(u16::MAX));
        write_be(&mut info, u16::try_from(length).unwrap_or(u16::MAX));
        write_be(&mut info, variable.name_index);
        write_be(&mut info, variable.descriptor_index);
        write_be(&mut info, variable.slot);
    }
    Ok(Some(info))
}

/// Encodes a method body as a `Code` attribute payload (everything after the 6-byte
/// attribute header). Constants are interned into `pool` as needed.
///
/// # Errors
/// Returns [`crate::Error::UndefinedLabel`] or [`crate::Error::DuplicateLabel`] for
/// inconsistent labels, [`crate::Error::Malformed`] if the analysis rejects the code, and
/// [`crate::Error::LimitExceeded`] if the code, a table or the constant pool outgrows the
/// class file limits.
pub fn encode_code(
    body: &MethodBody,
    method: &MethodContext,
    pool: &mut ConstantPool,
) -> Result<Vec<u8>> {
    validate_labels(body)?;

    let layout = layout(body, method, pool)?;
    if layout.code_length > MAX_CODE_LENGTH {
        return Err(Error::LimitExceeded(format!(
            "code length {} in {}.{}",
            layout.code_length, method.class_name, method.method_name
        )));
    }

    let mut encoder = InstructionEncoder {
        code: Vec::with_capacity(layout.code_length),
        fixups: Vec::new(),
        pool: &mut *pool,
    };
    let mut label_offsets = HashMap::new();
    let mut label_index = HashMap::new();
    for (index, instruction) in layout.instructions.iter().enumerate() {
        if let Instruction::Label(label) = instruction {
            label_offsets.insert(*label, layout.offsets[index]);
            label_index.insert(*label, index);
        }
        encoder.emit(instruction, layout.wide.contains(&index))?;
    }
    encoder.resolve(&label_offsets)?;
    let InstructionEncoder { code, .. } = encoder;

    let reachable_label = |label: &Label| {
        label_index
            .get(label)
            .is_some_and(|index| layout.states[*index].is_some())
    };

    // Exception table
    let mut handlers = Vec::new();
    for handler in &body.exception_handlers {
        let start = label_offsets[&handler.start];
        let end = label_offsets[&handler.end];
        if start >= end || !reachable_label(&handler.handler) {
            continue;
        }
        let catch_type = match &handler.catch_type {
            Some(name) => pool.class_index(name)?,
            None => 0,
        };
        handlers.push((start, end, label_offsets[&handler.handler], catch_type, handler));
    }

    let mut attributes = Vec::new();

    let lines: Vec<_> = body
        .line_numbers
        .iter()
        .filter_map(|line| {
            let offset = label_offsets[&line.start];
            (offset < code.len()).then_some((offset, line.line))
        })
        .collect();
    if !lines.is_empty() {
        let mut info = Vec::new();
        write_be(
            &mut info,
            u16::try_from(lines.len())
                .map_err(|_| Error::LimitExceeded(format!("{} line numbers", lines.len())))?,
        );
        for (offset, line) in lines {
            write_be(&mut info, u16::try_from(offset).unwrap_or(u16::MAX));
            write_be(&mut info, line);
        }
        attributes.push(table_attribute(pool, "LineNumberTable", info)?);
    }
    if let Some(info) = variable_table(&body.local_variables, &label_offsets)? {
        attributes.push(table_attribute(pool, "LocalVariableTable", info)?);
    }
    if let Some(info) = variable_table(&body.local_variable_types, &label_offsets)? {
        attributes.push(table_attribute(pool, "LocalVariableTypeTable", info)?);
    }

    if method.major_version >= 50 {
        let mut targets: Vec<Label> = layout
            .instructions
            .iter()
            .flat_map(Instruction::branch_targets)
            .collect();
        targets.extend(handlers.iter().map(|(.., handler)| handler.handler));

        let mut frames = BTreeMap::new();
        for label in targets {
            let index = label_index[&label];
            if let Some(state) = &layout.states[index] {
                frames
                    .entry(layout.offsets[index])
                    .or_insert_with(|| state.to_frame());
            }
        }

        if !frames.is_empty() {
            let frames: Vec<(usize, Frame)> = frames.into_iter().collect();
            let initial = Frame::entry(
                &method.class_name,
                &method.method_name,
                &method.descriptor,
                method.is_static,
            )?;
            let offset_of = |label: Label| -> Result<usize> {
                label_offsets
                    .get(&label)
                    .copied()
                    .ok_or(Error::UndefinedLabel(label.id()))
            };
            let info = encode_stack_map(&frames, &initial, pool, &offset_of)?;
            attributes.push(table_attribute(pool, "StackMapTable", info)?);
        }
    }

    for attribute in &body.attributes {
        if !DROPPED_ATTRIBUTES.contains(&attribute.name(pool)?.as_str()) {
            attributes.push(attribute.clone());
        }
    }

    let mut out = Vec::with_capacity(code.len() + 64);
    write_be(&mut out, layout.analysis_max_stack);
    write_be(&mut out, layout.analysis_max_locals);
    write_be(&mut out, u32::try_from(code.len()).unwrap_or(u32::MAX));
    out.extend_from_slice(&code);
    write_be(
        &mut out,
        u16::try_from(handlers.len())
            .map_err(|_| Error::LimitExceeded(format!("{} exception handlers", handlers.len())))?,
    );
    for (start, end, handler, catch_type, _) in handlers {
        write_be(&mut out, u16::try_from(start).unwrap_or(u16::MAX));
        write_be(&mut out, u16::try_from(end).unwrap_or(u16::MAX));
        write_be(&mut out, u16::try_from(handler).unwrap_or(u16::MAX));
        write_be(&mut out, catch_type);
    }
    Attribute::write_list(&attributes, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{
        body::ExceptionHandler,
        decoder::decode_code,
        instruction::{ReturnKind, ValueKind},
    };

    fn context(descriptor: &str, is_static: bool) -> MethodContext {
        MethodContext {
            class_name: "Test".to_string(),
            method_name: "run".to_string(),
            descriptor: descriptor.to_string(),
            is_static,
            major_version: 52,
        }
    }

    fn body(instructions: Vec<Instruction>, labels: u32, max_locals: u16) -> MethodBody {
        let mut body = MethodBody::new(max_locals);
        body.instructions = instructions;
        for _ in 0..labels {
            body.labels.allocate();
        }
        body
    }

    /// Splits a Code payload into (max_stack, max_locals, code).
    fn code_of(info: &[u8]) -> (u16, u16, Vec<u8>) {
        let length = u32::from_be_bytes([info[4], info[5], info[6], info[7]]) as usize;
        (
            u16::from_be_bytes([info[0], info[1]]),
            u16::from_be_bytes([info[2], info[3]]),
            info[8..8 + length].to_vec(),
        )
    }

    #[test]
    fn compact_constant_forms() {
        let mut pool = ConstantPool::default();
        let code = body(
            vec![
                Instruction::LoadConstant(ConstantValue::Int(-1)),
                Instruction::LoadConstant(ConstantValue::Int(100)),
                Instruction::LoadConstant(ConstantValue::Int(-200)),
                Instruction::LoadConstant(ConstantValue::Int(100_000)),
                Instruction::Raw(opcodes::POP2),
                Instruction::Raw(opcodes::POP2),
                Instruction::Return(ReturnKind::Void),
            ],
            0,
            0,
        );
        let info = encode_code(&code, &context("()V", true), &mut pool).unwrap();
        let (max_stack, _, bytes) = code_of(&info);
        assert_eq!(max_stack, 4);
        assert_eq!(
            bytes,
            vec![
                opcodes::ICONST_M1,
                opcodes::BIPUSH,
                100,
                opcodes::SIPUSH,
                0xFF,
                0x38,
                opcodes::LDC,
                1,
                opcodes::POP2,
                opcodes::POP2,
                opcodes::RETURN
            ]
        );
    }

    #[test]
    fn compact_and_wide_locals() {
        let mut pool = ConstantPool::default();
        let code = body(
            vec![
                Instruction::LoadLocal(ValueKind::Int, 0),
                Instruction::StoreLocal(ValueKind::Int, 4),
                Instruction::LoadLocal(ValueKind::Int, 4),
                Instruction::StoreLocal(ValueKind::Int, 300),
                Instruction::Return(ReturnKind::Void),
            ],
            0,
            1,
        );
        let info = encode_code(&code, &context("(I)V", true), &mut pool).unwrap();
        let (_, max_locals, bytes) = code_of(&info);
        assert_eq!(max_locals, 301);
        assert_eq!(
            bytes,
            vec![
                opcodes::ILOAD_0,
                opcodes::ISTORE,
                4,
                opcodes::ILOAD,
                4,
                opcodes::WIDE,
                opcodes::ISTORE,
                0x01,
                0x2C,
                opcodes::RETURN
            ]
        );
    }

    #[test]
    fn dead_code_is_removed() {
        let mut pool = ConstantPool::default();
        let end = Label(0);
        let code = body(
            vec![
                Instruction::Return(ReturnKind::Void),
                Instruction::Raw(opcodes::NOP),
                Instruction::Raw(opcodes::NOP),
                Instruction::Label(end),
            ],
            1,
            0,
        );
        let info = encode_code(&code, &context("()V", true), &mut pool).unwrap();
        assert_eq!(code_of(&info).2, vec![opcodes::RETURN]);
    }

    #[test]
    fn long_goto_is_widened() {
        let mut pool = ConstantPool::default();
        let (target, filler) = (Label(0), Label(1));
        // Unreachable filler would be pruned, so the nops sit behind a branch
        let mut code = vec![
            Instruction::LoadLocal(ValueKind::Int, 0),
            Instruction::Jump(JumpKind::IfEq, filler),
            Instruction::Jump(JumpKind::Goto, target),
            Instruction::Label(filler),
        ];
        code.extend(std::iter::repeat(Instruction::Raw(opcodes::NOP)).take(40_000));
        code.push(Instruction::Label(target));
        code.push(Instruction::Return(ReturnKind::Void));

        let info = encode_code(&body(code, 2, 1), &context("(I)V", true), &mut pool).unwrap();
        let bytes = code_of(&info).2;
        assert_eq!(bytes[4], opcodes::GOTO_W);
        assert_eq!(&bytes[5..9], &40_005i32.to_be_bytes());
    }

    #[test]
    fn long_conditional_is_inverted() {
        let mut pool = ConstantPool::default();
        let target = Label(0);
        let mut code = vec![
            Instruction::LoadLocal(ValueKind::Int, 0),
            Instruction::Jump(JumpKind::IfEq, target),
        ];
        code.extend(std::iter::repeat(Instruction::Raw(opcodes::NOP)).take(40_000));
        code.push(Instruction::Label(target));
        code.push(Instruction::Return(ReturnKind::Void));

        let method = context("(I)V", true);
        let info = encode_code(&body(code, 1, 1), &method, &mut pool).unwrap();
        let bytes = code_of(&info).2;
        // iload_0; ifne +8; goto_w target; nops...
        assert_eq!(&bytes[1..4], &[opcodes::IFNE, 0, 8]);
        assert_eq!(bytes[4], opcodes::GOTO_W);

        let decoded = decode_code(&info, &pool, &method).unwrap();
        assert!(decoded
            .instructions
            .contains(&Instruction::Jump(JumpKind::IfNe, decoded.frames[0].0)));
    }

    #[test]
    fn frames_written_for_targets() {
        let mut pool = ConstantPool::default();
        let skip = Label(0);
        let code = body(
            vec![
                Instruction::LoadLocal(ValueKind::Int, 0),
                Instruction::Jump(JumpKind::IfEq, skip),
                Instruction::Raw(opcodes::NOP),
                Instruction::Label(skip),
                Instruction::Return(ReturnKind::Void),
            ],
            1,
            1,
        );
        let method = context("(I)V", true);
        let info = encode_code(&code, &method, &mut pool).unwrap();
        let decoded = decode_code(&info, &pool, &method).unwrap();
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.frames[0].1.locals.len(), 1);

        let mut old = method.clone();
        old.major_version = 49;
        let mut old_pool = ConstantPool::default();
        let info = encode_code(&code, &old, &mut old_pool).unwrap();
        assert!(decode_code(&info, &old_pool, &old).unwrap().frames.is_empty());
    }

    #[test]
    fn unreachable_handler_dropped() {
        let mut pool = ConstantPool::default();
        let (start, end, handler) = (Label(0), Label(1), Label(2));
        let mut code = body(
            vec![
                Instruction::Return(ReturnKind::Void),
                Instruction::Label(start),
                Instruction::Raw(opcodes::NOP),
                Instruction::Label(end),
                Instruction::Label(handler),
                Instruction::Raw(opcodes::ATHROW),
            ],
            3,
            0,
        );
        code.exception_handlers.push(ExceptionHandler {
            start,
            end,
            handler,
            catch_type: None,
        });
        let info = encode_code(&code, &context("()V", true), &mut pool).unwrap();
        // code_length 1, then exception_table_length 0
        assert_eq!(&info[8..11], &[opcodes::RETURN, 0, 0]);
    }

    #[test]
    fn label_errors() {
        let mut pool = ConstantPool::default();
        let duplicate = body(
            vec![
                Instruction::Label(Label(0)),
                Instruction::Label(Label(0)),
                Instruction::Return(ReturnKind::Void),
            ],
            1,
            0,
        );
        assert!(matches!(
            encode_code(&duplicate, &context("()V", true), &mut pool),
            Err(Error::DuplicateLabel(0))
        ));

        let undefined = body(
            vec![
                Instruction::Jump(JumpKind::Goto, Label(3)),
                Instruction::Return(ReturnKind::Void),
            ],
            4,
            0,
        );
        assert!(matches!(
            encode_code(&undefined, &context("()V", true), &mut pool),
            Err(Error::UndefinedLabel(3))
        ));
    }

    #[test]
    fn oversized_code() {
        let mut pool = ConstantPool::default();
        let mut code: Vec<_> = std::iter::repeat(Instruction::Raw(opcodes::NOP))
            .take(MAX_CODE_LENGTH)
            .collect();
        code.push(Instruction::Return(ReturnKind::Void));
        assert!(matches!(
            encode_code(&body(code, 0, 0), &context("()V", true), &mut pool),
            Err(Error::LimitExceeded(_))
        ));
    }
}
