//! Replacing one conditional jump, keyed off a preceding marker string, by a `goto`.

use crate::{
    assembly::{opcodes, ConstantValue, Instruction, JumpKind},
    patch::{EventTransformer, PatternMismatch, TransformContext, Transition},
};

/// Which events break the adjacency between the marker load and the jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Adjacency {
    /// Only other constant loads and jumps clear the flag; the operand-building events of
    /// `"marker".equals(x.getName())` (local loads, calls, field reads) are transparent.
    #[default]
    ConstantsAndJumps,
    /// Every event clears the flag: the jump must directly follow the marker load.
    Strict,
}

/// Turns `ldc marker ... <condition> L` into `ldc marker ... pop; goto L`.
///
/// The comparison result is discarded with a `pop`, so the stack is unchanged on both paths
/// and the branch is always taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInversion {
    marker: String,
    condition: JumpKind,
    adjacency: Adjacency,
}

impl BranchInversion {
    /// Inverts the first `condition` jump after each load of the string `marker`.
    #[must_use]
    pub fn new(marker: &str, condition: JumpKind) -> Self {
        BranchInversion {
            marker: marker.to_string(),
            condition,
            adjacency: Adjacency::default(),
        }
    }

    /// Uses `adjacency` to decide which events clear the marker flag.
    #[must_use]
    pub fn with_adjacency(mut self, adjacency: Adjacency) -> Self {
        self.adjacency = adjacency;
        self
    }
}

impl EventTransformer for BranchInversion {
    /// `true` while the marker was the last relevant event
    type State = bool;

    fn initial(&self) -> bool {
        false
    }

    fn step(
        &self,
        marker_seen: &bool,
        event: &Instruction,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Transition<bool>, PatternMismatch> {
        Ok(match event {
            Instruction::LoadConstant(ConstantValue::String(value)) if *value == self.marker => {
                log!(ctx.logger, "Found ldc {}", self.marker);
                Transition::pass(true, event)
            }
            Instruction::LoadConstant(_) => Transition::pass(false, event),
            Instruction::Jump(kind, target) if *marker_seen && *kind == self.condition => {
                log!(
                    ctx.logger,
                    "Changing {} to goto {} in {}::{}",
                    kind,
                    target,
                    ctx.class_name,
                    ctx.method_name
                );
                Transition::emit(
                    false,
                    vec![
                        Instruction::Raw(opcodes::POP),
                        Instruction::Jump(JumpKind::Goto, *target),
                    ],
                )
            }
            Instruction::Jump(..) => Transition::pass(false, event),
            _ => match self.adjacency {
                Adjacency::ConstantsAndJumps => Transition::pass(*marker_seen, event),
                Adjacency::Strict => Transition::pass(false, event),
            },
        })
    }
}
