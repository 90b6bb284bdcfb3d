//! Whole-body replacement with a constant result.

use crate::{
    assembly::{ConstantValue, Instruction, ReturnKind},
    patch::{EventTransformer, PatternMismatch, TransformContext, Transition},
};

/// Replaces a method body with `load-constant(value); return`.
///
/// Labels placed before the first instruction are kept so debug-table ranges and handlers
/// that start there stay anchored; everything else is dropped and later labels are carried
/// through. The encoder prunes whatever became unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantReturn {
    value: ConstantValue,
    kind: ReturnKind,
}

/// Progress of a [`ConstantReturn`] traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceState {
    /// No instruction seen yet
    Leading,
    /// The replacement was emitted
    Replaced,
}

impl ConstantReturn {
    /// Returns `value` with a `return` of `kind`.
    #[must_use]
    pub fn new(value: ConstantValue, kind: ReturnKind) -> Self {
        ConstantReturn { value, kind }
    }

    /// Returns the string `value` (`ldc; areturn`).
    #[must_use]
    pub fn string(value: &str) -> Self {
        ConstantReturn::new(ConstantValue::String(value.to_string()), ReturnKind::Reference)
    }
}

impl EventTransformer for ConstantReturn {
    type State = ReplaceState;

    fn initial(&self) -> ReplaceState {
        ReplaceState::Leading
    }

    fn step(
        &self,
        state: &ReplaceState,
        event: &Instruction,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Transition<ReplaceState>, PatternMismatch> {
        if let Instruction::Label(_) = event {
            return Ok(Transition::pass(*state, event));
        }

        Ok(match state {
            ReplaceState::Leading => {
                log!(
                    ctx.logger,
                    "Replacing {}::{} with a constant return",
                    ctx.class_name,
                    ctx.method_name
                );
                Transition::emit(
                    ReplaceState::Replaced,
                    vec![
                        Instruction::LoadConstant(self.value.clone()),
                        Instruction::Return(self.kind),
                    ],
                )
            }
            ReplaceState::Replaced => Transition::emit(ReplaceState::Replaced, Vec::new()),
        })
    }
}
