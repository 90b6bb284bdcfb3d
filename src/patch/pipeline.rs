//! Event-stream transformers and the per-method pipeline that runs them.
//!
//! A strategy is written as an [`EventTransformer`]: a pure state machine that takes the
//! current state and one [`Instruction`] event and returns the next state together with the
//! events to emit in its place. State is an explicit value, never a field mutated behind the
//! caller's back, so a strategy can be driven over a literal event list in a unit test.
//!
//! Every `EventTransformer` is also a [`MethodTransform`], the object-safe form the
//! [`Pipeline`] stores. A pipeline is an ordered list of stages, each bound to a method name;
//! the stages matching a method run in order, each consuming the previous stage's output.

use std::fmt;

use crate::{
    assembly::{Instruction, LabelAllocator},
    logger::Logger,
};

/// Per-method information available to transformers.
pub struct TransformContext<'a> {
    /// Internal name of the class being rewritten
    pub class_name: &'a str,
    /// Name of the method being rewritten
    pub method_name: &'a str,
    /// Descriptor of the method being rewritten
    pub descriptor: &'a str,
    /// Source of fresh labels that cannot collide with the method's existing ones
    pub labels: &'a mut LabelAllocator,
    /// Diagnostic sink
    pub logger: &'a dyn Logger,
}

impl fmt::Debug for TransformContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformContext")
            .field("class_name", &self.class_name)
            .field("method_name", &self.method_name)
            .field("descriptor", &self.descriptor)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

/// The anchor pattern a transformer needs was not present in the method.
///
/// This is not an error: the class is left exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMismatch {
    /// What was missing
    pub reason: String,
}

impl PatternMismatch {
    /// Creates a mismatch with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        PatternMismatch {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PatternMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pattern not matched: {}", self.reason)
    }
}

/// Result of one transformer step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S> {
    /// State for the next event
    pub state: S,
    /// Events emitted in place of the observed one
    pub emit: Vec<Instruction>,
}

impl<S> Transition<S> {
    /// Emits the observed event unchanged.
    pub fn pass(state: S, event: &Instruction) -> Self {
        Transition {
            state,
            emit: vec![event.clone()],
        }
    }

    /// Emits the given events.
    pub fn emit(state: S, emit: Vec<Instruction>) -> Self {
        Transition { state, emit }
    }
}

/// A state machine over one method's event stream.
pub trait EventTransformer: Send + Sync {
    /// Per-traversal state
    type State;

    /// State before the first event.
    fn initial(&self) -> Self::State;

    /// Observes one event.
    ///
    /// # Errors
    /// Returns [`PatternMismatch`] if the method cannot be rewritten safely.
    fn step(
        &self,
        state: &Self::State,
        event: &Instruction,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Transition<Self::State>, PatternMismatch>;

    /// Events appended after the last one. Nothing by default.
    ///
    /// # Errors
    /// Returns [`PatternMismatch`] if the final state shows the method cannot be rewritten.
    fn finish(
        &self,
        _state: &Self::State,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Vec<Instruction>, PatternMismatch> {
        Ok(Vec::new())
    }
}

/// Object-safe transformation of a whole event list.
pub trait MethodTransform: Send + Sync {
    /// Transforms `events`, returning the full replacement list.
    ///
    /// # Errors
    /// Returns [`PatternMismatch`] if the method cannot be rewritten safely.
    fn transform(
        &self,
        events: &[Instruction],
        ctx: &mut TransformContext<'_>,
    ) -> Result<Vec<Instruction>, PatternMismatch>;
}

impl<T: EventTransformer> MethodTransform for T {
    fn transform(
        &self,
        events: &[Instruction],
        ctx: &mut TransformContext<'_>,
    ) -> Result<Vec<Instruction>, PatternMismatch> {
        let mut state = self.initial();
        let mut output = Vec::with_capacity(events.len());
        for event in events {
            let Transition { state: next, emit } = self.step(&state, event, ctx)?;
            output.extend(emit);
            state = next;
        }
        output.extend(self.finish(&state, ctx)?);
        Ok(output)
    }
}

struct Stage {
    method_name: String,
    transform: Box<dyn MethodTransform>,
}

/// Ordered transformer stages, selected by method name.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| &stage.method_name))
            .finish()
    }
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Appends a stage that runs on methods called `method_name`.
    #[must_use]
    pub fn stage(mut self, method_name: &str, transform: impl MethodTransform + 'static) -> Self {
        self.stages.push(Stage {
            method_name: method_name.to_string(),
            transform: Box::new(transform),
        });
        self
    }

    /// Whether any stage runs on `method_name`.
    #[must_use]
    pub fn targets(&self, method_name: &str) -> bool {
        self.stages
            .iter()
            .any(|stage| stage.method_name == method_name)
    }

    /// Runs every stage bound to `ctx.method_name` in order.
    ///
    /// # Errors
    /// Returns the first [`PatternMismatch`] raised by a stage.
    pub fn run(
        &self,
        events: Vec<Instruction>,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Vec<Instruction>, PatternMismatch> {
        let mut events = events;
        for stage in &self.stages {
            if stage.method_name == ctx.method_name {
                events = stage.transform.transform(&events, ctx)?;
            }
        }
        Ok(events)
    }
}
