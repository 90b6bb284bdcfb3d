//! Multi-anchor injection of a nested property guard into a loop body.
//!
//! The detector watches for the shape compiled from
//!
//! ```text
//! PropertyDescriptor pd = pds[i];              // astore S
//! if (Class.class == beanClass && ...) {       // ldc Class; ...
//!     continue;                                // goto C
//! }
//! logger.trace(...);                           // getstatic logger  <- trigger
//! ```
//!
//! and, right before the trigger, inserts
//!
//! ```text
//! if (Class.class == beanClass &&
//!         !("name".equals(pd.getName()) || pd.getName().endsWith("Name"))) {
//!     continue;
//! }
//! if (pd.getPropertyType() != null &&
//!         (ClassLoader.class.isAssignableFrom(pd.getPropertyType()) ||
//!          ProtectionDomain.class.isAssignableFrom(pd.getPropertyType()))) {
//!     continue;
//! }
//! ```
//!
//! reusing the remembered slot `S` and label `C`. `C` is the first `goto` target of the window
//! that is not itself placed inside the window: wide constructors compile the type compare to
//! `if_acmpeq B; goto N; B: goto C; N: getstatic logger`, and `N` would send the guard back to
//! its own start. If the trigger is reached without both, the method is rejected with
//! [`PatternMismatch`] instead of being partially rewritten.

use crate::{
    assembly::{ConstantValue, FieldAccessKind, Instruction, JumpKind, Label, ValueKind},
    patch::{EventTransformer, PatternMismatch, TransformContext, Transition},
};

const PROPERTY_DESCRIPTOR: &str = "java/beans/PropertyDescriptor";

/// Injects the property guard of the module documentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardInjection {
    /// Class constant that opens the type-compare window
    pub type_constant: String,
    /// Name of the static field whose read triggers the injection
    pub trigger_field: String,
    /// Local slot holding the value compared against `type_constant`
    pub compared_slot: u16,
    /// Property name that stays accessible
    pub allowed_name: String,
    /// Property name suffix that stays accessible
    pub allowed_suffix: String,
    /// Property types that are always skipped
    pub disallowed_types: Vec<String>,
}

impl Default for GuardInjection {
    fn default() -> Self {
        GuardInjection {
            type_constant: "java/lang/Class".to_string(),
            trigger_field: "logger".to_string(),
            compared_slot: 1,
            allowed_name: "name".to_string(),
            allowed_suffix: "Name".to_string(),
            disallowed_types: vec![
                "java/lang/ClassLoader".to_string(),
                "java/security/ProtectionDomain".to_string(),
            ],
        }
    }
}

/// Detector state, threaded through the traversal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuardState {
    /// The type constant was loaded and the trigger not yet reached
    pub type_compare: bool,
    /// `goto` targets seen inside the type-compare window, in order
    pub continue_candidates: Vec<Label>,
    /// Labels placed inside the type-compare window
    pub placed: Vec<Label>,
    /// Last reference store before the window opened
    pub subject_slot: Option<u16>,
    /// A disallowed type constant was loaded inside the window
    pub already_guarded: bool,
    /// The guard was injected (or found) in this method
    pub patched: bool,
}

impl GuardState {
    /// The first `goto` target of the window that does not lead back into the window.
    #[must_use]
    pub fn continue_label(&self) -> Option<Label> {
        self.continue_candidates
            .iter()
            .find(|label| !self.placed.contains(label))
            .copied()
    }
}

impl GuardInjection {
    fn get_name(&self) -> Instruction {
        Instruction::invoke_virtual(PROPERTY_DESCRIPTOR, "getName", "()Ljava/lang/String;")
    }

    fn get_property_type(&self) -> Instruction {
        Instruction::invoke_virtual(PROPERTY_DESCRIPTOR, "getPropertyType", "()Ljava/lang/Class;")
    }

    /// The guard, ending with a placed fresh label after which the trigger resumes.
    fn guard(
        &self,
        subject: u16,
        continue_label: Label,
        ctx: &mut TransformContext<'_>,
    ) -> Vec<Instruction> {
        let (checks, after_guard) = (ctx.labels.allocate(), ctx.labels.allocate());
        let subject = Instruction::aload(subject);

        let mut events = vec![
            Instruction::ldc_class(&self.type_constant),
            Instruction::aload(self.compared_slot),
            Instruction::Jump(JumpKind::IfACmpNe, checks),
            Instruction::ldc_string(&self.allowed_name),
            subject.clone(),
            self.get_name(),
            Instruction::invoke_virtual("java/lang/String", "equals", "(Ljava/lang/Object;)Z"),
            Instruction::Jump(JumpKind::IfNe, checks),
            subject.clone(),
            self.get_name(),
            Instruction::ldc_string(&self.allowed_suffix),
            Instruction::invoke_virtual("java/lang/String", "endsWith", "(Ljava/lang/String;)Z"),
            Instruction::Jump(JumpKind::IfNe, checks),
            Instruction::Jump(JumpKind::Goto, continue_label),
            Instruction::Label(checks),
            subject.clone(),
            self.get_property_type(),
            Instruction::Jump(JumpKind::IfNull, after_guard),
        ];

        for (position, disallowed) in self.disallowed_types.iter().enumerate() {
            events.extend([
                Instruction::ldc_class(disallowed),
                subject.clone(),
                self.get_property_type(),
                Instruction::invoke_virtual(
                    "java/lang/Class",
                    "isAssignableFrom",
                    "(Ljava/lang/Class;)Z",
                ),
            ]);
            if position + 1 < self.disallowed_types.len() {
                events.push(Instruction::Jump(JumpKind::IfNe, continue_label));
            } else {
                events.push(Instruction::Jump(JumpKind::IfEq, after_guard));
                events.push(Instruction::Jump(JumpKind::Goto, continue_label));
            }
        }

        events.push(Instruction::Label(after_guard));
        events
    }
}

impl EventTransformer for GuardInjection {
    type State = GuardState;

    fn initial(&self) -> GuardState {
        GuardState::default()
    }

    fn step(
        &self,
        state: &GuardState,
        event: &Instruction,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Transition<GuardState>, PatternMismatch> {
        let mut next = state.clone();

        match event {
            Instruction::Label(label) if state.type_compare => {
                next.placed.push(*label);
            }
            Instruction::LoadConstant(ConstantValue::Class(name)) => {
                if !state.type_compare && !state.patched && *name == self.type_constant {
                    log!(ctx.logger, "Found 'ldc class {}'", name);
                    next.type_compare = true;
                } else if state.type_compare && self.disallowed_types.contains(name) {
                    next.already_guarded = true;
                }
            }
            Instruction::Jump(JumpKind::Goto, label) if state.type_compare => {
                log!(ctx.logger, "Found the GOTO for the continue: {}", label);
                next.continue_candidates.push(*label);
            }
            Instruction::StoreLocal(ValueKind::Reference, slot)
                if !state.type_compare && !state.patched =>
            {
                next.subject_slot = Some(*slot);
            }
            Instruction::FieldAccess {
                kind: FieldAccessKind::GetStatic,
                name,
                ..
            } if state.type_compare && !state.patched && *name == self.trigger_field => {
                next.type_compare = false;
                next.patched = true;

                if state.already_guarded {
                    log!(ctx.logger, "{}::{} is already guarded", ctx.class_name, ctx.method_name);
                    return Ok(Transition::pass(next, event));
                }

                for label in &state.continue_candidates {
                    if state.placed.contains(label) {
                        log!(
                            ctx.logger,
                            "Ignoring the GOTO to {}, it stays inside the compare",
                            label
                        );
                    }
                }

                let (Some(continue_label), Some(subject)) =
                    (state.continue_label(), state.subject_slot)
                else {
                    return Err(PatternMismatch::new(format!(
                        "no loop-continue label or subject slot before getstatic {}",
                        self.trigger_field
                    )));
                };

                log!(
                    ctx.logger,
                    "Injecting guard on slot {} continuing at {} in {}::{}",
                    subject,
                    continue_label,
                    ctx.class_name,
                    ctx.method_name
                );
                let mut emit = self.guard(subject, continue_label, ctx);
                emit.push(event.clone());
                return Ok(Transition::emit(next, emit));
            }
            _ => {}
        }

        Ok(Transition::pass(next, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{opcodes, ReturnKind},
        logger::NullLogger,
        patch::MethodTransform,
        test::{context, count, labels_after, spring_constructor_body, RecordingLogger},
    };

    fn trigger() -> Instruction {
        Instruction::get_static(
            "org/springframework/beans/CachedIntrospectionResults",
            "logger",
            "Lorg/apache/commons/logging/Log;",
        )
    }

    fn run(events: &[Instruction]) -> Result<Vec<Instruction>, PatternMismatch> {
        let mut labels = labels_after(10);
        let mut ctx = context("<init>", &mut labels, &NullLogger);
        GuardInjection::default().transform(events, &mut ctx)
    }

    /// astore 7; ldc Class; goto L4; getstatic logger; return
    fn anchors() -> Vec<Instruction> {
        vec![
            Instruction::StoreLocal(ValueKind::Reference, 7),
            Instruction::ldc_class("java/lang/Class"),
            Instruction::aload(1),
            Instruction::Jump(JumpKind::IfACmpNe, Label(5)),
            Instruction::Jump(JumpKind::Goto, Label(4)),
            Instruction::Label(Label(5)),
            trigger(),
            Instruction::Raw(opcodes::POP),
            Instruction::Label(Label(4)),
            Instruction::Return(ReturnKind::Void),
        ]
    }

    #[test]
    fn anchors_trigger_injection() {
        let events = anchors();
        let output = run(&events).unwrap();

        // Fresh labels come after every label of the method.
        let (checks, after_guard) = (Label(10), Label(11));
        let trigger_at = output.iter().position(|e| *e == trigger()).unwrap();
        assert_eq!(output[trigger_at - 1], Instruction::Label(after_guard));
        assert_eq!(count(&output, &Instruction::Label(checks)), 1);
        assert_eq!(count(&output, &Instruction::aload(7)), 5);
        assert_eq!(count(&output, &Instruction::Jump(JumpKind::Goto, Label(4))), 3);
        assert_eq!(count(&output, &Instruction::Jump(JumpKind::IfNe, Label(4))), 1);
        assert_eq!(count(&output, &Instruction::Jump(JumpKind::IfEq, after_guard)), 1);
        assert_eq!(count(&output, &Instruction::Jump(JumpKind::IfNull, after_guard)), 1);
        assert_eq!(count(&output, &Instruction::ldc_class("java/lang/ClassLoader")), 1);
        assert_eq!(
            count(&output, &Instruction::ldc_class("java/security/ProtectionDomain")),
            1
        );

        // Everything before the trigger is untouched.
        assert_eq!(output[..6], events[..6]);
        assert_eq!(output.len(), events.len() + 30);
    }

    #[test]
    fn missing_trigger_leaves_stream_unmodified() {
        let events: Vec<_> = anchors().into_iter().filter(|e| *e != trigger()).collect();
        assert_eq!(run(&events).unwrap(), events);
    }

    #[test]
    fn missing_type_constant_leaves_stream_unmodified() {
        let events: Vec<_> = anchors()
            .into_iter()
            .filter(|e| *e != Instruction::ldc_class("java/lang/Class"))
            .collect();
        assert_eq!(run(&events).unwrap(), events);
    }

    #[test]
    fn missing_continue_label_is_pattern_mismatch() {
        let events: Vec<_> = anchors()
            .into_iter()
            .filter(|e| *e != Instruction::Jump(JumpKind::Goto, Label(4)))
            .collect();
        assert!(run(&events).is_err());
    }

    #[test]
    fn missing_subject_slot_is_pattern_mismatch() {
        let events: Vec<_> = anchors().into_iter().skip(1).collect();
        let error = run(&events).unwrap_err();
        assert!(error.reason.contains("getstatic logger"));
    }

    /// astore 5; ldc Class; aload 1; if_acmpeq L1; goto L2; L1: goto L3; L2: getstatic logger;
    /// pop; L3: return
    fn wide_compare() -> Vec<Instruction> {
        vec![
            Instruction::StoreLocal(ValueKind::Reference, 5),
            Instruction::ldc_class("java/lang/Class"),
            Instruction::aload(1),
            Instruction::Jump(JumpKind::IfACmpEq, Label(1)),
            Instruction::Jump(JumpKind::Goto, Label(2)),
            Instruction::Label(Label(1)),
            Instruction::Jump(JumpKind::Goto, Label(3)),
            Instruction::Label(Label(2)),
            trigger(),
            Instruction::Raw(opcodes::POP),
            Instruction::Label(Label(3)),
            Instruction::Return(ReturnKind::Void),
        ]
    }

    #[test]
    fn wide_compare_continues_past_the_trigger() {
        let logger = RecordingLogger::default();
        let mut labels = labels_after(10);
        let mut ctx = context("<init>", &mut labels, &logger);
        let output = GuardInjection::default()
            .transform(&wide_compare(), &mut ctx)
            .unwrap();

        assert!(logger.contains("continuing at L3"));
        assert!(logger.contains("Ignoring the GOTO to L2"));
        // Only the original jump targets the trigger's own label.
        let into_trigger = output
            .iter()
            .filter(|e| e.branch_targets().contains(&Label(2)))
            .count();
        assert_eq!(into_trigger, 1);
        assert_eq!(count(&output, &Instruction::Jump(JumpKind::Goto, Label(3))), 1 + 2);
        assert_eq!(count(&output, &Instruction::Jump(JumpKind::IfNe, Label(3))), 1);
    }

    #[test]
    fn continue_inside_the_compare_is_pattern_mismatch() {
        let events: Vec<_> = wide_compare()
            .into_iter()
            .filter(|e| *e != Instruction::Jump(JumpKind::Goto, Label(3)))
            .collect();
        assert!(run(&events).is_err());

        // A backward `goto` to a label placed earlier in the window is rejected as well.
        let events = vec![
            Instruction::StoreLocal(ValueKind::Reference, 5),
            Instruction::ldc_class("java/lang/Class"),
            Instruction::Label(Label(1)),
            Instruction::aload(1),
            Instruction::Jump(JumpKind::Goto, Label(1)),
            trigger(),
            Instruction::Return(ReturnKind::Void),
        ];
        assert!(run(&events).is_err());
    }

    #[test]
    fn fires_once_per_method() {
        let mut events = anchors();
        events.insert(7, trigger());
        let output = run(&events).unwrap();
        assert_eq!(count(&output, &trigger()), 2);
        assert_eq!(count(&output, &Instruction::ldc_class("java/lang/ClassLoader")), 1);
    }

    #[test]
    fn spring_constructor() {
        let body = spring_constructor_body();
        let logger = RecordingLogger::default();
        let mut labels = body.labels.clone();
        let mut ctx = context("<init>", &mut labels, &logger);

        let output = GuardInjection::default()
            .transform(&body.instructions, &mut ctx)
            .unwrap();
        assert!(logger.contains("Found 'ldc class java/lang/Class'"));
        assert!(logger.contains("Found the GOTO for the continue: L2"));
        assert!(logger.contains("Injecting guard on slot 5 continuing at L2"));
        assert_eq!(count(&output, &Instruction::aload(5)), 3 + 5);

        // Re-applying to the patched stream finds the guard and changes nothing.
        let logger = RecordingLogger::default();
        let mut ctx = context("<init>", &mut labels, &logger);
        assert_eq!(
            GuardInjection::default().transform(&output, &mut ctx).unwrap(),
            output
        );
        assert!(logger.contains("already guarded"));
    }
}
