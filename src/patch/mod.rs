//! Patches: a target class plus the event-stream rewrites applied to its methods.
//!
//! A [`Patch`] pairs a [`ClassMatcher`] with a [`Pipeline`] of per-method transformers. When
//! applied to a parsed [`ClassBinary`], every method the pipeline targets is decoded, run
//! through its stages and, if its event stream changed, re-encoded. A [`PatternMismatch`]
//! from any method aborts the whole class before anything is encoded, so a class is either
//! fully rewritten or left exactly as received.
//!
//! # Example
//! ```rust
//! use hotpatch::patch::{strategies::ConstantReturn, Patch};
//!
//! let patch = Patch::new(
//!     "Log4j2_NoJndiLookup",
//!     "Disable JNDI lookups in log4j2",
//!     "org.apache.logging.log4j.core.lookup.JndiLookup",
//! )
//! .with_method("lookup", ConstantReturn::string("Patched JndiLookup::lookup()"));
//!
//! assert!(patch.targets("org/apache/logging/log4j/core/lookup/JndiLookup"));
//! assert!(!patch.targets("org/apache/logging/log4j/core/lookup/MainMapLookup"));
//! ```

mod matcher;
mod pipeline;
pub mod strategies;

pub use matcher::{matches, ClassMatcher};
pub use pipeline::{
    EventTransformer, MethodTransform, PatternMismatch, Pipeline, TransformContext, Transition,
};

use crate::{classfile::ClassBinary, logger::Logger, Result};

/// What applying a [`Patch`] to one class did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The named methods were rewritten and re-encoded into the class
    Rewritten {
        /// Names of the rewritten methods, in declaration order
        methods: Vec<String>,
    },
    /// No targeted method changed
    Unchanged,
    /// A transformer did not find its anchor pattern; the class was not modified
    PatternNotMatched {
        /// Method in which the pattern was missing
        method: String,
        /// Transformer's explanation
        reason: String,
    },
}

/// A named rewrite of one target class.
#[derive(Debug)]
pub struct Patch {
    name: String,
    description: String,
    matcher: ClassMatcher,
    pipeline: Pipeline,
}

impl Patch {
    /// Creates a patch for `target_class` (dotted or internal form) with no method stages.
    #[must_use]
    pub fn new(name: &str, description: &str, target_class: &str) -> Self {
        Patch {
            name: name.to_string(),
            description: description.to_string(),
            matcher: ClassMatcher::new(target_class),
            pipeline: Pipeline::new(),
        }
    }

    /// Adds a stage that transforms every method called `method_name`.
    #[must_use]
    pub fn with_method(mut self, method_name: &str, transform: impl MethodTransform + 'static) -> Self {
        self.pipeline = self.pipeline.stage(method_name, transform);
        self
    }

    /// Identity used in logs and by `--disable-<name>`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The target class predicate.
    #[must_use]
    pub fn matcher(&self) -> &ClassMatcher {
        &self.matcher
    }

    /// Whether `class_name` is this patch's target.
    #[must_use]
    pub fn targets(&self, class_name: &str) -> bool {
        self.matcher.matches(class_name)
    }

    /// Rewrites the targeted methods of `class` in place.
    ///
    /// `class` is only modified when the outcome is [`PatchOutcome::Rewritten`].
    ///
    /// # Errors
    /// Returns decoding and encoding errors of the targeted methods.
    pub fn apply(&self, class: &mut ClassBinary, logger: &dyn Logger) -> Result<PatchOutcome> {
        let mut rewritten = Vec::new();

        for index in 0..class.methods.len() {
            let method = class.method_context(index)?;
            if !self.pipeline.targets(&method.method_name) {
                continue;
            }
            let Some(mut body) = class.decode_method(index)? else {
                continue;
            };

            let mut labels = body.labels.clone();
            let mut ctx = TransformContext {
                class_name: &method.class_name,
                method_name: &method.method_name,
                descriptor: &method.descriptor,
                labels: &mut labels,
                logger,
            };
            match self.pipeline.run(body.instructions.clone(), &mut ctx) {
                Ok(events) if events == body.instructions => {}
                Ok(events) => {
                    body.instructions = events;
                    body.labels = labels;
                    rewritten.push((index, method.method_name, body));
                }
                Err(mismatch) => {
                    log!(
                        logger,
                        "Patch {} not applied to {}::{}: {}",
                        self.name,
                        method.class_name,
                        method.method_name,
                        mismatch
                    );
                    return Ok(PatchOutcome::PatternNotMatched {
                        method: method.method_name,
                        reason: mismatch.reason,
                    });
                }
            }
        }

        if rewritten.is_empty() {
            return Ok(PatchOutcome::Unchanged);
        }

        let mut methods = Vec::with_capacity(rewritten.len());
        for (index, name, body) in rewritten {
            class.encode_method(index, &body)?;
            methods.push(name);
        }
        Ok(PatchOutcome::Rewritten { methods })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{opcodes, Instruction, InvokeKind, JumpKind, MethodBody, ReturnKind},
        classfile::MethodAccessFlags,
        logger::NullLogger,
        patch::strategies::{BranchInversion, ConstantReturn, GuardInjection},
        test::{
            jndi_lookup_class, simple_class, spring_class, RecordingLogger,
            CACHED_INTROSPECTION_RESULTS, JNDI_LOOKUP,
        },
    };

    fn jndi_patch() -> Patch {
        Patch::new("Log4j2_NoJndiLookup", "Disable JNDI lookups in log4j2", JNDI_LOOKUP)
            .with_method("lookup", ConstantReturn::string("Patched JndiLookup::lookup()"))
    }

    #[test]
    fn lookup_rewritten() {
        let mut class = ClassBinary::parse(&jndi_lookup_class()).unwrap();
        let outcome = jndi_patch().apply(&mut class, &NullLogger).unwrap();
        assert_eq!(
            outcome,
            PatchOutcome::Rewritten {
                methods: vec!["lookup".to_string()]
            }
        );

        let reparsed = ClassBinary::parse(&class.to_bytes().unwrap()).unwrap();
        let index = reparsed.methods_named("lookup").unwrap()[0];
        let body = reparsed.decode_method(index).unwrap().unwrap();
        let code: Vec<_> = body
            .instructions
            .iter()
            .filter(|event| !matches!(event, Instruction::Label(_)))
            .collect();
        assert_eq!(
            code,
            vec![
                &Instruction::ldc_string("Patched JndiLookup::lookup()"),
                &Instruction::Return(ReturnKind::Reference)
            ]
        );
        assert!(body.exception_handlers.is_empty());
    }

    #[test]
    fn untargeted_methods_untouched() {
        let bytes = simple_class();
        let mut class = ClassBinary::parse(&bytes).unwrap();
        let patch = Patch::new("Nothing", "", "Simple")
            .with_method("missing", ConstantReturn::string("x"));
        assert_eq!(patch.apply(&mut class, &NullLogger).unwrap(), PatchOutcome::Unchanged);
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn mismatch_leaves_class_unmodified() {
        // `Class.class == beanClass` before the logger read, but no loop around it.
        let mut body = MethodBody::new(2);
        let after = body.labels.allocate();
        body.instructions = vec![
            Instruction::aload(0),
            Instruction::MethodCall {
                kind: InvokeKind::Special,
                owner: "java/lang/Object".into(),
                name: "<init>".into(),
                descriptor: "()V".into(),
                interface: false,
            },
            Instruction::ldc_class("java/lang/Class"),
            Instruction::aload(1),
            Instruction::Jump(JumpKind::IfACmpNe, after),
            Instruction::Label(after),
            Instruction::get_static(CACHED_INTROSPECTION_RESULTS, "logger", "Ljava/lang/Object;"),
            Instruction::Raw(opcodes::POP),
            Instruction::Return(ReturnKind::Void),
        ];
        let mut class =
            ClassBinary::new(CACHED_INTROSPECTION_RESULTS, Some("java/lang/Object"), 52).unwrap();
        class
            .add_method(MethodAccessFlags::PUBLIC, "<init>", "(Ljava/lang/Class;)V", Some(&body))
            .unwrap();
        let bytes = class.to_bytes().unwrap();

        let patch = Patch::new("Guard", "", CACHED_INTROSPECTION_RESULTS)
            .with_method("<init>", BranchInversion::new("classLoader", JumpKind::IfNe))
            .with_method("<init>", GuardInjection::default());
        let logger = RecordingLogger::default();
        let mut class = ClassBinary::parse(&bytes).unwrap();
        let outcome = patch.apply(&mut class, &logger).unwrap();

        assert!(matches!(
            outcome,
            PatchOutcome::PatternNotMatched { ref method, .. } if method == "<init>"
        ));
        assert!(logger.contains("Patch Guard not applied"));
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn spring_guard_rewritten_once() {
        let patch = Patch::new("Guard", "", CACHED_INTROSPECTION_RESULTS)
            .with_method("<init>", GuardInjection::default());

        let mut class = ClassBinary::parse(&spring_class()).unwrap();
        assert!(matches!(
            patch.apply(&mut class, &NullLogger).unwrap(),
            PatchOutcome::Rewritten { .. }
        ));

        let mut again = ClassBinary::parse(&class.to_bytes().unwrap()).unwrap();
        assert_eq!(patch.apply(&mut again, &NullLogger).unwrap(), PatchOutcome::Unchanged);
    }
}
