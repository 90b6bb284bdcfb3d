//! Routing class files to the first matching patch.
//!
//! [`Dispatcher::apply`] is the core entry point: given a class name and its bytes it either
//! returns the rewritten bytes or [`Rewrite::Unchanged`]. Classes that no enabled patch targets
//! are never parsed. A class that a patch targets but that does not contain the patch's anchor
//! pattern is also `Unchanged`; only malformed input and encoding failures are errors.
//!
//! [`RewriteResult`] is the boundary form of the same outcome, with errors reduced to their
//! [`ErrorKind`], for hosts that must not see Rust error types.
//!
//! # Example
//! ```rust
//! use hotpatch::{config::HotPatchConfig, dispatcher::Dispatcher, registry::PatchRegistry, Rewrite};
//!
//! let dispatcher = Dispatcher::from_config(&HotPatchConfig::default(), &PatchRegistry::builtin())?;
//! assert!(dispatcher.is_target("org.apache.logging.log4j.core.lookup.JndiLookup"));
//!
//! // Not a target: returned without even looking at the bytes.
//! let result = dispatcher.apply("com/example/Main", &[0xDE, 0xAD])?;
//! assert_eq!(result, Rewrite::Unchanged);
//! # Ok::<(), hotpatch::Error>(())
//! ```

use std::sync::Arc;

use rayon::prelude::*;

use crate::{
    classfile::ClassBinary,
    config::HotPatchConfig,
    logger::Logger,
    patch::{Patch, PatchOutcome},
    registry::PatchRegistry,
    ErrorKind, Result,
};

/// Outcome of dispatching one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Keep the original bytes in effect
    Unchanged,
    /// Replace the class with these bytes
    Rewritten(Vec<u8>),
}

/// Host-boundary outcome of dispatching one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteResult {
    /// Keep the original bytes in effect
    Unchanged,
    /// Replace the class with these bytes
    Rewritten(Vec<u8>),
    /// The class could not be processed; keep the original bytes in effect
    Error(ErrorKind),
}

impl From<Result<Rewrite>> for RewriteResult {
    fn from(result: Result<Rewrite>) -> Self {
        match result {
            Ok(Rewrite::Unchanged) => RewriteResult::Unchanged,
            Ok(Rewrite::Rewritten(bytes)) => RewriteResult::Rewritten(bytes),
            Err(error) => RewriteResult::Error(error.kind()),
        }
    }
}

/// Applies the first matching patch of `patches` to `bytes`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] if a targeted class
/// does not parse, and encoding errors if the rewritten class cannot be serialized.
pub fn apply(
    class_name: &str,
    bytes: &[u8],
    patches: &[Arc<Patch>],
    logger: &dyn Logger,
) -> Result<Rewrite> {
    let Some(patch) = patches.iter().find(|patch| patch.targets(class_name)) else {
        return Ok(Rewrite::Unchanged);
    };

    log!(logger, "Transforming {} with patch {}", class_name, patch.name());
    let mut class = ClassBinary::parse(bytes)?;
    match patch.apply(&mut class, logger)? {
        PatchOutcome::Rewritten { methods } => {
            log!(
                logger,
                "Patched {}::{} with patch {}",
                class_name,
                methods.join(", "),
                patch.name()
            );
            Ok(Rewrite::Rewritten(class.to_bytes()?))
        }
        PatchOutcome::Unchanged | PatchOutcome::PatternNotMatched { .. } => {
            log!(logger, "{} left unchanged by patch {}", class_name, patch.name());
            Ok(Rewrite::Unchanged)
        }
    }
}

/// The enabled patches together with the logger they report to.
#[derive(Clone)]
pub struct Dispatcher {
    patches: Vec<Arc<Patch>>,
    logger: Arc<dyn Logger>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("patches", &self.patches)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatches over `patches`, in order.
    #[must_use]
    pub fn new(patches: Vec<Arc<Patch>>, logger: Arc<dyn Logger>) -> Self {
        Dispatcher { patches, logger }
    }

    /// Dispatches over the patches `config` enables, logging if `config` is verbose.
    ///
    /// # Errors
    /// Returns the errors of [`HotPatchConfig::enabled_patches`].
    pub fn from_config(config: &HotPatchConfig, registry: &PatchRegistry) -> Result<Self> {
        Ok(Dispatcher::new(
            config.enabled_patches(registry)?,
            config.logger(),
        ))
    }

    /// The enabled patches, in dispatch order.
    #[must_use]
    pub fn patches(&self) -> &[Arc<Patch>] {
        &self.patches
    }

    /// The diagnostic logger.
    #[must_use]
    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    /// The patch that would rewrite `class_name`, if any.
    #[must_use]
    pub fn find_patch(&self, class_name: &str) -> Option<&Arc<Patch>> {
        self.patches.iter().find(|patch| patch.targets(class_name))
    }

    /// Whether some enabled patch targets `class_name`.
    #[must_use]
    pub fn is_target(&self, class_name: &str) -> bool {
        self.find_patch(class_name).is_some()
    }

    /// Rewrites `bytes` with the first patch that targets `class_name`.
    ///
    /// # Errors
    /// See [`apply`].
    pub fn apply(&self, class_name: &str, bytes: &[u8]) -> Result<Rewrite> {
        apply(class_name, bytes, &self.patches, self.logger.as_ref())
    }

    /// [`apply`](Self::apply) in boundary form; errors are logged and reported by kind.
    #[must_use]
    pub fn transform(&self, class_name: &str, bytes: &[u8]) -> RewriteResult {
        let result = self.apply(class_name, bytes);
        if let Err(error) = &result {
            log!(self.logger(), "Failed to transform {}: {}", class_name, error);
        }
        result.into()
    }

    /// Transforms independent `(class name, bytes)` pairs in parallel. Results are in input
    /// order.
    #[must_use]
    pub fn apply_batch<N, B>(&self, classes: &[(N, B)]) -> Vec<RewriteResult>
    where
        N: AsRef<str> + Sync,
        B: AsRef<[u8]> + Sync,
    {
        classes
            .par_iter()
            .map(|(class_name, bytes)| self.transform(class_name.as_ref(), bytes.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        logger::NullLogger,
        registry::{log4j, spring},
        test::{jndi_lookup_class, simple_class, spring_class, RecordingLogger, JNDI_LOOKUP},
        Error,
    };

    fn dispatcher(logger: Arc<dyn Logger>) -> Dispatcher {
        Dispatcher::new(
            vec![
                Arc::new(log4j::no_jndi_lookup()),
                Arc::new(spring::block_class_access_except_name()),
            ],
            logger,
        )
    }

    #[test]
    fn untargeted_classes_are_not_parsed() {
        let dispatcher = dispatcher(Arc::new(NullLogger));
        assert_eq!(dispatcher.apply("Simple", b"not a class").unwrap(), Rewrite::Unchanged);
        assert_eq!(dispatcher.apply("Simple", &simple_class()).unwrap(), Rewrite::Unchanged);
    }

    #[test]
    fn targeted_class_rewritten() {
        let logger = RecordingLogger::default();
        let dispatcher = dispatcher(Arc::new(logger.clone()));
        let bytes = jndi_lookup_class();

        let Rewrite::Rewritten(patched) = dispatcher.apply(JNDI_LOOKUP, &bytes).unwrap() else {
            panic!("JndiLookup was not rewritten");
        };
        assert_ne!(patched, bytes);
        assert!(logger.contains("with patch Log4j2_NoJndiLookup"));

        // The dotted name selects the same patch.
        let dotted = JNDI_LOOKUP.replace('/', ".");
        assert!(matches!(
            dispatcher.apply(&dotted, &bytes).unwrap(),
            Rewrite::Rewritten(_)
        ));

        // Re-applying to the output changes nothing more.
        assert_eq!(dispatcher.apply(JNDI_LOOKUP, &patched).unwrap(), Rewrite::Unchanged);
    }

    #[test]
    fn first_match_wins() {
        let logger = RecordingLogger::default();
        let dispatcher = Dispatcher::new(
            vec![
                Arc::new(spring::block_class_access()),
                Arc::new(spring::block_class_access_except_name()),
            ],
            Arc::new(logger.clone()),
        );
        let class = spring::CACHED_INTROSPECTION_RESULTS;
        assert_eq!(
            dispatcher.find_patch(class).unwrap().description(),
            "Fix CVE-2022-22965 (Spring4Shell) blocking all class access"
        );
        assert!(matches!(
            dispatcher.apply(class, &spring_class()).unwrap(),
            Rewrite::Rewritten(_)
        ));
        assert!(logger.contains("Changing ifne to goto"));
        assert!(!logger.contains("Injecting guard"));
    }

    #[test]
    fn malformed_target_is_an_error() {
        let dispatcher = dispatcher(Arc::new(NullLogger));
        let mut bytes = jndi_lookup_class();
        bytes.truncate(bytes.len() / 2);

        assert!(matches!(
            dispatcher.apply(JNDI_LOOKUP, &bytes),
            Err(Error::OutOfBounds | Error::Malformed { .. })
        ));
        assert_eq!(
            dispatcher.transform(JNDI_LOOKUP, &bytes),
            RewriteResult::Error(ErrorKind::MalformedBinary)
        );
    }

    #[test]
    fn batch_keeps_order() {
        let dispatcher = dispatcher(Arc::new(NullLogger));
        let classes = vec![
            ("Simple".to_string(), simple_class()),
            (JNDI_LOOKUP.to_string(), jndi_lookup_class()),
            (spring::CACHED_INTROSPECTION_RESULTS.to_string(), spring_class()),
            (JNDI_LOOKUP.to_string(), vec![0xCA, 0xFE]),
        ];
        let results = dispatcher.apply_batch(&classes);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0], RewriteResult::Unchanged);
        assert!(matches!(results[1], RewriteResult::Rewritten(_)));
        assert!(matches!(results[2], RewriteResult::Rewritten(_)));
        assert_eq!(results[3], RewriteResult::Error(ErrorKind::MalformedBinary));
    }
}
