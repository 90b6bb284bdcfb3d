//! Host-side glue between a runtime's class-loading hooks and the [`Dispatcher`].
//!
//! The host owns everything outside the byte rewrite: it attaches to the process, reports
//! class-file events, installs rewritten bytes and persists which patch versions a process
//! already received. This module models those collaborators:
//!
//! - [`ClassFileEvent`] - one class offered for loading or redefinition
//! - [`VersionRecord`] - the per-process "applied version" store, with
//!   [`InMemoryVersionRecord`] as a concurrent in-process implementation
//! - [`HotPatchAgent`] - decides which families still need patching, then forwards events
//!
//! # Thread Safety
//!
//! [`HotPatchAgent::on_class_file`] takes `&self` and may be called from every class-loading
//! thread at once; each call is independent. Idempotence across attaches is enforced by the
//! version check in [`HotPatchAgent::attach`], not by locking inside the rewrite.
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use hotpatch::{
//!     agent::{HotPatchAgent, InMemoryVersionRecord, VersionRecord},
//!     config::HotPatchConfig,
//!     logger::NullLogger,
//!     registry::PatchRegistry,
//! };
//!
//! let registry = PatchRegistry::builtin();
//! let record = Arc::new(InMemoryVersionRecord::new());
//!
//! let agent = HotPatchAgent::attach(
//!     &HotPatchConfig::default(),
//!     &registry,
//!     record.clone(),
//!     Arc::new(NullLogger),
//! )?;
//! agent.commit();
//! assert_eq!(record.applied_version("spring"), Some(2));
//!
//! // A second attach finds everything applied and dispatches nothing.
//! let again = HotPatchAgent::attach(
//!     &HotPatchConfig::default(),
//!     &registry,
//!     record,
//!     Arc::new(NullLogger),
//! )?;
//! assert!(again.dispatcher().patches().is_empty());
//! # Ok::<(), hotpatch::Error>(())
//! ```

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;
use strum::{Display, IntoStaticStr};

use crate::{
    config::HotPatchConfig,
    dispatcher::{Dispatcher, RewriteResult},
    logger::Logger,
    registry::PatchRegistry,
    Result,
};

/// Why the host offers a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ClassFileKind {
    /// First definition of the class
    Load,
    /// Redefinition of an already loaded class
    Redefine,
}

/// A class offered by the host's class-loading machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFileEvent {
    /// Class name as reported by the host (dotted or internal form)
    pub class_name: String,
    /// The class file bytes
    pub bytes: Vec<u8>,
    /// Load or redefinition
    pub kind: ClassFileKind,
}

impl ClassFileEvent {
    /// A first definition of `class_name`.
    #[must_use]
    pub fn load(class_name: &str, bytes: Vec<u8>) -> Self {
        ClassFileEvent {
            class_name: class_name.to_string(),
            bytes,
            kind: ClassFileKind::Load,
        }
    }

    /// A redefinition of the already loaded `class_name`.
    #[must_use]
    pub fn redefine(class_name: &str, bytes: Vec<u8>) -> Self {
        ClassFileEvent {
            class_name: class_name.to_string(),
            bytes,
            kind: ClassFileKind::Redefine,
        }
    }
}

/// Per-process record of the patch version applied to each family.
pub trait VersionRecord: Send + Sync {
    /// Version applied to `family`, if any.
    fn applied_version(&self, family: &str) -> Option<u32>;

    /// Records that `version` of `family` is now applied.
    fn set_applied_version(&self, family: &str, version: u32);
}

/// A [`VersionRecord`] living in this process.
#[derive(Debug, Default)]
pub struct InMemoryVersionRecord {
    versions: DashMap<String, u32>,
}

impl InMemoryVersionRecord {
    /// An empty record.
    #[must_use]
    pub fn new() -> Self {
        InMemoryVersionRecord::default()
    }
}

impl VersionRecord for InMemoryVersionRecord {
    fn applied_version(&self, family: &str) -> Option<u32> {
        self.versions.get(family).map(|version| *version)
    }

    fn set_applied_version(&self, family: &str, version: u32) {
        self.versions.insert(family.to_string(), version);
    }
}

/// Message logged when no loaded class was a target at attach time.
pub const TARGETS_NOT_FOUND: &str = "Vulnerable classes were not found. This agent will continue \
    to run and transform the vulnerable class if it is loaded. Note that if you have shaded or \
    otherwise changed the package name for the target classes, then this tool may not find them.";

/// An attached agent: the dispatcher for the families that still need patching.
pub struct HotPatchAgent {
    dispatcher: Dispatcher,
    pending: Vec<(String, u32)>,
    record: Arc<dyn VersionRecord>,
    targets_seen: AtomicUsize,
}

impl std::fmt::Debug for HotPatchAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotPatchAgent")
            .field("dispatcher", &self.dispatcher)
            .field("pending", &self.pending)
            .field("targets_seen", &self.targets_seen)
            .finish_non_exhaustive()
    }
}

impl HotPatchAgent {
    /// Selects the enabled patch sets, skipping every family whose recorded version is at or
    /// above the requested one.
    ///
    /// # Errors
    /// Returns the configuration and registry errors of [`HotPatchConfig::enabled_sets`].
    pub fn attach(
        config: &HotPatchConfig,
        registry: &PatchRegistry,
        record: Arc<dyn VersionRecord>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let mut patches = Vec::new();
        let mut pending = Vec::new();

        for set in config.enabled_sets(registry)? {
            if let Some(applied) = record.applied_version(set.family()) {
                if applied >= set.version() {
                    log!(
                        logger.as_ref(),
                        "Skipping {} patches, patch version {} already applied",
                        set.family(),
                        applied
                    );
                    continue;
                }
            }

            pending.push((set.family().to_string(), set.version()));
            for patch in set.patches() {
                if config.is_disabled(patch.name()) {
                    log!(logger.as_ref(), "Patch {} is disabled", patch.name());
                    continue;
                }
                log!(logger.as_ref(), "Loading patch {}", patch.name());
                patches.push(patch.clone());
            }
        }

        if pending.is_empty() {
            log!(logger.as_ref(), "Info: hot patch agent already loaded");
        }

        Ok(HotPatchAgent {
            dispatcher: Dispatcher::new(patches, logger),
            pending,
            record,
            targets_seen: AtomicUsize::new(0),
        })
    }

    /// The dispatcher built at attach time.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// `(family, version)` pairs that [`commit`](Self::commit) will record.
    #[must_use]
    pub fn pending_versions(&self) -> &[(String, u32)] {
        &self.pending
    }

    /// Number of offered classes that an enabled patch targeted.
    #[must_use]
    pub fn targets_seen(&self) -> usize {
        self.targets_seen.load(Ordering::Relaxed)
    }

    /// Handles one class-load or redefinition event.
    #[must_use]
    pub fn on_class_file(&self, event: &ClassFileEvent) -> RewriteResult {
        if let Some(patch) = self.dispatcher.find_patch(&event.class_name) {
            self.targets_seen.fetch_add(1, Ordering::Relaxed);
            log!(
                self.dispatcher.logger(),
                "{} {} matched by patch {}",
                event.kind,
                event.class_name,
                patch.name()
            );
        }
        self.dispatcher
            .transform(&event.class_name, &event.bytes)
    }

    /// Redefines the classes already loaded at attach time, in parallel.
    ///
    /// Logs [`TARGETS_NOT_FOUND`] if none of them is a target.
    #[must_use]
    pub fn retransform_loaded(&self, loaded: &[ClassFileEvent]) -> Vec<RewriteResult> {
        let targets = loaded
            .iter()
            .filter(|event| self.dispatcher.is_target(&event.class_name))
            .count();
        self.targets_seen.fetch_add(targets, Ordering::Relaxed);
        if targets == 0 {
            log!(self.dispatcher.logger(), "{}", TARGETS_NOT_FOUND);
        }

        let classes: Vec<(&str, &[u8])> = loaded
            .iter()
            .map(|event| (event.class_name.as_str(), event.bytes.as_slice()))
            .collect();
        self.dispatcher.apply_batch(&classes)
    }

    /// Records the versions selected at attach time in the [`VersionRecord`].
    pub fn commit(&self) {
        for (family, version) in &self.pending {
            self.record.set_applied_version(family, *version);
            log!(
                self.dispatcher.logger(),
                "Recorded {} patch version {}",
                family,
                version
            );
        }
    }
}
