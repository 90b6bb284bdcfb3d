//! Agent configuration: verbosity and patch enablement.
//!
//! [`HotPatchConfig`] is parsed from an agent-style argument string whose tokens are separated
//! by commas or whitespace:
//!
//! | token                          | effect                                        |
//! |--------------------------------|-----------------------------------------------|
//! | `--verbose`                    | log diagnostics                               |
//! | `--log4jFixerVerbose=<bool>`   | log diagnostics if `true`                     |
//! | `--quiet`                      | never log diagnostics                         |
//! | `--disable-<PatchName>`        | skip the named patch in every enabled set     |
//! | `<family>=<version>`           | select a version; `0` disables the family     |
//!
//! An empty argument string is verbose. A non-empty one is verbose only if it asks for it;
//! the last verbosity token wins, except that `--quiet` always wins. Families without an
//! explicit version use their latest one.
//!
//! # Example
//! ```rust
//! use hotpatch::{config::HotPatchConfig, registry::PatchRegistry};
//!
//! let registry = PatchRegistry::builtin();
//! let config: HotPatchConfig = "spring=1,--disable-Log4j2_NoJndiLookup".parse()?;
//! assert!(!config.verbose);
//!
//! let sets = config.enabled_sets(&registry)?;
//! assert_eq!(sets.len(), 2);
//! assert_eq!(config.enabled_patches(&registry)?.len(), 1);
//! # Ok::<(), hotpatch::Error>(())
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
    sync::Arc,
};

use crate::{
    logger::{Logger, NullLogger, TracingLogger},
    patch::Patch,
    registry::{PatchRegistry, PatchSet},
    Error, Result,
};

const VERBOSE: &str = "--verbose";
const QUIET: &str = "--quiet";
const VERBOSE_FLAG: &str = "--log4jFixerVerbose=";
const DISABLE: &str = "--disable-";

/// Explicit agent configuration, passed to the dispatcher and agent at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotPatchConfig {
    /// Whether diagnostics are logged
    pub verbose: bool,
    /// Names of patches that must not be applied
    pub disabled: BTreeSet<String>,
    /// Explicitly selected family versions
    pub versions: BTreeMap<String, u32>,
}

impl Default for HotPatchConfig {
    fn default() -> Self {
        HotPatchConfig {
            verbose: true,
            disabled: BTreeSet::new(),
            versions: BTreeMap::new(),
        }
    }
}

impl HotPatchConfig {
    /// Parses an agent argument string.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for unknown tokens, non-numeric versions and
    /// non-boolean `--log4jFixerVerbose` values.
    pub fn parse(args: &str) -> Result<Self> {
        let tokens: Vec<&str> = args
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .collect();

        let mut config = HotPatchConfig {
            verbose: tokens.is_empty(),
            ..HotPatchConfig::default()
        };
        let mut quiet = false;

        for token in tokens {
            if token == VERBOSE {
                config.verbose = true;
            } else if token == QUIET {
                quiet = true;
            } else if let Some(value) = token.strip_prefix(VERBOSE_FLAG) {
                let value = value.parse::<bool>().map_err(|_| {
                    Error::InvalidConfig(format!("'{token}' expects true or false"))
                })?;
                config.verbose = value;
            } else if let Some(name) = token.strip_prefix(DISABLE) {
                if name.is_empty() {
                    return Err(Error::InvalidConfig(format!("'{token}' names no patch")));
                }
                config.disabled.insert(name.to_string());
            } else if let Some((family, version)) = token.split_once('=') {
                if family.is_empty() || family.starts_with('-') {
                    return Err(Error::InvalidConfig(format!("unknown option '{token}'")));
                }
                let version = version.parse::<u32>().map_err(|_| {
                    Error::InvalidConfig(format!("'{version}' is not a version of {family}"))
                })?;
                config.versions.insert(family.to_string(), version);
            } else {
                return Err(Error::InvalidConfig(format!("unknown option '{token}'")));
            }
        }

        if quiet {
            config.verbose = false;
        }
        Ok(config)
    }

    /// `--log4jFixerVerbose=<verbose>`, for handing this verbosity on to another agent.
    #[must_use]
    pub fn verbose_flag(&self) -> String {
        format!("{VERBOSE_FLAG}{}", self.verbose)
    }

    /// [`TracingLogger`] when verbose, [`NullLogger`] otherwise.
    #[must_use]
    pub fn logger(&self) -> Arc<dyn Logger> {
        if self.verbose {
            Arc::new(TracingLogger)
        } else {
            Arc::new(NullLogger)
        }
    }

    /// Whether the patch called `name` was disabled.
    #[must_use]
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.contains(name)
    }

    /// The version of `family` to apply: the selected one, or the latest.
    ///
    /// # Errors
    /// Returns [`Error::UnknownFamily`] for an unknown family.
    pub fn requested_version(&self, registry: &PatchRegistry, family: &str) -> Result<u32> {
        match self.versions.get(family) {
            Some(version) => Ok(*version),
            None => registry.latest_version(family),
        }
    }

    /// The requested set of every family, in family order.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if a version was selected for a family the registry
    /// does not know, and [`Error::UnknownVersion`] for a version beyond the family's latest.
    pub fn enabled_sets<'r>(&self, registry: &'r PatchRegistry) -> Result<Vec<&'r PatchSet>> {
        let families = registry.list_families();
        if let Some(family) = self
            .versions
            .keys()
            .find(|family| !families.contains(&family.as_str()))
        {
            return Err(Error::InvalidConfig(format!("unknown patch family '{family}'")));
        }

        families
            .into_iter()
            .map(|family| {
                let version = self.requested_version(registry, family)?;
                registry.get_patch_set(family, version)
            })
            .collect()
    }

    /// The patches of [`enabled_sets`](Self::enabled_sets) without the disabled ones.
    ///
    /// # Errors
    /// Same as [`enabled_sets`](Self::enabled_sets).
    pub fn enabled_patches(&self, registry: &PatchRegistry) -> Result<Vec<Arc<Patch>>> {
        Ok(self
            .enabled_sets(registry)?
            .into_iter()
            .flat_map(PatchSet::patches)
            .filter(|patch| !self.is_disabled(patch.name()))
            .cloned()
            .collect())
    }
}

impl FromStr for HotPatchConfig {
    type Err = Error;

    fn from_str(args: &str) -> Result<Self> {
        HotPatchConfig::parse(args)
    }
}
