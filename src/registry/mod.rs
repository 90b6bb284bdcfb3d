//! Named, versioned patch sets grouped by vulnerability family.
//!
//! Each family is an ordered list of [`PatchSet`]s whose position is its version. Version 0
//! is always the empty set, so "leave this family unpatched" is an addressable choice like
//! any other. New behavior is added as a new version; existing versions never change, which
//! keeps earlier versions reproducible for rollback and comparison.
//!
//! [`PatchRegistry::builtin`] contains the families shipped with this crate:
//!
//! | family   | version | patch                   |
//! |----------|---------|-------------------------|
//! | `log4j`  | 1       | `Log4j2_NoJndiLookup`   |
//! | `spring` | 1       | `Spring_2022-22965` (block all class access) |
//! | `spring` | 2       | `Spring_2022-22965` (block class access except `class.name`) |
//!
//! # Example
//! ```rust
//! use hotpatch::registry::PatchRegistry;
//!
//! let registry = PatchRegistry::builtin();
//! assert_eq!(registry.list_families(), vec!["log4j", "spring"]);
//! assert!(registry.get_patch_set("spring", 0)?.is_empty());
//! assert_eq!(registry.latest_version("spring")?, 2);
//! assert!(registry.get_patch_set("spring", 3).is_err());
//! # Ok::<(), hotpatch::Error>(())
//! ```

pub mod log4j;
pub mod spring;

use std::{collections::BTreeMap, sync::Arc};

use crate::{patch::Patch, Error, Result};

/// One addressable `(family, version)` list of patches.
#[derive(Debug, Clone)]
pub struct PatchSet {
    family: String,
    version: u32,
    description: String,
    patches: Vec<Arc<Patch>>,
}

impl PatchSet {
    /// Family this set belongs to.
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Position of this set within its family.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Short human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The patches, in dispatch order.
    #[must_use]
    pub fn patches(&self) -> &[Arc<Patch>] {
        &self.patches
    }

    /// `true` for the version 0 set of every family.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Every known family and its versions.
#[derive(Debug, Clone, Default)]
pub struct PatchRegistry {
    families: BTreeMap<String, Vec<PatchSet>>,
}

impl PatchRegistry {
    /// A registry without any family.
    #[must_use]
    pub fn new() -> Self {
        PatchRegistry::default()
    }

    /// A registry with the `log4j` and `spring` families.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = PatchRegistry::new();
        log4j::register(&mut registry);
        spring::register(&mut registry);
        registry
    }

    /// Appends the next version of `family`, creating the family if needed.
    fn push(&mut self, family: &str, description: &str, patches: Vec<Patch>) -> u32 {
        let versions = self.families.entry(family.to_string()).or_default();
        let version = u32::try_from(versions.len()).unwrap_or(u32::MAX);
        versions.push(PatchSet {
            family: family.to_string(),
            version,
            description: description.to_string(),
            patches: patches.into_iter().map(Arc::new).collect(),
        });
        version
    }

    /// Declares a new family; its version 0 is the empty set described by `description`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the family already exists.
    pub fn add_family(&mut self, family: &str, description: &str) -> Result<()> {
        if self.families.contains_key(family) {
            return Err(Error::InvalidConfig(format!(
                "patch family '{family}' is already registered"
            )));
        }
        self.push(family, description, Vec::new());
        Ok(())
    }

    /// Appends a new version to `family` and returns its number.
    ///
    /// # Errors
    /// Returns [`Error::UnknownFamily`] if the family was never declared.
    pub fn add_version(&mut self, family: &str, description: &str, patches: Vec<Patch>) -> Result<u32> {
        if !self.families.contains_key(family) {
            return Err(Error::UnknownFamily(family.to_string()));
        }
        Ok(self.push(family, description, patches))
    }

    /// Names of all families, sorted.
    #[must_use]
    pub fn list_families(&self) -> Vec<&str> {
        self.families.keys().map(String::as_str).collect()
    }

    /// Every version of `family`, in order.
    ///
    /// # Errors
    /// Returns [`Error::UnknownFamily`] for an unknown family.
    pub fn versions(&self, family: &str) -> Result<&[PatchSet]> {
        self.families
            .get(family)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownFamily(family.to_string()))
    }

    /// The set `(family, version)`.
    ///
    /// # Errors
    /// Returns [`Error::UnknownFamily`] or [`Error::UnknownVersion`].
    pub fn get_patch_set(&self, family: &str, version: u32) -> Result<&PatchSet> {
        self.versions(family)?
            .get(version as usize)
            .ok_or_else(|| Error::UnknownVersion {
                family: family.to_string(),
                version,
            })
    }

    /// Highest version of `family`.
    ///
    /// # Errors
    /// Returns [`Error::UnknownFamily`] for an unknown family.
    pub fn latest_version(&self, family: &str) -> Result<u32> {
        let versions = self.versions(family)?;
        Ok(u32::try_from(versions.len().saturating_sub(1)).unwrap_or(u32::MAX))
    }

    /// The highest version of `family`.
    ///
    /// # Errors
    /// Returns [`Error::UnknownFamily`] for an unknown family.
    pub fn latest(&self, family: &str) -> Result<&PatchSet> {
        let version = self.latest_version(family)?;
        self.get_patch_set(family, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogue() {
        let registry = PatchRegistry::builtin();
        assert_eq!(registry.list_families(), vec!["log4j", "spring"]);

        let log4j = registry.latest("log4j").unwrap();
        assert_eq!(log4j.version(), 1);
        assert_eq!(log4j.description(), "Disable JNDI lookups in log4j2");
        assert_eq!(log4j.patches()[0].name(), "Log4j2_NoJndiLookup");

        let spring = registry.get_patch_set("spring", 1).unwrap();
        assert_eq!(spring.patches()[0].name(), "Spring_2022-22965");
        assert_eq!(
            registry.get_patch_set("spring", 2).unwrap().description(),
            "Fix CVE-2022-22965 (Spring4Shell) blocking all class access except class.name"
        );
    }

    #[test]
    fn version_zero_is_empty() {
        let registry = PatchRegistry::builtin();
        for family in registry.list_families() {
            let set = registry.get_patch_set(family, 0).unwrap();
            assert!(set.is_empty());
            assert_eq!(set.family(), family);
        }
        assert_eq!(
            registry.get_patch_set("spring", 0).unwrap().description(),
            "Apply no patches related to spring"
        );
    }

    #[test]
    fn unknown_lookups() {
        let registry = PatchRegistry::builtin();
        assert!(matches!(
            registry.get_patch_set("log4j", 2),
            Err(Error::UnknownVersion { version: 2, .. })
        ));
        assert!(matches!(
            registry.get_patch_set("struts", 0),
            Err(Error::UnknownFamily(_))
        ));
        assert!(registry.latest_version("struts").is_err());
    }

    #[test]
    fn versions_are_appended() {
        let mut registry = PatchRegistry::new();
        registry.add_family("demo", "Apply no demo patches").unwrap();
        assert!(registry.add_family("demo", "again").is_err());
        assert!(matches!(
            registry.add_version("other", "", Vec::new()),
            Err(Error::UnknownFamily(_))
        ));

        let version = registry
            .add_version("demo", "Disable JNDI", vec![log4j::no_jndi_lookup()])
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(registry.latest_version("demo").unwrap(), 1);
        assert!(registry.get_patch_set("demo", 0).unwrap().is_empty());
        assert_eq!(registry.versions("demo").unwrap().len(), 2);
    }
}
