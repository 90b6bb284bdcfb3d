//! The `spring` family: Spring4Shell (CVE-2022-22965).
//!
//! Both versions rewrite the property loop of `CachedIntrospectionResults.<init>(Class)`.
//! Version 1 makes the `"classLoader".equals(pd.getName())` check always skip, which hides
//! every property of `Class` beans. Version 2 leaves that check alone and injects a guard
//! that keeps only `name`-like properties of `Class` beans and drops every property typed as
//! `ClassLoader` or `ProtectionDomain`.

use crate::{
    assembly::JumpKind,
    patch::{
        strategies::{BranchInversion, GuardInjection},
        Patch,
    },
    registry::PatchRegistry,
};

/// Family name.
pub const FAMILY: &str = "spring";

/// Name shared by both Spring4Shell patches.
pub const SPRING_2022_22965: &str = "Spring_2022-22965";

/// The class whose constructor enumerates bean properties.
pub const CACHED_INTROSPECTION_RESULTS: &str =
    "org.springframework.beans.CachedIntrospectionResults";

/// Blocks all property access on `Class` beans.
#[must_use]
pub fn block_class_access() -> Patch {
    Patch::new(
        SPRING_2022_22965,
        "Fix CVE-2022-22965 (Spring4Shell) blocking all class access",
        CACHED_INTROSPECTION_RESULTS,
    )
    .with_method("<init>", BranchInversion::new("classLoader", JumpKind::IfNe))
}

/// Blocks property access on `Class` beans except for `name`-like properties.
#[must_use]
pub fn block_class_access_except_name() -> Patch {
    Patch::new(
        SPRING_2022_22965,
        "Fix CVE-2022-22965 (Spring4Shell) blocking all class access except class.name",
        CACHED_INTROSPECTION_RESULTS,
    )
    .with_method("<init>", GuardInjection::default())
}

pub(crate) fn register(registry: &mut PatchRegistry) {
    registry.push(FAMILY, "Apply no patches related to spring", Vec::new());
    registry.push(
        FAMILY,
        "Fix CVE-2022-22965 (Spring4Shell) blocking all class access",
        vec![block_class_access()],
    );
    registry.push(
        FAMILY,
        "Fix CVE-2022-22965 (Spring4Shell) blocking all class access except class.name",
        vec![block_class_access_except_name()],
    );
}
