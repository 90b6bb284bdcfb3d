//! The `log4j` family: Log4Shell (CVE-2021-44228).

use crate::{
    patch::{strategies::ConstantReturn, Patch},
    registry::PatchRegistry,
};

/// Family name.
pub const FAMILY: &str = "log4j";

/// Name of the patch that neuters `JndiLookup::lookup`.
pub const NO_JNDI_LOOKUP: &str = "Log4j2_NoJndiLookup";

/// The class whose `lookup` method resolves `${jndi:...}` patterns.
pub const JNDI_LOOKUP_CLASS: &str = "org.apache.logging.log4j.core.lookup.JndiLookup";

/// `JndiLookup::lookup` returns a fixed string instead of contacting a naming service.
#[must_use]
pub fn no_jndi_lookup() -> Patch {
    Patch::new(NO_JNDI_LOOKUP, "Disable JNDI lookups in log4j2", JNDI_LOOKUP_CLASS)
        .with_method("lookup", ConstantReturn::string("Patched JndiLookup::lookup()"))
}

pub(crate) fn register(registry: &mut PatchRegistry) {
    registry.push(FAMILY, "Apply no patches related to log4j", Vec::new());
    registry.push(FAMILY, "Disable JNDI lookups in log4j2", vec![no_jndi_lookup()]);
}
