//! Target class selection by exact name.

/// Decides whether a class belongs to a patch's target.
///
/// The canonical name may be given in dotted (`a.b.C`) or internal (`a/b/C`) form; a
/// candidate matches if it equals the canonical name in either form. There is no wildcard,
/// prefix or content matching, so shaded copies of a target are not matched.
///
/// # Examples
/// ```rust
/// use hotpatch::patch::ClassMatcher;
///
/// let matcher = ClassMatcher::new("org.apache.logging.log4j.core.lookup.JndiLookup");
/// assert!(matcher.matches("org/apache/logging/log4j/core/lookup/JndiLookup"));
/// assert!(matcher.matches("org.apache.logging.log4j.core.lookup.JndiLookup"));
/// assert!(!matcher.matches("shaded/org/apache/logging/log4j/core/lookup/JndiLookup"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMatcher {
    dotted: String,
    internal: String,
}

impl ClassMatcher {
    /// Creates a matcher for `canonical_name`.
    #[must_use]
    pub fn new(canonical_name: &str) -> Self {
        ClassMatcher {
            dotted: canonical_name.replace('/', "."),
            internal: canonical_name.replace('.', "/"),
        }
    }

    /// Whether `class_name` names the target class.
    #[must_use]
    pub fn matches(&self, class_name: &str) -> bool {
        class_name == self.internal || class_name == self.dotted
    }

    /// The target in internal (slash-separated) form.
    #[must_use]
    pub fn internal_name(&self) -> &str {
        &self.internal
    }

    /// The target in dotted form.
    #[must_use]
    pub fn dotted_name(&self) -> &str {
        &self.dotted
    }
}

/// `true` iff `class_name` equals `canonical_name` in dotted or slash-separated form.
#[must_use]
pub fn matches(class_name: &str, canonical_name: &str) -> bool {
    ClassMatcher::new(canonical_name).matches(class_name)
}
