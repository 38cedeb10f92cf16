//! Composite sort/equality keys.

use std::cmp::Ordering;
use std::fmt;

/// Immutable composite key: a case-insensitive simple key plus an optional
/// identifying-parent key.
///
/// Ordering compares the simple key case-insensitively first; ties are broken
/// by recursively comparing the parent keys, with an absent parent sorting
/// before a present one. Equality mirrors ordering exactly: two keys are
/// equal if and only if they compare equal.
///
/// Rendering is `simple` for a top-level key and `simple | parent` when an
/// identifying parent exists, recursively:
///
/// ```rust
/// use arkiv_core::EntityKey;
///
/// let location = EntityKey::top_level("Fred's");
/// let event = EntityKey::new("2013/04/11", Some(location));
/// assert_eq!(event.to_string(), "2013/04/11 | Fred's");
/// ```
#[derive(Debug, Clone)]
pub struct EntityKey {
    simple: String,
    parent: Option<Box<EntityKey>>,
}

impl EntityKey {
    /// Creates a key from a simple key and an optional identifying-parent key.
    pub fn new(simple: impl Into<String>, parent: Option<EntityKey>) -> Self {
        Self {
            simple: simple.into(),
            parent: parent.map(Box::new),
        }
    }

    /// Creates a key with no identifying parent.
    pub fn top_level(simple: impl Into<String>) -> Self {
        Self::new(simple, None)
    }

    /// Returns the simple key component.
    #[must_use]
    pub fn simple(&self) -> &str {
        &self.simple
    }

    /// Returns the identifying-parent key, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&EntityKey> {
        self.parent.as_deref()
    }
}

/// Compares two strings case-insensitively without allocating.
pub(crate) fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Case-insensitive string equality.
pub(crate) fn eq_ignore_case(a: &str, b: &str) -> bool {
    cmp_ignore_case(a, b) == Ordering::Equal
}

impl Ord for EntityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match cmp_ignore_case(&self.simple, &other.simple) {
            Ordering::Equal => self.parent.cmp(&other.parent),
            ord => ord,
        }
    }
}

impl PartialOrd for EntityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EntityKey {}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{} | {parent}", self.simple),
            None => f.write_str(&self.simple),
        }
    }
}
