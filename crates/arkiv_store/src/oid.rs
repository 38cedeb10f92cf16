//! Store-assigned object identity.

use std::fmt;

/// Identity token assigned by the backing store once an object is persisted.
///
/// Oids are:
/// - Assigned by the store, never by callers
/// - Stable for the lifetime of the object
/// - Never reused after the object is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(u64);

impl Oid {
    /// Creates an oid from its raw value.
    ///
    /// Intended for backend implementations; callers of the engine never
    /// fabricate oids.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}
