//! Access modes requested for transactions and pages.

/// The visibility and mutability level requested for a transaction or a page.
///
/// Modes are ordered by strength: a transaction opened with a given mode may acquire pages with
/// that mode or any weaker one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessMode {
    /// No access. Used by policies which do not need to look at a structure.
    None,
    /// Shared read access.
    Read,
    /// Exclusive write-intent access, held for the lifetime of the enclosing transaction.
    Write,
}

impl AccessMode {
    /// Whether a holder of `self` may acquire with `other`.
    pub fn covers(self, other: AccessMode) -> bool {
        self >= other
    }

    pub fn is_write(self) -> bool {
        self == AccessMode::Write
    }

    pub fn is_read(self) -> bool {
        self == AccessMode::Read
    }
}
