#![forbid(unsafe_code)]

//! Cell identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a cell, stable for the cell's lifetime.
///
/// Ids are allocated from a process-wide counter and never reused. Clones of
/// a cell handle share the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

impl CellId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = CellId::next();
        let b = CellId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn display_uses_cell_prefix() {
        let id = CellId(42);
        assert_eq!(id.to_string(), "cell#42");
        assert_eq!(id.raw(), 42);
    }
}
