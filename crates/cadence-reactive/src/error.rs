#![forbid(unsafe_code)]

//! Errors surfaced by cell reads.
//!
//! The cell graph itself has no fallible operations. Errors come from two
//! places: caller-supplied computations that report failure, and a cell
//! being read from inside its own computation (a dependency cycle).
//! Neither is caught or wrapped on the way out: `try_get()` returns the
//! error as-is, tagged with the innermost cell it came from.

use std::fmt;

use thiserror::Error;

use crate::id::CellId;

pub type Result<T, E = CellError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    /// A computation or side-effecting updater reported failure.
    #[error("computation failed{}: {message}", origin(.cell))]
    Computation {
        /// Innermost cell whose computation failed, once known.
        cell: Option<CellId>,
        message: String,
    },

    /// A cell was read while its own computation was still running.
    #[error("dependency cycle: {cell} was read during its own computation")]
    Cycle { cell: CellId },
}

fn origin(cell: &Option<CellId>) -> String {
    cell.map(|id| format!(" in {id}")).unwrap_or_default()
}

impl CellError {
    /// Build a computation failure from any displayable error.
    #[must_use]
    pub fn computation(err: impl fmt::Display) -> Self {
        Self::Computation {
            cell: None,
            message: err.to_string(),
        }
    }

    /// Build a computation failure from a message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Computation {
            cell: None,
            message: message.into(),
        }
    }

    /// The cell the error is attributed to, if any.
    #[must_use]
    pub fn cell(&self) -> Option<CellId> {
        match self {
            Self::Computation { cell, .. } => *cell,
            Self::Cycle { cell } => Some(*cell),
        }
    }

    /// Attribute an unattributed failure to `cell`. Errors that already
    /// name a cell keep it, so the innermost failing cell wins.
    #[must_use]
    pub(crate) fn attributed_to(self, cell: CellId) -> Self {
        match self {
            Self::Computation { cell: None, message } => Self::Computation {
                cell: Some(cell),
                message,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_is_unattributed() {
        let err = CellError::msg("boom");
        assert_eq!(err.cell(), None);
        assert_eq!(err.to_string(), "computation failed: boom");
    }

    #[test]
    fn attribution_keeps_innermost_cell() {
        let inner = CellId::next();
        let outer = CellId::next();
        let err = CellError::msg("boom")
            .attributed_to(inner)
            .attributed_to(outer);
        assert_eq!(err.cell(), Some(inner));
        assert_eq!(err.to_string(), format!("computation failed in {inner}: boom"));
    }

    #[test]
    fn computation_wraps_display() {
        let parse = "x".parse::<i32>().unwrap_err();
        let err = CellError::computation(&parse);
        assert_eq!(err.to_string(), format!("computation failed: {parse}"));
    }

    #[test]
    fn cycle_names_cell() {
        let id = CellId::next();
        let err = CellError::Cycle { cell: id };
        assert_eq!(err.cell(), Some(id));
        assert!(err.to_string().contains(&id.to_string()));
    }
}
