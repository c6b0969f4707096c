#![forbid(unsafe_code)]

//! Per-cell configuration.

/// Configuration applied to a cell with `with_config`.
///
/// ```
/// use cadence_reactive::{Cell, CellConfig};
///
/// let score = Cell::new(0u32).with_config(CellConfig::new().with_label("score"));
/// assert_eq!(score.label(), Some("score"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellConfig {
    /// Diagnostic name carried in tracing events and `Debug` output
    /// (default: `None`).
    pub label: Option<&'static str>,
    /// Remove this cell's invalidation relays from its dependencies as soon
    /// as the cell is dropped (default: `true`). When disabled, relays of a
    /// dropped cell are only pruned lazily, on the dependency's next
    /// notification pass after the relay found its target gone.
    pub detach_on_drop: bool,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            label: None,
            detach_on_drop: true,
        }
    }
}

impl CellConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the diagnostic label.
    #[must_use]
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    /// Set whether relays are detached eagerly on drop.
    #[must_use]
    pub fn with_detach_on_drop(mut self, detach: bool) -> Self {
        self.detach_on_drop = detach;
        self
    }
}
