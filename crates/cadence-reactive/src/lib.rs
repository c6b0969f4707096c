#![forbid(unsafe_code)]

//! Reactive dataflow cells for Cadence.
//!
//! A cell holds a value, knows how to produce it, and tells whoever depends
//! on it when it may have changed. Cells form a graph that is discovered at
//! run time: a computation that reads another cell through its [`Context`]
//! becomes a dependent of that cell until its next recomputation.
//!
//! - [`Cell`]: generic cell for any `T: Clone + PartialEq`.
//! - [`BoolCell`], [`IntCell`], [`FloatCell`], [`DoubleCell`]: the same
//!   machinery with the value stored unboxed.
//! - [`Context`]: dependency recorder handed to every computation.
//! - [`ChangeListener`] / [`Subscription`]: change callbacks.
//!
//! ```
//! use cadence_reactive::{Cell, IntCell};
//!
//! let tempo = IntCell::new(120);
//! let beat_ms = Cell::computed({
//!     let tempo = tempo.clone();
//!     move |cx| 60_000 / cx.read(&tempo)
//! });
//! assert_eq!(beat_ms.get(), 500);
//!
//! tempo.set(150);
//! assert!(beat_ms.is_invalidated());
//! assert_eq!(beat_ms.get(), 400);
//! ```
//!
//! # Architecture
//!
//! Every cell is an `Rc` handle over a shared interior, single-threaded.
//! A cell's binding is one of three kinds:
//!
//! - **Constant**: a stored value, changed only by `set`.
//! - **Computed**: a function of the cells it reads, cached between reads.
//! - **SideEffecting**: an updater that mutates a persistent seed value,
//!   accumulating across recomputations.
//!
//! When a computation finishes, the cell diffs the set of cells it read
//! against the previous set, attaches an invalidation relay to each new
//! dependency, and detaches from each stale one. A relay holds only a `Weak`
//! reference to its dependent; relays whose dependent is gone are pruned in
//! batch during the next notification.
//!
//! Invalidation is push, recomputation is pull: a mutation marks dependents
//! invalidated transitively and notifies their listeners, but nothing is
//! recomputed until someone calls `get()`.
//!
//! # Invariants
//!
//! 1. `get()` on a cell that is not invalidated returns the cached value
//!    without running any computation.
//! 2. After a recomputation, a cell is subscribed to exactly the distinct
//!    cells its computation read in that run.
//! 3. `set` with a value equal to the current Constant value is a no-op.
//! 4. Listeners are notified in registration order.
//! 5. A failed computation changes nothing: the cell stays invalidated with
//!    its previous value and subscriptions, and the next `get()` retries.

pub mod cell;
pub mod config;
pub mod context;
pub mod error;
pub mod id;
pub mod scalar;

mod binding;
mod listener;
mod relay;

pub use cell::Cell;
pub use config::CellConfig;
pub use context::{Context, Readable};
pub use error::{CellError, Result};
pub use id::CellId;
pub use listener::{ChangeListener, Subscription};
pub use scalar::{BoolCell, DoubleCell, FloatCell, IntCell};
