#![forbid(unsafe_code)]

//! Dependency contexts.
//!
//! Every recomputation of a Computed or SideEffecting cell gets a fresh
//! [`Context`]. Reading another cell through it returns that cell's value
//! and records the cell as a dependency. When the computation returns
//! successfully, the recorded set becomes the cell's dependency set;
//! on failure it is discarded.
//!
//! Contexts are passed explicitly to computations, so nesting needs no
//! ambient state: reading a stale cell runs that cell's computation with
//! its own context while the outer one stays untouched.
//!
//! ```
//! use cadence_reactive::{BoolCell, Cell};
//!
//! let paused = BoolCell::new(false);
//! let speed = Cell::new(1.5f32);
//! let effective = Cell::computed({
//!     let (paused, speed) = (paused.clone(), speed.clone());
//!     move |cx| if cx.read(&paused) { 0.0 } else { cx.read(&speed) }
//! });
//! assert_eq!(effective.get(), 1.5);
//! paused.set(true);
//! assert_eq!(effective.get(), 0.0);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::error::Result;
use crate::id::CellId;
use crate::relay::Source;

/// Read sets larger than this are deduplicated through a hash set.
const LINEAR_SCAN_LIMIT: usize = 8;

pub(crate) mod sealed {
    use std::rc::Rc;

    use crate::relay::Source;

    pub trait Sealed {
        fn source(&self) -> Rc<dyn Source>;
    }
}

/// Anything a computation can read through a [`Context`].
///
/// Implemented by [`Cell`](crate::Cell) and the scalar cells; sealed.
pub trait Readable: sealed::Sealed {
    type Value;

    fn id(&self) -> CellId;

    /// Current value, recomputing first if stale.
    fn try_get(&self) -> Result<Self::Value>;

    /// Current value, recomputing first if stale.
    ///
    /// # Panics
    ///
    /// Panics if the recomputation fails; see [`Readable::try_get`].
    #[track_caller]
    fn get(&self) -> Self::Value {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

/// Records the cells read during one computation.
pub struct Context {
    reads: RefCell<SmallVec<[(CellId, Rc<dyn Source>); 4]>>,
    index: RefCell<Option<AHashSet<CellId>>>,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self {
            reads: RefCell::new(SmallVec::new()),
            index: RefCell::new(None),
        }
    }

    /// Read `cell` and record it as a dependency.
    ///
    /// # Panics
    ///
    /// Panics if `cell` fails to recompute. Use [`Context::try_read`] to
    /// propagate the failure instead.
    #[track_caller]
    pub fn read<R: Readable + ?Sized>(&self, cell: &R) -> R::Value {
        self.track(cell);
        cell.get()
    }

    /// Read `cell` and record it as a dependency, propagating failures.
    ///
    /// ```
    /// use cadence_reactive::{Cell, CellError};
    ///
    /// let raw = Cell::new(String::from("120"));
    /// let bpm = Cell::try_computed({
    ///     let raw = raw.clone();
    ///     move |cx| cx.try_read(&raw)?.parse::<u32>().map_err(CellError::computation)
    /// });
    /// assert_eq!(bpm.try_get(), Ok(120));
    /// raw.set(String::from("fast"));
    /// assert!(bpm.try_get().is_err());
    /// ```
    pub fn try_read<R: Readable + ?Sized>(&self, cell: &R) -> Result<R::Value> {
        self.track(cell);
        cell.try_get()
    }

    /// Record `cell` as a dependency without reading it.
    pub fn track<R: Readable + ?Sized>(&self, cell: &R) {
        let id = cell.id();
        let mut reads = self.reads.borrow_mut();
        let mut index = self.index.borrow_mut();
        let seen = match index.as_mut() {
            Some(ids) => !ids.insert(id),
            None => reads.iter().any(|(read, _)| *read == id),
        };
        if seen {
            return;
        }
        reads.push((id, sealed::Sealed::source(cell)));
        if index.is_none() && reads.len() > LINEAR_SCAN_LIMIT {
            *index = Some(reads.iter().map(|(read, _)| *read).collect());
        }
    }

    /// Number of distinct cells recorded so far.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.reads.borrow().len()
    }

    /// Ids of the recorded cells, in first-read order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<CellId> {
        self.reads.borrow().iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn into_reads(self) -> impl Iterator<Item = (CellId, Rc<dyn Source>)> {
        self.reads.into_inner().into_iter()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cell;

    #[test]
    fn records_in_first_read_order_without_duplicates() {
        let a = Cell::new(1);
        let b = Cell::new(2);
        let cx = Context::new();
        assert_eq!(cx.read(&b), 2);
        assert_eq!(cx.read(&a), 1);
        assert_eq!(cx.read(&b), 2);
        assert_eq!(cx.dependencies(), vec![b.id(), a.id()]);
    }

    #[test]
    fn dedup_survives_switch_to_index() {
        let cells: Vec<_> = (0..20).map(Cell::new).collect();
        let cx = Context::new();
        for _ in 0..3 {
            for cell in &cells {
                cx.read(cell);
            }
        }
        assert_eq!(cx.dependency_count(), 20);
        let expected: Vec<_> = cells.iter().map(Cell::id).collect();
        assert_eq!(cx.dependencies(), expected);
    }

    #[test]
    fn track_records_without_reading() {
        let calls = Rc::new(std::cell::Cell::new(0));
        let lazy = Cell::computed({
            let calls = Rc::clone(&calls);
            move |_| {
                calls.set(calls.get() + 1);
                7
            }
        });
        let cx = Context::new();
        cx.track(&lazy);
        assert_eq!(cx.dependency_count(), 1);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn try_read_propagates_and_still_records() {
        let failing: Cell<i32> = Cell::try_computed(|_| Err(crate::CellError::msg("nope")));
        let cx = Context::new();
        assert!(cx.try_read(&failing).is_err());
        assert_eq!(cx.dependency_count(), 1);
    }

    #[test]
    fn debug_lists_dependencies() {
        let a = Cell::new(1);
        let cx = Context::new();
        cx.read(&a);
        let dbg = format!("{cx:?}");
        assert!(dbg.contains("Context"));
        assert!(dbg.contains(&a.id().raw().to_string()));
    }
}
