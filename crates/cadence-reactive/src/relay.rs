#![forbid(unsafe_code)]

//! Invalidation relays and per-cell dependency bookkeeping.
//!
//! A dependent cell registers one [`Relay`] on every cell it read during its
//! last successful computation. The relay holds only a `Weak` reference to
//! the dependent, so the dependency's listener set never keeps a dependent
//! alive. Strong references point strictly upstream: a dependent owns its
//! dependencies (through [`Tracker`]), never the reverse.
//!
//! [`Tracker`] is the state every cell kind shares: the `invalidated` and
//! `computing` flags, the current dependency set, and the diff that moves
//! relays from the old dependency set to the new one after a successful
//! computation.

use std::cell::{Cell as StdCell, RefCell};
use std::mem;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::{debug, trace, warn};

use crate::config::CellConfig;
use crate::error::{CellError, Result};
use crate::id::CellId;
use crate::listener::ListenerKey;

/// Dependency sets up to this size are diffed by linear scan.
const LINEAR_SCAN_LIMIT: usize = 8;

/// A cell that can be marked stale by a relay.
pub trait Invalidate {
    /// Mark the cell invalidated and, if it was fresh, notify its own
    /// listeners. Constant cells ignore this.
    fn invalidate(self: Rc<Self>);
}

/// A cell that can be read as a dependency.
pub trait Source {
    fn id(&self) -> CellId;
    fn attach(&self, relay: Relay) -> ListenerKey;
    fn detach(&self, key: ListenerKey) -> bool;
}

struct RelayState {
    target: Weak<dyn Invalidate>,
    doomed: StdCell<bool>,
}

/// Listener entry that invalidates a weakly-held dependent.
#[derive(Clone)]
pub struct Relay {
    state: Rc<RelayState>,
}

impl Relay {
    pub fn new(target: Weak<dyn Invalidate>) -> Self {
        Self {
            state: Rc::new(RelayState {
                target,
                doomed: StdCell::new(false),
            }),
        }
    }

    /// Invalidate the dependent, or mark this relay doomed if the
    /// dependent is gone.
    pub fn fire(&self) {
        match self.state.target.upgrade() {
            Some(target) => target.invalidate(),
            None => self.state.doomed.set(true),
        }
    }

    pub fn is_doomed(&self) -> bool {
        self.state.doomed.get()
    }
}

struct Dependency {
    id: CellId,
    source: Rc<dyn Source>,
    key: ListenerKey,
}

/// Previous dependency set, indexed for the diff.
enum Previous {
    Linear(Vec<Dependency>),
    Indexed(AHashMap<CellId, Dependency>),
}

impl Previous {
    fn new(deps: Vec<Dependency>) -> Self {
        if deps.len() <= LINEAR_SCAN_LIMIT {
            Self::Linear(deps)
        } else {
            Self::Indexed(deps.into_iter().map(|dep| (dep.id, dep)).collect())
        }
    }

    fn take(&mut self, id: CellId) -> Option<Dependency> {
        match self {
            Self::Linear(deps) => deps
                .iter()
                .position(|dep| dep.id == id)
                .map(|index| deps.swap_remove(index)),
            Self::Indexed(deps) => deps.remove(&id),
        }
    }

    fn into_remaining(self) -> Vec<Dependency> {
        match self {
            Self::Linear(deps) => deps,
            Self::Indexed(deps) => deps.into_values().collect(),
        }
    }
}

/// Restores the `computing` flag when a computation ends, including by
/// unwinding.
pub struct ComputeGuard<'a> {
    computing: &'a StdCell<bool>,
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        self.computing.set(false);
    }
}

/// Invalidation state and dependency set of one cell.
pub struct Tracker {
    id: CellId,
    label: StdCell<Option<&'static str>>,
    invalidated: StdCell<bool>,
    computing: StdCell<bool>,
    detach_on_drop: StdCell<bool>,
    dependencies: RefCell<Vec<Dependency>>,
}

impl Tracker {
    pub fn new(invalidated: bool) -> Self {
        let config = CellConfig::default();
        Self {
            id: CellId::next(),
            label: StdCell::new(config.label),
            invalidated: StdCell::new(invalidated),
            computing: StdCell::new(false),
            detach_on_drop: StdCell::new(config.detach_on_drop),
            dependencies: RefCell::new(Vec::new()),
        }
    }

    pub fn configure(&self, config: CellConfig) {
        self.label.set(config.label);
        self.detach_on_drop.set(config.detach_on_drop);
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn label(&self) -> Option<&'static str> {
        self.label.get()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.get()
    }

    /// Flip a fresh cell to invalidated. Returns `false` if it already was.
    pub fn mark_invalidated(&self) -> bool {
        if self.invalidated.replace(true) {
            return false;
        }
        trace!(message = "cell.invalidate", cell = %self.id, label = self.label.get());
        true
    }

    /// Mark the cached value current.
    pub fn settle(&self) {
        self.invalidated.set(false);
    }

    /// Enter this cell's computation. Fails if it is already running.
    pub fn begin(&self) -> Result<ComputeGuard<'_>> {
        if self.computing.replace(true) {
            warn!(message = "cell.cycle", cell = %self.id, label = self.label.get());
            return Err(CellError::Cycle { cell: self.id });
        }
        Ok(ComputeGuard {
            computing: &self.computing,
        })
    }

    /// Attribute and log a failed computation.
    pub fn fail(&self, err: CellError) -> CellError {
        let err = err.attributed_to(self.id);
        warn!(
            message = "cell.compute_failed",
            cell = %self.id,
            label = self.label.get(),
            error = %err
        );
        err
    }

    /// `changed` is `None` when the new value was not compared with the
    /// old one; the event then carries no `changed` field.
    pub fn trace_recompute(&self, changed: Option<bool>) {
        trace!(
            message = "cell.recompute",
            cell = %self.id,
            label = self.label.get(),
            deps = self.dependency_count(),
            changed
        );
    }

    /// Replace the dependency set with the cells read by a successful
    /// computation. Dependencies read again keep their relay; new ones get
    /// a relay pointing at `owner`; dropped ones have theirs detached.
    pub fn commit<I>(&self, reads: I, owner: &Weak<dyn Invalidate>)
    where
        I: IntoIterator<Item = (CellId, Rc<dyn Source>)>,
    {
        let mut previous = Previous::new(mem::take(&mut *self.dependencies.borrow_mut()));
        let mut next = Vec::new();
        let mut attached = 0usize;
        for (id, source) in reads {
            match previous.take(id) {
                Some(dep) => next.push(dep),
                None => {
                    let key = source.attach(Relay::new(owner.clone()));
                    next.push(Dependency { id, source, key });
                    attached += 1;
                }
            }
        }
        let stale = previous.into_remaining();
        let detached = stale.len();
        *self.dependencies.borrow_mut() = next;
        for dep in stale {
            dep.source.detach(dep.key);
        }
        if attached > 0 || detached > 0 {
            debug!(
                message = "cell.dependencies",
                cell = %self.id,
                label = self.label.get(),
                attached,
                detached
            );
        }
    }

    /// Drop every dependency, detaching its relay, and set the
    /// invalidated flag.
    pub fn reset(&self, invalidated: bool) {
        let previous = mem::take(&mut *self.dependencies.borrow_mut());
        for dep in previous {
            dep.source.detach(dep.key);
        }
        self.invalidated.set(invalidated);
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if !self.detach_on_drop.get() {
            return;
        }
        for dep in self.dependencies.get_mut().drain(..) {
            dep.source.detach(dep.key);
        }
    }
}
