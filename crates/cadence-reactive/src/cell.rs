#![forbid(unsafe_code)]

//! Generic value cells.
//!
//! # Design
//!
//! [`Cell<T>`] keeps its binding (which owns the cached value) and a
//! dependency tracker in shared, reference-counted storage. A Constant
//! cell just returns its value. A Computed or SideEffecting cell starts invalidated;
//! the next [`get()`](Cell::get) runs its computation with a fresh
//! [`Context`], caches the result, and re-subscribes to exactly the cells
//! that computation read.
//!
//! When a dependency changes, its relay marks this cell invalidated and
//! notifies this cell's listeners, which carries the invalidation down the
//! graph immediately. Only recomputation is deferred to the next `get()`.
//!
//! # Invariants
//!
//! 1. After a successful recomputation the dependency set equals the cells
//!    read during it; cells behind an untaken branch are not subscribed.
//! 2. `is_invalidated() == false` implies the cached value is current.
//! 3. `set(v)` on a Constant cell already holding `v` is a no-op.
//! 4. Recomputation notifies listeners only if the value changed.
//! 5. The computation runs at most once per invalidation.
//!
//! # Failure Modes
//!
//! - **Computation fails** (error or panic): nothing is committed. The cell
//!   stays invalidated with its previous value and previous dependency
//!   subscriptions, no listener is notified, and the next `get()` retries.
//!   A SideEffecting seed keeps whatever the updater already did to it.
//! - **Cell read during its own computation**: `try_get()` returns
//!   [`CellError::Cycle`](crate::CellError::Cycle).
//! - **Cell mutated during its own computation**: unsupported. If the
//!   computation rebinds or sets its own cell, its result is discarded and
//!   the `get()` in progress continues with the new binding. Writes from
//!   inside a SideEffecting updater panic on the held borrow.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use crate::binding::{Binding, ComputeFn, Plan, UpdateFn};
use crate::config::CellConfig;
use crate::context::{Context, Readable, sealed};
use crate::error::Result;
use crate::id::CellId;
use crate::listener::{ChangeListener, ListenerKey, Listeners, Subscription};
use crate::relay::{Invalidate, Relay, Source, Tracker};

struct CellInner<T> {
    state: RefCell<Binding<T>>,
    version: StdCell<u64>,
    tracker: Tracker,
    listeners: Listeners<Cell<T>>,
}

/// A value holder with change notification: constant, computed, or
/// side-effecting.
///
/// Cloning a `Cell` creates a new handle to the **same** cell.
///
/// ```
/// use cadence_reactive::Cell;
///
/// let a = Cell::new(5);
/// let b = Cell::computed({
///     let a = a.clone();
///     move |cx| cx.read(&a) * 2
/// });
/// assert_eq!(b.get(), 10);
/// a.set(7);
/// assert_eq!(b.get(), 14);
/// ```
pub struct Cell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        let mut out = f.debug_struct("Cell");
        out.field("id", &inner.tracker.id());
        if let Some(label) = inner.tracker.label() {
            out.field("label", &label);
        }
        match inner.state.try_borrow() {
            Ok(state) => out
                .field("binding", &state.kind())
                .field("value", &state.value()),
            Err(_) => out.field("binding", &"<computing>"),
        };
        out.field("invalidated", &inner.tracker.is_invalidated())
            .field("version", &inner.version.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Cell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    fn from_binding(binding: Binding<T>, invalidated: bool) -> Self {
        Self {
            inner: Rc::new(CellInner {
                state: RefCell::new(binding),
                version: StdCell::new(0),
                tracker: Tracker::new(invalidated),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Create a Constant cell.
    pub fn new(value: T) -> Self {
        Self::from_binding(Binding::Constant(value), false)
    }

    /// Create a Computed cell. `compute` does not run until the first
    /// `get()`.
    pub fn computed(compute: impl Fn(&Context) -> T + 'static) -> Self {
        Self::try_computed(move |cx| Ok(compute(cx)))
    }

    /// Create a Computed cell whose computation may fail.
    pub fn try_computed(compute: impl Fn(&Context) -> Result<T> + 'static) -> Self {
        Self::from_binding(
            Binding::Computed {
                compute: Rc::new(compute),
                cached: None,
            },
            true,
        )
    }

    /// Create a SideEffecting cell. `update` mutates `seed` in place on
    /// every recomputation; the same instance is kept for the cell's
    /// lifetime (until rebound).
    ///
    /// ```
    /// use cadence_reactive::Cell;
    ///
    /// let hit = Cell::new(0u32);
    /// let history = Cell::side_effecting(Vec::new(), {
    ///     let hit = hit.clone();
    ///     move |cx, judged: &mut Vec<u32>| judged.push(cx.read(&hit))
    /// });
    /// assert_eq!(history.get(), vec![0]);
    /// hit.set(300);
    /// assert_eq!(history.get(), vec![0, 300]);
    /// ```
    pub fn side_effecting(seed: T, update: impl Fn(&Context, &mut T) + 'static) -> Self {
        Self::try_side_effecting(seed, move |cx, value| {
            update(cx, value);
            Ok(())
        })
    }

    /// Create a SideEffecting cell whose updater may fail.
    pub fn try_side_effecting(
        seed: T,
        update: impl Fn(&Context, &mut T) -> Result<()> + 'static,
    ) -> Self {
        Self::from_binding(
            Binding::SideEffecting {
                update: Rc::new(update),
                seed,
            },
            true,
        )
    }

    /// Apply a configuration to this cell.
    #[must_use]
    pub fn with_config(self, config: CellConfig) -> Self {
        self.inner.tracker.configure(config);
        self
    }

    /// Get the current value, recomputing first if invalidated.
    ///
    /// # Panics
    ///
    /// Panics if the recomputation fails. Use [`Cell::try_get`] to handle
    /// failures.
    #[track_caller]
    #[must_use]
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value, recomputing first if invalidated.
    pub fn try_get(&self) -> Result<T> {
        self.try_with(T::clone)
    }

    /// Access the current value by reference without cloning.
    ///
    /// # Panics
    ///
    /// Panics if the recomputation fails, or if `f` writes to this cell.
    #[track_caller]
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(out) => out,
            Err(err) => panic!("{err}"),
        }
    }

    /// Access the current value by reference, propagating failures.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.refresh()?;
        let state = self.inner.state.borrow();
        let value = state
            .value()
            .expect("cell holds a value after a successful refresh");
        Ok(f(value))
    }

    fn refresh(&self) -> Result<()> {
        while self.inner.tracker.is_invalidated() {
            if self.recompute()? {
                break;
            }
        }
        Ok(())
    }

    /// Run the current binding once. Returns `false` if the binding was
    /// replaced while it ran; the result is then dropped and nothing is
    /// committed.
    fn recompute(&self) -> Result<bool> {
        let inner = &*self.inner;
        let computing = inner.tracker.begin()?;
        let plan = inner.state.borrow().plan();
        let cx = Context::new();
        let changed = match plan {
            Plan::Settled => {
                inner.tracker.settle();
                return Ok(true);
            }
            Plan::Compute(compute) => {
                let next = compute(&cx).map_err(|err| inner.tracker.fail(err))?;
                match inner.state.borrow_mut().store(&compute, next) {
                    Some(changed) => Some(changed),
                    None => return Ok(false),
                }
            }
            // The state stays borrowed while the updater runs, so the
            // binding cannot be replaced underneath it.
            Plan::Update => {
                let observed = inner.listeners.has_callbacks();
                let mut state = inner.state.borrow_mut();
                let Binding::SideEffecting { update, seed } = &mut *state else {
                    return Ok(false);
                };
                let update = Rc::clone(update);
                let before = observed.then(|| seed.clone());
                update(&cx, seed).map_err(|err| inner.tracker.fail(err))?;
                before.map(|before| before != *seed)
            }
        };
        inner.tracker.commit(cx.into_reads(), &self.owner());
        inner.tracker.settle();
        inner.version.set(inner.version.get() + 1);
        drop(computing);
        inner.tracker.trace_recompute(changed);
        // An unobserved seed is not compared; relays are told regardless.
        if changed.unwrap_or(true) {
            inner.listeners.notify(self);
        }
        Ok(true)
    }

    fn owner(&self) -> Weak<dyn Invalidate> {
        let owner: Weak<CellInner<T>> = Rc::downgrade(&self.inner);
        owner
    }

    /// Switch to a Constant binding holding `value`.
    ///
    /// No-op if the cell is already Constant with an equal value.
    /// Otherwise drops all dependencies and notifies listeners.
    pub fn set(&self, value: T) {
        let previous = {
            let mut state = self.inner.state.borrow_mut();
            if matches!(&*state, Binding::Constant(current) if *current == value) {
                return;
            }
            mem::replace(&mut *state, Binding::Constant(value))
        };
        drop(previous);
        self.inner.tracker.reset(false);
        self.inner.version.set(self.inner.version.get() + 1);
        self.inner.listeners.notify(self);
    }

    /// Get-then-set: replace the value with `f(current)`.
    ///
    /// # Panics
    ///
    /// Panics if reading the current value fails.
    #[track_caller]
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with(f);
        self.set(next);
    }

    /// Switch to a Computed binding. The cell becomes invalidated and
    /// listeners are told its value may have changed; `compute` runs on the
    /// next `get()`.
    pub fn bind(&self, compute: impl Fn(&Context) -> T + 'static) {
        self.try_bind(move |cx| Ok(compute(cx)));
    }

    /// Switch to a Computed binding whose computation may fail.
    pub fn try_bind(&self, compute: impl Fn(&Context) -> Result<T> + 'static) {
        let compute: ComputeFn<T> = Rc::new(compute);
        let previous = {
            let mut state = self.inner.state.borrow_mut();
            let cached = state.value().cloned();
            mem::replace(&mut *state, Binding::Computed { compute, cached })
        };
        drop(previous);
        self.rebound();
    }

    /// Switch to a SideEffecting binding threading `seed`.
    pub fn bind_side_effecting(&self, seed: T, update: impl Fn(&Context, &mut T) + 'static) {
        self.try_bind_side_effecting(seed, move |cx, value| {
            update(cx, value);
            Ok(())
        });
    }

    /// Switch to a SideEffecting binding whose updater may fail.
    pub fn try_bind_side_effecting(
        &self,
        seed: T,
        update: impl Fn(&Context, &mut T) -> Result<()> + 'static,
    ) {
        let update: UpdateFn<T> = Rc::new(update);
        let previous = mem::replace(
            &mut *self.inner.state.borrow_mut(),
            Binding::SideEffecting { update, seed },
        );
        drop(previous);
        self.rebound();
    }

    /// Switch to a SideEffecting binding seeded with the current value.
    ///
    /// Fails, leaving the binding untouched, if the current value cannot be
    /// computed.
    pub fn bind_side_effecting_with_current(
        &self,
        update: impl Fn(&Context, &mut T) -> Result<()> + 'static,
    ) -> Result<()> {
        let seed = self.try_get()?;
        self.try_bind_side_effecting(seed, update);
        Ok(())
    }

    fn rebound(&self) {
        self.inner.tracker.reset(true);
        self.inner.listeners.notify(self);
    }

    /// Force a Computed or SideEffecting cell stale and notify listeners.
    /// No-op for Constant cells and cells already invalidated.
    pub fn invalidate(&self) {
        if self.is_constant() || !self.inner.tracker.mark_invalidated() {
            return;
        }
        self.inner.listeners.notify(self);
    }

    /// Derive a Computed cell from this one.
    ///
    /// ```
    /// use cadence_reactive::Cell;
    ///
    /// let combo = Cell::new(12u32);
    /// let label = combo.map(|n| format!("{n}x"));
    /// assert_eq!(label.get(), "12x");
    /// combo.set(13);
    /// assert_eq!(label.get(), "13x");
    /// ```
    pub fn map<U>(&self, f: impl Fn(&T) -> U + 'static) -> Cell<U>
    where
        U: Clone + PartialEq + 'static,
    {
        let source = self.clone();
        Cell::try_computed(move |cx| {
            cx.track(&source);
            source.try_with(&f)
        })
    }

    /// Register a change listener. Returns `false` if already registered.
    pub fn add_listener(&self, listener: &ChangeListener<Self>) -> bool {
        self.inner.listeners.add(listener)
    }

    /// Unregister a change listener. Returns `false` if not registered.
    pub fn remove_listener(&self, listener: &ChangeListener<Self>) -> bool {
        self.inner.listeners.remove(listener)
    }

    /// Register a callback for as long as the returned guard lives.
    pub fn subscribe(&self, callback: impl Fn(&Self) + 'static) -> Subscription {
        let listener = ChangeListener::new(callback);
        self.inner.listeners.add(&listener);
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.remove(&listener);
            }
        })
    }

    #[must_use]
    pub fn id(&self) -> CellId {
        self.inner.tracker.id()
    }

    #[must_use]
    pub fn label(&self) -> Option<&'static str> {
        self.inner.tracker.label()
    }

    /// Bumped once per recomputation and once per effective `set`.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.inner.tracker.is_invalidated()
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.inner
            .state
            .try_borrow()
            .is_ok_and(|state| state.is_constant())
    }

    /// Number of cells read by the last successful computation.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.tracker.dependency_count()
    }

    /// Number of registered listeners, including relays of dependents.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl<T: Clone + PartialEq + 'static> Invalidate for CellInner<T> {
    fn invalidate(self: Rc<Self>) {
        Cell { inner: self }.invalidate();
    }
}

impl<T> Source for CellInner<T> {
    fn id(&self) -> CellId {
        self.tracker.id()
    }

    fn attach(&self, relay: Relay) -> ListenerKey {
        self.listeners.attach(relay)
    }

    fn detach(&self, key: ListenerKey) -> bool {
        self.listeners.detach(key)
    }
}

impl<T: Clone + PartialEq + 'static> sealed::Sealed for Cell<T> {
    fn source(&self) -> Rc<dyn Source> {
        let source: Rc<CellInner<T>> = Rc::clone(&self.inner);
        source
    }
}

impl<T: Clone + PartialEq + 'static> Readable for Cell<T> {
    type Value = T;

    fn id(&self) -> CellId {
        Cell::id(self)
    }

    fn try_get(&self) -> Result<T> {
        Cell::try_get(self)
    }
}
