#![forbid(unsafe_code)]

//! Unboxed scalar cells.
//!
//! [`BoolCell`], [`IntCell`], [`FloatCell`] and [`DoubleCell`] run the same
//! algorithm as [`Cell`](crate::Cell) but keep their value in a plain
//! `std::cell::Cell` of the primitive, with no `Option`, no clone and no
//! borrow on the read path. Layout code re-reads geometry cells every frame,
//! so these are the hot path.
//!
//! Differences from the generic cell, all representational:
//!
//! - A SideEffecting updater takes the previous value and returns the next
//!   one (`Fn(&Context, P) -> P`); primitives are `Copy`, so nothing needs
//!   to be threaded by reference.
//! - Equality is raw: `==` for `bool`/`i32`, bit equality for floats. Setting
//!   `NaN` over `NaN` is a no-op; `0.0` over `-0.0` is a change.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cell::Cell;
use crate::config::CellConfig;
use crate::context::{Context, Readable, sealed};
use crate::error::Result;
use crate::id::CellId;
use crate::listener::{ChangeListener, ListenerKey, Listeners, Subscription};
use crate::relay::{Invalidate, Relay, Source, Tracker};

type ScalarComputeFn<P> = Rc<dyn Fn(&Context) -> Result<P>>;
type ScalarUpdateFn<P> = Rc<dyn Fn(&Context, P) -> Result<P>>;

/// Binding of a scalar cell. The value itself lives beside it, unboxed.
enum ScalarBinding<P> {
    Constant,
    Computed(ScalarComputeFn<P>),
    SideEffecting(ScalarUpdateFn<P>),
}

impl<P> Clone for ScalarBinding<P> {
    fn clone(&self) -> Self {
        match self {
            Self::Constant => Self::Constant,
            Self::Computed(compute) => Self::Computed(Rc::clone(compute)),
            Self::SideEffecting(update) => Self::SideEffecting(Rc::clone(update)),
        }
    }
}

impl<P> ScalarBinding<P> {
    fn is_constant(&self) -> bool {
        matches!(self, Self::Constant)
    }

    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Computed(a), Self::Computed(b)) => Rc::ptr_eq(a, b),
            (Self::SideEffecting(a), Self::SideEffecting(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Computed(_) => "computed",
            Self::SideEffecting(_) => "side_effecting",
        }
    }
}

fn same_bool(a: bool, b: bool) -> bool {
    a == b
}

fn same_i32(a: i32, b: i32) -> bool {
    a == b
}

fn same_f32(a: f32, b: f32) -> bool {
    a.to_bits() == b.to_bits()
}

fn same_f64(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits()
}

macro_rules! scalar_cell {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ident, $prim:ty, $same:path
    ) => {
        struct $inner {
            value: StdCell<$prim>,
            /// Whether `value` came from a binding rather than the initial
            /// placeholder of a never-computed cell.
            primed: StdCell<bool>,
            binding: RefCell<ScalarBinding<$prim>>,
            version: StdCell<u64>,
            tracker: Tracker,
            listeners: Listeners<$name>,
        }

        $(#[$meta])*
        ///
        /// Cloning creates a new handle to the **same** cell.
        #[derive(Clone)]
        pub struct $name {
            inner: Rc<$inner>,
        }

        impl $name {
            fn from_binding(value: $prim, binding: ScalarBinding<$prim>) -> Self {
                let constant = binding.is_constant();
                Self {
                    inner: Rc::new($inner {
                        value: StdCell::new(value),
                        primed: StdCell::new(constant),
                        binding: RefCell::new(binding),
                        version: StdCell::new(0),
                        tracker: Tracker::new(!constant),
                        listeners: Listeners::new(),
                    }),
                }
            }

            /// Create a Constant cell.
            #[must_use]
            pub fn new(value: $prim) -> Self {
                Self::from_binding(value, ScalarBinding::Constant)
            }

            /// Create a Computed cell. `compute` does not run until the
            /// first `get()`.
            pub fn computed(compute: impl Fn(&Context) -> $prim + 'static) -> Self {
                Self::try_computed(move |cx| Ok(compute(cx)))
            }

            /// Create a Computed cell whose computation may fail.
            pub fn try_computed(compute: impl Fn(&Context) -> Result<$prim> + 'static) -> Self {
                Self::from_binding(<$prim>::default(), ScalarBinding::Computed(Rc::new(compute)))
            }

            /// Create a SideEffecting cell: `update` receives the previous
            /// value (initially `seed`) and returns the next.
            pub fn side_effecting(
                seed: $prim,
                update: impl Fn(&Context, $prim) -> $prim + 'static,
            ) -> Self {
                Self::try_side_effecting(seed, move |cx, value| Ok(update(cx, value)))
            }

            /// Create a SideEffecting cell whose updater may fail.
            pub fn try_side_effecting(
                seed: $prim,
                update: impl Fn(&Context, $prim) -> Result<$prim> + 'static,
            ) -> Self {
                let cell = Self::from_binding(seed, ScalarBinding::SideEffecting(Rc::new(update)));
                cell.inner.primed.set(true);
                cell
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
            /// Panics if the recomputation fails.
            #[track_caller]
            #[must_use]
            pub fn get(&self) -> $prim {
                match self.try_get() {
                    Ok(value) => value,
                    Err(err) => panic!("{err}"),
                }
            }

            /// Get the current value, recomputing first if invalidated.
            #[inline]
            pub fn try_get(&self) -> Result<$prim> {
                while self.inner.tracker.is_invalidated() {
                    if self.recompute()? {
                        break;
                    }
                }
                Ok(self.inner.value.get())
            }

            /// Run the current binding once. Returns `false` if the binding
            /// was replaced while it ran.
            fn recompute(&self) -> Result<bool> {
                let inner = &*self.inner;
                let computing = inner.tracker.begin()?;
                let binding = inner.binding.borrow().clone();
                let cx = Context::new();
                let next = match &binding {
                    ScalarBinding::Constant => {
                        inner.tracker.settle();
                        return Ok(true);
                    }
                    ScalarBinding::Computed(compute) => compute(&cx),
                    ScalarBinding::SideEffecting(update) => update(&cx, inner.value.get()),
                }
                .map_err(|err| inner.tracker.fail(err))?;
                if !inner.binding.borrow().same_as(&binding) {
                    // Rebound while computing; the result is stale.
                    return Ok(false);
                }
                let changed = !inner.primed.replace(true) || !$same(inner.value.get(), next);
                inner.value.set(next);
                inner.tracker.commit(cx.into_reads(), &self.owner());
                inner.tracker.settle();
                inner.version.set(inner.version.get() + 1);
                drop(computing);
                inner.tracker.trace_recompute(Some(changed));
                if changed {
                    inner.listeners.notify(self);
                }
                Ok(true)
            }

            fn owner(&self) -> Weak<dyn Invalidate> {
                let owner: Weak<$inner> = Rc::downgrade(&self.inner);
                owner
            }

            fn rebind(&self, binding: ScalarBinding<$prim>, invalidated: bool) {
                let previous = self.inner.binding.replace(binding);
                drop(previous);
                self.inner.tracker.reset(invalidated);
            }

            /// Switch to a Constant binding holding `value`. No-op if the
            /// cell is already Constant with a raw-equal value.
            pub fn set(&self, value: $prim) {
                let inner = &*self.inner;
                if inner.binding.borrow().is_constant() && $same(inner.value.get(), value) {
                    return;
                }
                inner.value.set(value);
                inner.primed.set(true);
                self.rebind(ScalarBinding::Constant, false);
                inner.version.set(inner.version.get() + 1);
                inner.listeners.notify(self);
            }

            /// Get-then-set: replace the value with `f(current)`.
            ///
            /// # Panics
            ///
            /// Panics if reading the current value fails.
            #[track_caller]
            pub fn update(&self, f: impl FnOnce($prim) -> $prim) {
                self.set(f(self.get()));
            }

            /// Switch to a Computed binding and announce the possible
            /// change; `compute` runs on the next `get()`.
            pub fn bind(&self, compute: impl Fn(&Context) -> $prim + 'static) {
                self.try_bind(move |cx| Ok(compute(cx)));
            }

            /// Switch to a Computed binding whose computation may fail.
            pub fn try_bind(&self, compute: impl Fn(&Context) -> Result<$prim> + 'static) {
                self.rebind(ScalarBinding::Computed(Rc::new(compute)), true);
                self.inner.listeners.notify(self);
            }

            /// Switch to a SideEffecting binding starting from `seed`.
            pub fn bind_side_effecting(
                &self,
                seed: $prim,
                update: impl Fn(&Context, $prim) -> $prim + 'static,
            ) {
                self.try_bind_side_effecting(seed, move |cx, value| Ok(update(cx, value)));
            }

            /// Switch to a SideEffecting binding whose updater may fail.
            pub fn try_bind_side_effecting(
                &self,
                seed: $prim,
                update: impl Fn(&Context, $prim) -> Result<$prim> + 'static,
            ) {
                self.inner.value.set(seed);
                self.inner.primed.set(true);
                self.rebind(ScalarBinding::SideEffecting(Rc::new(update)), true);
                self.inner.listeners.notify(self);
            }

            /// Switch to a SideEffecting binding seeded with the current
            /// value. Fails, leaving the binding untouched, if the current
            /// value cannot be computed.
            pub fn bind_side_effecting_with_current(
                &self,
                update: impl Fn(&Context, $prim) -> Result<$prim> + 'static,
            ) -> Result<()> {
                let seed = self.try_get()?;
                self.try_bind_side_effecting(seed, update);
                Ok(())
            }

            /// Force a Computed or SideEffecting cell stale and notify
            /// listeners. No-op for Constant cells.
            pub fn invalidate(&self) {
                if self.is_constant() || !self.inner.tracker.mark_invalidated() {
                    return;
                }
                self.inner.listeners.notify(self);
            }

            /// Derive a generic Computed cell from this one.
            pub fn map<U>(&self, f: impl Fn($prim) -> U + 'static) -> Cell<U>
            where
                U: Clone + PartialEq + 'static,
            {
                let source = self.clone();
                Cell::try_computed(move |cx| cx.try_read(&source).map(&f))
            }

            /// Register a change listener. Returns `false` if already
            /// registered.
            pub fn add_listener(&self, listener: &ChangeListener<Self>) -> bool {
                self.inner.listeners.add(listener)
            }

            /// Unregister a change listener. Returns `false` if not
            /// registered.
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
                    .binding
                    .try_borrow()
                    .is_ok_and(|binding| binding.is_constant())
            }

            /// Number of cells read by the last successful computation.
            #[must_use]
            pub fn dependency_count(&self) -> usize {
                self.inner.tracker.dependency_count()
            }

            /// Number of registered listeners, including relays of
            /// dependents.
            #[must_use]
            pub fn listener_count(&self) -> usize {
                self.inner.listeners.len()
            }
        }

        impl From<$prim> for $name {
            fn from(value: $prim) -> Self {
                Self::new(value)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new(<$prim>::default())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let inner = &self.inner;
                let mut out = f.debug_struct(stringify!($name));
                out.field("id", &inner.tracker.id());
                if let Some(label) = inner.tracker.label() {
                    out.field("label", &label);
                }
                if let Ok(binding) = inner.binding.try_borrow() {
                    out.field("binding", &binding.kind());
                }
                out.field("value", &inner.value.get())
                    .field("invalidated", &inner.tracker.is_invalidated())
                    .field("version", &inner.version.get())
                    .finish()
            }
        }

        impl Invalidate for $inner {
            fn invalidate(self: Rc<Self>) {
                $name { inner: self }.invalidate();
            }
        }

        impl Source for $inner {
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

        impl sealed::Sealed for $name {
            fn source(&self) -> Rc<dyn Source> {
                let source: Rc<$inner> = Rc::clone(&self.inner);
                source
            }
        }

        impl Readable for $name {
            type Value = $prim;

            fn id(&self) -> CellId {
                $name::id(self)
            }

            fn try_get(&self) -> Result<$prim> {
                $name::try_get(self)
            }
        }
    };
}

scalar_cell! {
    /// Boolean cell, stored unboxed.
    BoolCell, BoolCellInner, bool, same_bool
}

scalar_cell! {
    /// 32-bit integer cell, stored unboxed.
    IntCell, IntCellInner, i32, same_i32
}

scalar_cell! {
    /// Single-precision float cell, stored unboxed. Equality is bitwise.
    FloatCell, FloatCellInner, f32, same_f32
}

scalar_cell! {
    /// Double-precision float cell, stored unboxed. Equality is bitwise.
    DoubleCell, DoubleCellInner, f64, same_f64
}

impl BoolCell {
    /// Invert the current value.
    ///
    /// # Panics
    ///
    /// Panics if reading the current value fails.
    #[track_caller]
    pub fn flip(&self) {
        self.update(|value| !value);
    }
}

impl IntCell {
    /// Negate the current value. `i32::MIN` wraps to itself.
    ///
    /// # Panics
    ///
    /// Panics if reading the current value fails.
    #[track_caller]
    pub fn negate(&self) {
        self.update(i32::wrapping_neg);
    }
}

impl FloatCell {
    /// Negate the current value.
    ///
    /// # Panics
    ///
    /// Panics if reading the current value fails.
    #[track_caller]
    pub fn negate(&self) {
        self.update(|value| -value);
    }
}

impl DoubleCell {
    /// Negate the current value.
    ///
    /// # Panics
    ///
    /// Panics if reading the current value fails.
    #[track_caller]
    pub fn negate(&self) {
        self.update(|value| -value);
    }
}
