#![forbid(unsafe_code)]

//! Change listeners and the per-cell listener registry.
//!
//! A registry holds two kinds of entries, in registration order:
//!
//! - **Callbacks** ([`ChangeListener`]): user observers. They receive the
//!   cell handle, not the value, and call `get()` themselves.
//! - **Relays**: invalidation relays owned by dependent cells (see
//!   `relay.rs`). They only hold a weak reference to the dependent.
//!
//! Notification takes a snapshot of the entries and releases the registry
//! before running anything, so listeners may freely add or remove
//! listeners, read cells, or trigger nested notifications.
//!
//! Relays whose dependent has been dropped mark themselves doomed when
//! fired. Doomed relays are pruned in one batch at the start of the next
//! notification pass instead of on every mutation.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::debug;

use crate::relay::Relay;

/// A change observer for cells of type `C`.
///
/// Identity is by allocation: clones of one `ChangeListener` are the same
/// listener, so adding a clone of an already-registered listener is a
/// no-op, and any clone can be used to remove it.
pub struct ChangeListener<C> {
    callback: Rc<dyn Fn(&C)>,
}

impl<C> ChangeListener<C> {
    /// Wrap a callback. It receives the cell whose value may have changed.
    pub fn new(callback: impl Fn(&C) + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
        }
    }

    fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.callback, &other.callback)
    }
}

impl<C> Clone for ChangeListener<C> {
    fn clone(&self) -> Self {
        Self {
            callback: Rc::clone(&self.callback),
        }
    }
}

impl<C> fmt::Debug for ChangeListener<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeListener")
            .field("ptr", &Rc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

/// RAII guard that removes a listener when dropped.
///
/// Returned by `subscribe` on every cell kind. The guard does not keep the
/// cell alive; if the cell is gone first, dropping the guard does nothing.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Remove the listener now. Equivalent to dropping the guard.
    pub fn cancel(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Registry-local handle to one entry, used to detach relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerKey(u64);

enum Slot<C> {
    Callback(ChangeListener<C>),
    Relay(Relay),
}

impl<C> Clone for Slot<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Callback(listener) => Self::Callback(listener.clone()),
            Self::Relay(relay) => Self::Relay(relay.clone()),
        }
    }
}

impl<C> Slot<C> {
    fn is_doomed(&self) -> bool {
        matches!(self, Self::Relay(relay) if relay.is_doomed())
    }
}

struct Entry<C> {
    key: ListenerKey,
    slot: Slot<C>,
}

/// Ordered set of callbacks and relays attached to one cell.
pub struct Listeners<C> {
    entries: RefCell<Vec<Entry<C>>>,
    next_key: StdCell<u64>,
}

impl<C> Listeners<C> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next_key: StdCell::new(0),
        }
    }

    fn push(&self, slot: Slot<C>) -> ListenerKey {
        let key = ListenerKey(self.next_key.get());
        self.next_key.set(key.0 + 1);
        self.entries.borrow_mut().push(Entry { key, slot });
        key
    }

    /// Register a callback. Returns `false` if it was already registered.
    pub fn add(&self, listener: &ChangeListener<C>) -> bool {
        let present = self
            .entries
            .borrow()
            .iter()
            .any(|entry| matches!(&entry.slot, Slot::Callback(l) if l.same(listener)));
        if present {
            return false;
        }
        self.push(Slot::Callback(listener.clone()));
        true
    }

    /// Unregister a callback. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &ChangeListener<C>) -> bool {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            entries
                .iter()
                .position(|entry| matches!(&entry.slot, Slot::Callback(l) if l.same(listener)))
                .map(|index| entries.remove(index))
        };
        // The entry (and whatever its closure captured) drops here, after
        // the registry borrow is released.
        removed.is_some()
    }

    pub fn attach(&self, relay: Relay) -> ListenerKey {
        self.push(Slot::Relay(relay))
    }

    /// Remove the relay registered under `key`.
    ///
    /// Returns `false` if the key is unknown or the registry is currently
    /// borrowed; in the latter case the relay is left for lazy pruning.
    pub fn detach(&self, key: ListenerKey) -> bool {
        let removed = {
            let Ok(mut entries) = self.entries.try_borrow_mut() else {
                return false;
            };
            entries
                .iter()
                .position(|entry| entry.key == key)
                .map(|index| entries.remove(index))
        };
        removed.is_some()
    }

    /// Number of registered entries, including relays not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn has_callbacks(&self) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|entry| matches!(entry.slot, Slot::Callback(_)))
    }

    /// Notify every entry that `subject` may have changed.
    pub fn notify(&self, subject: &C) {
        let snapshot: SmallVec<[Slot<C>; 8]> = {
            let mut entries = self.entries.borrow_mut();
            let before = entries.len();
            entries.retain(|entry| !entry.slot.is_doomed());
            let pruned = before - entries.len();
            if pruned > 0 {
                debug!(message = "listeners.prune", pruned, remaining = entries.len());
            }
            entries.iter().map(|entry| entry.slot.clone()).collect()
        };
        for slot in snapshot {
            match slot {
                Slot::Callback(listener) => (listener.callback)(subject),
                Slot::Relay(relay) => relay.fire(),
            }
        }
    }
}

impl<C> Default for Listeners<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Invalidate;
    use std::rc::Weak;

    struct Counter {
        hits: StdCell<u32>,
    }

    impl Invalidate for Counter {
        fn invalidate(self: Rc<Self>) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    fn relay_to(target: &Rc<Counter>) -> Relay {
        let weak: Weak<dyn Invalidate> = Rc::downgrade(target) as Weak<dyn Invalidate>;
        Relay::new(weak)
    }

    #[test]
    fn add_is_idempotent() {
        let listeners: Listeners<u8> = Listeners::new();
        let listener = ChangeListener::new(|_: &u8| {});
        assert!(listeners.add(&listener));
        assert!(!listeners.add(&listener));
        assert!(!listeners.add(&listener.clone()));
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let listeners: Listeners<u8> = Listeners::new();
        let listener = ChangeListener::new(|_: &u8| {});
        listeners.add(&listener);
        assert!(listeners.remove(&listener));
        assert!(!listeners.remove(&listener));
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn distinct_closures_are_distinct_listeners() {
        let listeners: Listeners<u8> = Listeners::new();
        assert!(listeners.add(&ChangeListener::new(|_: &u8| {})));
        assert!(listeners.add(&ChangeListener::new(|_: &u8| {})));
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn notifies_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let listeners: Listeners<u8> = Listeners::new();
        for tag in 0..3 {
            let order = Rc::clone(&order);
            listeners.add(&ChangeListener::new(move |subject: &u8| {
                order.borrow_mut().push((tag, *subject));
            }));
        }
        listeners.notify(&7);
        assert_eq!(*order.borrow(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn listener_may_remove_itself_during_notify() {
        let listeners: Rc<Listeners<u8>> = Rc::new(Listeners::new());
        let calls = Rc::new(StdCell::new(0));
        let slot: Rc<RefCell<Option<ChangeListener<u8>>>> = Rc::new(RefCell::new(None));
        let listener = {
            let listeners = Rc::downgrade(&listeners);
            let calls = Rc::clone(&calls);
            let slot = Rc::clone(&slot);
            ChangeListener::new(move |_: &u8| {
                calls.set(calls.get() + 1);
                if let (Some(listeners), Some(me)) = (listeners.upgrade(), slot.borrow().clone()) {
                    listeners.remove(&me);
                }
            })
        };
        *slot.borrow_mut() = Some(listener.clone());
        listeners.add(&listener);

        listeners.notify(&1);
        listeners.notify(&2);
        assert_eq!(calls.get(), 1);
        assert_eq!(listeners.len(), 0);
        slot.borrow_mut().take();
    }

    #[test]
    fn relay_fires_live_target() {
        let target = Rc::new(Counter { hits: StdCell::new(0) });
        let listeners: Listeners<u8> = Listeners::new();
        listeners.attach(relay_to(&target));
        listeners.notify(&0);
        listeners.notify(&0);
        assert_eq!(target.hits.get(), 2);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn doomed_relay_pruned_on_next_pass() {
        let target = Rc::new(Counter { hits: StdCell::new(0) });
        let listeners: Listeners<u8> = Listeners::new();
        listeners.attach(relay_to(&target));
        drop(target);

        // First pass discovers the dead target and marks the relay doomed.
        listeners.notify(&0);
        assert_eq!(listeners.len(), 1);
        // Second pass prunes it.
        listeners.notify(&0);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn detach_by_key() {
        let target = Rc::new(Counter { hits: StdCell::new(0) });
        let listeners: Listeners<u8> = Listeners::new();
        let first = listeners.attach(relay_to(&target));
        let second = listeners.attach(relay_to(&target));
        assert_ne!(first, second);
        assert!(listeners.detach(first));
        assert!(!listeners.detach(first));
        assert_eq!(listeners.len(), 1);
        listeners.notify(&0);
        assert_eq!(target.hits.get(), 1);
    }

    #[test]
    fn has_callbacks_ignores_relays() {
        let target = Rc::new(Counter { hits: StdCell::new(0) });
        let listeners: Listeners<u8> = Listeners::new();
        listeners.attach(relay_to(&target));
        assert!(!listeners.has_callbacks());
        listeners.add(&ChangeListener::new(|_: &u8| {}));
        assert!(listeners.has_callbacks());
    }

    #[test]
    fn subscription_runs_once() {
        let runs = Rc::new(StdCell::new(0));
        let sub = {
            let runs = Rc::clone(&runs);
            Subscription::new(move || runs.set(runs.get() + 1))
        };
        sub.cancel();
        assert_eq!(runs.get(), 1);
    }
}
