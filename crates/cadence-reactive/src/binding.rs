#![forbid(unsafe_code)]

//! How a generic cell produces its value.

use std::rc::Rc;

use crate::context::Context;
use crate::error::Result;

pub(crate) type ComputeFn<T> = Rc<dyn Fn(&Context) -> Result<T>>;
pub(crate) type UpdateFn<T> = Rc<dyn Fn(&Context, &mut T) -> Result<()>>;

/// Value-production strategy of a [`Cell`](crate::Cell).
///
/// Each variant owns the value it currently holds, so a Constant always has
/// one and a SideEffecting cell always has its seed.
pub(crate) enum Binding<T> {
    /// Fixed value; never recomputed.
    Constant(T),
    /// Rebuilt from scratch on every recomputation. `cached` is `None` only
    /// until the first successful computation of a cell that never held a
    /// value.
    Computed { compute: ComputeFn<T>, cached: Option<T> },
    /// `seed` is threaded through `update` across recomputations and
    /// mutated in place.
    SideEffecting { update: UpdateFn<T>, seed: T },
}

/// What a refresh has to run, detached from the binding borrow.
pub(crate) enum Plan<T> {
    Settled,
    Compute(ComputeFn<T>),
    Update,
}

impl<T> Binding<T> {
    pub(crate) fn value(&self) -> Option<&T> {
        match self {
            Self::Constant(value) | Self::SideEffecting { seed: value, .. } => Some(value),
            Self::Computed { cached, .. } => cached.as_ref(),
        }
    }

    pub(crate) fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Computed { .. } => "computed",
            Self::SideEffecting { .. } => "side_effecting",
        }
    }

    pub(crate) fn plan(&self) -> Plan<T> {
        match self {
            Self::Constant(_) => Plan::Settled,
            Self::Computed { compute, .. } => Plan::Compute(Rc::clone(compute)),
            Self::SideEffecting { .. } => Plan::Update,
        }
    }

    /// Store a value produced by `by`. Returns whether it differs from the
    /// previous one, or `None` if `by` is no longer this cell's
    /// computation.
    pub(crate) fn store(&mut self, by: &ComputeFn<T>, next: T) -> Option<bool>
    where
        T: PartialEq,
    {
        match self {
            Self::Computed { compute, cached } if Rc::ptr_eq(compute, by) => {
                let changed = cached.as_ref() != Some(&next);
                *cached = Some(next);
                Some(changed)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn computed(cached: Option<i32>) -> Binding<i32> {
        Binding::Computed {
            compute: Rc::new(|_| Ok(1)),
            cached,
        }
    }

    #[test]
    fn values_by_variant() {
        assert_eq!(Binding::Constant(3).value(), Some(&3));
        assert_eq!(computed(None).value(), None);
        assert_eq!(computed(Some(4)).value(), Some(&4));
        let side: Binding<i32> = Binding::SideEffecting {
            update: Rc::new(|_, _| Ok(())),
            seed: 9,
        };
        assert_eq!(side.value(), Some(&9));
        assert_eq!(side.kind(), "side_effecting");
    }

    #[test]
    fn store_reports_change() {
        let mut binding = computed(None);
        let Plan::Compute(by) = binding.plan() else {
            panic!("computed binding plans a computation");
        };
        assert_eq!(binding.store(&by, 1), Some(true));
        assert_eq!(binding.store(&by, 1), Some(false));
        assert_eq!(binding.store(&by, 2), Some(true));
        assert_eq!(binding.value(), Some(&2));
    }

    #[test]
    fn store_from_replaced_computation_is_rejected() {
        let mut binding = computed(Some(3));
        let Plan::Compute(stale) = binding.plan() else {
            panic!("computed binding plans a computation");
        };
        binding = computed(Some(3));
        assert_eq!(binding.store(&stale, 8), None);
        assert_eq!(binding.value(), Some(&3));

        let mut constant = Binding::Constant(1);
        assert_eq!(constant.store(&stale, 5), None);
        assert_eq!(constant.value(), Some(&1));
        assert!(constant.is_constant());
    }

    #[test]
    fn plan_matches_variant() {
        assert!(matches!(Binding::Constant(1).plan(), Plan::Settled));
        assert!(matches!(computed(None).plan(), Plan::Compute(_)));
    }
}
