//! Per-owner disposer registry.
//!
//! Every other registry installs exactly one disposer per owner here, the
//! first time that owner uses it. The host calls [`run_all_disposers`] from the
//! owner's teardown hook; each disposer then runs once, in registration order.

use crate::error::{LifelineError, Result};
use crate::owner::{owner_name, Destroyable, OwnerKey};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, warn};

thread_local! {
    static DISPOSERS: RefCell<HashMap<OwnerKey, Vec<Disposer>>> = RefCell::new(HashMap::new());
}

/// An at-most-once cleanup callback.
///
/// Clones share the same cleanup: whichever clone disposes first runs it.
#[derive(Clone)]
pub struct Disposer {
    cleanup: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl Disposer {
    pub fn new(cleanup: impl FnOnce() + 'static) -> Self {
        Self {
            cleanup: Rc::new(RefCell::new(Some(Box::new(cleanup)))),
        }
    }

    /// Run the cleanup if it has not run yet.
    pub fn dispose(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.cleanup.borrow().is_none()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Register `cleanup` to run when `owner` is torn down.
pub fn register_disposer<O: Destroyable>(
    owner: &Rc<O>,
    cleanup: impl FnOnce() + 'static,
) -> Result<Disposer> {
    if owner.is_destroyed() {
        return Err(LifelineError::OwnerDestroyed {
            owner: owner_name::<O>(),
        });
    }

    let key = OwnerKey::of(owner);
    let disposer = Disposer::new(cleanup);
    DISPOSERS.with(|disposers| {
        disposers
            .borrow_mut()
            .entry(key)
            .or_default()
            .push(disposer.clone());
    });
    debug!(owner = %key, "Registered disposer");
    Ok(disposer)
}

/// Run every disposer registered for `owner`, then forget the owner.
///
/// Called once by the host from the owner's teardown hook. A panicking
/// disposer does not stop the rest; the first panic is resumed once all of
/// them have run. A second call is a no-op.
pub fn run_all_disposers<O: ?Sized>(owner: &Rc<O>) {
    let key = OwnerKey::of(owner);
    let pending = DISPOSERS.with(|disposers| disposers.borrow_mut().remove(&key));
    let Some(pending) = pending else {
        return;
    };

    debug!(owner = %key, disposers = pending.len(), "Running disposers");
    let mut first_panic: Option<Box<dyn Any + Send>> = None;
    for disposer in pending {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| disposer.dispose())) {
            warn!(owner = %key, "Disposer panicked; continuing with the rest");
            first_panic.get_or_insert(payload);
        }
    }

    if let Some(payload) = first_panic {
        panic::resume_unwind(payload);
    }
}

pub(crate) fn disposer_count(key: OwnerKey) -> usize {
    DISPOSERS.with(|disposers| disposers.borrow().get(&key).map_or(0, Vec::len))
}

pub(crate) fn owners_with_disposers() -> Vec<OwnerKey> {
    DISPOSERS.with(|disposers| disposers.borrow().keys().copied().collect())
}

pub(crate) fn clear() {
    DISPOSERS.with(|disposers| disposers.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Component {
        destroyed: Cell<bool>,
    }

    impl Destroyable for Component {
        fn is_destroying(&self) -> bool {
            self.destroyed.get()
        }
        fn is_destroyed(&self) -> bool {
            self.destroyed.get()
        }
    }

    #[test]
    fn disposing_twice_runs_cleanup_once() {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let disposer = Disposer::new(move || c.set(c.get() + 1));

        disposer.dispose();
        disposer.clone().dispose();
        assert_eq!(count.get(), 1);
        assert!(disposer.is_disposed());
    }

    #[test]
    fn run_all_runs_in_registration_order_and_forgets_the_owner() {
        let owner = Rc::new(Component::default());
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            register_disposer(&owner, move || order.borrow_mut().push(i)).unwrap();
        }
        assert_eq!(disposer_count(OwnerKey::of(&owner)), 3);

        run_all_disposers(&owner);
        run_all_disposers(&owner);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert_eq!(disposer_count(OwnerKey::of(&owner)), 0);
    }

    #[test]
    fn a_disposer_that_already_ran_is_skipped_at_teardown() {
        let owner = Rc::new(Component::default());
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let disposer = register_disposer(&owner, move || c.set(c.get() + 1)).unwrap();

        disposer.dispose();
        run_all_disposers(&owner);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn destroyed_owner_is_rejected() {
        let owner = Rc::new(Component::default());
        owner.destroyed.set(true);
        let err = register_disposer(&owner, || {}).unwrap_err();
        assert_eq!(err.as_label(), "owner_destroyed");
    }

    #[test]
    fn panicking_disposer_does_not_stop_the_others() {
        let owner = Rc::new(Component::default());
        let ran = Rc::new(Cell::new(false));
        register_disposer(&owner, || panic!("boom")).unwrap();
        let flag = ran.clone();
        register_disposer(&owner, move || flag.set(true)).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| run_all_disposers(&owner)));
        assert!(result.is_err());
        assert!(ran.get());
        assert_eq!(disposer_count(OwnerKey::of(&owner)), 0);
    }
}
