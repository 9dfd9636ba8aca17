//! Debounced work bound to an owner.
//!
//! The runloop does the coalescing (last call wins, the timer restarts on
//! every call). The registry only remembers the newest handle per task name so
//! the pending run can be cancelled by name or swept away at teardown.

use crate::error::{LifelineError, Result};
use crate::owner::{owner_name, Destroyable, OwnerKey, TaskMethods};
use crate::registry::{self, OwnerTable};
use crate::runloop::{self, Callback, CoalesceKey, TimerHandle};
use crate::spacing::{self, Spacing};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace, warn};

thread_local! {
    static DEBOUNCES: OwnerTable<HashMap<String, TimerHandle>> = RefCell::new(HashMap::new());
}

fn cancel_all(key: OwnerKey) {
    let Some(pending) = registry::take_entry(&DEBOUNCES, key) else {
        return;
    };
    if pending.is_empty() {
        return;
    }
    let Some(runloop) = runloop::try_current() else {
        warn!(owner = %key, debounces = pending.len(), "No runloop installed; cannot cancel debounces");
        return;
    };
    debug!(owner = %key, debounces = pending.len(), "Cancelling pending debounces");
    for (_, handle) in pending {
        runloop.cancel(handle);
    }
}

/// Debounce the owner's method `name`: repeated calls within `spacing`
/// collapse into a single run after the calls stop.
///
/// Pass `Spacing::from(ms).immediate(true)` to run on the leading edge instead.
pub fn debounce_task<O, S>(owner: &Rc<O>, name: &str, spacing: S) -> Result<TimerHandle>
where
    O: Destroyable + TaskMethods,
    S: TryInto<Spacing>,
    LifelineError: From<S::Error>,
{
    let method = O::task_method(name).ok_or_else(|| LifelineError::UnknownTaskMethod {
        owner: owner_name::<O>(),
        name: name.to_string(),
    })?;
    debounce(owner, name, Rc::new(method), spacing::resolve(spacing)?)
}

/// Like [`debounce_task`], but runs `f` instead of a named method. `f`
/// usually captures the call's arguments; the last call's closure is the one
/// that runs.
pub fn debounce_task_with<O, F, S>(owner: &Rc<O>, name: &str, f: F, spacing: S) -> Result<TimerHandle>
where
    O: Destroyable,
    F: Fn(&O) + 'static,
    S: TryInto<Spacing>,
    LifelineError: From<S::Error>,
{
    debounce(owner, name, Rc::new(f), spacing::resolve(spacing)?)
}

fn debounce<O: Destroyable>(
    owner: &Rc<O>,
    name: &str,
    task: Rc<dyn Fn(&O)>,
    spacing: Spacing,
) -> Result<TimerHandle> {
    if owner.is_destroying() || owner.is_destroyed() {
        return Ok(TimerHandle::NULL);
    }

    let runloop = runloop::current()?;
    let key = registry::ensure_entry(&DEBOUNCES, owner, cancel_all)?;

    let weak = Rc::downgrade(owner);
    let entry = name.to_string();
    let callback: Callback = Box::new(move || {
        registry::with_entry(&DEBOUNCES, key, |pending| pending.remove(&entry));
        if let Some(owner) = weak.upgrade() {
            trace!(owner = %key, name = %entry, "Running debounced task");
            task(&owner);
        }
    });

    let handle = runloop.debounce(
        CoalesceKey::new(key, name),
        callback,
        spacing.duration,
        spacing.immediate_or(false),
    );
    registry::with_entry(&DEBOUNCES, key, |pending| {
        pending.insert(name.to_string(), handle)
    });
    Ok(handle)
}

/// Cancel the pending debounce for `name`, if any.
pub fn cancel_debounce<O: Destroyable>(owner: &Rc<O>, name: &str) -> Result<()> {
    let key = OwnerKey::of(owner);
    let Some(handle) = registry::with_entry(&DEBOUNCES, key, |pending| pending.remove(name)).flatten()
    else {
        return Ok(());
    };
    if let Some(runloop) = runloop::try_current() {
        runloop.cancel(handle);
    }
    debug!(owner = %key, name, %handle, "Cancelled debounce");
    Ok(())
}

pub(crate) fn pending(key: OwnerKey) -> Vec<String> {
    let mut names = registry::with_entry(&DEBOUNCES, key, |pending| {
        pending.keys().cloned().collect::<Vec<_>>()
    })
    .unwrap_or_default();
    names.sort_unstable();
    names
}

pub(crate) fn owners() -> Vec<OwnerKey> {
    registry::owners(&DEBOUNCES)
}

pub(crate) fn clear() {
    registry::clear(&DEBOUNCES);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::run_all_disposers;
    use crate::runloop::ManualRunloop;
    use std::cell::Cell;
    use std::time::Duration;

    #[derive(Default)]
    struct SearchBox {
        destroying: Cell<bool>,
        queries: RefCell<Vec<String>>,
        saves: Cell<u32>,
    }

    impl SearchBox {
        fn save(&self) {
            self.saves.set(self.saves.get() + 1);
        }

        fn search(&self, query: &str) {
            self.queries.borrow_mut().push(query.to_string());
        }
    }

    impl Destroyable for SearchBox {
        fn is_destroying(&self) -> bool {
            self.destroying.get()
        }
    }

    impl TaskMethods for SearchBox {
        fn task_method(name: &str) -> Option<fn(&Self)> {
            match name {
                "save" => Some(Self::save),
                _ => None,
            }
        }
    }

    fn destroy(owner: &Rc<SearchBox>) {
        owner.destroying.set(true);
        run_all_disposers(owner);
    }

    #[test]
    fn last_call_wins() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(SearchBox::default());

        let mut handles = Vec::new();
        for query in ["a", "b", "c"] {
            handles.push(
                debounce_task_with(&owner, "search", move |o: &SearchBox| o.search(query), 5u64).unwrap(),
            );
        }
        handles.dedup();
        assert_eq!(handles.len(), 3);
        assert_eq!(pending(OwnerKey::of(&owner)), vec!["search"]);

        runloop.advance(Duration::from_millis(5));
        assert_eq!(*owner.queries.borrow(), vec!["c"]);
        assert!(pending(OwnerKey::of(&owner)).is_empty());
        destroy(&owner);
    }

    #[test]
    fn each_call_restarts_the_window() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(SearchBox::default());

        debounce_task(&owner, "save", 10u64).unwrap();
        runloop.advance(Duration::from_millis(8));
        debounce_task(&owner, "save", 10u64).unwrap();
        runloop.advance(Duration::from_millis(8));
        assert_eq!(owner.saves.get(), 0);
        runloop.advance(Duration::from_millis(2));
        assert_eq!(owner.saves.get(), 1);
        destroy(&owner);
    }

    #[test]
    fn cancel_debounce_drops_the_pending_run() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(SearchBox::default());

        cancel_debounce(&owner, "save").unwrap();
        debounce_task(&owner, "save", 5u64).unwrap();
        cancel_debounce(&owner, "save").unwrap();
        cancel_debounce(&owner, "save").unwrap();

        runloop.advance(Duration::from_millis(10));
        assert_eq!(owner.saves.get(), 0);
        assert_eq!(runloop.pending_timers(), 0);
        destroy(&owner);
    }

    #[test]
    fn teardown_cancels_every_name() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(SearchBox::default());

        debounce_task(&owner, "save", 5u64).unwrap();
        debounce_task_with(&owner, "search", |o: &SearchBox| o.search("x"), 5u64).unwrap();
        destroy(&owner);

        runloop.advance(Duration::from_millis(10));
        assert_eq!(owner.saves.get(), 0);
        assert!(owner.queries.borrow().is_empty());
        assert!(owners().is_empty());
    }

    #[test]
    fn task_may_debounce_itself_again() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(SearchBox::default());
        let rounds = Rc::new(Cell::new(0));

        fn again(owner: &Rc<SearchBox>, rounds: Rc<Cell<u32>>) {
            let o = owner.clone();
            debounce_task_with(
                owner,
                "again",
                move |_: &SearchBox| {
                    rounds.set(rounds.get() + 1);
                    if rounds.get() < 3 {
                        again(&o, rounds.clone());
                    }
                },
                5u64,
            )
            .unwrap();
        }

        again(&owner, rounds.clone());
        runloop.advance(Duration::from_millis(20));
        assert_eq!(rounds.get(), 3);
        assert!(pending(OwnerKey::of(&owner)).is_empty());
        destroy(&owner);
    }

    #[test]
    fn immediate_runs_on_the_leading_edge_only() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(SearchBox::default());
        let spacing = Spacing::from(5u64).immediate(true);

        debounce_task(&owner, "save", spacing).unwrap();
        debounce_task(&owner, "save", spacing).unwrap();
        assert_eq!(owner.saves.get(), 1);
        runloop.advance(Duration::from_millis(10));
        assert_eq!(owner.saves.get(), 1);
        destroy(&owner);
    }

    #[test]
    fn contract_errors() {
        ManualRunloop::install();
        let owner = Rc::new(SearchBox::default());

        let err = debounce_task(&owner, "missing", 5u64).unwrap_err();
        assert_eq!(err.as_label(), "unknown_task_method");
        let err = debounce_task(&owner, "save", "eventually").unwrap_err();
        assert_eq!(err, LifelineError::InvalidSpacing { value: "eventually".into() });
    }

    #[test]
    fn destroying_owner_is_a_no_op() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(SearchBox::default());
        owner.destroying.set(true);

        assert_eq!(debounce_task(&owner, "save", 5u64).unwrap(), TimerHandle::NULL);
        assert_eq!(runloop.pending_timers(), 0);
        assert!(owners().is_empty());
    }
}
