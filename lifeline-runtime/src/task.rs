//! Deferred, queued and throttled work bound to an owner.
//!
//! Every handle the runloop hands back is kept in the owner's timer set until
//! it fires, is cancelled, or the owner is torn down. Tracking is done by a
//! guard moved into the callback: when the callback runs it removes its
//! handle before invoking the task, and when the runloop drops it unrun
//! (cancelled, coalesced away) it removes the handle as well.

use crate::error::{LifelineError, Result};
use crate::owner::{Destroyable, OwnerKey, Task, TaskMethods};
use crate::registry::{self, OwnerTable};
use crate::runloop::{self, Callback, CoalesceKey, Queue, TimerHandle};
use crate::spacing::{self, Spacing};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace, warn};

thread_local! {
    static TIMERS: OwnerTable<HashSet<TimerHandle>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Unarmed,
    Armed(TimerHandle),
    Done,
}

/// Owned by a scheduled callback; keeps the owner's timer set in sync.
struct Tracked {
    key: OwnerKey,
    slot: Rc<Cell<Slot>>,
}

impl Tracked {
    fn new(key: OwnerKey) -> (Self, Rc<Cell<Slot>>) {
        let slot = Rc::new(Cell::new(Slot::Unarmed));
        (Self { key, slot: slot.clone() }, slot)
    }

    fn release(&self) {
        if let Slot::Armed(handle) = self.slot.replace(Slot::Done) {
            untrack(self.key, handle);
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.release();
    }
}

fn untrack(key: OwnerKey, handle: TimerHandle) {
    registry::with_entry(&TIMERS, key, |timers| timers.remove(&handle));
}

/// Record `handle` unless its callback already ran or was dropped.
fn arm(key: OwnerKey, slot: &Cell<Slot>, handle: TimerHandle) {
    if slot.get() != Slot::Unarmed || handle.is_null() {
        return;
    }
    slot.set(Slot::Armed(handle));
    registry::with_entry(&TIMERS, key, |timers| timers.insert(handle));
}

fn cancel_all(key: OwnerKey) {
    let Some(timers) = registry::take_entry(&TIMERS, key) else {
        return;
    };
    if timers.is_empty() {
        return;
    }
    let Some(runloop) = runloop::try_current() else {
        warn!(owner = %key, timers = timers.len(), "No runloop installed; cannot cancel timers");
        return;
    };
    debug!(owner = %key, timers = timers.len(), "Cancelling outstanding timers");
    for handle in timers {
        runloop.cancel(handle);
    }
}

fn is_tearing_down<O: Destroyable>(owner: &O) -> bool {
    owner.is_destroying() || owner.is_destroyed()
}

/// Wrap `task` so it runs against `owner` only while the owner is alive.
fn bind<O: Destroyable>(
    owner: &Rc<O>,
    key: OwnerKey,
    task: Rc<dyn Fn(&O)>,
) -> (Callback, Rc<Cell<Slot>>) {
    let (tracked, slot) = Tracked::new(key);
    let owner = Rc::downgrade(owner);
    let callback: Callback = Box::new(move || {
        tracked.release();
        if let Some(owner) = owner.upgrade() {
            trace!(owner = %key, "Running task");
            task(&owner);
        }
    });
    (callback, slot)
}

/// Run `task` against `owner` after `delay`.
///
/// Returns [`TimerHandle::NULL`] without scheduling anything if the owner is
/// already tearing down.
pub fn run_task<O>(owner: &Rc<O>, task: impl Into<Task<O>>, delay: Duration) -> Result<TimerHandle>
where
    O: Destroyable + TaskMethods,
{
    let task = task.into().resolve()?;
    if is_tearing_down(owner.as_ref()) {
        return Ok(TimerHandle::NULL);
    }

    let runloop = runloop::current()?;
    let key = registry::ensure_entry(&TIMERS, owner, cancel_all)?;
    let (callback, slot) = bind(owner, key, task);
    let handle = runloop.later(callback, delay);
    arm(key, &slot, handle);
    debug!(owner = %key, %handle, ?delay, "Scheduled run_task");
    Ok(handle)
}

/// Run `task` against `owner` in the named runloop queue.
///
/// `queue_name` must be a recognized queue other than `afterRender`.
pub fn schedule_task<O>(owner: &Rc<O>, queue_name: &str, task: impl Into<Task<O>>) -> Result<TimerHandle>
where
    O: Destroyable + TaskMethods,
{
    let queue: Queue = queue_name.parse()?;
    if queue.is_reserved() {
        return Err(LifelineError::ReservedQueue { name: queue_name.to_string() });
    }
    let task = task.into().resolve()?;
    if is_tearing_down(owner.as_ref()) {
        return Ok(TimerHandle::NULL);
    }

    let runloop = runloop::current()?;
    let key = registry::ensure_entry(&TIMERS, owner, cancel_all)?;
    let (callback, slot) = bind(owner, key, task);
    let handle = runloop.schedule(queue, callback);
    arm(key, &slot, handle);
    debug!(owner = %key, %handle, %queue, "Scheduled schedule_task");
    Ok(handle)
}

/// Throttle the owner's method `task_name`: runs at most once per spacing
/// window (immediately by default). Closures are rejected: throttling
/// de-duplicates by method name across calls.
pub fn throttle_task<O, S>(owner: &Rc<O>, task_name: impl Into<Task<O>>, spacing: S) -> Result<TimerHandle>
where
    O: Destroyable + TaskMethods,
    S: TryInto<Spacing>,
    LifelineError: From<S::Error>,
{
    let task = task_name.into();
    let name = task.name().ok_or(LifelineError::NamedTaskRequired)?.to_string();
    let method = task.resolve()?;
    throttle(owner, name, method, spacing::resolve(spacing)?)
}

/// Like [`throttle_task`], but runs `f` (typically capturing arguments)
/// instead of a named method. `name` is only the throttle key; the first
/// call's closure in each window is the one that runs.
pub fn throttle_task_with<O, F, S>(owner: &Rc<O>, name: &str, f: F, spacing: S) -> Result<TimerHandle>
where
    O: Destroyable,
    F: Fn(&O) + 'static,
    S: TryInto<Spacing>,
    LifelineError: From<S::Error>,
{
    throttle(owner, name.to_string(), Rc::new(f), spacing::resolve(spacing)?)
}

fn throttle<O: Destroyable>(
    owner: &Rc<O>,
    name: String,
    task: Rc<dyn Fn(&O)>,
    spacing: Spacing,
) -> Result<TimerHandle> {
    if is_tearing_down(owner.as_ref()) {
        return Ok(TimerHandle::NULL);
    }

    let runloop = runloop::current()?;
    let key = registry::ensure_entry(&TIMERS, owner, cancel_all)?;
    let (callback, slot) = bind(owner, key, task);
    // Holds the handle in the timer set until the window closes, even when
    // the leading-edge run already released `slot`.
    let (window, window_slot) = Tracked::new(key);
    let on_close: Callback = Box::new(move || drop(window));
    let immediate = spacing.immediate_or(true);
    let handle = runloop.throttle(
        CoalesceKey::new(key, name),
        callback,
        on_close,
        spacing.duration,
        immediate,
    );
    arm(key, &slot, handle);
    arm(key, &window_slot, handle);
    Ok(handle)
}

/// Cancel a handle returned by [`run_task`], [`schedule_task`] or
/// [`throttle_task`]. Cancelling [`TimerHandle::NULL`], a handle that already
/// fired, or one that was already cancelled does nothing.
pub fn cancel_task<O: Destroyable>(owner: &Rc<O>, handle: TimerHandle) -> Result<()> {
    if handle.is_null() {
        return Ok(());
    }
    let key = OwnerKey::of(owner);
    untrack(key, handle);
    if let Some(runloop) = runloop::try_current() {
        if runloop.cancel(handle) {
            debug!(owner = %key, %handle, "Cancelled task");
        }
    }
    Ok(())
}

pub(crate) fn pending(key: OwnerKey) -> usize {
    registry::with_entry(&TIMERS, key, |timers| timers.len()).unwrap_or(0)
}

pub(crate) fn owners() -> Vec<OwnerKey> {
    registry::owners(&TIMERS)
}

pub(crate) fn clear() {
    registry::clear(&TIMERS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::run_all_disposers;
    use crate::runloop::{ManualRunloop, Runloop};

    #[derive(Default)]
    struct Component {
        destroying: Cell<bool>,
        log: RefCell<Vec<&'static str>>,
    }

    impl Component {
        fn ping(&self) {
            self.log.borrow_mut().push("ping");
        }
    }

    impl Destroyable for Component {
        fn is_destroying(&self) -> bool {
            self.destroying.get()
        }
    }

    impl TaskMethods for Component {
        fn task_method(name: &str) -> Option<fn(&Self)> {
            match name {
                "ping" => Some(Self::ping),
                _ => None,
            }
        }
    }

    fn destroy(owner: &Rc<Component>) {
        owner.destroying.set(true);
        run_all_disposers(owner);
    }

    #[test]
    fn run_task_fires_once_and_empties_the_timer_set() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());
        let key = OwnerKey::of(&owner);

        run_task(&owner, "ping", Duration::from_millis(500)).unwrap();
        assert_eq!(pending(key), 1);

        runloop.advance(Duration::from_millis(501));
        assert_eq!(*owner.log.borrow(), vec!["ping"]);
        assert_eq!(pending(key), 0);
        destroy(&owner);
    }

    #[test]
    fn teardown_cancels_pending_work() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());

        run_task(&owner, "ping", Duration::from_millis(10)).unwrap();
        schedule_task(&owner, "actions", "ping").unwrap();
        destroy(&owner);

        runloop.advance(Duration::from_millis(50));
        assert!(owner.log.borrow().is_empty());
        assert_eq!(runloop.pending_timers(), 0);
    }

    #[test]
    fn destroying_owner_gets_the_null_handle() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());
        owner.destroying.set(true);

        assert_eq!(run_task(&owner, "ping", Duration::ZERO).unwrap(), TimerHandle::NULL);
        assert_eq!(schedule_task(&owner, "render", "ping").unwrap(), TimerHandle::NULL);
        assert_eq!(throttle_task(&owner, "ping", 5u64).unwrap(), TimerHandle::NULL);
        assert_eq!(runloop.pending_timers(), 0);
        assert!(!runloop.has_queued_work());
    }

    #[test]
    fn task_can_cancel_itself_and_reschedule_from_inside() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());
        let key = OwnerKey::of(&owner);
        let own_handle = Rc::new(Cell::new(TimerHandle::NULL));

        let (o, h) = (owner.clone(), own_handle.clone());
        let handle = run_task(
            &owner,
            Task::call(move |c: &Component| {
                // Already untracked and fired: cancelling is a no-op.
                cancel_task(&o, h.get()).unwrap();
                c.log.borrow_mut().push("first");
            }),
            Duration::from_millis(1),
        )
        .unwrap();
        own_handle.set(handle);

        let o = owner.clone();
        run_task(
            &owner,
            Task::call(move |_: &Component| {
                run_task(&o, "ping", Duration::from_millis(1)).unwrap();
            }),
            Duration::from_millis(1),
        )
        .unwrap();

        runloop.advance(Duration::from_millis(1));
        assert_eq!(*owner.log.borrow(), vec!["first"]);
        assert_eq!(pending(key), 1);
        runloop.advance(Duration::from_millis(1));
        assert_eq!(*owner.log.borrow(), vec!["first", "ping"]);
        destroy(&owner);
    }

    #[test]
    fn cancel_task_is_idempotent() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());
        let handle = run_task(&owner, "ping", Duration::from_millis(5)).unwrap();

        cancel_task(&owner, handle).unwrap();
        cancel_task(&owner, handle).unwrap();
        cancel_task(&owner, TimerHandle::NULL).unwrap();
        runloop.advance(Duration::from_millis(10));
        assert!(owner.log.borrow().is_empty());
        assert_eq!(pending(OwnerKey::of(&owner)), 0);
        destroy(&owner);
    }

    #[test]
    fn schedule_task_rejects_reserved_and_unknown_queues() {
        ManualRunloop::install();
        let owner = Rc::new(Component::default());

        let err = schedule_task(&owner, "afterRender", "ping").unwrap_err();
        assert_eq!(err, LifelineError::ReservedQueue { name: "afterRender".into() });
        let err = schedule_task(&owner, "paint", "ping").unwrap_err();
        assert_eq!(err, LifelineError::UnknownQueue { name: "paint".into() });
    }

    #[test]
    fn unresolvable_method_name_fails_fast() {
        ManualRunloop::install();
        let owner = Rc::new(Component::default());
        let err = run_task(&owner, "pong", Duration::ZERO).unwrap_err();
        assert_eq!(err.as_label(), "unknown_task_method");
    }

    #[test]
    fn throttle_fires_once_per_window() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());

        for _ in 0..3 {
            throttle_task(&owner, "ping", 5u64).unwrap();
        }
        assert_eq!(owner.log.borrow().len(), 1);
        runloop.advance(Duration::from_millis(5));
        assert_eq!(owner.log.borrow().len(), 1);

        throttle_task(&owner, "ping", 5u64).unwrap();
        assert_eq!(owner.log.borrow().len(), 2);
        destroy(&owner);
    }

    #[test]
    fn trailing_throttle_runs_at_the_window_boundary() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());
        let key = OwnerKey::of(&owner);

        let spacing = Spacing::from(5u64).immediate(false);
        throttle_task(&owner, "ping", spacing).unwrap();
        throttle_task(&owner, "ping", spacing).unwrap();
        assert!(owner.log.borrow().is_empty());
        assert_eq!(pending(key), 1);

        runloop.advance(Duration::from_millis(5));
        assert_eq!(owner.log.borrow().len(), 1);
        assert_eq!(pending(key), 0);
        destroy(&owner);
    }

    #[test]
    fn immediate_throttle_window_stays_tracked_until_it_closes() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());
        let key = OwnerKey::of(&owner);

        let handle = throttle_task(&owner, "ping", 5u64).unwrap();
        assert_eq!(owner.log.borrow().len(), 1);
        assert_eq!(pending(key), 1);
        assert!(runloop.is_pending(handle));

        runloop.advance(Duration::from_millis(5));
        assert_eq!(pending(key), 0);
        destroy(&owner);
    }

    #[test]
    fn teardown_closes_an_open_immediate_throttle_window() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());

        let key = OwnerKey::of(&owner);

        let handle = throttle_task(&owner, "ping", 50u64).unwrap();
        destroy(&owner);

        assert!(!runloop.is_pending(handle));
        assert_eq!(runloop.pending_timers(), 0);
        assert!(!owners().contains(&key));
    }

    #[test]
    fn throttle_rejects_closures_and_bad_spacing() {
        ManualRunloop::install();
        let owner = Rc::new(Component::default());

        let err = throttle_task(&owner, Task::call(|_: &Component| {}), 5u64).unwrap_err();
        assert_eq!(err, LifelineError::NamedTaskRequired);
        let err = throttle_task(&owner, "ping", "fast").unwrap_err();
        assert_eq!(err, LifelineError::InvalidSpacing { value: "fast".into() });
    }

    #[test]
    fn throttle_with_closure_keys_on_name() {
        let runloop = ManualRunloop::install();
        let owner = Rc::new(Component::default());

        for word in ["a", "b"] {
            throttle_task_with(&owner, "say", move |o: &Component| o.log.borrow_mut().push(word), 10u64)
                .unwrap();
        }
        assert_eq!(*owner.log.borrow(), vec!["a"]);
        runloop.advance(Duration::from_millis(10));
        assert_eq!(*owner.log.borrow(), vec!["a"]);
        destroy(&owner);
    }
}
