//! Bookkeeping shared by the bundled runloops.
//!
//! The ledger owns handle allocation, the named queues and the debounce and
//! throttle tables. When a timer needs to fire it asks a [`TimerDriver`]; the
//! driver later calls [`Ledger::fire`]. No borrow is held while user
//! callbacks run, so callbacks may freely re-enter the runloop.

use super::{Callback, CoalesceKey, Queue, TimerHandle};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::trace;

/// Arms and disarms real (or virtual) timers for the ledger.
pub(crate) trait TimerDriver {
    fn arm(&self, handle: TimerHandle, delay: Duration);
    fn disarm(&self, handle: TimerHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coalesce {
    Debounce,
    Throttle,
}

struct Armed {
    /// `None` for an `immediate` window that has nothing left to run.
    callback: Option<Callback>,
    /// Runs after `callback` when the window ends; dropped unrun on cancel.
    on_close: Option<Callback>,
    coalesce: Option<(Coalesce, CoalesceKey)>,
}

#[derive(Default)]
struct State {
    timers: HashMap<TimerHandle, Armed>,
    queues: [VecDeque<(TimerHandle, Callback)>; Queue::ALL.len()],
    debounces: HashMap<CoalesceKey, TimerHandle>,
    throttles: HashMap<CoalesceKey, TimerHandle>,
}

impl State {
    fn release_key(&mut self, handle: TimerHandle, coalesce: Option<(Coalesce, CoalesceKey)>) {
        let Some((kind, key)) = coalesce else { return };
        let table = match kind {
            Coalesce::Debounce => &mut self.debounces,
            Coalesce::Throttle => &mut self.throttles,
        };
        if table.get(&key) == Some(&handle) {
            table.remove(&key);
        }
    }
}

pub(crate) struct Ledger {
    last_handle: Cell<u64>,
    state: RefCell<State>,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self {
            last_handle: Cell::new(0),
            state: RefCell::new(State::default()),
        }
    }

    fn next_handle(&self) -> TimerHandle {
        let raw = self.last_handle.get() + 1;
        self.last_handle.set(raw);
        TimerHandle::from_raw(raw)
    }

    pub(crate) fn later(&self, driver: &dyn TimerDriver, callback: Callback, delay: Duration) -> TimerHandle {
        let handle = self.next_handle();
        self.state.borrow_mut().timers.insert(
            handle,
            Armed { callback: Some(callback), on_close: None, coalesce: None },
        );
        driver.arm(handle, delay);
        handle
    }

    pub(crate) fn schedule(&self, queue: Queue, callback: Callback) -> TimerHandle {
        let handle = self.next_handle();
        self.state.borrow_mut().queues[queue.index()].push_back((handle, callback));
        handle
    }

    pub(crate) fn debounce(
        &self,
        driver: &dyn TimerDriver,
        key: CoalesceKey,
        callback: Callback,
        spacing: Duration,
        immediate: bool,
    ) -> TimerHandle {
        let handle = self.next_handle();
        let previous = {
            let mut state = self.state.borrow_mut();
            let previous = state.debounces.insert(key.clone(), handle);
            if let Some(previous) = previous {
                state.timers.remove(&previous);
            }
            previous
        };
        if let Some(previous) = previous {
            driver.disarm(previous);
        }

        let (armed, run_now) = match (immediate, previous) {
            (false, _) => (Some(callback), None),
            (true, None) => (None, Some(callback)),
            (true, Some(_)) => (None, None),
        };
        self.state.borrow_mut().timers.insert(
            handle,
            Armed { callback: armed, on_close: None, coalesce: Some((Coalesce::Debounce, key)) },
        );
        driver.arm(handle, spacing);

        if let Some(callback) = run_now {
            trace!(%handle, "debounce leading edge");
            callback();
        }
        handle
    }

    pub(crate) fn throttle(
        &self,
        driver: &dyn TimerDriver,
        key: CoalesceKey,
        callback: Callback,
        on_close: Callback,
        spacing: Duration,
        immediate: bool,
    ) -> TimerHandle {
        if let Some(&open) = self.state.borrow().throttles.get(&key) {
            return open;
        }

        let handle = self.next_handle();
        let (armed, run_now) = if immediate {
            (None, Some(callback))
        } else {
            (Some(callback), None)
        };
        {
            let mut state = self.state.borrow_mut();
            state.throttles.insert(key.clone(), handle);
            state.timers.insert(
                handle,
                Armed {
                    callback: armed,
                    on_close: Some(on_close),
                    coalesce: Some((Coalesce::Throttle, key)),
                },
            );
        }
        driver.arm(handle, spacing);

        if let Some(callback) = run_now {
            trace!(%handle, "throttle leading edge");
            callback();
        }
        handle
    }

    pub(crate) fn cancel(&self, driver: &dyn TimerDriver, handle: TimerHandle) -> bool {
        let mut state = self.state.borrow_mut();
        if let Some(armed) = state.timers.remove(&handle) {
            state.release_key(handle, armed.coalesce);
            drop(state);
            driver.disarm(handle);
            return true;
        }

        for queue in state.queues.iter_mut() {
            if let Some(pos) = queue.iter().position(|(queued, _)| *queued == handle) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Called by the driver when `handle`'s delay has elapsed.
    pub(crate) fn fire(&self, handle: TimerHandle) -> bool {
        let (callback, on_close) = {
            let mut state = self.state.borrow_mut();
            let Some(armed) = state.timers.remove(&handle) else {
                return false;
            };
            state.release_key(handle, armed.coalesce);
            (armed.callback, armed.on_close)
        };
        if let Some(callback) = callback {
            trace!(%handle, "timer fired");
            callback();
        }
        if let Some(on_close) = on_close {
            on_close();
        }
        true
    }

    /// Drain the queues in flush order. Work queued into an earlier queue
    /// while a later one is flushing runs before the later queue continues.
    pub(crate) fn flush(&self) {
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                state.queues.iter_mut().find_map(|queue| queue.pop_front())
            };
            match next {
                Some((handle, callback)) => {
                    trace!(%handle, "queued work ran");
                    callback();
                }
                None => break,
            }
        }
    }

    pub(crate) fn has_queued_work(&self) -> bool {
        self.state.borrow().queues.iter().any(|queue| !queue.is_empty())
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub(crate) fn is_pending(&self, handle: TimerHandle) -> bool {
        let state = self.state.borrow();
        state.timers.contains_key(&handle)
            || state.queues.iter().any(|queue| queue.iter().any(|(queued, _)| *queued == handle))
    }
}
