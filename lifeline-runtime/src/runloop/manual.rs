use super::ledger::{Ledger, TimerDriver};
use super::{Callback, CoalesceKey, Queue, Runloop, TimerHandle};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

/// Deterministic runloop driven by a virtual clock.
///
/// Nothing runs until the test calls [`advance`](Self::advance),
/// [`flush`](Runloop::flush) or [`join`](Runloop::join).
///
/// ```
/// use lifeline_runtime::runloop::{ManualRunloop, Runloop};
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let runloop = ManualRunloop::new();
/// let fired = Rc::new(Cell::new(false));
/// let flag = fired.clone();
/// runloop.later(Box::new(move || flag.set(true)), Duration::from_millis(10));
///
/// runloop.advance(Duration::from_millis(9));
/// assert!(!fired.get());
/// runloop.advance(Duration::from_millis(1));
/// assert!(fired.get());
/// ```
pub struct ManualRunloop {
    ledger: Ledger,
    clock: VirtualClock,
    listener_options: Cell<bool>,
}

#[derive(Default)]
struct VirtualClock {
    now: Cell<Duration>,
    seq: Cell<u64>,
    due: RefCell<BTreeMap<(Duration, u64), TimerHandle>>,
    slots: RefCell<HashMap<TimerHandle, (Duration, u64)>>,
}

impl VirtualClock {
    fn pop_due(&self, deadline: Duration) -> Option<(Duration, TimerHandle)> {
        let mut due = self.due.borrow_mut();
        let (&(at, seq), _) = due.iter().next()?;
        if at > deadline {
            return None;
        }
        let handle = due.remove(&(at, seq))?;
        self.slots.borrow_mut().remove(&handle);
        Some((at, handle))
    }
}

impl TimerDriver for VirtualClock {
    fn arm(&self, handle: TimerHandle, delay: Duration) {
        let at = self.now.get().saturating_add(delay);
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        self.due.borrow_mut().insert((at, seq), handle);
        self.slots.borrow_mut().insert(handle, (at, seq));
    }

    fn disarm(&self, handle: TimerHandle) {
        if let Some(slot) = self.slots.borrow_mut().remove(&handle) {
            self.due.borrow_mut().remove(&slot);
        }
    }
}

impl Default for ManualRunloop {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualRunloop {
    pub fn new() -> Self {
        Self {
            ledger: Ledger::new(),
            clock: VirtualClock::default(),
            listener_options: Cell::new(true),
        }
    }

    /// Create a runloop and install it on the current thread.
    pub fn install() -> Rc<Self> {
        let runloop = Rc::new(Self::new());
        super::install(runloop.clone());
        runloop
    }

    /// Pretend event targets lack listener-option support.
    pub fn without_listener_options(self) -> Self {
        self.listener_options.set(false);
        self
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.clock.now.get()
    }

    /// Move the clock forward, firing every timer that comes due in order and
    /// flushing the queues after each one.
    pub fn advance(&self, by: Duration) {
        let deadline = self.clock.now.get().saturating_add(by);
        while let Some((at, handle)) = self.clock.pop_due(deadline) {
            self.clock.now.set(at);
            self.ledger.fire(handle);
            self.ledger.flush();
        }
        self.clock.now.set(deadline);
        self.ledger.flush();
    }

    /// Timers still waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.ledger.pending_timers()
    }

    /// True if `handle` is still waiting, as a timer or as queued work.
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.ledger.is_pending(handle)
    }
}

impl Runloop for ManualRunloop {
    fn later(&self, callback: Callback, delay: Duration) -> TimerHandle {
        self.ledger.later(&self.clock, callback, delay)
    }

    fn schedule(&self, queue: Queue, callback: Callback) -> TimerHandle {
        self.ledger.schedule(queue, callback)
    }

    fn debounce(
        &self,
        key: CoalesceKey,
        callback: Callback,
        spacing: Duration,
        immediate: bool,
    ) -> TimerHandle {
        self.ledger.debounce(&self.clock, key, callback, spacing, immediate)
    }

    fn throttle(
        &self,
        key: CoalesceKey,
        callback: Callback,
        on_close: Callback,
        spacing: Duration,
        immediate: bool,
    ) -> TimerHandle {
        self.ledger.throttle(&self.clock, key, callback, on_close, spacing, immediate)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.ledger.cancel(&self.clock, handle)
    }

    fn join(&self, work: &mut dyn FnMut()) {
        work();
        self.ledger.flush();
    }

    fn flush(&self) {
        self.ledger.flush();
    }

    fn has_queued_work(&self) -> bool {
        self.ledger.has_queued_work()
    }

    fn supports_listener_options(&self) -> bool {
        self.listener_options.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_fire_in_due_order() {
        let runloop = ManualRunloop::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (name, ms) in [("slow", 30), ("fast", 10), ("mid", 20)] {
            let order = order.clone();
            runloop.later(Box::new(move || order.borrow_mut().push(name)), Duration::from_millis(ms));
        }

        runloop.advance(Duration::from_millis(25));
        assert_eq!(*order.borrow(), vec!["fast", "mid"]);
        assert_eq!(runloop.pending_timers(), 1);
        assert_eq!(runloop.now(), Duration::from_millis(25));
    }

    #[test]
    fn timers_armed_while_firing_respect_the_deadline() {
        let runloop = Rc::new(ManualRunloop::new());
        let hits = Rc::new(Cell::new(0));

        let (rl, h) = (runloop.clone(), hits.clone());
        runloop.later(
            Box::new(move || {
                h.set(h.get() + 1);
                let h = h.clone();
                rl.later(Box::new(move || h.set(h.get() + 1)), Duration::from_millis(10));
            }),
            Duration::from_millis(10),
        );

        runloop.advance(Duration::from_millis(15));
        assert_eq!(hits.get(), 1);
        runloop.advance(Duration::from_millis(5));
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn cancelled_queue_work_never_runs() {
        let runloop = ManualRunloop::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let handle = runloop.schedule(Queue::Actions, Box::new(move || flag.set(true)));

        assert!(runloop.is_pending(handle));
        assert!(runloop.cancel(handle));
        runloop.flush();
        assert!(!ran.get());
    }

    #[test]
    fn huge_delays_saturate_instead_of_overflowing() {
        let runloop = ManualRunloop::new();
        runloop.advance(Duration::from_millis(5));
        let handle = runloop.later(Box::new(|| {}), Duration::MAX);

        runloop.advance(Duration::MAX);
        assert_eq!(runloop.now(), Duration::MAX);
        assert!(!runloop.is_pending(handle));
    }
}
