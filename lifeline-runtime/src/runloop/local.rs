use super::ledger::{Ledger, TimerDriver};
use super::{Callback, CoalesceKey, Queue, Runloop, TimerHandle};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Production runloop on top of tokio's single-threaded local executor.
///
/// Timers are `spawn_local` sleeps, aborted on cancel; queued work is drained
/// by a local autorun task. Must be used from inside a
/// [`tokio::task::LocalSet`].
pub struct TokioRunloop {
    inner: Rc<Inner>,
}

struct Inner {
    me: Weak<Inner>,
    ledger: Ledger,
    sleeps: RefCell<HashMap<TimerHandle, JoinHandle<()>>>,
    autorun_pending: Cell<bool>,
}

impl Inner {
    fn ensure_autorun(&self) {
        if self.autorun_pending.replace(true) {
            return;
        }
        let me = self.me.clone();
        tokio::task::spawn_local(async move {
            if let Some(inner) = me.upgrade() {
                inner.autorun_pending.set(false);
                inner.ledger.flush();
            }
        });
    }
}

impl TimerDriver for Inner {
    fn arm(&self, handle: TimerHandle, delay: Duration) {
        let me = self.me.clone();
        let sleep = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = me.upgrade() {
                inner.sleeps.borrow_mut().remove(&handle);
                inner.ledger.fire(handle);
                inner.ledger.flush();
            }
        });
        self.sleeps.borrow_mut().insert(handle, sleep);
    }

    fn disarm(&self, handle: TimerHandle) {
        if let Some(sleep) = self.sleeps.borrow_mut().remove(&handle) {
            sleep.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let sleeps = std::mem::take(self.sleeps.get_mut());
        if !sleeps.is_empty() {
            debug!(timers = sleeps.len(), "Dropping runloop with pending timers");
        }
        for (_, sleep) in sleeps {
            sleep.abort();
        }
    }
}

impl Default for TokioRunloop {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioRunloop {
    pub fn new() -> Self {
        Self {
            inner: Rc::new_cyclic(|me| Inner {
                me: me.clone(),
                ledger: Ledger::new(),
                sleeps: RefCell::new(HashMap::new()),
                autorun_pending: Cell::new(false),
            }),
        }
    }

    /// Create a runloop and install it on the current thread.
    pub fn install() -> Rc<Self> {
        let runloop = Rc::new(Self::new());
        super::install(runloop.clone());
        runloop
    }

    /// Timers still waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.inner.ledger.pending_timers()
    }
}

impl Runloop for TokioRunloop {
    fn later(&self, callback: Callback, delay: Duration) -> TimerHandle {
        self.inner.ledger.later(self.inner.as_ref(), callback, delay)
    }

    fn schedule(&self, queue: Queue, callback: Callback) -> TimerHandle {
        let handle = self.inner.ledger.schedule(queue, callback);
        self.inner.ensure_autorun();
        handle
    }

    fn debounce(
        &self,
        key: CoalesceKey,
        callback: Callback,
        spacing: Duration,
        immediate: bool,
    ) -> TimerHandle {
        self.inner
            .ledger
            .debounce(self.inner.as_ref(), key, callback, spacing, immediate)
    }

    fn throttle(
        &self,
        key: CoalesceKey,
        callback: Callback,
        on_close: Callback,
        spacing: Duration,
        immediate: bool,
    ) -> TimerHandle {
        self.inner
            .ledger
            .throttle(self.inner.as_ref(), key, callback, on_close, spacing, immediate)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.inner.ledger.cancel(self.inner.as_ref(), handle)
    }

    fn join(&self, work: &mut dyn FnMut()) {
        work();
        self.inner.ledger.flush();
    }

    fn flush(&self) {
        self.inner.ledger.flush();
    }

    fn has_queued_work(&self) -> bool {
        self.inner.ledger.has_queued_work()
    }
}
