//! The host scheduler ("runloop") lifeline delegates to.
//!
//! Registries never fire timers themselves. They hand callbacks to whatever
//! [`Runloop`] is installed on the current thread and keep the returned
//! [`TimerHandle`]s so the work can be cancelled when the owner goes away.
//!
//! Two adapters ship with the crate:
//! - [`TokioRunloop`]: timers are `spawn_local` sleeps, for use inside a
//!   `tokio::task::LocalSet`.
//! - [`ManualRunloop`]: a virtual clock advanced explicitly, for tests.

mod ledger;
mod local;
mod manual;
mod queue;

pub use local::TokioRunloop;
pub use manual::ManualRunloop;
pub use queue::Queue;

use crate::error::{LifelineError, Result};
use crate::owner::OwnerKey;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Work handed to the runloop.
pub type Callback = Box<dyn FnOnce()>;

/// Opaque identifier for one pending unit of runloop work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Returned instead of scheduling when the owner is already tearing down.
    pub const NULL: TimerHandle = TimerHandle(0);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        TimerHandle(raw)
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Identity debounce and throttle calls coalesce on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalesceKey {
    pub owner: OwnerKey,
    pub name: String,
}

impl CoalesceKey {
    pub fn new(owner: OwnerKey, name: impl Into<String>) -> Self {
        Self { owner, name: name.into() }
    }
}

/// Scheduler primitives consumed by the registries.
pub trait Runloop {
    /// Run `callback` once after `delay`.
    fn later(&self, callback: Callback, delay: Duration) -> TimerHandle;

    /// Run `callback` during the next flush of `queue`, FIFO within the queue.
    fn schedule(&self, queue: Queue, callback: Callback) -> TimerHandle;

    /// Collapse calls sharing `key` into one run after `spacing` of quiet.
    /// The newest callback wins and every call returns a fresh handle. With
    /// `immediate`, the first call runs now and the rest only extend the window.
    fn debounce(
        &self,
        key: CoalesceKey,
        callback: Callback,
        spacing: Duration,
        immediate: bool,
    ) -> TimerHandle;

    /// Run at most once per `spacing` window for `key`: now when `immediate`,
    /// otherwise at the end of the window. Calls inside an open window return
    /// the window's handle and are dropped.
    ///
    /// `on_close` runs when the window ends, after a trailing `callback`. It
    /// is dropped unrun if the window is cancelled or the call is dropped.
    fn throttle(
        &self,
        key: CoalesceKey,
        callback: Callback,
        on_close: Callback,
        spacing: Duration,
        immediate: bool,
    ) -> TimerHandle;

    /// Cancel pending work. Returns false if it already ran or was cancelled.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Run `work` inside the loop, then flush every queue.
    fn join(&self, work: &mut dyn FnMut());

    /// Drain all queued (non-timer) work.
    fn flush(&self);

    /// True while any queue holds work.
    fn has_queued_work(&self) -> bool;

    /// Whether event targets accept listener options (`passive`, `once`, ...).
    fn supports_listener_options(&self) -> bool {
        true
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<dyn Runloop>>> = const { RefCell::new(None) };
}

/// Install the runloop for this thread, returning the previous one.
pub fn install(runloop: Rc<dyn Runloop>) -> Option<Rc<dyn Runloop>> {
    CURRENT.with(|current| current.borrow_mut().replace(runloop))
}

/// Remove this thread's runloop.
pub fn uninstall() -> Option<Rc<dyn Runloop>> {
    CURRENT.with(|current| current.borrow_mut().take())
}

/// This thread's runloop.
pub fn current() -> Result<Rc<dyn Runloop>> {
    try_current().ok_or(LifelineError::NoRunloop)
}

pub fn try_current() -> Option<Rc<dyn Runloop>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Run `work` inside the current runloop, flushing its queues afterwards.
/// Without a runloop, `work` simply runs.
pub fn join(work: impl FnOnce()) {
    let mut work = Some(work);
    let mut run = || {
        if let Some(work) = work.take() {
            work();
        }
    };
    match try_current() {
        Some(runloop) => runloop.join(&mut run),
        None => run(),
    }
}
