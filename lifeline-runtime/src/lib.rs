//! Lifeline Runtime - lifecycle-bound task scheduling
//!
//! Timers, queued work, debounces, throttles, polling loops and event listeners
//! registered against an owner are cancelled exactly once when that owner is
//! torn down. Scheduling itself is delegated to the [`Runloop`] installed on
//! the current thread.

mod config;
mod debounce;
mod disposable;
mod error;
mod listener;
mod owner;
mod poll;
mod registry;
pub mod runloop;
mod spacing;
mod task;
pub mod testing;
mod time_unit;

// Re-export public API
pub use config::{
    get_timeout_or_test_fallback, is_test_mode, load_toml_config, load_yaml_config, set_test_mode,
    Settings, TimeoutOptions,
};
pub use debounce::{cancel_debounce, debounce_task, debounce_task_with};
pub use disposable::{register_disposer, run_all_disposers, Disposer};
pub use error::{LifelineError, Result};
pub use listener::{
    add_event_listener, remove_event_listener, Event, EventTarget, Listener, ListenerOptions,
    NativeListener,
};
pub use owner::{Destroyable, OwnerKey, PollTask, Task, TaskMethods};
pub use poll::{
    advance_poll, cancel_poll, next_token, poll_task, reset_should_poll, set_should_poll,
    should_poll, Next, Settled, Token,
};
pub use runloop::{ManualRunloop, Queue, Runloop, TimerHandle, TokioRunloop};
pub use spacing::Spacing;
pub use task::{cancel_task, run_task, schedule_task, throttle_task, throttle_task_with};
