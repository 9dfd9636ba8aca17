//! # Lifeline - owner-bound scheduling for Rust
//!
//! Register timers, queued work, debounces, throttles, polling loops and event
//! listeners against an owner, and have all of it cancelled exactly once when
//! that owner is torn down. No task body runs, no listener fires and no poll
//! re-arms after teardown.
//!
//! ## Features
//!
//! - **Deferred and queued work**: `run_task`, `schedule_task`, `cancel_task`
//! - **Throttle and debounce**: coalescing by task name, `immediate` on either edge
//! - **Polling**: self-driven loops that can be frozen and single-stepped in tests
//! - **Event listeners**: removal by the listener you registered, teardown detaches the rest
//! - **Method tables**: `#[task_methods]` makes methods addressable by name
//! - **Pluggable runloop**: `TokioRunloop` for a `LocalSet`, `ManualRunloop` for tests
//!
//! ## Quick Start
//!
//! ```rust
//! use lifeline::{run_task, run_all_disposers, task_methods, Destroyable, ManualRunloop};
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct Clock {
//!     destroying: Cell<bool>,
//!     ticks: Cell<u32>,
//! }
//!
//! impl Destroyable for Clock {
//!     fn is_destroying(&self) -> bool {
//!         self.destroying.get()
//!     }
//! }
//!
//! #[task_methods]
//! impl Clock {
//!     #[task]
//!     fn tick(&self) {
//!         self.ticks.set(self.ticks.get() + 1);
//!     }
//! }
//!
//! let runloop = ManualRunloop::install();
//! let clock = Rc::new(Clock::default());
//!
//! run_task(&clock, "tick", Duration::from_millis(500))?;
//! runloop.advance(Duration::from_millis(500));
//! assert_eq!(clock.ticks.get(), 1);
//!
//! // The host's teardown hook.
//! clock.destroying.set(true);
//! run_all_disposers(&clock);
//! # Ok::<(), lifeline::LifelineError>(())
//! ```
//!
//! ## Configuration
//!
//! Test mode and timeout scaling can be loaded from `config/lifeline.toml`:
//!
//! ```toml
//! test_mode = true
//! timeout_scaling = 10
//! test_timeout = "0ms"
//! ```
//!
//! or from the environment with the `LIFELINE_` prefix:
//!
//! ```bash
//! export LIFELINE_TEST_MODE=true
//! export LIFELINE_TIMEOUT_SCALING=10
//! ```

// Re-export macros
pub use lifeline_macro::task_methods;

// Re-export core types
pub use lifeline_runtime::{
    add_event_listener, advance_poll, cancel_debounce, cancel_poll, cancel_task, debounce_task,
    debounce_task_with, get_timeout_or_test_fallback, is_test_mode, load_toml_config,
    load_yaml_config, next_token, poll_task, register_disposer, remove_event_listener,
    reset_should_poll, run_all_disposers, run_task, schedule_task, set_should_poll,
    set_test_mode, should_poll, throttle_task, throttle_task_with, Destroyable, Disposer, Event,
    EventTarget, LifelineError, Listener, ListenerOptions, ManualRunloop, NativeListener, Next,
    OwnerKey, PollTask, Queue, Result, Runloop, Settings, Settled, Spacing, Task, TaskMethods,
    TimeoutOptions, TimerHandle, Token, TokioRunloop,
};
pub use lifeline_runtime::{runloop, testing};

// Make lifeline_runtime available for macro expansion
pub use lifeline_runtime;
