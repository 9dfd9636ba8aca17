//! Error type shared by every registry.
//!
//! Contract violations (bad task names, reserved queues, malformed spacing)
//! surface here synchronously at the call site. Operating on an owner that is
//! already tearing down is not an error: those calls return
//! [`TimerHandle::NULL`](crate::TimerHandle::NULL) instead.

use std::convert::Infallible;
use thiserror::Error;

/// Errors produced by lifeline operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifelineError {
    /// A disposer was registered against an owner that has already been destroyed.
    #[error("cannot register a disposer on `{owner}`: it has already been destroyed")]
    OwnerDestroyed {
        /// Type name of the owner.
        owner: &'static str,
    },

    /// A task name did not resolve to a method on the owner.
    #[error("`{owner}` has no task method named `{name}`")]
    UnknownTaskMethod {
        /// Type name of the owner.
        owner: &'static str,
        /// The name that failed to resolve.
        name: String,
    },

    /// A poll task name did not resolve to a poll method on the owner.
    #[error("`{owner}` has no poll method named `{name}`")]
    UnknownPollMethod {
        /// Type name of the owner.
        owner: &'static str,
        /// The name that failed to resolve.
        name: String,
    },

    /// Throttling requires a method name; closures cannot be de-duplicated across calls.
    #[error("throttle_task requires a method name, got a closure")]
    NamedTaskRequired,

    /// The queue name is not one the runloop knows about.
    #[error("`{name}` is not a recognized runloop queue")]
    UnknownQueue {
        /// The rejected queue name.
        name: String,
    },

    /// The queue exists but lifeline refuses to schedule into it.
    #[error("scheduling into the `{name}` queue is not allowed")]
    ReservedQueue {
        /// The rejected queue name.
        name: String,
    },

    /// A spacing value could not be read as a duration.
    #[error("expected a numeric spacing (e.g. `250`, `250ms`, `2s`), received `{value}`")]
    InvalidSpacing {
        /// The rejected value, verbatim.
        value: String,
    },

    /// An event listener was added or removed without an event name.
    #[error("an event name is required to {action} an event listener")]
    MissingEventName {
        /// `"add"` or `"remove"`.
        action: &'static str,
    },

    /// `advance_poll` was called for a token whose continuation was never queued.
    #[error("cannot advance poll `{token}`: `next` has not been called since it last ran")]
    PollNotQueued {
        /// Display form of the token.
        token: String,
    },

    /// No runloop adapter is installed on the current thread.
    #[error("no runloop is installed on this thread; call `runloop::install` first")]
    NoRunloop,

    /// Test teardown found registry entries that should have been drained.
    #[error("leaked lifeline state: {details}")]
    Leaked {
        /// Human-readable listing of what was left behind.
        details: String,
    },

    /// Configuration could not be loaded or deserialized.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LifelineError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifelineError::OwnerDestroyed { .. } => "owner_destroyed",
            LifelineError::UnknownTaskMethod { .. } => "unknown_task_method",
            LifelineError::UnknownPollMethod { .. } => "unknown_poll_method",
            LifelineError::NamedTaskRequired => "named_task_required",
            LifelineError::UnknownQueue { .. } => "unknown_queue",
            LifelineError::ReservedQueue { .. } => "reserved_queue",
            LifelineError::InvalidSpacing { .. } => "invalid_spacing",
            LifelineError::MissingEventName { .. } => "missing_event_name",
            LifelineError::PollNotQueued { .. } => "poll_not_queued",
            LifelineError::NoRunloop => "no_runloop",
            LifelineError::Leaked { .. } => "leaked",
            LifelineError::Config(_) => "config",
        }
    }

    /// True for errors that indicate a test-authoring mistake rather than a
    /// production contract violation.
    pub fn is_test_protocol(&self) -> bool {
        matches!(
            self,
            LifelineError::PollNotQueued { .. } | LifelineError::Leaked { .. }
        )
    }
}

impl From<Infallible> for LifelineError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

impl From<config::ConfigError> for LifelineError {
    fn from(err: config::ConfigError) -> Self {
        LifelineError::Config(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = LifelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spacing_error_cites_the_value() {
        let err = LifelineError::InvalidSpacing { value: "soon".into() };
        assert!(err.to_string().contains("`soon`"));
        assert_eq!(err.as_label(), "invalid_spacing");
    }

    #[test]
    fn poll_not_queued_is_a_test_protocol_error() {
        let err = LifelineError::PollNotQueued { token: "7".into() };
        assert!(err.is_test_protocol());
        assert!(!LifelineError::NoRunloop.is_test_protocol());
    }
}
