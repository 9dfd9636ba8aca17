//! Owners and the tasks they hand to lifeline.
//!
//! An owner is any `Rc<O>` whose type reports its teardown state through
//! [`Destroyable`]. Lifeline never stores anything on the owner itself: every
//! registry is a side table keyed by [`OwnerKey`], and scheduled work only
//! holds a `Weak<O>`.

use crate::error::{LifelineError, Result};
use crate::poll::Next;
use std::fmt;
use std::rc::Rc;

/// Lifecycle state of a host object.
pub trait Destroyable: 'static {
    /// True from the moment teardown starts.
    fn is_destroying(&self) -> bool;

    /// True once teardown has finished.
    fn is_destroyed(&self) -> bool {
        false
    }
}

/// By-name method table for an owner type.
///
/// Usually generated with `#[task_methods]`; an empty `impl TaskMethods for T {}`
/// is enough for owners that only schedule closures.
pub trait TaskMethods: Sized {
    /// Look up a `fn(&self)` method by name.
    fn task_method(_name: &str) -> Option<fn(&Self)> {
        None
    }

    /// Look up a `fn(&self, Next)` poll method by name.
    fn poll_method(_name: &str) -> Option<fn(&Self, Next)> {
        None
    }
}

/// Identity of an owner: the address of its `Rc` allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey(usize);

impl OwnerKey {
    pub fn of<O: ?Sized>(owner: &Rc<O>) -> Self {
        OwnerKey(Rc::as_ptr(owner) as *const () as usize)
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner@{:#x}", self.0)
    }
}

pub(crate) fn owner_name<O>() -> &'static str {
    std::any::type_name::<O>()
}

/// Work to run against an owner: a closure or the name of one of its methods.
pub enum Task<O> {
    Call(Rc<dyn Fn(&O)>),
    Named(String),
}

impl<O> Task<O> {
    pub fn call<F>(f: F) -> Self
    where
        F: Fn(&O) + 'static,
    {
        Task::Call(Rc::new(f))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Task::Named(name.into())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Task::Call(_) => None,
            Task::Named(name) => Some(name),
        }
    }
}

impl<O: TaskMethods + 'static> Task<O> {
    pub(crate) fn resolve(self) -> Result<Rc<dyn Fn(&O)>> {
        match self {
            Task::Call(f) => Ok(f),
            Task::Named(name) => match O::task_method(&name) {
                Some(method) => Ok(Rc::new(method)),
                None => Err(LifelineError::UnknownTaskMethod {
                    owner: owner_name::<O>(),
                    name,
                }),
            },
        }
    }
}

impl<O> From<&str> for Task<O> {
    fn from(name: &str) -> Self {
        Task::Named(name.to_string())
    }
}

impl<O> From<String> for Task<O> {
    fn from(name: String) -> Self {
        Task::Named(name)
    }
}

impl<O> Clone for Task<O> {
    fn clone(&self) -> Self {
        match self {
            Task::Call(f) => Task::Call(f.clone()),
            Task::Named(name) => Task::Named(name.clone()),
        }
    }
}

impl<O> fmt::Debug for Task<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Call(_) => f.write_str("Task::Call(..)"),
            Task::Named(name) => f.debug_tuple("Task::Named").field(name).finish(),
        }
    }
}

/// A poll body: receives the owner and the [`Next`] continuation.
pub enum PollTask<O> {
    Call(Rc<dyn Fn(&O, Next)>),
    Named(String),
}

impl<O> PollTask<O> {
    pub fn call<F>(f: F) -> Self
    where
        F: Fn(&O, Next) + 'static,
    {
        PollTask::Call(Rc::new(f))
    }

    pub fn named(name: impl Into<String>) -> Self {
        PollTask::Named(name.into())
    }
}

impl<O: TaskMethods + 'static> PollTask<O> {
    pub(crate) fn resolve(self) -> Result<Rc<dyn Fn(&O, Next)>> {
        match self {
            PollTask::Call(f) => Ok(f),
            PollTask::Named(name) => match O::poll_method(&name) {
                Some(method) => Ok(Rc::new(method)),
                None => Err(LifelineError::UnknownPollMethod {
                    owner: owner_name::<O>(),
                    name,
                }),
            },
        }
    }
}

impl<O> From<&str> for PollTask<O> {
    fn from(name: &str) -> Self {
        PollTask::Named(name.to_string())
    }
}

impl<O> fmt::Debug for PollTask<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollTask::Call(_) => f.write_str("PollTask::Call(..)"),
            PollTask::Named(name) => f.debug_tuple("PollTask::Named").field(name).finish(),
        }
    }
}
