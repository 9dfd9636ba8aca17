//! Helpers for tests of code built on lifeline.
//!
//! Registry introspection per owner, a leak check for the end of a test, and
//! [`TestTarget`], an in-memory [`EventTarget`] that behaves like a DOM node.

use crate::error::{LifelineError, Result};
use crate::listener::{Event, EventTarget, ListenerOptions, NativeListener};
use crate::owner::OwnerKey;
use crate::poll::Token;
use crate::{debounce, disposable, listener, poll, task};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Timers, queued work and throttle windows `owner` still holds.
pub fn pending_tasks<O: ?Sized>(owner: &Rc<O>) -> usize {
    task::pending(OwnerKey::of(owner))
}

/// Names with a pending debounce, sorted.
pub fn pending_debounces<O: ?Sized>(owner: &Rc<O>) -> Vec<String> {
    debounce::pending(OwnerKey::of(owner))
}

pub fn poll_tokens<O: ?Sized>(owner: &Rc<O>) -> Vec<Token> {
    poll::tokens(OwnerKey::of(owner))
}

/// True while `token` has a continuation waiting for [`advance_poll`](crate::advance_poll).
pub fn is_poll_queued(token: &Token) -> bool {
    poll::is_queued(token)
}

pub fn listener_count<O: ?Sized>(owner: &Rc<O>) -> usize {
    listener::count(OwnerKey::of(owner))
}

pub fn disposer_count<O: ?Sized>(owner: &Rc<O>) -> usize {
    disposable::disposer_count(OwnerKey::of(owner))
}

/// Fail if any owner still has registry state or disposers on this thread.
///
/// Meant for the end of a test, after every owner has been torn down.
pub fn assert_no_leaks() -> Result<()> {
    let mut details = Vec::new();
    let tables: [(&str, Vec<OwnerKey>); 5] = [
        ("timers", task::owners()),
        ("debounces", debounce::owners()),
        ("polls", poll::owners()),
        ("listeners", listener::owners()),
        ("disposers", disposable::owners_with_disposers()),
    ];
    for (table, owners) in tables {
        let owners: BTreeSet<_> = owners.into_iter().collect();
        for owner in owners {
            details.push(format!("{table}: {owner}"));
        }
    }
    let parked = poll::queued_count();
    if parked > 0 {
        details.push(format!("parked poll continuations: {parked}"));
    }

    if details.is_empty() {
        Ok(())
    } else {
        Err(LifelineError::Leaked { details: details.join(", ") })
    }
}

/// Forget all registry state on this thread and drop the poll-mode override.
/// Nothing is cancelled at the runloop.
pub fn reset() {
    task::clear();
    debounce::clear();
    poll::clear();
    listener::clear();
    disposable::clear();
}

struct Registered {
    event: String,
    listener: NativeListener,
    capture: bool,
    once: bool,
}

/// An in-memory event target.
///
/// Like a DOM node, it ignores a second registration of the same
/// `(event, listener, capture)` and honors `once`.
#[derive(Default)]
pub struct TestTarget {
    listeners: RefCell<Vec<Registered>>,
}

impl TestTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every listener registered for its type. Returns how
    /// many ran.
    pub fn dispatch(&self, event: &Event) -> usize {
        let matching: Vec<NativeListener> = {
            let mut listeners = self.listeners.borrow_mut();
            let matching = listeners
                .iter()
                .filter(|l| l.event == event.kind())
                .map(|l| l.listener.clone())
                .collect();
            listeners.retain(|l| !(l.once && l.event == event.kind()));
            matching
        };
        for listener in &matching {
            listener(event);
        }
        matching.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.borrow().iter().filter(|l| l.event == event).count()
    }
}

impl EventTarget for TestTarget {
    fn add_event_listener(&self, event: &str, listener: &NativeListener, options: Option<&ListenerOptions>) {
        let options = options.copied().unwrap_or_default();
        let mut listeners = self.listeners.borrow_mut();
        let duplicate = listeners.iter().any(|l| {
            l.event == event && Rc::ptr_eq(&l.listener, listener) && l.capture == options.capture
        });
        if !duplicate {
            listeners.push(Registered {
                event: event.to_string(),
                listener: listener.clone(),
                capture: options.capture,
                once: options.once,
            });
        }
    }

    fn remove_event_listener(&self, event: &str, listener: &NativeListener, options: Option<&ListenerOptions>) {
        let capture = options.is_some_and(|o| o.capture);
        self.listeners.borrow_mut().retain(|l| {
            !(l.event == event && Rc::ptr_eq(&l.listener, listener) && l.capture == capture)
        });
    }
}
