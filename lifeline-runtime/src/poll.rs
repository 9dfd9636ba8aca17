//! Self-driven polling loops bound to an owner.
//!
//! A poll body receives a [`Next`] continuation and calls it once its own
//! (usually asynchronous) work has finished. What `next` does depends on the
//! poll mode:
//!
//! - armed: the body runs again straight away. A `next` issued while the body
//!   is still on the stack is deferred until it returns, so a synchronous loop
//!   never grows the stack.
//! - suspended: the continuation is parked under its token until
//!   [`advance_poll`] releases it. Test mode suspends polling by default so an
//!   unattended loop can never spin inside a test.
//!
//! The mode is read once, when [`poll_task`] starts the loop; changing it later
//! only affects loops started afterwards.
//!
//! Tokens are either auto-generated or supplied by the caller. Each owner
//! tracks its live tokens; teardown forgets them and drops parked
//! continuations, after which any in-flight `next` is a no-op.

use crate::config;
use crate::error::{LifelineError, Result};
use crate::owner::{Destroyable, OwnerKey, PollTask, TaskMethods};
use crate::registry::{self, OwnerTable};
use crate::runloop::{self, Runloop};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

static LAST_TOKEN: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Live tokens per owner, mapped to the cycle currently allowed to run.
    static TOKENS: OwnerTable<HashMap<Token, u64>> = RefCell::new(HashMap::new());
    /// Continuations parked by a suspended `next`.
    static QUEUED: RefCell<HashMap<Token, Rc<dyn Cycle>>> = RefCell::new(HashMap::new());
    static SHOULD_POLL: RefCell<Option<Rc<dyn Fn() -> bool>>> = const { RefCell::new(None) };
    static LAST_CYCLE: Cell<u64> = const { Cell::new(0) };
}

/// Identifies one polling lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Auto(u64),
    Named(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Auto(id) => write!(f, "{id}"),
            Token::Named(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Token {
    fn from(name: &str) -> Self {
        Token::Named(name.to_string())
    }
}

impl From<String> for Token {
    fn from(name: String) -> Self {
        Token::Named(name)
    }
}

/// A fresh auto token. Unique for the life of the process.
pub fn next_token() -> Token {
    Token::Auto(LAST_TOKEN.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Override the poll mode for this thread: `true` means armed.
pub fn set_should_poll(predicate: impl Fn() -> bool + 'static) {
    SHOULD_POLL.with(|p| *p.borrow_mut() = Some(Rc::new(predicate)));
}

/// Drop the override; the mode falls back to "armed unless in test mode".
pub fn reset_should_poll() {
    SHOULD_POLL.with(|p| p.borrow_mut().take());
}

pub fn should_poll() -> bool {
    let predicate = SHOULD_POLL.with(|p| p.borrow().clone());
    match predicate {
        Some(predicate) => predicate(),
        None => !config::is_test_mode(),
    }
}

trait Cycle {
    fn token(&self) -> &Token;
    fn run(self: Rc<Self>);
    fn next(self: Rc<Self>);
}

/// Continuation handed to a poll body. Call it when the body's work is done.
#[derive(Clone)]
pub struct Next(Rc<dyn Cycle>);

impl Next {
    pub fn call(&self) {
        self.0.clone().next();
    }

    pub fn token(&self) -> &Token {
        self.0.token()
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Next").field(self.0.token()).finish()
    }
}

struct PollCycle<O> {
    owner: Weak<O>,
    key: OwnerKey,
    token: Token,
    id: u64,
    task: Rc<dyn Fn(&O, Next)>,
    armed: bool,
    running: Cell<bool>,
    again: Cell<bool>,
}

impl<O: Destroyable> PollCycle<O> {
    /// The owner, if it is alive and this cycle still holds the token.
    fn live_owner(&self) -> Option<Rc<O>> {
        let current = registry::with_entry(&TOKENS, self.key, |tokens| {
            tokens.get(&self.token) == Some(&self.id)
        });
        if current != Some(true) {
            return None;
        }
        let owner = self.owner.upgrade()?;
        if owner.is_destroying() || owner.is_destroyed() {
            return None;
        }
        Some(owner)
    }
}

/// Clears the running flag even if the body panics.
struct Running<'a>(&'a Cell<bool>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<O: Destroyable> Cycle for PollCycle<O> {
    fn token(&self) -> &Token {
        &self.token
    }

    fn run(self: Rc<Self>) {
        if self.running.get() {
            self.again.set(true);
            return;
        }
        self.running.set(true);
        let _running = Running(&self.running);
        loop {
            let Some(owner) = self.live_owner() else {
                break;
            };
            self.again.set(false);
            trace!(owner = %self.key, token = %self.token, "Running poll body");
            (self.task)(&owner, Next(self.clone()));
            if !self.again.get() {
                break;
            }
        }
    }

    fn next(self: Rc<Self>) {
        if self.live_owner().is_none() {
            trace!(token = %self.token, "Ignoring next for a cancelled poll");
            return;
        }
        if self.armed {
            self.run();
        } else {
            trace!(token = %self.token, "Poll suspended; parking continuation");
            let token = self.token.clone();
            QUEUED.with(|queued| queued.borrow_mut().insert(token, self));
        }
    }
}

fn forget(token: &Token) {
    QUEUED.with(|queued| queued.borrow_mut().remove(token));
}

fn cancel_all(key: OwnerKey) {
    let Some(tokens) = registry::take_entry(&TOKENS, key) else {
        return;
    };
    if !tokens.is_empty() {
        debug!(owner = %key, tokens = tokens.len(), "Cancelling polls");
    }
    for token in tokens.keys() {
        forget(token);
    }
}

/// Start polling `task` against `owner`. The body runs once right away.
///
/// Passing an explicit `token` lets the caller address the poll later; by
/// default a fresh auto token is used. Re-polling an existing token replaces
/// its previous loop. For an owner already tearing down nothing runs and the
/// token is returned unregistered.
pub fn poll_task<O>(owner: &Rc<O>, task: impl Into<PollTask<O>>, token: Option<Token>) -> Result<Token>
where
    O: Destroyable + TaskMethods,
{
    let task = task.into().resolve()?;
    let token = token.unwrap_or_else(next_token);
    if owner.is_destroying() || owner.is_destroyed() {
        return Ok(token);
    }

    let key = registry::ensure_entry(&TOKENS, owner, cancel_all)?;
    let id = LAST_CYCLE.with(|last| {
        last.set(last.get() + 1);
        last.get()
    });
    registry::with_entry(&TOKENS, key, |tokens| tokens.insert(token.clone(), id));
    QUEUED.with(|queued| queued.borrow_mut().remove(&token));
    debug!(owner = %key, %token, "Started poll");

    let cycle = Rc::new(PollCycle {
        owner: Rc::downgrade(owner),
        key,
        token: token.clone(),
        id,
        task,
        armed: should_poll(),
        running: Cell::new(false),
        again: Cell::new(false),
    });
    cycle.run();
    Ok(token)
}

/// Stop the poll identified by `token`. Unknown tokens are ignored.
pub fn cancel_poll<O: Destroyable>(owner: &Rc<O>, token: &Token) -> Result<()> {
    let key = OwnerKey::of(owner);
    let removed = registry::with_entry(&TOKENS, key, |tokens| tokens.remove(token)).flatten();
    forget(token);
    if removed.is_some() {
        debug!(owner = %key, %token, "Cancelled poll");
    }
    Ok(())
}

/// Release the continuation parked under `token`, running one more cycle of
/// the poll inside the runloop.
///
/// Fails with [`LifelineError::PollNotQueued`] when the poll is not waiting,
/// which means the body has not called `next` since it last ran.
pub fn advance_poll(token: &Token) -> Result<Settled> {
    let cycle = QUEUED
        .with(|queued| queued.borrow_mut().remove(token))
        .ok_or_else(|| LifelineError::PollNotQueued { token: token.to_string() })?;
    debug!(%token, "Advancing poll");
    runloop::join(|| cycle.run());
    Ok(Settled {
        runloop: runloop::try_current(),
    })
}

/// Returned by [`advance_poll`]. Awaiting it keeps flushing the runloop's
/// queues until no queued work remains.
#[must_use = "await the value to let secondary work settle, or drop it if there is none"]
pub struct Settled {
    runloop: Option<Rc<dyn Runloop>>,
}

impl Settled {
    /// Flush synchronously, without yielding to other tasks.
    pub fn now(self) {
        if let Some(runloop) = self.runloop {
            runloop.flush();
        }
    }
}

impl IntoFuture for Settled {
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = ()>>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let Some(runloop) = self.runloop else {
                return;
            };
            loop {
                runloop.flush();
                tokio::task::yield_now().await;
                if !runloop.has_queued_work() {
                    break;
                }
            }
        })
    }
}

pub(crate) fn tokens(key: OwnerKey) -> Vec<Token> {
    registry::with_entry(&TOKENS, key, |tokens| tokens.keys().cloned().collect())
        .unwrap_or_default()
}

pub(crate) fn is_queued(token: &Token) -> bool {
    QUEUED.with(|queued| queued.borrow().contains_key(token))
}

pub(crate) fn queued_count() -> usize {
    QUEUED.with(|queued| queued.borrow().len())
}

pub(crate) fn owners() -> Vec<OwnerKey> {
    registry::owners(&TOKENS)
}

pub(crate) fn clear() {
    registry::clear(&TOKENS);
    let parked = QUEUED.with(|queued| std::mem::take(&mut *queued.borrow_mut()));
    drop(parked);
    reset_should_poll();
}
