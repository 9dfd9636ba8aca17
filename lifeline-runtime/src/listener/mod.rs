//! Event listeners bound to an owner.
//!
//! Each owner keeps a flat list of the listeners it attached. Removal matches
//! on the listener the owner passed in, not on the wrapper actually handed to
//! the target, and removes only the first match. Teardown detaches every
//! remaining record with the options it was attached with.

mod event;

pub use event::{Event, EventTarget, Listener, ListenerOptions, NativeListener};

use crate::error::{LifelineError, Result};
use crate::owner::{Destroyable, OwnerKey};
use crate::registry::{self, OwnerTable};
use crate::runloop;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

thread_local! {
    static LISTENERS: OwnerTable<Vec<Record>> = RefCell::new(HashMap::new());
    static OPTIONS_SUPPORTED: Cell<Option<bool>> = const { Cell::new(None) };
}

struct Record {
    target: Rc<dyn EventTarget>,
    event: String,
    wrapped: NativeListener,
    original: usize,
    options: Option<ListenerOptions>,
}

impl Record {
    fn matches(&self, target: usize, event: &str, original: usize) -> bool {
        address(&self.target) == target && self.event == event && self.original == original
    }

    fn detach(&self) {
        self.target
            .remove_event_listener(&self.event, &self.wrapped, self.options.as_ref());
    }
}

fn address<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

/// Probed from the runloop the first time a listener is attached on this
/// thread, then cached.
fn options_supported() -> bool {
    OPTIONS_SUPPORTED.with(|cached| match cached.get() {
        Some(supported) => supported,
        None => {
            let supported = runloop::try_current().map_or(true, |rl| rl.supports_listener_options());
            cached.set(Some(supported));
            supported
        }
    })
}

fn detach_all(key: OwnerKey) {
    let Some(records) = registry::take_entry(&LISTENERS, key) else {
        return;
    };
    if !records.is_empty() {
        debug!(owner = %key, listeners = records.len(), "Detaching listeners");
    }
    for record in &records {
        record.detach();
    }
}

fn require_event(event: &str, action: &'static str) -> Result<()> {
    if event.is_empty() {
        return Err(LifelineError::MissingEventName { action });
    }
    Ok(())
}

/// Attach `listener` to `target` for `event` on behalf of `owner`.
///
/// The listener receives the owner and runs inside the runloop. It stays
/// attached until [`remove_event_listener`] or the owner's teardown.
pub fn add_event_listener<O, T>(
    owner: &Rc<O>,
    target: &Rc<T>,
    event: &str,
    listener: &Listener<O>,
    options: Option<ListenerOptions>,
) -> Result<()>
where
    O: Destroyable,
    T: EventTarget + 'static,
{
    require_event(event, "add")?;
    if owner.is_destroying() || owner.is_destroyed() {
        return Ok(());
    }

    let key = registry::ensure_entry(&LISTENERS, owner, detach_all)?;
    let weak = Rc::downgrade(owner);
    let callback = listener.clone();
    let wrapped: NativeListener = Rc::new(move |event: &Event| {
        if let Some(owner) = weak.upgrade() {
            trace!(owner = %key, event = event.kind(), "Dispatching listener");
            runloop::join(|| callback(&owner, event));
        }
    });

    let options = options.filter(|_| options_supported());
    let target: Rc<dyn EventTarget> = target.clone();
    target.add_event_listener(event, &wrapped, options.as_ref());
    registry::with_entry(&LISTENERS, key, |records| {
        records.push(Record {
            target,
            event: event.to_string(),
            wrapped,
            original: address(listener),
            options,
        })
    });
    debug!(owner = %key, event, "Attached listener");
    Ok(())
}

/// Detach the first listener `owner` attached to `target` for `event` with
/// this exact `listener`. Nothing happens if there is no such record.
pub fn remove_event_listener<O, T>(
    owner: &Rc<O>,
    target: &Rc<T>,
    event: &str,
    listener: &Listener<O>,
) -> Result<()>
where
    O: Destroyable,
    T: EventTarget + 'static,
{
    require_event(event, "remove")?;
    let key = OwnerKey::of(owner);
    let (target, original) = (address(target), address(listener));
    let removed = registry::with_entry(&LISTENERS, key, |records| {
        let pos = records
            .iter()
            .position(|record| record.matches(target, event, original))?;
        Some(records.remove(pos))
    })
    .flatten();

    if let Some(record) = removed {
        record.detach();
        debug!(owner = %key, event, "Detached listener");
    }
    Ok(())
}

pub(crate) fn count(key: OwnerKey) -> usize {
    registry::with_entry(&LISTENERS, key, |records| records.len()).unwrap_or(0)
}

pub(crate) fn owners() -> Vec<OwnerKey> {
    registry::owners(&LISTENERS)
}

pub(crate) fn clear() {
    registry::clear(&LISTENERS);
    OPTIONS_SUPPORTED.with(|cached| cached.set(None));
}
