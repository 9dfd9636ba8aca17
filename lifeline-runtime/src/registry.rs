//! Owner-keyed side tables.
//!
//! Each registry keeps one thread-local `OwnerTable<T>`. The first time an
//! owner touches a table an empty `T` is allocated and exactly one disposer is
//! registered for it; that disposer takes the entry back out and cancels
//! whatever is left in it.

use crate::disposable::register_disposer;
use crate::error::Result;
use crate::owner::{Destroyable, OwnerKey};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::thread::LocalKey;

pub(crate) type OwnerTable<T> = RefCell<HashMap<OwnerKey, T>>;

/// Look up `owner`'s entry, creating it (and its bulk disposer) on a miss.
pub(crate) fn ensure_entry<O, T>(
    table: &'static LocalKey<OwnerTable<T>>,
    owner: &Rc<O>,
    dispose: fn(OwnerKey),
) -> Result<OwnerKey>
where
    O: Destroyable,
    T: Default + 'static,
{
    let key = OwnerKey::of(owner);
    let created = table.with(|entries| {
        let mut entries = entries.borrow_mut();
        if entries.contains_key(&key) {
            false
        } else {
            entries.insert(key, T::default());
            true
        }
    });

    if created {
        if let Err(err) = register_disposer(owner, move || dispose(key)) {
            table.with(|entries| entries.borrow_mut().remove(&key));
            return Err(err);
        }
    }
    Ok(key)
}

/// Mutate `key`'s entry if it exists.
///
/// Callbacks dropped by a runloop during thread shutdown land here after the
/// table itself is gone; that case is treated as a missing entry.
pub(crate) fn with_entry<T, R>(
    table: &'static LocalKey<OwnerTable<T>>,
    key: OwnerKey,
    f: impl FnOnce(&mut T) -> R,
) -> Option<R> {
    table
        .try_with(|entries| entries.borrow_mut().get_mut(&key).map(f))
        .ok()
        .flatten()
}

/// Remove and return `key`'s entry.
pub(crate) fn take_entry<T>(table: &'static LocalKey<OwnerTable<T>>, key: OwnerKey) -> Option<T> {
    table.with(|entries| entries.borrow_mut().remove(&key))
}

pub(crate) fn owners<T>(table: &'static LocalKey<OwnerTable<T>>) -> Vec<OwnerKey> {
    table.with(|entries| entries.borrow().keys().copied().collect())
}

pub(crate) fn clear<T>(table: &'static LocalKey<OwnerTable<T>>) {
    // Drop outside the borrow: entries may hold callbacks with drop guards.
    let entries = table.with(|entries| std::mem::take(&mut *entries.borrow_mut()));
    drop(entries);
}
