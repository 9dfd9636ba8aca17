use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A dispatched event: its type plus an optional payload.
#[derive(Clone)]
pub struct Event {
    kind: String,
    detail: Option<Rc<dyn Any>>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), detail: None }
    }

    pub fn with_detail(kind: impl Into<String>, detail: impl Any) -> Self {
        Self {
            kind: kind.into(),
            detail: Some(Rc::new(detail)),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn detail<T: Any>(&self) -> Option<&T> {
        self.detail.as_deref()?.downcast_ref()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("detail", &self.detail.is_some())
            .finish()
    }
}

/// Extended listener options. Only passed to targets when the runloop reports
/// support for them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub capture: bool,
    pub passive: bool,
    pub once: bool,
}

/// A listener as the event target sees it.
pub type NativeListener = Rc<dyn Fn(&Event)>;

/// A listener as the owner registers it.
pub type Listener<O> = Rc<dyn Fn(&O, &Event)>;

/// Something listeners can be attached to.
///
/// Implementations must treat `listener` identity (`Rc::ptr_eq`) together with
/// the event name and `capture` flag as the key for removal, the way DOM
/// targets do.
pub trait EventTarget {
    fn add_event_listener(&self, event: &str, listener: &NativeListener, options: Option<&ListenerOptions>);

    fn remove_event_listener(&self, event: &str, listener: &NativeListener, options: Option<&ListenerOptions>);
}
