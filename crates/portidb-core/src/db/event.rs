//! Module: db::event
//! Responsibility: listener registration and dispatch for requests,
//! transactions and connections.
//! Does not own: when events fire (the engine decides that).
//! Boundary: listeners run synchronously, in registration order, and may
//! queue new requests while the owning transaction is active.

use crate::{db::Request, error::DomError};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

///
/// EventType
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventType {
    Abort,
    Blocked,
    Complete,
    Error,
    Success,
    UpgradeNeeded,
    VersionChange,
}

///
/// Event
///
/// One dispatched event. Bubbling events travel request → transaction →
/// connection; a listener can stop that walk or cancel the default action.
///

#[derive(Debug)]
pub struct Event {
    kind: EventType,
    bubbles: bool,
    cancelable: bool,
    canceled: Cell<bool>,
    propagation_stopped: Cell<bool>,
    old_version: Option<u64>,
    new_version: Option<u64>,
    error: Option<DomError>,
    request: Option<Request>,
}

impl Event {
    #[must_use]
    pub(crate) const fn new(kind: EventType) -> Self {
        Self {
            kind,
            bubbles: false,
            cancelable: false,
            canceled: Cell::new(false),
            propagation_stopped: Cell::new(false),
            old_version: None,
            new_version: None,
            error: None,
            request: None,
        }
    }

    /// A bubbling, cancelable error event.
    pub(crate) fn error_event(error: DomError) -> Self {
        Self {
            bubbles: true,
            cancelable: true,
            error: Some(error),
            ..Self::new(EventType::Error)
        }
    }

    pub(crate) fn versions(kind: EventType, old_version: u64, new_version: Option<u64>) -> Self {
        Self {
            old_version: Some(old_version),
            new_version,
            ..Self::new(kind)
        }
    }

    #[must_use]
    pub(crate) fn bubbling(mut self) -> Self {
        self.bubbles = true;
        self
    }

    #[must_use]
    pub(crate) fn with_request(mut self, request: &Request) -> Self {
        self.request = Some(request.clone());
        self
    }

    #[must_use]
    pub const fn kind(&self) -> EventType {
        self.kind
    }

    #[must_use]
    pub const fn bubbles(&self) -> bool {
        self.bubbles
    }

    /// Cancel the default action (for an error event: aborting the
    /// transaction). Ignored on non-cancelable events.
    pub fn prevent_default(&self) {
        if self.cancelable {
            self.canceled.set(true);
        }
    }

    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.canceled.get()
    }

    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    #[must_use]
    pub const fn old_version(&self) -> Option<u64> {
        self.old_version
    }

    #[must_use]
    pub const fn new_version(&self) -> Option<u64> {
        self.new_version
    }

    #[must_use]
    pub const fn error(&self) -> Option<&DomError> {
        self.error.as_ref()
    }

    /// The request the event concerns, if any.
    #[must_use]
    pub const fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }
}

///
/// ListenerId
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&Event)>;

///
/// EventTarget
///
/// Listener list owned by each event-emitting entity.
///

#[derive(Default)]
pub struct EventTarget {
    listeners: RefCell<Vec<(ListenerId, EventType, Listener)>>,
    next_id: Cell<u64>,
}

impl EventTarget {
    pub fn add_listener(&self, kind: EventType, listener: impl Fn(&Event) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, kind, Rc::new(listener)));

        id
    }

    /// Returns false when `id` was not registered here.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);

        listeners.len() != before
    }

    /// Run every listener for the event's type. Listeners added or removed
    /// during dispatch take effect on the next event.
    pub(crate) fn dispatch(&self, event: &Event) {
        let matching: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect();

        for listener in matching {
            listener(event);
        }
    }
}

impl std::fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTarget")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

/// Dispatch along `path`, starting at the event's own target. Non-bubbling
/// events stop after the first target.
pub(crate) fn dispatch_along(event: &Event, path: &[&EventTarget]) {
    for (depth, target) in path.iter().enumerate() {
        if depth > 0 && !event.bubbles {
            break;
        }

        target.dispatch(event);
        if event.propagation_stopped.get() {
            break;
        }
    }
}

///
/// EventSource
///
/// Entities that carry an `EventTarget`.
///

pub trait EventSource {
    fn events(&self) -> &EventTarget;

    fn add_listener(&self, kind: EventType, listener: impl Fn(&Event) + 'static) -> ListenerId {
        self.events().add_listener(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.events().remove_listener(id)
    }
}

///
/// TESTS
///
