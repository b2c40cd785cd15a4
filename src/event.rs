//! Event dispatch
//!
//! A small per-kind listener registry plus the single-handler properties
//! (`onchange` and friends) layered on top of it. Listeners are compared by
//! `Rc` identity, so registering the same listener twice is a no-op.
//!
//! Dispatch snapshots the listener list before calling out, so listeners are
//! free to add or remove listeners (or call back into their owner) while an
//! event is being delivered.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

/// An event of kind `K`, stamped with the clock time it was dispatched at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event<K> {
    pub kind: K,
    pub timestamp: f64,
}

impl<K> Event<K> {
    pub fn new(kind: K, timestamp: f64) -> Self {
        Self { kind, timestamp }
    }
}

/// A registered callback.
pub type Listener<K> = Rc<dyn Fn(&Event<K>)>;

fn same_listener<K>(a: &Listener<K>, b: &Listener<K>) -> bool {
    // Compare data pointers only; vtable pointers are not stable across codegen units.
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

/// Multi-listener registry keyed by event kind.
pub struct EventTarget<K> {
    listeners: RefCell<HashMap<K, Vec<Listener<K>>>>,
}

impl<K: Copy + Eq + Hash> Default for EventTarget<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> EventTarget<K> {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(HashMap::new()),
        }
    }

    /// Register `listener` for `kind`. Already registered listeners are ignored.
    pub fn add_listener(&self, kind: K, listener: Listener<K>) {
        let mut map = self.listeners.borrow_mut();
        let list = map.entry(kind).or_default();
        if list.iter().any(|l| same_listener(l, &listener)) {
            return;
        }
        list.push(listener);
    }

    /// Remove `listener` from `kind`, or every listener of `kind` when `None`.
    pub fn remove_listener(&self, kind: K, listener: Option<&Listener<K>>) {
        let mut map = self.listeners.borrow_mut();
        match listener {
            None => {
                map.remove(&kind);
            }
            Some(target) => {
                if let Some(list) = map.get_mut(&kind) {
                    list.retain(|l| !same_listener(l, target));
                    if list.is_empty() {
                        map.remove(&kind);
                    }
                }
            }
        }
    }

    /// Deliver `event` to the listeners of its kind, in registration order.
    /// Returns whether any listener ran.
    pub fn dispatch(&self, event: &Event<K>) -> bool {
        let snapshot: Vec<Listener<K>> = match self.listeners.borrow().get(&event.kind) {
            Some(list) => list.clone(),
            None => return false,
        };

        for listener in &snapshot {
            listener(event);
        }
        !snapshot.is_empty()
    }

    pub fn listener_count(&self, kind: K) -> usize {
        self.listeners.borrow().get(&kind).map_or(0, Vec::len)
    }

    /// Drop every listener of every kind.
    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }
}

/// Callback assigned through a handler property.
pub type Handler<K> = Rc<dyn Fn(&Event<K>)>;

/// Assigned handler plus the distinct listener registered on its behalf.
struct HandlerSlot<K> {
    assigned: Handler<K>,
    registered: Listener<K>,
}

/// Single-handler property over a multi-listener target.
///
/// The registered listener wraps the assigned handler, so a handler that is
/// also added directly with `add_listener` fires once for each registration.
pub struct HandlerProperty<K> {
    kind: K,
    slot: RefCell<Option<HandlerSlot<K>>>,
}

impl<K: Copy + Eq + Hash + 'static> HandlerProperty<K> {
    pub fn new(kind: K) -> Self {
        Self {
            kind,
            slot: RefCell::new(None),
        }
    }

    /// The handler last assigned, if any.
    pub fn get(&self) -> Option<Handler<K>> {
        self.slot.borrow().as_ref().map(|s| s.assigned.clone())
    }

    /// Replace the handler. `None` clears the property.
    pub fn set(&self, target: &EventTarget<K>, handler: Option<Handler<K>>) {
        let previous = self.slot.borrow_mut().take();
        if let Some(previous) = previous {
            target.remove_listener(self.kind, Some(&previous.registered));
        }

        let Some(assigned) = handler else {
            return;
        };

        let inner = assigned.clone();
        let registered: Listener<K> = Rc::new(move |event: &Event<K>| inner(event));
        target.add_listener(self.kind, registered.clone());

        *self.slot.borrow_mut() = Some(HandlerSlot {
            assigned,
            registered,
        });
    }

    /// Forget the handler without touching any target.
    pub fn reset(&self) {
        self.slot.borrow_mut().take();
    }
}
