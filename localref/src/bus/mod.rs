//! Per-entity publish/subscribe channels.
//!
//! A `Channel<T>` is an ordered list of callbacks for a single event kind.
//! Delivery is synchronous and happens in registration order. The listener
//! list is copied before delivery so callbacks may subscribe, unsubscribe or
//! trigger further emissions without tripping a `RefCell` borrow.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Callback<T> = Rc<dyn Fn(&T)>;

struct Listener<T> {
    id: u64,
    active: Rc<Cell<bool>>,
    callback: Callback<T>,
}

struct Registry<T> {
    next_id: u64,
    listeners: Vec<Listener<T>>,
}

/// Type-erased removal so a `Subscription` does not carry the event type.
trait Detach {
    fn detach(&self, id: u64);
}

impl<T> Detach for RefCell<Registry<T>> {
    fn detach(&self, id: u64) {
        self.borrow_mut().listeners.retain(|l| l.id != id);
    }
}

/// An ordered subscriber list for one event kind.
pub struct Channel<T> {
    registry: Rc<RefCell<Registry<T>>>,
}

impl<T: 'static> Channel<T> {
    pub fn new() -> Self {
        Channel {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a callback for every future event on this channel.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.subscribe_rc(Rc::new(callback))
    }

    pub(crate) fn subscribe_rc(&self, callback: Callback<T>) -> Subscription {
        let active = Rc::new(Cell::new(true));
        let id = {
            let mut reg = self.registry.borrow_mut();
            let id = reg.next_id;
            reg.next_id += 1;
            reg.listeners.push(Listener {
                id,
                active: Rc::clone(&active),
                callback,
            });
            id
        };

        let weak: Weak<RefCell<Registry<T>>> = Rc::downgrade(&self.registry);
        let registry: Weak<dyn Detach> = weak;
        Subscription {
            id,
            active,
            registry,
        }
    }

    /// Deliver `event` to every active listener. Returns how many were called.
    pub fn emit(&self, event: &T) -> usize {
        let targets: Vec<(Rc<Cell<bool>>, Callback<T>)> = self
            .registry
            .borrow()
            .listeners
            .iter()
            .map(|l| (Rc::clone(&l.active), Rc::clone(&l.callback)))
            .collect();

        let mut delivered = 0;
        for (active, callback) in targets {
            // Unsubscribed earlier in this same emission
            if !active.get() {
                continue;
            }
            callback(event);
            delivered += 1;
        }
        delivered
    }

    /// Deactivate and drop every listener.
    pub fn clear(&self) {
        let drained: Vec<Listener<T>> = self.registry.borrow_mut().listeners.drain(..).collect();
        for listener in &drained {
            listener.active.set(false);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every subscribe call.
///
/// Dropping the handle leaves the listener registered; call `unsubscribe`.
#[derive(Clone, Debug)]
pub struct Subscription {
    id: u64,
    active: Rc<Cell<bool>>,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    /// Stop receiving events. Safe to call from inside a callback and more than once.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }

    /// False once unsubscribed, or once the owning entity was deleted.
    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}
