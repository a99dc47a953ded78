//! Publish/subscribe hub shared by components.
//!
//! The bus is a cheaply cloneable handle. One instance is created at startup and injected into
//! components through the [`Environment`](crate::Environment); tests build an isolated bus each.
//!
//! Delivery is synchronous and follows registration order per event name. A callback that
//! returns an error or panics is logged and skipped: other subscribers still observe the event
//! and [`Bus::emit`] never fails.

use core::{
    cell::{Cell, RefCell},
    fmt,
};
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    rc::{Rc, Weak},
};

use serde_json::Value;

use crate::{Config, component::Cleanup, error::panic_message};

type CallbackFn = dyn Fn(&Value) -> anyhow::Result<()>;

/// A bus callback with identity.
///
/// Clones share identity: registering a clone of an already registered callback under the same
/// event name is a no-op.
#[derive(Clone)]
pub struct Callback(Rc<CallbackFn>);

impl Callback {
    /// Wraps a closure.
    pub fn new(f: impl Fn(&Value) -> anyhow::Result<()> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Whether two handles refer to the same callback.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, data: &Value) -> anyhow::Result<()> {
        (self.0)(data)
    }
}

crate::impl_debug!(Callback);

struct BusInner {
    listeners: RefCell<HashMap<String, Vec<Callback>>>,
    depth: RefCell<HashMap<String, usize>>,
    debug: Cell<bool>,
    max_emit_depth: usize,
}

/// Handle to a publish/subscribe hub.
#[derive(Clone)]
pub struct Bus {
    inner: Rc<BusInner>,
}

crate::impl_debug!(Bus);

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Creates a bus with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    /// Creates a bus honouring `debug_bus` and `max_emit_depth`.
    #[must_use]
    pub fn with_config(config: &Config) -> Self {
        Self {
            inner: Rc::new(BusInner {
                listeners: RefCell::new(HashMap::new()),
                depth: RefCell::new(HashMap::new()),
                debug: Cell::new(config.debug_bus),
                max_emit_depth: config.max_emit_depth,
            }),
        }
    }

    /// Toggles debug logging. Never changes delivery behavior.
    pub fn set_debug(&self, enabled: bool) {
        self.inner.debug.set(enabled);
    }

    /// Whether debug logging is enabled.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.inner.debug.get()
    }

    /// Registers `callback` under `event`.
    ///
    /// The returned [`Subscription`] removes exactly this registration; calling it more than
    /// once has no further effect.
    pub fn on(&self, event: impl Into<String>, callback: Callback) -> Subscription {
        let event = event.into();
        {
            let mut listeners = self.inner.listeners.borrow_mut();
            let entry = listeners.entry(event.clone()).or_default();
            if entry.iter().any(|existing| existing.same(&callback)) {
                if self.is_debug() {
                    tracing::debug!(target: "rivulet::bus", event = %event, "callback already registered");
                }
            } else {
                entry.push(callback.clone());
                if self.is_debug() {
                    tracing::debug!(
                        target: "rivulet::bus",
                        event = %event,
                        listeners = entry.len(),
                        "registered listener"
                    );
                }
            }
        }
        Subscription {
            bus: Rc::downgrade(&self.inner),
            event,
            callback,
            active: Cell::new(true),
        }
    }

    /// Removes `callback` from `event`. Returns whether it was registered.
    pub fn off(&self, event: &str, callback: &Callback) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let Some(entry) = listeners.get_mut(event) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|existing| !existing.same(callback));
        let removed = entry.len() != before;
        if entry.is_empty() {
            listeners.remove(event);
        }
        if removed && self.is_debug() {
            tracing::debug!(target: "rivulet::bus", event = %event, "removed listener");
        }
        removed
    }

    /// Delivers `data` to every callback registered under `event`.
    ///
    /// Returns how many callbacks completed successfully. Callbacks removed by an earlier
    /// callback of the same emission are not invoked.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        let snapshot = match self.inner.listeners.borrow().get(event) {
            Some(entry) => entry.clone(),
            None => {
                if self.is_debug() {
                    tracing::debug!(target: "rivulet::bus", event = %event, payload = %data, "emit without listeners");
                }
                return 0;
            }
        };

        let Some(_depth) = DepthGuard::enter(&self.inner, event) else {
            tracing::error!(
                target: "rivulet::bus",
                event = %event,
                limit = self.inner.max_emit_depth,
                "dropping re-entrant emission"
            );
            return 0;
        };

        if self.is_debug() {
            tracing::debug!(
                target: "rivulet::bus",
                event = %event,
                payload = %data,
                listeners = snapshot.len(),
                "emit"
            );
        }

        let mut delivered = 0;
        for callback in &snapshot {
            if !self.is_registered(event, callback) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| callback.call(data))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(error)) => {
                    tracing::error!(target: "rivulet::bus", event = %event, error = %format!("{error:#}"), "listener failed");
                }
                Err(payload) => {
                    tracing::error!(
                        target: "rivulet::bus",
                        event = %event,
                        panic = %panic_message(payload.as_ref()),
                        "listener panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Clears the listeners of one event, or of every event when `event` is `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut listeners = self.inner.listeners.borrow_mut();
        match event {
            Some(event) => {
                listeners.remove(event);
            }
            None => listeners.clear(),
        }
        if self.is_debug() {
            tracing::debug!(target: "rivulet::bus", event = ?event, "removed all listeners");
        }
    }

    /// Number of callbacks registered under `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.borrow().get(event).map_or(0, Vec::len)
    }

    /// Number of event names with at least one callback.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn is_registered(&self, event: &str, callback: &Callback) -> bool {
        self.inner
            .listeners
            .borrow()
            .get(event)
            .is_some_and(|entry| entry.iter().any(|existing| existing.same(callback)))
    }
}

struct DepthGuard<'a> {
    inner: &'a BusInner,
    event: &'a str,
}

impl<'a> DepthGuard<'a> {
    fn enter(inner: &'a BusInner, event: &'a str) -> Option<Self> {
        let mut depth = inner.depth.borrow_mut();
        let current = depth.entry(event.to_owned()).or_insert(0);
        if *current >= inner.max_emit_depth {
            return None;
        }
        *current += 1;
        Some(Self { inner, event })
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let mut depth = self.inner.depth.borrow_mut();
        if let Some(current) = depth.get_mut(self.event) {
            *current -= 1;
            if *current == 0 {
                depth.remove(self.event);
            }
        }
    }
}

/// Capability to undo one [`Bus::on`] registration.
///
/// Holds the bus weakly, so an outstanding subscription never keeps the bus alive.
pub struct Subscription {
    bus: Weak<BusInner>,
    event: String,
    callback: Callback,
    active: Cell<bool>,
}

impl Subscription {
    /// Removes the registration. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(inner) = self.bus.upgrade() {
            Bus { inner }.off(&self.event, &self.callback);
        }
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has not been called yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Event name this subscription listens to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("active", &self.active.get())
            .finish_non_exhaustive()
    }
}

impl From<Subscription> for Cleanup {
    fn from(subscription: Subscription) -> Self {
        Self::new(move || subscription.unsubscribe())
    }
}
