//! The host document tree capability.
//!
//! The runtime never touches a concrete document. Everything it needs (node creation,
//! attachment, listeners, selector matching and timers) goes through [`Host`], so the same
//! components run against a browser binding or the in-memory document used in tests.

use core::{cell::Cell, fmt, time::Duration};
use std::rc::Rc;

use serde_json::Value;

use crate::{error::HostError, selector::Selector};

macro_rules! host_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a host-assigned raw id.
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw id.
            #[must_use]
            pub const fn into_raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

host_id!(
    /// Identifies a node owned by a [`Host`].
    NodeId
);
host_id!(
    /// Identifies a listener registered with [`Host::add_listener`].
    ListenerId
);
host_id!(
    /// Identifies a timer registered with [`Host::set_timeout`].
    TimerId
);

/// A listener attached to a host node.
pub type Listener = Rc<dyn Fn(&DomEvent)>;

/// An event travelling through the host tree.
#[derive(Debug)]
pub struct DomEvent {
    name: String,
    target: NodeId,
    current_target: Cell<NodeId>,
    detail: Value,
    propagation_stopped: Cell<bool>,
}

impl DomEvent {
    /// Creates an event originating at `target`.
    pub fn new(name: impl Into<String>, target: NodeId, detail: Value) -> Self {
        Self {
            name: name.into(),
            target,
            current_target: Cell::new(target),
            detail,
            propagation_stopped: Cell::new(false),
        }
    }

    /// Event name, e.g. `"click"`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node the event originated at.
    #[must_use]
    pub const fn target(&self) -> NodeId {
        self.target
    }

    /// The node whose listeners are currently running.
    #[must_use]
    pub fn current_target(&self) -> NodeId {
        self.current_target.get()
    }

    /// Moves the event to another node while it bubbles. Called by hosts during dispatch.
    pub fn set_current_target(&self, node: NodeId) {
        self.current_target.set(node);
    }

    /// Payload carried by the event.
    #[must_use]
    pub const fn detail(&self) -> &Value {
        &self.detail
    }

    /// Stops the event from bubbling past the current node.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    /// Whether [`stop_propagation`](Self::stop_propagation) was called.
    #[must_use]
    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }
}

/// Capabilities the runtime requires from the document it renders into.
///
/// All methods take `&self`: hosts use interior mutability and must release any internal
/// borrow before invoking listeners or timer callbacks, since those re-enter the host.
pub trait Host {
    /// Creates a detached element.
    fn create_element(&self, tag: &str) -> NodeId;

    /// Creates a detached text node.
    fn create_text(&self, text: &str) -> NodeId;

    /// Sets an attribute on an element.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes and text nodes.
    fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), HostError>;

    /// Removes an attribute, returning whether it was present.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes.
    fn remove_attribute(&self, node: NodeId, name: &str) -> Result<bool, HostError>;

    /// Reads an attribute.
    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    /// Replaces the text of a text node, or the entire content of an element with one text node.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes.
    fn set_text(&self, node: NodeId, text: &str) -> Result<(), HostError>;

    /// Concatenated text of the node and its descendants.
    fn text_content(&self, node: NodeId) -> String;

    /// Appends `child` as the last child of `parent`, detaching it from any previous parent.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes, non-element parents and cycles.
    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), HostError>;

    /// Puts `new` in the place `old` occupies in its parent; `old` ends up detached.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes or when `old` has no parent.
    fn replace_node(&self, old: NodeId, new: NodeId) -> Result<(), HostError>;

    /// Detaches a node from its parent. Returns `false` if it was not attached.
    fn detach(&self, node: NodeId) -> bool;

    /// Parent of a node.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Direct children of a node, in order.
    fn child_nodes(&self, node: NodeId) -> Vec<NodeId>;

    /// Attaches a listener for `event` to `node`.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes.
    fn add_listener(&self, node: NodeId, event: &str, listener: Listener)
    -> Result<ListenerId, HostError>;

    /// Removes a listener. Returns `false` if it was not registered on `node`.
    fn remove_listener(&self, node: NodeId, listener: ListenerId) -> bool;

    /// Whether `node` matches `selector`.
    fn matches(&self, node: NodeId, selector: &Selector) -> bool;

    /// First node in document order within the subtree rooted at `root` (root included) that
    /// matches `selector`.
    fn query(&self, root: NodeId, selector: &Selector) -> Option<NodeId>;

    /// Runs `callback` once after `delay`.
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Cancels a pending timer. Returns `false` if it already fired or was cancelled.
    fn clear_timeout(&self, timer: TimerId) -> bool;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ids_display_with_hash_prefix() {
        assert_eq!(NodeId::from_raw(3).to_string(), "#3");
        assert_eq!(TimerId::from_raw(9).into_raw(), 9);
    }

    #[test]
    fn events_track_bubbling_state() {
        let target = NodeId::from_raw(4);
        let event = DomEvent::new("click", target, json!({ "x": 1 }));
        assert_eq!(event.current_target(), target);

        event.set_current_target(NodeId::from_raw(1));
        event.stop_propagation();

        assert_eq!(event.target(), target);
        assert_eq!(event.current_target(), NodeId::from_raw(1));
        assert!(event.propagation_stopped());
        assert_eq!(event.detail()["x"], 1);
    }
}
