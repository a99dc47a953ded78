//! Core runtime of rivulet: component lifecycle, event delegation and the event bus.
//!
//! The pieces fit together like this:
//!
//! - A [`Host`] is the document the runtime renders into. It only has to create nodes, move
//!   them around, attach listeners and schedule timers.
//! - A [`Component`] renders its [`State`] and [`Props`] into a [`Node`] tree and declares its
//!   event handlers as [`EventBinding`]s.
//! - An [`Instance`] drives one component through mount, update and unmount, rebinding its
//!   handlers after every render and releasing everything it acquired when it goes away.
//! - A [`Bus`] carries named application events between components that do not know each
//!   other.
//!
//! The runtime is single-threaded: nothing here is `Send`.

#[macro_use]
mod macros;
pub mod bus;
pub mod children;
pub mod component;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod host;
pub mod node;
pub mod selector;
pub mod state;

pub use bus::{Bus, Callback, Subscription};
pub use children::{AnyInstance, Children};
pub use component::{
    Cleanup, Component, Handle, Instance, InstanceId, Lifecycle, Patch, Scope, Strategy,
};
pub use config::Config;
pub use env::Environment;
pub use error::{ComponentError, ConfigError, Hook, HostError};
pub use events::{EventBinding, EventKey};
pub use host::{DomEvent, Host, Listener, ListenerId, NodeId, TimerId};
pub use node::{Element, Node, element, text};
pub use selector::{Selector, SelectorError, SelectorTarget};
pub use state::{Props, State};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
