//! Error types surfaced by the runtime.

use core::fmt;

use crate::{host::NodeId, selector::SelectorError};

/// Lifecycle hooks whose failures are propagated to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// `Component::on_mount`.
    Mount,
    /// `Component::on_update`.
    Update,
    /// `Component::on_unmount`.
    Unmount,
    /// `Component::should_update` or `Component::should_update_props`.
    ShouldUpdate,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mount => "on_mount",
            Self::Update => "on_update",
            Self::Unmount => "on_unmount",
            Self::ShouldUpdate => "should_update",
        })
    }
}

/// Errors raised by component instances.
///
/// Contract violations (`RenderNotImplemented`, `Retired`, `ChildKeyInUse`, `NotMounted`)
/// indicate programmer errors. `Hook` carries a failure raised by the component's own hook and
/// is never swallowed by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// The component did not override `Component::render`.
    #[error("render not implemented for component `{component}`")]
    RenderNotImplemented {
        /// Type name of the offending component.
        component: &'static str,
    },
    /// `Component::render` returned an error.
    #[error("render of component `{component}` failed")]
    Render {
        /// Type name of the component.
        component: &'static str,
        /// Error produced by the render body.
        #[source]
        source: anyhow::Error,
    },
    /// A lifecycle hook returned an error.
    #[error("`{hook}` of component `{component}` failed")]
    Hook {
        /// Type name of the component.
        component: &'static str,
        /// Hook that failed.
        hook: Hook,
        /// Error produced by the hook.
        #[source]
        source: anyhow::Error,
    },
    /// An event, bus or timer handler returned an error.
    #[error("{origin} handler of component `{component}` failed")]
    Handler {
        /// Type name of the component.
        component: &'static str,
        /// What invoked the handler (`"event"`, `"bus"`, `"timer"`...).
        origin: &'static str,
        /// Error produced by the handler.
        #[source]
        source: anyhow::Error,
    },
    /// The instance has completed its mount cycle and cannot be mounted again.
    #[error("component `{component}` was unmounted and cannot be mounted again")]
    Retired {
        /// Type name of the component.
        component: &'static str,
    },
    /// An operation that requires a mounted instance was attempted on an unmounted one.
    #[error("`{operation}` requires component `{component}` to be mounted")]
    NotMounted {
        /// Type name of the component.
        component: &'static str,
        /// The rejected operation.
        operation: &'static str,
    },
    /// A child key is still held by a mounted child.
    #[error("child key `{key}` is still held by a mounted component")]
    ChildKeyInUse {
        /// The contested key.
        key: String,
    },
    /// No child is registered under the key.
    #[error("no child registered under `{key}`")]
    UnknownChild {
        /// The missing key.
        key: String,
    },
    /// No node inside the component subtree matched a selector.
    #[error("no node matching `{selector}` inside component `{component}`")]
    NoMatch {
        /// Type name of the component.
        component: &'static str,
        /// Selector source text.
        selector: String,
    },
    /// The instance was re-entered while it was already borrowed for another operation.
    #[error("component `{component}` was re-entered while busy")]
    Reentrant {
        /// Type name of the component.
        component: &'static str,
    },
    /// Reentrant `set_state` calls kept scheduling update passes.
    #[error("component `{component}` exceeded {limit} consecutive update passes")]
    UpdateLoop {
        /// Type name of the component.
        component: &'static str,
        /// Configured pass limit.
        limit: usize,
    },
    /// Host document failure.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Selector failed to parse.
    #[error(transparent)]
    Selector(#[from] SelectorError),
}

/// Errors raised by a [`Host`](crate::Host) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The node id is not known to the host.
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
    /// The node has no parent, so it cannot be replaced in place.
    #[error("node {0} is not attached to a parent")]
    Detached(NodeId),
    /// Children can only be appended to element nodes.
    #[error("node {0} cannot hold children")]
    NotAnElement(NodeId),
    /// Appending would make a node its own ancestor.
    #[error("appending node {child} under node {parent} would create a cycle")]
    Cycle {
        /// Prospective parent.
        parent: NodeId,
        /// Prospective child.
        child: NodeId,
    },
}

/// Errors raised while loading a [`Config`](crate::Config).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}")]
    Io {
        /// Path that was being read.
        path: std::path::PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The configuration document is not valid TOML for [`Config`](crate::Config).
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
    /// An environment override could not be parsed.
    #[error("invalid value `{value}` for environment variable {var}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Renders an error and its source chain as `outer: inner: root`.
pub(crate) fn report(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
