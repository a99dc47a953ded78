//! Event delegation.
//!
//! A component declares its handlers as a list of [`EventBinding`]s. Every binding attaches
//! exactly one host listener to the component's root node: direct bindings fire for any event
//! reaching the root, delegated bindings fire only when the event's originating target matches
//! their selector. Because listeners live on the root, replacing descendants never orphans them.

use core::fmt;
use std::rc::{Rc, Weak};

use crate::{
    component::{Component, Scope, Slot, enter},
    error::{ComponentError, report},
    host::{DomEvent, Host, Listener, ListenerId, NodeId},
    selector::Selector,
};

type HandlerFn<C> = dyn Fn(&C, &mut Scope<'_, C>, &DomEvent) -> anyhow::Result<()>;

/// One declared event handler.
pub struct EventBinding<C: Component> {
    event: String,
    selector: Option<String>,
    handler: Rc<HandlerFn<C>>,
}

impl<C: Component> EventBinding<C> {
    /// Binds `handler` directly to the component root for `event`.
    pub fn new<F>(event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&C, &mut Scope<'_, C>, &DomEvent) -> anyhow::Result<()> + 'static,
    {
        Self {
            event: event.into(),
            selector: None,
            handler: Rc::new(handler),
        }
    }

    /// Restricts the binding to events whose originating target matches `selector`.
    ///
    /// The selector is validated when the binding pass runs.
    #[must_use]
    pub fn delegate(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Builds a binding from a `"<event>"` or `"<event> <selector>"` descriptor.
    ///
    /// The descriptor is split at the first whitespace; everything after it is the selector,
    /// so selectors may themselves contain spaces.
    pub fn parse<F>(descriptor: &str, handler: F) -> Self
    where
        F: Fn(&C, &mut Scope<'_, C>, &DomEvent) -> anyhow::Result<()> + 'static,
    {
        let descriptor = descriptor.trim();
        match descriptor.split_once(char::is_whitespace) {
            Some((event, selector)) => Self::new(event, handler).delegate(selector.trim()),
            None => Self::new(descriptor, handler),
        }
    }

    /// Event name.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Delegation selector, if any.
    #[must_use]
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    /// Key identifying this binding.
    #[must_use]
    pub fn key(&self) -> EventKey {
        EventKey {
            event: self.event.clone(),
            selector: self.selector.clone(),
        }
    }
}

impl<C: Component> fmt::Debug for EventBinding<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBinding")
            .field("event", &self.event)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// Event name plus optional delegation selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Event name.
    pub event: String,
    /// Delegation selector.
    pub selector: Option<String>,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Some(selector) => write!(f, "{} {selector}", self.event),
            None => f.write_str(&self.event),
        }
    }
}

/// A listener installed by the last binding pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundListener {
    pub(crate) key: EventKey,
    pub(crate) node: NodeId,
    pub(crate) id: ListenerId,
}

/// Binding pass: installs one root listener per binding.
///
/// On failure every listener installed so far is removed again.
pub(crate) fn bind<C: Component>(
    host: &dyn Host,
    this: &Weak<Slot<C>>,
    root: NodeId,
    bindings: Vec<EventBinding<C>>,
) -> Result<Vec<BoundListener>, ComponentError> {
    let mut bound = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let key = binding.key();
        let installed = listener(this, binding).and_then(|listener| {
            host.add_listener(root, &key.event, listener)
                .map_err(ComponentError::from)
        });
        match installed {
            Ok(id) => {
                tracing::trace!(target: "rivulet::events", key = %key, root = %root, "bound listener");
                bound.push(BoundListener { key, node: root, id });
            }
            Err(error) => {
                unbind(host, &mut bound);
                return Err(error);
            }
        }
    }
    Ok(bound)
}

/// Unbinding pass: removes every listener of the last binding pass.
pub(crate) fn unbind(host: &dyn Host, bound: &mut Vec<BoundListener>) {
    for listener in bound.drain(..) {
        if !host.remove_listener(listener.node, listener.id) {
            tracing::debug!(
                target: "rivulet::events",
                key = %listener.key,
                node = %listener.node,
                "listener was already gone"
            );
        }
    }
}

fn listener<C: Component>(
    this: &Weak<Slot<C>>,
    binding: EventBinding<C>,
) -> Result<Listener, ComponentError> {
    let selector = binding
        .selector
        .as_deref()
        .map(Selector::parse)
        .transpose()?;
    let handler = binding.handler;
    let this = this.clone();
    Ok(Rc::new(move |event: &DomEvent| {
        let outcome = enter(&this, "event", |component, cx| {
            if let Some(selector) = &selector
                && !cx.host().matches(event.target(), selector)
            {
                return Ok(());
            }
            handler(component, cx, event)
        });
        if let Err(error) = outcome {
            tracing::error!(
                target: "rivulet::events",
                event = event.name(),
                error = %report(&error),
                "event handler failed"
            );
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl Component for Inert {}

    fn noop(_: &Inert, _: &mut Scope<'_, Inert>, _: &DomEvent) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn parse_splits_at_first_whitespace() {
        let binding = EventBinding::<Inert>::parse("click  .list > li .btn", noop);
        assert_eq!(binding.event(), "click");
        assert_eq!(binding.selector(), Some(".list > li .btn"));
        assert_eq!(binding.key().to_string(), "click .list > li .btn");
    }

    #[test]
    fn parse_without_selector_binds_directly() {
        let binding = EventBinding::<Inert>::parse(" input ", noop);
        assert_eq!(binding.event(), "input");
        assert_eq!(binding.selector(), None);
        assert_eq!(binding.key().to_string(), "input");
    }

    #[test]
    fn typed_construction_matches_parsed_form() {
        let typed = EventBinding::<Inert>::new("click", noop).delegate(".btn");
        let parsed = EventBinding::<Inert>::parse("click .btn", noop);
        assert_eq!(typed.key(), parsed.key());
    }
}
