#![doc = include_str!("../README.md")]
#![allow(clippy::multiple_crate_versions)]

pub mod logging;

#[doc(inline)]
pub use rivulet_core::*;

pub mod prelude {
    //! A collection of commonly used traits and types for easy importing.
    //!
    //! # Example
    //!
    //! ```rust
    //! use rivulet::prelude::*;
    //!
    //! struct Hello;
    //!
    //! impl Component for Hello {
    //!     fn render(&self, _: &State, props: &Props) -> anyhow::Result<Node> {
    //!         let name = props.get_as::<String>("name").unwrap_or_default();
    //!         Ok(element("p").text(format!("Hello, {name}")).into())
    //!     }
    //! }
    //! ```
    pub use rivulet_core::{
        Bus, Component, ComponentError, DomEvent, Environment, EventBinding, Handle, Host,
        Instance, Lifecycle, Node, NodeId, Patch, Props, Scope, State, Strategy, element,
        props, state, text,
    };
}

#[cfg(test)]
mod tests;
