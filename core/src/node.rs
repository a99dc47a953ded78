//! Subtree descriptions returned by `Component::render`.
//!
//! A [`Node`] is a plain value; the runtime materializes it into host nodes when mounting or
//! replacing a component's subtree.

use crate::{
    error::HostError,
    host::{Host, NodeId},
};

/// Description of a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// An element with attributes and children.
    Element(Element),
    /// A text node.
    Text(String),
}

/// Description of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

/// Starts an element description.
#[must_use]
pub fn element(tag: impl Into<String>) -> Element {
    Element {
        tag: tag.into(),
        attributes: Vec::new(),
        children: Vec::new(),
    }
}

/// A text node description.
#[must_use]
pub fn text(content: impl Into<String>) -> Node {
    Node::Text(content.into())
}

impl Element {
    /// Sets an attribute, replacing an earlier value for the same name.
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
        self
    }

    /// Adds a class name to the `class` attribute.
    #[must_use]
    pub fn class(self, class: &str) -> Self {
        let classes = match self.attribute("class") {
            Some(existing) if !existing.is_empty() => format!("{existing} {class}"),
            _ => class.to_owned(),
        };
        self.attr("class", classes)
    }

    /// Sets the `id` attribute.
    #[must_use]
    pub fn id(self, id: impl Into<String>) -> Self {
        self.attr("id", id)
    }

    /// Appends a child.
    #[must_use]
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Appends several children.
    #[must_use]
    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    /// Appends a text child.
    #[must_use]
    pub fn text(self, content: impl Into<String>) -> Self {
        self.child(Node::Text(content.into()))
    }

    /// Tag name.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Attribute value by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Child descriptions.
    #[must_use]
    pub fn child_nodes(&self) -> &[Node] {
        &self.children
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}

impl From<&str> for Node {
    fn from(content: &str) -> Self {
        Self::Text(content.to_owned())
    }
}

impl From<String> for Node {
    fn from(content: String) -> Self {
        Self::Text(content)
    }
}

impl Node {
    /// Creates detached host nodes for this description and returns the subtree root.
    ///
    /// # Errors
    ///
    /// Propagates host failures.
    pub fn materialize(&self, host: &dyn Host) -> Result<NodeId, HostError> {
        match self {
            Self::Text(content) => Ok(host.create_text(content)),
            Self::Element(element) => {
                let node = host.create_element(&element.tag);
                for (name, value) in &element.attributes {
                    host.set_attribute(node, name, value)?;
                }
                for child in &element.children {
                    let child = child.materialize(host)?;
                    host.append_child(node, child)?;
                }
                Ok(node)
            }
        }
    }
}
