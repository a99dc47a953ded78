//! The in-memory document.

use core::{cell::RefCell, fmt, time::Duration};
use std::rc::Rc;

use rivulet_core::{
    DomEvent, Host, HostError, Listener, ListenerId, NodeId, Selector, SelectorError,
    SelectorTarget, TimerId,
};
use serde_json::Value;

use crate::clock::Clock;

// ============================================================================
// Storage
// ============================================================================

enum Kind {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

struct Registered {
    id: ListenerId,
    event: String,
    listener: Listener,
}

struct NodeData {
    kind: Kind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    listeners: Vec<Registered>,
}

#[derive(Default)]
struct Tree {
    // Indexed by raw node id. Nodes are never freed.
    nodes: Vec<NodeData>,
    next_listener: u64,
}

impl Tree {
    fn insert(&mut self, kind: Kind) -> NodeId {
        let id = NodeId::from_raw(self.nodes.len() as u64);
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        });
        id
    }

    fn get(&self, node: NodeId) -> Result<&NodeData, HostError> {
        usize::try_from(node.into_raw())
            .ok()
            .and_then(|index| self.nodes.get(index))
            .ok_or(HostError::UnknownNode(node))
    }

    fn get_mut(&mut self, node: NodeId) -> Result<&mut NodeData, HostError> {
        usize::try_from(node.into_raw())
            .ok()
            .and_then(|index| self.nodes.get_mut(index))
            .ok_or(HostError::UnknownNode(node))
    }

    fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        core::iter::successors(self.get(node).ok().and_then(|data| data.parent), |&node| {
            self.get(node).ok().and_then(|data| data.parent)
        })
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, node: NodeId) -> bool {
        candidate == node || self.ancestors(node).any(|ancestor| ancestor == candidate)
    }

    fn unlink(&mut self, node: NodeId) -> bool {
        let Some(parent) = self.get_mut(node).ok().and_then(|data| data.parent.take()) else {
            return false;
        };
        if let Ok(parent) = self.get_mut(parent) {
            parent.children.retain(|&child| child != node);
        }
        true
    }

    fn preorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let Ok(data) = self.get(node) else {
                continue;
            };
            order.push(node);
            stack.extend(data.children.iter().rev().copied());
        }
        order
    }

    fn text_content(&self, node: NodeId, out: &mut String) {
        match self.get(node).map(|data| (&data.kind, &data.children)) {
            Ok((Kind::Text(text), _)) => out.push_str(text),
            Ok((Kind::Element { .. }, children)) => {
                for &child in children {
                    self.text_content(child, out);
                }
            }
            Err(_) => {}
        }
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let Ok(data) = self.get(node) else {
            return;
        };
        match &data.kind {
            Kind::Text(text) => escape(text, false, out),
            Kind::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape(value, true, out);
                    out.push('"');
                }
                out.push('>');
                for &child in &data.children {
                    self.write_html(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn escape(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

/// Selector view of a node.
#[derive(Clone, Copy)]
struct NodeRef<'a> {
    tree: &'a Tree,
    node: NodeId,
}

impl SelectorTarget for NodeRef<'_> {
    fn tag(&self) -> Option<&str> {
        match &self.tree.get(self.node).ok()?.kind {
            Kind::Element { tag, .. } => Some(tag),
            Kind::Text(_) => None,
        }
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        match &self.tree.get(self.node).ok()?.kind {
            Kind::Element { attributes, .. } => attributes
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            Kind::Text(_) => None,
        }
    }

    fn parent(&self) -> Option<Self> {
        let parent = self.tree.get(self.node).ok()?.parent?;
        Some(Self {
            tree: self.tree,
            node: parent,
        })
    }
}

// ============================================================================
// Document
// ============================================================================

/// A DOM-like tree held entirely in memory, with synchronous event dispatch and a virtual
/// clock for timers.
///
/// Clones share the same tree, so a test can keep one clone while the runtime owns another.
///
/// # Example
///
/// ```rust
/// use rivulet_core::Host;
/// use rivulet_memory::Document;
///
/// let document = Document::new();
/// let button = document.create_element("button");
/// document.set_text(button, "Go").unwrap();
/// document.append_child(document.body(), button).unwrap();
///
/// assert_eq!(document.to_html(document.body()), "<body><button>Go</button></body>");
/// ```
#[derive(Clone)]
pub struct Document {
    tree: Rc<RefCell<Tree>>,
    clock: Rc<RefCell<Clock>>,
    body: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.tree.borrow().nodes.len())
            .field("body", &self.body)
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl Document {
    /// Creates a document holding an empty `<body>`.
    #[must_use]
    pub fn new() -> Self {
        let mut tree = Tree::default();
        let body = tree.insert(Kind::Element {
            tag: "body".to_owned(),
            attributes: Vec::new(),
        });
        Self {
            tree: Rc::new(RefCell::new(tree)),
            clock: Rc::new(RefCell::new(Clock::default())),
            body,
        }
    }

    /// The `<body>` element, the usual mount container.
    #[must_use]
    pub const fn body(&self) -> NodeId {
        self.body
    }

    /// Whether `node` is connected to the body.
    #[must_use]
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.tree.borrow().is_ancestor_or_self(self.body, node)
    }

    /// Tag name of an element, `None` for text and unknown nodes.
    #[must_use]
    pub fn tag(&self, node: NodeId) -> Option<String> {
        let tree = self.tree.borrow();
        NodeRef { tree: &tree, node }.tag().map(str::to_owned)
    }

    /// Dispatches an event at `target` and bubbles it towards the root.
    ///
    /// Listeners registered on a node are invoked in registration order. Listeners removed by
    /// an earlier listener of the same dispatch are skipped; listeners added during dispatch
    /// wait for the next event. Returns the number of listeners invoked.
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownNode`] for an unknown target.
    pub fn dispatch(&self, target: NodeId, name: &str, detail: Value) -> Result<usize, HostError> {
        let path: Vec<NodeId> = {
            let tree = self.tree.borrow();
            tree.get(target)?;
            core::iter::once(target).chain(tree.ancestors(target)).collect()
        };
        let event = DomEvent::new(name, target, detail);
        let mut invoked = 0;
        for node in path {
            event.set_current_target(node);
            let listeners: Vec<(ListenerId, Listener)> = {
                let tree = self.tree.borrow();
                tree.get(node).map_or_else(
                    |_| Vec::new(),
                    |data| {
                        data.listeners
                            .iter()
                            .filter(|registered| registered.event == name)
                            .map(|registered| (registered.id, Rc::clone(&registered.listener)))
                            .collect()
                    },
                )
            };
            for (id, listener) in listeners {
                if !self.has_listener(node, id) {
                    continue;
                }
                listener(&event);
                invoked += 1;
            }
            if event.propagation_stopped() {
                break;
            }
        }
        tracing::trace!(target: "rivulet::memory", event = name, target = %target, invoked, "dispatched");
        Ok(invoked)
    }

    /// Dispatches a `click` without detail.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    pub fn click(&self, target: NodeId) -> Result<usize, HostError> {
        self.dispatch(target, "click", Value::Null)
    }

    fn has_listener(&self, node: NodeId, id: ListenerId) -> bool {
        self.tree
            .borrow()
            .get(node)
            .is_ok_and(|data| data.listeners.iter().any(|registered| registered.id == id))
    }

    /// Number of listeners attached to `node`.
    #[must_use]
    pub fn listener_count(&self, node: NodeId) -> usize {
        self.tree
            .borrow()
            .get(node)
            .map_or(0, |data| data.listeners.len())
    }

    /// Number of listeners attached anywhere, including detached nodes.
    #[must_use]
    pub fn total_listener_count(&self) -> usize {
        self.tree
            .borrow()
            .nodes
            .iter()
            .map(|data| data.listeners.len())
            .sum()
    }

    /// Serializes `node` and its descendants as HTML.
    #[must_use]
    pub fn to_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().write_html(node, &mut out);
        out
    }

    /// Parses `selector` and returns the first match under `root` (root included).
    ///
    /// # Errors
    ///
    /// Selector syntax errors.
    pub fn query_selector(&self, root: NodeId, selector: &str) -> Result<Option<NodeId>, SelectorError> {
        let selector = Selector::parse(selector)?;
        Ok(self.query(root, &selector))
    }

    /// Every node under `root` (root included) matching `selector`, in document order.
    ///
    /// # Errors
    ///
    /// Selector syntax errors.
    pub fn query_all(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
        let selector = Selector::parse(selector)?;
        let tree = self.tree.borrow();
        Ok(tree
            .preorder(root)
            .into_iter()
            .filter(|&node| selector.matches(&NodeRef { tree: &tree, node }))
            .collect())
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.borrow().now()
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.clock.borrow().pending()
    }

    /// Moves the virtual clock forward by `by`, firing every timer that falls due on the way,
    /// including timers scheduled by the callbacks themselves. Returns the number fired.
    pub fn advance(&self, by: Duration) -> usize {
        let until = self.now().saturating_add(by);
        let mut fired = 0;
        loop {
            let next = self.clock.borrow_mut().pop_due(until);
            let Some(callback) = next else {
                break;
            };
            callback();
            fired += 1;
        }
        self.clock.borrow_mut().settle(until);
        tracing::trace!(target: "rivulet::memory", now = ?until, fired, "advanced clock");
        fired
    }
}

impl Host for Document {
    fn create_element(&self, tag: &str) -> NodeId {
        self.tree.borrow_mut().insert(Kind::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
        })
    }

    fn create_text(&self, text: &str) -> NodeId {
        self.tree.borrow_mut().insert(Kind::Text(text.to_owned()))
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), HostError> {
        let mut tree = self.tree.borrow_mut();
        match &mut tree.get_mut(node)?.kind {
            Kind::Element { attributes, .. } => {
                match attributes.iter_mut().find(|(key, _)| key == name) {
                    Some((_, existing)) => value.clone_into(existing),
                    None => attributes.push((name.to_owned(), value.to_owned())),
                }
                Ok(())
            }
            Kind::Text(_) => Err(HostError::NotAnElement(node)),
        }
    }

    fn remove_attribute(&self, node: NodeId, name: &str) -> Result<bool, HostError> {
        let mut tree = self.tree.borrow_mut();
        match &mut tree.get_mut(node)?.kind {
            Kind::Element { attributes, .. } => {
                let before = attributes.len();
                attributes.retain(|(key, _)| key != name);
                Ok(attributes.len() != before)
            }
            Kind::Text(_) => Ok(false),
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        let tree = self.tree.borrow();
        NodeRef { tree: &tree, node }
            .attribute(name)
            .map(str::to_owned)
    }

    fn set_text(&self, node: NodeId, text: &str) -> Result<(), HostError> {
        let mut tree = self.tree.borrow_mut();
        let data = tree.get_mut(node)?;
        if let Kind::Text(content) = &mut data.kind {
            text.clone_into(content);
            return Ok(());
        }
        for child in core::mem::take(&mut data.children) {
            if let Ok(child) = tree.get_mut(child) {
                child.parent = None;
            }
        }
        let child = tree.insert(Kind::Text(text.to_owned()));
        tree.get_mut(child)?.parent = Some(node);
        tree.get_mut(node)?.children.push(child);
        Ok(())
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().text_content(node, &mut out);
        out
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        let mut tree = self.tree.borrow_mut();
        tree.get(child)?;
        if let Kind::Text(_) = tree.get(parent)?.kind {
            return Err(HostError::NotAnElement(parent));
        }
        if tree.is_ancestor_or_self(child, parent) {
            return Err(HostError::Cycle { parent, child });
        }
        tree.unlink(child);
        tree.get_mut(child)?.parent = Some(parent);
        tree.get_mut(parent)?.children.push(child);
        Ok(())
    }

    fn replace_node(&self, old: NodeId, new: NodeId) -> Result<(), HostError> {
        let mut tree = self.tree.borrow_mut();
        tree.get(new)?;
        let parent = tree.get(old)?.parent.ok_or(HostError::Detached(old))?;
        if old == new {
            return Ok(());
        }
        if tree.is_ancestor_or_self(new, parent) {
            return Err(HostError::Cycle { parent, child: new });
        }
        tree.unlink(new);
        let siblings = &mut tree.get_mut(parent)?.children;
        let Some(index) = siblings.iter().position(|&node| node == old) else {
            return Err(HostError::Detached(old));
        };
        siblings[index] = new;
        tree.get_mut(new)?.parent = Some(parent);
        tree.get_mut(old)?.parent = None;
        Ok(())
    }

    fn detach(&self, node: NodeId) -> bool {
        self.tree.borrow_mut().unlink(node)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.borrow().get(node).ok()?.parent
    }

    fn child_nodes(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .get(node)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    fn add_listener(
        &self,
        node: NodeId,
        event: &str,
        listener: Listener,
    ) -> Result<ListenerId, HostError> {
        let mut tree = self.tree.borrow_mut();
        tree.get(node)?;
        tree.next_listener += 1;
        let id = ListenerId::from_raw(tree.next_listener);
        tree.get_mut(node)?.listeners.push(Registered {
            id,
            event: event.to_owned(),
            listener,
        });
        Ok(id)
    }

    fn remove_listener(&self, node: NodeId, listener: ListenerId) -> bool {
        let mut tree = self.tree.borrow_mut();
        let Ok(data) = tree.get_mut(node) else {
            return false;
        };
        let before = data.listeners.len();
        data.listeners.retain(|registered| registered.id != listener);
        data.listeners.len() != before
    }

    fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        let tree = self.tree.borrow();
        tree.get(node).is_ok() && selector.matches(&NodeRef { tree: &tree, node })
    }

    fn query(&self, root: NodeId, selector: &Selector) -> Option<NodeId> {
        let tree = self.tree.borrow();
        tree.preorder(root)
            .into_iter()
            .find(|&node| selector.matches(&NodeRef { tree: &tree, node }))
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        self.clock.borrow_mut().schedule(delay, callback)
    }

    fn clear_timeout(&self, timer: TimerId) -> bool {
        self.clock.borrow_mut().cancel(timer)
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use serde_json::json;

    use super::*;

    fn build(document: &Document) -> (NodeId, NodeId, NodeId) {
        let list = document.create_element("UL");
        document.set_attribute(list, "class", "list").expect("element");
        let item = document.create_element("li");
        let button = document.create_element("button");
        document.set_attribute(button, "class", "btn primary").expect("element");
        document.set_text(button, "Go").expect("known node");
        document.append_child(item, button).expect("append");
        document.append_child(list, item).expect("append");
        document.append_child(document.body(), list).expect("append");
        (list, item, button)
    }

    fn counter(document: &Document, node: NodeId, event: &str) -> (Rc<Cell<u32>>, ListenerId) {
        let hits = Rc::new(Cell::new(0));
        let seen = Rc::clone(&hits);
        let id = document
            .add_listener(node, event, Rc::new(move |_: &DomEvent| seen.set(seen.get() + 1)))
            .expect("known node");
        (hits, id)
    }

    #[test]
    fn serializes_with_escaping() {
        let document = Document::new();
        let (list, _, button) = build(&document);
        document.set_attribute(button, "title", "a \"b\" <c>").expect("element");
        let note = document.create_text("1 < 2 & 3");
        document.append_child(list, note).expect("append");

        assert_eq!(
            document.to_html(list),
            "<ul class=\"list\"><li><button class=\"btn primary\" title=\"a &quot;b&quot; &lt;c&gt;\">Go</button></li>1 &lt; 2 &amp; 3</ul>"
        );
        assert_eq!(document.text_content(list), "Go1 < 2 & 3");
    }

    #[test]
    fn events_bubble_until_stopped() {
        let document = Document::new();
        let (list, item, button) = build(&document);
        let (on_list, _) = counter(&document, list, "click");
        let (on_body, _) = counter(&document, document.body(), "click");
        document
            .add_listener(item, "click", Rc::new(|event: &DomEvent| event.stop_propagation()))
            .expect("known node");

        assert_eq!(document.click(button).expect("known node"), 1);
        assert_eq!(on_list.get(), 0);
        assert_eq!(on_body.get(), 0);

        assert_eq!(document.click(list).expect("known node"), 2);
        assert_eq!(on_list.get(), 1);
        assert_eq!(on_body.get(), 1);
    }

    #[test]
    fn dispatch_reports_target_and_current_target() {
        let document = Document::new();
        let (list, _, button) = build(&document);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        document
            .add_listener(
                list,
                "select",
                Rc::new(move |event: &DomEvent| {
                    log.borrow_mut().push((
                        event.target(),
                        event.current_target(),
                        event.detail()["value"].clone(),
                    ));
                }),
            )
            .expect("known node");

        document
            .dispatch(button, "select", json!({ "value": 3 }))
            .expect("known node");
        assert_eq!(*seen.borrow(), [(button, list, json!(3))]);
    }

    #[test]
    fn listeners_removed_during_dispatch_are_skipped() {
        let document = Document::new();
        let (list, _, _) = build(&document);
        let victim = Rc::new(Cell::new(None::<ListenerId>));
        let host = document.clone();
        let target = Rc::clone(&victim);
        document
            .add_listener(
                list,
                "click",
                Rc::new(move |_: &DomEvent| {
                    if let Some(id) = target.get() {
                        host.remove_listener(list, id);
                    }
                }),
            )
            .expect("known node");
        let (hits, id) = counter(&document, list, "click");
        victim.set(Some(id));

        assert_eq!(document.click(list).expect("known node"), 1);
        assert_eq!(hits.get(), 0);
        assert_eq!(document.listener_count(list), 1);
    }

    #[test]
    fn replace_keeps_position_and_detaches_old() {
        let document = Document::new();
        let (list, item, _) = build(&document);
        let other = document.create_element("li");
        document.append_child(list, other).expect("append");
        let fresh = document.create_element("li");
        document.set_attribute(fresh, "id", "fresh").expect("element");

        document.replace_node(item, fresh).expect("attached");

        assert_eq!(document.child_nodes(list), [fresh, other]);
        assert_eq!(document.parent(item), None);
        assert!(!document.is_connected(item));
        assert_eq!(
            document.replace_node(item, fresh),
            Err(HostError::Detached(item))
        );
    }

    #[test]
    fn structural_errors() {
        let document = Document::new();
        let (list, item, _) = build(&document);
        let text = document.create_text("x");

        assert_eq!(
            document.append_child(item, list),
            Err(HostError::Cycle { parent: item, child: list })
        );
        assert_eq!(
            document.append_child(text, item),
            Err(HostError::NotAnElement(text))
        );
        assert_eq!(
            document.set_attribute(NodeId::from_raw(999), "a", "b"),
            Err(HostError::UnknownNode(NodeId::from_raw(999)))
        );
        assert!(document.detach(list));
        assert!(!document.detach(list));
    }

    #[test]
    fn queries_follow_document_order() {
        let document = Document::new();
        let (list, item, button) = build(&document);
        let second = document.create_element("li");
        document.append_child(list, second).expect("append");

        assert_eq!(
            document.query_selector(document.body(), "ul.list > li").expect("valid"),
            Some(item)
        );
        assert_eq!(
            document.query_all(document.body(), "li").expect("valid"),
            [item, second]
        );
        assert_eq!(
            document.query_selector(button, "button").expect("valid"),
            Some(button)
        );
        assert!(document.query_selector(list, "a[").is_err());
        assert_eq!(document.tag(list).as_deref(), Some("ul"));
    }

    #[test]
    fn advance_fires_due_timers_including_rescheduled_ones() {
        let document = Document::new();
        let fired = Rc::new(Cell::new(0));
        let outer = Rc::clone(&fired);
        let host = document.clone();
        document.set_timeout(
            Duration::from_millis(10),
            Box::new(move || {
                outer.set(outer.get() + 1);
                let inner = Rc::clone(&outer);
                host.set_timeout(
                    Duration::from_millis(10),
                    Box::new(move || inner.set(inner.get() + 1)),
                );
            }),
        );
        let cancelled = document.set_timeout(Duration::from_millis(5), Box::new(|| panic!("cancelled")));
        assert!(document.clear_timeout(cancelled));

        assert_eq!(document.advance(Duration::from_millis(25)), 2);
        assert_eq!(fired.get(), 2);
        assert_eq!(document.now(), Duration::from_millis(25));
        assert_eq!(document.pending_timers(), 0);
    }
}
