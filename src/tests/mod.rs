//! Runtime behavior exercised against the in-memory document.

mod bus;
mod children;
mod events;

use std::{cell::RefCell, rc::Rc};

use crate::{Config, Environment, NodeId};
use rivulet_memory::Document;

pub(crate) type Log<T> = Rc<RefCell<Vec<T>>>;

pub(crate) fn log<T>() -> Log<T> {
    Rc::new(RefCell::new(Vec::new()))
}

pub(crate) fn setup() -> (Document, Environment) {
    setup_with(Config::default())
}

pub(crate) fn setup_with(config: Config) -> (Document, Environment) {
    let document = Document::new();
    let env = Environment::with_config(document.clone(), config);
    (document, env)
}

pub(crate) fn find(document: &Document, root: NodeId, selector: &str) -> NodeId {
    document
        .query_selector(root, selector)
        .expect("selector should parse")
        .unwrap_or_else(|| panic!("no node matches `{selector}`"))
}
