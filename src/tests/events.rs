use super::{Log, find, log, setup};
use crate::{Host, NodeId, prelude::*};
use serde_json::json;

struct Toolbar {
    seen: Log<(String, String, NodeId)>,
}

impl Component for Toolbar {
    fn render(&self, state: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("nav")
            .child(
                element("button")
                    .class("btn")
                    .child(element("span").class("icon").text("*"))
                    .text(format!("Save {}", state["saves"])),
            )
            .child(element("a").class("link").text("Help"))
            .into())
    }

    fn events(&self) -> Vec<EventBinding<Self>> {
        let delegated = self.seen.clone();
        let direct = self.seen.clone();
        vec![
            EventBinding::parse("click .btn", move |_, _, event| {
                delegated.borrow_mut().push((
                    "delegated".to_owned(),
                    event.name().to_owned(),
                    event.target(),
                ));
                Ok(())
            }),
            EventBinding::new("select", move |_, cx, event| {
                direct.borrow_mut().push((
                    "direct".to_owned(),
                    event.name().to_owned(),
                    event.target(),
                ));
                let saves = event.detail()["saves"].clone();
                cx.set_state(State::from_json(json!({ "saves": saves })))?;
                Ok(())
            }),
        ]
    }
}

fn mount_toolbar() -> (rivulet_memory::Document, Instance<Toolbar>, Log<(String, String, NodeId)>) {
    let (document, env) = setup();
    let seen = log();
    let instance = Instance::new(Toolbar { seen: seen.clone() }, Props::new(), &env)
        .with_state(state! { "saves": 0 });
    instance.mount(document.body()).expect("mount should succeed");
    (document, instance, seen)
}

#[test]
fn delegated_click_reaches_the_handler_once() {
    let (document, instance, seen) = mount_toolbar();
    let button = find(&document, instance.root().expect("mounted"), ".btn");

    document.click(button).expect("known node");

    assert_eq!(
        *seen.borrow(),
        [("delegated".to_owned(), "click".to_owned(), button)]
    );
}

#[test]
fn delegation_matches_the_originating_target_only() {
    let (document, instance, seen) = mount_toolbar();
    let root = instance.root().expect("mounted");

    document.click(find(&document, root, ".icon")).expect("known node");
    document.click(find(&document, root, ".link")).expect("known node");
    document.click(root).expect("known node");

    assert!(seen.borrow().is_empty());
}

#[test]
fn direct_bindings_fire_for_any_target_and_rebind_after_replacement() {
    let (document, instance, seen) = mount_toolbar();
    let root = instance.root().expect("mounted");
    let link = find(&document, root, ".link");

    document
        .dispatch(link, "select", json!({ "saves": 1 }))
        .expect("known node");

    let new_root = instance.root().expect("mounted");
    assert_ne!(new_root, root);
    assert_eq!(document.listener_count(root), 0);
    assert_eq!(document.listener_count(new_root), 2);
    assert!(document.text_content(new_root).contains("Save 1"));

    let button = find(&document, new_root, ".btn");
    document.click(button).expect("known node");
    assert_eq!(
        *seen.borrow(),
        [
            ("direct".to_owned(), "select".to_owned(), link),
            ("delegated".to_owned(), "click".to_owned(), button),
        ]
    );
}

#[test]
fn unmount_removes_every_listener() {
    let (document, instance, seen) = mount_toolbar();
    let root = instance.root().expect("mounted");
    let button = find(&document, root, ".btn");

    instance.unmount().expect("unmount should succeed");
    document.click(button).expect("known node");

    assert_eq!(document.total_listener_count(), 0);
    assert!(seen.borrow().is_empty());
}

struct Faulty;

impl Component for Faulty {
    fn render(&self, _: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("div").child(element("button").class("go")).into())
    }

    fn events(&self) -> Vec<EventBinding<Self>> {
        vec![
            EventBinding::parse("click .go", |_, _, _| anyhow::bail!("handler exploded")),
            EventBinding::parse("click .go", |_, cx, _| {
                cx.set_state(state! { "clicked": true })?;
                Ok(())
            }),
        ]
    }
}

#[test]
fn handler_failures_are_contained() {
    let (document, env) = setup();
    let instance = Instance::new(Faulty, Props::new(), &env);
    instance.mount(document.body()).expect("mount should succeed");
    let button = find(&document, instance.root().expect("mounted"), ".go");

    assert_eq!(document.click(button).expect("known node"), 2);
    assert_eq!(instance.state().expect("idle")["clicked"], true);
}

struct BadSelector;

impl Component for BadSelector {
    fn render(&self, _: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("div").into())
    }

    fn events(&self) -> Vec<EventBinding<Self>> {
        vec![
            EventBinding::new("click", |_, _, _| Ok(())),
            EventBinding::new("click", |_, _, _| Ok(())).delegate("a["),
        ]
    }
}

#[test]
fn invalid_selectors_abort_the_mount() {
    let (document, env) = setup();
    let instance = Instance::new(BadSelector, Props::new(), &env);

    let error = instance.mount(document.body()).expect_err("bad selector");

    assert!(matches!(error, ComponentError::Selector(_)));
    assert_eq!(instance.lifecycle(), Lifecycle::Fresh);
    assert!(document.child_nodes(document.body()).is_empty());
    assert_eq!(document.total_listener_count(), 0);
}
