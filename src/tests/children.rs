use std::cell::RefCell;

use super::{Log, log, setup};
use crate::{Environment, Host, prelude::*};

struct Item {
    name: &'static str,
    released: Log<&'static str>,
}

impl Component for Item {
    fn render(&self, _: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("li").class("item").text(self.name).into())
    }

    fn on_mount(&self, cx: &mut Scope<'_, Self>) -> anyhow::Result<()> {
        let released = self.released.clone();
        let name = self.name;
        cx.add_cleanup(move || released.borrow_mut().push(name));
        Ok(())
    }
}

struct List {
    pending: RefCell<Vec<(&'static str, Instance<Item>)>>,
}

impl Component for List {
    fn render(&self, _: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("div")
            .class("list")
            .child(element("ul").class("slot"))
            .into())
    }

    fn on_mount(&self, cx: &mut Scope<'_, Self>) -> anyhow::Result<()> {
        for (key, child) in self.pending.borrow_mut().drain(..) {
            cx.mount_child(key, child, ".slot")?;
        }
        Ok(())
    }
}

fn item(env: &Environment, name: &'static str, released: &Log<&'static str>) -> Instance<Item> {
    Instance::new(
        Item {
            name,
            released: released.clone(),
        },
        Props::new(),
        env,
    )
}

struct Fixture {
    document: rivulet_memory::Document,
    env: Environment,
    list: Instance<List>,
    first: Instance<Item>,
    second: Instance<Item>,
    released: Log<&'static str>,
}

fn mount_list() -> Fixture {
    let (document, env) = setup();
    let released = log();
    let first = item(&env, "a", &released);
    let second = item(&env, "b", &released);
    let list = Instance::new(
        List {
            pending: RefCell::new(vec![("a", first.clone()), ("b", second.clone())]),
        },
        Props::new(),
        &env,
    );
    list.mount(document.body()).expect("mount should succeed");
    Fixture {
        document,
        env,
        list,
        first,
        second,
        released,
    }
}

#[test]
fn children_mount_into_the_selected_slot() {
    let fixture = mount_list();

    assert_eq!(
        fixture.document.to_html(fixture.document.body()),
        "<body><div class=\"list\"><ul class=\"slot\"><li class=\"item\">a</li><li class=\"item\">b</li></ul></div></body>"
    );
    assert_eq!(fixture.list.child_count(), 2);
}

#[test]
fn parent_unmount_cascades_to_every_child() {
    let fixture = mount_list();

    fixture.list.unmount().expect("unmount should succeed");

    assert!(!fixture.first.is_mounted());
    assert!(!fixture.second.is_mounted());
    assert_eq!(*fixture.released.borrow(), ["a", "b"]);
    assert!(fixture.document.child_nodes(fixture.document.body()).is_empty());
    assert_eq!(fixture.list.child_count(), 0);
}

#[test]
fn live_keys_cannot_be_overwritten() {
    let fixture = mount_list();
    let intruder = item(&fixture.env, "x", &fixture.released);

    let applied = fixture
        .list
        .handle()
        .update(|_, cx| {
            let error = cx
                .create_child("a", intruder.clone())
                .expect_err("key is live");
            assert!(matches!(error, ComponentError::ChildKeyInUse { ref key } if key == "a"));
            Ok(())
        })
        .expect("update should run");

    assert!(applied);
    assert_eq!(fixture.list.child_count(), 2);
}

#[test]
fn removed_keys_can_be_reused() {
    let fixture = mount_list();
    let replacement = item(&fixture.env, "c", &fixture.released);

    fixture
        .list
        .handle()
        .update(|_, cx| {
            cx.remove_child("a")?;
            cx.mount_child("a", replacement.clone(), ".slot")?;
            assert_eq!(cx.children().keys().collect::<Vec<_>>(), ["b", "a"]);
            assert!(cx.child::<Item>("a").is_some_and(|child| child.id() == replacement.id()));
            Ok(())
        })
        .expect("update should run");

    assert!(!fixture.first.is_mounted());
    assert!(replacement.is_mounted());
    assert_eq!(*fixture.released.borrow(), ["a"]);
}

#[test]
fn unknown_children_and_slots_are_reported() {
    let fixture = mount_list();
    let orphan = item(&fixture.env, "o", &fixture.released);

    fixture
        .list
        .handle()
        .update(|_, cx| {
            let error = cx.remove_child("missing").expect_err("unknown key");
            assert!(matches!(error, ComponentError::UnknownChild { .. }));
            let error = cx
                .mount_child("o", orphan.clone(), ".nowhere")
                .expect_err("no slot");
            assert!(matches!(error, ComponentError::NoMatch { .. }));
            Ok(())
        })
        .expect("update should run");

    assert_eq!(orphan.lifecycle(), Lifecycle::Fresh);
}

#[test]
fn children_detached_by_hand_are_tolerated() {
    let fixture = mount_list();
    let root = fixture.first.root().expect("mounted");
    assert!(fixture.document.detach(root));

    fixture.list.unmount().expect("unmount should succeed");

    assert!(!fixture.first.is_mounted());
    assert_eq!(*fixture.released.borrow(), ["a", "b"]);
}
