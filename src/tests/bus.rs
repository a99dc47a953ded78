use super::{Log, log, setup};
use crate::{Callback, prelude::*};
use serde_json::{Value, json};

fn recorder(log: &Log<Value>) -> Callback {
    let log = log.clone();
    Callback::new(move |data| {
        log.borrow_mut().push(data.clone());
        Ok(())
    })
}

#[test]
fn unsubscribing_twice_equals_unsubscribing_once() {
    let bus = Bus::new();
    let first = log();
    let second = log();
    let subscription = bus.on("tick", recorder(&first));
    let _keep = bus.on("tick", recorder(&second));

    subscription.unsubscribe();
    subscription.unsubscribe();

    assert!(!subscription.is_active());
    assert_eq!(bus.listener_count("tick"), 1);
    assert_eq!(bus.emit("tick", &json!(1)), 1);
    assert!(first.borrow().is_empty());
    assert_eq!(*second.borrow(), [json!(1)]);
}

#[test]
fn failing_and_panicking_listeners_do_not_block_others() {
    let bus = Bus::new();
    let received = log();
    bus.on("x", Callback::new(|_| anyhow::bail!("listener A failed")));
    bus.on("x", Callback::new(|_| panic!("listener B panicked")));
    bus.on("x", recorder(&received));

    assert_eq!(bus.emit("x", &json!({ "n": 1 })), 1);
    assert_eq!(*received.borrow(), [json!({ "n": 1 })]);
}

struct Pinged {
    name: &'static str,
    received: Log<(&'static str, Value)>,
}

impl Component for Pinged {
    fn render(&self, _: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("div").class(self.name).into())
    }

    fn on_mount(&self, cx: &mut Scope<'_, Self>) -> anyhow::Result<()> {
        cx.subscribe("ping", |component, _, data| {
            component
                .received
                .borrow_mut()
                .push((component.name, data.clone()));
            Ok(())
        })?;
        Ok(())
    }
}

#[test]
fn unmounting_a_subscriber_stops_its_delivery() {
    let (document, env) = setup();
    let received = log();
    let left = Instance::new(
        Pinged {
            name: "left",
            received: received.clone(),
        },
        Props::new(),
        &env,
    );
    let right = Instance::new(
        Pinged {
            name: "right",
            received: received.clone(),
        },
        Props::new(),
        &env,
    );
    left.mount(document.body()).expect("mount should succeed");
    right.mount(document.body()).expect("mount should succeed");

    assert_eq!(env.bus().emit("ping", &json!({ "n": 1 })), 2);
    left.unmount().expect("unmount should succeed");
    assert_eq!(env.bus().emit("ping", &json!({ "n": 2 })), 1);

    assert_eq!(
        *received.borrow(),
        [
            ("left", json!({ "n": 1 })),
            ("right", json!({ "n": 1 })),
            ("right", json!({ "n": 2 })),
        ]
    );
    assert_eq!(env.bus().listener_count("ping"), 1);
}

struct Echo {
    delivered: Log<usize>,
    heard: Log<Value>,
}

impl Component for Echo {
    fn render(&self, _: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("button").into())
    }

    fn events(&self) -> Vec<EventBinding<Self>> {
        vec![EventBinding::new("click", |component: &Self, cx, _| {
            let delivered = cx.emit("echo", &json!(1));
            component.delivered.borrow_mut().push(delivered);
            Ok(())
        })]
    }

    fn on_mount(&self, cx: &mut Scope<'_, Self>) -> anyhow::Result<()> {
        cx.subscribe("echo", |component, cx, data| {
            component.heard.borrow_mut().push(data.clone());
            cx.set_state(state! { "echoed": true })?;
            Ok(())
        })?;
        Ok(())
    }
}

#[test]
fn emitting_to_yourself_is_delivered_after_the_handler_returns() {
    let (document, env) = setup();
    let delivered = log();
    let heard = log();
    let instance = Instance::new(
        Echo {
            delivered: delivered.clone(),
            heard: heard.clone(),
        },
        Props::new(),
        &env,
    );
    instance.mount(document.body()).expect("mount should succeed");

    document
        .click(instance.root().expect("mounted"))
        .expect("known node");

    assert_eq!(*delivered.borrow(), [1]);
    assert_eq!(*heard.borrow(), [json!(1)]);
    assert_eq!(instance.state().expect("idle")["echoed"], true);
}

struct Announcer;

impl Component for Announcer {
    fn render(&self, _: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("span").into())
    }

    fn on_mount(&self, cx: &mut Scope<'_, Self>) -> anyhow::Result<()> {
        cx.emit("ready", &json!("child"));
        Ok(())
    }
}

struct Listening {
    heard: Log<Value>,
}

impl Component for Listening {
    fn render(&self, _: &State, _: &Props) -> anyhow::Result<Node> {
        Ok(element("section").into())
    }

    fn on_mount(&self, cx: &mut Scope<'_, Self>) -> anyhow::Result<()> {
        cx.subscribe("ready", |component, _, data| {
            component.heard.borrow_mut().push(data.clone());
            Ok(())
        })?;
        let child = Instance::new(Announcer, Props::new(), cx.env());
        cx.mount_child("child", child, "section")?;
        Ok(())
    }
}

#[test]
fn a_child_can_notify_its_parent_while_mounting() {
    let (document, env) = setup();
    let heard = log();
    let parent = Instance::new(
        Listening {
            heard: heard.clone(),
        },
        Props::new(),
        &env,
    );

    parent.mount(document.body()).expect("mount should succeed");

    assert_eq!(*heard.borrow(), [json!("child")]);
    assert_eq!(parent.child_count(), 1);
}
