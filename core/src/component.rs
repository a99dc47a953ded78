//! Component instances and their lifecycle.
//!
//! A [`Component`] describes behavior: how to render its [`State`] and [`Props`], which events
//! it handles and what its hooks do. An [`Instance`] owns one component together with its
//! state, root node, bound listeners, children and cleanups, and drives the transitions
//!
//! ```text
//! Fresh --mount--> Mounted <--> Updating
//!                     |
//!                  unmount
//!                     v
//!                  Retired
//! ```
//!
//! Instances are single-use: once retired they cannot be mounted again.

use core::{
    any::type_name,
    cell::{Cell, RefCell, RefMut},
    fmt, mem,
    time::Duration,
};
use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    rc::{Rc, Weak},
};

use indexmap::IndexSet;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    bus::{Bus, Callback, Subscription},
    children::Children,
    env::Environment,
    error::{ComponentError, Hook, panic_message, report},
    events::{self, BoundListener, EventBinding},
    host::{Host, NodeId, TimerId},
    node::Node,
    selector::Selector,
    state::{Props, State},
};

/// How a component reflects updates onto the host tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Render a fresh subtree and replace the old one wholesale, rebinding events.
    #[default]
    Replace,
    /// Ask `should_update` first; a `false` answer means the component patched the existing
    /// nodes itself and nothing is re-rendered.
    Patch,
}

/// Lifecycle phase of an [`Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, never mounted.
    Fresh,
    /// Attached to the host tree.
    Mounted,
    /// Mounted and in the middle of an update pass.
    Updating,
    /// Unmounted for good.
    Retired,
}

impl Lifecycle {
    /// Whether the instance is attached (`Mounted` or `Updating`).
    #[must_use]
    pub const fn is_mounted(self) -> bool {
        matches!(self, Self::Mounted | Self::Updating)
    }
}

/// Behavior of a stateful UI unit.
///
/// Every method takes `&self`: all mutable data lives in the instance's [`State`], which is
/// changed through [`Scope::set_state`].
pub trait Component: Sized + 'static {
    /// Reconciliation strategy used for every update of this component.
    const STRATEGY: Strategy = Strategy::Replace;

    /// State before the first render.
    fn initial_state(&self, props: &Props) -> State {
        let _ = props;
        State::new()
    }

    /// Projects the current state and props onto a subtree description.
    ///
    /// Must be pure: no side effects, no I/O. The default signals
    /// [`ComponentError::RenderNotImplemented`].
    fn render(&self, state: &State, props: &Props) -> anyhow::Result<Node> {
        let _ = (state, props);
        Err(ComponentError::RenderNotImplemented {
            component: type_name::<Self>(),
        }
        .into())
    }

    /// Handlers bound to the root after every render.
    fn events(&self) -> Vec<EventBinding<Self>> {
        Vec::new()
    }

    /// State keys that always force a full replacement when they change, even for
    /// [`Strategy::Patch`] components.
    fn structural_keys(&self) -> &[&str] {
        &[]
    }

    /// Consulted by [`Strategy::Patch`] components after a state change.
    ///
    /// Returning `false` skips rendering; before doing so the component must bring the visible
    /// output up to date through `patch`.
    fn should_update(&self, old: &State, new: &State, patch: &mut Patch<'_>) -> anyhow::Result<bool> {
        let _ = (old, new, patch);
        Ok(true)
    }

    /// Consulted by [`Strategy::Patch`] components after the owner passed new props.
    fn should_update_props(
        &self,
        old: &Props,
        new: &Props,
        patch: &mut Patch<'_>,
    ) -> anyhow::Result<bool> {
        let _ = (old, new, patch);
        Ok(true)
    }

    /// Runs after the subtree is attached and bound.
    fn on_mount(&self, cx: &mut Scope<'_, Self>) -> anyhow::Result<()> {
        let _ = cx;
        Ok(())
    }

    /// Runs after every update pass with the state as it was before the pass.
    fn on_update(&self, cx: &mut Scope<'_, Self>, old_state: &State) -> anyhow::Result<()> {
        let _ = (cx, old_state);
        Ok(())
    }

    /// Runs last during unmount, after cleanups, children and detachment.
    fn on_unmount(&self, cx: &mut Scope<'_, Self>) -> anyhow::Result<()> {
        let _ = cx;
        Ok(())
    }
}

/// A zero-argument release callback run exactly once, at unmount.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    /// Wraps a closure.
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Runs the callback.
    pub fn run(self) {
        (self.0)();
    }
}

crate::impl_debug!(Cleanup);

/// Unique id of an instance, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// Instance
// ============================================================================

type Deferred<C> = Box<dyn FnOnce(&C, &mut Scope<'_, C>) -> anyhow::Result<()>>;

/// Shared storage behind an instance: the core, plus bus and timer deliveries that arrived
/// while the core was busy.
pub(crate) struct Slot<C: Component> {
    core: RefCell<Core<C>>,
    lifecycle: Rc<Cell<Lifecycle>>,
    deferred: RefCell<VecDeque<(&'static str, Deferred<C>)>>,
    draining: Cell<bool>,
    // Rounds of deferred deliveries drained after one borrow before the rest is dropped.
    max_rounds: usize,
}

impl<C: Component> Slot<C> {
    fn borrow_core(&self) -> Result<RefMut<'_, Core<C>>, ComponentError> {
        self.core.try_borrow_mut().map_err(|_| ComponentError::Reentrant {
            component: type_name::<C>(),
        })
    }

    fn is_busy(&self) -> bool {
        self.core.try_borrow_mut().is_err()
    }

    /// Runs `op` on the core, then drains whatever was deferred meanwhile.
    fn with_core<T>(
        &self,
        op: impl FnOnce(&mut Core<C>) -> Result<T, ComponentError>,
    ) -> Result<T, ComponentError> {
        let result = op(&mut *self.borrow_core()?);
        self.drain();
        result
    }

    fn run<F>(&self, origin: &'static str, f: F) -> Result<bool, ComponentError>
    where
        F: FnOnce(&C, &mut Scope<'_, C>) -> anyhow::Result<()>,
    {
        let ran = self.with_core(|core| {
            if !core.lifecycle.get().is_mounted() {
                tracing::debug!(target: "rivulet::component", component = type_name::<C>(), origin, "skipping callback for an unmounted component");
                return Ok(None);
            }
            let component = Rc::clone(&core.component);
            Ok(Some(f(&component, &mut Scope::new(core))))
        })?;
        match ran {
            None => Ok(false),
            Some(Ok(())) => Ok(true),
            Some(Err(source)) => Err(match source.downcast::<ComponentError>() {
                Ok(error) => error,
                Err(source) => ComponentError::Handler {
                    component: type_name::<C>(),
                    origin,
                    source,
                },
            }),
        }
    }

    fn drain(&self) {
        if self.draining.replace(true) {
            return;
        }
        let _reset = Reset::new(&self.draining, true, false);
        let mut rounds = 0;
        loop {
            let batch = mem::take(&mut *self.deferred.borrow_mut());
            if batch.is_empty() {
                return;
            }
            rounds += 1;
            if rounds > self.max_rounds {
                tracing::error!(target: "rivulet::component", component = type_name::<C>(), dropped = batch.len(), limit = self.max_rounds, "deferred deliveries keep re-queueing; dropping them");
                return;
            }
            for (origin, job) in batch {
                if let Err(error) = self.run(origin, job) {
                    tracing::error!(target: "rivulet::component", component = type_name::<C>(), origin, error = %report(&error), "deferred delivery failed");
                }
            }
        }
    }
}

/// Sets `cell` to `to` on drop if it still holds `from`, unwinding included.
struct Reset<'a, T: Copy + PartialEq> {
    cell: &'a Cell<T>,
    from: T,
    to: T,
}

impl<'a, T: Copy + PartialEq> Reset<'a, T> {
    const fn new(cell: &'a Cell<T>, from: T, to: T) -> Self {
        Self { cell, from, to }
    }
}

impl<T: Copy + PartialEq> Drop for Reset<'_, T> {
    fn drop(&mut self) {
        if self.cell.get() == self.from {
            self.cell.set(self.to);
        }
    }
}

/// Owner-facing handle to a component instance.
///
/// Clones refer to the same instance. The instance is `!Send`: the runtime is single-threaded.
pub struct Instance<C: Component> {
    slot: Rc<Slot<C>>,
    id: InstanceId,
}

impl<C: Component> Clone for Instance<C> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
            id: self.id,
        }
    }
}

impl<C: Component> fmt::Debug for Instance<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("component", &type_name::<C>())
            .field("id", &self.id)
            .field("lifecycle", &self.slot.lifecycle.get())
            .finish_non_exhaustive()
    }
}

impl<C: Component> Instance<C> {
    /// Creates an unmounted instance. State starts from [`Component::initial_state`].
    pub fn new(component: C, props: Props, env: &Environment) -> Self {
        let state = component.initial_state(&props);
        let lifecycle = Rc::new(Cell::new(Lifecycle::Fresh));
        let id = InstanceId::new();
        let slot = Rc::new_cyclic(|this| Slot {
            core: RefCell::new(Core {
                id,
                component: Rc::new(component),
                props,
                state,
                lifecycle: Rc::clone(&lifecycle),
                root: None,
                bound: Vec::new(),
                children: Children::default(),
                cleanups: Vec::new(),
                timeouts: IndexSet::new(),
                pending: None,
                env: env.clone(),
                this: this.clone(),
            }),
            lifecycle,
            deferred: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            max_rounds: env.config().max_emit_depth.max(1),
        });
        Self { slot, id }
    }

    /// Merges `partial` into the initial state. Meant for construction, before mounting.
    #[must_use]
    pub fn with_state(self, partial: State) -> Self {
        if let Ok(mut core) = self.slot.borrow_core() {
            core.state.merge(partial);
        }
        self
    }

    /// Renders, attaches under `container`, binds events, then runs `on_mount`.
    ///
    /// Does nothing if the instance is already mounted.
    ///
    /// # Errors
    ///
    /// [`ComponentError::Retired`] after unmount, render and host failures (the container is
    /// left untouched), or the `on_mount` failure (the instance stays mounted).
    pub fn mount(&self, container: NodeId) -> Result<(), ComponentError> {
        self.slot.with_core(|core| core.mount(container))
    }

    /// Shallow-merges `partial` into the state and, when mounted, reconciles.
    ///
    /// The merge is visible as soon as this returns, even if reconciliation fails.
    ///
    /// # Errors
    ///
    /// Render, host and hook failures, [`ComponentError::UpdateLoop`], or
    /// [`ComponentError::Reentrant`] when called from inside this instance's own callbacks (use
    /// [`Scope::set_state`] there).
    pub fn set_state(&self, partial: State) -> Result<(), ComponentError> {
        self.slot.with_core(|core| core.set_state(partial))
    }

    /// Replaces the props, as a parent re-render would, and reconciles when mounted.
    ///
    /// # Errors
    ///
    /// Same as [`set_state`](Self::set_state).
    pub fn set_props(&self, props: Props) -> Result<(), ComponentError> {
        self.slot.with_core(|core| core.set_props(props))
    }

    /// Unbinds events, cancels timers, runs cleanups, unmounts children, detaches the root,
    /// then runs `on_unmount`. Does nothing (besides a warning) if not mounted.
    ///
    /// # Errors
    ///
    /// The first child unmount failure, else the `on_unmount` failure. The instance is retired
    /// either way.
    pub fn unmount(&self) -> Result<(), ComponentError> {
        self.slot.with_core(Core::unmount)
    }

    /// Unique id.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Current lifecycle phase. Readable at any time, even from inside callbacks.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.slot.lifecycle.get()
    }

    /// Whether the instance is mounted.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.lifecycle().is_mounted()
    }

    /// Snapshot of the state.
    ///
    /// # Errors
    ///
    /// [`ComponentError::Reentrant`] while the instance is busy.
    pub fn state(&self) -> Result<State, ComponentError> {
        Ok(self.slot.borrow_core()?.state.clone())
    }

    /// Snapshot of the props.
    ///
    /// # Errors
    ///
    /// [`ComponentError::Reentrant`] while the instance is busy.
    pub fn props(&self) -> Result<Props, ComponentError> {
        Ok(self.slot.borrow_core()?.props.clone())
    }

    /// Root node while mounted (`None` while busy).
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.slot.core.try_borrow().ok().and_then(|core| core.root)
    }

    /// Number of registered children (`0` while busy).
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.slot
            .core
            .try_borrow()
            .map_or(0, |core| core.children.len())
    }

    /// Number of cleanups and pending timeouts that unmount would release (`0` while busy).
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.slot
            .core
            .try_borrow()
            .map_or(0, |core| core.cleanups.len() + core.timeouts.len())
    }

    /// Weak handle for asynchronous completions.
    #[must_use]
    pub fn handle(&self) -> Handle<C> {
        Handle {
            slot: Rc::downgrade(&self.slot),
        }
    }
}

/// Weak handle to an instance, for work that completes after the caller returned.
///
/// Updates delivered after the instance was dropped or unmounted are discarded.
pub struct Handle<C: Component> {
    slot: Weak<Slot<C>>,
}

impl<C: Component> Clone for Handle<C> {
    fn clone(&self) -> Self {
        Self {
            slot: Weak::clone(&self.slot),
        }
    }
}

impl<C: Component> fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("component", &type_name::<C>())
            .field("live", &self.is_live())
            .finish()
    }
}

impl<C: Component> Handle<C> {
    /// Whether the instance still exists and is mounted.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.slot
            .upgrade()
            .is_some_and(|slot| slot.lifecycle.get().is_mounted())
    }

    /// Applies `partial` if the instance is still alive. Returns whether it was applied.
    ///
    /// An instance that was never mounted only merges; a retired one ignores the update.
    ///
    /// # Errors
    ///
    /// Same as [`Instance::set_state`].
    pub fn set_state(&self, partial: State) -> Result<bool, ComponentError> {
        let Some(slot) = self.slot.upgrade() else {
            tracing::debug!(target: "rivulet::component", component = type_name::<C>(), "dropping update for a dropped component");
            return Ok(false);
        };
        slot.with_core(|core| {
            if core.lifecycle.get() == Lifecycle::Retired {
                tracing::debug!(target: "rivulet::component", component = type_name::<C>(), id = %core.id, "dropping update for an unmounted component");
                return Ok(false);
            }
            core.set_state(partial)?;
            Ok(true)
        })
    }

    /// Runs `f` with the component and its scope if the instance is mounted.
    ///
    /// # Errors
    ///
    /// [`ComponentError::Reentrant`] while busy, or the error returned by `f`.
    pub fn update<F>(&self, f: F) -> Result<bool, ComponentError>
    where
        F: FnOnce(&C, &mut Scope<'_, C>) -> anyhow::Result<()>,
    {
        enter(&self.slot, "handle", f)
    }
}

/// Runs `f` against a mounted instance reached through a weak reference.
///
/// Returns `Ok(false)` when the instance is gone or not mounted, and
/// [`ComponentError::Reentrant`] while it is busy.
pub(crate) fn enter<C, F>(
    this: &Weak<Slot<C>>,
    origin: &'static str,
    f: F,
) -> Result<bool, ComponentError>
where
    C: Component,
    F: FnOnce(&C, &mut Scope<'_, C>) -> anyhow::Result<()>,
{
    match this.upgrade() {
        Some(slot) => slot.run(origin, f),
        None => Ok(false),
    }
}

/// Like [`enter`], but a busy instance queues `f` and runs it once its current operation
/// returns. A queued delivery counts as accepted.
pub(crate) fn deliver<C, F>(
    this: &Weak<Slot<C>>,
    origin: &'static str,
    f: F,
) -> Result<bool, ComponentError>
where
    C: Component,
    F: FnOnce(&C, &mut Scope<'_, C>) -> anyhow::Result<()> + 'static,
{
    let Some(slot) = this.upgrade() else {
        return Ok(false);
    };
    if slot.is_busy() {
        tracing::trace!(target: "rivulet::component", component = type_name::<C>(), origin, "instance busy; deferring delivery");
        slot.deferred.borrow_mut().push_back((origin, Box::new(f)));
        return Ok(true);
    }
    slot.run(origin, f)
}

// ============================================================================
// Core
// ============================================================================

enum Cause {
    State(State),
    Props(Props),
}

pub(crate) struct Core<C: Component> {
    id: InstanceId,
    component: Rc<C>,
    props: Props,
    state: State,
    lifecycle: Rc<Cell<Lifecycle>>,
    root: Option<NodeId>,
    bound: Vec<BoundListener>,
    children: Children,
    cleanups: Vec<Cleanup>,
    timeouts: IndexSet<TimerId>,
    // Pre-merge snapshot of a set_state issued while an update pass was running.
    pending: Option<State>,
    env: Environment,
    this: Weak<Slot<C>>,
}

fn hook_error<C>(hook: Hook, source: anyhow::Error) -> ComponentError {
    ComponentError::Hook {
        component: type_name::<C>(),
        hook,
        source,
    }
}

impl<C: Component> Core<C> {
    fn mount(&mut self, container: NodeId) -> Result<(), ComponentError> {
        match self.lifecycle.get() {
            Lifecycle::Fresh => {}
            Lifecycle::Mounted | Lifecycle::Updating => {
                tracing::debug!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, "already mounted");
                return Ok(());
            }
            Lifecycle::Retired => {
                tracing::error!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, "cannot mount a retired component");
                return Err(ComponentError::Retired {
                    component: type_name::<C>(),
                });
            }
        }

        let component = Rc::clone(&self.component);
        let root = self.render_root(&component)?;
        if let Err(error) = self.env.host().append_child(container, root) {
            self.env.host().detach(root);
            return Err(error.into());
        }
        if let Err(error) = self.bind(&component, root) {
            self.env.host().detach(root);
            return Err(error);
        }
        self.root = Some(root);
        self.lifecycle.set(Lifecycle::Mounted);
        tracing::debug!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, root = %root, "mounted");

        component
            .on_mount(&mut Scope::new(self))
            .map_err(|source| hook_error::<C>(Hook::Mount, source))
    }

    fn set_state(&mut self, partial: State) -> Result<(), ComponentError> {
        let old = self.state.clone();
        self.state.merge(partial);
        match self.lifecycle.get() {
            Lifecycle::Mounted => self.run_update(Cause::State(old)),
            Lifecycle::Updating => {
                self.pending.get_or_insert(old);
                Ok(())
            }
            Lifecycle::Fresh | Lifecycle::Retired => Ok(()),
        }
    }

    fn set_props(&mut self, props: Props) -> Result<(), ComponentError> {
        let old = mem::replace(&mut self.props, props);
        if self.lifecycle.get() == Lifecycle::Mounted {
            self.run_update(Cause::Props(old))
        } else {
            Ok(())
        }
    }

    fn run_update(&mut self, first: Cause) -> Result<(), ComponentError> {
        let limit = self.env.config().max_update_passes.max(1);
        let lifecycle = Rc::clone(&self.lifecycle);
        // A panic escaping a pass must not leave the instance stuck in Updating.
        let _settle = Reset::new(&lifecycle, Lifecycle::Updating, Lifecycle::Mounted);
        self.pending = None;
        let mut cause = first;
        let mut passes = 0;
        loop {
            passes += 1;
            if passes > limit {
                self.pending = None;
                tracing::error!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, limit, "update loop detected");
                return Err(ComponentError::UpdateLoop {
                    component: type_name::<C>(),
                    limit,
                });
            }

            self.lifecycle.set(Lifecycle::Updating);
            let result = self.update_pass(&cause);
            self.lifecycle.set(Lifecycle::Mounted);
            if let Err(error) = result {
                self.pending = None;
                return Err(error);
            }

            match self.pending.take() {
                Some(old) => cause = Cause::State(old),
                None => return Ok(()),
            }
        }
    }

    fn update_pass(&mut self, cause: &Cause) -> Result<(), ComponentError> {
        let Some(root) = self.root else {
            return Ok(());
        };
        let component = Rc::clone(&self.component);
        let old_state = match cause {
            Cause::State(old) => old.clone(),
            Cause::Props(_) => self.state.clone(),
        };

        let replace = match (C::STRATEGY, cause) {
            (Strategy::Replace, _) => true,
            (Strategy::Patch, Cause::State(old)) => {
                let structural = component
                    .structural_keys()
                    .iter()
                    .any(|key| old.differs(&self.state, key));
                structural
                    || self.consult(root, |patch| component.should_update(old, &self.state, patch))?
            }
            (Strategy::Patch, Cause::Props(old)) => self.consult(root, |patch| {
                component.should_update_props(old, &self.props, patch)
            })?,
        };

        if replace {
            self.replace_subtree(&component, root)?;
        } else {
            tracing::trace!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, "patched in place");
        }

        component
            .on_update(&mut Scope::new(self), &old_state)
            .map_err(|source| hook_error::<C>(Hook::Update, source))
    }

    fn consult(
        &self,
        root: NodeId,
        ask: impl FnOnce(&mut Patch<'_>) -> anyhow::Result<bool>,
    ) -> Result<bool, ComponentError> {
        let mut patch = Patch::new(self.env.host(), root);
        let render = ask(&mut patch).map_err(|source| hook_error::<C>(Hook::ShouldUpdate, source))?;
        if !render && patch.applied == 0 {
            tracing::warn!(
                target: "rivulet::component",
                component = type_name::<C>(),
                id = %self.id,
                "should_update skipped rendering without patching anything; output may be stale"
            );
        }
        Ok(render)
    }

    fn replace_subtree(&mut self, component: &C, old_root: NodeId) -> Result<(), ComponentError> {
        let new_root = self.render_root(component)?;
        self.unbind();
        if let Err(error) = self.env.host().replace_node(old_root, new_root) {
            self.bind(component, old_root)?;
            return Err(error.into());
        }
        self.root = Some(new_root);
        tracing::trace!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, old = %old_root, new = %new_root, "replaced subtree");
        self.bind(component, new_root)
    }

    fn render_root(&self, component: &C) -> Result<NodeId, ComponentError> {
        let node = component
            .render(&self.state, &self.props)
            .map_err(|source| match source.downcast::<ComponentError>() {
                Ok(error) => error,
                Err(source) => ComponentError::Render {
                    component: type_name::<C>(),
                    source,
                },
            })?;
        Ok(node.materialize(self.env.host())?)
    }

    fn bind(&mut self, component: &C, root: NodeId) -> Result<(), ComponentError> {
        self.bound = events::bind(self.env.host(), &self.this, root, component.events())?;
        Ok(())
    }

    fn unbind(&mut self) {
        events::unbind(self.env.host(), &mut self.bound);
    }

    fn unmount(&mut self) -> Result<(), ComponentError> {
        if !self.lifecycle.get().is_mounted() {
            tracing::warn!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, lifecycle = ?self.lifecycle.get(), "unmount on a component that is not mounted");
            return Ok(());
        }

        self.unbind();
        for timer in mem::take(&mut self.timeouts) {
            self.env.host().clear_timeout(timer);
        }
        for cleanup in mem::take(&mut self.cleanups) {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| cleanup.run())) {
                tracing::error!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, panic = %panic_message(payload.as_ref()), "cleanup panicked");
            }
        }
        let children = self.children.unmount_all();
        if let Some(root) = self.root.take()
            && !self.env.host().detach(root)
        {
            tracing::debug!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, root = %root, "root was already detached");
        }
        self.lifecycle.set(Lifecycle::Retired);
        tracing::debug!(target: "rivulet::component", component = type_name::<C>(), id = %self.id, "unmounted");

        let component = Rc::clone(&self.component);
        let hook = component
            .on_unmount(&mut Scope::new(self))
            .map_err(|source| hook_error::<C>(Hook::Unmount, source));
        children.and(hook)
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Receiver context handed to hooks and handlers.
///
/// Everything a component does to itself goes through its scope: state updates, cleanups,
/// subscriptions, timers and children.
pub struct Scope<'a, C: Component> {
    core: &'a mut Core<C>,
}

impl<C: Component> fmt::Debug for Scope<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("component", &type_name::<C>())
            .field("id", &self.core.id)
            .field("lifecycle", &self.core.lifecycle.get())
            .finish_non_exhaustive()
    }
}

impl<'a, C: Component> Scope<'a, C> {
    pub(crate) const fn new(core: &'a mut Core<C>) -> Self {
        Self { core }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.core.state
    }

    /// Current props.
    #[must_use]
    pub fn props(&self) -> &Props {
        &self.core.props
    }

    /// Instance id.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.core.id
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.core.lifecycle.get()
    }

    /// Whether the instance is mounted.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.lifecycle().is_mounted()
    }

    /// Root node while mounted.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.core.root
    }

    /// The injected environment.
    #[must_use]
    pub fn env(&self) -> &Environment {
        &self.core.env
    }

    /// The host document.
    #[must_use]
    pub fn host(&self) -> &dyn Host {
        self.core.env.host()
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> &Bus {
        self.core.env.bus()
    }

    /// Weak handle to this instance.
    #[must_use]
    pub fn handle(&self) -> Handle<C> {
        Handle {
            slot: self.core.this.clone(),
        }
    }

    /// Shallow-merges `partial` into the state.
    ///
    /// Inside `on_update` the merge is immediate and another update pass follows the current
    /// one.
    ///
    /// # Errors
    ///
    /// Same as [`Instance::set_state`].
    pub fn set_state(&mut self, partial: State) -> Result<(), ComponentError> {
        self.core.set_state(partial)
    }

    /// Registers a release callback run once at unmount, in registration order.
    pub fn add_cleanup(&mut self, cleanup: impl FnOnce() + 'static) {
        self.core.cleanups.push(Cleanup::new(cleanup));
    }

    /// Ties an existing bus subscription to this instance's lifetime.
    pub fn add_subscription(&mut self, subscription: Subscription) {
        self.core.cleanups.push(Cleanup::from(subscription));
    }

    /// Emits on the bus. See [`Bus::emit`].
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        self.core.env.bus().emit(event, data)
    }

    fn ensure_mounted(&self, operation: &'static str) -> Result<(), ComponentError> {
        if self.is_mounted() {
            return Ok(());
        }
        tracing::error!(target: "rivulet::component", component = type_name::<C>(), id = %self.core.id, operation, "operation requires a mounted component");
        Err(ComponentError::NotMounted {
            component: type_name::<C>(),
            operation,
        })
    }

    /// Subscribes `handler` to a bus event until unmount.
    ///
    /// The subscription only holds a weak reference to this instance. Events emitted while the
    /// instance is busy (from its own handlers, or from a child mounting) are queued and
    /// handled as soon as the current operation returns.
    ///
    /// # Errors
    ///
    /// [`ComponentError::NotMounted`].
    pub fn subscribe<F>(&mut self, event: &str, handler: F) -> Result<(), ComponentError>
    where
        F: Fn(&C, &mut Scope<'_, C>, &Value) -> anyhow::Result<()> + 'static,
    {
        self.ensure_mounted("subscribe")?;
        let this = self.core.this.clone();
        let handler = Rc::new(handler);
        let callback = Callback::new(move |data| {
            let handler = Rc::clone(&handler);
            let data = data.clone();
            deliver(&this, "bus", move |component, cx| {
                handler(component, cx, &data)
            })?;
            Ok(())
        });
        let subscription = self.core.env.bus().on(event, callback);
        self.add_subscription(subscription);
        Ok(())
    }

    /// Runs `callback` once after `delay`, unless the instance unmounts first. The timer is
    /// released as soon as it fires.
    ///
    /// # Errors
    ///
    /// [`ComponentError::NotMounted`].
    pub fn set_timeout<F>(&mut self, delay: Duration, callback: F) -> Result<TimerId, ComponentError>
    where
        F: FnOnce(&C, &mut Scope<'_, C>) -> anyhow::Result<()> + 'static,
    {
        self.ensure_mounted("set_timeout")?;
        let this = self.core.this.clone();
        let armed = Rc::new(Cell::new(None));
        let fired = Rc::clone(&armed);
        let timer = self.host().set_timeout(
            delay,
            Box::new(move || {
                let outcome = deliver(&this, "timer", move |component, cx| {
                    if let Some(timer) = fired.get() {
                        cx.core.timeouts.shift_remove(&timer);
                    }
                    callback(component, cx)
                });
                if let Err(error) = outcome {
                    tracing::error!(target: "rivulet::component", component = type_name::<C>(), error = %report(&error), "timer failed");
                }
            }),
        );
        armed.set(Some(timer));
        self.core.timeouts.insert(timer);
        Ok(timer)
    }

    /// Runs `callback` every `period` until unmount. A zero period is treated as one
    /// millisecond.
    ///
    /// # Errors
    ///
    /// [`ComponentError::NotMounted`].
    pub fn set_interval<F>(&mut self, period: Duration, callback: F) -> Result<(), ComponentError>
    where
        F: Fn(&C, &mut Scope<'_, C>) -> anyhow::Result<()> + 'static,
    {
        self.ensure_mounted("set_interval")?;
        let interval = Rc::new(Interval {
            host: Rc::downgrade(self.core.env.host_rc()),
            this: self.core.this.clone(),
            period: period.max(Duration::from_millis(1)),
            callback: Box::new(callback),
            current: Cell::new(None),
        });
        Interval::schedule(&interval);
        self.add_cleanup(move || interval.cancel());
        Ok(())
    }

    /// First node inside this instance's subtree matching `selector`.
    ///
    /// # Errors
    ///
    /// Selector syntax errors.
    pub fn query(&self, selector: &str) -> Result<Option<NodeId>, ComponentError> {
        let selector = Selector::parse(selector)?;
        Ok(self
            .core
            .root
            .and_then(|root| self.host().query(root, &selector)))
    }

    /// Registers an already mounted (or to-be-mounted) child under `key`. The registry never
    /// mounts children itself.
    ///
    /// # Errors
    ///
    /// [`ComponentError::NotMounted`], or [`ComponentError::ChildKeyInUse`] when a mounted
    /// child holds `key`.
    pub fn create_child<D: Component>(
        &mut self,
        key: impl Into<String>,
        child: Instance<D>,
    ) -> Result<(), ComponentError> {
        self.ensure_mounted("create_child")?;
        self.core.children.insert(key.into(), Box::new(child))
    }

    /// Mounts `child` into the first node matching `selector` and registers it under `key`.
    ///
    /// # Errors
    ///
    /// As [`create_child`](Self::create_child), plus [`ComponentError::NoMatch`] and the
    /// child's mount errors.
    pub fn mount_child<D: Component>(
        &mut self,
        key: impl Into<String>,
        child: Instance<D>,
        selector: &str,
    ) -> Result<(), ComponentError> {
        self.ensure_mounted("mount_child")?;
        let key = key.into();
        self.core.children.ensure_vacant(&key)?;
        let slot = self.query(selector)?.ok_or_else(|| ComponentError::NoMatch {
            component: type_name::<C>(),
            selector: selector.to_owned(),
        })?;
        child.mount(slot)?;
        self.core.children.insert(key, Box::new(child))
    }

    /// Unmounts and removes the child under `key`, freeing the key.
    ///
    /// # Errors
    ///
    /// [`ComponentError::UnknownChild`] or the child's unmount error.
    pub fn remove_child(&mut self, key: &str) -> Result<(), ComponentError> {
        self.core.children.remove(key)
    }

    /// Typed handle to a registered child.
    #[must_use]
    pub fn child<D: Component>(&self, key: &str) -> Option<Instance<D>> {
        self.core.children.get_as(key)
    }

    /// The child registry.
    #[must_use]
    pub fn children(&self) -> &Children {
        &self.core.children
    }
}

// ============================================================================
// Patch
// ============================================================================

/// Targeted mutation of an existing subtree, handed to `should_update`.
pub struct Patch<'a> {
    host: &'a dyn Host,
    root: NodeId,
    applied: usize,
}

impl fmt::Debug for Patch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("root", &self.root)
            .field("applied", &self.applied)
            .finish_non_exhaustive()
    }
}

impl<'a> Patch<'a> {
    const fn new(host: &'a dyn Host, root: NodeId) -> Self {
        Self {
            host,
            root,
            applied: 0,
        }
    }

    /// Root of the mounted subtree.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// The host document, for mutations not covered by the helpers.
    ///
    /// Direct mutations are not counted by [`applied`](Self::applied); call
    /// [`mark_applied`](Self::mark_applied) after making one.
    #[must_use]
    pub const fn host(&self) -> &'a dyn Host {
        self.host
    }

    /// Number of mutations applied so far.
    #[must_use]
    pub const fn applied(&self) -> usize {
        self.applied
    }

    /// Records a mutation made directly through [`host`](Self::host).
    pub const fn mark_applied(&mut self) {
        self.applied += 1;
    }

    /// First node in the subtree matching `selector`.
    ///
    /// # Errors
    ///
    /// Selector syntax errors.
    pub fn query(&self, selector: &str) -> Result<Option<NodeId>, ComponentError> {
        let selector = Selector::parse(selector)?;
        Ok(self.host.query(self.root, &selector))
    }

    /// Replaces the text of the first node matching `selector`. Returns whether a node matched.
    ///
    /// # Errors
    ///
    /// Selector or host errors.
    pub fn set_text(&mut self, selector: &str, text: &str) -> Result<bool, ComponentError> {
        let Some(node) = self.query(selector)? else {
            return Ok(false);
        };
        self.host.set_text(node, text)?;
        self.applied += 1;
        Ok(true)
    }

    /// Sets an attribute on the first node matching `selector`. Returns whether a node matched.
    ///
    /// # Errors
    ///
    /// Selector or host errors.
    pub fn set_attribute(
        &mut self,
        selector: &str,
        name: &str,
        value: &str,
    ) -> Result<bool, ComponentError> {
        let Some(node) = self.query(selector)? else {
            return Ok(false);
        };
        self.host.set_attribute(node, name, value)?;
        self.applied += 1;
        Ok(true)
    }

    /// Removes an attribute from the first node matching `selector`. Returns whether a node
    /// matched.
    ///
    /// # Errors
    ///
    /// Selector or host errors.
    pub fn remove_attribute(&mut self, selector: &str, name: &str) -> Result<bool, ComponentError> {
        let Some(node) = self.query(selector)? else {
            return Ok(false);
        };
        self.host.remove_attribute(node, name)?;
        self.applied += 1;
        Ok(true)
    }
}

// ============================================================================
// Interval
// ============================================================================

type IntervalFn<C> = dyn Fn(&C, &mut Scope<'_, C>) -> anyhow::Result<()>;

struct Interval<C: Component> {
    host: Weak<dyn Host>,
    this: Weak<Slot<C>>,
    period: Duration,
    callback: Box<IntervalFn<C>>,
    current: Cell<Option<TimerId>>,
}

impl<C: Component> Interval<C> {
    fn schedule(interval: &Rc<Self>) {
        let Some(host) = interval.host.upgrade() else {
            return;
        };
        let next = Rc::clone(interval);
        let timer = host.set_timeout(interval.period, Box::new(move || Self::tick(&next)));
        interval.current.set(Some(timer));
    }

    fn tick(interval: &Rc<Self>) {
        interval.current.set(None);
        let this = Rc::clone(interval);
        match deliver(&interval.this, "interval", move |component, cx| {
            (this.callback)(component, cx)
        }) {
            Ok(true) => Self::schedule(interval),
            Ok(false) => {}
            Err(error) => {
                tracing::error!(target: "rivulet::component", component = type_name::<C>(), error = %report(&error), "interval tick failed");
                Self::schedule(interval);
            }
        }
    }

    fn cancel(&self) {
        if let (Some(timer), Some(host)) = (self.current.take(), self.host.upgrade()) {
            host.clear_timeout(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Blank;

    impl Component for Blank {}

    #[test]
    fn mounted_covers_updating() {
        assert!(!Lifecycle::Fresh.is_mounted());
        assert!(Lifecycle::Mounted.is_mounted());
        assert!(Lifecycle::Updating.is_mounted());
        assert!(!Lifecycle::Retired.is_mounted());
    }

    #[test]
    fn replace_is_the_default_strategy() {
        assert_eq!(Strategy::default(), Strategy::Replace);
        assert_eq!(Blank::STRATEGY, Strategy::Replace);
    }

    #[test]
    fn default_render_reports_missing_override() {
        let error = Blank
            .render(&State::new(), &Props::new())
            .expect_err("render is not overridden");
        let error = error
            .downcast::<ComponentError>()
            .expect("contract violation is typed");
        assert!(matches!(
            error,
            ComponentError::RenderNotImplemented { component } if component.ends_with("Blank")
        ));
    }

    #[test]
    fn default_hooks_accept_everything() {
        let props = crate::props! { "label": "x" };
        assert!(Blank.initial_state(&props).is_empty());
        assert!(Blank.events().is_empty());
        assert!(Blank.structural_keys().is_empty());
    }

    #[test]
    fn cleanups_run_once() {
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let cleanup = Cleanup::new(move || counter.set(counter.get() + 1));
        assert!(format!("{cleanup:?}").ends_with("Cleanup"));
        cleanup.run();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn instance_ids_are_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }
}
