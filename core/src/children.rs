//! Child registry: the owning arena of a parent's child components.

use core::{any::Any, fmt};

use indexmap::IndexMap;

use crate::{
    component::{Component, Instance, InstanceId, Lifecycle},
    error::{ComponentError, report},
    host::NodeId,
};

/// Type-erased view of an [`Instance`], so children of different component types share one
/// registry.
pub trait AnyInstance {
    /// Unique id of the instance.
    fn id(&self) -> InstanceId;
    /// Type name of the component.
    fn component_name(&self) -> &'static str;
    /// Current lifecycle phase.
    fn lifecycle(&self) -> Lifecycle;
    /// Root node while mounted.
    fn root(&self) -> Option<NodeId>;
    /// Unmounts the instance.
    ///
    /// # Errors
    ///
    /// See [`Instance::unmount`].
    fn unmount(&self) -> Result<(), ComponentError>;
    /// Upcast for downcasting to the concrete [`Instance`].
    fn as_any(&self) -> &dyn Any;
}

impl<C: Component> AnyInstance for Instance<C> {
    fn id(&self) -> InstanceId {
        Self::id(self)
    }

    fn component_name(&self) -> &'static str {
        core::any::type_name::<C>()
    }

    fn lifecycle(&self) -> Lifecycle {
        Self::lifecycle(self)
    }

    fn root(&self) -> Option<NodeId> {
        Self::root(self)
    }

    fn unmount(&self) -> Result<(), ComponentError> {
        Self::unmount(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Insertion-ordered map from caller-chosen keys to owned children.
#[derive(Default)]
pub struct Children {
    entries: IndexMap<String, Box<dyn AnyInstance>>,
}

impl Children {
    /// Fails if `key` is held by a mounted child.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::ChildKeyInUse`].
    pub fn ensure_vacant(&self, key: &str) -> Result<(), ComponentError> {
        match self.entries.get(key) {
            Some(existing) if existing.lifecycle().is_mounted() => {
                tracing::error!(
                    target: "rivulet::children",
                    key,
                    child = existing.component_name(),
                    "refusing to overwrite a mounted child; unmount it first"
                );
                Err(ComponentError::ChildKeyInUse {
                    key: key.to_owned(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Registers `child` under `key`. A stale, unmounted entry under the same key is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::ChildKeyInUse`] if a mounted child holds the key.
    pub fn insert(&mut self, key: String, child: Box<dyn AnyInstance>) -> Result<(), ComponentError> {
        self.ensure_vacant(&key)?;
        self.entries.shift_remove(&key);
        tracing::debug!(target: "rivulet::children", key = %key, child = child.component_name(), "registered child");
        self.entries.insert(key, child);
        Ok(())
    }

    /// Unmounts the child under `key` and removes it.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::UnknownChild`] or the child's unmount error (the entry is
    /// removed either way).
    pub fn remove(&mut self, key: &str) -> Result<(), ComponentError> {
        let child = self
            .entries
            .shift_remove(key)
            .ok_or_else(|| ComponentError::UnknownChild {
                key: key.to_owned(),
            })?;
        child.unmount()
    }

    /// Borrowed, type-erased child.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&dyn AnyInstance> {
        self.entries.get(key).map(AsRef::as_ref)
    }

    /// Typed handle to a child.
    #[must_use]
    pub fn get_as<C: Component>(&self, key: &str) -> Option<Instance<C>> {
        self.entries
            .get(key)?
            .as_any()
            .downcast_ref::<Instance<C>>()
            .cloned()
    }

    /// Whether `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registered children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no children are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Unmounts and removes every child in insertion order.
    ///
    /// Every child is unmounted even if an earlier one fails; the first failure is returned.
    pub(crate) fn unmount_all(&mut self) -> Result<(), ComponentError> {
        let mut first = None;
        for (key, child) in self.entries.drain(..) {
            if let Err(error) = child.unmount() {
                tracing::error!(target: "rivulet::children", key = %key, error = %report(&error), "child failed to unmount");
                first.get_or_insert(error);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Children {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
