//! Component records: mutable [`State`] and caller-supplied [`Props`].

use core::ops::Index;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

static NULL: Value = Value::Null;

macro_rules! record {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Map<String, Value>);

        impl $name {
            /// Creates an empty record.
            #[must_use]
            pub fn new() -> Self {
                Self(Map::new())
            }

            /// Builds a record from a JSON value. Anything but an object yields an empty record.
            #[must_use]
            pub fn from_json(value: Value) -> Self {
                match value {
                    Value::Object(map) => Self(map),
                    other => {
                        tracing::warn!(
                            target: "rivulet::state",
                            value = %other,
                            "ignoring non-object record value"
                        );
                        Self::new()
                    }
                }
            }

            /// Looks up a key.
            #[must_use]
            pub fn get(&self, key: &str) -> Option<&Value> {
                self.0.get(key)
            }

            /// Deserializes the value under `key`, returning `None` if it is missing or has
            /// another shape.
            #[must_use]
            pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
                self.0
                    .get(key)
                    .and_then(|value| T::deserialize(value).ok())
            }

            /// Whether `key` is present.
            #[must_use]
            pub fn contains_key(&self, key: &str) -> bool {
                self.0.contains_key(key)
            }

            /// Number of keys.
            #[must_use]
            pub fn len(&self) -> usize {
                self.0.len()
            }

            /// Whether the record has no keys.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Iterates over entries in key order.
            pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
                self.0.iter()
            }

            /// Borrows the underlying JSON map.
            #[must_use]
            pub const fn as_map(&self) -> &Map<String, Value> {
                &self.0
            }

            /// Whether `key` holds a different value (or presence) in `other`.
            #[must_use]
            pub fn differs(&self, other: &Self, key: &str) -> bool {
                self.0.get(key) != other.0.get(key)
            }
        }

        impl From<Map<String, Value>> for $name {
            fn from(map: Map<String, Value>) -> Self {
                Self(map)
            }
        }

        impl From<$name> for Value {
            fn from(record: $name) -> Self {
                Self::Object(record.0)
            }
        }

        impl Index<&str> for $name {
            type Output = Value;

            /// Missing keys index to `Value::Null`, like `serde_json::Value`.
            fn index(&self, key: &str) -> &Value {
                self.0.get(key).unwrap_or(&NULL)
            }
        }
    };
}

record!(
    /// Mutable record owned by a component instance.
    ///
    /// Only the instance mutates it, through `set_state`, which performs a shallow
    /// [`merge`](State::merge).
    State
);

record!(
    /// Caller-supplied record, read-only for a mount cycle.
    Props
);

impl State {
    /// Shallow merge: keys in `partial` overwrite matching keys, all other keys are kept.
    pub fn merge(&mut self, partial: Self) {
        for (key, value) in partial.0 {
            self.0.insert(key, value);
        }
    }

    /// Inserts a single key, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{props, state};

    #[test]
    fn merge_is_shallow_and_additive() {
        let mut state = State::new();
        state.merge(state! { "a": 1 });
        state.merge(state! { "b": 2 });
        assert_eq!(state, state! { "a": 1, "b": 2 });
    }

    #[test]
    fn merge_overwrites_nested_values_wholesale() {
        let mut state = state! { "user": { "name": "ada", "age": 36 }, "loading": true };
        state.merge(state! { "user": { "name": "grace" } });
        assert_eq!(state["user"], json!({ "name": "grace" }));
        assert_eq!(state["loading"], json!(true));
    }

    #[test]
    fn typed_access_and_missing_keys() {
        let props = props! { "label": "Count", "step": 2 };
        assert_eq!(props.get_as::<String>("label").as_deref(), Some("Count"));
        assert_eq!(props.get_as::<u32>("step"), Some(2));
        assert_eq!(props.get_as::<u32>("label"), None);
        assert!(props["missing"].is_null());
    }

    #[test]
    fn non_objects_become_empty_records() {
        assert!(State::from_json(json!([1, 2])).is_empty());
        assert_eq!(State::from_json(json!({ "x": 1 })).len(), 1);
    }

    #[test]
    fn differs_compares_presence_and_value() {
        let old = state! { "a": 1 };
        let new = state! { "a": 1, "b": 2 };
        assert!(!old.differs(&new, "a"));
        assert!(old.differs(&new, "b"));
        assert!(!old.differs(&new, "c"));
    }
}
