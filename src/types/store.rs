use std::collections::BTreeMap;

use super::Value;

/// Read-only, path-addressable document store backing `data` during a query.
///
/// The store is a single JSON-like tree rooted at an object. Paths are
/// sequences of object keys; `"a.b.c"` in the builder methods is split on
/// dots.
#[derive(Debug, Clone, PartialEq)]
pub struct Store {
    root: Value,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            root: Value::empty_object(),
        }
    }
}

impl Store {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an in-memory document. A non-object document is
    /// wrapped so that the root is always an object.
    #[must_use]
    pub fn from_object(document: impl Into<Value>) -> Self {
        match document.into() {
            root @ Value::Object(_) => Self { root },
            Value::Null => Self::default(),
            other => {
                let mut map = BTreeMap::new();
                map.insert(Value::from("value"), other);
                Self {
                    root: Value::Object(map),
                }
            }
        }
    }

    /// Set a value at a dot-separated path. Creates intermediate objects as needed.
    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.insert(path, value.into());
        self
    }

    /// Insert a value at a dot-separated path (mutable reference version).
    pub fn insert(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        Self::insert_recursive(&mut self.root, &segments, value);
    }

    /// Read the document at `path`. The empty path returns the root.
    #[must_use]
    pub fn read<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter().try_fold(&self.root, |node, segment| match node {
            Value::Object(map) => map.get(&Value::from(segment.as_ref())),
            _ => None,
        })
    }

    /// The root document.
    #[must_use]
    pub fn root(&self) -> &Value {
        &self.root
    }

    fn insert_recursive(node: &mut Value, segments: &[&str], value: Value) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        if !matches!(node, Value::Object(_)) {
            *node = Value::empty_object();
        }
        let Value::Object(map) = node else {
            return;
        };
        if rest.is_empty() {
            map.insert(Value::from(*first), value);
            return;
        }
        let child = map
            .entry(Value::from(*first))
            .or_insert_with(Value::empty_object);
        Self::insert_recursive(child, rest, value);
    }
}

impl From<serde_json::Value> for Store {
    fn from(document: serde_json::Value) -> Self {
        Self::from_object(document)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn set_and_read_simple() {
        let store = Store::new().set("name", "alice");
        assert_eq!(store.read(&["name"]), Some(&Value::from("alice")));
    }

    #[test]
    fn set_and_read_nested() {
        let store = Store::new().set("user.profile.age", 25_i64);
        assert_eq!(
            store.read(&["user", "profile", "age"]),
            Some(&Value::from(25_i64))
        );
    }

    #[test]
    fn read_missing_returns_none() {
        let store = Store::new().set("user.age", 25_i64);
        assert_eq!(store.read(&["user", "name"]), None);
        assert_eq!(store.read(&["nonexistent"]), None);
    }

    #[test]
    fn intermediate_path_is_an_object() {
        let store = Store::new().set("user.age", 25_i64);
        assert_eq!(
            store.read(&["user"]),
            Some(&Value::from(json!({"age": 25})))
        );
    }

    #[test]
    fn overwrite_leaf_with_nested() {
        let store = Store::new().set("user", "old").set("user.age", 30_i64);
        assert_eq!(store.read(&["user", "age"]), Some(&Value::from(30_i64)));
    }

    #[test]
    fn empty_path_reads_root() {
        let store = Store::from(json!({"a": 1}));
        let root: [&str; 0] = [];
        assert_eq!(store.read(&root), Some(&Value::from(json!({"a": 1}))));
    }

    #[test]
    fn from_object_wraps_scalars() {
        let store = Store::from_object(Value::from(3_i64));
        assert_eq!(store.read(&["value"]), Some(&Value::from(3_i64)));
        assert_eq!(Store::from_object(Value::Null), Store::new());
    }

    #[test]
    fn read_through_scalar_returns_none() {
        let store = Store::from(json!({"a": 1}));
        assert_eq!(store.read(&["a", "b"]), None);
    }
}
