//! Path-addressable nested key-value store shared by [`crate::config`] and
//! [`crate::sample`].
//!
//! Python's `cellophane.data.Container` is a `UserDict` that accepts either a
//! single hashable or a sequence of hashables as a subscript, auto-vivifying
//! intermediate mappings on insert, and forwards unknown attribute reads to
//! the backing dict. Rust has no subscript-assignment operator overload or
//! dynamic attribute fallback, so the same contract is exposed as explicit
//! `get_path`/`set_path`/`contains_path` methods instead.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A path into a [`Container`]: either a single key or an ordered sequence of
/// keys addressing a nested value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Single(String),
    Path(Vec<String>),
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Single(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Single(value)
    }
}

impl From<&[&str]> for Key {
    fn from(value: &[&str]) -> Self {
        Key::Path(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<String>> for Key {
    fn from(value: Vec<String>) -> Self {
        Key::Path(value)
    }
}

impl From<&[String]> for Key {
    fn from(value: &[String]) -> Self {
        Key::Path(value.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Key {
    fn from(value: [&str; N]) -> Self {
        Key::Path(value.iter().map(|s| s.to_string()).collect())
    }
}

impl Key {
    fn segments(&self) -> &[String] {
        match self {
            Key::Single(s) => std::slice::from_ref(s),
            Key::Path(p) => p.as_slice(),
        }
    }
}

/// A recursive associative map with path-addressable keys.
///
/// Backed by a [`serde_json::Map`] so the same value model flows through
/// config loading, schema validation, and run-cache fingerprinting without
/// conversion at the boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Container {
    data: Map<String, Value>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.data
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Membership test: true iff every segment of `key` exists.
    pub fn contains_path(&self, key: impl Into<Key>) -> bool {
        self.get_path(key).is_some()
    }

    /// Resolve a (possibly nested) key to its value, if present.
    pub fn get_path(&self, key: impl Into<Key>) -> Option<&Value> {
        let key = key.into();
        let mut segments = key.segments().iter();
        let first = segments.next()?;
        let mut cur = self.data.get(first)?;
        for seg in segments {
            cur = cur.as_object()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn get_path_mut(&mut self, key: impl Into<Key>) -> Option<&mut Value> {
        let key = key.into();
        let mut segments = key.segments().iter();
        let first = segments.next()?;
        let mut cur = self.data.get_mut(first)?;
        for seg in segments {
            cur = cur.as_object_mut()?.get_mut(seg)?;
        }
        Some(cur)
    }

    /// Set a (possibly nested) key, creating intermediate objects as needed.
    /// A nested plain object is stored directly — because `Container` *is* a
    /// JSON object tree, no separate "promotion" step is required.
    pub fn set_path(&mut self, key: impl Into<Key>, value: Value) {
        let key = key.into();
        let segments = key.segments();
        match segments.len() {
            0 => {}
            1 => {
                self.data.insert(segments[0].clone(), value);
            }
            _ => {
                let mut cur = &mut self.data;
                for seg in &segments[..segments.len() - 1] {
                    let entry = cur
                        .entry(seg.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        *entry = Value::Object(Map::new());
                    }
                    cur = entry.as_object_mut().expect("just normalized to object");
                }
                cur.insert(segments[segments.len() - 1].clone(), value);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.data.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Recursively merge `other` over `self`: objects merge key-wise with
    /// `other`'s leaves taking precedence, arrays union (order-preserving,
    /// de-duplicated), and any other pairing resolves to `other`'s value.
    /// Mirrors `cellophane.src.util.merge_mappings`.
    pub fn merge(&self, other: &Container) -> Container {
        let merged = merge_values(&Value::Object(self.data.clone()), &Value::Object(other.data.clone()));
        match merged {
            Value::Object(map) => Container::from_map(map),
            _ => unreachable!("merging two objects always yields an object"),
        }
    }
}

pub fn merge_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(m1), Value::Object(m2)) => {
            let mut out = Map::new();
            for (k, v) in m1 {
                out.insert(k.clone(), v.clone());
            }
            for (k, v) in m2 {
                let merged = match out.get(k) {
                    Some(existing) => merge_values(existing, v),
                    None => v.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        (Value::Array(a1), Value::Array(a2)) => {
            let mut out = Vec::new();
            for v in a1.iter().chain(a2.iter()) {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Value::Array(out)
        }
        (_, b) => b.clone(),
    }
}

impl From<Map<String, Value>> for Container {
    fn from(data: Map<String, Value>) -> Self {
        Container::from_map(data)
    }
}
