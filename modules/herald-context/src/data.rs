//! Key/value storage for one context data region.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// How far an entry travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataScope {
    /// Visible only within this process; never encoded onto the wire.
    #[default]
    InProcess,
    /// Encoded into the context header when a non-in-process transport is used.
    AcrossTransports,
}

/// A stored value. Objects are process-local by construction.
#[derive(Clone)]
pub enum ContextValue {
    Text(String),
    Object(Arc<dyn Any + Send + Sync>),
}

impl ContextValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(text) => Some(text),
            ContextValue::Object(_) => None,
        }
    }

    /// Text compares by value, objects by identity.
    pub fn same_as(&self, other: &ContextValue) -> bool {
        match (self, other) {
            (ContextValue::Text(a), ContextValue::Text(b)) => a == b,
            (ContextValue::Object(a), ContextValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ContextValue::Object(_) => f.write_str("Object(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub key: String,
    pub value: ContextValue,
    pub scope: DataScope,
}

/// Insertion-ordered map of entries. Regions stay small, so lookups are linear.
#[derive(Debug, Clone, Default)]
pub struct ContextData {
    entries: Vec<ContextEntry>,
}

impl ContextData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`. An overwrite keeps the original position.
    pub fn set(&mut self, key: impl Into<String>, value: ContextValue, scope: DataScope) {
        let key = key.into();
        // Objects cannot be encoded, so they never leave the process.
        let scope = match value {
            ContextValue::Object(_) => DataScope::InProcess,
            ContextValue::Text(_) => scope,
        };

        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                entry.value = value;
                entry.scope = scope;
            }
            None => self.entries.push(ContextEntry { key, value, scope }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContextEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns true if the key was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.key != key);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Upsert every entry of `other` into `self`, in `other`'s order.
    pub fn merge_from(&mut self, other: &ContextData) {
        for entry in other.iter() {
            self.set(entry.key.clone(), entry.value.clone(), entry.scope);
        }
    }

    /// Apply the changes that turned `baseline` into `current`: changed or
    /// added keys are upserted, keys that disappeared are removed.
    pub fn apply_diff(&mut self, baseline: &ContextData, current: &ContextData) {
        for entry in current.iter() {
            let unchanged = baseline
                .get(&entry.key)
                .is_some_and(|b| b.scope == entry.scope && b.value.same_as(&entry.value));
            if !unchanged {
                self.set(entry.key.clone(), entry.value.clone(), entry.scope);
            }
        }
        for entry in baseline.iter() {
            if !current.contains(&entry.key) {
                self.remove(&entry.key);
            }
        }
    }
}
