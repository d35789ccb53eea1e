// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named parameter table a graph reads from outside itself.

use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered key/value parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    values: IndexMap<String, Value>,
}

impl Blackboard {
    /// Create an empty blackboard
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set a value, returning the previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the blackboard has no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Apply overrides on top of this blackboard
    pub fn overlay(&mut self, overrides: &Blackboard) {
        for (key, value) in &overrides.values {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_keeps_order() {
        let mut defaults = Blackboard::new().with("speed", 1.0f32).with("name", "a");
        let overrides = Blackboard::new().with("speed", 4.0f32).with("extra", true);

        defaults.overlay(&overrides);

        let keys: Vec<_> = defaults.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["speed", "name", "extra"]);
        assert_eq!(defaults.get("speed"), Some(&Value::Float(4.0)));
    }
}
