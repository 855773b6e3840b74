//! Hierarchical calculation records.
//!
//! Records are addressed by `/`-separated paths such as
//! `DataSofastCalculation/facet/facet_000/slope_solver` and written as nested
//! JSON objects. Saving into an existing file merges: records under new paths
//! are added, records under existing paths are replaced, everything else in the
//! file is left untouched.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::ProcessError;

/// Flat path → record map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Records {
    entries: BTreeMap<String, Value>,
}

impl Records {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize + ?Sized>(
        &mut self,
        path: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        self.entries.insert(path.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge every record into `base`, creating intermediate objects as needed.
    pub fn merge_into(&self, base: &mut Value) {
        for (path, value) in &self.entries {
            let keys: Vec<&str> = path.split('/').filter(|k| !k.is_empty()).collect();
            set_path(base, &keys, value.clone());
        }
    }

    pub fn to_nested(&self) -> Value {
        let mut root = Value::Object(Map::new());
        self.merge_into(&mut root);
        root
    }

    /// Write the records to `path`, merging with the file if it already exists.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProcessError> {
        let path = path.as_ref();
        let mut root = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        } else {
            Value::Object(Map::new())
        };
        self.merge_into(&mut root);
        std::fs::write(path, serde_json::to_string_pretty(&root)?)?;
        log::info!("saved {} records to {}", self.len(), path.display());
        Ok(())
    }
}

fn set_path(node: &mut Value, keys: &[&str], value: Value) {
    let Some((key, rest)) = keys.split_first() else {
        *node = value;
        return;
    };
    match node {
        Value::Object(map) => set_path(map.entry(key.to_string()).or_insert(Value::Null), rest, value),
        other => {
            *other = Value::Object(Map::new());
            set_path(other, keys, value);
        }
    }
}

/// Zero-padded facet path segment.
pub fn facet_key(idx: usize) -> String {
    format!("facet_{idx:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paths_become_nested_objects() {
        let mut r = Records::new();
        r.insert("a/b/c", &1).unwrap();
        r.insert("a/b/d", &[1.0, 2.0]).unwrap();
        r.insert("a/e", "x").unwrap();
        assert_eq!(r.to_nested(), json!({"a": {"b": {"c": 1, "d": [1.0, 2.0]}, "e": "x"}}));
    }

    #[test]
    fn merge_keeps_unrelated_entries() {
        let mut base = json!({"a": {"keep": true, "b": {"c": 0}}, "other": 5});
        let mut r = Records::new();
        r.insert("a/b/c", &2).unwrap();
        r.insert("new/leaf", &3).unwrap();
        r.merge_into(&mut base);
        assert_eq!(
            base,
            json!({"a": {"keep": true, "b": {"c": 2}}, "other": 5, "new": {"leaf": 3}})
        );
    }

    #[test]
    fn facet_keys_are_padded() {
        assert_eq!(facet_key(7), "facet_007");
    }
}
