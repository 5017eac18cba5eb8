//! Configuration tree
//!
//! An immutable, ordered key/value tree loaded from YAML. Values are looked up
//! with dot-separated paths (`datastore.parameters.max-pool-size`); nested
//! mappings are wrapped on demand as new [`Configuration`] values and never
//! mutated in place.
//!
//! # Example
//!
//! ```
//! use recload_common::Configuration;
//!
//! let config = Configuration::from_yaml_str(
//!     "processor:\n  max-processes: 4\n  transformer:\n    transformer: GenericTransformer\n",
//! )
//! .unwrap();
//!
//! assert_eq!(config.uint("processor.max-processes", 1), 4);
//! assert_eq!(config.uint("processor.max-io-workers", 2), 2);
//! assert_eq!(
//!     config.subtree("processor.transformer").string("transformer", ""),
//!     "GenericTransformer"
//! );
//! ```

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Resolve a dot-separated path inside a JSON value.
///
/// Every segment must traverse a mapping (or index a sequence when the
/// segment is numeric). Returns `None` as soon as a segment is missing.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Immutable configuration tree with typed, defaulted lookups
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    root: Arc<Value>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for Configuration {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl Configuration {
    /// Wrap a value; `null` becomes an empty mapping
    pub fn new(value: Value) -> Self {
        let root = match value {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            root: Arc::new(root),
        }
    }

    /// An empty configuration; every lookup falls back to its default
    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Ok(Self::new(value))
    }

    /// Load a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Could not read configuration file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Underlying value
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// True when the tree holds no keys
    pub fn is_empty(&self) -> bool {
        match self.root.as_ref() {
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Raw value at `path`, if every segment exists
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// Value at `path` unless it is absent or `null`
    fn present(&self, path: &str) -> Option<&Value> {
        self.get(path).filter(|v| !v.is_null())
    }

    /// True when `path` resolves to a non-null value
    pub fn contains(&self, path: &str) -> bool {
        self.present(path).is_some()
    }

    /// String at `path`; scalars are rendered, other shapes yield `None`
    pub fn opt_string(&self, path: &str) -> Option<String> {
        match self.present(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn string(&self, path: &str, default: &str) -> String {
        self.opt_string(path).unwrap_or_else(|| default.to_string())
    }

    /// Unsigned integer at `path`; numeric strings are accepted
    pub fn opt_uint(&self, path: &str) -> Option<u64> {
        match self.present(path)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn uint(&self, path: &str, default: u64) -> u64 {
        self.opt_uint(path).unwrap_or(default)
    }

    pub fn usize(&self, path: &str, default: usize) -> usize {
        self.opt_uint(path)
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn bool(&self, path: &str, default: bool) -> bool {
        match self.present(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => default,
            },
            Some(Value::Number(n)) => n.as_u64().map(|v| v != 0).unwrap_or(default),
            _ => default,
        }
    }

    /// Deserialize the value at `path` into `T`
    ///
    /// Returns `Ok(None)` when the path is absent and an error when the value
    /// has the wrong shape.
    pub fn property<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.present(path) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::invalid_value(path, e.to_string())),
            None => Ok(None),
        }
    }

    /// Nested mapping at `path` as its own configuration (empty if absent)
    pub fn subtree(&self, path: &str) -> Configuration {
        match self.present(path) {
            Some(value @ Value::Object(_)) => Self::new(value.clone()),
            _ => Self::empty(),
        }
    }

    /// Every mapping child of the mapping (or sequence) at `path`
    ///
    /// Sequence children are keyed by their index. Scalar children are skipped.
    pub fn each(&self, path: &str) -> Vec<(String, Configuration)> {
        match self.present(path) {
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(_, v)| v.is_object())
                .map(|(k, v)| (k.clone(), Self::new(v.clone())))
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_object())
                .map(|(i, v)| (i.to_string(), Self::new(v.clone())))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const SETTINGS: &str = r#"
processes:
  companies:
    datasource:
      data-path: ./data
    datastore:
      driver: postgres
      parameters:
        max-pool-size: 4
        should-drop: "yes"
        batch:
          max-size: 500
  disabled-one:
    disabled: true
  not-a-process: 42
"#;

    #[test]
    fn test_dot_path_lookup() {
        let config = Configuration::from_yaml_str(SETTINGS).unwrap();
        assert_eq!(
            config.string("processes.companies.datasource.data-path", ""),
            "./data"
        );
        assert_eq!(
            config.uint("processes.companies.datastore.parameters.batch.max-size", 0),
            500
        );
        assert!(config.bool("processes.companies.datastore.parameters.should-drop", false));
    }

    #[test]
    fn test_missing_segment_returns_default() {
        let config = Configuration::from_yaml_str(SETTINGS).unwrap();
        assert_eq!(config.uint("processes.companies.processor.max-processes", 8), 8);
        assert_eq!(config.string("processes.nope.datasource.data-path", "x"), "x");
        // Traversing through a scalar is a miss, not the scalar itself
        assert!(config.get("processes.not-a-process.deeper").is_none());
    }

    #[test]
    fn test_null_uses_default() {
        let config = Configuration::new(json!({"a": null}));
        assert!(config.get("a").is_some());
        assert!(!config.contains("a"));
        assert_eq!(config.uint("a", 3), 3);
    }

    #[test]
    fn test_subtree_is_detached() {
        let config = Configuration::from_yaml_str(SETTINGS).unwrap();
        let datastore = config.subtree("processes.companies.datastore");
        assert_eq!(datastore.string("driver", ""), "postgres");
        assert_eq!(datastore.usize("parameters.max-pool-size", 1), 4);
        assert!(config.subtree("processes.companies.missing").is_empty());
    }

    #[test]
    fn test_each_yields_mapping_children_in_order() {
        let config = Configuration::from_yaml_str(SETTINGS).unwrap();
        let names: Vec<String> = config.each("processes").into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["companies", "disabled-one"]);

        let seq = Configuration::new(json!({"items": [{"a": 1}, 2, {"b": 3}]}));
        let keys: Vec<String> = seq.each("items").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["0", "2"]);
    }

    #[test]
    fn test_array_index_segment() {
        let value = json!({"data": {"codes": [{"code": "61.10"}]}});
        assert_eq!(lookup(&value, "data.codes.0.code"), Some(&json!("61.10")));
        assert_eq!(lookup(&value, "data.codes.1.code"), None);
    }

    #[test]
    fn test_property_shape_mismatch() {
        let config = Configuration::new(json!({"list": [1, 2, 3], "name": "x"}));
        let list: Option<Vec<u32>> = config.property("list").unwrap();
        assert_eq!(list, Some(vec![1, 2, 3]));
        assert!(config.property::<Vec<u32>>("name").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        std::fs::write(&path, SETTINGS).unwrap();
        let config = Configuration::load(&path).unwrap();
        assert_eq!(config.each("processes").len(), 2);

        assert!(Configuration::load(dir.path().join("missing.yml")).is_err());
    }

    proptest! {
        #[test]
        fn prop_nested_path_round_trip(
            segments in prop::collection::vec("[a-z][a-z0-9-]{0,8}", 1..6),
            leaf in any::<u32>(),
        ) {
            let value = segments
                .iter()
                .rev()
                .fold(json!(leaf), |inner, key| {
                    let mut map = serde_json::Map::new();
                    map.insert(key.clone(), inner);
                    Value::Object(map)
                });
            let config = Configuration::new(value);
            let path = segments.join(".");

            prop_assert_eq!(config.uint(&path, 0), u64::from(leaf));
            let missing = format!("{path}.deeper");
            prop_assert!(config.get(&missing).is_none());
        }
    }
}
