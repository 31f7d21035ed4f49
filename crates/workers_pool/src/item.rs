use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PoolError;

/// The `WorkItem` struct represents one unit of work handed to a worker.
///
/// It maps argument names to arbitrary JSON values, playing the role of the keyword
/// arguments of a single `process` call. Key order carries no meaning.
///
/// # Examples:
/// - `{"x": 5}`
/// - `{"piece_index": 12, "shuffle_row_drop_partition": [0, 1]}`
///
/// A `WorkItem` is moved into a worker's input queue by `ventilate`, so it cannot be
/// modified once enqueued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem {
    kwargs: Map<String, Value>,
}

impl WorkItem {
    /// Creates an item with no arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an item from a single `(name, value)` pair.
    ///
    /// Chain with [`with_arg`](Self::with_arg) to add more arguments.
    pub fn from_single(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with_arg(name, value)
    }

    /// Adds or overwrites an argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Returns the value of an argument by name.
    pub fn get(&self, name: &str) -> Result<&Value> {
        self.kwargs
            .get(name)
            .ok_or_else(|| anyhow!("Argument '{}' not found in work item", name))
    }

    /// Returns an integer argument, failing if it is missing or not an integer.
    pub fn get_i64(&self, name: &str) -> Result<i64> {
        self.get(name)?
            .as_i64()
            .ok_or_else(|| anyhow!("Argument '{}' is not an integer", name))
    }

    /// Returns an iterator over all argument names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.kwargs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kwargs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kwargs.is_empty()
    }

    /// Borrows the full argument map.
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Parses a JSON array of objects into a list of items.
    ///
    /// Fails with [`PoolError::InvalidConfig`] unless `value` is an array whose
    /// elements are all objects.
    pub fn list_from_json(value: Value) -> Result<Vec<WorkItem>, PoolError> {
        match value {
            Value::Array(values) => values.into_iter().map(WorkItem::try_from).collect(),
            other => Err(PoolError::InvalidConfig(format!(
                "items to ventilate must be a list of mappings, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<Map<String, Value>> for WorkItem {
    fn from(kwargs: Map<String, Value>) -> Self {
        Self { kwargs }
    }
}

impl TryFrom<Value> for WorkItem {
    type Error = PoolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(kwargs) => Ok(Self { kwargs }),
            other => Err(PoolError::InvalidConfig(format!(
                "each item to ventilate must be a mapping, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for WorkItem {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            kwargs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod work_item_test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_work_item_basic_construction() -> Result<()> {
        let item = WorkItem::from_single("x", 5).with_arg("name", "piece-5");

        assert_eq!(item.get_i64("x")?, 5);
        assert_eq!(item.get("name")?, &json!("piece-5"));
        assert!(item.get("missing").is_err());
        assert!(item.get_i64("name").is_err());

        let keys: Vec<_> = item.keys().collect();
        assert!(keys.contains(&"x"));
        assert!(keys.contains(&"name"));
        assert_eq!(item.len(), 2);
        Ok(())
    }

    #[test]
    fn test_list_from_json_accepts_objects() -> Result<()> {
        let items = WorkItem::list_from_json(json!([{"x": 0}, {"x": 1, "y": true}]))?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].get("y")?, &json!(true));
        Ok(())
    }

    #[test]
    fn test_list_from_json_rejects_malformed_lists() {
        let not_a_list = WorkItem::list_from_json(json!({"x": 0}));
        assert!(matches!(not_a_list, Err(PoolError::InvalidConfig(_))));

        let mixed = WorkItem::list_from_json(json!([{"x": 0}, 7]));
        match mixed {
            Err(PoolError::InvalidConfig(msg)) => assert!(msg.contains("a number")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_serde_is_transparent() -> Result<()> {
        let item: WorkItem = [("a", 1), ("b", 2)].into_iter().collect();
        let encoded = serde_json::to_value(&item)?;
        assert_eq!(encoded, json!({"a": 1, "b": 2}));
        Ok(())
    }
}
