//! Stage output type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary data produced by a successful stage.
///
/// Stages never carry row data; the output holds counts and locations
/// (rows loaded per relation, published object keys) for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Output values keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl StageOutput {
    /// Creates an output with no data.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates an output with a single value.
    #[must_use]
    pub fn value(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::empty().with(key, value)
    }

    /// Adds a value to the output.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Gets a value from the output.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Gets an unsigned count from the output.
    #[must_use]
    pub fn count(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Returns true if no values were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
