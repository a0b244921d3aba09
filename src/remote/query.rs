//! Projection query parameters and result values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single scalar cell of a projection result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Integer value (ids, counts).
    Long(i64),
    /// Floating point value.
    Double(f64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    Text(String),
    /// SQL null.
    Null,
}

impl ScalarValue {
    /// Returns the value as an integer, if it is one.
    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(value) => Some(*value),
            _ => None,
        }
    }
}

/// A bound value for a named query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A single id.
    Long(i64),
    /// A list of ids, for `IN (:ids)` clauses.
    Longs(Vec<i64>),
}

/// Named parameters bound into a projection query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, ParamValue>);

impl QueryParams {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `:id`.
    #[must_use]
    pub fn add_id(self, id: i64) -> Self {
        self.add("id", ParamValue::Long(id))
    }

    /// Binds `:ids`.
    #[must_use]
    pub fn add_ids(self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.add("ids", ParamValue::Longs(ids.into_iter().collect()))
    }

    /// Binds an arbitrary named parameter.
    #[must_use]
    pub fn add(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Looks up a bound parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }
}

/// Rows returned by a projection query.
pub type Rows = Vec<Vec<ScalarValue>>;
