//! Tabular query results and parameters

use crate::graph::PropertyValue;
use indexmap::IndexMap;

/// Named query parameters (`$batch`, `$corpus`, `$limit`)
pub type Params = IndexMap<String, PropertyValue>;

/// One result row: ordered column -> value mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, PropertyValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<PropertyValue>) {
        self.fields.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&PropertyValue> {
        self.fields.get(column)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(PropertyValue::as_str)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(PropertyValue::as_integer)
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(PropertyValue::as_f64)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
