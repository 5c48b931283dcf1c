//! Node implementation for the embedded property graph
//!
//! Every node carries exactly one label and a uid: the value of the
//! registry's identifying attribute for that label. The (label, uid) pair
//! is the merge key.

use super::property::{PropertyMap, PropertyValue};
use super::types::{Label, NodeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Store-assigned identifier
    pub id: NodeId,

    pub label: Label,

    /// Registry-level identity, unique per label
    pub uid: String,

    /// Non-identifying attributes
    pub properties: PropertyMap,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last merge timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Node {
    pub fn new(id: NodeId, label: impl Into<Label>, uid: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Node {
            id,
            label: label.into(),
            uid: uid.into(),
            properties: PropertyMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_label(&self, label: &Label) -> bool {
        &self.label == label
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        let old = self.properties.insert(key.into(), value.into());
        self.touch();
        old
    }

    /// Overwrite the given attributes, leaving the others untouched
    pub fn merge_properties(&mut self, properties: PropertyMap) {
        if properties.is_empty() {
            return;
        }
        self.properties.extend(properties);
        self.touch();
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}
