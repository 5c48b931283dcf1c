//! Directed, typed edge for the embedded property graph
//!
//! At most one edge of a given type joins an ordered (source, target) pair;
//! the store enforces this so that relationship merges are idempotent.

use super::property::{PropertyMap, PropertyValue};
use super::types::{EdgeId, EdgeType, NodeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,

    /// Edge goes FROM this node
    pub source: NodeId,

    /// Edge goes TO this node
    pub target: NodeId,

    pub edge_type: EdgeType,

    /// Weights and other attributes
    pub properties: PropertyMap,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl Edge {
    pub fn new(id: EdgeId, source: NodeId, target: NodeId, edge_type: impl Into<EdgeType>) -> Self {
        Edge {
            id,
            source,
            target,
            edge_type: edge_type.into(),
            properties: PropertyMap::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn merge_properties(&mut self, properties: PropertyMap) {
        self.properties.extend(properties);
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Edge {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_direction() {
        let edge = Edge::new(EdgeId::new(1), NodeId::new(1), NodeId::new(2), "tfidf");
        assert_eq!((edge.source, edge.target), (NodeId::new(1), NodeId::new(2)));
        assert_eq!(edge.edge_type, EdgeType::new("tfidf"));
    }

    #[test]
    fn test_edge_weight() {
        let mut edge = Edge::new(EdgeId::new(2), NodeId::new(1), NodeId::new(3), "term_frequency");
        edge.set_property("value", 4i64);
        let mut update = PropertyMap::new();
        update.insert("value".to_string(), 5i64.into());
        edge.merge_properties(update);
        assert_eq!(edge.get_property("value").and_then(|v| v.as_integer()), Some(5));
    }
}
