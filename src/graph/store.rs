//! In-memory graph storage with merge-by-uid semantics
//!
//! Nodes are keyed by (label, uid); edges by (type, source, target). Both
//! `merge_*` operations are upserts, so replaying the same bulk-load rows
//! leaves node and edge counts unchanged.

use super::edge::Edge;
use super::node::Node;
use super::property::PropertyMap;
use super::types::{EdgeId, EdgeType, Label, NodeId};
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Errors that can occur during graph operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("Invalid edge: source node {0} does not exist")]
    InvalidEdgeSource(NodeId),

    #[error("Invalid edge: target node {0} does not exist")]
    InvalidEdgeTarget(NodeId),

    #[error("Node with label {0} has an empty uid")]
    EmptyUid(Label),

    #[error("Uniqueness constraint on {label}: uid '{uid}' already exists")]
    ConstraintViolation { label: Label, uid: String },
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Whether a merge created a new element or matched an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Matched,
}

/// In-memory graph storage
///
/// - nodes / edges: slot arenas indexed by id (slot 0 unused)
/// - label_index / edge_type_index: insertion-ordered, so scans are deterministic
/// - uid_index: (label, uid) -> node, the merge key
/// - edge_key_index: (type, source, target) -> edge, the relationship merge key
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<Edge>>,
    outgoing: FxHashMap<NodeId, Vec<EdgeId>>,
    incoming: FxHashMap<NodeId, Vec<EdgeId>>,
    label_index: FxHashMap<Label, IndexSet<NodeId>>,
    uid_index: FxHashMap<(Label, String), NodeId>,
    edge_type_index: FxHashMap<EdgeType, IndexSet<EdgeId>>,
    edge_key_index: FxHashMap<(EdgeType, NodeId, NodeId), EdgeId>,
    constraints: IndexSet<(Label, String)>,
    node_count: usize,
    edge_count: usize,
}

impl GraphStore {
    pub fn new() -> Self {
        GraphStore {
            nodes: vec![None],
            edges: vec![None],
            ..Default::default()
        }
    }

    /// Create the node if (label, uid) is unknown, otherwise overwrite the
    /// given attributes on the existing node
    pub fn merge_node(
        &mut self,
        label: impl Into<Label>,
        uid: impl Into<String>,
        properties: PropertyMap,
    ) -> GraphResult<(NodeId, MergeOutcome)> {
        let label = label.into();
        let uid = uid.into();
        if uid.is_empty() {
            return Err(GraphError::EmptyUid(label));
        }

        if let Some(&id) = self.uid_index.get(&(label.clone(), uid.clone())) {
            let node = self.node_slot_mut(id)?;
            node.merge_properties(properties);
            return Ok((id, MergeOutcome::Matched));
        }

        if self.nodes.is_empty() {
            self.nodes.push(None);
        }
        let id = NodeId::new(self.nodes.len() as u64);
        let mut node = Node::new(id, label.clone(), uid.clone());
        node.properties = properties;

        self.label_index.entry(label.clone()).or_default().insert(id);
        self.uid_index.insert((label, uid), id);
        self.nodes.push(Some(node));
        self.node_count += 1;
        Ok((id, MergeOutcome::Created))
    }

    /// Plain create. A duplicate uid fails when `label` carries a
    /// uniqueness constraint; otherwise it lands on the existing node as a
    /// merge would.
    pub fn create_node(
        &mut self,
        label: impl Into<Label>,
        uid: impl Into<String>,
        properties: PropertyMap,
    ) -> GraphResult<NodeId> {
        let label = label.into();
        let uid = uid.into();
        if self.is_constrained(&label) && self.uid_index.contains_key(&(label.clone(), uid.clone())) {
            return Err(GraphError::ConstraintViolation { label, uid });
        }
        self.merge_node(label, uid, properties).map(|(id, _)| id)
    }

    /// Look a node up by its merge key
    pub fn find_node(&self, label: &Label, uid: &str) -> Option<&Node> {
        self.uid_index
            .get(&(label.clone(), uid.to_string()))
            .and_then(|&id| self.get_node(id))
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_u64() as usize).and_then(Option::as_ref)
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.get_node(id).is_some()
    }

    fn node_slot_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.nodes
            .get_mut(id.as_u64() as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Create the edge if no edge of this type joins source to target,
    /// otherwise overwrite the given attributes on the existing edge
    pub fn merge_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: impl Into<EdgeType>,
        properties: PropertyMap,
    ) -> GraphResult<(EdgeId, MergeOutcome)> {
        if !self.has_node(source) {
            return Err(GraphError::InvalidEdgeSource(source));
        }
        if !self.has_node(target) {
            return Err(GraphError::InvalidEdgeTarget(target));
        }

        let edge_type = edge_type.into();
        let key = (edge_type.clone(), source, target);
        if let Some(&id) = self.edge_key_index.get(&key) {
            let edge = self
                .edges
                .get_mut(id.as_u64() as usize)
                .and_then(Option::as_mut)
                .ok_or(GraphError::EdgeNotFound(id))?;
            edge.merge_properties(properties);
            return Ok((id, MergeOutcome::Matched));
        }

        if self.edges.is_empty() {
            self.edges.push(None);
        }
        let id = EdgeId::new(self.edges.len() as u64);
        let mut edge = Edge::new(id, source, target, edge_type.clone());
        edge.properties = properties;

        self.outgoing.entry(source).or_default().push(id);
        self.incoming.entry(target).or_default().push(id);
        self.edge_type_index.entry(edge_type).or_default().insert(id);
        self.edge_key_index.insert(key, id);
        self.edges.push(Some(edge));
        self.edge_count += 1;
        Ok((id, MergeOutcome::Created))
    }

    pub fn get_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.as_u64() as usize).and_then(Option::as_ref)
    }

    /// Remove an edge
    pub fn delete_edge(&mut self, id: EdgeId) -> GraphResult<Edge> {
        let edge = self
            .edges
            .get_mut(id.as_u64() as usize)
            .and_then(Option::take)
            .ok_or(GraphError::EdgeNotFound(id))?;

        if let Some(ids) = self.edge_type_index.get_mut(&edge.edge_type) {
            ids.shift_remove(&id);
        }
        self.edge_key_index
            .remove(&(edge.edge_type.clone(), edge.source, edge.target));
        if let Some(adj) = self.outgoing.get_mut(&edge.source) {
            adj.retain(|&eid| eid != id);
        }
        if let Some(adj) = self.incoming.get_mut(&edge.target) {
            adj.retain(|&eid| eid != id);
        }
        self.edge_count -= 1;
        Ok(edge)
    }

    /// Remove a node together with every edge touching it
    pub fn delete_node(&mut self, id: NodeId) -> GraphResult<Node> {
        if !self.has_node(id) {
            return Err(GraphError::NodeNotFound(id));
        }

        let mut attached: Vec<EdgeId> = self.outgoing.remove(&id).unwrap_or_default();
        attached.extend(self.incoming.remove(&id).unwrap_or_default());
        for edge_id in attached {
            // self-loops appear in both lists
            if self.get_edge(edge_id).is_some() {
                self.delete_edge(edge_id)?;
            }
        }

        let node = self
            .nodes
            .get_mut(id.as_u64() as usize)
            .and_then(Option::take)
            .ok_or(GraphError::NodeNotFound(id))?;
        if let Some(ids) = self.label_index.get_mut(&node.label) {
            ids.shift_remove(&id);
        }
        self.uid_index.remove(&(node.label.clone(), node.uid.clone()));
        self.node_count -= 1;
        Ok(node)
    }

    pub fn get_outgoing_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.outgoing
            .get(&node_id)
            .map(|ids| ids.iter().filter_map(|&id| self.get_edge(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_incoming_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.incoming
            .get(&node_id)
            .map(|ids| ids.iter().filter_map(|&id| self.get_edge(id)).collect())
            .unwrap_or_default()
    }

    /// All nodes with a label, in creation order
    pub fn get_nodes_by_label(&self, label: &Label) -> Vec<&Node> {
        self.label_index
            .get(label)
            .map(|ids| ids.iter().filter_map(|&id| self.get_node(id)).collect())
            .unwrap_or_default()
    }

    /// All edges of a type, in creation order
    pub fn get_edges_by_type(&self, edge_type: &EdgeType) -> Vec<&Edge> {
        self.edge_type_index
            .get(edge_type)
            .map(|ids| ids.iter().filter_map(|&id| self.get_edge(id)).collect())
            .unwrap_or_default()
    }

    /// Up to `limit` live node ids, lowest first
    pub fn node_ids(&self, limit: usize) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter_map(|slot| slot.as_ref().map(|n| n.id))
            .take(limit)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Register a uniqueness constraint; returns false if it already existed
    pub fn add_unique_constraint(&mut self, label: impl Into<Label>, property: impl Into<String>) -> bool {
        self.constraints.insert((label.into(), property.into()))
    }

    pub fn constraints(&self) -> impl Iterator<Item = &(Label, String)> {
        self.constraints.iter()
    }

    fn is_constrained(&self, label: &Label) -> bool {
        self.constraints.iter().any(|(l, _)| l == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PropertyValue;

    fn props(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_merge_node_is_idempotent() {
        let mut store = GraphStore::new();
        let (a, first) = store.merge_node("term", "cat", props(&[("ngram_type", "unigram".into())])).unwrap();
        let (b, second) = store.merge_node("term", "cat", PropertyMap::new()).unwrap();

        assert_eq!(a, b);
        assert_eq!(first, MergeOutcome::Created);
        assert_eq!(second, MergeOutcome::Matched);
        assert_eq!(store.node_count(), 1);
        let node = store.find_node(&Label::new("term"), "cat").unwrap();
        assert_eq!(node.get_property("ngram_type").and_then(|v| v.as_str()), Some("unigram"));
    }

    #[test]
    fn test_same_uid_different_labels_are_distinct() {
        let mut store = GraphStore::new();
        store.merge_node("term", "training_data", PropertyMap::new()).unwrap();
        store.merge_node("document_category", "training_data", PropertyMap::new()).unwrap();
        assert_eq!(store.node_count(), 2);
    }

    #[test]
    fn test_empty_uid_rejected() {
        let mut store = GraphStore::new();
        let result = store.merge_node("term", "", PropertyMap::new());
        assert_eq!(result, Err(GraphError::EmptyUid(Label::new("term"))));
    }

    #[test]
    fn test_merge_edge_is_idempotent_and_updates_weight() {
        let mut store = GraphStore::new();
        let (t, _) = store.merge_node("term", "cat", PropertyMap::new()).unwrap();
        let (d, _) = store.merge_node("document", "doc1", PropertyMap::new()).unwrap();

        let (e1, o1) = store.merge_edge(t, d, "term_frequency", props(&[("value", 2i64.into())])).unwrap();
        let (e2, o2) = store.merge_edge(t, d, "term_frequency", props(&[("value", 3i64.into())])).unwrap();

        assert_eq!(e1, e2);
        assert_eq!((o1, o2), (MergeOutcome::Created, MergeOutcome::Matched));
        assert_eq!(store.edge_count(), 1);
        let edge = store.get_edge(e1).unwrap();
        assert_eq!(edge.get_property("value").and_then(|v| v.as_integer()), Some(3));
    }

    #[test]
    fn test_edge_validation() {
        let mut store = GraphStore::new();
        let (t, _) = store.merge_node("term", "cat", PropertyMap::new()).unwrap();
        let missing = NodeId::new(999);

        assert_eq!(
            store.merge_edge(missing, t, "tfidf", PropertyMap::new()),
            Err(GraphError::InvalidEdgeSource(missing))
        );
        assert_eq!(
            store.merge_edge(t, missing, "tfidf", PropertyMap::new()),
            Err(GraphError::InvalidEdgeTarget(missing))
        );
    }

    #[test]
    fn test_delete_node_detaches_edges() {
        let mut store = GraphStore::new();
        let (t, _) = store.merge_node("term", "cat", PropertyMap::new()).unwrap();
        let (d1, _) = store.merge_node("document", "doc1", PropertyMap::new()).unwrap();
        let (d2, _) = store.merge_node("document", "doc2", PropertyMap::new()).unwrap();
        store.merge_edge(t, d1, "term_frequency", PropertyMap::new()).unwrap();
        store.merge_edge(t, d2, "term_frequency", PropertyMap::new()).unwrap();

        store.delete_node(t).unwrap();

        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 0);
        assert!(store.get_incoming_edges(d1).is_empty());
        assert!(store.find_node(&Label::new("term"), "cat").is_none());
        assert!(store.get_edges_by_type(&EdgeType::new("term_frequency")).is_empty());
    }

    #[test]
    fn test_label_scan_keeps_creation_order() {
        let mut store = GraphStore::new();
        for uid in ["b", "a", "c"] {
            store.merge_node("document", uid, PropertyMap::new()).unwrap();
        }
        let uids: Vec<_> = store
            .get_nodes_by_label(&Label::new("document"))
            .into_iter()
            .map(|n| n.uid.clone())
            .collect();
        assert_eq!(uids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_constraint_rejects_duplicate_create() {
        let mut store = GraphStore::new();
        store.create_node("term", "cat", PropertyMap::new()).unwrap();
        // Unconstrained labels fold duplicates together
        store.create_node("term", "cat", PropertyMap::new()).unwrap();
        assert_eq!(store.node_count(), 1);

        assert!(store.add_unique_constraint("term", "term"));
        assert!(!store.add_unique_constraint("term", "term"));
        assert_eq!(
            store.create_node("term", "cat", PropertyMap::new()),
            Err(GraphError::ConstraintViolation {
                label: Label::new("term"),
                uid: "cat".to_string()
            })
        );
        store.create_node("document", "cat", PropertyMap::new()).unwrap();
        store.merge_node("term", "cat", PropertyMap::new()).unwrap();
        assert_eq!(store.node_count(), 2);
    }
}
