//! Graph snapshots
//!
//! The embedded store lives in memory. A snapshot carries its nodes, edges
//! and constraints to disk between runs so that a later run can resume with
//! only the remaining stages enabled. Restoring recreates every element,
//! so ids are reassigned but merge keys are preserved. Constraints are
//! registered first; a snapshot holding a constrained uid twice is rejected.

use super::edge::Edge;
use super::node::Node;
use super::store::{GraphResult, GraphStore};
use super::types::{Label, NodeId};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub constraints: Vec<(Label, String)>,
}

impl GraphSnapshot {
    pub fn load(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Write to a sibling temp file, then rename over `path`
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(".{}.snapshot.tmp", name));

        let mut writer = BufWriter::new(File::create(&temp)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp, path)
    }
}

impl GraphStore {
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes: Vec<Node> = self
            .node_ids(usize::MAX)
            .into_iter()
            .filter_map(|id| self.get_node(id))
            .cloned()
            .collect();
        let edges = nodes
            .iter()
            .flat_map(|n| self.get_outgoing_edges(n.id))
            .cloned()
            .collect();
        GraphSnapshot {
            nodes,
            edges,
            constraints: self.constraints().cloned().collect(),
        }
    }

    pub fn restore(snapshot: GraphSnapshot) -> GraphResult<Self> {
        let mut store = GraphStore::new();
        let mut remap: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        for (label, property) in snapshot.constraints {
            store.add_unique_constraint(label, property);
        }
        for node in snapshot.nodes {
            let id = store.create_node(node.label, node.uid, node.properties)?;
            remap.insert(node.id, id);
        }
        for edge in snapshot.edges {
            let (Some(&source), Some(&target)) = (remap.get(&edge.source), remap.get(&edge.target)) else {
                continue;
            };
            store.merge_edge(source, target, edge.edge_type, edge.properties)?;
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphError, PropertyMap};
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_restores_graph() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.json");

        let mut store = GraphStore::new();
        let mut props = PropertyMap::new();
        props.insert("value".to_string(), 3i64.into());
        let (doc, _) = store.merge_node("document", "doc1", PropertyMap::new()).unwrap();
        let (term, _) = store.merge_node("term", "cat", PropertyMap::new()).unwrap();
        store.merge_edge(term, doc, "term_frequency", props).unwrap();
        store.add_unique_constraint("term", "term");

        store.snapshot().save(&path).unwrap();
        let restored = GraphStore::restore(GraphSnapshot::load(&path).unwrap()).unwrap();

        assert_eq!(restored.node_count(), 2);
        assert_eq!(restored.edge_count(), 1);
        assert_eq!(restored.constraints().count(), 1);
        let cat = restored.find_node(&Label::new("term"), "cat").unwrap();
        let edges = restored.get_outgoing_edges(cat.id);
        assert_eq!(edges[0].get_property("value").and_then(|v| v.as_integer()), Some(3));
    }

    #[test]
    fn test_restore_rejects_duplicate_constrained_uid() {
        let mut store = GraphStore::new();
        store.merge_node("term", "cat", PropertyMap::new()).unwrap();
        store.add_unique_constraint("term", "term");
        let mut snapshot = store.snapshot();
        let mut copy = snapshot.nodes[0].clone();
        copy.id = NodeId::new(2);
        snapshot.nodes.push(copy);

        assert!(matches!(
            GraphStore::restore(snapshot.clone()),
            Err(GraphError::ConstraintViolation { uid, .. }) if uid == "cat"
        ));

        snapshot.constraints.clear();
        assert_eq!(GraphStore::restore(snapshot).unwrap().node_count(), 1);
    }
}
