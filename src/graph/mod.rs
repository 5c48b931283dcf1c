//! Embedded property graph
//!
//! The in-process store behind `EmbeddedGraph`:
//! - Nodes with one label, a uid and properties
//! - Directed, typed edges with weight properties
//! - Merge semantics: (label, uid) for nodes, (type, source, target) for edges

pub mod edge;
pub mod node;
pub mod property;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-export main types
pub use edge::Edge;
pub use node::Node;
pub use property::{PropertyMap, PropertyValue};
pub use snapshot::GraphSnapshot;
pub use store::{GraphError, GraphResult, GraphStore, MergeOutcome};
pub use types::{EdgeId, EdgeType, Label, NodeId};
