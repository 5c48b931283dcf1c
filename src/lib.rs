//! Corpusgraph
//!
//! A graph-backed TF-IDF pipeline: corpus text becomes a term/document
//! property graph, frequency statistics become weighted edges inside that
//! graph, and the edges are extracted into sparse per-document vectors for
//! an external clustering step.
//!
//! # Architecture
//!
//! - `graph`: in-process property graph store (nodes, edges, uid indices)
//! - `schema`: registry of node and relationship types and their bulk files
//! - `query`: typed, parameterized query catalogue and its executor
//! - `client`: retrying, batching client over a `GraphBackend`
//! - `bulk`: bulk-load CSV writing and reading
//! - `dictionary`: term and document integer dictionaries
//! - `vectors`: sparse vector materialization
//! - `pipeline`: stage catalogue, configuration and orchestrator
//!
//! Tokenization (`stats`), blob storage (`blob`) and clustering
//! (`clustering`) sit behind traits with simple local implementations.
//!
//! ## Example Usage
//!
//! ```rust
//! use corpusgraph::graph::{GraphStore, Label, PropertyMap};
//!
//! let mut store = GraphStore::new();
//! let (doc, _) = store.merge_node("document", "doc1", PropertyMap::new()).unwrap();
//! let (term, _) = store.merge_node("term", "cat", PropertyMap::new()).unwrap();
//! store.merge_edge(term, doc, "term_frequency", PropertyMap::new()).unwrap();
//!
//! assert_eq!(store.find_node(&Label::new("term"), "cat").map(|n| n.id), Some(term));
//! assert_eq!(store.edge_count(), 1);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod blob;
pub mod bulk;
pub mod client;
pub mod clustering;
pub mod dictionary;
pub mod graph;
pub mod pipeline;
pub mod query;
pub mod schema;
pub mod stats;
pub mod vectors;

// Re-export main types for convenience
pub use graph::{
    Edge, EdgeId, EdgeType, GraphError, GraphResult, GraphStore, Label, Node, NodeId,
    PropertyMap, PropertyValue,
};

pub use query::{Params, Query, QueryEngine, QueryError, QueryResult, Record};

pub use client::{CancelFlag, EmbeddedGraph, GraphBackend, GraphClient, RetryPolicy};

pub use schema::{NodeKind, RelationshipKind};

pub use dictionary::{Dictionaries, Dictionary, DictionaryError};

pub use vectors::{SparseVector, VectorKind, VectorMaterializer};

pub use blob::{BlobStore, LocalBlobStore};

pub use stats::{SimpleStatistics, StatisticsProvider};

pub use clustering::{ClusteringConsumer, ClusteringInput, ClusteringOutput, ClusteringTask};

pub use pipeline::{
    Orchestrator, PipelineConfig, PipelineError, PipelineParams, PipelineResult, RunConfig, Stage,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
