//! Graph backend seam and the in-process implementation

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::graph::GraphStore;
use crate::query::{Params, Query, QueryEngine, QueryResult, Record};

/// A property-graph store reachable through parameterized queries.
///
/// Implemented by:
/// - `EmbeddedGraph`: in-process store, no network
///
/// Implementations report unreachable stores as `GraphUnavailable` and
/// timeouts or lock contention as `Transient`.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn execute(&self, query: &Query, params: &Params) -> QueryResult<Vec<Record>>;
}

/// In-process backend wrapping a `GraphStore` directly.
///
/// Reads share the lock; merges and deletes take it exclusively, so
/// concurrent batches of idempotent upserts serialize safely.
#[derive(Clone)]
pub struct EmbeddedGraph {
    store: Arc<RwLock<GraphStore>>,
    engine: QueryEngine,
}

impl EmbeddedGraph {
    /// Create a backend over a fresh empty store
    pub fn new() -> Self {
        Self::with_store(Arc::new(RwLock::new(GraphStore::new())))
    }

    /// Create a backend wrapping an existing store
    pub fn with_store(store: Arc<RwLock<GraphStore>>) -> Self {
        Self {
            store,
            engine: QueryEngine::new(),
        }
    }

    pub fn store(&self) -> &Arc<RwLock<GraphStore>> {
        &self.store
    }

    /// Acquire a read lock on the store for direct inspection
    pub async fn store_read(&self) -> tokio::sync::RwLockReadGuard<'_, GraphStore> {
        self.store.read().await
    }
}

impl Default for EmbeddedGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphBackend for EmbeddedGraph {
    async fn execute(&self, query: &Query, params: &Params) -> QueryResult<Vec<Record>> {
        if query.is_read_only() {
            let store = self.store.read().await;
            self.engine.execute(query, params, &store)
        } else {
            let mut store = self.store.write().await;
            self.engine.execute_mutation(query, params, &mut store)
        }
    }
}
