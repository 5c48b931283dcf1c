//! Batched graph query client
//!
//! All graph I/O goes through `GraphClient`, which adds retry of transient
//! failures and IN-list batching on top of a `GraphBackend`.

pub mod backend;
pub mod retry;

pub use backend::{EmbeddedGraph, GraphBackend};
pub use retry::RetryPolicy;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::graph::PropertyValue;
use crate::query::{Params, Query, QueryError, QueryResult, Record};

/// Default number of batches in flight
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Cooperative cancellation, checked between batches
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct GraphClient {
    backend: Arc<dyn GraphBackend>,
    retry: RetryPolicy,
    concurrency: usize,
    cancel: CancelFlag,
}

impl GraphClient {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Execute one query, retrying transient failures with backoff
    pub async fn run(&self, query: &Query, params: &Params) -> QueryResult<Vec<Record>> {
        let mut attempt = 1;
        loop {
            match self.backend.execute(query, params).await {
                Ok(records) => return Ok(records),
                Err(e) if e.is_retryable() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(QueryError::RetriesExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        query = query.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient graph error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute `query` once per chunk of at most `batch_size` ids, each chunk
    /// bound to `$batch`.
    ///
    /// Chunks run through a window of `concurrency` in-flight queries; rows
    /// come out in chunk order. The cancel flag is checked before each chunk.
    pub fn run_batched<'a>(
        &'a self,
        ids: Vec<PropertyValue>,
        batch_size: usize,
        query: &'a Query,
        params: &'a Params,
    ) -> QueryResult<BoxStream<'a, QueryResult<Record>>> {
        if batch_size == 0 {
            return Err(QueryError::InvalidBatchSize);
        }

        let chunks: Vec<Vec<PropertyValue>> = ids.chunks(batch_size).map(<[_]>::to_vec).collect();
        let total = chunks.len();

        let stream = stream::iter(chunks.into_iter().enumerate())
            .map(move |(index, chunk)| async move {
                if self.cancel.is_cancelled() {
                    return Err(QueryError::Cancelled);
                }
                let mut batch_params = params.clone();
                batch_params.insert("batch".to_string(), PropertyValue::List(chunk));
                debug!(query = query.name(), batch = index + 1, total, "Running batch");
                self.run(query, &batch_params).await
            })
            .buffered(self.concurrency)
            .flat_map(|result| match result {
                Ok(records) => stream::iter(records.into_iter().map(Ok).collect::<Vec<_>>()),
                Err(e) => stream::iter(vec![Err(e)]),
            });

        Ok(stream.boxed())
    }

    /// `run_batched`, collected; stops at the first failed batch
    pub async fn collect_batched(
        &self,
        ids: Vec<PropertyValue>,
        batch_size: usize,
        query: &Query,
        params: &Params,
    ) -> QueryResult<Vec<Record>> {
        self.run_batched(ids, batch_size, query, params)?
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Fails with `Transient` for the first `failures` calls
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GraphBackend for Flaky {
        async fn execute(&self, _query: &Query, _params: &Params) -> QueryResult<Vec<Record>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(QueryError::Transient("lock timeout".to_string()))
            } else {
                Ok(vec![Record::new().with("count", 1i64)])
            }
        }
    }

    /// Echoes each `$batch` entry back as a row
    struct Echo;

    #[async_trait]
    impl GraphBackend for Echo {
        async fn execute(&self, _query: &Query, params: &Params) -> QueryResult<Vec<Record>> {
            let batch = params.get("batch").and_then(|b| b.as_list()).unwrap_or(&[]);
            Ok(batch.iter().map(|v| Record::new().with("id", v.clone())).collect())
        }
    }

    fn ids(n: i64) -> Vec<PropertyValue> {
        (0..n).map(PropertyValue::Integer).collect()
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let backend = Arc::new(Flaky { failures: 2, calls: AtomicUsize::new(0) });
        let client = GraphClient::new(backend.clone()).with_retry(RetryPolicy::immediate(4));

        let records = client.run(&Query::CountConstraints, &Params::new()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let backend = Arc::new(Flaky { failures: 10, calls: AtomicUsize::new(0) });
        let client = GraphClient::new(backend).with_retry(RetryPolicy::immediate(3));

        let err = client.run(&Query::CountConstraints, &Params::new()).await.unwrap_err();
        assert!(matches!(err, QueryError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_batched_rows_keep_chunk_order() {
        let client = GraphClient::new(Arc::new(Echo)).with_concurrency(3);
        let query = Query::NodeUids { node: crate::schema::NodeKind::Term };

        let rows = client.collect_batched(ids(10), 3, &query, &Params::new()).await.unwrap();
        let seen: Vec<i64> = rows.iter().filter_map(|r| r.get_i64("id")).collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let client = GraphClient::new(Arc::new(Echo));
        let query = Query::CountConstraints;
        let params = Params::new();
        assert!(matches!(
            client.run_batched(ids(3), 0, &query, &params),
            Err(QueryError::InvalidBatchSize)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let cancel = CancelFlag::new();
        let client = GraphClient::new(Arc::new(Echo)).with_cancel_flag(cancel.clone());
        cancel.cancel();

        let err = client
            .collect_batched(ids(5), 2, &Query::CountConstraints, &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::Cancelled);
    }
}
