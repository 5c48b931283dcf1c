//! Query error taxonomy

use crate::graph::GraphError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Store unreachable; fatal for the run
    #[error("Graph unavailable: {0}")]
    GraphUnavailable(String),

    /// Malformed query or parameters; indicates a registry or caller bug
    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    /// Timeout or lock contention; safe to retry
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    #[error("Query cancelled")]
    Cancelled,

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

impl QueryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Transient(_))
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
