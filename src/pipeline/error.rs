use std::path::PathBuf;
use thiserror::Error;

use super::config::ConfigError;
use super::stage::{Artifact, Stage};
use crate::blob::BlobError;
use crate::bulk::BulkError;
use crate::clustering::ClusteringError;
use crate::dictionary::DictionaryError;
use crate::query::QueryError;
use crate::vectors::MaterializeError;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage {stage} needs {artifact}, which no enabled upstream stage produces and none exists")]
    MissingDependencyArtifact { stage: Stage, artifact: Artifact },

    #[error("Stage {stage} needs a clustering consumer, none is configured")]
    ClusteringUnavailable { stage: Stage },

    #[error("Dictionaries already exist at {path}; set overwrite_dictionaries to rebuild")]
    DictionaryExists { path: PathBuf },

    #[error("Run cancelled before stage {stage}")]
    Cancelled { stage: Stage },

    #[error("{path}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),

    #[error("Vector error: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("Bulk file error: {0}")]
    Bulk(#[from] BulkError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Clustering(#[from] ClusteringError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
