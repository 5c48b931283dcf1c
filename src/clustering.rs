//! Clustering consumer seam
//!
//! Training and inference happen outside this crate. Stages hand a consumer
//! the vector file and dictionary size; the consumer writes its model files
//! into the model directory and reports them back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::artifact::write_json_atomic;
use crate::vectors::{SparseVector, VectorKind};

#[derive(Error, Debug)]
#[error("Clustering failed: {0}")]
pub struct ClusteringError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusteringTask {
    ElbowMethod,
    SeedSelection,
    RunTraining,
    ValidationMetrics,
    RunTesting,
}

#[derive(Debug, Clone)]
pub struct ClusteringInput {
    pub task: ClusteringTask,
    pub model_name: String,
    pub vectors: PathBuf,
    pub kind: VectorKind,
    /// Vector dimension: the term dictionary size
    pub dimension: usize,
    /// Where the consumer writes model files
    pub model_dir: PathBuf,
    /// Encoded test text, for `RunTesting`
    pub test_vector: Option<SparseVector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusteringOutput {
    /// Files written under the model directory
    pub files: Vec<PathBuf>,
    pub summary: serde_json::Value,
}

#[async_trait]
pub trait ClusteringConsumer: Send + Sync {
    async fn run(&self, input: &ClusteringInput) -> Result<ClusteringOutput, ClusteringError>;
}

/// The model files produced by training, recorded so later runs can find
/// them without retraining
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub files: Vec<PathBuf>,
}

impl ModelManifest {
    pub fn write(&self, path: &Path, stage: &str) -> io::Result<PathBuf> {
        write_json_atomic(path, stage, self)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = ModelManifest {
            files: vec![dir.path().join("centroids.json")],
        };
        manifest.write(&path, "run-training").unwrap();
        assert_eq!(ModelManifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn test_task_names() {
        assert_eq!(
            serde_json::to_string(&ClusteringTask::ElbowMethod).unwrap(),
            "\"elbow-method\""
        );
    }
}
