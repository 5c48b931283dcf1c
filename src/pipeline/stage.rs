//! Stage catalogue
//!
//! The fixed, ordered set of pipeline stages and the artifacts each one
//! consumes and produces. Declaration order is execution order.

use std::fmt;

use super::config::{PipelineParams, TermSelection};
use crate::clustering::ClusteringTask;
use crate::vectors::VectorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    GraphDelete,
    ConstraintCreate,
    CorpusNodeCreate,
    TextPreprocess,
    CsvBuild,
    CsvUpload,
    GraphBuild,
    DfBuild,
    DfUpload,
    DfGraphBuild,
    TfidfBuild,
    TfidfUpload,
    TfidfGraphBuild,
    DictionaryBuild,
    TrainingVectorBuild,
    DfVectorBuild,
    ElbowMethod,
    SeedSelection,
    RunTraining,
    ValidationMetrics,
    RunTesting,
    ModelUpload,
    TempCleanup,
}

/// Something a stage leaves behind for later stages, on disk, in blob
/// storage or in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    /// Raw `*.json` corpus records
    CorpusFiles,
    /// One `*.txt` file per document
    CorpusText,
    GraphCsv,
    GraphCsvUploaded,
    /// Documents, terms and their frequency edges
    GraphEdges,
    DfCsv,
    DfCsvUploaded,
    DfEdges,
    TfidfCsv,
    TfidfCsvUploaded,
    TfidfEdges,
    Dictionaries,
    Vectors(VectorKind),
    /// Files written by the clustering consumer's training run
    ModelFiles,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::CorpusFiles => "corpus-files",
            Artifact::CorpusText => "corpus-text",
            Artifact::GraphCsv => "graph-csv",
            Artifact::GraphCsvUploaded => "graph-csv-uploaded",
            Artifact::GraphEdges => "graph-edges",
            Artifact::DfCsv => "df-csv",
            Artifact::DfCsvUploaded => "df-csv-uploaded",
            Artifact::DfEdges => "df-edges",
            Artifact::TfidfCsv => "tfidf-csv",
            Artifact::TfidfCsvUploaded => "tfidf-csv-uploaded",
            Artifact::TfidfEdges => "tfidf-edges",
            Artifact::Dictionaries => "dictionaries",
            Artifact::Vectors(kind) => return write!(f, "{}-vectors", kind.file_tag()),
            Artifact::ModelFiles => "model-files",
        };
        f.write_str(name)
    }
}

impl Stage {
    pub const ALL: [Stage; 23] = [
        Stage::GraphDelete,
        Stage::ConstraintCreate,
        Stage::CorpusNodeCreate,
        Stage::TextPreprocess,
        Stage::CsvBuild,
        Stage::CsvUpload,
        Stage::GraphBuild,
        Stage::DfBuild,
        Stage::DfUpload,
        Stage::DfGraphBuild,
        Stage::TfidfBuild,
        Stage::TfidfUpload,
        Stage::TfidfGraphBuild,
        Stage::DictionaryBuild,
        Stage::TrainingVectorBuild,
        Stage::DfVectorBuild,
        Stage::ElbowMethod,
        Stage::SeedSelection,
        Stage::RunTraining,
        Stage::ValidationMetrics,
        Stage::RunTesting,
        Stage::ModelUpload,
        Stage::TempCleanup,
    ];

    /// Configuration key
    pub fn name(&self) -> &'static str {
        match self {
            Stage::GraphDelete => "graph-delete",
            Stage::ConstraintCreate => "constraint-create",
            Stage::CorpusNodeCreate => "corpus-node-create",
            Stage::TextPreprocess => "text-preprocess",
            Stage::CsvBuild => "csv-build",
            Stage::CsvUpload => "csv-upload",
            Stage::GraphBuild => "graph-build",
            Stage::DfBuild => "df-build",
            Stage::DfUpload => "df-upload",
            Stage::DfGraphBuild => "df-graph-build",
            Stage::TfidfBuild => "tfidf-build",
            Stage::TfidfUpload => "tfidf-upload",
            Stage::TfidfGraphBuild => "tfidf-graph-build",
            Stage::DictionaryBuild => "dictionary-build",
            Stage::TrainingVectorBuild => "training-vector-build",
            Stage::DfVectorBuild => "df-vector-build",
            Stage::ElbowMethod => "elbow-method",
            Stage::SeedSelection => "seed-selection",
            Stage::RunTraining => "run-training",
            Stage::ValidationMetrics => "validation-metrics",
            Stage::RunTesting => "run-testing",
            Stage::ModelUpload => "model-upload",
            Stage::TempCleanup => "temp-cleanup",
        }
    }

    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Artifacts that must exist before the stage runs
    pub fn requires(&self, params: &PipelineParams) -> Vec<Artifact> {
        use Artifact::*;
        match self {
            Stage::GraphDelete | Stage::ConstraintCreate | Stage::CorpusNodeCreate | Stage::TempCleanup => vec![],
            Stage::TextPreprocess => vec![CorpusFiles],
            Stage::CsvBuild => vec![CorpusText],
            Stage::CsvUpload => vec![GraphCsv],
            Stage::GraphBuild => vec![GraphCsvUploaded],
            Stage::DfBuild => vec![GraphEdges],
            Stage::DfUpload => vec![DfCsv],
            Stage::DfGraphBuild => vec![DfCsvUploaded],
            Stage::TfidfBuild => vec![DfEdges],
            Stage::TfidfUpload => vec![TfidfCsv],
            Stage::TfidfGraphBuild => vec![TfidfCsvUploaded],
            Stage::DictionaryBuild => match params.term_selection {
                TermSelection::AvgTfidf { .. } => vec![TfidfEdges],
                TermSelection::All => vec![GraphEdges],
                TermSelection::DocumentFrequency { .. } => vec![DfEdges],
            },
            Stage::TrainingVectorBuild => vec![Dictionaries, TfidfEdges],
            Stage::DfVectorBuild => vec![Dictionaries, GraphEdges],
            Stage::ElbowMethod | Stage::SeedSelection | Stage::RunTraining => {
                vec![Dictionaries, Vectors(params.training_vectors)]
            }
            Stage::ValidationMetrics | Stage::RunTesting | Stage::ModelUpload => vec![Dictionaries, ModelFiles],
        }
    }

    /// Artifacts the stage leaves behind on success
    pub fn produces(&self) -> Vec<Artifact> {
        use Artifact::*;
        match self {
            Stage::TextPreprocess => vec![CorpusText],
            Stage::CsvBuild => vec![GraphCsv],
            Stage::CsvUpload => vec![GraphCsvUploaded],
            Stage::GraphBuild => vec![GraphEdges],
            Stage::DfBuild => vec![DfCsv],
            Stage::DfUpload => vec![DfCsvUploaded],
            Stage::DfGraphBuild => vec![DfEdges],
            Stage::TfidfBuild => vec![TfidfCsv],
            Stage::TfidfUpload => vec![TfidfCsvUploaded],
            Stage::TfidfGraphBuild => vec![TfidfEdges],
            Stage::DictionaryBuild => vec![Dictionaries],
            Stage::TrainingVectorBuild => vec![Vectors(VectorKind::Tfidf)],
            Stage::DfVectorBuild => vec![Vectors(VectorKind::DocumentFrequency)],
            Stage::RunTraining => vec![ModelFiles],
            _ => vec![],
        }
    }

    /// Artifacts the stage destroys, or leaves stale
    pub fn invalidates(&self) -> Vec<Artifact> {
        use Artifact::*;
        match self {
            Stage::GraphDelete => vec![GraphEdges, DfEdges, TfidfEdges],
            // Vector indices are dictionary ids
            Stage::DictionaryBuild => vec![
                Vectors(VectorKind::Tfidf),
                Vectors(VectorKind::DocumentFrequency),
                ModelFiles,
            ],
            Stage::TempCleanup => vec![CorpusText, GraphCsv, DfCsv, TfidfCsv],
            _ => vec![],
        }
    }

    /// The consumer task a clustering stage hands off to
    pub fn clustering_task(&self) -> Option<ClusteringTask> {
        match self {
            Stage::ElbowMethod => Some(ClusteringTask::ElbowMethod),
            Stage::SeedSelection => Some(ClusteringTask::SeedSelection),
            Stage::RunTraining => Some(ClusteringTask::RunTraining),
            Stage::ValidationMetrics => Some(ClusteringTask::ValidationMetrics),
            Stage::RunTesting => Some(ClusteringTask::RunTesting),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
