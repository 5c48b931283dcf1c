//! Pipeline configuration
//!
//! Loaded from YAML:
//!
//! ```yaml
//! stages:
//!   csv-build: true
//!   csv-upload: true
//! params:
//!   model_name: pubmed
//!   corpus_name: pubmed_2024
//!   term_selection:
//!     policy: avg_tfidf
//!     vocab_size: 5000
//! ```
//!
//! Missing stages are disabled; missing params take their defaults.
//! `RunConfig` is the validated, immutable form handed to every stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use super::stage::Stage;
use crate::artifact::ArtifactLayout;
use crate::vectors::VectorKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// How dictionary-build chooses the vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TermSelection {
    /// Top `vocab_size` terms by mean tfidf weight, ties by term
    AvgTfidf {
        #[serde(default = "default_vocab_size")]
        vocab_size: usize,
    },
    /// Every term node, in graph order
    All,
    /// Terms whose corpus document frequency lies in
    /// `[min_count, max_fraction * corpus size]`
    DocumentFrequency {
        #[serde(default = "default_min_count")]
        min_count: u64,
        #[serde(default = "default_max_fraction")]
        max_fraction: f64,
    },
}

impl Default for TermSelection {
    fn default() -> Self {
        TermSelection::AvgTfidf {
            vocab_size: default_vocab_size(),
        }
    }
}

fn default_vocab_size() -> usize {
    5000
}

fn default_min_count() -> u64 {
    1
}

fn default_max_fraction() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineParams {
    pub model_name: String,
    pub model_version: String,
    /// Model artifacts go under `<model_dir>/<model_version>/`
    pub model_dir: PathBuf,
    /// Scratch space for text, CSVs and downloads; removed by temp-cleanup
    pub data_dir: PathBuf,
    /// Raw corpus: `*.json` records, or `*.txt` documents
    pub corpus_dir: PathBuf,
    pub corpus_name: String,
    pub corpus_description: String,
    pub graph_container: String,
    pub model_container: String,
    /// Root directory of the local blob store
    pub blob_root: PathBuf,
    /// Embedded graph snapshot, loaded before and saved after each CLI run
    pub graph_snapshot: Option<PathBuf>,
    /// When set, logs are also written under `<log_dir>/<timestamp>/central.log`
    pub log_dir: Option<PathBuf>,
    /// 0 = no limit
    pub corpus_document_limit: usize,
    /// Rows per bulk-load file part; 0 = no split
    pub max_records_per_file: usize,
    pub query_batch_size: usize,
    pub vector_batch_size: usize,
    pub upsert_batch_size: usize,
    pub delete_batch_size: usize,
    /// Batches in flight per batched query
    pub concurrency: usize,
    pub term_selection: TermSelection,
    /// Vector kind handed to the clustering consumer
    pub training_vectors: VectorKind,
    pub overwrite_dictionaries: bool,
    /// Text encoded and sent to the consumer by run-testing
    pub test_text: Option<String>,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            model_name: "corpusgraph".to_string(),
            model_version: "v1".to_string(),
            model_dir: PathBuf::from("./models"),
            data_dir: PathBuf::from("./data"),
            corpus_dir: PathBuf::from("./corpus"),
            corpus_name: "corpus".to_string(),
            corpus_description: String::new(),
            graph_container: "graph".to_string(),
            model_container: "models".to_string(),
            blob_root: PathBuf::from("./blobs"),
            graph_snapshot: Some(PathBuf::from("./graph.json")),
            log_dir: None,
            corpus_document_limit: 0,
            max_records_per_file: 250_000,
            query_batch_size: 1000,
            vector_batch_size: 1000,
            upsert_batch_size: 1000,
            delete_batch_size: 10_000,
            concurrency: 4,
            term_selection: TermSelection::default(),
            training_vectors: VectorKind::Tfidf,
            overwrite_dictionaries: false,
            test_text: None,
        }
    }
}

/// Configuration as written in the file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub stages: BTreeMap<String, bool>,
    #[serde(default)]
    pub params: PipelineParams,
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Validate and freeze
    pub fn into_run_config(self) -> ConfigResult<RunConfig> {
        let mut enabled = Vec::new();
        for (name, on) in &self.stages {
            let stage = Stage::from_name(name).ok_or_else(|| ConfigError::UnknownStage(name.clone()))?;
            if *on {
                enabled.push(stage);
            }
        }
        RunConfig::new(enabled, self.params)
    }
}

/// Validated run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Enabled stages, in catalogue order
    stages: Vec<Stage>,
    params: PipelineParams,
    layout: ArtifactLayout,
}

impl RunConfig {
    pub fn new(enabled: impl IntoIterator<Item = Stage>, params: PipelineParams) -> ConfigResult<Self> {
        validate(&params)?;
        let mut stages: Vec<Stage> = enabled.into_iter().collect();
        stages.sort();
        stages.dedup();

        if stages.contains(&Stage::RunTesting) && params.test_text.is_none() {
            return Err(ConfigError::Invalid("run-testing needs params.test_text".to_string()));
        }

        let layout = ArtifactLayout::new(
            params.model_name.clone(),
            &params.model_version,
            &params.model_dir,
            params.data_dir.clone(),
        );
        Ok(Self { stages, params, layout })
    }

    /// Same parameters, only `stages` enabled
    pub fn with_only(self, stages: impl IntoIterator<Item = Stage>) -> ConfigResult<Self> {
        Self::new(stages, self.params)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }
}

fn validate(params: &PipelineParams) -> ConfigResult<()> {
    let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

    for (name, value) in [
        ("model_name", &params.model_name),
        ("model_version", &params.model_version),
        ("corpus_name", &params.corpus_name),
        ("graph_container", &params.graph_container),
        ("model_container", &params.model_container),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
        }
    }
    for (name, value) in [
        ("query_batch_size", params.query_batch_size),
        ("vector_batch_size", params.vector_batch_size),
        ("upsert_batch_size", params.upsert_batch_size),
        ("delete_batch_size", params.delete_batch_size),
        ("concurrency", params.concurrency),
    ] {
        if value == 0 {
            return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
        }
    }
    // temp-cleanup removes data_dir recursively
    if lexical(&params.model_dir).starts_with(lexical(&params.data_dir)) {
        return invalid("model_dir must not be inside data_dir");
    }
    match &params.term_selection {
        TermSelection::AvgTfidf { vocab_size: 0 } => invalid("term_selection.vocab_size must be at least 1"),
        TermSelection::DocumentFrequency { max_fraction, .. } if !(*max_fraction > 0.0 && *max_fraction <= 1.0) => {
            invalid("term_selection.max_fraction must be in (0, 1]")
        }
        _ => Ok(()),
    }
}

/// Absolute form without `.` components; no filesystem access
fn lexical(path: &Path) -> PathBuf {
    let path = match std::env::current_dir() {
        Ok(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    };
    path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
stages:
  tfidf-graph-build: true
  csv-build: true
  graph-delete: false
params:
  model_name: pubmed
  corpus_name: corpusA
  term_selection:
    policy: document_frequency
    min_count: 2
  training_vectors: document_frequency
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap().into_run_config().unwrap();

        assert_eq!(config.stages(), &[Stage::CsvBuild, Stage::TfidfGraphBuild]);
        assert!(!config.is_enabled(Stage::GraphDelete));
        assert_eq!(config.params().model_name, "pubmed");
        assert_eq!(config.params().query_batch_size, 1000);
        assert_eq!(
            config.params().term_selection,
            TermSelection::DocumentFrequency { min_count: 2, max_fraction: 1.0 }
        );
        assert_eq!(config.params().training_vectors, VectorKind::DocumentFrequency);
    }

    #[test]
    fn test_example_config_parses() {
        let config = PipelineConfig::from_yaml_str(include_str!("../../pipeline.example.yaml"))
            .unwrap()
            .into_run_config()
            .unwrap();
        assert_eq!(config.stages().first(), Some(&Stage::ConstraintCreate));
        assert_eq!(config.stages().last(), Some(&Stage::TrainingVectorBuild));
        assert_eq!(config.params().log_dir, Some(PathBuf::from("./logs")));
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let config = PipelineConfig::from_yaml_str("stages:\n  tfidf-graph-bulid: true\n").unwrap();
        assert!(matches!(
            config.into_run_config(),
            Err(ConfigError::UnknownStage(name)) if name == "tfidf-graph-bulid"
        ));
    }

    #[test]
    fn test_unknown_param_rejected() {
        assert!(PipelineConfig::from_yaml_str("params:\n  batch_sise: 10\n").is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let params = PipelineParams {
            query_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(RunConfig::new(Vec::<Stage>::new(), params), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_model_dir_inside_data_dir_rejected() {
        for model_dir in ["./data/models", "data", "./data/./v1"] {
            let params = PipelineParams {
                data_dir: PathBuf::from("./data"),
                model_dir: PathBuf::from(model_dir),
                ..Default::default()
            };
            assert!(
                matches!(RunConfig::new(Vec::<Stage>::new(), params), Err(ConfigError::Invalid(_))),
                "{} accepted",
                model_dir
            );
        }

        let sibling = PipelineParams {
            data_dir: PathBuf::from("./data"),
            model_dir: PathBuf::from("./data_models"),
            ..Default::default()
        };
        assert!(RunConfig::new(Vec::<Stage>::new(), sibling).is_ok());
    }

    #[test]
    fn test_run_testing_needs_text() {
        assert!(RunConfig::new([Stage::RunTesting], PipelineParams::default()).is_err());
        let params = PipelineParams {
            test_text: Some("cats and dogs".to_string()),
            ..Default::default()
        };
        assert!(RunConfig::new([Stage::RunTesting], params).is_ok());
    }

    #[test]
    fn test_with_only_overrides_stages() {
        let config = RunConfig::new([Stage::CsvBuild, Stage::GraphBuild], PipelineParams::default())
            .unwrap()
            .with_only([Stage::DictionaryBuild])
            .unwrap();
        assert_eq!(config.stages(), &[Stage::DictionaryBuild]);
    }
}
