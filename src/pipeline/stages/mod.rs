//! Stage bodies
//!
//! Each stage reads the immutable run configuration through `StageContext`
//! and returns what it wrote in a `StageOutput`; no stage mutates shared
//! pipeline state.

mod graph;
mod model;
mod statistics;
mod text;

use indexmap::IndexMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::config::{PipelineParams, RunConfig};
use super::error::PipelineResult;
use super::stage::{Artifact, Stage};
use crate::artifact::ArtifactLayout;
use crate::blob::BlobStore;
use crate::bulk::{BulkTarget, BulkWriter};
use crate::client::GraphClient;
use crate::clustering::ClusteringConsumer;
use crate::graph::PropertyValue;
use crate::schema::RelationshipKind;
use crate::stats::StatisticsProvider;

/// Everything a stage may touch
pub(crate) struct StageContext<'a> {
    pub stage: Stage,
    pub config: &'a RunConfig,
    pub client: &'a GraphClient,
    pub blobs: &'a dyn BlobStore,
    pub stats: &'a dyn StatisticsProvider,
    pub clustering: Option<&'a dyn ClusteringConsumer>,
}

impl StageContext<'_> {
    pub fn params(&self) -> &PipelineParams {
        self.config.params()
    }

    pub fn layout(&self) -> &ArtifactLayout {
        self.config.layout()
    }

    /// Stage-scoped temp file tag
    pub fn tag(&self) -> &'static str {
        self.stage.name()
    }
}

/// Files a stage wrote and the counts it reports
#[derive(Debug, Clone, Default)]
pub(crate) struct StageOutput {
    pub outputs: Vec<PathBuf>,
    pub metrics: IndexMap<String, u64>,
}

impl StageOutput {
    pub fn metric(mut self, name: &str, value: impl TryInto<u64>) -> Self {
        self.metrics.insert(name.to_string(), value.try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn output(mut self, path: PathBuf) -> Self {
        self.outputs.push(path);
        self
    }
}

pub(crate) async fn run_stage(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    match ctx.stage {
        Stage::GraphDelete => graph::delete_graph(ctx).await,
        Stage::ConstraintCreate => graph::create_constraints(ctx).await,
        Stage::CorpusNodeCreate => graph::create_corpus_node(ctx).await,
        Stage::TextPreprocess => text::preprocess(ctx).await,
        Stage::CsvBuild => text::build_graph_csv(ctx).await,
        Stage::CsvUpload => graph::upload_group(ctx, CsvGroup::Graph).await,
        Stage::GraphBuild => graph::load_group(ctx, CsvGroup::Graph).await,
        Stage::DfBuild => statistics::build_df_csv(ctx).await,
        Stage::DfUpload => graph::upload_group(ctx, CsvGroup::Df).await,
        Stage::DfGraphBuild => graph::load_group(ctx, CsvGroup::Df).await,
        Stage::TfidfBuild => statistics::build_tfidf_csv(ctx).await,
        Stage::TfidfUpload => graph::upload_group(ctx, CsvGroup::Tfidf).await,
        Stage::TfidfGraphBuild => graph::load_group(ctx, CsvGroup::Tfidf).await,
        Stage::DictionaryBuild => model::build_dictionaries(ctx).await,
        Stage::TrainingVectorBuild | Stage::DfVectorBuild => model::build_vectors(ctx).await,
        Stage::ElbowMethod
        | Stage::SeedSelection
        | Stage::RunTraining
        | Stage::ValidationMetrics
        | Stage::RunTesting => model::run_clustering(ctx).await,
        Stage::ModelUpload => model::upload_model(ctx).await,
        Stage::TempCleanup => model::remove_temp_files(ctx).await,
    }
}

/// The bulk-load file families that travel together through one
/// build/upload/graph-build triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CsvGroup {
    Graph,
    Df,
    Tfidf,
}

impl CsvGroup {
    /// Member targets in load order
    pub fn targets(&self) -> Vec<BulkTarget> {
        match self {
            CsvGroup::Graph => BulkTarget::all()
                .filter(|t| {
                    !matches!(
                        t,
                        BulkTarget::Relationship(RelationshipKind::DocumentFrequency | RelationshipKind::Tfidf)
                    )
                })
                .collect(),
            CsvGroup::Df => vec![BulkTarget::Relationship(RelationshipKind::DocumentFrequency)],
            CsvGroup::Tfidf => vec![BulkTarget::Relationship(RelationshipKind::Tfidf)],
        }
    }

    pub fn for_artifact(artifact: Artifact) -> Option<CsvGroup> {
        match artifact {
            Artifact::GraphCsv | Artifact::GraphCsvUploaded => Some(CsvGroup::Graph),
            Artifact::DfCsv | Artifact::DfCsvUploaded => Some(CsvGroup::Df),
            Artifact::TfidfCsv | Artifact::TfidfCsvUploaded => Some(CsvGroup::Tfidf),
            _ => None,
        }
    }

    /// Whether `name` is a part of any member target
    pub fn owns_file(&self, name: &str) -> bool {
        self.targets().iter().any(|t| t.owns_file(name))
    }
}

/// One `BulkWriter` per member target, committed together
pub(crate) struct GroupWriter {
    writers: IndexMap<BulkTarget, BulkWriter>,
}

impl GroupWriter {
    pub fn new(group: CsvGroup, dir: &Path, tag: &str, max_records: usize) -> Self {
        let writers = group
            .targets()
            .into_iter()
            .map(|target| (target, BulkWriter::new(target, dir, tag, max_records)))
            .collect();
        Self { writers }
    }

    pub fn write(&mut self, target: BulkTarget, cells: &[PropertyValue]) -> PipelineResult<()> {
        if let Some(writer) = self.writers.get_mut(&target) {
            writer.write_row(cells)?;
        }
        Ok(())
    }

    /// Commit every target; rows per target go into the metrics
    pub fn finish(self, mut output: StageOutput) -> PipelineResult<StageOutput> {
        for (target, writer) in self.writers {
            output = output.metric(&target.base_file_name(), writer.rows());
            output.outputs.extend(writer.finish()?);
        }
        Ok(output)
    }
}

/// Files in `dir` with extension `ext`, sorted by name; absent dir is empty
pub(crate) fn list_files(dir: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .map_or(true, |n| n.to_string_lossy().starts_with('.'));
        if !hidden && path.is_file() && path.extension().map_or(false, |e| e == ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Where csv-build reads documents from
pub(crate) fn text_source_dir(config: &RunConfig) -> PathBuf {
    let text_dir = config.layout().text_dir();
    if text_dir.is_dir() {
        text_dir
    } else {
        config.params().corpus_dir.clone()
    }
}
