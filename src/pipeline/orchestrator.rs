//! Stage orchestrator
//!
//! Plans the enabled stages against the artifacts they need, then runs them
//! one at a time in catalogue order. Planning is all-or-nothing: if any
//! enabled stage needs an artifact that no earlier enabled stage produces
//! and that does not already exist, the run fails before a single stage
//! executes.

use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, Instrument};

use super::config::RunConfig;
use super::error::{PipelineError, PipelineResult};
use super::stage::{Artifact, Stage};
use super::stages::{self, list_files, text_source_dir, CsvGroup, StageContext};
use crate::blob::BlobStore;
use crate::bulk::list_parts;
use crate::client::GraphClient;
use crate::clustering::ClusteringConsumer;
use crate::dictionary::Dictionaries;
use crate::query::{Params, Query};
use crate::schema::RelationshipKind;
use crate::stats::StatisticsProvider;

/// Where a planned stage gets one of its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// Produced earlier in this run
    Upstream(Stage),
    /// Left by an earlier run
    Existing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStage {
    pub stage: Stage,
    pub inputs: Vec<(Artifact, InputSource)>,
}

/// The enabled stages, in execution order, with every input accounted for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub stages: Vec<PlannedStage>,
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, planned) in self.stages.iter().enumerate() {
            write!(f, "{:>2}. {}", index + 1, planned.stage)?;
            let inputs: Vec<String> = planned
                .inputs
                .iter()
                .map(|(artifact, source)| match source {
                    InputSource::Upstream(stage) => format!("{} <- {}", artifact, stage),
                    InputSource::Existing => format!("{} (existing)", artifact),
                })
                .collect();
            if !inputs.is_empty() {
                write!(f, "  [{}]", inputs.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// What one stage did
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    /// Artifact locations the stage wrote
    pub outputs: Vec<PathBuf>,
    pub metrics: IndexMap<String, u64>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<StageOutcome>,
}

impl RunReport {
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }
}

pub struct Orchestrator {
    config: RunConfig,
    client: GraphClient,
    blobs: Arc<dyn BlobStore>,
    stats: Arc<dyn StatisticsProvider>,
    clustering: Option<Arc<dyn ClusteringConsumer>>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        client: GraphClient,
        blobs: Arc<dyn BlobStore>,
        stats: Arc<dyn StatisticsProvider>,
    ) -> Self {
        Self {
            config,
            client,
            blobs,
            stats,
            clustering: None,
        }
    }

    pub fn with_clustering(mut self, consumer: Arc<dyn ClusteringConsumer>) -> Self {
        self.clustering = Some(consumer);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    /// Whether `artifact` exists right now
    pub async fn probe(&self, artifact: Artifact) -> PipelineResult<bool> {
        let layout = self.config.layout();
        let params = self.config.params();
        let found = match artifact {
            Artifact::CorpusFiles => !list_files(&params.corpus_dir, "json")?.is_empty(),
            Artifact::CorpusText => !list_files(&text_source_dir(&self.config), "txt")?.is_empty(),
            Artifact::GraphCsv | Artifact::DfCsv | Artifact::TfidfCsv => {
                let staging = layout.graph_staging_dir();
                let mut all = true;
                for target in group_of(artifact).targets() {
                    all &= !list_parts(target, &staging)?.is_empty();
                }
                all
            }
            Artifact::GraphCsvUploaded | Artifact::DfCsvUploaded | Artifact::TfidfCsvUploaded => {
                let blobs = self.blobs.list(&params.graph_container).await?;
                group_of(artifact)
                    .targets()
                    .iter()
                    .all(|t| blobs.iter().any(|name| t.owns_file(name)))
            }
            Artifact::GraphEdges => self.has_edges(RelationshipKind::TermFrequency).await?,
            Artifact::DfEdges => self.has_edges(RelationshipKind::DocumentFrequency).await?,
            Artifact::TfidfEdges => self.has_edges(RelationshipKind::Tfidf).await?,
            Artifact::Dictionaries => Dictionaries::exist(layout),
            Artifact::Vectors(kind) => layout.vectors(kind).is_file(),
            Artifact::ModelFiles => layout.clustering_manifest().is_file(),
        };
        Ok(found)
    }

    async fn has_edges(&self, relationship: RelationshipKind) -> PipelineResult<bool> {
        let records = self
            .client
            .run(
                &Query::CountRelationships {
                    relationship: Some(relationship),
                },
                &Params::new(),
            )
            .await?;
        Ok(records.iter().any(|r| r.get_i64("count").unwrap_or(0) > 0))
    }

    /// Resolve every enabled stage's inputs, or fail naming the first gap
    pub async fn plan(&self) -> PipelineResult<ExecutionPlan> {
        let params = self.config.params();
        let mut produced: BTreeMap<Artifact, Stage> = BTreeMap::new();
        let mut invalidated: BTreeSet<Artifact> = BTreeSet::new();
        let mut plan = ExecutionPlan::default();

        for &stage in self.config.stages() {
            let mut inputs = Vec::new();
            for artifact in stage.requires(params) {
                let source = if let Some(&upstream) = produced.get(&artifact) {
                    InputSource::Upstream(upstream)
                } else if !invalidated.contains(&artifact) && self.probe(artifact).await? {
                    InputSource::Existing
                } else {
                    return Err(PipelineError::MissingDependencyArtifact { stage, artifact });
                };
                inputs.push((artifact, source));
            }
            for artifact in stage.invalidates() {
                produced.remove(&artifact);
                invalidated.insert(artifact);
            }
            for artifact in stage.produces() {
                invalidated.remove(&artifact);
                produced.insert(artifact, stage);
            }
            plan.stages.push(PlannedStage { stage, inputs });
        }
        Ok(plan)
    }

    /// Plan, then execute every enabled stage in order. The first failure
    /// aborts the rest of the run.
    pub async fn run(&self) -> PipelineResult<RunReport> {
        let plan = self.plan().await?;
        info!(
            stages = plan.stages.len(),
            concurrency = self.client.concurrency(),
            "Starting pipeline run"
        );
        debug!("Execution plan:\n{}", plan);

        let mut report = RunReport::default();
        for planned in &plan.stages {
            let stage = planned.stage;
            if self.client.cancel_flag().is_cancelled() {
                return Err(PipelineError::Cancelled { stage });
            }

            // Inputs may have gone missing since planning
            for (artifact, _) in &planned.inputs {
                if !self.probe(*artifact).await? {
                    return Err(PipelineError::MissingDependencyArtifact {
                        stage,
                        artifact: *artifact,
                    });
                }
            }

            let ctx = StageContext {
                stage,
                config: &self.config,
                client: &self.client,
                blobs: self.blobs.as_ref(),
                stats: self.stats.as_ref(),
                clustering: self.clustering.as_deref(),
            };
            let started = Instant::now();
            let result = stages::run_stage(&ctx)
                .instrument(info_span!("stage", name = stage.name()))
                .await;
            let elapsed = started.elapsed();

            match result {
                Ok(output) => {
                    info!(
                        stage = stage.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        outputs = output.outputs.len(),
                        "Stage complete"
                    );
                    report.outcomes.push(StageOutcome {
                        stage,
                        outputs: output.outputs,
                        metrics: output.metrics,
                        elapsed,
                    });
                }
                Err(e) => {
                    error!(stage = stage.name(), error = %e, "Stage failed, aborting run");
                    return Err(e);
                }
            }
        }
        info!(stages = report.outcomes.len(), "Pipeline run complete");
        Ok(report)
    }
}

fn group_of(artifact: Artifact) -> CsvGroup {
    CsvGroup::for_artifact(artifact).unwrap_or(CsvGroup::Graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use crate::client::EmbeddedGraph;
    use crate::pipeline::config::PipelineParams;
    use crate::stats::SimpleStatistics;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir, stages: &[Stage]) -> Orchestrator {
        let params = PipelineParams {
            model_dir: dir.path().join("models"),
            data_dir: dir.path().join("data"),
            corpus_dir: dir.path().join("corpus"),
            blob_root: dir.path().join("blobs"),
            ..Default::default()
        };
        let config = RunConfig::new(stages.iter().copied(), params).unwrap();
        Orchestrator::new(
            config,
            GraphClient::new(Arc::new(EmbeddedGraph::new())),
            Arc::new(LocalBlobStore::new(dir.path().join("blobs"))),
            Arc::new(SimpleStatistics::new()),
        )
    }

    #[tokio::test]
    async fn test_plan_links_upstream_producers() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("corpus")).unwrap();
        std::fs::write(dir.path().join("corpus").join("doc1.txt"), "cat dog").unwrap();

        let plan = orchestrator(&dir, &[Stage::GraphBuild, Stage::CsvUpload, Stage::CsvBuild])
            .plan()
            .await
            .unwrap();

        let order: Vec<Stage> = plan.stages.iter().map(|p| p.stage).collect();
        assert_eq!(order, vec![Stage::CsvBuild, Stage::CsvUpload, Stage::GraphBuild]);
        assert_eq!(plan.stages[0].inputs, vec![(Artifact::CorpusText, InputSource::Existing)]);
        assert_eq!(
            plan.stages[2].inputs,
            vec![(Artifact::GraphCsvUploaded, InputSource::Upstream(Stage::CsvUpload))]
        );
    }

    #[tokio::test]
    async fn test_plan_rejects_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let err = orchestrator(&dir, &[Stage::DfBuild]).plan().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingDependencyArtifact {
                stage: Stage::DfBuild,
                artifact: Artifact::GraphEdges
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_first_stage() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir, &[Stage::ConstraintCreate]);
        orchestrator.client().cancel_flag().cancel();
        assert!(matches!(
            orchestrator.run().await,
            Err(PipelineError::Cancelled {
                stage: Stage::ConstraintCreate
            })
        ));
    }
}
