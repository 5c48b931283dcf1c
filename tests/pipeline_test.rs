//! End-to-end pipeline runs over a small on-disk corpus and the embedded graph

use async_trait::async_trait;
use corpusgraph::artifact::ArtifactLayout;
use corpusgraph::clustering::{ClusteringError, ModelManifest};
use corpusgraph::graph::{GraphSnapshot, GraphStore};
use corpusgraph::pipeline::{Artifact, InputSource, TermSelection};
use corpusgraph::vectors::read_vectors;
use corpusgraph::{
    BlobStore, ClusteringConsumer, ClusteringInput, ClusteringOutput, ClusteringTask, Dictionaries, DictionaryError,
    EmbeddedGraph, GraphClient, LocalBlobStore, Orchestrator, PipelineError, PipelineParams, RunConfig,
    SimpleStatistics, Stage, VectorKind,
};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::RwLock;

/// Three usable records and one without a pmid
const RECORDS: &str = r#"[
    {"pmid": 1, "title": "cat cat", "abstract": "dog"},
    {"pmid": "2", "title": "dog", "abstract": "bird"},
    {"pmid": 3, "title": "fish cat"},
    {"title": "no identifier here"}
]"#;

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let corpus = dir.path().join("corpus");
    fs::create_dir_all(&corpus).unwrap();
    fs::write(corpus.join("records.json"), RECORDS).unwrap();
    dir
}

fn params(dir: &TempDir) -> PipelineParams {
    PipelineParams {
        model_name: "test".to_string(),
        model_dir: dir.path().join("models"),
        data_dir: dir.path().join("data"),
        corpus_dir: dir.path().join("corpus"),
        corpus_name: "corpusA".to_string(),
        blob_root: dir.path().join("blobs"),
        graph_snapshot: None,
        // Small enough to split bulk files and batch every query
        max_records_per_file: 2,
        query_batch_size: 2,
        vector_batch_size: 2,
        upsert_batch_size: 2,
        ..Default::default()
    }
}

fn layout(params: &PipelineParams) -> ArtifactLayout {
    RunConfig::new(Vec::<Stage>::new(), params.clone()).unwrap().layout().clone()
}

fn orchestrator(graph: &EmbeddedGraph, params: PipelineParams, stages: &[Stage]) -> Orchestrator {
    let blobs = Arc::new(LocalBlobStore::new(&params.blob_root));
    let config = RunConfig::new(stages.iter().copied(), params).unwrap();
    Orchestrator::new(
        config,
        GraphClient::new(Arc::new(graph.clone())),
        blobs,
        Arc::new(SimpleStatistics::new()),
    )
}

/// Catalogue stages from the first up to and including `last`
fn through(last: Stage) -> Vec<Stage> {
    Stage::ALL.into_iter().filter(|s| *s <= last).collect()
}

async fn counts(graph: &EmbeddedGraph) -> (usize, usize) {
    let store = graph.store_read().await;
    (store.node_count(), store.edge_count())
}

/// Records every input it is handed; training writes one model file
#[derive(Default)]
struct RecordingConsumer {
    seen: Mutex<Vec<ClusteringInput>>,
}

#[async_trait]
impl ClusteringConsumer for RecordingConsumer {
    async fn run(&self, input: &ClusteringInput) -> Result<ClusteringOutput, ClusteringError> {
        self.seen.lock().unwrap().push(input.clone());
        let mut files = Vec::new();
        if input.task == ClusteringTask::RunTraining {
            let path = input.model_dir.join(format!("{}_kmeans.json", input.model_name));
            fs::write(&path, r#"{"k": 2}"#).map_err(|e| ClusteringError(e.to_string()))?;
            files.push(path);
        }
        Ok(ClusteringOutput {
            files,
            summary: serde_json::json!({"task": format!("{:?}", input.task)}),
        })
    }
}

#[tokio::test]
async fn test_full_run_writes_dictionaries_and_vectors() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    let mut stages = through(Stage::DfVectorBuild);
    stages.push(Stage::TempCleanup);

    let report = orchestrator(&graph, params.clone(), &stages).run().await.unwrap();
    assert_eq!(report.outcomes.len(), stages.len());

    let preprocess = report.outcome(Stage::TextPreprocess).unwrap();
    assert_eq!(preprocess.metrics["documents"], 3);
    assert_eq!(preprocess.metrics["skipped"], 1);

    // bird and fish tie on mean weight and sort by term
    let layout = layout(&params);
    let dicts = Dictionaries::load(&layout).unwrap();
    assert_eq!(dicts.terms.keys().collect::<Vec<_>>(), vec!["bird", "fish", "cat", "dog"]);
    assert_eq!(dicts.documents.len(), 3);

    {
        let store = graph.store_read().await;
        assert_eq!(store.get_edges_by_type(&"tfidf".into()).len(), 6);
        assert_eq!(store.get_edges_by_type(&"document_frequency".into()).len(), 4);
    }

    let idf = 1.5f64.ln();
    let tfidf = read_vectors(&layout.vectors(VectorKind::Tfidf)).unwrap();
    assert_eq!(tfidf.len(), 3);
    assert!(tfidf.windows(2).all(|w| w[0].document_id < w[1].document_id));
    let doc1 = dicts.documents.id("1").unwrap();
    let vector = &tfidf.iter().find(|v| v.document_id == doc1).unwrap().tfidf_vector;
    assert_eq!(vector.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
    assert!((vector[&2] - 2.0 / 3.0 * idf).abs() < 1e-9);
    assert!((vector[&3] - 1.0 / 3.0 * idf).abs() < 1e-9);

    let df = read_vectors(&layout.vectors(VectorKind::DocumentFrequency)).unwrap();
    let vector = &df.iter().find(|v| v.document_id == doc1).unwrap().tfidf_vector;
    assert_eq!(vector.get(&2), Some(&2.0));
    assert_eq!(vector.get(&3), Some(&1.0));

    assert!(!params.data_dir.exists());
}

#[tokio::test]
async fn test_missing_upload_fails_before_mutating_graph() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    orchestrator(&graph, params.clone(), &through(Stage::DfGraphBuild))
        .run()
        .await
        .unwrap();
    let before = counts(&graph).await;

    let err = orchestrator(&graph, params, &[Stage::TfidfGraphBuild])
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::MissingDependencyArtifact {
            stage: Stage::TfidfGraphBuild,
            artifact: Artifact::TfidfCsvUploaded
        }
    ));
    assert_eq!(counts(&graph).await, before);
}

#[tokio::test]
async fn test_failed_plan_runs_nothing() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);

    let err = orchestrator(&graph, params.clone(), &[Stage::TextPreprocess, Stage::DfBuild])
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::MissingDependencyArtifact { stage: Stage::DfBuild, .. }));
    assert!(!layout(&params).text_dir().exists());
}

#[tokio::test]
async fn test_graph_build_is_idempotent() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    orchestrator(&graph, params.clone(), &through(Stage::GraphBuild))
        .run()
        .await
        .unwrap();
    let before = counts(&graph).await;

    let report = orchestrator(&graph, params, &[Stage::GraphBuild]).run().await.unwrap();

    let outcome = report.outcome(Stage::GraphBuild).unwrap();
    assert_eq!(outcome.metrics["created"], 0);
    assert_eq!(outcome.metrics["missing"], 0);
    assert!(outcome.metrics["merged"] > 0);
    assert_eq!(counts(&graph).await, before);
}

#[tokio::test]
async fn test_graph_delete_invalidates_edges_for_later_stages() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    orchestrator(&graph, params.clone(), &through(Stage::GraphBuild))
        .run()
        .await
        .unwrap();

    // Edges exist now, but graph-delete runs first
    let err = orchestrator(&graph, params, &[Stage::GraphDelete, Stage::DfBuild])
        .plan()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::MissingDependencyArtifact {
            stage: Stage::DfBuild,
            artifact: Artifact::GraphEdges
        }
    ));
}

#[tokio::test]
async fn test_empty_vocabulary_writes_no_dictionaries() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = PipelineParams {
        term_selection: TermSelection::DocumentFrequency {
            min_count: 10,
            max_fraction: 1.0,
        },
        ..params(&dir)
    };
    let mut stages = through(Stage::DfGraphBuild);
    stages.push(Stage::DictionaryBuild);

    let err = orchestrator(&graph, params.clone(), &stages).run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Dictionary(DictionaryError::EmptyVocabulary)));
    for path in layout(&params).dictionary_files() {
        assert!(!path.exists(), "{} should not exist", path.display());
    }
}

#[tokio::test]
async fn test_changed_dictionaries_need_overwrite() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    orchestrator(&graph, params.clone(), &through(Stage::DictionaryBuild))
        .run()
        .await
        .unwrap();

    // Two terms instead of four
    let smaller = PipelineParams {
        term_selection: TermSelection::AvgTfidf { vocab_size: 2 },
        ..params
    };
    let err = orchestrator(&graph, smaller.clone(), &[Stage::DictionaryBuild])
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DictionaryExists { .. }));
    assert_eq!(Dictionaries::load(&layout(&smaller)).unwrap().terms.len(), 4);

    let overwrite = PipelineParams {
        overwrite_dictionaries: true,
        ..smaller
    };
    let report = orchestrator(&graph, overwrite.clone(), &[Stage::DictionaryBuild])
        .run()
        .await
        .unwrap();
    let outcome = report.outcome(Stage::DictionaryBuild).unwrap();
    assert_eq!(outcome.metrics["terms"], 2);
    assert_eq!(outcome.metrics["unchanged"], 0);
    let dicts = Dictionaries::load(&layout(&overwrite)).unwrap();
    assert_eq!(dicts.terms.keys().collect::<Vec<_>>(), vec!["bird", "fish"]);
}

#[tokio::test]
async fn test_rerunning_catalogue_is_safe() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    let stages = through(Stage::DfVectorBuild);
    orchestrator(&graph, params.clone(), &stages).run().await.unwrap();
    let layout = layout(&params);
    let dicts = Dictionaries::load(&layout).unwrap();
    let vectors = fs::read_to_string(layout.vectors(VectorKind::Tfidf)).unwrap();
    let before = counts(&graph).await;

    let report = orchestrator(&graph, params, &stages).run().await.unwrap();

    assert_eq!(report.outcome(Stage::DictionaryBuild).unwrap().metrics["unchanged"], 1);
    assert_eq!(Dictionaries::load(&layout).unwrap(), dicts);
    assert_eq!(fs::read_to_string(layout.vectors(VectorKind::Tfidf)).unwrap(), vectors);
    assert_eq!(counts(&graph).await, before);
}

#[tokio::test]
async fn test_dictionary_rebuild_requires_fresh_vectors() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = PipelineParams {
        overwrite_dictionaries: true,
        ..params(&dir)
    };
    orchestrator(&graph, params.clone(), &through(Stage::TrainingVectorBuild))
        .run()
        .await
        .unwrap();
    assert!(layout(&params).vectors(VectorKind::Tfidf).is_file());

    let err = orchestrator(&graph, params.clone(), &[Stage::DictionaryBuild, Stage::RunTraining])
        .plan()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingDependencyArtifact {
            stage: Stage::RunTraining,
            artifact: Artifact::Vectors(VectorKind::Tfidf)
        }
    ));

    let plan = orchestrator(
        &graph,
        params,
        &[Stage::DictionaryBuild, Stage::TrainingVectorBuild, Stage::RunTraining],
    )
    .plan()
    .await
    .unwrap();
    assert_eq!(
        plan.stages[2].inputs,
        vec![
            (Artifact::Dictionaries, InputSource::Upstream(Stage::DictionaryBuild)),
            (Artifact::Vectors(VectorKind::Tfidf), InputSource::Upstream(Stage::TrainingVectorBuild)),
        ]
    );
}

#[tokio::test]
async fn test_dictionary_rewrite_removes_stale_vectors() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    orchestrator(&graph, params.clone(), &through(Stage::DfVectorBuild))
        .run()
        .await
        .unwrap();

    let changed = PipelineParams {
        term_selection: TermSelection::AvgTfidf { vocab_size: 3 },
        overwrite_dictionaries: true,
        ..params
    };
    orchestrator(&graph, changed.clone(), &[Stage::DictionaryBuild])
        .run()
        .await
        .unwrap();

    let layout = layout(&changed);
    assert!(!layout.vectors(VectorKind::Tfidf).exists());
    assert!(!layout.vectors(VectorKind::DocumentFrequency).exists());
    let err = orchestrator(&graph, changed, &[Stage::SeedSelection])
        .plan()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingDependencyArtifact { stage: Stage::SeedSelection, .. }));
}

#[tokio::test]
async fn test_clustering_without_consumer_fails() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    let mut stages = through(Stage::TrainingVectorBuild);
    stages.push(Stage::ElbowMethod);

    let err = orchestrator(&graph, params, &stages).run().await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::ClusteringUnavailable {
            stage: Stage::ElbowMethod
        }
    ));
}

#[tokio::test]
async fn test_training_testing_and_model_upload() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = PipelineParams {
        test_text: Some("cat dog dog".to_string()),
        ..params(&dir)
    };
    orchestrator(&graph, params.clone(), &through(Stage::TrainingVectorBuild))
        .run()
        .await
        .unwrap();

    let consumer = Arc::new(RecordingConsumer::default());
    let report = orchestrator(
        &graph,
        params.clone(),
        &[Stage::RunTraining, Stage::RunTesting, Stage::ModelUpload],
    )
    .with_clustering(consumer.clone())
    .run()
    .await
    .unwrap();
    assert_eq!(report.outcomes.len(), 3);

    let layout = layout(&params);
    let manifest = ModelManifest::load(&layout.clustering_manifest()).unwrap();
    assert_eq!(manifest.files, vec![layout.model_root().join("test_kmeans.json")]);

    let blobs = LocalBlobStore::new(&params.blob_root).list("models").await.unwrap();
    assert_eq!(blobs.len(), 6);
    assert!(blobs.contains(&"test_kmeans.json".to_string()));
    assert!(blobs.contains(&"test_model_manifest.json".to_string()));
    assert!(blobs.contains(&"test_term_dictionary.json".to_string()));

    let seen = consumer.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].task, ClusteringTask::RunTraining);
    assert_eq!(seen[0].dimension, 4);
    assert_eq!(seen[0].vectors, layout.vectors(VectorKind::Tfidf));
    assert!(seen[0].test_vector.is_none());

    // cat = 2, dog = 3 in the term dictionary
    let test_vector = seen[1].test_vector.as_ref().unwrap();
    assert!((test_vector.tfidf_vector[&2] - 1.0 / 3.0).abs() < 1e-12);
    assert!((test_vector.tfidf_vector[&3] - 2.0 / 3.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_snapshot_resumes_later_stages() {
    let dir = fixture();
    let graph = EmbeddedGraph::new();
    let params = params(&dir);
    orchestrator(&graph, params.clone(), &through(Stage::GraphBuild))
        .run()
        .await
        .unwrap();

    let path = dir.path().join("graph.json");
    graph.store_read().await.snapshot().save(&path).unwrap();
    let restored = GraphStore::restore(GraphSnapshot::load(&path).unwrap()).unwrap();
    let resumed = EmbeddedGraph::with_store(Arc::new(RwLock::new(restored)));
    assert_eq!(counts(&resumed).await, counts(&graph).await);

    let report = orchestrator(&resumed, params, &[Stage::DfBuild]).run().await.unwrap();
    assert_eq!(report.outcome(Stage::DfBuild).unwrap().metrics["rows"], 4);
}
