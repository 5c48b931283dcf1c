//! Dictionaries, vectors, clustering hand-off and model publishing

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use super::statistics::{corpus_params, term_uids};
use super::{StageContext, StageOutput};
use crate::clustering::{ClusteringInput, ModelManifest};
use crate::dictionary::{Dictionaries, Dictionary};
use crate::pipeline::config::TermSelection;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::stage::Stage;
use crate::query::{Params, Query};
use crate::schema::RelationshipKind;
use crate::stats::StatisticsProvider;
use crate::vectors::{SparseVector, VectorKind, VectorMaterializer};

/// Terms chosen by the configured selection policy, in dictionary order
async fn select_terms(ctx: &StageContext<'_>) -> PipelineResult<Vec<String>> {
    let client = ctx.client;
    let terms: Vec<String> = match &ctx.params().term_selection {
        TermSelection::AvgTfidf { vocab_size } => {
            let mut params = Params::new();
            params.insert("limit".to_string(), (*vocab_size).into());
            client
                .run(&Query::AverageTermWeight { relationship: RelationshipKind::Tfidf }, &params)
                .await?
                .iter()
                .filter_map(|r| r.get_str("term").map(str::to_string))
                .collect()
        }
        TermSelection::All => term_uids(ctx)
            .await?
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect(),
        TermSelection::DocumentFrequency { min_count, max_fraction } => {
            let params = corpus_params(ctx);
            let corpus_size = client.run(&Query::CorpusDocuments, &params).await?.len() as f64;
            let ceiling = max_fraction * corpus_size;
            client
                .collect_batched(
                    term_uids(ctx).await?,
                    ctx.params().query_batch_size,
                    &Query::TermDocumentCounts,
                    &params,
                )
                .await?
                .iter()
                .filter_map(|r| Some((r.get_str("term")?, r.get_i64("count")?)))
                .filter(|(_, count)| *count >= *min_count as i64 && (*count as f64) <= ceiling)
                .map(|(term, _)| term.to_string())
                .collect()
        }
    };
    Ok(terms)
}

/// dictionary-build
///
/// Rebuilding identical dictionaries is a no-op. Different contents need
/// `overwrite_dictionaries`, and a rewrite removes the vector files and the
/// clustering manifest numbered against the old ids.
pub(super) async fn build_dictionaries(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let layout = ctx.layout();
    let terms = select_terms(ctx).await?;
    let documents: Vec<String> = ctx
        .client
        .run(&Query::CorpusDocuments, &corpus_params(ctx))
        .await?
        .iter()
        .filter_map(|r| r.get_str("uid").map(str::to_string))
        .collect();
    let dictionaries = Dictionaries::build(terms, documents)?;

    if Dictionaries::exist(layout) {
        if Dictionaries::load(layout)? == dictionaries {
            info!(dir = %layout.model_root().display(), "Dictionaries unchanged");
            return Ok(StageOutput::default()
                .metric("terms", dictionaries.terms.len())
                .metric("documents", dictionaries.documents.len())
                .metric("unchanged", 1u64));
        }
        if !ctx.params().overwrite_dictionaries {
            return Err(PipelineError::DictionaryExists {
                path: layout.model_root().to_path_buf(),
            });
        }
    }

    let written = dictionaries.write(layout, ctx.tag())?;
    let stale = [
        layout.vectors(VectorKind::Tfidf),
        layout.vectors(VectorKind::DocumentFrequency),
        layout.clustering_manifest(),
    ];
    for path in stale.iter().filter(|p| p.is_file()) {
        tokio::fs::remove_file(path).await?;
        info!(file = %path.display(), "Removed output of the previous dictionaries");
    }

    Ok(StageOutput {
        outputs: written,
        ..Default::default()
    }
    .metric("terms", dictionaries.terms.len())
    .metric("documents", dictionaries.documents.len())
    .metric("unchanged", 0u64))
}

/// training-vector-build, df-vector-build
pub(super) async fn build_vectors(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let kind = match ctx.stage {
        Stage::DfVectorBuild => VectorKind::DocumentFrequency,
        _ => VectorKind::Tfidf,
    };
    let dictionaries = Dictionaries::load(ctx.layout())?;
    let path = ctx.layout().vectors(kind);

    let report = VectorMaterializer::new(ctx.client, &dictionaries)
        .with_batch_size(ctx.params().vector_batch_size)
        .with_corpus(ctx.params().corpus_name.as_str())
        .materialize_to(kind, &path, ctx.tag())
        .await?;

    Ok(StageOutput::default()
        .output(path)
        .metric("documents", report.documents)
        .metric("rows", report.rows)
        .metric("dropped", report.dropped))
}

/// Term-frequency vector of free text against the term dictionary
pub(crate) fn encode_text(stats: &dyn StatisticsProvider, terms: &Dictionary, text: &str) -> SparseVector {
    let analysis = stats.analyze(text);
    let length = analysis.word_length.max(1) as f64;
    let tfidf_vector: BTreeMap<u32, f64> = analysis
        .terms
        .iter()
        .filter_map(|t| terms.id(&t.term).map(|id| (id, t.count as f64 / length)))
        .collect();
    SparseVector {
        document_id: 0,
        tfidf_vector,
    }
}

/// elbow-method, seed-selection, run-training, validation-metrics,
/// run-testing
pub(super) async fn run_clustering(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let stage = ctx.stage;
    let (Some(consumer), Some(task)) = (ctx.clustering, stage.clustering_task()) else {
        return Err(PipelineError::ClusteringUnavailable { stage });
    };
    let params = ctx.params();
    let layout = ctx.layout();
    let dictionaries = Dictionaries::load(layout)?;

    let test_vector = match (stage, &params.test_text) {
        (Stage::RunTesting, Some(text)) => Some(encode_text(ctx.stats, &dictionaries.terms, text)),
        _ => None,
    };
    let input = ClusteringInput {
        task,
        model_name: layout.model_name().to_string(),
        vectors: layout.vectors(params.training_vectors),
        kind: params.training_vectors,
        dimension: dictionaries.terms.len(),
        model_dir: layout.model_root().to_path_buf(),
        test_vector,
    };

    let result = consumer.run(&input).await?;
    info!(task = ?task, files = result.files.len(), summary = %result.summary, "Clustering task finished");

    let mut output = StageOutput {
        outputs: result.files.clone(),
        ..Default::default()
    };
    if stage == Stage::RunTraining {
        let manifest = ModelManifest { files: result.files };
        output = output.output(manifest.write(&layout.clustering_manifest(), ctx.tag())?);
    }
    let files = output.outputs.len();
    Ok(output.metric("files", files))
}

/// model-upload: consumer output, its manifest and the dictionaries
pub(super) async fn upload_model(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let layout = ctx.layout();
    let container = ctx.params().model_container.as_str();
    let manifest_path = layout.clustering_manifest();
    let manifest = ModelManifest::load(&manifest_path)?;

    let files: Vec<PathBuf> = manifest
        .files
        .into_iter()
        .chain(std::iter::once(manifest_path))
        .chain(layout.dictionary_files())
        .collect();

    for file in &files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|_| file.is_file())
            .ok_or_else(|| PipelineError::InvalidInput {
                path: file.clone(),
                reason: "model file missing".to_string(),
            })?;
        ctx.blobs.upload(container, &name, file).await?;
    }
    info!(container, files = files.len(), "Model uploaded");
    Ok(StageOutput::default().metric("files", files.len()))
}

/// temp-cleanup
pub(super) async fn remove_temp_files(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let data_dir = ctx.layout().data_dir();
    let removed = tokio::fs::try_exists(data_dir).await?;
    if removed {
        tokio::fs::remove_dir_all(data_dir).await?;
        info!(dir = %data_dir.display(), "Removed temporary files");
    }
    Ok(StageOutput::default().metric("removed", removed as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::SimpleStatistics;

    #[test]
    fn test_encode_text_uses_dictionary_ids() {
        let terms = Dictionary::from_ordered(["cat", "dog"]);
        let vector = encode_text(&SimpleStatistics::new(), &terms, "dog dog cat bird");

        assert_eq!(vector.document_id, 0);
        assert_eq!(vector.tfidf_vector.get(&1), Some(&0.5));
        assert_eq!(vector.tfidf_vector.get(&0), Some(&0.25));
        assert_eq!(vector.tfidf_vector.len(), 2);
    }
}
