//! Document-frequency and TF-IDF bulk files, computed from the graph

use futures::TryStreamExt;
use tracing::{debug, info};

use super::{StageContext, StageOutput};
use crate::bulk::{BulkTarget, BulkWriter};
use crate::graph::PropertyValue;
use crate::pipeline::error::PipelineResult;
use crate::query::{Params, Query, QueryResult};
use crate::schema::{document_corpus_uid, NodeKind, RelationshipKind};
use crate::stats::TfidfInput;

/// Every term uid in the graph
pub(crate) async fn term_uids(ctx: &StageContext<'_>) -> QueryResult<Vec<PropertyValue>> {
    Ok(ctx
        .client
        .run(&Query::NodeUids { node: NodeKind::Term }, &Params::new())
        .await?
        .iter()
        .filter_map(|r| r.get_str("uid"))
        .map(PropertyValue::from)
        .collect())
}

pub(crate) fn corpus_params(ctx: &StageContext<'_>) -> Params {
    let mut params = Params::new();
    params.insert("corpus".to_string(), ctx.params().corpus_name.as_str().into());
    params
}

fn writer(ctx: &StageContext<'_>, relationship: RelationshipKind) -> BulkWriter {
    BulkWriter::new(
        BulkTarget::Relationship(relationship),
        ctx.layout().graph_staging_dir(),
        ctx.tag(),
        ctx.params().max_records_per_file,
    )
}

/// df-build: per term, the number of corpus documents containing it
pub(super) async fn build_df_csv(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let params = ctx.params();
    let terms = term_uids(ctx).await?;
    let term_count = terms.len();
    let query_params = corpus_params(ctx);
    let query = Query::TermDocumentCounts;

    let mut csv = writer(ctx, RelationshipKind::DocumentFrequency);
    let mut rows = ctx
        .client
        .run_batched(terms, params.query_batch_size, &query, &query_params)?;
    while let Some(record) = rows.try_next().await? {
        let (Some(term), Some(count)) = (record.get_str("term"), record.get_i64("count")) else {
            continue;
        };
        if count > 0 {
            csv.write_row(&[term.into(), params.corpus_name.as_str().into(), count.into()])?;
        }
    }

    let written = csv.rows();
    let parts = csv.finish()?;
    info!(terms = term_count, edges = written, "Staged document frequency file");
    Ok(StageOutput {
        outputs: parts,
        ..Default::default()
    }
    .metric("terms", term_count)
    .metric("rows", written))
}

/// tfidf-build: weigh every (term, corpus document) pair through the
/// statistics provider
pub(super) async fn build_tfidf_csv(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let params = ctx.params();
    let query_params = corpus_params(ctx);
    let corpus_size = ctx
        .client
        .run(&Query::CorpusDocuments, &query_params)
        .await?
        .len() as u64;
    let terms = term_uids(ctx).await?;
    let term_count = terms.len();
    let query = Query::TfidfInputs;

    let mut csv = writer(ctx, RelationshipKind::Tfidf);
    let mut zero = 0u64;
    let mut rows = ctx
        .client
        .run_batched(terms, params.query_batch_size, &query, &query_params)?;
    while let Some(record) = rows.try_next().await? {
        let (Some(term), Some(document)) = (record.get_str("term"), record.get_str("document")) else {
            continue;
        };
        let count = |column: &str| record.get_i64(column).unwrap_or(0).max(0) as u64;
        let weight = ctx.stats.tfidf(&TfidfInput {
            term_frequency: count("term_frequency"),
            word_length: count("word_length"),
            document_frequency: count("document_frequency"),
            corpus_size,
        });
        if weight == 0.0 || !weight.is_finite() {
            zero += 1;
            continue;
        }
        let joined = document_corpus_uid(document, &params.corpus_name);
        csv.write_row(&[term.into(), joined.into(), weight.into()])?;
    }

    let written = csv.rows();
    let parts = csv.finish()?;
    debug!(skipped_zero = zero, "Zero weights left out");
    info!(terms = term_count, corpus_size, edges = written, "Staged tfidf file");
    Ok(StageOutput {
        outputs: parts,
        ..Default::default()
    }
    .metric("terms", term_count)
    .metric("rows", written)
    .metric("zero_weights", zero))
}
