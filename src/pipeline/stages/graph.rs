//! Graph maintenance, bulk-file uploads and graph builds

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::{list_files, CsvGroup, StageContext, StageOutput};
use crate::bulk::{list_parts, read_rows, BulkTarget};
use crate::graph::{PropertyMap, PropertyValue};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::query::{Params, Query, QueryError, Record};
use crate::schema::NodeKind;

fn sum(records: &[Record], column: &str) -> u64 {
    records
        .iter()
        .filter_map(|r| r.get_i64(column))
        .map(|n| n.max(0) as u64)
        .sum()
}

/// graph-delete: detach-delete everything, one bounded batch at a time
pub(super) async fn delete_graph(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let mut params = Params::new();
    params.insert("limit".to_string(), ctx.params().delete_batch_size.into());

    let mut total = 0u64;
    loop {
        if ctx.client.cancel_flag().is_cancelled() {
            return Err(QueryError::Cancelled.into());
        }
        let deleted = sum(&ctx.client.run(&Query::DeleteNodes, &params).await?, "deleted");
        if deleted == 0 {
            break;
        }
        total += deleted;
        debug!(deleted, total, "Deleted node batch");
    }
    info!(deleted = total, "Graph cleared");
    Ok(StageOutput::default().metric("deleted_nodes", total))
}

/// constraint-create: one uid uniqueness constraint per node type
pub(super) async fn create_constraints(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let mut created = 0u64;
    for node in NodeKind::ALL {
        let records = ctx
            .client
            .run(&Query::CreateUniqueConstraint { node }, &Params::new())
            .await?;
        if records
            .iter()
            .any(|r| matches!(r.get("created"), Some(PropertyValue::Boolean(true))))
        {
            created += 1;
        } else {
            debug!(label = node.label(), "Constraint already present");
        }
    }
    let total = sum(&ctx.client.run(&Query::CountConstraints, &Params::new()).await?, "count");
    info!(created, total, "Constraints in place");
    Ok(StageOutput::default()
        .metric("created", created)
        .metric("constraints", total))
}

/// corpus-node-create: upsert the configured corpus
pub(super) async fn create_corpus_node(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let params = ctx.params();
    let mut row = PropertyMap::new();
    row.insert("uid".to_string(), params.corpus_name.as_str().into());
    row.insert("description".to_string(), params.corpus_description.as_str().into());

    let mut query_params = Params::new();
    query_params.insert("batch".to_string(), PropertyValue::List(vec![row.into()]));
    let records = ctx
        .client
        .run(&Query::MergeNodes { node: NodeKind::Corpus }, &query_params)
        .await?;

    let created = sum(&records, "created");
    info!(corpus = %params.corpus_name, created = created > 0, "Corpus node merged");
    Ok(StageOutput::default().metric("created", created))
}

/// csv-upload, df-upload, tfidf-upload: push the group's staged parts to
/// the graph container and drop stale parts a larger earlier run left there
pub(super) async fn upload_group(ctx: &StageContext<'_>, group: CsvGroup) -> PipelineResult<StageOutput> {
    let container = ctx.params().graph_container.as_str();
    let staging = ctx.layout().graph_staging_dir();

    let mut uploaded = BTreeSet::new();
    let mut output = StageOutput::default();
    for target in group.targets() {
        for part in list_parts(target, &staging)? {
            let name = part
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| PipelineError::InvalidInput {
                    path: part.clone(),
                    reason: "bulk file has no name".to_string(),
                })?;
            ctx.blobs.upload(container, &name, &part).await?;
            uploaded.insert(name);
            output = output.output(part);
        }
    }

    let mut removed = 0u64;
    for name in ctx.blobs.list(container).await? {
        if group.owns_file(&name) && !uploaded.contains(&name) {
            ctx.blobs.delete(container, &name).await?;
            removed += 1;
        }
    }

    info!(container, files = uploaded.len(), stale_removed = removed, "Uploaded bulk files");
    Ok(output
        .metric("files", uploaded.len())
        .metric("stale_removed", removed))
}

/// graph-build, df-graph-build, tfidf-graph-build: download the group's
/// parts and upsert their rows, nodes before relationships
pub(super) async fn load_group(ctx: &StageContext<'_>, group: CsvGroup) -> PipelineResult<StageOutput> {
    let params = ctx.params();
    let container = params.graph_container.as_str();
    let downloads = ctx.layout().downloads_dir();
    let blobs = ctx.blobs.list(container).await?;

    let (mut merged, mut created, mut missing) = (0u64, 0u64, 0u64);
    for target in group.targets() {
        let query = match target {
            BulkTarget::Node(node) => Query::MergeNodes { node },
            BulkTarget::Relationship(relationship) => Query::MergeRelationships { relationship },
        };

        for name in blobs.iter().filter(|n| target.owns_file(n)) {
            let local = downloads.join(name);
            ctx.blobs.download(container, name, &local).await?;
            let rows: Vec<PropertyValue> = read_rows(target, &local)?.into_iter().map(PropertyValue::from).collect();
            let row_count = rows.len();

            let records = ctx
                .client
                .collect_batched(rows, params.upsert_batch_size, &query, &Params::new())
                .await?;
            let part_missing = sum(&records, "missing");
            if part_missing > 0 {
                warn!(
                    bulk = %target,
                    file = %name,
                    missing = part_missing,
                    "Rows skipped: endpoint node not in graph"
                );
            }
            merged += sum(&records, "merged");
            created += sum(&records, "created");
            missing += part_missing;
            debug!(bulk = %target, file = %name, rows = row_count, "Loaded bulk file");
        }
    }

    // Downloads are scratch copies
    for file in list_files(&downloads, "csv")? {
        if file.file_name().map_or(false, |n| group.owns_file(&n.to_string_lossy())) {
            std::fs::remove_file(&file)?;
        }
    }

    info!(merged, created, missing, "Graph build complete");
    Ok(StageOutput::default()
        .metric("merged", merged)
        .metric("created", created)
        .metric("missing", missing))
}
