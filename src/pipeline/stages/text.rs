//! Corpus preprocessing and the first-stage bulk files

use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{list_files, text_source_dir, CsvGroup, GroupWriter, StageContext, StageOutput};
use crate::artifact::AtomicFile;
use crate::bulk::BulkTarget;
use crate::graph::PropertyValue;
use crate::pipeline::error::PipelineResult;
use crate::schema::{document_corpus_uid, NodeKind, RelationshipKind};

/// Category every document is filed under
pub(crate) const TRAINING_CATEGORY: &str = "training_data";

/// `pmid` may be a string or a number
fn record_id(record: &Value) -> Option<String> {
    let id = match record.get("pmid")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let usable = !id.is_empty() && !id.starts_with('.') && !id.contains(['/', '\\']);
    usable.then_some(id)
}

/// Title and abstract, space-joined, non-ASCII dropped
fn record_text(record: &Value) -> String {
    let text = ["title", "abstract"]
        .iter()
        .filter_map(|field| record.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    text.chars().filter(char::is_ascii).collect()
}

/// text-preprocess: one `<pmid>.txt` per corpus record
pub(super) async fn preprocess(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    let params = ctx.params();
    let text_dir = ctx.layout().text_dir();
    let limit = match params.corpus_document_limit {
        0 => usize::MAX,
        n => n,
    };

    let mut output = StageOutput::default();
    let (mut files, mut skipped, mut unreadable) = (0usize, 0usize, 0usize);
    'files: for path in list_files(&params.corpus_dir, "json")? {
        let raw = fs::read(&path)?;
        let parsed: Value = match serde_json::from_slice(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Unreadable corpus file, skipping");
                unreadable += 1;
                continue;
            }
        };
        let records = match parsed {
            Value::Array(items) => items,
            single => vec![single],
        };

        for record in &records {
            if files >= limit {
                break 'files;
            }
            let text = record_text(record);
            let Some(id) = record_id(record).filter(|_| !text.is_empty()) else {
                debug!(file = %path.display(), "Record without id or text");
                skipped += 1;
                continue;
            };
            let mut file = AtomicFile::create(text_dir.join(format!("{}.txt", id)), ctx.tag())?;
            file.write_all(text.as_bytes())?;
            output = output.output(file.commit()?);
            files += 1;
        }
    }

    info!(documents = files, skipped, unreadable, dir = %text_dir.display(), "Corpus text written");
    Ok(output
        .metric("documents", files)
        .metric("skipped", skipped)
        .metric("unreadable", unreadable))
}

fn document_uid(path: &Path) -> Option<(String, String)> {
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let name = path.file_name()?.to_string_lossy().into_owned();
    Some((stem, name))
}

/// csv-build: analyze every document and stage the graph-group bulk files
pub(super) async fn build_graph_csv(ctx: &StageContext<'_>) -> PipelineResult<StageOutput> {
    use BulkTarget::{Node, Relationship};

    let params = ctx.params();
    let corpus = params.corpus_name.as_str();
    let source_dir = text_source_dir(ctx.config);
    let mut documents = list_files(&source_dir, "txt")?;
    if params.corpus_document_limit > 0 {
        documents.truncate(params.corpus_document_limit);
    }

    let mut csv = GroupWriter::new(
        CsvGroup::Graph,
        &ctx.layout().graph_staging_dir(),
        ctx.tag(),
        params.max_records_per_file,
    );
    csv.write(Node(NodeKind::Corpus), &[corpus.into(), params.corpus_description.as_str().into()])?;
    csv.write(Node(NodeKind::DocumentCategory), &[TRAINING_CATEGORY.into()])?;

    let mut seen_terms: HashSet<String> = HashSet::new();
    let mut seen_tags: HashSet<String> = HashSet::new();
    for (index, path) in documents.iter().enumerate() {
        let Some((uid, source)) = document_uid(path) else {
            continue;
        };
        let text = String::from_utf8_lossy(&fs::read(path)?).into_owned();
        let analysis = ctx.stats.analyze(&text);
        let joined = document_corpus_uid(&uid, corpus);
        let uid_value = PropertyValue::from(uid.as_str());

        csv.write(
            Node(NodeKind::Document),
            &[uid_value.clone(), source.into(), text.into(), analysis.word_length.into()],
        )?;
        csv.write(Node(NodeKind::DocumentCorpus), &[joined.as_str().into()])?;
        csv.write(Relationship(RelationshipKind::InCorpus), &[uid_value.clone(), corpus.into()])?;
        csv.write(
            Relationship(RelationshipKind::RelatedToCorpus),
            &[joined.as_str().into(), corpus.into()],
        )?;
        csv.write(
            Relationship(RelationshipKind::RelatedToDocument),
            &[joined.as_str().into(), uid_value.clone()],
        )?;
        csv.write(
            Relationship(RelationshipKind::InDocumentCategory),
            &[uid_value.clone(), TRAINING_CATEGORY.into()],
        )?;

        for term in &analysis.terms {
            if seen_terms.insert(term.term.clone()) {
                csv.write(Node(NodeKind::Term), &[term.term.as_str().into(), term.ngram_type.as_str().into()])?;
            }
            csv.write(
                Relationship(RelationshipKind::TermFrequency),
                &[term.term.as_str().into(), uid_value.clone(), term.count.into()],
            )?;
        }
        if let Some(top) = analysis.most_frequent() {
            csv.write(
                Relationship(RelationshipKind::MostFrequentTerm),
                &[uid_value.clone(), top.term.as_str().into(), top.count.into()],
            )?;
        }

        let mut document_tags = HashSet::new();
        for (term, tag) in &analysis.named_entities {
            if seen_terms.insert(term.clone()) {
                csv.write(Node(NodeKind::Term), &[term.as_str().into(), "named_entity".into()])?;
            }
            if seen_tags.insert(tag.clone()) {
                csv.write(Node(NodeKind::NamedEntityTag), &[tag.as_str().into()])?;
            }
            if document_tags.insert((term, tag)) {
                csv.write(
                    Relationship(RelationshipKind::RelatedToTag),
                    &[term.as_str().into(), tag.as_str().into()],
                )?;
            }
        }

        if (index + 1) % 1000 == 0 {
            info!(processed = index + 1, total = documents.len(), "Analyzing documents");
        }
    }

    let output = csv.finish(StageOutput::default().metric("documents", documents.len()))?;
    info!(
        documents = documents.len(),
        terms = seen_terms.len(),
        files = output.outputs.len(),
        "Staged graph bulk files"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_text_joins_and_strips() {
        let record = json!({"pmid": 7, "title": "Caf\u{e9} study.", "abstract": "Cats nap."});
        assert_eq!(record_text(&record), "Caf study. Cats nap.");
        assert_eq!(record_id(&record), Some("7".to_string()));

        let title_only = json!({"pmid": "12", "title": "Only a title"});
        assert_eq!(record_text(&title_only), "Only a title");
    }

    #[test]
    fn test_record_id_rejects_paths() {
        assert_eq!(record_id(&json!({"pmid": "../x"})), None);
        assert_eq!(record_id(&json!({"pmid": ""})), None);
        assert_eq!(record_id(&json!({"title": "no id"})), None);
    }
}
