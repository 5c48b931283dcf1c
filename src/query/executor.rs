//! Executes the typed query catalogue against an in-process `GraphStore`

use super::ast::Query;
use super::error::{QueryError, QueryResult};
use super::record::{Params, Record};
use crate::graph::{GraphStore, Label, MergeOutcome, Node, NodeId, PropertyMap, PropertyValue};
use crate::schema::{AttrSpec, NodeKind, RelationshipKind};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Query engine - runs `Query` values against a store
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryEngine;

impl QueryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Execute a read-only query
    pub fn execute(&self, query: &Query, params: &Params, store: &GraphStore) -> QueryResult<Vec<Record>> {
        check_params(query, params)?;

        match query {
            Query::CountConstraints => Ok(vec![Record::new().with("count", store.constraints().count())]),
            Query::CountNodes { node } => {
                let count = match node {
                    Some(kind) => store.get_nodes_by_label(&label_of(*kind)).len(),
                    None => store.node_count(),
                };
                Ok(vec![Record::new().with("count", count)])
            }
            Query::CountRelationships { relationship } => {
                let count = match relationship {
                    Some(kind) => store.get_edges_by_type(&kind.label().into()).len(),
                    None => store.edge_count(),
                };
                Ok(vec![Record::new().with("count", count)])
            }
            Query::NodeUids { node } => Ok(store
                .get_nodes_by_label(&label_of(*node))
                .into_iter()
                .map(|n| Record::new().with("uid", n.uid.as_str()))
                .collect()),
            Query::CorpusDocuments => corpus_documents(store, string_param(params, "corpus")?),
            Query::TermEdges { relationship } => term_edges(store, *relationship, params),
            Query::TermDocumentCounts => term_document_counts(store, params),
            Query::TfidfInputs => tfidf_inputs(store, params),
            Query::AverageTermWeight { relationship } => {
                average_term_weight(store, *relationship, limit_param(params)?)
            }
            Query::DeleteNodes
            | Query::CreateUniqueConstraint { .. }
            | Query::MergeNodes { .. }
            | Query::MergeRelationships { .. } => Err(QueryError::QuerySyntax(format!(
                "{} mutates the graph; use execute_mutation",
                query.name()
            ))),
        }
    }

    /// Execute a query that may mutate the store
    pub fn execute_mutation(
        &self,
        query: &Query,
        params: &Params,
        store: &mut GraphStore,
    ) -> QueryResult<Vec<Record>> {
        if query.is_read_only() {
            return self.execute(query, params, store);
        }
        check_params(query, params)?;

        match query {
            Query::DeleteNodes => {
                let ids = store.node_ids(limit_param(params)?);
                for id in &ids {
                    store.delete_node(*id)?;
                }
                Ok(vec![Record::new().with("deleted", ids.len())])
            }
            Query::CreateUniqueConstraint { node } => {
                let created = store.add_unique_constraint(node.label(), node.uid_attr());
                Ok(vec![Record::new().with("created", created)])
            }
            Query::MergeNodes { node } => merge_nodes(store, *node, batch_param(params)?),
            Query::MergeRelationships { relationship } => {
                merge_relationships(store, *relationship, batch_param(params)?)
            }
            _ => self.execute(query, params, store),
        }
    }
}

fn label_of(kind: NodeKind) -> Label {
    Label::new(kind.label())
}

fn check_params(query: &Query, params: &Params) -> QueryResult<()> {
    for name in query.required_params() {
        if !params.contains_key(*name) {
            return Err(QueryError::QuerySyntax(format!(
                "{} requires parameter ${}",
                query.name(),
                name
            )));
        }
    }
    Ok(())
}

fn batch_param(params: &Params) -> QueryResult<&[PropertyValue]> {
    params
        .get("batch")
        .and_then(PropertyValue::as_list)
        .ok_or_else(|| QueryError::QuerySyntax("$batch must be a list".to_string()))
}

fn string_param<'p>(params: &'p Params, name: &str) -> QueryResult<&'p str> {
    params
        .get(name)
        .and_then(PropertyValue::as_str)
        .ok_or_else(|| QueryError::QuerySyntax(format!("${} must be a string", name)))
}

fn optional_string_param<'p>(params: &'p Params, name: &str) -> QueryResult<Option<&'p str>> {
    match params.get(name) {
        None | Some(PropertyValue::Null) => Ok(None),
        Some(PropertyValue::String(s)) => Ok(Some(s)),
        Some(other) => Err(QueryError::QuerySyntax(format!(
            "${} must be a string, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn limit_param(params: &Params) -> QueryResult<usize> {
    params
        .get("limit")
        .and_then(PropertyValue::as_integer)
        .filter(|n| *n >= 0)
        .map(|n| n as usize)
        .ok_or_else(|| QueryError::QuerySyntax("$limit must be a non-negative integer".to_string()))
}

/// Term uids in `$batch`
fn batch_uids(params: &Params) -> QueryResult<Vec<&str>> {
    batch_param(params)?
        .iter()
        .map(|v| {
            v.as_str().ok_or_else(|| {
                QueryError::QuerySyntax(format!("$batch entries must be strings, got {}", v.type_name()))
            })
        })
        .collect()
}

fn find(store: &GraphStore, kind: NodeKind, uid: &str) -> Option<NodeId> {
    store.find_node(&label_of(kind), uid).map(|n| n.id)
}

/// Whether `from` has an outgoing `relationship` edge to `to`
fn linked(store: &GraphStore, from: NodeId, relationship: RelationshipKind, to: NodeId) -> bool {
    store
        .get_outgoing_edges(from)
        .iter()
        .any(|e| e.target == to && e.edge_type.as_str() == relationship.label())
}

/// Targets of `from`'s outgoing edges of one type
fn targets<'s>(store: &'s GraphStore, from: NodeId, relationship: RelationshipKind) -> Vec<&'s Node> {
    store
        .get_outgoing_edges(from)
        .into_iter()
        .filter(|e| e.edge_type.as_str() == relationship.label())
        .filter_map(|e| store.get_node(e.target))
        .collect()
}

fn corpus_documents(store: &GraphStore, corpus: &str) -> QueryResult<Vec<Record>> {
    let Some(corpus_id) = find(store, NodeKind::Corpus, corpus) else {
        return Ok(Vec::new());
    };
    Ok(store
        .get_incoming_edges(corpus_id)
        .into_iter()
        .filter(|e| e.edge_type.as_str() == RelationshipKind::InCorpus.label())
        .filter_map(|e| store.get_node(e.source))
        .map(|doc| {
            Record::new().with("uid", doc.uid.as_str()).with(
                "word_length",
                doc.get_property("word_length").cloned().unwrap_or(PropertyValue::Null),
            )
        })
        .collect())
}

fn term_edges(store: &GraphStore, relationship: RelationshipKind, params: &Params) -> QueryResult<Vec<Record>> {
    if relationship.source() != NodeKind::Term {
        return Err(QueryError::QuerySyntax(format!(
            "term_edges needs a term-sourced relationship, {} starts at {}",
            relationship,
            relationship.source()
        )));
    }
    let uids = batch_uids(params)?;
    let corpus = match optional_string_param(params, "corpus")? {
        Some(name) => match find(store, NodeKind::Corpus, name) {
            Some(id) => Some(id),
            None => return Ok(Vec::new()),
        },
        None => None,
    };

    let mut records = Vec::new();
    for uid in uids {
        let Some(term_id) = find(store, NodeKind::Term, uid) else {
            continue;
        };
        for edge in store.get_outgoing_edges(term_id) {
            if edge.edge_type.as_str() != relationship.label() {
                continue;
            }
            let Some(target) = store.get_node(edge.target) else {
                continue;
            };

            // Resolve the document behind the target and check corpus scope
            let (document, in_scope) = match relationship.target() {
                NodeKind::Document => (
                    Some(target.uid.as_str()),
                    corpus.map_or(true, |c| linked(store, target.id, RelationshipKind::InCorpus, c)),
                ),
                NodeKind::DocumentCorpus => (
                    targets(store, target.id, RelationshipKind::RelatedToDocument)
                        .first()
                        .map(|d| d.uid.as_str()),
                    corpus.map_or(true, |c| linked(store, target.id, RelationshipKind::RelatedToCorpus, c)),
                ),
                NodeKind::Corpus => (None, corpus.map_or(true, |c| c == target.id)),
                _ => (None, corpus.is_none()),
            };
            if !in_scope {
                continue;
            }

            records.push(
                Record::new()
                    .with("term", uid)
                    .with("target", target.uid.as_str())
                    .with("document", document.map_or(PropertyValue::Null, PropertyValue::from))
                    .with("value", edge.get_property("value").cloned().unwrap_or(PropertyValue::Null)),
            );
        }
    }
    Ok(records)
}

fn term_document_counts(store: &GraphStore, params: &Params) -> QueryResult<Vec<Record>> {
    let uids = batch_uids(params)?;
    let Some(corpus_id) = find(store, NodeKind::Corpus, string_param(params, "corpus")?) else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for uid in uids {
        let Some(term_id) = find(store, NodeKind::Term, uid) else {
            continue;
        };
        let count = targets(store, term_id, RelationshipKind::TermFrequency)
            .into_iter()
            .filter(|doc| linked(store, doc.id, RelationshipKind::InCorpus, corpus_id))
            .count();
        if count > 0 {
            records.push(Record::new().with("term", uid).with("count", count));
        }
    }
    Ok(records)
}

fn tfidf_inputs(store: &GraphStore, params: &Params) -> QueryResult<Vec<Record>> {
    let uids = batch_uids(params)?;
    let Some(corpus_id) = find(store, NodeKind::Corpus, string_param(params, "corpus")?) else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for uid in uids {
        let Some(term_id) = find(store, NodeKind::Term, uid) else {
            continue;
        };
        let edges = store.get_outgoing_edges(term_id);
        let document_frequency = edges
            .iter()
            .find(|e| {
                e.target == corpus_id && e.edge_type.as_str() == RelationshipKind::DocumentFrequency.label()
            })
            .and_then(|e| e.get_property("value").cloned());
        // no df edge, no tfidf
        let Some(document_frequency) = document_frequency else {
            continue;
        };

        for edge in edges {
            if edge.edge_type.as_str() != RelationshipKind::TermFrequency.label() {
                continue;
            }
            let Some(doc) = store.get_node(edge.target) else {
                continue;
            };
            if !linked(store, doc.id, RelationshipKind::InCorpus, corpus_id) {
                continue;
            }
            records.push(
                Record::new()
                    .with("term", uid)
                    .with("document", doc.uid.as_str())
                    .with("term_frequency", edge.get_property("value").cloned().unwrap_or(PropertyValue::Null))
                    .with("word_length", doc.get_property("word_length").cloned().unwrap_or(PropertyValue::Null))
                    .with("document_frequency", document_frequency.clone()),
            );
        }
    }
    Ok(records)
}

fn average_term_weight(
    store: &GraphStore,
    relationship: RelationshipKind,
    limit: usize,
) -> QueryResult<Vec<Record>> {
    let mut sums: IndexMap<&str, (f64, usize)> = IndexMap::new();
    for edge in store.get_edges_by_type(&relationship.label().into()) {
        let (Some(source), Some(value)) = (
            store.get_node(edge.source),
            edge.get_property("value").and_then(PropertyValue::as_f64),
        ) else {
            continue;
        };
        let entry = sums.entry(source.uid.as_str()).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    let mut averages: Vec<(&str, f64)> = sums
        .into_iter()
        .map(|(term, (sum, count))| (term, sum / count as f64))
        .collect();
    averages.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    averages.truncate(limit);

    Ok(averages
        .into_iter()
        .map(|(term, average)| Record::new().with("term", term).with("average", average))
        .collect())
}

/// Pick the declared attributes out of a `$batch` row, skipping nulls
fn row_attrs(row: &PropertyMap, attrs: &[AttrSpec]) -> PropertyMap {
    attrs
        .iter()
        .filter_map(|attr| {
            row.get(attr.name)
                .filter(|v| !v.is_null())
                .map(|v| (attr.name.to_string(), v.clone()))
        })
        .collect()
}

fn row_map(row: &PropertyValue) -> QueryResult<&PropertyMap> {
    row.as_map()
        .ok_or_else(|| QueryError::QuerySyntax(format!("$batch rows must be maps, got {}", row.type_name())))
}

fn row_key<'r>(row: &'r PropertyMap, key: &str) -> QueryResult<&'r str> {
    row.get(key)
        .and_then(PropertyValue::as_str)
        .ok_or_else(|| QueryError::QuerySyntax(format!("$batch row is missing string field '{}'", key)))
}

fn merge_nodes(store: &mut GraphStore, node: NodeKind, rows: &[PropertyValue]) -> QueryResult<Vec<Record>> {
    let mut created = 0usize;
    for row in rows {
        let row = row_map(row)?;
        let uid = row_key(row, "uid")?;
        let (_, outcome) = store.merge_node(node.label(), uid, row_attrs(row, node.attrs()))?;
        if outcome == MergeOutcome::Created {
            created += 1;
        }
    }
    Ok(vec![Record::new().with("merged", rows.len()).with("created", created)])
}

fn merge_relationships(
    store: &mut GraphStore,
    relationship: RelationshipKind,
    rows: &[PropertyValue],
) -> QueryResult<Vec<Record>> {
    let (mut merged, mut created, mut missing) = (0usize, 0usize, 0usize);
    for row in rows {
        let row = row_map(row)?;
        let source = find(store, relationship.source(), row_key(row, "from")?);
        let target = find(store, relationship.target(), row_key(row, "to")?);
        let (Some(source), Some(target)) = (source, target) else {
            missing += 1;
            continue;
        };

        let (_, outcome) = store.merge_edge(
            source,
            target,
            relationship.label(),
            row_attrs(row, relationship.attrs()),
        )?;
        merged += 1;
        if outcome == MergeOutcome::Created {
            created += 1;
        }
    }
    Ok(vec![Record::new()
        .with("merged", merged)
        .with("created", created)
        .with("missing", missing)])
}
