//! Typed query catalogue
//!
//! Every query the pipeline issues is a variant here. Identifiers (labels,
//! relationship types, attribute names) come from the schema registry;
//! data values travel only through `Params`, never through the query text.

use crate::schema::{NodeKind, RelationshipKind};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Detach-delete up to `$limit` nodes; returns `deleted`
    DeleteNodes,

    /// Uniqueness constraint on the node type's uid attribute; returns `created`
    CreateUniqueConstraint { node: NodeKind },

    /// Returns `count`
    CountConstraints,

    /// Upsert `$batch` rows of `{uid, <attrs>}`; returns `merged`, `created`
    MergeNodes { node: NodeKind },

    /// Upsert `$batch` rows of `{from, to, <attrs>}` between existing nodes;
    /// rows with a missing endpoint are skipped. Returns `merged`, `created`,
    /// `missing`
    MergeRelationships { relationship: RelationshipKind },

    /// Returns `count`
    CountNodes { node: Option<NodeKind> },

    /// Returns `count`
    CountRelationships { relationship: Option<RelationshipKind> },

    /// One `uid` row per node, in graph order
    NodeUids { node: NodeKind },

    /// Documents in corpus `$corpus`: `uid`, `word_length`
    CorpusDocuments,

    /// Weighted edges leaving the terms in `$batch`, optionally restricted to
    /// corpus `$corpus`: `term`, `target`, `document`, `value`
    TermEdges { relationship: RelationshipKind },

    /// Per term in `$batch`, the number of corpus `$corpus` documents with a
    /// term_frequency edge: `term`, `count`
    TermDocumentCounts,

    /// Per (term in `$batch`, document in `$corpus`) pair with both frequency
    /// edges: `term`, `document`, `term_frequency`, `word_length`,
    /// `document_frequency`
    TfidfInputs,

    /// Top `$limit` source terms by mean edge weight: `term`, `average`
    AverageTermWeight { relationship: RelationshipKind },
}

impl Query {
    pub fn is_read_only(&self) -> bool {
        !matches!(
            self,
            Query::DeleteNodes
                | Query::CreateUniqueConstraint { .. }
                | Query::MergeNodes { .. }
                | Query::MergeRelationships { .. }
        )
    }

    /// Parameters the query cannot run without
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Query::DeleteNodes | Query::AverageTermWeight { .. } => &["limit"],
            Query::MergeNodes { .. } | Query::MergeRelationships { .. } => &["batch"],
            Query::TermEdges { .. } => &["batch"],
            Query::TermDocumentCounts | Query::TfidfInputs => &["batch", "corpus"],
            Query::CorpusDocuments => &["corpus"],
            Query::CreateUniqueConstraint { .. }
            | Query::CountConstraints
            | Query::CountNodes { .. }
            | Query::CountRelationships { .. }
            | Query::NodeUids { .. } => &[],
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Query::DeleteNodes => "delete_nodes",
            Query::CreateUniqueConstraint { .. } => "create_unique_constraint",
            Query::CountConstraints => "count_constraints",
            Query::MergeNodes { .. } => "merge_nodes",
            Query::MergeRelationships { .. } => "merge_relationships",
            Query::CountNodes { .. } => "count_nodes",
            Query::CountRelationships { .. } => "count_relationships",
            Query::NodeUids { .. } => "node_uids",
            Query::CorpusDocuments => "corpus_documents",
            Query::TermEdges { .. } => "term_edges",
            Query::TermDocumentCounts => "term_document_counts",
            Query::TfidfInputs => "tfidf_inputs",
            Query::AverageTermWeight { .. } => "average_term_weight",
        }
    }

    /// OpenCypher rendering, for logs and remote backends
    pub fn to_cypher(&self) -> String {
        let term = NodeKind::Term;
        let corpus = NodeKind::Corpus;
        let document = NodeKind::Document;
        match self {
            Query::DeleteNodes => {
                "MATCH (n) WITH n LIMIT $limit DETACH DELETE n RETURN count(n) AS deleted".to_string()
            }
            Query::CreateUniqueConstraint { node } => format!(
                "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
                node.label(),
                node.uid_attr()
            ),
            Query::CountConstraints => "SHOW CONSTRAINTS YIELD name RETURN count(name) AS count".to_string(),
            Query::MergeNodes { node } => {
                let mut cypher = format!(
                    "UNWIND $batch AS row MERGE (n:{} {{{}: row.uid}})",
                    node.label(),
                    node.uid_attr()
                );
                let sets: Vec<String> = node
                    .attrs()
                    .iter()
                    .map(|a| format!("n.{0} = row.{0}", a.name))
                    .collect();
                if !sets.is_empty() {
                    cypher.push_str(" SET ");
                    cypher.push_str(&sets.join(", "));
                }
                cypher
            }
            Query::MergeRelationships { relationship } => {
                let (from, to) = (relationship.source(), relationship.target());
                let mut cypher = format!(
                    "UNWIND $batch AS row MATCH (a:{} {{{}: row.from}}) MATCH (b:{} {{{}: row.to}}) MERGE (a)-[r:{}]->(b)",
                    from.label(),
                    from.uid_attr(),
                    to.label(),
                    to.uid_attr(),
                    relationship.label()
                );
                let sets: Vec<String> = relationship
                    .attrs()
                    .iter()
                    .map(|a| format!("r.{0} = row.{0}", a.name))
                    .collect();
                if !sets.is_empty() {
                    cypher.push_str(" SET ");
                    cypher.push_str(&sets.join(", "));
                }
                cypher
            }
            Query::CountNodes { node: Some(node) } => {
                format!("MATCH (n:{}) RETURN count(n) AS count", node.label())
            }
            Query::CountNodes { node: None } => "MATCH (n) RETURN count(n) AS count".to_string(),
            Query::CountRelationships { relationship: Some(rel) } => {
                format!("MATCH ()-[r:{}]->() RETURN count(r) AS count", rel.label())
            }
            Query::CountRelationships { relationship: None } => {
                "MATCH ()-[r]->() RETURN count(r) AS count".to_string()
            }
            Query::NodeUids { node } => {
                format!("MATCH (n:{}) RETURN n.{} AS uid", node.label(), node.uid_attr())
            }
            Query::CorpusDocuments => format!(
                "MATCH (d:{})-[:{}]->(c:{} {{{}: $corpus}}) RETURN d.{} AS uid, d.word_length AS word_length",
                document.label(),
                RelationshipKind::InCorpus.label(),
                corpus.label(),
                corpus.uid_attr(),
                document.uid_attr()
            ),
            Query::TermEdges { relationship } => {
                let target = relationship.target();
                format!(
                    "MATCH (t:{})-[r:{}]->(x:{}) WHERE t.{} IN $batch RETURN t.{} AS term, x.{} AS target, r.value AS value",
                    term.label(),
                    relationship.label(),
                    target.label(),
                    term.uid_attr(),
                    term.uid_attr(),
                    target.uid_attr()
                )
            }
            Query::TermDocumentCounts => format!(
                "MATCH (t:{})-[:{}]->(d:{})-[:{}]->(c:{} {{{}: $corpus}}) WHERE t.{} IN $batch RETURN t.{} AS term, count(d) AS count",
                term.label(),
                RelationshipKind::TermFrequency.label(),
                document.label(),
                RelationshipKind::InCorpus.label(),
                corpus.label(),
                corpus.uid_attr(),
                term.uid_attr(),
                term.uid_attr()
            ),
            Query::TfidfInputs => format!(
                "MATCH (c:{} {{{}: $corpus}})<-[df:{}]-(t:{})-[tf:{}]->(d:{})-[:{}]->(c) WHERE t.{} IN $batch \
                 RETURN t.{} AS term, d.{} AS document, tf.value AS term_frequency, d.word_length AS word_length, df.value AS document_frequency",
                corpus.label(),
                corpus.uid_attr(),
                RelationshipKind::DocumentFrequency.label(),
                term.label(),
                RelationshipKind::TermFrequency.label(),
                document.label(),
                RelationshipKind::InCorpus.label(),
                term.uid_attr(),
                term.uid_attr(),
                document.uid_attr()
            ),
            Query::AverageTermWeight { relationship } => format!(
                "MATCH (t:{})-[r:{}]->() RETURN t.{} AS term, avg(r.value) AS average ORDER BY average DESC, term LIMIT $limit",
                term.label(),
                relationship.label(),
                term.uid_attr()
            ),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cypher())
    }
}
