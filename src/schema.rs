//! Graph schema registry
//!
//! Every node and relationship type the pipeline knows about, with its
//! identifying attribute, attribute set and bulk-load file naming. Other
//! modules look identifiers up here instead of spelling them out.
//!
//! Adding a type means adding a variant, its `spec()` entry and a bulk-load
//! producer; query building, uploads and graph builds pick it up from `ALL`.

use crate::graph::PropertyValue;
use std::fmt;

/// Value type of a declared attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Text,
    Integer,
    Float,
}

impl AttrKind {
    /// Parse a bulk-load cell into a typed value
    pub fn parse(&self, raw: &str) -> Option<PropertyValue> {
        match self {
            AttrKind::Text => Some(PropertyValue::String(raw.to_string())),
            AttrKind::Integer => raw.trim().parse::<i64>().ok().map(PropertyValue::Integer),
            AttrKind::Float => raw.trim().parse::<f64>().ok().map(PropertyValue::Float),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    pub name: &'static str,
    pub kind: AttrKind,
}

const fn text(name: &'static str) -> AttrSpec {
    AttrSpec { name, kind: AttrKind::Text }
}

const fn integer(name: &'static str) -> AttrSpec {
    AttrSpec { name, kind: AttrKind::Integer }
}

const fn float(name: &'static str) -> AttrSpec {
    AttrSpec { name, kind: AttrKind::Float }
}

/// Static description of a node type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpec {
    pub label: &'static str,
    /// Identifying attribute; its value is the node's uid
    pub uid_attr: &'static str,
    /// Non-identifying attributes, in bulk-file column order
    pub attrs: &'static [AttrSpec],
    pub base_file_name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Corpus,
    Document,
    Term,
    DocumentCorpus,
    DocumentCategory,
    NamedEntityTag,
}

const CORPUS: NodeSpec = NodeSpec {
    label: "corpus",
    uid_attr: "name",
    attrs: &[text("description")],
    base_file_name: "node_corpus",
};

const DOCUMENT: NodeSpec = NodeSpec {
    label: "document",
    uid_attr: "filename",
    attrs: &[text("source"), text("text"), integer("word_length")],
    base_file_name: "node_document",
};

const TERM: NodeSpec = NodeSpec {
    label: "term",
    uid_attr: "term",
    attrs: &[text("ngram_type")],
    base_file_name: "node_term",
};

const DOCUMENT_CORPUS: NodeSpec = NodeSpec {
    label: "document_corpus",
    uid_attr: "document_corpus",
    attrs: &[],
    base_file_name: "node_document_corpus",
};

const DOCUMENT_CATEGORY: NodeSpec = NodeSpec {
    label: "document_category",
    uid_attr: "category",
    attrs: &[],
    base_file_name: "node_document_category",
};

const NAMED_ENTITY_TAG: NodeSpec = NodeSpec {
    label: "named_entity_tag",
    uid_attr: "tag",
    attrs: &[],
    base_file_name: "node_named_entity",
};

impl NodeKind {
    /// All node types, in bulk-load order
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Corpus,
        NodeKind::Document,
        NodeKind::Term,
        NodeKind::DocumentCorpus,
        NodeKind::DocumentCategory,
        NodeKind::NamedEntityTag,
    ];

    pub fn spec(&self) -> &'static NodeSpec {
        match self {
            NodeKind::Corpus => &CORPUS,
            NodeKind::Document => &DOCUMENT,
            NodeKind::Term => &TERM,
            NodeKind::DocumentCorpus => &DOCUMENT_CORPUS,
            NodeKind::DocumentCategory => &DOCUMENT_CATEGORY,
            NodeKind::NamedEntityTag => &NAMED_ENTITY_TAG,
        }
    }

    pub fn label(&self) -> &'static str {
        self.spec().label
    }

    pub fn uid_attr(&self) -> &'static str {
        self.spec().uid_attr
    }

    pub fn attrs(&self) -> &'static [AttrSpec] {
        self.spec().attrs
    }

    pub fn attr(&self, name: &str) -> Option<&'static AttrSpec> {
        self.attrs().iter().find(|a| a.name == name)
    }

    pub fn base_file_name(&self) -> &'static str {
        self.spec().base_file_name
    }

    /// Bulk-load header: uid column followed by the attributes
    pub fn header(&self) -> Vec<&'static str> {
        std::iter::once(self.uid_attr())
            .chain(self.attrs().iter().map(|a| a.name))
            .collect()
    }

    pub fn from_label(label: &str) -> Option<NodeKind> {
        NodeKind::ALL.into_iter().find(|k| k.label() == label)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Static description of a relationship type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipSpec {
    pub label: &'static str,
    pub from: NodeKind,
    pub to: NodeKind,
    /// Bulk-file column holding the source node's uid
    pub from_column: &'static str,
    /// Bulk-file column holding the target node's uid
    pub to_column: &'static str,
    pub attrs: &'static [AttrSpec],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipKind {
    InCorpus,
    RelatedToCorpus,
    RelatedToDocument,
    TermFrequency,
    MostFrequentTerm,
    InDocumentCategory,
    RelatedToTag,
    DocumentFrequency,
    Tfidf,
}

const NO_ATTRS: &[AttrSpec] = &[];
const VALUE_COUNT: &[AttrSpec] = &[integer("value")];
const VALUE_WEIGHT: &[AttrSpec] = &[float("value")];

impl RelationshipKind {
    /// All relationship types, in bulk-load order
    pub const ALL: [RelationshipKind; 9] = [
        RelationshipKind::InCorpus,
        RelationshipKind::RelatedToCorpus,
        RelationshipKind::RelatedToDocument,
        RelationshipKind::TermFrequency,
        RelationshipKind::MostFrequentTerm,
        RelationshipKind::InDocumentCategory,
        RelationshipKind::RelatedToTag,
        RelationshipKind::DocumentFrequency,
        RelationshipKind::Tfidf,
    ];

    pub fn spec(&self) -> RelationshipSpec {
        use NodeKind::*;
        let (label, from, to, from_column, to_column, attrs) = match self {
            RelationshipKind::TermFrequency => {
                ("term_frequency", Term, Document, "term", "document", VALUE_COUNT)
            }
            RelationshipKind::DocumentFrequency => {
                ("document_frequency", Term, Corpus, "term", "corpus", VALUE_COUNT)
            }
            RelationshipKind::Tfidf => {
                ("tfidf", Term, DocumentCorpus, "term", "document_corpus", VALUE_WEIGHT)
            }
            RelationshipKind::InCorpus => ("in_corpus", Document, Corpus, "document", "corpus", NO_ATTRS),
            RelationshipKind::RelatedToCorpus => {
                ("related_to_corpus", DocumentCorpus, Corpus, "document_corpus", "corpus", NO_ATTRS)
            }
            RelationshipKind::RelatedToDocument => {
                ("related_to_document", DocumentCorpus, Document, "document_corpus", "document", NO_ATTRS)
            }
            RelationshipKind::MostFrequentTerm => {
                ("most_frequent_term", Document, Term, "document", "term", VALUE_COUNT)
            }
            RelationshipKind::InDocumentCategory => {
                ("in_document_category", Document, DocumentCategory, "document", "category", NO_ATTRS)
            }
            RelationshipKind::RelatedToTag => {
                ("related_to_tag", Term, NamedEntityTag, "term", "named_entity_tag", NO_ATTRS)
            }
        };
        RelationshipSpec { label, from, to, from_column, to_column, attrs }
    }

    pub fn label(&self) -> &'static str {
        self.spec().label
    }

    pub fn source(&self) -> NodeKind {
        self.spec().from
    }

    pub fn target(&self) -> NodeKind {
        self.spec().to
    }

    pub fn attrs(&self) -> &'static [AttrSpec] {
        self.spec().attrs
    }

    /// The weight attribute, for relationships that carry one
    pub fn weight_attr(&self) -> Option<&'static AttrSpec> {
        self.attrs().iter().find(|a| a.name == "value")
    }

    pub fn base_file_name(&self) -> String {
        format!("relationship_{}", self.label())
    }

    /// Bulk-load header: source column, target column, then attributes
    pub fn header(&self) -> Vec<&'static str> {
        let spec = self.spec();
        [spec.from_column, spec.to_column]
            .into_iter()
            .chain(spec.attrs.iter().map(|a| a.name))
            .collect()
    }

    pub fn from_label(label: &str) -> Option<RelationshipKind> {
        RelationshipKind::ALL.into_iter().find(|k| k.label() == label)
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Uid of the join node for one document's membership in one corpus
pub fn document_corpus_uid(document: &str, corpus: &str) -> String {
    format!("{}_{}", document, corpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_label_covers_all_kinds() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_label(kind.label()), Some(kind));
        }
        for kind in RelationshipKind::ALL {
            assert_eq!(RelationshipKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(NodeKind::from_label("person"), None);
    }

    #[test]
    fn test_headers() {
        assert_eq!(
            NodeKind::Document.header(),
            vec!["filename", "source", "text", "word_length"]
        );
        assert_eq!(NodeKind::DocumentCorpus.header(), vec!["document_corpus"]);
        assert_eq!(
            RelationshipKind::Tfidf.header(),
            vec!["term", "document_corpus", "value"]
        );
        assert_eq!(RelationshipKind::InCorpus.header(), vec!["document", "corpus"]);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(NodeKind::NamedEntityTag.base_file_name(), "node_named_entity");
        assert_eq!(
            RelationshipKind::DocumentFrequency.base_file_name(),
            "relationship_document_frequency"
        );
    }

    #[test]
    fn test_endpoints_and_weights() {
        let tfidf = RelationshipKind::Tfidf;
        assert_eq!(tfidf.source(), NodeKind::Term);
        assert_eq!(tfidf.target(), NodeKind::DocumentCorpus);
        assert_eq!(tfidf.weight_attr().map(|a| a.kind), Some(AttrKind::Float));
        assert_eq!(
            RelationshipKind::TermFrequency.weight_attr().map(|a| a.kind),
            Some(AttrKind::Integer)
        );
        assert!(RelationshipKind::InCorpus.weight_attr().is_none());
    }

    #[test]
    fn test_attr_parse() {
        assert_eq!(AttrKind::Integer.parse("12"), Some(PropertyValue::Integer(12)));
        assert_eq!(AttrKind::Float.parse("0.73"), Some(PropertyValue::Float(0.73)));
        assert_eq!(AttrKind::Integer.parse("x"), None);
        assert_eq!(document_corpus_uid("doc1", "corpusA"), "doc1_corpusA");
    }
}
