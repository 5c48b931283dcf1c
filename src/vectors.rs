//! Sparse vector materialization
//!
//! Joins the term and document dictionaries against weighted term edges and
//! writes one sparse vector per document as newline-delimited JSON:
//!
//! ```text
//! {"document_id": 0, "tfidf_vector": {"0": 0.73, "4": 0.12}}
//! ```
//!
//! Lines are ordered by document id and inner keys ascend. Documents with
//! no surviving edges are absent.

use futures::TryStreamExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifact::AtomicFile;
use crate::client::GraphClient;
use crate::dictionary::Dictionaries;
use crate::graph::PropertyValue;
use crate::query::{Params, Query, QueryError};
use crate::schema::RelationshipKind;

/// Terms per query
pub const DEFAULT_VECTOR_BATCH_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed vector line {line}: {source}")]
    Decode { line: usize, source: serde_json::Error },
}

pub type MaterializeResult<T> = Result<T, MaterializeError>;

/// Which weighted edge a vector is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    /// `tfidf` edges, through the document_corpus join node
    Tfidf,
    /// `term_frequency` edges
    DocumentFrequency,
}

impl VectorKind {
    pub fn relationship(&self) -> RelationshipKind {
        match self {
            VectorKind::Tfidf => RelationshipKind::Tfidf,
            VectorKind::DocumentFrequency => RelationshipKind::TermFrequency,
        }
    }

    /// Short tag used in artifact file names
    pub fn file_tag(&self) -> &'static str {
        match self {
            VectorKind::Tfidf => "tfidf",
            VectorKind::DocumentFrequency => "df",
        }
    }
}

/// One document's vector; field names are part of the file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub document_id: u32,
    pub tfidf_vector: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Vectors produced
    pub documents: usize,
    /// Edge rows returned by the graph
    pub rows: usize,
    /// Rows outside the dictionaries or without a numeric weight
    pub dropped: usize,
}

pub struct VectorMaterializer<'a> {
    client: &'a GraphClient,
    dictionaries: &'a Dictionaries,
    batch_size: usize,
    corpus: Option<String>,
}

impl<'a> VectorMaterializer<'a> {
    pub fn new(client: &'a GraphClient, dictionaries: &'a Dictionaries) -> Self {
        Self {
            client,
            dictionaries,
            batch_size: DEFAULT_VECTOR_BATCH_SIZE,
            corpus: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Restrict edges to documents of one corpus
    pub fn with_corpus(mut self, corpus: impl Into<String>) -> Self {
        self.corpus = Some(corpus.into());
        self
    }

    /// Build vectors, sorted by document id
    pub async fn materialize(&self, kind: VectorKind) -> MaterializeResult<(Vec<SparseVector>, MaterializeReport)> {
        let query = Query::TermEdges {
            relationship: kind.relationship(),
        };
        let mut params = Params::new();
        if let Some(corpus) = &self.corpus {
            params.insert("corpus".to_string(), corpus.as_str().into());
        }
        let vocabulary: Vec<PropertyValue> = self.dictionaries.terms.keys().map(PropertyValue::from).collect();

        let mut rows = self.client.run_batched(vocabulary, self.batch_size, &query, &params)?;

        // Single writer: batches may run concurrently, accumulation does not
        let mut accumulators: IndexMap<String, BTreeMap<u32, f64>> = IndexMap::new();
        let mut report = MaterializeReport::default();
        while let Some(record) = rows.try_next().await? {
            report.rows += 1;
            let term_id = record.get_str("term").and_then(|t| self.dictionaries.terms.id(t));
            let document = record
                .get_str("document")
                .filter(|d| self.dictionaries.documents.id(d).is_some());
            let weight = record.get_f64("value");

            let (Some(term_id), Some(document), Some(weight)) = (term_id, document, weight) else {
                report.dropped += 1;
                continue;
            };
            accumulators
                .entry(document.to_string())
                .or_default()
                .insert(term_id, weight);
        }

        let mut vectors: Vec<SparseVector> = accumulators
            .into_iter()
            .filter_map(|(uid, tfidf_vector)| {
                self.dictionaries.documents.id(&uid).map(|document_id| SparseVector {
                    document_id,
                    tfidf_vector,
                })
            })
            .collect();
        vectors.sort_by_key(|v| v.document_id);
        report.documents = vectors.len();

        debug!(
            kind = kind.file_tag(),
            rows = report.rows,
            dropped = report.dropped,
            "Accumulated vectors"
        );
        Ok((vectors, report))
    }

    /// Build vectors and write them atomically to `path`
    pub async fn materialize_to(&self, kind: VectorKind, path: &Path, stage: &str) -> MaterializeResult<MaterializeReport> {
        let (vectors, report) = self.materialize(kind).await?;
        write_vectors(path, stage, &vectors)?;
        info!(
            kind = kind.file_tag(),
            documents = report.documents,
            dropped = report.dropped,
            path = %path.display(),
            "Wrote vectors"
        );
        Ok(report)
    }
}

/// `", "` and `": "` separators, matching the established vector file format
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Render one vector as a line, without the trailing newline
pub fn vector_line(vector: &SparseVector) -> io::Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    vector.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_vectors(path: &Path, stage: &str, vectors: &[SparseVector]) -> io::Result<PathBuf> {
    let mut file = AtomicFile::create(path, stage)?;
    for vector in vectors {
        writeln!(file, "{}", vector_line(vector)?)?;
    }
    file.commit()
}

pub fn read_vectors(path: &Path) -> MaterializeResult<Vec<SparseVector>> {
    let reader = BufReader::new(File::open(path)?);
    let mut vectors = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let vector = serde_json::from_str(&line).map_err(|source| MaterializeError::Decode {
            line: index + 1,
            source,
        })?;
        vectors.push(vector);
    }
    Ok(vectors)
}
