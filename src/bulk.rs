//! Bulk-load CSV files
//!
//! One file family per node or relationship type, named after the registry's
//! base file name and split into parts: `node_term_0.csv`, `node_term_1.csv`.
//! Each part starts with the registry header. Quoting follows RFC 4180.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::artifact::AtomicFile;
use crate::graph::{PropertyMap, PropertyValue};
use crate::schema::{AttrSpec, NodeKind, RelationshipKind};

#[derive(Error, Debug)]
pub enum BulkError {
    #[error("{path}: header {found:?} does not match {expected:?}")]
    HeaderMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{path}:{line}: {reason}")]
    MalformedRow { path: PathBuf, line: usize, reason: String },

    #[error("{target} row has {found} cells, header has {expected}")]
    ColumnCount { target: String, expected: usize, found: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type BulkResult<T> = Result<T, BulkError>;

/// A node or relationship type, seen as a bulk-load file family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkTarget {
    Node(NodeKind),
    Relationship(RelationshipKind),
}

impl BulkTarget {
    /// Every target in load order: nodes first, then relationships
    pub fn all() -> impl Iterator<Item = BulkTarget> {
        NodeKind::ALL
            .into_iter()
            .map(BulkTarget::Node)
            .chain(RelationshipKind::ALL.into_iter().map(BulkTarget::Relationship))
    }

    pub fn base_file_name(&self) -> String {
        match self {
            BulkTarget::Node(kind) => kind.base_file_name().to_string(),
            BulkTarget::Relationship(kind) => kind.base_file_name(),
        }
    }

    pub fn header(&self) -> Vec<&'static str> {
        match self {
            BulkTarget::Node(kind) => kind.header(),
            BulkTarget::Relationship(kind) => kind.header(),
        }
    }

    fn attrs(&self) -> &'static [AttrSpec] {
        match self {
            BulkTarget::Node(kind) => kind.attrs(),
            BulkTarget::Relationship(kind) => kind.attrs(),
        }
    }

    pub fn part_file_name(&self, part: usize) -> String {
        format!("{}_{}.csv", self.base_file_name(), part)
    }

    /// Whether `file_name` is one of this target's parts.
    ///
    /// Exact match on `<base>_<digits>.csv`: `node_document_0.csv` belongs
    /// to documents, `node_document_corpus_0.csv` does not.
    pub fn owns_file(&self, file_name: &str) -> bool {
        let base = self.base_file_name();
        file_name
            .strip_prefix(base.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix(".csv"))
            .map_or(false, |part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
    }

    fn part_number(&self, file_name: &str) -> Option<usize> {
        if !self.owns_file(file_name) {
            return None;
        }
        let base_len = self.base_file_name().len() + 1;
        file_name[base_len..file_name.len() - 4].parse().ok()
    }
}

impl std::fmt::Display for BulkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkTarget::Node(kind) => write!(f, "node {}", kind),
            BulkTarget::Relationship(kind) => write!(f, "relationship {}", kind),
        }
    }
}

/// Format one cell; quotes only when needed
pub fn csv_field(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Null => String::new(),
        PropertyValue::String(s) => {
            if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
                format!("\"{}\"", s.replace('"', "\"\""))
            } else {
                s.clone()
            }
        }
        PropertyValue::Integer(i) => i.to_string(),
        PropertyValue::Float(f) => f.to_string(),
        PropertyValue::Boolean(b) => b.to_string(),
        other => {
            let json = other.to_json().to_string();
            format!("\"{}\"", json.replace('"', "\"\""))
        }
    }
}

/// Writes one target's rows, rolling to a new part every `max_records` rows.
///
/// Parts are staged under temp names; `finish` renames them into place and
/// removes stale parts left by an earlier, larger run.
pub struct BulkWriter {
    target: BulkTarget,
    dir: PathBuf,
    stage: String,
    max_records: usize,
    rows_in_part: usize,
    rows: usize,
    current: Option<AtomicFile>,
    staged: Vec<AtomicFile>,
}

impl BulkWriter {
    /// `max_records == 0` means a single part
    pub fn new(target: BulkTarget, dir: impl Into<PathBuf>, stage: &str, max_records: usize) -> Self {
        Self {
            target,
            dir: dir.into(),
            stage: stage.to_string(),
            max_records: if max_records == 0 { usize::MAX } else { max_records },
            rows_in_part: 0,
            rows: 0,
            current: None,
            staged: Vec::new(),
        }
    }

    pub fn target(&self) -> BulkTarget {
        self.target
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn open_part(&mut self) -> BulkResult<()> {
        if let Some(done) = self.current.take() {
            self.staged.push(done);
        }
        let path = self.dir.join(self.target.part_file_name(self.staged.len()));
        let mut file = AtomicFile::create(path, &self.stage)?;
        writeln!(file, "{}", self.target.header().join(","))?;
        self.current = Some(file);
        self.rows_in_part = 0;
        Ok(())
    }

    pub fn write_row(&mut self, cells: &[PropertyValue]) -> BulkResult<()> {
        let expected = self.target.header().len();
        if cells.len() != expected {
            return Err(BulkError::ColumnCount {
                target: self.target.to_string(),
                expected,
                found: cells.len(),
            });
        }
        if self.current.is_none() || self.rows_in_part >= self.max_records {
            self.open_part()?;
        }
        let line: Vec<String> = cells.iter().map(csv_field).collect();
        if let Some(file) = self.current.as_mut() {
            writeln!(file, "{}", line.join(","))?;
        }
        self.rows_in_part += 1;
        self.rows += 1;
        Ok(())
    }

    /// Commit every part (a header-only part when no rows were written)
    pub fn finish(mut self) -> BulkResult<Vec<PathBuf>> {
        if self.current.is_none() && self.staged.is_empty() {
            self.open_part()?;
        }
        if let Some(last) = self.current.take() {
            self.staged.push(last);
        }

        let mut written = Vec::with_capacity(self.staged.len());
        for file in self.staged {
            written.push(file.commit()?);
        }

        for stale in list_parts(self.target, &self.dir)? {
            if !written.contains(&stale) {
                fs::remove_file(&stale)?;
            }
        }
        debug!(bulk = %self.target, rows = self.rows, parts = written.len(), "Committed bulk file");
        Ok(written)
    }
}

/// Parts of `target` present in `dir`, in part order
pub fn list_parts(target: BulkTarget, dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut parts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(part) = target.part_number(&name) {
            parts.push((part, entry.path()));
        }
    }
    parts.sort();
    Ok(parts.into_iter().map(|(_, path)| path).collect())
}

/// Split RFC 4180 text into records
fn parse_records(text: &str) -> Result<Vec<(usize, Vec<String>)>, (usize, String)> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '"' => return Err((line, "quote inside unquoted field".to_string())),
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push((record_line, std::mem::take(&mut record)));
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err((line, "unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push((record_line, record));
    }
    Ok(records)
}

/// Read one part into upsert rows: `{uid, <attrs>}` for nodes, `{from, to,
/// <attrs>}` for relationships. Empty numeric cells are left out.
pub fn read_rows(target: BulkTarget, path: &Path) -> BulkResult<Vec<PropertyMap>> {
    let text = fs::read_to_string(path)?;
    let records = parse_records(&text).map_err(|(line, reason)| BulkError::MalformedRow {
        path: path.to_path_buf(),
        line,
        reason,
    })?;

    let expected: Vec<String> = target.header().iter().map(|h| h.to_string()).collect();
    let mut records = records.into_iter();
    let found = records.next().map(|(_, header)| header).unwrap_or_default();
    if found != expected {
        return Err(BulkError::HeaderMismatch {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }

    let key_columns: &[&str] = match target {
        BulkTarget::Node(_) => &["uid"],
        BulkTarget::Relationship(_) => &["from", "to"],
    };
    let attrs = target.attrs();

    let mut rows = Vec::new();
    for (line, cells) in records {
        if cells.len() != expected.len() {
            return Err(BulkError::MalformedRow {
                path: path.to_path_buf(),
                line,
                reason: format!("{} cells, expected {}", cells.len(), expected.len()),
            });
        }
        let (keys, values) = cells.split_at(key_columns.len());

        let mut row = PropertyMap::new();
        for (column, cell) in key_columns.iter().zip(keys) {
            if cell.is_empty() {
                return Err(BulkError::MalformedRow {
                    path: path.to_path_buf(),
                    line,
                    reason: format!("empty {}", column),
                });
            }
            row.insert(column.to_string(), PropertyValue::String(cell.clone()));
        }
        for (attr, cell) in attrs.iter().zip(values) {
            if cell.is_empty() && attr.kind != crate::schema::AttrKind::Text {
                continue;
            }
            let value = attr.kind.parse(cell).ok_or_else(|| BulkError::MalformedRow {
                path: path.to_path_buf(),
                line,
                reason: format!("'{}' is not a valid {:?} for {}", cell, attr.kind, attr.name),
            })?;
            row.insert(attr.name.to_string(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}
