//! Dense integer dictionaries for terms and documents
//!
//! Ids are assigned in presentation order starting at 0; a key seen again
//! keeps its first id. The four JSON files (forward and reversed, for terms
//! and documents) are fixed for the lifetime of a model version.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::artifact::{stage_json, ArtifactLayout};

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("Term selection is empty; refusing to build dictionaries")]
    EmptyVocabulary,

    #[error("Dictionary {path} is inconsistent: {reason}")]
    Inconsistent { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DictionaryResult<T> = Result<T, DictionaryError>;

/// A key <-> dense id mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    forward: IndexMap<String, u32>,
    reverse: BTreeMap<u32, String>,
}

impl Dictionary {
    pub fn from_ordered<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dictionary = Dictionary::default();
        for key in keys {
            let key = key.into();
            if dictionary.forward.contains_key(&key) {
                continue;
            }
            let id = dictionary.forward.len() as u32;
            dictionary.reverse.insert(id, key.clone());
            dictionary.forward.insert(key, id);
        }
        dictionary
    }

    pub fn id(&self, key: &str) -> Option<u32> {
        self.forward.get(key).copied()
    }

    pub fn key(&self, id: u32) -> Option<&str> {
        self.reverse.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Keys in id order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.reverse.values().map(String::as_str)
    }

    pub fn forward(&self) -> &IndexMap<String, u32> {
        &self.forward
    }

    pub fn reverse(&self) -> &BTreeMap<u32, String> {
        &self.reverse
    }

    fn from_files(forward_path: &Path, reverse_path: &Path) -> DictionaryResult<Self> {
        let forward: IndexMap<String, u32> = read_json(forward_path)?;
        let reverse: BTreeMap<u32, String> = read_json(reverse_path)?;

        let inconsistent = |reason: String| DictionaryError::Inconsistent {
            path: reverse_path.to_path_buf(),
            reason,
        };
        if forward.len() != reverse.len() {
            return Err(inconsistent(format!(
                "{} forward entries, {} reversed",
                forward.len(),
                reverse.len()
            )));
        }
        for (key, id) in &forward {
            if reverse.get(id) != Some(key) {
                return Err(inconsistent(format!("id {} does not map back to '{}'", id, key)));
            }
        }
        Ok(Self { forward, reverse })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> DictionaryResult<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Term and document dictionaries of one model version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionaries {
    pub terms: Dictionary,
    pub documents: Dictionary,
}

impl Dictionaries {
    /// Encode the selected terms and the document population
    pub fn build<T, D>(terms: T, documents: D) -> DictionaryResult<Self>
    where
        T: IntoIterator,
        T::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let terms = Dictionary::from_ordered(terms);
        if terms.is_empty() {
            return Err(DictionaryError::EmptyVocabulary);
        }
        Ok(Self {
            terms,
            documents: Dictionary::from_ordered(documents),
        })
    }

    /// Whether all four files of this layout exist
    pub fn exist(layout: &ArtifactLayout) -> bool {
        layout.dictionary_files().iter().all(|p| p.exists())
    }

    /// Persist all four mappings; nothing is renamed into place until every
    /// file has been staged
    pub fn write(&self, layout: &ArtifactLayout, stage: &str) -> DictionaryResult<Vec<PathBuf>> {
        let staged = vec![
            stage_json(layout.term_dictionary(), stage, &self.terms.forward)?,
            stage_json(layout.reversed_term_dictionary(), stage, &self.terms.reverse)?,
            stage_json(layout.document_dictionary(), stage, &self.documents.forward)?,
            stage_json(layout.reversed_document_dictionary(), stage, &self.documents.reverse)?,
        ];

        let mut written = Vec::with_capacity(staged.len());
        for file in staged {
            written.push(file.commit()?);
        }
        info!(
            terms = self.terms.len(),
            documents = self.documents.len(),
            dir = %layout.model_root().display(),
            "Wrote dictionaries"
        );
        Ok(written)
    }

    pub fn load(layout: &ArtifactLayout) -> DictionaryResult<Self> {
        Ok(Self {
            terms: Dictionary::from_files(&layout.term_dictionary(), &layout.reversed_term_dictionary())?,
            documents: Dictionary::from_files(
                &layout.document_dictionary(),
                &layout.reversed_document_dictionary(),
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(dir: &TempDir) -> ArtifactLayout {
        ArtifactLayout::new("test", "v1", dir.path(), dir.path().join("data"))
    }

    #[test]
    fn test_first_seen_gets_lowest_id() {
        let dict = Dictionary::from_ordered(["dog", "cat", "dog", "ant"]);
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.id("dog"), Some(0));
        assert_eq!(dict.id("cat"), Some(1));
        assert_eq!(dict.id("ant"), Some(2));
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["dog", "cat", "ant"]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let terms = vec!["cat", "dog", "bird"];
        let docs = vec!["doc2", "doc1"];
        let a = Dictionaries::build(terms.clone(), docs.clone()).unwrap();
        let b = Dictionaries::build(terms, docs).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reverse_round_trip() {
        let dicts = Dictionaries::build(["cat", "dog"], ["doc1"]).unwrap();
        for (term, id) in dicts.terms.forward() {
            assert_eq!(dicts.terms.key(*id), Some(term.as_str()));
        }
        assert_eq!(dicts.documents.key(0), Some("doc1"));
    }

    #[test]
    fn test_empty_vocabulary_is_an_error() {
        let result = Dictionaries::build(Vec::<String>::new(), ["doc1"]);
        assert!(matches!(result, Err(DictionaryError::EmptyVocabulary)));
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let dicts = Dictionaries::build(["cat", "dog"], ["doc1", "doc2"]).unwrap();

        let written = dicts.write(&layout, "dictionary-build").unwrap();
        assert_eq!(written.len(), 4);
        assert!(Dictionaries::exist(&layout));

        let forward = std::fs::read_to_string(layout.term_dictionary()).unwrap();
        assert_eq!(forward, r#"{"cat":0,"dog":1}"#);
        let reverse = std::fs::read_to_string(layout.reversed_term_dictionary()).unwrap();
        assert_eq!(reverse, r#"{"0":"cat","1":"dog"}"#);

        assert_eq!(Dictionaries::load(&layout).unwrap(), dicts);
    }

    #[test]
    fn test_load_rejects_mismatched_reverse() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        Dictionaries::build(["cat", "dog"], ["doc1"])
            .unwrap()
            .write(&layout, "dictionary-build")
            .unwrap();
        std::fs::write(layout.reversed_term_dictionary(), r#"{"0":"dog","1":"cat"}"#).unwrap();

        assert!(matches!(
            Dictionaries::load(&layout),
            Err(DictionaryError::Inconsistent { .. })
        ));
    }
}
