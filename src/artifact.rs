//! Artifact layout and atomic file writes
//!
//! Every file a stage produces is written to a stage-scoped temp name next
//! to its target (`.{name}.{stage}.tmp`) and renamed into place on commit.
//! An `AtomicFile` dropped without `commit` removes its temp file, so a
//! failed stage never leaves a half-written artifact under the real name.

use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::vectors::VectorKind;

/// Where each pipeline artifact lives on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    model_name: String,
    model_root: PathBuf,
    data_dir: PathBuf,
}

impl ArtifactLayout {
    /// Model artifacts go under `<model_dir>/<model_version>/`
    pub fn new(
        model_name: impl Into<String>,
        model_version: &str,
        model_dir: impl AsRef<Path>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_root: model_dir.as_ref().join(model_version),
            data_dir: data_dir.into(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_root(&self) -> &Path {
        &self.model_root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn model_file(&self, suffix: &str) -> PathBuf {
        self.model_root.join(format!("{}_{}", self.model_name, suffix))
    }

    pub fn term_dictionary(&self) -> PathBuf {
        self.model_file("term_dictionary.json")
    }

    pub fn reversed_term_dictionary(&self) -> PathBuf {
        self.model_file("reversed_term_dictionary.json")
    }

    pub fn document_dictionary(&self) -> PathBuf {
        self.model_file("document_dictionary.json")
    }

    pub fn reversed_document_dictionary(&self) -> PathBuf {
        self.model_file("reversed_document_dictionary.json")
    }

    /// The four dictionary files, forward before reverse
    pub fn dictionary_files(&self) -> [PathBuf; 4] {
        [
            self.term_dictionary(),
            self.reversed_term_dictionary(),
            self.document_dictionary(),
            self.reversed_document_dictionary(),
        ]
    }

    /// One file per vector kind
    pub fn vectors(&self, kind: VectorKind) -> PathBuf {
        self.model_file(&format!("{}_vectors.jsonl", kind.file_tag()))
    }

    /// Record of the files a clustering consumer produced
    pub fn clustering_manifest(&self) -> PathBuf {
        self.model_file("model_manifest.json")
    }

    /// Staged bulk-load CSVs
    pub fn graph_staging_dir(&self) -> PathBuf {
        self.data_dir.join("graph")
    }

    /// Preprocessed corpus text
    pub fn text_dir(&self) -> PathBuf {
        self.data_dir.join("text")
    }

    /// Blobs fetched for graph builds
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }
}

/// A file written under a temp name and renamed into place on `commit`
pub struct AtomicFile {
    target: PathBuf,
    temp: PathBuf,
    writer: BufWriter<File>,
    committed: bool,
}

impl AtomicFile {
    /// Open the temp file for `target`, creating parent directories
    pub fn create(target: impl Into<PathBuf>, stage: &str) -> io::Result<Self> {
        let target = target.into();
        let parent = target.parent().map(Path::to_path_buf).unwrap_or_default();
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(&parent)?;
        }
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no file name"))?;
        let temp = parent.join(format!(".{}.{}.tmp", name, stage));
        let writer = BufWriter::new(File::create(&temp)?);

        Ok(Self {
            target,
            temp,
            writer,
            committed: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Flush, sync and rename over the target
    pub fn commit(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        fs::rename(&self.temp, &self.target)?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// Serialize `value` as JSON to a temp file, ready to commit
pub fn stage_json<T: Serialize + ?Sized>(target: impl Into<PathBuf>, stage: &str, value: &T) -> io::Result<AtomicFile> {
    let mut file = AtomicFile::create(target, stage)?;
    serde_json::to_writer(&mut file, value)?;
    Ok(file)
}

/// Serialize `value` as JSON and commit it
pub fn write_json_atomic<T: Serialize + ?Sized>(target: impl Into<PathBuf>, stage: &str, value: &T) -> io::Result<PathBuf> {
    stage_json(target, stage, value)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("pubmed", "v1", "/models", "/data");
        assert_eq!(
            layout.term_dictionary(),
            PathBuf::from("/models/v1/pubmed_term_dictionary.json")
        );
        assert_eq!(
            layout.vectors(VectorKind::Tfidf),
            PathBuf::from("/models/v1/pubmed_tfidf_vectors.jsonl")
        );
        assert_ne!(layout.vectors(VectorKind::Tfidf), layout.vectors(VectorKind::DocumentFrequency));
        assert_eq!(layout.text_dir(), PathBuf::from("/data/text"));
    }

    #[test]
    fn test_commit_renames_into_place() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("out.json");

        let path = write_json_atomic(&target, "dictionary-build", &serde_json::json!({"cat": 0})).unwrap();

        assert_eq!(path, target);
        assert_eq!(fs::read_to_string(&target).unwrap(), r#"{"cat":0}"#);
        assert!(!dir.path().join("nested").join(".out.json.dictionary-build.tmp").exists());
    }

    #[test]
    fn test_uncommitted_file_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("vectors.jsonl");
        {
            let mut file = AtomicFile::create(&target, "training-vector-build").unwrap();
            file.write_all(b"partial").unwrap();
            assert!(file.temp_path().exists());
        }
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
