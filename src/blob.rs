//! Blob storage seam
//!
//! Containers hold flat, named files. Graph builds stage CSVs through one
//! container; trained model files go to another.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob {container}/{name} not found")]
    NotFound { container: String, name: String },

    #[error("Invalid blob name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Blob names in a container, sorted; an absent container is empty
    async fn list(&self, container: &str) -> BlobResult<Vec<String>>;

    /// Copy a blob to `dest`
    async fn download(&self, container: &str, name: &str, dest: &Path) -> BlobResult<()>;

    /// Store `src` under `name`, replacing any existing blob
    async fn upload(&self, container: &str, name: &str, src: &Path) -> BlobResult<()>;

    async fn delete(&self, container: &str, name: &str) -> BlobResult<()>;

    async fn exists(&self, container: &str, name: &str) -> BlobResult<bool> {
        Ok(self.list(container).await?.iter().any(|n| n == name))
    }
}

/// One directory per container under `root`
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> BlobResult<PathBuf> {
        validate_name(container)?;
        Ok(self.root.join(container))
    }

    fn blob_path(&self, container: &str, name: &str) -> BlobResult<PathBuf> {
        validate_name(name)?;
        Ok(self.container_dir(container)?.join(name))
    }
}

fn validate_name(name: &str) -> BlobResult<()> {
    if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\\') {
        return Err(BlobError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list(&self, container: &str) -> BlobResult<Vec<String>> {
        let dir = self.container_dir(container)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // in-flight uploads
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn download(&self, container: &str, name: &str, dest: &Path) -> BlobResult<()> {
        let src = self.blob_path(container, name)?;
        if !tokio::fs::try_exists(&src).await? {
            return Err(BlobError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, dest).await?;
        debug!(container, name, dest = %dest.display(), "Downloaded blob");
        Ok(())
    }

    async fn upload(&self, container: &str, name: &str, src: &Path) -> BlobResult<()> {
        let dest = self.blob_path(container, name)?;
        let dir = self.container_dir(container)?;
        tokio::fs::create_dir_all(&dir).await?;

        let temp = dir.join(format!(".{}.upload.tmp", name));
        tokio::fs::copy(src, &temp).await?;
        tokio::fs::rename(&temp, &dest).await?;
        debug!(container, name, "Uploaded blob");
        Ok(())
    }

    async fn delete(&self, container: &str, name: &str) -> BlobResult<()> {
        let path = self.blob_path(container, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs"));
        let src = dir.path().join("node_term_0.csv");
        std::fs::write(&src, "term,ngram_type\ncat,unigram\n").unwrap();

        assert!(store.list("graph").await.unwrap().is_empty());
        store.upload("graph", "node_term_0.csv", &src).await.unwrap();
        assert_eq!(store.list("graph").await.unwrap(), vec!["node_term_0.csv"]);
        assert!(store.exists("graph", "node_term_0.csv").await.unwrap());

        let dest = dir.path().join("downloads").join("node_term_0.csv");
        store.download("graph", "node_term_0.csv", &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "term,ngram_type\ncat,unigram\n");

        store.delete("graph", "node_term_0.csv").await.unwrap();
        assert!(!store.exists("graph", "node_term_0.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let err = store
            .download("graph", "missing.csv", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NotFound { .. }));
        assert!(matches!(
            store.delete("graph", "../escape").await,
            Err(BlobError::InvalidName(_))
        ));
    }
}
