//! Photo store on the local filesystem.

use async_trait::async_trait;
use autokyc_core::collaborators::{BlobStore, CollaboratorError};
use std::path::{Component, Path, PathBuf};

/// Stores blobs as files under `root`, addressed by relative path.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a blob path under the root. Absolute paths and `..` are refused.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, CollaboratorError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(CollaboratorError::Failed(format!(
                "blob path {path:?} escapes the store root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), CollaboratorError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CollaboratorError::Failed(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| CollaboratorError::Failed(format!("write {}: {e}", full.display())))?;
        tracing::debug!(path, "blob stored");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, CollaboratorError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| CollaboratorError::Failed(format!("read {}: {e}", full.display())))
    }

    async fn delete(&self, path: &str) -> Result<(), CollaboratorError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CollaboratorError::Failed(format!(
                "remove {}: {e}",
                full.display()
            ))),
        }
    }
}
