//! Filesystem-backed coordination store rooted at a local directory.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{normalize, CoordinationStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> StoreResult<(String, PathBuf)> {
        let normalized = normalize(path)?;
        let full = if normalized.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&normalized)
        };
        Ok((normalized, full))
    }
}

#[async_trait]
impl CoordinationStore for FsStore {
    async fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let (name, full) = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => return Ok(Some(Vec::new())),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&name, e)),
        }
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&name, e)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let (name, full) = self.resolve(path)?;
        if name.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(&name, e))?;
        }
        // Write-then-rename so readers never observe a torn node.
        let tmp = full.with_extension("tmp~");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| StoreError::io(&name, e))?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| StoreError::io(&name, e))
    }

    async fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        let (name, full) = self.resolve(path)?;
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(StoreError::io(&name, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&name, e))?
        {
            if let Some(child) = entry.file_name().to_str() {
                if !child.ends_with(".tmp~") {
                    names.push(child.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let (name, full) = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| StoreError::io(&name, e))
    }

    async fn mkdir(&self, path: &str) -> StoreResult<()> {
        let (name, full) = self.resolve(path)?;
        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|e| StoreError::io(&name, e))
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let (name, full) = self.resolve(path)?;
        if name.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let result = match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&full).await,
            Ok(_) => tokio::fs::remove_file(&full).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&name, e)),
        }
    }
}
