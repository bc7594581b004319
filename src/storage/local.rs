use super::{normalize_path, Storage, StorageObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Filesystem-backed storage rooted at a directory
pub struct LocalStorage {
    name: String,
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(name: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(normalize_path(path)?))
    }

    fn storage_err(&self, path: &str, e: std::io::Error) -> Error {
        Error::Storage(format!("{}:{}: {}", self.name, path, e))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::metadata(&full)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<StorageObject>> {
        let base = self.resolve(dir)?;
        if !base.is_dir() {
            return Err(Error::StorageUnavailable(format!(
                "{}: directory not found: {}",
                self.name,
                base.display()
            )));
        }

        let root = self.root.clone();
        let name = self.name.clone();
        let files = tokio::task::spawn_blocking(move || -> Result<Vec<StorageObject>> {
            let mut files = Vec::new();
            for entry in WalkDir::new(&base).follow_links(true) {
                let entry = entry.map_err(|e| {
                    Error::StorageUnavailable(format!("{}: listing failed: {}", name, e))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                let path = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                files.push(StorageObject { path, size });
            }
            files.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(files)
        })
        .await
        .map_err(|e| Error::Other(format!("Listing task failed: {}", e)))??;

        debug!(storage = %self.name, dir, count = files.len(), "Listed files");
        Ok(files)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| self.storage_err(path, e))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.storage_err(path, e))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| self.storage_err(path, e))
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let full = self.resolve(path)?;
        tokio::fs::metadata(&full)
            .await
            .map(|m| m.len())
            .map_err(|e| self.storage_err(path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| self.storage_err(path, e))
    }
}
