use super::{normalize_path, Storage, StorageObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-process storage; listings come back in path order
pub struct MemoryStorage {
    name: String,
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed a file without going through the async API
    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(path) = normalize_path(path) {
            if let Ok(mut files) = self.files.write() {
                files.insert(path, bytes.into());
            }
        }
    }

    fn poisoned(&self) -> Error {
        Error::Storage(format!("{}: storage lock poisoned", self.name))
    }

    fn missing(&self, path: &str) -> Error {
        Error::Storage(format!("{}:{}: file not found", self.name, path))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        let files = self.files.read().map_err(|_| self.poisoned())?;
        Ok(files.contains_key(&path))
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<StorageObject>> {
        let dir = normalize_path(dir)?;
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let files = self.files.read().map_err(|_| self.poisoned())?;
        let listed: Vec<StorageObject> = files
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, bytes)| StorageObject {
                path: path.clone(),
                size: bytes.len() as u64,
            })
            .collect();
        if listed.is_empty() && !prefix.is_empty() {
            return Err(Error::StorageUnavailable(format!(
                "{}: directory not found: {}",
                self.name, dir
            )));
        }
        Ok(listed)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = normalize_path(path)?;
        let files = self.files.read().map_err(|_| self.poisoned())?;
        files.get(&key).cloned().ok_or_else(|| self.missing(path))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let key = normalize_path(path)?;
        let mut files = self.files.write().map_err(|_| self.poisoned())?;
        files.insert(key, bytes.to_vec());
        Ok(())
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let key = normalize_path(path)?;
        let files = self.files.read().map_err(|_| self.poisoned())?;
        files
            .get(&key)
            .map(|b| b.len() as u64)
            .ok_or_else(|| self.missing(path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = normalize_path(path)?;
        let mut files = self.files.write().map_err(|_| self.poisoned())?;
        files.remove(&key).map(|_| ()).ok_or_else(|| self.missing(path))
    }
}
