//! Storage gateway
//!
//! A uniform view over the backends media arrives on. Paths are
//! `/`-separated and relative to the backend root.

mod local;
mod memory;

pub use local::*;
pub use memory::*;

use crate::config::{Config, StorageConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One file as seen by a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    pub path: String,
    /// Size in bytes
    pub size: u64,
}

/// Bytes to megabytes, as stored on resources
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Operations the pipeline needs from a storage backend
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Recursive listing under `dir`, sorted by path.
    ///
    /// Fails with `Error::StorageUnavailable` when `dir` cannot be listed.
    async fn list_files(&self, dir: &str) -> Result<Vec<StorageObject>>;

    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Size in bytes
    async fn size(&self, path: &str) -> Result<u64>;

    async fn delete(&self, path: &str) -> Result<()>;
}

/// Supported backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Local,
    Memory,
}

impl std::str::FromStr for StorageKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "local" | "fs" | "filesystem" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            "s3" | "gcs" | "azure" => Err(Error::Config(format!(
                "Storage kind '{}' is not built in; mount it locally and use kind = \"local\"",
                value
            ))),
            _ => Err(Error::Config(format!("Unsupported storage kind '{}'", value))),
        }
    }
}

/// Build one backend from configuration
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    let kind: StorageKind = config.kind.parse()?;
    match kind {
        StorageKind::Local => {
            let root = config.root.clone().ok_or_else(|| {
                Error::Config(format!("Storage '{}' needs a root directory", config.name))
            })?;
            Ok(Arc::new(LocalStorage::new(&config.name, root)))
        }
        StorageKind::Memory => Ok(Arc::new(MemoryStorage::new(&config.name))),
    }
}

/// Named storage backends
#[derive(Clone, Default)]
pub struct StorageRegistry {
    backends: HashMap<String, Arc<dyn Storage>>,
}

impl StorageRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::default();
        for storage in &config.storages {
            registry.insert(&storage.name, create_storage(storage)?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: &str, storage: Arc<dyn Storage>) {
        self.backends.insert(name.to_string(), storage);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Storage>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("Unknown storage backend: {}", name)))
    }
}

/// Reject paths that climb out of the backend root
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::Storage(format!("Path escapes storage root: {}", path)));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a/./b//c.mp4").unwrap(), "a/b/c.mp4");
        assert_eq!(normalize_path("/a/b/../c.xml").unwrap(), "a/c.xml");
        assert!(normalize_path("../etc/passwd").is_err());
    }

    #[test]
    fn test_storage_kind() {
        assert_eq!("local".parse::<StorageKind>().unwrap(), StorageKind::Local);
        assert!("s3".parse::<StorageKind>().is_err());
        assert!("ftp".parse::<StorageKind>().is_err());
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = Config::default();
        config.storages.push(StorageConfig {
            name: "scratch".to_string(),
            kind: "memory".to_string(),
            root: None,
        });
        let registry = StorageRegistry::from_config(&config).unwrap();
        assert_eq!(registry.get("scratch").unwrap().name(), "scratch");
        assert_eq!(registry.get("local").unwrap().name(), "local");
        assert!(registry.get("missing").is_err());
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(300 * 1024 * 1024), 300.0);
    }
}
