//! Configuration management for newsreel
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::classify::GroupingPolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Analysis service configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Stuck-job recovery and retry configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Named storage backends
    #[serde(default = "default_storages")]
    pub storages: Vec<StorageConfig>,

    /// Media sources
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// External analysis service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Service base URL
    #[serde(default = "default_analysis_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_analysis_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_analysis_api_key_env")]
    pub api_key_env: String,

    /// Hard wall-clock timeout per call in seconds
    #[serde(default = "default_analysis_timeout")]
    pub timeout_secs: u64,

    /// Fixed pause after every call, success or failure
    #[serde(default = "default_post_call_delay_ms")]
    pub post_call_delay_ms: u64,

    /// Optional request ceiling (requests per minute)
    #[serde(default)]
    pub requests_per_minute: Option<u32>,

    /// Largest media file submitted for analysis, in MB
    #[serde(default = "default_max_media_mb")]
    pub max_media_mb: u64,

    /// Prompt set used when a run does not name one
    #[serde(default = "default_prompt_version")]
    pub default_prompt_version: String,

    /// Stop the remaining batch after an auth/quota/server failure
    #[serde(default = "default_halt_on_api_error")]
    pub halt_on_api_error: bool,
}

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Seconds of silence before an in-flight resource counts as stuck
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,

    /// How far back `retry-failed` looks by default
    #[serde(default = "default_retry_window_days")]
    pub retry_window_days: u32,

    /// Lifetime of a run lease before another runner may take it over
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

/// A named storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub name: String,

    /// Backend kind (`local` or `memory`)
    #[serde(default = "default_storage_kind")]
    pub kind: String,

    /// Root directory for `local` backends
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// A media source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, first half of every resource key
    pub name: String,

    /// Default storage backend name
    #[serde(default = "default_storage_name")]
    pub storage: String,

    /// Directory inside the storage backend to scan
    #[serde(default)]
    pub root: String,

    /// How files are bundled into resources
    #[serde(default)]
    pub grouping: GroupingPolicy,

    /// Whether filename versions trigger reanalysis
    #[serde(default = "default_version_check")]
    pub version_check: bool,

    /// Literal prefix of the identity token
    #[serde(default = "default_identity_prefix")]
    pub identity_prefix: String,

    /// Companion document extensions (lowercase, no dot)
    #[serde(default = "default_document_extensions")]
    pub document_extensions: Vec<String>,

    /// Media extensions (lowercase, no dot)
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: storage.into(),
            root: String::new(),
            grouping: GroupingPolicy::default(),
            version_check: default_version_check(),
            identity_prefix: default_identity_prefix(),
            document_extensions: default_document_extensions(),
            media_extensions: default_media_extensions(),
        }
    }
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for newsreel data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

fn default_storages() -> Vec<StorageConfig> {
    vec![StorageConfig {
        name: default_storage_name(),
        kind: default_storage_kind(),
        root: Some(PathBuf::from("media")),
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            recovery: RecoveryConfig::default(),
            storages: default_storages(),
            sources: Vec::new(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: default_analysis_base_url(),
            model: default_analysis_model(),
            api_key_env: default_analysis_api_key_env(),
            timeout_secs: default_analysis_timeout(),
            post_call_delay_ms: default_post_call_delay_ms(),
            requests_per_minute: None,
            max_media_mb: default_max_media_mb(),
            default_prompt_version: default_prompt_version(),
            halt_on_api_error: default_halt_on_api_error(),
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn post_call_delay(&self) -> Duration {
        Duration::from_millis(self.post_call_delay_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stuck_timeout_secs: default_stuck_timeout_secs(),
            retry_window_days: default_retry_window_days(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl RecoveryConfig {
    /// Lease lifetime, granted afresh on every renewal
    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_ttl_secs.min(u64::from(u32::MAX)) as i64)
    }
}

impl Config {
    /// Get the default base directory for newsreel (~/.newsreel)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".newsreel")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub(crate) fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("metadata.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("metadata.db"),
            base_dir: base,
        };
        config.resolve_storage_roots();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.resolve_storage_roots();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Relative local roots are taken relative to the config directory
    fn resolve_storage_roots(&mut self) {
        let base = self.paths.base_dir.clone();
        for storage in &mut self.storages {
            if let Some(root) = storage.root.as_mut() {
                if root.is_relative() && !base.as_os_str().is_empty() {
                    *root = base.join(&*root);
                }
            }
        }
    }

    /// Get the analysis API key from environment
    pub fn analysis_api_key(&self) -> Option<String> {
        std::env::var(&self.analysis.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    /// Look up a source by name
    pub fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::SourceNotFound(name.to_string()))
    }

    /// Look up a storage backend by name
    pub fn storage(&self, name: &str) -> Result<&StorageConfig> {
        self.storages
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::Config(format!("Unknown storage backend: {}", name)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.analysis.max_media_mb == 0 {
            return Err(Error::Config(
                "analysis.max_media_mb must be positive".to_string(),
            ));
        }

        if self.analysis.timeout_secs == 0 {
            return Err(Error::Config(
                "analysis.timeout_secs must be positive".to_string(),
            ));
        }

        if self.analysis.requests_per_minute == Some(0) {
            return Err(Error::Config(
                "analysis.requests_per_minute must be positive when set".to_string(),
            ));
        }

        if self.recovery.stuck_timeout_secs == 0 {
            return Err(Error::Config(
                "recovery.stuck_timeout_secs must be positive".to_string(),
            ));
        }

        let mut storage_names = HashSet::new();
        for storage in &self.storages {
            if !storage_names.insert(storage.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate storage name: {}",
                    storage.name
                )));
            }
        }

        let mut source_names = HashSet::new();
        for source in &self.sources {
            if !source_names.insert(source.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate source name: {}",
                    source.name
                )));
            }
            if !storage_names.contains(source.storage.as_str()) {
                return Err(Error::Config(format!(
                    "Source '{}' references unknown storage '{}'",
                    source.name, source.storage
                )));
            }
            if source.identity_prefix.is_empty() {
                return Err(Error::Config(format!(
                    "Source '{}' has an empty identity_prefix",
                    source.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.analysis.max_media_mb, 300);
        assert_eq!(config.recovery.stuck_timeout_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let mut source = SourceConfig::new("cnn", "local");
        source.grouping = GroupingPolicy::ByLabel;
        source.version_check = true;
        config.sources.push(source);

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load(&config.paths.config_file).unwrap();
        let source = loaded.source("cnn").unwrap();
        assert_eq!(source.grouping, GroupingPolicy::ByLabel);
        assert!(source.version_check);
        assert_eq!(loaded.paths.db_file, tmp.path().join("metadata.db"));
        assert_eq!(
            loaded.storage("local").unwrap().root.as_deref(),
            Some(tmp.path().join("media").as_path())
        );
    }

    #[test]
    fn test_source_toml_defaults() {
        let content = r#"
            [[sources]]
            name = "ap"
            root = "incoming"
        "#;
        let config: Config = toml::from_str(content).unwrap();
        let source = config.source("ap").unwrap();
        assert_eq!(source.storage, "local");
        assert_eq!(source.grouping, GroupingPolicy::ByIdentity);
        assert!(!source.version_check);
        assert_eq!(source.identity_prefix, "CNNA-ST1-");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.sources.push(SourceConfig::new("cnn", "nowhere"));
        assert!(config.validate().is_err());

        config.sources[0].storage = "local".to_string();
        assert!(config.validate().is_ok());

        config.sources.push(SourceConfig::new("cnn", "local"));
        assert!(config.validate().is_err());

        config.sources.pop();
        config.analysis.max_media_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_source() {
        let config = Config::default();
        assert!(matches!(
            config.source("missing"),
            Err(Error::SourceNotFound(_))
        ));
    }
}
