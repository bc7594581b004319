//! Run command - one batch for one source under the pipeline lease

use super::{acquire_lease, release_lease};
use crate::analysis::AnalysisClient;
use crate::config::Config;
use crate::error::Result;
use crate::meta::{MetaDb, ResourceStore};
use crate::pipeline::{BatchOptions, BatchStats, Orchestrator, PipelineMode};
use crate::storage::StorageRegistry;
use tracing::info;

/// Run options
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: String,
    /// Storage backend override
    pub storage: Option<String>,
    /// Maximum number of analysis calls
    pub limit: Option<usize>,
    /// Prompt version; the configured default when unset
    pub prompt_version: Option<String>,
    pub mode: PipelineMode,
}

impl RunOptions {
    pub fn new(source: impl Into<String>, mode: PipelineMode) -> Self {
        Self {
            source: source.into(),
            storage: None,
            limit: None,
            prompt_version: None,
            mode,
        }
    }

    fn batch_options(&self, config: &Config) -> BatchOptions {
        let prompt_version = self
            .prompt_version
            .clone()
            .unwrap_or_else(|| config.analysis.default_prompt_version.clone());
        let mut options = BatchOptions::new(self.mode, prompt_version);
        options.storage = self.storage.clone();
        options.limit = self.limit;
        options
    }
}

/// Execute run command against the configured storages and analysis service
pub async fn cmd_run(config: &Config, db: &MetaDb, options: RunOptions) -> Result<BatchStats> {
    let storages = StorageRegistry::from_config(config)?;
    let client = AnalysisClient::from_config(config)?;
    run_batch(config, db, &storages, &client, &options).await
}

/// Take the lease, run one batch, give the lease back
pub async fn run_batch(
    config: &Config,
    store: &dyn ResourceStore,
    storages: &StorageRegistry,
    client: &AnalysisClient,
    options: &RunOptions,
) -> Result<BatchStats> {
    let lease = acquire_lease(config, store).await?;
    info!(
        source = %options.source,
        mode = %options.mode,
        model = %client.model_name(),
        "Running batch"
    );

    let orchestrator = Orchestrator::new(config, store, storages, client);
    let result = orchestrator
        .run_source_batch(&lease, &options.source, &options.batch_options(config))
        .await;
    release_lease(store, &lease, result).await
}

/// Print batch statistics to console
pub fn print_run_stats(source: &str, mode: PipelineMode, stats: &BatchStats) {
    match &stats.halted {
        Some(_) => println!("\n⚠ Batch halted ({} / {})\n", source, mode),
        None => println!("\n✓ Batch complete ({} / {})\n", source, mode),
    }
    println!("Processed: {}", stats.processed);
    println!("Skipped: {}", stats.skipped);
    println!("Errored: {}", stats.errored);
    println!("Analysis calls: {}", stats.calls);
    if stats.classification_errors > 0 {
        println!("Unclassifiable files: {}", stats.classification_errors);
    }
    if let Some(reason) = &stats.halted {
        println!("\nHalted: {}", reason);
    }

    if !stats.errors.is_empty() {
        println!("\nErrors:");
        for error in &stats.errors {
            println!("- {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::{fast_config, ScriptedAnalyzer};
    use crate::commands::PIPELINE_LEASE;
    use crate::config::{SourceConfig, StorageConfig};
    use crate::error::Error;
    use crate::meta::tests::setup_test_db;
    use crate::meta::AnalysisStatus;
    use crate::storage::MemoryStorage;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    const ID1: &str = "CNNA-ST1-1000000000000001";

    fn config() -> Config {
        let mut config = Config::default();
        config.analysis = fast_config();
        config.storages = vec![StorageConfig {
            name: "mem".to_string(),
            kind: "memory".to_string(),
            root: None,
        }];
        let mut source = SourceConfig::new("cnn", "mem");
        source.root = "feed".to_string();
        config.sources = vec![source];
        config
    }

    fn storages() -> StorageRegistry {
        let storage = Arc::new(MemoryStorage::new("mem"));
        storage.insert(
            &format!("feed/STORY_{}_0.xml", ID1),
            "<story><headline>Storm</headline></story>",
        );
        let mut registry = StorageRegistry::default();
        registry.insert("mem", storage);
        registry
    }

    #[tokio::test]
    async fn test_run_releases_lease() {
        let (db, _tmp) = setup_test_db().await;
        let config = config();
        let client = AnalysisClient::new(
            Box::new(ScriptedAnalyzer::new(vec![Ok(r#"{"title": "Storm"}"#.to_string())])),
            &config.analysis,
        );
        let options = RunOptions::new("cnn", PipelineMode::Text);

        let stats = run_batch(&config, &db, &storages(), &client, &options)
            .await
            .unwrap();
        assert_eq!(stats.processed, 1);
        let resource = db.find_resource("cnn", ID1).await.unwrap().unwrap();
        assert_eq!(resource.status().unwrap(), AnalysisStatus::MetadataExtracted);

        // released: another holder can take it straight away
        let lease = db
            .try_acquire_lease(PIPELINE_LEASE, "other", Duration::minutes(5), Utc::now())
            .await
            .unwrap();
        assert!(lease.is_some());
    }

    #[tokio::test]
    async fn test_run_refuses_while_lease_held() {
        let (db, _tmp) = setup_test_db().await;
        let config = config();
        db.try_acquire_lease(PIPELINE_LEASE, "other", Duration::hours(1), Utc::now())
            .await
            .unwrap()
            .unwrap();

        let analyzer = ScriptedAnalyzer::new(vec![]);
        let requests = analyzer.requests.clone();
        let client = AnalysisClient::new(Box::new(analyzer), &config.analysis);
        let options = RunOptions::new("cnn", PipelineMode::Text);

        let err = run_batch(&config, &db, &storages(), &client, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Locked(_)));
        assert!(requests.lock().unwrap().is_empty());
        assert!(db.find_resource("cnn", ID1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_source_still_releases_lease() {
        let (db, _tmp) = setup_test_db().await;
        let config = config();
        let client = AnalysisClient::new(Box::new(ScriptedAnalyzer::new(vec![])), &config.analysis);
        let options = RunOptions::new("reuters", PipelineMode::Video);

        let err = run_batch(&config, &db, &storages(), &client, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
        let lease = db
            .try_acquire_lease(PIPELINE_LEASE, "other", Duration::minutes(5), Utc::now())
            .await
            .unwrap();
        assert!(lease.is_some());
    }
}
