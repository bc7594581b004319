//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::meta::{PipelineRun, ResourceStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub analysis_model: String,
    pub sources: Vec<SourceStatus>,
}

/// Resource counts and latest run for one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStatus {
    pub name: String,
    pub total: i64,
    /// Resource count per analysis status
    pub statuses: BTreeMap<String, i64>,
    pub last_run: Option<PipelineRun>,
}

/// Get pipeline status, optionally for a single source
pub async fn cmd_status(
    config: &Config,
    store: &dyn ResourceStore,
    source: Option<&str>,
) -> Result<StatusInfo> {
    info!("Getting status");

    let mut names: Vec<String> = match source {
        Some(name) => vec![config.source(name)?.name.clone()],
        None => config.sources.iter().map(|s| s.name.clone()).collect(),
    };

    let counts = store.status_counts(source).await?;
    let mut by_source: BTreeMap<String, SourceStatus> = BTreeMap::new();
    for count in counts {
        if !names.contains(&count.source_name) {
            // rows left behind by a source since removed from the config
            names.push(count.source_name.clone());
        }
        let entry = by_source.entry(count.source_name.clone()).or_default();
        entry.total += count.count;
        entry.statuses.insert(count.analysis_status, count.count);
    }

    let mut sources = Vec::with_capacity(names.len());
    for name in names {
        let mut status = by_source.remove(&name).unwrap_or_default();
        status.last_run = store.latest_run(&name).await?;
        status.name = name;
        sources.push(status);
    }

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        analysis_model: config.analysis.model.clone(),
        sources,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 newsreel Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("Analysis model: {}", status.analysis_model);

    if status.sources.is_empty() {
        println!("\nNo sources configured. Add a [[sources]] entry to the config file.");
        return;
    }

    for source in &status.sources {
        println!("\n• {} ({} resources)", source.name, source.total);
        for (name, count) in &source.statuses {
            println!("  {:<22} {}", name, count);
        }
        match &source.last_run {
            Some(run) => println!(
                "  Last run: {} {} at {} (processed {}, skipped {}, errored {})",
                run.mode, run.status, run.started_at, run.processed, run.skipped, run.errored
            ),
            None => println!("  Last run: never"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::meta::tests::setup_test_db;
    use crate::meta::{AnalysisStatus, NewResource, RunCounts, RunStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn test_status_counts_and_last_run() {
        let (db, _tmp) = setup_test_db().await;
        let mut config = Config::default();
        let storage = config.storages[0].name.clone();
        config.sources = vec![
            SourceConfig::new("cnn", storage.clone()),
            SourceConfig::new("reuters", storage),
        ];

        for (id, status) in [
            ("CNNA-ST1-1000000000000001", AnalysisStatus::Completed),
            ("CNNA-ST1-1000000000000002", AnalysisStatus::Completed),
            ("CNNA-ST1-1000000000000003", AnalysisStatus::TxtAnalysisFailed),
        ] {
            let mut new = NewResource::new("cnn", id);
            new.status = status;
            db.find_or_create_resource(new, Utc::now()).await.unwrap();
        }
        let run = db.start_run("cnn", "text").await.unwrap();
        db.complete_run(&run.id, RunStatus::Completed, &RunCounts::default(), None)
            .await
            .unwrap();

        let status = cmd_status(&config, &db, None).await.unwrap();
        assert_eq!(status.sources.len(), 2);
        let cnn = &status.sources[0];
        assert_eq!(cnn.name, "cnn");
        assert_eq!(cnn.total, 3);
        assert_eq!(cnn.statuses["completed"], 2);
        assert_eq!(cnn.last_run.as_ref().unwrap().status, "completed");
        let reuters = &status.sources[1];
        assert_eq!(reuters.total, 0);
        assert!(reuters.last_run.is_none());

        let only = cmd_status(&config, &db, Some("cnn")).await.unwrap();
        assert_eq!(only.sources.len(), 1);
        assert!(cmd_status(&config, &db, Some("afp")).await.is_err());
    }
}
