//! Recover-stuck and retry-failed commands

use super::{acquire_lease, release_lease};
use crate::config::Config;
use crate::error::Result;
use crate::meta::ResourceStore;
use crate::pipeline::{recover_stuck, retry_failed, RecoveryReport};
use chrono::{Duration, Utc};
use tracing::info;

/// Reset resources stuck in `Processing`; `timeout_secs` overrides the configured timeout
pub async fn cmd_recover(
    config: &Config,
    store: &dyn ResourceStore,
    timeout_secs: Option<u64>,
    dry_run: bool,
) -> Result<RecoveryReport> {
    let secs = timeout_secs.unwrap_or(config.recovery.stuck_timeout_secs);
    let timeout = Duration::seconds(secs.min(u64::from(u32::MAX)) as i64);
    info!(timeout_secs = secs, dry_run, "Recovering stuck resources");

    let lease = acquire_lease(config, store).await?;
    let result = recover_stuck(store, timeout, dry_run, Utc::now()).await;
    release_lease(store, &lease, result).await
}

/// Queue recent text and video failures for another text run
pub async fn cmd_retry(
    config: &Config,
    store: &dyn ResourceStore,
    days: Option<u32>,
    source: Option<&str>,
    limit: Option<usize>,
) -> Result<RecoveryReport> {
    let days = days.unwrap_or(config.recovery.retry_window_days);
    if let Some(name) = source {
        config.source(name)?;
    }
    info!(days, source = ?source, limit = ?limit, "Retrying failed resources");

    let lease = acquire_lease(config, store).await?;
    let result = retry_failed(store, days, source, limit, Utc::now()).await;
    release_lease(store, &lease, result).await
}

/// Print a recovery report to console
pub fn print_recovery_report(title: &str, report: &RecoveryReport) {
    println!("\n🛠  {}\n", title);
    println!("Matched: {}", report.found);
    if report.dry_run {
        println!("Dry run: nothing changed");
    } else {
        println!("Reset: {}", report.reset);
    }
    for resource in &report.resources {
        println!("  • {}", resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::PIPELINE_LEASE;
    use crate::config::SourceConfig;
    use crate::error::Error;
    use crate::meta::tests::setup_test_db;
    use crate::meta::{AnalysisStatus, NewResource};

    #[tokio::test]
    async fn test_recover_uses_configured_timeout() {
        let (db, _tmp) = setup_test_db().await;
        let mut config = Config::default();
        config.recovery.stuck_timeout_secs = 60;

        let mut new = NewResource::new("cnn", "CNNA-ST1-1000000000000001");
        new.status = AnalysisStatus::Processing;
        db.find_or_create_resource(new, Utc::now() - Duration::minutes(5))
            .await
            .unwrap();

        let report = cmd_recover(&config, &db, None, true).await.unwrap();
        assert_eq!(report.found, 1);
        assert_eq!(report.reset, 0);

        // a longer explicit timeout finds nothing
        let report = cmd_recover(&config, &db, Some(3600), false).await.unwrap();
        assert_eq!(report.found, 0);

        let report = cmd_recover(&config, &db, None, false).await.unwrap();
        assert_eq!(report.reset, 1);
    }

    #[tokio::test]
    async fn test_recover_refuses_while_lease_held() {
        let (db, _tmp) = setup_test_db().await;
        let config = Config::default();
        db.try_acquire_lease(PIPELINE_LEASE, "runner", Duration::hours(1), Utc::now())
            .await
            .unwrap()
            .unwrap();

        let err = cmd_recover(&config, &db, None, false).await.unwrap_err();
        assert!(matches!(err, Error::Locked(_)));
    }

    #[tokio::test]
    async fn test_retry_checks_source_name() {
        let (db, _tmp) = setup_test_db().await;
        let mut config = Config::default();
        let storage = config.storages[0].name.clone();
        config.sources = vec![SourceConfig::new("cnn", storage)];

        let mut new = NewResource::new("cnn", "CNNA-ST1-1000000000000001");
        new.status = AnalysisStatus::TxtAnalysisFailed;
        db.find_or_create_resource(new, Utc::now()).await.unwrap();

        let err = cmd_retry(&config, &db, None, Some("reuters"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));

        let report = cmd_retry(&config, &db, None, Some("cnn"), None).await.unwrap();
        assert_eq!(report.reset, 1);
    }
}
