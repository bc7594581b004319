//! Stuck-job recovery and failed-resource retry
//!
//! Both sweeps only push resources back to `MetadataExtracting`; the next
//! text run picks them up from there.

use crate::error::Result;
use crate::meta::{AnalysisStatus, Resource, ResourceStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Resources that matched the sweep
    pub found: usize,
    /// Resources actually moved (zero on a dry run)
    pub reset: usize,
    pub dry_run: bool,
    /// `source/source_id` of every matched resource
    pub resources: Vec<String>,
}

impl RecoveryReport {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }
}

fn key(resource: &Resource) -> String {
    format!("{}/{}", resource.source_name, resource.source_id)
}

/// Reset `Processing` resources silent for strictly longer than `timeout`
pub async fn recover_stuck(
    store: &dyn ResourceStore,
    timeout: Duration,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<RecoveryReport> {
    let cutoff = now.checked_sub_signed(timeout).unwrap_or(DateTime::UNIX_EPOCH);
    let stuck = store.list_stale(AnalysisStatus::Processing, cutoff).await?;
    let mut report = RecoveryReport::new(dry_run);
    report.found = stuck.len();

    for resource in stuck {
        report.resources.push(key(&resource));
        if dry_run {
            info!(
                source = %resource.source_name,
                source_id = %resource.source_id,
                updated_at = %resource.updated_at,
                "Would reset stuck resource"
            );
            continue;
        }

        if store
            .transition_status(
                &resource.id,
                AnalysisStatus::Processing,
                AnalysisStatus::MetadataExtracting,
                now,
            )
            .await?
        {
            info!(
                source = %resource.source_name,
                source_id = %resource.source_id,
                updated_at = %resource.updated_at,
                "Reset stuck resource"
            );
            report.reset += 1;
        } else {
            warn!(source_id = %resource.source_id, "Resource moved on during recovery; left alone");
        }
    }

    Ok(report)
}

/// Push text and video failures from the last `days` days back into the pipeline
pub async fn retry_failed(
    store: &dyn ResourceStore,
    days: u32,
    source_name: Option<&str>,
    limit: Option<usize>,
    now: DateTime<Utc>,
) -> Result<RecoveryReport> {
    // windows reaching past what chrono can represent mean "all failures"
    let since = Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::UNIX_EPOCH);
    let failed = store.list_failed_since(since, source_name, limit).await?;
    let mut report = RecoveryReport::new(false);
    report.found = failed.len();

    for resource in failed {
        report.resources.push(key(&resource));
        let from = resource.status()?;
        if let Err(e) = from.ensure_transition(AnalysisStatus::MetadataExtracting) {
            warn!(source_id = %resource.source_id, "{}", e);
            continue;
        }
        if store
            .transition_status(&resource.id, from, AnalysisStatus::MetadataExtracting, now)
            .await?
        {
            info!(
                source = %resource.source_name,
                source_id = %resource.source_id,
                from = %from,
                "Queued failed resource for retry"
            );
            report.reset += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::setup_test_db;
    use crate::meta::{MetaDb, NewResource};

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text)
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn seed(db: &MetaDb, id: &str, status: AnalysisStatus, updated: DateTime<Utc>) -> Resource {
        let mut new = NewResource::new("cnn", id);
        new.status = status;
        db.find_or_create_resource(new, updated).await.unwrap().0
    }

    #[tokio::test]
    async fn test_stuck_boundary_is_strict() {
        let (db, _tmp) = setup_test_db().await;
        let updated = at("2026-10-17T09:00:00Z");
        let r = seed(&db, "CNNA-ST1-1000000000000001", AnalysisStatus::Processing, updated).await;
        let timeout = Duration::hours(1);

        // exactly at the boundary: untouched
        let report = recover_stuck(&db, timeout, false, updated + timeout)
            .await
            .unwrap();
        assert_eq!(report.reset, 0);

        // one second past: reset
        let report = recover_stuck(&db, timeout, false, updated + timeout + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.reset, 1);
        let loaded = db.get_resource(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.status().unwrap(), AnalysisStatus::MetadataExtracting);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let (db, _tmp) = setup_test_db().await;
        let updated = at("2026-10-17T09:00:00Z");
        let r = seed(&db, "CNNA-ST1-1000000000000001", AnalysisStatus::Processing, updated).await;
        // other statuses are never swept
        seed(&db, "CNNA-ST1-1000000000000002", AnalysisStatus::MetadataExtracted, updated).await;

        let report = recover_stuck(&db, Duration::hours(1), true, updated + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(report.found, 1);
        assert_eq!(report.reset, 0);
        assert_eq!(report.resources, vec!["cnn/CNNA-ST1-1000000000000001"]);
        let loaded = db.get_resource(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.status().unwrap(), AnalysisStatus::Processing);
    }

    #[tokio::test]
    async fn test_retry_failed_window_and_source() {
        let (db, _tmp) = setup_test_db().await;
        let now = at("2026-10-17T12:00:00Z");
        seed(&db, "CNNA-ST1-1000000000000001", AnalysisStatus::TxtAnalysisFailed, now - Duration::days(1)).await;
        seed(&db, "CNNA-ST1-1000000000000002", AnalysisStatus::VideoAnalysisFailed, now - Duration::hours(2)).await;
        seed(&db, "CNNA-ST1-1000000000000003", AnalysisStatus::VideoAnalysisFailed, now - Duration::days(5)).await;
        seed(&db, "CNNA-ST1-1000000000000004", AnalysisStatus::Failed, now).await;

        let report = retry_failed(&db, 3, Some("other"), None, now).await.unwrap();
        assert_eq!(report.found, 0);

        let report = retry_failed(&db, 3, Some("cnn"), None, now).await.unwrap();
        assert_eq!(report.reset, 2);
        let queued = db
            .list_by_status(Some("cnn"), AnalysisStatus::MetadataExtracting, None)
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);

        let report = retry_failed(&db, 30, None, Some(1), now).await.unwrap();
        assert_eq!(report.found, 1);
    }

    #[tokio::test]
    async fn test_retry_failed_accepts_any_window() {
        let (db, _tmp) = setup_test_db().await;
        let now = at("2026-10-17T12:00:00Z");
        seed(&db, "CNNA-ST1-1000000000000001", AnalysisStatus::TxtAnalysisFailed, at("2001-01-01T00:00:00Z")).await;
        seed(&db, "CNNA-ST1-1000000000000002", AnalysisStatus::VideoAnalysisFailed, now - Duration::hours(1)).await;

        let report = retry_failed(&db, u32::MAX, None, None, now).await.unwrap();
        assert_eq!(report.found, 2);
        assert_eq!(report.reset, 2);
    }

    #[tokio::test]
    async fn test_recover_with_huge_timeout_finds_nothing() {
        let (db, _tmp) = setup_test_db().await;
        let now = at("2026-10-17T12:00:00Z");
        seed(&db, "CNNA-ST1-1000000000000001", AnalysisStatus::Processing, now - Duration::days(400)).await;

        let report = recover_stuck(&db, Duration::MAX, false, now).await.unwrap();
        assert_eq!(report.found, 0);
    }
}
