//! Repository interface over the resource store

use super::{
    timestamp, AnalysisResult, AnalysisStatus, Location, MetaDb, MetadataUpdate, NewResource,
    PipelineRun, Resource, RunCounts, RunLease, RunStatus, StatusCount, SyncStatus,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Durable per-resource state used by the orchestrator and recovery.
///
/// Every mutation is a single-row write keyed by resource id.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_resource(&self, source_name: &str, source_id: &str)
        -> Result<Option<Resource>>;

    async fn get_resource(&self, id: &str) -> Result<Option<Resource>>;

    /// Returns the stored row and whether this call created it
    async fn find_or_create_resource(
        &self,
        new: NewResource,
        at: DateTime<Utc>,
    ) -> Result<(Resource, bool)>;

    /// Compare-and-set on the analysis status; false when the row moved on
    async fn transition_status(
        &self,
        id: &str,
        from: AnalysisStatus,
        to: AnalysisStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn set_sync_status(&self, id: &str, status: SyncStatus, at: DateTime<Utc>)
        -> Result<()>;

    async fn update_location(&self, id: &str, location: &Location, at: DateTime<Utc>)
        -> Result<()>;

    async fn set_file_size(&self, id: &str, size_mb: Option<f64>, at: DateTime<Utc>)
        -> Result<()>;

    async fn record_metadata(
        &self,
        id: &str,
        metadata: &MetadataUpdate,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_analyzed(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Removes the resource and its analysis result
    async fn delete_resource(&self, id: &str) -> Result<()>;

    async fn upsert_analysis_result(&self, result: &AnalysisResult) -> Result<()>;

    async fn get_analysis_result(&self, resource_id: &str) -> Result<Option<AnalysisResult>>;

    /// Resources in a status, oldest `fetched_at` first
    async fn list_by_status(
        &self,
        source_name: Option<&str>,
        status: AnalysisStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Resource>>;

    /// `MetadataExtracted` resources whose size is unknown or within the limit
    async fn list_video_candidates(
        &self,
        source_name: &str,
        max_mb: u64,
        limit: Option<usize>,
    ) -> Result<Vec<Resource>>;

    /// Resources in `status` last updated strictly before `cutoff`
    async fn list_stale(
        &self,
        status: AnalysisStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Resource>>;

    /// Retryable failures updated at or after `since`
    async fn list_failed_since(
        &self,
        since: DateTime<Utc>,
        source_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Resource>>;

    async fn status_counts(&self, source_name: Option<&str>) -> Result<Vec<StatusCount>>;

    async fn start_run(&self, source_name: &str, mode: &str) -> Result<PipelineRun>;

    async fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        counts: &RunCounts,
        errors: Option<Vec<String>>,
    ) -> Result<()>;

    async fn latest_run(&self, source_name: &str) -> Result<Option<PipelineRun>>;

    /// Take the named lease unless a live one is held by someone else
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        at: DateTime<Utc>,
    ) -> Result<Option<RunLease>>;

    /// Extend a lease we still hold; `None` once it has lapsed or changed hands
    async fn renew_lease(
        &self,
        lease: &RunLease,
        ttl: Duration,
        at: DateTime<Utc>,
    ) -> Result<Option<RunLease>>;

    async fn release_lease(&self, lease: &RunLease) -> Result<()>;
}

fn limit_value(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

#[async_trait]
impl ResourceStore for MetaDb {
    async fn find_resource(
        &self,
        source_name: &str,
        source_id: &str,
    ) -> Result<Option<Resource>> {
        let resource = sqlx::query_as::<_, Resource>(
            "SELECT * FROM resources WHERE source_name = ? AND source_id = ?",
        )
        .bind(source_name)
        .bind(source_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(resource)
    }

    async fn get_resource(&self, id: &str) -> Result<Option<Resource>> {
        let resource = sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(resource)
    }

    async fn find_or_create_resource(
        &self,
        new: NewResource,
        at: DateTime<Utc>,
    ) -> Result<(Resource, bool)> {
        let source_name = new.source_name.clone();
        let source_id = new.source_id.clone();
        let row = new.into_resource(at);

        let inserted = sqlx::query(
            r#"
            INSERT INTO resources (
                id, source_name, source_id, primary_path, document_path,
                document_version, media_version, analysis_status, sync_status,
                file_size_mb, fetched_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_name, source_id) DO NOTHING
            "#,
        )
        .bind(&row.id)
        .bind(&row.source_name)
        .bind(&row.source_id)
        .bind(&row.primary_path)
        .bind(&row.document_path)
        .bind(row.document_version)
        .bind(row.media_version)
        .bind(&row.analysis_status)
        .bind(&row.sync_status)
        .bind(row.file_size_mb)
        .bind(&row.fetched_at)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(self.pool())
        .await?
        .rows_affected()
            == 1;

        let stored = self
            .find_resource(&source_name, &source_id)
            .await?
            .ok_or_else(|| {
                crate::error::Error::ResourceNotFound(format!("{}/{}", source_name, source_id))
            })?;

        debug!(
            source = %source_name,
            source_id = %source_id,
            created = inserted,
            "find-or-create resource"
        );
        Ok((stored, inserted))
    }

    async fn transition_status(
        &self,
        id: &str,
        from: AnalysisStatus,
        to: AnalysisStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE resources SET analysis_status = ?, updated_at = ? WHERE id = ? AND analysis_status = ?",
        )
        .bind(to.to_string())
        .bind(timestamp(at))
        .bind(id)
        .bind(from.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn set_sync_status(
        &self,
        id: &str,
        status: SyncStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE resources SET sync_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(timestamp(at))
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn update_location(
        &self,
        id: &str,
        location: &Location,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resources SET
                primary_path = ?,
                document_path = ?,
                document_version = ?,
                media_version = ?,
                file_size_mb = ?,
                fetched_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&location.primary_path)
        .bind(&location.document_path)
        .bind(i64::from(location.document_version))
        .bind(i64::from(location.media_version))
        .bind(location.file_size_mb)
        .bind(timestamp(at))
        .bind(timestamp(at))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn set_file_size(
        &self,
        id: &str,
        size_mb: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE resources SET file_size_mb = ?, updated_at = ? WHERE id = ?")
            .bind(size_mb)
            .bind(timestamp(at))
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn record_metadata(
        &self,
        id: &str,
        metadata: &MetadataUpdate,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resources SET
                title = COALESCE(?, title),
                published_at = COALESCE(?, published_at),
                duration_seconds = COALESCE(?, duration_seconds),
                source_metadata_json = COALESCE(?, source_metadata_json),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&metadata.title)
        .bind(&metadata.published_at)
        .bind(metadata.duration_seconds)
        .bind(&metadata.source_metadata_json)
        .bind(timestamp(at))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn mark_analyzed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE resources SET analyzed_at = ?, updated_at = ? WHERE id = ?")
            .bind(timestamp(at))
            .bind(timestamp(at))
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM analysis_results WHERE resource_id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    async fn upsert_analysis_result(&self, result: &AnalysisResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_results (
                resource_id, summary, transcript, translation, importance,
                topics_json, keywords_json, bites_json, prompt_version, model,
                error_message, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_id) DO UPDATE SET
                summary = excluded.summary,
                transcript = excluded.transcript,
                translation = excluded.translation,
                importance = excluded.importance,
                topics_json = excluded.topics_json,
                keywords_json = excluded.keywords_json,
                bites_json = excluded.bites_json,
                prompt_version = excluded.prompt_version,
                model = excluded.model,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&result.resource_id)
        .bind(&result.summary)
        .bind(&result.transcript)
        .bind(&result.translation)
        .bind(result.importance)
        .bind(&result.topics_json)
        .bind(&result.keywords_json)
        .bind(&result.bites_json)
        .bind(&result.prompt_version)
        .bind(&result.model)
        .bind(&result.error_message)
        .bind(&result.created_at)
        .bind(&result.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_analysis_result(&self, resource_id: &str) -> Result<Option<AnalysisResult>> {
        let result = sqlx::query_as::<_, AnalysisResult>(
            "SELECT * FROM analysis_results WHERE resource_id = ?",
        )
        .bind(resource_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(result)
    }

    async fn list_by_status(
        &self,
        source_name: Option<&str>,
        status: AnalysisStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Resource>> {
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT * FROM resources
            WHERE analysis_status = ? AND (? IS NULL OR source_name = ?)
            ORDER BY fetched_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(status.to_string())
        .bind(source_name)
        .bind(source_name)
        .bind(limit_value(limit))
        .fetch_all(self.pool())
        .await?;
        Ok(resources)
    }

    async fn list_video_candidates(
        &self,
        source_name: &str,
        max_mb: u64,
        limit: Option<usize>,
    ) -> Result<Vec<Resource>> {
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT * FROM resources
            WHERE source_name = ?
              AND analysis_status = ?
              AND (file_size_mb IS NULL OR file_size_mb <= ?)
            ORDER BY fetched_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(source_name)
        .bind(AnalysisStatus::MetadataExtracted.to_string())
        .bind(max_mb as f64)
        .bind(limit_value(limit))
        .fetch_all(self.pool())
        .await?;
        Ok(resources)
    }

    async fn list_stale(
        &self,
        status: AnalysisStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Resource>> {
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT * FROM resources
            WHERE analysis_status = ? AND updated_at < ?
            ORDER BY updated_at ASC
            "#,
        )
        .bind(status.to_string())
        .bind(timestamp(cutoff))
        .fetch_all(self.pool())
        .await?;
        Ok(resources)
    }

    async fn list_failed_since(
        &self,
        since: DateTime<Utc>,
        source_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Resource>> {
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT * FROM resources
            WHERE analysis_status IN (?, ?)
              AND updated_at >= ?
              AND (? IS NULL OR source_name = ?)
            ORDER BY updated_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(AnalysisStatus::TxtAnalysisFailed.to_string())
        .bind(AnalysisStatus::VideoAnalysisFailed.to_string())
        .bind(timestamp(since))
        .bind(source_name)
        .bind(source_name)
        .bind(limit_value(limit))
        .fetch_all(self.pool())
        .await?;
        Ok(resources)
    }

    async fn status_counts(&self, source_name: Option<&str>) -> Result<Vec<StatusCount>> {
        let counts = sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT source_name, analysis_status, COUNT(*) AS count
            FROM resources
            WHERE (? IS NULL OR source_name = ?)
            GROUP BY source_name, analysis_status
            ORDER BY source_name, analysis_status
            "#,
        )
        .bind(source_name)
        .bind(source_name)
        .fetch_all(self.pool())
        .await?;
        Ok(counts)
    }

    async fn start_run(&self, source_name: &str, mode: &str) -> Result<PipelineRun> {
        let run = PipelineRun::new(source_name, mode);
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, source_name, mode, started_at, status, processed, skipped, errored, classification_errors)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.source_name)
        .bind(&run.mode)
        .bind(&run.started_at)
        .bind(&run.status)
        .bind(run.processed)
        .bind(run.skipped)
        .bind(run.errored)
        .bind(run.classification_errors)
        .execute(self.pool())
        .await?;
        Ok(run)
    }

    async fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        counts: &RunCounts,
        errors: Option<Vec<String>>,
    ) -> Result<()> {
        let errors_json = errors.map(|e| serde_json::to_string(&e).unwrap_or_default());
        sqlx::query(
            r#"
            UPDATE pipeline_runs SET
                completed_at = ?,
                status = ?,
                processed = ?,
                skipped = ?,
                errored = ?,
                classification_errors = ?,
                errors_json = ?
            WHERE id = ?
            "#,
        )
        .bind(timestamp(Utc::now()))
        .bind(status.to_string())
        .bind(counts.processed as i64)
        .bind(counts.skipped as i64)
        .bind(counts.errored as i64)
        .bind(counts.classification_errors as i64)
        .bind(errors_json)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn latest_run(&self, source_name: &str) -> Result<Option<PipelineRun>> {
        let run = sqlx::query_as::<_, PipelineRun>(
            "SELECT * FROM pipeline_runs WHERE source_name = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(source_name)
        .fetch_optional(self.pool())
        .await?;
        Ok(run)
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        at: DateTime<Utc>,
    ) -> Result<Option<RunLease>> {
        let expires_at = timestamp(at + ttl);
        let affected = sqlx::query(
            r#"
            INSERT INTO run_leases (name, holder, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE run_leases.expires_at <= excluded.acquired_at
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(timestamp(at))
        .bind(&expires_at)
        .execute(self.pool())
        .await?
        .rows_affected();

        if affected == 1 {
            Ok(Some(RunLease {
                name: name.to_string(),
                holder: holder.to_string(),
                expires_at,
            }))
        } else {
            Ok(None)
        }
    }

    async fn renew_lease(
        &self,
        lease: &RunLease,
        ttl: Duration,
        at: DateTime<Utc>,
    ) -> Result<Option<RunLease>> {
        let expires_at = timestamp(at + ttl);
        let affected = sqlx::query(
            r#"
            UPDATE run_leases SET expires_at = ?
            WHERE name = ? AND holder = ? AND expires_at > ?
            "#,
        )
        .bind(&expires_at)
        .bind(&lease.name)
        .bind(&lease.holder)
        .bind(timestamp(at))
        .execute(self.pool())
        .await?
        .rows_affected();

        if affected == 1 {
            Ok(Some(RunLease {
                expires_at,
                ..lease.clone()
            }))
        } else {
            Ok(None)
        }
    }

    async fn release_lease(&self, lease: &RunLease) -> Result<()> {
        sqlx::query("DELETE FROM run_leases WHERE name = ? AND holder = ?")
            .bind(&lease.name)
            .bind(&lease.holder)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
