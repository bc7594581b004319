//! Resource metadata storage using SQLite
//!
//! This module handles all durable pipeline state:
//! - Resources (one media item per source identity)
//! - Analysis results (one per resource, overwritten per attempt)
//! - Pipeline runs (history and summary counts)
//! - Run leases (single active runner)

mod schema;
mod status;
mod store;

pub use schema::*;
pub use status::*;
pub use store::*;

use crate::config::Config;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};
use uuid::Uuid;

/// Canonical timestamp text; fixed width so string order is time order
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A tracked media item
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub source_name: String,
    pub source_id: String,
    pub primary_path: Option<String>,
    pub document_path: Option<String>,
    pub document_version: i64,
    pub media_version: i64,
    pub analysis_status: String,
    pub sync_status: String,
    pub title: Option<String>,
    pub published_at: Option<String>,
    pub duration_seconds: Option<i64>,
    /// `None` means not measured yet, not "too large"
    pub file_size_mb: Option<f64>,
    pub source_metadata_json: Option<String>,
    pub fetched_at: String,
    pub analyzed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Resource {
    pub fn status(&self) -> Result<AnalysisStatus> {
        self.analysis_status.parse()
    }

    pub fn sync(&self) -> Result<SyncStatus> {
        self.sync_status.parse()
    }

    /// Size gate; unmeasured resources stay eligible
    pub fn within_size_limit(&self, limit_mb: u64) -> bool {
        self.file_size_mb.map_or(true, |mb| mb <= limit_mb as f64)
    }
}

/// Fields for a resource about to be created
#[derive(Debug, Clone)]
pub struct NewResource {
    pub source_name: String,
    pub source_id: String,
    pub primary_path: Option<String>,
    pub document_path: Option<String>,
    pub document_version: u32,
    pub media_version: u32,
    pub status: AnalysisStatus,
    pub sync_status: SyncStatus,
    pub file_size_mb: Option<f64>,
}

impl NewResource {
    pub fn new(source_name: &str, source_id: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_id: source_id.to_string(),
            primary_path: None,
            document_path: None,
            document_version: 0,
            media_version: 0,
            status: AnalysisStatus::Pending,
            sync_status: SyncStatus::Updated,
            file_size_mb: None,
        }
    }

    fn into_resource(self, at: DateTime<Utc>) -> Resource {
        let now = timestamp(at);
        Resource {
            id: Uuid::new_v4().to_string(),
            source_name: self.source_name,
            source_id: self.source_id,
            primary_path: self.primary_path,
            document_path: self.document_path,
            document_version: i64::from(self.document_version),
            media_version: i64::from(self.media_version),
            analysis_status: self.status.to_string(),
            sync_status: self.sync_status.to_string(),
            title: None,
            published_at: None,
            duration_seconds: None,
            file_size_mb: self.file_size_mb,
            source_metadata_json: None,
            fetched_at: now.clone(),
            analyzed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Where a resource's files live and which versions were last seen
#[derive(Debug, Clone, Default)]
pub struct Location {
    pub primary_path: Option<String>,
    pub document_path: Option<String>,
    pub document_version: u32,
    pub media_version: u32,
    pub file_size_mb: Option<f64>,
}

/// Metadata pulled out of the companion document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub published_at: Option<String>,
    pub duration_seconds: Option<i64>,
    pub source_metadata_json: Option<String>,
}

/// AI-derived fields for a resource
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub resource_id: String,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub translation: Option<String>,
    pub importance: Option<i64>,
    pub topics_json: Option<String>,
    pub keywords_json: Option<String>,
    pub bites_json: Option<String>,
    pub prompt_version: Option<String>,
    pub model: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AnalysisResult {
    pub fn new(resource_id: &str, at: DateTime<Utc>) -> Self {
        let now = timestamp(at);
        Self {
            resource_id: resource_id.to_string(),
            summary: None,
            transcript: None,
            translation: None,
            importance: None,
            topics_json: None,
            keywords_json: None,
            bites_json: None,
            prompt_version: None,
            model: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// A result carrying only the failure reason
    pub fn failed(resource_id: &str, error_message: String, at: DateTime<Utc>) -> Self {
        let mut result = Self::new(resource_id, at);
        result.error_message = Some(error_message);
        result
    }

    pub fn topics(&self) -> Vec<String> {
        decode_list(&self.topics_json)
    }

    pub fn keywords(&self) -> Vec<String> {
        decode_list(&self.keywords_json)
    }

    pub fn bites(&self) -> Vec<String> {
        decode_list(&self.bites_json)
    }
}

fn decode_list(json: &Option<String>) -> Vec<String> {
    json.as_ref()
        .and_then(|j| serde_json::from_str(j).ok())
        .unwrap_or_default()
}

/// A pipeline run record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub source_name: String,
    pub mode: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub processed: i64,
    pub skipped: i64,
    pub errored: i64,
    pub classification_errors: i64,
    pub errors_json: Option<String>,
}

impl PipelineRun {
    pub fn new(source_name: &str, mode: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_name: source_name.to_string(),
            mode: mode.to_string(),
            started_at: timestamp(Utc::now()),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            processed: 0,
            skipped: 0,
            errored: 0,
            classification_errors: 0,
            errors_json: None,
        }
    }
}

/// Counts written when a run finishes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub processed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub classification_errors: usize,
}

/// Proof that the holder is the single active runner for `name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLease {
    pub name: String,
    pub holder: String,
    pub expires_at: String,
}

/// Resource count for one (source, status) pair
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StatusCount {
    pub source_name: String,
    pub analysis_status: String,
    pub count: i64,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    async fn open(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create database with path directly, initializing the schema if needed
    pub async fn new(db_path: &std::path::Path) -> Result<Self> {
        let db = Self::open(db_path).await?;
        if !db.is_initialized().await? {
            db.init_schema().await?;
        }
        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='resources'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn setup_test_db() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.db_file = tmp.path().join("test.db");

        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        (db, tmp)
    }

    #[tokio::test]
    async fn test_new_initializes_schema_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/meta.db");
        let db = MetaDb::new(&path).await.unwrap();
        assert!(db.is_initialized().await.unwrap());
        // reopening an initialized database is a no-op
        let again = MetaDb::new(&path).await.unwrap();
        assert!(again.is_initialized().await.unwrap());
    }

    #[test]
    fn test_size_limit_treats_unknown_as_eligible() {
        let mut resource = NewResource::new("cnn", "CNNA-ST1-1000000000000001").into_resource(Utc::now());
        assert!(resource.within_size_limit(300));
        resource.file_size_mb = Some(300.0);
        assert!(resource.within_size_limit(300));
        resource.file_size_mb = Some(301.0);
        assert!(!resource.within_size_limit(300));
    }

    #[test]
    fn test_timestamp_is_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp(a), "2026-01-02T03:04:05.000Z");
    }

    #[test]
    fn test_analysis_result_lists() {
        let mut result = AnalysisResult::new("r1", Utc::now());
        result.topics_json = Some(r#"["politics","asia"]"#.to_string());
        assert_eq!(result.topics(), vec!["politics", "asia"]);
        assert!(result.keywords().is_empty());
    }
}
