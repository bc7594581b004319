//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Resources: one media item from one source
CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    source_name TEXT NOT NULL,
    source_id TEXT NOT NULL,
    primary_path TEXT,
    document_path TEXT,
    document_version INTEGER NOT NULL DEFAULT 0,
    media_version INTEGER NOT NULL DEFAULT 0,
    analysis_status TEXT NOT NULL,
    sync_status TEXT NOT NULL,
    title TEXT,
    published_at TEXT,
    duration_seconds INTEGER,
    file_size_mb REAL,
    source_metadata_json TEXT,
    fetched_at TEXT NOT NULL,
    analyzed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(source_name, source_id)
);

-- Analysis results: one row per resource, overwritten on every attempt
CREATE TABLE IF NOT EXISTS analysis_results (
    resource_id TEXT PRIMARY KEY REFERENCES resources(id) ON DELETE CASCADE,
    summary TEXT,
    transcript TEXT,
    translation TEXT,
    importance INTEGER,
    topics_json TEXT,
    keywords_json TEXT,
    bites_json TEXT,
    prompt_version TEXT,
    model TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Pipeline runs: per-run summary history
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id TEXT PRIMARY KEY,
    source_name TEXT NOT NULL,
    mode TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    processed INTEGER DEFAULT 0,
    skipped INTEGER DEFAULT 0,
    errored INTEGER DEFAULT 0,
    classification_errors INTEGER DEFAULT 0,
    errors_json TEXT
);

-- Run leases: one active runner per name
CREATE TABLE IF NOT EXISTS run_leases (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_resources_status ON resources(analysis_status, updated_at);
CREATE INDEX IF NOT EXISTS idx_resources_source_status ON resources(source_name, analysis_status, fetched_at);
CREATE INDEX IF NOT EXISTS idx_runs_source ON pipeline_runs(source_name);
"#;
