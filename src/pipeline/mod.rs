//! Pipeline orchestration
//!
//! Drives resources of one source through the analysis lifecycle:
//! - `text`: companion document to metadata (`MetadataExtracting` -> `MetadataExtracted`)
//! - `video`: media to analysis (`Processing` -> `Completed`)
//! - `full`: both in one call, behind three admission gates
//!
//! Every status write happens before the external call it guards, so a
//! crash mid-call leaves a status that recovery can find.

pub mod document;
pub mod media;
pub mod recovery;
pub mod version;

pub use media::{resolve_media, MediaOrigin, MediaResolution, ResolvedMedia};
pub use recovery::{recover_stuck, retry_failed, RecoveryReport};
pub use version::{should_reanalyze, FileType, VersionDecision};

use crate::analysis::{media_mime, prompt_set, AnalysisClient, PromptSet};
use crate::classify::{best_document, group_files, Classifier};
use crate::config::{Config, SourceConfig};
use crate::error::{Error, Result};
use crate::meta::{
    timestamp, AnalysisResult, AnalysisStatus, Location, NewResource, Resource, ResourceStore,
    RunCounts, RunLease, RunStatus, SyncStatus,
};
use crate::progress::{advance_progress, finish_progress, start_progress_bar};
use crate::storage::{bytes_to_mb, Storage, StorageObject, StorageRegistry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Which pipeline a batch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    Text,
    Video,
    Full,
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineMode::Text => write!(f, "text"),
            PipelineMode::Video => write!(f, "video"),
            PipelineMode::Full => write!(f, "full"),
        }
    }
}

impl FromStr for PipelineMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(PipelineMode::Text),
            "video" => Ok(PipelineMode::Video),
            "full" => Ok(PipelineMode::Full),
            _ => Err(Error::Config(format!(
                "Unknown pipeline mode '{}'; use text, video or full",
                s
            ))),
        }
    }
}

/// Options for one source batch
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub mode: PipelineMode,
    /// Storage backend override; the source's own backend when unset
    pub storage: Option<String>,
    /// Maximum number of external analysis calls
    pub limit: Option<usize>,
    pub prompt_version: String,
}

impl BatchOptions {
    pub fn new(mode: PipelineMode, prompt_version: impl Into<String>) -> Self {
        Self {
            mode,
            storage: None,
            limit: None,
            prompt_version: prompt_version.into(),
        }
    }
}

/// Summary of a batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub processed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub classification_errors: usize,
    /// External analysis calls issued
    pub calls: usize,
    /// Reason the batch stopped early, if it did
    pub halted: Option<String>,
    pub errors: Vec<String>,
}

impl BatchStats {
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            processed: self.processed,
            skipped: self.skipped,
            errored: self.errored,
            classification_errors: self.classification_errors,
        }
    }

    fn run_status(&self) -> RunStatus {
        if self.halted.is_some() {
            RunStatus::Halted
        } else {
            RunStatus::Completed
        }
    }
}

/// Per-batch state shared by the mode handlers
struct BatchContext<'a> {
    lease: RunLease,
    source: &'a SourceConfig,
    storage: Arc<dyn Storage>,
    classifier: Classifier,
    prompts: &'static PromptSet,
    prompt_version: String,
    limit: Option<usize>,
    stats: BatchStats,
}

impl BatchContext<'_> {
    fn budget_left(&self) -> bool {
        self.limit.map_or(true, |limit| self.stats.calls < limit)
    }

    fn halted(&self) -> bool {
        self.stats.halted.is_some()
    }
}

/// What happened to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Processed,
    Skipped,
    Errored,
    /// Call budget spent before this resource could be analysed
    OutOfBudget,
}

/// Sequences resources through the lifecycle for one source at a time
pub struct Orchestrator<'a> {
    config: &'a Config,
    store: &'a dyn ResourceStore,
    storages: &'a StorageRegistry,
    client: &'a AnalysisClient,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a dyn ResourceStore,
        storages: &'a StorageRegistry,
        client: &'a AnalysisClient,
    ) -> Self {
        Self {
            config,
            store,
            storages,
            client,
        }
    }

    /// Run one batch for `source_name`.
    ///
    /// The caller must hold the run lease. A storage listing failure aborts
    /// the batch before any resource is touched; per-resource failures are
    /// recorded and the batch moves on.
    pub async fn run_source_batch(
        &self,
        lease: &RunLease,
        source_name: &str,
        options: &BatchOptions,
    ) -> Result<BatchStats> {
        if lease.expires_at <= timestamp(Utc::now()) {
            return Err(Error::Locked(format!(
                "{} (lease expired at {})",
                lease.name, lease.expires_at
            )));
        }

        let source = self.config.source(source_name)?;
        let storage_name = options.storage.as_deref().unwrap_or(&source.storage);
        let storage = self.storages.get(storage_name)?;
        let prompts = prompt_set(&options.prompt_version)?;
        let classifier = Classifier::for_source(source)?;

        info!(
            source = %source.name,
            storage = %storage_name,
            mode = %options.mode,
            prompt_version = %prompts.version,
            limit = ?options.limit,
            "Starting batch"
        );

        let run = self
            .store
            .start_run(&source.name, &options.mode.to_string())
            .await?;

        let mut ctx = BatchContext {
            lease: lease.clone(),
            source,
            storage,
            classifier,
            prompts,
            prompt_version: prompts.version.to_string(),
            limit: options.limit,
            stats: BatchStats::default(),
        };

        let outcome = match options.mode {
            PipelineMode::Text => self.run_text(&mut ctx).await,
            PipelineMode::Video => self.run_video(&mut ctx).await,
            PipelineMode::Full => self.run_full(&mut ctx).await,
        };

        match outcome {
            Ok(()) => {
                let stats = ctx.stats;
                let errors = if stats.errors.is_empty() {
                    None
                } else {
                    Some(stats.errors.clone())
                };
                self.store
                    .complete_run(&run.id, stats.run_status(), &stats.counts(), errors)
                    .await?;

                info!(
                    source = %source.name,
                    processed = stats.processed,
                    skipped = stats.skipped,
                    errored = stats.errored,
                    classification_errors = stats.classification_errors,
                    calls = stats.calls,
                    "Batch finished"
                );
                if let Some(reason) = &stats.halted {
                    warn!(source = %source.name, "Batch halted: {}", reason);
                }
                Ok(stats)
            }
            Err(e) => {
                error!(source = %source.name, "Batch aborted: {}", e);
                self.store
                    .complete_run(
                        &run.id,
                        RunStatus::Failed,
                        &ctx.stats.counts(),
                        Some(vec![e.to_string()]),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Listing and grouping shared by the scanning modes
    async fn scan(&self, ctx: &mut BatchContext<'_>) -> Result<Vec<(String, Vec<StorageObject>)>> {
        let files = ctx.storage.list_files(&ctx.source.root).await?;
        info!(source = %ctx.source.name, files = files.len(), "Scanned storage");

        let grouping = group_files(&files, ctx.source.grouping, &ctx.classifier);
        ctx.stats.classification_errors = grouping.error_count();
        for err in &grouping.errors {
            ctx.stats
                .errors
                .push(format!("{}: classification: {}", err.path, err.reason));
        }
        Ok(grouping.groups.into_iter().collect())
    }

    /// Extend the run lease before the next resource; losing it aborts the batch
    async fn keep_lease(&self, ctx: &mut BatchContext<'_>) -> Result<()> {
        let ttl = self.config.recovery.lock_ttl();
        match self.store.renew_lease(&ctx.lease, ttl, Utc::now()).await? {
            Some(renewed) => {
                ctx.lease = renewed;
                Ok(())
            }
            None => Err(Error::Locked(format!(
                "{} (lease lost during batch)",
                ctx.lease.name
            ))),
        }
    }

    fn tally(&self, ctx: &mut BatchContext<'_>, outcome: Outcome) {
        match outcome {
            Outcome::Processed => ctx.stats.processed += 1,
            Outcome::Skipped => ctx.stats.skipped += 1,
            Outcome::Errored => ctx.stats.errored += 1,
            Outcome::OutOfBudget => {}
        }
    }

    /// Record a per-resource failure; systemic ones may halt the batch
    fn record_failure(&self, ctx: &mut BatchContext<'_>, source_id: &str, path: &str, err: &Error) {
        let message = format!("{} ({}): {}", source_id, path, err);
        warn!(
            source = %ctx.source.name,
            source_id = %source_id,
            path = %path,
            systemic = err.is_systemic(),
            "Analysis failed: {}",
            err
        );
        ctx.stats.errors.push(message);

        if err.is_systemic() && self.config.analysis.halt_on_api_error {
            ctx.stats.halted = Some(format!("analysis service error on {}: {}", source_id, err));
        }
    }

    /// Attach a failure to the resource's analysis row, keeping any earlier analysis
    async fn record_error_result(&self, resource_id: &str, err: &Error) -> Result<()> {
        let now = Utc::now();
        let result = match self.store.get_analysis_result(resource_id).await? {
            Some(mut existing) => {
                existing.error_message = Some(err.to_string());
                existing.updated_at = timestamp(now);
                existing
            }
            None => AnalysisResult::failed(resource_id, err.to_string(), now),
        };
        self.store.upsert_analysis_result(&result).await
    }

    /// Compare-and-set a status edge that the lifecycle allows
    async fn advance(&self, resource: &Resource, from: AnalysisStatus, to: AnalysisStatus) -> Result<bool> {
        from.ensure_transition(to)?;
        let moved = self
            .store
            .transition_status(&resource.id, from, to, Utc::now())
            .await?;
        if moved {
            debug!(source_id = %resource.source_id, from = %from, to = %to, "Status changed");
        } else {
            warn!(
                source_id = %resource.source_id,
                expected = %from,
                "Status changed underneath; resource left alone"
            );
        }
        Ok(moved)
    }

    // --- text -------------------------------------------------------------

    async fn run_text(&self, ctx: &mut BatchContext<'_>) -> Result<()> {
        let groups = self.scan(ctx).await?;
        let mut seen: HashSet<String> = HashSet::new();

        let progress = start_progress_bar(groups.len(), "Reading documents");
        for (key, group) in &groups {
            if ctx.halted() || !ctx.budget_left() {
                break;
            }
            self.keep_lease(ctx).await?;
            seen.insert(key.clone());

            let outcome = match self.text_group(ctx, key, group).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.record_failure(ctx, key, "-", &e);
                    Outcome::Errored
                }
            };
            advance_progress(&progress);
            if outcome == Outcome::OutOfBudget {
                break;
            }
            self.tally(ctx, outcome);
        }
        finish_progress(progress, "Documents read");

        if ctx.halted() || !ctx.budget_left() {
            return Ok(());
        }

        // rows pushed back by recovery or retry that the scan did not reach
        let pending = self
            .store
            .list_by_status(Some(&ctx.source.name), AnalysisStatus::MetadataExtracting, None)
            .await?;
        for resource in pending {
            if ctx.halted() || !ctx.budget_left() {
                break;
            }
            if seen.contains(&resource.source_id) {
                continue;
            }
            self.keep_lease(ctx).await?;
            let Some(document_path) = resource.document_path.clone() else {
                warn!(source_id = %resource.source_id, "No stored document path; cannot resume");
                ctx.stats.skipped += 1;
                continue;
            };
            let outcome = match self.analyze_text(ctx, &resource, &document_path).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.record_failure(ctx, &resource.source_id, &document_path, &e);
                    Outcome::Errored
                }
            };
            if outcome == Outcome::OutOfBudget {
                break;
            }
            self.tally(ctx, outcome);
        }

        Ok(())
    }

    async fn text_group(
        &self,
        ctx: &mut BatchContext<'_>,
        key: &str,
        group: &[StorageObject],
    ) -> Result<Outcome> {
        let Some(document) = best_document(group, &ctx.classifier) else {
            debug!(source_id = %key, "Bundle has no companion document");
            return Ok(Outcome::Skipped);
        };
        let document_version = ctx.classifier.version(&document.path);
        let media = media::same_directory_media(document, group, &ctx.classifier);

        let existing = self.store.find_resource(&ctx.source.name, key).await?;
        let resource = match existing {
            None => {
                let mut new = NewResource::new(&ctx.source.name, key);
                new.document_path = Some(document.path.clone());
                new.document_version = document_version;
                if let Some(m) = &media {
                    new.primary_path = Some(m.path.clone());
                    new.media_version = m.version;
                    new.file_size_mb = Some(bytes_to_mb(m.size));
                }
                let (resource, created) = self.store.find_or_create_resource(new, Utc::now()).await?;
                if created {
                    info!(source = %ctx.source.name, source_id = %key, path = %document.path, "New resource");
                    if media.is_some() {
                        self.store
                            .set_sync_status(&resource.id, SyncStatus::Synced, Utc::now())
                            .await?;
                    }
                }
                resource
            }
            Some(resource) => {
                let status = resource.status()?;
                if !status.can_transition_to(AnalysisStatus::MetadataExtracting) {
                    debug!(source_id = %key, status = %status, "Not eligible for text analysis; skipped");
                    return Ok(Outcome::Skipped);
                }

                let doc = should_reanalyze(ctx.source, Some(&resource), document_version, FileType::Document);
                let media_drift = media
                    .as_ref()
                    .map(|m| should_reanalyze(ctx.source, Some(&resource), m.version, FileType::Media))
                    .is_some_and(|d| d.reanalyze);

                if doc.reanalyze || media_drift {
                    info!(
                        source = %ctx.source.name,
                        source_id = %key,
                        stored_document = resource.document_version,
                        document = doc.new_version,
                        media_drift,
                        "Version drift; reanalyzing"
                    );
                    self.relocate(&resource, document, doc.new_version, media.as_ref())
                        .await?;
                } else {
                    match status {
                        AnalysisStatus::Pending | AnalysisStatus::MetadataExtracting => {
                            debug!(source_id = %key, "Resuming resource");
                        }
                        status => {
                            debug!(source_id = %key, status = %status, "Unchanged; skipped");
                            return Ok(Outcome::Skipped);
                        }
                    }
                }

                self.store
                    .get_resource(&resource.id)
                    .await?
                    .ok_or_else(|| Error::ResourceNotFound(resource.id.clone()))?
            }
        };

        self.analyze_text(ctx, &resource, &document.path).await
    }

    /// Record new file locations after version drift
    async fn relocate(
        &self,
        resource: &Resource,
        document: &StorageObject,
        document_version: u32,
        media: Option<&ResolvedMedia>,
    ) -> Result<()> {
        let location = Location {
            primary_path: media.map(|m| m.path.clone()).or_else(|| resource.primary_path.clone()),
            document_path: Some(document.path.clone()),
            document_version,
            media_version: media
                .map(|m| m.version)
                .unwrap_or_else(|| u32::try_from(resource.media_version).unwrap_or(0)),
            file_size_mb: media.map(|m| bytes_to_mb(m.size)).or(resource.file_size_mb),
        };
        let now = Utc::now();
        self.store.update_location(&resource.id, &location, now).await?;
        let sync = if media.is_some() {
            SyncStatus::Synced
        } else {
            SyncStatus::Updated
        };
        self.store.set_sync_status(&resource.id, sync, now).await
    }

    /// `* -> MetadataExtracting -> MetadataExtracted | TxtAnalysisFailed`
    async fn analyze_text(
        &self,
        ctx: &mut BatchContext<'_>,
        resource: &Resource,
        document_path: &str,
    ) -> Result<Outcome> {
        let from = resource.status()?;
        if !from.can_transition_to(AnalysisStatus::MetadataExtracting) {
            debug!(source_id = %resource.source_id, status = %from, "Not eligible for text analysis");
            return Ok(Outcome::Skipped);
        }
        if !ctx.budget_left() {
            return Ok(Outcome::OutOfBudget);
        }
        if !self
            .advance(resource, from, AnalysisStatus::MetadataExtracting)
            .await?
        {
            return Ok(Outcome::Skipped);
        }

        let attempt = self.text_attempt(ctx, resource, document_path).await;
        match attempt {
            Ok(()) => {
                self.advance(
                    resource,
                    AnalysisStatus::MetadataExtracting,
                    AnalysisStatus::MetadataExtracted,
                )
                .await?;
                info!(source = %ctx.source.name, source_id = %resource.source_id, "Metadata extracted");
                Ok(Outcome::Processed)
            }
            Err(e) => {
                self.record_error_result(&resource.id, &e).await?;
                self.advance(
                    resource,
                    AnalysisStatus::MetadataExtracting,
                    AnalysisStatus::TxtAnalysisFailed,
                )
                .await?;
                self.record_failure(ctx, &resource.source_id, document_path, &e);
                Ok(Outcome::Errored)
            }
        }
    }

    async fn text_attempt(
        &self,
        ctx: &mut BatchContext<'_>,
        resource: &Resource,
        document_path: &str,
    ) -> Result<()> {
        let bytes = ctx.storage.read(document_path).await?;
        let fallback = document::read_lenient(&bytes, &ctx.classifier, document_path);

        ctx.stats.calls += 1;
        let metadata = self
            .client
            .analyze_document(ctx.prompts, String::from_utf8_lossy(&bytes).into_owned())
            .await?
            .or(&fallback);

        let now = Utc::now();
        self.store
            .record_metadata(&resource.id, &metadata.to_update(), now)
            .await?;

        // no bundled media: try the document's own reference
        if resource.primary_path.is_none() {
            if let Some(reference) = metadata.media_reference.as_deref() {
                if let Some(found) = media::verify_reference(
                    ctx.storage.as_ref(),
                    document_path,
                    reference,
                    &ctx.classifier,
                )
                .await?
                {
                    let location = Location {
                        primary_path: Some(found.path.clone()),
                        document_path: Some(document_path.to_string()),
                        document_version: ctx.classifier.version(document_path),
                        media_version: found.version,
                        file_size_mb: Some(bytes_to_mb(found.size)),
                    };
                    self.store.update_location(&resource.id, &location, now).await?;
                    self.store
                        .set_sync_status(&resource.id, SyncStatus::Synced, now)
                        .await?;
                }
            }
        }

        Ok(())
    }

    // --- video ------------------------------------------------------------

    async fn run_video(&self, ctx: &mut BatchContext<'_>) -> Result<()> {
        let max_mb = self.config.analysis.max_media_mb;
        let candidates = self
            .store
            .list_video_candidates(&ctx.source.name, max_mb, None)
            .await?;
        info!(source = %ctx.source.name, candidates = candidates.len(), "Video candidates");

        let progress = start_progress_bar(candidates.len(), "Analysing media");
        for resource in &candidates {
            if ctx.halted() || !ctx.budget_left() {
                break;
            }
            self.keep_lease(ctx).await?;
            let outcome = match self.analyze_video(ctx, resource).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let path = resource.primary_path.clone().unwrap_or_default();
                    self.record_failure(ctx, &resource.source_id, &path, &e);
                    Outcome::Errored
                }
            };
            advance_progress(&progress);
            if outcome == Outcome::OutOfBudget {
                break;
            }
            self.tally(ctx, outcome);
        }
        finish_progress(progress, "Media analysed");
        Ok(())
    }

    /// `MetadataExtracted -> Processing -> Completed | VideoAnalysisFailed | FileTooLarge`
    async fn analyze_video(&self, ctx: &mut BatchContext<'_>, resource: &Resource) -> Result<Outcome> {
        if !ctx.budget_left() {
            return Ok(Outcome::OutOfBudget);
        }
        let from = resource.status()?;
        if !self.advance(resource, from, AnalysisStatus::Processing).await? {
            return Ok(Outcome::Skipped);
        }

        let path = resource.primary_path.clone().unwrap_or_default();
        match self.video_attempt(ctx, resource, &path).await {
            Ok(()) => {
                self.advance(resource, AnalysisStatus::Processing, AnalysisStatus::Completed)
                    .await?;
                self.store
                    .set_sync_status(&resource.id, SyncStatus::Parsed, Utc::now())
                    .await?;
                info!(source = %ctx.source.name, source_id = %resource.source_id, "Analysis completed");
                Ok(Outcome::Processed)
            }
            Err(Error::FileTooLarge {
                path,
                size_mb,
                limit_mb,
            }) => {
                self.advance(resource, AnalysisStatus::Processing, AnalysisStatus::FileTooLarge)
                    .await?;
                info!(
                    source_id = %resource.source_id,
                    path = %path,
                    size_mb,
                    limit_mb,
                    "Media over size limit"
                );
                Ok(Outcome::Skipped)
            }
            Err(e) => {
                self.record_error_result(&resource.id, &e).await?;
                self.advance(
                    resource,
                    AnalysisStatus::Processing,
                    AnalysisStatus::VideoAnalysisFailed,
                )
                .await?;
                self.record_failure(ctx, &resource.source_id, &path, &e);
                Ok(Outcome::Errored)
            }
        }
    }

    async fn video_attempt(
        &self,
        ctx: &mut BatchContext<'_>,
        resource: &Resource,
        path: &str,
    ) -> Result<()> {
        if path.is_empty() {
            return Err(Error::Analysis("no media file recorded for resource".to_string()));
        }

        let mut measured = resource.clone();
        if measured.file_size_mb.is_none() {
            let mb = bytes_to_mb(ctx.storage.size(path).await?);
            self.store
                .set_file_size(&resource.id, Some(mb), Utc::now())
                .await?;
            measured.file_size_mb = Some(mb);
        }
        let limit_mb = self.config.analysis.max_media_mb;
        if !measured.within_size_limit(limit_mb) {
            return Err(Error::FileTooLarge {
                path: path.to_string(),
                size_mb: measured.file_size_mb.unwrap_or_default(),
                limit_mb,
            });
        }

        let bytes = ctx.storage.read(path).await?;
        ctx.stats.calls += 1;
        let analysis = self
            .client
            .analyze_video(ctx.prompts, bytes, media_mime(path))
            .await?;

        let now = Utc::now();
        let result = analysis.into_result(
            &resource.id,
            &ctx.prompt_version,
            self.client.model_name(),
            now,
        );
        self.store.upsert_analysis_result(&result).await?;
        self.store.mark_analyzed(&resource.id, now).await
    }

    // --- full -------------------------------------------------------------

    async fn run_full(&self, ctx: &mut BatchContext<'_>) -> Result<()> {
        let groups = self.scan(ctx).await?;

        let progress = start_progress_bar(groups.len(), "Analysing bundles");
        for (key, group) in &groups {
            if ctx.halted() || !ctx.budget_left() {
                break;
            }
            self.keep_lease(ctx).await?;
            let outcome = match self.full_group(ctx, key, group).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.record_failure(ctx, key, "-", &e);
                    Outcome::Errored
                }
            };
            advance_progress(&progress);
            if outcome == Outcome::OutOfBudget {
                break;
            }
            self.tally(ctx, outcome);
        }
        finish_progress(progress, "Bundles analysed");
        Ok(())
    }

    /// Gates A, B and C, then one combined call on a freshly created row
    async fn full_group(
        &self,
        ctx: &mut BatchContext<'_>,
        key: &str,
        group: &[StorageObject],
    ) -> Result<Outcome> {
        let Some(document) = best_document(group, &ctx.classifier) else {
            debug!(source_id = %key, "Bundle has no companion document");
            return Ok(Outcome::Skipped);
        };

        // Gate A: a media file we can point at
        let resolution =
            media::resolve_media(ctx.storage.as_ref(), document, group, &ctx.classifier).await?;
        let document_bytes = resolution.document_bytes;
        let Some(media) = resolution.media else {
            info!(source_id = %key, path = %document.path, "Gate A: no media file; skipped");
            return Ok(Outcome::Skipped);
        };

        // Gate B: never rework a known identity
        if self.store.find_resource(&ctx.source.name, key).await?.is_some() {
            debug!(source_id = %key, "Gate B: resource exists; skipped");
            return Ok(Outcome::Skipped);
        }

        // Gate C: size by stat
        let size_mb = bytes_to_mb(ctx.storage.size(&media.path).await?);
        let limit_mb = self.config.analysis.max_media_mb;
        if size_mb > limit_mb as f64 {
            info!(
                source_id = %key,
                path = %media.path,
                size_mb,
                limit_mb,
                "Gate C: media over size limit; skipped"
            );
            return Ok(Outcome::Skipped);
        }

        if !ctx.budget_left() {
            return Ok(Outcome::OutOfBudget);
        }

        let mut new = NewResource::new(&ctx.source.name, key);
        new.primary_path = Some(media.path.clone());
        new.document_path = Some(document.path.clone());
        new.document_version = ctx.classifier.version(&document.path);
        new.media_version = media.version;
        new.file_size_mb = Some(size_mb);
        new.status = AnalysisStatus::Processing;
        new.sync_status = SyncStatus::Synced;
        let (resource, created) = self.store.find_or_create_resource(new, Utc::now()).await?;
        if !created {
            debug!(source_id = %key, "Created concurrently; skipped");
            return Ok(Outcome::Skipped);
        }
        info!(source = %ctx.source.name, source_id = %key, media = %media.path, "Admitted for full analysis");

        match self
            .full_attempt(ctx, &resource, &document.path, document_bytes, &media.path)
            .await
        {
            Ok(()) => {
                self.advance(&resource, AnalysisStatus::Processing, AnalysisStatus::Completed)
                    .await?;
                self.store
                    .set_sync_status(&resource.id, SyncStatus::Parsed, Utc::now())
                    .await?;
                info!(source = %ctx.source.name, source_id = %key, "Analysis completed");
                Ok(Outcome::Processed)
            }
            Err(e) => {
                // a first attempt that fails leaves no stub behind
                self.store.delete_resource(&resource.id).await?;
                self.record_failure(ctx, key, &media.path, &e);
                Ok(Outcome::Errored)
            }
        }
    }

    async fn full_attempt(
        &self,
        ctx: &mut BatchContext<'_>,
        resource: &Resource,
        document_path: &str,
        document_bytes: Option<Vec<u8>>,
        media_path: &str,
    ) -> Result<()> {
        let document_bytes = match document_bytes {
            Some(bytes) => bytes,
            None => ctx.storage.read(document_path).await?,
        };
        let fallback = document::read_lenient(&document_bytes, &ctx.classifier, document_path);
        let media_bytes = ctx.storage.read(media_path).await?;

        ctx.stats.calls += 1;
        let full = self
            .client
            .analyze_full(
                ctx.prompts,
                String::from_utf8_lossy(&document_bytes).into_owned(),
                media_bytes,
                media_mime(media_path),
            )
            .await?;

        let now = Utc::now();
        let metadata = full.metadata.or(&fallback);
        self.store
            .record_metadata(&resource.id, &metadata.to_update(), now)
            .await?;
        let result = full.analysis.into_result(
            &resource.id,
            &ctx.prompt_version,
            self.client.model_name(),
            now,
        );
        self.store.upsert_analysis_result(&result).await?;
        self.store.mark_analyzed(&resource.id, now).await
    }
}
