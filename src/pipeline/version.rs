//! Version drift detection

use crate::config::SourceConfig;
use crate::meta::Resource;

/// Which stored version a scanned file is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Document,
    Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionDecision {
    pub reanalyze: bool,
    /// Version to persist
    pub new_version: u32,
}

/// Decide whether a re-scanned file warrants reanalysis.
///
/// Sources without version checking never reanalyze. With no stored row
/// this is a fresh ingestion. Otherwise any difference from the stored
/// version counts as drift, not just a newer one.
pub fn should_reanalyze(
    source: &SourceConfig,
    existing: Option<&Resource>,
    new_version: u32,
    file_type: FileType,
) -> VersionDecision {
    let keep = VersionDecision {
        reanalyze: false,
        new_version,
    };

    if !source.version_check {
        return keep;
    }

    let Some(existing) = existing else {
        return keep;
    };

    let stored = match file_type {
        FileType::Document => existing.document_version,
        FileType::Media => existing.media_version,
    };

    VersionDecision {
        reanalyze: stored != i64::from(new_version),
        new_version,
    }
}
