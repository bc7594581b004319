//! Persisted status vocabulary and the resource lifecycle

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Where a resource stands in the analysis lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    MetadataExtracting,
    MetadataExtracted,
    TxtAnalysisFailed,
    Processing,
    VideoAnalysisFailed,
    Completed,
    Failed,
    FileTooLarge,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 9] = [
        AnalysisStatus::Pending,
        AnalysisStatus::MetadataExtracting,
        AnalysisStatus::MetadataExtracted,
        AnalysisStatus::TxtAnalysisFailed,
        AnalysisStatus::Processing,
        AnalysisStatus::VideoAnalysisFailed,
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
        AnalysisStatus::FileTooLarge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::MetadataExtracting => "metadata_extracting",
            AnalysisStatus::MetadataExtracted => "metadata_extracted",
            AnalysisStatus::TxtAnalysisFailed => "txt_analysis_failed",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::VideoAnalysisFailed => "video_analysis_failed",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
            AnalysisStatus::FileTooLarge => "file_too_large",
        }
    }

    /// A worker is (or was, before it died) talking to the analysis service
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::MetadataExtracting | AnalysisStatus::Processing
        )
    }

    /// Failures that retry tooling may push back into the pipeline
    pub fn is_retryable_failure(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::TxtAnalysisFailed | AnalysisStatus::VideoAnalysisFailed
        )
    }

    /// Lifecycle edges. `Failed` is terminal.
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        match self {
            Pending => matches!(next, MetadataExtracting | Processing | FileTooLarge | Failed),
            MetadataExtracting => matches!(
                next,
                MetadataExtracting | MetadataExtracted | TxtAnalysisFailed | Failed
            ),
            MetadataExtracted => matches!(
                next,
                MetadataExtracting | Processing | FileTooLarge | Failed
            ),
            TxtAnalysisFailed => matches!(next, MetadataExtracting | Failed),
            Processing => matches!(
                next,
                Completed | VideoAnalysisFailed | MetadataExtracting | FileTooLarge | Failed
            ),
            VideoAnalysisFailed => matches!(next, MetadataExtracting | Processing | Failed),
            Completed => matches!(next, MetadataExtracting),
            FileTooLarge => matches!(next, MetadataExtracting | Failed),
            Failed => false,
        }
    }

    /// Validate an edge, naming both ends on failure
    pub fn ensure_transition(&self, next: AnalysisStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AnalysisStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| Error::Config(format!("Unknown analysis status: {}", s)))
    }
}

/// How far a resource has progressed toward sync and analysis, for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Seen (or re-versioned) on the source
    Updated,
    /// Media confirmed on storage
    Synced,
    /// Analysis persisted
    Parsed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Updated => "updated",
            SyncStatus::Synced => "synced",
            SyncStatus::Parsed => "parsed",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "updated" => Ok(SyncStatus::Updated),
            "synced" => Ok(SyncStatus::Synced),
            "parsed" => Ok(SyncStatus::Parsed),
            _ => Err(Error::Config(format!("Unknown sync status: {}", s))),
        }
    }
}

/// Pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    /// Stopped early after a systemic analysis failure
    Halted,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Halted => write!(f, "halted"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "halted" => Ok(RunStatus::Halted),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Config(format!("Unknown run status: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_vocabulary_roundtrip() {
        let expected = [
            "pending",
            "metadata_extracting",
            "metadata_extracted",
            "txt_analysis_failed",
            "processing",
            "video_analysis_failed",
            "completed",
            "failed",
            "file_too_large",
        ];
        for (status, text) in AnalysisStatus::ALL.iter().zip(expected) {
            assert_eq!(status.to_string(), text);
            assert_eq!(text.parse::<AnalysisStatus>().unwrap(), *status);
        }
        for text in ["updated", "synced", "parsed"] {
            assert_eq!(text.parse::<SyncStatus>().unwrap().to_string(), text);
        }
        assert!("done".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_happy_path_edges() {
        use AnalysisStatus::*;
        let path = [
            Pending,
            MetadataExtracting,
            MetadataExtracted,
            Processing,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_failure_edges() {
        use AnalysisStatus::*;
        assert!(MetadataExtracting.can_transition_to(TxtAnalysisFailed));
        assert!(Processing.can_transition_to(VideoAnalysisFailed));
        assert!(!MetadataExtracting.can_transition_to(VideoAnalysisFailed));
        assert!(!Processing.can_transition_to(TxtAnalysisFailed));
    }

    #[test]
    fn test_reentry_edges() {
        use AnalysisStatus::*;
        assert!(Processing.can_transition_to(MetadataExtracting));
        assert!(TxtAnalysisFailed.can_transition_to(MetadataExtracting));
        assert!(VideoAnalysisFailed.can_transition_to(MetadataExtracting));
        assert!(MetadataExtracted.can_transition_to(MetadataExtracting));
    }

    #[test]
    fn test_failed_is_terminal() {
        for next in AnalysisStatus::ALL {
            assert!(!AnalysisStatus::Failed.can_transition_to(next));
        }
        assert!(matches!(
            AnalysisStatus::Failed.ensure_transition(AnalysisStatus::Pending),
            Err(Error::InvalidTransition { .. })
        ));
    }
}
