//! Custom error types for newsreel

use thiserror::Error;

/// Main error type for newsreel operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The backend could not be reached or listed at all; aborts a run.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Classification error: {0}")]
    Classification(String),

    /// Data-level failure for one resource (empty or invalid response, unreadable media).
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Service-level failure (auth, quota, server side). Treated as systemic.
    #[error("Analysis API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("File too large: {path} is {size_mb:.1} MB (limit {limit_mb} MB)")]
    FileTooLarge {
        path: String,
        size_mb: f64,
        limit_mb: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Another runner holds the lease '{0}'")]
    Locked(String),

    #[error("Not initialized: run 'newsreel init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this failure points at the analysis service itself rather than
    /// at the resource being analysed.
    pub fn is_systemic(&self) -> bool {
        match self {
            Error::Api { status, .. } => {
                matches!(status, 401 | 403 | 429) || (500..=599).contains(status)
            }
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Result type alias for newsreel
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_status_classification() {
        for status in [401u16, 403, 429, 500, 503] {
            let err = Error::Api {
                status,
                message: "quota".to_string(),
            };
            assert!(err.is_systemic(), "{} should be systemic", status);
        }

        let bad_request = Error::Api {
            status: 400,
            message: "invalid argument".to_string(),
        };
        assert!(!bad_request.is_systemic());
    }

    #[test]
    fn test_resource_errors_are_not_systemic() {
        assert!(!Error::Analysis("empty response".to_string()).is_systemic());
        let too_large = Error::FileTooLarge {
            path: "a.mp4".to_string(),
            size_mb: 301.0,
            limit_mb: 300,
        };
        assert!(!too_large.is_systemic());
        assert_eq!(too_large.to_string(), "File too large: a.mp4 is 301.0 MB (limit 300 MB)");
    }
}
