//! Filename classification
//!
//! Every agency file name carries the story it belongs to:
//! - an identity token: a fixed prefix plus 16 hex digits
//! - an optional label: the `_`-separated segment right before the token
//! - a version: the trailing `_`-separated integer before the extension
//!
//! `EN-07FR_VERTICAL_ KPOP DEMON _CNNA-ST1-20000000000900ca_801_0.mp4`
//! classifies as identity `CNNA-ST1-20000000000900CA`, label `KPOP DEMON`,
//! version `0`.

pub mod grouping;

pub use grouping::*;

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Segment delimiter used by agency file names
pub const DELIMITER: char = '_';

/// Number of hex digits in an identity token
pub const IDENTITY_HEX_LEN: usize = 16;

/// What a file is to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Companion document (metadata, script)
    Document,
    /// Playable media
    Media,
    /// Anything else; ignored
    Other,
}

/// Compiled identity matcher for one prefix
#[derive(Debug, Clone)]
pub struct IdentityPattern {
    prefix: String,
    regex: Regex,
}

impl IdentityPattern {
    pub fn new(prefix: &str) -> Result<Self> {
        if prefix.is_empty() {
            return Err(Error::Config("identity prefix must not be empty".to_string()));
        }
        let pattern = format!(
            r"(?i){}([0-9a-f]{{{}}})(?:[^0-9a-f]|$)",
            regex::escape(prefix),
            IDENTITY_HEX_LEN
        );
        let regex = Regex::new(&pattern)
            .map_err(|e| Error::Config(format!("Invalid identity prefix '{}': {}", prefix, e)))?;
        Ok(Self {
            prefix: prefix.to_uppercase(),
            regex,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Byte offset of the token and its canonical form
    fn locate(&self, file_name: &str) -> Option<(usize, String)> {
        let caps = self.regex.captures(file_name)?;
        let whole = caps.get(0)?;
        let hex = caps.get(1)?;
        Some((
            whole.start(),
            format!("{}{}", self.prefix, hex.as_str().to_uppercase()),
        ))
    }

    /// Canonical identity token embedded in a file name
    pub fn extract_identity(&self, file_name: &str) -> Option<String> {
        self.locate(file_name).map(|(_, id)| id)
    }

    /// Segment immediately preceding the identity token
    pub fn extract_label(&self, file_name: &str) -> Option<String> {
        let (start, _) = self.locate(file_name)?;
        let head = file_name[..start].strip_suffix(DELIMITER)?;
        let label = head.rsplit(DELIMITER).next()?.trim();
        if label.is_empty() {
            None
        } else {
            Some(label.to_string())
        }
    }
}

fn version_regex() -> &'static Regex {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    VERSION.get_or_init(|| Regex::new(r"_(\d+)$").expect("static regex"))
}

/// Trailing integer segment of a file name, if present
pub fn extract_version(file_name: &str) -> Option<u32> {
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };
    version_regex()
        .captures(stem)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Version with the "oldest/unknown" default applied
pub fn file_version(file_name: &str) -> u32 {
    extract_version(file_name).unwrap_or(0)
}

/// Last path component
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Directory part of a storage path (empty for top-level files)
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    let idx = name.rfind('.')?;
    if idx == 0 {
        return None;
    }
    Some(name[idx + 1..].to_lowercase())
}

/// Per-source classifier: identity pattern plus file kind rules
#[derive(Debug, Clone)]
pub struct Classifier {
    pattern: IdentityPattern,
    document_extensions: Vec<String>,
    media_extensions: Vec<String>,
}

impl Classifier {
    pub fn new(
        prefix: &str,
        document_extensions: Vec<String>,
        media_extensions: Vec<String>,
    ) -> Result<Self> {
        Ok(Self {
            pattern: IdentityPattern::new(prefix)?,
            document_extensions: normalize_extensions(document_extensions),
            media_extensions: normalize_extensions(media_extensions),
        })
    }

    pub fn for_source(source: &SourceConfig) -> Result<Self> {
        Self::new(
            &source.identity_prefix,
            source.document_extensions.clone(),
            source.media_extensions.clone(),
        )
    }

    pub fn pattern(&self) -> &IdentityPattern {
        &self.pattern
    }

    pub fn identity(&self, path: &str) -> Option<String> {
        self.pattern.extract_identity(file_name(path))
    }

    pub fn label(&self, path: &str) -> Option<String> {
        self.pattern.extract_label(file_name(path))
    }

    pub fn version(&self, path: &str) -> u32 {
        file_version(file_name(path))
    }

    pub fn kind(&self, path: &str) -> FileKind {
        match extension(path) {
            Some(ext) if self.document_extensions.contains(&ext) => FileKind::Document,
            Some(ext) if self.media_extensions.contains(&ext) => FileKind::Media,
            _ => FileKind::Other,
        }
    }
}

fn normalize_extensions(exts: Vec<String>) -> Vec<String> {
    exts.into_iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTICAL: &str = "EN-07FR_VERTICAL_ KPOP DEMON _CNNA-ST1-20000000000900ca_801_0.mp4";

    fn pattern() -> IdentityPattern {
        IdentityPattern::new("CNNA-ST1-").unwrap()
    }

    #[test]
    fn test_agency_filename() {
        let p = pattern();
        assert_eq!(
            p.extract_identity(VERTICAL).as_deref(),
            Some("CNNA-ST1-20000000000900CA")
        );
        assert_eq!(p.extract_label(VERTICAL).as_deref(), Some("KPOP DEMON"));
        assert_eq!(extract_version(VERTICAL), Some(0));
    }

    #[test]
    fn test_identity_is_case_insensitive() {
        let p = pattern();
        assert_eq!(
            p.extract_identity("story_cnna-st1-abcdef0123456789.xml")
                .as_deref(),
            Some("CNNA-ST1-ABCDEF0123456789")
        );
    }

    #[test]
    fn test_identity_requires_exact_length() {
        let p = pattern();
        // 15 hex digits
        assert!(p.extract_identity("CNNA-ST1-abcdef012345678.xml").is_none());
        // 17 hex digits
        assert!(p.extract_identity("CNNA-ST1-abcdef01234567890.xml").is_none());
        assert!(p.extract_identity("no_token_here_3.mp4").is_none());
    }

    #[test]
    fn test_label_absent_without_preceding_segment() {
        let p = pattern();
        assert!(p.extract_label("CNNA-ST1-1000000000000001_2.mp4").is_none());
        assert!(p.extract_label("_ _CNNA-ST1-1000000000000001.mp4").is_none());
    }

    #[test]
    fn test_version_defaults() {
        assert_eq!(extract_version("A_LABEL_CNNA-ST1-1000000000000001_12.xml"), Some(12));
        assert_eq!(extract_version("A_LABEL_CNNA-ST1-1000000000000001.xml"), None);
        assert_eq!(file_version("A_LABEL_CNNA-ST1-1000000000000001.xml"), 0);
    }

    #[test]
    fn test_classifier_kinds() {
        let c = Classifier::new(
            "CNNA-ST1-",
            vec!["xml".to_string()],
            vec![".MP4".to_string(), "mxf".to_string()],
        )
        .unwrap();
        assert_eq!(c.kind("feeds/a.XML"), FileKind::Document);
        assert_eq!(c.kind("feeds/a.mp4"), FileKind::Media);
        assert_eq!(c.kind("feeds/a.mxf"), FileKind::Media);
        assert_eq!(c.kind("feeds/a.jpg"), FileKind::Other);
        assert_eq!(c.kind("feeds/noext"), FileKind::Other);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(file_name("a/b/c.mp4"), "c.mp4");
        assert_eq!(parent_dir("a/b/c.mp4"), "a/b");
        assert_eq!(parent_dir("c.mp4"), "");
    }
}
