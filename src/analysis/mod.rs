//! External analysis service boundary
//!
//! This module provides:
//! - A trait for analysis backends
//! - An HTTP backend for generateContent-style APIs
//! - A client that paces calls and unwraps JSON out of the replies
//! - Typed payloads for document metadata and video analysis

mod http_backend;
pub mod prompts;
pub mod rate_limit;
pub mod redact;
pub mod response;

pub use http_backend::*;
pub use prompts::{prompt_set, PromptSet};
pub use rate_limit::{PostCallDelay, RequestCeiling};

use crate::config::{AnalysisConfig, Config};
use crate::error::{Error, Result};
use crate::meta::{timestamp, AnalysisResult, MetadataUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Payload sent along with the prompt
#[derive(Debug, Clone)]
pub enum AnalysisInput {
    Text(String),
    Media { bytes: Vec<u8>, mime: String },
    TextAndMedia {
        text: String,
        bytes: Vec<u8>,
        mime: String,
    },
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub input: AnalysisInput,
}

impl AnalysisRequest {
    pub fn text(prompt: &str, text: String) -> Self {
        Self {
            prompt: prompt.to_string(),
            input: AnalysisInput::Text(text),
        }
    }

    pub fn media(prompt: &str, bytes: Vec<u8>, mime: String) -> Self {
        Self {
            prompt: prompt.to_string(),
            input: AnalysisInput::Media { bytes, mime },
        }
    }

    pub fn text_and_media(prompt: &str, text: String, bytes: Vec<u8>, mime: String) -> Self {
        Self {
            prompt: prompt.to_string(),
            input: AnalysisInput::TextAndMedia { text, bytes, mime },
        }
    }
}

/// Trait for analysis providers
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Send one request and return the raw reply text
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// MIME type for a media path, by extension
pub fn media_mime(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Paced, bounded access to an [`Analyzer`]
///
/// Every call waits for the optional request ceiling, runs under a hard
/// wall-clock timeout, and is followed by the fixed post-call delay whether
/// it succeeded or not.
pub struct AnalysisClient {
    analyzer: Box<dyn Analyzer>,
    ceiling: Option<RequestCeiling>,
    delay: PostCallDelay,
    timeout: Duration,
}

impl AnalysisClient {
    pub fn new(analyzer: Box<dyn Analyzer>, config: &AnalysisConfig) -> Self {
        Self {
            analyzer,
            ceiling: config.requests_per_minute.map(RequestCeiling::per_minute),
            delay: PostCallDelay::new(config.post_call_delay()),
            timeout: config.timeout(),
        }
    }

    /// Build a client for the configured HTTP service
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.analysis_api_key().ok_or_else(|| {
            Error::Config(format!(
                "Analysis API key not set; export {}",
                config.analysis.api_key_env
            ))
        })?;
        let analyzer = HttpAnalyzer::new(&config.analysis, api_key)?;
        Ok(Self::new(Box::new(analyzer), &config.analysis))
    }

    pub fn model_name(&self) -> &str {
        self.analyzer.model_name()
    }

    /// One paced call, returning the unwrapped JSON value
    pub async fn call(&self, request: &AnalysisRequest) -> Result<Value> {
        if let Some(ceiling) = &self.ceiling {
            ceiling.wait().await;
        }

        let outcome = match tokio::time::timeout(self.timeout, self.analyzer.analyze(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Analysis(format!(
                "analysis call timed out after {}s",
                self.timeout.as_secs()
            ))),
        };

        self.delay.wait().await;

        let raw = outcome?;
        debug!(model = %self.model_name(), bytes = raw.len(), "Analysis reply received");
        response::parse_json(&raw)
    }

    /// Companion document text to metadata
    pub async fn analyze_document(
        &self,
        prompts: &PromptSet,
        document_text: String,
    ) -> Result<DocumentMetadata> {
        let request = AnalysisRequest::text(prompts.document, document_text);
        DocumentMetadata::from_value(self.call(&request).await?)
    }

    /// Media to summary, transcript and tags
    pub async fn analyze_video(
        &self,
        prompts: &PromptSet,
        bytes: Vec<u8>,
        mime: String,
    ) -> Result<VideoAnalysis> {
        let request = AnalysisRequest::media(prompts.video, bytes, mime);
        VideoAnalysis::from_value(self.call(&request).await?)
    }

    /// Document and media in one call
    pub async fn analyze_full(
        &self,
        prompts: &PromptSet,
        document_text: String,
        bytes: Vec<u8>,
        mime: String,
    ) -> Result<FullAnalysis> {
        let request = AnalysisRequest::text_and_media(prompts.full, document_text, bytes, mime);
        FullAnalysis::from_value(self.call(&request).await?)
    }
}

/// Metadata extracted from a companion document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub published_at: Option<String>,
    pub duration_seconds: Option<i64>,
    /// Media file the document names, if any
    pub media_reference: Option<String>,
    /// Everything else the service returned
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    /// Validate a reply; a reply with no usable field is an error
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(Error::Analysis(
                "document analysis is not a JSON object".to_string(),
            ));
        };
        let metadata = Self::from_map(&mut map);
        if metadata.is_empty() {
            return Err(Error::Analysis("document analysis is empty".to_string()));
        }
        Ok(metadata)
    }

    fn from_map(map: &mut Map<String, Value>) -> Self {
        let title = map.remove("title").and_then(non_empty_string);
        let published_at = map.remove("published_at").and_then(non_empty_string);
        let duration_seconds = map.remove("duration_seconds").and_then(lenient_integer);
        let media_reference = map.remove("media_reference").and_then(non_empty_string);
        map.retain(|_, v| !v.is_null());
        Self {
            title,
            published_at,
            duration_seconds,
            media_reference,
            extra: std::mem::take(map),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.published_at.is_none()
            && self.duration_seconds.is_none()
            && self.media_reference.is_none()
            && self.extra.is_empty()
    }

    /// Fill fields the service left out from another source
    pub fn or(mut self, fallback: &DocumentMetadata) -> Self {
        if self.title.is_none() {
            self.title = fallback.title.clone();
        }
        if self.published_at.is_none() {
            self.published_at = fallback.published_at.clone();
        }
        if self.duration_seconds.is_none() {
            self.duration_seconds = fallback.duration_seconds;
        }
        if self.media_reference.is_none() {
            self.media_reference = fallback.media_reference.clone();
        }
        self
    }

    pub fn to_update(&self) -> MetadataUpdate {
        MetadataUpdate {
            title: self.title.clone(),
            published_at: self.published_at.clone(),
            duration_seconds: self.duration_seconds,
            source_metadata_json: serde_json::to_string(self).ok(),
        }
    }
}

/// Editorial analysis of a media file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysis {
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub translation: Option<String>,
    /// 1 (routine) to 5 (major)
    pub importance: Option<i64>,
    pub topics: Vec<String>,
    pub keywords: Vec<String>,
    pub bites: Vec<String>,
}

impl VideoAnalysis {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::Analysis(
                "video analysis is not a JSON object".to_string(),
            ));
        };

        let importance = match map.get("importance").cloned().and_then(lenient_integer) {
            Some(i) if (1..=5).contains(&i) => Some(i),
            Some(i) => {
                warn!(importance = i, "Importance outside 1-5; dropped");
                None
            }
            None => None,
        };

        let analysis = Self {
            summary: map.get("summary").cloned().and_then(non_empty_string),
            transcript: map.get("transcript").cloned().and_then(non_empty_string),
            translation: map.get("translation").cloned().and_then(non_empty_string),
            importance,
            topics: string_list(map.get("topics")),
            keywords: string_list(map.get("keywords")),
            bites: string_list(map.get("bites")),
        };

        if analysis.summary.is_none()
            && analysis.transcript.is_none()
            && analysis.topics.is_empty()
            && analysis.keywords.is_empty()
        {
            return Err(Error::Analysis("video analysis is empty".to_string()));
        }
        Ok(analysis)
    }

    /// Persistable row for this analysis
    pub fn into_result(
        self,
        resource_id: &str,
        prompt_version: &str,
        model: &str,
        at: DateTime<Utc>,
    ) -> AnalysisResult {
        let mut result = AnalysisResult::new(resource_id, at);
        result.summary = self.summary;
        result.transcript = self.transcript;
        result.translation = self.translation;
        result.importance = self.importance;
        result.topics_json = serde_json::to_string(&self.topics).ok();
        result.keywords_json = serde_json::to_string(&self.keywords).ok();
        result.bites_json = serde_json::to_string(&self.bites).ok();
        result.prompt_version = Some(prompt_version.to_string());
        result.model = Some(model.to_string());
        result.updated_at = timestamp(at);
        result
    }
}

/// Combined reply of a full-mode call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullAnalysis {
    pub metadata: DocumentMetadata,
    pub analysis: VideoAnalysis,
}

impl FullAnalysis {
    /// Metadata may be sparse; the analysis half must be usable
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(Error::Analysis(
                "full analysis is not a JSON object".to_string(),
            ));
        };

        let metadata = match map.remove("metadata") {
            Some(Value::Object(mut m)) => DocumentMetadata::from_map(&mut m),
            _ => DocumentMetadata::default(),
        };
        let analysis = match map.remove("analysis") {
            Some(value) => VideoAnalysis::from_value(value)?,
            // flat replies carry the analysis keys at the top level
            None => VideoAnalysis::from_value(Value::Object(map))?,
        };

        Ok(Self { metadata, analysis })
    }
}

fn non_empty_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_integer(value: Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| non_empty_string(v.clone()))
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Analyzer that replays canned replies and records every request
    pub(crate) struct ScriptedAnalyzer {
        replies: Mutex<VecDeque<Result<String>>>,
        pub(crate) requests: std::sync::Arc<Mutex<Vec<AnalysisRequest>>>,
    }

    impl ScriptedAnalyzer {
        pub(crate) fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Default::default(),
            }
        }
    }

    #[async_trait]
    impl Analyzer for ScriptedAnalyzer {
        async fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Analysis("no scripted reply".to_string())))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn fast_config() -> AnalysisConfig {
        AnalysisConfig {
            post_call_delay_ms: 0,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn test_document_metadata_lenient_fields() {
        let value = json!({
            "title": "  Storm hits coast ",
            "published_at": "2026-10-01T08:00:00Z",
            "duration_seconds": "95.4",
            "media_reference": "",
            "desk": "international",
            "unused": null
        });
        let metadata = DocumentMetadata::from_value(value).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Storm hits coast"));
        assert_eq!(metadata.duration_seconds, Some(95));
        assert!(metadata.media_reference.is_none());
        assert_eq!(metadata.extra.len(), 1);
        assert_eq!(metadata.extra["desk"], "international");
    }

    #[test]
    fn test_empty_document_metadata_is_error() {
        assert!(DocumentMetadata::from_value(json!({})).is_err());
        assert!(DocumentMetadata::from_value(json!({"title": null})).is_err());
        assert!(DocumentMetadata::from_value(json!(["x"])).is_err());
    }

    #[test]
    fn test_video_analysis_validation() {
        let value = json!({
            "summary": "Protesters gather in the capital.",
            "importance": 9,
            "topics": ["politics", "", 3],
            "keywords": "protest, capital"
        });
        let analysis = VideoAnalysis::from_value(value).unwrap();
        assert_eq!(analysis.importance, None);
        assert_eq!(analysis.topics, vec!["politics", "3"]);
        assert_eq!(analysis.keywords, vec!["protest", "capital"]);

        assert!(VideoAnalysis::from_value(json!({"importance": 3})).is_err());
    }

    #[test]
    fn test_full_analysis_shapes() {
        let nested = json!({
            "metadata": {"title": "Election night"},
            "analysis": {"summary": "Results come in.", "importance": 5}
        });
        let full = FullAnalysis::from_value(nested).unwrap();
        assert_eq!(full.metadata.title.as_deref(), Some("Election night"));
        assert_eq!(full.analysis.importance, Some(5));

        let flat = json!({"summary": "Results come in."});
        let full = FullAnalysis::from_value(flat).unwrap();
        assert!(full.metadata.is_empty());

        assert!(FullAnalysis::from_value(json!({"metadata": {"title": "x"}, "analysis": {}})).is_err());
    }

    #[test]
    fn test_into_result_encodes_lists() {
        let analysis = VideoAnalysis {
            summary: Some("s".to_string()),
            topics: vec!["a".to_string()],
            ..Default::default()
        };
        let result = analysis.into_result("r1", "v2", "gemini", Utc::now());
        assert_eq!(result.topics(), vec!["a"]);
        assert_eq!(result.prompt_version.as_deref(), Some("v2"));
        assert!(result.error_message.is_none());
    }

    #[test]
    fn test_media_mime() {
        assert_eq!(media_mime("a/b.mp4"), "video/mp4");
        assert_eq!(media_mime("a/b.unknownext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_client_unwraps_and_records() {
        let analyzer = ScriptedAnalyzer::new(vec![Ok(
            "```json\n{\"title\": \"Flood\"}\n```".to_string()
        )]);
        let requests = analyzer.requests.clone();
        let client = AnalysisClient::new(Box::new(analyzer), &fast_config());
        let prompts = prompt_set("v2").unwrap();

        let metadata = client
            .analyze_document(prompts, "<doc/>".to_string())
            .await
            .unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Flood"));

        let seen = requests.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0].input, AnalysisInput::Text(t) if t == "<doc/>"));
    }

    #[tokio::test]
    async fn test_client_delay_applies_after_failure() {
        let analyzer = ScriptedAnalyzer::new(vec![Err(Error::Api {
            status: 429,
            message: "quota".to_string(),
        })]);
        let config = AnalysisConfig {
            post_call_delay_ms: 40,
            ..AnalysisConfig::default()
        };
        let client = AnalysisClient::new(Box::new(analyzer), &config);

        let start = std::time::Instant::now();
        let err = client
            .call(&AnalysisRequest::text("p", "t".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_systemic());
        assert!(start.elapsed() >= Duration::from_millis(35));
    }
}
