use super::redact::redact_secrets;
use super::{AnalysisInput, AnalysisRequest, Analyzer};
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Slack on top of the client-side deadline so the caller's timeout fires first
const TRANSPORT_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

/// Analyzer speaking a generateContent-style JSON API
pub struct HttpAnalyzer {
    client: Client,
    base_url: Url,
    model: String,
    api_key: String,
}

impl HttpAnalyzer {
    pub fn new(config: &AnalysisConfig, api_key: String) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(config.timeout() + TRANSPORT_GRACE)
            .build()?;
        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> Result<Url> {
        self.base_url
            .join(&format!("/v1beta/models/{}:generateContent", self.model))
            .map_err(|e| Error::Config(format!("Invalid analysis service URL: {}", e)))
    }

    fn body(request: &AnalysisRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        match &request.input {
            AnalysisInput::Text(text) => parts.push(json!({ "text": text })),
            AnalysisInput::Media { bytes, mime } => parts.push(inline_data(bytes, mime)),
            AnalysisInput::TextAndMedia { text, bytes, mime } => {
                parts.push(json!({ "text": text }));
                parts.push(inline_data(bytes, mime));
            }
        }
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseMimeType": "application/json" }
        })
    }

    fn redact(&self, message: &str) -> String {
        redact_secrets(message, &[self.api_key.as_str()])
    }
}

fn inline_data(bytes: &[u8], mime: &str) -> Value {
    json!({
        "inline_data": {
            "mime_type": mime,
            "data": STANDARD.encode(bytes),
        }
    })
}

fn is_api_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 401 | 403 | 429) || status.is_server_error()
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        let url = self.endpoint()?;
        debug!(model = %self.model, "Calling analysis service");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(request))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = self.redact(&format!("HTTP {}: {}", status.as_u16(), text.trim()));
            if is_api_status(status) {
                return Err(Error::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(Error::Analysis(message));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Analysis(format!("Unreadable service reply: {}", e)))?;

        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(Error::Analysis(format!("Request blocked: {}", reason)));
        }

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            return Err(Error::Analysis("empty response".to_string()));
        };

        let reply: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if reply.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "none".to_string());
            return Err(Error::Analysis(format!(
                "empty response (finish reason: {})",
                reason
            )));
        }

        Ok(reply)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "test-key-0123456789";

    fn analyzer(server: &MockServer) -> HttpAnalyzer {
        let config = AnalysisConfig {
            base_url: server.uri(),
            model: "test-model".to_string(),
            ..AnalysisConfig::default()
        };
        HttpAnalyzer::new(&config, KEY.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_text_request_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .and(header("x-goog-api-key", KEY))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "{\"title\":"}, {"text": " \"Flood\"}"}]},
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let reply = analyzer(&server)
            .analyze(&AnalysisRequest::text("prompt", "<doc/>".to_string()))
            .await
            .unwrap();
        assert_eq!(reply, "{\"title\": \"Flood\"}");

        let received = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["contents"][0]["parts"][1]["text"], "<doc/>");
    }

    #[tokio::test]
    async fn test_media_is_inlined_as_base64() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "{}"}]}}]
            })))
            .mount(&server)
            .await;

        analyzer(&server)
            .analyze(&AnalysisRequest::media(
                "prompt",
                b"abc".to_vec(),
                "video/mp4".to_string(),
            ))
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        let inline = &body["contents"][0]["parts"][1]["inline_data"];
        assert_eq!(inline["mime_type"], "video/mp4");
        assert_eq!(inline["data"], "YWJj");
    }

    #[tokio::test]
    async fn test_quota_error_is_systemic_and_redacted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string(format!("Quota exceeded for key {}", KEY)),
            )
            .mount(&server)
            .await;

        let err = analyzer(&server)
            .analyze(&AnalysisRequest::text("p", "t".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_systemic());
        let message = err.to_string();
        assert!(message.contains("429"));
        assert!(message.contains("Quota exceeded"));
        assert!(!message.contains(KEY));
    }

    #[tokio::test]
    async fn test_bad_request_is_not_systemic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("file too short"))
            .mount(&server)
            .await;

        let err = analyzer(&server)
            .analyze(&AnalysisRequest::text("p", "t".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Analysis(_)));
        assert!(!err.is_systemic());
    }

    #[tokio::test]
    async fn test_empty_candidates_are_data_level() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
            })))
            .mount(&server)
            .await;

        let err = analyzer(&server)
            .analyze(&AnalysisRequest::text("p", "t".to_string()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
        assert!(matches!(err, Error::Analysis(_)));
        assert!(!err.is_systemic());
    }
}
