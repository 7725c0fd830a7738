//! Remote scoring capability: the single point of entry for calls to the
//! external scorer.
//!
//! No other module talks to the remote service directly. The client makes
//! exactly one attempt per call: timeouts, retries and backoff belong to the
//! orchestrator and circuit breaker.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::analysis::{AnalysisDepth, AnalysisRequest};

/// Longest error body kept in an `Api` error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl CapabilityError {
    /// Transport failures, 429 and 5xx are worth retrying; other statuses and
    /// unparseable bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CapabilityError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CapabilityError::Api { status, .. } => *status == 429 || *status >= 500,
            CapabilityError::Parse(_) => false,
        }
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, CapabilityError>> + Send>>;

/// Body sent to the remote capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityRequest {
    pub document: String,
    pub role_description: String,
    pub caller_id: String,
    pub analysis_depth: AnalysisDepth,
    /// Only set on streaming calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
}

impl CapabilityRequest {
    pub fn single_shot(request: &AnalysisRequest) -> Self {
        Self {
            document: request.document.clone(),
            role_description: request.role_description.clone(),
            caller_id: request.caller_id.clone(),
            analysis_depth: request.options.analysis_depth,
            analysis_type: None,
        }
    }

    pub fn streaming(request: &AnalysisRequest) -> Self {
        Self {
            analysis_type: Some(request.options.analysis_depth.as_str().to_string()),
            ..Self::single_shot(request)
        }
    }
}

/// The remote scorer. Carried by the orchestrator as `Arc<dyn ScoringCapability>`.
#[async_trait]
pub trait ScoringCapability: Send + Sync {
    /// Single-shot call returning the raw, unvalidated result payload.
    async fn analyze(&self, request: &CapabilityRequest) -> Result<serde_json::Value, CapabilityError>;

    /// Opens the event stream. Dropping the returned stream releases the
    /// connection.
    async fn analyze_stream(&self, request: &CapabilityRequest) -> Result<ByteStream, CapabilityError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Message { message: String },
    Text(String),
}

impl ErrorDetail {
    fn into_message(self) -> String {
        match self {
            ErrorDetail::Message { message } => message,
            ErrorDetail::Text(text) => text,
        }
    }
}

#[derive(Clone)]
pub struct HttpCapability {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCapability {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, CapabilityError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header(header::CONTENT_TYPE, "application/json");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn check_status(response: Response) -> Result<Response, CapabilityError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error.into_message())
            .unwrap_or_else(|_| body.chars().take(MAX_ERROR_BODY).collect());
        warn!("Scoring capability returned {}: {}", status, message);
        Err(CapabilityError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ScoringCapability for HttpCapability {
    async fn analyze(&self, request: &CapabilityRequest) -> Result<serde_json::Value, CapabilityError> {
        let response = self.post("/v1/analyze").json(request).send().await?;
        let response = Self::check_status(response).await?;
        let body = response.bytes().await?;
        let value = serde_json::from_slice(&body)?;
        debug!("Scoring capability answered for caller '{}'", request.caller_id);
        Ok(value)
    }

    async fn analyze_stream(&self, request: &CapabilityRequest) -> Result<ByteStream, CapabilityError> {
        let response = self
            .post("/v1/analyze/stream")
            .header(header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        debug!("Scoring capability stream opened for caller '{}'", request.caller_id);
        Ok(response.bytes_stream().map_err(CapabilityError::Http).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::AnalysisOptions;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            document: "resume".to_string(),
            role_description: "role".to_string(),
            caller_id: "u1".to_string(),
            options: AnalysisOptions {
                analysis_depth: AnalysisDepth::Quick,
                ..AnalysisOptions::default()
            },
        }
    }

    #[test]
    fn test_single_shot_body_omits_analysis_type() {
        let body = serde_json::to_value(CapabilityRequest::single_shot(&request())).unwrap();
        assert_eq!(body["analysis_depth"], "quick");
        assert!(body.get("analysis_type").is_none());
    }

    #[test]
    fn test_streaming_body_names_analysis_type() {
        let body = serde_json::to_value(CapabilityRequest::streaming(&request())).unwrap();
        assert_eq!(body["analysis_type"], "quick");
        assert_eq!(body["caller_id"], "u1");
    }

    #[test]
    fn test_retryable_statuses() {
        let api = |status| CapabilityError::Api {
            status,
            message: String::new(),
        };
        assert!(api(429).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(422).is_retryable());
    }

    #[test]
    fn test_error_body_shapes() {
        let nested: ErrorBody = serde_json::from_str(r#"{"error":{"message":"bad input"}}"#).unwrap();
        assert_eq!(nested.error.into_message(), "bad input");
        let flat: ErrorBody = serde_json::from_str(r#"{"error":"overloaded"}"#).unwrap();
        assert_eq!(flat.error.into_message(), "overloaded");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let cap = HttpCapability::new("http://scorer.local/", None).unwrap();
        assert_eq!(cap.base_url, "http://scorer.local");
    }
}
