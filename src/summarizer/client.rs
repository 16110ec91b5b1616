//! Remote summarization service.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::AiConfig;
use crate::error::RemoteError;
use crate::models::{ApiErrorBody, ChatRequest, ChatResponse};
use crate::retry::mentions_quota;
use crate::summarizer::SummaryRequest;

/// Longest raw body excerpt kept in an error message.
const MAX_BODY_EXCERPT: usize = 200;

// == Summary Service ==
/// Anything that can turn a [`SummaryRequest`] into summary text.
///
/// One call is one attempt; retrying is the caller's job.
#[async_trait]
pub trait SummaryService: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, RemoteError>;
}

// == OpenAI Client ==
/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiClient {
    /// Creates a client using the key, base URL and request timeout of `config`.
    pub fn new(config: &AiConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Unexpected(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SummaryService for OpenAiClient {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, RemoteError> {
        let body = ChatRequest::from(request);
        debug!("POST {} (model {})", self.endpoint, body.model);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(map_error_status(status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| RemoteError::InvalidResponse(format!("malformed completion: {}", e)))?;

        parsed
            .first_content()
            .map(|content| content.trim().to_string())
            .ok_or_else(|| RemoteError::InvalidResponse("completion has no content".to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Network(format!("request timed out: {}", err))
    } else if err.is_decode() {
        RemoteError::InvalidResponse(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

// == Status Mapping ==
/// Maps a non-success status and its body onto a [`RemoteError`].
pub fn map_error_status(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.describe())
        .unwrap_or_default();
    let message = if !message.is_empty() {
        message
    } else if !body.trim().is_empty() {
        body.trim().chars().take(MAX_BODY_EXCERPT).collect()
    } else {
        format!("HTTP {}", status.as_u16())
    };

    match status {
        _ if mentions_quota(&message) => RemoteError::QuotaExceeded(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Authentication(message),
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
