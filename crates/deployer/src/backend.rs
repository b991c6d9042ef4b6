//! Generative backend: an opaque text-completion service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config::GeminiEndpoint;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend returned no text")]
    EmptyResponse,

    #[error("API key is not a valid header value")]
    InvalidApiKey,
}

/// Anything that turns a prompt into text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Gemini `generateContent` over REST.
pub struct GeminiBackend {
    endpoint: GeminiEndpoint,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(endpoint: GeminiEndpoint, timeout: Duration) -> Result<Self, BackendError> {
        let mut key = HeaderValue::from_str(&endpoint.api_key)
            .map_err(|_| BackendError::InvalidApiKey)?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { endpoint, client })
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let request_body = serde_json::json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }]
        });

        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.url, self.endpoint.model
        );

        info!(
            model = %self.endpoint.model,
            prompt_chars = prompt.len(),
            "Calling generative backend"
        );
        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status,
                body: body.chars().take(200).collect(),
            });
        }

        let resp_json: Value = response.json().await?;
        let text = resp_json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(text)
    }
}
