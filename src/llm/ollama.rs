//! Ollama-compatible model invoker.
//!
//! Speaks the non-streaming `/api/generate` API. Per-tier sampling options
//! come from [`TierConfig`]; transient provider failures (429/5xx, transport
//! errors) are retried a bounded number of times with linear backoff before
//! being surfaced as [`LlmError`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TierConfig;
use crate::error::LlmError;
use crate::llm::LlmProvider;

/// Base delay between transport retries; grows linearly per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// One model tier behind an Ollama-compatible HTTP endpoint.
pub struct OllamaProvider {
    client: reqwest::Client,
    name: String,
    endpoint: String,
    model: String,
    options: SamplingOptions,
    max_retries: u32,
}

#[derive(Debug, Clone, Serialize)]
struct SamplingOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a SamplingOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(tier: &TierConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: tier.name.clone(),
            endpoint: tier.endpoint.trim_end_matches('/').to_string(),
            model: tier.model.clone(),
            options: SamplingOptions {
                temperature: tier.temperature,
                top_p: tier.top_p,
                top_k: tier.top_k,
            },
            max_retries: tier.max_retries,
        }
    }

    fn request_failed(&self, reason: impl std::fmt::Display) -> LlmError {
        LlmError::RequestFailed {
            tier: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// One request/response round trip, no retries.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: &self.options,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited {
                tier: self.name.clone(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.request_failed(format!("http status {status}: {detail}")));
        }

        let decoded: GenerateResponse = response
            .json()
            .await
            .map_err(|e| self.request_failed(format!("response decode failed: {e}")))?;
        Ok(decoded.response)
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::RateLimited { .. } | LlmError::RequestFailed { .. }
        )
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    fn tier_name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.generate(prompt).await {
                Ok(text) => {
                    debug!(
                        tier = %self.name,
                        attempt,
                        chars = text.len(),
                        "Model invocation succeeded"
                    );
                    return Ok(text);
                }
                Err(e) if attempt <= self.max_retries && Self::is_retryable(&e) => {
                    warn!(
                        tier = %self.name,
                        attempt,
                        error = %e,
                        "Model invocation failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
