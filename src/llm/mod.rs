//! Model backend integration.
//!
//! The orchestrator only needs one capability from a tier: send a prompt,
//! get raw text back. Everything provider-specific (transport, sampling
//! parameters, rate-limit retries) lives behind [`LlmProvider`]; no
//! business-schema awareness is allowed on this side of the seam.

mod ollama;

pub use ollama::OllamaProvider;

use crate::error::LlmError;

/// Capability interface for one configured model tier.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Tier label for logs and errors.
    fn tier_name(&self) -> &str;

    /// Send a prompt, return the model's raw text output.
    async fn invoke(&self, prompt: &str) -> Result<String, LlmError>;
}
