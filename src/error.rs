//! Error types for mail-extract.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No extraction tiers configured")]
    NoTiers,
}

/// Business-rule violations raised by the validator.
///
/// `MalformedOutput` is structural (the text never decoded); everything else
/// means the model produced well-formed JSON that breaks the schema contract.
/// The orchestrator treats the two classes differently: structural failures
/// get a repair retry on the same tier, rule violations escalate to the next.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Model output not decodable: {0}")]
    MalformedOutput(String),

    #[error("Extraction contained no messages")]
    EmptyResult,

    #[error("No message carries a timestamp; at least one must be anchored to the reference time")]
    MissingTimestamp,

    #[error("forwarded flag and forwarded_by value disagree")]
    ForwardingConsistency,

    #[error("Every extracted message is a placeholder")]
    AllPlaceholder,
}

impl ValidationError {
    /// Structural decode failure, as opposed to a business-rule violation.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ValidationError::MalformedOutput(_))
    }
}

/// Model backend errors. All transport-level failure modes end up here;
/// the orchestrator only needs to know the tier was unavailable.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Tier {tier} request failed: {reason}")]
    RequestFailed { tier: String, reason: String },

    #[error("Tier {tier} rate limited by provider")]
    RateLimited { tier: String },

    #[error("Tier {tier} timed out after {timeout:?}")]
    Timeout { tier: String, timeout: Duration },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
