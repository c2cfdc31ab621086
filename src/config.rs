//! Configuration types.
//!
//! Everything is an explicit struct handed to the extractor's constructor —
//! no ambient globals. `main` populates it from environment variables.

use std::time::Duration;

use crate::error::ConfigError;

/// Extraction service configuration.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Maximum number of extractions in flight at once.
    pub max_concurrent: usize,
    /// Ordered fallback chain. The first tier is tried first; later tiers
    /// are escalation steps with more permissive sampling.
    pub tiers: Vec<TierConfig>,
}

/// One model tier in the fallback chain.
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Tier label used in logs and errors.
    pub name: String,
    /// Base URL of the model-serving endpoint.
    pub endpoint: String,
    /// Model identifier at that endpoint.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
    /// Top-k sampling cutoff.
    pub top_k: u32,
    /// Invocations of this tier per extraction (structural-repair budget).
    pub max_attempts: u32,
    /// Timeout per invocation.
    pub timeout: Duration,
    /// Transport-level retries inside the invoker (429/5xx).
    pub max_retries: u32,
}

impl ExtractorConfig {
    /// Load from environment variables, falling back to [`Default`].
    ///
    /// - `MAIL_EXTRACT_ENDPOINT` — model endpoint base URL
    /// - `MAIL_EXTRACT_MODEL` — model identifier
    /// - `MAIL_EXTRACT_CAPACITY` — concurrent extraction limit
    /// - `MAIL_EXTRACT_TIMEOUT_SECS` — per-invocation timeout
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("MAIL_EXTRACT_ENDPOINT") {
            for tier in &mut config.tiers {
                tier.endpoint = endpoint.clone();
            }
        }
        if let Ok(model) = std::env::var("MAIL_EXTRACT_MODEL") {
            for tier in &mut config.tiers {
                tier.model = model.clone();
            }
        }
        if let Ok(raw) = std::env::var("MAIL_EXTRACT_CAPACITY") {
            config.max_concurrent = parse_env("MAIL_EXTRACT_CAPACITY", &raw)?;
        }
        if let Ok(raw) = std::env::var("MAIL_EXTRACT_TIMEOUT_SECS") {
            let secs: u64 = parse_env("MAIL_EXTRACT_TIMEOUT_SECS", &raw)?;
            for tier in &mut config.tiers {
                tier.timeout = Duration::from_secs(secs);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_EXTRACT_CAPACITY".to_string(),
                message: "capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Upper bound on how long one extraction can take before the degraded
    /// result is returned: `Σ tier.timeout × tier.max_attempts`.
    pub fn worst_case_latency(&self) -> Duration {
        self.tiers
            .iter()
            .map(|t| t.timeout * t.max_attempts)
            .sum()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let endpoint = "http://localhost:11434".to_string();
        let model = "llama3.1:8b".to_string();
        Self {
            max_concurrent: 5,
            tiers: vec![
                // Precise tier: low-diversity sampling for a faithful copy.
                TierConfig {
                    name: "precise".to_string(),
                    endpoint: endpoint.clone(),
                    model: model.clone(),
                    temperature: 0.1,
                    top_p: 0.15,
                    top_k: 10,
                    max_attempts: 2,
                    timeout: Duration::from_secs(120),
                    max_retries: 2,
                },
                // Repair tier: more permissive sampling to escape the
                // failure mode the precise tier got stuck in.
                TierConfig {
                    name: "repair".to_string(),
                    endpoint,
                    model,
                    temperature: 0.5,
                    top_p: 0.5,
                    top_k: 25,
                    max_attempts: 2,
                    timeout: Duration::from_secs(120),
                    max_retries: 2,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ExtractorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.tiers[0].name, "precise");
        assert_eq!(config.tiers[1].name, "repair");
        assert!(config.tiers[0].temperature < config.tiers[1].temperature);
    }

    #[test]
    fn worst_case_latency_sums_tier_budgets() {
        let config = ExtractorConfig::default();
        // 2 tiers × 2 attempts × 120s
        assert_eq!(config.worst_case_latency(), Duration::from_secs(480));
    }

    #[test]
    fn empty_tier_list_rejected() {
        let config = ExtractorConfig {
            max_concurrent: 5,
            tiers: vec![],
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoTiers)));
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = ExtractorConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
