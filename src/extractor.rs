//! Fallback orchestrator and admission gate — the heart of the service.
//!
//! `extract()` never fails. It converts probabilistic model failure into a
//! bounded walk over configured tiers:
//!
//! 1. Acquire an admission slot (bounds concurrent extractions)
//! 2. Assemble the prompt once
//! 3. For each tier, up to its attempt budget: invoke under the tier's
//!    timeout, validate the output
//! 4. First validator acceptance wins; malformed output retries the same
//!    tier, anything else escalates to the next
//! 5. Exhaustion resolves to the degraded sentinel result — the caller (a
//!    mail pipeline) must never stall on one bad conversation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExtractorConfig;
use crate::llm::{LlmProvider, OllamaProvider};
use crate::prompt;
use crate::schema::{ConversationRequest, ExtractionResult};
use crate::validate::validate;

// ── Admission gate ──────────────────────────────────────────────────

/// Counting gate bounding concurrent extractions.
///
/// Slots are released through the permit's `Drop`, so every exit path —
/// success, degraded result, panic, caller cancellation — gives the slot
/// back.
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. The returned permit holds the slot until drop.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore lives as long as the gate and is never closed.
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("admission gate semaphore closed")
    }

    /// Number of extractions currently holding a slot. Non-blocking.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

/// One model tier with its orchestration budget.
pub struct Tier {
    pub provider: Arc<dyn LlmProvider>,
    /// Invocations of this tier per extraction before escalating.
    pub max_attempts: u32,
    /// Timeout per invocation.
    pub timeout: Duration,
}

/// Tiered extraction orchestrator.
pub struct MessageExtractor {
    tiers: Vec<Tier>,
    gate: AdmissionGate,
}

impl MessageExtractor {
    /// Build from explicit tiers — the constructor tests use to inject mocks.
    pub fn new(tiers: Vec<Tier>, max_concurrent: usize) -> Self {
        Self {
            tiers,
            gate: AdmissionGate::new(max_concurrent),
        }
    }

    /// Build the production chain of Ollama-backed tiers from configuration.
    pub fn from_config(config: &ExtractorConfig) -> Self {
        let tiers = config
            .tiers
            .iter()
            .map(|tier| Tier {
                provider: Arc::new(OllamaProvider::new(tier)) as Arc<dyn LlmProvider>,
                max_attempts: tier.max_attempts,
                timeout: tier.timeout,
            })
            .collect();
        Self::new(tiers, config.max_concurrent)
    }

    /// Utilization view for the health endpoint.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Extract structured messages from one conversation.
    ///
    /// Infallible by contract: when every tier fails, the degraded sentinel
    /// result carries the original conversation back to the caller. Worst
    /// case latency is `Σ tier.timeout × tier.max_attempts`.
    pub async fn extract(&self, request: &ConversationRequest) -> ExtractionResult {
        let _permit = self.gate.acquire().await;
        let request_id = Uuid::new_v4();
        let prompt = prompt::assemble(request);
        debug!(
            request_id = %request_id,
            prompt_chars = prompt.len(),
            reply_candidate = request.reply_candidate,
            forward_candidate = request.forward_candidate,
            "Starting extraction"
        );

        for tier in &self.tiers {
            let tier_name = tier.provider.tier_name();
            for attempt in 1..=tier.max_attempts {
                let raw = match timeout(tier.timeout, tier.provider.invoke(&prompt)).await {
                    Err(_) => {
                        warn!(
                            request_id = %request_id,
                            tier = %tier_name,
                            attempt,
                            timeout = ?tier.timeout,
                            "Tier timed out — escalating"
                        );
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(
                            request_id = %request_id,
                            tier = %tier_name,
                            attempt,
                            error = %e,
                            "Tier unavailable — escalating"
                        );
                        break;
                    }
                    Ok(Ok(raw)) => raw,
                };

                match validate(&raw, request.timestamp) {
                    Ok(result) => {
                        info!(
                            request_id = %request_id,
                            tier = %tier_name,
                            attempt,
                            messages = result.messages.len(),
                            forwarded = result.forwarded,
                            "Extraction accepted"
                        );
                        return result;
                    }
                    // Structural failure: the text never decoded. Worth a
                    // repair attempt on the same tier.
                    Err(e) if e.is_malformed() => {
                        warn!(
                            request_id = %request_id,
                            tier = %tier_name,
                            attempt,
                            error = %e,
                            "Malformed output — repair retry"
                        );
                    }
                    // Business-rule violation: the model misunderstood the
                    // conversation. Re-asking the same tier the same way
                    // won't fix that; escalate.
                    Err(e) => {
                        warn!(
                            request_id = %request_id,
                            tier = %tier_name,
                            attempt,
                            error = %e,
                            "Schema violation — escalating"
                        );
                        break;
                    }
                }
            }
        }

        warn!(
            request_id = %request_id,
            tiers = self.tiers.len(),
            "All tiers exhausted — returning degraded result"
        );
        ExtractionResult::degraded(&request.conversation, request.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{TimeZone, Utc};

    use crate::error::LlmError;
    use crate::schema::DEGRADED_AUTHOR;

    const GOOD_OUTPUT: &str = r#"{
        "messages": [{"author": "Ann", "content": "hi", "timestamp": "2024-01-01T10:00"}],
        "forwarded": false,
        "forwarded_by": null
    }"#;

    /// Valid JSON that breaks a business rule (no messages).
    const EMPTY_OUTPUT: &str = r#"{"messages": [], "forwarded": false}"#;

    fn request() -> ConversationRequest {
        ConversationRequest {
            conversation: "Hi,\noriginal conversation text".to_string(),
            author: Some("Pat".to_string()),
            subject: Some("Re: hello".to_string()),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            reply_candidate: true,
            forward_candidate: false,
        }
    }

    /// Mock provider that plays back scripted responses and counts calls.
    struct ScriptedLlm {
        name: &'static str,
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicU32,
    }

    impl ScriptedLlm {
        fn new(
            name: &'static str,
            responses: Vec<Result<String, LlmError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedLlm {
        fn tier_name(&self) -> &str {
            self.name
        }

        async fn invoke(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("responses mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    Err(LlmError::RequestFailed {
                        tier: self.name.to_string(),
                        reason: "script exhausted".to_string(),
                    })
                })
        }
    }

    fn tier(provider: Arc<dyn LlmProvider>, max_attempts: u32) -> Tier {
        Tier {
            provider,
            max_attempts,
            timeout: Duration::from_secs(5),
        }
    }

    fn unavailable(tier: &str) -> LlmError {
        LlmError::RequestFailed {
            tier: tier.to_string(),
            reason: "connection refused".to_string(),
        }
    }

    // ── Tier walk ───────────────────────────────────────────────────

    #[tokio::test]
    async fn first_tier_success_skips_later_tiers() {
        let primary = ScriptedLlm::new("precise", vec![Ok(GOOD_OUTPUT.to_string())]);
        let fallback = ScriptedLlm::new("repair", vec![Ok(GOOD_OUTPUT.to_string())]);
        let extractor = MessageExtractor::new(
            vec![tier(primary.clone(), 2), tier(fallback.clone(), 2)],
            5,
        );

        let result = extractor.extract(&request()).await;
        assert!(!result.is_degraded());
        assert_eq!(result.messages[0].author, "Ann");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_output_retried_within_tier() {
        let primary = ScriptedLlm::new(
            "precise",
            vec![
                Ok("total garbage, no json here".to_string()),
                Ok(GOOD_OUTPUT.to_string()),
            ],
        );
        let extractor = MessageExtractor::new(vec![tier(primary.clone(), 2)], 5);

        let result = extractor.extract(&request()).await;
        assert!(!result.is_degraded());
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn business_rule_violation_escalates_immediately() {
        // Primary has attempts left but returns a schema violation; the
        // orchestrator must not re-ask it.
        let primary = ScriptedLlm::new(
            "precise",
            vec![Ok(EMPTY_OUTPUT.to_string()), Ok(GOOD_OUTPUT.to_string())],
        );
        let fallback = ScriptedLlm::new("repair", vec![Ok(GOOD_OUTPUT.to_string())]);
        let extractor = MessageExtractor::new(
            vec![tier(primary.clone(), 3), tier(fallback.clone(), 3)],
            5,
        );

        let result = extractor.extract(&request()).await;
        assert!(!result.is_degraded());
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn transport_failure_escalates_immediately() {
        let primary = ScriptedLlm::new("precise", vec![Err(unavailable("precise"))]);
        let fallback = ScriptedLlm::new("repair", vec![Ok(GOOD_OUTPUT.to_string())]);
        let extractor = MessageExtractor::new(
            vec![tier(primary.clone(), 3), tier(fallback.clone(), 3)],
            5,
        );

        let result = extractor.extract(&request()).await;
        assert!(!result.is_degraded());
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn slow_tier_times_out_and_escalates() {
        struct SlowLlm;

        #[async_trait::async_trait]
        impl LlmProvider for SlowLlm {
            fn tier_name(&self) -> &str {
                "slow"
            }
            async fn invoke(&self, _prompt: &str) -> Result<String, LlmError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(GOOD_OUTPUT.to_string())
            }
        }

        let fallback = ScriptedLlm::new("repair", vec![Ok(GOOD_OUTPUT.to_string())]);
        let extractor = MessageExtractor::new(
            vec![
                Tier {
                    provider: Arc::new(SlowLlm),
                    max_attempts: 2,
                    timeout: Duration::from_millis(10),
                },
                tier(fallback.clone(), 2),
            ],
            5,
        );

        let result = extractor.extract(&request()).await;
        assert!(!result.is_degraded());
        assert_eq!(fallback.calls(), 1);
    }

    // ── Fail-soft ───────────────────────────────────────────────────

    #[tokio::test]
    async fn exhaustion_returns_degraded_result() {
        // Every tier produces undecodable text until its budget runs out.
        let primary = ScriptedLlm::new(
            "precise",
            vec![Ok("nope".to_string()), Ok("still nope".to_string())],
        );
        let fallback = ScriptedLlm::new(
            "repair",
            vec![Ok("not json".to_string()), Ok("also not json".to_string())],
        );
        let extractor = MessageExtractor::new(
            vec![tier(primary.clone(), 2), tier(fallback.clone(), 2)],
            5,
        );

        let req = request();
        let result = extractor.extract(&req).await;
        assert!(result.is_degraded());
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].author, DEGRADED_AUTHOR);
        // Original conversation byte-for-byte.
        assert_eq!(result.messages[0].content, req.conversation);
        assert_eq!(result.messages[0].timestamp, Some(req.timestamp));
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 2);
    }

    #[tokio::test]
    async fn no_tiers_still_resolves_degraded() {
        let extractor = MessageExtractor::new(vec![], 5);
        let result = extractor.extract(&request()).await;
        assert!(result.is_degraded());
    }

    // ── Gate accounting ─────────────────────────────────────────────

    #[tokio::test]
    async fn gate_utilization_returns_to_zero_after_extract() {
        let primary = ScriptedLlm::new("precise", vec![Ok(GOOD_OUTPUT.to_string())]);
        let extractor = MessageExtractor::new(vec![tier(primary, 1)], 3);

        assert_eq!(extractor.gate().in_flight(), 0);
        let _ = extractor.extract(&request()).await;
        assert_eq!(extractor.gate().in_flight(), 0);
        assert_eq!(extractor.gate().capacity(), 3);
    }

    #[tokio::test]
    async fn gate_utilization_returns_to_zero_after_degraded_extract() {
        let primary = ScriptedLlm::new("precise", vec![Err(unavailable("precise"))]);
        let extractor = MessageExtractor::new(vec![tier(primary, 1)], 3);

        let result = extractor.extract(&request()).await;
        assert!(result.is_degraded());
        assert_eq!(extractor.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn gate_bounds_concurrent_extractions() {
        /// Provider that records the maximum number of concurrent callers.
        struct ConcurrencyProbe {
            active: AtomicU32,
            max_seen: AtomicU32,
        }

        #[async_trait::async_trait]
        impl LlmProvider for ConcurrencyProbe {
            fn tier_name(&self) -> &str {
                "probe"
            }

            async fn invoke(&self, _prompt: &str) -> Result<String, LlmError> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(GOOD_OUTPUT.to_string())
            }
        }

        let probe = Arc::new(ConcurrencyProbe {
            active: AtomicU32::new(0),
            max_seen: AtomicU32::new(0),
        });
        let extractor = Arc::new(MessageExtractor::new(
            vec![Tier {
                provider: probe.clone(),
                max_attempts: 1,
                timeout: Duration::from_secs(5),
            }],
            1,
        ));

        let calls = (0..4).map(|_| {
            let extractor = Arc::clone(&extractor);
            tokio::spawn(async move { extractor.extract(&request()).await })
        });
        for result in futures::future::join_all(calls).await {
            assert!(!result.unwrap().is_degraded());
        }

        assert_eq!(probe.max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.gate().in_flight(), 0);
    }
}
