//! Extraction-result validator — pure, deterministic, no I/O.
//!
//! Takes the model's raw text output and either produces a fully normalized
//! [`ExtractionResult`] or a typed rejection. Same input, same verdict:
//! every step below is order-sensitive and deliberate.
//!
//! 1. Decode (structural — failure is `MalformedOutput`, never repaired here)
//! 2. Reject empty extractions
//! 3. Reject extractions with no timestamp anchor at all
//! 4. Enforce forwarded/forwarded_by consistency, then normalize
//! 5. Stable sort most-recent-first, missing timestamps last
//! 6. Promote the first non-placeholder message to the front

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::schema::{ExtractionResult, Message, RawExtraction};

/// Validate raw model output against the business schema.
pub fn validate(
    raw_output: &str,
    reference: DateTime<Utc>,
) -> Result<ExtractionResult, ValidationError> {
    let json = extract_json_object(raw_output);
    let raw: RawExtraction = serde_json::from_str(&json)
        .map_err(|e| ValidationError::MalformedOutput(e.to_string()))?;

    let mut messages: Vec<Message> = raw
        .messages
        .into_iter()
        .map(|m| m.resolve(reference))
        .collect();

    if messages.is_empty() {
        return Err(ValidationError::EmptyResult);
    }
    if messages.iter().all(|m| m.timestamp.is_none()) {
        return Err(ValidationError::MissingTimestamp);
    }

    let forwarded_by = check_forwarding(raw.forwarded, raw.forwarded_by)?;

    // Stable: equal keys keep input order, so the verdict is deterministic.
    messages.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

    if messages[0].is_placeholder() {
        match messages.iter().position(|m| !m.is_placeholder()) {
            Some(idx) => messages.swap(0, idx),
            None => return Err(ValidationError::AllPlaceholder),
        }
    }

    Ok(ExtractionResult {
        messages,
        forwarded: raw.forwarded,
        forwarded_by,
    })
}

/// Enforce `forwarded == true ⇔ forwarded_by is a non-blank name`.
///
/// A blank value under `forwarded == false` is cleared, not rejected: models
/// routinely emit `""` there and the information content is identical.
fn check_forwarding(
    forwarded: bool,
    forwarded_by: Option<String>,
) -> Result<Option<String>, ValidationError> {
    let blank = forwarded_by
        .as_deref()
        .is_none_or(|name| name.trim().is_empty());
    if forwarded == blank {
        return Err(ValidationError::ForwardingConsistency);
    }
    Ok(if forwarded { forwarded_by } else { None })
}

/// Extract a JSON object from LLM output (handles markdown wrapping and
/// surrounding prose).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in a markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Fall back to the outermost brace pair
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
