//! Target schema for extraction results and the tolerant candidate decode.
//!
//! Two layers live here:
//! - the *accepted* shapes (`Message`, `ExtractionResult`) handed back to
//!   callers, with their derived properties (placeholder detection, sort key,
//!   degraded sentinel);
//! - the *raw* shape (`RawExtraction`) that model output is decoded into
//!   before validation, deliberately permissive about missing fields.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Sentinel marker for a message body the producer intentionally omitted.
/// Matches `== PLACEHOLDER ==` with flexible surrounding whitespace, so the
/// `=== PLACEHOLDER ===` form used in prompts matches too.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"==\s*PLACEHOLDER\s*==").unwrap());

/// Author of the single message in a degraded (fail-soft) result.
/// Callers detect degradation structurally through this value.
pub const DEGRADED_AUTHOR: &str = "extraction failed";

// ── Inbound request ─────────────────────────────────────────────────

/// One conversation to extract, as received from the caller.
///
/// The two candidate flags only select which prompt variant is assembled;
/// the validator never looks at them.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationRequest {
    /// Raw conversation text, verbatim.
    pub conversation: String,
    /// Display name of the account that received the conversation.
    #[serde(default)]
    pub author: Option<String>,
    /// Subject line, if known.
    #[serde(default)]
    pub subject: Option<String>,
    /// When the conversation was received. Anchors ambiguous model timestamps.
    #[serde(deserialize_with = "de_reference_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Header hints say this is a reply — use the multi-message prompt.
    #[serde(default)]
    pub reply_candidate: bool,
    /// Header hints say this may be forwarded — include forwarding rules.
    #[serde(default)]
    pub forward_candidate: bool,
}

/// Accept both RFC 3339 and the naive `%Y-%m-%dT%H:%M[:%S]` form mail
/// clients send (naive values are taken as UTC).
fn de_reference_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(serde::de::Error::custom(format!(
        "invalid reference timestamp: {raw}"
    )))
}

// ── Accepted shapes ─────────────────────────────────────────────────

/// One extracted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Display name of the sender.
    pub author: String,
    /// Raw copied message text. Empty for signature-only messages.
    pub content: String,
    /// When the message was sent, if the model could anchor it.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Whether the body is the placeholder sentinel (metadata-only message).
    pub fn is_placeholder(&self) -> bool {
        PLACEHOLDER_RE.is_match(&self.content)
    }

    /// Sort key with missing timestamps sinking to the end of a
    /// most-recent-first ordering.
    pub(crate) fn sort_key(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// The accepted, normalized extraction handed back to callers.
///
/// Invariants (enforced by [`crate::validate::validate`]):
/// - at least one message, at least one with a timestamp;
/// - most-recent-first ordering, missing timestamps last;
/// - `forwarded == true` iff `forwarded_by` is a non-blank name;
/// - the first message is never a placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub messages: Vec<Message>,
    pub forwarded: bool,
    pub forwarded_by: Option<String>,
}

impl ExtractionResult {
    /// Fail-soft result: the original conversation wrapped as a single
    /// message under the sentinel author, anchored to the reference time.
    pub fn degraded(conversation: &str, reference: DateTime<Utc>) -> Self {
        Self {
            messages: vec![Message {
                author: DEGRADED_AUTHOR.to_string(),
                content: conversation.to_string(),
                timestamp: Some(reference),
            }],
            forwarded: false,
            forwarded_by: None,
        }
    }

    /// Whether this is the fail-soft sentinel result.
    pub fn is_degraded(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.author == DEGRADED_AUTHOR)
    }
}

// ── Raw candidate shape ─────────────────────────────────────────────

/// Candidate decoded from model output before validation. Permissive on
/// purpose: absent fields default rather than fail, so the validator (not
/// serde) gets to classify the violation.
#[derive(Debug, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub messages: Vec<RawMessage>,
    #[serde(default)]
    pub forwarded: bool,
    #[serde(default)]
    pub forwarded_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RawMessage {
    /// Resolve this message against the reference instant.
    pub fn resolve(self, reference: DateTime<Utc>) -> Message {
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(|raw| resolve_timestamp(raw, reference));
        Message {
            author: self.author,
            content: self.content,
            timestamp,
        }
    }
}

/// Resolve a model-emitted timestamp string to an absolute instant.
///
/// The prompt asks for `%Y-%m-%dT%H:%M`, but models drift: full RFC 3339,
/// seconds, and the year-less `%m-%dT%H:%M` partial form all show up.
/// Partial forms borrow the reference instant's year; naive forms are taken
/// as UTC (the reference's frame). Anything else resolves to `None` — the
/// all-`None` case is a validator concern, not a parse error.
pub fn resolve_timestamp(raw: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    // Year-less partial form: borrow the reference year.
    let with_year = format!("{}-{}", reference.year(), raw);
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&with_year, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn placeholder_detection_matches_sentinel_forms() {
        let msg = |content: &str| Message {
            author: "a".into(),
            content: content.into(),
            timestamp: None,
        };
        assert!(msg("== PLACEHOLDER ==").is_placeholder());
        assert!(msg("=== PLACEHOLDER ===").is_placeholder());
        assert!(msg("\n\n=== PLACEHOLDER ===\n\n").is_placeholder());
        assert!(msg("==PLACEHOLDER==").is_placeholder());
        assert!(!msg("== placeholder ==").is_placeholder());
        assert!(!msg("PLACEHOLDER").is_placeholder());
        assert!(!msg("Hi there").is_placeholder());
        assert!(!msg("").is_placeholder());
    }

    #[test]
    fn resolve_rfc3339_with_offset() {
        let ts = resolve_timestamp("2024-03-14T15:15:00+02:00", reference()).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 14, 13, 15, 0).unwrap());
    }

    #[test]
    fn resolve_naive_prompt_format() {
        let ts = resolve_timestamp("2024-03-14T15:15", reference()).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 14, 15, 15, 0).unwrap());
    }

    #[test]
    fn resolve_naive_with_seconds() {
        let ts = resolve_timestamp("2024-03-14T15:15:30", reference()).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 14, 15, 15, 30).unwrap());
    }

    #[test]
    fn resolve_partial_borrows_reference_year() {
        let ts = resolve_timestamp("03-14T15:15", reference()).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 14, 15, 15, 0).unwrap());
    }

    #[test]
    fn resolve_garbage_is_none() {
        assert_eq!(resolve_timestamp("yesterday", reference()), None);
        assert_eq!(resolve_timestamp("", reference()), None);
        assert_eq!(resolve_timestamp("  ", reference()), None);
    }

    #[test]
    fn degraded_result_preserves_conversation() {
        let result = ExtractionResult::degraded("raw mail text\n> quoted", reference());
        assert!(result.is_degraded());
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].content, "raw mail text\n> quoted");
        assert_eq!(result.messages[0].timestamp, Some(reference()));
        assert!(!result.forwarded);
        assert!(result.forwarded_by.is_none());
    }

    #[test]
    fn request_accepts_naive_reference_timestamp() {
        let req: ConversationRequest = serde_json::from_str(
            r#"{
                "conversation": "hello",
                "subject": "Re: hi",
                "timestamp": "2024-03-14T12:00",
                "reply_candidate": true,
                "forward_candidate": false
            }"#,
        )
        .unwrap();
        assert_eq!(req.timestamp, reference());
        assert!(req.author.is_none());
        assert!(req.reply_candidate);
    }

    #[test]
    fn request_accepts_rfc3339_reference_timestamp() {
        let req: ConversationRequest = serde_json::from_str(
            r#"{"conversation": "x", "timestamp": "2024-03-14T12:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(req.timestamp, reference());
    }

    #[test]
    fn request_rejects_unparseable_timestamp() {
        let result = serde_json::from_str::<ConversationRequest>(
            r#"{"conversation": "x", "timestamp": "last tuesday"}"#,
        );
        assert!(result.is_err());
    }
}
