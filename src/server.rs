//! HTTP surface for the extraction service.
//!
//! Two endpoints, matching the service contract:
//! - `POST /parse_messages` — run one extraction (never errors; degraded
//!   results are detected structurally by the caller)
//! - `GET /` — health/introspection: in-flight extraction count and capacity

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use tracing::debug;

use crate::extractor::MessageExtractor;
use crate::schema::{ConversationRequest, ExtractionResult};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<MessageExtractor>,
}

/// Build the Axum router for the extraction service.
pub fn routes(extractor: Arc<MessageExtractor>) -> Router {
    let state = AppState { extractor };

    Router::new()
        .route("/", get(health))
        .route("/parse_messages", post(parse_messages))
        .with_state(state)
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let gate = state.extractor.gate();
    Json(serde_json::json!({
        "concurrent_prompts": gate.in_flight(),
        "capacity": gate.capacity(),
    }))
}

async fn parse_messages(
    State(state): State<AppState>,
    Json(request): Json<ConversationRequest>,
) -> Json<ExtractionResult> {
    debug!(
        conversation_chars = request.conversation.len(),
        subject = request.subject.as_deref().unwrap_or(""),
        "Received parse_messages request"
    );
    Json(state.extractor.extract(&request).await)
}
