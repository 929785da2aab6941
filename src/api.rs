//! Webhook inbound surface
//!
//! Minimal REST surface in front of the engine:
//! - POST /v1/messages  - process one inbound user message
//! - GET  /healthz      - liveness probe
//!
//! Transport concerns beyond JSON parsing (signature verification, per-part
//! delivery retries) belong to the channel adapters, not here.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::engine::{Engine, EngineReply, InboundMessage};
use crate::error::EngineError;
use crate::model::MessagePart;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub request_id: String,
    pub final_response: String,
    /// Ordered delivery parts when the channel required splitting
    pub parts: Vec<MessagePart>,
    pub validation_passed: bool,
    pub refinement_attempted: bool,
    pub graceful_failure: bool,
    pub total_duration_ms: u64,
}

impl From<EngineReply> for MessageResponse {
    fn from(reply: EngineReply) -> Self {
        Self {
            request_id: reply.request_id.to_string(),
            final_response: reply.final_response.content.clone(),
            parts: reply.final_response.parts,
            validation_passed: reply.validation_passed,
            refinement_attempted: reply.refinement_attempted,
            graceful_failure: reply.graceful_failure,
            total_duration_ms: reply.total_duration_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Build the router; the engine is shared across requests.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/v1/messages", post(handle_message))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn handle_message(
    State(engine): State<Arc<Engine>>,
    Json(inbound): Json<InboundMessage>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    match engine.handle(inbound).await {
        Ok(reply) => Ok(Json(reply.into())),
        Err(EngineError::InvalidInput(message)) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: message }),
        )),
        Err(other) => {
            // The engine absorbs everything else; reaching here is a bug
            error!(error = %other, "unexpected engine error at the API boundary");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal error".into(),
                }),
            ))
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
