use tracing::warn;
use super::listener::MessageListener;
use super::types::{IngestOutcome, IngestResponse};
use crate::record::StreamMessage;
use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;

/// Accepts a record from a stream publisher and starts its confirmation round.
pub async fn handle_ingest(
    Extension(listener): Extension<Arc<MessageListener>>,
    Json(msg): Json<StreamMessage>,
) -> (StatusCode, Json<IngestResponse>) {
    let message_id = msg.message_id.to_string();

    match listener.on_stream_message(msg).await {
        Ok(IngestOutcome::Announced { hash }) => (
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                message_id,
                status: "announced".to_string(),
                hash: Some(hash),
            }),
        ),
        Ok(IngestOutcome::NotAssigned) => (
            StatusCode::MISDIRECTED_REQUEST,
            Json(IngestResponse {
                message_id,
                status: "not_assigned".to_string(),
                hash: None,
            }),
        ),
        Err(err) => {
            warn!("Rejected record {}: {}", message_id, err);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(IngestResponse {
                    message_id,
                    status: "rejected".to_string(),
                    hash: None,
                }),
            )
        }
    }
}
