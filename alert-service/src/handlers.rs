//! Axum HTTP handlers for the alert service.

use std::sync::Arc;

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use proto::energy::AlertPayload;
use tracing::warn;

use crate::{
    error::IngestError,
    ingest::IngestOutcome,
    models::AlertResponse,
    AppState,
};

// ------------------------------------------------------------------ //
//  POST /alert                                                        //
// ------------------------------------------------------------------ //

/// Record one alert.
///
/// 200 when it reached the object store, 202 when it was queued locally,
/// 400 for anything wrong with the request, 500 only if nothing took it.
pub async fn post_alert(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AlertPayload>, JsonRejection>,
) -> (StatusCode, Json<AlertResponse>) {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed alert body");
            return (
                StatusCode::BAD_REQUEST,
                Json(AlertResponse::Rejected {
                    reason: rejection.body_text(),
                }),
            );
        }
    };

    match state.ingestor.ingest(payload).await {
        Ok(IngestOutcome::Logged { key, file_name }) => (
            StatusCode::OK,
            Json(AlertResponse::Logged {
                s3_key: file_name,
                key,
            }),
        ),
        Ok(IngestOutcome::Degraded {
            reason,
            fallback_sequence,
        }) => (
            StatusCode::ACCEPTED,
            Json(AlertResponse::Degraded {
                reason,
                fallback_sequence,
            }),
        ),
        Err(IngestError::Validation(e)) => (
            StatusCode::BAD_REQUEST,
            Json(AlertResponse::Rejected {
                reason: e.to_string(),
            }),
        ),
        Err(e @ IngestError::Unrecoverable { .. }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AlertResponse::Error {
                reason: e.to_string(),
            }),
        ),
    }
}

// ------------------------------------------------------------------ //
//  Health                                                             //
// ------------------------------------------------------------------ //

pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
