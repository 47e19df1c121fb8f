//! Alert service: accepts anomaly alerts over HTTP and persists them.
//!
//! `POST /alert` validates the payload ([`ingest`]), then [`store::AlertStore`]
//! writes it to S3 under a collision-free key, retrying transient failures and
//! spilling to the local [`fallback`] queue when the store stays down. The
//! [`reconciler`] replays that queue in the background.

pub mod config;
pub mod error;
pub mod fallback;
pub mod handlers;
pub mod ingest;
pub mod models;
pub mod object_store;
pub mod reconciler;
pub mod secrets;
pub mod sigv4;
pub mod store;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::ingest::AlertIngestor;

/// Shared state injected into every Axum handler via `State`.
pub struct AppState {
    pub ingestor: AlertIngestor,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/alert", post(handlers::post_alert))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
