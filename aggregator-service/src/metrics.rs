//! Prometheus export of the latest wattage per building floor.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{GaugeVec, Opts, Registry, TextEncoder};
use proto::energy::EnergyReading;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct Metrics {
    registry: Registry,
    current_wattage: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let current_wattage = GaugeVec::new(
            Opts::new("energy_current_wattage", "Current wattage per building floor"),
            &["building_id", "floor_id"],
        )?;
        registry.register(Box::new(current_wattage.clone()))?;
        Ok(Self {
            registry,
            current_wattage,
        })
    }

    pub fn record_reading(&self, reading: &EnergyReading) {
        self.current_wattage
            .with_label_values(&[reading.building_id.as_str(), reading.floor_id.as_str()])
            .set(reading.current_wattage);
    }

    /// Text exposition of everything in the registry.
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .context("encoding metrics")
    }
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Serve `/metrics` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, metrics: Arc<Metrics>, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(?addr, "metrics endpoint listening");
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(shutdown)
        .await
        .context("metrics server encountered an error")
}
