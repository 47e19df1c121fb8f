//! Sensor simulator: synthetic energy readings streamed to the aggregator.
//!
//! One simulator process owns one long-lived client-streaming RPC. When the
//! transport breaks it reconnects with backoff; when shutdown is requested the
//! reading stream ends and the aggregator's summary is returned.

pub mod config;
pub mod generator;
pub mod link;

use proto::energy::StreamResponse;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::SimulatorConfig;
use crate::generator::{GeneratorConfig, ReadingGenerator};
use crate::link::{LinkError, SensorLink};

/// Stream readings until `shutdown` flips to `true`.
///
/// Returns the aggregator's summary for the final stream, or `None` when
/// shutdown arrived before a stream was open.
pub async fn run_simulator(
    config: &SimulatorConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<Option<StreamResponse>, LinkError> {
    let mut link = SensorLink::new(&config.aggregator_target, config.backoff.clone())?;
    let mut connection: u64 = 0;

    loop {
        let mut client = tokio::select! {
            client = link.connect() => client?,
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("shutdown requested before stream opened");
                return Ok(None);
            }
        };

        // Each connection gets a fresh generator; a seeded run stays
        // reproducible per connection.
        let generator = ReadingGenerator::new(GeneratorConfig {
            seed: config.generator.seed.map(|s| s.wrapping_add(connection)),
            ..config.generator.clone()
        });
        connection += 1;

        info!(target_addr = %config.aggregator_target, connection, "stream started");
        let readings = generator.into_stream(shutdown.clone());

        match link.stream(&mut client, readings).await {
            Ok(summary) => {
                info!(
                    processed = summary.readings_processed,
                    rejected = summary.readings_rejected,
                    alerts = summary.alerts_raised,
                    message = %summary.message,
                    "aggregator acknowledged end of stream"
                );
                return Ok(Some(summary));
            }
            Err(LinkError::Transport(status)) if !*shutdown.borrow() => {
                warn!(code = ?status.code(), error = %status.message(), "stream broke, reconnecting");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
