//! Sensor simulator entry point.
//!
//! Streams synthetic readings to the aggregator over gRPC until SIGINT /
//! SIGTERM, then closes the stream cleanly and logs the server summary.
//!
//! # Environment variables
//! | Var                           | Default           |
//! |-------------------------------|-------------------|
//! | `AGGREGATOR_HOST`             | `localhost:50051` |
//! | `SIMULATOR_INTERVAL_MS`       | `500`             |
//! | `SIMULATOR_SPIKE_PROBABILITY` | `0.05`            |
//! | `SIMULATOR_SEED`              | random            |

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use sensor_simulator::config::SimulatorConfig;
use sensor_simulator::run_simulator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensor_simulator=info".parse()?),
        )
        .json()
        .init();

    let config = SimulatorConfig::from_env()?;
    info!(target_addr = %config.aggregator_target, "starting sensor simulator");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, closing stream");
        let _ = shutdown_tx.send(true);
    });

    match run_simulator(&config, shutdown_rx).await? {
        Some(summary) => info!(processed = summary.readings_processed, "simulator finished"),
        None => info!("simulator stopped before streaming"),
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(?err, "failed to install SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
    }
}
