//! Aggregator service entry point.
//!
//! # Environment variables
//! | Var                   | Default                       |
//! |-----------------------|-------------------------------|
//! | `AGGREGATOR_ADDR`     | `0.0.0.0:50051`               |
//! | `ALERT_SERVICE_URL`   | `http://localhost:8000/alert` |
//! | `METRICS_ADDR`        | `0.0.0.0:2112`                |
//! | `SHUTDOWN_GRACE_SECS` | `10`                          |

use std::sync::Arc;

use anyhow::{Context, Result};
use proto::energy::energy_sensor_server::EnergySensorServer;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};
use tonic::transport::Server;
use tracing::{error, info, warn};

use aggregator_service::alert_sink::{AlertSink, HttpAlertSink};
use aggregator_service::collector::Collector;
use aggregator_service::config::AggregatorConfig;
use aggregator_service::dispatcher;
use aggregator_service::metrics::{self, Metrics};
use aggregator_service::service::EnergySensorService;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aggregator_service=info".parse()?),
        )
        .json()
        .init();

    let config = AggregatorConfig::from_env()?;

    let sink: Arc<dyn AlertSink> = Arc::new(HttpAlertSink::new(&config.alert_service_url)?);
    info!(url = %config.alert_service_url, "alerts will be posted to alert service");

    let (alert_tx, dispatcher) = dispatcher::spawn(sink, config.alert_retry.clone(), 256);
    let collector = Arc::new(Collector::new(config.detector.clone(), alert_tx));
    let metrics = Arc::new(Metrics::new()?);
    let svc = EnergySensorService::new(collector, metrics.clone());

    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_addr)
        .await
        .with_context(|| format!("binding metrics listener {}", config.metrics_addr))?;
    let (metrics_stop, metrics_stop_rx) = oneshot::channel::<()>();
    let metrics_server = tokio::spawn(metrics::serve(metrics_listener, metrics, async move {
        metrics_stop_rx.await.ok();
    }));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let addr = config.listen_addr;
    info!(%addr, "aggregator-service listening");

    let mut server = tokio::spawn(
        Server::builder()
            .add_service(EnergySensorServer::new(svc))
            .serve_with_shutdown(addr, async move {
                stop_rx.await.ok();
            }),
    );

    tokio::select! {
        joined = &mut server => {
            // Server stopped on its own (bind failure or fatal transport error).
            let _ = metrics_stop.send(());
            joined??;
            return Ok(());
        }
        _ = shutdown_signal() => {
            info!(grace_secs = config.shutdown_grace.as_secs(), "shutdown requested, draining streams");
            let _ = stop_tx.send(());
        }
    }

    let deadline = Instant::now() + config.shutdown_grace;

    match timeout(config.shutdown_grace, &mut server).await {
        Ok(Ok(Ok(()))) => info!("all streams closed"),
        Ok(Ok(Err(e))) => error!(error = %e, "server stopped with error"),
        Ok(Err(e)) => error!(error = %e, "server task failed"),
        Err(_) => {
            warn!("grace period elapsed with open streams, forcing shutdown");
            server.abort();
        }
    }

    let _ = metrics_stop.send(());
    match timeout(config.shutdown_grace, metrics_server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "metrics server stopped with error"),
        Ok(Err(e)) => error!(error = %e, "metrics server task failed"),
        Err(_) => warn!("metrics server did not stop within the grace period"),
    }

    // The service (and with it the last alert sender) is gone now; wait for
    // queued alerts within what remains of the grace period.
    let remaining = deadline.saturating_duration_since(Instant::now());
    match timeout(remaining, dispatcher).await {
        Ok(Ok(stats)) => info!(delivered = stats.delivered, failed = stats.failed, "alerts drained"),
        Ok(Err(e)) => error!(error = %e, "alert dispatcher task failed"),
        Err(_) => warn!("grace period elapsed before queued alerts were delivered"),
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
