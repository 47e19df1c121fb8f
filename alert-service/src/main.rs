//! Alert service: HTTP endpoint in front of the S3 alert store.
//!
//! # Configuration
//! Object-store credentials are resolved via Bitwarden Secrets Manager (when
//! `BWS_ACCESS_TOKEN` is set) or plain environment variables. Everything else
//! comes from the environment.
//!
//! | Env var                         | Default                              |
//! |---------------------------------|--------------------------------------|
//! | `ALERT_SERVICE_ADDR`            | `0.0.0.0:8000`                       |
//! | `S3_BUCKET_NAME`                | `smart-campus-alerts-dev`            |
//! | `AWS_REGION`                    | `us-east-1`                          |
//! | `S3_ENDPOINT`                   | `https://s3.<region>.amazonaws.com`  |
//! | `AWS_ACCESS_KEY_ID`             | required                             |
//! | `AWS_SECRET_ACCESS_KEY`         | required                             |
//! | `AWS_SESSION_TOKEN`             | optional                             |
//! | `ALERT_FALLBACK_PATH`           | `alert-fallback.jsonl`               |
//! | `ALERT_RECONCILE_INTERVAL_SECS` | `30`                                 |
//! | `SHUTDOWN_GRACE_SECS`           | `10`                                 |

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{error, info, warn};

use alert_service::config::AlertServiceConfig;
use alert_service::fallback::FallbackQueue;
use alert_service::ingest::AlertIngestor;
use alert_service::object_store::{ObjectStore, S3ObjectStore};
use alert_service::secrets::SecretsClient;
use alert_service::store::AlertStore;
use alert_service::{reconciler, router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("alert_service=info".parse()?),
        )
        .json()
        .init();

    let config = AlertServiceConfig::from_env()?;

    let credentials = SecretsClient::from_env()
        .s3_credentials()
        .await
        .context("object store credentials are required")?;
    let objects: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(
        &config.endpoint,
        &config.bucket,
        &config.region,
        credentials,
    )?);
    info!(
        endpoint = %config.endpoint,
        bucket = %config.bucket,
        region = %config.region,
        "alert store configured"
    );

    let fallback = Arc::new(
        FallbackQueue::open(&config.fallback_path)
            .await
            .with_context(|| format!("opening fallback queue {}", config.fallback_path.display()))?,
    );
    let store = Arc::new(AlertStore::new(objects, fallback, config.retry.clone()));

    let (reconcile_stop, reconcile_rx) = watch::channel(false);
    let reconciler = reconciler::spawn(store.clone(), config.reconcile_interval, reconcile_rx);

    let state = Arc::new(AppState {
        ingestor: AlertIngestor::new(store),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "alert-service listening");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop_rx.await.ok();
            })
            .await
    });

    tokio::select! {
        joined = &mut server => {
            let _ = reconcile_stop.send(true);
            joined??;
            return Ok(());
        }
        _ = shutdown_signal() => {
            info!(grace_secs = config.shutdown_grace.as_secs(), "shutdown requested, finishing in-flight requests");
            let _ = stop_tx.send(());
        }
    }

    match timeout(config.shutdown_grace, &mut server).await {
        Ok(Ok(Ok(()))) => info!("in-flight requests finished"),
        Ok(Ok(Err(e))) => error!(error = %e, "server stopped with error"),
        Ok(Err(e)) => error!(error = %e, "server task failed"),
        Err(_) => {
            warn!("grace period elapsed with requests in flight, forcing shutdown");
            server.abort();
        }
    }

    let _ = reconcile_stop.send(true);
    match timeout(config.shutdown_grace, reconciler).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "reconciler task failed"),
        Err(_) => warn!("reconciler still replaying at exit; queue kept for next start"),
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
