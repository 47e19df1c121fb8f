//! AlertSink trait and implementations.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proto::energy::AlertPayload;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("alert service answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("alert sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    /// Client errors mean the payload itself is wrong; resending won't help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Rejected { status, .. } => !(400..500).contains(status),
            SinkError::Http(_) | SinkError::Unavailable(_) => true,
        }
    }
}

// ------------------------------------------------------------------ //
//  Trait                                                              //
// ------------------------------------------------------------------ //

/// Destination for alerts raised by the collector.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &AlertPayload) -> Result<(), SinkError>;
}

// ------------------------------------------------------------------ //
//  FakeAlertSink (for tests)                                          //
// ------------------------------------------------------------------ //

/// In-memory sink that collects alerts for test assertions.
///
/// `fail_next(n)` makes the next `n` sends fail with a retryable error.
#[derive(Debug, Default, Clone)]
pub struct FakeAlertSink {
    pub alerts: Arc<Mutex<Vec<AlertPayload>>>,
    failures: Arc<AtomicU32>,
}

impl FakeAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Consume all alerts received so far.
    pub fn drain(&self) -> Vec<AlertPayload> {
        self.alerts.lock().unwrap().drain(..).collect()
    }

    /// Non-destructive snapshot of received alerts.
    pub fn snapshot(&self) -> Vec<AlertPayload> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for FakeAlertSink {
    async fn send(&self, alert: &AlertPayload) -> Result<(), SinkError> {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(SinkError::Unavailable("injected failure".to_string()));
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

// ------------------------------------------------------------------ //
//  HttpAlertSink (production)                                         //
// ------------------------------------------------------------------ //

/// Posts each alert as JSON to the alert service's `/alert` endpoint.
pub struct HttpAlertSink {
    http: reqwest::Client,
    url: String,
}

impl HttpAlertSink {
    pub fn new(url: &str) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for HttpAlertSink {
    async fn send(&self, alert: &AlertPayload) -> Result<(), SinkError> {
        let resp = self.http.post(&self.url).json(alert).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // 200 = logged, 202 = accepted into the alert service's fallback queue.
        info!(
            building_id = %alert.building_id,
            status = status.as_u16(),
            response = %body,
            "alert sent"
        );
        Ok(())
    }
}
