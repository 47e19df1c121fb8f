//! Background delivery of raised alerts.
//!
//! The collector hands alerts to a bounded channel; a single dispatcher task
//! delivers them through an [`AlertSink`] with bounded retry. When every
//! sender is gone the task drains what is queued and exits, which is how
//! shutdown waits for in-flight alerts.

use std::sync::Arc;
use std::time::Duration;

use proto::energy::AlertPayload;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::alert_sink::AlertSink;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.pow(attempt.saturating_sub(1).min(10)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Start the dispatcher; returns the alert sender and the task handle.
pub fn spawn(
    sink: Arc<dyn AlertSink>,
    policy: RetryPolicy,
    capacity: usize,
) -> (mpsc::Sender<AlertPayload>, JoinHandle<DispatchStats>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(run(rx, sink, policy));
    (tx, handle)
}

async fn run(
    mut rx: mpsc::Receiver<AlertPayload>,
    sink: Arc<dyn AlertSink>,
    policy: RetryPolicy,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    while let Some(alert) = rx.recv().await {
        if deliver(&*sink, &alert, &policy).await {
            stats.delivered += 1;
        } else {
            stats.failed += 1;
        }
    }

    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "alert dispatcher drained"
    );
    stats
}

async fn deliver(sink: &dyn AlertSink, alert: &AlertPayload, policy: &RetryPolicy) -> bool {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match sink.send(alert).await {
            Ok(()) => return true,
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    building_id = %alert.building_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "alert delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    building_id = %alert.building_id,
                    timestamp = alert.timestamp,
                    wattage = alert.wattage,
                    error = %e,
                    "alert delivery failed, giving up"
                );
                return false;
            }
        }
    }
    false
}
