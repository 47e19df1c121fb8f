//! Background task that drains the fallback queue into the object store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::store::AlertStore;

/// Replay the fallback queue every `interval` until `shutdown` flips to true.
pub fn spawn(
    store: Arc<AlertStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.replay_fallback().await {
                        Ok(report) if report.remaining > 0 => info!(
                            replayed = report.replayed,
                            remaining = report.remaining,
                            "fallback queue not yet drained"
                        ),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "fallback replay failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("reconciler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackQueue;
    use crate::models::AlertRecord;
    use crate::object_store::InMemoryObjectStore;
    use crate::store::RetryPolicy;
    use chrono::Utc;
    use proto::energy::AlertPayload;

    #[tokio::test]
    async fn drains_queue_once_store_recovers_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let objects = InMemoryObjectStore::new();
        let fallback = Arc::new(FallbackQueue::open(dir.path().join("q.jsonl")).await.unwrap());
        let record = AlertRecord::new(
            AlertPayload {
                building_id: "Library".into(),
                floor_id: "Floor-4".into(),
                wattage: 4400.0,
                timestamp: 1_700_000_100,
                message: "spike".into(),
            },
            Utc::now(),
        );
        fallback.append(&record, "down").await.unwrap();

        let store = Arc::new(AlertStore::new(
            Arc::new(objects.clone()),
            fallback.clone(),
            RetryPolicy::default(),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = spawn(store, Duration::from_millis(10), rx);

        for _ in 0..200 {
            if fallback.is_empty().await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(fallback.is_empty().await.unwrap());
        assert_eq!(objects.len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
