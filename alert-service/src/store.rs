//! Alert store: collision-free keys, bounded retry, spill to fallback.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::error::{FallbackError, IngestError, PersistenceError};
use crate::fallback::{FallbackQueue, ReplayReport};
use crate::models::{AlertRecord, StorageKey};
use crate::object_store::ObjectStore;

/// Suffixes tried before a base key is declared full.
const MAX_SUFFIX: u32 = 1000;

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

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Stored(StorageKey),
    Spilled { sequence: u64, reason: String },
}

// ------------------------------------------------------------------ //
//  Per-base-key locks                                                 //
// ------------------------------------------------------------------ //

/// One async mutex per base key, created on demand and dropped once nobody
/// holds or waits on it.
#[derive(Default)]
struct KeyLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

// ------------------------------------------------------------------ //
//  AlertStore                                                         //
// ------------------------------------------------------------------ //

pub struct AlertStore {
    objects: Arc<dyn ObjectStore>,
    fallback: Arc<FallbackQueue>,
    retry: RetryPolicy,
    key_locks: KeyLocks,
}

impl AlertStore {
    pub fn new(objects: Arc<dyn ObjectStore>, fallback: Arc<FallbackQueue>, retry: RetryPolicy) -> Self {
        Self {
            objects,
            fallback,
            retry,
            key_locks: KeyLocks::default(),
        }
    }

    pub fn fallback(&self) -> &FallbackQueue {
        &self.fallback
    }

    /// One attempt: claim the first free key for the record and write it.
    ///
    /// The claim and the write happen under the base key's lock, so two
    /// records with the same base key can never pick the same suffix.
    pub async fn write(&self, record: &AlertRecord) -> Result<StorageKey, PersistenceError> {
        let base = record.base_key();
        let _guard = self.key_locks.lock(&base.object_key()).await;

        let key = self.first_free_key(&base).await?;
        let body = serde_json::to_vec(record)?;
        self.objects
            .put_object(&key.object_key(), body, "application/json")
            .await?;
        Ok(key)
    }

    async fn first_free_key(&self, base: &StorageKey) -> Result<StorageKey, PersistenceError> {
        for suffix in 0..MAX_SUFFIX {
            let candidate = base.with_suffix(suffix);
            if !self.objects.object_exists(&candidate.object_key()).await? {
                return Ok(candidate);
            }
        }
        Err(PersistenceError::KeySpaceExhausted(base.object_key()))
    }

    /// Write with retry; spill to the fallback queue once retries run out.
    pub async fn persist(&self, record: &AlertRecord) -> Result<PersistOutcome, IngestError> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.write(record).await {
                Ok(key) => {
                    info!(
                        alert_id = %record.alert_id,
                        key = %key.object_key(),
                        attempt,
                        "alert persisted"
                    );
                    return Ok(PersistOutcome::Stored(key));
                }
                Err(e) => {
                    warn!(
                        alert_id = %record.alert_id,
                        building_id = %record.building_id,
                        attempt,
                        error = %e,
                        "alert write failed"
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        match self.fallback.append(record, &last_error).await {
            Ok(sequence) => {
                warn!(
                    alert_id = %record.alert_id,
                    sequence,
                    reason = %last_error,
                    "alert spilled to fallback queue"
                );
                Ok(PersistOutcome::Spilled {
                    sequence,
                    reason: last_error,
                })
            }
            Err(fallback) => {
                error!(
                    alert_id = %record.alert_id,
                    building_id = %record.building_id,
                    timestamp = record.timestamp,
                    store_error = %last_error,
                    error = %fallback,
                    "alert lost: store and fallback queue both failed"
                );
                Err(IngestError::Unrecoverable {
                    store: last_error,
                    fallback,
                })
            }
        }
    }

    /// Push queued records back through [`write`](Self::write), oldest first.
    pub async fn replay_fallback(&self) -> Result<ReplayReport, FallbackError> {
        self.fallback
            .replay(|entry| async move {
                match self.write(&entry.record).await {
                    Ok(key) => {
                        info!(
                            sequence = entry.sequence,
                            key = %key.object_key(),
                            "queued alert persisted"
                        );
                        true
                    }
                    Err(e) => {
                        warn!(sequence = entry.sequence, error = %e, "queued alert still not persisted");
                        false
                    }
                }
            })
            .await
    }
}
