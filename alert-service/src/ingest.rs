//! Alert ingestion: validate, stamp, persist.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use proto::energy::AlertPayload;
use tracing::{info, warn};

use crate::error::{IngestError, ValidationError};
use crate::models::AlertRecord;
use crate::store::{AlertStore, PersistOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Written to the object store.
    Logged { key: String, file_name: String },
    /// Store unreachable; the record waits in the fallback queue.
    Degraded { reason: String, fallback_sequence: u64 },
}

pub fn validate(payload: &AlertPayload) -> Result<(), ValidationError> {
    let building = payload.building_id.trim();
    if building.is_empty() {
        return Err(ValidationError::EmptyBuildingId);
    }
    if payload.building_id.contains('/') || payload.building_id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidBuildingId(payload.building_id.clone()));
    }
    if payload.floor_id.trim().is_empty() {
        return Err(ValidationError::EmptyFloorId);
    }
    if !payload.wattage.is_finite() {
        return Err(ValidationError::NonFiniteWattage);
    }
    if payload.wattage < 0.0 {
        return Err(ValidationError::NegativeWattage(payload.wattage));
    }
    if payload.timestamp <= 0 {
        return Err(ValidationError::NonPositiveTimestamp(payload.timestamp));
    }
    Ok(())
}

pub struct AlertIngestor {
    store: Arc<AlertStore>,
}

impl AlertIngestor {
    pub fn new(store: Arc<AlertStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub async fn ingest(&self, payload: AlertPayload) -> Result<IngestOutcome, IngestError> {
        self.ingest_at(payload, Utc::now()).await
    }

    /// Like [`ingest`](Self::ingest) with an explicit receipt time.
    pub async fn ingest_at(
        &self,
        payload: AlertPayload,
        received_at: DateTime<Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        if let Err(e) = validate(&payload) {
            warn!(building_id = %payload.building_id, error = %e, "alert rejected");
            return Err(e.into());
        }

        info!(
            building_id = %payload.building_id,
            floor_id = %payload.floor_id,
            wattage = payload.wattage,
            timestamp = payload.timestamp,
            "alert received"
        );

        let record = AlertRecord::new(payload, received_at);
        match self.store.persist(&record).await? {
            PersistOutcome::Stored(key) => Ok(IngestOutcome::Logged {
                key: key.object_key(),
                file_name: key.file_name(),
            }),
            PersistOutcome::Spilled { sequence, reason } => Ok(IngestOutcome::Degraded {
                reason,
                fallback_sequence: sequence,
            }),
        }
    }
}
