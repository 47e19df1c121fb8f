//! Error types for the alert ingestion path.

use thiserror::Error;

/// Payload rejected before anything is stored.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("building_id is empty")]
    EmptyBuildingId,
    #[error("building_id {0:?} contains '/' or control characters")]
    InvalidBuildingId(String),
    #[error("floor_id is empty")]
    EmptyFloorId,
    #[error("wattage {0} is negative")]
    NegativeWattage(f64),
    #[error("wattage is not a finite number")]
    NonFiniteWattage,
    #[error("timestamp {0} is not positive")]
    NonPositiveTimestamp(i64),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("object store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("object store answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid object url: {0}")]
    InvalidUrl(String),
    #[error("no free key left for {0}")]
    KeySpaceExhausted(String),
    #[error("failed to serialize alert record: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("fallback queue I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("fallback entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Neither the object store nor the local fallback took the record.
    #[error("alert not accepted: store failed ({store}) and fallback queue failed ({fallback})")]
    Unrecoverable {
        store: String,
        #[source]
        fallback: FallbackError,
    },
}
