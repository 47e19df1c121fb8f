//! Alert records, storage keys, and the HTTP response bodies.

use chrono::{DateTime, NaiveDate, Utc};
use proto::energy::AlertPayload;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level prefix for every stored alert.
pub const KEY_PREFIX: &str = "alerts";

// ------------------------------------------------------------------ //
//  Stored record                                                      //
// ------------------------------------------------------------------ //

/// What lands in the object store: the payload plus receipt metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: Uuid,
    pub building_id: String,
    pub floor_id: String,
    pub wattage: f64,
    pub timestamp: i64,
    pub message: String,
    /// Endpoint wall clock at receipt, serialized as RFC 3339 UTC.
    pub received_at: DateTime<Utc>,
}

impl AlertRecord {
    pub fn new(payload: AlertPayload, received_at: DateTime<Utc>) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            building_id: payload.building_id,
            floor_id: payload.floor_id,
            wattage: payload.wattage,
            timestamp: payload.timestamp,
            message: payload.message,
            received_at,
        }
    }

    pub fn base_key(&self) -> StorageKey {
        StorageKey::derive(
            &self.building_id,
            self.timestamp,
            self.received_at.date_naive(),
        )
    }
}

// ------------------------------------------------------------------ //
//  Storage key                                                        //
// ------------------------------------------------------------------ //

/// `alerts/<date>/alert_<building>_<timestamp>[-<suffix>].json`
///
/// Suffix 0 is the base key. Higher suffixes only exist when an earlier
/// record already took the base key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    date: NaiveDate,
    building_id: String,
    timestamp: i64,
    suffix: u32,
}

impl StorageKey {
    pub fn derive(building_id: &str, timestamp: i64, date: NaiveDate) -> Self {
        Self {
            date,
            building_id: building_id.to_string(),
            timestamp,
            suffix: 0,
        }
    }

    pub fn with_suffix(&self, suffix: u32) -> Self {
        Self {
            suffix,
            ..self.clone()
        }
    }

    pub fn suffix(&self) -> u32 {
        self.suffix
    }

    pub fn file_name(&self) -> String {
        match self.suffix {
            0 => format!("alert_{}_{}.json", self.building_id, self.timestamp),
            n => format!("alert_{}_{}-{}.json", self.building_id, self.timestamp, n),
        }
    }

    pub fn object_key(&self) -> String {
        format!(
            "{KEY_PREFIX}/{}/{}",
            self.date.format("%Y-%m-%d"),
            self.file_name()
        )
    }
}

// ------------------------------------------------------------------ //
//  Outbound (alert-service → client)                                  //
// ------------------------------------------------------------------ //

/// Body of every `POST /alert` response, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AlertResponse {
    Logged { s3_key: String, key: String },
    Degraded { reason: String, fallback_sequence: u64 },
    Rejected { reason: String },
    Error { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn base_key_layout() {
        let key = StorageKey::derive("Engineering", 1_700_000_000, date(2023, 11, 14));
        assert_eq!(key.file_name(), "alert_Engineering_1700000000.json");
        assert_eq!(
            key.object_key(),
            "alerts/2023-11-14/alert_Engineering_1700000000.json"
        );
    }

    #[test]
    fn suffix_goes_before_extension() {
        let key = StorageKey::derive("DormA", 42, date(2024, 2, 29)).with_suffix(2);
        assert_eq!(key.file_name(), "alert_DormA_42-2.json");
        assert_eq!(key.object_key(), "alerts/2024-02-29/alert_DormA_42-2.json");
        assert_eq!(key.with_suffix(0).file_name(), "alert_DormA_42.json");
    }

    #[test]
    fn key_is_pure_in_its_inputs() {
        let a = StorageKey::derive("Library", 7, date(2025, 1, 1));
        let b = StorageKey::derive("Library", 7, date(2025, 1, 1));
        assert_eq!(a, b);
        assert_ne!(a, StorageKey::derive("Library", 7, date(2025, 1, 2)));
    }

    #[test]
    fn record_key_uses_receipt_date_in_utc() {
        let received_at = "2025-06-30T23:59:59Z".parse::<DateTime<Utc>>().unwrap();
        let record = AlertRecord::new(
            AlertPayload {
                building_id: "Science".into(),
                floor_id: "Floor-3".into(),
                wattage: 4800.0,
                timestamp: 1_700_000_000,
                message: "spike".into(),
            },
            received_at,
        );
        assert_eq!(
            record.base_key().object_key(),
            "alerts/2025-06-30/alert_Science_1700000000.json"
        );
    }

    #[test]
    fn response_is_tagged_by_status() {
        let body = serde_json::to_value(AlertResponse::Logged {
            s3_key: "alert_A_1.json".into(),
            key: "alerts/2025-01-01/alert_A_1.json".into(),
        })
        .unwrap();
        assert_eq!(body["status"], "logged");
        assert_eq!(body["s3_key"], "alert_A_1.json");

        let body = serde_json::to_value(AlertResponse::Degraded {
            reason: "down".into(),
            fallback_sequence: 4,
        })
        .unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["fallback_sequence"], 4);
    }
}
