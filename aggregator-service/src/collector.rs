//! Reading validation, per-building anomaly state, and alert emission.

use std::collections::HashMap;

use proto::energy::{AlertPayload, EnergyReading};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::detector::{AnomalyState, BuildingWindow, DetectorConfig, Verdict};

#[derive(Debug, Error, PartialEq)]
pub enum ReadingError {
    #[error("building_id is empty")]
    EmptyBuildingId,
    #[error("floor_id is empty")]
    EmptyFloorId,
    #[error("current_wattage {0} is negative or not finite")]
    InvalidWattage(f64),
}

/// Reject readings that break the data model.
pub fn validate(reading: &EnergyReading) -> Result<(), ReadingError> {
    if reading.building_id.trim().is_empty() {
        return Err(ReadingError::EmptyBuildingId);
    }
    if reading.floor_id.trim().is_empty() {
        return Err(ReadingError::EmptyFloorId);
    }
    if !reading.current_wattage.is_finite() || reading.current_wattage < 0.0 {
        return Err(ReadingError::InvalidWattage(reading.current_wattage));
    }
    Ok(())
}

/// Shared across every stream: a building reported by two simulators has a
/// single window, serialized by one mutex.
pub struct Collector {
    config: DetectorConfig,
    buildings: Mutex<HashMap<String, BuildingWindow>>,
    alerts: mpsc::Sender<AlertPayload>,
}

impl Collector {
    pub fn new(config: DetectorConfig, alerts: mpsc::Sender<AlertPayload>) -> Self {
        Self {
            config,
            buildings: Mutex::new(HashMap::new()),
            alerts,
        }
    }

    /// Score one reading; returns the alert if this reading opened a new
    /// anomaly. The alert has already been queued for delivery.
    pub async fn process(&self, reading: &EnergyReading) -> Result<Option<AlertPayload>, ReadingError> {
        validate(reading)?;

        let verdict = {
            let mut buildings = self.buildings.lock().await;
            buildings
                .entry(reading.building_id.clone())
                .or_insert_with(|| BuildingWindow::new(self.config.window_size))
                .observe(reading.current_wattage, &self.config)
        };

        debug!(
            building_id = %reading.building_id,
            floor_id = %reading.floor_id,
            wattage = reading.current_wattage,
            timestamp = reading.timestamp,
            ?verdict,
            "reading scored"
        );

        let Verdict::Anomalous { z_score, transition: true } = verdict else {
            return Ok(None);
        };

        warn!(
            building_id = %reading.building_id,
            wattage = reading.current_wattage,
            z_score,
            "anomaly detected"
        );

        let alert = AlertPayload {
            building_id: reading.building_id.clone(),
            floor_id: reading.floor_id.clone(),
            wattage: reading.current_wattage,
            timestamp: reading.timestamp,
            message: format!(
                "z-score anomaly: {z_score:.2} (threshold {:.1})",
                self.config.z_threshold
            ),
        };

        if self.alerts.send(alert.clone()).await.is_err() {
            error!(
                building_id = %alert.building_id,
                timestamp = alert.timestamp,
                "alert dispatcher closed, alert not delivered"
            );
        }
        Ok(Some(alert))
    }

    pub async fn building_state(&self, building_id: &str) -> Option<AnomalyState> {
        self.buildings
            .lock()
            .await
            .get(building_id)
            .map(BuildingWindow::state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(building: &str, wattage: f64, ts: i64) -> EnergyReading {
        EnergyReading {
            building_id: building.into(),
            floor_id: "Floor-1".into(),
            current_wattage: wattage,
            voltage: 120.0,
            timestamp: ts,
        }
    }

    async fn warm(collector: &Collector, building: &str) {
        for i in 0..10 {
            let w = if i % 2 == 0 { 690.0 } else { 710.0 };
            assert_eq!(collector.process(&reading(building, w, i)).await, Ok(None));
        }
    }

    #[test]
    fn validation_rules() {
        assert_eq!(validate(&reading("", 1.0, 1)), Err(ReadingError::EmptyBuildingId));
        let mut r = reading("Library", 1.0, 1);
        r.floor_id = " ".into();
        assert_eq!(validate(&r), Err(ReadingError::EmptyFloorId));
        assert!(matches!(
            validate(&reading("Library", -1.0, 1)),
            Err(ReadingError::InvalidWattage(_))
        ));
        assert!(validate(&reading("Library", f64::NAN, 1)).is_err());
        assert!(validate(&reading("Library", 0.0, 1)).is_ok());
    }

    #[tokio::test]
    async fn sustained_spike_emits_one_alert() {
        let (tx, mut rx) = mpsc::channel(16);
        let collector = Collector::new(DetectorConfig::default(), tx);
        warm(&collector, "Engineering").await;

        let alert = collector
            .process(&reading("Engineering", 5200.0, 20))
            .await
            .unwrap()
            .expect("spike must alert");
        assert_eq!(alert.wattage, 5200.0);
        assert_eq!(alert.timestamp, 20);
        assert_eq!(alert.floor_id, "Floor-1");

        for ts in 21..25 {
            assert_eq!(collector.process(&reading("Engineering", 5300.0, ts)).await, Ok(None));
        }

        assert_eq!(rx.recv().await.unwrap(), alert);
        assert!(rx.try_recv().is_err());
        assert_eq!(
            collector.building_state("Engineering").await,
            Some(AnomalyState::Anomalous)
        );
    }

    #[tokio::test]
    async fn spike_after_level_shift_alerts_again() {
        let (tx, mut rx) = mpsc::channel(16);
        let collector = Collector::new(DetectorConfig::default(), tx);
        warm(&collector, "Engineering").await;

        assert!(collector.process(&reading("Engineering", 2000.0, 10)).await.unwrap().is_some());
        for ts in 11..511 {
            let w = if ts % 2 == 0 { 1990.0 } else { 2010.0 };
            assert_eq!(collector.process(&reading("Engineering", w, ts)).await, Ok(None));
        }
        assert_eq!(
            collector.building_state("Engineering").await,
            Some(AnomalyState::Normal)
        );

        let second = collector
            .process(&reading("Engineering", 6000.0, 511))
            .await
            .unwrap()
            .expect("new anomaly after level shift must alert");
        assert_eq!(rx.recv().await.unwrap().wattage, 2000.0);
        assert_eq!(rx.recv().await.unwrap(), second);
    }

    #[tokio::test]
    async fn buildings_are_isolated() {
        let (tx, _rx) = mpsc::channel(16);
        let collector = Collector::new(DetectorConfig::default(), tx);
        warm(&collector, "Science").await;
        warm(&collector, "Library").await;

        assert!(collector.process(&reading("Science", 5000.0, 30)).await.unwrap().is_some());
        assert_eq!(collector.building_state("Library").await, Some(AnomalyState::Normal));
        assert!(collector.process(&reading("Library", 5000.0, 31)).await.unwrap().is_some());
        assert_eq!(collector.building_state("DormA").await, None);
    }

    #[tokio::test]
    async fn invalid_reading_leaves_state_untouched() {
        let (tx, _rx) = mpsc::channel(16);
        let collector = Collector::new(DetectorConfig::default(), tx);
        assert!(collector.process(&reading("Science", -5.0, 1)).await.is_err());
        assert_eq!(collector.building_state("Science").await, None);
    }

    #[tokio::test]
    async fn closed_dispatcher_does_not_fail_processing() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let collector = Collector::new(DetectorConfig::default(), tx);
        warm(&collector, "DormA").await;
        assert!(collector.process(&reading("DormA", 5000.0, 40)).await.unwrap().is_some());
    }
}
