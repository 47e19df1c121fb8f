//! Synthetic sensor traffic.
//!
//! [`ReadingGenerator`] yields an endless sequence of [`EnergyReading`]s with
//! an occasional injected spike. Iterate it directly for untimed batches, or
//! call [`ReadingGenerator::into_stream`] for paced emission over gRPC.

use std::ops::Range;
use std::time::Duration;

use proto::energy::EnergyReading;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Voltage reported by every simulated sensor.
pub const NOMINAL_VOLTAGE: f64 = 120.0;
pub const DEFAULT_SPIKE_PROBABILITY: f64 = 0.05;

// ------------------------------------------------------------------ //
//  Configuration                                                      //
// ------------------------------------------------------------------ //

/// Knobs for the generated traffic.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Buildings picked uniformly at random for each reading.
    pub buildings: Vec<String>,
    /// Floors are numbered `1..=floors`.
    pub floors: u32,
    /// Probability that a reading is drawn from `spike_range`.
    pub spike_probability: f64,
    pub normal_range: Range<f64>,
    pub spike_range: Range<f64>,
    pub voltage: f64,
    /// Delay between two emitted readings (stream mode only).
    pub interval: Duration,
    /// Fixed RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            buildings: default_buildings(),
            floors: 4,
            spike_probability: DEFAULT_SPIKE_PROBABILITY,
            normal_range: 500.0..1000.0,
            spike_range: 4000.0..6000.0,
            voltage: NOMINAL_VOLTAGE,
            interval: Duration::from_millis(500),
            seed: None,
        }
    }
}

fn default_buildings() -> Vec<String> {
    ["Engineering", "Science", "Library", "DormA"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ------------------------------------------------------------------ //
//  Generator                                                          //
// ------------------------------------------------------------------ //

/// Infinite, non-restartable source of readings.
#[derive(Debug)]
pub struct ReadingGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    last_timestamp: i64,
}

impl ReadingGenerator {
    pub fn new(mut config: GeneratorConfig) -> Self {
        if config.buildings.is_empty() {
            config.buildings = default_buildings();
        }
        config.floors = config.floors.max(1);
        config.spike_probability = if config.spike_probability.is_finite() {
            config.spike_probability.clamp(0.0, 1.0)
        } else {
            DEFAULT_SPIKE_PROBABILITY
        };

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            last_timestamp: i64::MIN,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Produce the next reading stamped with `now` (unix seconds).
    ///
    /// Timestamps never go backwards: if `now` is older than the previous
    /// reading the previous timestamp is reused.
    pub fn next_at(&mut self, now: i64) -> EnergyReading {
        let building_idx = self.rng.gen_range(0..self.config.buildings.len());
        let floor = self.rng.gen_range(1..=self.config.floors);

        let is_spike = self.rng.gen_bool(self.config.spike_probability);
        let range = if is_spike {
            self.config.spike_range.clone()
        } else {
            self.config.normal_range.clone()
        };
        let wattage = self.rng.gen_range(range);

        let timestamp = now.max(self.last_timestamp);
        self.last_timestamp = timestamp;

        let building_id = self.config.buildings[building_idx].clone();
        if is_spike {
            debug!(building_id = %building_id, wattage, "generating spike");
        }

        EnergyReading {
            building_id,
            floor_id: format!("Floor-{floor}"),
            current_wattage: wattage,
            voltage: self.config.voltage,
            timestamp,
        }
    }

    /// Move the generator onto a task that emits one reading per interval.
    ///
    /// The channel holds a single reading, so a slow consumer blocks the
    /// producer instead of growing a queue. The stream ends cleanly when
    /// `shutdown` flips (or its sender is dropped); the producer also stops
    /// as soon as the returned stream is dropped.
    pub fn into_stream(mut self, mut shutdown: watch::Receiver<bool>) -> ReceiverStream<EnergyReading> {
        let (tx, rx) = mpsc::channel(1);
        let interval = self.config.interval;

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let reading = self.next_at(chrono::Utc::now().timestamp());

                tokio::select! {
                    sent = tx.send(reading) => {
                        if sent.is_err() {
                            debug!("reading consumer dropped, generator stopping");
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

impl Iterator for ReadingGenerator {
    type Item = EnergyReading;

    fn next(&mut self) -> Option<EnergyReading> {
        Some(self.next_at(chrono::Utc::now().timestamp()))
    }
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn seeded(spike_probability: f64) -> ReadingGenerator {
        ReadingGenerator::new(GeneratorConfig {
            spike_probability,
            interval: Duration::from_millis(1),
            seed: Some(7),
            ..GeneratorConfig::default()
        })
    }

    #[test]
    fn readings_respect_value_invariants() {
        let generator = seeded(0.05);
        for r in generator.take(2_000) {
            assert!(r.current_wattage >= 0.0);
            assert!((r.voltage - NOMINAL_VOLTAGE).abs() < 1e-9);
            assert!(!r.building_id.is_empty());
            assert!(r.floor_id.starts_with("Floor-"));
            let floor: u32 = r.floor_id["Floor-".len()..].parse().unwrap();
            assert!((1..=4).contains(&floor));
        }
    }

    #[test]
    fn spike_fraction_tracks_probability() {
        let n = 10_000;
        let spikes = seeded(0.05)
            .take(n)
            .filter(|r| r.current_wattage >= 4000.0)
            .count();
        let fraction = spikes as f64 / n as f64;
        assert!(
            (fraction - 0.05).abs() < 0.01,
            "observed spike fraction {fraction}"
        );
    }

    #[test]
    fn non_finite_probability_falls_back_to_default() {
        for p in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let generator = seeded(p);
            assert_eq!(generator.config().spike_probability, DEFAULT_SPIKE_PROBABILITY);
            assert_eq!(generator.take(100).count(), 100);
        }
        assert_eq!(seeded(7.5).config().spike_probability, 1.0);
    }

    #[test]
    fn zero_probability_never_spikes() {
        assert!(seeded(0.0)
            .take(1_000)
            .all(|r| (500.0..1000.0).contains(&r.current_wattage)));
    }

    #[test]
    fn full_probability_always_spikes() {
        assert!(seeded(1.0)
            .take(1_000)
            .all(|r| (4000.0..6000.0).contains(&r.current_wattage)));
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = seeded(0.2);
        let mut b = seeded(0.2);
        for ts in 0..50 {
            assert_eq!(a.next_at(ts), b.next_at(ts));
        }
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut generator = seeded(0.05);
        assert_eq!(generator.next_at(100).timestamp, 100);
        assert_eq!(generator.next_at(90).timestamp, 100);
        assert_eq!(generator.next_at(101).timestamp, 101);
    }

    #[test]
    fn empty_building_list_falls_back_to_defaults() {
        let mut generator = ReadingGenerator::new(GeneratorConfig {
            buildings: vec![],
            floors: 0,
            ..GeneratorConfig::default()
        });
        let r = generator.next_at(1);
        assert!(default_buildings().contains(&r.building_id));
        assert_eq!(r.floor_id, "Floor-1");
    }

    #[tokio::test]
    async fn stream_ends_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut stream = seeded(0.05).into_stream(rx);

        for _ in 0..3 {
            assert!(stream.next().await.is_some());
        }
        tx.send(true).unwrap();

        // At most the reading already parked in the channel remains.
        let rest: Vec<_> = stream.collect().await;
        assert!(rest.len() <= 1);
    }

    #[tokio::test]
    async fn stream_timestamps_are_ordered() {
        let (_tx, rx) = watch::channel(false);
        let readings: Vec<_> = seeded(0.05).into_stream(rx).take(5).collect().await;
        assert_eq!(readings.len(), 5);
        assert!(readings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
