//! Per-building wattage anomaly detection.
//!
//! Each building keeps a rolling window of its recent normal readings. A new
//! reading is scored against that window (z-score); crossing the threshold
//! moves the building into [`AnomalyState::Anomalous`] and only that
//! transition is reported, so a sustained spike yields a single alert.
//!
//! A run of anomalous readings that settles at a new, steady level is taken
//! as a level shift: the window is reseeded from that run and the building
//! returns to normal, so the next departure from the new level alerts again.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------ //
//  Types                                                              //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyState {
    Normal,
    Anomalous,
}

impl AnomalyState {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyState::Normal    => "NORMAL",
            AnomalyState::Anomalous => "ANOMALOUS",
        }
    }
}

impl std::fmt::Display for AnomalyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detection policy.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Number of normal readings forming the baseline.
    pub window_size: usize,
    /// Absolute z-score above which a reading is anomalous.
    pub z_threshold: f64,
    /// Floor for the baseline standard deviation, so a perfectly flat
    /// baseline still yields finite scores.
    pub min_std_dev: f64,
    /// Consecutive normal readings needed to leave the anomalous state.
    pub recovery_readings: u32,
    /// Consecutive anomalous readings on one side of the baseline, with a
    /// spread inside the threshold band, that reseed the window.
    pub relearn_readings: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            z_threshold: 3.0,
            min_std_dev: 1.0,
            recovery_readings: 3,
            relearn_readings: 10,
        }
    }
}

/// Outcome of scoring one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Baseline not full yet; the reading was absorbed into it.
    WarmingUp,
    Normal { z_score: f64 },
    /// `transition` is true only for the reading that moved the building
    /// from normal to anomalous.
    Anomalous { z_score: f64, transition: bool },
}

impl Verdict {
    pub fn raises_alert(&self) -> bool {
        matches!(self, Verdict::Anomalous { transition: true, .. })
    }
}

// ------------------------------------------------------------------ //
//  Rolling window                                                     //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone)]
pub struct BuildingWindow {
    samples: VecDeque<f64>,
    state: AnomalyState,
    normal_streak: u32,
    shifted: Vec<f64>,
}

impl BuildingWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window_size),
            state: AnomalyState::Normal,
            normal_streak: 0,
            shifted: Vec::new(),
        }
    }

    pub fn state(&self) -> AnomalyState {
        self.state
    }

    /// Score `wattage` against the baseline as it stood before this reading.
    ///
    /// Anomalous readings are kept out of the baseline until they form a
    /// level shift (see [`DetectorConfig::relearn_readings`]).
    pub fn observe(&mut self, wattage: f64, config: &DetectorConfig) -> Verdict {
        let window_size = config.window_size.max(2);
        if self.samples.len() < window_size {
            self.push(wattage, window_size);
            return Verdict::WarmingUp;
        }

        let (mean, std_dev) = mean_std_dev(self.samples.iter().copied());
        let spread = std_dev.max(config.min_std_dev);
        let z_score = (wattage - mean) / spread;

        if z_score.abs() > config.z_threshold {
            self.normal_streak = 0;
            let transition = self.state == AnomalyState::Normal;
            self.state = AnomalyState::Anomalous;
            self.track_shift(wattage, mean, spread, window_size, config);
            return Verdict::Anomalous { z_score, transition };
        }

        self.shifted.clear();
        self.push(wattage, window_size);
        if self.state == AnomalyState::Anomalous {
            self.normal_streak += 1;
            if self.normal_streak >= config.recovery_readings {
                self.state = AnomalyState::Normal;
                self.normal_streak = 0;
            }
        }
        Verdict::Normal { z_score }
    }

    /// Collect consecutive anomalous readings; once enough of them sit on the
    /// same side of the baseline with a tight spread, adopt them as the new
    /// baseline.
    fn track_shift(
        &mut self,
        wattage: f64,
        mean: f64,
        spread: f64,
        window_size: usize,
        config: &DetectorConfig,
    ) {
        let above = wattage > mean;
        if self.shifted.first().is_some_and(|&first| (first > mean) != above) {
            self.shifted.clear();
        }
        self.shifted.push(wattage);

        let needed = config.relearn_readings.max(2);
        if self.shifted.len() < needed {
            return;
        }
        let recent = &self.shifted[self.shifted.len() - needed..];
        let (_, run_std_dev) = mean_std_dev(recent.iter().copied());
        if run_std_dev > config.z_threshold * spread {
            return;
        }

        self.samples.clear();
        let start = recent.len().saturating_sub(window_size);
        self.samples.extend(recent[start..].iter().copied());
        self.shifted.clear();
        self.state = AnomalyState::Normal;
        self.normal_streak = 0;
    }

    fn push(&mut self, wattage: f64, window_size: usize) {
        self.samples.push_back(wattage);
        while self.samples.len() > window_size {
            self.samples.pop_front();
        }
    }
}

/// Mean and population standard deviation. Empty input yields `(0, 0)`.
pub fn mean_std_dev(values: impl IntoIterator<Item = f64> + Clone) -> (f64, f64) {
    let mut n = 0usize;
    let mut sum = 0.0;
    for v in values.clone() {
        sum += v;
        n += 1;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let variance = values.into_iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, variance.sqrt())
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //
