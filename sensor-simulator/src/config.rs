//! Simulator runtime configuration.

use std::time::Duration;

use crate::generator::GeneratorConfig;
use crate::link::BackoffPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Aggregator gRPC endpoint, always with a scheme.
    pub aggregator_target: String,
    pub generator: GeneratorConfig,
    pub backoff: BackoffPolicy,
}

impl SimulatorConfig {
    /// Read configuration from the process environment.
    ///
    /// | Var                           | Default           |
    /// |-------------------------------|-------------------|
    /// | `AGGREGATOR_HOST`             | `localhost:50051` |
    /// | `SIMULATOR_INTERVAL_MS`       | `500`             |
    /// | `SIMULATOR_SPIKE_PROBABILITY` | `0.05`            |
    /// | `SIMULATOR_SEED`              | random            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("AGGREGATOR_HOST").unwrap_or_else(|| "localhost:50051".to_string());

        let mut generator = GeneratorConfig::default();
        if let Some(ms) = parse::<u64>(&lookup, "SIMULATOR_INTERVAL_MS")? {
            generator.interval = Duration::from_millis(ms);
        }
        if let Some(p) = parse::<f64>(&lookup, "SIMULATOR_SPIKE_PROBABILITY")? {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(
                    "SIMULATOR_SPIKE_PROBABILITY".to_string(),
                    format!("{p} is outside [0, 1]"),
                ));
            }
            generator.spike_probability = p;
        }
        generator.seed = parse::<u64>(&lookup, "SIMULATOR_SEED")?;

        Ok(Self {
            aggregator_target: normalize_target(&host),
            generator,
            backoff: BackoffPolicy::default(),
        })
    }
}

/// `AGGREGATOR_HOST` is usually given as `host:port`; tonic wants a URI.
fn normalize_target(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid(key.to_string(), e.to_string())),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = SimulatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.aggregator_target, "http://localhost:50051");
        assert_eq!(cfg.generator.interval, Duration::from_millis(500));
        assert_eq!(cfg.generator.spike_probability, 0.05);
        assert_eq!(cfg.generator.seed, None);
    }

    #[test]
    fn reads_overrides() {
        let cfg = SimulatorConfig::from_lookup(lookup(&[
            ("AGGREGATOR_HOST", "aggregator-service:50051"),
            ("SIMULATOR_INTERVAL_MS", "20"),
            ("SIMULATOR_SPIKE_PROBABILITY", "0.5"),
            ("SIMULATOR_SEED", "42"),
        ]))
        .unwrap();
        assert_eq!(cfg.aggregator_target, "http://aggregator-service:50051");
        assert_eq!(cfg.generator.interval, Duration::from_millis(20));
        assert_eq!(cfg.generator.spike_probability, 0.5);
        assert_eq!(cfg.generator.seed, Some(42));
    }

    #[test]
    fn keeps_explicit_scheme() {
        let cfg =
            SimulatorConfig::from_lookup(lookup(&[("AGGREGATOR_HOST", "https://agg:443")])).unwrap();
        assert_eq!(cfg.aggregator_target, "https://agg:443");
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let err = SimulatorConfig::from_lookup(lookup(&[("SIMULATOR_SPIKE_PROBABILITY", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(key, _) if key == "SIMULATOR_SPIKE_PROBABILITY"));
    }

    #[test]
    fn rejects_garbage_interval() {
        assert!(SimulatorConfig::from_lookup(lookup(&[("SIMULATOR_INTERVAL_MS", "soon")])).is_err());
    }
}
