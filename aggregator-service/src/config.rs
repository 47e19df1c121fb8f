//! Aggregator runtime configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::detector::DetectorConfig;
use crate::dispatcher::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub listen_addr: SocketAddr,
    pub alert_service_url: String,
    pub metrics_addr: SocketAddr,
    pub shutdown_grace: Duration,
    pub detector: DetectorConfig,
    pub alert_retry: RetryPolicy,
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_addr = lookup("AGGREGATOR_ADDR").unwrap_or_else(|| "0.0.0.0:50051".to_string());
        let listen_addr = raw_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid("AGGREGATOR_ADDR".to_string(), e.to_string())
            })?;

        let alert_service_url = lookup("ALERT_SERVICE_URL")
            .unwrap_or_else(|| "http://localhost:8000/alert".to_string());

        let raw_metrics = lookup("METRICS_ADDR").unwrap_or_else(|| "0.0.0.0:2112".to_string());
        let metrics_addr = raw_metrics
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid("METRICS_ADDR".to_string(), e.to_string())
            })?;

        let grace_secs = match lookup("SHUTDOWN_GRACE_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                ConfigError::Invalid("SHUTDOWN_GRACE_SECS".to_string(), e.to_string())
            })?,
            None => 10,
        };

        Ok(Self {
            listen_addr,
            alert_service_url,
            metrics_addr,
            shutdown_grace: Duration::from_secs(grace_secs),
            detector: DetectorConfig::default(),
            alert_retry: RetryPolicy::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = AggregatorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:50051".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.alert_service_url, "http://localhost:8000/alert");
        assert_eq!(cfg.metrics_addr, "0.0.0.0:2112".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(10));
        assert_eq!(cfg.detector.window_size, 10);
    }

    #[test]
    fn overrides_and_errors() {
        let cfg = AggregatorConfig::from_lookup(|key| match key {
            "AGGREGATOR_ADDR" => Some("127.0.0.1:6000".into()),
            "ALERT_SERVICE_URL" => Some("http://alert-service:8000/alert".into()),
            "SHUTDOWN_GRACE_SECS" => Some("3".into()),
            "METRICS_ADDR" => Some("127.0.0.1:9112".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.listen_addr.port(), 6000);
        assert_eq!(cfg.metrics_addr.port(), 9112);
        assert_eq!(cfg.alert_service_url, "http://alert-service:8000/alert");
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(3));

        let bad = AggregatorConfig::from_lookup(|key| {
            (key == "AGGREGATOR_ADDR").then(|| "not-an-addr".to_string())
        });
        assert!(matches!(bad, Err(ConfigError::Invalid(k, _)) if k == "AGGREGATOR_ADDR"));

        let bad = AggregatorConfig::from_lookup(|key| {
            (key == "METRICS_ADDR").then(|| ":2112".to_string())
        });
        assert!(matches!(bad, Err(ConfigError::Invalid(k, _)) if k == "METRICS_ADDR"));
    }
}
