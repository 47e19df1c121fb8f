//! Alert service runtime configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

#[derive(Debug, Clone)]
pub struct AlertServiceConfig {
    pub listen_addr: SocketAddr,
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub fallback_path: PathBuf,
    pub reconcile_interval: Duration,
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
}

impl AlertServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_addr = lookup("ALERT_SERVICE_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let listen_addr = raw_addr.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::Invalid("ALERT_SERVICE_ADDR".to_string(), e.to_string())
        })?;

        let bucket = lookup("S3_BUCKET_NAME").unwrap_or_else(|| "smart-campus-alerts-dev".to_string());
        if bucket.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "S3_BUCKET_NAME".to_string(),
                "must not be empty".to_string(),
            ));
        }
        let region = lookup("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());
        let endpoint =
            lookup("S3_ENDPOINT").unwrap_or_else(|| format!("https://s3.{region}.amazonaws.com"));

        let fallback_path = lookup("ALERT_FALLBACK_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("alert-fallback.jsonl"));

        let reconcile_secs = secs(&lookup, "ALERT_RECONCILE_INTERVAL_SECS", 30)?;
        if reconcile_secs == 0 {
            return Err(ConfigError::Invalid(
                "ALERT_RECONCILE_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            listen_addr,
            bucket,
            region,
            endpoint,
            fallback_path,
            reconcile_interval: Duration::from_secs(reconcile_secs),
            shutdown_grace: Duration::from_secs(secs(&lookup, "SHUTDOWN_GRACE_SECS", 10)?),
            retry: RetryPolicy::default(),
        })
    }
}

fn secs<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::Invalid(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = AlertServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.bucket, "smart-campus-alerts-dev");
        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.endpoint, "https://s3.us-east-1.amazonaws.com");
        assert_eq!(cfg.fallback_path, PathBuf::from("alert-fallback.jsonl"));
        assert_eq!(cfg.reconcile_interval, Duration::from_secs(30));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(10));
        assert_eq!(cfg.retry.attempts, 3);
    }

    #[test]
    fn endpoint_follows_region_unless_set() {
        let cfg = AlertServiceConfig::from_lookup(|key| match key {
            "AWS_REGION" => Some("eu-central-1".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.endpoint, "https://s3.eu-central-1.amazonaws.com");

        let cfg = AlertServiceConfig::from_lookup(|key| match key {
            "AWS_REGION" => Some("eu-central-1".into()),
            "S3_ENDPOINT" => Some("http://minio:9000".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.endpoint, "http://minio:9000");
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = AlertServiceConfig::from_lookup(|key| match key {
            "ALERT_RECONCILE_INTERVAL_SECS" => Some("soon".into()),
            _ => None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("ALERT_RECONCILE_INTERVAL_SECS"));

        assert!(AlertServiceConfig::from_lookup(|key| match key {
            "ALERT_RECONCILE_INTERVAL_SECS" => Some("0".into()),
            _ => None,
        })
        .is_err());
        assert!(AlertServiceConfig::from_lookup(|key| match key {
            "ALERT_SERVICE_ADDR" => Some("localhost".into()),
            _ => None,
        })
        .is_err());
    }
}
