//! Aggregator service: consumes reading streams and raises alerts.
//!
//! Each simulator connection is one client-streaming RPC handled by
//! [`service::EnergySensorService`]. Readings are scored by the shared
//! [`collector::Collector`]; alerts flow through [`dispatcher`] to an
//! [`alert_sink::AlertSink`]. The latest wattage per floor is exported for
//! Prometheus by [`metrics`].

pub mod alert_sink;
pub mod collector;
pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod metrics;
pub mod service;
