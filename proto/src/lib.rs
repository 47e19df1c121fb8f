//! Compiled protobuf / gRPC types shared across the workspace.
//!
//! Client and server stubs are generated at build time from
//! `protos/energy_sensor.proto`.

/// Sensor readings, the streaming ingestion service and the alert payload.
pub mod energy {
    tonic::include_proto!("energy");
}
