//! StreamEnergyData gRPC handler.

use std::sync::Arc;

use proto::energy::{
    energy_sensor_server::EnergySensor, EnergyReading, StreamResponse,
};
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use crate::collector::Collector;
use crate::metrics::Metrics;

// ------------------------------------------------------------------ //
//  Per-stream bookkeeping                                             //
// ------------------------------------------------------------------ //

/// Counters for one client stream; never shared between streams.
#[derive(Debug, Default)]
pub struct StreamSummary {
    pub processed: u64,
    pub rejected: u64,
    pub out_of_order: u64,
    pub alerts: u64,
    /// Timestamp of the latest accepted reading.
    pub last_timestamp: Option<i64>,
    /// Highest timestamp seen on the stream; the reference for `out_of_order`.
    pub max_timestamp: Option<i64>,
}

impl StreamSummary {
    fn into_response(self) -> StreamResponse {
        StreamResponse {
            success: true,
            message: "Stream closed".to_string(),
            readings_processed: self.processed,
            readings_rejected: self.rejected,
            out_of_order: self.out_of_order,
            alerts_raised: self.alerts,
            last_timestamp: self.last_timestamp.unwrap_or_default(),
        }
    }
}

// ------------------------------------------------------------------ //
//  gRPC service implementation                                        //
// ------------------------------------------------------------------ //

pub struct EnergySensorService {
    collector: Arc<Collector>,
    metrics: Arc<Metrics>,
}

impl EnergySensorService {
    pub fn new(collector: Arc<Collector>, metrics: Arc<Metrics>) -> Self {
        Self { collector, metrics }
    }

    async fn handle(&self, reading: &EnergyReading, summary: &mut StreamSummary) {
        match summary.max_timestamp {
            Some(max) if reading.timestamp < max => {
                summary.out_of_order += 1;
                warn!(
                    building_id = %reading.building_id,
                    timestamp = reading.timestamp,
                    newest = max,
                    "reading arrived out of order"
                );
            }
            _ => summary.max_timestamp = Some(reading.timestamp),
        }

        match self.collector.process(reading).await {
            Ok(alert) => {
                summary.processed += 1;
                summary.last_timestamp = Some(reading.timestamp);
                self.metrics.record_reading(reading);
                if alert.is_some() {
                    summary.alerts += 1;
                }
            }
            Err(e) => {
                summary.rejected += 1;
                warn!(error = %e, building_id = %reading.building_id, "reading rejected");
            }
        }
    }
}

#[tonic::async_trait]
impl EnergySensor for EnergySensorService {
    async fn stream_energy_data(
        &self,
        request: Request<Streaming<EnergyReading>>,
    ) -> Result<Response<StreamResponse>, Status> {
        let peer = request.remote_addr();
        let mut stream = request.into_inner();
        let mut summary = StreamSummary::default();

        info!(?peer, "new stream connection established");

        loop {
            match stream.message().await {
                Ok(Some(reading)) => self.handle(&reading, &mut summary).await,
                Ok(None) => {
                    info!(
                        ?peer,
                        processed = summary.processed,
                        rejected = summary.rejected,
                        out_of_order = summary.out_of_order,
                        alerts = summary.alerts,
                        "stream closed by client"
                    );
                    return Ok(Response::new(summary.into_response()));
                }
                Err(status) => {
                    // Transport failure, not end-of-stream: the client gets no
                    // summary and must treat unacknowledged readings as lost.
                    warn!(
                        ?peer,
                        processed = summary.processed,
                        code = ?status.code(),
                        error = %status.message(),
                        "stream ended with transport error"
                    );
                    return Err(status);
                }
            }
        }
    }
}
