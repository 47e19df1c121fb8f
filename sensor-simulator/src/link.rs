//! Connection lifecycle for one simulator → aggregator stream.
//!
//! A [`SensorLink`] walks `Disconnected → Connecting → Streaming` and ends
//! in `Closed` (the server acknowledged end-of-stream) or `Failed`.
//! Connection attempts are paced by a [`BackoffPolicy`].
//!
//! Delivery is at-most-once: readings pushed before a transport failure are
//! only known to be processed if the server's summary says so.

use std::time::Duration;

use proto::energy::{energy_sensor_client::EnergySensorClient, EnergyReading, StreamResponse};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio_stream::Stream;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::{info, warn};

// ------------------------------------------------------------------ //
//  Backoff                                                            //
// ------------------------------------------------------------------ //

/// Exponential backoff with a ceiling and a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay added to each wait.
    pub jitter: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait after the given failed attempt (1-indexed), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32, rng: &mut StdRng) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter.is_zero() {
            return base;
        }
        let extra = rng.gen_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(extra)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500), Duration::from_secs(10))
            .with_jitter(Duration::from_millis(100))
    }
}

// ------------------------------------------------------------------ //
//  State / errors                                                     //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting { attempt: u32 },
    Streaming,
    Closed,
    Failed,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid aggregator target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("aggregator unreachable after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: tonic::transport::Error,
    },
    /// The stream broke before the server acknowledged end-of-stream.
    #[error("stream transport failed: {0}")]
    Transport(#[from] tonic::Status),
}

// ------------------------------------------------------------------ //
//  Link                                                               //
// ------------------------------------------------------------------ //

pub struct SensorLink {
    target: String,
    endpoint: Endpoint,
    policy: BackoffPolicy,
    state: LinkState,
    rng: StdRng,
}

impl SensorLink {
    pub fn new(target: &str, policy: BackoffPolicy) -> Result<Self, LinkError> {
        let endpoint =
            Endpoint::from_shared(target.to_string()).map_err(|e| LinkError::InvalidTarget {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            target: target.to_string(),
            endpoint,
            policy,
            state: LinkState::Disconnected,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            info!(target_addr = %self.target, from = ?self.state, to = ?next, "link state change");
            self.state = next;
        }
    }

    /// Connect to the aggregator, retrying with backoff until the policy's
    /// attempt budget is spent.
    pub async fn connect(&mut self) -> Result<EnergySensorClient<Channel>, LinkError> {
        self.transition(LinkState::Disconnected);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.transition(LinkState::Connecting { attempt });

            match self.endpoint.connect().await {
                Ok(channel) => return Ok(EnergySensorClient::new(channel)),
                Err(e) if attempt >= self.policy.max_attempts => {
                    self.transition(LinkState::Failed);
                    return Err(LinkError::Connect {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.policy.jittered_delay(attempt, &mut self.rng);
                    warn!(
                        target_addr = %self.target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "aggregator not reachable yet"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Push `readings` until the stream ends, then return the server summary.
    pub async fn stream<S>(
        &mut self,
        client: &mut EnergySensorClient<Channel>,
        readings: S,
    ) -> Result<StreamResponse, LinkError>
    where
        S: Stream<Item = EnergyReading> + Send + 'static,
    {
        self.transition(LinkState::Streaming);
        match client.stream_energy_data(Request::new(readings)).await {
            Ok(resp) => {
                self.transition(LinkState::Closed);
                Ok(resp.into_inner())
            }
            Err(status) => {
                self.transition(LinkState::Failed);
                Err(LinkError::Transport(status))
            }
        }
    }
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_then_caps() {
        let policy = BackoffPolicy::new(5, Duration::from_millis(200), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for(40), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(Duration::from_millis(50));
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let d = policy.jittered_delay(1, &mut rng);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = BackoffPolicy::new(0, Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn rejects_malformed_target() {
        let err = SensorLink::new("http://bad host:50051", BackoffPolicy::default())
            .err()
            .expect("target must be rejected");
        assert!(matches!(err, LinkError::InvalidTarget { .. }));
    }

    #[tokio::test]
    async fn unreachable_server_fails_after_budget() {
        // Nothing listens on port 1 in the test environment.
        let policy = BackoffPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2));
        let mut link = SensorLink::new("http://127.0.0.1:1", policy).unwrap();

        let err = link.connect().await.err().expect("connect must fail");
        assert!(matches!(err, LinkError::Connect { attempts: 2, .. }));
        assert_eq!(link.state(), LinkState::Failed);
    }
}
