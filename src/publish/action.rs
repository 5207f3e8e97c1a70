//! Publish action
//!
//! One control request becomes one timed publish attempt whose outcome is
//! recorded in the publish metrics.

use crate::error::Result;
use crate::metrics::{MetricsTimer, PublishMetrics};
use crate::publish::client::PublishClient;
use crate::publish::SendMode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Times a publish and records the outcome
#[derive(Clone)]
pub struct PublishAction {
    client: Arc<PublishClient>,
    metrics: Arc<PublishMetrics>,
    mode: SendMode,
    default_payload: Vec<u8>,
}

impl PublishAction {
    pub fn new(
        client: Arc<PublishClient>,
        metrics: Arc<PublishMetrics>,
        mode: SendMode,
        default_payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            client,
            metrics,
            mode,
            default_payload: default_payload.into(),
        }
    }

    pub fn mode(&self) -> SendMode {
        self.mode
    }

    pub fn destination(&self) -> &str {
        self.client.destination()
    }

    /// Publish `payload` (or the default payload when empty)
    ///
    /// Returns the send duration on success. Both send modes record
    /// failures.
    pub async fn execute(&self, payload: &[u8]) -> Result<Duration> {
        self.metrics.record_received();

        let payload = if payload.is_empty() {
            self.default_payload.clone()
        } else {
            payload.to_vec()
        };

        let timer = MetricsTimer::new();
        let outcome = match self.mode {
            SendMode::Sync => self.client.send(payload).await,
            SendMode::Async => self.client.send_async(payload).await,
        };
        let elapsed = timer.stop();

        match outcome {
            Ok(()) => {
                self.metrics.record_sent(elapsed);
                debug!(
                    "Published to '{}' in {:?} ({:?} mode)",
                    self.client.destination(),
                    elapsed,
                    self.mode
                );
                Ok(elapsed)
            }
            Err(e) => {
                self.metrics.record_failed();
                warn!(
                    "Publish to '{}' failed after {:?}: {}",
                    self.client.destination(),
                    elapsed,
                    e
                );
                Err(e)
            }
        }
    }
}
