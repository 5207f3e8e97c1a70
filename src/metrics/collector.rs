//! Metrics collection using Prometheus
//!
//! The collector owns a dedicated Prometheus registry holding the publish
//! instruments, a build-info gauge and (on Linux) process statistics.

use crate::metrics::registry::{PublishMetrics, NAMESPACE};
use anyhow::Result;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the publish bridge
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Publish outcome instruments
    publish: Arc<PublishMetrics>,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let publish = Arc::new(PublishMetrics::new()?);
        registry.register(Box::new(publish.as_ref().clone()))?;

        let build_info = IntGaugeVec::new(
            Opts::new("build_info", "Build information of the publish bridge.")
                .namespace(NAMESPACE),
            &["version"],
        )?;
        build_info.with_label_values(&[crate::VERSION]).set(1);
        registry.register(Box::new(build_info))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self { registry, publish })
    }

    /// Get the publish instruments
    pub fn publish(&self) -> Arc<PublishMetrics> {
        self.publish.clone()
    }

    /// Content type of [`encode_text`](Self::encode_text) output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Render every registered metric in the text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        TextEncoder::new()
            .encode_to_string(&metric_families)
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl Default for MetricsTimer {
    fn default() -> Self {
        Self::new()
    }
}
