//! Metrics for the publish bridge
//!
//! `PublishMetrics` holds the publish outcome instruments; `MetricsCollector`
//! owns the Prometheus registry they are exported from.

pub mod collector;
pub mod registry;

pub use collector::{MetricsCollector, MetricsTimer};
pub use registry::{MetricsSnapshot, PublishMetrics, NAMESPACE};
