//! Publish Bridge - HTTP-triggered broker publisher with Prometheus metrics
//!
//! This crate exposes a small HTTP control surface that publishes a message
//! to a broker on request, records the outcome as metrics, and shuts down
//! gracefully within a bounded deadline.

pub mod broker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod publish;
pub mod service;

// Re-export commonly used types and traits
pub use error::{BridgeError, Result};

// Re-export key components
pub use broker::{Broker, InMemoryBroker, Producer};
pub use config::AppConfig;
pub use metrics::{MetricsCollector, PublishMetrics};
pub use publish::{PublishAction, PublishClient, SendMode};
pub use service::{LifecycleController, LifecycleState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
