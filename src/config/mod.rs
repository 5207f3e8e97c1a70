//! Configuration management for the publish bridge
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values.

pub mod app;
pub mod broker;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, HttpSettings, PublishSettings, ServiceSettings};
pub use broker::{BrokerKind, BrokerSettings, MemoryBrokerSettings};
