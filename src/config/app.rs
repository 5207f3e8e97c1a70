//! Main application configuration
//!
//! This module defines the configuration for the publish bridge, loaded
//! from a TOML file or from environment variables, and its validation.

use crate::broker::Compression;
use crate::config::broker::{BrokerKind, BrokerSettings};
use crate::publish::{ClientOptions, RetryPolicy, SendMode};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub http: HttpSettings,
    pub broker: BrokerSettings,
    pub publish: PublishSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Graceful shutdown deadline in seconds
    pub shutdown_timeout_seconds: u64,
    /// Profiling endpoints (not served by this build)
    pub profiling_enabled: bool,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
}

/// Per-request publishing behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub mode: SendMode,
    /// Payload sent when the control request has no body
    pub default_payload: String,
    /// Timeout for a single publish attempt in milliseconds (0 = none)
    pub publish_timeout_ms: u64,
    /// Retries after a failed attempt (0 = no retry)
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "publish-bridge".to_string(),
            log_level: "info".to_string(),
            shutdown_timeout_seconds: 10,
            profiling_enabled: false,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            mode: SendMode::Sync,
            default_payload: "test message".to_string(),
            publish_timeout_ms: 0,
            max_retries: 0,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: String) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: {}", name, value))
}

impl AppConfig {
    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("BRIDGE_SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("BRIDGE_LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(timeout) = env::var("BRIDGE_SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds =
                parse_env("BRIDGE_SHUTDOWN_TIMEOUT_SECONDS", timeout)?;
        }
        if let Ok(profiling) = env::var("BRIDGE_PROFILING_ENABLED") {
            config.service.profiling_enabled = parse_env("BRIDGE_PROFILING_ENABLED", profiling)?;
        }

        // HTTP settings
        if let Ok(host) = env::var("BRIDGE_HTTP_HOST") {
            config.http.host = host;
        }
        if let Ok(port) = env::var("BRIDGE_HTTP_PORT") {
            config.http.port = parse_env("BRIDGE_HTTP_PORT", port)?;
        }

        // Broker settings
        if let Ok(kind) = env::var("BRIDGE_BROKER_KIND") {
            config.broker.kind = kind.parse::<BrokerKind>().map_err(|e| anyhow!(e))?;
        }
        if let Ok(url) = env::var("BRIDGE_BROKER_URL") {
            config.broker.url = url;
        }
        if let Ok(destination) = env::var("BRIDGE_DESTINATION") {
            config.broker.destination = destination;
        }
        if let Ok(compression) = env::var("BRIDGE_COMPRESSION") {
            config.broker.compression = compression
                .parse::<Compression>()
                .map_err(|e| anyhow!(e))?;
        }
        if let Ok(path) = env::var("BRIDGE_TLS_CERT_PATH") {
            config.broker.tls_cert_path = Some(path.into());
        }
        if let Ok(path) = env::var("BRIDGE_TLS_KEY_PATH") {
            config.broker.tls_key_path = Some(path.into());
        }
        if let Ok(path) = env::var("BRIDGE_TLS_CA_PATH") {
            config.broker.tls_ca_path = Some(path.into());
        }
        if let Ok(retries) = env::var("BRIDGE_CONNECT_RETRIES") {
            config.broker.connect_retries = parse_env("BRIDGE_CONNECT_RETRIES", retries)?;
        }

        // Publish settings
        if let Ok(mode) = env::var("BRIDGE_SEND_MODE") {
            config.publish.mode = mode.parse::<SendMode>().map_err(|e| anyhow!(e))?;
        }
        if let Ok(payload) = env::var("BRIDGE_DEFAULT_PAYLOAD") {
            config.publish.default_payload = payload;
        }
        if let Ok(timeout) = env::var("BRIDGE_PUBLISH_TIMEOUT_MS") {
            config.publish.publish_timeout_ms = parse_env("BRIDGE_PUBLISH_TIMEOUT_MS", timeout)?;
        }
        if let Ok(retries) = env::var("BRIDGE_MAX_RETRIES") {
            config.publish.max_retries = parse_env("BRIDGE_MAX_RETRIES", retries)?;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Listener address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http.host, self.http.port)
            .parse()
            .context("Invalid HTTP listen address")
    }

    /// Per-attempt publish timeout, if any
    pub fn publish_timeout(&self) -> Option<Duration> {
        match self.publish.publish_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Publish client options derived from the publish settings
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            publish_timeout: self.publish_timeout(),
            retry: RetryPolicy {
                max_retries: self.publish.max_retries,
                base_delay: Duration::from_millis(self.publish.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.publish.retry_max_delay_ms),
            },
        }
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate listener; port 0 asks the OS for a free port
    config.listen_addr()?;

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    // Validate broker settings
    if config.broker.kind == BrokerKind::Amqp && config.broker.url.is_empty() {
        return Err(anyhow!("Broker URL cannot be empty"));
    }
    if config.broker.destination.is_empty() {
        return Err(anyhow!("Destination cannot be empty"));
    }
    if config.broker.tls_cert_path.is_some() != config.broker.tls_key_path.is_some() {
        return Err(anyhow!(
            "TLS certificate and key must be configured together"
        ));
    }

    // Validate publish settings
    if config.publish.retry_base_delay_ms > config.publish.retry_max_delay_ms {
        return Err(anyhow!(
            "Retry base delay cannot exceed the maximum retry delay"
        ));
    }

    Ok(())
}
