//! Error types for the publish bridge
//!
//! Startup failures (connection, producer creation, listener bind) are fatal
//! for the process. Per-request failures are returned to the HTTP layer.

use crate::broker::BrokerError;
use std::time::Duration;

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the publish client and the lifecycle controller
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Broker connection failed: {source}")]
    Connection {
        #[source]
        source: BrokerError,
    },

    #[error("Failed to create producer for '{destination}': {source}")]
    ProducerCreation {
        destination: String,
        #[source]
        source: BrokerError,
    },

    #[error("Send failed: {source}")]
    Send {
        #[source]
        source: BrokerError,
    },

    #[error("Flush failed: {source}")]
    Flush {
        #[source]
        source: BrokerError,
    },

    #[error("Publish timed out after {timeout:?}")]
    PublishTimeout { timeout: Duration },

    #[error("Publish client is closed")]
    ClientClosed,

    #[error("Failed to bind listener on {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("HTTP server error: {message}")]
    Server { message: String },

    #[error("Shutdown did not complete within {timeout:?}")]
    ShutdownTimeout { timeout: Duration },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl BridgeError {
    /// Whether the error should terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Connection { .. }
                | BridgeError::ProducerCreation { .. }
                | BridgeError::Bind { .. }
                | BridgeError::Server { .. }
                | BridgeError::ShutdownTimeout { .. }
                | BridgeError::Configuration { .. }
        )
    }
}
