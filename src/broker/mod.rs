//! Broker capability used by the publish client
//!
//! A broker hands out producers bound to one destination. Producers support
//! acknowledged sends, fire-and-callback sends, flushing and teardown. The
//! AMQP implementation talks to a real broker; the in-memory one is used for
//! local runs and tests.

pub mod amqp;
pub mod confirms;
pub mod memory;

pub use amqp::AmqpBroker;
pub use confirms::ConfirmTracker;
pub use memory::{InMemoryBroker, PublishedMessage};

use crate::config::{BrokerKind, BrokerSettings};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Transport-level failures reported by a broker implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("producer or connection is closed")]
    Closed,
}

/// Completion callback for asynchronous sends, invoked exactly once
pub type SendCallback = Box<dyn FnOnce(Result<(), BrokerError>) + Send + 'static>;

/// A single outbound message
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerMessage {
    pub payload: Vec<u8>,
    /// Routing key; the empty key is used when absent
    pub key: Option<String>,
}

impl ProducerMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Payload compression applied by a producer to every message it sends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Lz4,
}

impl Compression {
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            Compression::None => payload.to_vec(),
            Compression::Lz4 => lz4_flex::compress_prepend_size(payload),
        }
    }

    /// Value for the message content-encoding property
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Lz4 => Some("lz4"),
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            other => Err(format!("unknown compression: {}", other)),
        }
    }
}

/// Options fixed when a producer is created
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerOptions {
    pub destination: String,
    pub compression: Compression,
}

impl ProducerOptions {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            compression: Compression::default(),
        }
    }
}

/// A live session with a broker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Bind a producer to the destination named in `options`
    async fn create_producer(
        &self,
        options: &ProducerOptions,
    ) -> Result<Arc<dyn Producer>, BrokerError>;

    /// Release the session
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A publishing channel bound to one destination
#[async_trait]
pub trait Producer: Send + Sync {
    fn destination(&self) -> &str;

    /// Publish and wait for the broker acknowledgement
    async fn send(&self, message: ProducerMessage) -> Result<(), BrokerError>;

    /// Publish without waiting; `callback` receives the outcome
    async fn send_async(&self, message: ProducerMessage, callback: SendCallback);

    /// Wait until every outstanding asynchronous send is acknowledged or failed
    async fn flush(&self) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Open a broker session of the configured kind
pub async fn connect(settings: &BrokerSettings) -> Result<Arc<dyn Broker>, BrokerError> {
    match settings.kind {
        BrokerKind::Amqp => {
            let broker = AmqpBroker::connect(settings).await?;
            Ok(Arc::new(broker))
        }
        BrokerKind::Memory => {
            let broker = InMemoryBroker::from_settings(&settings.memory);
            broker.connect()?;
            Ok(Arc::new(broker))
        }
    }
}
