//! Publish client
//!
//! Owns one broker connection and one producer bound to the configured
//! destination. Sends are safe to issue concurrently; teardown flushes
//! outstanding asynchronous sends before releasing the producer and then the
//! connection.

use crate::broker::{self, Broker, BrokerError, Producer, ProducerMessage, ProducerOptions};
use crate::config::BrokerSettings;
use crate::error::{BridgeError, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Bounded retry with exponential backoff and jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    /// Delay before retry number `attempt` (1-based): full jitter over the
    /// exponential backoff step
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let millis = capped.as_millis() as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
    }
}

/// Client options that are independent of the broker
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Upper bound on a single publish attempt
    pub publish_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

/// Message publishing client wrapping a broker producer
pub struct PublishClient {
    destination: String,
    options: ClientOptions,
    producer: RwLock<Option<Arc<dyn Producer>>>,
    connection: Mutex<Option<Arc<dyn Broker>>>,
}

impl std::fmt::Debug for PublishClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishClient")
            .field("destination", &self.destination)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PublishClient {
    /// Connect to the configured broker and bind a producer
    pub async fn create(settings: &BrokerSettings, options: ClientOptions) -> Result<Self> {
        info!(
            "Connecting to {:?} broker for destination '{}'",
            settings.kind, settings.destination
        );
        let connection = broker::connect(settings)
            .await
            .map_err(|source| BridgeError::Connection { source })?;

        Self::with_broker(connection, settings.producer_options(), options).await
    }

    /// Bind a producer on an already established broker session
    ///
    /// On failure the session is closed before the error is returned.
    pub async fn with_broker(
        connection: Arc<dyn Broker>,
        producer_options: ProducerOptions,
        options: ClientOptions,
    ) -> Result<Self> {
        let producer = match connection.create_producer(&producer_options).await {
            Ok(producer) => producer,
            Err(source) => {
                if let Err(e) = connection.close().await {
                    warn!("Failed to close broker connection after producer error: {}", e);
                }
                return Err(BridgeError::ProducerCreation {
                    destination: producer_options.destination,
                    source,
                });
            }
        };

        info!(
            "Producer ready for '{}' (compression: {:?})",
            producer.destination(),
            producer_options.compression
        );

        Ok(Self {
            destination: producer.destination().to_string(),
            options,
            producer: RwLock::new(Some(producer)),
            connection: Mutex::new(Some(connection)),
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub async fn is_closed(&self) -> bool {
        self.producer.read().await.is_none()
    }

    async fn producer(&self) -> Result<Arc<dyn Producer>> {
        self.producer
            .read()
            .await
            .clone()
            .ok_or(BridgeError::ClientClosed)
    }

    /// Run one attempt, applying the publish timeout if configured
    async fn attempt<F>(&self, fut: F) -> std::result::Result<(), AttemptError>
    where
        F: Future<Output = std::result::Result<(), BrokerError>>,
    {
        match self.options.publish_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(outcome) => outcome.map_err(AttemptError::Broker),
                Err(_) => Err(AttemptError::TimedOut(timeout)),
            },
            None => fut.await.map_err(AttemptError::Broker),
        }
    }

    /// Retry `op` according to the retry policy
    async fn with_retry<F, Fut>(&self, mut op: F) -> std::result::Result<(), AttemptError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<(), AttemptError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(AttemptError::Broker(BrokerError::Closed)) => {
                    return Err(AttemptError::Broker(BrokerError::Closed));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.options.retry.max_retries {
                        return Err(e);
                    }

                    let delay = self.options.retry.delay_for(attempt);
                    warn!(
                        "Publish attempt {} to '{}' failed: {}. Retrying in {:?}",
                        attempt, self.destination, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Publish and wait for the broker acknowledgement
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let producer = self.producer().await?;
        let message = ProducerMessage::new(payload);

        self.with_retry(|| self.attempt(producer.send(message.clone())))
            .await
            .map_err(|e| e.into_send_error())
    }

    /// Publish without waiting for the acknowledgement, then flush
    ///
    /// The completion callback only logs the outcome; the flush result is
    /// what the caller sees.
    pub async fn send_async(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let producer = self.producer().await?;
        let destination = self.destination.clone();

        producer
            .send_async(
                ProducerMessage::new(payload),
                Box::new(move |outcome| match outcome {
                    Ok(()) => debug!("Asynchronous send to '{}' acknowledged", destination),
                    Err(e) => warn!("Asynchronous send to '{}' failed: {}", destination, e),
                }),
            )
            .await;

        match self.attempt(producer.flush()).await {
            Ok(()) => Ok(()),
            Err(AttemptError::TimedOut(timeout)) => Err(BridgeError::PublishTimeout { timeout }),
            Err(AttemptError::Broker(source)) => Err(BridgeError::Flush { source }),
        }
    }

    /// Flush outstanding sends, then release the producer and the connection
    ///
    /// Calling `close` again after it has run is a no-op.
    pub async fn close(&self) -> Result<()> {
        let producer = self.producer.write().await.take();
        let connection = self.connection.lock().await.take();

        let Some(producer) = producer else {
            debug!("Publish client for '{}' already closed", self.destination);
            return Ok(());
        };

        info!("Closing publish client for '{}'", self.destination);

        let flushed = producer.flush().await;
        if let Err(e) = producer.close().await {
            warn!("Failed to close producer: {}", e);
        }
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!("Failed to close broker connection: {}", e);
            }
        }

        flushed.map_err(|source| BridgeError::Flush { source })
    }
}

/// Outcome of a single publish attempt
#[derive(Debug)]
enum AttemptError {
    Broker(BrokerError),
    TimedOut(Duration),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Broker(e) => write!(f, "{}", e),
            AttemptError::TimedOut(timeout) => write!(f, "timed out after {:?}", timeout),
        }
    }
}

impl AttemptError {
    fn into_send_error(self) -> BridgeError {
        match self {
            AttemptError::Broker(BrokerError::Closed) => BridgeError::ClientClosed,
            AttemptError::Broker(source) => BridgeError::Send { source },
            AttemptError::TimedOut(timeout) => BridgeError::PublishTimeout { timeout },
        }
    }
}
