//! In-memory broker
//!
//! Acknowledges messages after a configurable latency and records what was
//! published. Used when no real broker is configured and throughout the tests.

use super::{
    Broker, BrokerError, Compression, ConfirmTracker, Producer, ProducerMessage,
    ProducerOptions, SendCallback,
};
use crate::config::MemoryBrokerSettings;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// A message accepted by the in-memory broker
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub destination: String,
    pub key: Option<String>,
    /// Payload as it went over the wire (after compression)
    pub payload: Vec<u8>,
    pub content_encoding: Option<&'static str>,
}

impl PublishedMessage {
    /// Payload with the producer's compression undone
    pub fn decoded_payload(&self) -> Vec<u8> {
        match self.content_encoding {
            Some("lz4") => {
                lz4_flex::decompress_size_prepended(&self.payload).unwrap_or_default()
            }
            _ => self.payload.clone(),
        }
    }
}

/// Published messages kept for inspection; older ones are dropped
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

#[derive(Default)]
struct BrokerState {
    connected: AtomicBool,
    closed: AtomicBool,
    producers_opened: AtomicUsize,
    producers_closed: AtomicUsize,
    fail_sends: AtomicBool,
    published_total: AtomicUsize,
    history_limit: AtomicUsize,
    published: Mutex<VecDeque<PublishedMessage>>,
}

impl BrokerState {
    fn record(&self, message: PublishedMessage) {
        self.published_total.fetch_add(1, Ordering::SeqCst);
        let limit = self.history_limit.load(Ordering::SeqCst);
        if limit == 0 {
            return;
        }
        if let Ok(mut messages) = self.published.lock() {
            while messages.len() >= limit {
                messages.pop_front();
            }
            messages.push_back(message);
        }
    }
}

/// Broker that keeps everything in process memory
#[derive(Clone)]
pub struct InMemoryBroker {
    ack_latency: Duration,
    destinations: Option<Vec<String>>,
    fail_connect: bool,
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker that accepts any destination and acknowledges immediately
    pub fn new() -> Self {
        Self {
            ack_latency: Duration::ZERO,
            destinations: None,
            fail_connect: false,
            state: Arc::new(BrokerState {
                history_limit: AtomicUsize::new(DEFAULT_HISTORY_LIMIT),
                ..Default::default()
            }),
        }
    }

    pub fn from_settings(settings: &MemoryBrokerSettings) -> Self {
        let broker = Self::new()
            .with_ack_latency(Duration::from_millis(settings.ack_latency_ms))
            .with_failing_connect(settings.fail_connect)
            .with_history_limit(settings.history_limit);
        broker.set_fail_sends(settings.fail_sends);
        match &settings.destinations {
            Some(destinations) => broker.with_destinations(destinations.clone()),
            None => broker,
        }
    }

    pub fn with_ack_latency(mut self, latency: Duration) -> Self {
        self.ack_latency = latency;
        self
    }

    /// Restrict producers to the given destinations
    pub fn with_destinations<I, S>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destinations = Some(destinations.into_iter().map(Into::into).collect());
        self
    }

    /// Keep at most `limit` published messages (0 keeps only the count)
    pub fn with_history_limit(self, limit: usize) -> Self {
        self.state.history_limit.store(limit, Ordering::SeqCst);
        self
    }

    pub fn with_failing_connect(mut self, fail: bool) -> Self {
        self.fail_connect = fail;
        self
    }

    /// Make every subsequent send fail with a broker rejection
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Establish the session
    pub fn connect(&self) -> Result<(), BrokerError> {
        if self.fail_connect {
            return Err(BrokerError::Transport("connection refused".to_string()));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        self.state.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Producers created and not yet closed
    pub fn open_producers(&self) -> usize {
        self.state.producers_opened.load(Ordering::SeqCst)
            - self.state.producers_closed.load(Ordering::SeqCst)
    }

    /// Most recently published messages, oldest first
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state
            .published
            .lock()
            .map(|published| published.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every message accepted since the broker was created
    pub fn published_count(&self) -> usize {
        self.state.published_total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn create_producer(
        &self,
        options: &ProducerOptions,
    ) -> Result<Arc<dyn Producer>, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if options.destination.is_empty() {
            return Err(BrokerError::UnknownDestination(
                "<empty destination>".to_string(),
            ));
        }
        if let Some(destinations) = &self.destinations {
            if !destinations.contains(&options.destination) {
                return Err(BrokerError::UnknownDestination(options.destination.clone()));
            }
        }

        self.state.producers_opened.fetch_add(1, Ordering::SeqCst);
        debug!("In-memory producer created for {}", options.destination);

        Ok(Arc::new(InMemoryProducer {
            destination: options.destination.clone(),
            compression: options.compression,
            ack_latency: self.ack_latency,
            tracker: Arc::new(ConfirmTracker::new()),
            closed: AtomicBool::new(false),
            state: self.state.clone(),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct InMemoryProducer {
    destination: String,
    compression: Compression,
    ack_latency: Duration,
    tracker: Arc<ConfirmTracker>,
    closed: AtomicBool,
    state: Arc<BrokerState>,
}

impl InMemoryProducer {
    /// Hand the message to a background "broker" that confirms it later
    fn dispatch(&self, tag: u64, message: ProducerMessage) {
        let published = PublishedMessage {
            destination: self.destination.clone(),
            key: message.key,
            payload: self.compression.encode(&message.payload),
            content_encoding: self.compression.content_encoding(),
        };
        let latency = self.ack_latency;
        let tracker = self.tracker.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let outcome = if state.fail_sends.load(Ordering::SeqCst) {
                Err(BrokerError::Rejected("send rejected by broker".to_string()))
            } else if state.closed.load(Ordering::SeqCst) {
                Err(BrokerError::Closed)
            } else {
                state.record(published);
                Ok(())
            };

            tracker.resolve(tag, false, outcome);
        });
    }
}

#[async_trait]
impl Producer for InMemoryProducer {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn send(&self, message: ProducerMessage) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let (tag, rx) = self.tracker.register_sync();
        self.dispatch(tag, message);

        rx.await
            .unwrap_or_else(|_| Err(BrokerError::Transport("confirmation dropped".to_string())))
    }

    async fn send_async(&self, message: ProducerMessage, callback: SendCallback) {
        if self.closed.load(Ordering::SeqCst) {
            self.tracker.reject_unsent(callback, BrokerError::Closed);
            return;
        }

        let tag = self.tracker.register_async(callback);
        self.dispatch(tag, message);
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        self.tracker.flush().await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.producers_closed.fetch_add(1, Ordering::SeqCst);
            debug!(
                "In-memory producer for {} closed with {} unconfirmed sends",
                self.destination,
                self.tracker.outstanding()
            );
        }
        Ok(())
    }
}
