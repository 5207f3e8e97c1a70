//! Test fixtures for running the bridge against the in-memory broker

#![allow(dead_code)]

use publish_bridge::broker::{InMemoryBroker, ProducerOptions};
use publish_bridge::metrics::MetricsCollector;
use publish_bridge::publish::{ClientOptions, PublishAction, PublishClient, SendMode};
use publish_bridge::service::{LifecycleController, LifecycleState};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub const DESTINATION: &str = "events";
pub const DEFAULT_PAYLOAD: &str = "test message";

/// A bridge serving on an ephemeral local port
pub struct RunningBridge {
    pub addr: SocketAddr,
    pub broker: InMemoryBroker,
    pub metrics: Arc<MetricsCollector>,
    pub client: Arc<PublishClient>,
    states: watch::Receiver<LifecycleState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<publish_bridge::Result<()>>,
}

impl RunningBridge {
    /// Start serving and wait until the listener is Running
    pub async fn start(broker: InMemoryBroker, mode: SendMode, shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let mut bridge = Self::start_with_shutdown(broker, mode, shutdown_timeout, async move {
            let _ = shutdown_rx.await;
        })
        .await;
        bridge.shutdown = Some(shutdown_tx);
        bridge
    }

    /// Start serving until `shutdown` resolves
    pub async fn start_with_shutdown<F>(
        broker: InMemoryBroker,
        mode: SendMode,
        shutdown_timeout: Duration,
        shutdown: F,
    ) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let metrics = Arc::new(MetricsCollector::new().expect("Failed to create metrics"));
        let client = Arc::new(
            PublishClient::with_broker(
                Arc::new(broker.clone()),
                ProducerOptions::new(DESTINATION),
                ClientOptions::default(),
            )
            .await
            .expect("Failed to create publish client"),
        );
        let action = PublishAction::new(client.clone(), metrics.publish(), mode, DEFAULT_PAYLOAD);

        let controller = Arc::new(LifecycleController::new(
            "127.0.0.1:0".parse().unwrap(),
            shutdown_timeout,
            action,
            metrics.clone(),
        ));
        let listener = controller.bind().await.expect("Failed to bind listener");
        let addr = listener.local_addr().unwrap();
        let mut states = controller.subscribe();

        let handle = tokio::spawn({
            let controller = controller.clone();
            async move { controller.serve(listener, shutdown).await }
        });

        states
            .wait_for(|s| *s == LifecycleState::Running)
            .await
            .expect("Controller dropped before running");

        Self {
            addr,
            broker,
            metrics,
            client,
            states,
            shutdown: None,
            handle,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.states.borrow()
    }

    /// Deliver the shutdown signal
    pub fn trigger_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    pub async fn wait_for_state(&mut self, state: LifecycleState) {
        self.states
            .wait_for(|s| *s == state)
            .await
            .expect("Controller dropped");
    }

    /// Wait for the controller to finish serving
    pub async fn join(self) -> publish_bridge::Result<()> {
        self.handle.await.expect("Controller task panicked")
    }
}

/// Minimal HTTP/1.1 response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Issue one request over a fresh connection and read the whole response
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: &str,
) -> std::io::Result<HttpResponse> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
        method,
        path,
        addr,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw).into_owned();

    let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text.as_str(), ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad status line"))?;

    Ok(HttpResponse {
        status,
        body: body.to_string(),
    })
}

/// Read a single unlabelled sample from Prometheus text output
pub fn metric_value(exposition: &str, name: &str) -> Option<f64> {
    exposition
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (metric, value) = line.split_once(' ')?;
            (metric == name).then(|| value.trim().parse().ok()).flatten()
        })
}
