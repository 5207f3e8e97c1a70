//! Process lifecycle: listener start, signal handling and bounded drain
//!
//! States move `Starting -> Running -> Draining -> Terminated` and are
//! published on a watch channel so handlers and tests can observe them.

use crate::error::{BridgeError, Result};
use crate::metrics::MetricsCollector;
use crate::publish::PublishAction;
use crate::service::http::{router, HttpState};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

/// Lifecycle state of the bridge process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

/// Owns the HTTP listener and coordinates graceful shutdown
pub struct LifecycleController {
    addr: SocketAddr,
    shutdown_timeout: Duration,
    action: PublishAction,
    metrics: Arc<MetricsCollector>,
    state_tx: watch::Sender<LifecycleState>,
}

impl LifecycleController {
    pub fn new(
        addr: SocketAddr,
        shutdown_timeout: Duration,
        action: PublishAction,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Starting);
        Self {
            addr,
            shutdown_timeout,
            action,
            metrics,
            state_tx,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Receive every state transition
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Bind the HTTP listener on the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.addr)
            .await
            .map_err(|e| BridgeError::Bind {
                addr: self.addr.to_string(),
                message: e.to_string(),
            })
    }

    /// Bind, serve until `shutdown` resolves, then drain
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                error!("❌ {}", e);
                self.transition(LifecycleState::Terminated);
                return Err(e);
            }
        };
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// In-flight requests may finish during the drain; the listener stops
    /// accepting as soon as draining starts. Exceeding the shutdown timeout
    /// stops waiting, cancels the accept loop and returns
    /// [`BridgeError::ShutdownTimeout`]. Connection tasks already spawned are
    /// not cancelled and end with the process.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::Server {
                message: e.to_string(),
            })?;

        let app = router(HttpState {
            action: self.action.clone(),
            metrics: self.metrics.clone(),
            lifecycle: self.subscribe(),
        });

        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.await;
                })
                .await
        });

        self.transition(LifecycleState::Running);
        info!("🌐 HTTP server listening on http://{}", local_addr);

        tokio::select! {
            _ = shutdown => {
                info!("🛑 Shutdown signal received");
            }
            result = &mut server => {
                self.transition(LifecycleState::Terminated);
                let message = match result {
                    Ok(Ok(())) => "HTTP server exited unexpectedly".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => format!("HTTP server task failed: {}", e),
                };
                error!("❌ {}", message);
                return Err(BridgeError::Server { message });
            }
        }

        self.transition(LifecycleState::Draining);
        info!(
            "Draining in-flight requests (timeout {:?})",
            self.shutdown_timeout
        );
        let _ = drain_tx.send(());

        match tokio::time::timeout(self.shutdown_timeout, &mut server).await {
            Ok(Ok(Ok(()))) => {
                self.transition(LifecycleState::Terminated);
                info!("✅ HTTP server shut down gracefully");
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                self.transition(LifecycleState::Terminated);
                error!("❌ HTTP server failed while draining: {}", e);
                Err(BridgeError::Server {
                    message: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                self.transition(LifecycleState::Terminated);
                error!("❌ HTTP server task failed while draining: {}", e);
                Err(BridgeError::Server {
                    message: e.to_string(),
                })
            }
            Err(_) => {
                server.abort();
                self.transition(LifecycleState::Terminated);
                let err = BridgeError::ShutdownTimeout {
                    timeout: self.shutdown_timeout,
                };
                error!("❌ {}", err);
                Err(err)
            }
        }
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!("Lifecycle: {} -> {}", previous, next);
        }
    }
}

/// Resolve on the first SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
