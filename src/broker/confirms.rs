//! Delivery confirmation tracking
//!
//! Every publish is given a sequential delivery tag. The broker later
//! acknowledges (or rejects) tags, either one at a time or "up to and
//! including" a tag. The tracker maps those confirmations back to the
//! waiting sender or callback, and lets `flush` wait for the outstanding set
//! to drain.

use super::{BrokerError, SendCallback};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

enum Waiter {
    Sync(oneshot::Sender<Result<(), BrokerError>>),
    Async(SendCallback),
}

#[derive(Default)]
struct TrackerState {
    next_tag: u64,
    pending: BTreeMap<u64, Waiter>,
    /// First asynchronous failure since the last flush
    first_error: Option<BrokerError>,
}

impl TrackerState {
    /// Remove `tags` and record an async failure in the same critical
    /// section, so a flush never sees the set drained without the error
    fn take(
        &mut self,
        tags: Vec<u64>,
        outcome: &Result<(), BrokerError>,
    ) -> (Vec<Waiter>, bool) {
        let waiters: Vec<Waiter> = tags
            .into_iter()
            .filter_map(|t| self.pending.remove(&t))
            .collect();

        if let Err(e) = outcome {
            let failed_async = waiters.iter().any(|w| matches!(w, Waiter::Async(_)));
            if failed_async && self.first_error.is_none() {
                self.first_error = Some(e.clone());
            }
        }

        let drained = !waiters.is_empty() && self.pending.is_empty();
        (waiters, drained)
    }
}

/// Tracks outstanding publishes until the broker confirms them
#[derive(Default)]
pub struct ConfirmTracker {
    state: Mutex<TrackerState>,
    drained: Notify,
}

impl ConfirmTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a send whose caller waits on the returned receiver
    pub fn register_sync(&self) -> (u64, oneshot::Receiver<Result<(), BrokerError>>) {
        let (tx, rx) = oneshot::channel();
        let tag = self.register(Waiter::Sync(tx));
        (tag, rx)
    }

    /// Register a send whose outcome is delivered to `callback`
    pub fn register_async(&self, callback: SendCallback) -> u64 {
        self.register(Waiter::Async(callback))
    }

    fn register(&self, waiter: Waiter) -> u64 {
        let mut state = self.lock();
        // Broker delivery tags start at 1
        state.next_tag += 1;
        let tag = state.next_tag;
        state.pending.insert(tag, waiter);
        tag
    }

    /// Resolve one tag, or every tag up to `tag` when `multiple` is set
    pub fn resolve(&self, tag: u64, multiple: bool, outcome: Result<(), BrokerError>) {
        let (waiters, drained) = {
            let mut state = self.lock();
            let tags: Vec<u64> = if multiple {
                state.pending.range(..=tag).map(|(t, _)| *t).collect()
            } else {
                vec![tag]
            };
            state.take(tags, &outcome)
        };

        if waiters.is_empty() {
            debug!("Confirmation for unknown delivery tag {}", tag);
            return;
        }

        self.complete(waiters, outcome, drained);
    }

    /// Fail every outstanding send, e.g. when the channel goes away
    pub fn fail_all(&self, error: BrokerError) {
        let outcome = Err(error.clone());
        let (waiters, drained) = {
            let mut state = self.lock();
            let tags: Vec<u64> = state.pending.keys().copied().collect();
            state.take(tags, &outcome)
        };

        if waiters.is_empty() {
            return;
        }
        warn!("Failing {} outstanding sends: {}", waiters.len(), error);
        self.complete(waiters, outcome, drained);
    }

    /// Remove a tag whose publish never reached the broker
    pub fn abandon(&self, tag: u64, error: BrokerError) {
        let outcome = Err(error);
        let (waiters, drained) = self.lock().take(vec![tag], &outcome);
        self.complete(waiters, outcome, drained);
    }

    /// Fail an asynchronous send that was never published
    ///
    /// No delivery tag is used; the failure is still reported by the next
    /// flush.
    pub fn reject_unsent(&self, callback: SendCallback, error: BrokerError) {
        {
            let mut state = self.lock();
            if state.first_error.is_none() {
                state.first_error = Some(error.clone());
            }
        }
        callback(Err(error));
    }

    /// Deliver outcomes outside the lock, then wake flushers if drained
    fn complete(&self, waiters: Vec<Waiter>, outcome: Result<(), BrokerError>, drained: bool) {
        for waiter in waiters {
            match waiter {
                Waiter::Sync(tx) => {
                    // The sender may have stopped waiting (timeout)
                    let _ = tx.send(outcome.clone());
                }
                Waiter::Async(callback) => callback(outcome.clone()),
            }
        }

        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Number of sends still waiting for confirmation
    pub fn outstanding(&self) -> usize {
        self.lock().pending.len()
    }

    /// Wait until nothing is outstanding, then report the first asynchronous
    /// failure seen since the previous flush
    pub async fn flush(&self) -> Result<(), BrokerError> {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.pending.is_empty() {
                    return match state.first_error.take() {
                        Some(e) => Err(e),
                        None => Ok(()),
                    };
                }
            }

            notified.await;
        }
    }
}
