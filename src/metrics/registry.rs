//! Publish outcome instruments
//!
//! Four instruments record what happened to publish requests. Updates and
//! collection go through one lock so a scrape never sees an instrument in
//! the middle of an update.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, IntCounter, Opts};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Metric namespace for every instrument exported by the service
pub const NAMESPACE: &str = "publish_bridge";

/// Point-in-time values of the four instruments
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub failed: u64,
    pub last_send_duration_seconds: f64,
}

/// Received / sent / failed counters and the last send duration
#[derive(Clone)]
pub struct PublishMetrics {
    received: IntCounter,
    sent: IntCounter,
    failed: IntCounter,
    sent_duration: Gauge,
    lock: Arc<Mutex<()>>,
}

impl PublishMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            received: IntCounter::with_opts(
                Opts::new(
                    "received_messages_total",
                    "Total number of publish requests received.",
                )
                .namespace(NAMESPACE),
            )?,
            sent: IntCounter::with_opts(
                Opts::new(
                    "sent_messages_total",
                    "Total number of messages sent to the broker.",
                )
                .namespace(NAMESPACE),
            )?,
            failed: IntCounter::with_opts(
                Opts::new(
                    "failed_messages_total",
                    "Total number of messages which failed on send to the broker.",
                )
                .namespace(NAMESPACE),
            )?,
            sent_duration: Gauge::with_opts(
                Opts::new(
                    "sent_duration_seconds",
                    "Duration of the last send call to the broker.",
                )
                .namespace(NAMESPACE),
            )?,
            lock: Arc::new(Mutex::new(())),
        })
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_received(&self) {
        let _guard = self.guard();
        self.received.inc();
    }

    /// Count a successful send; the duration gauge keeps the last write
    pub fn record_sent(&self, duration: Duration) {
        let _guard = self.guard();
        self.sent.inc();
        self.sent_duration.set(duration.as_secs_f64());
    }

    pub fn record_failed(&self) {
        let _guard = self.guard();
        self.failed.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let _guard = self.guard();
        MetricsSnapshot {
            received: self.received.get(),
            sent: self.sent.get(),
            failed: self.failed.get(),
            last_send_duration_seconds: self.sent_duration.get(),
        }
    }
}

impl Collector for PublishMetrics {
    fn desc(&self) -> Vec<&Desc> {
        self.received
            .desc()
            .into_iter()
            .chain(self.sent.desc())
            .chain(self.failed.desc())
            .chain(self.sent_duration.desc())
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.guard();
        let mut families = self.received.collect();
        families.extend(self.sent.collect());
        families.extend(self.failed.collect());
        families.extend(self.sent_duration.collect());
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn value_of(families: &[MetricFamily], name: &str) -> f64 {
        let family = families
            .iter()
            .find(|f| f.get_name() == name)
            .unwrap_or_else(|| panic!("missing metric family {}", name));
        let metric = &family.get_metric()[0];
        if metric.has_counter() {
            metric.get_counter().get_value()
        } else {
            metric.get_gauge().get_value()
        }
    }

    #[test]
    fn test_describe_lists_four_instruments() {
        let metrics = PublishMetrics::new().unwrap();
        let names: Vec<String> = metrics
            .desc()
            .iter()
            .map(|d| d.fq_name.clone())
            .collect();

        assert_eq!(
            names,
            vec![
                "publish_bridge_received_messages_total",
                "publish_bridge_sent_messages_total",
                "publish_bridge_failed_messages_total",
                "publish_bridge_sent_duration_seconds",
            ]
        );

        // Describing twice yields the same descriptors
        assert_eq!(metrics.desc().len(), 4);
    }

    #[test]
    fn test_initial_values_are_zero() {
        let metrics = PublishMetrics::new().unwrap();
        let families = metrics.collect();

        assert_eq!(families.len(), 4);
        assert_eq!(value_of(&families, "publish_bridge_received_messages_total"), 0.0);
        assert_eq!(value_of(&families, "publish_bridge_sent_messages_total"), 0.0);
        assert_eq!(value_of(&families, "publish_bridge_failed_messages_total"), 0.0);
        assert_eq!(value_of(&families, "publish_bridge_sent_duration_seconds"), 0.0);
    }

    #[test]
    fn test_record_operations() {
        let metrics = PublishMetrics::new().unwrap();

        metrics.record_received();
        metrics.record_received();
        metrics.record_sent(Duration::from_millis(250));
        metrics.record_sent(Duration::from_millis(500));
        metrics.record_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.failed, 1);
        // Last write wins
        assert_eq!(snapshot.last_send_duration_seconds, 0.5);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let metrics = PublishMetrics::new().unwrap();
        let threads = 8;
        let per_thread = 500;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for i in 0..per_thread {
                        metrics.record_received();
                        if i % 5 == 0 {
                            metrics.record_failed();
                        } else {
                            metrics.record_sent(Duration::from_micros(i as u64));
                        }
                        // Scrapes interleaved with updates
                        if i % 50 == 0 {
                            let _ = metrics.collect();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let families = metrics.collect();
        let total = (threads * per_thread) as f64;
        let failed = (threads * per_thread / 5) as f64;
        assert_eq!(value_of(&families, "publish_bridge_received_messages_total"), total);
        assert_eq!(value_of(&families, "publish_bridge_failed_messages_total"), failed);
        assert_eq!(
            value_of(&families, "publish_bridge_sent_messages_total"),
            total - failed
        );
    }

    #[test]
    fn test_collect_never_sees_more_sent_than_received() {
        let metrics = PublishMetrics::new().unwrap();

        let writer = {
            let metrics = metrics.clone();
            thread::spawn(move || {
                for _ in 0..2000 {
                    metrics.record_received();
                    metrics.record_sent(Duration::from_millis(1));
                }
            })
        };

        for _ in 0..200 {
            let snapshot = metrics.snapshot();
            assert!(snapshot.sent <= snapshot.received);
        }

        writer.join().unwrap();
        assert_eq!(metrics.snapshot().sent, 2000);
    }
}
