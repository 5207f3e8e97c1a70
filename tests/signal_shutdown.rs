//! Shutdown driven by a real process signal
//!
//! Kept in its own test binary: the SIGTERM sent here reaches every test
//! running in the same process.

#![cfg(unix)]

mod fixtures;

use fixtures::{http_request, RunningBridge};
use publish_bridge::broker::InMemoryBroker;
use publish_bridge::publish::SendMode;
use publish_bridge::service::{shutdown_signal, LifecycleState};
use std::process::Command;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sigterm_drains_in_flight_request() {
    // Registering a listener replaces the default disposition, so a signal
    // arriving before the controller polls its own listener cannot kill the
    // test process
    let mut guard = signal(SignalKind::terminate()).unwrap();

    let broker = InMemoryBroker::new().with_ack_latency(Duration::from_millis(500));
    let mut bridge = RunningBridge::start_with_shutdown(
        broker,
        SendMode::Sync,
        Duration::from_secs(5),
        shutdown_signal(),
    )
    .await;
    let addr = bridge.addr;

    // Give the serve loop time to install its signal listeners
    sleep(Duration::from_millis(100)).await;

    let in_flight = tokio::spawn(async move { http_request(addr, "POST", "/test", "slow").await });
    let deadline = Instant::now() + Duration::from_secs(5);
    while bridge.metrics.publish().snapshot().received < 1 {
        assert!(Instant::now() < deadline, "request never reached the bridge");
        sleep(Duration::from_millis(5)).await;
    }

    let status = Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    timeout(Duration::from_secs(5), guard.recv())
        .await
        .expect("SIGTERM was not delivered");

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "ok");

    timeout(
        Duration::from_secs(5),
        bridge.wait_for_state(LifecycleState::Terminated),
    )
    .await
    .expect("controller did not stop after SIGTERM");

    let metrics = bridge.metrics.clone();
    assert!(bridge.join().await.is_ok());

    let snapshot = metrics.publish().snapshot();
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.failed, 0);
}
