//! End-to-end tests: DirectIP over TCP through the listener to HTTP backends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use directip_mux::config::{DistributorConfig, ListenerConfig};
use directip_mux::distributor::Distributor;
use directip_mux::lifecycle::Shutdown;
use directip_mux::net::{Listener, Logged};
use directip_mux::protocol::{encode_confirmation, ConfirmationStatus};
use directip_mux::routing::TargetConfig;
use tokio::task::JoinHandle;

mod common;

const ACCEPTED: [u8; 7] = [1, 0, 4, 5, 0, 1, 1];
const REJECTED: [u8; 7] = [1, 0, 4, 5, 0, 1, 0];

struct Receiver {
    addr: SocketAddr,
    shutdown: Shutdown,
    distributor: Arc<Distributor>,
    task: JoinHandle<Result<(), directip_mux::net::ListenerError>>,
}

async fn start_receiver(targets: Vec<TargetConfig>, proxy_protocol: bool) -> Receiver {
    let distributor = Arc::new(Distributor::new(&DistributorConfig::default()));
    distributor.set_targets(targets).await.unwrap();

    let config = ListenerConfig {
        bind_address: "127.0.0.1:0".into(),
        proxy_protocol,
        proxy_header_timeout_secs: 2,
        connection_deadline_secs: 5,
    };
    let listener = Listener::bind(&config).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let handler = Arc::new(Logged::new(distributor.clone()));
    let task = tokio::spawn(listener.run(handler, shutdown.subscribe()));

    Receiver {
        addr,
        shutdown,
        distributor,
        task,
    }
}

#[test]
fn test_confirmation_constants() {
    assert_eq!(encode_confirmation(ConfirmationStatus::Accepted), ACCEPTED);
    assert_eq!(encode_confirmation(ConfirmationStatus::Rejected), REJECTED);
}

#[tokio::test]
async fn test_message_is_forwarded_and_confirmed() {
    let backend = common::start_backend(200).await;
    let receiver = start_receiver(vec![TargetConfig::new("a", "^300", backend.url())], false).await;

    let reply = common::send(receiver.addr, &common::message("300434063500000", b"position")).await;

    assert_eq!(reply, ACCEPTED);
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body["session"]["imei"], "300434063500000");
}

#[tokio::test]
async fn test_backend_failure_is_negative_confirmation() {
    let backend = common::start_backend(500).await;
    let receiver = start_receiver(vec![TargetConfig::new("a", ".*", backend.url())], false).await;

    let reply = common::send(receiver.addr, &common::message("300434063500000", b"x")).await;

    assert_eq!(reply, REJECTED);
    assert_eq!(backend.count(), 1);
}

#[tokio::test]
async fn test_malformed_message_is_rejected_without_dispatch() {
    let backend = common::start_backend(200).await;
    let receiver = start_receiver(vec![TargetConfig::new("a", ".*", backend.url())], false).await;

    // MO header element declaring 27 bytes instead of 28.
    let mut bytes = vec![1, 0, 30, 0x01, 0, 27];
    bytes.extend_from_slice(&[0u8; 27]);
    let reply = common::exchange(receiver.addr, &[], &bytes).await;

    assert_eq!(reply, REJECTED);
    assert_eq!(backend.count(), 0);
}

#[tokio::test]
async fn test_connections_are_independent() {
    let backend = common::start_backend(200).await;
    let receiver = start_receiver(vec![TargetConfig::new("a", ".*", backend.url())], false).await;

    for momsn in 0..3u8 {
        let reply = common::send(receiver.addr, &common::message("300434063500000", &[momsn])).await;
        assert_eq!(reply, ACCEPTED);
    }
    assert_eq!(backend.count(), 3);
}

#[tokio::test]
async fn test_proxy_v1_header_is_stripped() {
    let backend = common::start_backend(200).await;
    let receiver = start_receiver(vec![TargetConfig::new("a", ".*", backend.url())], true).await;

    let message = common::message("300434063500000", b"behind a balancer");
    let reply = common::exchange(
        receiver.addr,
        b"PROXY TCP4 192.0.2.10 127.0.0.1 40000 2022\r\n",
        &message.encode().unwrap(),
    )
    .await;

    assert_eq!(reply, ACCEPTED);
    assert_eq!(backend.count(), 1);
}

#[tokio::test]
async fn test_proxy_mode_accepts_direct_connections() {
    let backend = common::start_backend(200).await;
    let receiver = start_receiver(vec![TargetConfig::new("a", ".*", backend.url())], true).await;

    let reply = common::send(receiver.addr, &common::message("300434063500000", b"direct")).await;

    assert_eq!(reply, ACCEPTED);
    assert_eq!(backend.count(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let receiver = start_receiver(Vec::new(), false).await;

    receiver.shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(2), receiver.task)
        .await
        .expect("listener did not stop")
        .unwrap();
    assert!(result.is_ok());

    receiver.distributor.close();
    assert!(receiver.distributor.is_closed());
}
