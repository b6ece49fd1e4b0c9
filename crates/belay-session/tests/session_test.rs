//! Exercises [`belay_session::Session`] against the same in-memory fake
//! device `belay-protocol` uses, covering the session-level scenarios from
//! the end-to-end scenarios: connect/capability detection, typed execution, file-transfer
//! round trips, cache bypass of the transport, and transaction rollback.

use belay_session::{Session, SessionConfig, SessionError};
use belay_transport::Transport;
use tokio_util::sync::CancellationToken;

mod fake_device;
use fake_device::FakeDevice;

async fn harness() -> (Session, CancellationToken) {
    let (device_side, host_side) = tokio::io::duplex(1 << 20);
    let (device, _stats) = FakeDevice::new(true, 128);
    tokio::spawn(device.run(device_side));

    let transport = Transport::memory(host_side);
    let session = Session::new(transport, SessionConfig::default());
    (session, CancellationToken::new())
}

#[tokio::test]
async fn connect_detects_capabilities_exactly_once() {
    let (mut session, cancel) = harness().await;
    session.connect(&cancel).await.unwrap();

    let caps = session.capabilities().expect("capabilities populated after connect");
    assert_eq!(caps.implementation, "micropython");
    assert_eq!(caps.platform, "fake");
    assert_eq!(caps.fingerprint(), "micropython/fake");
    assert!(caps.supports_raw_paste);
}

#[tokio::test]
async fn execute_typed_parses_arithmetic() {
    let (mut session, cancel) = harness().await;
    session.connect(&cancel).await.unwrap();

    let result: i64 = session.execute_typed("2 + 3", &cancel).await.unwrap();
    assert_eq!(result, 5);
}

#[tokio::test]
async fn write_then_read_file_round_trips_exactly() {
    let (mut session, cancel) = harness().await;
    session.connect(&cancel).await.unwrap();

    for size in [0usize, 1, 255, 256, 257, 1000] {
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        session.write_file("/t.bin", &data, &cancel).await.unwrap();
        let read_back = session.read_file("/t.bin", &cancel).await.unwrap();
        assert_eq!(read_back, data, "round trip failed for size {size}");
    }
}

#[tokio::test]
async fn delete_file_removes_it_from_listing() {
    let (mut session, cancel) = harness().await;
    session.connect(&cancel).await.unwrap();

    session.write_file("/a.bin", b"hi", &cancel).await.unwrap();
    let before = session.list_files("/", &cancel).await.unwrap();
    assert!(before.iter().any(|f| f == "/a.bin"));

    session.delete_file("/a.bin", &cancel).await.unwrap();
    let after = session.list_files("/", &cancel).await.unwrap();
    assert!(!after.iter().any(|f| f == "/a.bin"));
}

#[tokio::test]
async fn cached_call_survives_a_broken_transport() {
    let (device_side, host_side) = tokio::io::duplex(1 << 20);
    let (device, _stats) = FakeDevice::new(true, 128);
    let device_task = tokio::spawn(device.run(device_side));

    let transport = Transport::memory(host_side);
    let mut session = Session::new(transport, SessionConfig::default());
    let cancel = CancellationToken::new();
    session.connect(&cancel).await.unwrap();

    let first = session.execute_cached(42, "2 + 3", &cancel).await.unwrap();
    assert_eq!(first, b"5");

    // Kill the device side so any further real transport round trip fails.
    device_task.abort();
    let _ = device_task.await;

    let second = session.execute_cached(42, "2 + 3", &cancel).await.unwrap();
    assert_eq!(second, first, "identical (args, firmware) must hit the cache, not the transport");

    let err = session.execute_cached(7, "9 + 1", &cancel).await.unwrap_err();
    assert!(matches!(err, SessionError::Broken), "a cache miss with no live device must surface as broken");
}

#[tokio::test]
async fn transaction_rollback_runs_compensating_actions_in_lifo_order() {
    let (mut session, cancel) = harness().await;
    session.connect(&cancel).await.unwrap();

    session.write_file("/x.bin", b"x", &cancel).await.unwrap();
    session.write_file("/y.bin", b"y", &cancel).await.unwrap();

    let mut txn = session.transaction();
    txn.defer_delete_file("/x.bin");
    txn.defer_delete_file("/y.bin");
    txn.rollback(&mut session).await.unwrap();

    let remaining = session.list_files("/", &cancel).await.unwrap();
    assert!(!remaining.iter().any(|f| f == "/x.bin"));
    assert!(!remaining.iter().any(|f| f == "/y.bin"));
}

#[tokio::test]
async fn transaction_dropped_unresolved_rolls_back_on_next_call() {
    let (mut session, cancel) = harness().await;
    session.connect(&cancel).await.unwrap();
    session.write_file("/z.bin", b"z", &cancel).await.unwrap();

    {
        let mut txn = session.transaction();
        txn.defer_delete_file("/z.bin");
        // dropped without commit/rollback
    }

    // The next public call must drain and run the pending rollback before
    // doing its own work.
    let files = session.list_files("/", &cancel).await.unwrap();
    assert!(!files.iter().any(|f| f == "/z.bin"));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (mut session, cancel) = harness().await;
    session.connect(&cancel).await.unwrap();
    session.disconnect(&cancel).await;
    session.disconnect(&cancel).await;
}
