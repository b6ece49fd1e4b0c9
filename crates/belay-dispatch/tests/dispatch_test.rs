//! Exercises [`belay_dispatch::Dispatcher`] end to end against the in-memory
//! fake device: templated tasks, cache bypass of the transport, setup/
//! teardown ordering, thread launch bookkeeping, and template validation
//! failures.

use std::collections::HashMap;

use belay_dispatch::{DeviceBuilder, SetupOptions, TaskOptions, TeardownOptions, Template, ThreadOptions};
use belay_session::{Session, SessionConfig, Value};
use belay_transport::Transport;
use tokio_util::sync::CancellationToken;

mod fake_device;
use fake_device::{FakeDevice, FakeDeviceStats};

async fn connected_session() -> (Session, CancellationToken) {
    let (device_side, host_side) = tokio::io::duplex(1 << 20);
    let (device, _stats) = FakeDevice::new(true, 128);
    tokio::spawn(device.run(device_side));

    let transport = Transport::memory(host_side);
    let mut session = Session::new(transport, SessionConfig::default());
    let cancel = CancellationToken::new();
    session.connect(&cancel).await.unwrap();
    (session, cancel)
}

async fn connected_session_with_stats() -> (Session, CancellationToken, FakeDeviceStats) {
    let (device_side, host_side) = tokio::io::duplex(1 << 20);
    let (device, stats) = FakeDevice::new(true, 128);
    tokio::spawn(device.run(device_side));

    let transport = Transport::memory(host_side);
    let mut session = Session::new(transport, SessionConfig::default());
    let cancel = CancellationToken::new();
    session.connect(&cancel).await.unwrap();
    (session, cancel, stats)
}

fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[tokio::test]
async fn templated_task_renders_and_executes() {
    let (session, cancel) = connected_session().await;
    let mut dispatcher = DeviceBuilder::new()
        .task("add", TaskOptions::default(), Some(Template::new("{a} + {b}")))
        .build(session);

    let result = dispatcher
        .call_task("add", &[], &params(&[("a", Value::Int(2)), ("b", Value::Int(3))]), &cancel)
        .await
        .unwrap();
    assert_eq!(result, b"5");
}

#[tokio::test]
async fn unknown_task_is_an_error() {
    let (session, cancel) = connected_session().await;
    let mut dispatcher = DeviceBuilder::new().build(session);

    let err = dispatcher.call_task("missing", &[], &HashMap::new(), &cancel).await.unwrap_err();
    assert!(matches!(err, belay_dispatch::DispatchError::UnknownOperation(name) if name == "missing"));
}

#[tokio::test]
async fn cached_task_does_not_touch_a_dead_transport_on_second_call() {
    let (device_side, host_side) = tokio::io::duplex(1 << 20);
    let (device, _stats) = FakeDevice::new(true, 128);
    let device_task = tokio::spawn(device.run(device_side));

    let transport = Transport::memory(host_side);
    let mut session = Session::new(transport, SessionConfig::default());
    let cancel = CancellationToken::new();
    session.connect(&cancel).await.unwrap();

    let mut dispatcher = DeviceBuilder::new()
        .task(
            "add",
            TaskOptions { cache: true, ..TaskOptions::default() },
            Some(Template::new("{a} + {b}")),
        )
        .build(session);

    let args = params(&[("a", Value::Int(2)), ("b", Value::Int(3))]);
    let first = dispatcher.call_task("add", &[], &args, &cancel).await.unwrap();
    assert_eq!(first, b"5");

    device_task.abort();
    let _ = device_task.await;

    let second = dispatcher.call_task("add", &[], &args, &cancel).await.unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn setups_run_in_ascending_order_with_declaration_tiebreak() {
    let (session, cancel, stats) = connected_session_with_stats().await;
    let mut dispatcher = DeviceBuilder::new()
        .setup("second", SetupOptions { order: 1, ..SetupOptions::default() }, Some(Template::verbatim("'second'")))
        .setup("first", SetupOptions { order: 0, ..SetupOptions::default() }, Some(Template::verbatim("'first'")))
        .setup(
            "also-first-declared-later",
            SetupOptions { order: 0, ..SetupOptions::default() },
            Some(Template::verbatim("'also_first'")),
        )
        .build(session);

    dispatcher.connect(&cancel).await.unwrap();

    let executed = stats.executed();
    let pos = |needle: &str| executed.iter().position(|s| s == needle).unwrap();
    assert!(pos("'first'") < pos("'also_first'"), "order-0 setups run before order-1, declaration order breaks the tie");
    assert!(pos("'also_first'") < pos("'second'"));
}

#[tokio::test]
async fn critical_setup_failure_aborts_connect() {
    let (device_side, host_side) = tokio::io::duplex(1 << 20);
    let (device, _stats) = FakeDevice::new(true, 128);
    tokio::spawn(device.run(device_side));

    let transport = Transport::memory(host_side);
    let session = Session::new(transport, SessionConfig::default());
    let cancel = CancellationToken::new();

    let mut dispatcher = DeviceBuilder::new()
        .setup("boom", SetupOptions { critical: true, ..SetupOptions::default() }, Some(Template::verbatim("1/0")))
        .build(session);

    let err = dispatcher.connect(&cancel).await.unwrap_err();
    assert!(matches!(err, belay_dispatch::DispatchError::CriticalSetupFailed(name) if name == "boom"));
}

#[tokio::test]
async fn teardowns_run_before_disconnect_and_ignore_errors_by_default() {
    let (session, cancel, stats) = connected_session_with_stats().await;
    let mut dispatcher = DeviceBuilder::new()
        .teardown("cleanup", TeardownOptions::default(), Some(Template::verbatim("1/0")))
        .build(session);

    // ignore_errors defaults to true, so a failing teardown must not
    // prevent disconnect from completing.
    dispatcher.disconnect(&cancel).await.unwrap();
    assert!(stats.executed().iter().any(|s| s == "1/0"));
}

#[tokio::test]
async fn unresolved_placeholder_is_rejected_before_touching_the_wire() {
    let (session, cancel) = connected_session().await;
    let mut dispatcher = DeviceBuilder::new()
        .task("broken", TaskOptions::default(), Some(Template::new("{missing}")))
        .build(session);

    let err = dispatcher.call_task("broken", &[], &HashMap::new(), &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        belay_dispatch::DispatchError::Session(belay_session::SessionError::UnresolvedPlaceholder)
    ));
}

#[tokio::test]
async fn deny_listed_template_is_rejected() {
    let (session, cancel) = connected_session().await;
    let mut dispatcher = DeviceBuilder::new()
        .task("danger", TaskOptions::default(), Some(Template::new("os.system('rm -rf /')")))
        .build(session);

    let err = dispatcher.call_task("danger", &[], &HashMap::new(), &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        belay_dispatch::DispatchError::Session(belay_session::SessionError::UnsafeTemplate { .. })
    ));
}

#[tokio::test]
async fn thread_launch_is_tracked_by_name() {
    let (session, cancel) = connected_session().await;
    let mut dispatcher = DeviceBuilder::new()
        .thread("blinker", ThreadOptions::default(), Some(Template::verbatim("blink()")))
        .build(session);

    assert!(!dispatcher.is_thread_tracked("blinker"));
    dispatcher.start_thread("blinker", &[], &HashMap::new(), &cancel).await.unwrap();
    assert!(dispatcher.is_thread_tracked("blinker"));
    assert!(dispatcher.forget_thread("blinker"));
    assert!(!dispatcher.is_thread_tracked("blinker"));
}

#[tokio::test]
async fn no_template_synthesizes_positional_call() {
    // The fake device doesn't recognize an arbitrary `name(args)` call, but
    // this confirms dispatch renders the synthesized form rather than
    // erroring, and that task execution still completes.
    let (session, cancel) = connected_session().await;
    let mut dispatcher = DeviceBuilder::new().task("set_pin", TaskOptions::default(), None).build(session);

    dispatcher
        .call_task("set_pin", &[Value::Int(5), Value::Bool(true)], &HashMap::new(), &cancel)
        .await
        .unwrap();
}
