#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for `RealtimeConnectionManager`.
//!
//! Each test plays the server through `tests/common`'s `MockConnector`, so
//! the full engine runs: handshake, heartbeats, commands, reconnection.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use awaz_pulse_realtime::{
    listener, ConnectionState, ConnectionStatus, EventKind, ListenerCount, Metadata,
    MetadataUpdate, RealtimeConfig, RealtimeConnectionManager, RealtimeEvent, StreamInfo,
};
use serde_json::json;

use awaz_pulse_realtime::transport::FallbackConnector;
use common::{wait_until, Attempt, MockConnector, Recorder};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn config(delay_ms: u64) -> RealtimeConfig {
    RealtimeConfig::new("http://localhost:5000")
        .with_reconnection_delay(Duration::from_millis(delay_ms))
        .with_max_reconnection_attempts(3)
        .with_connect_timeout(Duration::from_secs(1))
}

fn start(connector: &MockConnector, delay_ms: u64) -> (RealtimeConnectionManager, Recorder) {
    let manager = RealtimeConnectionManager::new(config(delay_ms), connector.clone());
    let recorder = Recorder::attach(&manager);
    (manager, recorder)
}

async fn connected(manager: &RealtimeConnectionManager) {
    wait_until("connection", || manager.is_connected()).await;
}

// ════════════════════════════════════════════════════════════════════
// Connection control
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn connect_twice_opens_one_transport() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);

    manager.connect();
    manager.connect();
    connected(&manager).await;
    manager.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.calls(), 1);
    assert_eq!(recorder.connection(), vec![ConnectionStatus::connected()]);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(connector.server().sent(), vec!["40/streaming,".to_string()]);
}

#[tokio::test]
async fn connect_while_handshake_pending_is_a_noop() {
    let connector = MockConnector::scripted([Attempt::Silent]);
    let (manager, _recorder) = start(&connector, 20);

    manager.connect();
    wait_until("transport opened", || connector.calls() == 1).await;
    manager.connect();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(connector.calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn disconnect_when_not_connected_is_a_noop() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);

    manager.disconnect();
    manager.disconnect();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.is_connected());
    assert!(recorder.events().is_empty());
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn disconnect_closes_transport_and_is_idempotent() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);

    manager.connect();
    connected(&manager).await;
    let server = connector.server();

    manager.disconnect();
    assert!(!manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    wait_until("transport close", || server.is_closed()).await;

    manager.disconnect();
    assert_eq!(
        recorder.connection(),
        vec![ConnectionStatus::connected(), ConnectionStatus::disconnected()]
    );
}

#[tokio::test]
async fn connect_after_disconnect_opens_a_new_transport() {
    let connector = MockConnector::new();
    let (manager, _recorder) = start(&connector, 20);

    manager.connect();
    connected(&manager).await;
    manager.disconnect();
    manager.connect();
    connected(&manager).await;

    assert_eq!(connector.calls(), 2);
    let servers = connector.servers();
    wait_until("old transport closed", || servers[0].is_closed()).await;
    assert!(!servers[1].is_closed());
}

#[tokio::test]
async fn clones_share_one_connection() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);
    let page = manager.clone();

    page.connect();
    connected(&manager).await;
    manager.connect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(connector.calls(), 1);
    assert!(page.is_connected());
    assert_eq!(recorder.connection().len(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn off_stops_delivery() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);

    let calls = Arc::new(StdMutex::new(0_u32));
    let counter = Arc::clone(&calls);
    let cb = listener(move |_| *counter.lock().unwrap() += 1);
    manager.on(EventKind::StreamStarted, Arc::clone(&cb));
    manager.off(EventKind::StreamStarted, &cb);
    assert_eq!(manager.listener_count(EventKind::StreamStarted), 1);

    manager.connect();
    connected(&manager).await;
    connector
        .server()
        .emit("stream:started", json!({ "channelId": "c1", "streamId": "s1" }));
    wait_until("stream:started", || {
        recorder.of_kind(EventKind::StreamStarted).len() == 1
    })
    .await;

    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn listeners_run_in_registration_order_every_time() {
    let connector = MockConnector::new();
    let (manager, _recorder) = start(&connector, 20);

    let order = Arc::new(StdMutex::new(Vec::new()));
    for tag in ["cb1", "cb2"] {
        let order = Arc::clone(&order);
        manager.on(
            EventKind::StreamStopped,
            listener(move |_| order.lock().unwrap().push(tag)),
        );
    }

    manager.connect();
    connected(&manager).await;
    let server = connector.server();
    for _ in 0..3 {
        server.emit("stream:stopped", json!({ "channelId": "c1" }));
    }
    wait_until("three events", || order.lock().unwrap().len() == 6).await;

    assert_eq!(
        *order.lock().unwrap(),
        vec!["cb1", "cb2", "cb1", "cb2", "cb1", "cb2"]
    );
}

#[tokio::test]
async fn stream_metadata_is_passed_through_unchanged() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);
    manager.connect();
    connected(&manager).await;

    let wire = json!({ "channelId": "c1", "metadata": { "showTitle": "X" } });
    connector.server().emit("stream:metadata", wire.clone());
    wait_until("stream:metadata", || {
        !recorder.of_kind(EventKind::StreamMetadata).is_empty()
    })
    .await;

    let events = recorder.of_kind(EventKind::StreamMetadata);
    let RealtimeEvent::StreamMetadata(update) = &events[0] else {
        panic!("expected stream:metadata, got {events:?}");
    };
    let mut metadata = Metadata::new();
    metadata.insert("showTitle".into(), json!("X"));
    assert_eq!(
        *update,
        MetadataUpdate {
            channel_id: "c1".into(),
            metadata,
            extra: Metadata::new(),
        }
    );
    assert_eq!(serde_json::to_value(update).unwrap(), wire);
}

#[tokio::test]
async fn unmodelled_fields_and_null_metadata_reach_listeners() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);
    manager.connect();
    connected(&manager).await;

    let server = connector.server();
    server.emit(
        "stream:metadata",
        json!({ "channelId": "c1", "metadata": null, "updatedBy": "studio-2" }),
    );
    let started = json!({
        "channelId": "c1",
        "streamId": "s1",
        "startedAt": "2024-05-01T06:00:00Z",
        "metadata": { "showTitle": "Breakfast" }
    });
    server.emit("stream:started", started.clone());
    wait_until("both events", || {
        !recorder.of_kind(EventKind::StreamMetadata).is_empty()
            && !recorder.of_kind(EventKind::StreamStarted).is_empty()
    })
    .await;

    let updates = recorder.of_kind(EventKind::StreamMetadata);
    let RealtimeEvent::StreamMetadata(update) = &updates[0] else {
        panic!("expected stream:metadata");
    };
    assert!(update.metadata.is_empty());
    assert_eq!(update.extra.get("updatedBy"), Some(&json!("studio-2")));

    let starts = recorder.of_kind(EventKind::StreamStarted);
    let RealtimeEvent::StreamStarted(info) = &starts[0] else {
        panic!("expected stream:started");
    };
    assert_eq!(serde_json::to_value(info).unwrap(), started);
}

#[tokio::test]
async fn numeric_ids_and_unknown_events_are_tolerated() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);
    manager.connect();
    connected(&manager).await;

    let server = connector.server();
    server.emit("chat:message", json!({ "text": "hi" }));
    server.emit("stream:listeners", json!({ "channelId": "c1" }));
    server.emit("stream:listeners", json!({ "channelId": 7, "count": 3 }));
    wait_until("stream:listeners", || {
        !recorder.of_kind(EventKind::StreamListeners).is_empty()
    })
    .await;

    assert_eq!(
        recorder.of_kind(EventKind::StreamListeners),
        vec![RealtimeEvent::StreamListeners(ListenerCount {
            channel_id: "7".into(),
            count: 3,
            extra: Metadata::new(),
        })]
    );
    assert!(manager.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Outbound commands
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn commands_while_disconnected_send_nothing() {
    let connector = MockConnector::new();
    let (manager, _recorder) = start(&connector, 20);

    manager.start_stream("c1", Some("s1".into()), None);
    manager.stop_stream("c1", None);
    manager.update_metadata("c1", Metadata::new());
    assert_eq!(connector.calls(), 0);

    manager.connect();
    connected(&manager).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(connector.server().sent_events().is_empty());
}

#[tokio::test]
async fn commands_during_handshake_send_nothing() {
    let connector = MockConnector::scripted([Attempt::Silent]);
    let (manager, _recorder) = start(&connector, 20);

    manager.connect();
    wait_until("transport opened", || connector.calls() == 1).await;
    manager.start_stream("c1", None, None);
    manager.update_metadata("c1", Metadata::new());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(connector.server().sent().is_empty());
}

#[tokio::test]
async fn commands_are_encoded_on_the_namespace() {
    let connector = MockConnector::new();
    let (manager, _recorder) = start(&connector, 20);
    manager.connect();
    connected(&manager).await;

    let mut metadata = Metadata::new();
    metadata.insert("showTitle".into(), json!("Morning Show"));
    manager.start_stream("c1", Some("s1".into()), Some(metadata.clone()));
    manager.update_metadata("c1", metadata);
    manager.stop_stream("c1", Some("s1".into()));

    let server = connector.server();
    wait_until("three commands", || server.sent_events().len() == 3).await;
    assert_eq!(
        server.sent_events(),
        vec![
            (
                "stream:start".to_string(),
                json!({ "channelId": "c1", "streamId": "s1", "metadata": { "showTitle": "Morning Show" } })
            ),
            (
                "stream:update-metadata".to_string(),
                json!({ "channelId": "c1", "metadata": { "showTitle": "Morning Show" } })
            ),
            (
                "stream:stop".to_string(),
                json!({ "channelId": "c1", "streamId": "s1" })
            ),
        ]
    );
}

#[tokio::test]
async fn start_stream_omits_absent_fields() {
    let connector = MockConnector::new();
    let (manager, _recorder) = start(&connector, 20);
    manager.connect();
    connected(&manager).await;

    manager.start_stream("c9", None, None);
    let server = connector.server();
    wait_until("command", || !server.sent_events().is_empty()).await;

    let (name, payload) = &server.sent_events()[0];
    assert_eq!(name, "stream:start");
    assert_eq!(*payload, json!({ "channelId": "c9" }));
    let info: StreamInfo = serde_json::from_value(payload.clone()).unwrap();
    assert_eq!(info.stream_id, None);
}

// ════════════════════════════════════════════════════════════════════
// Heartbeat
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn server_ping_is_answered_with_pong() {
    let connector = MockConnector::new();
    let (manager, _recorder) = start(&connector, 20);
    manager.connect();
    connected(&manager).await;

    let server = connector.server();
    server.push("2");
    wait_until("pong", || server.sent().contains(&"3".to_string())).await;
    assert!(manager.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Reconnection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn successful_reconnect_resets_attempt_counter() {
    let connector =
        MockConnector::scripted([Attempt::Accept, Attempt::Refuse, Attempt::Refuse, Attempt::Accept]);
    let (manager, recorder) = start(&connector, 10);
    manager.connect();
    connected(&manager).await;

    connector.server().drop_connection();
    wait_until("reconnect", || connector.calls() == 4 && manager.is_connected()).await;

    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(
        recorder.connection(),
        vec![
            ConnectionStatus::connected(),
            ConnectionStatus::disconnected(),
            ConnectionStatus::connected(),
        ]
    );
}

#[tokio::test]
async fn attempts_are_mirrored_while_reconnecting() {
    let connector = MockConnector::scripted([Attempt::Accept, Attempt::Silent]);
    let (manager, _recorder) = start(&connector, 10);
    manager.connect();
    connected(&manager).await;

    connector.server().drop_connection();
    wait_until("first attempt", || connector.calls() == 2).await;

    assert_eq!(manager.state(), ConnectionState::Reconnecting { attempt: 1 });
    assert_eq!(manager.reconnect_attempts(), 1);
    manager.disconnect();
}

#[tokio::test]
async fn exhausted_reconnection_reports_failed_once() {
    let connector = MockConnector::scripted([
        Attempt::Accept,
        Attempt::Refuse,
        Attempt::Refuse,
        Attempt::Refuse,
    ]);
    let (manager, recorder) = start(&connector, 10);
    manager.connect();
    connected(&manager).await;

    connector.server().fail("connection reset");
    wait_until("failed", || {
        recorder.connection().iter().any(ConnectionStatus::is_failed)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let failures = recorder
        .connection()
        .into_iter()
        .filter(ConnectionStatus::is_failed)
        .count();
    assert_eq!(failures, 1);
    assert_eq!(connector.calls(), 4);
    assert_eq!(manager.state(), ConnectionState::Failed);
    assert!(!manager.is_connected());
    assert_eq!(manager.reconnect_attempts(), 3);

    // Failed is terminal until the caller asks again.
    manager.connect();
    connected(&manager).await;
    assert_eq!(connector.calls(), 5);
}

/// Subscribe a `connection` listener that calls `connect()` on a clone of
/// `manager` whenever `should_connect` says so. Clearing the returned slot
/// releases the clone.
fn reconnect_from_listener(
    manager: &RealtimeConnectionManager,
    should_connect: impl Fn(&ConnectionStatus) -> bool + Send + Sync + 'static,
) -> Arc<StdMutex<Option<RealtimeConnectionManager>>> {
    let slot = Arc::new(StdMutex::new(Some(manager.clone())));
    let handle = Arc::clone(&slot);
    manager.on(
        EventKind::Connection,
        listener(move |event| {
            let RealtimeEvent::Connection(status) = event else {
                return;
            };
            if should_connect(status) {
                let manager = handle.lock().unwrap().clone();
                if let Some(manager) = manager {
                    manager.connect();
                }
            }
        }),
    );
    slot
}

#[tokio::test]
async fn listener_reconnects_from_failed_notification() {
    let connector = MockConnector::scripted([Attempt::Accept, Attempt::Refuse, Attempt::Refuse]);
    let manager = RealtimeConnectionManager::new(
        config(10).with_max_reconnection_attempts(2),
        connector.clone(),
    );
    let recorder = Recorder::attach(&manager);
    let slot = reconnect_from_listener(&manager, ConnectionStatus::is_failed);

    manager.connect();
    connected(&manager).await;
    connector.server().fail("connection reset");

    wait_until("connect() from the failed listener", || {
        connector.calls() == 4 && manager.is_connected()
    })
    .await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(
        recorder.connection(),
        vec![
            ConnectionStatus::connected(),
            ConnectionStatus::disconnected(),
            ConnectionStatus::failed(),
            ConnectionStatus::connected(),
        ]
    );

    slot.lock().unwrap().take();
}

#[tokio::test]
async fn listener_reconnects_when_reconnection_is_disabled() {
    let connector = MockConnector::new();
    let manager = RealtimeConnectionManager::new(
        config(10).with_reconnection(false),
        connector.clone(),
    );
    let retried = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&retried);
    let slot = reconnect_from_listener(&manager, move |status| {
        !status.connected && !flag.swap(true, Ordering::SeqCst)
    });

    manager.connect();
    connected(&manager).await;
    connector.server().drop_connection();

    wait_until("connect() from the disconnect listener", || {
        connector.calls() == 2 && manager.is_connected()
    })
    .await;
    assert!(retried.load(Ordering::SeqCst));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(connector.servers()[0].is_closed());

    slot.lock().unwrap().take();
}

#[tokio::test]
async fn listener_reconnects_after_rejected_handshake_without_retries() {
    let connector = MockConnector::scripted([Attempt::Reject("Not authorized".into())]);
    let manager = RealtimeConnectionManager::new(
        config(10).with_reconnection(false),
        connector.clone(),
    );
    let retried = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&retried);
    let slot = reconnect_from_listener(&manager, move |status| {
        !status.connected && !flag.swap(true, Ordering::SeqCst)
    });

    manager.connect();
    wait_until("second attempt", || {
        connector.calls() == 2 && manager.is_connected()
    })
    .await;
    assert_eq!(manager.state(), ConnectionState::Connected);

    slot.lock().unwrap().take();
}

#[tokio::test]
async fn initial_connect_error_is_reported_and_retried() {
    let connector = MockConnector::scripted([Attempt::Reject("Not authorized".into())]);
    let (manager, recorder) = start(&connector, 10);

    manager.connect();
    connected(&manager).await;

    assert_eq!(connector.calls(), 2);
    assert_eq!(
        recorder.connection(),
        vec![ConnectionStatus::disconnected(), ConnectionStatus::connected()]
    );
    assert!(connector.servers()[0].is_closed());
}

#[tokio::test]
async fn reconnection_disabled_stays_disconnected() {
    let connector = MockConnector::new();
    let manager = RealtimeConnectionManager::new(
        config(10).with_reconnection(false),
        connector.clone(),
    );
    let recorder = Recorder::attach(&manager);
    manager.connect();
    connected(&manager).await;

    connector.server().drop_connection();
    wait_until("disconnect", || recorder.connection().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn fallback_transport_is_used_when_preferred_one_fails() {
    let preferred = MockConnector::scripted([Attempt::Refuse, Attempt::Refuse]);
    let fallback = MockConnector::new();
    let manager = RealtimeConnectionManager::new(
        config(10),
        FallbackConnector::new()
            .with(preferred.clone())
            .with(fallback.clone()),
    );
    manager.connect();
    connected(&manager).await;
    assert_eq!((preferred.calls(), fallback.calls()), (1, 1));

    // Every reconnection attempt starts again from the preferred transport.
    fallback.server().drop_connection();
    wait_until("reconnect over fallback", || {
        fallback.calls() == 2 && manager.is_connected()
    })
    .await;
    assert_eq!(preferred.calls(), 2);

    fallback.server().drop_connection();
    wait_until("reconnect over preferred", || {
        preferred.calls() == 3 && manager.is_connected()
    })
    .await;
    assert_eq!(fallback.calls(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn disconnect_during_backoff_stops_reconnection() {
    let connector = MockConnector::new();
    let (manager, _recorder) = start(&connector, 100);
    manager.connect();
    connected(&manager).await;

    connector.server().drop_connection();
    wait_until("disconnect", || !manager.is_connected()).await;
    manager.disconnect();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(connector.calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ════════════════════════════════════════════════════════════════════
// Server-initiated disconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn server_disconnect_triggers_one_manager_reconnect() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 20);
    manager.connect();
    connected(&manager).await;

    connector.server().kick();
    wait_until("reconnect", || connector.calls() == 2 && manager.is_connected()).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(connector.calls(), 2);
    assert_eq!(
        recorder.connection(),
        vec![
            ConnectionStatus::connected(),
            ConnectionStatus::disconnected(),
            ConnectionStatus::connected(),
        ]
    );
}

#[tokio::test]
async fn manual_connect_before_scheduled_reconnect_opens_no_second_transport() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 50);
    manager.connect();
    connected(&manager).await;

    connector.server().kick();
    wait_until("disconnect", || recorder.connection().len() == 2).await;
    manager.connect();
    connected(&manager).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(connector.calls(), 2);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn disconnect_cancels_scheduled_reconnect() {
    let connector = MockConnector::new();
    let (manager, recorder) = start(&connector, 50);
    manager.connect();
    connected(&manager).await;

    connector.server().kick();
    wait_until("disconnect", || recorder.connection().len() == 2).await;
    manager.disconnect();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(connector.calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ════════════════════════════════════════════════════════════════════
// End to end
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn end_to_end_session() {
    // (a) construct with a long delay so any retry would be visible late
    let connector = MockConnector::new();
    let manager = RealtimeConnectionManager::new(
        config(5_000),
        connector.clone(),
    );

    // (b) recorder on connection and stream:listeners
    let seen = Arc::new(StdMutex::new(Vec::new()));
    for kind in [EventKind::Connection, EventKind::StreamListeners] {
        let seen = Arc::clone(&seen);
        manager.on(
            kind,
            listener(move |event| seen.lock().unwrap().push(event.clone())),
        );
    }

    // (c, d)
    manager.connect();
    wait_until("connected", || seen.lock().unwrap().len() == 1).await;
    assert_eq!(
        seen.lock().unwrap()[0],
        RealtimeEvent::Connection(ConnectionStatus::connected())
    );

    // (e)
    let server = connector.server();
    server.emit("stream:listeners", json!({ "channelId": "c1", "count": 42 }));
    wait_until("listeners", || seen.lock().unwrap().len() == 2).await;
    assert_eq!(
        seen.lock().unwrap()[1],
        RealtimeEvent::StreamListeners(ListenerCount {
            channel_id: "c1".into(),
            count: 42,
            extra: Metadata::new(),
        })
    );

    // (f) transport close: reported, no manager-initiated reconnect
    server.drop_connection();
    wait_until("disconnected", || seen.lock().unwrap().len() == 3).await;
    assert_eq!(
        seen.lock().unwrap()[2],
        RealtimeEvent::Connection(ConnectionStatus::disconnected())
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Connecting);

    // (g)
    manager.disconnect();
    assert!(server.is_closed());
    assert!(!manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}
