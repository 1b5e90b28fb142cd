#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire fixture tests.
//!
//! Frames below are copied from a Socket.IO v4 server talking to the
//! `/streaming` namespace. Each fixture is decoded through the public codec
//! and, where the client produces the same frame, checked byte for byte.

use awaz_pulse_realtime::event::{OutboundCommand, ServerEvent};
use awaz_pulse_realtime::protocol::{
    EnginePacket, Handshake, SocketPacket, SocketPacketKind, ENGINE_IO_VERSION,
};
use awaz_pulse_realtime::{
    EventKind, ListenerCount, Metadata, MetadataUpdate, RealtimeError, StreamInfo, StreamRef,
};
use serde_json::json;

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

/// Decode an Engine.IO `message` frame down to its Socket.IO packet.
fn socket_packet(frame: &str) -> SocketPacket {
    match EnginePacket::decode(frame).expect("engine.io frame") {
        EnginePacket::Message(payload) => SocketPacket::decode(&payload).expect("socket.io packet"),
        other => panic!("expected message frame, got {other:?}"),
    }
}

/// Decode a `42/streaming,[...]` frame into a typed server event.
fn server_event(frame: &str) -> ServerEvent {
    let packet = socket_packet(frame);
    let name = packet.event_name().expect("event name");
    ServerEvent::decode(name, packet.event_payload())
        .expect("valid payload")
        .expect("known event")
}

// ════════════════════════════════════════════════════════════════════
// Engine.IO handshake
// ════════════════════════════════════════════════════════════════════

#[test]
fn engine_open_fixture() {
    let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    let EnginePacket::Open(payload) = EnginePacket::decode(frame).unwrap() else {
        panic!("expected open packet");
    };
    let handshake: Handshake = serde_json::from_str(&payload).unwrap();

    assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
    assert!(handshake.upgrades.is_empty());
    assert_eq!(handshake.max_payload, Some(1_000_000));
    assert_eq!(
        handshake.heartbeat_deadline(),
        std::time::Duration::from_millis(45_000)
    );
}

#[test]
fn engine_open_from_polling_lists_upgrades() {
    let payload = r#"{"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":5000}"#;
    let handshake: Handshake = serde_json::from_str(payload).unwrap();
    assert_eq!(handshake.upgrades, vec!["websocket".to_string()]);
    assert_eq!(handshake.max_payload, None);
}

#[test]
fn engine_version_is_four() {
    assert_eq!(ENGINE_IO_VERSION, 4);
}

#[test]
fn heartbeat_frames() {
    assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
    assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
    assert_eq!(
        EnginePacket::decode("2hello").unwrap(),
        EnginePacket::Ping("hello".into())
    );
    assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
    assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
}

#[test]
fn unsupported_engine_frames_are_protocol_errors() {
    for frame in ["", "bAQID", "9", "x"] {
        let err = EnginePacket::decode(frame).unwrap_err();
        assert!(
            matches!(err, RealtimeError::Protocol(_)),
            "{frame:?} should be rejected, got {err:?}"
        );
    }
}

// ════════════════════════════════════════════════════════════════════
// Socket.IO namespace handshake
// ════════════════════════════════════════════════════════════════════

#[test]
fn namespace_connect_request_matches_client_output() {
    assert_eq!(SocketPacket::connect("/streaming").to_frame(), "40/streaming,");
    assert_eq!(SocketPacket::connect("/").to_frame(), "40");
}

#[test]
fn namespace_connect_ack_fixture() {
    let packet = socket_packet(r#"40/streaming,{"sid":"wZX3oN0bSVIhsaknAAAI"}"#);
    assert_eq!(packet.kind, SocketPacketKind::Connect);
    assert_eq!(packet.namespace, "/streaming");
    assert_eq!(packet.data.unwrap()["sid"], "wZX3oN0bSVIhsaknAAAI");
}

#[test]
fn namespace_connect_error_fixture() {
    let packet = socket_packet(r#"44/streaming,{"message":"Not authorized"}"#);
    assert_eq!(packet.kind, SocketPacketKind::ConnectError);
    assert_eq!(packet.data.unwrap()["message"], "Not authorized");
}

#[test]
fn namespace_disconnect_fixture() {
    let packet = socket_packet("41/streaming,");
    assert_eq!(packet.kind, SocketPacketKind::Disconnect);
    assert_eq!(packet.namespace, "/streaming");
    assert_eq!(packet.data, None);
    assert_eq!(SocketPacket::disconnect("/streaming").to_frame(), "41/streaming,");
}

#[test]
fn root_namespace_event_fixture() {
    let packet = socket_packet(r#"42["hello",1]"#);
    assert_eq!(packet.namespace, "/");
    assert_eq!(packet.event_name(), Some("hello"));
    assert_eq!(packet.event_payload(), json!(1));
}

#[test]
fn ack_id_is_parsed() {
    let packet = socket_packet(r#"42/streaming,17["stream:started",{"channelId":"c1"}]"#);
    assert_eq!(packet.id, Some(17));
    assert_eq!(packet.event_name(), Some("stream:started"));
    assert_eq!(packet.encode(), r#"2/streaming,17["stream:started",{"channelId":"c1"}]"#);
}

#[test]
fn binary_and_malformed_socket_packets_are_rejected() {
    assert!(matches!(
        SocketPacket::decode(r#"51-/streaming,["upload",{"_placeholder":true,"num":0}]"#),
        Err(RealtimeError::Protocol(_))
    ));
    assert!(matches!(
        SocketPacket::decode("2/streaming,[]"),
        Err(RealtimeError::Protocol(_))
    ));
    assert!(matches!(
        SocketPacket::decode("2/streaming,{not json"),
        Err(RealtimeError::Serialization(_))
    ));
}

// ════════════════════════════════════════════════════════════════════
// Inbound stream events
// ════════════════════════════════════════════════════════════════════

#[test]
fn stream_started_fixture() {
    let event = server_event(
        r#"42/streaming,["stream:started",{"channelId":"c1","streamId":"s-88","metadata":{"showTitle":"Breakfast","host":"Amina"}}]"#,
    );
    let ServerEvent::StreamStarted(info) = event else {
        panic!("expected stream:started");
    };
    assert_eq!(info.channel_id, "c1");
    assert_eq!(info.stream_id.as_deref(), Some("s-88"));
    assert_eq!(info.metadata.unwrap()["host"], "Amina");
}

#[test]
fn stream_stopped_fixture_with_numeric_ids() {
    let event = server_event(r#"42/streaming,["stream:stopped",{"channelId":12,"streamId":340}]"#);
    assert_eq!(
        event,
        ServerEvent::StreamStopped(StreamRef {
            channel_id: "12".into(),
            stream_id: Some("340".into()),
            extra: Metadata::new(),
        })
    );
    assert_eq!(event.kind(), EventKind::StreamStopped);
}

#[test]
fn stream_metadata_fixture() {
    let event = server_event(
        r#"42/streaming,["stream:metadata",{"channelId":"c1","metadata":{"showTitle":"X"}}]"#,
    );
    let mut metadata = Metadata::new();
    metadata.insert("showTitle".into(), json!("X"));
    assert_eq!(
        event,
        ServerEvent::StreamMetadata(MetadataUpdate {
            channel_id: "c1".into(),
            metadata,
            extra: Metadata::new(),
        })
    );
}

#[test]
fn stream_listeners_fixture() {
    let event = server_event(r#"42/streaming,["stream:listeners",{"channelId":"c1","count":42}]"#);
    assert_eq!(
        event,
        ServerEvent::StreamListeners(ListenerCount {
            channel_id: "c1".into(),
            count: 42,
            extra: Metadata::new(),
        })
    );
}

#[test]
fn unknown_events_decode_to_none() {
    let packet = socket_packet(r#"42/streaming,["stream:chat",{"text":"hi"}]"#);
    let decoded = ServerEvent::decode(packet.event_name().unwrap(), packet.event_payload());
    assert!(matches!(decoded, Ok(None)));
}

#[test]
fn malformed_known_event_is_an_error() {
    let packet = socket_packet(r#"42/streaming,["stream:listeners",{"channelId":"c1","count":"many"}]"#);
    assert!(ServerEvent::decode(packet.event_name().unwrap(), packet.event_payload()).is_err());
}

// ════════════════════════════════════════════════════════════════════
// Outbound commands
// ════════════════════════════════════════════════════════════════════

#[test]
fn start_stream_frame() {
    let command = OutboundCommand::StartStream(StreamInfo {
        channel_id: "c1".into(),
        stream_id: Some("s1".into()),
        metadata: None,
        extra: Metadata::new(),
    });
    let frame = command.to_packet("/streaming").unwrap().to_frame();
    assert_eq!(
        frame,
        r#"42/streaming,["stream:start",{"channelId":"c1","streamId":"s1"}]"#
    );
}

#[test]
fn stop_stream_frame_without_stream_id() {
    let command = OutboundCommand::StopStream(StreamRef {
        channel_id: "c1".into(),
        stream_id: None,
        extra: Metadata::new(),
    });
    assert_eq!(
        command.to_packet("/streaming").unwrap().to_frame(),
        r#"42/streaming,["stream:stop",{"channelId":"c1"}]"#
    );
}

#[test]
fn update_metadata_frame_decodes_as_sent() {
    let mut metadata = Metadata::new();
    metadata.insert("showTitle".into(), json!("Late Night"));
    metadata.insert("host".into(), json!("Bilal"));
    let command = OutboundCommand::UpdateMetadata(MetadataUpdate {
        channel_id: "c1".into(),
        metadata,
        extra: Metadata::new(),
    });

    let packet = socket_packet(&command.to_packet("/streaming").unwrap().to_frame());
    assert_eq!(packet.event_name(), Some("stream:update-metadata"));
    assert_eq!(
        packet.event_payload(),
        json!({ "channelId": "c1", "metadata": { "host": "Bilal", "showTitle": "Late Night" } })
    );
}
