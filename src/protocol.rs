//! Wire codec for the streaming server's Socket.IO endpoint.
//!
//! Two layers share each text frame:
//!
//! - **Engine.IO v4**: one type digit followed by an optional payload
//!   (`0` open, `1` close, `2` ping, `3` pong, `4` message, `5` upgrade,
//!   `6` noop).
//! - **Socket.IO v5**: carried inside an Engine.IO `message`: a type digit,
//!   an optional namespace terminated by `,`, an optional numeric ack id and
//!   an optional JSON payload. `42/streaming,["stream:started",{...}]` is an
//!   event on the `/streaming` namespace.
//!
//! Only text packets are supported. Binary attachments (Socket.IO types `5`
//! and `6`, Engine.IO `b` frames) are rejected with
//! [`RealtimeError::Protocol`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RealtimeError, Result};

/// Engine.IO protocol revision spoken by this client.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Namespace used when a Socket.IO packet carries none.
pub const ROOT_NAMESPACE: &str = "/";

// ── Engine.IO ───────────────────────────────────────────────────────

/// An Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// Handshake sent by the server when the transport opens (JSON payload).
    Open(String),
    /// Either side closes the session.
    Close,
    /// Heartbeat. In protocol v4 the server pings, the client pongs.
    Ping(String),
    /// Heartbeat reply.
    Pong(String),
    /// Payload for the Socket.IO layer.
    Message(String),
    /// Transport upgrade confirmation.
    Upgrade,
    /// Padding packet, ignored.
    Noop,
}

impl EnginePacket {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Protocol`] for empty frames, binary frames and
    /// unknown packet types.
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| RealtimeError::Protocol("empty engine.io frame".into()))?;
        let payload = chars.as_str();
        match kind {
            '0' => Ok(Self::Open(payload.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(payload.to_string())),
            '3' => Ok(Self::Pong(payload.to_string())),
            '4' => Ok(Self::Message(payload.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            'b' => Err(RealtimeError::Protocol(
                "binary engine.io frames are not supported".into(),
            )),
            other => Err(RealtimeError::Protocol(format!(
                "unknown engine.io packet type {other:?}"
            ))),
        }
    }

    /// Encode into a text frame.
    pub fn encode(&self) -> String {
        match self {
            Self::Open(payload) => format!("0{payload}"),
            Self::Close => "1".to_string(),
            Self::Ping(payload) => format!("2{payload}"),
            Self::Pong(payload) => format!("3{payload}"),
            Self::Message(payload) => format!("4{payload}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

/// Handshake payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id.
    pub sid: String,
    /// Transports the server would accept an upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    /// Maximum bytes per packet, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the client tolerates silence before declaring the session
    /// dead (`pingInterval + pingTimeout`).
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

// ── Socket.IO ───────────────────────────────────────────────────────

/// Socket.IO packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
}

impl SocketPacketKind {
    fn digit(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
        }
    }

    fn from_digit(digit: char) -> Result<Self> {
        match digit {
            '0' => Ok(Self::Connect),
            '1' => Ok(Self::Disconnect),
            '2' => Ok(Self::Event),
            '3' => Ok(Self::Ack),
            '4' => Ok(Self::ConnectError),
            '5' | '6' => Err(RealtimeError::Protocol(
                "binary socket.io packets are not supported".into(),
            )),
            other => Err(RealtimeError::Protocol(format!(
                "unknown socket.io packet type {other:?}"
            ))),
        }
    }
}

/// A Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: SocketPacketKind,
    /// Namespace, `/` when the frame omits it.
    pub namespace: String,
    /// Acknowledgement id, if the sender asked for one.
    pub id: Option<u64>,
    /// JSON payload.
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Namespace connect request (`0/nsp,`).
    pub fn connect(namespace: &str) -> Self {
        Self {
            kind: SocketPacketKind::Connect,
            namespace: namespace.to_string(),
            id: None,
            data: None,
        }
    }

    /// Namespace disconnect (`1/nsp,`).
    pub fn disconnect(namespace: &str) -> Self {
        Self {
            kind: SocketPacketKind::Disconnect,
            namespace: namespace.to_string(),
            id: None,
            data: None,
        }
    }

    /// Named event with a single argument (`2/nsp,["name",payload]`).
    pub fn event(namespace: &str, name: &str, payload: Value) -> Self {
        Self {
            kind: SocketPacketKind::Event,
            namespace: namespace.to_string(),
            id: None,
            data: Some(Value::Array(vec![Value::String(name.to_string()), payload])),
        }
    }

    /// Event name for `Event` packets.
    pub fn event_name(&self) -> Option<&str> {
        match (&self.kind, &self.data) {
            (SocketPacketKind::Event, Some(Value::Array(items))) => {
                items.first().and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// First argument after the event name, or `Null` if there is none.
    pub fn event_payload(&self) -> Value {
        match &self.data {
            Some(Value::Array(items)) => items.get(1).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Decode the Socket.IO packet inside an Engine.IO `message` payload.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Protocol`] for unknown or binary packet types
    /// and [`RealtimeError::Serialization`] when the JSON payload is invalid.
    pub fn decode(payload: &str) -> Result<Self> {
        let mut chars = payload.chars();
        let digit = chars
            .next()
            .ok_or_else(|| RealtimeError::Protocol("empty socket.io packet".into()))?;
        let kind = SocketPacketKind::from_digit(digit)?;
        let rest = chars.as_str();

        let (namespace, rest) = if rest.starts_with('/') {
            match rest.split_once(',') {
                Some((namespace, tail)) => (namespace.to_string(), tail),
                None => (rest.to_string(), ""),
            }
        } else {
            (ROOT_NAMESPACE.to_string(), rest)
        };

        let id_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (id, rest) = rest.split_at(id_len);
        let id = if id.is_empty() {
            None
        } else {
            Some(
                id.parse::<u64>()
                    .map_err(|e| RealtimeError::Protocol(format!("bad ack id {id:?}: {e}")))?,
            )
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        if kind == SocketPacketKind::Event && !matches!(data, Some(Value::Array(ref a)) if !a.is_empty())
        {
            return Err(RealtimeError::Protocol(
                "event packet without an event name".into(),
            ));
        }

        Ok(Self {
            kind,
            namespace,
            id,
            data,
        })
    }

    /// Encode into the payload of an Engine.IO `message`.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.namespace != ROOT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Encode and wrap in an Engine.IO `message`, ready for the transport.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

impl fmt::Display for SocketPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Normalize a namespace so it always starts with `/`.
pub fn normalize_namespace(namespace: &str) -> String {
    let trimmed = namespace.trim();
    if trimmed.is_empty() {
        ROOT_NAMESPACE.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn engine_packets_decode_by_type_digit() {
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(
            EnginePacket::decode("2").unwrap(),
            EnginePacket::Ping(String::new())
        );
        assert_eq!(
            EnginePacket::decode("2hello").unwrap(),
            EnginePacket::Ping("hello".into())
        );
        assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
        assert_eq!(
            EnginePacket::decode("40/streaming,").unwrap(),
            EnginePacket::Message("0/streaming,".into())
        );
    }

    #[test]
    fn engine_decode_rejects_garbage() {
        assert!(matches!(
            EnginePacket::decode(""),
            Err(RealtimeError::Protocol(_))
        ));
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(RealtimeError::Protocol(_))
        ));
        assert!(matches!(
            EnginePacket::decode("bAAEC"),
            Err(RealtimeError::Protocol(_))
        ));
    }

    #[test]
    fn pong_echoes_ping_payload() {
        let EnginePacket::Ping(payload) = EnginePacket::decode("2hello").unwrap() else {
            panic!("expected ping");
        };
        assert_eq!(EnginePacket::Pong(payload).encode(), "3hello");
    }

    #[test]
    fn handshake_parses_server_open_payload() {
        let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let EnginePacket::Open(json) = EnginePacket::decode(frame).unwrap() else {
            panic!("expected open");
        };
        let handshake: Handshake = serde_json::from_str(&json).unwrap();
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(handshake.max_payload, Some(1_000_000));
        assert_eq!(handshake.heartbeat_deadline(), Duration::from_secs(45));
    }

    #[test]
    fn connect_on_namespace_encodes_with_trailing_comma() {
        assert_eq!(SocketPacket::connect("/streaming").encode(), "0/streaming,");
        assert_eq!(SocketPacket::connect("/streaming").to_frame(), "40/streaming,");
    }

    #[test]
    fn root_namespace_is_omitted() {
        assert_eq!(SocketPacket::connect("/").encode(), "0");
        let packet = SocketPacket::decode(r#"2["hello",1]"#).unwrap();
        assert_eq!(packet.namespace, "/");
        assert_eq!(packet.event_name(), Some("hello"));
    }

    #[test]
    fn event_decodes_namespace_id_and_payload() {
        let packet =
            SocketPacket::decode(r#"2/streaming,12["stream:listeners",{"channelId":"c1","count":42}]"#)
                .unwrap();
        assert_eq!(packet.kind, SocketPacketKind::Event);
        assert_eq!(packet.namespace, "/streaming");
        assert_eq!(packet.id, Some(12));
        assert_eq!(packet.event_name(), Some("stream:listeners"));
        assert_eq!(packet.event_payload(), json!({"channelId": "c1", "count": 42}));
    }

    #[test]
    fn event_without_argument_has_null_payload() {
        let packet = SocketPacket::decode(r#"2/streaming,["stream:stopped"]"#).unwrap();
        assert_eq!(packet.event_payload(), Value::Null);
    }

    #[test]
    fn connect_ack_carries_sid() {
        let packet = SocketPacket::decode(r#"0/streaming,{"sid":"abc"}"#).unwrap();
        assert_eq!(packet.kind, SocketPacketKind::Connect);
        assert_eq!(packet.data, Some(json!({"sid": "abc"})));
    }

    #[test]
    fn namespace_disconnect_without_comma() {
        let packet = SocketPacket::decode("1/streaming").unwrap();
        assert_eq!(packet.kind, SocketPacketKind::Disconnect);
        assert_eq!(packet.namespace, "/streaming");
        assert!(packet.data.is_none());
    }

    #[test]
    fn event_packets_must_name_an_event() {
        assert!(SocketPacket::decode("2/streaming,[]").is_err());
        assert!(SocketPacket::decode("2/streaming,{}").is_err());
        assert!(SocketPacket::decode("2/streaming,").is_err());
    }

    #[test]
    fn binary_socket_packets_are_rejected() {
        assert!(matches!(
            SocketPacket::decode(r#"51-/streaming,["x",{"_placeholder":true,"num":0}]"#),
            Err(RealtimeError::Protocol(_))
        ));
    }

    #[test]
    fn invalid_json_payload_is_a_serialization_error() {
        assert!(matches!(
            SocketPacket::decode("2/streaming,[\"x\","),
            Err(RealtimeError::Serialization(_))
        ));
    }

    #[test]
    fn event_frame_encoding() {
        let frame =
            SocketPacket::event("/streaming", "stream:stop", json!({"channelId": "c1"})).to_frame();
        assert_eq!(frame, r#"42/streaming,["stream:stop",{"channelId":"c1"}]"#);
    }

    #[test]
    fn namespace_normalization() {
        assert_eq!(normalize_namespace("streaming"), "/streaming");
        assert_eq!(normalize_namespace("/streaming"), "/streaming");
        assert_eq!(normalize_namespace("  "), "/");
    }
}
