//! Domain events and outbound commands of the `/streaming` namespace.
//!
//! Inbound `stream:*` events decode into [`ServerEvent`]; the manager
//! re-publishes them, plus its own `connection` notification, as
//! [`RealtimeEvent`]s keyed by the closed [`EventKind`] enum. Payloads pass
//! through unchanged: listeners see exactly what the server sent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{RealtimeError, Result};
use crate::protocol::SocketPacket;

/// Free-form metadata bag attached to a stream (show title, host, ...).
pub type Metadata = serde_json::Map<String, Value>;

// ── Payloads ────────────────────────────────────────────────────────

/// Payload of `stream:started` and `stream:start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub channel_id: String,
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Fields this client does not model, kept as received.
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Payload of `stream:stopped` and `stream:stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRef {
    #[serde(deserialize_with = "string_or_number")]
    pub channel_id: String,
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_id: Option<String>,
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Payload of `stream:metadata` and `stream:update-metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdate {
    #[serde(deserialize_with = "string_or_number")]
    pub channel_id: String,
    /// A `null` bag decodes as empty.
    #[serde(default, deserialize_with = "metadata_or_null")]
    pub metadata: Metadata,
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Payload of `stream:listeners`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerCount {
    #[serde(deserialize_with = "string_or_number")]
    pub channel_id: String,
    pub count: u64,
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Payload of the manager's `connection` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Set to `Some(true)` only once reconnection attempts are exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
}

impl ConnectionStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            failed: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            failed: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            connected: false,
            failed: Some(true),
        }
    }

    /// Returns `true` for the terminal "gave up reconnecting" notification.
    pub fn is_failed(&self) -> bool {
        self.failed.unwrap_or(false)
    }
}

// Channel and stream ids come from a JavaScript backend and are sometimes
// numbers. They are kept as strings on this side.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn metadata_or_null<'de, D>(deserializer: D) -> std::result::Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Event kinds ─────────────────────────────────────────────────────

/// The named events a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `connection`: connect, disconnect and failed notifications.
    Connection,
    /// `stream:started`
    StreamStarted,
    /// `stream:stopped`
    StreamStopped,
    /// `stream:metadata`
    StreamMetadata,
    /// `stream:listeners`
    StreamListeners,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Connection,
        EventKind::StreamStarted,
        EventKind::StreamStopped,
        EventKind::StreamMetadata,
        EventKind::StreamListeners,
    ];

    /// Event name as it appears on the wire (or, for `connection`, in the
    /// manager's public surface).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::StreamStarted => "stream:started",
            Self::StreamStopped => "stream:stopped",
            Self::StreamMetadata => "stream:metadata",
            Self::StreamListeners => "stream:listeners",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RealtimeError::Protocol(format!("unknown event name {s:?}")))
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// A domain event received from the streaming server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    StreamStarted(StreamInfo),
    StreamStopped(StreamRef),
    StreamMetadata(MetadataUpdate),
    StreamListeners(ListenerCount),
}

impl ServerEvent {
    /// Decode a Socket.IO event by name.
    ///
    /// Returns `Ok(None)` for event names this client does not handle.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Serialization`] if a known event carries a
    /// payload of the wrong shape.
    pub fn decode(name: &str, payload: Value) -> Result<Option<Self>> {
        let kind = match name.parse::<EventKind>() {
            Ok(kind) => kind,
            Err(_) => return Ok(None),
        };
        let event = match kind {
            EventKind::Connection => return Ok(None),
            EventKind::StreamStarted => Self::StreamStarted(serde_json::from_value(payload)?),
            EventKind::StreamStopped => Self::StreamStopped(serde_json::from_value(payload)?),
            EventKind::StreamMetadata => Self::StreamMetadata(serde_json::from_value(payload)?),
            EventKind::StreamListeners => Self::StreamListeners(serde_json::from_value(payload)?),
        };
        Ok(Some(event))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::StreamStarted(_) => EventKind::StreamStarted,
            Self::StreamStopped(_) => EventKind::StreamStopped,
            Self::StreamMetadata(_) => EventKind::StreamMetadata,
            Self::StreamListeners(_) => EventKind::StreamListeners,
        }
    }
}

/// An event delivered to listeners registered on the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Connection(ConnectionStatus),
    StreamStarted(StreamInfo),
    StreamStopped(StreamRef),
    StreamMetadata(MetadataUpdate),
    StreamListeners(ListenerCount),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connection(_) => EventKind::Connection,
            Self::StreamStarted(_) => EventKind::StreamStarted,
            Self::StreamStopped(_) => EventKind::StreamStopped,
            Self::StreamMetadata(_) => EventKind::StreamMetadata,
            Self::StreamListeners(_) => EventKind::StreamListeners,
        }
    }
}

impl From<ServerEvent> for RealtimeEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::StreamStarted(p) => Self::StreamStarted(p),
            ServerEvent::StreamStopped(p) => Self::StreamStopped(p),
            ServerEvent::StreamMetadata(p) => Self::StreamMetadata(p),
            ServerEvent::StreamListeners(p) => Self::StreamListeners(p),
        }
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// A fire-and-forget command for the streaming server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    /// `stream:start`
    StartStream(StreamInfo),
    /// `stream:stop`
    StopStream(StreamRef),
    /// `stream:update-metadata`
    UpdateMetadata(MetadataUpdate),
}

impl OutboundCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartStream(_) => "stream:start",
            Self::StopStream(_) => "stream:stop",
            Self::UpdateMetadata(_) => "stream:update-metadata",
        }
    }

    /// Build the Socket.IO event packet for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Serialization`] if the payload cannot be
    /// turned into JSON (not expected for these types).
    pub fn to_packet(&self, namespace: &str) -> Result<SocketPacket> {
        let payload = match self {
            Self::StartStream(p) => serde_json::to_value(p)?,
            Self::StopStream(p) => serde_json::to_value(p)?,
            Self::UpdateMetadata(p) => serde_json::to_value(p)?,
        };
        Ok(SocketPacket::event(namespace, self.name(), payload))
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
    fn event_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("stream:start".parse::<EventKind>().is_err());
    }

    #[test]
    fn metadata_event_keeps_payload_shape() {
        let event = ServerEvent::decode(
            "stream:metadata",
            json!({"channelId": "c1", "metadata": {"showTitle": "X"}}),
        )
        .unwrap()
        .unwrap();
        let ServerEvent::StreamMetadata(update) = event else {
            panic!("expected metadata event");
        };
        assert_eq!(update.channel_id, "c1");
        assert_eq!(update.metadata.get("showTitle"), Some(&json!("X")));
    }

    #[test]
    fn numeric_ids_become_strings() {
        let event = ServerEvent::decode(
            "stream:started",
            json!({"channelId": 7, "streamId": 1234}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::StreamStarted(StreamInfo {
                channel_id: "7".into(),
                stream_id: Some("1234".into()),
                metadata: None,
                extra: Metadata::new(),
            })
        );
    }

    #[test]
    fn unknown_events_are_not_errors() {
        assert!(ServerEvent::decode("chat:message", json!({})).unwrap().is_none());
        assert!(ServerEvent::decode("connection", json!({})).unwrap().is_none());
    }

    #[test]
    fn malformed_known_event_is_an_error() {
        assert!(ServerEvent::decode("stream:listeners", json!({"channelId": "c1"})).is_err());
        assert!(ServerEvent::decode("stream:stopped", json!({"channelId": true})).is_err());
    }

    #[test]
    fn connection_status_serializes_like_the_dashboard_expects() {
        assert_eq!(
            serde_json::to_value(ConnectionStatus::connected()).unwrap(),
            json!({"connected": true})
        );
        assert_eq!(
            serde_json::to_value(ConnectionStatus::failed()).unwrap(),
            json!({"connected": false, "failed": true})
        );
        assert!(ConnectionStatus::failed().is_failed());
        assert!(!ConnectionStatus::disconnected().is_failed());
    }

    #[test]
    fn start_command_packet() {
        let mut metadata = Metadata::new();
        metadata.insert("showTitle".into(), json!("Morning Raag"));
        let command = OutboundCommand::StartStream(StreamInfo {
            channel_id: "c1".into(),
            stream_id: Some("s9".into()),
            metadata: Some(metadata),
            extra: Metadata::new(),
        });
        let packet = command.to_packet("/streaming").unwrap();
        assert_eq!(packet.event_name(), Some("stream:start"));
        assert_eq!(
            packet.event_payload(),
            json!({"channelId": "c1", "streamId": "s9", "metadata": {"showTitle": "Morning Raag"}})
        );
    }

    #[test]
    fn unmodelled_fields_survive_decoding() {
        let payload = json!({
            "channelId": "c1",
            "streamId": "s1",
            "startedAt": "2024-05-01T06:00:00Z",
            "metadata": {"showTitle": "Breakfast"}
        });
        let event = ServerEvent::decode("stream:started", payload.clone())
            .unwrap()
            .unwrap();
        let ServerEvent::StreamStarted(info) = event else {
            panic!("expected stream:started");
        };
        assert_eq!(info.extra.get("startedAt"), Some(&json!("2024-05-01T06:00:00Z")));
        assert_eq!(serde_json::to_value(&info).unwrap(), payload);

        let count = ServerEvent::decode(
            "stream:listeners",
            json!({"channelId": "c1", "count": 3, "peak": 9}),
        )
        .unwrap()
        .unwrap();
        let ServerEvent::StreamListeners(count) = count else {
            panic!("expected stream:listeners");
        };
        assert_eq!(count.extra.get("peak"), Some(&json!(9)));
    }

    #[test]
    fn null_metadata_decodes_as_empty() {
        let event = ServerEvent::decode(
            "stream:metadata",
            json!({"channelId": "c1", "metadata": null}),
        )
        .unwrap()
        .unwrap();
        let ServerEvent::StreamMetadata(update) = event else {
            panic!("expected stream:metadata");
        };
        assert!(update.metadata.is_empty());
        assert!(update.extra.is_empty());

        let started = ServerEvent::decode(
            "stream:started",
            json!({"channelId": "c1", "metadata": null}),
        )
        .unwrap()
        .unwrap();
        let ServerEvent::StreamStarted(info) = started else {
            panic!("expected stream:started");
        };
        assert_eq!(info.metadata, None);
    }

    #[test]
    fn stop_command_omits_missing_stream_id() {
        let command = OutboundCommand::StopStream(StreamRef {
            channel_id: "c1".into(),
            stream_id: None,
            extra: Metadata::new(),
        });
        let packet = command.to_packet("/streaming").unwrap();
        assert_eq!(packet.event_payload(), json!({"channelId": "c1"}));
    }
}
