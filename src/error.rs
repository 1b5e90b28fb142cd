//! Error types for the Awaz Pulse realtime client.

use thiserror::Error;

/// Errors raised inside the transport and connection-engine layers.
///
/// The public [`RealtimeConnectionManager`](crate::RealtimeConnectionManager)
/// methods never return these; failures reach callers as `connection`
/// events instead.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a JSON payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A frame did not follow the Engine.IO / Socket.IO packet format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server refused or broke off the namespace handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The configured server origin cannot be turned into a connection URL.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for realtime client operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
