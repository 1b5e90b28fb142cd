//! Connection lifecycle state mirrored by the manager.

use std::fmt;
use std::time::Duration;

use crate::event::ServerEvent;

/// Where the manager believes the connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// Opening a transport or waiting for the transport to retry.
    Connecting,
    /// Namespace handshake completed.
    Connected,
    /// Reconnection attempt `attempt` is in flight.
    Reconnecting { attempt: u32 },
    /// Reconnection attempts are exhausted. Terminal until `connect()`.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Fixed-delay, capped reconnection policy plus the running attempt counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBudget {
    delay: Duration,
    max_attempts: u32,
    attempts_used: u32,
}

impl ReconnectBudget {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempts_used: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    /// Record reconnection attempt `attempt`. Returns `false` if it exceeds
    /// the budget.
    pub fn record_attempt(&mut self, attempt: u32) -> bool {
        self.attempts_used = attempt;
        attempt <= self.max_attempts
    }

    /// Called on every successful connection.
    pub fn reset(&mut self) {
        self.attempts_used = 0;
    }
}

/// Why an established session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server disconnected the namespace on purpose. The transport does
    /// not retry this on its own.
    ServerDisconnect,
    /// The transport closed (Engine.IO `close` or end of stream).
    TransportClose,
    /// The transport failed.
    TransportError(String),
    /// No heartbeat within `pingInterval + pingTimeout`.
    PingTimeout,
}

impl DisconnectReason {
    pub fn is_server_initiated(&self) -> bool {
        matches!(self, Self::ServerDisconnect)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerDisconnect => f.write_str("io server disconnect"),
            Self::TransportClose => f.write_str("transport close"),
            Self::TransportError(detail) => write!(f, "transport error: {detail}"),
            Self::PingTimeout => f.write_str("ping timeout"),
        }
    }
}

/// Low-level notifications from the connection engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Namespace handshake completed.
    Connect { sid: Option<String> },
    /// An established session ended.
    Disconnect(DisconnectReason),
    /// Reconnected after `attempt` attempts.
    Reconnect(u32),
    /// About to try reconnection attempt `attempt`.
    ReconnectAttempt(u32),
    /// A reconnection attempt failed.
    ReconnectError(String),
    /// All reconnection attempts failed; the engine has stopped.
    ReconnectFailed,
    /// The initial connection failed.
    ConnectError(String),
    /// A `stream:*` event from the server.
    Domain(ServerEvent),
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

    #[test]
    fn budget_tracks_and_resets_attempts() {
        let mut budget = ReconnectBudget::new(Duration::from_millis(1000), 3);
        assert!(budget.record_attempt(1));
        assert!(budget.record_attempt(3));
        assert_eq!(budget.attempts_used(), 3);
        assert!(!budget.record_attempt(4));
        budget.reset();
        assert_eq!(budget.attempts_used(), 0);
        assert_eq!(budget.delay(), Duration::from_millis(1000));
    }

    #[test]
    fn only_server_disconnect_is_server_initiated() {
        assert!(DisconnectReason::ServerDisconnect.is_server_initiated());
        assert!(!DisconnectReason::TransportClose.is_server_initiated());
        assert!(!DisconnectReason::PingTimeout.is_server_initiated());
        assert!(!DisconnectReason::TransportError("reset".into()).is_server_initiated());
    }

    #[test]
    fn reasons_use_socket_io_wording() {
        assert_eq!(
            DisconnectReason::ServerDisconnect.to_string(),
            "io server disconnect"
        );
        assert_eq!(DisconnectReason::TransportClose.to_string(), "transport close");
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 2 }.to_string(),
            "reconnecting (attempt 2)"
        );
    }
}
