//! # Awaz Pulse Realtime
//!
//! Client-side realtime connection manager for the Awaz Pulse streaming
//! server.
//!
//! One [`RealtimeConnectionManager`] owns the single live connection to the
//! server's `/streaming` Socket.IO namespace. Pages subscribe to stream
//! lifecycle events with [`on`](RealtimeConnectionManager::on) and issue
//! fire-and-forget stream commands; the manager mirrors the connection state
//! and retries with a fixed delay when the link drops.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and
//!   [`Connector`](transport::Connector) for any backend
//! - **WebSocket with polling fallback**: the default `transport-websocket`
//!   and `transport-polling` features provide [`WebSocketConnector`] and
//!   [`PollingConnector`], chained by
//!   [`with_default_transports`](RealtimeConnectionManager::with_default_transports)
//! - **Typed events**: listeners receive [`RealtimeEvent`] values keyed by
//!   [`EventKind`]
//! - **Bounded reconnection**: fixed delay, capped attempts, terminal
//!   `failed` report
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use awaz_pulse_realtime::{
//!     listener, EventKind, RealtimeConfig, RealtimeConnectionManager, RealtimeEvent,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), awaz_pulse_realtime::RealtimeError> {
//! let manager = RealtimeConnectionManager::with_default_transports(RealtimeConfig::default())?;
//!
//! manager.on(
//!     EventKind::StreamListeners,
//!     listener(|event| {
//!         if let RealtimeEvent::StreamListeners(count) = event {
//!             println!("{} listeners on {}", count.count, count.channel_id);
//!         }
//!     }),
//! );
//! manager.connect();
//! # Ok(())
//! # }
//! ```

mod engine;
pub mod error;
pub mod event;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use error::RealtimeError;
pub use event::{
    ConnectionStatus, EventKind, ListenerCount, Metadata, MetadataUpdate, RealtimeEvent,
    StreamInfo, StreamRef,
};
pub use manager::{RealtimeConfig, RealtimeConnectionManager};
pub use registry::{listener, Listener};
pub use state::{ConnectionState, DisconnectReason};
pub use transport::Transport;

#[cfg(feature = "transport-polling")]
pub use transports::{PollingConnector, PollingTransport};
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
