//! Transport abstraction for the streaming connection.
//!
//! The [`Transport`] trait defines a bidirectional text frame channel between
//! the client and the streaming server. Engine.IO packets are text, so every
//! transport implementation only has to move complete frames (WebSocket
//! frames, HTTP long-polling payloads, in-process channels in tests).
//!
//! # Opening connections
//!
//! Unlike a one-shot client, the connection manager has to reopen the
//! transport every time it reconnects. Connection setup therefore lives
//! behind a second trait, [`Connector`], which the manager calls once per
//! attempt. [`FallbackConnector`] chains several connectors so a
//! low-latency transport can be preferred with a slower one as fallback.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use awaz_pulse_realtime::error::RealtimeError;
//! use awaz_pulse_realtime::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, frame: String) -> Result<(), RealtimeError> {
//!         // Write one Engine.IO text packet
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
//!         // Return the next Engine.IO text packet, None once closed
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RealtimeError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
//!         Ok(Box::new(MyTransport {}))
//!     }
//! }
//! ```

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::RealtimeError;

/// A bidirectional text frame transport.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because the
/// connection engine calls it inside `tokio::select!`. If `recv` is cancelled
/// before completion, calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, frame: String) -> Result<(), RealtimeError>;

    /// Receive the next text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed
    async fn recv(&mut self) -> Option<Result<String, RealtimeError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), RealtimeError>;
}

/// Opens new [`Transport`]s against a fixed server address.
///
/// Called once for the initial connection and once per reconnection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh transport.
    ///
    /// # Errors
    ///
    /// Any error means this attempt failed; the engine decides whether to
    /// retry.
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError>;

    /// Short label used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Tries a list of connectors in order and returns the first transport that
/// opens.
///
/// ```rust,ignore
/// let connector = FallbackConnector::new()
///     .with(WebSocketConnector::new(&config)?)
///     .with(MyPollingConnector::new(&config));
/// ```
#[derive(Default)]
pub struct FallbackConnector {
    connectors: Vec<Box<dyn Connector>>,
}

impl FallbackConnector {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connector to the end of the chain.
    #[must_use]
    pub fn with(mut self, connector: impl Connector) -> Self {
        self.connectors.push(Box::new(connector));
        self
    }

    /// Number of connectors in the chain.
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    /// Returns `true` if the chain has no connectors.
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

#[async_trait]
impl Connector for FallbackConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        let mut last_err = None;
        for connector in &self.connectors {
            match connector.connect().await {
                Ok(transport) => {
                    debug!(transport = connector.name(), "transport opened");
                    return Ok(transport);
                }
                Err(e) => {
                    warn!(transport = connector.name(), "transport failed, trying next: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(RealtimeError::TransportClosed))
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

impl std::fmt::Debug for FallbackConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.connectors.iter().map(|c| c.name()).collect();
        f.debug_struct("FallbackConnector")
            .field("connectors", &names)
            .finish()
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&mut self, _frame: String) -> Result<(), RealtimeError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
            None
        }

        async fn close(&mut self) -> Result<(), RealtimeError> {
            Ok(())
        }
    }

    struct CountingConnector {
        label: &'static str,
        succeed: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(Box::new(NullTransport))
            } else {
                Err(RealtimeError::Io(std::io::Error::other(self.label)))
            }
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    fn counting(label: &'static str, succeed: bool) -> (CountingConnector, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            CountingConnector {
                label,
                succeed,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    #[tokio::test]
    async fn fallback_prefers_first_connector() {
        let (first, first_calls) = counting("websocket", true);
        let (second, second_calls) = counting("polling", true);
        let chain = FallbackConnector::new().with(first).with(second);

        assert!(chain.connect().await.is_ok());
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_moves_on_after_failure() {
        let (first, first_calls) = counting("websocket", false);
        let (second, second_calls) = counting("polling", true);
        let chain = FallbackConnector::new().with(first).with(second);

        assert!(chain.connect().await.is_ok());
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_reports_last_error() {
        let (first, _) = counting("websocket", false);
        let (second, _) = counting("polling", false);
        let chain = FallbackConnector::new().with(first).with(second);

        let err = chain.connect().await.err().unwrap();
        assert!(err.to_string().contains("polling"), "got {err}");
    }

    #[tokio::test]
    async fn empty_fallback_fails() {
        let chain = FallbackConnector::new();
        assert!(chain.is_empty());
        assert!(matches!(
            chain.connect().await.err().unwrap(),
            RealtimeError::TransportClosed
        ));
    }
}
