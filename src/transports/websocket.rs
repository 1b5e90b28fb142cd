//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] moves Engine.IO text packets over one WebSocket
//! connection. Both `ws://` and `wss://` URLs are supported; TLS is handled
//! through [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! [`WebSocketConnector`] turns a configured server origin into the Engine.IO
//! endpoint URL and opens a fresh transport for every connection attempt.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), awaz_pulse_realtime::RealtimeError> {
//! use awaz_pulse_realtime::{RealtimeConfig, Transport, WebSocketConnector};
//! use awaz_pulse_realtime::transport::Connector;
//!
//! let connector = WebSocketConnector::new(&RealtimeConfig::new("http://localhost:5000"))?;
//! assert_eq!(
//!     connector.url(),
//!     "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
//! );
//!
//! let mut transport = connector.connect().await?;
//! if let Some(Ok(frame)) = transport.recv().await {
//!     println!("engine.io open packet: {frame}");
//! }
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use super::{endpoint_url, Endpoint};
use crate::error::RealtimeError;
use crate::manager::RealtimeConfig;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
///
/// Public so callers can build a [`WebSocketTransport`] from their own stream
/// via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// For custom TLS, proxies or extra headers, open the stream yourself and
/// wrap it with [`WebSocketTransport::from_stream`].
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes loses no frames, so it can sit inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Io`] if the URL is invalid or the connection
    /// cannot be established. An underlying I/O error keeps its
    /// [`ErrorKind`](std::io::ErrorKind); anything else maps to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, RealtimeError> {
        tracing::debug!(url = %url, "opening WebSocket");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            RealtimeError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::debug!(url = %url, "WebSocket open");

        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), RealtimeError> {
        if self.closed {
            return Err(RealtimeError::TransportClosed);
        }
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| RealtimeError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(RealtimeError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("binary frame on a text-only connection, skipping");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| RealtimeError::TransportSend(e.to_string()))
    }
}

/// Opens [`WebSocketTransport`]s against the Engine.IO endpoint of a server.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Derive the endpoint URL from `config.server_url` and `config.path`.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`; `ws(s)` origins are
    /// used as given.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidUrl`] for any other scheme or an
    /// origin without a host.
    pub fn new(config: &RealtimeConfig) -> Result<Self, RealtimeError> {
        Ok(Self {
            url: endpoint_url(&config.server_url, &config.path, Endpoint::WebSocket)?,
        })
    }

    /// Use `url` verbatim, e.g. one that already carries a query string.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        let transport = WebSocketTransport::connect(&self.url).await?;
        Ok(Box::new(transport))
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    fn websocket_transport_is_send_and_debug() {
        fn assert_send<T: Send + std::fmt::Debug>() {}
        assert_send::<WebSocketTransport>();
    }

    #[test]
    fn http_origin_maps_to_ws_endpoint() {
        let config = RealtimeConfig::new("http://localhost:5000");
        let connector = WebSocketConnector::new(&config).unwrap();
        assert_eq!(
            connector.url(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn https_origin_maps_to_wss_and_drops_trailing_path() {
        let url = endpoint_url(
            "https://api.awazpulse.example/",
            "/socket.io/",
            Endpoint::WebSocket,
        )
        .unwrap();
        assert_eq!(
            url,
            "wss://api.awazpulse.example/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn custom_path_is_normalized() {
        let url = endpoint_url("ws://127.0.0.1:9000", "realtime", Endpoint::WebSocket).unwrap();
        assert_eq!(url, "ws://127.0.0.1:9000/realtime/?EIO=4&transport=websocket");
    }

    #[test]
    fn unsupported_origins_are_rejected() {
        for origin in ["ftp://host", "localhost:5000", "http://", "http:///path"] {
            let err = endpoint_url(origin, "/socket.io/", Endpoint::WebSocket).unwrap_err();
            assert!(
                matches!(err, RealtimeError::InvalidUrl(_)),
                "{origin} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Io(_)));
    }

    // ── Local server helpers ─────────────────────────────────────────────

    use tokio::net::TcpListener;

    /// Accept one WebSocket connection, run `handler` on it and return the
    /// address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_yields_engine_io_frames_in_order() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(
                r#"0{"sid":"a","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text("2".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.unwrap().unwrap().starts_with("0{"));
        assert_eq!(transport.recv().await.unwrap().unwrap(), "2");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("6".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "6");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("3".to_string()).await.unwrap_err();
        assert!(matches!(err, RealtimeError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_opens_transport_that_sends() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let connector = WebSocketConnector::from_url(url);
        assert_eq!(connector.name(), "websocket");
        let mut transport = connector.connect().await.unwrap();
        transport.send("40/streaming,".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "40/streaming,");
    }
}
