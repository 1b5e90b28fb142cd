//! HTTP long-polling transport using `reqwest`.
//!
//! Engine.IO's polling transport carries the same text packets as the
//! WebSocket one, batched into HTTP bodies and separated by `\x1e`. A `GET`
//! blocks until the server has a batch for the client; a `POST` delivers the
//! client's frames. The first `GET` (without `sid`) returns the `open`
//! packet that names the session.
//!
//! It is slower than WebSocket but survives proxies that refuse upgrades,
//! which is why [`default_connector`](super::default_connector) keeps it as
//! the fallback.
//!
//! # Feature gate
//!
//! Only available with the `transport-polling` feature (enabled by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{endpoint_url, Endpoint};
use crate::error::RealtimeError;
use crate::manager::RealtimeConfig;
use crate::protocol::{EnginePacket, Handshake};
use crate::transport::{Connector, Transport};

/// Separates packets inside one polling body.
const RECORD_SEPARATOR: char = '\u{1e}';

type Incoming = Result<String, RealtimeError>;

/// A [`Transport`] backed by an Engine.IO long-polling session.
///
/// A background task keeps one `GET` outstanding and queues what it
/// receives, so [`recv`](Transport::recv) only reads a channel.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: frames stay queued until a
/// `recv` call returns them.
#[derive(Debug)]
pub struct PollingTransport {
    client: Client,
    /// Endpoint URL including `&sid=`.
    url: String,
    sid: String,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    poller: JoinHandle<()>,
    closed: bool,
}

impl PollingTransport {
    /// Open a polling session at `endpoint`
    /// (`http(s)://host/socket.io/?EIO=4&transport=polling`).
    ///
    /// The `open` packet is handed back by the first [`recv`](Transport::recv)
    /// like on any other transport.
    ///
    /// # Errors
    ///
    /// - [`RealtimeError::Timeout`] if the handshake request takes longer
    ///   than `timeout`.
    /// - [`RealtimeError::Io`] if the server cannot be reached.
    /// - [`RealtimeError::Handshake`] if the first body does not start with
    ///   an `open` packet.
    pub async fn connect(
        client: Client,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, RealtimeError> {
        debug!(url = %endpoint, "opening polling session");

        let response = client
            .get(endpoint)
            .timeout(timeout)
            .send()
            .await
            .map_err(request_error)?;
        let body = read_body(response).await?;
        let frames = split_payload(&body);

        let sid = match frames.first().map(|frame| EnginePacket::decode(frame)) {
            Some(Ok(EnginePacket::Open(payload))) => {
                serde_json::from_str::<Handshake>(&payload)?.sid
            }
            _ => {
                return Err(RealtimeError::Handshake(format!(
                    "expected engine.io open packet, got {body:?}"
                )));
            }
        };

        let url = format!("{endpoint}&sid={sid}");
        let (tx, incoming) = mpsc::unbounded_channel();
        for frame in frames {
            let _ = tx.send(Ok(frame));
        }
        let poller = tokio::spawn(poll(client.clone(), url.clone(), tx));

        debug!(%sid, "polling session open");
        Ok(Self {
            client,
            url,
            sid,
            incoming,
            poller,
            closed: false,
        })
    }

    /// Engine.IO session id assigned by the server.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    async fn post(&self, body: String) -> Result<(), RealtimeError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(|e| RealtimeError::TransportSend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RealtimeError::TransportSend(format!(
                "polling post failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for PollingTransport {
    async fn send(&mut self, frame: String) -> Result<(), RealtimeError> {
        if self.closed {
            return Err(RealtimeError::TransportClosed);
        }
        self.post(frame).await
    }

    async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.poller.abort();
        self.post(EnginePacket::Close.encode()).await
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

/// Keep one `GET` outstanding until the session ends or the transport is
/// dropped.
async fn poll(client: Client, url: String, frames: mpsc::UnboundedSender<Incoming>) {
    loop {
        let body = match client.get(&url).send().await {
            Ok(response) => read_body(response).await,
            Err(e) => Err(RealtimeError::TransportReceive(e.to_string())),
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                warn!("polling request failed: {e}");
                let _ = frames.send(Err(e));
                return;
            }
        };

        for frame in split_payload(&body) {
            let closing = matches!(EnginePacket::decode(&frame), Ok(EnginePacket::Close));
            if frames.send(Ok(frame)).is_err() || closing {
                return;
            }
        }
    }
}

async fn read_body(response: Response) -> Result<String, RealtimeError> {
    let status = response.status();
    if !status.is_success() {
        return Err(RealtimeError::TransportReceive(format!(
            "polling request failed: {status}"
        )));
    }
    response
        .text()
        .await
        .map_err(|e| RealtimeError::TransportReceive(e.to_string()))
}

fn request_error(e: reqwest::Error) -> RealtimeError {
    if e.is_timeout() {
        RealtimeError::Timeout
    } else {
        RealtimeError::Io(std::io::Error::other(e))
    }
}

fn split_payload(body: &str) -> Vec<String> {
    body.split(RECORD_SEPARATOR)
        .filter(|frame| !frame.is_empty())
        .map(str::to_string)
        .collect()
}

/// Opens [`PollingTransport`]s against the Engine.IO endpoint of a server.
#[derive(Debug, Clone)]
pub struct PollingConnector {
    client: Client,
    url: String,
    timeout: Duration,
}

impl PollingConnector {
    /// Derive the endpoint URL from `config.server_url` and `config.path`.
    ///
    /// `ws` becomes `http` and `wss` becomes `https`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidUrl`] for an unsupported origin and
    /// [`RealtimeError::Io`] if the HTTP client cannot be built.
    pub fn new(config: &RealtimeConfig) -> Result<Self, RealtimeError> {
        let url = endpoint_url(&config.server_url, &config.path, Endpoint::Polling)?;
        Ok(Self {
            client: build_client()?,
            url,
            timeout: config.connect_timeout,
        })
    }

    /// Use `url` verbatim, e.g. one that already carries a query string.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Io`] if the HTTP client cannot be built.
    pub fn from_url(url: impl Into<String>) -> Result<Self, RealtimeError> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
            timeout: RealtimeConfig::default().connect_timeout,
        })
    }

    /// Share an existing client (proxy settings, TLS roots, ...).
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn build_client() -> Result<Client, RealtimeError> {
    Client::builder()
        .build()
        .map_err(|e| RealtimeError::Io(std::io::Error::other(e)))
}

#[async_trait]
impl Connector for PollingConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        let transport =
            PollingTransport::connect(self.client.clone(), &self.url, self.timeout).await?;
        Ok(Box::new(transport))
    }

    fn name(&self) -> &str {
        "polling"
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
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    const OPEN: &str =
        r#"0{"sid":"poll-1","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000}"#;

    /// Engine.IO polling endpoint that serves queued frames and records
    /// posted ones.
    struct FakeServer {
        outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
        posted: StdMutex<Vec<String>>,
        sids: StdMutex<Vec<Option<String>>>,
    }

    async fn long_poll(
        State(server): State<Arc<FakeServer>>,
        Query(query): Query<HashMap<String, String>>,
    ) -> (StatusCode, String) {
        server.sids.lock().unwrap().push(query.get("sid").cloned());
        if query.get("transport").map(String::as_str) != Some("polling") {
            return (StatusCode::BAD_REQUEST, "unknown transport".into());
        }
        if !query.contains_key("sid") {
            return (StatusCode::OK, OPEN.to_string());
        }
        let mut outbound = server.outbound.lock().await;
        match outbound.recv().await {
            Some(first) => {
                let mut batch = vec![first];
                while let Ok(more) = outbound.try_recv() {
                    batch.push(more);
                }
                (StatusCode::OK, batch.join("\u{1e}"))
            }
            None => (StatusCode::BAD_REQUEST, "session closed".into()),
        }
    }

    async fn receive_post(State(server): State<Arc<FakeServer>>, body: String) -> &'static str {
        server
            .posted
            .lock()
            .unwrap()
            .extend(split_payload(&body));
        "ok"
    }

    /// Start the server and return its endpoint URL, the sender feeding
    /// `GET` responses, and the shared state.
    async fn start_server() -> (String, mpsc::UnboundedSender<String>, Arc<FakeServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = Arc::new(FakeServer {
            outbound: tokio::sync::Mutex::new(rx),
            posted: StdMutex::new(Vec::new()),
            sids: StdMutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/socket.io/", get(long_poll).post(receive_post))
            .with_state(Arc::clone(&server));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = format!("http://{addr}/socket.io/?EIO=4&transport=polling");
        (url, tx, server)
    }

    #[test]
    fn payload_is_split_on_record_separator() {
        assert_eq!(
            split_payload("2\u{1e}42/streaming,[\"a\"]\u{1e}"),
            vec!["2".to_string(), "42/streaming,[\"a\"]".to_string()]
        );
        assert!(split_payload("").is_empty());
    }

    #[test]
    fn connector_maps_ws_origin_to_http() {
        let connector = PollingConnector::new(&RealtimeConfig::new("ws://localhost:5000")).unwrap();
        assert_eq!(
            connector.url(),
            "http://localhost:5000/socket.io/?EIO=4&transport=polling"
        );
        assert_eq!(connector.name(), "polling");
    }

    #[tokio::test]
    async fn session_carries_frames_both_ways() {
        let (url, outbound, server) = start_server().await;

        let mut transport = PollingTransport::connect(Client::new(), &url, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(transport.sid(), "poll-1");
        assert_eq!(transport.recv().await.unwrap().unwrap(), OPEN);

        transport.send("40/streaming,".to_string()).await.unwrap();
        outbound
            .send(r#"40/streaming,{"sid":"ns1"}"#.to_string())
            .unwrap();
        outbound.send("2".to_string()).unwrap();

        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"40/streaming,{"sid":"ns1"}"#
        );
        assert_eq!(transport.recv().await.unwrap().unwrap(), "2");

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(
            *server.posted.lock().unwrap(),
            vec!["40/streaming,".to_string(), "1".to_string()]
        );
        assert!(server
            .sids
            .lock()
            .unwrap()
            .iter()
            .skip(1)
            .all(|sid| sid.as_deref() == Some("poll-1")));

        let err = transport.send("3".to_string()).await.unwrap_err();
        assert!(matches!(err, RealtimeError::TransportClosed));
    }

    #[tokio::test]
    async fn server_close_packet_ends_the_stream() {
        let (url, outbound, _server) = start_server().await;
        let mut transport = PollingTransport::connect(Client::new(), &url, Duration::from_secs(2))
            .await
            .unwrap();
        transport.recv().await.unwrap().unwrap();

        outbound.send("1".to_string()).unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "1");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn failed_poll_surfaces_a_receive_error() {
        let (url, outbound, _server) = start_server().await;
        let mut transport = PollingTransport::connect(Client::new(), &url, Duration::from_secs(2))
            .await
            .unwrap();
        transport.recv().await.unwrap().unwrap();

        drop(outbound);
        let err = transport.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, RealtimeError::TransportReceive(_)));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let connector =
            PollingConnector::from_url("http://127.0.0.1:1/socket.io/?EIO=4&transport=polling")
                .unwrap();
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, RealtimeError::Io(_) | RealtimeError::Timeout));
    }

    #[tokio::test]
    async fn non_engine_io_server_fails_the_handshake() {
        let app = Router::new().route("/socket.io/", get(|| async { "hello" }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = format!("http://{addr}/socket.io/?EIO=4&transport=polling");
        let err = PollingTransport::connect(Client::new(), &url, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Handshake(_)));
    }
}
