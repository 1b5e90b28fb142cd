#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the realtime integration tests.
//!
//! [`MockConnector`] hands out channel-backed [`MockTransport`]s and keeps a
//! [`ServerHandle`] for each one, so a test can play the server side of the
//! Engine.IO / Socket.IO conversation frame by frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use awaz_pulse_realtime::transport::Connector;
use awaz_pulse_realtime::{
    listener, EventKind, RealtimeConnectionManager, RealtimeError, RealtimeEvent, Transport,
};
use serde_json::Value;
use tokio::sync::mpsc;

pub const NAMESPACE: &str = "/streaming";

/// Engine.IO open packet with a long heartbeat so tests never time out on it.
pub const OPEN: &str =
    r#"0{"sid":"eio-test","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

/// Socket.IO namespace connect acknowledgement.
pub fn namespace_ack(sid: &str) -> String {
    format!(r#"40{NAMESPACE},{{"sid":"{sid}"}}"#)
}

/// A `42` event frame on the streaming namespace.
pub fn event_frame(name: &str, payload: &Value) -> String {
    format!("42{NAMESPACE},{}", serde_json::json!([name, payload]))
}

// ── MockTransport ───────────────────────────────────────────────────

type Incoming = Option<Result<String, RealtimeError>>;

/// A channel-based mock transport.
///
/// Frames pushed through the paired [`ServerHandle`] are returned by `recv()`
/// in order. Everything the client sends is recorded.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), RealtimeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RealtimeError::TransportClosed);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            // The test dropped its handle; stay open until the client closes.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// The server's end of one [`MockTransport`].
#[derive(Clone)]
pub struct ServerHandle {
    incoming: mpsc::UnboundedSender<Incoming>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Deliver one raw frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.incoming.send(Some(Ok(frame.into())));
    }

    /// Deliver a `stream:*` event on the streaming namespace.
    pub fn emit(&self, name: &str, payload: Value) {
        self.push(event_frame(name, &payload));
    }

    /// End the stream as if the network dropped.
    pub fn drop_connection(&self) {
        let _ = self.incoming.send(None);
    }

    /// Fail the next receive with a transport error.
    pub fn fail(&self, message: &str) {
        let _ = self
            .incoming
            .send(Some(Err(RealtimeError::TransportReceive(message.into()))));
    }

    /// Disconnect the namespace from the server side (`io server disconnect`).
    pub fn kick(&self) {
        self.push(format!("41{NAMESPACE},"));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent `42` event frames decoded as `(name, payload)`.
    pub fn sent_events(&self) -> Vec<(String, Value)> {
        let prefix = format!("42{NAMESPACE},");
        self.sent()
            .iter()
            .filter_map(|frame| frame.strip_prefix(&prefix))
            .map(|json| {
                let value: Value = serde_json::from_str(json).unwrap();
                let name = value[0].as_str().unwrap().to_string();
                (name, value[1].clone())
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn mock_pair() -> (MockTransport, ServerHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let transport = MockTransport {
        incoming: rx,
        sent: Arc::clone(&sent),
        closed: Arc::clone(&closed),
    };
    let handle = ServerHandle {
        incoming: tx,
        sent,
        closed,
    };
    (transport, handle)
}

// ── MockConnector ───────────────────────────────────────────────────

/// What the mock server does with one connection attempt.
#[derive(Debug, Clone)]
pub enum Attempt {
    /// Open the transport and complete the handshake.
    Accept,
    /// Fail to open the transport.
    Refuse,
    /// Open the transport and answer the namespace connect with `44`.
    Reject(String),
    /// Open the transport and send nothing.
    Silent,
}

/// A scripted [`Connector`] that counts how often it is asked to connect.
///
/// Attempts follow the script; once the script runs out every attempt is
/// [`Attempt::Accept`].
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<StdMutex<VecDeque<Attempt>>>,
    servers: Arc<StdMutex<Vec<ServerHandle>>>,
    calls: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(attempts: impl IntoIterator<Item = Attempt>) -> Self {
        let connector = Self::default();
        connector.script.lock().unwrap().extend(attempts);
        connector
    }

    /// Number of times the manager asked for a transport.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Server handles of every transport opened so far.
    pub fn servers(&self) -> Vec<ServerHandle> {
        self.servers.lock().unwrap().clone()
    }

    /// The most recently opened transport.
    pub fn server(&self) -> ServerHandle {
        self.servers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport opened yet")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Accept);

        if matches!(attempt, Attempt::Refuse) {
            return Err(RealtimeError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let (transport, server) = mock_pair();
        match attempt {
            Attempt::Accept => {
                server.push(OPEN);
                server.push(namespace_ack(&format!("sid-{n}")));
            }
            Attempt::Reject(message) => {
                server.push(OPEN);
                server.push(format!(
                    r#"44{NAMESPACE},{}"#,
                    serde_json::json!({ "message": message })
                ));
            }
            Attempt::Silent | Attempt::Refuse => {}
        }
        self.servers.lock().unwrap().push(server);
        Ok(Box::new(transport))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ── Recorder ────────────────────────────────────────────────────────

/// Records every event the manager publishes.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<StdMutex<Vec<RealtimeEvent>>>,
}

impl Recorder {
    /// Subscribe a new recorder to every event kind.
    pub fn attach(manager: &RealtimeConnectionManager) -> Self {
        let recorder = Self::default();
        for kind in EventKind::ALL {
            let events = Arc::clone(&recorder.events);
            manager.on(
                kind,
                listener(move |event| events.lock().unwrap().push(event.clone())),
            );
        }
        recorder
    }

    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<RealtimeEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }

    /// `connection` payloads in arrival order.
    pub fn connection(&self) -> Vec<awaz_pulse_realtime::ConnectionStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RealtimeEvent::Connection(status) => Some(status),
                _ => None,
            })
            .collect()
    }
}

// ── Waiting ─────────────────────────────────────────────────────────

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
