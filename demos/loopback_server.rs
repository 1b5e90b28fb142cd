//! # Loopback Server Example
//!
//! Runs the connection manager against an in-process fake server by
//! implementing [`Transport`] and [`Connector`] over Tokio channels. The same
//! approach works for plugging in any other I/O layer, or for driving the
//! manager from tests without a network.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_server
//! ```

use std::time::Duration;

use async_trait::async_trait;
use awaz_pulse_realtime::protocol::{EnginePacket, SocketPacket};
use awaz_pulse_realtime::transport::Connector;
use awaz_pulse_realtime::{
    listener, EventKind, RealtimeConfig, RealtimeConnectionManager, RealtimeError, RealtimeEvent,
    Transport,
};
use serde_json::json;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based transport
// ─────────────────────────────────────────────────────────────────────

struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, frame: String) -> Result<(), RealtimeError> {
        self.tx
            .send(frame)
            .map_err(|e| RealtimeError::TransportSend(e.to_string()))
    }

    /// `mpsc::UnboundedReceiver::recv` is cancel-safe, so this is too.
    async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.rx.close();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A connector that starts a fake server per connection
// ─────────────────────────────────────────────────────────────────────

struct LoopbackConnector;

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_server(server_tx, server_rx));
        Ok(Box::new(LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        }))
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

/// Speaks just enough Engine.IO / Socket.IO to host one stream.
async fn fake_server(tx: mpsc::UnboundedSender<String>, mut rx: mpsc::UnboundedReceiver<String>) {
    let open = json!({
        "sid": "loopback",
        "upgrades": [],
        "pingInterval": 25000,
        "pingTimeout": 20000,
    });
    let _ = tx.send(EnginePacket::Open(open.to_string()).encode());

    while let Some(frame) = rx.recv().await {
        let Ok(EnginePacket::Message(payload)) = EnginePacket::decode(&frame) else {
            continue;
        };
        let Ok(packet) = SocketPacket::decode(&payload) else {
            continue;
        };
        let namespace = packet.namespace.clone();
        let reply = |name: &str, body: serde_json::Value| {
            let _ = tx.send(SocketPacket::event(&namespace, name, body).to_frame());
        };

        match packet.event_name() {
            None => {
                // Namespace connect: acknowledge with a session id.
                let _ = tx.send(format!(r#"40{namespace},{{"sid":"ns-loopback"}}"#));
            }
            Some("stream:start") => {
                let mut started = packet.event_payload();
                started["streamId"] = json!("s-1");
                reply("stream:started", started);
                for count in [1, 4, 9] {
                    reply("stream:listeners", json!({ "channelId": "c1", "count": count }));
                }
            }
            Some("stream:update-metadata") => {
                reply("stream:metadata", packet.event_payload());
            }
            Some("stream:stop") => {
                reply("stream:stopped", packet.event_payload());
            }
            Some(other) => println!("[server] ignoring {other}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Use the manager as usual
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let manager = RealtimeConnectionManager::new(RealtimeConfig::default(), LoopbackConnector);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    for kind in EventKind::ALL {
        let event_tx = event_tx.clone();
        manager.on(
            kind,
            listener(move |event| {
                let _ = event_tx.send(event.clone());
            }),
        );
    }

    manager.connect();

    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                println!("[client] {}: {event:?}", event.kind());
                match event {
                    RealtimeEvent::Connection(status) if status.connected => {
                        manager.start_stream("c1", None, None);
                    }
                    RealtimeEvent::StreamListeners(count) if count.count >= 9 => {
                        manager.stop_stream("c1", Some("s-1".into()));
                    }
                    RealtimeEvent::StreamStopped(_) => break,
                    _ => {}
                }
            }
            () = &mut deadline => {
                println!("[client] timed out");
                break;
            }
        }
    }

    manager.disconnect();
    println!("[client] connected after disconnect: {}", manager.is_connected());
}
