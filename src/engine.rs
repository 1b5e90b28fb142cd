//! Background connection engine.
//!
//! One engine task owns at most one live [`Transport`] at a time. It opens
//! transports through a [`Connector`], performs the Engine.IO / Socket.IO
//! namespace handshake, answers heartbeats, multiplexes outbound commands
//! and inbound frames via `tokio::select!`, and retries with a fixed delay
//! up to the configured attempt cap. Everything it observes is reported to
//! an [`EventSink`] as a [`TransportEvent`]; the engine itself never touches
//! the manager's state or listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{RealtimeError, Result};
use crate::event::{OutboundCommand, ServerEvent};
use crate::protocol::{EnginePacket, Handshake, SocketPacket, SocketPacketKind};
use crate::state::{DisconnectReason, TransportEvent};
use crate::transport::{Connector, Transport};

/// Receiver of engine notifications.
pub(crate) trait EventSink: Send + Sync + 'static {
    /// Handle one event from engine run `generation`.
    fn on_transport_event(&self, generation: u64, event: TransportEvent);

    /// Engine run `generation` has exited and holds no transport.
    fn on_engine_exit(&self, generation: u64);
}

/// Engine tuning derived from the manager's configuration.
#[derive(Debug, Clone)]
pub(crate) struct EngineSettings {
    pub namespace: String,
    pub reconnection: bool,
    pub reconnection_delay: Duration,
    pub max_reconnection_attempts: u32,
    pub connect_timeout: Duration,
}

/// Channels and shared flags handed to an engine run.
pub(crate) struct EngineHandles {
    pub generation: u64,
    pub commands: mpsc::UnboundedReceiver<OutboundCommand>,
    pub shutdown: oneshot::Receiver<()>,
    /// Live "handshake done and session open" flag read by `is_connected`.
    pub live: Arc<AtomicBool>,
    pub sink: Weak<dyn EventSink>,
}

/// How a session loop ended.
enum SessionEnd {
    Disconnected(DisconnectReason),
    /// The command channel closed; nobody is left to serve.
    Abandoned,
}

/// What to do with one inbound frame.
enum Inbound {
    Ignore,
    Heartbeat(String),
    Event(ServerEvent),
    End(DisconnectReason),
}

pub(crate) struct Engine {
    connector: Arc<dyn Connector>,
    settings: EngineSettings,
    generation: u64,
    commands: mpsc::UnboundedReceiver<OutboundCommand>,
    live: Arc<AtomicBool>,
    sink: Weak<dyn EventSink>,
    transport: Option<Box<dyn Transport>>,
    heartbeat: Duration,
}

impl Engine {
    /// Spawnable entry point. Runs until the session ends for good or the
    /// shutdown signal fires.
    pub(crate) async fn run(
        connector: Arc<dyn Connector>,
        settings: EngineSettings,
        handles: EngineHandles,
    ) {
        let EngineHandles {
            generation,
            commands,
            mut shutdown,
            live,
            sink,
        } = handles;

        let mut engine = Engine {
            connector,
            settings,
            generation,
            commands,
            live,
            sink,
            transport: None,
            heartbeat: Duration::MAX,
        };

        debug!(
            generation,
            namespace = %engine.settings.namespace,
            "connection engine started"
        );

        tokio::select! {
            _ = &mut shutdown => {
                debug!(generation, "shutdown signal received");
            }
            () = engine.drive() => {}
        }

        engine.release().await;
        if let Some(sink) = engine.sink.upgrade() {
            sink.on_engine_exit(generation);
        }
        debug!(generation, "connection engine exited");
    }

    /// Connect, serve, and reconnect until there is nothing left to do.
    async fn drive(&mut self) {
        match self.open().await {
            Ok(sid) => {
                if !self.emit(TransportEvent::Connect { sid }) {
                    return;
                }
            }
            Err(e) => {
                warn!(connector = self.connector.name(), "connect error: {e}");
                if !self.emit(TransportEvent::ConnectError(e.to_string())) {
                    return;
                }
                if !self.settings.reconnection || !self.reconnect().await {
                    return;
                }
            }
        }

        loop {
            let end = self.serve().await;
            self.live.store(false, Ordering::Release);
            let reason = match end {
                SessionEnd::Disconnected(reason) => reason,
                SessionEnd::Abandoned => {
                    debug!("command channel closed, stopping engine");
                    return;
                }
            };
            self.discard_queued_commands();

            // The old transport is finished either way; a server-initiated
            // disconnect still deserves a close frame.
            self.release().await;

            let server_initiated = reason.is_server_initiated();
            if !self.emit(TransportEvent::Disconnect(reason)) {
                return;
            }
            if server_initiated || !self.settings.reconnection {
                return;
            }
            if !self.reconnect().await {
                return;
            }
        }
    }

    /// Fixed-delay reconnection loop. Returns `true` once a new session is
    /// established.
    async fn reconnect(&mut self) -> bool {
        let max = self.settings.max_reconnection_attempts;
        for attempt in 1..=max {
            tokio::time::sleep(self.settings.reconnection_delay).await;
            if !self.emit(TransportEvent::ReconnectAttempt(attempt)) {
                return false;
            }
            match self.open().await {
                Ok(sid) => {
                    info!(attempt, "reconnected");
                    return self.emit(TransportEvent::Reconnect(attempt))
                        && self.emit(TransportEvent::Connect { sid });
                }
                Err(e) => {
                    warn!(attempt, max, "reconnection attempt failed: {e}");
                    if !self.emit(TransportEvent::ReconnectError(e.to_string())) {
                        return false;
                    }
                }
            }
        }
        error!(attempts = max, "reconnection attempts exhausted");
        self.emit(TransportEvent::ReconnectFailed);
        false
    }

    /// Open a transport and complete the namespace handshake.
    async fn open(&mut self) -> Result<Option<String>> {
        let timeout = self.settings.connect_timeout;
        let mut transport = tokio::time::timeout(timeout, self.connector.connect())
            .await
            .map_err(|_| RealtimeError::Timeout)??;

        let outcome = tokio::time::timeout(
            timeout,
            handshake(transport.as_mut(), &self.settings.namespace),
        )
        .await
        .map_err(|_| RealtimeError::Timeout)
        .and_then(|r| r);

        match outcome {
            Ok((handshake, sid)) => {
                self.heartbeat = handshake.heartbeat_deadline();
                self.transport = Some(transport);
                // Anything still queued was issued against a session that no
                // longer exists.
                self.discard_queued_commands();
                self.live.store(true, Ordering::Release);
                debug!(
                    engine_sid = %handshake.sid,
                    sid = sid.as_deref().unwrap_or("-"),
                    "namespace handshake complete"
                );
                Ok(sid)
            }
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    }

    /// Serve an established session until it ends.
    async fn serve(&mut self) -> SessionEnd {
        let Self {
            transport,
            commands,
            settings,
            sink,
            generation,
            heartbeat,
            ..
        } = self;
        let Some(transport) = transport.as_mut() else {
            return SessionEnd::Disconnected(DisconnectReason::TransportClose);
        };
        let namespace = settings.namespace.as_str();
        let deadline = *heartbeat;

        let ping_timer = tokio::time::sleep(deadline);
        tokio::pin!(ping_timer);

        loop {
            tokio::select! {
                // Branch 1: outbound command from the manager
                command = commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Abandoned;
                    };
                    let frame = match command.to_packet(namespace) {
                        Ok(packet) => packet.to_frame(),
                        Err(e) => {
                            error!(command = command.name(), "failed to encode command: {e}");
                            continue;
                        }
                    };
                    debug!(command = command.name(), "sending command");
                    if let Err(e) = transport.send(frame).await {
                        error!("transport send error: {e}");
                        return SessionEnd::Disconnected(DisconnectReason::TransportError(
                            e.to_string(),
                        ));
                    }
                }

                // Branch 2: heartbeat deadline
                () = &mut ping_timer => {
                    warn!(?deadline, "no ping from server");
                    return SessionEnd::Disconnected(DisconnectReason::PingTimeout);
                }

                // Branch 3: inbound frame
                incoming = transport.recv() => {
                    let frame = match incoming {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            error!("transport receive error: {e}");
                            return SessionEnd::Disconnected(DisconnectReason::TransportError(
                                e.to_string(),
                            ));
                        }
                        None => {
                            debug!("transport closed");
                            return SessionEnd::Disconnected(DisconnectReason::TransportClose);
                        }
                    };
                    match classify(&frame, namespace) {
                        Inbound::Ignore => {}
                        Inbound::Heartbeat(pong) => {
                            if let Some(at) = Instant::now().checked_add(deadline) {
                                ping_timer.as_mut().reset(at);
                            }
                            if let Err(e) = transport.send(pong).await {
                                return SessionEnd::Disconnected(DisconnectReason::TransportError(
                                    e.to_string(),
                                ));
                            }
                        }
                        Inbound::Event(event) => {
                            if !emit_to(sink, *generation, TransportEvent::Domain(event)) {
                                return SessionEnd::Abandoned;
                            }
                        }
                        Inbound::End(reason) => return SessionEnd::Disconnected(reason),
                    }
                }
            }
        }
    }

    /// Drop commands that never made it onto the wire. Returns how many.
    fn discard_queued_commands(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(command) = self.commands.try_recv() {
            warn!(command = command.name(), "session ended, queued command dropped");
            dropped += 1;
        }
        dropped
    }

    /// Close and drop the current transport, if any.
    async fn release(&mut self) {
        self.live.store(false, Ordering::Release);
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("transport close failed: {e}");
            }
        }
    }

    fn emit(&self, event: TransportEvent) -> bool {
        emit_to(&self.sink, self.generation, event)
    }
}

/// Deliver an event. Returns `false` once the manager is gone.
fn emit_to(sink: &Weak<dyn EventSink>, generation: u64, event: TransportEvent) -> bool {
    match sink.upgrade() {
        Some(sink) => {
            sink.on_transport_event(generation, event);
            true
        }
        None => false,
    }
}

/// Engine.IO open, then Socket.IO namespace connect.
///
/// Returns the Engine.IO handshake and the namespace session id.
async fn handshake(
    transport: &mut dyn Transport,
    namespace: &str,
) -> Result<(Handshake, Option<String>)> {
    let frame = transport
        .recv()
        .await
        .ok_or(RealtimeError::TransportClosed)??;
    let handshake = match EnginePacket::decode(&frame)? {
        EnginePacket::Open(payload) => serde_json::from_str::<Handshake>(&payload)?,
        other => {
            return Err(RealtimeError::Handshake(format!(
                "expected engine.io open packet, got {other:?}"
            )));
        }
    };

    transport
        .send(SocketPacket::connect(namespace).to_frame())
        .await?;

    loop {
        let frame = transport
            .recv()
            .await
            .ok_or(RealtimeError::TransportClosed)??;
        match EnginePacket::decode(&frame)? {
            EnginePacket::Ping(payload) => {
                transport.send(EnginePacket::Pong(payload).encode()).await?;
            }
            EnginePacket::Close => return Err(RealtimeError::TransportClosed),
            EnginePacket::Message(payload) => {
                let packet = SocketPacket::decode(&payload)?;
                if packet.namespace != namespace {
                    debug!(namespace = %packet.namespace, "ignoring packet for other namespace");
                    continue;
                }
                match packet.kind {
                    SocketPacketKind::Connect => {
                        let sid = packet
                            .data
                            .as_ref()
                            .and_then(|d| d.get("sid"))
                            .and_then(|s| s.as_str())
                            .map(str::to_string);
                        return Ok((handshake, sid));
                    }
                    SocketPacketKind::ConnectError => {
                        let message = packet
                            .data
                            .as_ref()
                            .and_then(|d| d.get("message").and_then(|m| m.as_str()))
                            .unwrap_or("namespace connection refused")
                            .to_string();
                        return Err(RealtimeError::Handshake(message));
                    }
                    SocketPacketKind::Disconnect => {
                        return Err(RealtimeError::Handshake(
                            "server disconnected the namespace during handshake".into(),
                        ));
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

/// Decide what an inbound frame means for an established session.
fn classify(frame: &str, namespace: &str) -> Inbound {
    let packet = match EnginePacket::decode(frame) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("skipping undecodable frame: {e}");
            return Inbound::Ignore;
        }
    };

    match packet {
        EnginePacket::Ping(payload) => Inbound::Heartbeat(EnginePacket::Pong(payload).encode()),
        EnginePacket::Close => Inbound::End(DisconnectReason::TransportClose),
        EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {
            Inbound::Ignore
        }
        EnginePacket::Message(payload) => {
            let packet = match SocketPacket::decode(&payload) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("skipping undecodable socket.io packet: {e}");
                    return Inbound::Ignore;
                }
            };
            if packet.namespace != namespace {
                debug!(namespace = %packet.namespace, "ignoring packet for other namespace");
                return Inbound::Ignore;
            }
            match packet.kind {
                SocketPacketKind::Disconnect => Inbound::End(DisconnectReason::ServerDisconnect),
                SocketPacketKind::Event => {
                    let Some(name) = packet.event_name() else {
                        return Inbound::Ignore;
                    };
                    match ServerEvent::decode(name, packet.event_payload()) {
                        Ok(Some(event)) => Inbound::Event(event),
                        Ok(None) => {
                            debug!(event = name, "ignoring unhandled event");
                            Inbound::Ignore
                        }
                        Err(e) => {
                            warn!(event = name, "malformed event payload: {e}");
                            Inbound::Ignore
                        }
                    }
                }
                SocketPacketKind::Connect
                | SocketPacketKind::ConnectError
                | SocketPacketKind::Ack => Inbound::Ignore,
            }
        }
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
    use crate::event::{Metadata, StreamRef};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::mpsc::error::TryRecvError;

    /// Replays scripted frames and records what was sent.
    struct ScriptedTransport {
        incoming: VecDeque<Option<Result<String>>>,
        sent: Vec<String>,
    }

    impl ScriptedTransport {
        fn new(frames: &[&str]) -> Self {
            Self {
                incoming: frames.iter().map(|f| Some(Ok((*f).to_string()))).collect(),
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, frame: String) -> Result<()> {
            self.sent.push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.incoming.pop_front().flatten()
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    const OPEN: &str =
        r#"0{"sid":"eio1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

    struct AcceptingConnector;

    #[async_trait]
    impl Connector for AcceptingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            Ok(Box::new(ScriptedTransport::new(&[
                OPEN,
                r#"40/streaming,{"sid":"ns1"}"#,
            ])))
        }
    }

    struct NullSink;

    impl EventSink for NullSink {
        fn on_transport_event(&self, _generation: u64, _event: TransportEvent) {}
        fn on_engine_exit(&self, _generation: u64) {}
    }

    fn engine(commands: mpsc::UnboundedReceiver<OutboundCommand>) -> Engine {
        let sink: Weak<dyn EventSink> = Weak::<NullSink>::new();
        Engine {
            connector: Arc::new(AcceptingConnector),
            settings: EngineSettings {
                namespace: "/streaming".into(),
                reconnection: true,
                reconnection_delay: Duration::from_millis(10),
                max_reconnection_attempts: 1,
                connect_timeout: Duration::from_secs(1),
            },
            generation: 1,
            commands,
            live: Arc::new(AtomicBool::new(false)),
            sink,
            transport: None,
            heartbeat: Duration::MAX,
        }
    }

    fn stop_command() -> OutboundCommand {
        OutboundCommand::StopStream(StreamRef {
            channel_id: "c1".into(),
            stream_id: None,
            extra: Metadata::new(),
        })
    }

    #[test]
    fn ping_is_answered_with_pong() {
        match classify("2", "/streaming") {
            Inbound::Heartbeat(pong) => assert_eq!(pong, "3"),
            _ => panic!("expected heartbeat"),
        }
    }

    #[test]
    fn namespace_disconnect_is_server_initiated() {
        match classify("41/streaming,", "/streaming") {
            Inbound::End(reason) => assert_eq!(reason, DisconnectReason::ServerDisconnect),
            _ => panic!("expected end of session"),
        }
    }

    #[test]
    fn engine_close_is_transport_close() {
        match classify("1", "/streaming") {
            Inbound::End(reason) => assert_eq!(reason, DisconnectReason::TransportClose),
            _ => panic!("expected end of session"),
        }
    }

    #[test]
    fn stream_event_is_decoded() {
        let frame = r#"42/streaming,["stream:listeners",{"channelId":"c1","count":42}]"#;
        match classify(frame, "/streaming") {
            Inbound::Event(ServerEvent::StreamListeners(count)) => {
                assert_eq!(count.channel_id, "c1");
                assert_eq!(count.count, 42);
            }
            _ => panic!("expected listeners event"),
        }
    }

    #[test]
    fn other_namespaces_and_garbage_are_ignored() {
        assert!(matches!(
            classify(r#"42/chat,["stream:stopped",{"channelId":"c1"}]"#, "/streaming"),
            Inbound::Ignore
        ));
        assert!(matches!(classify("41/chat,", "/streaming"), Inbound::Ignore));
        assert!(matches!(classify("", "/streaming"), Inbound::Ignore));
        assert!(matches!(classify("4not-a-packet", "/streaming"), Inbound::Ignore));
        assert!(matches!(
            classify(r#"42/streaming,["stream:listeners",{"channelId":"c1"}]"#, "/streaming"),
            Inbound::Ignore
        ));
    }

    #[test]
    fn queued_commands_are_discarded() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut engine = engine(rx);
        tx.send(stop_command()).unwrap();
        tx.send(stop_command()).unwrap();

        assert_eq!(engine.discard_queued_commands(), 2);
        assert!(matches!(engine.commands.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(engine.discard_queued_commands(), 0);
    }

    #[tokio::test]
    async fn new_session_starts_with_an_empty_command_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut engine = engine(rx);
        tx.send(stop_command()).unwrap();

        let sid = engine.open().await.unwrap();
        assert_eq!(sid.as_deref(), Some("ns1"));
        assert!(engine.live.load(Ordering::Acquire));
        assert!(matches!(engine.commands.try_recv(), Err(TryRecvError::Empty)));

        // Commands issued once the session is live are kept.
        tx.send(stop_command()).unwrap();
        assert!(engine.commands.try_recv().is_ok());
    }

    #[tokio::test]
    async fn handshake_joins_namespace() {
        let mut transport = ScriptedTransport::new(&[OPEN, r#"40/streaming,{"sid":"ns1"}"#]);
        let (handshake, sid) = handshake(&mut transport, "/streaming").await.unwrap();

        assert_eq!(handshake.sid, "eio1");
        assert_eq!(sid.as_deref(), Some("ns1"));
        assert_eq!(transport.sent, vec!["40/streaming,".to_string()]);
    }

    #[tokio::test]
    async fn handshake_answers_ping_while_waiting() {
        let mut transport =
            ScriptedTransport::new(&[OPEN, "2", r#"40/streaming,{"sid":"ns1"}"#]);
        handshake(&mut transport, "/streaming").await.unwrap();
        assert_eq!(
            transport.sent,
            vec!["40/streaming,".to_string(), "3".to_string()]
        );
    }

    #[tokio::test]
    async fn handshake_surfaces_connect_error() {
        let mut transport = ScriptedTransport::new(&[
            OPEN,
            r#"44/streaming,{"message":"Not authorized"}"#,
        ]);
        let err = handshake(&mut transport, "/streaming").await.unwrap_err();
        assert!(matches!(err, RealtimeError::Handshake(ref m) if m == "Not authorized"));
    }

    #[tokio::test]
    async fn handshake_requires_open_packet_first() {
        let mut transport = ScriptedTransport::new(&[r#"40/streaming,{"sid":"ns1"}"#]);
        let err = handshake(&mut transport, "/streaming").await.unwrap_err();
        assert!(matches!(err, RealtimeError::Handshake(_)));
    }

    #[tokio::test]
    async fn handshake_fails_when_transport_closes() {
        let mut transport = ScriptedTransport::new(&[OPEN]);
        let err = handshake(&mut transport, "/streaming").await.unwrap_err();
        assert!(matches!(err, RealtimeError::TransportClosed));
    }
}
