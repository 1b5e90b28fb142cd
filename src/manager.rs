//! Connection manager for the streaming namespace.
//!
//! [`RealtimeConnectionManager`] is a cheap, cloneable handle. The
//! application creates one at its composition root and hands clones to every
//! page that needs live stream state; all clones share one connection, one
//! listener registry and one reconnection budget.
//!
//! Every public method is synchronous and infallible. Outcomes arrive later
//! through listeners registered with [`on`](RealtimeConnectionManager::on).
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = RealtimeConnectionManager::with_default_transports(RealtimeConfig::default())?;
//!
//! let status = listener(|event| {
//!     if let RealtimeEvent::Connection(status) = event {
//!         println!("connected: {}", status.connected);
//!     }
//! });
//! manager.on(EventKind::Connection, status.clone());
//! manager.connect();
//!
//! // later, once connected
//! manager.start_stream("channel-1", Some("stream-9".into()), None);
//!
//! // page teardown
//! manager.off(EventKind::Connection, &status);
//! manager.disconnect();
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineHandles, EngineSettings, EventSink};
use crate::event::{
    ConnectionStatus, EventKind, Metadata, MetadataUpdate, OutboundCommand, RealtimeEvent,
    StreamInfo, StreamRef,
};
use crate::protocol::normalize_namespace;
use crate::registry::{Listener, ListenerRegistry};
use crate::state::{ConnectionState, ReconnectBudget, TransportEvent};
use crate::transport::Connector;

/// Default streaming server origin.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

/// Default Socket.IO namespace for streaming events.
pub const DEFAULT_NAMESPACE: &str = "/streaming";

/// Default Engine.IO endpoint path.
pub const DEFAULT_PATH: &str = "/socket.io/";

/// Default fixed delay between reconnection attempts.
const DEFAULT_RECONNECTION_DELAY: Duration = Duration::from_millis(1000);

/// Default cap on reconnection attempts.
const DEFAULT_MAX_RECONNECTION_ATTEMPTS: u32 = 10;

/// Default bound on opening a transport plus the namespace handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RealtimeConnectionManager`].
///
/// # Example
///
/// ```
/// use awaz_pulse_realtime::RealtimeConfig;
/// use std::time::Duration;
///
/// let config = RealtimeConfig::new("https://api.awazpulse.example")
///     .with_reconnection_delay(Duration::from_millis(500))
///     .with_max_reconnection_attempts(5);
/// assert_eq!(config.namespace, "/streaming");
/// assert_eq!(config.max_reconnection_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Server origin, e.g. `https://api.awazpulse.example`.
    pub server_url: String,
    /// Socket.IO namespace. Always starts with `/`.
    pub namespace: String,
    /// Engine.IO endpoint path on the server.
    pub path: String,
    /// Whether the engine retries after an unexpected disconnect.
    ///
    /// Defaults to **true**.
    pub reconnection: bool,
    /// Fixed delay before each reconnection attempt.
    ///
    /// Defaults to **1 second**.
    pub reconnection_delay: Duration,
    /// Attempts before giving up and reporting `failed`.
    ///
    /// Defaults to **10**. Values below 1 are clamped to 1.
    pub max_reconnection_attempts: u32,
    /// Bound on opening a transport and on the namespace handshake.
    ///
    /// Defaults to **20 seconds**.
    pub connect_timeout: Duration,
}

impl RealtimeConfig {
    /// Create a configuration for `server_url` with default values.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            path: DEFAULT_PATH.to_string(),
            reconnection: true,
            reconnection_delay: DEFAULT_RECONNECTION_DELAY,
            max_reconnection_attempts: DEFAULT_MAX_RECONNECTION_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = normalize_namespace(namespace);
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_reconnection(mut self, enabled: bool) -> Self {
        self.reconnection = enabled;
        self
    }

    #[must_use]
    pub fn with_reconnection_delay(mut self, delay: Duration) -> Self {
        self.reconnection_delay = delay;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_max_reconnection_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnection_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            namespace: normalize_namespace(&self.namespace),
            reconnection: self.reconnection,
            reconnection_delay: self.reconnection_delay,
            max_reconnection_attempts: self.max_reconnection_attempts.max(1),
            connect_timeout: self.connect_timeout,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// The running engine and the channels to reach it.
struct Link {
    generation: u64,
    commands: mpsc::UnboundedSender<OutboundCommand>,
    shutdown: Option<oneshot::Sender<()>>,
    live: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

struct Lifecycle {
    state: ConnectionState,
    budget: ReconnectBudget,
}

struct Inner {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    registry: ListenerRegistry,
    lifecycle: Mutex<Lifecycle>,
    /// Connected flag maintained by lifecycle events; used when no engine
    /// is around to ask.
    tracked_connected: AtomicBool,
    link: Mutex<Option<Link>>,
    /// Manager-scheduled reconnect after a server-initiated disconnect.
    retry: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    me: Weak<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Manager handle ──────────────────────────────────────────────────

/// Handle to the single live connection with the streaming server.
///
/// Clones share the same connection.
#[derive(Clone)]
pub struct RealtimeConnectionManager {
    inner: Arc<Inner>,
}

impl RealtimeConnectionManager {
    /// Create a manager in the `Disconnected` state. No I/O happens until
    /// [`connect`](Self::connect).
    pub fn new(config: RealtimeConfig, connector: impl Connector) -> Self {
        Self::with_connector(config, Arc::new(connector))
    }

    /// Like [`new`](Self::new) with an already shared connector.
    pub fn with_connector(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Self {
        let budget = ReconnectBudget::new(
            config.reconnection_delay,
            config.max_reconnection_attempts.max(1),
        );
        let inner = Arc::new_cyclic(|me| Inner {
            config,
            connector,
            registry: ListenerRegistry::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Disconnected,
                budget,
            }),
            tracked_connected: AtomicBool::new(false),
            link: Mutex::new(None),
            retry: Mutex::new(None),
            generation: AtomicU64::new(0),
            me: me.clone(),
        });
        Self { inner }
    }

    /// Create a manager that prefers WebSocket and falls back to HTTP
    /// long-polling, limited to the enabled transport features.
    ///
    /// Each connection attempt tries the transports in that order.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidUrl`](crate::RealtimeError::InvalidUrl)
    /// if `config.server_url` is not an `http(s)://` or `ws(s)://` origin.
    #[cfg(any(feature = "transport-websocket", feature = "transport-polling"))]
    pub fn with_default_transports(config: RealtimeConfig) -> crate::error::Result<Self> {
        let connector = crate::transports::default_connector(&config)?;
        Ok(Self::new(config, connector))
    }

    /// Create a manager that connects over WebSocket only.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidUrl`](crate::RealtimeError::InvalidUrl)
    /// if `config.server_url` is not an `http(s)://` or `ws(s)://` origin.
    #[cfg(feature = "transport-websocket")]
    pub fn websocket(config: RealtimeConfig) -> crate::error::Result<Self> {
        let connector = crate::transports::WebSocketConnector::new(&config)?;
        Ok(Self::new(config, connector))
    }

    // ── Connection control ──────────────────────────────────────────

    /// Open the connection if none is active.
    ///
    /// Returns immediately. A second call while the connection is being
    /// established, is up, or is retrying does nothing. Must be called
    /// from within a Tokio runtime; outside one the call is logged and
    /// ignored.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Tear down the connection, drop pending reconnection attempts and
    /// return to `Disconnected`. Calling it when already disconnected is a
    /// no-op.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Returns `true` if the session is up right now.
    ///
    /// Asks the running engine when there is one, otherwise falls back to
    /// the flag maintained from lifecycle events.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Current mirrored connection state.
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.lifecycle).state
    }

    /// Reconnection attempts used since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.inner.lifecycle).budget.attempts_used()
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Subscribe `listener` to `kind`. Listeners run in registration order.
    pub fn on(&self, kind: EventKind, listener: Listener) {
        self.inner.registry.subscribe(kind, listener);
    }

    /// Remove the first registration of `listener` for `kind`.
    pub fn off(&self, kind: EventKind, listener: &Listener) {
        if !self.inner.registry.unsubscribe(kind, listener) {
            debug!(event = %kind, "off: listener was not registered");
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.registry.listener_count(kind)
    }

    // ── Stream commands ─────────────────────────────────────────────

    /// Ask the server to start streaming on `channel_id`.
    ///
    /// Dropped with a warning when not connected.
    pub fn start_stream(
        &self,
        channel_id: impl Into<String>,
        stream_id: Option<String>,
        metadata: Option<Metadata>,
    ) {
        self.inner
            .dispatch(OutboundCommand::StartStream(StreamInfo {
                channel_id: channel_id.into(),
                stream_id,
                metadata,
                extra: Metadata::new(),
            }));
    }

    /// Ask the server to stop streaming on `channel_id`.
    ///
    /// Dropped with a warning when not connected.
    pub fn stop_stream(&self, channel_id: impl Into<String>, stream_id: Option<String>) {
        self.inner
            .dispatch(OutboundCommand::StopStream(StreamRef {
                channel_id: channel_id.into(),
                stream_id,
                extra: Metadata::new(),
            }));
    }

    /// Push new metadata (show title, host, ...) for `channel_id`.
    ///
    /// Dropped with a warning when not connected.
    pub fn update_metadata(&self, channel_id: impl Into<String>, metadata: Metadata) {
        self.inner
            .dispatch(OutboundCommand::UpdateMetadata(MetadataUpdate {
                channel_id: channel_id.into(),
                metadata,
                extra: Metadata::new(),
            }));
    }
}

impl std::fmt::Debug for RealtimeConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConnectionManager")
            .field("server_url", &self.inner.config.server_url)
            .field("namespace", &self.inner.config.namespace)
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .field("listeners", &self.inner.registry)
            .finish()
    }
}

// ── Internals ───────────────────────────────────────────────────────

impl Inner {
    fn connect(&self) {
        let mut slot = lock(&self.link);
        if let Some(link) = slot.as_ref() {
            if !link.task.is_finished() {
                debug!(generation = link.generation, "connect: connection already active");
                return;
            }
        }

        let Ok(runtime) = Handle::try_current() else {
            error!("connect() called outside a Tokio runtime; ignoring");
            return;
        };

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let live = Arc::new(AtomicBool::new(false));
        let sink: Weak<dyn EventSink> = self.me.clone();

        lock(&self.lifecycle).state = ConnectionState::Connecting;
        info!(
            url = %self.config.server_url,
            namespace = %self.config.namespace,
            transport = self.connector.name(),
            generation,
            "connecting to streaming server"
        );

        let task = runtime.spawn(Engine::run(
            Arc::clone(&self.connector),
            self.config.engine_settings(),
            EngineHandles {
                generation,
                commands: cmd_rx,
                shutdown: shutdown_rx,
                live: Arc::clone(&live),
                sink,
            },
        ));

        *slot = Some(Link {
            generation,
            commands: cmd_tx,
            shutdown: Some(shutdown_tx),
            live,
            task,
        });
    }

    fn disconnect(&self) {
        if let Some(retry) = lock(&self.retry).take() {
            retry.abort();
        }

        let link = lock(&self.link).take();
        let was_connected = self.is_connected_with(link.as_ref());
        self.tracked_connected.store(false, Ordering::Release);
        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.state = ConnectionState::Disconnected;
            lifecycle.budget.reset();
        }

        let Some(mut link) = link else {
            debug!("disconnect: no active connection");
            return;
        };

        if let Some(tx) = link.shutdown.take() {
            let _ = tx.send(());
        }
        // The engine closes its transport on the signal; the task is left to
        // finish on its own.
        drop(link);

        info!("disconnected from streaming server");
        if was_connected {
            self.registry
                .publish(&RealtimeEvent::Connection(ConnectionStatus::disconnected()));
        }
    }

    fn is_connected(&self) -> bool {
        let slot = lock(&self.link);
        self.is_connected_with(slot.as_ref())
    }

    fn is_connected_with(&self, link: Option<&Link>) -> bool {
        match link {
            Some(link) => link.live.load(Ordering::Acquire),
            None => self.tracked_connected.load(Ordering::Acquire),
        }
    }

    fn dispatch(&self, command: OutboundCommand) {
        let slot = lock(&self.link);
        if !self.is_connected_with(slot.as_ref()) {
            warn!(command = command.name(), "not connected, command dropped");
            return;
        }
        let Some(link) = slot.as_ref() else {
            warn!(command = command.name(), "no active connection, command dropped");
            return;
        };
        let name = command.name();
        if link.commands.send(command).is_err() {
            warn!(command = name, "connection engine gone, command dropped");
        }
    }

    /// Schedule one `connect()` after the reconnection delay.
    fn schedule_reconnect(&self) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no Tokio runtime, cannot schedule reconnect");
            return;
        };
        let me = self.me.clone();
        let delay = lock(&self.lifecycle).budget.delay();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = me.upgrade() {
                debug!("scheduled reconnect firing");
                inner.connect();
            }
        });
        if let Some(previous) = lock(&self.retry).replace(task) {
            previous.abort();
        }
        debug!(?delay, "server closed the session, reconnect scheduled");
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connect { sid } => {
                {
                    let mut lifecycle = lock(&self.lifecycle);
                    lifecycle.budget.reset();
                    lifecycle.state = ConnectionState::Connected;
                }
                self.tracked_connected.store(true, Ordering::Release);
                info!(sid = sid.as_deref().unwrap_or("-"), "connected to streaming server");
                self.registry
                    .publish(&RealtimeEvent::Connection(ConnectionStatus::connected()));
            }
            TransportEvent::Disconnect(reason) => {
                self.tracked_connected.store(false, Ordering::Release);
                let server_initiated = reason.is_server_initiated();
                lock(&self.lifecycle).state = if server_initiated || self.config.reconnection {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Disconnected
                };
                warn!(%reason, "disconnected from streaming server");
                if server_initiated {
                    // The engine stops after a namespace disconnect; retire it
                    // now so the scheduled connect() is not mistaken for a
                    // duplicate.
                    self.retire_link();
                    self.schedule_reconnect();
                } else if !self.config.reconnection {
                    self.retire_link();
                }
                self.registry
                    .publish(&RealtimeEvent::Connection(ConnectionStatus::disconnected()));
            }
            TransportEvent::Reconnect(attempt) => {
                info!(attempt, "reconnected to streaming server");
            }
            TransportEvent::ReconnectAttempt(attempt) => {
                let mut lifecycle = lock(&self.lifecycle);
                let within_budget = lifecycle.budget.record_attempt(attempt);
                lifecycle.state = if within_budget {
                    ConnectionState::Reconnecting { attempt }
                } else {
                    ConnectionState::Failed
                };
                debug!(
                    attempt,
                    max = lifecycle.budget.max_attempts(),
                    "reconnection attempt"
                );
            }
            TransportEvent::ReconnectError(e) => {
                warn!("reconnection error: {e}");
            }
            TransportEvent::ReconnectFailed => {
                lock(&self.lifecycle).state = ConnectionState::Failed;
                self.tracked_connected.store(false, Ordering::Release);
                // The engine is done retrying. A listener reacting to the
                // failure with connect() must get a fresh engine.
                self.retire_link();
                error!("failed to reconnect to streaming server");
                self.registry
                    .publish(&RealtimeEvent::Connection(ConnectionStatus::failed()));
            }
            TransportEvent::ConnectError(e) => {
                self.tracked_connected.store(false, Ordering::Release);
                if !self.config.reconnection {
                    lock(&self.lifecycle).state = ConnectionState::Disconnected;
                    self.retire_link();
                }
                error!("connection error: {e}");
                self.registry
                    .publish(&RealtimeEvent::Connection(ConnectionStatus::disconnected()));
            }
            TransportEvent::Domain(event) => {
                let event = RealtimeEvent::from(event);
                debug!(event = %event.kind(), "stream event");
                self.registry.publish(&event);
            }
        }
    }

    fn retire_link(&self) {
        if let Some(link) = lock(&self.link).take() {
            debug!(generation = link.generation, "connection retired");
        }
    }

    fn current_generation(&self) -> Option<u64> {
        lock(&self.link).as_ref().map(|link| link.generation)
    }
}

impl EventSink for Inner {
    fn on_transport_event(&self, generation: u64, event: TransportEvent) {
        if self.current_generation() != Some(generation) {
            debug!(generation, "ignoring event from retired connection");
            return;
        }
        self.handle_transport_event(event);
    }

    fn on_engine_exit(&self, generation: u64) {
        let mut slot = lock(&self.link);
        if slot.as_ref().map(|link| link.generation) == Some(generation) {
            *slot = None;
            debug!(generation, "connection released");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // `Drop` cannot await a graceful close; aborting drops the engine
        // future and with it the transport.
        if let Some(link) = lock(&self.link).take() {
            link.task.abort();
        }
        if let Some(retry) = lock(&self.retry).take() {
            retry.abort();
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
    use crate::error::RealtimeError;
    use crate::event::{ListenerCount, ServerEvent};
    use crate::registry::listener;
    use crate::state::DisconnectReason;
    use crate::transport::Transport;
    use async_trait::async_trait;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
            Err(RealtimeError::TransportClosed)
        }
    }

    fn manager() -> RealtimeConnectionManager {
        RealtimeConnectionManager::new(
            RealtimeConfig::default().with_max_reconnection_attempts(3),
            RefusingConnector,
        )
    }

    fn record_connection(manager: &RealtimeConnectionManager) -> Arc<Mutex<Vec<ConnectionStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on(
            EventKind::Connection,
            listener(move |event| {
                if let RealtimeEvent::Connection(status) = event {
                    sink.lock().unwrap().push(*status);
                }
            }),
        );
        seen
    }

    #[test]
    fn config_defaults() {
        let config = RealtimeConfig::default();
        assert_eq!(config.server_url, "http://localhost:5000");
        assert_eq!(config.namespace, "/streaming");
        assert_eq!(config.path, "/socket.io/");
        assert!(config.reconnection);
        assert_eq!(config.reconnection_delay, Duration::from_millis(1000));
        assert_eq!(config.max_reconnection_attempts, 10);
    }

    #[test]
    fn config_builder_normalizes_inputs() {
        let config = RealtimeConfig::new("https://example.test")
            .with_namespace("live")
            .with_max_reconnection_attempts(0)
            .with_reconnection(false);
        assert_eq!(config.namespace, "/live");
        assert_eq!(config.max_reconnection_attempts, 1);
        assert!(!config.reconnection);
    }

    #[test]
    fn starts_disconnected() {
        let manager = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[test]
    fn connect_event_resets_budget_and_publishes() {
        let manager = manager();
        let seen = record_connection(&manager);

        manager.inner.handle_transport_event(TransportEvent::ReconnectAttempt(2));
        assert_eq!(manager.state(), ConnectionState::Reconnecting { attempt: 2 });
        assert_eq!(manager.reconnect_attempts(), 2);

        manager
            .inner
            .handle_transport_event(TransportEvent::Connect { sid: None });
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(manager.is_connected());
        assert_eq!(*seen.lock().unwrap(), vec![ConnectionStatus::connected()]);
    }

    #[test]
    fn attempt_beyond_budget_is_failed() {
        let manager = manager();
        manager.inner.handle_transport_event(TransportEvent::ReconnectAttempt(4));
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[test]
    fn reconnect_failed_is_terminal_and_reported() {
        let manager = manager();
        let seen = record_connection(&manager);
        manager
            .inner
            .handle_transport_event(TransportEvent::Connect { sid: None });
        manager.inner.handle_transport_event(TransportEvent::ReconnectFailed);

        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(!manager.is_connected());
        let seen = seen.lock().unwrap();
        assert!(seen.last().unwrap().is_failed());
    }

    #[test]
    fn transport_disconnect_publishes_without_scheduling() {
        let manager = manager();
        let seen = record_connection(&manager);
        manager
            .inner
            .handle_transport_event(TransportEvent::Connect { sid: None });
        manager
            .inner
            .handle_transport_event(TransportEvent::Disconnect(DisconnectReason::TransportClose));

        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.is_connected());
        assert!(lock(&manager.inner.retry).is_none());
        assert_eq!(seen.lock().unwrap().last(), Some(&ConnectionStatus::disconnected()));
    }

    #[tokio::test]
    async fn server_disconnect_schedules_one_reconnect() {
        let manager = manager();
        manager
            .inner
            .handle_transport_event(TransportEvent::Disconnect(DisconnectReason::ServerDisconnect));
        assert!(lock(&manager.inner.retry).is_some());

        manager.disconnect();
        assert!(lock(&manager.inner.retry).is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn scheduled_reconnect_waits_for_the_budget_delay() {
        let manager = RealtimeConnectionManager::new(
            RealtimeConfig::default().with_reconnection_delay(Duration::from_millis(60)),
            RefusingConnector,
        );
        manager
            .inner
            .handle_transport_event(TransportEvent::Disconnect(DisconnectReason::ServerDisconnect));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.inner.generation.load(Ordering::Acquire), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.inner.generation.load(Ordering::Acquire), 1);
        manager.disconnect();
    }

    #[test]
    fn connect_error_reports_disconnected() {
        let manager = manager();
        let seen = record_connection(&manager);
        manager
            .inner
            .handle_transport_event(TransportEvent::ConnectError("refused".into()));
        assert_eq!(*seen.lock().unwrap(), vec![ConnectionStatus::disconnected()]);
    }

    #[test]
    fn domain_events_pass_through_unchanged() {
        let manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on(
            EventKind::StreamListeners,
            listener(move |event| sink.lock().unwrap().push(event.clone())),
        );

        let count = ListenerCount {
            channel_id: "c1".into(),
            count: 42,
            extra: Metadata::new(),
        };
        manager
            .inner
            .handle_transport_event(TransportEvent::Domain(ServerEvent::StreamListeners(
                count.clone(),
            )));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RealtimeEvent::StreamListeners(count)]
        );
    }

    #[test]
    fn events_from_retired_generation_are_ignored() {
        let manager = manager();
        let seen = record_connection(&manager);
        manager
            .inner
            .on_transport_event(7, TransportEvent::Connect { sid: None });
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_outside_runtime_is_ignored() {
        let manager = manager();
        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(lock(&manager.inner.link).is_none());
    }

    #[test]
    fn commands_are_dropped_while_disconnected() {
        let manager = manager();
        manager.start_stream("c1", None, None);
        manager.stop_stream("c1", None);
        manager.update_metadata("c1", Metadata::new());
        assert!(!manager.is_connected());
    }
}
