//! Concrete [`Transport`](crate::Transport) implementations.
//!
//! Each transport sits behind a Cargo feature:
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//! | `transport-polling`    | [`PollingTransport`]   | [`PollingConnector`]   |
//!
//! [`default_connector`] chains the enabled ones behind a
//! [`FallbackConnector`], WebSocket first. Anything else (an in-process
//! loopback, a proxy tunnel) can be plugged in by implementing
//! [`Transport`](crate::Transport) and [`Connector`](crate::transport::Connector).

#[cfg(feature = "transport-polling")]
pub mod polling;
#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-polling")]
pub use polling::{PollingConnector, PollingTransport};
#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};

#[cfg(any(feature = "transport-websocket", feature = "transport-polling"))]
use crate::{error::RealtimeError, manager::RealtimeConfig, transport::FallbackConnector};

/// WebSocket first, then HTTP long-polling, limited to the enabled features.
///
/// # Errors
///
/// Returns [`RealtimeError::InvalidUrl`] if `config.server_url` is not an
/// `http(s)://` or `ws(s)://` origin.
#[cfg(any(feature = "transport-websocket", feature = "transport-polling"))]
pub fn default_connector(config: &RealtimeConfig) -> Result<FallbackConnector, RealtimeError> {
    let chain = FallbackConnector::new();
    #[cfg(feature = "transport-websocket")]
    let chain = chain.with(WebSocketConnector::new(config)?);
    #[cfg(feature = "transport-polling")]
    let chain = chain.with(PollingConnector::new(config)?);
    Ok(chain)
}

/// The Engine.IO transport an endpoint URL is built for.
#[cfg(any(feature = "transport-websocket", feature = "transport-polling"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    #[cfg(feature = "transport-websocket")]
    WebSocket,
    #[cfg(feature = "transport-polling")]
    Polling,
}

#[cfg(any(feature = "transport-websocket", feature = "transport-polling"))]
impl Endpoint {
    /// (plain, secure) URL schemes.
    fn schemes(self) -> (&'static str, &'static str) {
        match self {
            #[cfg(feature = "transport-websocket")]
            Self::WebSocket => ("ws", "wss"),
            #[cfg(feature = "transport-polling")]
            Self::Polling => ("http", "https"),
        }
    }

    fn transport_name(self) -> &'static str {
        match self {
            #[cfg(feature = "transport-websocket")]
            Self::WebSocket => "websocket",
            #[cfg(feature = "transport-polling")]
            Self::Polling => "polling",
        }
    }
}

/// `<scheme>://<host>[:port]/<path>/?EIO=4&transport=<name>`
///
/// Any of `http`, `https`, `ws` and `wss` is accepted as the origin scheme;
/// TLS carries over to the scheme the endpoint needs.
#[cfg(any(feature = "transport-websocket", feature = "transport-polling"))]
pub(crate) fn endpoint_url(
    origin: &str,
    path: &str,
    endpoint: Endpoint,
) -> Result<String, RealtimeError> {
    let (scheme, rest) = origin
        .split_once("://")
        .ok_or_else(|| RealtimeError::InvalidUrl(origin.to_string()))?;
    let (plain, secure) = endpoint.schemes();
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => plain,
        "https" | "wss" => secure,
        _ => return Err(RealtimeError::InvalidUrl(origin.to_string())),
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(RealtimeError::InvalidUrl(origin.to_string()));
    }

    let path = path.trim_matches('/');
    let path = if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{path}/")
    };
    Ok(format!(
        "{scheme}://{authority}{path}?EIO={}&transport={}",
        crate::protocol::ENGINE_IO_VERSION,
        endpoint.transport_name()
    ))
}

#[cfg(test)]
#[cfg(all(feature = "transport-websocket", feature = "transport-polling"))]
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
    fn default_chain_prefers_websocket_then_polling() {
        let connector = default_connector(&RealtimeConfig::default()).unwrap();
        assert_eq!(connector.len(), 2);
        assert_eq!(
            format!("{connector:?}"),
            r#"FallbackConnector { connectors: ["websocket", "polling"] }"#
        );
    }

    #[test]
    fn default_chain_rejects_bad_origin() {
        let err = default_connector(&RealtimeConfig::new("localhost:5000")).unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidUrl(_)));
    }

    #[test]
    fn polling_endpoint_keeps_http_schemes() {
        assert_eq!(
            endpoint_url("http://localhost:5000", "/socket.io/", Endpoint::Polling).unwrap(),
            "http://localhost:5000/socket.io/?EIO=4&transport=polling"
        );
        assert_eq!(
            endpoint_url("wss://api.awazpulse.example", "/socket.io/", Endpoint::Polling).unwrap(),
            "https://api.awazpulse.example/socket.io/?EIO=4&transport=polling"
        );
    }
}
