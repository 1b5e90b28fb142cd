//! # Control Panel Example
//!
//! A broadcaster's control panel against a running Awaz Pulse server:
//!
//! 1. Connect to the `/streaming` namespace (WebSocket, polling fallback)
//! 2. Start a stream once the connection is up
//! 3. Push a metadata update and print listener counts as they arrive
//! 4. Stop the stream and disconnect on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start the streaming server on localhost:5000, then:
//! cargo run --example control_panel
//!
//! # Override the server origin and channel:
//! AWAZ_PULSE_URL=https://api.example.com AWAZ_PULSE_CHANNEL=c7 cargo run --example control_panel
//! ```

use awaz_pulse_realtime::{
    listener, EventKind, Metadata, RealtimeConfig, RealtimeConnectionManager, RealtimeEvent,
};
use tokio::sync::mpsc;

/// Default origin when `AWAZ_PULSE_URL` is not set.
const DEFAULT_URL: &str = "http://localhost:5000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=awaz_pulse_realtime=debug` to watch the handshake.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("AWAZ_PULSE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let channel = std::env::var("AWAZ_PULSE_CHANNEL").unwrap_or_else(|_| "c1".to_string());
    tracing::info!("Connecting to {url}");

    let manager = RealtimeConnectionManager::with_default_transports(RealtimeConfig::new(url))?;

    // Listeners run on the connection task; hand events to the main loop.
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

    // ── Event loop ──────────────────────────────────────────────────
    let mut streaming = false;
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    RealtimeEvent::Connection(status) if status.is_failed() => {
                        tracing::error!("Gave up reconnecting");
                        break;
                    }
                    RealtimeEvent::Connection(status) if status.connected => {
                        tracing::info!("Connected");
                        if !streaming {
                            let mut metadata = Metadata::new();
                            metadata.insert("showTitle".into(), "Morning Show".into());
                            manager.start_stream(channel.clone(), None, Some(metadata));
                            streaming = true;
                        }
                    }
                    RealtimeEvent::Connection(_) => {
                        tracing::warn!("Connection lost, waiting for reconnection");
                    }
                    RealtimeEvent::StreamStarted(info) => {
                        tracing::info!(
                            "Stream {} live on {}",
                            info.stream_id.as_deref().unwrap_or("?"),
                            info.channel_id
                        );
                        let mut metadata = Metadata::new();
                        metadata.insert("host".into(), "Amina".into());
                        manager.update_metadata(info.channel_id, metadata);
                    }
                    RealtimeEvent::StreamMetadata(update) => {
                        tracing::info!("Metadata for {}: {:?}", update.channel_id, update.metadata);
                    }
                    RealtimeEvent::StreamListeners(count) => {
                        tracing::info!("{} listener(s) on {}", count.count, count.channel_id);
                    }
                    RealtimeEvent::StreamStopped(stream) => {
                        tracing::info!("Stream stopped on {}", stream.channel_id);
                        streaming = false;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    if streaming {
        manager.stop_stream(channel, None);
        // Give the engine a moment to flush the command.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    manager.disconnect();
    tracing::info!("Done");
    Ok(())
}
