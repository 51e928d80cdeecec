//! # WebSocket Match Example
//!
//! Tracks presence for one side of a match against a WebSocket presence
//! server:
//!
//! 1. Subscribe to `presence-{match}` via the built-in WebSocket transport
//! 2. Republish the local record every 20 seconds
//! 3. Show the countdown when the opponent drops and report a forfeit
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start a presence server on localhost:4000, then:
//! cargo run --example websocket_match
//!
//! # Override the server URL and the identities:
//! PRESENCE_URL=ws://my-server:4000/presence \
//! MATCH_ID=m42 LOCAL_PLAYER=u2 WHITE_PLAYER=u1 BLACK_PLAYER=u2 \
//!     cargo run --example websocket_match
//! ```

use std::time::Duration;

use match_presence::{
    ConnectionState, ManualReachability, MatchContext, PresenceConfig, PresenceEvent,
    PresenceTracker, WebSocketPresenceTransport,
};

/// Default server URL when `PRESENCE_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:4000/presence";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=match_presence=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = env_or("PRESENCE_URL", DEFAULT_URL);
    let context = MatchContext::new(env_or("MATCH_ID", "m1"))
        .with_local_participant(env_or("LOCAL_PLAYER", "u1"))
        .with_players(env_or("WHITE_PLAYER", "u1"), env_or("BLACK_PLAYER", "u2"))
        .with_status("active");
    tracing::info!(%url, topic = %context.topic(), "starting presence tracker");

    let transport =
        WebSocketPresenceTransport::new(url).with_connect_timeout(Duration::from_secs(5));
    let network = ManualReachability::new(true);
    let (mut tracker, mut events) =
        PresenceTracker::start(transport, &network, context, PresenceConfig::default());

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("event channel closed");
                    break;
                };
                match event {
                    PresenceEvent::ConnectionChanged(ConnectionState::Reconnecting) => {
                        tracing::warn!("connection lost, reconnecting");
                    }
                    PresenceEvent::ConnectionChanged(state) => {
                        tracing::info!("connection {state}");
                    }
                    PresenceEvent::WarningChanged(warning) if warning.is_visible => {
                        tracing::warn!(
                            "opponent {} disconnected, {}s left",
                            warning.disconnected_participant_id.as_deref().unwrap_or("?"),
                            warning.remaining_seconds
                        );
                    }
                    PresenceEvent::WarningChanged(_) => {
                        tracing::info!("opponent is back");
                    }
                    PresenceEvent::Forfeit { participant_id } => {
                        tracing::warn!("{participant_id} forfeits; ending match");
                        tracker.set_match_status("completed")?;
                    }
                    PresenceEvent::Stopped => break,
                    other => tracing::debug!("{other:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    tracker.shutdown().await;
    Ok(())
}
