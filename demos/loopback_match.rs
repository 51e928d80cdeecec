//! # Loopback Match Example
//!
//! Implements [`PresenceTransport`] and [`PresenceChannel`] with in-process
//! channels, then scripts an opponent who drops out of a match:
//!
//! 1. The tracker subscribes to `presence-demo` as `white`
//! 2. The fake server reports `SUBSCRIBED` and a membership sync
//! 3. `black` leaves; the disconnection warning counts down
//! 4. Nobody comes back, so the tracker reports a forfeit
//!
//! The grace period is shortened to five seconds so the demo finishes quickly.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_match
//! RUST_LOG=match_presence=debug cargo run --example loopback_match
//! ```

use std::time::Duration;

use async_trait::async_trait;
use match_presence::protocol::{ChannelEvent, ChannelStatus, PresenceRecord};
use match_presence::{
    ManualReachability, MatchContext, PresenceChannel, PresenceConfig, PresenceError,
    PresenceEvent, PresenceTracker, PresenceTransport,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A transport whose channels are backed by mpsc queues
// ─────────────────────────────────────────────────────────────────────

/// Server-side handle: push events into the open channel and read the
/// records the tracker publishes.
struct LoopbackServer {
    opened_rx: mpsc::UnboundedReceiver<mpsc::UnboundedSender<ChannelEvent>>,
    tracked_rx: mpsc::UnboundedReceiver<PresenceRecord>,
}

struct LoopbackTransport {
    opened_tx: mpsc::UnboundedSender<mpsc::UnboundedSender<ChannelEvent>>,
    tracked_tx: mpsc::UnboundedSender<PresenceRecord>,
}

struct LoopbackChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    tracked_tx: mpsc::UnboundedSender<PresenceRecord>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (opened_tx, opened_rx) = mpsc::unbounded_channel();
    let (tracked_tx, tracked_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            opened_tx,
            tracked_tx,
        },
        LoopbackServer {
            opened_rx,
            tracked_rx,
        },
    )
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the transport traits
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl PresenceTransport for LoopbackTransport {
    async fn open(
        &mut self,
        topic: &str,
        presence_key: &str,
    ) -> Result<Box<dyn PresenceChannel>, PresenceError> {
        tracing::info!(%topic, %presence_key, "server: channel opened");
        let (tx, rx) = mpsc::unbounded_channel();
        self.opened_tx
            .send(tx)
            .map_err(|e| PresenceError::ChannelOpen(e.to_string()))?;
        Ok(Box::new(LoopbackChannel {
            events: rx,
            tracked_tx: self.tracked_tx.clone(),
        }))
    }
}

#[async_trait]
impl PresenceChannel for LoopbackChannel {
    async fn track(&mut self, record: &PresenceRecord) -> Result<(), PresenceError> {
        self.tracked_tx
            .send(record.clone())
            .map_err(|e| PresenceError::TrackRejected(e.to_string()))
    }

    /// Cancel-safe because `mpsc::UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<ChannelEvent, PresenceError>> {
        self.events.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        self.events.close();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Script the match
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, mut server) = loopback_pair();
    let network = ManualReachability::new(true);
    let context = MatchContext::new("demo")
        .with_local_participant("white")
        .with_players("white", "black")
        .with_status("active");
    let config = PresenceConfig::default().with_grace_period(Duration::from_secs(5));

    let (mut tracker, mut events) = PresenceTracker::start(transport, &network, context, config);

    // ── Fake server: confirm the subscription ───────────────────────
    let Some(channel) = server.opened_rx.recv().await else {
        return Err("tracker never opened a channel".into());
    };
    channel.send(ChannelEvent::status(ChannelStatus::Subscribed))?;
    if let Some(record) = server.tracked_rx.recv().await {
        tracing::info!(participant_id = %record.participant_id, observed_at = %record.observed_at, "server: presence tracked");
    }
    channel.send(ChannelEvent::sync_keys(["white", "black"]))?;

    // ── Opponent drops out ──────────────────────────────────────────
    tokio::time::sleep(Duration::from_secs(1)).await;
    channel.send(ChannelEvent::leave("black"))?;

    // ── React to tracker events ─────────────────────────────────────
    while let Some(event) = events.recv().await {
        match event {
            PresenceEvent::ConnectionChanged(state) => {
                tracing::info!("Event: connection {state}");
            }
            PresenceEvent::WarningChanged(warning) if warning.is_visible => {
                tracing::info!(
                    "Event: {} disconnected, {}s to reconnect",
                    warning.disconnected_participant_id.as_deref().unwrap_or("?"),
                    warning.remaining_seconds
                );
            }
            PresenceEvent::WarningChanged(_) => {
                tracing::info!("Event: warning hidden");
            }
            PresenceEvent::MembershipSynced { participants } => {
                tracing::info!("Event: in channel {participants:?}");
            }
            PresenceEvent::Forfeit { participant_id } => {
                tracing::info!("Event: {participant_id} forfeits the match");
                break;
            }
            other => {
                tracing::info!("Event: {other:?}");
            }
        }
    }

    tracker.shutdown().await;
    tracing::info!("Done");
    Ok(())
}
