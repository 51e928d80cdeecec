#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for presence tracker integration tests.
//!
//! Provides a [`MockHub`] that plays the role of the pub/sub service, a
//! [`MockTransport`] that opens channels on it, and helpers for draining
//! tracker events without letting the paused clock run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use match_presence::protocol::{ChannelEvent, ChannelStatus, PresenceRecord};
use match_presence::{
    ConnectionState, MatchContext, PresenceChannel, PresenceError, PresenceEvent,
    PresenceTransport,
};
use tokio::sync::mpsc;

// ── MockHub ─────────────────────────────────────────────────────────

/// How the hub answers the next `open` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Open and immediately report `SUBSCRIBED`.
    Subscribe,
    /// Open but report nothing until the test emits a status.
    Silent,
    /// Fail the open call.
    Fail,
    /// Never complete the open call.
    Hang,
}

#[derive(Debug)]
struct HubState {
    opened: Vec<(String, String)>,
    tracked: Vec<PresenceRecord>,
    current: Option<mpsc::UnboundedSender<Result<ChannelEvent, PresenceError>>>,
    open_behavior: OpenBehavior,
    fail_track: bool,
    hang_track: bool,
}

/// Test-side view of the fake presence service.
///
/// Cloning shares the same state, so the test keeps one clone while the
/// transport owns another.
#[derive(Debug, Clone)]
pub struct MockHub {
    state: Arc<StdMutex<HubState>>,
    live: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StdMutex::new(HubState {
                opened: Vec::new(),
                tracked: Vec::new(),
                current: None,
                open_behavior: OpenBehavior::Subscribe,
                fail_track: false,
                hang_track: false,
            })),
            live: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A transport bound to this hub.
    pub fn transport(&self) -> MockTransport {
        MockTransport { hub: self.clone() }
    }

    /// Deliver `event` to the most recently opened channel.
    pub fn emit(&self, event: ChannelEvent) {
        let state = self.state.lock().unwrap();
        let tx = state.current.as_ref().expect("no channel open");
        tx.send(Ok(event)).expect("channel receiver dropped");
    }

    /// Deliver a receive error to the most recently opened channel.
    pub fn emit_error(&self, message: &str) {
        let state = self.state.lock().unwrap();
        let tx = state.current.as_ref().expect("no channel open");
        tx.send(Err(PresenceError::TransportReceive(message.into())))
            .expect("channel receiver dropped");
    }

    /// End the stream of the most recently opened channel.
    pub fn end_stream(&self) {
        self.state.lock().unwrap().current = None;
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        self.state.lock().unwrap().open_behavior = behavior;
    }

    pub fn set_fail_track(&self, fail: bool) {
        self.state.lock().unwrap().fail_track = fail;
    }

    /// Make subsequent `track` calls never complete.
    pub fn set_hang_track(&self, hang: bool) {
        self.state.lock().unwrap().hang_track = hang;
    }

    /// Number of `open` calls so far, including failed ones.
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    /// `(topic, presence_key)` of every `open` call.
    pub fn opened(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().opened.clone()
    }

    /// Channels opened and not yet closed or dropped.
    pub fn live_channels(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Explicit `close` calls.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every record successfully tracked.
    pub fn tracked(&self) -> Vec<PresenceRecord> {
        self.state.lock().unwrap().tracked.clone()
    }
}

// ── MockTransport ───────────────────────────────────────────────────

pub struct MockTransport {
    hub: MockHub,
}

#[async_trait]
impl PresenceTransport for MockTransport {
    async fn open(
        &mut self,
        topic: &str,
        presence_key: &str,
    ) -> Result<Box<dyn PresenceChannel>, PresenceError> {
        let behavior = {
            let mut state = self.hub.state.lock().unwrap();
            state
                .opened
                .push((topic.to_string(), presence_key.to_string()));
            state.open_behavior
        };

        match behavior {
            OpenBehavior::Fail => return Err(PresenceError::ChannelOpen("refused".into())),
            OpenBehavior::Hang => std::future::pending::<()>().await,
            OpenBehavior::Subscribe | OpenBehavior::Silent => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if behavior == OpenBehavior::Subscribe {
            tx.send(Ok(ChannelEvent::status(ChannelStatus::Subscribed)))
                .unwrap();
        }
        self.hub.state.lock().unwrap().current = Some(tx);
        self.hub.live.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockChannel {
            hub: self.hub.clone(),
            rx,
            released: false,
        }))
    }
}

struct MockChannel {
    hub: MockHub,
    rx: mpsc::UnboundedReceiver<Result<ChannelEvent, PresenceError>>,
    released: bool,
}

impl MockChannel {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.hub.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PresenceChannel for MockChannel {
    async fn track(&mut self, record: &PresenceRecord) -> Result<(), PresenceError> {
        let hang = {
            let mut state = self.hub.state.lock().unwrap();
            if state.fail_track {
                return Err(PresenceError::TrackRejected("rejected by hub".into()));
            }
            if !state.hang_track {
                state.tracked.push(record.clone());
            }
            state.hang_track
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ChannelEvent, PresenceError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        self.hub.closes.fetch_add(1, Ordering::SeqCst);
        self.release();
        Ok(())
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The match used throughout the tests: `m1`, white `u1` (local), black `u2`.
pub fn chess_match() -> MatchContext {
    MatchContext::new("m1")
        .with_local_participant("u1")
        .with_players("u1", "u2")
        .with_status("active")
}

/// Let spawned tasks run until they block, without advancing the clock.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Settle, then take every event currently queued.
pub async fn drain(events: &mut mpsc::Receiver<PresenceEvent>) -> Vec<PresenceEvent> {
    settle().await;
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Participants named in `Forfeit` events.
pub fn forfeits(events: &[PresenceEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PresenceEvent::Forfeit { participant_id } => Some(participant_id.clone()),
            _ => None,
        })
        .collect()
}

/// Connection states named in `ConnectionChanged` events.
pub fn connection_changes(events: &[PresenceEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            PresenceEvent::ConnectionChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}
