//! Presence tracker for a two-player match.
//!
//! [`PresenceTracker`] is a thin handle that talks to a background loop over
//! an unbounded command channel. The loop owns the presence channel, the
//! timer scope and the state machine; it reports to the host through a
//! bounded [`PresenceEvent`] channel returned from [`PresenceTracker::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let context = MatchContext::new("m1")
//!     .with_local_participant("u1")
//!     .with_players("u1", "u2")
//!     .with_status("active");
//! let reachability = ManualReachability::new(true);
//! let (tracker, mut events) =
//!     PresenceTracker::start(transport, &reachability, context, PresenceConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PresenceEvent::WarningChanged(warning) => { /* update the modal */ }
//!         PresenceEvent::Forfeit { participant_id } => { /* end the match */ }
//!         PresenceEvent::Stopped => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{PresenceError, Result};
use crate::event::{ConnectionState, DisconnectionWarning, PresenceEvent};
use crate::protocol::{presence_topic, ChannelEvent, ChannelStatus, PresenceRecord};
use crate::reachability::ReachabilityPort;
use crate::timers::{Timer, TimerScope};
use crate::transport::{PresenceChannel, PresenceTransport};

/// Match status under which presence is tracked.
pub const ACTIVE_STATUS: &str = "active";

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lower bound for periodic timers; a zero-period interval panics in tokio.
const MIN_PERIOD: Duration = Duration::from_millis(1);

// ── Configuration ───────────────────────────────────────────────────

/// Timing and buffering knobs for a [`PresenceTracker`].
///
/// # Example
///
/// ```
/// use match_presence::PresenceConfig;
/// use std::time::Duration;
///
/// let config = PresenceConfig::default()
///     .with_grace_period(Duration::from_secs(45))
///     .with_event_channel_capacity(64);
/// assert_eq!(config.grace_period, Duration::from_secs(45));
/// assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
/// ```
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How often the local presence record is republished. Defaults to **20 s**.
    pub heartbeat_interval: Duration,
    /// How long a departed opponent has to come back. Defaults to **30 s**.
    pub grace_period: Duration,
    /// Delay before re-subscribing after a channel failure. Defaults to **5 s**.
    pub reconnect_delay: Duration,
    /// Upper bound on opening a channel. Defaults to **10 s**.
    pub subscribe_timeout: Duration,
    /// Upper bound on a single publish or close. Defaults to **5 s**.
    pub publish_timeout: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the host falls behind, non-critical events are dropped with a
    /// warning. [`PresenceEvent::Forfeit`] and [`PresenceEvent::Stopped`]
    /// are always delivered. Defaults to **256**; values below 1 are clamped.
    pub event_channel_capacity: usize,
    /// Time [`PresenceTracker::shutdown`] waits for the loop before aborting
    /// it. Defaults to **1 s**.
    pub shutdown_timeout: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl PresenceConfig {
    /// Set the heartbeat interval. Zero is clamped to one millisecond.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_PERIOD);
        self
    }

    /// Set the grace period given to a departed opponent.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the delay before a reconnection attempt.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the timeout for opening a channel.
    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Set the timeout for a single publish or close.
    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the capacity of the event channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Match context ───────────────────────────────────────────────────

/// Match identity supplied by the host. Read-only to the tracker.
///
/// ```
/// use match_presence::MatchContext;
///
/// let ctx = MatchContext::new("m1")
///     .with_local_participant("u1")
///     .with_players("u1", "u2")
///     .with_status("active");
/// assert!(ctx.is_trackable());
/// assert!(ctx.is_opponent("u2"));
/// assert!(!ctx.is_opponent("u1"));
/// assert!(!ctx.is_opponent("spectator"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchContext {
    /// Match identifier; the presence topic is `presence-{match_id}`.
    pub match_id: String,
    /// The participant this tracker publishes presence for.
    pub local_participant_id: Option<String>,
    /// Participant playing white (or the first role).
    pub white_participant_id: Option<String>,
    /// Participant playing black (or the second role).
    pub black_participant_id: Option<String>,
    /// Host-side match status. Tracking runs only when it equals [`ACTIVE_STATUS`].
    pub status: String,
}

impl MatchContext {
    /// Create a context for `match_id` with no participants and an empty status.
    pub fn new(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            ..Default::default()
        }
    }

    /// Set the local participant.
    #[must_use]
    pub fn with_local_participant(mut self, participant_id: impl Into<String>) -> Self {
        self.local_participant_id = Some(participant_id.into());
        self
    }

    /// Set both match roles.
    #[must_use]
    pub fn with_players(mut self, white: impl Into<String>, black: impl Into<String>) -> Self {
        self.white_participant_id = Some(white.into());
        self.black_participant_id = Some(black.into());
        self
    }

    /// Set the match status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Returns `true` when the match status is [`ACTIVE_STATUS`].
    pub fn is_active(&self) -> bool {
        self.status == ACTIVE_STATUS
    }

    /// Returns `true` when presence should be tracked at all.
    pub fn is_trackable(&self) -> bool {
        self.is_active() && self.local_participant_id.is_some()
    }

    /// Presence topic for this match.
    pub fn topic(&self) -> String {
        presence_topic(&self.match_id)
    }

    /// Returns `true` if `participant_id` holds one of the two roles and is
    /// not the local participant.
    pub fn is_opponent(&self, participant_id: &str) -> bool {
        let is_local = self.local_participant_id.as_deref() == Some(participant_id);
        let is_player = self.white_participant_id.as_deref() == Some(participant_id)
            || self.black_participant_id.as_deref() == Some(participant_id);
        is_player && !is_local
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Snapshots mirrored by the loop for the handle's accessors.
struct TrackerState {
    running: AtomicBool,
    connection: Mutex<ConnectionState>,
    warning: Mutex<DisconnectionWarning>,
}

impl TrackerState {
    fn new(initial: ConnectionState) -> Self {
        Self {
            running: AtomicBool::new(true),
            connection: Mutex::new(initial),
            warning: Mutex::new(DisconnectionWarning::hidden()),
        }
    }
}

#[derive(Debug)]
enum TrackerCommand {
    Resubscribe,
    UpdateMatch(MatchContext),
    SetMatchStatus(String),
}

// ── Tracker handle ──────────────────────────────────────────────────

/// Handle to a running presence tracker.
///
/// Dropping the handle aborts the background loop; call
/// [`shutdown`](PresenceTracker::shutdown) to close the channel gracefully
/// and receive the final [`PresenceEvent::Stopped`].
pub struct PresenceTracker {
    cmd_tx: mpsc::UnboundedSender<TrackerCommand>,
    state: Arc<TrackerState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl PresenceTracker {
    /// Spawn the tracker loop and return a handle plus the event receiver.
    ///
    /// The initial [`ConnectionState`] is `Connected` when `reachability`
    /// reports online and `Disconnected` otherwise. When online, the loop
    /// immediately runs a setup pass for `context`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<T, R>(
        transport: T,
        reachability: &R,
        context: MatchContext,
        config: PresenceConfig,
    ) -> (Self, mpsc::Receiver<PresenceEvent>)
    where
        T: PresenceTransport,
        R: ReachabilityPort + ?Sized,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let online = reachability.is_online();
        let initial = if online {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let state = Arc::new(TrackerState::new(initial));
        let shutdown_timeout = config.shutdown_timeout;

        let tracker_loop = TrackerLoop {
            transport: Arc::new(Mutex::new(transport)),
            config,
            context,
            channel: None,
            pending_open: None,
            pending_publish: None,
            subscription_id: None,
            subscribed: false,
            timers: TimerScope::new(),
            connection: initial,
            warning: DisconnectionWarning::hidden(),
            heartbeat_sequence: 0,
            online,
            event_tx,
            state: Arc::clone(&state),
        };
        let task = tokio::spawn(tracker_loop.run(cmd_rx, reachability.watch(), shutdown_rx));

        let tracker = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };
        (tracker, event_rx)
    }

    /// Tear down the current subscription and set up a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::NotRunning`] if the loop has stopped.
    pub fn resubscribe(&self) -> Result<()> {
        self.send(TrackerCommand::Resubscribe)
    }

    /// Replace the match context and set up tracking for it.
    ///
    /// A context that is not trackable tears the subscription down.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::NotRunning`] if the loop has stopped.
    pub fn update_match(&self, context: MatchContext) -> Result<()> {
        self.send(TrackerCommand::UpdateMatch(context))
    }

    /// Report a new match status. Leaving [`ACTIVE_STATUS`] stops tracking;
    /// entering it starts tracking.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::NotRunning`] if the loop has stopped.
    pub fn set_match_status(&self, status: impl Into<String>) -> Result<()> {
        self.send(TrackerCommand::SetMatchStatus(status.into()))
    }

    /// Stop the loop, closing the channel and cancelling every timer.
    pub async fn shutdown(&mut self) {
        debug!("PresenceTracker: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("tracker loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("tracker loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("tracker loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    /// Returns `true` while the background loop is running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Current connection badge state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.connection.lock().await
    }

    /// Current disconnection warning snapshot.
    pub async fn disconnection_warning(&self) -> DisconnectionWarning {
        self.state.warning.lock().await.clone()
    }

    fn send(&self, cmd: TrackerCommand) -> Result<()> {
        if !self.is_running() {
            return Err(PresenceError::NotRunning);
        }
        self.cmd_tx.send(cmd).map_err(|_| PresenceError::NotRunning)
    }
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("running", &self.is_running())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        // No executor is available to drive an async close here; aborting
        // drops the loop future, which drops the channel handle with it.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Tracker loop ────────────────────────────────────────────────────

type OpenOutcome = std::result::Result<Result<Box<dyn PresenceChannel>>, Elapsed>;

/// An `open` call in flight. Dropping it cancels the attempt.
type PendingOpen = Pin<Box<dyn Future<Output = OpenOutcome> + Send>>;

/// A `track` call in flight. The channel travels with it and comes back
/// in [`Published`] once the call settles.
type PendingPublish = Pin<Box<dyn Future<Output = Published> + Send>>;

struct Published {
    channel: Box<dyn PresenceChannel>,
    heartbeat_sequence: Option<u64>,
    result: Result<()>,
}

struct TrackerLoop<T> {
    transport: Arc<Mutex<T>>,
    config: PresenceConfig,
    context: MatchContext,
    channel: Option<Box<dyn PresenceChannel>>,
    pending_open: Option<PendingOpen>,
    pending_publish: Option<PendingPublish>,
    subscription_id: Option<Uuid>,
    subscribed: bool,
    timers: TimerScope,
    connection: ConnectionState,
    warning: DisconnectionWarning,
    heartbeat_sequence: u64,
    online: bool,
    event_tx: mpsc::Sender<PresenceEvent>,
    state: Arc<TrackerState>,
}

impl<T: PresenceTransport> TrackerLoop<T> {
    /// Multiplexes commands, reachability, timers, in-flight transport
    /// calls and channel events.
    ///
    /// Transport calls are polled as branches of their own, never awaited
    /// inside a handler. Exits when shutdown is signalled or the handle is
    /// dropped.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<TrackerCommand>,
        reachability: watch::Receiver<bool>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!(match_id = %self.context.match_id, "tracker loop started");
        let mut reachability = Some(reachability);

        self.emit(PresenceEvent::ConnectionChanged(self.connection));
        if self.online {
            self.setup_presence_tracking().await;
        }

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    break;
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("command channel closed, shutting down tracker loop");
                            break;
                        }
                    }
                }

                online = next_reachability(&mut reachability) => {
                    match online {
                        Some(online) => self.handle_reachability(online).await,
                        None => {
                            debug!("reachability source dropped; keeping last known value");
                            reachability = None;
                        }
                    }
                }

                fired = self.timers.next() => self.handle_timer(fired).await,

                opened = next_pending(&mut self.pending_open) => {
                    self.pending_open = None;
                    self.finish_open(opened).await;
                }

                published = next_pending(&mut self.pending_publish) => {
                    self.pending_publish = None;
                    self.finish_publish(published).await;
                }

                event = next_channel_event(&mut self.channel) => {
                    self.handle_channel_event(event).await;
                }
            }
        }

        self.teardown().await;
        self.state.running.store(false, Ordering::Release);
        if self.event_tx.send(PresenceEvent::Stopped).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
        debug!("tracker loop exited");
    }

    async fn handle_command(&mut self, cmd: TrackerCommand) {
        match cmd {
            TrackerCommand::Resubscribe => self.setup_presence_tracking().await,
            TrackerCommand::UpdateMatch(context) => {
                self.context = context;
                self.setup_presence_tracking().await;
            }
            TrackerCommand::SetMatchStatus(status) => {
                if status == self.context.status {
                    trace!(%status, "match status unchanged");
                    return;
                }
                debug!(match_id = %self.context.match_id, %status, "match status changed");
                self.context.status = status;
                self.setup_presence_tracking().await;
            }
        }
    }

    // ── Reconnection supervisor ─────────────────────────────────────

    /// Tear down, then start opening a fresh subscription if the match is
    /// trackable. The open itself completes in [`finish_open`](Self::finish_open).
    async fn setup_presence_tracking(&mut self) {
        self.teardown().await;

        let Some(local_id) = self.context.local_participant_id.clone() else {
            debug!(match_id = %self.context.match_id, "no local participant; presence not tracked");
            self.reset_connection().await;
            return;
        };
        if !self.context.is_active() {
            debug!(
                match_id = %self.context.match_id,
                status = %self.context.status,
                "match not active; presence not tracked"
            );
            self.reset_connection().await;
            return;
        }
        if !self.online {
            debug!("offline; presence tracking suspended");
            self.set_connection(ConnectionState::Disconnected).await;
            return;
        }

        let topic = self.context.topic();
        let subscription_id = Uuid::new_v4();
        debug!(%topic, %subscription_id, participant_id = %local_id, "opening presence channel");
        self.subscription_id = Some(subscription_id);

        let transport = Arc::clone(&self.transport);
        let limit = self.config.subscribe_timeout;
        let open: PendingOpen = Box::pin(async move {
            let mut transport = transport.lock_owned().await;
            timeout(limit, transport.open(&topic, &local_id)).await
        });
        self.pending_open = Some(open);
    }

    async fn finish_open(&mut self, opened: OpenOutcome) {
        let topic = self.context.topic();
        match opened {
            Ok(Ok(channel)) => {
                self.channel = Some(channel);
                self.timers.start_heartbeat(self.config.heartbeat_interval);
            }
            Ok(Err(e)) => {
                warn!(%topic, error = %e, "failed to open presence channel");
                self.handle_status(ChannelStatus::ChannelError).await;
            }
            Err(_) => {
                warn!(%topic, "opening presence channel timed out");
                self.handle_status(ChannelStatus::TimedOut).await;
            }
        }
    }

    /// Release the channel and cancel every timer. Safe to call repeatedly.
    async fn teardown(&mut self) {
        self.timers.cancel_all();
        self.subscribed = false;
        self.release_channel();
        if self.warning.is_visible {
            self.set_warning(DisconnectionWarning::hidden()).await;
        }
    }

    /// Cancel a pending open and hand the channel to a background close.
    ///
    /// A publish still in flight is allowed to settle first, then its
    /// channel is closed too.
    fn release_channel(&mut self) {
        self.pending_open = None;
        let subscription_id = self.subscription_id.take();
        let limit = self.config.publish_timeout;

        if let Some(channel) = self.channel.take() {
            tokio::spawn(close_detached(channel, limit, subscription_id));
        }
        if let Some(publish) = self.pending_publish.take() {
            tokio::spawn(async move {
                let published = publish.await;
                close_detached(published.channel, limit, subscription_id).await;
            });
        }
    }

    /// Badge for a match that is not tracked: whatever the network says.
    async fn reset_connection(&mut self) {
        let connection = if self.online {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        self.set_connection(connection).await;
    }

    async fn handle_status(&mut self, status: ChannelStatus) {
        if status.is_failure() {
            warn!(
                match_id = %self.context.match_id,
                %status,
                retry_in = ?self.config.reconnect_delay,
                "presence channel failed; scheduling reconnect"
            );
            self.subscribed = false;
            self.timers.stop_heartbeat();
            self.release_channel();
            self.set_connection(ConnectionState::Reconnecting).await;
            self.timers.schedule_retry(self.config.reconnect_delay);
            return;
        }

        info!(
            match_id = %self.context.match_id,
            subscription_id = ?self.subscription_id,
            "presence channel subscribed"
        );
        self.subscribed = true;
        self.set_connection(ConnectionState::Connected).await;
        self.publish_presence(None);
    }

    async fn handle_reachability(&mut self, online: bool) {
        if online == self.online {
            trace!(online, "duplicate reachability notification ignored");
            return;
        }
        self.online = online;

        if online {
            info!(match_id = %self.context.match_id, "network back online; resubscribing");
            self.set_connection(ConnectionState::Connected).await;
            self.setup_presence_tracking().await;
        } else {
            info!(match_id = %self.context.match_id, "network offline; presence suspended");
            self.teardown().await;
            self.set_connection(ConnectionState::Disconnected).await;
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    async fn handle_timer(&mut self, fired: Timer) {
        match fired {
            Timer::Forfeit => self.fire_forfeit().await,
            Timer::Countdown => self.tick_countdown().await,
            Timer::Retry => {
                debug!(match_id = %self.context.match_id, "reconnect retry due");
                self.setup_presence_tracking().await;
            }
            Timer::Heartbeat => self.send_heartbeat(),
        }
    }

    fn send_heartbeat(&mut self) {
        // The channel is absent while a previous publish is still in flight.
        if !self.online || !self.subscribed || self.channel.is_none() {
            trace!("heartbeat skipped; channel not live");
            return;
        }
        self.heartbeat_sequence += 1;
        self.publish_presence(Some(self.heartbeat_sequence));
    }

    /// Start publishing the local record. The result arrives in
    /// [`finish_publish`](Self::finish_publish).
    fn publish_presence(&mut self, heartbeat_sequence: Option<u64>) {
        let Some(local_id) = self.context.local_participant_id.as_deref() else {
            return;
        };
        let Some(mut channel) = self.channel.take() else {
            return;
        };
        let record = PresenceRecord::new(local_id, &self.context.match_id, heartbeat_sequence);
        let limit = self.config.publish_timeout;

        let publish: PendingPublish = Box::pin(async move {
            let result = match timeout(limit, channel.track(&record)).await {
                Ok(result) => result,
                Err(_) => Err(PresenceError::Timeout),
            };
            Published {
                channel,
                heartbeat_sequence,
                result,
            }
        });
        self.pending_publish = Some(publish);
    }

    /// Failures only degrade the badge; the channel's own status events
    /// decide whether to re-subscribe.
    async fn finish_publish(&mut self, published: Published) {
        let Published {
            channel,
            heartbeat_sequence,
            result,
        } = published;
        self.channel = Some(channel);

        match result {
            Ok(()) => trace!(?heartbeat_sequence, "presence record published"),
            Err(e) => {
                warn!(
                    match_id = %self.context.match_id,
                    ?heartbeat_sequence,
                    error = %e,
                    "presence publish failed"
                );
                self.set_connection(ConnectionState::Reconnecting).await;
            }
        }
    }

    // ── Disconnection timer ─────────────────────────────────────────

    /// Start (or restart) the grace window for a departed opponent.
    async fn start_disconnection_timer(&mut self, participant_id: String) {
        self.timers.start_grace(self.config.grace_period);
        let remaining = self.timers.remaining_grace().unwrap_or_default();
        warn!(
            match_id = %self.context.match_id,
            %participant_id,
            remaining_seconds = remaining,
            "opponent left the presence channel; grace period started"
        );
        self.set_warning(DisconnectionWarning::visible(participant_id, remaining)).await;
    }

    async fn tick_countdown(&mut self) {
        let Some(remaining) = self.timers.remaining_grace() else {
            self.timers.stop_countdown();
            return;
        };
        if remaining == 0 {
            self.timers.stop_countdown();
        }
        if self.warning.remaining_seconds != remaining {
            let mut warning = self.warning.clone();
            warning.remaining_seconds = remaining;
            self.set_warning(warning).await;
        }
    }

    async fn fire_forfeit(&mut self) {
        let departed = self.warning.disconnected_participant_id.take();
        self.set_warning(DisconnectionWarning::hidden()).await;

        let Some(participant_id) = departed else {
            debug!("forfeit deadline fired without a tracked participant");
            return;
        };
        info!(
            match_id = %self.context.match_id,
            %participant_id,
            "grace period expired; reporting forfeit"
        );
        if self
            .event_tx
            .send(PresenceEvent::Forfeit { participant_id })
            .await
            .is_err()
        {
            debug!("event channel closed, receiver dropped");
        }
    }

    fn cancel_disconnection_timer(&mut self) -> bool {
        let was_running = self.timers.is_grace_running();
        self.timers.clear_grace();
        was_running
    }

    // ── Channel events ──────────────────────────────────────────────

    async fn handle_channel_event(
        &mut self,
        event: Option<std::result::Result<ChannelEvent, PresenceError>>,
    ) {
        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(error = %e, "presence channel receive error");
                self.handle_status(ChannelStatus::ChannelError).await;
                return;
            }
            None => {
                debug!("presence channel ended");
                self.handle_status(ChannelStatus::Closed).await;
                return;
            }
        };

        match event {
            ChannelEvent::Status { status, message } => {
                if let Some(message) = message.as_deref() {
                    debug!(%status, %message, "channel status");
                }
                self.handle_status(status).await;
            }
            ChannelEvent::Sync { presences } => {
                if self.cancel_disconnection_timer() {
                    info!(match_id = %self.context.match_id, "presence resynced; grace period cancelled");
                }
                if self.warning.is_visible {
                    self.set_warning(DisconnectionWarning::hidden()).await;
                }
                self.set_connection(ConnectionState::Connected).await;

                let mut participants: Vec<String> = presences.into_keys().collect();
                participants.sort();
                self.emit(PresenceEvent::MembershipSynced { participants });
            }
            ChannelEvent::Join { key, .. } => {
                debug!(participant_id = %key, "participant joined presence channel");
                self.set_connection(ConnectionState::Connected).await;
                self.emit(PresenceEvent::ParticipantJoined { participant_id: key });
            }
            ChannelEvent::Leave { key, .. } => {
                debug!(participant_id = %key, "participant left presence channel");
                let is_opponent = self.context.is_opponent(&key);
                self.emit(PresenceEvent::ParticipantLeft {
                    participant_id: key.clone(),
                });
                if is_opponent {
                    self.start_disconnection_timer(key).await;
                }
            }
        }
    }

    // ── State publication ───────────────────────────────────────────

    async fn set_connection(&mut self, connection: ConnectionState) {
        if self.connection == connection {
            return;
        }
        debug!(from = %self.connection, to = %connection, "connection state changed");
        self.connection = connection;
        *self.state.connection.lock().await = connection;
        self.emit(PresenceEvent::ConnectionChanged(connection));
    }

    async fn set_warning(&mut self, warning: DisconnectionWarning) {
        if self.warning == warning {
            return;
        }
        self.warning = warning.clone();
        *self.state.warning.lock().await = warning.clone();
        self.emit(PresenceEvent::WarningChanged(warning));
    }

    /// Emit a non-critical event. Dropped with a warning when the host lags.
    fn emit(&self, event: PresenceEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

async fn next_reachability(rx: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

async fn next_pending<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn close_detached(
    mut channel: Box<dyn PresenceChannel>,
    limit: Duration,
    subscription_id: Option<Uuid>,
) {
    match timeout(limit, channel.close()).await {
        Ok(Ok(())) => debug!(?subscription_id, "presence channel closed"),
        Ok(Err(e)) => debug!(?subscription_id, error = %e, "presence channel close failed"),
        Err(_) => debug!(?subscription_id, "presence channel close timed out"),
    }
}

async fn next_channel_event(
    channel: &mut Option<Box<dyn PresenceChannel>>,
) -> Option<std::result::Result<ChannelEvent, PresenceError>> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = PresenceConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.grace_period, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.event_channel_capacity, 256);
    }

    #[test]
    fn config_clamps_degenerate_values() {
        let config = PresenceConfig::default()
            .with_event_channel_capacity(0)
            .with_heartbeat_interval(Duration::ZERO);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.heartbeat_interval, MIN_PERIOD);
    }

    #[test]
    fn context_requires_active_status_and_local_id() {
        let ctx = MatchContext::new("m1").with_players("u1", "u2");
        assert!(!ctx.is_trackable());

        let ctx = ctx.with_status("active");
        assert!(!ctx.is_trackable());

        let ctx = ctx.with_local_participant("u1");
        assert!(ctx.is_trackable());

        let ctx = ctx.with_status("completed");
        assert!(!ctx.is_trackable());
    }

    #[test]
    fn context_topic_uses_match_id() {
        assert_eq!(MatchContext::new("abc").topic(), "presence-abc");
    }

    #[test]
    fn opponent_matching_covers_both_roles() {
        let as_black = MatchContext::new("m1")
            .with_local_participant("u2")
            .with_players("u1", "u2");
        assert!(as_black.is_opponent("u1"));
        assert!(!as_black.is_opponent("u2"));

        let missing_black = MatchContext {
            black_participant_id: None,
            ..as_black
        };
        assert!(missing_black.is_opponent("u1"));
        assert!(!missing_black.is_opponent(""));
    }
}
