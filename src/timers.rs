//! Timers owned by one tracker instance.
//!
//! [`TimerScope`] holds the heartbeat interval, the grace countdown, the
//! absolute forfeit deadline and the reconnection retry. The tracker loop
//! awaits [`TimerScope::next`] inside its `select!`, and
//! [`TimerScope::cancel_all`] clears every handle in one call.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior, Sleep};

/// Display cadence of the grace countdown.
pub(crate) const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timer {
    Forfeit,
    Countdown,
    Retry,
    Heartbeat,
}

#[derive(Default)]
pub(crate) struct TimerScope {
    heartbeat: Option<Interval>,
    countdown: Option<Interval>,
    forfeit: Option<Pin<Box<Sleep>>>,
    grace_deadline: Option<Instant>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl TimerScope {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start the heartbeat. The first tick is one `period` from now.
    pub(crate) fn start_heartbeat(&mut self, period: Duration) {
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.heartbeat = Some(heartbeat);
    }

    pub(crate) fn stop_heartbeat(&mut self) {
        self.heartbeat = None;
    }

    /// Start a grace window, replacing any running one. Returns its deadline.
    pub(crate) fn start_grace(&mut self, grace: Duration) -> Instant {
        let now = Instant::now();
        let deadline = now + grace;
        self.countdown = Some(interval_at(now + COUNTDOWN_TICK, COUNTDOWN_TICK));
        self.forfeit = Some(Box::pin(sleep_until(deadline)));
        self.grace_deadline = Some(deadline);
        deadline
    }

    pub(crate) fn clear_grace(&mut self) {
        self.countdown = None;
        self.forfeit = None;
        self.grace_deadline = None;
    }

    /// Stop the display tick but keep the forfeit deadline armed.
    pub(crate) fn stop_countdown(&mut self) {
        self.countdown = None;
    }

    /// Whole seconds left in the grace window, rounded up.
    pub(crate) fn remaining_grace(&self) -> Option<u32> {
        let deadline = self.grace_deadline?;
        let left = deadline.saturating_duration_since(Instant::now());
        Some(ceil_secs(left))
    }

    /// Schedule the reconnection retry. A pending retry is replaced.
    pub(crate) fn schedule_retry(&mut self, delay: Duration) {
        self.retry = Some(Box::pin(sleep_until(Instant::now() + delay)));
    }

    #[cfg(test)]
    pub(crate) fn has_pending_retry(&self) -> bool {
        self.retry.is_some()
    }

    pub(crate) fn is_grace_running(&self) -> bool {
        self.forfeit.is_some()
    }

    pub(crate) fn cancel_all(&mut self) {
        self.heartbeat = None;
        self.retry = None;
        self.clear_grace();
    }

    /// Wait for the next timer. Pends forever while every slot is empty.
    ///
    /// One-shot timers are disarmed before returning. When several timers
    /// are due together the forfeit deadline wins over the countdown.
    ///
    /// Cancel-safe.
    pub(crate) async fn next(&mut self) -> Timer {
        tokio::select! {
            biased;
            () = fire(&mut self.forfeit) => {
                self.forfeit = None;
                self.countdown = None;
                self.grace_deadline = None;
                Timer::Forfeit
            }
            () = tick(&mut self.countdown) => Timer::Countdown,
            () = fire(&mut self.retry) => {
                self.retry = None;
                Timer::Retry
            }
            () = tick(&mut self.heartbeat) => Timer::Heartbeat,
        }
    }
}

impl std::fmt::Debug for TimerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerScope")
            .field("heartbeat", &self.heartbeat.is_some())
            .field("countdown", &self.countdown.is_some())
            .field("forfeit", &self.forfeit.is_some())
            .field("retry", &self.retry.is_some())
            .finish()
    }
}

async fn fire(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

fn ceil_secs(d: Duration) -> u32 {
    let whole = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    u32::try_from(whole).unwrap_or(u32::MAX)
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
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn ceil_secs_rounds_up() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(25)), 25);
        assert_eq!(ceil_secs(Duration::from_millis(24_001)), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_scope_pends() {
        let mut scope = TimerScope::new();
        let mut next = task::spawn(scope.next());
        assert_pending!(next.poll());
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_pending!(next.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_reads_from_deadline() {
        let mut scope = TimerScope::new();
        scope.start_grace(Duration::from_secs(30));
        assert_eq!(scope.remaining_grace(), Some(30));

        for expected in (25..30).rev() {
            assert_eq!(scope.next().await, Timer::Countdown);
            assert_eq!(scope.remaining_grace(), Some(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forfeit_wins_over_countdown_at_deadline() {
        let mut scope = TimerScope::new();
        scope.start_grace(Duration::from_secs(3));

        assert_eq!(scope.next().await, Timer::Countdown);
        assert_eq!(scope.next().await, Timer::Countdown);
        assert_eq!(scope.next().await, Timer::Forfeit);
        assert!(!scope.is_grace_running());
        assert_eq!(scope.remaining_grace(), None);

        let mut next = task::spawn(scope.next());
        assert_pending!(next.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_grace_replaces_deadline() {
        let mut scope = TimerScope::new();
        scope.start_grace(Duration::from_secs(30));
        tokio::time::advance(Duration::from_millis(2_500)).await;
        scope.start_grace(Duration::from_secs(30));
        assert_eq!(scope.remaining_grace(), Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_is_one_shot_and_replaced() {
        let mut scope = TimerScope::new();
        scope.schedule_retry(Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(3)).await;
        scope.schedule_retry(Duration::from_secs(5));

        let start = Instant::now();
        assert_eq!(scope.next().await, Timer::Retry);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(5), "fired early: {waited:?}");
        assert!(waited < Duration::from_millis(5_100), "fired late: {waited:?}");
        assert!(!scope.has_pending_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_every_slot() {
        let mut scope = TimerScope::new();
        scope.start_heartbeat(Duration::from_secs(20));
        scope.start_grace(Duration::from_secs(30));
        scope.schedule_retry(Duration::from_secs(5));
        scope.cancel_all();

        assert!(!scope.has_pending_retry());
        assert!(!scope.is_grace_running());
        let mut next = task::spawn(scope.next());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_pending!(next.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_first_tick_is_one_period_out() {
        let mut scope = TimerScope::new();
        scope.start_heartbeat(Duration::from_secs(20));
        let mut next = task::spawn(scope.next());
        tokio::time::advance(Duration::from_secs(19)).await;
        assert_pending!(next.poll());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_ready_eq!(next.poll(), Timer::Heartbeat);
    }
}
