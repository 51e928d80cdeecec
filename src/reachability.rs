//! Network reachability as an injectable port.
//!
//! The tracker never inspects the host network itself. Hosts report
//! online/offline transitions through a [`ReachabilityPort`]; the tracker
//! subscribes once at start and reacts to every change.

use std::sync::Arc;

use tokio::sync::watch;

/// Source of online/offline signals.
pub trait ReachabilityPort: Send + Sync + 'static {
    /// Current reachability.
    fn is_online(&self) -> bool;

    /// A receiver notified whenever reachability is reported.
    ///
    /// The tracker ignores notifications that repeat the current value.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// A [`ReachabilityPort`] driven by explicit calls.
///
/// Clones share the same signal, so one clone can be handed to the tracker
/// while another is kept by whatever observes the real network.
///
/// ```
/// use match_presence::{ManualReachability, ReachabilityPort};
///
/// let net = ManualReachability::new(true);
/// let rx = net.watch();
/// net.set_online(false);
/// assert!(!net.is_online());
/// assert!(!*rx.borrow());
/// ```
#[derive(Debug, Clone)]
pub struct ManualReachability {
    tx: Arc<watch::Sender<bool>>,
}

impl ManualReachability {
    /// Create a port with the given initial reachability.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Report a reachability change.
    pub fn set_online(&self, online: bool) {
        tracing::debug!(online, "reachability reported");
        self.tx.send_replace(online);
    }
}

impl Default for ManualReachability {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ReachabilityPort for ManualReachability {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
