//! # Match Presence
//!
//! Transport-agnostic presence tracking for two-player matches.
//!
//! A [`PresenceTracker`] keeps the local participant visible on a
//! publish/subscribe presence channel, re-subscribes after channel failures,
//! and turns an opponent's departure into a grace window that ends in a
//! [`PresenceEvent::Forfeit`] unless the channel resynchronises first.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`PresenceTransport`] and
//!   [`PresenceChannel`] for any pub/sub backend
//! - **Injectable reachability**: feed online/offline signals through a
//!   [`ReachabilityPort`]
//! - **WebSocket built-in**: the default `transport-websocket` feature
//!   provides `WebSocketPresenceTransport`
//! - **Event-driven**: receive typed [`PresenceEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let context = MatchContext::new("m1")
//!     .with_local_participant("u1")
//!     .with_players("u1", "u2")
//!     .with_status("active");
//! let network = ManualReachability::new(true);
//! let transport = WebSocketPresenceTransport::new("ws://localhost:4000/presence");
//! let (mut tracker, mut events) =
//!     PresenceTracker::start(transport, &network, context, PresenceConfig::default());
//! ```

pub mod error;
pub mod event;
pub mod protocol;
pub mod reachability;
mod timers;
pub mod tracker;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use error::PresenceError;
pub use event::{ConnectionState, DisconnectionWarning, PresenceEvent};
pub use protocol::{ChannelEvent, ChannelStatus, PresenceRecord};
pub use reachability::{ManualReachability, ReachabilityPort};
pub use tracker::{MatchContext, PresenceConfig, PresenceTracker, ACTIVE_STATUS};
pub use transport::{PresenceChannel, PresenceTransport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketPresenceChannel, WebSocketPresenceTransport};
