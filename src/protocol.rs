//! Wire types for presence channels.
//!
//! These types are shared by every [`PresenceChannel`](crate::PresenceChannel)
//! implementation. The built-in WebSocket adapter serializes them as
//! adjacently tagged JSON (`{"type": "Variant", "data": {…}}`); custom
//! transports are free to map their own SDK callbacks onto [`ChannelEvent`]
//! directly.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix of every presence topic. The full topic is `presence-{match_id}`.
pub const TOPIC_PREFIX: &str = "presence-";

/// Returns the presence topic for a match.
///
/// ```
/// assert_eq!(match_presence::protocol::presence_topic("m1"), "presence-m1");
/// ```
pub fn presence_topic(match_id: &str) -> String {
    format!("{TOPIC_PREFIX}{match_id}")
}

// ── Records ─────────────────────────────────────────────────────────

/// Liveness record published by the local participant.
///
/// Timestamps are RFC 3339 strings so the record stays readable by
/// non-Rust peers on the same channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Participant that published the record. Doubles as the presence key.
    pub participant_id: String,
    /// When the record was produced.
    pub observed_at: String,
    /// Match the record belongs to.
    pub match_id: String,
    /// Heartbeat counter. Absent on the initial record after subscribing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_sequence: Option<u64>,
}

impl PresenceRecord {
    /// Build a record stamped with the current wall-clock time.
    pub fn new(
        participant_id: impl Into<String>,
        match_id: impl Into<String>,
        heartbeat_sequence: Option<u64>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            observed_at: chrono::Utc::now().to_rfc3339(),
            match_id: match_id.into(),
            heartbeat_sequence,
        }
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Subscription status reported by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    /// The subscription is live; presence can be tracked.
    Subscribed,
    /// The channel reported an error.
    ChannelError,
    /// The subscription handshake timed out.
    TimedOut,
    /// The channel was closed.
    Closed,
}

impl ChannelStatus {
    /// Returns `true` for the statuses that require a fresh subscription.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Subscribed)
    }

    /// Wire representation of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribed => "SUBSCRIBED",
            Self::ChannelError => "CHANNEL_ERROR",
            Self::TimedOut => "TIMED_OUT",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Events delivered by a presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelEvent {
    /// Full membership snapshot, keyed by presence key.
    Sync {
        #[serde(default)]
        presences: HashMap<String, Vec<PresenceRecord>>,
    },
    /// A participant joined the channel.
    Join {
        key: String,
        #[serde(default)]
        new_presences: Vec<PresenceRecord>,
    },
    /// A participant left the channel.
    Leave {
        key: String,
        #[serde(default)]
        left_presences: Vec<PresenceRecord>,
    },
    /// Subscription lifecycle transition.
    Status {
        status: ChannelStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ChannelEvent {
    /// Shorthand for a [`ChannelEvent::Status`] without a message.
    pub fn status(status: ChannelStatus) -> Self {
        Self::Status {
            status,
            message: None,
        }
    }

    /// Shorthand for a [`ChannelEvent::Leave`] without presence payloads.
    pub fn leave(key: impl Into<String>) -> Self {
        Self::Leave {
            key: key.into(),
            left_presences: Vec::new(),
        }
    }

    /// Shorthand for a [`ChannelEvent::Join`] without presence payloads.
    pub fn join(key: impl Into<String>) -> Self {
        Self::Join {
            key: key.into(),
            new_presences: Vec::new(),
        }
    }

    /// A [`ChannelEvent::Sync`] listing the given keys with no records.
    pub fn sync_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::Sync {
            presences: keys.into_iter().map(|k| (k.into(), Vec::new())).collect(),
        }
    }
}

/// Commands sent to a presence server by the WebSocket adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelCommand {
    /// Join a topic under the given presence key.
    Subscribe { topic: String, presence_key: String },
    /// Store (or replace) the sender's presence record on a topic.
    Track {
        topic: String,
        record: PresenceRecord,
    },
    /// Leave a topic. The server drops the sender's presence.
    Unsubscribe { topic: String },
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
    fn record_timestamp_is_rfc3339() {
        let record = PresenceRecord::new("u1", "m1", None);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.observed_at).is_ok());
        assert_eq!(record.participant_id, "u1");
        assert_eq!(record.match_id, "m1");
    }

    #[test]
    fn initial_record_omits_sequence() {
        let record = PresenceRecord::new("u1", "m1", None);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("heartbeat_sequence").is_none());
    }

    #[test]
    fn status_failure_classification() {
        assert!(!ChannelStatus::Subscribed.is_failure());
        assert!(ChannelStatus::ChannelError.is_failure());
        assert!(ChannelStatus::TimedOut.is_failure());
        assert!(ChannelStatus::Closed.is_failure());
    }

    #[test]
    fn status_display_matches_wire() {
        for status in [
            ChannelStatus::Subscribed,
            ChannelStatus::ChannelError,
            ChannelStatus::TimedOut,
            ChannelStatus::Closed,
        ] {
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire, format!("\"{status}\""));
        }
    }
}
