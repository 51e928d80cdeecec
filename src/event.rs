//! Events and snapshots the tracker reports to its host.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection badge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Subscribed, or optimistically assumed so after coming back online.
    Connected,
    /// The host reported the network as offline; tracking is suspended.
    Disconnected,
    /// The channel failed and a fresh subscription is pending.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Snapshot of the opponent-disconnected warning.
///
/// The default value is the hidden warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectionWarning {
    /// Participant whose departure started the grace window.
    pub disconnected_participant_id: Option<String>,
    /// Whole seconds left before the forfeit fires.
    pub remaining_seconds: u32,
    /// Whether the warning should be shown.
    pub is_visible: bool,
}

impl DisconnectionWarning {
    /// A visible warning for `participant_id`.
    pub fn visible(participant_id: impl Into<String>, remaining_seconds: u32) -> Self {
        Self {
            disconnected_participant_id: Some(participant_id.into()),
            remaining_seconds,
            is_visible: true,
        }
    }

    /// The hidden warning.
    pub fn hidden() -> Self {
        Self::default()
    }
}

/// Notifications emitted on the tracker's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The connection badge changed.
    ConnectionChanged(ConnectionState),
    /// The disconnection warning changed; emitted every second while a
    /// grace window is counting down.
    WarningChanged(DisconnectionWarning),
    /// The channel delivered a full membership snapshot.
    MembershipSynced {
        /// Presence keys in the snapshot, sorted.
        participants: Vec<String>,
    },
    /// A participant joined the channel.
    ParticipantJoined { participant_id: String },
    /// A participant left the channel.
    ParticipantLeft { participant_id: String },
    /// The grace window for `participant_id` ran out.
    ///
    /// Emitted at most once per disconnection episode and never dropped.
    Forfeit { participant_id: String },
    /// The tracker loop exited. Always the last event.
    Stopped,
}
