//! Transport abstraction for presence channels.
//!
//! A [`PresenceTransport`] opens one [`PresenceChannel`] per subscription
//! attempt. The tracker never reuses a channel: every re-subscription closes
//! the previous handle and asks the transport for a fresh one, so
//! implementations do not need to support resubscribing an existing handle.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use match_presence::error::PresenceError;
//! use match_presence::protocol::{ChannelEvent, PresenceRecord};
//! use match_presence::transport::{PresenceChannel, PresenceTransport};
//!
//! struct MyTransport;
//! struct MyChannel;
//!
//! #[async_trait]
//! impl PresenceTransport for MyTransport {
//!     async fn open(
//!         &mut self,
//!         topic: &str,
//!         presence_key: &str,
//!     ) -> Result<Box<dyn PresenceChannel>, PresenceError> {
//!         // Join `topic` on your pub/sub service as `presence_key`.
//!         Ok(Box::new(MyChannel))
//!     }
//! }
//!
//! #[async_trait]
//! impl PresenceChannel for MyChannel {
//!     async fn track(&mut self, record: &PresenceRecord) -> Result<(), PresenceError> {
//!         // Publish the record as this client's presence state.
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<ChannelEvent, PresenceError>> {
//!         // Map SDK callbacks (sync/join/leave/status) to `ChannelEvent`s.
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), PresenceError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::PresenceError;
use crate::protocol::{ChannelEvent, PresenceRecord};

/// Opens presence channels on a publish/subscribe service.
///
/// Connection parameters (URLs, credentials) belong to the implementor;
/// the tracker only supplies the topic and the presence key.
#[async_trait]
pub trait PresenceTransport: Send + 'static {
    /// Open a subscription to `topic` with `presence_key` identifying the
    /// local participant.
    ///
    /// The returned channel should report [`ChannelStatus::Subscribed`](crate::protocol::ChannelStatus::Subscribed)
    /// through [`PresenceChannel::recv`] once the subscription is live.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::ChannelOpen`] (or an I/O error) when the
    /// subscription cannot be started. The tracker treats this like a
    /// `CHANNEL_ERROR` status and retries later.
    async fn open(
        &mut self,
        topic: &str,
        presence_key: &str,
    ) -> Result<Box<dyn PresenceChannel>, PresenceError>;
}

/// A live subscription to a presence topic.
///
/// # Cancel Safety
///
/// [`recv`](PresenceChannel::recv) **MUST** be cancel-safe because the
/// tracker polls it inside `tokio::select!` alongside its timers.
/// Channel-based implementations are naturally cancel-safe.
#[async_trait]
pub trait PresenceChannel: Send + 'static {
    /// Publish `record` as the local participant's presence state.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be delivered or the channel
    /// rejected it. The tracker degrades this to a reconnecting state.
    async fn track(&mut self, record: &PresenceRecord) -> Result<(), PresenceError>;

    /// Receive the next channel event.
    ///
    /// Returns:
    /// - `Some(Ok(event))` for a membership or status event
    /// - `Some(Err(e))` for a transport failure (handled as `CHANNEL_ERROR`)
    /// - `None` once the channel has ended (handled as `CLOSED`)
    async fn recv(&mut self) -> Option<Result<ChannelEvent, PresenceError>>;

    /// Unsubscribe and release the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful close fails. Resources must still be
    /// released.
    async fn close(&mut self) -> Result<(), PresenceError>;
}
