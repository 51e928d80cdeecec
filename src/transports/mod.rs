//! Presence transport implementations.
//!
//! Concrete [`PresenceTransport`](crate::PresenceTransport) implementations
//! live behind feature gates:
//!
//! | Feature                | Transport                       |
//! |------------------------|---------------------------------|
//! | `transport-websocket`  | [`WebSocketPresenceTransport`]  |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), match_presence::PresenceError> {
//! use match_presence::{PresenceChannel, PresenceTransport, WebSocketPresenceTransport};
//!
//! let mut transport = WebSocketPresenceTransport::new("ws://localhost:4000/presence");
//! let mut channel = transport.open("presence-m1", "u1").await?;
//!
//! while let Some(Ok(event)) = channel.recv().await {
//!     println!("channel event: {event:?}");
//! }
//!
//! channel.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketPresenceChannel, WebSocketPresenceTransport};
