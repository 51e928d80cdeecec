//! WebSocket presence transport using `tokio-tungstenite`.
//!
//! Each [`open`](PresenceTransport::open) call dials a dedicated WebSocket
//! connection, sends a [`ChannelCommand::Subscribe`] frame and returns a
//! [`WebSocketPresenceChannel`]. Frames are adjacently tagged JSON, see
//! [`crate::protocol`]. The server is expected to answer the subscription
//! with a `Status` frame carrying `SUBSCRIBED` (or a failure status).
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::PresenceError;
use crate::protocol::{ChannelCommand, ChannelEvent, PresenceRecord};
use crate::transport::{PresenceChannel, PresenceTransport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens presence channels on a WebSocket pub/sub endpoint.
///
/// ```rust,no_run
/// use match_presence::WebSocketPresenceTransport;
/// use std::time::Duration;
///
/// let transport = WebSocketPresenceTransport::new("wss://realtime.example.com/presence")
///     .with_connect_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketPresenceTransport {
    url: String,
    connect_timeout: Option<Duration>,
}

impl WebSocketPresenceTransport {
    /// Create a transport for the given `ws://` or `wss://` URL.
    ///
    /// No connection is made until a channel is opened.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: None,
        }
    }

    /// Fail [`open`](PresenceTransport::open) with [`PresenceError::Timeout`]
    /// when the WebSocket handshake takes longer than `timeout`.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// The endpoint this transport dials.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<WsStream, PresenceError> {
        tracing::debug!(url = %self.url, "connecting to presence server");

        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| PresenceError::Timeout)?,
            None => connect.await,
        };

        let (stream, _response) = result.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            PresenceError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %self.url, "presence WebSocket established");
        Ok(stream)
    }
}

#[async_trait]
impl PresenceTransport for WebSocketPresenceTransport {
    async fn open(
        &mut self,
        topic: &str,
        presence_key: &str,
    ) -> Result<Box<dyn PresenceChannel>, PresenceError> {
        let stream = self.connect().await?;
        let mut channel = WebSocketPresenceChannel::from_stream(stream, topic);
        channel
            .send_command(&ChannelCommand::Subscribe {
                topic: topic.to_string(),
                presence_key: presence_key.to_string(),
            })
            .await
            .map_err(|e| PresenceError::ChannelOpen(e.to_string()))?;
        Ok(Box::new(channel))
    }
}

/// A presence subscription carried by one WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](PresenceChannel::recv) is cancel-safe; dropping its future does
/// not lose frames.
#[derive(Debug)]
pub struct WebSocketPresenceChannel {
    stream: WsStream,
    topic: String,
    closed: bool,
}

impl WebSocketPresenceChannel {
    /// Wrap an established stream as a channel on `topic`.
    ///
    /// No subscribe frame is sent; use this when the subscription handshake
    /// has already been performed (custom auth headers, proxies, etc.).
    pub fn from_stream(stream: WsStream, topic: impl Into<String>) -> Self {
        Self {
            stream,
            topic: topic.into(),
            closed: false,
        }
    }

    /// Topic this channel is subscribed to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn send_command(&mut self, command: &ChannelCommand) -> Result<(), PresenceError> {
        if self.closed {
            return Err(PresenceError::TransportClosed);
        }
        let json = serde_json::to_string(command)?;
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| PresenceError::TransportSend(e.to_string()))
    }
}

#[async_trait]
impl PresenceChannel for WebSocketPresenceChannel {
    async fn track(&mut self, record: &PresenceRecord) -> Result<(), PresenceError> {
        self.send_command(&ChannelCommand::Track {
            topic: self.topic.clone(),
            record: record.clone(),
        })
        .await
    }

    async fn recv(&mut self) -> Option<Result<ChannelEvent, PresenceError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(PresenceError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<ChannelEvent>(&text) {
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => {
                        tracing::warn!("skipping malformed presence frame: {e}; raw: {text}");
                    }
                },
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // tungstenite answers pings itself.
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        if self.closed {
            return Ok(());
        }
        let unsubscribe = ChannelCommand::Unsubscribe {
            topic: self.topic.clone(),
        };
        if let Err(e) = self.send_command(&unsubscribe).await {
            tracing::debug!(error = %e, "unsubscribe frame not delivered");
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| PresenceError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::ChannelStatus;
    use tokio::net::TcpListener;

    #[test]
    fn channel_is_send_and_debug() {
        fn assert_send_debug<T: Send + std::fmt::Debug>() {}
        assert_send_debug::<WebSocketPresenceChannel>();
        assert_send_debug::<WebSocketPresenceTransport>();
    }

    #[tokio::test]
    async fn open_fails_with_invalid_url() {
        let mut transport = WebSocketPresenceTransport::new("not-a-valid-url");
        let err = transport.open("presence-m1", "u1").await.err().unwrap();
        assert!(matches!(err, PresenceError::Io(_)));
    }

    #[tokio::test]
    async fn open_fails_with_unreachable_host() {
        let mut transport = WebSocketPresenceTransport::new("ws://127.0.0.1:1");
        let err = transport.open("presence-m1", "u1").await.err().unwrap();
        assert!(matches!(err, PresenceError::Io(_)));
    }

    #[tokio::test]
    async fn open_times_out() {
        let mut transport = WebSocketPresenceTransport::new("ws://192.0.2.1:1")
            .with_connect_timeout(Duration::from_millis(50));
        let err = transport.open("presence-m1", "u1").await.err().unwrap();
        assert!(matches!(err, PresenceError::Timeout));
    }

    // ── Mock-server helpers ──────────────────────────────────────────────

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the URL to dial.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    fn text(event: &ChannelEvent) -> Message {
        Message::Text(serde_json::to_string(event).unwrap().into())
    }

    async fn next_command(
        ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    ) -> ChannelCommand {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(t) => return serde_json::from_str(&t).unwrap(),
                Message::Close(_) => panic!("client closed before sending a command"),
                _ => {}
            }
        }
    }

    // ── Mock-server tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn open_sends_subscribe_and_reports_status() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let url = start_mock_server(|mut ws| async move {
            let cmd = next_command(&mut ws).await;
            seen_tx.send(cmd).unwrap();
            ws.send(text(&ChannelEvent::status(ChannelStatus::Subscribed)))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketPresenceTransport::new(url);
        let mut channel = transport.open("presence-m1", "u1").await.unwrap();

        let event = channel.recv().await.unwrap().unwrap();
        assert_eq!(event, ChannelEvent::status(ChannelStatus::Subscribed));

        let subscribe = seen_rx.await.unwrap();
        assert_eq!(
            subscribe,
            ChannelCommand::Subscribe {
                topic: "presence-m1".into(),
                presence_key: "u1".into(),
            }
        );
    }

    #[tokio::test]
    async fn track_sends_record_on_topic() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let url = start_mock_server(|mut ws| async move {
            let _subscribe = next_command(&mut ws).await;
            let track = next_command(&mut ws).await;
            seen_tx.send(track).unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketPresenceTransport::new(url);
        let mut channel = transport.open("presence-m1", "u1").await.unwrap();
        let record = PresenceRecord::new("u1", "m1", Some(3));
        channel.track(&record).await.unwrap();

        match seen_rx.await.unwrap() {
            ChannelCommand::Track { topic, record: sent } => {
                assert_eq!(topic, "presence-m1");
                assert_eq!(sent, record);
            }
            other => panic!("expected Track, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recv_skips_malformed_and_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            let _subscribe = next_command(&mut ws).await;
            ws.send(Message::Text("{\"type\":\"Nope\"}".into()))
                .await
                .unwrap();
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(text(&ChannelEvent::leave("u2"))).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketPresenceTransport::new(url);
        let mut channel = transport.open("presence-m1", "u1").await.unwrap();

        let event = channel.recv().await.unwrap().unwrap();
        assert_eq!(event, ChannelEvent::leave("u2"));
    }

    #[tokio::test]
    async fn recv_returns_none_on_close_frame() {
        let url = start_mock_server(|mut ws| async move {
            let _subscribe = next_command(&mut ws).await;
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketPresenceTransport::new(url);
        let mut channel = transport.open("presence-m1", "u1").await.unwrap();
        assert!(channel.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_sends_unsubscribe_and_is_idempotent() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let url = start_mock_server(|mut ws| async move {
            let _subscribe = next_command(&mut ws).await;
            let unsubscribe = next_command(&mut ws).await;
            seen_tx.send(unsubscribe).unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketPresenceTransport::new(url);
        let mut channel = transport.open("presence-m1", "u1").await.unwrap();
        channel.close().await.unwrap();
        channel.close().await.unwrap();

        assert_eq!(
            seen_rx.await.unwrap(),
            ChannelCommand::Unsubscribe {
                topic: "presence-m1".into()
            }
        );

        let record = PresenceRecord::new("u1", "m1", None);
        let err = channel.track(&record).await.unwrap_err();
        assert!(matches!(err, PresenceError::TransportClosed));
    }
}
