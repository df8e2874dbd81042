//! Transport abstraction for the relay connection.
//!
//! The operator holds one logical connection to the relay. A transport
//! surfaces connection changes as events so the caller can resubscribe
//! after every reconnect. Implementations must be thread-safe.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

/// Something that happened on the relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A connection was (re)established.
    Connected,
    /// A text frame arrived.
    Text(String),
    /// The connection dropped; a reconnect may follow.
    Disconnected(String),
}

/// A persistent connection to the relay.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Queue a text frame for the relay.
    async fn send(&self, text: String) -> Result<()>;

    /// Wait for the next event. `Err(Closed)` once the transport is gone.
    async fn recv(&self) -> Result<RelayEvent>;
}

/// Capacity of the event and outbound queues.
const QUEUE_CAPACITY: usize = 1024;

/// WebSocket transport that reconnects with a fixed delay.
pub struct WsRelay {
    outbound: mpsc::Sender<String>,
    events: Mutex<mpsc::Receiver<RelayEvent>>,
}

impl WsRelay {
    /// Start the connection loop.
    pub fn spawn(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(Self::connection_loop(
            url.into(),
            reconnect_delay,
            outbound_rx,
            event_tx,
        ));
        Self {
            outbound: outbound_tx,
            events: Mutex::new(event_rx),
        }
    }

    async fn connection_loop(
        url: String,
        reconnect_delay: Duration,
        mut outbound: mpsc::Receiver<String>,
        events: mpsc::Sender<RelayEvent>,
    ) {
        loop {
            let reason = match Self::run_connection(&url, &mut outbound, &events).await {
                Ok(Some(reason)) => reason,
                // Owner dropped the transport.
                Ok(None) => return,
                Err(e) => e.to_string(),
            };
            warn!(%url, %reason, delay_ms = reconnect_delay.as_millis() as u64, "relay connection lost");
            if events.send(RelayEvent::Disconnected(reason)).await.is_err() {
                return;
            }
            tokio::time::sleep(reconnect_delay).await;
        }
    }

    /// Run one connection. `Ok(Some(reason))` on disconnect, `Ok(None)` on shutdown.
    async fn run_connection(
        url: &str,
        outbound: &mut mpsc::Receiver<String>,
        events: &mpsc::Sender<RelayEvent>,
    ) -> Result<Option<String>> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        info!(%url, "connected to relay");
        if events.send(RelayEvent::Connected).await.is_err() {
            return Ok(None);
        }

        let (mut write, mut read) = stream.split();
        loop {
            tokio::select! {
                out = outbound.recv() => {
                    let Some(text) = out else {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(None);
                    };
                    write
                        .send(Message::text(text))
                        .await
                        .map_err(|e| RelayError::Transport(e.to_string()))?;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(RelayEvent::Text(text.as_str().to_owned())).await.is_err() {
                            return Ok(None);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write
                            .send(Message::Pong(payload))
                            .await
                            .map_err(|e| RelayError::Transport(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(Some(format!("closed by relay: {frame:?}")));
                    }
                    Some(Ok(other)) => debug!(?other, "ignoring non-text frame"),
                    Some(Err(e)) => return Err(RelayError::Transport(e.to_string())),
                    None => return Ok(Some("stream ended".to_string())),
                },
            }
        }
    }
}

#[async_trait]
impl RelayTransport for WsRelay {
    async fn send(&self, text: String) -> Result<()> {
        self.outbound.send(text).await.map_err(|_| RelayError::Closed)
    }

    async fn recv(&self) -> Result<RelayEvent> {
        self.events.lock().await.recv().await.ok_or(RelayError::Closed)
    }
}

/// A simple in-memory transport for testing.
///
/// [`MemoryRelay::pair`] returns the operator side and a [`RelayPeer`] that
/// plays the relay: it injects events and reads what the operator sent.
pub mod memory {
    use super::*;

    /// Operator side of an in-memory relay.
    pub struct MemoryRelay {
        outbound: mpsc::UnboundedSender<String>,
        events: Mutex<mpsc::UnboundedReceiver<RelayEvent>>,
    }

    /// Relay side of an in-memory relay.
    pub struct RelayPeer {
        events: mpsc::UnboundedSender<RelayEvent>,
        sent: Mutex<mpsc::UnboundedReceiver<String>>,
    }

    impl MemoryRelay {
        /// Create a connected pair.
        pub fn pair() -> (Self, RelayPeer) {
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            (
                Self {
                    outbound: outbound_tx,
                    events: Mutex::new(event_rx),
                },
                RelayPeer {
                    events: event_tx,
                    sent: Mutex::new(outbound_rx),
                },
            )
        }
    }

    #[async_trait]
    impl RelayTransport for MemoryRelay {
        async fn send(&self, text: String) -> Result<()> {
            self.outbound.send(text).map_err(|_| RelayError::Closed)
        }

        async fn recv(&self) -> Result<RelayEvent> {
            self.events.lock().await.recv().await.ok_or(RelayError::Closed)
        }
    }

    impl RelayPeer {
        /// Signal a (re)connect.
        pub fn connect(&self) {
            let _ = self.events.send(RelayEvent::Connected);
        }

        /// Deliver a text frame.
        pub fn push(&self, text: impl Into<String>) {
            let _ = self.events.send(RelayEvent::Text(text.into()));
        }

        /// Signal a dropped connection.
        pub fn disconnect(&self, reason: &str) {
            let _ = self.events.send(RelayEvent::Disconnected(reason.to_string()));
        }

        /// Next frame the operator sent, waiting up to `timeout`.
        pub async fn next_sent(&self, timeout: Duration) -> Option<String> {
            let mut sent = self.sent.lock().await;
            tokio::time::timeout(timeout, sent.recv()).await.ok().flatten()
        }
    }
}
