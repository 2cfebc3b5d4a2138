//! WebSocket sync client for a viewer.
//!
//! Provides:
//! - Connection lifecycle with fixed-interval reconnect (no backoff)
//! - `subscribe` on every (re)connect
//! - Decoded server messages forwarded as [`SyncEvent`]s
//!
//! Malformed frames are dropped; they never end the connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. `ws://127.0.0.1:3200`
    pub server_url: String,
    /// Sent in `subscribe`; advisory.
    pub project_root: String,
    pub reconnect_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3200".to_string(),
            project_root: ".".to_string(),
            reconnect_interval: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established and `subscribe` sent
    Connected,
    /// Connection lost
    Disconnected,
    /// A broadcast from the server
    Remote(ServerMessage),
}

/// The sync client.
pub struct SyncClient {
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run [`SyncClient::run`] on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Connect, and reconnect every `reconnect_interval` after a close or a
    /// failed attempt. Returns once the event receiver has been dropped.
    pub async fn run(&self) {
        *self.state.write().await = ConnectionState::Connecting;
        loop {
            match self.connect_once().await {
                Ok(()) => log::info!("Disconnected from {}", self.config.server_url),
                Err(e) => log::warn!("Connection to {} failed: {e}", self.config.server_url),
            }
            if self.event_tx.is_closed() {
                break;
            }

            *self.state.write().await = ConnectionState::Reconnecting;
            tokio::time::sleep(self.config.reconnect_interval).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// One connection: subscribe, then forward frames until the socket
    /// closes.
    pub async fn connect_once(&self) -> Result<(), ProtocolError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.config.server_url.as_str())
            .await
            .map_err(|e| ProtocolError::ConnectFailed(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let subscribe = ClientMessage::subscribe(self.config.project_root.as_str()).encode()?;
        ws_writer
            .send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| ProtocolError::ConnectFailed(e.to_string()))?;

        *self.state.write().await = ConnectionState::Connected;
        log::info!("Connected to {}", self.config.server_url);
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                    Ok(message) => {
                        if self.event_tx.send(SyncEvent::Remote(message)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::debug!("Dropping malformed frame: {e}"),
                },
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    log::debug!("WebSocket error: {e}");
                    break;
                }
                _ => {}
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        let _ = self.event_tx.send(SyncEvent::Disconnected).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_interval, Duration::from_secs(3));
        assert_eq!(ClientConfig::new("ws://h:1").server_url, "ws://h:1");
    }

    #[tokio::test]
    async fn test_client_creation() {
        let mut client = SyncClient::new(ClientConfig::default());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = SyncClient::new(ClientConfig::new(format!("ws://127.0.0.1:{port}")));
        assert!(matches!(
            client.connect_once().await,
            Err(ProtocolError::ConnectFailed(_))
        ));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_run_stops_when_receiver_dropped() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = ClientConfig::new(format!("ws://127.0.0.1:{port}"));
        config.reconnect_interval = Duration::from_millis(10);
        let mut client = SyncClient::new(config);
        drop(client.take_event_rx());

        tokio::time::timeout(Duration::from_secs(5), client.run())
            .await
            .expect("run should return");
    }
}
