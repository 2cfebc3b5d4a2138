//! WebSocket sync server for one project root.
//!
//! Architecture:
//! ```text
//!  <root>/**/*.cdml
//!        │ notify
//!        ▼
//!  FsWatcher ─► BroadcastPipeline ─► SubscriptionHub ──┬─► Client A
//!               (ChangeClassifier)                     ├─► Client B
//!                                                      └─► Client C
//! ```
//!
//! Clients only receive; `subscribe` frames are advisory and every socket
//! gets every event for the root. Writes reach disk through
//! [`ProjectService`] and come back to everyone through the watcher.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use cdml_core::{CdmlParser, ModelParser};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::SubscriptionHub;
use crate::classify::ChangeClassifier;
use crate::pipeline::BroadcastPipeline;
use crate::protocol::ClientMessage;
use crate::storage::{DocumentStore, ProjectService};
use crate::watch::{FsWatcher, WatchConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Directory holding the documents
    pub project_root: PathBuf,
    pub watch: WatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3200".to_string(),
            project_root: PathBuf::from("."),
            watch: WatchConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BIND_ADDR`, `PORT` and `PROJECT_ROOT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            let host = config
                .bind_addr
                .rsplit_once(':')
                .map_or("127.0.0.1", |(host, _)| host)
                .to_string();
            config.bind_addr = format!("{host}:{port}");
        }
        if let Some(root) = lookup("PROJECT_ROOT") {
            config.project_root = PathBuf::from(root);
        }
        config
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    hub: SubscriptionHub,
    service: Arc<ProjectService>,
    parser: Arc<dyn ModelParser>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new sync server using the built-in CDML parser.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_parser(config, Arc::new(CdmlParser))
    }

    pub fn with_parser(config: ServerConfig, parser: Arc<dyn ModelParser>) -> Self {
        let store = DocumentStore::new(config.project_root.clone(), &config.watch);
        let service = Arc::new(ProjectService::new(store, parser.clone()));
        Self {
            config,
            hub: SubscriptionHub::new(),
            service,
            parser,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    /// The write side sharing this server's project root.
    pub fn service(&self) -> Arc<ProjectService> {
        self.service.clone()
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let _watcher = self.start_watching().await?;
        log::info!(
            "Sync server listening on {} for {}",
            listener.local_addr()?,
            self.config.project_root.display()
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Seed the watcher with the current documents and start the pipeline.
    async fn start_watching(&self) -> Result<FsWatcher, BoxError> {
        let store = self.service.store().clone();
        let known = store.scan().await?;
        log::info!("Found {} document(s) under {}", known.len(), store.root().display());

        let (events_tx, events_rx) = mpsc::channel(256);
        let watcher = FsWatcher::start(store.root(), &self.config.watch, known, events_tx)?;

        let classifier = ChangeClassifier::new(Arc::new(store), self.parser.clone());
        let pipeline = BroadcastPipeline::new(classifier, self.hub.clone());
        tokio::spawn(pipeline.run(events_rx));
        Ok(watcher)
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: SubscriptionHub,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (peer_id, mut outbound) = hub.register().await;
        log::info!("WebSocket connection established from {addr} ({peer_id})");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result: Result<(), BoxError> = async {
            loop {
                tokio::select! {
                    // Incoming WebSocket message
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                stats.write().await.frames_received += 1;
                                match ClientMessage::decode(text.as_str()) {
                                    Ok(ClientMessage::Subscribe { project_root }) => {
                                        log::debug!("{addr} subscribed to {project_root:?}");
                                    }
                                    Err(e) => {
                                        stats.write().await.malformed_frames += 1;
                                        log::debug!("Dropping malformed frame from {addr}: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                stats.write().await.malformed_frames += 1;
                                log::debug!("Dropping binary frame from {addr}");
                            }
                            Some(Ok(Message::Ping(_))) => {
                                // tungstenite queues the Pong; it goes out on the next flush.
                                ws_sender.flush().await?;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Outgoing broadcast frame
                    frame = outbound.recv() => {
                        match frame {
                            Some(frame) => {
                                ws_sender.send(Message::Text(frame.as_ref().into())).await?;
                            }
                            None => break,
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        hub.unregister(&peer_id).await;
        let _ = ws_sender.close().await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::debug!("Unregistered {peer_id}");
        result
    }
}
