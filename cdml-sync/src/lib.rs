//! # cdml-sync: live synchronization for CDML projects
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────── server ─────────────────────────────────────────────┐
//!  │ FsWatcher ─► ChangeClassifier ─► BroadcastPipeline ─► Hub ──┐   │
//!  │                 ▲ DocumentStore ◄─ ProjectService            │   │
//!  └─────────────────┼───────────────────────▲────────────────────┼───┘
//!                    │ disk                  │ writes       ws    │
//!  ┌──────────── viewer ─────────────────────┼────────────────────▼───┐
//!  │  Session (ProjectState::reduce) ◄── SyncClient ◄─────────────────│
//!  └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages and `ChangeRecord`
//! - [`watch`]: `notify` adapter producing add/change/unlink events
//! - [`classify`]: event → `ChangeRecord`
//! - [`broadcast`]: `SubscriptionHub` fan-out
//! - [`pipeline`]: watcher events through the classifier into the hub
//! - [`storage`]: flat-file `DocumentStore` and `ProjectService`
//! - [`server`]: WebSocket server
//! - [`client`]: reconnecting WebSocket client
//! - [`reconcile`]: per-viewer reducer with echo and conflict handling
//! - [`session`]: task that owns a `ProjectState` and runs its effects

pub mod broadcast;
pub mod classify;
pub mod client;
pub mod pipeline;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod storage;
pub mod watch;

pub use broadcast::{HubStats, SubscriptionHub};
pub use classify::{ChangeClassifier, DocumentSource};
pub use client::{ClientConfig, ConnectionState, SyncClient, SyncEvent};
pub use pipeline::BroadcastPipeline;
pub use protocol::{ChangeKind, ChangeRecord, ClientMessage, ProtocolError, ServerMessage};
pub use reconcile::{Action, DocState, Effect, ProjectState, Transition, WriteTicket};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{Command, ProjectApi, Session, SessionHandle, SessionInput};
pub use storage::{DocumentStore, ProjectError, ProjectService, ProjectSnapshot, StoreError};
pub use watch::{FileEvent, FsEventKind, FsWatcher, WatchConfig};
