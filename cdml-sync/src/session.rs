//! Session: the single owner of a viewer's [`ProjectState`].
//!
//! ```text
//!  SyncClient events ─┐
//!  UI commands ───────┼─► inputs ─► reduce() ─► watch::Sender<ProjectState>
//!  effect results ────┘                │
//!        ▲                          Effect
//!        └────── ProjectApi task ◄─────┘
//! ```
//!
//! All state changes happen on the session task. Effects run on spawned
//! tasks and report back through the same input channel, so a write's
//! response and its broadcast echo may arrive in either order.

use std::sync::Arc;

use async_trait::async_trait;
use cdml_core::ComponentModel;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::client::SyncEvent;
use crate::protocol::ProtocolError;
use crate::reconcile::{Action, Effect, ProjectState, WriteTicket};
use crate::storage::{ProjectError, ProjectService, ProjectSnapshot};

/// The project operations a viewer calls.
#[async_trait]
pub trait ProjectApi: Send + Sync {
    async fn load(&self) -> Result<ProjectSnapshot, ProjectError>;
    async fn update(&self, model: &ComponentModel) -> Result<(), ProjectError>;
    async fn create(&self, model: &ComponentModel) -> Result<(), ProjectError>;
    async fn delete(&self, fqn: &str) -> Result<(), ProjectError>;
}

#[async_trait]
impl ProjectApi for ProjectService {
    async fn load(&self) -> Result<ProjectSnapshot, ProjectError> {
        self.snapshot().await
    }

    async fn update(&self, model: &ComponentModel) -> Result<(), ProjectError> {
        self.update_component(model).await
    }

    async fn create(&self, model: &ComponentModel) -> Result<(), ProjectError> {
        self.create_component(model).await
    }

    async fn delete(&self, fqn: &str) -> Result<(), ProjectError> {
        self.delete_component(fqn).await.map(|_| ())
    }
}

/// Local user intents.
#[derive(Debug, Clone)]
pub enum Command {
    Edit(ComponentModel),
    Create(ComponentModel),
    Delete(String),
    Select(Option<String>),
    Reload,
    DismissError,
}

#[derive(Debug)]
pub enum SessionInput {
    Sync(SyncEvent),
    Command(Command),
    Settled {
        ticket: WriteTicket,
        result: Result<(), String>,
    },
    Loaded(Result<ProjectSnapshot, String>),
}

impl From<SessionInput> for Action {
    fn from(input: SessionInput) -> Self {
        match input {
            SessionInput::Sync(SyncEvent::Connected) => Action::Connection(true),
            SessionInput::Sync(SyncEvent::Disconnected) => Action::Connection(false),
            SessionInput::Sync(SyncEvent::Remote(message)) => Action::Remote(message),
            SessionInput::Command(Command::Edit(model)) => Action::Edit(model),
            SessionInput::Command(Command::Create(model)) => Action::Create(model),
            SessionInput::Command(Command::Delete(fqn)) => Action::Delete(fqn),
            SessionInput::Command(Command::Select(fqn)) => Action::Select(fqn),
            SessionInput::Command(Command::Reload) => Action::Reload,
            SessionInput::Command(Command::DismissError) => Action::DismissError,
            SessionInput::Settled { ticket, result } => Action::WriteSettled { ticket, result },
            SessionInput::Loaded(Ok(snapshot)) => Action::Loaded(snapshot),
            SessionInput::Loaded(Err(message)) => Action::LoadFailed(message),
        }
    }
}

/// Cloneable access to a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    inputs: mpsc::Sender<SessionInput>,
    state: watch::Receiver<ProjectState>,
}

impl SessionHandle {
    pub async fn command(&self, command: Command) -> Result<(), ProtocolError> {
        self.send(SessionInput::Command(command)).await
    }

    pub async fn deliver(&self, event: SyncEvent) -> Result<(), ProtocolError> {
        self.send(SessionInput::Sync(event)).await
    }

    async fn send(&self, input: SessionInput) -> Result<(), ProtocolError> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Feed a [`SyncClient`](crate::client::SyncClient) event stream into
    /// the session.
    pub fn forward(&self, mut events: mpsc::Receiver<SyncEvent>) -> JoinHandle<()> {
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inputs.send(SessionInput::Sync(event)).await.is_err() {
                    break;
                }
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ProjectState> {
        self.state.clone()
    }

    /// The most recently published state.
    pub fn current(&self) -> ProjectState {
        self.state.borrow().clone()
    }
}

pub struct Session {
    state: ProjectState,
    api: Arc<dyn ProjectApi>,
    inputs: mpsc::Receiver<SessionInput>,
    loopback: mpsc::WeakSender<SessionInput>,
    published: watch::Sender<ProjectState>,
}

impl Session {
    pub fn new(api: Arc<dyn ProjectApi>) -> (Self, SessionHandle) {
        let (inputs_tx, inputs) = mpsc::channel(256);
        let (published, state) = watch::channel(ProjectState::new());
        let session = Self {
            state: ProjectState::new(),
            api,
            inputs,
            loopback: inputs_tx.downgrade(),
            published,
        };
        (
            session,
            SessionHandle {
                inputs: inputs_tx,
                state,
            },
        )
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Issue the initial load, then process inputs until every handle is
    /// dropped and no effect is outstanding.
    pub async fn run(mut self) {
        self.apply(Action::Reload);
        while let Some(input) = self.inputs.recv().await {
            self.apply(input.into());
        }
        log::debug!("Session ended");
    }

    fn apply(&mut self, action: Action) {
        let transition = self.state.reduce(action);
        if transition.changed {
            self.published.send_replace(self.state.clone());
        }
        if let Some(effect) = transition.effect {
            self.execute(effect);
        }
    }

    fn execute(&self, effect: Effect) {
        let Some(loopback) = self.loopback.upgrade() else {
            return;
        };
        let api = self.api.clone();
        tokio::spawn(async move {
            let input = match effect {
                Effect::Reload => SessionInput::Loaded(api.load().await.map_err(|e| e.to_string())),
                Effect::Write { ticket, model } => SessionInput::Settled {
                    ticket,
                    result: api.update(&model).await.map_err(|e| e.to_string()),
                },
                Effect::Create { ticket, model } => SessionInput::Settled {
                    ticket,
                    result: api.create(&model).await.map_err(|e| e.to_string()),
                },
                Effect::Delete { ticket, fqn } => SessionInput::Settled {
                    ticket,
                    result: api.delete(&fqn).await.map_err(|e| e.to_string()),
                },
            };
            let _ = loopback.send(input).await;
        });
    }
}
