//! Client reconciliation: a single-writer reducer that merges local
//! optimistic edits with server broadcasts.
//!
//! Per-document states:
//!
//! ```text
//!  Unsynced ──load──► Synced ──edit──► LocallyEditing ──settled──► Synced
//!                                            │
//!                                  foreign broadcast
//!                                            ▼
//!                                       Conflicted ──settled──► Synced
//! ```
//!
//! Every local write records the canonical text it will put on disk. When
//! the watcher reports that text back for the same file, the broadcast is an
//! echo and the reducer treats it as a no-op. Anything else is foreign and
//! is applied as-is (last message wins).
//!
//! Edits are normalized through the codec before they are applied, so the
//! optimistic model is the one the watcher will parse back from disk.

use std::collections::{BTreeSet, HashMap, VecDeque};

use cdml_core::{decode, encode, ComponentModel};

use crate::protocol::ServerMessage;
use crate::storage::ProjectSnapshot;

/// Identifies one outstanding local write.
pub type WriteTicket = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocState {
    #[default]
    Unsynced,
    Synced,
    LocallyEditing,
    Conflicted,
}

/// What the watcher should report once a local write lands.
#[derive(Debug, Clone, PartialEq)]
enum Expected {
    Content(String),
    Removal,
}

#[derive(Debug, Clone, Default)]
struct DocSync {
    state: DocState,
    in_flight: BTreeSet<WriteTicket>,
    awaiting_echo: VecDeque<(WriteTicket, Expected)>,
}

impl DocSync {
    fn settle(&mut self) {
        if self.in_flight.is_empty() {
            self.state = DocState::Synced;
        } else if self.state != DocState::Conflicted {
            self.state = DocState::LocallyEditing;
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.awaiting_echo.is_empty()
    }

    /// Consume `expected` and every older expectation. Returns whether it
    /// was outstanding.
    fn consume_echo(&mut self, expected: &Expected) -> bool {
        match self.awaiting_echo.iter().position(|(_, e)| e == expected) {
            Some(pos) => {
                self.awaiting_echo.drain(..=pos);
                true
            }
            None => false,
        }
    }
}

/// Inputs to the reducer.
#[derive(Debug, Clone)]
pub enum Action {
    /// Bulk load finished.
    Loaded(ProjectSnapshot),
    LoadFailed(String),
    /// Socket opened (`true`) or closed (`false`).
    Connection(bool),
    Reload,
    Select(Option<String>),
    Edit(ComponentModel),
    Create(ComponentModel),
    /// Delete the component with this FQN.
    Delete(String),
    WriteSettled {
        ticket: WriteTicket,
        result: Result<(), String>,
    },
    Remote(ServerMessage),
    DismissError,
}

/// Work the owner of the state must perform on the reducer's behalf.
/// Completions come back as [`Action::WriteSettled`] or [`Action::Loaded`].
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Write {
        ticket: WriteTicket,
        model: ComponentModel,
    },
    Create {
        ticket: WriteTicket,
        model: ComponentModel,
    },
    Delete {
        ticket: WriteTicket,
        fqn: String,
    },
    Reload,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transition {
    /// Whether anything observable changed.
    pub changed: bool,
    pub effect: Option<Effect>,
}

impl Transition {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed(changed: bool) -> Self {
        Self {
            changed,
            effect: None,
        }
    }

    fn with_effect(effect: Effect) -> Self {
        Self {
            changed: true,
            effect: Some(effect),
        }
    }
}

/// One viewer's view of the project.
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    name: String,
    components: Vec<ComponentModel>,
    sync: HashMap<String, DocSync>,
    selected: Option<String>,
    connected: bool,
    loading: bool,
    error: Option<String>,
    stale: BTreeSet<String>,
    next_ticket: WriteTicket,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> &[ComponentModel] {
        &self.components
    }

    pub fn component_by_file(&self, file: &str) -> Option<&ComponentModel> {
        self.components.iter().find(|c| c.file == file)
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_component(&self) -> Option<&ComponentModel> {
        let fqn = self.selected.as_deref()?;
        self.components.iter().find(|c| c.fqn.raw() == fqn)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn doc_state(&self, file: &str) -> DocState {
        self.sync.get(file).map(|d| d.state).unwrap_or_default()
    }

    /// Whether a broadcast said `file` changed but carried no model.
    pub fn is_stale(&self, file: &str) -> bool {
        self.stale.contains(file)
    }

    pub fn pending_writes(&self) -> usize {
        self.sync.values().map(|d| d.in_flight.len()).sum()
    }

    pub fn reduce(&mut self, action: Action) -> Transition {
        match action {
            Action::Loaded(snapshot) => self.load(snapshot),
            Action::LoadFailed(message) => {
                log::warn!("Project load failed: {message}");
                self.loading = false;
                self.error = Some(message);
                Transition::changed(true)
            }
            Action::Connection(true) => {
                self.connected = true;
                self.loading = true;
                Transition::with_effect(Effect::Reload)
            }
            Action::Connection(false) => {
                let was = std::mem::replace(&mut self.connected, false);
                Transition::changed(was)
            }
            Action::Reload => {
                self.loading = true;
                Transition::with_effect(Effect::Reload)
            }
            Action::Select(fqn) => {
                let changed = self.selected != fqn;
                self.selected = fqn;
                Transition::changed(changed)
            }
            Action::Edit(model) => {
                let (ticket, model) = self.begin_write(model);
                Transition::with_effect(Effect::Write { ticket, model })
            }
            Action::Create(model) => {
                let (ticket, model) = self.begin_write(model);
                Transition::with_effect(Effect::Create { ticket, model })
            }
            Action::Delete(fqn) => self.begin_delete(fqn),
            Action::WriteSettled { ticket, result } => self.settle_write(ticket, result),
            Action::Remote(message) => Transition::changed(self.apply_remote(message)),
            Action::DismissError => Transition::changed(self.error.take().is_some()),
        }
    }

    fn issue_ticket(&mut self) -> WriteTicket {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn begin_write(&mut self, model: ComponentModel) -> (WriteTicket, ComponentModel) {
        let model = normalized(model);
        let ticket = self.issue_ticket();
        let doc = self.sync.entry(model.file.clone()).or_default();
        doc.in_flight.insert(ticket);
        doc.awaiting_echo
            .push_back((ticket, Expected::Content(encode(&model))));
        doc.state = DocState::LocallyEditing;

        self.stale.remove(&model.file);
        self.upsert_by_file(model.clone());
        (ticket, model)
    }

    fn begin_delete(&mut self, fqn: String) -> Transition {
        let Some(index) = self.components.iter().position(|c| c.fqn.raw() == fqn) else {
            self.error = Some(format!("component not found: {fqn}"));
            return Transition::changed(true);
        };
        let removed = self.components.remove(index);
        if self.selected.as_deref() == Some(fqn.as_str()) {
            self.selected = None;
        }

        let ticket = self.issue_ticket();
        let doc = self.sync.entry(removed.file).or_default();
        doc.in_flight.insert(ticket);
        doc.awaiting_echo.push_back((ticket, Expected::Removal));
        doc.state = DocState::LocallyEditing;
        Transition::with_effect(Effect::Delete { ticket, fqn })
    }

    fn settle_write(&mut self, ticket: WriteTicket, result: Result<(), String>) -> Transition {
        let Some((file, doc)) = self
            .sync
            .iter_mut()
            .find(|(_, d)| d.in_flight.contains(&ticket))
        else {
            log::debug!("Ignoring settlement of unknown write #{ticket}");
            return Transition::unchanged();
        };

        doc.in_flight.remove(&ticket);
        let before = doc.state;
        let failed = result.is_err();
        if let Err(message) = result {
            // The write never reached disk, so no echo will come for it.
            doc.awaiting_echo.retain(|(t, _)| *t != ticket);
            log::warn!("Write #{ticket} to {file} failed: {message}");
            self.error = Some(message);
        }
        doc.settle();
        Transition::changed(failed || doc.state != before)
    }

    fn load(&mut self, snapshot: ProjectSnapshot) -> Transition {
        let ProjectSnapshot {
            name,
            mut components,
        } = snapshot;
        log::info!("Loaded {} component(s) for {name}", components.len());

        let mut sync = HashMap::with_capacity(components.len());
        for model in &components {
            sync.insert(
                model.file.clone(),
                DocSync {
                    state: DocState::Synced,
                    ..DocSync::default()
                },
            );
        }
        // Writes still in flight survive a reload together with their
        // optimistic model and echo expectations.
        for (file, previous) in self.sync.drain() {
            if previous.in_flight.is_empty() {
                continue;
            }
            match self.components.iter().find(|c| c.file == file) {
                Some(local) => match components.iter_mut().find(|c| c.file == file) {
                    Some(slot) => *slot = local.clone(),
                    None => components.push(local.clone()),
                },
                None => components.retain(|c| c.file != file),
            }
            let mut doc = previous;
            doc.settle();
            sync.insert(file, doc);
        }

        if let Some(fqn) = &self.selected {
            if !components.iter().any(|c| c.fqn.raw() == fqn) {
                self.selected = None;
            }
        }
        self.name = name;
        self.components = components;
        self.sync = sync;
        self.stale.clear();
        self.loading = false;
        Transition::changed(true)
    }

    /// Merge a broadcast. Returns whether the visible state changed.
    fn apply_remote(&mut self, message: ServerMessage) -> bool {
        let file = message.file().to_string();

        let incoming = match &message {
            ServerMessage::FileChanged { component, .. }
            | ServerMessage::FileCreated { component, .. } => component.as_ref(),
            ServerMessage::FileDeleted { .. } => None,
        };
        let expected = match (&message, incoming) {
            (ServerMessage::FileDeleted { .. }, _) => Some(Expected::Removal),
            (_, Some(model)) => Some(Expected::Content(encode(model))),
            _ => None,
        };

        if let Some(doc) = self.sync.get_mut(&file) {
            if let Some(expected) = &expected {
                if doc.consume_echo(expected) {
                    log::trace!("Echo of local write to {file}");
                    if doc.is_idle() && expected == &Expected::Removal {
                        self.sync.remove(&file);
                    }
                    return false;
                }
            }
        }

        let repeated = !self.stale.contains(&file)
            && incoming.is_some_and(|model| {
                self.component_by_file(&file)
                    .is_some_and(|current| same_content(current, model))
            });
        if repeated {
            log::trace!("{file} already matches the broadcast");
            return false;
        }

        if let Some(doc) = self.sync.get_mut(&file) {
            if !doc.in_flight.is_empty() {
                log::warn!("Conflicting change to {file} while a local write is pending");
                doc.state = DocState::Conflicted;
            }
            doc.awaiting_echo.clear();
        }

        match message {
            ServerMessage::FileCreated {
                component: Some(mut model),
                ..
            } => {
                model.file = file.clone();
                self.stale.remove(&file);
                self.upsert_by_file(model);
                self.mark_synced(&file);
                true
            }
            ServerMessage::FileChanged {
                component: Some(mut model),
                ..
            } => {
                model.file = file.clone();
                self.stale.remove(&file);
                let slot = self
                    .components
                    .iter()
                    .position(|c| c.file == file)
                    .or_else(|| {
                        self.components
                            .iter()
                            .position(|c| c.fqn.raw() == model.fqn.raw())
                    });
                match slot {
                    Some(i) => self.components[i] = model,
                    None => self.components.push(model),
                }
                self.mark_synced(&file);
                true
            }
            ServerMessage::FileCreated {
                component: None, ..
            }
            | ServerMessage::FileChanged {
                component: None, ..
            } => {
                log::debug!("{file} changed but could not be parsed; marking stale");
                self.stale.insert(file)
            }
            ServerMessage::FileDeleted { .. } => self.remove_file(&file),
        }
    }

    fn remove_file(&mut self, file: &str) -> bool {
        self.stale.remove(file);
        if self.sync.get(file).is_some_and(DocSync::is_idle) {
            self.sync.remove(file);
        }

        let Some(index) = self.components.iter().position(|c| c.file == file) else {
            return false;
        };
        let removed = self.components.remove(index);
        if self.selected.as_deref() == Some(removed.fqn.raw()) {
            self.selected = None;
        }
        true
    }

    fn upsert_by_file(&mut self, model: ComponentModel) {
        match self.components.iter_mut().find(|c| c.file == model.file) {
            Some(slot) => *slot = model,
            None => self.components.push(model),
        }
    }

    fn mark_synced(&mut self, file: &str) {
        self.sync.entry(file.to_string()).or_default().settle();
    }
}

/// The model as it reads back from its canonical text, keeping `file`.
fn normalized(model: ComponentModel) -> ComponentModel {
    match decode(&encode(&model)) {
        Ok(mut parsed) => {
            parsed.file = model.file;
            parsed
        }
        Err(e) => {
            log::debug!("Keeping {} as given: {e}", model.file);
            model
        }
    }
}

fn same_content(a: &ComponentModel, b: &ComponentModel) -> bool {
    a.fqn == b.fqn
        && a.name == b.name
        && a.interface == b.interface
        && a.constraints == b.constraints
        && a.requires == b.requires
        && a.implementation == b.implementation
}
