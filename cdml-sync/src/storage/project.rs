use std::sync::Arc;

use cdml_core::{encode, validate, ComponentModel, EncodeError, ModelParser};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::files::{DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("component not found: {0}")]
    NotFound(String),
    #[error("a document already exists at {0}")]
    AlreadyExists(String),
    #[error("component cannot be written: {0}")]
    Invalid(#[from] EncodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a bulk load: the authoritative document collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub name: String,
    pub components: Vec<ComponentModel>,
}

/// Component-level operations over a [`DocumentStore`].
///
/// Writes go straight to disk; the watcher picks them up and broadcasts them
/// like any other change.
pub struct ProjectService {
    store: DocumentStore,
    parser: Arc<dyn ModelParser>,
}

impl ProjectService {
    pub fn new(store: DocumentStore, parser: Arc<dyn ModelParser>) -> Self {
        Self { store, parser }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Directory name of the project root.
    pub fn project_name(&self) -> String {
        let root = self.store.root();
        root.canonicalize()
            .ok()
            .as_deref()
            .unwrap_or(root)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    }

    /// Every parseable document, with `file` set to its storage key.
    /// Unreadable or unparseable files are skipped.
    pub async fn list_components(&self) -> Result<Vec<ComponentModel>, ProjectError> {
        let mut components = Vec::new();
        for file in self.store.scan().await? {
            let text = match self.store.read(&file).await {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Skipping {file}: {e}");
                    continue;
                }
            };
            match self.parser.parse(&text) {
                Ok(mut model) => {
                    model.file = file;
                    components.push(model);
                }
                Err(e) => log::debug!("Skipping unparseable {file}: {e}"),
            }
        }
        Ok(components)
    }

    pub async fn snapshot(&self) -> Result<ProjectSnapshot, ProjectError> {
        Ok(ProjectSnapshot {
            name: self.project_name(),
            components: self.list_components().await?,
        })
    }

    /// Resolve a component by raw FQN.
    pub async fn get_component(&self, fqn: &str) -> Result<ComponentModel, ProjectError> {
        self.list_components()
            .await?
            .into_iter()
            .find(|c| c.fqn.raw() == fqn)
            .ok_or_else(|| ProjectError::NotFound(fqn.to_string()))
    }

    /// Replace the document at `model.file` with the model's canonical text.
    pub async fn update_component(&self, model: &ComponentModel) -> Result<(), ProjectError> {
        validate(model)?;
        self.store.write(&model.file, &encode(model)).await?;
        log::info!("Updated {} ({})", model.fqn, model.file);
        Ok(())
    }

    /// Write a new document. Fails if `model.file` is already taken.
    pub async fn create_component(&self, model: &ComponentModel) -> Result<(), ProjectError> {
        validate(model)?;
        self.store.resolve(&model.file)?;
        if self.store.exists(&model.file).await {
            return Err(ProjectError::AlreadyExists(model.file.clone()));
        }
        self.store.write(&model.file, &encode(model)).await?;
        log::info!("Created {} ({})", model.fqn, model.file);
        Ok(())
    }

    /// Remove the document backing `fqn`. Returns the removed file.
    pub async fn delete_component(&self, fqn: &str) -> Result<String, ProjectError> {
        let components = self.list_components().await?;
        let target = components
            .iter()
            .find(|c| c.fqn.raw() == fqn)
            .ok_or_else(|| ProjectError::NotFound(fqn.to_string()))?;

        let dependents = components.iter().filter(|c| c.depends_on(fqn)).count();
        if dependents > 0 {
            log::warn!("Deleting {fqn}, still required by {dependents} component(s)");
        }

        self.store.remove(&target.file).await?;
        log::info!("Deleted {fqn} ({})", target.file);
        Ok(target.file.clone())
    }
}
