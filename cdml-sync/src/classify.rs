//! Change classification: filesystem event → [`ChangeRecord`].
//!
//! Never fails. A vanished file becomes `deleted`; unreadable or unparseable
//! text keeps the event's kind with the model absent.

use std::sync::Arc;

use async_trait::async_trait;
use cdml_core::ModelParser;

use crate::protocol::{ChangeKind, ChangeRecord};
use crate::storage::StoreError;
use crate::watch::{FileEvent, FsEventKind};

/// Where the classifier reads document text from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn read_document(&self, file: &str) -> Result<String, StoreError>;
}

pub struct ChangeClassifier {
    source: Arc<dyn DocumentSource>,
    parser: Arc<dyn ModelParser>,
}

impl ChangeClassifier {
    pub fn new(source: Arc<dyn DocumentSource>, parser: Arc<dyn ModelParser>) -> Self {
        Self { source, parser }
    }

    pub async fn classify(&self, event: &FileEvent) -> ChangeRecord {
        let kind = match event.kind {
            FsEventKind::Add => ChangeKind::Created,
            FsEventKind::Change => ChangeKind::Modified,
            FsEventKind::Unlink => return ChangeRecord::deleted(&event.path),
        };

        let text = match self.source.read_document(&event.path).await {
            Ok(text) => text,
            Err(e) if e.is_not_found() => {
                log::debug!("{} vanished before it could be read", event.path);
                return ChangeRecord::deleted(&event.path);
            }
            Err(e) => {
                log::warn!("Failed to read {}: {e}", event.path);
                return ChangeRecord {
                    kind,
                    file: event.path.clone(),
                    model: None,
                };
            }
        };

        let model = match self.parser.parse(&text) {
            Ok(mut model) => {
                model.file = event.path.clone();
                Some(model)
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {e}", event.path);
                None
            }
        };

        ChangeRecord {
            kind,
            file: event.path.clone(),
            model,
        }
    }
}
