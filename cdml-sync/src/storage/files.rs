use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::classify::DocumentSource;
use crate::watch::{relative_key, WatchConfig, WatchFilter};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid document path `{0}`")]
    InvalidPath(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Documents stored as files under one root directory.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    filter: WatchFilter,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>, config: &WatchConfig) -> Self {
        Self {
            root: root.into(),
            filter: WatchFilter::new(config),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a document key to a path under the root.
    ///
    /// Keys are accepted only in the form the watcher reports them:
    /// `/`-separated normal components naming a watched document.
    pub fn resolve(&self, file: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(file);
        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();
        let canonical = parts.is_some_and(|parts| parts.join("/") == file);
        if !canonical || !self.filter.accepts(relative) {
            return Err(StoreError::InvalidPath(file.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// All documents under the root, sorted, skipping hidden and ignored
    /// directories.
    pub async fn scan(&self) -> Result<Vec<String>, StoreError> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == self.root => {
                    return Err(StoreError::io(self.root.display().to_string(), e))
                }
                Err(e) => {
                    log::warn!("Skipping unreadable directory {}: {e}", dir.display());
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Error listing {}: {e}", dir.display());
                        break;
                    }
                };
                let path = entry.path();
                let Some(key) = relative_key(&self.root, &path) else {
                    continue;
                };
                if self.filter.is_excluded(Path::new(&key)) {
                    continue;
                }
                match entry.file_type().await {
                    Ok(ft) if ft.is_dir() => pending.push(path),
                    Ok(ft) if ft.is_file() && self.filter.accepts(Path::new(&key)) => {
                        files.push(key)
                    }
                    _ => {}
                }
            }
        }

        files.sort();
        Ok(files)
    }

    pub async fn exists(&self, file: &str) -> bool {
        match self.resolve(file) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn read(&self, file: &str) -> Result<String, StoreError> {
        let path = self.resolve(file)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::io(file, e))
    }

    /// Replace a document atomically (temp file + rename), creating parent
    /// directories as needed.
    pub async fn write(&self, file: &str, text: &str) -> Result<(), StoreError> {
        let path = self.resolve(file)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }

        // Hidden, so the watcher never reports it.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&temp_path, text).await {
            return Err(StoreError::io(temp_path.display().to_string(), e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::io(file, e));
        }
        log::debug!("Wrote {file} ({} bytes)", text.len());
        Ok(())
    }

    pub async fn remove(&self, file: &str) -> Result<(), StoreError> {
        let path = self.resolve(file)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StoreError::io(file, e))?;
        log::debug!("Removed {file}");
        Ok(())
    }
}

#[async_trait]
impl DocumentSource for DocumentStore {
    async fn read_document(&self, file: &str) -> Result<String, StoreError> {
        self.read(file).await
    }
}
