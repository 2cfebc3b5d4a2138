//! Filesystem watching for CDML documents.
//!
//! ```text
//! notify callback ─► std mpsc ─► bridge thread (EventNormalizer) ─► tokio mpsc<FileEvent>
//! ```
//!
//! Raw notify events are platform-shaped (renames, metadata touches, directory
//! removals). The normalizer turns them into `add`/`change`/`unlink` events
//! for single documents, using the set of files it already knows about.
//! Files present at startup are seeded into that set and produce no events.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Directories never watched besides dot-prefixed entries.
pub const DEFAULT_IGNORED_DIRS: [&str; 5] = ["node_modules", ".git", ".claudiv", "dist", "build"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Document extension, without the dot.
    pub extension: String,
    pub ignored_dirs: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extension: "cdml".to_string(),
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Add,
    Change,
    Unlink,
}

/// One document-level filesystem event. `path` is relative to the project
/// root with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FsEventKind,
    pub path: String,
}

impl FileEvent {
    pub fn new(kind: FsEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Decides which paths under the root are documents.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    extension: String,
    ignored_dirs: HashSet<String>,
}

impl WatchFilter {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            extension: config.extension.trim_start_matches('.').to_string(),
            ignored_dirs: config.ignored_dirs.iter().cloned().collect(),
        }
    }

    /// Whether any component of a relative path is hidden or ignored.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        relative.components().any(|c| match c {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                name.starts_with('.') || self.ignored_dirs.contains(name.as_ref())
            }
            _ => true,
        })
    }

    /// Whether a relative path names a watched document.
    pub fn accepts(&self, relative: &Path) -> bool {
        !self.is_excluded(relative)
            && relative
                .extension()
                .is_some_and(|ext| ext.to_string_lossy() == self.extension)
    }
}

/// `a/b.cdml` for a path under `root`; `None` outside it.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hint {
    Present,
    Gone,
}

/// Turns raw notify events into document events.
pub struct EventNormalizer {
    root: PathBuf,
    filter: WatchFilter,
    known: HashSet<String>,
    /// Target of the last `Name(To)`, so the paired `Name(Both)` does not
    /// report it twice.
    renamed_to: Option<(usize, PathBuf)>,
}

impl EventNormalizer {
    pub fn new(root: PathBuf, filter: WatchFilter, known: impl IntoIterator<Item = String>) -> Self {
        Self {
            root,
            filter,
            known: known.into_iter().collect(),
            renamed_to: None,
        }
    }

    pub fn normalize(&mut self, event: &notify::Event) -> Vec<FileEvent> {
        let hinted: Vec<(&PathBuf, Hint)> = match event.kind {
            EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                let reported = matches!(
                    (&self.renamed_to, event.attrs.tracker()),
                    (Some((seen, target)), Some(tracker)) if *seen == tracker && *target == event.paths[1]
                );
                let mut hinted = vec![(&event.paths[0], Hint::Gone)];
                if !reported {
                    hinted.push((&event.paths[1], Hint::Present));
                }
                hinted
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                self.renamed_to = event
                    .attrs
                    .tracker()
                    .zip(event.paths.first().cloned());
                event.paths.iter().map(|p| (p, Hint::Present)).collect()
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                event.paths.iter().map(|p| (p, Hint::Gone)).collect()
            }
            _ => event.paths.iter().map(|p| (p, Hint::Present)).collect(),
        };

        let mut out = Vec::new();
        for (path, hint) in hinted {
            self.normalize_path(path, hint, &mut out);
        }
        out
    }

    fn normalize_path(&mut self, path: &Path, hint: Hint, out: &mut Vec<FileEvent>) {
        let Some(key) = relative_key(&self.root, path) else {
            return;
        };
        if self.filter.is_excluded(Path::new(&key)) {
            return;
        }

        let exists = path.is_file();
        if !self.filter.accepts(Path::new(&key)) {
            if path.is_dir() {
                if hint == Hint::Present {
                    self.add_directory(path, out);
                }
            } else if !exists {
                // A removed or renamed-away directory takes its documents with it.
                let prefix = format!("{key}/");
                let mut gone: Vec<String> =
                    self.known.iter().filter(|k| k.starts_with(&prefix)).cloned().collect();
                gone.sort();
                for file in gone {
                    self.known.remove(&file);
                    out.push(FileEvent::new(FsEventKind::Unlink, file));
                }
            }
            return;
        }

        match (hint, exists) {
            (Hint::Present, true) => {
                let kind = if self.known.insert(key.clone()) {
                    FsEventKind::Add
                } else {
                    FsEventKind::Change
                };
                out.push(FileEvent::new(kind, key));
            }
            (_, false) => {
                if self.known.remove(&key) {
                    out.push(FileEvent::new(FsEventKind::Unlink, key));
                }
            }
            (Hint::Gone, true) => {
                log::trace!("Ignoring removal of {key}: file still exists");
            }
        }
    }

    /// Report the documents under a directory that was created or moved in.
    fn add_directory(&mut self, dir: &Path, out: &mut Vec<FileEvent>) {
        let mut found = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Skipping unreadable directory {}: {e}", dir.display());
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(key) = relative_key(&self.root, &path) else {
                    continue;
                };
                if self.filter.is_excluded(Path::new(&key)) {
                    continue;
                }
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => pending.push(path),
                    Ok(ft) if ft.is_file() && self.filter.accepts(Path::new(&key)) => found.push(key),
                    _ => {}
                }
            }
        }

        found.sort();
        for key in found {
            if self.known.insert(key.clone()) {
                out.push(FileEvent::new(FsEventKind::Add, key));
            }
        }
    }

    pub fn known_files(&self) -> usize {
        self.known.len()
    }
}

/// Keeps the OS watcher alive; dropping it stops the event stream.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    /// Watch `root` recursively and forward normalized events to `events_tx`.
    ///
    /// `known` lists the documents already present (ignore-initial).
    pub fn start(
        root: &Path,
        config: &WatchConfig,
        known: Vec<String>,
        events_tx: mpsc::Sender<FileEvent>,
    ) -> notify::Result<Self> {
        let root = root.canonicalize().map_err(notify::Error::io)?;
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let mut normalizer = EventNormalizer::new(root.clone(), WatchFilter::new(config), known);
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        for file_event in normalizer.normalize(&event) {
                            log::debug!("{:?} {}", file_event.kind, file_event.path);
                            if events_tx.blocking_send(file_event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => log::error!("Watch error: {e}"),
                }
            }
        });

        log::info!("Watching {} for *.{}", root.display(), config.extension);
        Ok(Self { _watcher: watcher })
    }
}
