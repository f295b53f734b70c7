//! Source tree watching.

use std::path::{Path, PathBuf};

use assetpipe_tasks::{Category, PathTable};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::server::ServerError;

/// A change that should rerun a category's task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Category whose watch glob matched
    pub category: Category,

    /// Changed path, relative to the source root
    pub path: PathBuf,
}

/// Watches the source root for the lifetime of the value.
pub struct FileWatcher {
    _watcher: Option<RecommendedWatcher>,
}

impl FileWatcher {
    /// Start watching the table's source root.
    ///
    /// Returns the watcher and a channel of classified events. Every
    /// matching event is forwarded; nothing is debounced.
    pub fn new(table: &PathTable) -> Result<(Self, mpsc::Receiver<WatchEvent>), ServerError> {
        let (tx, rx) = mpsc::channel(100);
        let root = table.source_root().to_path_buf();

        if !root.is_dir() {
            tracing::warn!("Source root {} does not exist, not watching", root.display());
            return Ok((Self { _watcher: None }, rx));
        }

        let roots = WatchRoots::new(&root);
        let table = table.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Watch error: {}", e);
                    return;
                }
            };

            for path in &event.paths {
                let Some(rel) = roots.relative(path) else {
                    continue;
                };
                for watch_event in classify(&table, rel, &event.kind) {
                    // Receiver gone means the process is shutting down
                    let _ = tx.blocking_send(watch_event);
                }
            }
        })
        .map_err(|e| ServerError::Watch(e.to_string()))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ServerError::Watch(e.to_string()))?;

        tracing::info!("Watching {}", root.display());
        Ok((Self { _watcher: Some(watcher) }, rx))
    }
}

/// The source root as given and as resolved, since notify may report either.
struct WatchRoots {
    given: PathBuf,
    canonical: Option<PathBuf>,
}

impl WatchRoots {
    fn new(root: &Path) -> Self {
        Self {
            given: root.to_path_buf(),
            canonical: root.canonicalize().ok(),
        }
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.given).ok().or_else(|| {
            self.canonical
                .as_deref()
                .and_then(|root| path.strip_prefix(root).ok())
        })
    }
}

/// Map a change to the categories that watch it.
///
/// Only create, modify and remove events count.
pub fn classify(table: &PathTable, rel_path: &Path, kind: &EventKind) -> Vec<WatchEvent> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => table
            .watching(rel_path)
            .into_iter()
            .map(|category| WatchEvent {
                category,
                path: rel_path.to_path_buf(),
            })
            .collect(),
        _ => Vec::new(),
    }
}
