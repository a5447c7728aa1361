// SPDX-License-Identifier: Apache-2.0

//! Async wrapper over OS-level file system notifications.
//!
//! The `notify` crate delivers events from its own watch thread; we forward
//! them into an unbounded tokio channel so tailer tasks can `select!` on
//! them alongside their cancellation token. Events are collapsed to the three
//! kinds the tailing logic cares about; renames map to Remove (old name) and
//! Create (new name) so rotation shows up the same way regardless of whether
//! the rotator renames or deletes.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watcher initialization failed: {0}")]
    Init(String),

    #[error("unable to watch {path}: {message}")]
    Subscribe { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEventKind {
    Create,
    Modify,
    Remove,
}

#[derive(Debug, Clone)]
pub struct PathEvent {
    pub kind: PathEventKind,
    pub paths: Vec<PathBuf>,
}

impl PathEvent {
    /// True when the event touches `path`.
    pub fn concerns(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

/// Non-recursive directory watcher delivering events as an async stream.
pub struct DirWatcher {
    // Held for its Drop; dropping it releases the OS subscription.
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<PathEvent>,
}

impl DirWatcher {
    pub fn new() -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(ev) = convert_event(event) {
                        // Receiver dropped means the tailer is shutting down.
                        let _ = tx.send(ev);
                    }
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            },
            notify::Config::default(),
        )
        .map_err(|e| WatchError::Init(e.to_string()))?;

        Ok(Self { watcher, rx })
    }

    /// Subscribe to events for the immediate contents of `path`.
    pub fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Subscribe {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Next event, or None if the notify thread went away.
    pub async fn next(&mut self) -> Option<PathEvent> {
        self.rx.recv().await
    }
}

fn convert_event(event: notify::Event) -> Option<PathEvent> {
    if event.paths.is_empty() {
        return None;
    }

    let kind = match event.kind {
        EventKind::Create(_) => PathEventKind::Create,
        EventKind::Remove(_) => PathEventKind::Remove,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => PathEventKind::Remove,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => PathEventKind::Create,
        // Rename with both paths: the old name is gone, re-resolution will
        // find the new one.
        EventKind::Modify(ModifyKind::Name(_)) => PathEventKind::Remove,
        EventKind::Modify(_) => PathEventKind::Modify,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
    };

    Some(PathEvent {
        kind,
        paths: event.paths,
    })
}
