//! Filesystem notification source.
//!
//! The `notify` callback runs on the watcher's own thread. It only translates
//! raw events and forwards them over an unbounded channel; all filtering and
//! waiting happens in the async event pump.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{OcrError, OcrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Maps a raw notification onto zero or more watch events.
///
/// Renames are split: the old name is a deletion and the new name a creation,
/// which covers editors that save through a temp file and rename.
pub fn translate(event: &Event) -> Vec<WatchEvent> {
    let each = |kind: WatchEventKind| {
        event
            .paths
            .iter()
            .map(|path| WatchEvent::new(path.clone(), kind))
            .collect::<Vec<_>>()
    };

    match &event.kind {
        EventKind::Create(_) => each(WatchEventKind::Created),
        EventKind::Remove(_) => each(WatchEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(WatchEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(WatchEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to, ..] => vec![
                WatchEvent::new(from.clone(), WatchEventKind::Deleted),
                WatchEvent::new(to.clone(), WatchEventKind::Created),
            ],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => each(WatchEventKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Starts a non-recursive watcher on `folder`, forwarding events to `tx`.
///
/// The returned watcher must be kept alive for events to keep flowing.
pub fn start_watcher(folder: &Path, tx: UnboundedSender<WatchEvent>) -> OcrResult<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
        Ok(event) => {
            for watch_event in translate(&event) {
                // receiver gone means the session is shutting down
                let _ = tx.send(watch_event);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Filesystem watcher error"),
    })
    .map_err(|e| OcrError::watcher(format!("failed to start: {}", e)))?;

    watcher
        .watch(folder, RecursiveMode::NonRecursive)
        .map_err(|e| OcrError::watcher(format!("cannot watch {}: {}", folder.display(), e)))?;

    tracing::info!(folder = %folder.display(), "Watching for changes");
    Ok(watcher)
}
