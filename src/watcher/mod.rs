//! File watching
//!
//! Polling watcher behind the process loop: track source files, compare
//! modification timestamps on each poll, and report what changed so the
//! pipeline can recompile. Polling keeps the loop dependency-free and
//! deterministic; the interval is the latency floor for picking up edits.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Type of file change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One observed change.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: FileChangeKind,
}

/// Polls tracked files for modification-time changes.
#[derive(Debug)]
pub struct FileWatcher {
    timestamps: RefCell<HashMap<PathBuf, Option<SystemTime>>>,
    poll_interval: Duration,
}

impl FileWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            timestamps: RefCell::new(HashMap::new()),
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Track a file, recording its current timestamp as the baseline.
    pub fn watch<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref().to_path_buf();
        let modified = mtime(&path);
        self.timestamps.borrow_mut().insert(path, modified);
    }

    pub fn unwatch<P: AsRef<Path>>(&self, path: P) {
        self.timestamps.borrow_mut().remove(path.as_ref());
    }

    pub fn watched_count(&self) -> usize {
        self.timestamps.borrow().len()
    }

    /// Compare every tracked file against its last seen timestamp,
    /// returning the changes and updating the baselines.
    pub fn poll(&self) -> Vec<FileChange> {
        let mut timestamps = self.timestamps.borrow_mut();
        let mut changes = Vec::new();

        for (path, last_seen) in timestamps.iter_mut() {
            let current = mtime(path);
            let kind = match (last_seen.as_ref(), current.as_ref()) {
                (Some(old), Some(new)) if new > old => Some(FileChangeKind::Modified),
                (None, Some(_)) => Some(FileChangeKind::Created),
                (Some(_), None) => Some(FileChangeKind::Deleted),
                _ => None,
            };
            if let Some(kind) = kind {
                tracing::debug!(path = %path.display(), ?kind, "file changed");
                changes.push(FileChange {
                    path: path.clone(),
                    kind,
                });
                *last_seen = current;
            }
        }

        changes
    }
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
