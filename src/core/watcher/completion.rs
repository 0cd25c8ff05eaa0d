//! Debouncing of write events into completed files.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Tracks files that are still being written
///
/// A path becomes ready once strictly more than the stability window has
/// passed since its last write event and a one-byte read succeeds. A ready
/// path is never reported again.
#[derive(Debug)]
pub struct CompletionDetector {
    stability_window: Duration,
    pending: BTreeMap<PathBuf, Instant>,
    processed: HashSet<PathBuf>,
}

impl CompletionDetector {
    pub fn new(stability_window: Duration) -> Self {
        Self {
            stability_window,
            pending: BTreeMap::new(),
            processed: HashSet::new(),
        }
    }

    pub fn stability_window(&self) -> Duration {
        self.stability_window
    }

    /// Record a create/modify event now
    pub fn record_event(&mut self, path: impl Into<PathBuf>) -> bool {
        self.record_event_at(path, Instant::now())
    }

    /// Record a create/modify event at `at`
    ///
    /// Returns true when the path was not pending before.
    pub fn record_event_at(&mut self, path: impl Into<PathBuf>, at: Instant) -> bool {
        let path = path.into();
        if self.processed.contains(&path) {
            return false;
        }
        self.pending.insert(path, at).is_none()
    }

    /// Drop a pending path, e.g. after a remove event
    pub fn forget(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    /// Let a completed path be detected again once it is rewritten
    pub fn release(&mut self, path: &Path) -> bool {
        self.processed.remove(path)
    }

    /// Treat a path as already handled; later events for it are ignored
    pub fn mark_processed(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.pending.remove(&path);
        self.processed.insert(path);
    }

    pub fn poll(&mut self) -> Vec<PathBuf> {
        self.poll_at(Instant::now())
    }

    /// Paths that transitioned to ready at `now`, in path order
    pub fn poll_at(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready = Vec::new();
        let mut abandoned = Vec::new();

        for (path, last_event) in &self.pending {
            if !path.exists() {
                abandoned.push(path.clone());
                continue;
            }
            if now.saturating_duration_since(*last_event) <= self.stability_window {
                continue;
            }
            if can_read_one_byte(path) {
                ready.push(path.clone());
            } else {
                debug!("File not yet readable: {}", path.display());
            }
        }

        for path in abandoned {
            debug!("Pending file disappeared: {}", path.display());
            self.pending.remove(&path);
        }

        for path in &ready {
            self.pending.remove(path);
            self.processed.insert(path.clone());
            info!("File complete: {}", path.display());
        }

        ready
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        self.processed.contains(path)
    }
}

fn can_read_one_byte(path: &Path) -> bool {
    let mut buf = [0u8; 1];
    File::open(path)
        .and_then(|mut file| file.read(&mut buf))
        .is_ok()
}
