//! # Watcher Module
//!
//! Picks up detector files as they are written and processes them once complete.
//!
//! ## Pieces
//! - `DirectoryWatcher` - notify-based source of raw write/remove events
//! - `CompletionDetector` - debounces those events into "file is complete"
//! - `WatchSession` - polls the detector on a fixed cadence and feeds
//!   complete file sets into a `BatchEngine`
//!
//! ## Example
//! ```rust,ignore
//! use lambda_batch::core::watcher::{WatchSession, WatcherConfig};
//!
//! let mut session = WatchSession::new(batch, "/dls/i15-1/data", WatcherConfig::default(), sender)?;
//! let cancel = CancellationToken::new();
//! session.run(&cancel)?;
//! ```

mod completion;
mod session;

pub use completion::CompletionDetector;
pub use session::WatchSession;

use crate::core::fileset::is_container_file;
use crate::error::WatcherError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration for watch mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Quiet time after the last write before a file counts as complete
    pub stability_window: Duration,
    /// Cadence of completion polls
    pub poll_interval: Duration,
    /// Whether to watch subdirectories recursively
    pub recursive: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stability_window: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            recursive: true,
        }
    }
}

/// Raw filesystem change for a detector container file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsChange {
    /// Created or modified
    Written(PathBuf),
    Removed(PathBuf),
    /// The notification backend reported a problem
    Error(String),
}

/// Watches directories for container file changes
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    recursive: bool,
    watched_paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl DirectoryWatcher {
    /// Create a watcher that hands every relevant change to `handler`
    pub fn new<F>(recursive: bool, handler: F) -> Result<Self, WatcherError>
    where
        F: Fn(FsChange) + Send + 'static,
    {
        let watcher = notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
            match result {
                Ok(event) => {
                    for change in Self::translate(event) {
                        handler(change);
                    }
                }
                Err(e) => handler(FsChange::Error(e.to_string())),
            }
        })
        .map_err(|e| WatcherError::InitFailed(e.to_string()))?;

        Ok(Self {
            watcher,
            recursive,
            watched_paths: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Keep only container files; one change per affected path
    fn translate(event: Event) -> Vec<FsChange> {
        let make: fn(PathBuf) -> FsChange = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => FsChange::Written,
            EventKind::Remove(_) => FsChange::Removed,
            _ => return Vec::new(),
        };

        event
            .paths
            .into_iter()
            .filter(|p| is_container_file(p))
            .map(make)
            .collect()
    }

    /// Start watching a directory
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<(), WatcherError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(WatcherError::PathNotFound(path));
        }

        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        self.watcher
            .watch(&path, mode)
            .map_err(|e| WatcherError::WatchFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if let Ok(mut paths) = self.watched_paths.lock() {
            paths.insert(path);
        }

        Ok(())
    }

    /// Stop watching a directory
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<(), WatcherError> {
        let path = path.as_ref();

        self.watcher
            .unwatch(path)
            .map_err(|e| WatcherError::UnwatchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if let Ok(mut paths) = self.watched_paths.lock() {
            paths.remove(path);
        }

        Ok(())
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched_paths
            .lock()
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.watched_paths
            .lock()
            .map(|paths| paths.contains(path.as_ref()))
            .unwrap_or(false)
    }
}
