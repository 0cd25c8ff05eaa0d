//! Event type definitions for progress reporting.

use crate::core::batch::{RunSummary, SetStatistics};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// All events emitted by the batch engine and the watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Batch processing events
    Batch(BatchEvent),
    /// Watch mode events
    Watch(WatchEvent),
}

/// Events from the batch engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
    /// A run over one or more file sets has started
    RunStarted { run_id: Uuid, file_sets: usize },
    /// Processing of a file set has started
    SetStarted { name: String, total_images: usize },
    /// An image was dispatched
    Progress(ImageProgress),
    /// All outputs of an image already existed
    ImageSkipped { name: String, index: usize },
    /// An image failed; the set continues
    ImageFailed {
        name: String,
        index: usize,
        message: String,
    },
    /// A file set finished, possibly with failed images
    SetCompleted(SetStatistics),
    /// Something went wrong outside a single image
    Error { message: String },
    /// The run stopped at a cancellation point
    Cancelled,
    /// The run finished
    RunCompleted(RunSummary),
}

/// Progress information within a file set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProgress {
    /// 1-based index of the image just dispatched
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Events from watch mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WatchEvent {
    /// Watcher started monitoring a folder
    Started { path: PathBuf },
    /// Watcher stopped monitoring a folder
    Stopped { path: PathBuf },
    /// A matching file was created or modified for the first time
    FileDetected { path: PathBuf },
    /// A file finished being written
    FileReady { path: PathBuf },
    /// Ready files that cannot form a set yet
    WaitingForTiles { base: PathBuf, missing: Vec<String> },
    /// An error occurred
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_serializable() {
        let event = Event::Batch(BatchEvent::Progress(ImageProgress {
            current: 3,
            total: 10,
            message: "Processing image 3/10".to_string(),
        }));

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();

        match deserialized {
            Event::Batch(BatchEvent::Progress(p)) => {
                assert_eq!(p.current, 3);
                assert_eq!(p.total, 10);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn set_completion_carries_statistics() {
        let stats = SetStatistics::new("run_042", 12);
        let json = serde_json::to_string(&Event::Batch(BatchEvent::SetCompleted(stats))).unwrap();
        assert!(json.contains("run_042"));
    }
}
