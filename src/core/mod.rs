//! # Core Module
//!
//! The UI-agnostic batch integration engine.
//!
//! ## Modules
//! - `fileset` - Parses detector file names and groups module tiles
//! - `engine` - Integration engine seam and a deterministic implementation
//! - `cache` - Decides which existing outputs can be reused
//! - `batch` - Processes file sets image by image
//! - `watcher` - Detects complete files and processes them as they arrive

pub mod batch;
pub mod cache;
pub mod engine;
pub mod fileset;
pub mod watcher;

// Re-export commonly used types
pub use batch::{BatchConfig, BatchEngine, CancellationToken, RunSummary, SetStatistics};
pub use cache::{OutputCache, OutputDecision};
pub use engine::{IntegrationEngine, PatternFormat, SyntheticEngine};
pub use fileset::{group, FileSet, RawFile};
pub use watcher::{CompletionDetector, WatchSession, WatcherConfig};
