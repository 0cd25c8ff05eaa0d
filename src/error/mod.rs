//! # Error Module
//!
//! Error taxonomy for the batch integration engine.
//!
//! ## Propagation
//! - **Configuration errors** are fatal and abort a run before any image is touched
//! - **Processing errors** are contained per image and surface as data on `ImageResult`
//! - **Cache errors** never escape: an unreadable artifact simply gets regenerated
//! - **Watcher errors** only affect watch mode start-up

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatcherError),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop a run before processing starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Calibration file not found: {path}")]
    CalibrationNotFound { path: PathBuf },

    #[error("Calibration file {path} could not be read: {source}")]
    CalibrationUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Calibration file {path} was rejected by the integration engine: {reason}")]
    CalibrationRejected { path: PathBuf, reason: String },

    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input directory not found: {path}")]
    InputDirectoryNotFound { path: PathBuf },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Errors raised by an integration engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to decode image {index} of {path}: {reason}")]
    Decode {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("Image index {index} out of range for {path} ({count} images)")]
    IndexOutOfRange {
        path: PathBuf,
        index: usize,
        count: usize,
    },

    #[error("Failed to load mask {path}: {reason}")]
    Mask { path: PathBuf, reason: String },

    #[error("Integration failed: {0}")]
    Integration(String),

    #[error("Failed to write pattern {path}: {source}")]
    PatternWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that fail a single image
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Shape mismatch for {artifact}: expected {expected:?}, engine returned {actual:?}")]
    ShapeMismatch {
        artifact: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Failed to write {path}: {reason}")]
    ArtifactWrite { path: PathBuf, reason: String },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while inspecting an existing artifact
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to open artifact {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact {path} is not a valid array file: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Errors that can occur during watching
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to initialize watcher: {0}")]
    InitFailed(String),

    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Failed to watch {}: {reason}", path.display())]
    WatchFailed { path: PathBuf, reason: String },

    #[error("Failed to unwatch {}: {reason}", path.display())]
    UnwatchFailed { path: PathBuf, reason: String },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, BatchError>;
