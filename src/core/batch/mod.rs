//! # Batch Module
//!
//! Processes file sets image by image, reusing outputs that are still valid.
//!
//! ## Per-image Flow
//! 1. **Decide** - Ask the output cache which artifacts are valid, stale or missing
//! 2. **Skip** - If everything is valid the image is never opened
//! 3. **Integrate** - Load the frame, apply the mask, integrate 1-D and/or 2-D
//! 4. **Write** - Patterns through the engine, cakes as `.npy` companions
//!
//! ## Ordering
//! Sets and images are processed strictly one at a time. A failure on one
//! image is recorded and the set continues.

mod config;
mod executor;
mod types;
mod worker;

pub use config::{
    BatchConfig, BatchConfigBuilder, ExportFlags, MaskFlags, DEFAULT_AZIMUTH_BINS, DEFAULT_POINTS,
};
pub use executor::{BatchEngine, CancellationToken};
pub use types::{ImageFailure, ImageResult, ProducedArtifact, RunSummary, SetStatistics};
pub use worker::BatchWorker;
