//! Artifact probe trait definition.

use crate::error::CacheError;
use std::path::Path;

/// Read-only view of existing artifacts
///
/// Implementations must not cache results between calls: every decision
/// is made against the current state of the store.
pub trait ArtifactProbe: Send + Sync {
    /// Whether an artifact file is present
    fn exists(&self, path: &Path) -> bool;

    /// Array shape stored in an artifact, read without loading its data
    fn shape(&self, path: &Path) -> Result<Vec<usize>, CacheError>;
}
