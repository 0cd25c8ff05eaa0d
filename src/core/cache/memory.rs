//! In-memory artifact probe for testing.

use super::ArtifactProbe;
use crate::error::CacheError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// In-memory probe
///
/// Lets tests describe existing artifacts (with their shapes, or as
/// corrupt) without writing any file.
pub struct InMemoryProbe {
    /// `None` marks a present but unreadable artifact
    entries: RwLock<HashMap<PathBuf, Option<Vec<usize>>>>,
    shape_reads: AtomicUsize,
}

impl InMemoryProbe {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            shape_reads: AtomicUsize::new(0),
        }
    }

    /// Record an artifact holding an array of this shape
    pub fn insert(&self, path: impl Into<PathBuf>, shape: Vec<usize>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(path.into(), Some(shape));
        }
    }

    /// Record an artifact whose header cannot be read
    pub fn insert_corrupt(&self, path: impl Into<PathBuf>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(path.into(), None);
        }
    }

    pub fn remove(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(path);
        }
    }

    /// Number of shape lookups served
    pub fn shape_reads(&self) -> usize {
        self.shape_reads.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactProbe for InMemoryProbe {
    fn exists(&self, path: &Path) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(path))
            .unwrap_or(false)
    }

    fn shape(&self, path: &Path) -> Result<Vec<usize>, CacheError> {
        self.shape_reads.fetch_add(1, Ordering::SeqCst);

        let entries = self.entries.read().map_err(|_| CacheError::Malformed {
            path: path.to_path_buf(),
            reason: "probe lock poisoned".to_string(),
        })?;

        match entries.get(path) {
            Some(Some(shape)) => Ok(shape.clone()),
            Some(None) => Err(CacheError::Malformed {
                path: path.to_path_buf(),
                reason: "corrupt header".to_string(),
            }),
            None => Err(CacheError::Open {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not in probe"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_shape_is_returned() {
        let probe = InMemoryProbe::new();
        probe.insert("/out/a.npy", vec![3, 4]);

        assert!(probe.exists(Path::new("/out/a.npy")));
        assert_eq!(probe.shape(Path::new("/out/a.npy")).unwrap(), vec![3, 4]);
        assert_eq!(probe.shape_reads(), 1);
    }

    #[test]
    fn corrupt_entry_exists_but_fails_shape() {
        let probe = InMemoryProbe::new();
        probe.insert_corrupt("/out/a.npy");

        assert!(probe.exists(Path::new("/out/a.npy")));
        assert!(probe.shape(Path::new("/out/a.npy")).is_err());
    }

    #[test]
    fn removed_entry_is_gone() {
        let probe = InMemoryProbe::new();
        probe.insert("/out/a.chi", vec![]);
        probe.remove(Path::new("/out/a.chi"));

        assert!(!probe.exists(Path::new("/out/a.chi")));
    }
}
