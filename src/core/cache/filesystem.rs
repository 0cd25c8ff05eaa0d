//! Filesystem probe reading `.npy` headers.

use super::ArtifactProbe;
use crate::error::CacheError;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Probe backed by the local filesystem
///
/// Shapes come from the `.npy` header only; array data is never read.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl FsProbe {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn shape(&self, path: &Path) -> Result<Vec<usize>, CacheError> {
        let file = File::open(path).map_err(|source| CacheError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let npy = npyz::NpyFile::new(BufReader::new(file)).map_err(|e| CacheError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(npy.shape().iter().map(|d| *d as usize).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn reads_shape_of_written_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.int.cake.npy");
        ndarray_npy::write_npy(&path, &Array2::<f64>::zeros((36, 20))).unwrap();

        assert!(FsProbe.exists(&path));
        assert_eq!(FsProbe.shape(&path).unwrap(), vec![36, 20]);
    }

    #[test]
    fn reads_shape_of_axis_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.tth.cake.npy");
        ndarray_npy::write_npy(&path, &Array1::<f64>::zeros(20)).unwrap();

        assert_eq!(FsProbe.shape(&path).unwrap(), vec![20]);
    }

    #[test]
    fn garbage_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.azi.cake.npy");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"not an array").unwrap();
        drop(file);

        assert!(matches!(
            FsProbe.shape(&path),
            Err(CacheError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_file_does_not_exist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.npy");

        assert!(!FsProbe.exists(&path));
        assert!(matches!(FsProbe.shape(&path), Err(CacheError::Open { .. })));
    }

    #[test]
    fn directory_is_not_an_artifact() {
        let dir = TempDir::new().unwrap();
        assert!(!FsProbe.exists(dir.path()));
    }
}
