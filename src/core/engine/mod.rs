//! # Engine Module
//!
//! The narrow interface the batch engine needs from a diffraction
//! integration backend: decode an image from a file set, integrate it to a
//! 1-D pattern or a 2-D cake, and write patterns in textual formats.
//!
//! The integration mathematics live behind [`IntegrationEngine`]. The crate
//! ships [`SyntheticEngine`], a deterministic implementation used by the tests
//! and the bundled CLI.

mod synthetic;

pub use synthetic::{EngineCalls, SyntheticEngine};

use crate::core::fileset::FileSet;
use crate::error::EngineError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Pixel mask, `true` marks an excluded pixel
pub type Mask = Array2<bool>;

/// A 1-D integrated pattern
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Radial axis (2-theta, degrees)
    pub radial: Array1<f64>,
    pub intensity: Array1<f64>,
}

impl Pattern {
    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }
}

/// A 2-D azimuth-vs-radial re-binned map
#[derive(Debug, Clone, PartialEq)]
pub struct Cake {
    /// Shape `(azimuth_bins, radial_bins)`
    pub intensity: Array2<f64>,
    /// Radial axis (2-theta), one entry per column
    pub radial: Array1<f64>,
    /// Azimuth axis (degrees), one entry per row
    pub azimuth: Array1<f64>,
}

/// Textual output formats for 1-D patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternFormat {
    /// Fit2d-style chi file
    Chi,
    /// Two-column xy with a comment header
    Xy,
    /// Plain two-column data
    Dat,
}

impl PatternFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PatternFormat::Chi => "chi",
            PatternFormat::Xy => "xy",
            PatternFormat::Dat => "dat",
        }
    }
}

impl fmt::Display for PatternFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Integration backend used by the batch engine.
///
/// Implementations are driven from one worker thread at a time and are
/// never shared across concurrently running sets.
pub trait IntegrationEngine: Send {
    /// Load the calibration geometry used for every following integration
    fn load_calibration(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Number of images stored in a file set
    fn image_count(&mut self, file_set: &FileSet) -> Result<usize, EngineError>;

    /// Decode one image; multi-module sets are composited into one frame
    fn load_image(&mut self, file_set: &FileSet, index: usize) -> Result<Array2<f64>, EngineError>;

    /// Load a mask aligned to the given image shape `(rows, cols)`
    fn load_mask(&mut self, path: &Path, shape: (usize, usize)) -> Result<Mask, EngineError>;

    fn integrate_1d(
        &mut self,
        image: &Array2<f64>,
        mask: Option<&Mask>,
        points: usize,
    ) -> Result<Pattern, EngineError>;

    fn integrate_2d(
        &mut self,
        image: &Array2<f64>,
        mask: Option<&Mask>,
        radial_points: usize,
        azimuth_bins: usize,
    ) -> Result<Cake, EngineError>;

    /// Persist a pattern in the requested textual format
    fn save_pattern(
        &mut self,
        pattern: &Pattern,
        path: &Path,
        format: PatternFormat,
    ) -> Result<(), EngineError>;
}

/// Write a pattern as text in one of the supported formats
pub fn write_pattern_text(
    pattern: &Pattern,
    path: &Path,
    format: PatternFormat,
) -> Result<(), EngineError> {
    let wrap = |source| EngineError::PatternWrite {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(wrap)?;
    let mut out = BufWriter::new(file);

    match format {
        PatternFormat::Chi => {
            writeln!(out, "{}", path.display()).map_err(wrap)?;
            writeln!(out, "2-Theta Angle (Degrees)").map_err(wrap)?;
            writeln!(out, "Intensity").map_err(wrap)?;
            writeln!(out, "{:>8}", pattern.len()).map_err(wrap)?;
        }
        PatternFormat::Xy => {
            writeln!(out, "# 2th_deg I").map_err(wrap)?;
        }
        PatternFormat::Dat => {}
    }

    for (x, y) in pattern.radial.iter().zip(pattern.intensity.iter()) {
        writeln!(out, "{:>16.8e} {:>16.8e}", x, y).map_err(wrap)?;
    }

    out.flush().map_err(wrap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn pattern() -> Pattern {
        Pattern {
            radial: array![1.0, 2.0, 3.0],
            intensity: array![10.0, 20.0, 30.0],
        }
    }

    #[test]
    fn chi_file_has_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.chi");

        write_pattern_text(&pattern(), &path, PatternFormat::Chi).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4 + 3);
        assert_eq!(lines[1], "2-Theta Angle (Degrees)");
        assert_eq!(lines[3].trim(), "3");
    }

    #[test]
    fn dat_file_is_bare_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.dat");

        write_pattern_text(&pattern(), &path, PatternFormat::Dat).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("run.xy");

        let result = write_pattern_text(&pattern(), &path, PatternFormat::Xy);
        assert!(matches!(result, Err(EngineError::PatternWrite { .. })));
    }

    #[test]
    fn format_extensions() {
        assert_eq!(PatternFormat::Chi.extension(), "chi");
        assert_eq!(PatternFormat::Xy.to_string(), "xy");
    }
}
