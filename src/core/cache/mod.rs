//! # Cache Module
//!
//! Decides, per output artifact, whether an existing file can be reused.
//!
//! ## Rules
//! - `overwrite` regenerates everything
//! - 1-D patterns are reused when the file exists
//! - 2-D cakes are reused only when all three companion arrays exist and
//!   their shapes match the requested resolution; otherwise the whole
//!   companion group is regenerated together
//!
//! ## Backends
//! - `FsProbe` - Reads `.npy` headers from disk
//! - `InMemoryProbe` - For testing

mod decide;
mod filesystem;
mod memory;
mod traits;

pub use decide::{CachePlan, OutputCache};
pub use filesystem::FsProbe;
pub use memory::InMemoryProbe;
pub use traits::ArtifactProbe;

use crate::core::engine::PatternFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Extension of the 2-D companion arrays
pub const CAKE_EXTENSION: &str = "npy";

/// What an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// 1-D pattern in one textual format
    Pattern(PatternFormat),
    /// 2-D cake intensity, shape `(azimuth_bins, 2 * points)`
    CakeIntensity,
    /// 2-D cake radial (2-theta) axis, length `2 * points`
    CakeRadial,
    /// 2-D cake azimuth axis, length `azimuth_bins`
    CakeAzimuth,
}

impl ArtifactKind {
    pub const CAKE: [ArtifactKind; 3] = [
        ArtifactKind::CakeIntensity,
        ArtifactKind::CakeRadial,
        ArtifactKind::CakeAzimuth,
    ];

    pub fn is_cake(&self) -> bool {
        !matches!(self, ArtifactKind::Pattern(_))
    }

    fn cake_tag(&self) -> &'static str {
        match self {
            ArtifactKind::CakeIntensity => "int",
            ArtifactKind::CakeRadial => "tth",
            ArtifactKind::CakeAzimuth => "azi",
            ArtifactKind::Pattern(_) => "",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Pattern(format) => write!(f, "{} pattern", format),
            ArtifactKind::CakeIntensity => write!(f, "cake intensity"),
            ArtifactKind::CakeRadial => write!(f, "cake radial axis"),
            ArtifactKind::CakeAzimuth => write!(f, "cake azimuth axis"),
        }
    }
}

/// One desired output file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// Array shape the file must have; `None` for 1-D patterns
    pub expected_shape: Option<Vec<usize>>,
}

/// Integration resolution requested for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// 1-D radial point count; cakes use twice this many radial bins
    pub points: usize,
    pub azimuth_bins: usize,
}

impl Resolution {
    pub fn cake_radial_bins(&self) -> usize {
        2 * self.points
    }

    pub fn expected_shape(&self, kind: ArtifactKind) -> Option<Vec<usize>> {
        match kind {
            ArtifactKind::Pattern(_) => None,
            ArtifactKind::CakeIntensity => Some(vec![self.azimuth_bins, self.cake_radial_bins()]),
            ArtifactKind::CakeRadial => Some(vec![self.cake_radial_bins()]),
            ArtifactKind::CakeAzimuth => Some(vec![self.azimuth_bins]),
        }
    }
}

/// Output naming for one output directory
///
/// Given a base name `B` in directory `D`:
/// - patterns go to `D/B.<ext>`
/// - cakes go to `D/B-param/B.{int,tth,azi}.cake.npy` next to a copy of the calibration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    output_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn pattern_path(&self, name: &str, format: PatternFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", name, format.extension()))
    }

    pub fn cake_dir(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}-param", name))
    }

    pub fn cake_path(&self, name: &str, kind: ArtifactKind) -> PathBuf {
        self.cake_dir(name).join(format!(
            "{}.{}.cake.{}",
            name,
            kind.cake_tag(),
            CAKE_EXTENSION
        ))
    }

    /// Where the calibration copy for a cake group lives
    pub fn calibration_copy(&self, name: &str, calibration: &Path) -> PathBuf {
        let file_name = calibration
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("calibration.poni"));
        self.cake_dir(name).join(file_name)
    }

    /// Specs for every enabled artifact of one image
    pub fn specs(
        &self,
        name: &str,
        patterns: &BTreeSet<PatternFormat>,
        cake: bool,
        resolution: Resolution,
    ) -> Vec<ArtifactSpec> {
        let mut specs: Vec<ArtifactSpec> = patterns
            .iter()
            .map(|format| ArtifactSpec {
                kind: ArtifactKind::Pattern(*format),
                path: self.pattern_path(name, *format),
                expected_shape: None,
            })
            .collect();

        if cake {
            specs.extend(ArtifactKind::CAKE.iter().map(|kind| ArtifactSpec {
                kind: *kind,
                path: self.cake_path(name, *kind),
                expected_shape: resolution.expected_shape(*kind),
            }));
        }

        specs
    }
}

/// Why an existing artifact is not reused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidReason {
    /// The run asked for everything to be regenerated
    Overwrite,
    /// Stored shape differs from the requested resolution
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    /// The file exists but its header could not be read
    Unreadable(String),
    /// Another file of the same cake group is missing or invalid
    CompanionInvalid,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Overwrite => write!(f, "overwrite requested"),
            InvalidReason::ShapeMismatch { expected, actual } => {
                write!(f, "shape {:?} does not match {:?}", actual, expected)
            }
            InvalidReason::Unreadable(reason) => write!(f, "unreadable: {}", reason),
            InvalidReason::CompanionInvalid => write!(f, "companion file needs regeneration"),
        }
    }
}

/// Whether one artifact can be skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputDecision {
    /// Present and valid, skip
    Valid,
    /// Present but stale or broken, regenerate
    Invalid(InvalidReason),
    /// Not on disk, generate
    Absent,
}

impl OutputDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, OutputDecision::Valid)
    }

    pub fn needs_regeneration(&self) -> bool {
        !self.is_skip()
    }
}
