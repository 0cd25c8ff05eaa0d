//! Run configuration.

use crate::core::cache::Resolution;
use crate::core::engine::PatternFormat;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Default number of radial points for 1-D patterns
pub const DEFAULT_POINTS: usize = 4857;
/// Default number of azimuth bins for cakes
pub const DEFAULT_AZIMUTH_BINS: usize = 360;

/// Which artifacts to produce per image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFlags {
    /// One 1-D pattern file per enabled format
    pub patterns: BTreeSet<PatternFormat>,
    /// The 2-D cake companion group
    pub cake: bool,
}

impl ExportFlags {
    pub fn none() -> Self {
        Self {
            patterns: BTreeSet::new(),
            cake: false,
        }
    }

    pub fn with_pattern(mut self, format: PatternFormat) -> Self {
        self.patterns.insert(format);
        self
    }

    pub fn with_cake(mut self, cake: bool) -> Self {
        self.cake = cake;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && !self.cake
    }
}

impl Default for ExportFlags {
    fn default() -> Self {
        Self::none().with_pattern(PatternFormat::Chi).with_cake(true)
    }
}

/// Where the mask is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskFlags {
    pub pattern: bool,
    pub cake: bool,
}

impl MaskFlags {
    pub fn any(&self) -> bool {
        self.pattern || self.cake
    }
}

impl Default for MaskFlags {
    fn default() -> Self {
        Self {
            pattern: true,
            cake: false,
        }
    }
}

/// Immutable configuration of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub calibration_file: PathBuf,
    /// Created if absent
    pub output_dir: PathBuf,
    pub mask_file: Option<PathBuf>,
    /// 1-D radial points; cakes use twice as many radial bins
    pub points: usize,
    pub azimuth_bins: usize,
    pub exports: ExportFlags,
    pub mask: MaskFlags,
    pub overwrite: bool,
}

impl BatchConfig {
    pub fn builder(
        calibration_file: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> BatchConfigBuilder {
        BatchConfigBuilder::new(calibration_file, output_dir)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            points: self.points,
            azimuth_bins: self.azimuth_bins,
        }
    }

    /// Reject parameter combinations no run could use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.points == 0 {
            return Err(ConfigError::InvalidParameter(
                "integration points must be positive".to_string(),
            ));
        }
        if self.exports.cake && self.azimuth_bins == 0 {
            return Err(ConfigError::InvalidParameter(
                "azimuth bins must be positive when cakes are exported".to_string(),
            ));
        }
        if self.exports.is_empty() {
            return Err(ConfigError::InvalidParameter(
                "no export kind enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for run configuration
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn new(calibration_file: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: BatchConfig {
                calibration_file: calibration_file.into(),
                output_dir: output_dir.into(),
                mask_file: None,
                points: DEFAULT_POINTS,
                azimuth_bins: DEFAULT_AZIMUTH_BINS,
                exports: ExportFlags::default(),
                mask: MaskFlags::default(),
                overwrite: false,
            },
        }
    }

    pub fn mask_file(mut self, mask: Option<PathBuf>) -> Self {
        self.config.mask_file = mask;
        self
    }

    pub fn points(mut self, points: usize) -> Self {
        self.config.points = points;
        self
    }

    pub fn azimuth_bins(mut self, bins: usize) -> Self {
        self.config.azimuth_bins = bins;
        self
    }

    pub fn exports(mut self, exports: ExportFlags) -> Self {
        self.config.exports = exports;
        self
    }

    pub fn mask(mut self, mask: MaskFlags) -> Self {
        self.config.mask = mask;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.overwrite = overwrite;
        self
    }

    pub fn build(self) -> BatchConfig {
        self.config
    }
}
