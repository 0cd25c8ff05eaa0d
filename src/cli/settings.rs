//! Persisted CLI defaults.

use lambda_batch::core::batch::{
    BatchConfig, ExportFlags, MaskFlags, DEFAULT_AZIMUTH_BINS, DEFAULT_POINTS,
};
use lambda_batch::core::engine::PatternFormat;
use lambda_batch::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Defaults remembered between invocations; flags always win
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub calibration_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub mask_file: Option<PathBuf>,
    pub points: usize,
    pub azimuth_bins: usize,
    pub patterns: BTreeSet<PatternFormat>,
    pub cake: bool,
    pub mask_pattern: bool,
    pub mask_cake: bool,
    pub overwrite: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let exports = ExportFlags::default();
        let mask = MaskFlags::default();
        Self {
            calibration_file: None,
            output_dir: None,
            mask_file: None,
            points: DEFAULT_POINTS,
            azimuth_bins: DEFAULT_AZIMUTH_BINS,
            patterns: exports.patterns,
            cake: exports.cake,
            mask_pattern: mask.pattern,
            mask_cake: mask.cake,
            overwrite: false,
        }
    }
}

impl Settings {
    /// `<config dir>/lambda-batch/settings.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lambda-batch")
            .join("settings.json")
    }

    /// Missing file means defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| BatchError::Settings(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn to_config(&self) -> Result<BatchConfig> {
        let calibration = self.calibration_file.clone().ok_or_else(|| {
            BatchError::Settings(
                "no calibration file; pass --calibration or store one with `settings save`"
                    .to_string(),
            )
        })?;
        let output_dir = self.output_dir.clone().ok_or_else(|| {
            BatchError::Settings(
                "no output directory; pass --output-dir or store one with `settings save`"
                    .to_string(),
            )
        })?;

        let exports = ExportFlags {
            patterns: self.patterns.clone(),
            cake: self.cake,
        };
        let config = BatchConfig::builder(calibration, output_dir)
            .mask_file(self.mask_file.clone())
            .points(self.points)
            .azimuth_bins(self.azimuth_bins)
            .exports(exports)
            .mask(MaskFlags {
                pattern: self.mask_pattern,
                cake: self.mask_cake,
            })
            .overwrite(self.overwrite)
            .build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.points, 4857);
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            calibration_file: Some("/cal/ceo2.poni".into()),
            output_dir: Some("/processed".into()),
            azimuth_bins: 72,
            ..Settings::default()
        };

        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "points": 1000 }"#).unwrap();

        let settings = Settings::load(&path).unwrap();

        assert_eq!(settings.points, 1000);
        assert_eq!(settings.azimuth_bins, 360);
        assert!(settings.cake);
    }

    #[test]
    fn malformed_file_is_a_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            Settings::load(&path),
            Err(BatchError::Settings(_))
        ));
    }

    #[test]
    fn calibration_is_required_for_a_run() {
        let settings = Settings {
            output_dir: Some("/processed".into()),
            ..Settings::default()
        };
        assert!(matches!(
            settings.to_config(),
            Err(BatchError::Settings(_))
        ));
    }

    #[test]
    fn settings_become_a_run_configuration() {
        let settings = Settings {
            calibration_file: Some("/cal/ceo2.poni".into()),
            output_dir: Some("/processed".into()),
            mask_cake: true,
            ..Settings::default()
        };

        let config = settings.to_config().unwrap();

        assert_eq!(config.points, 4857);
        assert!(config.mask.cake);
        assert!(config.exports.patterns.contains(&PatternFormat::Chi));
    }
}
