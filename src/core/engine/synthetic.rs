//! Deterministic integration engine.
//!
//! Produces reproducible frames without touching detector files, performs a
//! plain radial/azimuthal binning around the frame centre, and counts every
//! call so orchestration tests can assert on engine usage. Failures can be
//! scripted per frame index.

use super::{write_pattern_text, Cake, IntegrationEngine, Mask, Pattern, PatternFormat};
use crate::core::fileset::FileSet;
use crate::error::EngineError;
use ndarray::{Array1, Array2};
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

/// Largest 2-theta the synthetic geometry maps the frame corner to
const MAX_TWO_THETA: f64 = 40.0;

/// Number of calls made into the engine, per method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCalls {
    pub load_calibration: usize,
    pub image_count: usize,
    pub load_image: usize,
    pub load_mask: usize,
    pub integrate_1d: usize,
    pub integrate_2d: usize,
    pub save_pattern: usize,
}

impl EngineCalls {
    /// Calls that touch image data
    pub fn work(&self) -> usize {
        self.load_image + self.integrate_1d + self.integrate_2d + self.save_pattern
    }
}

/// Deterministic stand-in for a real integration backend
#[derive(Debug, Clone)]
pub struct SyntheticEngine {
    frames: usize,
    frames_by_set: HashMap<String, usize>,
    tile_shape: (usize, usize),
    failing_frames: HashSet<usize>,
    undecodable_frames: HashSet<usize>,
    cake_radial_error: usize,
    calibration: Option<PathBuf>,
    current_frame: Option<usize>,
    calls: EngineCalls,
}

impl SyntheticEngine {
    /// Engine that reports `frames` images per set, each tile `tile_shape` pixels
    pub fn new(frames: usize, tile_shape: (usize, usize)) -> Self {
        Self {
            frames,
            frames_by_set: HashMap::new(),
            tile_shape,
            failing_frames: HashSet::new(),
            undecodable_frames: HashSet::new(),
            cake_radial_error: 0,
            calibration: None,
            current_frame: None,
            calls: EngineCalls::default(),
        }
    }

    /// Override the image count for the set with this output name
    pub fn with_frames_for(mut self, output_name: &str, frames: usize) -> Self {
        self.frames_by_set.insert(output_name.to_string(), frames);
        self
    }

    /// Make integration fail for the given frame index
    pub fn fail_integration_at(mut self, index: usize) -> Self {
        self.failing_frames.insert(index);
        self
    }

    /// Make decoding fail for the given frame index
    pub fn fail_decode_at(mut self, index: usize) -> Self {
        self.undecodable_frames.insert(index);
        self
    }

    /// Return cakes with this many extra radial bins
    pub fn misreport_cake_radial(mut self, extra: usize) -> Self {
        self.cake_radial_error = extra;
        self
    }

    pub fn calls(&self) -> EngineCalls {
        self.calls
    }

    pub fn reset_calls(&mut self) {
        self.calls = EngineCalls::default();
    }

    pub fn calibration(&self) -> Option<&Path> {
        self.calibration.as_deref()
    }

    /// Shape of a frame decoded from this set: tiles are stacked side by side
    pub fn frame_shape(&self, file_set: &FileSet) -> (usize, usize) {
        let (rows, cols) = self.tile_shape;
        (rows, cols * file_set.arity())
    }

    fn check_integration(&self) -> Result<(), EngineError> {
        match self.current_frame {
            Some(index) if self.failing_frames.contains(&index) => Err(EngineError::Integration(
                format!("synthetic failure on frame {}", index),
            )),
            _ => Ok(()),
        }
    }

    /// Polar coordinates of every pixel relative to the frame centre:
    /// normalised radius in `[0, 1]` and azimuth in degrees `[-180, 180)`
    fn polar(shape: (usize, usize)) -> impl Iterator<Item = ((usize, usize), f64, f64)> {
        let (rows, cols) = shape;
        let cy = (rows as f64 - 1.0) / 2.0;
        let cx = (cols as f64 - 1.0) / 2.0;
        let max_r = (cy * cy + cx * cx).sqrt().max(f64::EPSILON);

        (0..rows).flat_map(move |r| {
            (0..cols).map(move |c| {
                let dy = r as f64 - cy;
                let dx = c as f64 - cx;
                let radius = (dy * dy + dx * dx).sqrt() / max_r;
                let azimuth = dy.atan2(dx) * 180.0 / PI;
                ((r, c), radius, azimuth)
            })
        })
    }

    fn radial_axis(points: usize) -> Array1<f64> {
        let step = MAX_TWO_THETA / points as f64;
        Array1::from_iter((0..points).map(|i| (i as f64 + 0.5) * step))
    }

    fn azimuth_axis(bins: usize) -> Array1<f64> {
        let step = 360.0 / bins as f64;
        Array1::from_iter((0..bins).map(|i| -180.0 + (i as f64 + 0.5) * step))
    }

    fn bin(fraction: f64, bins: usize) -> usize {
        ((fraction * bins as f64) as usize).min(bins - 1)
    }
}

impl IntegrationEngine for SyntheticEngine {
    fn load_calibration(&mut self, path: &Path) -> Result<(), EngineError> {
        self.calls.load_calibration += 1;
        self.calibration = Some(path.to_path_buf());
        Ok(())
    }

    fn image_count(&mut self, file_set: &FileSet) -> Result<usize, EngineError> {
        self.calls.image_count += 1;
        Ok(self
            .frames_by_set
            .get(&file_set.output_name())
            .copied()
            .unwrap_or(self.frames))
    }

    fn load_image(&mut self, file_set: &FileSet, index: usize) -> Result<Array2<f64>, EngineError> {
        self.calls.load_image += 1;
        self.current_frame = None;

        let path = file_set.members()[0].path.clone();
        let count = self
            .frames_by_set
            .get(&file_set.output_name())
            .copied()
            .unwrap_or(self.frames);
        if index >= count {
            return Err(EngineError::IndexOutOfRange { path, index, count });
        }
        if self.undecodable_frames.contains(&index) {
            return Err(EngineError::Decode {
                path,
                index,
                reason: "synthetic decode failure".to_string(),
            });
        }

        self.current_frame = Some(index);
        let shape = self.frame_shape(file_set);
        Ok(Array2::from_shape_fn(shape, |(r, c)| {
            ((r * 31 + c * 17 + index * 7) % 101) as f64
        }))
    }

    fn load_mask(&mut self, path: &Path, shape: (usize, usize)) -> Result<Mask, EngineError> {
        self.calls.load_mask += 1;
        fs::metadata(path).map_err(|e| EngineError::Mask {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let (rows, cols) = shape;
        Ok(Array2::from_shape_fn(shape, |(r, c)| {
            r == 0 || c == 0 || r + 1 == rows || c + 1 == cols
        }))
    }

    fn integrate_1d(
        &mut self,
        image: &Array2<f64>,
        mask: Option<&Mask>,
        points: usize,
    ) -> Result<Pattern, EngineError> {
        self.calls.integrate_1d += 1;
        self.check_integration()?;
        if points == 0 {
            return Err(EngineError::Integration("zero radial points".to_string()));
        }

        let mut sums = vec![0.0; points];
        let mut counts = vec![0usize; points];
        for ((r, c), radius, _) in Self::polar(image.dim()) {
            if mask.map(|m| m[[r, c]]).unwrap_or(false) {
                continue;
            }
            let bin = Self::bin(radius, points);
            sums[bin] += image[[r, c]];
            counts[bin] += 1;
        }

        let intensity = sums
            .iter()
            .zip(&counts)
            .map(|(s, n)| if *n > 0 { s / *n as f64 } else { 0.0 })
            .collect();

        Ok(Pattern {
            radial: Self::radial_axis(points),
            intensity,
        })
    }

    fn integrate_2d(
        &mut self,
        image: &Array2<f64>,
        mask: Option<&Mask>,
        radial_points: usize,
        azimuth_bins: usize,
    ) -> Result<Cake, EngineError> {
        self.calls.integrate_2d += 1;
        self.check_integration()?;
        if radial_points == 0 || azimuth_bins == 0 {
            return Err(EngineError::Integration("empty cake requested".to_string()));
        }

        let mut sums = Array2::<f64>::zeros((azimuth_bins, radial_points));
        let mut counts = Array2::<usize>::zeros((azimuth_bins, radial_points));
        for ((r, c), radius, azimuth) in Self::polar(image.dim()) {
            if mask.map(|m| m[[r, c]]).unwrap_or(false) {
                continue;
            }
            let row = Self::bin((azimuth + 180.0) / 360.0, azimuth_bins);
            let col = Self::bin(radius, radial_points);
            sums[[row, col]] += image[[r, c]];
            counts[[row, col]] += 1;
        }

        let radial_bins = radial_points + self.cake_radial_error;
        let intensity = Array2::from_shape_fn((azimuth_bins, radial_bins), |(a, r)| {
            if r < radial_points && counts[[a, r]] > 0 {
                sums[[a, r]] / counts[[a, r]] as f64
            } else {
                0.0
            }
        });

        Ok(Cake {
            intensity,
            radial: Self::radial_axis(radial_bins),
            azimuth: Self::azimuth_axis(azimuth_bins),
        })
    }

    fn save_pattern(
        &mut self,
        pattern: &Pattern,
        path: &Path,
        format: PatternFormat,
    ) -> Result<(), EngineError> {
        self.calls.save_pattern += 1;
        write_pattern_text(pattern, path, format)
    }
}
