//! Batch execution: the sequential per-set, per-image loop.

use super::config::{BatchConfig, ExportFlags, MaskFlags};
use super::types::{ImageResult, ProducedArtifact, RunSummary, SetStatistics};
use crate::core::cache::{ArtifactKind, CachePlan, OutputCache, OutputLayout, Resolution};
use crate::core::engine::{Cake, IntegrationEngine, Mask};
use crate::core::fileset::{group, is_container_file, FileSet, Grouping};
use crate::error::{ConfigError, ProcessError};
use crate::events::{BatchEvent, EventSender};
use ndarray::{ArrayBase, Data, Dimension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Cooperative stop signal, checked between images and between sets
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Mask geometry is bound to an image shape and reloaded when it changes
#[derive(Default)]
struct MaskState {
    path: Option<PathBuf>,
    loaded: Option<((usize, usize), Mask)>,
}

impl MaskState {
    fn for_shape(&self, shape: (usize, usize)) -> Option<&Mask> {
        self.loaded
            .as_ref()
            .filter(|(loaded_shape, _)| *loaded_shape == shape)
            .map(|(_, mask)| mask)
    }
}

/// Drives an integration engine over file sets
///
/// One instance processes one set at a time; every method takes `&mut self`
/// so sets and images are strictly serialised.
pub struct BatchEngine<E: IntegrationEngine> {
    config: BatchConfig,
    engine: E,
    cache: OutputCache,
    layout: OutputLayout,
    mask: MaskState,
}

impl<E: IntegrationEngine> BatchEngine<E> {
    /// Validate configuration, load calibration and prepare the output directory
    ///
    /// This is the only point where a run can fail as a whole.
    pub fn new(config: BatchConfig, engine: E) -> Result<Self, ConfigError> {
        Self::with_cache(config, engine, OutputCache::filesystem())
    }

    pub fn with_cache(
        config: BatchConfig,
        mut engine: E,
        cache: OutputCache,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let calibration = &config.calibration_file;
        if !calibration.is_file() {
            return Err(ConfigError::CalibrationNotFound {
                path: calibration.clone(),
            });
        }
        fs::File::open(calibration).map_err(|source| ConfigError::CalibrationUnreadable {
            path: calibration.clone(),
            source,
        })?;
        engine
            .load_calibration(calibration)
            .map_err(|e| ConfigError::CalibrationRejected {
                path: calibration.clone(),
                reason: e.to_string(),
            })?;
        info!("Calibration loaded: {}", calibration.display());

        fs::create_dir_all(&config.output_dir).map_err(|source| ConfigError::OutputDirectory {
            path: config.output_dir.clone(),
            source,
        })?;

        let mask_path = match &config.mask_file {
            Some(path) if path.exists() => {
                info!("Mask configured: {}", path.display());
                Some(path.clone())
            }
            Some(path) => {
                warn!(
                    "Mask file does not exist and will be ignored: {}",
                    path.display()
                );
                None
            }
            None => None,
        };

        info!(
            "Batch engine ready: output {}, {} points, {} azimuth bins",
            config.output_dir.display(),
            config.points,
            config.azimuth_bins
        );

        Ok(Self {
            layout: OutputLayout::new(&config.output_dir),
            config,
            engine,
            cache,
            mask: MaskState {
                path: mask_path,
                loaded: None,
            },
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Whether a usable mask file was configured
    pub fn mask_available(&self) -> bool {
        self.mask.path.is_some()
    }

    /// Output base name for one image of a set
    ///
    /// Single-image sets keep the set name; stacks get a 4-digit index suffix.
    pub fn image_name(set_name: &str, index: usize, total: usize) -> String {
        if total > 1 {
            format!("{}_{:04}", set_name, index)
        } else {
            set_name.to_string()
        }
    }

    /// Group a selection of paths and process every complete set in order
    pub fn process_selection<I, P>(
        &mut self,
        paths: I,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> RunSummary
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let grouping = group(paths);
        self.process_grouping(grouping, events, cancel)
    }

    /// Process every detector container file directly inside a directory
    pub fn process_directory(
        &mut self,
        directory: &Path,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, ConfigError> {
        if !directory.is_dir() {
            return Err(ConfigError::InputDirectoryNotFound {
                path: directory.to_path_buf(),
            });
        }

        let files: Vec<PathBuf> = WalkDir::new(directory)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_container_file(path))
            .collect();

        if files.is_empty() {
            warn!("No .nxs or .h5 files found in {}", directory.display());
        }

        Ok(self.process_selection(files, events, cancel))
    }

    /// Process already grouped sets in their canonical order
    pub fn process_grouping(
        &mut self,
        grouping: Grouping,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::new();
        summary.dropped_groups = grouping.incomplete;

        events.batch(BatchEvent::RunStarted {
            run_id: summary.run_id,
            file_sets: grouping.sets.len(),
        });
        info!("Found {} complete file set(s)", grouping.sets.len());

        let total_sets = grouping.sets.len();
        for (i, set) in grouping.sets.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            info!("Processing file set {}/{}: {}", i + 1, total_sets, set.output_name());
            let stats = self.process_set(set, events, cancel);
            let stopped = stats.cancelled;
            summary.sets.push(stats);

            if stopped {
                summary.cancelled = true;
                break;
            }
        }

        if summary.cancelled {
            info!("Run cancelled after {} file set(s)", summary.sets.len());
            events.batch(BatchEvent::Cancelled);
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        events.batch(BatchEvent::RunCompleted(summary.clone()));
        summary
    }

    /// Process one set with the configured export and mask flags
    pub fn process_set(
        &mut self,
        set: &FileSet,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> SetStatistics {
        let exports = self.config.exports.clone();
        let mask = self.config.mask;
        self.process_set_with(set, &exports, mask, events, cancel)
    }

    /// Process every image of a set; failed images never abort the set
    pub fn process_set_with(
        &mut self,
        set: &FileSet,
        exports: &ExportFlags,
        mask: MaskFlags,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> SetStatistics {
        let start = Instant::now();
        let name = set.output_name();

        let total = match self.engine.image_count(set) {
            Ok(count) => count,
            Err(e) => {
                error!("Error reading image count for {}: {}", name, e);
                events.error(format!("{}: {}", name, e));
                0
            }
        };

        let mut stats = SetStatistics::new(&name, total);
        events.batch(BatchEvent::SetStarted {
            name: name.clone(),
            total_images: total,
        });

        if total == 0 {
            warn!("No images found in file set {}", name);
        } else {
            info!("Processing {} image(s) from {}", total, name);
        }

        for index in 0..total {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            events.progress(
                index + 1,
                total,
                format!("Processing image {}/{}", index + 1, total),
            );

            let image_name = Self::image_name(&name, index, total);
            let result = self.process_image(set, index, &image_name, exports, mask);

            if result.skipped {
                events.batch(BatchEvent::ImageSkipped {
                    name: image_name,
                    index,
                });
            } else if let Some(message) = &result.error {
                events.batch(BatchEvent::ImageFailed {
                    name: image_name,
                    index,
                    message: message.clone(),
                });
            }

            stats.record(result);
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Completed {}: {}/{} images processed (skipped: {}, failed: {})",
            name, stats.processed, stats.total_images, stats.skipped, stats.failed
        );
        events.set_complete(stats.clone());
        stats
    }

    /// Decide, then render only what is missing or stale
    fn process_image(
        &mut self,
        set: &FileSet,
        index: usize,
        image_name: &str,
        exports: &ExportFlags,
        mask: MaskFlags,
    ) -> ImageResult {
        let specs = self.layout.specs(
            image_name,
            &exports.patterns,
            exports.cake,
            self.config.resolution(),
        );
        let plan = self.cache.decide(&specs, self.config.overwrite);
        if exports.cake && !plan.cake_needed() {
            // valid cakes may have lost their calibration copy
            self.copy_calibration(image_name);
        }

        if plan.all_skip() {
            info!("Skipping existing outputs for {}", image_name);
            return ImageResult::skipped(index, reused(&plan));
        }

        match self.render_image(set, index, image_name, &plan, mask) {
            Ok(outputs) => ImageResult::processed(index, outputs),
            Err(e) => {
                error!("Error processing image {} of {}: {}", index, set.output_name(), e);
                ImageResult::failed(index, e.to_string())
            }
        }
    }

    fn render_image(
        &mut self,
        set: &FileSet,
        index: usize,
        image_name: &str,
        plan: &CachePlan,
        mask: MaskFlags,
    ) -> Result<Vec<ProducedArtifact>, ProcessError> {
        let image = self.engine.load_image(set, index)?;
        let shape = image.dim();

        let patterns = plan.patterns_to_write();
        let cake_needed = plan.cake_needed();
        let pattern_masked = mask.pattern && !patterns.is_empty();
        let cake_masked = mask.cake && cake_needed;

        if pattern_masked || cake_masked {
            self.ensure_mask(shape)?;
        }

        let mut outputs = reused(plan);

        if !patterns.is_empty() {
            let applied = if mask.pattern {
                self.mask.for_shape(shape)
            } else {
                None
            };
            let pattern = self
                .engine
                .integrate_1d(&image, applied, self.config.points)?;

            for (format, path) in patterns {
                self.engine.save_pattern(&pattern, &path, format)?;
                debug!("Saved {}", path.display());
                outputs.push(ProducedArtifact {
                    kind: ArtifactKind::Pattern(format),
                    path,
                    written: true,
                });
            }
        }

        if cake_needed {
            let applied = if mask.cake {
                self.mask.for_shape(shape)
            } else {
                None
            };
            let resolution = self.config.resolution();
            let cake = self.engine.integrate_2d(
                &image,
                applied,
                resolution.cake_radial_bins(),
                resolution.azimuth_bins,
            )?;
            outputs.extend(self.write_cake(image_name, &cake, resolution)?);
        }

        Ok(outputs)
    }

    fn ensure_mask(&mut self, shape: (usize, usize)) -> Result<(), ProcessError> {
        let Some(path) = self.mask.path.clone() else {
            return Ok(());
        };
        if self.mask.for_shape(shape).is_some() {
            return Ok(());
        }

        let mask = self.engine.load_mask(&path, shape)?;
        info!(
            "Mask loaded for image shape {:?}: {}",
            shape,
            path.display()
        );
        self.mask.loaded = Some((shape, mask));
        Ok(())
    }

    /// Validate all three companions against the requested resolution, then write them together
    fn write_cake(
        &self,
        image_name: &str,
        cake: &Cake,
        resolution: Resolution,
    ) -> Result<Vec<ProducedArtifact>, ProcessError> {
        let companions: [(ArtifactKind, Vec<usize>); 3] = [
            (ArtifactKind::CakeIntensity, cake.intensity.shape().to_vec()),
            (ArtifactKind::CakeRadial, cake.radial.shape().to_vec()),
            (ArtifactKind::CakeAzimuth, cake.azimuth.shape().to_vec()),
        ];

        for (kind, actual) in &companions {
            let expected = resolution.expected_shape(*kind).unwrap_or_default();
            if *actual != expected {
                return Err(ProcessError::ShapeMismatch {
                    artifact: kind.to_string(),
                    expected,
                    actual: actual.clone(),
                });
            }
        }

        let folder = self.layout.cake_dir(image_name);
        fs::create_dir_all(&folder).map_err(|source| ProcessError::CreateDirectory {
            path: folder.clone(),
            source,
        })?;

        let intensity_path = self.layout.cake_path(image_name, ArtifactKind::CakeIntensity);
        let radial_path = self.layout.cake_path(image_name, ArtifactKind::CakeRadial);
        let azimuth_path = self.layout.cake_path(image_name, ArtifactKind::CakeAzimuth);

        write_array(&intensity_path, &cake.intensity)?;
        write_array(&radial_path, &cake.radial)?;
        write_array(&azimuth_path, &cake.azimuth)?;
        debug!("Saved cake files in {}", folder.display());

        self.copy_calibration(image_name);

        Ok(vec![
            ProducedArtifact {
                kind: ArtifactKind::CakeIntensity,
                path: intensity_path,
                written: true,
            },
            ProducedArtifact {
                kind: ArtifactKind::CakeRadial,
                path: radial_path,
                written: true,
            },
            ProducedArtifact {
                kind: ArtifactKind::CakeAzimuth,
                path: azimuth_path,
                written: true,
            },
        ])
    }

    fn copy_calibration(&self, image_name: &str) {
        let source = &self.config.calibration_file;
        let target = self.layout.calibration_copy(image_name, source);
        if target.exists() && !self.config.overwrite {
            return;
        }
        match fs::copy(source, &target) {
            Ok(_) => debug!("Copied calibration to {}", target.display()),
            Err(e) => warn!("Failed to copy calibration file: {}", e),
        }
    }
}

fn reused(plan: &CachePlan) -> Vec<ProducedArtifact> {
    plan.reused()
        .map(|spec| ProducedArtifact {
            kind: spec.kind,
            path: spec.path.clone(),
            written: false,
        })
        .collect()
}

fn write_array<S, D>(path: &Path, array: &ArrayBase<S, D>) -> Result<(), ProcessError>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    ndarray_npy::write_npy(path, array).map_err(|e| ProcessError::ArtifactWrite {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
