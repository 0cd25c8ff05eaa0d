//! Per-image results and their aggregation.

use crate::core::cache::ArtifactKind;
use crate::core::fileset::IncompleteGroup;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// An artifact written or reused for one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// False when an existing file was kept
    pub written: bool,
}

/// Outcome of processing one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub index: usize,
    pub success: bool,
    /// Every artifact was already valid; the image was never opened
    pub skipped: bool,
    pub outputs: Vec<ProducedArtifact>,
    pub error: Option<String>,
}

impl ImageResult {
    pub fn skipped(index: usize, outputs: Vec<ProducedArtifact>) -> Self {
        Self {
            index,
            success: true,
            skipped: true,
            outputs,
            error: None,
        }
    }

    pub fn processed(index: usize, outputs: Vec<ProducedArtifact>) -> Self {
        Self {
            index,
            success: true,
            skipped: false,
            outputs,
            error: None,
        }
    }

    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            skipped: false,
            outputs: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn output(&self, kind: ArtifactKind) -> Option<&PathBuf> {
        self.outputs
            .iter()
            .find(|o| o.kind == kind)
            .map(|o| &o.path)
    }
}

/// A failed image, kept on the set statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFailure {
    pub index: usize,
    pub message: String,
}

/// Aggregate over one file set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStatistics {
    /// Output base name of the set
    pub name: String,
    pub total_images: usize,
    /// Successful images, skipped ones included
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub artifacts: Vec<ProducedArtifact>,
    pub failures: Vec<ImageFailure>,
    /// Stopped before the last image
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SetStatistics {
    pub fn new(name: impl Into<String>, total_images: usize) -> Self {
        Self {
            name: name.into(),
            total_images,
            ..Default::default()
        }
    }

    /// Fold one image result into the aggregate
    pub fn record(&mut self, result: ImageResult) {
        if result.success {
            self.processed += 1;
            if result.skipped {
                self.skipped += 1;
            }
            self.artifacts.extend(result.outputs);
        } else {
            self.failed += 1;
            self.failures.push(ImageFailure {
                index: result.index,
                message: result.error.unwrap_or_default(),
            });
        }
    }

    /// Paths produced (or reused) for one artifact kind
    pub fn paths(&self, kind: ArtifactKind) -> Vec<&PathBuf> {
        self.artifacts
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| &a.path)
            .collect()
    }

    /// Images that were dispatched, successfully or not
    pub fn attempted(&self) -> usize {
        self.processed + self.failed
    }
}

/// Outcome of a whole run over several file sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub sets: Vec<SetStatistics>,
    /// Multi-module groups that were missing tiles
    pub dropped_groups: Vec<IncompleteGroup>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            sets: Vec::new(),
            dropped_groups: Vec::new(),
            cancelled: false,
            duration_ms: 0,
        }
    }

    pub fn total_images(&self) -> usize {
        self.sets.iter().map(|s| s.total_images).sum()
    }

    pub fn total_processed(&self) -> usize {
        self.sets.iter().map(|s| s.processed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.sets.iter().map(|s| s.skipped).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.sets.iter().map(|s| s.failed).sum()
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::PatternFormat;

    fn chi(path: &str) -> ProducedArtifact {
        ProducedArtifact {
            kind: ArtifactKind::Pattern(PatternFormat::Chi),
            path: PathBuf::from(path),
            written: true,
        }
    }

    #[test]
    fn folding_counts_each_outcome() {
        let mut stats = SetStatistics::new("run", 3);
        stats.record(ImageResult::processed(0, vec![chi("/out/run.chi")]));
        stats.record(ImageResult::skipped(1, vec![chi("/out/run.chi")]));
        stats.record(ImageResult::failed(2, "decode failed"));

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.attempted(), 3);
        assert_eq!(stats.failures[0].index, 2);
        assert_eq!(
            stats.paths(ArtifactKind::Pattern(PatternFormat::Chi)).len(),
            2
        );
    }

    #[test]
    fn empty_set_is_all_zero() {
        let stats = SetStatistics::new("empty", 0);
        assert_eq!(stats.processed + stats.skipped + stats.failed, 0);
        assert!(stats.artifacts.is_empty());
    }

    #[test]
    fn summary_totals_sum_sets() {
        let mut summary = RunSummary::new();
        let mut a = SetStatistics::new("a", 2);
        a.record(ImageResult::processed(0, vec![]));
        a.record(ImageResult::failed(1, "boom"));
        let mut b = SetStatistics::new("b", 1);
        b.record(ImageResult::skipped(0, vec![]));
        summary.sets = vec![a, b];

        assert_eq!(summary.total_images(), 3);
        assert_eq!(summary.total_processed(), 2);
        assert_eq!(summary.total_skipped(), 1);
        assert_eq!(summary.total_failed(), 1);
    }

    #[test]
    fn statistics_are_serializable() {
        let mut stats = SetStatistics::new("run", 1);
        stats.record(ImageResult::processed(0, vec![chi("/out/run.chi")]));

        let json = serde_json::to_string(&stats).unwrap();
        let back: SetStatistics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
