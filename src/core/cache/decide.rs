//! Skip/regenerate decisions for one image's artifacts.

use super::{ArtifactKind, ArtifactProbe, ArtifactSpec, FsProbe, InvalidReason, OutputDecision};
use crate::core::engine::PatternFormat;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Decisions for every requested artifact, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePlan {
    entries: Vec<(ArtifactSpec, OutputDecision)>,
}

impl CachePlan {
    pub fn entries(&self) -> &[(ArtifactSpec, OutputDecision)] {
        &self.entries
    }

    pub fn decision(&self, kind: ArtifactKind) -> Option<&OutputDecision> {
        self.entries
            .iter()
            .find(|(spec, _)| spec.kind == kind)
            .map(|(_, decision)| decision)
    }

    pub fn spec(&self, kind: ArtifactKind) -> Option<&ArtifactSpec> {
        self.entries
            .iter()
            .find(|(spec, _)| spec.kind == kind)
            .map(|(spec, _)| spec)
    }

    /// True when every requested artifact can be reused
    pub fn all_skip(&self) -> bool {
        self.entries.iter().all(|(_, decision)| decision.is_skip())
    }

    /// Pattern formats that must be written, with their targets
    pub fn patterns_to_write(&self) -> Vec<(PatternFormat, PathBuf)> {
        self.entries
            .iter()
            .filter(|(_, decision)| decision.needs_regeneration())
            .filter_map(|(spec, _)| match spec.kind {
                ArtifactKind::Pattern(format) => Some((format, spec.path.clone())),
                _ => None,
            })
            .collect()
    }

    /// Whether the cake group must be regenerated
    pub fn cake_needed(&self) -> bool {
        self.entries
            .iter()
            .any(|(spec, decision)| spec.kind.is_cake() && decision.needs_regeneration())
    }

    /// Paths of artifacts that are reused as-is
    pub fn reused(&self) -> impl Iterator<Item = &ArtifactSpec> {
        self.entries
            .iter()
            .filter(|(_, decision)| decision.is_skip())
            .map(|(spec, _)| spec)
    }
}

/// Decides which outputs already exist at the requested resolution
///
/// Stateless between calls: the probe is consulted fresh every time.
#[derive(Clone)]
pub struct OutputCache {
    probe: Arc<dyn ArtifactProbe>,
}

impl OutputCache {
    pub fn new(probe: Arc<dyn ArtifactProbe>) -> Self {
        Self { probe }
    }

    /// Cache over the local filesystem
    pub fn filesystem() -> Self {
        Self::new(Arc::new(FsProbe::new()))
    }

    pub fn decide(&self, specs: &[ArtifactSpec], overwrite: bool) -> CachePlan {
        if overwrite {
            return CachePlan {
                entries: specs
                    .iter()
                    .map(|spec| {
                        (
                            spec.clone(),
                            OutputDecision::Invalid(InvalidReason::Overwrite),
                        )
                    })
                    .collect(),
            };
        }

        let cake_specs: Vec<&ArtifactSpec> = specs.iter().filter(|s| s.kind.is_cake()).collect();
        let cake_decisions = self.decide_cake_group(&cake_specs);

        let entries = specs
            .iter()
            .map(|spec| {
                let decision = if spec.kind.is_cake() {
                    cake_decisions
                        .iter()
                        .find(|(path, _)| *path == spec.path)
                        .map(|(_, d)| d.clone())
                        .unwrap_or(OutputDecision::Absent)
                } else if self.probe.exists(&spec.path) {
                    OutputDecision::Valid
                } else {
                    OutputDecision::Absent
                };
                debug!("{} {}: {:?}", spec.kind, spec.path.display(), decision);
                (spec.clone(), decision)
            })
            .collect();

        CachePlan { entries }
    }

    /// The companion files stand or fall together.
    fn decide_cake_group(&self, specs: &[&ArtifactSpec]) -> Vec<(PathBuf, OutputDecision)> {
        let own: Vec<(PathBuf, Option<OutputDecision>)> = specs
            .iter()
            .map(|spec| (spec.path.clone(), self.check_cake_file(spec)))
            .collect();

        let group_valid = own.iter().all(|(_, problem)| problem.is_none());

        own.into_iter()
            .map(|(path, problem)| {
                let decision = match problem {
                    Some(decision) => decision,
                    None if group_valid => OutputDecision::Valid,
                    None => OutputDecision::Invalid(InvalidReason::CompanionInvalid),
                };
                (path, decision)
            })
            .collect()
    }

    /// `None` when the file on its own is fine
    fn check_cake_file(&self, spec: &ArtifactSpec) -> Option<OutputDecision> {
        if !self.probe.exists(&spec.path) {
            return Some(OutputDecision::Absent);
        }

        let actual = match self.probe.shape(&spec.path) {
            Ok(shape) => shape,
            Err(e) => {
                return Some(OutputDecision::Invalid(InvalidReason::Unreadable(
                    e.to_string(),
                )))
            }
        };

        match &spec.expected_shape {
            Some(expected) if *expected != actual => {
                Some(OutputDecision::Invalid(InvalidReason::ShapeMismatch {
                    expected: expected.clone(),
                    actual,
                }))
            }
            _ => None,
        }
    }
}
