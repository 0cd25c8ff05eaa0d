//! Groups raw files into file sets.
//!
//! Files without a module tag become singleton sets. Tagged files are
//! bucketed by base identity and only a bucket holding each of m1, m2, m3
//! exactly once becomes a set. Everything else is reported as incomplete.

use super::{FileSet, ModuleTag, RawFile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{info, warn};

/// A multi-module bucket that could not form a file set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteGroup {
    /// Shared base identity of the bucket
    pub base: PathBuf,
    /// Files found for this base
    pub files: Vec<PathBuf>,
    /// Tile tags with no file
    pub missing: Vec<ModuleTag>,
    /// Tile tags seen more than once
    pub duplicated: Vec<ModuleTag>,
}

impl IncompleteGroup {
    /// Human-readable reason, used for warnings and events
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            let tags: Vec<_> = self.missing.iter().map(|t| t.to_string()).collect();
            parts.push(format!("missing {}", tags.join(", ")));
        }
        if !self.duplicated.is_empty() {
            let tags: Vec<_> = self.duplicated.iter().map(|t| t.to_string()).collect();
            parts.push(format!("duplicated {}", tags.join(", ")));
        }
        format!(
            "Incomplete multi-module file set for {}: {} file(s), {}",
            self.base.display(),
            self.files.len(),
            parts.join("; ")
        )
    }
}

/// Result of grouping: complete sets in canonical order plus diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub sets: Vec<FileSet>,
    pub incomplete: Vec<IncompleteGroup>,
}

impl Grouping {
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Group raw paths into file sets.
///
/// Output is sorted by base identity (then by first member path), so the
/// same input always yields the same sequence regardless of arrival order.
/// Never fails; ambiguous input only produces incomplete groups.
pub fn group<I, P>(paths: I) -> Grouping
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let unique: BTreeSet<PathBuf> = paths.into_iter().map(Into::into).collect();

    let mut sets = Vec::new();
    let mut buckets: BTreeMap<PathBuf, Vec<RawFile>> = BTreeMap::new();

    for path in unique {
        let file = RawFile::parse(path);
        if file.is_multi_module() {
            buckets.entry(file.base.clone()).or_default().push(file);
        } else {
            sets.push(FileSet::single(file));
        }
    }

    let single_count = sets.len();
    let mut incomplete = Vec::new();

    for (base, files) in buckets {
        let missing: Vec<ModuleTag> = ModuleTag::TILES
            .iter()
            .copied()
            .filter(|tag| !files.iter().any(|f| f.module == *tag))
            .collect();
        let duplicated: Vec<ModuleTag> = ModuleTag::TILES
            .iter()
            .copied()
            .filter(|tag| files.iter().filter(|f| f.module == *tag).count() > 1)
            .collect();

        if missing.is_empty() && duplicated.is_empty() {
            sets.push(FileSet::tiles(files));
        } else {
            let group = IncompleteGroup {
                base,
                files: files.into_iter().map(|f| f.path).collect(),
                missing,
                duplicated,
            };
            warn!("{}", group.describe());
            incomplete.push(group);
        }
    }

    sets.sort_by(|a, b| {
        a.base()
            .cmp(b.base())
            .then_with(|| a.members()[0].path.cmp(&b.members()[0].path))
    });

    info!(
        "Grouped into {} file set(s): {} multi-module, {} single file(s)",
        sets.len(),
        sets.len() - single_count,
        single_count
    );

    Grouping { sets, incomplete }
}
