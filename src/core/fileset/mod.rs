//! # File Set Module
//!
//! Parses raw detector filenames and groups them into logical acquisitions.
//!
//! A multi-module Lambda detector writes one file per tile:
//! `run_m1.nxs`, `run_m2.nxs`, `run_m3.nxs` (optionally `run_m1_part2.nxs`).
//! Those three files form a single [`FileSet`]. Files without a module
//! suffix are single-file sets.

mod grouper;

pub use grouper::{group, Grouping, IncompleteGroup};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Extensions the detector writes its containers with
pub const CONTAINER_EXTENSIONS: [&str; 2] = ["nxs", "h5"];

fn module_suffix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"_m([1-3])(?:_part\d+)?\.(?i:nxs|h5)$")
            .expect("module suffix pattern is valid")
    })
}

/// Detector tile a file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModuleTag {
    /// Single-file acquisition
    None,
    Module1,
    Module2,
    Module3,
}

impl ModuleTag {
    /// All three tile tags in ascending order
    pub const TILES: [ModuleTag; 3] = [ModuleTag::Module1, ModuleTag::Module2, ModuleTag::Module3];

    fn from_digit(digit: &str) -> Self {
        match digit {
            "1" => ModuleTag::Module1,
            "2" => ModuleTag::Module2,
            "3" => ModuleTag::Module3,
            _ => ModuleTag::None,
        }
    }
}

impl fmt::Display for ModuleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleTag::None => write!(f, "none"),
            ModuleTag::Module1 => write!(f, "m1"),
            ModuleTag::Module2 => write!(f, "m2"),
            ModuleTag::Module3 => write!(f, "m3"),
        }
    }
}

/// A raw detector file with its parsed module tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawFile {
    /// Path as given by the caller
    pub path: PathBuf,
    /// Tile this file was written by
    pub module: ModuleTag,
    /// Path with the module suffix and extension stripped
    pub base: PathBuf,
}

impl RawFile {
    /// Parse a path into a raw file
    pub fn parse(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let text = path.to_string_lossy();

        if let Some(captures) = module_suffix().captures(&text) {
            let whole = captures.get(0).map(|m| m.start()).unwrap_or(text.len());
            let module = captures
                .get(1)
                .map(|m| ModuleTag::from_digit(m.as_str()))
                .unwrap_or(ModuleTag::None);
            let base = PathBuf::from(&text[..whole]);
            return Self { path, module, base };
        }

        let base = path.with_extension("");
        Self {
            path,
            module: ModuleTag::None,
            base,
        }
    }

    /// Whether this file carries a tile suffix
    pub fn is_multi_module(&self) -> bool {
        self.module != ModuleTag::None
    }
}

/// One logical acquisition: a single file, or the three tiles of one exposure
///
/// Only [`group`] constructs these, so the arity invariant always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet {
    members: Vec<RawFile>,
}

impl FileSet {
    pub(crate) fn single(file: RawFile) -> Self {
        Self {
            members: vec![file],
        }
    }

    pub(crate) fn tiles(mut members: Vec<RawFile>) -> Self {
        members.sort_by_key(|m| m.module);
        Self { members }
    }

    /// Files in module-tag order
    pub fn members(&self) -> &[RawFile] {
        &self.members
    }

    /// Member paths in module-tag order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|m| m.path.clone()).collect()
    }

    /// 1 for single files, 3 for multi-module acquisitions
    pub fn arity(&self) -> usize {
        self.members.len()
    }

    pub fn is_multi_module(&self) -> bool {
        self.members.len() == 3
    }

    /// Base identity shared by every member
    pub fn base(&self) -> &Path {
        &self.members[0].base
    }

    /// Name used for all outputs derived from this set
    pub fn output_name(&self) -> String {
        self.base()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.members.iter().any(|m| m.path == path)
    }
}

/// Check whether a path has one of the detector container extensions
pub fn is_container_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            CONTAINER_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
