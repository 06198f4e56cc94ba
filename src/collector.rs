//! File collection for backup units.
//!
//! Walks each unit's source path and produces the flat list of files and
//! directories that the compression backends archive. Include patterns are
//! applied before exclude patterns; an excluded directory is not descended
//! into. Traversal problems are recorded and never abort the pass.

use crate::config::{BackupUnit, UnitKind};
use crate::error::LifeboatError;
use crate::naming::sanitize_folder_name;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One collected file or directory
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub source_path: PathBuf,
    /// Path relative to the unit root
    pub relative_path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
    pub kind: UnitKind,
    /// Name of the unit this entry belongs to
    pub unit: String,
}

impl FileEntry {
    /// Name of the entry inside an archive: `<sanitized unit>/<relative path>`
    /// with forward slashes
    pub fn archive_name(&self) -> String {
        let mut name = sanitize_folder_name(&self.unit);
        for component in self.relative_path.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }
        name
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectionResult {
    pub files: Vec<FileEntry>,
    /// Bytes across non-directory entries
    pub total_size: u64,
    /// Number of non-directory entries
    pub total_count: usize,
    pub errors: Vec<String>,
}

impl CollectionResult {
    pub fn files_for_unit(&self, unit: &str) -> Vec<&FileEntry> {
        self.files.iter().filter(|f| f.unit == unit).collect()
    }

    /// Entries that are not directories
    pub fn files(&self) -> Vec<&FileEntry> {
        self.files.iter().filter(|f| !f.is_dir).collect()
    }

    pub fn directories(&self) -> Vec<&FileEntry> {
        self.files.iter().filter(|f| f.is_dir).collect()
    }

    fn push(&mut self, entry: FileEntry) {
        if !entry.is_dir {
            self.total_size += entry.size;
            self.total_count += 1;
        }
        self.files.push(entry);
    }
}

/// Read-only collection pass over backup units
#[derive(Debug, Default, Clone, Copy)]
pub struct Collector;

impl Collector {
    pub fn new() -> Self {
        Self
    }

    pub fn collect(&self, units: &[BackupUnit]) -> CollectionResult {
        let mut result = CollectionResult::default();
        for unit in units {
            self.collect_unit(unit, &mut result);
        }
        result
    }

    fn collect_unit(&self, unit: &BackupUnit, result: &mut CollectionResult) {
        let metadata = match fs::metadata(&unit.path) {
            Ok(metadata) => metadata,
            Err(_) if !unit.path.exists() => {
                if unit.required {
                    result.errors.push(format!(
                        "required unit '{}' not found: {}",
                        unit.name,
                        unit.path.display()
                    ));
                } else {
                    warn!(unit = %unit.name, path = %unit.path.display(), "optional unit not found, skipping");
                }
                return;
            }
            Err(e) => {
                result.errors.push(format!(
                    "failed to stat {}: {e}",
                    unit.path.display()
                ));
                return;
            }
        };

        if !metadata.is_dir() {
            let relative_path = unit
                .path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&unit.name));
            result.push(FileEntry {
                source_path: unit.path.clone(),
                relative_path,
                size: metadata.len(),
                is_dir: false,
                kind: unit.kind,
                unit: unit.name.clone(),
            });
            return;
        }

        let include = match build_globset(&unit.include) {
            Ok(set) => set,
            Err(e) => {
                result.errors.push(format!("unit '{}': {e}", unit.name));
                return;
            }
        };
        let exclude = match build_globset(&unit.exclude) {
            Ok(set) => set,
            Err(e) => {
                result.errors.push(format!("unit '{}': {e}", unit.name));
                return;
            }
        };

        let before = result.files.len();
        let mut walker = WalkDir::new(&unit.path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = walker.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(unit = %unit.name, error = %e, "error accessing path");
                    result.errors.push(format!("error accessing path: {e}"));
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue;
            }

            let relative_path = entry
                .path()
                .strip_prefix(&unit.path)
                .unwrap_or(entry.path())
                .to_path_buf();
            let relative = slash_path(&relative_path);
            let name = entry.file_name().to_string_lossy();
            let is_dir = entry.file_type().is_dir();

            if let Some(include) = &include {
                if !is_dir && !include.is_match(name.as_ref()) && !include.is_match(&relative) {
                    continue;
                }
            }

            if let Some(exclude) = &exclude {
                if exclude.is_match(name.as_ref()) || exclude.is_match(&relative) {
                    if is_dir {
                        walker.skip_current_dir();
                    }
                    continue;
                }
            }

            let size = match entry.metadata() {
                Ok(metadata) => {
                    if is_dir {
                        0
                    } else {
                        metadata.len()
                    }
                }
                Err(e) => {
                    result
                        .errors
                        .push(format!("failed to read {}: {e}", entry.path().display()));
                    continue;
                }
            };

            result.push(FileEntry {
                source_path: entry.path().to_path_buf(),
                relative_path,
                size,
                is_dir,
                kind: unit.kind,
                unit: unit.name.clone(),
            });
        }

        debug!(
            unit = %unit.name,
            entries = result.files.len() - before,
            "collected unit"
        );
    }
}

/// Relative path rendered with `/` separators for pattern matching
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, LifeboatError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| LifeboatError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|source| LifeboatError::InvalidPattern {
            pattern: patterns.join(", "),
            source,
        })
}
