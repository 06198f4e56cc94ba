use crate::Result;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
const THRESHOLD: u64 = 1024;

/// Calculate the total size of a file or directory
pub fn calculate_size(path: &Path) -> Result<u64> {
    let metadata = fs::symlink_metadata(path)?;

    if metadata.is_dir() {
        Ok(calculate_directory_size(path))
    } else {
        Ok(metadata.len())
    }
}

/// Sum of all file sizes below `dir`; unreadable entries are ignored
fn calculate_directory_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Copy file permissions from source to destination
pub fn copy_permissions(source: &Path, dest: &Path) -> Result<()> {
    let metadata = fs::metadata(source)?;
    let permissions = metadata.permissions();
    fs::set_permissions(dest, permissions)?;
    Ok(())
}

/// Format byte size in human-readable format
pub fn format_size(bytes: u64) -> String {
    if bytes < THRESHOLD {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    let unit = UNITS[unit_index];
    format!("{size:.1} {unit}")
}

/// Parse a size produced by [`format_size`] back into bytes.
///
/// The result is approximate for anything above 1 KB because the formatted
/// value only keeps one decimal.
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;
    let unit = unit.trim().to_uppercase();

    let exponent = if unit.is_empty() {
        0
    } else {
        UNITS.iter().position(|u| *u == unit)?
    };

    Some((number * (THRESHOLD as f64).powi(exponent as i32)).round() as u64)
}

/// Remove empty directories directly below `root`, skipping the names in `keep`.
/// Returns how many were removed.
pub fn remove_empty_subdirectories(root: &Path, keep: &[&str]) -> usize {
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if !path.is_dir() || keep.iter().any(|k| name == *k) {
            continue;
        }
        let is_empty = fs::read_dir(&path)
            .map(|mut children| children.next().is_none())
            .unwrap_or(false);
        if is_empty && fs::remove_dir(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}
