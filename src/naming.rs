use crate::error::LifeboatError;
use crate::Result;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Fallback directory description for checkpoints without a note
pub const DEFAULT_CHECKPOINT_NAME: &str = "checkpoint";

/// Generate a backup id from the run's start time (`backup-YYYYMMDD-HHMMSS`)
pub fn generate_backup_id(timestamp: &DateTime<Local>) -> String {
    format!("backup-{}", timestamp.format("%Y%m%d-%H%M%S"))
}

/// Disambiguate an id that is already taken by appending `-2`, `-3`, ...
pub fn unique_backup_id<F>(base: &str, taken: F) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    if !taken(base) {
        return Ok(base.to_string());
    }

    for counter in 2..=9999 {
        let candidate = format!("{base}-{counter}");
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }

    Err(LifeboatError::validation("Too many backup id collisions (>9999)"))
}

/// Date folder name (`YYYYMMDD`)
pub fn date_folder(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y%m%d").to_string()
}

/// Time folder name (`HHMM`)
pub fn time_folder(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%H%M").to_string()
}

/// Make a name safe for use as a folder or archive name: spaces and path
/// separators become underscores and the result is lowercased
pub fn sanitize_folder_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Description used in a checkpoint directory name
pub fn checkpoint_description(note: &str) -> String {
    let sanitized = sanitize_folder_name(note);
    if sanitized.is_empty() {
        DEFAULT_CHECKPOINT_NAME.to_string()
    } else {
        sanitized
    }
}

/// Resolve directory collisions by adding a counter to the last component
pub fn resolve_collision(base_path: &Path) -> Result<PathBuf> {
    if !base_path.exists() {
        return Ok(base_path.to_path_buf());
    }

    let parent = base_path.parent().unwrap_or(Path::new("."));
    let name = base_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LifeboatError::validation("Invalid backup directory name"))?;

    for counter in 2..=9999 {
        let new_path = parent.join(format!("{name}-{counter}"));
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(LifeboatError::validation(
        "Too many backup directory collisions (>9999)",
    ))
}
