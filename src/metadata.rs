use crate::utils::format_size;
use crate::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Name of the per-backup metadata document
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub count: usize,
    pub original_size: String,
    pub compressed_size: String,
}

/// Record of one backup run, stored next to its archives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub created_at: DateTime<Local>,
    pub duration_seconds: f64,
    pub files: FileStats,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

impl Metadata {
    pub fn new(
        id: impl Into<String>,
        created_at: DateTime<Local>,
        duration_seconds: f64,
        count: usize,
        original_size: u64,
        compressed_size: u64,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            duration_seconds,
            files: FileStats {
                count,
                original_size: format_size(original_size),
                compressed_size: format_size(compressed_size),
            },
            note: note.into(),
        }
    }
}

/// Write `metadata.json` into a backup directory
pub fn save_metadata(backup_dir: &Path, metadata: &Metadata) -> Result<()> {
    let content = serde_json::to_string_pretty(metadata)?;
    fs::write(backup_dir.join(METADATA_FILE), content)?;
    Ok(())
}

/// Read `metadata.json` back from a backup directory
pub fn load_metadata(backup_dir: &Path) -> Result<Metadata> {
    let content = fs::read_to_string(backup_dir.join(METADATA_FILE))?;
    Ok(serde_json::from_str(&content)?)
}
