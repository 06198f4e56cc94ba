use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifeboatError {
    #[error("No compression backend available")]
    NoBackendAvailable,

    #[error("Compression backend not available: {backend}")]
    BackendUnavailable { backend: &'static str },

    #[error("Failed to create backup directory {path}: {source}")]
    BackupDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup not found: {id}")]
    BackupNotFound { id: String },

    #[error("No backups found")]
    NoBackups,

    #[error("Unsupported archive format: {path}")]
    UnsupportedArchive { path: PathBuf },

    #[error("No archives found in backup directory: {path}")]
    NoArchives { path: PathBuf },

    #[error("Failed to extract {archive}: {message}")]
    Extraction { archive: PathBuf, message: String },

    #[error("Compression failed: {message}")]
    Compression { message: String },

    #[error("Checkpoint backups don't have expiration dates: {id}")]
    CheckpointHasNoExpiry { id: String },

    #[error("Index error: {message}")]
    Index { message: String },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation interrupted by user")]
    Interrupted,

    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl LifeboatError {
    /// Create a configuration error with a custom message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error with a custom message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an index error with a custom message
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index {
            message: message.into(),
        }
    }

    pub fn extraction(archive: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Extraction {
            archive: archive.into(),
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LifeboatError::Interrupted => 130,
            LifeboatError::Validation { .. } => 2,
            LifeboatError::Config { .. } => 2,
            LifeboatError::InvalidPattern { .. } => 2,
            _ => 1,
        }
    }

    /// Provide helpful suggestions for resolving the error
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            LifeboatError::NoBackendAvailable | LifeboatError::BackendUnavailable { .. } => vec![
                "Install 7-Zip and add it to PATH, or set [seven_zip] path".to_string(),
                "Set [compression] backend = auto to allow the built-in archivers".to_string(),
            ],
            LifeboatError::BackupDirectory { .. } => vec![
                "Check that backup_path exists and is writable".to_string(),
                "Free up disk space on the backup volume".to_string(),
            ],
            LifeboatError::BackupNotFound { .. } | LifeboatError::NoBackups => vec![
                "Run 'lifeboat list' to see available backups".to_string(),
            ],
            LifeboatError::UnsupportedArchive { .. } | LifeboatError::NoArchives { .. } => vec![
                "Check that the backup directory still contains its archives".to_string(),
                "Install 7-Zip to restore .7z archives".to_string(),
            ],
            LifeboatError::Index { .. } => vec![
                "Inspect index.json in the backup root for manual edits".to_string(),
            ],
            LifeboatError::Config { .. } | LifeboatError::InvalidPattern { .. } => vec![
                "Run 'lifeboat config --validate' to check the configuration".to_string(),
                "Run 'lifeboat config --sample' for an annotated example".to_string(),
            ],
            _ => vec![],
        }
    }
}
