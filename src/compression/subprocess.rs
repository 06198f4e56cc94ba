//! 7-Zip backend using copy-then-compress.
//!
//! Source files may be held open by a running application, so the unit is
//! first copied into a private temporary directory and 7-Zip is pointed at the
//! copy. The temporary directory is removed on every exit path, including a
//! failed 7-Zip run.

use super::{ArchiveFormat, CompressionBackend, CompressionResult, ItemProgress, UnitSource};
use crate::config::Config;
use crate::error::LifeboatError;
use crate::signal::BackupContext;
use crate::utils::copy_permissions;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info, warn};

const EXECUTABLE_NAMES: &[&str] = &["7z", "7za", "7zz"];

#[cfg(windows)]
const COMMON_LOCATIONS: &[&str] = &[
    r"C:\Program Files\7-Zip\7z.exe",
    r"C:\Program Files (x86)\7-Zip\7z.exe",
];

#[cfg(not(windows))]
const COMMON_LOCATIONS: &[&str] = &["/usr/bin/7z", "/usr/local/bin/7z", "/opt/homebrew/bin/7z"];

#[derive(Debug, Clone)]
pub struct SevenZipBackend {
    executable: Option<PathBuf>,
    level: i32,
    threads: u32,
    temp_root: Option<PathBuf>,
    context: BackupContext,
}

impl SevenZipBackend {
    pub fn new(config: &Config, context: BackupContext) -> Self {
        let level = if config.compression.enabled {
            config.compression.effective_level()
        } else {
            0
        };
        Self {
            executable: find_executable(config.seven_zip.path.as_deref()),
            level,
            threads: config.seven_zip.threads.max(1),
            temp_root: config.temp_path.clone(),
            context,
        }
    }

    /// Use a specific executable instead of the discovered one
    pub fn with_executable(mut self, executable: Option<PathBuf>) -> Self {
        self.executable = executable;
        self
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    /// Copy every entry below `staging`, keeping archive-relative paths.
    /// Files that cannot be copied are recorded and skipped.
    fn copy_entries(
        &self,
        source: &UnitSource<'_>,
        staging: &Path,
        result: &mut CompressionResult,
        progress: ItemProgress<'_>,
    ) {
        for entry in source.entries {
            let name = entry.archive_name();
            let target = staging.join(&name);

            if entry.is_dir {
                if let Err(e) = fs::create_dir_all(&target) {
                    result.errors.push(format!("failed to create {name}: {e}"));
                }
                continue;
            }

            let copied = target
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::copy(&entry.source_path, &target));

            match copied {
                Ok(bytes) => {
                    if let Err(e) = copy_permissions(&entry.source_path, &target) {
                        debug!(path = %target.display(), error = %e, "could not copy permissions");
                    }
                    result.original_size += bytes;
                    result.files_processed += 1;
                    progress(result.files_processed, &name);
                }
                Err(e) => {
                    warn!(path = %entry.source_path.display(), error = %e, "failed to copy file");
                    result
                        .errors
                        .push(format!("failed to copy {}: {e}", entry.source_path.display()));
                }
            }
        }
    }

    fn run_archiver(&self, executable: &Path, staging: &Path, archive_path: &Path) -> Result<()> {
        let archive_path = absolute(archive_path)?;
        let mut command = Command::new(executable);
        command
            .arg("a")
            .arg(format!("-mx{}", self.level))
            .arg(format!("-mmt{}", self.threads))
            .arg("-y")
            .arg(&archive_path)
            .arg("*")
            .current_dir(staging);

        info!(exe = %executable.display(), archive = %archive_path.display(), "running 7-Zip");
        let output = command.output()?;
        if !output.status.success() {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            error!(status = %output.status, output = %combined.trim(), "7-Zip failed");
            return Err(LifeboatError::Compression {
                message: format!("7-Zip exited with {}: {}", output.status, combined.trim()),
            });
        }
        Ok(())
    }
}

impl CompressionBackend for SevenZipBackend {
    fn name(&self) -> &'static str {
        "7z"
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZip
    }

    fn is_available(&self) -> bool {
        self.executable.is_some()
    }

    fn can_extract(&self, format: ArchiveFormat) -> bool {
        format == ArchiveFormat::SevenZip
    }

    fn compress_unit(
        &self,
        source: &UnitSource<'_>,
        archive_path: &Path,
        progress: ItemProgress<'_>,
    ) -> Result<CompressionResult> {
        let executable = self
            .executable
            .as_deref()
            .ok_or(LifeboatError::BackendUnavailable { backend: "7z" })?;
        let mut result = CompressionResult::new(archive_path, ArchiveFormat::SevenZip);

        let temp_parent = self.temp_root.clone().unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&temp_parent)?;
        let staging = tempfile::Builder::new()
            .prefix("lifeboat-")
            .tempdir_in(&temp_parent)?;
        let guard = self.context.register_operation(staging.path().to_path_buf());
        debug!(unit = source.name, staging = %staging.path().display(), "copying unit to temporary directory");

        self.copy_entries(source, staging.path(), &mut result, progress);
        let outcome = self.run_archiver(executable, staging.path(), archive_path);

        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!(path = %staging_path.display(), error = %e, "failed to remove temporary directory");
            result.errors.push(format!(
                "failed to remove temporary directory {}: {e}",
                staging_path.display()
            ));
        }
        guard.complete();

        outcome?;
        result.compressed_size = fs::metadata(archive_path)?.len();
        info!(
            unit = source.name,
            files = result.files_processed,
            original = result.original_size,
            compressed = result.compressed_size,
            "7-Zip compression complete"
        );
        Ok(result)
    }

    fn extract(&self, archive_path: &Path, target: &Path, progress: ItemProgress<'_>) -> Result<()> {
        if ArchiveFormat::detect(archive_path) != Some(ArchiveFormat::SevenZip) {
            return Err(LifeboatError::UnsupportedArchive {
                path: archive_path.to_path_buf(),
            });
        }
        let executable = self
            .executable
            .as_deref()
            .ok_or(LifeboatError::BackendUnavailable { backend: "7z" })?;

        fs::create_dir_all(target)?;
        let name = archive_path.display().to_string();
        progress(0, &name);

        let output = Command::new(executable)
            .arg("x")
            .arg(archive_path)
            .arg(format!("-o{}", target.display()))
            .arg("-y")
            .output()?;

        if !output.status.success() {
            return Err(LifeboatError::extraction(
                archive_path,
                format!(
                    "7-Zip exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        progress(1, &name);
        Ok(())
    }
}

/// Locate 7-Zip: the configured path, then `PATH`, then common install locations
pub fn find_executable(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        if let Ok(found) = which::which(path) {
            return Some(found);
        }
        warn!(path = %path.display(), "configured 7-Zip path not found, searching PATH");
    }

    EXECUTABLE_NAMES
        .iter()
        .find_map(|name| which::which(name).ok())
        .or_else(|| {
            COMMON_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|path| path.is_file())
        })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
