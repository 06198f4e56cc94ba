use crate::backup::{Phase, ProgressCallback};
use crate::compression::{safe_join, ArchiveFormat, Backends};
use crate::config::Config;
use crate::error::LifeboatError;
use crate::index::Index;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Identifier accepted in place of a backup id to pick the newest backup
pub const LATEST: &str = "latest";

#[derive(Debug, Clone)]
pub struct RestoreResult {
    pub id: String,
    pub source: PathBuf,
    pub target: PathBuf,
    /// Archives extracted, in extraction order
    pub archives: Vec<PathBuf>,
}

/// Extract every archive of a backup into `target`.
///
/// Archives are extracted in file-name order; the first failure aborts and
/// leaves already-extracted content in place.
pub fn restore(
    config: &Config,
    backends: &Backends,
    id: &str,
    target: &Path,
    progress: ProgressCallback<'_>,
) -> Result<RestoreResult> {
    let index = Index::load(&config.index_path())?;
    let entry = if id == LATEST {
        index.get_latest().ok_or(LifeboatError::NoBackups)?
    } else {
        index
            .get_by_id(id)
            .ok_or_else(|| LifeboatError::BackupNotFound { id: id.to_string() })?
    };

    let source = safe_join(&config.backup_path, Path::new(&entry.path))
        .filter(|_| !entry.path.is_empty())
        .ok_or_else(|| {
            LifeboatError::index(format!(
                "backup {} has an invalid path: {}",
                entry.id, entry.path
            ))
        })?;

    let archives = find_archives(&source)?;
    if archives.is_empty() {
        return Err(LifeboatError::NoArchives { path: source });
    }

    // every archive needs a backend before anything is written
    let mut plan = Vec::with_capacity(archives.len());
    for (path, format) in archives {
        let backend = backends
            .for_format(format)
            .ok_or_else(|| LifeboatError::UnsupportedArchive { path: path.clone() })?;
        plan.push((path, backend));
    }

    fs::create_dir_all(target)?;
    info!(backup = %entry.id, source = %source.display(), target = %target.display(), "restoring backup");

    let total = plan.len();
    let mut restored = Vec::with_capacity(total);
    for (i, (archive, backend)) in plan.into_iter().enumerate() {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        progress(Phase::Extract, i, total, &name);
        backend.extract(&archive, target, &mut |_, item| {
            progress(Phase::Extract, i, total, item)
        })?;
        restored.push(archive);
    }
    progress(Phase::Extract, total, total, "done");

    Ok(RestoreResult {
        id: entry.id.clone(),
        source,
        target: target.to_path_buf(),
        archives: restored,
    })
}

/// Archive files directly inside `dir`, sorted by file name
fn find_archives(dir: &Path) -> Result<Vec<(PathBuf, ArchiveFormat)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut archives: Vec<(PathBuf, ArchiveFormat)> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| ArchiveFormat::detect(&path).map(|format| (path, format)))
        .collect();
    archives.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    Ok(archives)
}
