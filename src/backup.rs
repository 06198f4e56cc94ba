//! Backup orchestration.
//!
//! A run goes through id generation, directory setup, one archive per unit,
//! the metadata document and finally the index commit. Only a missing
//! backend or an uncreatable backup directory abort a run; everything else is
//! recorded in [`BackupResult::errors`] and the run carries on.

use crate::collector::Collector;
use crate::compression::{Backends, CompressionResult, UnitSource};
use crate::config::{BackupUnit, Config};
use crate::error::LifeboatError;
use crate::index::{Index, IndexEntry, DELETE_AFTER_FORMAT};
use crate::metadata::{save_metadata, Metadata};
use crate::naming::{
    checkpoint_description, date_folder, generate_backup_id, resolve_collision, time_folder,
    unique_backup_id,
};
use crate::restore::{self, RestoreResult};
use crate::signal::BackupContext;
use crate::utils::{calculate_size, format_size};
use crate::Result;
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stage of a long-running operation reported through [`ProgressCallback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Collect,
    Compress,
    Metadata,
    Index,
    Extract,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Init => "Preparing",
            Phase::Collect => "Collecting",
            Phase::Compress => "Compressing",
            Phase::Metadata => "Writing metadata",
            Phase::Index => "Updating index",
            Phase::Extract => "Extracting",
        }
    }
}

/// Progress sink: (phase, current, total, message), invoked on the calling thread
pub type ProgressCallback<'a> = &'a mut dyn FnMut(Phase, usize, usize, &str);

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub note: String,
    pub checkpoint: bool,
    pub dry_run: bool,
    /// Restrict the run to these unit names; empty means every unit
    pub selected_units: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackupResult {
    pub id: String,
    pub path: PathBuf,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub duration: Duration,
    pub files_collected: usize,
    pub files_processed: usize,
    pub original_size: u64,
    pub compressed_size: u64,
    pub checkpoint: bool,
    pub dry_run: bool,
    /// Units a dry run would process
    pub planned_units: Vec<String>,
    pub units: Vec<CompressionResult>,
    pub errors: Vec<String>,
    pub success: bool,
}

impl BackupResult {
    fn new(id: String, path: PathBuf, start_time: DateTime<Local>, options: &BackupOptions) -> Self {
        Self {
            id,
            path,
            start_time,
            end_time: start_time,
            duration: Duration::ZERO,
            files_collected: 0,
            files_processed: 0,
            original_size: 0,
            compressed_size: 0,
            checkpoint: options.checkpoint,
            dry_run: options.dry_run,
            planned_units: Vec::new(),
            units: Vec::new(),
            errors: Vec::new(),
            success: false,
        }
    }

    fn finish(&mut self, started: Instant) {
        self.end_time = Local::now();
        self.duration = started.elapsed();
        self.success = self.errors.is_empty();
    }

    pub fn summary(&self) -> String {
        if self.dry_run {
            return format!(
                "Dry run: {} unit(s), {} files, {} would be backed up to {}",
                self.planned_units.len(),
                self.files_collected,
                format_size(self.original_size),
                self.path.display()
            );
        }
        format!(
            "Created backup {}: {} ({} files, {} -> {})",
            self.id,
            self.path.display(),
            self.files_processed,
            format_size(self.original_size),
            format_size(self.compressed_size)
        )
    }
}

/// A unit with its current state on disk
#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub unit: BackupUnit,
    pub exists: bool,
    pub size: u64,
}

pub struct Backup {
    config: Config,
    backends: Backends,
}

impl Backup {
    /// Create an orchestrator; fails when no compression backend can run
    pub fn new(config: Config) -> Result<Self> {
        Self::with_context(config, BackupContext::new())
    }

    pub fn with_context(config: Config, context: BackupContext) -> Result<Self> {
        let backends = Backends::probe(&config, &context);
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: Config, backends: Backends) -> Result<Self> {
        let active = backends.active()?;
        info!(backend = active.name(), format = %active.format(), "compression backend selected");
        Ok(Self { config, backends })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Deployment units found under `deployments_path`, sorted by name
    pub fn deployment_units(&self) -> Result<Vec<BackupUnit>> {
        let Some(root) = &self.config.deployments_path else {
            return Ok(Vec::new());
        };

        if !self.config.deployments.is_empty() {
            return Ok(self
                .config
                .deployments
                .iter()
                .map(|name| BackupUnit::deployment(name.as_str(), root.join(name)))
                .collect());
        }

        let entries = fs::read_dir(root).map_err(|e| {
            LifeboatError::config(format!(
                "failed to read deployments directory {}: {e}",
                root.display()
            ))
        })?;

        let mut units: Vec<BackupUnit> = entries
            .flatten()
            .filter(|entry| {
                let path = entry.path();
                path.is_dir()
                    || path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("war"))
            })
            .map(|entry| {
                BackupUnit::deployment(entry.file_name().to_string_lossy(), entry.path())
            })
            .collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    /// Every unit: deployments first, then configured folders
    pub fn units(&self) -> Result<Vec<BackupUnit>> {
        let mut units = self.deployment_units()?;
        units.extend(self.config.units.iter().cloned());
        Ok(units)
    }

    pub fn available_units(&self) -> Result<Vec<UnitInfo>> {
        Ok(self
            .units()?
            .into_iter()
            .map(|unit| {
                let exists = unit.path.exists();
                let size = if exists {
                    calculate_size(&unit.path).unwrap_or(0)
                } else {
                    0
                };
                UnitInfo { unit, exists, size }
            })
            .collect())
    }

    /// Units for a run, honouring `selected_units`; problems are recorded in `errors`
    fn select_units(&self, options: &BackupOptions, errors: &mut Vec<String>) -> Vec<BackupUnit> {
        let mut units = match self.deployment_units() {
            Ok(units) => units,
            Err(e) => {
                errors.push(e.to_string());
                Vec::new()
            }
        };
        units.extend(self.config.units.iter().cloned());

        if options.selected_units.is_empty() {
            return units;
        }

        for name in &options.selected_units {
            if !units.iter().any(|u| &u.name == name) {
                errors.push(format!("unknown unit: {name}"));
            }
        }
        units.retain(|u| options.selected_units.contains(&u.name));
        units
    }

    /// Run a backup
    pub fn run(&self, options: &BackupOptions, progress: ProgressCallback<'_>) -> Result<BackupResult> {
        let started = Instant::now();
        let start_time = Local::now();
        let backend = self.backends.active()?;

        let index_path = self.config.index_path();
        let taken = Index::load(&index_path).unwrap_or_default();
        let id = unique_backup_id(&generate_backup_id(&start_time), |c| taken.contains(c))?;

        let date = date_folder(&start_time);
        let destination = if options.checkpoint {
            self.config
                .checkpoint_destination(&date, &checkpoint_description(&options.note))
        } else {
            self.config
                .backup_destination(&date, &time_folder(&start_time))
        };
        let destination = resolve_collision(&destination)?;

        let mut result = BackupResult::new(id.clone(), destination.clone(), start_time, options);
        progress(Phase::Init, 0, 1, &id);
        info!(id = %id, checkpoint = options.checkpoint, dry_run = options.dry_run, "starting backup");

        let units = self.select_units(options, &mut result.errors);
        let total = units.len();

        if options.dry_run {
            let collection = Collector::new().collect(&units);
            result.planned_units = units.iter().map(|u| u.name.clone()).collect();
            result.files_collected = collection.total_count;
            result.original_size = collection.total_size;
            result.errors.extend(collection.errors);
            result.finish(started);
            info!(id = %id, units = total, "dry run complete");
            return Ok(result);
        }

        fs::create_dir_all(&destination).map_err(|source| LifeboatError::BackupDirectory {
            path: destination.clone(),
            source,
        })?;

        let collector = Collector::new();
        for (i, unit) in units.iter().enumerate() {
            progress(Phase::Collect, i, total, &unit.name);
            let collection = collector.collect(std::slice::from_ref(unit));
            result.files_collected += collection.total_count;
            result.errors.extend(collection.errors);

            if !unit.path.exists() {
                debug!(unit = %unit.name, "skipping missing unit");
                continue;
            }

            let archive_path =
                destination.join(backend.format().archive_file_name(&unit.archive_stem()));
            let source = UnitSource {
                name: &unit.name,
                entries: &collection.files,
            };
            let file_total = collection.total_count;

            progress(Phase::Compress, i, total, &unit.name);
            let outcome = backend.compress_unit(&source, &archive_path, &mut |n, item| {
                progress(Phase::Compress, n, file_total, item)
            });

            match outcome {
                Ok(unit_result) => {
                    result.files_processed += unit_result.files_processed;
                    result.original_size += unit_result.original_size;
                    result.compressed_size += unit_result.compressed_size;
                    result.errors.extend(
                        unit_result
                            .errors
                            .iter()
                            .map(|e| format!("{}: {e}", unit.name)),
                    );
                    result.units.push(unit_result);
                }
                Err(e) => {
                    warn!(unit = %unit.name, error = %e, "unit failed");
                    result.errors.push(format!("{}: {e}", unit.name));
                }
            }
        }

        progress(Phase::Metadata, 0, 1, &id);
        let metadata = Metadata::new(
            &id,
            start_time,
            started.elapsed().as_secs_f64(),
            result.files_processed,
            result.original_size,
            result.compressed_size,
            &options.note,
        );
        if let Err(e) = save_metadata(&destination, &metadata) {
            result.errors.push(format!("failed to write metadata: {e}"));
        }

        progress(Phase::Index, 0, 1, &id);
        let entry = self.index_entry(&id, &destination, start_time, &result, options);
        match Index::load(&index_path) {
            Ok(mut index) => {
                index.add_entry(entry);
                if let Err(e) = index.save(&index_path) {
                    result.errors.push(format!("failed to update index: {e}"));
                }
            }
            Err(e) => result.errors.push(format!("failed to load index: {e}")),
        }

        result.finish(started);
        info!(
            id = %id,
            files = result.files_processed,
            original = %format_size(result.original_size),
            compressed = %format_size(result.compressed_size),
            errors = result.errors.len(),
            "backup complete"
        );
        Ok(result)
    }

    fn index_entry(
        &self,
        id: &str,
        destination: &Path,
        start_time: DateTime<Local>,
        result: &BackupResult,
        options: &BackupOptions,
    ) -> IndexEntry {
        let retention = &self.config.retention;
        let delete_after = if !options.checkpoint && retention.enabled && retention.days > 0 {
            (start_time.date_naive() + chrono::Duration::days(i64::from(retention.days)))
                .format(DELETE_AFTER_FORMAT)
                .to_string()
        } else {
            String::new()
        };

        let relative = destination
            .strip_prefix(&self.config.backup_path)
            .unwrap_or(destination);
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        IndexEntry {
            id: id.to_string(),
            date: start_time,
            path,
            size: format_size(result.compressed_size),
            delete_after,
            checkpoint: options.checkpoint,
            note: options.note.clone(),
        }
    }

    /// Every backup, newest first. Does not write the index.
    pub fn list(&self) -> Result<Vec<IndexEntry>> {
        let mut index = Index::load(&self.config.index_path())?;
        index.sort();
        Ok(index.backups)
    }

    pub fn get_latest(&self) -> Result<Option<IndexEntry>> {
        let index = Index::load(&self.config.index_path())?;
        Ok(index.get_latest().cloned())
    }

    /// Restore a backup (`"latest"` or an id) into `target`
    pub fn restore(&self, id: &str, target: &Path, progress: ProgressCallback<'_>) -> Result<RestoreResult> {
        restore::restore(&self.config, &self.backends, id, target, progress)
    }

    /// Turn an existing backup into a checkpoint that never expires
    pub fn mark_checkpoint(&self, id: &str, note: &str) -> Result<()> {
        let index_path = self.config.index_path();
        let mut index = Index::load(&index_path)?;
        if !index.mark_as_checkpoint(id, note) {
            return Err(LifeboatError::BackupNotFound { id: id.to_string() });
        }
        index.save(&index_path)?;
        info!(backup = %id, "marked as checkpoint");
        Ok(())
    }
}
