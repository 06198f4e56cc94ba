//! Retention policy and physical cleanup of expired backups.

use crate::compression::safe_join;
use crate::config::{Config, RetentionConfig};
use crate::error::LifeboatError;
use crate::index::{Index, IndexEntry, DELETE_AFTER_FORMAT};
use crate::utils::{calculate_size, format_size, parse_size, remove_empty_subdirectories};
use crate::Result;
use chrono::{Duration, Local, NaiveDate};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Directories in the backup root that are never pruned
const PROTECTED_DIRS: &[&str] = &["logs"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupResult {
    pub backups_deleted: usize,
    pub backups_kept: usize,
    pub space_freed: u64,
    pub deleted_ids: Vec<String>,
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupStats {
    pub total: usize,
    pub regular: usize,
    pub checkpoints: usize,
    pub expired: usize,
    /// Sum of the recorded sizes, approximate
    pub total_size: u64,
    pub newest: Option<IndexEntry>,
    pub oldest: Option<IndexEntry>,
}

#[derive(Debug, Clone)]
pub struct RetentionManager {
    backup_path: PathBuf,
    policy: RetentionConfig,
}

impl RetentionManager {
    pub fn new(config: &Config) -> Self {
        Self {
            backup_path: config.backup_path.clone(),
            policy: config.retention.clone(),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.backup_path.join(crate::config::INDEX_FILE)
    }

    /// Delete expired backups while keeping at least `min_keep` non-checkpoint backups
    pub fn cleanup(&self, dry_run: bool) -> Result<CleanupResult> {
        let index_path = self.index_path();
        let mut index = Index::load(&index_path)?;
        let total_before = index.len();
        let mut result = CleanupResult {
            dry_run,
            backups_kept: total_before,
            ..CleanupResult::default()
        };

        if !self.policy.enabled {
            info!("retention policy disabled, skipping cleanup");
            return Ok(result);
        }

        let mut expired = index.expired(&Local::now());
        expired.sort_by_key(|entry| entry.date);
        index.sort();
        let live = index.non_checkpoint_count();

        let mut to_delete = Vec::new();
        for entry in expired {
            if live - to_delete.len() <= self.policy.min_keep {
                info!(
                    backup = %entry.id,
                    min_keep = self.policy.min_keep,
                    "retaining backup to maintain min_keep"
                );
                continue;
            }
            to_delete.push(entry);
        }

        for entry in &to_delete {
            let Some(path) = self.entry_dir(entry) else {
                result.warnings.push(format!(
                    "refusing to delete {}: invalid path '{}'",
                    entry.id, entry.path
                ));
                continue;
            };
            let size = calculate_size(&path).unwrap_or(0);

            if dry_run {
                info!(backup = %entry.id, path = %path.display(), size = %format_size(size), "would delete backup (dry run)");
            } else {
                if path.exists() {
                    if let Err(e) = fs::remove_dir_all(&path) {
                        error!(backup = %entry.id, error = %e, "failed to delete backup");
                        result
                            .warnings
                            .push(format!("failed to delete {}: {e}", entry.id));
                        continue;
                    }
                }
                index.remove_entry(&entry.id);
                info!(backup = %entry.id, size = %format_size(size), "deleted backup");
            }

            result.backups_deleted += 1;
            result.space_freed += size;
            result.deleted_ids.push(entry.id.clone());
        }

        if !dry_run {
            self.clean_empty_dirs();
            if result.backups_deleted > 0 {
                index.save(&index_path)?;
            }
        }

        result.backups_kept = total_before - result.backups_deleted;
        Ok(result)
    }

    pub fn expired_backups(&self) -> Result<Vec<IndexEntry>> {
        let index = Index::load(&self.index_path())?;
        Ok(index.expired(&Local::now()))
    }

    pub fn backup_stats(&self) -> Result<BackupStats> {
        let mut index = Index::load(&self.index_path())?;
        index.sort();
        let now = Local::now();

        let mut stats = BackupStats {
            total: index.len(),
            newest: index.backups.first().cloned(),
            oldest: index.backups.last().cloned(),
            ..BackupStats::default()
        };

        for entry in &index.backups {
            if entry.checkpoint {
                stats.checkpoints += 1;
            } else {
                stats.regular += 1;
            }
            if entry.is_expired(&now) {
                stats.expired += 1;
            }
            stats.total_size += parse_size(&entry.size).unwrap_or(0);
        }

        Ok(stats)
    }

    /// Delete a backup regardless of policy or checkpoint status
    pub fn force_delete(&self, id: &str) -> Result<()> {
        let index_path = self.index_path();
        let mut index = Index::load(&index_path)?;
        let entry = index
            .get_by_id(id)
            .cloned()
            .ok_or_else(|| LifeboatError::BackupNotFound { id: id.to_string() })?;

        let path = self.entry_dir(&entry).ok_or_else(|| {
            LifeboatError::index(format!("invalid path '{}' for backup {id}", entry.path))
        })?;
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }

        index.remove_entry(id);
        index.save(&index_path)?;
        self.clean_empty_dirs();

        info!(backup = %id, "force deleted backup");
        Ok(())
    }

    /// Push a backup's expiry date `days` further out
    pub fn extend_retention(&self, id: &str, days: i64) -> Result<String> {
        let index_path = self.index_path();
        let mut index = Index::load(&index_path)?;
        let entry = index
            .get_by_id_mut(id)
            .ok_or_else(|| LifeboatError::BackupNotFound { id: id.to_string() })?;

        if entry.checkpoint {
            return Err(LifeboatError::CheckpointHasNoExpiry { id: id.to_string() });
        }

        let base = entry
            .delete_after_date()
            .unwrap_or_else(|| Local::now().date_naive());
        let new_date: NaiveDate = base + Duration::days(days);
        entry.delete_after = new_date.format(DELETE_AFTER_FORMAT).to_string();
        let delete_after = entry.delete_after.clone();

        index.save(&index_path)?;
        info!(backup = %id, delete_after = %delete_after, "extended retention");
        Ok(delete_after)
    }

    /// Backup directory for an entry; `None` when the recorded path would leave the root
    fn entry_dir(&self, entry: &IndexEntry) -> Option<PathBuf> {
        if entry.path.trim().is_empty() {
            return None;
        }
        safe_join(&self.backup_path, std::path::Path::new(&entry.path))
            .filter(|path| *path != self.backup_path)
    }

    fn clean_empty_dirs(&self) {
        let removed = remove_empty_subdirectories(&self.backup_path, PROTECTED_DIRS);
        if removed > 0 {
            debug!(count = removed, "removed empty date directories");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::entry;
    use std::path::Path;
    use tempfile::tempdir;

    fn date_offset(days: i64) -> String {
        (Local::now() + Duration::days(days))
            .format(DELETE_AFTER_FORMAT)
            .to_string()
    }

    fn config_for(root: &Path, days: u32, min_keep: usize) -> Config {
        let mut config = Config::with_backup_path(root);
        config.retention.days = days;
        config.retention.min_keep = min_keep;
        config
    }

    /// Write an index plus on-disk directories for the given entries
    fn seed(root: &Path, entries: Vec<IndexEntry>) {
        let mut index = Index::default();
        for e in entries {
            let dir = root.join(&e.path);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("app.tar.zst"), "archive").unwrap();
            index.add_entry(e);
        }
        index.save(&root.join("index.json")).unwrap();
    }

    fn old_backups(count: usize) -> Vec<IndexEntry> {
        (0..count)
            .map(|i| entry(&format!("backup-{i:02}"), 40 + i as i64, &date_offset(-10 - i as i64), false))
            .collect()
    }

    #[test]
    fn test_dry_run_respects_min_keep() {
        let dir = tempdir().unwrap();
        seed(dir.path(), old_backups(10));

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 5));
        let result = manager.cleanup(true).unwrap();

        assert!(result.dry_run);
        assert_eq!(result.backups_deleted, 5);
        assert_eq!(result.backups_kept, 5);
        assert!(result.space_freed > 0);
        // nothing touched
        assert_eq!(Index::load(&dir.path().join("index.json")).unwrap().len(), 10);
    }

    #[test]
    fn test_cleanup_deletes_oldest_expired_first() {
        let dir = tempdir().unwrap();
        seed(dir.path(), old_backups(10));

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 5));
        let result = manager.cleanup(false).unwrap();

        assert_eq!(result.backups_deleted, 5);
        assert_eq!(result.backups_kept, 5);
        assert!(result.deleted_ids.contains(&"backup-09".to_string()));
        assert!(!result.deleted_ids.contains(&"backup-00".to_string()));

        let index = Index::load(&dir.path().join("index.json")).unwrap();
        assert_eq!(index.len(), 5);
        assert!(index.contains("backup-00"));
        assert!(!dir.path().join("20250101").join("backup-09").exists());
        assert!(dir.path().join("20250101").join("backup-00").exists());
    }

    #[test]
    fn test_min_keep_larger_than_population() {
        let dir = tempdir().unwrap();
        seed(dir.path(), old_backups(3));

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 5));
        let result = manager.cleanup(false).unwrap();

        assert_eq!(result.backups_deleted, 0);
        assert_eq!(result.backups_kept, 3);
    }

    #[test]
    fn test_checkpoints_survive_cleanup() {
        let dir = tempdir().unwrap();
        let mut entries = old_backups(4);
        let mut checkpoint = entry("release", 400, "", true);
        checkpoint.path = "20240101_release".to_string();
        checkpoint.note = "release".to_string();
        entries.push(checkpoint);
        seed(dir.path(), entries);

        let manager = RetentionManager::new(&config_for(dir.path(), 1, 0));
        let result = manager.cleanup(false).unwrap();

        assert_eq!(result.backups_deleted, 4);
        assert!(!result.deleted_ids.contains(&"release".to_string()));
        assert_eq!(result.backups_kept, 1);

        let index = Index::load(&dir.path().join("index.json")).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get_by_id("release").unwrap().checkpoint);
        assert!(dir.path().join("20240101_release").exists());
        // emptied date directory pruned
        assert!(!dir.path().join("20250101").exists());
    }

    #[test]
    fn test_disabled_policy_is_noop() {
        let dir = tempdir().unwrap();
        seed(dir.path(), old_backups(6));

        let mut config = config_for(dir.path(), 30, 0);
        config.retention.enabled = false;
        let result = RetentionManager::new(&config).cleanup(false).unwrap();

        assert_eq!(result.backups_deleted, 0);
        assert_eq!(result.backups_kept, 6);
        assert_eq!(Index::load(&dir.path().join("index.json")).unwrap().len(), 6);
    }

    #[test]
    fn test_cleanup_with_missing_directory_still_updates_index() {
        let dir = tempdir().unwrap();
        seed(dir.path(), old_backups(2));
        fs::remove_dir_all(dir.path().join("20250101").join("backup-01")).unwrap();

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 0));
        let result = manager.cleanup(false).unwrap();

        assert_eq!(result.backups_deleted, 2);
        assert!(result.warnings.is_empty());
        assert!(Index::load(&dir.path().join("index.json")).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_entry_path_is_a_warning() {
        let dir = tempdir().unwrap();
        let mut bad = entry("bad", 50, &date_offset(-20), false);
        bad.path = "../outside".to_string();
        let mut index = Index::default();
        index.add_entry(bad);
        index.save(&dir.path().join("index.json")).unwrap();

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 0));
        let result = manager.cleanup(false).unwrap();

        assert_eq!(result.backups_deleted, 0);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("bad"));
    }

    #[test]
    fn test_failed_deletion_is_a_warning_and_others_proceed() {
        let dir = tempdir().unwrap();
        seed(dir.path(), old_backups(3));
        // a regular file where the backup directory should be makes remove_dir_all fail
        let stuck = dir.path().join("20250101").join("backup-01");
        fs::remove_dir_all(&stuck).unwrap();
        fs::write(&stuck, "not a directory").unwrap();

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 0));
        let result = manager.cleanup(false).unwrap();

        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("backup-01"));
        assert_eq!(result.backups_deleted, 2);
        assert_eq!(result.backups_kept, 1);
        assert!(!result.deleted_ids.contains(&"backup-01".to_string()));

        let index = Index::load(&dir.path().join("index.json")).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains("backup-01"));
        assert!(!dir.path().join("20250101").join("backup-00").exists());
        assert!(!dir.path().join("20250101").join("backup-02").exists());
        assert!(stuck.is_file());
    }

    #[test]
    fn test_cleanup_fails_on_corrupt_index() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.json"), "[[[").unwrap();

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 0));
        assert!(matches!(manager.cleanup(true), Err(LifeboatError::Index { .. })));
    }

    #[test]
    fn test_force_delete_ignores_checkpoint() {
        let dir = tempdir().unwrap();
        let mut checkpoint = entry("release", 1, "", true);
        checkpoint.path = "20250101_release".to_string();
        seed(dir.path(), vec![checkpoint]);

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 5));
        manager.force_delete("release").unwrap();

        assert!(Index::load(&dir.path().join("index.json")).unwrap().is_empty());
        assert!(!dir.path().join("20250101_release").exists());

        assert!(matches!(
            manager.force_delete("release"),
            Err(LifeboatError::BackupNotFound { .. })
        ));
    }

    #[test]
    fn test_extend_retention() {
        let dir = tempdir().unwrap();
        let current = date_offset(5);
        let mut checkpoint = entry("release", 1, "", true);
        checkpoint.path = "20250101_release".to_string();
        seed(
            dir.path(),
            vec![
                entry("regular", 1, &current, false),
                entry("open", 2, "", false),
                checkpoint,
            ],
        );

        let manager = RetentionManager::new(&config_for(dir.path(), 30, 5));

        let extended = manager.extend_retention("regular", 10).unwrap();
        assert_eq!(extended, date_offset(15));

        let extended = manager.extend_retention("open", 3).unwrap();
        assert_eq!(extended, date_offset(3));

        assert!(matches!(
            manager.extend_retention("release", 3),
            Err(LifeboatError::CheckpointHasNoExpiry { .. })
        ));
        assert!(matches!(
            manager.extend_retention("missing", 3),
            Err(LifeboatError::BackupNotFound { .. })
        ));

        let index = Index::load(&dir.path().join("index.json")).unwrap();
        assert_eq!(index.get_by_id("regular").unwrap().delete_after, date_offset(15));
    }

    #[test]
    fn test_backup_stats() {
        let dir = tempdir().unwrap();
        let mut entries = old_backups(2);
        entries.push(entry("fresh", 0, &date_offset(30), false));
        let mut checkpoint = entry("release", 100, "", true);
        checkpoint.path = "20240101_release".to_string();
        entries.push(checkpoint);
        seed(dir.path(), entries);

        let stats = RetentionManager::new(&config_for(dir.path(), 30, 5))
            .backup_stats()
            .unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.regular, 3);
        assert_eq!(stats.checkpoints, 1);
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.total_size, 4 * 1024);
        assert_eq!(stats.newest.unwrap().id, "fresh");
        assert_eq!(stats.oldest.unwrap().id, "release");

        let expired = RetentionManager::new(&config_for(dir.path(), 30, 5))
            .expired_backups()
            .unwrap();
        assert_eq!(expired.len(), 2);
    }
}
