//! Durable registry of every backup under a backup root.
//!
//! The index is a single JSON document rewritten in full on every mutation and
//! sorted newest-first before each write. It is loaded fresh for each
//! operation; nothing keeps an in-memory copy between calls. Two processes
//! writing the same root race on the read-modify-write (last writer wins).

use crate::error::LifeboatError;
use crate::Result;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Date format of `delete_after`
pub const DELETE_AFTER_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub date: DateTime<Local>,
    /// Backup directory relative to the backup root
    pub path: String,
    /// Compressed size, human readable
    pub size: String,
    /// Expiry date (`YYYY-MM-DD`); empty means the backup never expires
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delete_after: String,
    pub checkpoint: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

impl IndexEntry {
    /// Parsed `delete_after`, `None` when empty or malformed
    pub fn delete_after_date(&self) -> Option<NaiveDate> {
        if self.delete_after.is_empty() {
            return None;
        }
        NaiveDate::parse_from_str(&self.delete_after, DELETE_AFTER_FORMAT).ok()
    }

    /// Whether this entry is past its expiry at `now`. Checkpoints never expire.
    pub fn is_expired(&self, now: &DateTime<Local>) -> bool {
        if self.checkpoint {
            return false;
        }
        let Some(date) = self.delete_after_date() else {
            return false;
        };
        match date
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        {
            Some(deadline) => *now > deadline,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub backups: Vec<IndexEntry>,
}

impl Index {
    /// Load the index; a missing file is an empty index, a malformed one is an error
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(LifeboatError::Io(e)),
        };

        serde_json::from_str(&content).map_err(|e| {
            LifeboatError::index(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Sort newest-first and replace the index file
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.sort();
        let content = serde_json::to_string_pretty(self)?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(content.as_bytes())?;
        temp.persist(path).map_err(|e| LifeboatError::Io(e.error))?;
        Ok(())
    }

    pub fn sort(&mut self) {
        self.backups.sort_by(|a, b| b.date.cmp(&a.date));
    }

    pub fn add_entry(&mut self, entry: IndexEntry) {
        self.backups.push(entry);
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backups.iter().any(|entry| entry.id == id)
    }

    /// Newest entry by date
    pub fn get_latest(&self) -> Option<&IndexEntry> {
        self.backups.iter().max_by_key(|entry| entry.date)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&IndexEntry> {
        self.backups.iter().find(|entry| entry.id == id)
    }

    pub fn get_by_id_mut(&mut self, id: &str) -> Option<&mut IndexEntry> {
        self.backups.iter_mut().find(|entry| entry.id == id)
    }

    /// Mark an entry as a checkpoint: it loses its expiry and keeps the note if one is given
    pub fn mark_as_checkpoint(&mut self, id: &str, note: &str) -> bool {
        match self.get_by_id_mut(id) {
            Some(entry) => {
                entry.checkpoint = true;
                entry.delete_after.clear();
                if !note.is_empty() {
                    entry.note = note.to_string();
                }
                true
            }
            None => false,
        }
    }

    pub fn remove_entry(&mut self, id: &str) -> Option<IndexEntry> {
        let position = self.backups.iter().position(|entry| entry.id == id)?;
        Some(self.backups.remove(position))
    }

    /// Non-checkpoint entries whose `delete_after` has passed at `now`
    pub fn expired(&self, now: &DateTime<Local>) -> Vec<IndexEntry> {
        self.backups
            .iter()
            .filter(|entry| entry.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn non_checkpoint_count(&self) -> usize {
        self.backups.iter().filter(|entry| !entry.checkpoint).count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    pub(crate) fn entry(id: &str, days_old: i64, delete_after: &str, checkpoint: bool) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            date: Local::now() - Duration::days(days_old),
            path: format!("20250101/{id}"),
            size: "1.0 KB".to_string(),
            delete_after: delete_after.to_string(),
            checkpoint,
            note: String::new(),
        }
    }

    fn days_from_now(days: i64) -> String {
        (Local::now() + Duration::days(days))
            .format(DELETE_AFTER_FORMAT)
            .to_string()
    }

    #[test]
    fn test_load_missing_index_is_empty() {
        let dir = tempdir().unwrap();
        let index = Index::load(&dir.path().join("index.json")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_load_malformed_index_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, "{ not json").unwrap();

        match Index::load(&path) {
            Err(LifeboatError::Index { message }) => assert!(message.contains("index.json")),
            other => panic!("Expected Index error, got {other:?}"),
        }
    }

    #[test]
    fn test_save_sorts_newest_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut index = Index::default();
        index.add_entry(entry("old", 10, "", false));
        index.add_entry(entry("new", 0, "", false));
        index.add_entry(entry("mid", 5, "", false));
        index.save(&path).unwrap();

        let loaded = Index::load(&path).unwrap();
        let ids: Vec<&str> = loaded.backups.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"backups\""));
    }

    #[test]
    fn test_save_is_stable_for_sorted_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut index = Index::default();
        index.add_entry(entry("a", 1, "", false));
        index.add_entry(entry("b", 2, "", true));
        index.save(&path).unwrap();
        let first = fs::read(&path).unwrap();

        let mut reloaded = Index::load(&path).unwrap();
        reloaded.save(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_get_latest_and_by_id() {
        let mut index = Index::default();
        assert!(index.get_latest().is_none());

        index.add_entry(entry("old", 3, "", false));
        index.add_entry(entry("new", 1, "", false));

        assert_eq!(index.get_latest().unwrap().id, "new");
        assert_eq!(index.get_by_id("old").unwrap().id, "old");
        assert!(index.get_by_id("missing").is_none());
        assert!(index.contains("new"));
    }

    #[test]
    fn test_mark_as_checkpoint_clears_expiry() {
        let mut index = Index::default();
        index.add_entry(entry("a", 1, &days_from_now(29), false));

        assert!(index.mark_as_checkpoint("a", "release"));
        let marked = index.get_by_id("a").unwrap();
        assert!(marked.checkpoint);
        assert!(marked.delete_after.is_empty());
        assert_eq!(marked.note, "release");

        assert!(index.mark_as_checkpoint("a", ""));
        assert_eq!(index.get_by_id("a").unwrap().note, "release");

        assert!(!index.mark_as_checkpoint("missing", "x"));
    }

    #[test]
    fn test_remove_entry() {
        let mut index = Index::default();
        index.add_entry(entry("a", 1, "", false));

        assert_eq!(index.remove_entry("a").unwrap().id, "a");
        assert!(index.remove_entry("a").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_expired_excludes_checkpoints_and_future_dates() {
        let mut index = Index::default();
        index.add_entry(entry("expired", 40, &days_from_now(-10), false));
        index.add_entry(entry("future", 1, &days_from_now(29), false));
        index.add_entry(entry("never", 1, "", false));
        index.add_entry(entry("checkpoint", 90, &days_from_now(-60), true));
        index.add_entry(entry("garbled", 90, "someday", false));

        let expired = index.expired(&Local::now());
        let ids: Vec<&str> = expired.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["expired"]);
        assert_eq!(index.non_checkpoint_count(), 4);
    }

    #[test]
    fn test_entry_serialization_omits_empty_fields() {
        let json = serde_json::to_string(&entry("a", 0, "", true)).unwrap();
        assert!(!json.contains("delete_after"));
        assert!(!json.contains("note"));
        assert!(json.contains("\"checkpoint\":true"));
    }
}
