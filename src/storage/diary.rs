//! Diary persistence: one JSON file per entry under `diary/`.

use super::atomic::atomic_write_json;
use crate::models::DiaryEntry;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Load/save access to the diary directory.
#[derive(Debug, Clone)]
pub struct DiaryStore {
    dir: PathBuf,
}

impl DiaryStore {
    /// Creates a store over the given diary directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Persists a diary entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on write failure.
    pub fn save(&self, entry: &DiaryEntry) -> Result<()> {
        atomic_write_json(&self.entry_path(&entry.id), entry)
    }

    /// Loads a diary entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file is missing or unreadable and
    /// [`Error::Parse`] when it is malformed.
    pub fn load(&self, id: &str) -> Result<DiaryEntry> {
        let path = self.entry_path(id);
        let contents =
            std::fs::read_to_string(&path).map_err(|e| Error::io("read_diary", e))?;
        serde_json::from_str(&contents).map_err(|e| Error::parse(path.display().to_string(), e))
    }

    /// Lists all readable diary entries; malformed files are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] only when the directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<DiaryEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let dir =
            std::fs::read_dir(&self.dir).map_err(|e| Error::io("read_diary_dir", e))?;
        for item in dir.filter_map(std::result::Result::ok) {
            let path = item.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unreadable diary");
                },
            }
        }

        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }
}

fn read_entry(path: &Path) -> Result<DiaryEntry> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io("read_diary", e))?;
    serde_json::from_str(&contents).map_err(|e| Error::parse(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = DiaryStore::new(dir.path());

        let mut entry = DiaryEntry::new("d-1", "/tmp/session.jsonl", Utc::now());
        entry.key_learnings.push("Workspaces need a lockfile".to_string());
        store.save(&entry).unwrap();

        let loaded = store.load("d-1").unwrap();
        assert_eq!(loaded.session_path, "/tmp/session.jsonl");
        assert_eq!(loaded.key_learnings.len(), 1);
    }

    #[test]
    fn test_list_skips_malformed_entries() {
        let dir = TempDir::new().unwrap();
        let store = DiaryStore::new(dir.path());

        store
            .save(&DiaryEntry::new("d-good", "/tmp/a.jsonl", Utc::now()))
            .unwrap();
        std::fs::write(dir.path().join("d-bad.json"), "{ nope").unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "d-good");
    }

    #[test]
    fn test_missing_dir_lists_empty() {
        let dir = TempDir::new().unwrap();
        let store = DiaryStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }
}
