//! Playbook persistence: YAML on disk, lock-guarded mutation, tier merge.

use super::atomic::atomic_write;
use super::lock::with_lock;
use super::paths::MemoryPaths;
use crate::models::Playbook;
use crate::{Error, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Load/save/update access to one playbook file.
#[derive(Debug, Clone)]
pub struct PlaybookStore {
    path: PathBuf,
}

impl PlaybookStore {
    /// Creates a store for the given playbook file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The playbook file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the playbook; a missing file loads as an empty playbook.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when the file exists but is not valid YAML;
    /// a broken playbook aborts rather than silently losing rules.
    pub fn load(&self) -> Result<Playbook> {
        if !self.path.exists() {
            return Ok(Playbook::new(Utc::now()));
        }

        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| Error::io("read_playbook", e))?;
        serde_yaml_ng::from_str(&contents)
            .map_err(|e| Error::parse(self.path.display().to_string(), e))
    }

    /// Loads and schema-validates the playbook.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] or [`Error::Schema`].
    pub fn load_validated(&self) -> Result<Playbook> {
        let playbook = self.load()?;
        playbook.validate()?;
        Ok(playbook)
    }

    /// Persists the playbook atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on write failure.
    pub fn save(&self, playbook: &Playbook) -> Result<()> {
        let yaml = serde_yaml_ng::to_string(playbook)
            .map_err(|e| Error::parse(self.path.display().to_string(), e))?;
        atomic_write(&self.path, yaml.as_bytes())
    }

    /// Mutates the playbook under its file lock.
    ///
    /// The playbook is re-read from disk after the lock is held, so a stale
    /// in-memory copy can never clobber a concurrent writer's changes.
    ///
    /// # Errors
    ///
    /// Returns lock, load, or save errors, or whatever `mutate` returns.
    pub fn update<T>(
        &self,
        operation: &str,
        mutate: impl FnOnce(&mut Playbook) -> Result<T>,
    ) -> Result<T> {
        with_lock(&self.path, operation, || {
            let mut playbook = self.load()?;
            let outcome = mutate(&mut playbook)?;
            playbook.metadata.updated_at = Utc::now();
            self.save(&playbook)?;
            Ok(outcome)
        })
    }
}

/// Loads the merged global + repo playbook for the given layout.
///
/// # Errors
///
/// Returns [`Error::Parse`] when either present playbook fails to parse.
pub fn load_merged(paths: &MemoryPaths) -> Result<Playbook> {
    let global = PlaybookStore::new(&paths.playbook).load()?;

    match paths.repo_playbook() {
        Some(repo_path) if repo_path.exists() => {
            let repo = PlaybookStore::new(&repo_path).load()?;
            Ok(Playbook::merge(&global, &repo))
        },
        _ => Ok(global),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BulletKind, BulletScope, PlaybookBullet};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> PlaybookStore {
        PlaybookStore::new(dir.path().join("playbook.yaml"))
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let playbook = store_in(&dir).load().unwrap();
        assert!(playbook.bullets.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();

        let mut playbook = Playbook::new(now);
        playbook.bullets.push(PlaybookBullet::new(
            "Prefer explicit error types",
            "errors",
            BulletScope::Global,
            BulletKind::WorkflowRule,
            now,
        ));
        store.save(&playbook).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.bullets.len(), 1);
        assert_eq!(loaded.bullets[0].content, "Prefer explicit error types");
        assert_eq!(loaded.schema_version, crate::models::PLAYBOOK_SCHEMA_VERSION);
    }

    #[test]
    fn test_snake_case_document_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("playbook.yaml");
        std::fs::write(
            &path,
            r"schema_version: 1
metadata:
  version: '1.0'
  created_at: 2024-01-01T00:00:00Z
  updated_at: 2024-01-01T00:00:00Z
  total_reflections: 4
bullets:
  - id: b-1-aaaaaa
    content: Keep functions small
    created_at: 2024-01-01T00:00:00Z
    updated_at: 2024-01-01T00:00:00Z
    helpful_count: 0
    harmful_count: 0
deprecated_patterns: []
",
        )
        .unwrap();

        let playbook = PlaybookStore::new(&path).load().unwrap();
        assert_eq!(playbook.metadata.total_reflections, 4);
        assert_eq!(playbook.bullets[0].content, "Keep functions small");
    }

    #[test]
    fn test_garbage_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("playbook.yaml");
        std::fs::write(&path, ": not yaml [").unwrap();

        assert!(matches!(
            PlaybookStore::new(&path).load(),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_update_rereads_under_lock() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();

        store.save(&Playbook::new(now)).unwrap();

        store
            .update("add_rule", |playbook| {
                playbook.bullets.push(PlaybookBullet::new(
                    "Lock before mutating",
                    "io",
                    BulletScope::Global,
                    BulletKind::WorkflowRule,
                    Utc::now(),
                ));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.load().unwrap().bullets.len(), 1);
        // The lock sidecar is gone.
        assert!(!dir.path().join("playbook.yaml.lock").exists());
    }
}
