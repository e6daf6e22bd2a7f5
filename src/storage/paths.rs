//! Filesystem layout: the global memory root and the per-repo overlay.

use crate::config::MemoryConfig;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Name of the per-repository overlay directory.
pub const OVERLAY_DIR: &str = ".cass";

/// Walks upward from `start` looking for a `.git` directory.
#[must_use]
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    // Canonicalize to resolve symlinks
    if let Ok(canonical) = current.canonicalize() {
        current = canonical;
    }

    loop {
        if current.join(".git").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Resolved locations of everything cass-memory persists.
#[derive(Debug, Clone)]
pub struct MemoryPaths {
    /// Global root, normally `~/.cass-memory`.
    pub root: PathBuf,
    /// Global playbook.
    pub playbook: PathBuf,
    /// Diary directory.
    pub diary_dir: PathBuf,
    /// Reflections bookkeeping directory.
    pub reflections_dir: PathBuf,
    /// Embeddings cache directory.
    pub embeddings_dir: PathBuf,
    /// Cost-tracking directory.
    pub cost_dir: PathBuf,
    /// Repo overlay directory, when the cwd is inside a git repository.
    pub overlay_dir: Option<PathBuf>,
}

impl MemoryPaths {
    /// Resolves paths from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &MemoryConfig) -> Self {
        let root = config.home.clone();
        let playbook = config
            .playbook_path
            .clone()
            .unwrap_or_else(|| root.join("playbook.yaml"));
        let diary_dir = config
            .diary_dir
            .clone()
            .unwrap_or_else(|| root.join("diary"));
        let overlay_dir = find_repo_root(&config.cwd).map(|repo| repo.join(OVERLAY_DIR));

        Self {
            reflections_dir: root.join("reflections"),
            embeddings_dir: root.join("embeddings"),
            cost_dir: root.join("cost"),
            root,
            playbook,
            diary_dir,
            overlay_dir,
        }
    }

    /// Global config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Processed-session log.
    #[must_use]
    pub fn processed_log(&self) -> PathBuf {
        self.reflections_dir.join("processed.log")
    }

    /// Append-only outcomes file.
    #[must_use]
    pub fn outcomes(&self) -> PathBuf {
        self.root.join("outcomes.jsonl")
    }

    /// Global trauma entries.
    #[must_use]
    pub fn traumas(&self) -> PathBuf {
        self.root.join("traumas.jsonl")
    }

    /// Permanently blocked rule content.
    #[must_use]
    pub fn toxic_log(&self) -> PathBuf {
        self.root.join("toxic_bullets.log")
    }

    /// Repo-overlay playbook, when inside a repository.
    #[must_use]
    pub fn repo_playbook(&self) -> Option<PathBuf> {
        self.overlay_dir.as_ref().map(|d| d.join("playbook.yaml"))
    }

    /// Repo-overlay trauma entries, when inside a repository.
    #[must_use]
    pub fn repo_traumas(&self) -> Option<PathBuf> {
        self.overlay_dir.as_ref().map(|d| d.join("traumas.jsonl"))
    }

    /// Creates the global directory layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a directory cannot be created.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            &self.root,
            &self.diary_dir,
            &self.reflections_dir,
            &self.embeddings_dir,
            &self.cost_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| Error::io("create_layout", e))?;
        }
        Ok(())
    }
}
