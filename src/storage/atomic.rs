//! Atomic file writes.
//!
//! A write goes to `<path>.tmp.<pid>.<rand>`, is flushed and chmodded to
//! 0600, then renamed over the target. A partial file is never observable;
//! the temp file is unlinked on every exit path.

use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Drop guard that unlinks the temp file unless the rename succeeded.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let rand = uuid::Uuid::new_v4().simple().to_string();
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".tmp.{}.{}", std::process::id(), &rand[..8]));
    PathBuf::from(name)
}

/// Writes `contents` to `path` atomically.
///
/// # Errors
///
/// Returns [`Error::Io`] on any step; the target is left untouched on failure.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create_parent_dir", e))?;
        }
    }

    let temp = temp_path_for(path);
    let mut guard = TempGuard::new(temp.clone());

    let mut file = fs::File::create(&temp).map_err(|e| Error::io("create_temp", e))?;
    file.write_all(contents)
        .map_err(|e| Error::io("write_temp", e))?;
    file.sync_all().map_err(|e| Error::io("sync_temp", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::io("chmod_temp", e))?;
    }

    drop(file);
    fs::rename(&temp, path).map_err(|e| Error::io("rename_temp", e))?;
    guard.disarm();

    Ok(())
}

/// Serializes a value to pretty JSON and writes it atomically.
///
/// # Errors
///
/// Returns [`Error::Parse`] on serialization failure or [`Error::Io`] on write.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::parse(path.display().to_string(), e))?;
    atomic_write(path, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data.yaml");

        atomic_write(&target, b"first").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "first");

        atomic_write(&target, b"second").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
    }

    #[test]
    fn test_no_temp_left_behind() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data.yaml");
        atomic_write(&target, b"content").unwrap();

        let strays: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(strays.is_empty());
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a").join("b").join("data.json");
        atomic_write(&target, b"{}").unwrap();
        assert!(target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("secret.json");
        atomic_write(&target, b"{}").unwrap();

        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_prior_content_survives_failed_write() {
        // A simulated crash between write and rename: the guard removes the
        // temp and the prior content stays intact.
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data.yaml");
        atomic_write(&target, b"stable").unwrap();

        {
            let temp = temp_path_for(&target);
            let _guard = TempGuard::new(temp.clone());
            fs::write(&temp, b"half-written").unwrap();
            // guard drops here without a rename
        }

        assert_eq!(fs::read_to_string(&target).unwrap(), "stable");
        let strays: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(strays.is_empty());
    }
}
