//! Cooperative inter-process file locking.
//!
//! Acquisition creates a sidecar `<target>.lock` with `create_new`, which is
//! atomic on every platform we target. The sidecar records the holder's pid,
//! acquisition time, and operation so a contending process can decide whether
//! the lock is stale: older than [`STALE_AFTER`] or held by a pid that no
//! longer exists. Crash recovery needs no operator action.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Delay between acquisition attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);
/// Upper bound on how long acquisition will retry.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
/// Age past which a lock is considered stale regardless of its holder.
pub const STALE_AFTER: Duration = Duration::from_secs(30);

/// Metadata recorded inside the lock sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Pid of the holder.
    pub pid: u32,
    /// When the lock was taken.
    pub timestamp: DateTime<Utc>,
    /// What the holder is doing.
    pub operation: String,
}

impl LockInfo {
    fn current(operation: &str) -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now(),
            operation: operation.to_string(),
        }
    }

    /// Whether this lock may be broken.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.timestamp);
        if age.num_seconds() >= STALE_AFTER.as_secs() as i64 {
            return true;
        }
        !pid_alive(self.pid)
    }
}

/// Best-effort pid liveness check.
///
/// Only reliable on Linux via `/proc`; elsewhere the age check alone decides.
#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut path = target.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

/// A held lock; released on drop.
pub struct FileLock {
    lock_path: PathBuf,
    released: bool,
}

impl FileLock {
    /// Attempts a single acquisition without retrying.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the lock is held (and fresh) or on any
    /// filesystem failure.
    pub fn try_acquire(target: &Path, operation: &str) -> Result<Self> {
        let lock_path = lock_path_for(target);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io("create_lock_dir", e))?;
            }
        }

        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(mut file) => {
                let info = LockInfo::current(operation);
                let json = serde_json::to_string(&info)
                    .map_err(|e| Error::io("serialize_lock", e))?;
                file.write_all(json.as_bytes())
                    .map_err(|e| Error::io("write_lock", e))?;
                Ok(Self {
                    lock_path,
                    released: false,
                })
            },
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if Self::break_if_stale(&lock_path) {
                    return Self::try_acquire(target, operation);
                }
                Err(Error::io(
                    "acquire_lock",
                    format!("{} is held", lock_path.display()),
                ))
            },
            Err(e) => Err(Error::io("acquire_lock", e)),
        }
    }

    /// Acquires the lock, retrying on contention.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the bound elapses or on filesystem failure.
    pub fn acquire(target: &Path, operation: &str) -> Result<Self> {
        let start = Instant::now();
        loop {
            match Self::try_acquire(target, operation) {
                Ok(lock) => return Ok(lock),
                Err(_) if start.elapsed() < ACQUIRE_TIMEOUT => {
                    std::thread::sleep(RETRY_DELAY);
                },
                Err(_) => {
                    return Err(Error::io(
                        "acquire_lock",
                        format!(
                            "could not lock {} within {}s",
                            target.display(),
                            ACQUIRE_TIMEOUT.as_secs()
                        ),
                    ));
                },
            }
        }
    }

    /// Removes a stale sidecar. Returns true when removal happened.
    fn break_if_stale(lock_path: &Path) -> bool {
        let stale = match std::fs::read_to_string(lock_path) {
            Ok(contents) => match serde_json::from_str::<LockInfo>(&contents) {
                Ok(info) => info.is_stale(Utc::now()),
                // Unreadable metadata: only break once the file itself is old.
                Err(_) => file_older_than(lock_path, STALE_AFTER),
            },
            Err(_) => false,
        };

        if stale {
            tracing::warn!(lock = %lock_path.display(), "breaking stale lock");
            std::fs::remove_file(lock_path).is_ok()
        } else {
            false
        }
    }

    fn release(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
            self.released = true;
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn file_older_than(path: &Path, age: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|elapsed| elapsed >= age)
}

/// Runs `action` while holding the lock on `target`.
///
/// The lock is released on all exit paths, including failure of `action`.
///
/// # Errors
///
/// Returns the acquisition error or whatever `action` returns.
pub fn with_lock<T>(
    target: &Path,
    operation: &str,
    action: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let _lock = FileLock::acquire(target, operation)?;
    action()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_metadata_and_releases() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("playbook.yaml");

        let lock = FileLock::try_acquire(&target, "curate").unwrap();
        let sidecar = lock_path_for(&target);
        assert!(sidecar.exists());

        let info: LockInfo =
            serde_json::from_str(&std::fs::read_to_string(&sidecar).unwrap()).unwrap();
        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.operation, "curate");

        drop(lock);
        assert!(!sidecar.exists());
    }

    #[test]
    fn test_contention_fails_fast_without_retry() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("playbook.yaml");

        let _held = FileLock::try_acquire(&target, "curate").unwrap();
        assert!(FileLock::try_acquire(&target, "curate").is_err());
    }

    #[test]
    fn test_stale_lock_with_dead_pid_is_broken() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("playbook.yaml");
        let sidecar = lock_path_for(&target);

        // Ancient lock held by a pid that cannot exist.
        let info = LockInfo {
            pid: u32::MAX - 1,
            timestamp: Utc::now() - chrono::Duration::minutes(5),
            operation: "crashed".to_string(),
        };
        std::fs::write(&sidecar, serde_json::to_string(&info).unwrap()).unwrap();

        let lock = FileLock::try_acquire(&target, "recover").unwrap();
        drop(lock);
        assert!(!sidecar.exists());
    }

    #[test]
    fn test_fresh_lock_from_live_pid_is_respected() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("playbook.yaml");
        let sidecar = lock_path_for(&target);

        let info = LockInfo {
            pid: std::process::id(),
            timestamp: Utc::now(),
            operation: "busy".to_string(),
        };
        std::fs::write(&sidecar, serde_json::to_string(&info).unwrap()).unwrap();

        assert!(FileLock::try_acquire(&target, "wait").is_err());
    }

    #[test]
    fn test_with_lock_releases_on_failure() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("playbook.yaml");

        let result: Result<()> = with_lock(&target, "curate", || {
            Err(Error::Validation("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(!lock_path_for(&target).exists());

        // Lock is free again.
        let lock = FileLock::try_acquire(&target, "next").unwrap();
        drop(lock);
    }

    #[test]
    fn test_lock_info_staleness_by_age() {
        let info = LockInfo {
            pid: std::process::id(),
            timestamp: Utc::now() - chrono::Duration::seconds(31),
            operation: "slow".to_string(),
        };
        assert!(info.is_stale(Utc::now()));

        let fresh = LockInfo::current("fast");
        assert!(!fresh.is_stale(Utc::now()));
    }
}
