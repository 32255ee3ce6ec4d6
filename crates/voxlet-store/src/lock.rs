//! Volume-scoped provisioning lock
//!
//! A lock file inside the artifact directory serializes concurrent
//! provisioning attempts, including across processes sharing the volume. The
//! file records the owner PID and acquisition time; a lock whose owner is dead
//! or whose age exceeds the staleness threshold is reclaimed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use voxlet_core::{VoxletError, VoxletResult};

/// Lock file name inside an artifact directory
pub const LOCK_FILE: &str = ".lock";

/// Contents of a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// PID of the owning process
    pub pid: u32,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

/// An exclusive provisioning lock over one artifact directory.
///
/// Released explicitly with [`ProvisionLock::release`]; dropping without
/// releasing removes the file best-effort so a panicking holder does not wedge
/// other callers until the staleness threshold.
pub struct ProvisionLock {
    path: PathBuf,
    released: bool,
}

impl ProvisionLock {
    /// Acquire the lock for `dir`, polling while a live lock is held.
    ///
    /// The wait is bounded: a lock older than `stale_after` is reclaimed
    /// regardless of its owner, so no caller polls longer than the staleness
    /// threshold plus one poll interval.
    pub async fn acquire(dir: &Path, stale_after: Duration, poll: Duration) -> VoxletResult<Self> {
        let path = dir.join(LOCK_FILE);

        loop {
            match try_create(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Acquired provisioning lock");
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path, stale_after) {
                        warn!(path = %path.display(), "Reclaiming stale provisioning lock");
                        // Another waiter may reclaim first; both outcomes loop back
                        // to the create attempt.
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    tokio::time::sleep(poll).await;
                }
                Err(e) => return Err(VoxletError::Io(e)),
            }
        }
    }

    /// Release the lock, removing its file
    pub fn release(mut self) -> VoxletResult<()> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VoxletError::Io(e)),
        }
    }
}

impl Drop for ProvisionLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Create the lock file atomically, failing if it already exists
fn try_create(path: &Path) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;

    let info = LockInfo {
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    let body = serde_json::to_vec(&info).unwrap_or_default();
    file.write_all(&body)?;
    Ok(())
}

/// Whether the lock at `path` may be reclaimed.
///
/// Stale when the owner process is dead, the age exceeds the threshold, or the
/// file is unreadable garbage. A vanished file counts as stale so the caller
/// loops straight back to the create attempt.
fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(_) => return true,
    };

    let info: LockInfo = match serde_json::from_slice(&content) {
        Ok(i) => i,
        Err(_) => return true,
    };

    let age = Utc::now().signed_duration_since(info.acquired_at);
    if age.num_milliseconds() < 0 {
        // Clock skew; treat a future timestamp as fresh
        return false;
    }
    if age.to_std().map(|a| a > stale_after).unwrap_or(true) {
        return true;
    }

    !owner_alive(info.pid)
}

#[cfg(unix)]
fn owner_alive(pid: u32) -> bool {
    use std::process::Command;

    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn owner_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProvisionLock::acquire(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert!(dir.path().join(LOCK_FILE).exists());
        lock.release().unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_drop_removes_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = ProvisionLock::acquire(
                dir.path(),
                Duration::from_secs(60),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
            assert!(dir.path().join(LOCK_FILE).exists());
        }
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);

        // A lock from a live process (this one) but past the staleness age
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now() - chrono::Duration::seconds(3600),
        };
        std::fs::write(&path, serde_json::to_vec(&info).unwrap()).unwrap();

        let lock = ProvisionLock::acquire(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        lock.release().unwrap();
    }

    #[tokio::test]
    async fn test_dead_owner_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);

        // Far beyond any real PID range, so the owner check reports dead
        let info = LockInfo {
            pid: u32::MAX,
            acquired_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&info).unwrap()).unwrap();

        let lock = ProvisionLock::acquire(
            dir.path(),
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        lock.release().unwrap();
    }

    #[tokio::test]
    async fn test_garbage_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), b"not json").unwrap();

        let lock = ProvisionLock::acquire(
            dir.path(),
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        lock.release().unwrap();
    }
}
