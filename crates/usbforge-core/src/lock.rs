//! Per-disk cross-process locks.
//!
//! Destructive operations on a disk are serialized across usbforge
//! processes through an advisory exclusive lock on a per-disk file in the
//! user's temporary directory. The lock file's only semantic content is
//! the OS lock on it; the files are transient.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Acquisition wait used by a standalone format (contends only with a
/// concurrent flash on the same disk).
pub const FORMAT_LOCK_WAIT: Duration = Duration::from_secs(1);

/// Acquisition wait used by a standalone flash.
pub const FLASH_LOCK_WAIT: Duration = Duration::from_secs(2);

/// Acquisition wait used per job by the parallel executor, where many
/// siblings may contend briefly during setup.
pub const BATCH_LOCK_WAIT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive cross-process lock on one disk.
///
/// The guard holds the lock file descriptor for the duration of the
/// destructive operation; dropping it on any exit path releases the lock.
#[derive(Debug)]
pub struct DiskLock {
    disk_number: u32,
    file: File,
}

impl DiskLock {
    /// Acquire the lock for `disk_number`, polling every 100 ms until it is
    /// held or `timeout` elapses.
    pub fn acquire(disk_number: u32, timeout: Duration) -> Result<Self> {
        let path = lock_path(disk_number)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Internal(format!("failed to create lock file: {}", e)))?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { disk_number, file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(Error::DiskBusy(disk_number));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(Error::Internal(format!("lock error: {}", e)));
                }
            }
        }
    }

    /// The disk this lock guards.
    pub fn disk_number(&self) -> u32 {
        self.disk_number
    }
}

impl Drop for DiskLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Deterministic lock-file path for a disk, creating the per-user lock
/// directory on first use.
fn lock_path(disk_number: u32) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join("usbforge-locks");
    std::fs::create_dir_all(&dir)
        .map_err(|e| Error::Internal(format!("failed to create lock directory: {}", e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
    }

    Ok(dir.join(format!("disk-{}.lock", disk_number)))
}

// ============================================================================
// UNIT TESTS
// ============================================================================
