//! # usbforge-platform
//!
//! Raw device access and Windows storage adapters for the usbforge toolkit.
//!
//! This crate owns every direct interaction with the operating system's
//! storage stack: opening physical disks for unbuffered write-through I/O,
//! locking and dismounting volumes, formatting through diskpart, setting
//! volume labels, and ejecting drives.
//!
//! ## Safety
//!
//! Raw disk writes destroy data. Callers are expected to have resolved and
//! validated the target through `usbforge-detect` before constructing a
//! [`DiskWriter`].
//!
//! All Windows calls are `#[cfg(windows)]`-gated; on other hosts the same
//! API surface exists but returns [`PlatformError::NotSupported`], which
//! keeps the dependent crates testable anywhere.

#![warn(missing_docs)]
#![warn(clippy::all)]

use thiserror::Error;

pub mod buffer;
pub mod diskpart;
mod windows;

pub use buffer::{AlignedBuf, BufferPool, PooledBuf};
pub use windows::{
    eject_volume, has_elevated_privileges, set_volume_label, DiskWriter,
};

/// Sector alignment required for unbuffered disk I/O, in bytes.
pub const SECTOR_SIZE: usize = 4096;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device access denied (need elevated privileges)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Device is busy or locked by another process
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// Device not found
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Operation not supported on this platform
    #[error("not supported: {0}")]
    NotSupported(String),

    /// External command execution failed
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Offset or length not aligned for unbuffered I/O
    #[error("alignment error: {0}")]
    AlignmentError(String),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Positional I/O over a raw disk.
///
/// Both operations seek to the explicit offset first. Offsets and buffer
/// lengths must be multiples of [`SECTOR_SIZE`].
pub trait RawDisk: Send {
    /// Write `data` at `offset`. Returns the number of bytes written; a
    /// short count means the device accepted less than requested.
    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize>;

    /// Read into `buf` from `offset`. Returns the number of bytes read.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;
}

/// Round `size` up to the next sector boundary.
#[inline]
pub fn align_size(size: usize) -> usize {
    size.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
}

/// Check whether a value is sector-aligned.
#[inline]
pub fn is_aligned(value: u64) -> bool {
    value % SECTOR_SIZE as u64 == 0
}

/// Device-namespace path for a physical disk, e.g. `\\.\PhysicalDrive2`.
pub fn physical_drive_path(disk_number: u32) -> String {
    format!(r"\\.\PhysicalDrive{}", disk_number)
}

/// Device-namespace path for a volume, e.g. `\\.\E:`.
pub fn volume_path(drive_letter: char) -> String {
    format!(r"\\.\{}:", drive_letter)
}

// ============================================================================
// UNIT TESTS
// ============================================================================
