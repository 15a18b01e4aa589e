//! # usbforge-detect
//!
//! USB disk discovery for the usbforge toolkit.
//!
//! This crate correlates several operating-system inventories (physical USB
//! disks, partitions, partition-to-volume associations, and logical volumes)
//! into a single [`Device`] record per disk, and resolves user-supplied
//! identifiers ("2", "E", "E:") back to a device.
//!
//! Enumeration goes through the [`SystemInventory`] trait so that the join
//! logic is independent of how the records are obtained; the default
//! provider shells out to PowerShell on Windows.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod enumerate;
pub mod inventory;

pub use enumerate::{Enumerator, CACHE_TTL};
pub use inventory::{
    DiskDriveRecord, LogicalVolumeRecord, PartitionLinkRecord, PartitionRecord,
    PowerShellInventory, SystemInventory,
};

/// Drive detection errors
#[derive(Error, Debug)]
pub enum DetectError {
    /// The primary USB-disk inventory query failed; enumeration cannot proceed
    #[error("failed to query USB disks: {0}")]
    QueryFailed(String),

    /// A disk number did not match any connected USB disk
    #[error("USB disk {0}: not found")]
    DiskNotFound(u32),

    /// A drive letter did not match any connected USB disk
    #[error("USB drive {0}: not found")]
    DriveNotFound(char),

    /// An identifier could not be parsed as a disk number or drive letter
    #[error("invalid drive letter: {0}")]
    InvalidDriveLetter(String),

    /// Command execution failed
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Failed to parse inventory output
    #[error("parse error: {0}")]
    ParseError(String),

    /// Inventory provider is not available on this platform
    #[error("not supported: {0}")]
    NotSupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for drive detection operations
pub type Result<T> = std::result::Result<T, DetectError>;

/// The unified view of one USB disk, joined from a single inventory snapshot.
///
/// Records are value types: freely cloned, immutable for the lifetime of the
/// snapshot they came from. Destructive operations (format, flash) invalidate
/// the snapshot; callers must re-enumerate afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// OS-assigned disk index; the primary key within a snapshot
    pub disk_number: u32,

    /// Mount point of the first lettered partition, e.g. `"E:"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_letter: Option<String>,

    /// Friendly name reported by the disk inventory
    pub friendly_name: String,

    /// Device model string
    pub model: String,

    /// Serial number (may be empty)
    pub serial_number: String,

    /// Total size in bytes
    pub size: u64,

    /// Human-formatted size, e.g. `"14.9 GB"`
    pub size_human: String,

    /// USB vendor id, 4 hex digits (empty when not reported)
    pub vendor_id: String,

    /// USB product id, 4 hex digits (empty when not reported)
    pub product_id: String,

    /// Filesystem of the first lettered volume (empty when none)
    pub file_system: String,

    /// Label of the first lettered volume (empty when none)
    pub volume_label: String,

    /// Partition table style, e.g. `"MBR"` / `"GPT"`
    pub partition_style: String,

    /// Disk health status
    pub health_status: String,

    /// Operational status, e.g. `"Online"` / `"No Media"`
    pub status: String,

    /// Media type string
    pub media_type: String,

    /// Always `"USB"` for devices produced by this crate
    pub bus_type: String,

    /// USB hub port location string (empty when not resolved)
    pub location_info: String,

    /// Instance id of the parent USB hub (empty when not resolved)
    pub parent_instance_id: String,
}

impl Device {
    /// The drive letter without its trailing colon, if one is assigned.
    pub fn drive_letter_char(&self) -> Option<char> {
        self.drive_letter
            .as_deref()
            .and_then(|s| s.chars().next())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.drive_letter {
            Some(letter) => write!(
                f,
                "disk {} ({}) {} {}",
                self.disk_number, letter, self.friendly_name, self.size_human
            ),
            None => write!(
                f,
                "disk {} {} {}",
                self.disk_number, self.friendly_name, self.size_human
            ),
        }
    }
}

/// Convert a byte count to a human-readable string using binary units.
pub fn format_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!(
        "{:.1} {}B",
        bytes as f64 / div as f64,
        ["K", "M", "G", "T", "P", "E"][exp]
    )
}

static VID_PID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"VID_([0-9A-Fa-f]{4})&PID_([0-9A-Fa-f]{4})").expect("static regex")
});

static PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Port[_# ]*(\d+)").expect("static regex"));

/// Extract the USB vendor and product ids from a PNP device path.
///
/// Example: `"USB\VID_0781&PID_5567\4C530001181205121531"` yields
/// `("0781", "5567")`. Returns two empty strings when the path does not
/// contain a `VID_xxxx&PID_xxxx` component.
pub fn parse_vid_pid(pnp_device_id: &str) -> (String, String) {
    match VID_PID_RE.captures(pnp_device_id) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => (String::new(), String::new()),
    }
}

/// Extract the numeric hub port from a location-info string.
///
/// Examples: `"Port_#0002.Hub_#0002"` yields `"2"`, `"Port #1"` yields
/// `"1"`. Leading zeros are stripped; an all-zero port stays `"0"`. Returns
/// an empty string when no port number is present.
pub fn parse_port_number(location_info: &str) -> String {
    let Some(caps) = PORT_RE.captures(location_info) else {
        return String::new();
    };
    let stripped = caps[1].trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
