//! Format pipeline.
//!
//! The format itself is an opaque external operation (a diskpart script);
//! this module validates the options, drives the adapter, and emits
//! synthetic progress stages keyed off diskpart's output markers so the UI
//! has something to show.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::flash::Status;

/// Recognized configuration for a format job.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Target disk number
    pub disk_number: u32,

    /// Filesystem: `fat32`, `ntfs`, or `exfat` (case-insensitive)
    pub file_system: String,

    /// Volume label; empty defaults to `"USB"`
    pub label: String,

    /// Quick format; a full format otherwise
    pub quick: bool,
}

impl FormatOptions {
    /// Options for formatting `disk_number`, defaulting to a quick FAT32
    /// format labeled `"USB"`.
    pub fn new(disk_number: u32) -> Self {
        Self {
            disk_number,
            file_system: "fat32".to_string(),
            label: "USB".to_string(),
            quick: true,
        }
    }
}

/// Reject filesystems the format operation does not support.
pub fn validate_file_system(file_system: &str) -> Result<()> {
    match file_system.to_lowercase().as_str() {
        "fat32" | "ntfs" | "exfat" => Ok(()),
        other => Err(Error::InvalidInput(format!(
            "unsupported filesystem: {} (supported: fat32, ntfs, exfat)",
            other
        ))),
    }
}

/// One progress record for a format job.
#[derive(Debug, Clone, Serialize)]
pub struct FormatProgress {
    /// Drive letter assigned by the format, known only in the terminal
    /// event
    #[serde(skip_serializing_if = "String::is_empty")]
    pub drive: String,

    /// Target disk number
    #[serde(rename = "diskNumber")]
    pub disk_number: u32,

    /// Synthetic stage name
    pub stage: String,

    /// Synthetic completion percentage
    pub percentage: u8,

    /// Job status
    pub status: Status,

    /// Error message, present on error termination
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Synthetic stage names surfaced while diskpart runs.
pub mod stage {
    /// Wiping the partition table
    pub const CLEANING: &str = "Cleaning disk";
    /// Creating the single primary partition
    pub const CREATING_PARTITION: &str = "Creating partition";
    /// Running the filesystem format
    pub const FORMATTING: &str = "Formatting";
    /// Waiting for the mount point
    pub const ASSIGNING_LETTER: &str = "Assigning drive letter";
    /// Terminal success
    pub const COMPLETE: &str = "Complete";
}

/// Drives format jobs and publishes their progress.
pub struct Formatter {
    progress_tx: SyncSender<FormatProgress>,
}

impl Formatter {
    /// Create a formatter and the receiving end of its progress stream.
    /// Sends never block; lagging receivers miss intermediate updates.
    pub fn new() -> (Self, Receiver<FormatProgress>) {
        let (progress_tx, progress_rx) = sync_channel(10);
        (Self { progress_tx }, progress_rx)
    }

    /// Format a disk per `opts`. Returns the drive letter assigned to the
    /// new volume when it could be determined.
    pub fn format(&self, opts: &FormatOptions, cancel: &AtomicBool) -> Result<Option<String>> {
        if let Err(e) = validate_file_system(&opts.file_system) {
            self.send_error(opts, e.to_string());
            return Err(e);
        }

        let script = usbforge_platform::diskpart::generate_script(
            opts.disk_number,
            &opts.file_system,
            &opts.label,
            opts.quick,
        );

        self.send_progress(opts, stage::CLEANING, 10);

        let run = usbforge_platform::diskpart::run(&script, cancel, |line| {
            self.advance_for_output_line(opts, line);
        });
        if let Err(e) = run {
            let e = match e {
                usbforge_platform::PlatformError::Cancelled => Error::Cancelled,
                other => Error::FormatFailed(other.to_string()),
            };
            self.send_error(opts, e.to_string());
            return Err(e);
        }

        // Give the mount manager a moment to assign the letter, then ask
        // the inventory. Best-effort: the format already succeeded.
        std::thread::sleep(Duration::from_millis(500));
        let drive_letter = assigned_drive_letter(opts.disk_number);

        self.send_complete(opts, drive_letter.clone().unwrap_or_default());
        Ok(drive_letter)
    }

    /// Map diskpart output markers to synthetic progress stages.
    fn advance_for_output_line(&self, opts: &FormatOptions, line: &str) {
        let lower = line.to_lowercase();
        if lower.contains("diskpart succeeded in cleaning") {
            self.send_progress(opts, stage::CREATING_PARTITION, 30);
        } else if lower.contains("diskpart succeeded in creating") {
            self.send_progress(opts, stage::FORMATTING, 50);
        } else if lower.contains("percent complete") {
            self.send_progress(opts, stage::FORMATTING, 60);
        } else if lower.contains("format complete") {
            self.send_progress(opts, stage::ASSIGNING_LETTER, 90);
        } else if lower.contains("diskpart assigned") {
            self.send_progress(opts, stage::COMPLETE, 100);
        }
    }

    fn send_progress(&self, opts: &FormatOptions, stage: &str, percentage: u8) {
        let _ = self.progress_tx.try_send(FormatProgress {
            drive: String::new(),
            disk_number: opts.disk_number,
            stage: stage.to_string(),
            percentage,
            status: Status::InProgress,
            error: String::new(),
        });
    }

    fn send_error(&self, opts: &FormatOptions, error: String) {
        let _ = self.progress_tx.try_send(FormatProgress {
            drive: String::new(),
            disk_number: opts.disk_number,
            stage: "Error".to_string(),
            percentage: 0,
            status: Status::Error,
            error,
        });
    }

    fn send_complete(&self, opts: &FormatOptions, drive: String) {
        let _ = self.progress_tx.try_send(FormatProgress {
            drive,
            disk_number: opts.disk_number,
            stage: stage::COMPLETE.to_string(),
            percentage: 100,
            status: Status::Complete,
            error: String::new(),
        });
    }
}

/// First drive letter mounted on the freshly formatted disk, with colon.
fn assigned_drive_letter(disk_number: u32) -> Option<String> {
    usbforge_detect::Enumerator::new()
        .volume_letters(disk_number)
        .ok()
        .and_then(|letters| letters.first().copied())
        .map(|letter| format!("{}:", letter))
}

// ============================================================================
// UNIT TESTS
// ============================================================================
