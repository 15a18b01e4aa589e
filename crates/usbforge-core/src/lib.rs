//! # usbforge-core
//!
//! The storage-operation engine behind the usbforge CLI.
//!
//! ## Modules
//!
//! - `source`: image sources (raw files, zip archives, gzip/xz/zstd
//!   streams, HTTP URLs) behind one lazy byte-stream interface
//! - `flash`: the write/verify pipeline with sector alignment, hashing,
//!   skip-on-equal writes, and throttled progress
//! - `format`: the diskpart-backed format pipeline with synthetic stages
//! - `executor`: parallel batches under a concurrency budget with an
//!   NDJSON event stream
//! - `lock`: per-disk cross-process advisory locks
//! - `diskspec`: the `"2,4-6,8"` disk list grammar
//! - `error`: error taxonomy and machine-readable error codes
//!
//! ## Example
//!
//! ```ignore
//! use usbforge_core::{FlashOptions, Flasher};
//! use std::sync::atomic::AtomicBool;
//!
//! let cancel = AtomicBool::new(false);
//! let (flasher, progress) = Flasher::new();
//! let mut opts = FlashOptions::new(2, "raspios.img.xz");
//! opts.verify = true;
//!
//! std::thread::spawn(move || {
//!     for update in progress {
//!         println!("{}% {}", update.percentage, update.speed);
//!     }
//! });
//! let report = flasher.flash(&opts, &cancel)?;
//! # Ok::<(), usbforge_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diskspec;
pub mod error;
pub mod executor;
pub mod flash;
pub mod format;
pub mod lock;
pub mod source;

pub use diskspec::{is_multi_disk_arg, parse_disks};
pub use error::{Error, ErrorCode, Result};
pub use executor::{
    format_duration, BatchResult, Executor, JobId, LabelOptions, Operation, OperationResult,
    ProgressEvent,
};
pub use flash::{
    buffer_size_bytes, ensure_fits, format_bytes, format_speed, FlashOptions, FlashReport,
    Flasher, Progress, Stage, Status, DEFAULT_BUFFER_MB, MAX_BUFFER_MB, MIN_BUFFER_MB,
};
pub use format::{validate_file_system, FormatOptions, FormatProgress, Formatter};
pub use lock::{DiskLock, BATCH_LOCK_WAIT, FLASH_LOCK_WAIT, FORMAT_LOCK_WAIT};
pub use source::Source;
