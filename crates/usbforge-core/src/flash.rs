//! Flash pipeline: streams an image source onto a raw disk.
//!
//! The write loop feeds sector-aligned buffers from a [`Source`] into a
//! [`RawDisk`], with optional SHA-256 hashing of the source bytes, optional
//! skip-on-equal writes, and an optional read-back verification pass.
//! Progress is reported over a bounded channel and throttled to one update
//! per 100 ms.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use usbforge_platform::{align_size, BufferPool, DiskWriter, RawDisk};

use crate::error::{Error, Result};
use crate::source::Source;

/// Default I/O buffer size in megabytes.
pub const DEFAULT_BUFFER_MB: u32 = 4;

/// Smallest accepted I/O buffer, in megabytes.
pub const MIN_BUFFER_MB: u32 = 1;

/// Largest accepted I/O buffer, in megabytes.
pub const MAX_BUFFER_MB: u32 = 64;

/// Minimum interval between progress emissions.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Pipeline stage reported in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    /// Streaming source bytes onto the disk
    Writing,
    /// Reading the disk back and comparing against the source
    Verifying,
    /// Terminal success
    Complete,
    /// Terminal failure
    Error,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Writing => f.write_str("Writing"),
            Stage::Verifying => f.write_str("Verifying"),
            Stage::Complete => f.write_str("Complete"),
            Stage::Error => f.write_str("Error"),
        }
    }
}

/// Job status reported in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// The stage is still running
    #[serde(rename = "in_progress")]
    InProgress,
    /// The job finished successfully
    #[serde(rename = "complete")]
    Complete,
    /// The job failed
    #[serde(rename = "error")]
    Error,
}

/// One progress record for a flash job.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    /// Current pipeline stage
    pub stage: Stage,

    /// Completion percentage, clamped to 100
    pub percentage: u8,

    /// Bytes written (or verified) so far
    pub bytes_written: u64,

    /// Declared total size of the source
    pub total_bytes: u64,

    /// Human-formatted transfer rate, empty until measurable
    pub speed: String,

    /// Job status
    pub status: Status,

    /// Error message, present on error termination
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,

    /// Hex SHA-256 of the source bytes, present in the terminal event when
    /// hashing was requested
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hash: String,

    /// Bytes skipped by the unchanged-region optimization
    #[serde(skip_serializing_if = "is_zero")]
    pub bytes_skipped: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Recognized configuration for a flash job.
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Target disk number
    pub disk_number: u32,

    /// Local filesystem path or HTTP(S) URL of the image
    pub image_path: String,

    /// Re-read the disk after writing and compare against the source
    pub verify: bool,

    /// I/O buffer size in megabytes, 1..=64
    pub buffer_size_mb: u32,

    /// Stream a SHA-256 over the source bytes fed to the writer
    pub calculate_hash: bool,

    /// Read each target region first and skip the write when it already
    /// matches the source
    pub skip_unchanged: bool,

    /// Known drive letter, bypassing the inventory lookup when locking
    /// volumes
    pub drive_letter: Option<char>,
}

impl FlashOptions {
    /// Options for flashing `image_path` onto `disk_number`, with defaults
    /// for everything else.
    pub fn new(disk_number: u32, image_path: impl Into<String>) -> Self {
        Self {
            disk_number,
            image_path: image_path.into(),
            verify: false,
            buffer_size_mb: DEFAULT_BUFFER_MB,
            calculate_hash: false,
            skip_unchanged: false,
            drive_letter: None,
        }
    }
}

/// Outcome of a successful flash job.
#[derive(Debug, Clone)]
pub struct FlashReport {
    /// Hex SHA-256 of the source stream, when hashing was requested
    pub hash: Option<String>,

    /// Bytes skipped by the unchanged-region optimization
    pub bytes_skipped: u64,

    /// Declared total size that progress was reported against
    pub total_bytes: u64,
}

/// Validate a buffer size in megabytes and convert it to bytes.
pub fn buffer_size_bytes(buffer_size_mb: u32) -> Result<usize> {
    if !(MIN_BUFFER_MB..=MAX_BUFFER_MB).contains(&buffer_size_mb) {
        return Err(Error::InvalidInput(format!(
            "buffer size must be between {}M and {}M (got {}M)",
            MIN_BUFFER_MB, MAX_BUFFER_MB, buffer_size_mb
        )));
    }
    Ok(buffer_size_mb as usize * 1024 * 1024)
}

/// Reject a source that cannot fit on the target device.
pub fn ensure_fits(image_size: u64, device_size: u64) -> Result<()> {
    if image_size > device_size {
        return Err(Error::InvalidInput(format!(
            "image ({}) is larger than device ({})",
            format_bytes(image_size),
            format_bytes(device_size)
        )));
    }
    Ok(())
}

/// Drives flash jobs and publishes their progress.
pub struct Flasher {
    progress_tx: SyncSender<Progress>,
}

impl Flasher {
    /// Create a flasher and the receiving end of its progress stream.
    ///
    /// The channel is bounded and sends never block: when the receiver lags
    /// (or was dropped, as the parallel executor does), updates are
    /// discarded rather than stalling the write loop.
    pub fn new() -> (Self, Receiver<Progress>) {
        let (progress_tx, progress_rx) = sync_channel(10);
        (Self { progress_tx }, progress_rx)
    }

    /// Write an image to a disk per `opts`, observing `cancel` between
    /// buffers. Returns the hash/skip statistics on success.
    pub fn flash(&self, opts: &FlashOptions, cancel: &AtomicBool) -> Result<FlashReport> {
        let mut source = match Source::open(&opts.image_path) {
            Ok(source) => source,
            Err(e) => {
                self.send_error(e.to_string());
                return Err(e);
            }
        };

        let total_bytes = source.size();
        self.send_progress(Stage::Writing, 0, 0, total_bytes, String::new());

        let mut writer = match opts.drive_letter {
            Some(letter) => DiskWriter::with_drive_letter(opts.disk_number, letter),
            None => DiskWriter::new(opts.disk_number),
        };
        if let Err(e) = writer.open() {
            let e = Error::from(e);
            self.send_error(e.to_string());
            return Err(e);
        }

        let result = self.run_pipeline(opts, &mut source, &mut writer, total_bytes, cancel);

        // Volumes are released (and the OS may remount) before the terminal
        // event goes out.
        writer.close();

        let (hash, bytes_skipped) = result?;
        self.send_complete(total_bytes, hash.clone().unwrap_or_default(), bytes_skipped);

        Ok(FlashReport {
            hash,
            bytes_skipped,
            total_bytes,
        })
    }

    fn run_pipeline<D: RawDisk>(
        &self,
        opts: &FlashOptions,
        source: &mut Source,
        disk: &mut D,
        total_bytes: u64,
        cancel: &AtomicBool,
    ) -> Result<(Option<String>, u64)> {
        let stats = self.write_image(opts, source, disk, total_bytes, cancel)?;

        if opts.verify {
            // Sources are one-shot; verification reopens from scratch.
            let mut verify_source = match Source::open(&opts.image_path) {
                Ok(source) => source,
                Err(e) => {
                    self.send_error(format!("verify: failed to reopen source: {}", e));
                    return Err(e);
                }
            };
            self.verify_image(opts, &mut verify_source, disk, total_bytes, cancel)?;
        }

        Ok(stats)
    }

    /// The write loop. Generic over the disk so it can run against an
    /// in-memory device in tests.
    fn write_image<R: Read, D: RawDisk>(
        &self,
        opts: &FlashOptions,
        source: &mut R,
        disk: &mut D,
        total_bytes: u64,
        cancel: &AtomicBool,
    ) -> Result<(Option<String>, u64)> {
        let buf_size = buffer_size_bytes(opts.buffer_size_mb)?;

        let pool = BufferPool::global();
        let mut buffer = pool.get(buf_size);
        let mut compare_buffer = opts.skip_unchanged.then(|| pool.get(buf_size));

        let mut hasher = opts.calculate_hash.then(Sha256::new);

        let mut offset: u64 = 0;
        let mut bytes_skipped: u64 = 0;
        let start = Instant::now();
        let mut last_update = start;

        loop {
            if cancel.load(Ordering::SeqCst) {
                self.send_error("operation cancelled".to_string());
                return Err(Error::Cancelled);
            }

            // Filling the whole buffer keeps every write offset aligned:
            // only the final chunk may be short.
            let n = match read_exact_or_eof(source, &mut buffer) {
                Ok(n) => n,
                Err(e) => {
                    self.send_error(format!("read error: {}", e));
                    return Err(Error::Io(e));
                }
            };
            if n == 0 {
                break;
            }

            // Hash exactly the source bytes, never the padding
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buffer[..n]);
            }

            let write_size = align_size(n);
            buffer[n..write_size].fill(0);

            let mut should_write = true;
            if let Some(compare) = compare_buffer.as_mut() {
                if let Ok(read) = disk.read_at(&mut compare[..write_size], offset) {
                    if read >= n && buffer[..n] == compare[..n] {
                        should_write = false;
                        bytes_skipped += n as u64;
                    }
                }
            }

            if should_write {
                let written = match disk.write_at(&buffer[..write_size], offset) {
                    Ok(written) => written,
                    Err(e) => {
                        self.send_error(format!("write error at offset {}: {}", offset, e));
                        return Err(Error::from(e));
                    }
                };
                // A short write means the device accepted less than a full
                // buffer; accept the actual bytes and stop.
                if written < write_size {
                    offset += n as u64;
                    break;
                }
            }

            offset += n as u64;

            let now = Instant::now();
            if now.duration_since(last_update) >= PROGRESS_INTERVAL {
                last_update = now;
                self.send_progress(
                    Stage::Writing,
                    percentage(offset, total_bytes),
                    offset,
                    total_bytes,
                    speed_since(start, offset),
                );
            }
        }

        let hash = hasher.map(|h| format!("{:x}", h.finalize()));
        Ok((hash, bytes_skipped))
    }

    /// The verify loop: re-reads the source and the disk in step and
    /// compares the actual-data prefixes, never the padding.
    fn verify_image<R: Read, D: RawDisk>(
        &self,
        opts: &FlashOptions,
        source: &mut R,
        disk: &mut D,
        total_bytes: u64,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let buf_size = buffer_size_bytes(opts.buffer_size_mb)?;

        let pool = BufferPool::global();
        let mut source_buffer = pool.get(buf_size);
        let mut disk_buffer = pool.get(buf_size);

        let mut verified: u64 = 0;
        let start = Instant::now();
        let mut last_update = start;

        self.send_progress(Stage::Verifying, 0, 0, total_bytes, String::new());

        loop {
            if cancel.load(Ordering::SeqCst) {
                self.send_error("verification cancelled".to_string());
                return Err(Error::Cancelled);
            }

            let n = match read_exact_or_eof(source, &mut source_buffer) {
                Ok(n) => n,
                Err(e) => {
                    self.send_error(format!("verify: read source error: {}", e));
                    return Err(Error::Io(e));
                }
            };
            if n == 0 {
                break;
            }

            let read_size = align_size(n);
            if let Err(e) = disk.read_at(&mut disk_buffer[..read_size], verified) {
                self.send_error(format!(
                    "verify: read disk error at offset {}: {}",
                    verified, e
                ));
                return Err(Error::from(e));
            }

            if source_buffer[..n] != disk_buffer[..n] {
                let e = Error::VerifyMismatch(verified);
                self.send_error(e.to_string());
                return Err(e);
            }

            verified += n as u64;

            let now = Instant::now();
            if now.duration_since(last_update) >= PROGRESS_INTERVAL {
                last_update = now;
                self.send_progress(
                    Stage::Verifying,
                    percentage(verified, total_bytes),
                    verified,
                    total_bytes,
                    speed_since(start, verified),
                );
            }
        }

        Ok(())
    }

    fn send_progress(
        &self,
        stage: Stage,
        percentage: u8,
        bytes_written: u64,
        total_bytes: u64,
        speed: String,
    ) {
        let _ = self.progress_tx.try_send(Progress {
            stage,
            percentage,
            bytes_written,
            total_bytes,
            speed,
            status: Status::InProgress,
            error: String::new(),
            hash: String::new(),
            bytes_skipped: 0,
        });
    }

    fn send_error(&self, error: String) {
        let _ = self.progress_tx.try_send(Progress {
            stage: Stage::Error,
            percentage: 0,
            bytes_written: 0,
            total_bytes: 0,
            speed: String::new(),
            status: Status::Error,
            error,
            hash: String::new(),
            bytes_skipped: 0,
        });
    }

    fn send_complete(&self, total_bytes: u64, hash: String, bytes_skipped: u64) {
        let _ = self.progress_tx.try_send(Progress {
            stage: Stage::Complete,
            percentage: 100,
            bytes_written: total_bytes,
            total_bytes,
            speed: String::new(),
            status: Status::Complete,
            error: String::new(),
            hash,
            bytes_skipped,
        });
    }
}

/// Completion percentage clamped to 100; the total may have been an
/// estimate for compressed sources.
fn percentage(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.saturating_mul(100)) / total).min(100) as u8
}

fn speed_since(start: Instant, bytes: u64) -> String {
    let elapsed = start.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        format_speed(bytes as f64 / elapsed)
    } else {
        String::new()
    }
}

/// Read until the buffer is full or the stream ends.
fn read_exact_or_eof<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buffer.len() {
        match reader.read(&mut buffer[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Format a transfer rate for display.
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes_per_sec >= GB {
        format!("{:.1} GB/s", bytes_per_sec / GB)
    } else if bytes_per_sec >= MB {
        format!("{:.1} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.1} KB/s", bytes_per_sec / KB)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}

/// Format a byte count for display.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use usbforge_platform::{PlatformError, SECTOR_SIZE};

    /// In-memory disk with sector-aligned positional I/O.
    struct MemDisk {
        data: Vec<u8>,
        writes: AtomicUsize,
        short_write_after: Option<usize>,
    }

    impl MemDisk {
        fn new(len: usize) -> Self {
            Self {
                data: vec![0u8; len],
                writes: AtomicUsize::new(0),
                short_write_after: None,
            }
        }
    }

    impl RawDisk for MemDisk {
        fn write_at(&mut self, data: &[u8], offset: u64) -> usbforge_platform::Result<usize> {
            assert_eq!(offset % SECTOR_SIZE as u64, 0, "unaligned write offset");
            assert_eq!(data.len() % SECTOR_SIZE, 0, "unaligned write length");

            let count = self.writes.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.short_write_after {
                if count >= limit {
                    return Ok(data.len().saturating_sub(SECTOR_SIZE));
                }
            }

            let offset = offset as usize;
            if offset + data.len() > self.data.len() {
                return Err(PlatformError::Io(std::io::Error::other("past end of disk")));
            }
            self.data[offset..offset + data.len()].copy_from_slice(data);
            Ok(data.len())
        }

        fn read_at(&mut self, buf: &mut [u8], offset: u64) -> usbforge_platform::Result<usize> {
            assert_eq!(offset % SECTOR_SIZE as u64, 0, "unaligned read offset");
            assert_eq!(buf.len() % SECTOR_SIZE, 0, "unaligned read length");

            let offset = offset as usize;
            if offset + buf.len() > self.data.len() {
                return Err(PlatformError::Io(std::io::Error::other("past end of disk")));
            }
            buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
            Ok(buf.len())
        }
    }

    fn image_file(dir: &TempDir, name: &str, data: &[u8]) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(data).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    fn test_options(image: &str) -> FlashOptions {
        FlashOptions::new(0, image)
    }

    fn write_to_mem_disk(
        opts: &FlashOptions,
        data: &[u8],
        disk: &mut MemDisk,
    ) -> Result<(Option<String>, u64)> {
        let (flasher, _progress) = Flasher::new();
        let cancel = AtomicBool::new(false);
        let mut source = std::io::Cursor::new(data.to_vec());
        flasher.write_image(opts, &mut source, disk, data.len() as u64, &cancel)
    }

    // -------------------------------------------------------------------------
    // Write loop tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_write_image_copies_data() {
        let data = patterned(3 * SECTOR_SIZE + 123);
        let mut disk = MemDisk::new(1024 * 1024);
        let dir = TempDir::new().unwrap();
        let opts = test_options(&image_file(&dir, "a.img", &data));

        let (hash, skipped) = write_to_mem_disk(&opts, &data, &mut disk).unwrap();
        assert_eq!(hash, None);
        assert_eq!(skipped, 0);
        assert_eq!(&disk.data[..data.len()], &data[..]);
        // Padding past the data is zero
        assert!(disk.data[data.len()..align_size(data.len())]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn test_write_image_hash_covers_exact_source_bytes() {
        // Unaligned length forces padding; the hash must not include it
        let data = patterned(SECTOR_SIZE + 57);
        let mut disk = MemDisk::new(1024 * 1024);
        let dir = TempDir::new().unwrap();
        let mut opts = test_options(&image_file(&dir, "b.img", &data));
        opts.calculate_hash = true;

        let (hash, _) = write_to_mem_disk(&opts, &data, &mut disk).unwrap();

        let expected = format!("{:x}", Sha256::digest(&data));
        assert_eq!(hash.unwrap(), expected);
    }

    #[test]
    fn test_write_image_skip_unchanged() {
        let data = patterned(4 * SECTOR_SIZE);
        let mut disk = MemDisk::new(1024 * 1024);
        // Pre-write the image so every region already matches
        disk.data[..data.len()].copy_from_slice(&data);

        let dir = TempDir::new().unwrap();
        let mut opts = test_options(&image_file(&dir, "c.img", &data));
        opts.skip_unchanged = true;

        let (_, skipped) = write_to_mem_disk(&opts, &data, &mut disk).unwrap();
        assert_eq!(skipped, data.len() as u64);
        assert_eq!(disk.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_write_image_skip_unchanged_partial() {
        let buffer_bytes = (DEFAULT_BUFFER_MB as usize) * 1024 * 1024;
        let data = patterned(buffer_bytes + 2 * SECTOR_SIZE);
        let mut disk = MemDisk::new(8 * 1024 * 1024);
        // Only the first buffer's worth matches; the tail differs
        disk.data[..buffer_bytes].copy_from_slice(&data[..buffer_bytes]);

        let dir = TempDir::new().unwrap();
        let mut opts = test_options(&image_file(&dir, "d.img", &data));
        opts.skip_unchanged = true;

        let (_, skipped) = write_to_mem_disk(&opts, &data, &mut disk).unwrap();
        assert_eq!(skipped, buffer_bytes as u64);
        assert_eq!(&disk.data[..data.len()], &data[..]);
    }

    #[test]
    fn test_skip_unchanged_accounting_invariant() {
        // bytes written to disk + bytes skipped == source size
        let buffer_bytes = (DEFAULT_BUFFER_MB as usize) * 1024 * 1024;
        let data = patterned(buffer_bytes + 3 * SECTOR_SIZE + 100);
        let mut disk = MemDisk::new(8 * 1024 * 1024);
        disk.data[..buffer_bytes].copy_from_slice(&data[..buffer_bytes]);

        let dir = TempDir::new().unwrap();
        let mut opts = test_options(&image_file(&dir, "e.img", &data));
        opts.skip_unchanged = true;

        let (_, skipped) = write_to_mem_disk(&opts, &data, &mut disk).unwrap();
        let written = data.len() as u64 - skipped;
        assert_eq!(written + skipped, data.len() as u64);
        assert_eq!(skipped, buffer_bytes as u64);
    }

    #[test]
    fn test_write_image_empty_source_is_successful() {
        let mut disk = MemDisk::new(1024 * 1024);
        let dir = TempDir::new().unwrap();
        let opts = test_options(&image_file(&dir, "f.img", b"x"));

        let (flasher, _progress) = Flasher::new();
        let cancel = AtomicBool::new(false);
        let mut source = std::io::Cursor::new(Vec::<u8>::new());
        let (hash, skipped) = flasher
            .write_image(&opts, &mut source, &mut disk, 0, &cancel)
            .unwrap();
        assert_eq!(hash, None);
        assert_eq!(skipped, 0);
        assert_eq!(disk.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_write_image_cancelled_before_first_buffer() {
        let data = patterned(SECTOR_SIZE);
        let mut disk = MemDisk::new(1024 * 1024);
        let dir = TempDir::new().unwrap();
        let opts = test_options(&image_file(&dir, "g.img", &data));

        let (flasher, progress) = Flasher::new();
        let cancel = AtomicBool::new(true);
        let mut source = std::io::Cursor::new(data);
        let result = flasher.write_image(&opts, &mut source, &mut disk, 4096, &cancel);

        assert!(matches!(result, Err(Error::Cancelled)));
        let events: Vec<Progress> = progress.try_iter().collect();
        assert!(events
            .iter()
            .any(|p| p.status == Status::Error && p.error == "operation cancelled"));
    }

    #[test]
    fn test_write_image_short_write_accepts_and_stops() {
        let data = patterned(8 * SECTOR_SIZE);
        let mut disk = MemDisk::new(1024 * 1024);
        disk.short_write_after = Some(0);
        let dir = TempDir::new().unwrap();
        let opts = test_options(&image_file(&dir, "h.img", &data));

        // The loop terminates without error on a short write
        let (_, skipped) = write_to_mem_disk(&opts, &data, &mut disk).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(disk.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffer_size_bounds() {
        assert!(buffer_size_bytes(0).is_err());
        assert!(buffer_size_bytes(65).is_err());
        assert_eq!(buffer_size_bytes(1).unwrap(), 1024 * 1024);
        assert_eq!(buffer_size_bytes(64).unwrap(), 64 * 1024 * 1024);

        let err = buffer_size_bytes(65).unwrap_err();
        assert_eq!(
            err.to_string(),
            "buffer size must be between 1M and 64M (got 65M)"
        );
    }

    #[test]
    fn test_ensure_fits() {
        assert!(ensure_fits(100, 100).is_ok());
        assert!(ensure_fits(99, 100).is_ok());

        let err = ensure_fits(2 * 1024 * 1024 * 1024, 1024 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("larger than device"));
    }

    // -------------------------------------------------------------------------
    // Verify loop tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_verify_image_matches() {
        let data = patterned(2 * SECTOR_SIZE + 17);
        let mut disk = MemDisk::new(1024 * 1024);
        let dir = TempDir::new().unwrap();
        let opts = test_options(&image_file(&dir, "i.img", &data));

        write_to_mem_disk(&opts, &data, &mut disk).unwrap();

        let (flasher, _progress) = Flasher::new();
        let cancel = AtomicBool::new(false);
        let mut source = std::io::Cursor::new(data.clone());
        flasher
            .verify_image(&opts, &mut source, &mut disk, data.len() as u64, &cancel)
            .unwrap();
    }

    #[test]
    fn test_verify_image_detects_clobbered_byte_at_offset_zero() {
        // Flash a 4096-byte source, then clobber byte 0 on the disk
        let mut data = patterned(SECTOR_SIZE);
        data[0] = 0x00;
        let mut disk = MemDisk::new(1024 * 1024);
        let dir = TempDir::new().unwrap();
        let opts = test_options(&image_file(&dir, "j.img", &data));

        write_to_mem_disk(&opts, &data, &mut disk).unwrap();
        disk.data[0] = 0xFF;

        let (flasher, progress) = Flasher::new();
        let cancel = AtomicBool::new(false);
        let mut source = std::io::Cursor::new(data.clone());
        let result =
            flasher.verify_image(&opts, &mut source, &mut disk, data.len() as u64, &cancel);

        assert!(matches!(result, Err(Error::VerifyMismatch(0))));
        let events: Vec<Progress> = progress.try_iter().collect();
        let error_event = events
            .iter()
            .find(|p| p.status == Status::Error)
            .expect("error event");
        assert_eq!(error_event.error, "verify: data mismatch at offset 0");
    }

    #[test]
    fn test_verify_image_ignores_padding_region() {
        // Data ends mid-sector; garbage in the padding region on disk must
        // not fail verification
        let data = patterned(SECTOR_SIZE + 100);
        let mut disk = MemDisk::new(1024 * 1024);
        let dir = TempDir::new().unwrap();
        let opts = test_options(&image_file(&dir, "k.img", &data));

        write_to_mem_disk(&opts, &data, &mut disk).unwrap();
        // Clobber bytes in the padding tail
        for b in &mut disk.data[data.len()..align_size(data.len())] {
            *b = 0xEE;
        }

        let (flasher, _progress) = Flasher::new();
        let cancel = AtomicBool::new(false);
        let mut source = std::io::Cursor::new(data.clone());
        flasher
            .verify_image(&opts, &mut source, &mut disk, data.len() as u64, &cancel)
            .unwrap();
    }

    // -------------------------------------------------------------------------
    // Percentage and formatting tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_percentage_clamped_for_estimated_totals() {
        assert_eq!(percentage(0, 1000), 0);
        assert_eq!(percentage(500, 1000), 50);
        assert_eq!(percentage(1000, 1000), 100);
        // Estimated totals can be exceeded; the UI must never see > 100
        assert_eq!(percentage(1500, 1000), 100);
        assert_eq!(percentage(1, 0), 100);
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(512.0), "512 B/s");
        assert_eq!(format_speed(1024.0), "1.0 KB/s");
        assert_eq!(format_speed(10.0 * 1024.0 * 1024.0), "10.0 MB/s");
        assert_eq!(format_speed(2.0 * 1024.0 * 1024.0 * 1024.0), "2.0 GB/s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    // -------------------------------------------------------------------------
    // read_exact_or_eof tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_read_exact_or_eof_fills_from_chunky_reader() {
        // A reader that returns a few bytes at a time still fills the
        // buffer, which is what keeps write offsets aligned
        struct Chunky {
            data: Vec<u8>,
            pos: usize,
        }
        impl Read for Chunky {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = buf.len().min(7).min(self.data.len() - self.pos);
                buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
                self.pos += n;
                Ok(n)
            }
        }

        let data = patterned(100);
        let mut reader = Chunky {
            data: data.clone(),
            pos: 0,
        };
        let mut buffer = vec![0u8; 64];
        let n = read_exact_or_eof(&mut reader, &mut buffer).unwrap();
        assert_eq!(n, 64);
        assert_eq!(&buffer, &data[..64]);

        let n = read_exact_or_eof(&mut reader, &mut buffer).unwrap();
        assert_eq!(n, 36);
    }

    #[test]
    fn test_read_exact_or_eof_empty() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        let mut buffer = vec![0u8; 16];
        assert_eq!(read_exact_or_eof(&mut reader, &mut buffer).unwrap(), 0);
    }

    // -------------------------------------------------------------------------
    // Progress serialization tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_progress_event_json_shape() {
        let progress = Progress {
            stage: Stage::Writing,
            percentage: 42,
            bytes_written: 1000,
            total_bytes: 2000,
            speed: "10.0 MB/s".to_string(),
            status: Status::InProgress,
            error: String::new(),
            hash: String::new(),
            bytes_skipped: 0,
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"stage\":\"Writing\""));
        assert!(json.contains("\"percentage\":42"));
        assert!(json.contains("\"bytes_written\":1000"));
        assert!(json.contains("\"total_bytes\":2000"));
        assert!(json.contains("\"status\":\"in_progress\""));
        // Empty optional fields stay off the wire
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"hash\""));
        assert!(!json.contains("\"bytes_skipped\""));
    }

    #[test]
    fn test_terminal_progress_event_carries_hash_and_skips() {
        let progress = Progress {
            stage: Stage::Complete,
            percentage: 100,
            bytes_written: 2000,
            total_bytes: 2000,
            speed: String::new(),
            status: Status::Complete,
            error: String::new(),
            hash: "abc123".to_string(),
            bytes_skipped: 512,
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"stage\":\"Complete\""));
        assert!(json.contains("\"status\":\"complete\""));
        assert!(json.contains("\"hash\":\"abc123\""));
        assert!(json.contains("\"bytes_skipped\":512"));
    }

    // -------------------------------------------------------------------------
    // End-to-end pipeline through Source (raw file on disk)
    // -------------------------------------------------------------------------

    #[test]
    fn test_pipeline_with_real_source_and_verify() {
        let data = patterned(5 * SECTOR_SIZE + 999);
        let dir = TempDir::new().unwrap();
        let path = image_file(&dir, "full.img", &data);

        let mut opts = test_options(&path);
        opts.verify = true;
        opts.calculate_hash = true;

        let mut disk = MemDisk::new(1024 * 1024);
        let (flasher, _progress) = Flasher::new();
        let cancel = AtomicBool::new(false);

        let mut source = Source::open(&path).unwrap();
        let total = source.size();
        let (hash, skipped) = flasher
            .run_pipeline(&opts, &mut source, &mut disk, total, &cancel)
            .unwrap();

        assert_eq!(skipped, 0);
        assert_eq!(hash.unwrap(), format!("{:x}", Sha256::digest(&data)));
        assert_eq!(&disk.data[..data.len()], &data[..]);
    }
}
