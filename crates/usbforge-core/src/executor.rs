//! Parallel executor.
//!
//! Runs a batch of format / flash / label jobs on independent threads under
//! a counted semaphore, serializes per-disk access through the cross-process
//! disk lock, and streams structured NDJSON events when JSON mode is on.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::flash::{FlashOptions, Flasher};
use crate::format::{FormatOptions, Formatter};
use crate::lock::{DiskLock, BATCH_LOCK_WAIT};

/// Options for labeling drives.
#[derive(Debug, Clone)]
pub struct LabelOptions {
    /// Label text applied to each volume
    pub label: String,
}

/// The operation a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Wipe and reformat
    Format,
    /// Raw image write
    Flash,
    /// Volume label change
    Label,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Format => f.write_str("format"),
            Operation::Flash => f.write_str("flash"),
            Operation::Label => f.write_str("label"),
        }
    }
}

/// Identifies one job in a batch: a disk for format/flash, a mounted drive
/// for label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobId {
    /// Target disk number
    Disk(u32),
    /// Target drive letter
    Drive(char),
}

impl JobId {
    fn disk_number(&self) -> Option<u32> {
        match self {
            JobId::Disk(n) => Some(*n),
            JobId::Drive(_) => None,
        }
    }

    fn drive_letter(&self) -> Option<String> {
        match self {
            JobId::Disk(_) => None,
            JobId::Drive(letter) => Some(format!("{}:", letter)),
        }
    }
}

/// One entry per completed job in a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationResult {
    /// Disk number, for format/flash jobs
    #[serde(rename = "diskNumber", skip_serializing_if = "Option::is_none")]
    pub disk_number: Option<u32>,

    /// Drive letter, for label jobs
    #[serde(rename = "driveLetter", skip_serializing_if = "Option::is_none")]
    pub drive_letter: Option<String>,

    /// Whether the job succeeded
    pub success: bool,

    /// Error message, empty on success
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,

    /// Human-formatted elapsed wall time
    pub duration: String,
}

/// Aggregate result for a parallel batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// Per-job results, ordered like the input list
    pub results: Vec<OperationResult>,

    /// Number of jobs submitted
    pub total: usize,

    /// Number of successful jobs
    pub succeeded: usize,

    /// Number of failed jobs
    pub failed: usize,
}

impl BatchResult {
    fn from_results(results: Vec<OperationResult>) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            results,
            total,
            succeeded,
            failed: total - succeeded,
        }
    }
}

/// Event type discriminator for the NDJSON stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A job was submitted
    Start,
    /// A job finished (successfully or not)
    Complete,
    /// The whole batch finished
    Summary,
}

/// One record in the streaming event log for a batch.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Event discriminator
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Disk number, for disk-scoped events
    #[serde(rename = "diskNumber", skip_serializing_if = "Option::is_none")]
    pub disk_number: Option<u32>,

    /// Drive letter, for drive-scoped events
    #[serde(rename = "driveLetter", skip_serializing_if = "Option::is_none")]
    pub drive_letter: Option<String>,

    /// The batch operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,

    /// Job outcome, on complete events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// Error message, on failed complete events
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,

    /// Human-formatted elapsed time, on complete events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Batch size, on the summary event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,

    /// Successful jobs, on the summary event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<usize>,

    /// Failed jobs, on the summary event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
}

impl ProgressEvent {
    fn start(job: &JobId, operation: Operation) -> Self {
        Self {
            event_type: EventType::Start,
            disk_number: job.disk_number(),
            drive_letter: job.drive_letter(),
            operation: Some(operation),
            success: None,
            error: String::new(),
            duration: None,
            total: None,
            succeeded: None,
            failed: None,
        }
    }

    fn complete(
        job: &JobId,
        operation: Operation,
        success: bool,
        error: String,
        duration: Option<String>,
    ) -> Self {
        Self {
            event_type: EventType::Complete,
            disk_number: job.disk_number(),
            drive_letter: job.drive_letter(),
            operation: Some(operation),
            success: Some(success),
            error,
            duration,
            total: None,
            succeeded: None,
            failed: None,
        }
    }

    fn summary(batch: &BatchResult) -> Self {
        Self {
            event_type: EventType::Summary,
            disk_number: None,
            drive_letter: None,
            operation: None,
            success: None,
            error: String::new(),
            duration: None,
            total: Some(batch.total),
            succeeded: Some(batch.succeeded),
            failed: Some(batch.failed),
        }
    }
}

/// Runs batches of disk operations concurrently.
pub struct Executor {
    max_concurrent: usize,
    json_output: bool,
    lock_wait: Duration,
    out: Mutex<Box<dyn Write + Send>>,
}

impl Executor {
    /// Create an executor.
    ///
    /// `max_concurrent` of zero means effectively unlimited. When
    /// `json_output` is set, every event is written as one JSON object per
    /// line on standard output.
    pub fn new(max_concurrent: usize, json_output: bool) -> Self {
        let max_concurrent = if max_concurrent == 0 {
            100
        } else {
            max_concurrent
        };
        Self {
            max_concurrent,
            json_output,
            lock_wait: BATCH_LOCK_WAIT,
            out: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Redirect the NDJSON event stream to a custom writer.
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = Mutex::new(out);
        self
    }

    /// Format multiple disks in parallel.
    pub fn format_all(
        &self,
        disks: &[u32],
        opts: &FormatOptions,
        cancel: &AtomicBool,
    ) -> BatchResult {
        let jobs: Vec<JobId> = disks.iter().copied().map(JobId::Disk).collect();
        self.run_batch(&jobs, Operation::Format, true, cancel, |job| {
            let disk_opts = FormatOptions {
                disk_number: job.disk_number().unwrap_or_default(),
                ..opts.clone()
            };
            // Nobody renders per-job progress in batch mode; dropping the
            // receiver makes every send a cheap no-op.
            let (formatter, _progress) = Formatter::new();
            formatter.format(&disk_opts, cancel)?;
            Ok(())
        })
    }

    /// Flash the same image to multiple disks in parallel.
    pub fn flash_all(
        &self,
        disks: &[u32],
        opts: &FlashOptions,
        cancel: &AtomicBool,
    ) -> BatchResult {
        let jobs: Vec<JobId> = disks.iter().copied().map(JobId::Disk).collect();
        self.run_batch(&jobs, Operation::Flash, true, cancel, |job| {
            let disk_opts = FlashOptions {
                disk_number: job.disk_number().unwrap_or_default(),
                ..opts.clone()
            };
            let (flasher, _progress) = Flasher::new();
            flasher.flash(&disk_opts, cancel)?;
            Ok(())
        })
    }

    /// Label multiple mounted drives in parallel.
    ///
    /// Labeling is a per-volume operation and does not take the disk lock.
    pub fn label_all(
        &self,
        drive_letters: &[char],
        opts: &LabelOptions,
        cancel: &AtomicBool,
    ) -> BatchResult {
        let jobs: Vec<JobId> = drive_letters.iter().copied().map(JobId::Drive).collect();
        self.run_batch(&jobs, Operation::Label, false, cancel, |job| {
            if let JobId::Drive(letter) = job {
                usbforge_platform::set_volume_label(*letter, &opts.label)?;
            }
            Ok(())
        })
    }

    /// Spawn one thread per job; each emits `start`, races a semaphore slot
    /// against cancellation, takes the per-disk lock where applicable, runs
    /// the job body, and records its result under its own input index.
    fn run_batch<F>(
        &self,
        jobs: &[JobId],
        operation: Operation,
        use_disk_lock: bool,
        cancel: &AtomicBool,
        body: F,
    ) -> BatchResult
    where
        F: Fn(&JobId) -> Result<()> + Sync,
    {
        let semaphore = Semaphore::new(self.max_concurrent);
        let results: Mutex<Vec<OperationResult>> =
            Mutex::new(vec![OperationResult::default(); jobs.len()]);

        std::thread::scope(|scope| {
            for (index, job) in jobs.iter().enumerate() {
                let semaphore = &semaphore;
                let results = &results;
                let body = &body;

                scope.spawn(move || {
                    self.emit(&ProgressEvent::start(job, operation));

                    let Some(_permit) = semaphore.acquire(cancel) else {
                        self.finish_job(
                            results,
                            index,
                            job,
                            operation,
                            false,
                            "cancelled".to_string(),
                            None,
                        );
                        return;
                    };

                    let start = Instant::now();

                    let _lock = if use_disk_lock {
                        match job.disk_number().map(|n| DiskLock::acquire(n, self.lock_wait)) {
                            Some(Ok(lock)) => Some(lock),
                            Some(Err(e)) => {
                                let message = match e {
                                    Error::DiskBusy(_) => "disk busy".to_string(),
                                    other => other.to_string(),
                                };
                                let duration = format_duration(start.elapsed());
                                self.finish_job(
                                    results,
                                    index,
                                    job,
                                    operation,
                                    false,
                                    message,
                                    Some(duration),
                                );
                                return;
                            }
                            None => None,
                        }
                    } else {
                        None
                    };

                    let outcome = body(job);
                    let duration = format_duration(start.elapsed());
                    match outcome {
                        Ok(()) => self.finish_job(
                            results,
                            index,
                            job,
                            operation,
                            true,
                            String::new(),
                            Some(duration),
                        ),
                        Err(e) => self.finish_job(
                            results,
                            index,
                            job,
                            operation,
                            false,
                            e.to_string(),
                            Some(duration),
                        ),
                    }
                });
            }
        });

        let results = results.into_inner().unwrap_or_default();
        let batch = BatchResult::from_results(results);
        self.emit(&ProgressEvent::summary(&batch));
        batch
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_job(
        &self,
        results: &Mutex<Vec<OperationResult>>,
        index: usize,
        job: &JobId,
        operation: Operation,
        success: bool,
        error: String,
        duration: Option<String>,
    ) {
        if let Ok(mut results) = results.lock() {
            results[index] = OperationResult {
                disk_number: job.disk_number(),
                drive_letter: job.drive_letter(),
                success,
                error: error.clone(),
                duration: duration.clone().unwrap_or_default(),
            };
        }
        self.emit(&ProgressEvent::complete(
            job, operation, success, error, duration,
        ));
    }

    fn emit(&self, event: &ProgressEvent) {
        if !self.json_output {
            return;
        }
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }
}

/// Counted semaphore whose acquisition races a cancellation flag.
struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

struct SemaphorePermit<'a>(&'a Semaphore);

impl Semaphore {
    fn new(capacity: usize) -> Self {
        Self {
            permits: Mutex::new(capacity),
            available: Condvar::new(),
        }
    }

    /// Wait for a permit; returns `None` as soon as `cancel` is observed.
    fn acquire(&self, cancel: &AtomicBool) -> Option<SemaphorePermit<'_>> {
        let mut permits = self.permits.lock().ok()?;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return None;
            }
            if *permits > 0 {
                *permits -= 1;
                return Some(SemaphorePermit(self));
            }
            let (guard, _) = self
                .available
                .wait_timeout(permits, Duration::from_millis(50))
                .ok()?;
            permits = guard;
        }
    }

    fn release(&self) {
        if let Ok(mut permits) = self.permits.lock() {
            *permits += 1;
            self.available.notify_one();
        }
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Format an elapsed wall time for result records.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs == 0 {
        format!("{}ms", elapsed.as_millis())
    } else if secs < 60 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
