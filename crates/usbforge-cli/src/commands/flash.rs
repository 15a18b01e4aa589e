//! Flash command - raw image writes, single or parallel.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};

use usbforge_core::{
    ensure_fits, format_bytes, is_multi_disk_arg, parse_disks, Error, ErrorCode, Executor,
    FlashOptions, Flasher, Source, Status, FLASH_LOCK_WAIT,
};
use usbforge_detect::{Device, Enumerator};
use usbforge_platform::has_elevated_privileges;

use crate::output;

/// Arguments for the flash command.
pub struct FlashArgs {
    pub target: String,
    pub image: String,
    pub verify: bool,
    pub yes: bool,
    pub buffer: String,
    pub hash: bool,
    pub skip_unchanged: bool,
    pub max_size: Option<String>,
    pub force: bool,
    pub parallel: bool,
    pub max_concurrent: usize,
    pub json: bool,
    pub cancel: Arc<AtomicBool>,
}

/// Execute the flash command.
pub fn execute(args: FlashArgs) -> Result<()> {
    if args.parallel || is_multi_disk_arg(&args.target) {
        parallel_flash(args)
    } else {
        single_flash(args)
    }
}

fn single_flash(args: FlashArgs) -> Result<()> {
    let json = args.json;

    check_image_exists(&args.image, json)?;
    check_privileges(json)?;

    let enumerator = Enumerator::new();
    let device = enumerator
        .get(&args.target)
        .map_err(|e| output::fail_with(json, Error::from(e)))?;

    if !args.force {
        check_max_size(&device, args.max_size.as_deref(), json)?;
        if enumerator.is_system_disk(device.disk_number).unwrap_or(false) {
            return Err(output::fail(
                json,
                format!(
                    "Disk {} appears to be a system disk. Use --force to override.",
                    device.disk_number
                ),
                ErrorCode::InvalidInput,
            ));
        }
    }

    let buffer_size_mb = parse_buffer_size(&args.buffer)
        .map_err(|e| output::fail(json, e, ErrorCode::InvalidInput))?;
    usbforge_core::buffer_size_bytes(buffer_size_mb)
        .map_err(|e| output::fail_with(json, e))?;

    // Hold the cross-process lock for the whole destructive region
    let _lock = usbforge_core::DiskLock::acquire(device.disk_number, FLASH_LOCK_WAIT)
        .map_err(|e| output::fail_with(json, e))?;

    // Open once up front for the size check and the confirmation text
    let probe = Source::open(&args.image).map_err(|e| output::fail_with(json, e))?;
    let image_size = probe.size();
    let image_name = probe.name().to_string();
    drop(probe);

    ensure_fits(image_size, device.size).map_err(|e| output::fail_with(json, e))?;

    if !args.yes && !json {
        println!(
            "{} This will COMPLETELY OVERWRITE disk {} ({} - {})",
            style("Warning:").yellow().bold(),
            device.disk_number,
            device.friendly_name,
            device.size_human
        );
        println!("Image: {} ({})", image_name, format_bytes(image_size));
        if args.verify {
            println!("Verification: enabled");
        }

        let confirmed = Confirm::new()
            .with_prompt("Continue with flash?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Flash cancelled");
            return Ok(());
        }
    }

    let opts = FlashOptions {
        disk_number: device.disk_number,
        image_path: args.image.clone(),
        verify: args.verify,
        buffer_size_mb,
        calculate_hash: args.hash,
        skip_unchanged: args.skip_unchanged,
        drive_letter: device.drive_letter_char(),
    };

    let (flasher, progress) = Flasher::new();
    let cancel = &args.cancel;

    let result = std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let flasher = flasher;
            flasher.flash(&opts, cancel)
        });

        render_progress(progress, json, args.verify);

        match worker.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Internal("flash worker panicked".to_string())),
        }
    });

    enumerator.invalidate();

    match result {
        Ok(report) => {
            if !json {
                if let Some(hash) = &report.hash {
                    println!("SHA-256: {}", hash);
                }
                if report.bytes_skipped > 0 {
                    println!(
                        "Skipped: {} (unchanged)",
                        format_bytes(report.bytes_skipped)
                    );
                }
            }
            Ok(())
        }
        Err(e) => {
            // JSON mode already streamed the terminal error event
            if !json && !matches!(e, Error::Cancelled) {
                output::print_error(&e.to_string(), ErrorCode::FlashFailed);
            }
            Err(anyhow::anyhow!(e.to_string()))
        }
    }
}

fn parallel_flash(args: FlashArgs) -> Result<()> {
    let json = args.json;

    let disks =
        parse_disks(&args.target).map_err(|e| output::fail_with(json, e))?;
    if disks.is_empty() {
        return Err(output::fail(
            json,
            "no valid disk numbers provided",
            ErrorCode::InvalidInput,
        ));
    }

    check_image_exists(&args.image, json)?;
    check_privileges(json)?;

    let buffer_size_mb = parse_buffer_size(&args.buffer)
        .map_err(|e| output::fail(json, e, ErrorCode::InvalidInput))?;
    usbforge_core::buffer_size_bytes(buffer_size_mb)
        .map_err(|e| output::fail_with(json, e))?;

    let probe = Source::open(&args.image).map_err(|e| output::fail_with(json, e))?;
    let image_size = probe.size();
    let image_name = probe.name().to_string();
    drop(probe);

    // Validate every disk before touching any of them
    let enumerator = Enumerator::new();
    let mut device_names = Vec::new();
    for disk in &disks {
        let device = enumerator
            .get_by_disk_number(*disk)
            .map_err(|e| output::fail(json, e.to_string(), ErrorCode::UsbNotFound))?;

        ensure_fits(image_size, device.size).map_err(|e| {
            output::fail(
                json,
                format!("disk {}: {}", disk, e),
                ErrorCode::InvalidInput,
            )
        })?;

        if !args.force {
            check_max_size(&device, args.max_size.as_deref(), json)?;
            if enumerator.is_system_disk(*disk).unwrap_or(false) {
                return Err(output::fail(
                    json,
                    format!("disk {} appears to be a system disk", disk),
                    ErrorCode::InvalidInput,
                ));
            }
        }

        device_names.push(format!(
            "{} ({} - {})",
            disk, device.friendly_name, device.size_human
        ));
    }

    if !args.yes && !json {
        println!(
            "{} This will COMPLETELY OVERWRITE {} drives:",
            style("Warning:").yellow().bold(),
            disks.len()
        );
        for name in &device_names {
            println!("  Disk {}", name);
        }
        println!("Image: {} ({})", image_name, format_bytes(image_size));
        if args.verify {
            println!("Verification: enabled");
        }

        let confirmed = Confirm::new()
            .with_prompt("Continue with parallel flash?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Flash cancelled");
            return Ok(());
        }
    }

    let opts = FlashOptions {
        disk_number: 0,
        image_path: args.image.clone(),
        verify: args.verify,
        buffer_size_mb,
        calculate_hash: args.hash,
        skip_unchanged: args.skip_unchanged,
        drive_letter: None,
    };

    if !json {
        println!("Flashing {} drives in parallel...", disks.len());
    }

    let executor = Executor::new(args.max_concurrent, json);
    let result = executor.flash_all(&disks, &opts, &args.cancel);
    enumerator.invalidate();

    if !json {
        output::print_batch_result(&result, "Flashed");
    }

    if result.failed > 0 {
        return Err(anyhow::anyhow!("{} drives failed to flash", result.failed));
    }
    Ok(())
}

/// Render the flash progress stream until the worker drops its sender.
fn render_progress(
    progress: std::sync::mpsc::Receiver<usbforge_core::Progress>,
    json: bool,
    verify: bool,
) {
    if json {
        for update in progress {
            if let Ok(line) = serde_json::to_string(&update) {
                println!("{}", line);
            }
        }
        return;
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg:>12} [{bar:40.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    for update in progress {
        match update.status {
            Status::InProgress => {
                bar.set_position(u64::from(update.percentage));
                let mut message = update.stage.to_string();
                if !update.speed.is_empty() {
                    message = format!("{} {}", message, update.speed);
                }
                bar.set_message(message);
            }
            Status::Error => {
                bar.abandon_with_message(update.error.clone());
            }
            Status::Complete => {
                bar.set_position(100);
                let message = if verify {
                    "Flash complete! (verified)"
                } else {
                    "Flash complete!"
                };
                bar.finish_with_message(message);
            }
        }
    }
}

fn check_image_exists(image: &str, json: bool) -> Result<()> {
    if !Source::is_url(image) && !Path::new(image).exists() {
        return Err(output::fail(
            json,
            format!("Image file not found: {}", image),
            ErrorCode::InvalidInput,
        ));
    }
    Ok(())
}

fn check_privileges(json: bool) -> Result<()> {
    if !has_elevated_privileges() {
        return Err(output::fail(
            json,
            "Administrator privileges required for flashing",
            ErrorCode::PermissionDenied,
        ));
    }
    Ok(())
}

fn check_max_size(device: &Device, max_size: Option<&str>, json: bool) -> Result<()> {
    let Some(max_size) = max_size else {
        return Ok(());
    };
    let limit =
        parse_size(max_size).map_err(|e| output::fail(json, e, ErrorCode::InvalidInput))?;
    if limit > 0 && device.size > limit {
        return Err(output::fail(
            json,
            format!(
                "Device size ({}) exceeds maximum allowed ({}). Use --force to override.",
                device.size_human, max_size
            ),
            ErrorCode::InvalidInput,
        ));
    }
    Ok(())
}

/// Parse sizes like "64G", "256M", "1T" into bytes.
fn parse_size(input: &str) -> std::result::Result<u64, String> {
    let mut s = input.trim().to_uppercase();
    if s.is_empty() {
        return Ok(0);
    }
    if let Some(stripped) = s.strip_suffix('B') {
        s = stripped.to_string();
    }

    let (digits, multiplier) = if let Some(stripped) = s.strip_suffix('T') {
        (stripped.to_string(), 1u64 << 40)
    } else if let Some(stripped) = s.strip_suffix('G') {
        (stripped.to_string(), 1u64 << 30)
    } else if let Some(stripped) = s.strip_suffix('M') {
        (stripped.to_string(), 1u64 << 20)
    } else if let Some(stripped) = s.strip_suffix('K') {
        (stripped.to_string(), 1u64 << 10)
    } else {
        (s.clone(), 1)
    };

    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| format!("invalid size: {}", input))
}

/// Parse buffer sizes like "4M", "8MB", "16" into megabytes.
fn parse_buffer_size(input: &str) -> std::result::Result<u32, String> {
    let mut s = input.trim().to_uppercase();
    if let Some(stripped) = s.strip_suffix('B') {
        s = stripped.to_string();
    }
    let digits = s.strip_suffix('M').unwrap_or(&s);

    digits
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid buffer size: {} (use format like 4M or 8MB)", input))
}

// ============================================================================
// UNIT TESTS
// ============================================================================
