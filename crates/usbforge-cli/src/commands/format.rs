//! Format command - wipe and reformat, single or parallel.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};

use usbforge_core::{
    is_multi_disk_arg, parse_disks, validate_file_system, Error, ErrorCode, Executor,
    FormatOptions, Formatter, Status, FORMAT_LOCK_WAIT,
};
use usbforge_detect::Enumerator;
use usbforge_platform::has_elevated_privileges;

use crate::output;

/// Arguments for the format command.
pub struct FormatArgs {
    pub target: String,
    pub fs: String,
    pub label: String,
    pub quick: bool,
    pub yes: bool,
    pub parallel: bool,
    pub max_concurrent: usize,
    pub json: bool,
    pub cancel: Arc<AtomicBool>,
}

/// Execute the format command.
pub fn execute(args: FormatArgs) -> Result<()> {
    if args.parallel || is_multi_disk_arg(&args.target) {
        parallel_format(args)
    } else {
        single_format(args)
    }
}

fn single_format(args: FormatArgs) -> Result<()> {
    let json = args.json;

    validate_file_system(&args.fs).map_err(|e| output::fail_with(json, e))?;
    check_privileges(json)?;

    let enumerator = Enumerator::new();
    let device = enumerator
        .get(&args.target)
        .map_err(|e| output::fail_with(json, Error::from(e)))?;

    // Contends only with a concurrent flash on the same disk
    let _lock = usbforge_core::DiskLock::acquire(device.disk_number, FORMAT_LOCK_WAIT).map_err(
        |e| match e {
            Error::DiskBusy(n) => output::fail(
                json,
                format!("disk {} is busy (another operation in progress)", n),
                ErrorCode::DiskBusy,
            ),
            other => output::fail_with(json, other),
        },
    )?;

    if !args.yes && !json {
        println!(
            "{} This will ERASE ALL DATA on disk {} ({} - {})",
            style("Warning:").yellow().bold(),
            device.disk_number,
            device.friendly_name,
            device.size_human
        );

        let confirmed = Confirm::new()
            .with_prompt("Continue with format?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Format cancelled");
            return Ok(());
        }
    }

    let opts = FormatOptions {
        disk_number: device.disk_number,
        file_system: args.fs.clone(),
        label: args.label.clone(),
        quick: args.quick,
    };

    let (formatter, progress) = Formatter::new();
    let cancel = &args.cancel;

    let result = std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let formatter = formatter;
            formatter.format(&opts, cancel)
        });

        render_progress(progress, json);

        match worker.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Internal("format worker panicked".to_string())),
        }
    });

    enumerator.invalidate();

    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            if !json && !matches!(e, Error::Cancelled) {
                output::print_error(&e.to_string(), ErrorCode::FormatFailed);
            }
            Err(anyhow::anyhow!(e.to_string()))
        }
    }
}

fn parallel_format(args: FormatArgs) -> Result<()> {
    let json = args.json;

    let disks = parse_disks(&args.target).map_err(|e| output::fail_with(json, e))?;
    if disks.is_empty() {
        return Err(output::fail(
            json,
            "no valid disk numbers provided",
            ErrorCode::InvalidInput,
        ));
    }

    validate_file_system(&args.fs).map_err(|e| output::fail_with(json, e))?;
    check_privileges(json)?;

    // Validate every disk before touching any of them
    let enumerator = Enumerator::new();
    let mut device_names = Vec::new();
    for disk in &disks {
        let device = enumerator
            .get_by_disk_number(*disk)
            .map_err(|e| output::fail(json, e.to_string(), ErrorCode::UsbNotFound))?;
        device_names.push(format!(
            "{} ({} - {})",
            disk, device.friendly_name, device.size_human
        ));
    }

    if !args.yes && !json {
        println!(
            "{} This will ERASE ALL DATA on {} drives:",
            style("Warning:").yellow().bold(),
            disks.len()
        );
        for name in &device_names {
            println!("  Disk {}", name);
        }

        let confirmed = Confirm::new()
            .with_prompt("Continue with parallel format?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Format cancelled");
            return Ok(());
        }
    }

    let opts = FormatOptions {
        disk_number: 0,
        file_system: args.fs.clone(),
        label: args.label.clone(),
        quick: args.quick,
    };

    if !json {
        println!("Formatting {} drives in parallel...", disks.len());
    }

    let executor = Executor::new(args.max_concurrent, json);
    let result = executor.format_all(&disks, &opts, &args.cancel);
    enumerator.invalidate();

    if !json {
        output::print_batch_result(&result, "Formatted");
    }

    if result.failed > 0 {
        return Err(anyhow::anyhow!(
            "{} drives failed to format",
            result.failed
        ));
    }
    Ok(())
}

/// Render the format progress stream until the worker drops its sender.
fn render_progress(
    progress: std::sync::mpsc::Receiver<usbforge_core::FormatProgress>,
    json: bool,
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
        ProgressStyle::with_template("{msg:>24} [{bar:40.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    for update in progress {
        match update.status {
            Status::InProgress => {
                bar.set_position(u64::from(update.percentage));
                bar.set_message(update.stage.clone());
            }
            Status::Error => {
                bar.abandon_with_message(update.error.clone());
            }
            Status::Complete => {
                bar.set_position(100);
                if update.drive.is_empty() {
                    bar.finish_with_message("Format complete!");
                } else {
                    bar.finish_with_message(format!(
                        "Format complete! Drive assigned: {}",
                        update.drive
                    ));
                }
            }
        }
    }
}

fn check_privileges(json: bool) -> Result<()> {
    if !has_elevated_privileges() {
        return Err(output::fail(
            json,
            "Administrator privileges required for formatting",
            ErrorCode::PermissionDenied,
        ));
    }
    Ok(())
}
