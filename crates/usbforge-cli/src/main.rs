//! usbforge - a scriptable Windows USB storage toolkit
//!
//! # Usage
//!
//! ```bash
//! # List connected USB disks
//! usbforge list
//!
//! # Write an image to disk 2, verifying the result
//! usbforge flash 2 --image raspios.img.xz --verify
//!
//! # Flash three disks in parallel, streaming NDJSON events
//! usbforge flash 2,4-5 --image ubuntu.iso --json --yes
//!
//! # Format, relabel, eject
//! usbforge format E: --fs exfat --label DATA
//! usbforge label E: --name BACKUP_001
//! usbforge eject E:
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

/// usbforge - manage removable USB block-storage devices
#[derive(Parser)]
#[command(name = "usbforge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Emit machine-readable JSON (NDJSON event stream for batches)
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all log output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected USB storage devices
    List,

    /// Show details for one USB device
    Info {
        /// Disk number ("2") or drive letter ("E", "E:")
        device: String,
    },

    /// Write an image to one or more USB drives (raw write)
    ///
    /// WARNING: this completely overwrites the target drives.
    Flash {
        /// Target: disk number, drive letter, or multi-disk spec
        /// ("2", "E:", "2,3,4", "2-6", "2,4-6,8")
        target: String,

        /// Path to image file or HTTP(S) URL
        #[arg(short, long)]
        image: String,

        /// Verify the write by reading back and comparing
        #[arg(long)]
        verify: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// I/O buffer size (e.g. 4M, 8MB)
        #[arg(short, long, default_value = "4M")]
        buffer: String,

        /// Calculate and report the SHA-256 of the image
        #[arg(long)]
        hash: bool,

        /// Skip writing regions that already match the image
        #[arg(long)]
        skip_unchanged: bool,

        /// Refuse devices larger than this (e.g. 64G, 256G)
        #[arg(long)]
        max_size: Option<String>,

        /// Override safety protections (system disk, size limits)
        #[arg(long)]
        force: bool,

        /// Always use the parallel executor, even for a single disk
        #[arg(long)]
        parallel: bool,

        /// Max concurrent operations (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_concurrent: usize,
    },

    /// Format one or more USB drives
    ///
    /// WARNING: this erases all data on the target drives.
    Format {
        /// Target: disk number, drive letter, or multi-disk spec
        target: String,

        /// Filesystem type: fat32, ntfs, exfat
        #[arg(long, default_value = "fat32")]
        fs: String,

        /// Volume label
        #[arg(long, default_value = "USB")]
        label: String,

        /// Quick format (pass `--quick false` for a full format)
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        quick: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Always use the parallel executor, even for a single disk
        #[arg(long)]
        parallel: bool,

        /// Max concurrent operations (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_concurrent: usize,
    },

    /// Set the volume label of one or more USB drives
    Label {
        /// Target: drive letters ("E", "E,F,G") or disk numbers ("2,3")
        target: String,

        /// New volume label
        #[arg(long)]
        name: String,

        /// Max concurrent operations (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_concurrent: usize,
    },

    /// Safely eject a USB drive
    Eject {
        /// Disk number ("2") or drive letter ("E", "E:")
        device: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() {
    if run().is_err() {
        // Commands report their own errors in the selected output mode
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // One process-wide cancellation flag; every task holds a clone.
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_cancel = cancel.clone();
    let json = cli.json;
    ctrlc::set_handler(move || {
        if handler_cancel.load(Ordering::SeqCst) {
            // Second Ctrl+C forces the exit
            std::process::exit(130);
        }
        handler_cancel.store(true, Ordering::SeqCst);
        if !json {
            eprintln!(
                "\n{}",
                style("Cancelling... Press Ctrl+C again to force exit").yellow()
            );
        }
    })?;

    match cli.command {
        Commands::List => commands::list::execute(cli.json),
        Commands::Info { device } => commands::info::execute(&device, cli.json),
        Commands::Flash {
            target,
            image,
            verify,
            yes,
            buffer,
            hash,
            skip_unchanged,
            max_size,
            force,
            parallel,
            max_concurrent,
        } => commands::flash::execute(commands::flash::FlashArgs {
            target,
            image,
            verify,
            yes,
            buffer,
            hash,
            skip_unchanged,
            max_size,
            force,
            parallel,
            max_concurrent,
            json: cli.json,
            cancel,
        }),
        Commands::Format {
            target,
            fs,
            label,
            quick,
            yes,
            parallel,
            max_concurrent,
        } => commands::format::execute(commands::format::FormatArgs {
            target,
            fs,
            label,
            quick,
            yes,
            parallel,
            max_concurrent,
            json: cli.json,
            cancel,
        }),
        Commands::Label {
            target,
            name,
            max_concurrent,
        } => commands::label::execute(&target, &name, max_concurrent, cli.json, &cancel),
        Commands::Eject { device, yes } => commands::eject::execute(&device, yes, cli.json),
    }
}
