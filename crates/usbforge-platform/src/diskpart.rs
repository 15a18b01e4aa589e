//! Diskpart adapter for the format operation.
//!
//! Formatting wipes the partition table and recreates a single active
//! primary partition. The operation itself is an opaque external call: a
//! generated script handed to `diskpart /s`, with output lines surfaced to
//! the caller for synthetic progress reporting.

use std::sync::atomic::AtomicBool;

use crate::Result;

/// Build the diskpart script for a wipe-and-recreate format.
///
/// An empty `label` defaults to `"USB"`.
pub fn generate_script(disk_number: u32, file_system: &str, label: &str, quick: bool) -> String {
    let fs = file_system.to_uppercase();
    let label = if label.is_empty() { "USB" } else { label };

    let mut format_cmd = format!("format fs={} label=\"{}\"", fs, label);
    if quick {
        format_cmd.push_str(" quick");
    }

    format!(
        "select disk {}\nclean\ncreate partition primary\nselect partition 1\nactive\n{}\nassign\n",
        disk_number, format_cmd
    )
}

/// Verify that the diskpart executable is present.
#[cfg(windows)]
pub fn check_available() -> Result<()> {
    use crate::PlatformError;

    let system_root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
    let path = std::path::Path::new(&system_root)
        .join("System32")
        .join("diskpart.exe");
    if !path.exists() {
        return Err(PlatformError::CommandFailed(format!(
            "diskpart not found at {}",
            path.display()
        )));
    }
    Ok(())
}

/// Verify that the diskpart executable is present (Windows only).
#[cfg(not(windows))]
pub fn check_available() -> Result<()> {
    Err(crate::PlatformError::NotSupported(
        "diskpart requires Windows".to_string(),
    ))
}

/// Run a diskpart script, streaming each trimmed stdout line to `on_line`.
///
/// The script is written to a transient file and executed with
/// `diskpart /s`. When `cancel` becomes true mid-run the child is killed
/// and [`PlatformError::Cancelled`](crate::PlatformError::Cancelled) is
/// returned.
#[cfg(windows)]
pub fn run(
    script: &str,
    cancel: &AtomicBool,
    mut on_line: impl FnMut(&str),
) -> Result<()> {
    use std::io::{BufRead, BufReader, Write};
    use std::process::{Command, Stdio};
    use std::sync::atomic::Ordering;

    use crate::PlatformError;

    let mut script_file = tempfile::Builder::new()
        .prefix("usbforge-diskpart-")
        .suffix(".txt")
        .tempfile()
        .map_err(|e| PlatformError::CommandFailed(format!("failed to create temp file: {}", e)))?;
    script_file
        .write_all(script.as_bytes())
        .map_err(|e| PlatformError::CommandFailed(format!("failed to write script: {}", e)))?;
    script_file
        .flush()
        .map_err(|e| PlatformError::CommandFailed(format!("failed to write script: {}", e)))?;

    let mut child = Command::new("diskpart")
        .arg("/s")
        .arg(script_file.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| PlatformError::CommandFailed(format!("failed to start diskpart: {}", e)))?;

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            if cancel.load(Ordering::SeqCst) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PlatformError::Cancelled);
            }
            match line {
                Ok(line) => on_line(line.trim()),
                Err(_) => break,
            }
        }
    }

    let status = child
        .wait()
        .map_err(|e| PlatformError::CommandFailed(format!("diskpart failed: {}", e)))?;
    if !status.success() {
        return Err(PlatformError::CommandFailed(format!(
            "diskpart failed: {}",
            status
        )));
    }
    Ok(())
}

/// Run a diskpart script (Windows only).
#[cfg(not(windows))]
pub fn run(_script: &str, _cancel: &AtomicBool, _on_line: impl FnMut(&str)) -> Result<()> {
    Err(crate::PlatformError::NotSupported(
        "diskpart requires Windows".to_string(),
    ))
}

// ============================================================================
// UNIT TESTS
// ============================================================================
