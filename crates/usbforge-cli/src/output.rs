//! Output helpers: JSON objects for machines, styled text for humans.

use console::style;
use usbforge_core::{BatchResult, ErrorCode};

/// Write an error report object to stderr, one JSON object per line.
pub fn print_json_error(message: &str, code: ErrorCode) {
    let report = serde_json::json!({
        "error": message,
        "code": code.as_str(),
    });
    eprintln!("{}", report);
}

/// Write a styled error to stderr for terminal use.
pub fn print_error(message: &str, code: ErrorCode) {
    eprintln!(
        "{} {} {}",
        style("Error:").red().bold(),
        message,
        style(format!("[{}]", code)).dim()
    );
}

/// Report an error in the caller's output mode and return it as a failure
/// for the process exit code.
pub fn fail(json: bool, message: impl Into<String>, code: ErrorCode) -> anyhow::Error {
    let message = message.into();
    if json {
        print_json_error(&message, code);
    } else {
        print_error(&message, code);
    }
    anyhow::anyhow!(message)
}

/// Report a core error using its own code classification.
pub fn fail_with(json: bool, error: usbforge_core::Error) -> anyhow::Error {
    fail(json, error.to_string(), error.code())
}

/// Pretty-print any serializable value as JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Summarize a batch for terminal use (JSON mode streams NDJSON instead).
pub fn print_batch_result(result: &BatchResult, verb: &str) {
    println!(
        "{} {}/{} drives successfully",
        verb, result.succeeded, result.total
    );
    for entry in &result.results {
        let status = if entry.success {
            style("OK").green().to_string()
        } else {
            format!("{} {}", style("FAILED:").red(), entry.error)
        };
        match (&entry.drive_letter, entry.disk_number) {
            (Some(letter), _) => {
                println!("  Drive {} {} ({})", letter, status, entry.duration)
            }
            (None, Some(disk)) => {
                println!("  Disk {}: {} ({})", disk, status, entry.duration)
            }
            (None, None) => {}
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
