//! Label command - volume label changes without reformatting.

use std::sync::atomic::AtomicBool;

use anyhow::Result;
use usbforge_core::{parse_disks, Error, ErrorCode, Executor, LabelOptions};
use usbforge_detect::Enumerator;

use crate::output;

/// Execute the label command.
///
/// The target may be drive letters ("E", "E,F,G") or disk numbers
/// ("2", "2,3", "2-4"); disk numbers are resolved to their mounted drive
/// letters first. Labeling is a per-volume operation and needs no
/// administrator privileges for USB drives.
pub fn execute(
    target: &str,
    label: &str,
    max_concurrent: usize,
    json: bool,
    cancel: &AtomicBool,
) -> Result<()> {
    if label.trim().is_empty() {
        return Err(output::fail(
            json,
            "label name cannot be empty",
            ErrorCode::InvalidInput,
        ));
    }

    let enumerator = Enumerator::new();
    let letters = resolve_targets(&enumerator, target, json)?;
    if letters.is_empty() {
        return Err(output::fail(
            json,
            "no valid drives provided",
            ErrorCode::InvalidInput,
        ));
    }

    let opts = LabelOptions {
        label: label.to_string(),
    };

    let executor = Executor::new(max_concurrent, json);
    let result = executor.label_all(&letters, &opts, cancel);
    enumerator.invalidate();

    if !json {
        output::print_batch_result(&result, "Labeled");
    }

    if result.failed > 0 {
        return Err(anyhow::anyhow!("{} drives failed to label", result.failed));
    }
    Ok(())
}

/// Resolve the target spec to a deduplicated list of drive letters.
fn resolve_targets(
    enumerator: &Enumerator,
    target: &str,
    json: bool,
) -> Result<Vec<char>> {
    if is_numeric_spec(target) {
        let disks = parse_disks(target).map_err(|e| output::fail_with(json, e))?;
        let mut letters = Vec::new();
        for disk in disks {
            let device = enumerator
                .get_by_disk_number(disk)
                .map_err(|e| output::fail(json, e.to_string(), ErrorCode::UsbNotFound))?;
            let Some(letter) = device.drive_letter_char() else {
                return Err(output::fail(
                    json,
                    format!("disk {}: no drive letter assigned", disk),
                    ErrorCode::InvalidInput,
                ));
            };
            if !letters.contains(&letter) {
                letters.push(letter);
            }
        }
        return Ok(letters);
    }

    let mut letters = Vec::new();
    for part in target.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let upper = part.to_uppercase();
        let trimmed = upper.strip_suffix(':').unwrap_or(&upper);
        let mut chars = trimmed.chars();
        let letter = match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_uppercase() => c,
            _ => {
                return Err(output::fail(
                    json,
                    format!("invalid drive letter: {}", part),
                    ErrorCode::InvalidInput,
                ))
            }
        };

        // Only USB volumes are labeled through this tool
        enumerator
            .get_by_drive_letter(trimmed)
            .map_err(|e| output::fail(json, Error::from(e).to_string(), ErrorCode::UsbNotFound))?;

        if !letters.contains(&letter) {
            letters.push(letter);
        }
    }
    Ok(letters)
}

/// Whether the spec is made of disk numbers (digits, commas, dashes) rather
/// than drive letters.
fn is_numeric_spec(spec: &str) -> bool {
    spec.chars().any(|c| c.is_ascii_digit())
        && spec
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c == '-' || c == ' ')
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_numeric_spec() {
        assert!(is_numeric_spec("2"));
        assert!(is_numeric_spec("2,3,4"));
        assert!(is_numeric_spec("2-6"));
        assert!(is_numeric_spec("2, 4-6"));
        assert!(!is_numeric_spec("E"));
        assert!(!is_numeric_spec("E,F"));
        assert!(!is_numeric_spec("E:"));
        assert!(!is_numeric_spec(""));
        assert!(!is_numeric_spec(",-"));
    }
}
