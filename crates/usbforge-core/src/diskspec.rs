//! Disk specification parser.
//!
//! A single argument may denote several disks: comma-separated items, each
//! a decimal disk number or an inclusive `low-high` range. `"2,4-6,8"`
//! expands to disks 2, 4, 5, 6 and 8.

use std::collections::HashSet;

use crate::error::{Error, Result};

/// Parse a disk specification into an ordered, deduplicated list.
///
/// Whitespace around tokens is ignored and empty tokens (trailing commas)
/// are skipped. Duplicates are removed preserving first-seen order.
pub fn parse_disks(spec: &str) -> Result<Vec<u32>> {
    let mut disks = Vec::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let bounds: Vec<&str> = part.split('-').collect();
            if bounds.len() != 2 {
                return Err(Error::InvalidInput(format!("invalid range: {}", part)));
            }
            let (low, high) = (bounds[0].trim(), bounds[1].trim());
            let start: u32 = low
                .parse()
                .map_err(|_| Error::InvalidInput(format!("invalid range start: {}", low)))?;
            let end: u32 = high
                .parse()
                .map_err(|_| Error::InvalidInput(format!("invalid range end: {}", high)))?;
            if start > end {
                return Err(Error::InvalidInput(format!(
                    "invalid range: start > end ({} > {})",
                    start, end
                )));
            }
            disks.extend(start..=end);
        } else {
            let disk: u32 = part
                .parse()
                .map_err(|_| Error::InvalidInput(format!("invalid disk number: {}", part)))?;
            disks.push(disk);
        }
    }

    let mut seen = HashSet::new();
    disks.retain(|d| seen.insert(*d));
    Ok(disks)
}

/// Whether the argument uses multi-disk syntax (contains `,` or `-`).
pub fn is_multi_disk_arg(arg: &str) -> bool {
    arg.contains(',') || arg.contains('-')
}

// ============================================================================
// UNIT TESTS
// ============================================================================
