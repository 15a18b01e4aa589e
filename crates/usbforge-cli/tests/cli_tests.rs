//! Integration tests for the usbforge CLI
//!
//! These tests exercise argument handling and error reporting without
//! requiring administrator privileges or actual USB hardware.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the usbforge binary
#[allow(deprecated)]
fn usbforge() -> Command {
    Command::cargo_bin("usbforge").unwrap()
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    usbforge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("flash"))
        .stdout(predicate::str::contains("format"))
        .stdout(predicate::str::contains("label"))
        .stdout(predicate::str::contains("eject"));
}

#[test]
fn test_version_flag() {
    usbforge()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("usbforge"));
}

#[test]
fn test_no_args_shows_help() {
    usbforge()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// ============================================================================
// Subcommand Help Tests
// ============================================================================

#[test]
fn test_flash_help() {
    usbforge()
        .args(["flash", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Write an image"))
        .stdout(predicate::str::contains("--image"))
        .stdout(predicate::str::contains("--verify"))
        .stdout(predicate::str::contains("--skip-unchanged"))
        .stdout(predicate::str::contains("--max-concurrent"));
}

#[test]
fn test_format_help() {
    usbforge()
        .args(["format", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Format"))
        .stdout(predicate::str::contains("--fs"))
        .stdout(predicate::str::contains("--label"))
        .stdout(predicate::str::contains("--quick"));
}

#[test]
fn test_eject_help() {
    usbforge()
        .args(["eject", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("eject"))
        .stdout(predicate::str::contains("<DEVICE>"));
}

// ============================================================================
// Disk Spec Validation Tests
// ============================================================================

#[test]
fn test_flash_inverted_range_rejected() {
    usbforge()
        .args(["flash", "5-3", "--image", "whatever.img", "--json", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid range: start > end (5 > 3)"))
        .stderr(predicate::str::contains("INVALID_INPUT"));
}

#[test]
fn test_format_bad_disk_spec_rejected() {
    usbforge()
        .args(["format", "2,x,4", "--json", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid disk number: x"))
        .stderr(predicate::str::contains("INVALID_INPUT"));
}

// ============================================================================
// Flash Argument Tests
// ============================================================================

#[test]
fn test_flash_missing_image_flag() {
    usbforge()
        .args(["flash", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--image"));
}

#[test]
fn test_flash_missing_image_file() {
    usbforge()
        .args([
            "flash",
            "2,3",
            "--image",
            "/nonexistent/path/image.img",
            "--json",
            "--yes",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Image file not found"))
        .stderr(predicate::str::contains("INVALID_INPUT"));
}

#[test]
fn test_flash_json_errors_are_one_object_per_line() {
    let output = usbforge()
        .args(["flash", "5-3", "--image", "x.img", "--json", "--yes"])
        .output()
        .unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();

    let error_line = stderr
        .lines()
        .find(|l| l.starts_with('{'))
        .expect("JSON error object on stderr");
    let value: serde_json::Value = serde_json::from_str(error_line).unwrap();
    assert!(value["error"].as_str().unwrap().contains("invalid range"));
    assert_eq!(value["code"], "INVALID_INPUT");
}

// ============================================================================
// Format Argument Tests
// ============================================================================

#[test]
fn test_format_unsupported_filesystem() {
    usbforge()
        .args(["format", "2,3", "--fs", "ext4", "--json", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "unsupported filesystem: ext4 (supported: fat32, ntfs, exfat)",
        ))
        .stderr(predicate::str::contains("INVALID_INPUT"));
}

// ============================================================================
// Label Argument Tests
// ============================================================================

#[test]
fn test_label_empty_name_rejected() {
    usbforge()
        .args(["label", "E", "--name", "", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("label name cannot be empty"))
        .stderr(predicate::str::contains("INVALID_INPUT"));
}

#[test]
fn test_label_invalid_drive_letter() {
    usbforge()
        .args(["label", "E!,F", "--name", "DATA", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid drive letter"))
        .stderr(predicate::str::contains("INVALID_INPUT"));
}

// ============================================================================
// Eject Argument Tests
// ============================================================================

#[test]
fn test_eject_invalid_identifier() {
    usbforge()
        .args(["eject", "EF", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid drive letter: EF"))
        .stderr(predicate::str::contains("INVALID_INPUT"));
}

// ============================================================================
// Platform Gating Tests
// ============================================================================

// Off Windows the inventory provider is unavailable; the commands must
// fail with a structured error instead of crashing.
#[cfg(not(windows))]
#[test]
fn test_list_unsupported_off_windows() {
    usbforge()
        .args(["list", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"code\""));
}

#[cfg(not(windows))]
#[test]
fn test_flash_requires_privileges() {
    // A real local image gets past source validation; the privilege gate
    // rejects before any device access
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("small.img");
    std::fs::write(&image, vec![0u8; 8192]).unwrap();

    usbforge()
        .args([
            "flash",
            "2,3",
            "--image",
            image.to_str().unwrap(),
            "--json",
            "--yes",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Administrator privileges required"))
        .stderr(predicate::str::contains("PERMISSION_DENIED"));
}
