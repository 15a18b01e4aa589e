//! Eject command - safe removal of a USB drive.

use anyhow::Result;
use console::style;
use dialoguer::Confirm;
use usbforge_core::{Error, ErrorCode};
use usbforge_detect::Enumerator;

use crate::output;

/// Execute the eject command.
///
/// Performs the same action as "Safely Remove Hardware": pending writes
/// are flushed and the device is offered for removal.
pub fn execute(identifier: &str, yes: bool, json: bool) -> Result<()> {
    let enumerator = Enumerator::new();
    let device = enumerator
        .get(identifier)
        .map_err(|e| output::fail_with(json, Error::from(e)))?;

    let Some(letter) = device.drive_letter_char() else {
        return Err(output::fail(
            json,
            format!(
                "USB disk {} has no drive letter assigned - cannot eject",
                device.disk_number
            ),
            ErrorCode::InvalidInput,
        ));
    };

    if !yes && !json {
        println!(
            "Ejecting {}: ({} - {})",
            letter, device.friendly_name, device.size_human
        );
        let confirmed = Confirm::new()
            .with_prompt("Continue?")
            .default(true)
            .interact()?;
        if !confirmed {
            println!("Eject cancelled");
            return Ok(());
        }
    }

    usbforge_platform::eject_volume(letter)
        .map_err(|e| output::fail_with(json, Error::from(e)))?;

    enumerator.invalidate();

    if json {
        output::print_json(&serde_json::json!({
            "success": true,
            "driveLetter": format!("{}:", letter),
        }))?;
    } else {
        println!(
            "{} Drive {}: ejected safely",
            style("✓").green().bold(),
            letter
        );
    }
    Ok(())
}
