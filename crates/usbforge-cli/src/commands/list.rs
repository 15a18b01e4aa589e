//! List command - shows connected USB storage devices.

use anyhow::Result;
use console::style;
use usbforge_detect::{Device, Enumerator};

use crate::output;

/// Execute the list command.
pub fn execute(json: bool) -> Result<()> {
    let devices = match Enumerator::new().list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            let e = usbforge_core::Error::from(e);
            let code = e.code();
            return Err(output::fail(json, e.to_string(), code));
        }
    };

    if json {
        return output::print_json(&devices);
    }

    if devices.is_empty() {
        println!("No USB storage devices found.");
        return Ok(());
    }

    println!(
        "{} {} USB device(s):\n",
        style("Found").green().bold(),
        devices.len()
    );
    for device in &devices {
        print_device(device);
    }

    Ok(())
}

fn print_device(device: &Device) {
    let letter = device
        .drive_letter
        .clone()
        .unwrap_or_else(|| "--".to_string());

    println!(
        "{} {} {} ({})",
        style(format!("[{}]", device.disk_number)).white().bold(),
        style(&letter).cyan(),
        style(&device.friendly_name).white(),
        device.size_human
    );
    println!(
        "    {} | {} | {} | {}",
        device.status,
        device.partition_style,
        if device.file_system.is_empty() {
            "no filesystem"
        } else {
            &device.file_system
        },
        if device.volume_label.is_empty() {
            "(unlabeled)"
        } else {
            &device.volume_label
        },
    );
    if !device.vendor_id.is_empty() {
        println!(
            "    {}",
            style(format!(
                "VID {} PID {} | {}",
                device.vendor_id, device.product_id, device.serial_number
            ))
            .dim()
        );
    }
    println!();
}
