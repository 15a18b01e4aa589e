//! Info command - detail view for one USB device.

use anyhow::Result;
use console::style;
use usbforge_core::Error;
use usbforge_detect::{parse_port_number, Enumerator};

use crate::output;

/// Execute the info command.
pub fn execute(identifier: &str, json: bool) -> Result<()> {
    let device = match Enumerator::new().get(identifier) {
        Ok(device) => device,
        Err(e) => {
            let e = Error::from(e);
            let code = e.code();
            return Err(output::fail(json, e.to_string(), code));
        }
    };

    if json {
        return output::print_json(&device);
    }

    println!(
        "{} {}",
        style("Device:").bold(),
        style(&device.friendly_name).cyan()
    );

    let rows = [
        ("Disk number", device.disk_number.to_string()),
        (
            "Drive letter",
            device
                .drive_letter
                .clone()
                .unwrap_or_else(|| "(none)".to_string()),
        ),
        ("Model", device.model.clone()),
        ("Serial number", device.serial_number.clone()),
        (
            "Size",
            format!("{} ({} bytes)", device.size_human, device.size),
        ),
        (
            "Vendor/Product",
            if device.vendor_id.is_empty() {
                "(unknown)".to_string()
            } else {
                format!("VID_{} PID_{}", device.vendor_id, device.product_id)
            },
        ),
        ("Filesystem", device.file_system.clone()),
        ("Volume label", device.volume_label.clone()),
        ("Partition style", device.partition_style.clone()),
        ("Health", device.health_status.clone()),
        ("Status", device.status.clone()),
        ("Bus type", device.bus_type.clone()),
    ];
    for (name, value) in rows {
        let value = if value.is_empty() {
            "(unknown)".to_string()
        } else {
            value
        };
        println!("  {:<16} {}", style(name).dim(), value);
    }

    if !device.location_info.is_empty() {
        let port = parse_port_number(&device.location_info);
        if port.is_empty() {
            println!("  {:<16} {}", style("Hub port").dim(), device.location_info);
        } else {
            println!(
                "  {:<16} port {} ({})",
                style("Hub port").dim(),
                port,
                device.location_info
            );
        }
    }

    Ok(())
}
