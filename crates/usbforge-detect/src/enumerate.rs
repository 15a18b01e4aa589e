//! Device enumeration: joins the inventory snapshots into [`Device`] records
//! and resolves user identifiers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::inventory::{PowerShellInventory, SystemInventory};
use crate::{format_size, parse_vid_pid, DetectError, Device, Result};

/// How long an enumeration snapshot stays valid.
pub const CACHE_TTL: Duration = Duration::from_secs(2);

struct Snapshot {
    taken: Instant,
    devices: Vec<Device>,
}

/// USB device enumerator with a short-lived snapshot cache.
pub struct Enumerator {
    inventory: Box<dyn SystemInventory>,
    cache: Mutex<Option<Snapshot>>,
}

impl Enumerator {
    /// Create an enumerator backed by the default PowerShell inventory.
    pub fn new() -> Self {
        Self::with_inventory(Box::new(PowerShellInventory::new()))
    }

    /// Create an enumerator over a custom inventory provider.
    pub fn with_inventory(inventory: Box<dyn SystemInventory>) -> Self {
        Self {
            inventory,
            cache: Mutex::new(None),
        }
    }

    /// All connected USB storage devices.
    ///
    /// Snapshots are cached for [`CACHE_TTL`]; a stale or absent cache
    /// triggers a fresh enumeration.
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.taken.elapsed() < CACHE_TTL {
                    return Ok(snapshot.devices.clone());
                }
            }
        }

        let devices = self.enumerate()?;

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(Snapshot {
                taken: Instant::now(),
                devices: devices.clone(),
            });
        }

        Ok(devices)
    }

    /// Drop the cached snapshot. Call after destructive operations.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Look up a device by OS disk number.
    pub fn get_by_disk_number(&self, disk_number: u32) -> Result<Device> {
        self.list_devices()?
            .into_iter()
            .find(|d| d.disk_number == disk_number)
            .ok_or(DetectError::DiskNotFound(disk_number))
    }

    /// Look up a device by drive letter ("E", "E:", case-insensitive).
    pub fn get_by_drive_letter(&self, drive_letter: &str) -> Result<Device> {
        let letter = normalize_drive_letter(drive_letter)?;
        self.list_devices()?
            .into_iter()
            .find(|d| d.drive_letter_char() == Some(letter))
            .ok_or(DetectError::DriveNotFound(letter))
    }

    /// Resolve an identifier that is either a disk number ("2") or a drive
    /// letter ("E" / "E:").
    pub fn get(&self, identifier: &str) -> Result<Device> {
        if let Ok(disk_number) = identifier.parse::<u32>() {
            return self.get_by_disk_number(disk_number);
        }
        self.get_by_drive_letter(identifier)
    }

    /// Every drive letter mounted on the given disk, in partition order.
    ///
    /// Queries the inventory directly (no snapshot cache): callers use this
    /// immediately before locking volumes, when staleness matters.
    pub fn volume_letters(&self, disk_number: u32) -> Result<Vec<char>> {
        let partitions = self.inventory.disk_partitions()?;
        let links = self.inventory.partition_volume_links()?;

        let letter_of: HashMap<&str, &str> = links
            .iter()
            .map(|l| (l.partition_device_id.as_str(), l.drive_letter.as_str()))
            .collect();

        let mut letters = Vec::new();
        for partition in partitions.iter().filter(|p| p.disk_index == disk_number) {
            if let Some(letter) = letter_of
                .get(partition.device_id.as_str())
                .and_then(|s| s.chars().next())
            {
                if !letters.contains(&letter) {
                    letters.push(letter);
                }
            }
        }
        Ok(letters)
    }

    /// Whether the disk carries system/boot/recovery partitions.
    pub fn is_system_disk(&self, disk_number: u32) -> Result<bool> {
        self.inventory.is_system_disk(disk_number)
    }

    fn enumerate(&self) -> Result<Vec<Device>> {
        // The primary query is fatal; the three join queries only degrade
        // the output.
        let disks = self.inventory.usb_disk_drives()?;

        let partitions = self.inventory.disk_partitions().unwrap_or_else(|e| {
            tracing::warn!("partition query failed, drive letters unavailable: {e}");
            Vec::new()
        });
        let links = self.inventory.partition_volume_links().unwrap_or_else(|e| {
            tracing::warn!("volume association query failed: {e}");
            Vec::new()
        });
        let volumes = self.inventory.logical_volumes().unwrap_or_else(|e| {
            tracing::warn!("logical volume query failed: {e}");
            Vec::new()
        });

        // disk number -> first partition device id (first by iteration order)
        let mut first_partition: HashMap<u32, &str> = HashMap::new();
        for partition in &partitions {
            first_partition
                .entry(partition.disk_index)
                .or_insert(partition.device_id.as_str());
        }

        // partition device id -> drive letter
        let letter_of: HashMap<&str, &str> = links
            .iter()
            .map(|l| (l.partition_device_id.as_str(), l.drive_letter.as_str()))
            .collect();

        // drive letter -> logical volume record
        let volume_of: HashMap<&str, &crate::inventory::LogicalVolumeRecord> =
            volumes.iter().map(|v| (v.drive_letter.as_str(), v)).collect();

        let mut devices = Vec::with_capacity(disks.len());
        for disk in &disks {
            let (vendor_id, product_id) = parse_vid_pid(&disk.pnp_device_id);

            let mut device = Device {
                disk_number: disk.index,
                drive_letter: None,
                friendly_name: disk.friendly_name.clone(),
                model: disk.model.clone(),
                serial_number: disk.serial_number.clone(),
                size: disk.size,
                size_human: format_size(disk.size),
                vendor_id,
                product_id,
                file_system: String::new(),
                volume_label: String::new(),
                partition_style: disk.partition_style.clone(),
                health_status: disk.health_status.clone(),
                status: operational_status_name(&disk.operational_status),
                media_type: disk.media_type.clone(),
                bus_type: "USB".to_string(),
                location_info: disk.location_info.clone(),
                parent_instance_id: disk.parent_instance_id.clone(),
            };

            // Chain (i) disk -> partition, (ii) partition -> letter,
            // (iii) letter -> volume. A missing link leaves the optional
            // fields empty rather than failing.
            if let Some(letter) = first_partition
                .get(&disk.index)
                .and_then(|p| letter_of.get(p).copied())
            {
                device.drive_letter = Some(with_colon(letter));
                if let Some(volume) = volume_of.get(letter) {
                    device.file_system = volume.file_system.clone();
                    device.volume_label = volume.volume_label.clone();
                }
            }

            devices.push(device);
        }

        Ok(devices)
    }
}

impl Default for Enumerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an inventory operational status value to a display string.
fn operational_status_name(status: &serde_json::Value) -> String {
    match status {
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(2) | Some(0xD010) => "Online".to_string(),
            Some(0xD012) => "No Media".to_string(),
            _ => "Unknown".to_string(),
        },
        serde_json::Value::String(s) => s.clone(),
        _ => "Unknown".to_string(),
    }
}

/// Parse "E", "e:", "E:" into the letter `E`.
fn normalize_drive_letter(input: &str) -> Result<char> {
    let upper = input.to_uppercase();
    let trimmed = upper.strip_suffix(':').unwrap_or(&upper);
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_uppercase() => Ok(c),
        _ => Err(DetectError::InvalidDriveLetter(input.to_string())),
    }
}

fn with_colon(letter: &str) -> String {
    if letter.ends_with(':') {
        letter.to_string()
    } else {
        format!("{}:", letter)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
