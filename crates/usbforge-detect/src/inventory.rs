//! System inventory provider.
//!
//! The enumerator never talks to the platform directly; it consumes four
//! typed record streams from a [`SystemInventory`] implementation. The
//! default provider runs PowerShell queries and parses their JSON output,
//! which keeps the join logic testable with an in-memory provider.

use serde::{Deserialize, Deserializer};

use crate::{DetectError, Result};

/// One USB disk drive as reported by the primary inventory query.
///
/// This is the authoritative record: a disk absent from this query does not
/// exist as far as the toolkit is concerned. `location_info` and
/// `parent_instance_id` are best-effort hub-port enrichment and may be empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiskDriveRecord {
    /// OS disk index
    #[serde(rename = "Index")]
    pub index: u32,

    /// Friendly name
    #[serde(rename = "FriendlyName", deserialize_with = "null_to_default")]
    pub friendly_name: String,

    /// Model string
    #[serde(rename = "Model", deserialize_with = "null_to_default")]
    pub model: String,

    /// Serial number
    #[serde(rename = "SerialNumber", deserialize_with = "null_to_default")]
    pub serial_number: String,

    /// Size in bytes
    #[serde(rename = "Size", deserialize_with = "null_to_default")]
    pub size: u64,

    /// Media type string
    #[serde(rename = "MediaType", deserialize_with = "null_to_default")]
    pub media_type: String,

    /// Partition table style
    #[serde(rename = "PartitionStyle", deserialize_with = "null_to_default")]
    pub partition_style: String,

    /// Health status
    #[serde(rename = "HealthStatus", deserialize_with = "null_to_default")]
    pub health_status: String,

    /// Operational status; numeric or string depending on the OS version
    #[serde(rename = "OperationalStatus")]
    pub operational_status: serde_json::Value,

    /// Bus type; `"USB"` for every record this query returns
    #[serde(rename = "BusType", deserialize_with = "null_to_default")]
    pub bus_type: String,

    /// Vendor-supplied PNP device path, carries the VID/PID component
    #[serde(rename = "PNPDeviceID", deserialize_with = "null_to_default")]
    pub pnp_device_id: String,

    /// Hub port location string, e.g. `"Port_#0002.Hub_#0002"`
    #[serde(rename = "LocationInfo", deserialize_with = "null_to_default")]
    pub location_info: String,

    /// Instance id of the parent hub node
    #[serde(rename = "ParentInstanceId", deserialize_with = "null_to_default")]
    pub parent_instance_id: String,
}

/// One disk partition: links a disk index to the partition's device id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartitionRecord {
    /// Index of the disk this partition belongs to
    #[serde(rename = "DiskIndex")]
    pub disk_index: u32,

    /// Partition device id, e.g. `"Disk #2, Partition #0"`
    #[serde(rename = "DeviceID", deserialize_with = "null_to_default")]
    pub device_id: String,
}

/// One partition-to-logical-volume association.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartitionLinkRecord {
    /// Partition device id (matches [`PartitionRecord::device_id`])
    #[serde(rename = "Partition", deserialize_with = "null_to_default")]
    pub partition_device_id: String,

    /// Drive letter of the associated logical volume, e.g. `"E:"`
    #[serde(rename = "DriveLetter", deserialize_with = "null_to_default")]
    pub drive_letter: String,
}

/// One mounted removable logical volume.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogicalVolumeRecord {
    /// Drive letter, e.g. `"E:"`
    #[serde(rename = "DeviceID", deserialize_with = "null_to_default")]
    pub drive_letter: String,

    /// Filesystem name, e.g. `"FAT32"`
    #[serde(rename = "FileSystem", deserialize_with = "null_to_default")]
    pub file_system: String,

    /// Volume label
    #[serde(rename = "VolumeName", deserialize_with = "null_to_default")]
    pub volume_label: String,
}

/// Abstract inventory capability consumed by the enumerator.
///
/// A failing [`usb_disk_drives`](SystemInventory::usb_disk_drives) query is
/// fatal for enumeration; failures of the three join queries degrade the
/// output (missing drive letter / filesystem / label) and are recovered by
/// the caller.
pub trait SystemInventory: Send + Sync {
    /// All USB disk drives, with hub-port enrichment where available.
    fn usb_disk_drives(&self) -> Result<Vec<DiskDriveRecord>>;

    /// All disk partitions (any bus; filtered by disk index at join time).
    fn disk_partitions(&self) -> Result<Vec<PartitionRecord>>;

    /// Partition-to-logical-volume associations.
    fn partition_volume_links(&self) -> Result<Vec<PartitionLinkRecord>>;

    /// Mounted removable logical volumes.
    fn logical_volumes(&self) -> Result<Vec<LogicalVolumeRecord>>;

    /// Whether a disk carries System/Reserved/Recovery partitions or the C:
    /// drive. Used by callers as a safety gate before destructive work.
    fn is_system_disk(&self, disk_number: u32) -> Result<bool>;
}

/// Deserialize JSON `null` as the type's default. PowerShell emits `null`
/// for absent fields rather than omitting them.
fn null_to_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse `ConvertTo-Json` output that may be an array, a single object, or
/// empty. PowerShell unwraps single-element arrays.
pub(crate) fn parse_json_records<T>(raw: &str) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| DetectError::ParseError(e.to_string()))
    } else {
        let one: T =
            serde_json::from_str(trimmed).map_err(|e| DetectError::ParseError(e.to_string()))?;
        Ok(vec![one])
    }
}

/// Batched primary query: one PowerShell spawn joins the USB disk list with
/// the PNP device paths and walks the device tree (at most 10 levels) for
/// the hub-port location of each disk.
const USB_DISK_DRIVES_SCRIPT: &str = r#"
$disks = @(Get-Disk | Where-Object {$_.BusType -eq 'USB'} | Select-Object Number, FriendlyName, SerialNumber, Size, PartitionStyle, HealthStatus, OperationalStatus)
$drives = @(Get-CimInstance Win32_DiskDrive -Filter "InterfaceType='USB'" -ErrorAction SilentlyContinue | Select-Object Index, Model, Caption, MediaType, PNPDeviceID)
$records = @()
foreach ($d in $drives) {
    $disk = $disks | Where-Object { $_.Number -eq $d.Index } | Select-Object -First 1
    if (-not $disk) { continue }
    $currentId = $d.PNPDeviceID
    $locInfo = ''
    $parentId = ''
    for ($i = 0; $i -lt 10 -and $currentId; $i++) {
        $loc = (Get-PnpDeviceProperty -InstanceId $currentId -KeyName 'DEVPKEY_Device_LocationInfo' -ErrorAction SilentlyContinue).Data
        if ($loc -and $loc -match 'Port') {
            $locInfo = $loc
            $parentId = (Get-PnpDeviceProperty -InstanceId $currentId -KeyName 'DEVPKEY_Device_Parent' -ErrorAction SilentlyContinue).Data
            break
        }
        $currentId = (Get-PnpDeviceProperty -InstanceId $currentId -KeyName 'DEVPKEY_Device_Parent' -ErrorAction SilentlyContinue).Data
    }
    $records += [pscustomobject]@{
        Index = $d.Index
        FriendlyName = $disk.FriendlyName
        Model = $d.Model
        SerialNumber = $disk.SerialNumber
        Size = $disk.Size
        MediaType = $d.MediaType
        PartitionStyle = "$($disk.PartitionStyle)"
        HealthStatus = "$($disk.HealthStatus)"
        OperationalStatus = "$($disk.OperationalStatus)"
        BusType = 'USB'
        PNPDeviceID = $d.PNPDeviceID
        LocationInfo = $locInfo
        ParentInstanceId = $parentId
    }
}
ConvertTo-Json @($records) -Depth 4 -Compress
"#;

const DISK_PARTITIONS_SCRIPT: &str = r#"ConvertTo-Json @(Get-CimInstance Win32_DiskPartition -ErrorAction SilentlyContinue | Select-Object DiskIndex, DeviceID) -Compress"#;

const PARTITION_LINKS_SCRIPT: &str = r#"ConvertTo-Json @(Get-CimInstance Win32_LogicalDiskToPartition -ErrorAction SilentlyContinue | ForEach-Object { [pscustomobject]@{ Partition = $_.Antecedent.DeviceID; DriveLetter = $_.Dependent.DeviceID } }) -Compress"#;

const LOGICAL_VOLUMES_SCRIPT: &str = r#"ConvertTo-Json @(Get-CimInstance Win32_LogicalDisk -Filter "DriveType=2" -ErrorAction SilentlyContinue | Select-Object DeviceID, FileSystem, VolumeName) -Compress"#;

/// The default provider: PowerShell + WMI/CIM queries.
#[derive(Debug, Default)]
pub struct PowerShellInventory;

impl PowerShellInventory {
    /// Create a new PowerShell-backed inventory provider.
    pub fn new() -> Self {
        Self
    }

    #[cfg(windows)]
    fn run(&self, script: &str) -> Result<String> {
        use std::process::Command;

        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", script])
            .output()
            .map_err(|e| DetectError::CommandFailed(format!("powershell failed: {}", e)))?;

        if !output.status.success() {
            return Err(DetectError::CommandFailed(format!(
                "powershell failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    #[cfg(not(windows))]
    fn run(&self, _script: &str) -> Result<String> {
        Err(DetectError::NotSupported(
            "system inventory requires Windows".to_string(),
        ))
    }
}

impl SystemInventory for PowerShellInventory {
    fn usb_disk_drives(&self) -> Result<Vec<DiskDriveRecord>> {
        let raw = self
            .run(USB_DISK_DRIVES_SCRIPT)
            .map_err(|e| DetectError::QueryFailed(e.to_string()))?;
        parse_json_records(&raw).map_err(|e| DetectError::QueryFailed(e.to_string()))
    }

    fn disk_partitions(&self) -> Result<Vec<PartitionRecord>> {
        parse_json_records(&self.run(DISK_PARTITIONS_SCRIPT)?)
    }

    fn partition_volume_links(&self) -> Result<Vec<PartitionLinkRecord>> {
        parse_json_records(&self.run(PARTITION_LINKS_SCRIPT)?)
    }

    fn logical_volumes(&self) -> Result<Vec<LogicalVolumeRecord>> {
        parse_json_records(&self.run(LOGICAL_VOLUMES_SCRIPT)?)
    }

    fn is_system_disk(&self, disk_number: u32) -> Result<bool> {
        let script = format!(
            r#"$parts = Get-Partition -DiskNumber {} -ErrorAction SilentlyContinue | Where-Object {{ $_.Type -eq 'System' -or $_.Type -eq 'Reserved' -or $_.Type -eq 'Recovery' -or $_.DriveLetter -eq 'C' }}
if ($parts) {{ 'true' }} else {{ 'false' }}"#,
            disk_number
        );
        Ok(self.run(&script)?.trim() == "true")
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // parse_json_records tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_json_records_empty() {
        let records: Vec<PartitionRecord> = parse_json_records("").unwrap();
        assert!(records.is_empty());

        let records: Vec<PartitionRecord> = parse_json_records("null").unwrap();
        assert!(records.is_empty());

        let records: Vec<PartitionRecord> = parse_json_records("  \n ").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_json_records_array() {
        let raw = r#"[{"DiskIndex":2,"DeviceID":"Disk #2, Partition #0"},{"DiskIndex":3,"DeviceID":"Disk #3, Partition #0"}]"#;
        let records: Vec<PartitionRecord> = parse_json_records(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].disk_index, 2);
        assert_eq!(records[1].device_id, "Disk #3, Partition #0");
    }

    #[test]
    fn test_parse_json_records_single_object() {
        // PowerShell unwraps single-element arrays
        let raw = r#"{"DiskIndex":2,"DeviceID":"Disk #2, Partition #0"}"#;
        let records: Vec<PartitionRecord> = parse_json_records(raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].disk_index, 2);
    }

    #[test]
    fn test_parse_json_records_invalid() {
        let result: Result<Vec<PartitionRecord>> = parse_json_records("{not json");
        assert!(matches!(result, Err(DetectError::ParseError(_))));
    }

    // -------------------------------------------------------------------------
    // Record deserialization tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_disk_drive_record_null_fields() {
        let raw = r#"{"Index":2,"FriendlyName":"SanDisk Ultra","Model":null,"SerialNumber":null,"Size":15728640000,"MediaType":"Removable Media","PartitionStyle":"MBR","HealthStatus":"Healthy","OperationalStatus":"Online","BusType":"USB","PNPDeviceID":"USB\\VID_0781&PID_5567\\X","LocationInfo":null,"ParentInstanceId":null}"#;
        let records: Vec<DiskDriveRecord> = parse_json_records(raw).unwrap();
        assert_eq!(records[0].index, 2);
        assert_eq!(records[0].model, "");
        assert_eq!(records[0].serial_number, "");
        assert_eq!(records[0].size, 15_728_640_000);
        assert_eq!(records[0].location_info, "");
    }

    #[test]
    fn test_disk_drive_record_missing_fields() {
        let raw = r#"{"Index":1,"Size":1000}"#;
        let records: Vec<DiskDriveRecord> = parse_json_records(raw).unwrap();
        assert_eq!(records[0].index, 1);
        assert_eq!(records[0].friendly_name, "");
        assert!(records[0].operational_status.is_null());
    }

    #[test]
    fn test_logical_volume_record() {
        let raw = r#"[{"DeviceID":"E:","FileSystem":"FAT32","VolumeName":"USB"}]"#;
        let records: Vec<LogicalVolumeRecord> = parse_json_records(raw).unwrap();
        assert_eq!(records[0].drive_letter, "E:");
        assert_eq!(records[0].file_system, "FAT32");
        assert_eq!(records[0].volume_label, "USB");
    }

    #[test]
    fn test_partition_link_record() {
        let raw = r#"[{"Partition":"Disk #2, Partition #0","DriveLetter":"E:"}]"#;
        let records: Vec<PartitionLinkRecord> = parse_json_records(raw).unwrap();
        assert_eq!(records[0].partition_device_id, "Disk #2, Partition #0");
        assert_eq!(records[0].drive_letter, "E:");
    }
}
