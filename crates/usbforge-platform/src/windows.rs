//! Windows storage backend.
//!
//! Opens physical disks with `CreateFileW` for unbuffered write-through I/O,
//! locks and dismounts mounted volumes before writing, and wraps the volume
//! label and eject operations.

use crate::{PlatformError, RawDisk, Result};

#[cfg(windows)]
use std::ptr;

#[cfg(windows)]
use windows_sys::Win32::Foundation::{
    CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
#[cfg(windows)]
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, SetFilePointerEx, SetVolumeLabelW, WriteFile, FILE_BEGIN,
    FILE_FLAG_NO_BUFFERING, FILE_FLAG_WRITE_THROUGH, FILE_SHARE_READ, FILE_SHARE_WRITE,
    OPEN_EXISTING,
};
#[cfg(windows)]
use windows_sys::Win32::System::Ioctl::{
    FSCTL_ALLOW_EXTENDED_DASD_IO, FSCTL_DISMOUNT_VOLUME, FSCTL_LOCK_VOLUME,
    GET_LENGTH_INFORMATION, IOCTL_DISK_GET_LENGTH_INFO,
};
#[cfg(windows)]
use windows_sys::Win32::System::IO::DeviceIoControl;

/// Raw writer for one physical disk.
///
/// `open` locks and dismounts every mounted volume on the disk before
/// opening the disk itself; the writer owns all acquired handles and closes
/// them in reverse order (volumes first, then the disk) so the OS can
/// remount. Close is idempotent and also runs on drop.
pub struct DiskWriter {
    disk_number: u32,
    drive_letter_hint: Option<char>,
    #[cfg(windows)]
    handle: HANDLE,
    #[cfg(windows)]
    volumes: Vec<HANDLE>,
}

// Handles are owned exclusively by the writer.
#[cfg(windows)]
unsafe impl Send for DiskWriter {}

impl DiskWriter {
    /// Create a writer for the given disk. Volume letters are discovered
    /// through the system inventory when `open` runs.
    pub fn new(disk_number: u32) -> Self {
        Self {
            disk_number,
            drive_letter_hint: None,
            #[cfg(windows)]
            handle: INVALID_HANDLE_VALUE,
            #[cfg(windows)]
            volumes: Vec::new(),
        }
    }

    /// Create a writer with a known drive letter, bypassing the inventory
    /// lookup during `open`.
    pub fn with_drive_letter(disk_number: u32, drive_letter: char) -> Self {
        Self {
            drive_letter_hint: Some(drive_letter.to_ascii_uppercase()),
            ..Self::new(disk_number)
        }
    }

    /// The disk number this writer targets.
    pub fn disk_number(&self) -> u32 {
        self.disk_number
    }

    /// Drive letters to lock before opening the disk: the hint when one was
    /// supplied, otherwise every lettered partition the inventory reports.
    /// Lookup failures are non-fatal; a disk may simply have no volumes.
    fn volume_letters(&self) -> Vec<char> {
        if let Some(letter) = self.drive_letter_hint {
            return vec![letter];
        }
        match usbforge_detect::Enumerator::new().volume_letters(self.disk_number) {
            Ok(letters) => letters,
            Err(e) => {
                tracing::debug!(disk = self.disk_number, "volume letter lookup failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(windows)]
impl DiskWriter {
    /// Prepare the disk for raw I/O: lock and dismount its volumes, then
    /// open the physical device unbuffered and write-through.
    pub fn open(&mut self) -> Result<()> {
        self.lock_volumes();

        let path = crate::physical_drive_path(self.disk_number);
        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();

        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH,
                0,
            )
        };

        if handle == INVALID_HANDLE_VALUE {
            let error = std::io::Error::last_os_error();
            self.close();
            return Err(match error.raw_os_error() {
                Some(5) => PlatformError::PermissionDenied(format!(
                    "cannot open {}. Run as Administrator",
                    path
                )),
                Some(32) => {
                    PlatformError::DeviceBusy(format!("{} is in use by another process", path))
                }
                Some(2) | Some(3) => PlatformError::DeviceNotFound(path),
                _ => PlatformError::Io(error),
            });
        }

        self.handle = handle;

        // Allow writes past the first partition on large disks; failure is
        // tolerable on media without a partition table.
        let mut bytes_returned: u32 = 0;
        unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_ALLOW_EXTENDED_DASD_IO,
                ptr::null(),
                0,
                ptr::null_mut(),
                0,
                &mut bytes_returned,
                ptr::null_mut(),
            );
        }

        Ok(())
    }

    /// Lock and dismount every mounted volume on this disk.
    ///
    /// A volume that cannot be locked is skipped rather than failing the
    /// whole open; its handle is closed immediately. Successfully locked
    /// handles are retained so the locks persist until `close`.
    fn lock_volumes(&mut self) {
        for letter in self.volume_letters() {
            let path = crate::volume_path(letter);
            let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();

            let handle = unsafe {
                CreateFileW(
                    wide.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    ptr::null(),
                    OPEN_EXISTING,
                    0,
                    0,
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                continue;
            }

            let mut bytes_returned: u32 = 0;
            let locked = unsafe {
                DeviceIoControl(
                    handle,
                    FSCTL_LOCK_VOLUME,
                    ptr::null(),
                    0,
                    ptr::null_mut(),
                    0,
                    &mut bytes_returned,
                    ptr::null_mut(),
                )
            };
            if locked == 0 {
                unsafe { CloseHandle(handle) };
                tracing::warn!(disk = self.disk_number, volume = %letter, "volume lock failed, skipping");
                continue;
            }

            // Dismount is best-effort; the lock alone prevents new opens.
            unsafe {
                DeviceIoControl(
                    handle,
                    FSCTL_DISMOUNT_VOLUME,
                    ptr::null(),
                    0,
                    ptr::null_mut(),
                    0,
                    &mut bytes_returned,
                    ptr::null_mut(),
                );
            }

            self.volumes.push(handle);
        }
    }

    /// Total disk size in bytes.
    pub fn size(&self) -> Result<u64> {
        if self.handle == INVALID_HANDLE_VALUE {
            return Err(PlatformError::DeviceNotFound("disk not opened".to_string()));
        }

        let mut info: GET_LENGTH_INFORMATION = unsafe { std::mem::zeroed() };
        let mut bytes_returned: u32 = 0;
        let ok = unsafe {
            DeviceIoControl(
                self.handle,
                IOCTL_DISK_GET_LENGTH_INFO,
                ptr::null(),
                0,
                &mut info as *mut _ as *mut _,
                std::mem::size_of::<GET_LENGTH_INFORMATION>() as u32,
                &mut bytes_returned,
                ptr::null_mut(),
            )
        };

        if ok == 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        Ok(info.Length as u64)
    }

    /// Release every handle: volumes first (releases the locks and lets the
    /// OS remount), then the disk. Idempotent.
    pub fn close(&mut self) {
        for handle in self.volumes.drain(..) {
            unsafe { CloseHandle(handle) };
        }
        if self.handle != INVALID_HANDLE_VALUE {
            unsafe { CloseHandle(self.handle) };
            self.handle = INVALID_HANDLE_VALUE;
        }
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        let mut new_pos: i64 = 0;
        let ok =
            unsafe { SetFilePointerEx(self.handle, offset as i64, &mut new_pos, FILE_BEGIN) };
        if ok == 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn check_open_and_aligned(&self, len: usize, offset: u64) -> Result<()> {
        if self.handle == INVALID_HANDLE_VALUE {
            return Err(PlatformError::DeviceNotFound("disk not opened".to_string()));
        }
        if !crate::is_aligned(offset) || !crate::is_aligned(len as u64) {
            return Err(PlatformError::AlignmentError(format!(
                "offset {} / length {} not sector-aligned",
                offset, len
            )));
        }
        Ok(())
    }
}

#[cfg(windows)]
impl RawDisk for DiskWriter {
    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        self.check_open_and_aligned(data.len(), offset)?;
        self.seek_to(offset)?;

        let mut written: u32 = 0;
        let ok = unsafe {
            WriteFile(
                self.handle,
                data.as_ptr(),
                data.len() as u32,
                &mut written,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        Ok(written as usize)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.check_open_and_aligned(buf.len(), offset)?;
        self.seek_to(offset)?;

        let mut read: u32 = 0;
        let ok = unsafe {
            ReadFile(
                self.handle,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut read,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        Ok(read as usize)
    }
}

#[cfg(windows)]
impl Drop for DiskWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Set the label of a mounted volume via `SetVolumeLabelW`.
#[cfg(windows)]
pub fn set_volume_label(drive_letter: char, label: &str) -> Result<()> {
    let root = format!("{}:\\", drive_letter.to_ascii_uppercase());
    let root_wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
    let label_wide: Vec<u16> = label.encode_utf16().chain(std::iter::once(0)).collect();

    let ok = unsafe { SetVolumeLabelW(root_wide.as_ptr(), label_wide.as_ptr()) };
    if ok == 0 {
        return Err(PlatformError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Safely eject a mounted volume through the shell's Eject verb, the same
/// action as "Safely Remove Hardware".
#[cfg(windows)]
pub fn eject_volume(drive_letter: char) -> Result<()> {
    use std::process::Command;

    let script = format!(
        r#"$shell = New-Object -ComObject Shell.Application
$drive = $shell.Namespace(17).ParseName("{}:")
if ($drive) {{
    $drive.InvokeVerb("Eject")
    Write-Output "OK"
}} else {{
    Write-Error "Drive not found"
    exit 1
}}"#,
        drive_letter.to_ascii_uppercase()
    );

    let output = Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", &script])
        .output()
        .map_err(|e| PlatformError::CommandFailed(format!("powershell failed: {}", e)))?;

    if !output.status.success() {
        return Err(PlatformError::CommandFailed(format!(
            "eject failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Check whether the process runs with an elevated (Administrator) token.
#[cfg(windows)]
pub fn has_elevated_privileges() -> bool {
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token: HANDLE = 0;
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }

        let mut elevation: TOKEN_ELEVATION = std::mem::zeroed();
        let mut size: u32 = 0;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut _ as *mut _,
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut size,
        );

        CloseHandle(token);

        ok != 0 && elevation.TokenIsElevated != 0
    }
}

// ----------------------------------------------------------------------------
// Non-Windows stubs, so dependent crates build and test anywhere.
// ----------------------------------------------------------------------------

#[cfg(not(windows))]
impl DiskWriter {
    /// Prepare the disk for raw I/O (Windows only).
    pub fn open(&mut self) -> Result<()> {
        Err(not_supported())
    }

    /// Total disk size in bytes (Windows only).
    pub fn size(&self) -> Result<u64> {
        Err(not_supported())
    }

    /// Release every handle. No-op off Windows.
    pub fn close(&mut self) {}
}

#[cfg(not(windows))]
impl RawDisk for DiskWriter {
    fn write_at(&mut self, _data: &[u8], _offset: u64) -> Result<usize> {
        Err(not_supported())
    }

    fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
        Err(not_supported())
    }
}

/// Set the label of a mounted volume (Windows only).
#[cfg(not(windows))]
pub fn set_volume_label(_drive_letter: char, _label: &str) -> Result<()> {
    Err(not_supported())
}

/// Safely eject a mounted volume (Windows only).
#[cfg(not(windows))]
pub fn eject_volume(_drive_letter: char) -> Result<()> {
    Err(not_supported())
}

/// Check for elevated privileges. Always false off Windows.
#[cfg(not(windows))]
pub fn has_elevated_privileges() -> bool {
    false
}

#[cfg(not(windows))]
fn not_supported() -> PlatformError {
    PlatformError::NotSupported("raw disk access requires Windows".to_string())
}

// ============================================================================
// UNIT TESTS
// ============================================================================
