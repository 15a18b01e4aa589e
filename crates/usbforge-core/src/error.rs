//! Error types for the usbforge core engine.

use thiserror::Error;

/// Main error type for storage operations
#[derive(Error, Debug)]
pub enum Error {
    /// Device enumeration or resolution failed
    #[error(transparent)]
    Detect(#[from] usbforge_detect::DetectError),

    /// Raw device or adapter operation failed
    #[error(transparent)]
    Platform(#[from] usbforge_platform::PlatformError),

    /// IO error during read/write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image source missing
    #[error("failed to open image: {0}")]
    SourceNotFound(String),

    /// Image source is zero bytes
    #[error("image file is empty")]
    EmptySource,

    /// Archive carries no streamable image member
    #[error("no image file found in zip (supported: .img, .iso, .bin, .raw)")]
    NoImageInZip,

    /// Network failure for remote sources
    #[error("{0}")]
    Network(String),

    /// Decoder header invalid or decompression failed
    #[error("{0}")]
    Decompression(String),

    /// Invalid user input (identifier, option, range)
    #[error("{0}")]
    InvalidInput(String),

    /// The per-disk lock could not be acquired in time
    #[error("disk {0} is being used by another usbforge instance")]
    DiskBusy(u32),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Read-back verification found differing bytes
    #[error("verify: data mismatch at offset {0}")]
    VerifyMismatch(u64),

    /// The external format operation failed
    #[error("format failed: {0}")]
    FormatFailed(String),

    /// Unexpected internal condition
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using the core error type
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of machine-readable error codes surfaced on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Device absent from the USB inventory
    UsbNotFound,
    /// Format operation failed
    FormatFailed,
    /// Flash pipeline failed
    FlashFailed,
    /// Elevated privileges missing
    PermissionDenied,
    /// Unparseable or out-of-range input
    InvalidInput,
    /// Another instance holds the disk
    DiskBusy,
    /// Unexpected internal condition
    InternalError,
}

impl ErrorCode {
    /// The wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UsbNotFound => "USB_NOT_FOUND",
            ErrorCode::FormatFailed => "FORMAT_FAILED",
            ErrorCode::FlashFailed => "FLASH_FAILED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::DiskBusy => "DISK_BUSY",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into its machine-readable code.
    pub fn code(&self) -> ErrorCode {
        use usbforge_detect::DetectError;
        use usbforge_platform::PlatformError;

        match self {
            Error::Detect(DetectError::DiskNotFound(_))
            | Error::Detect(DetectError::DriveNotFound(_)) => ErrorCode::UsbNotFound,
            Error::Detect(DetectError::InvalidDriveLetter(_)) => ErrorCode::InvalidInput,
            Error::Detect(_) => ErrorCode::InternalError,

            Error::Platform(PlatformError::PermissionDenied(_)) => ErrorCode::PermissionDenied,
            Error::Platform(PlatformError::DeviceBusy(_)) => ErrorCode::DiskBusy,
            Error::Platform(_) => ErrorCode::FlashFailed,

            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::DiskBusy(_) => ErrorCode::DiskBusy,
            Error::FormatFailed(_) => ErrorCode::FormatFailed,
            Error::Internal(_) => ErrorCode::InternalError,

            Error::Io(_)
            | Error::SourceNotFound(_)
            | Error::EmptySource
            | Error::NoImageInZip
            | Error::Network(_)
            | Error::Decompression(_)
            | Error::Cancelled
            | Error::VerifyMismatch(_) => ErrorCode::FlashFailed,
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
