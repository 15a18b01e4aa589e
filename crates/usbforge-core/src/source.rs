//! Image sources.
//!
//! A [`Source`] is a lazy byte stream with a declared total size, opened
//! from a raw file, a ZIP archive (streaming the first image member), a
//! single-stream compressed file (gzip, xz, zstd), or an HTTP(S) URL.
//!
//! The declared size feeds progress percentages and pre-flight size checks
//! only; for the compressed variants it may be an estimate, which is why
//! the flash pipeline clamps percentages at 100.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Take};
use std::path::Path;
use std::time::Duration;

use flate2::read::{DeflateDecoder, GzDecoder};
use xz2::read::XzDecoder;

use crate::error::{Error, Result};

/// Image extensions that may be streamed from inside a ZIP archive.
const IMAGE_EXTENSIONS: [&str; 4] = ["img", "iso", "bin", "raw"];

/// One GiB, the threshold for the gzip wraparound heuristic.
const ONE_GIB: u64 = 1 << 30;

/// A polymorphic image source.
///
/// All variants stream sequentially; sources are one-shot and must be
/// reopened for a second pass (the verify stage does exactly that).
pub enum Source {
    /// Uncompressed local file
    Raw(RawSource),
    /// First image member of a local ZIP archive
    Zip(ZipSource),
    /// Gzip-compressed local file
    Gzip(GzipSource),
    /// Xz-compressed local file
    Xz(XzSource),
    /// Zstd-compressed local file
    Zstd(ZstdSource),
    /// Remote HTTP(S) stream
    Http(HttpSource),
}

impl Source {
    /// Whether a path denotes a remote HTTP(S) source.
    pub fn is_url(path: &str) -> bool {
        path.starts_with("http://") || path.starts_with("https://")
    }

    /// Open an image source, dispatching on URL scheme or file extension.
    ///
    /// Unknown extensions fall through to the raw variant; the pipeline is
    /// byte-oriented, so any readable file is acceptable.
    pub fn open(path: &str) -> Result<Self> {
        if Self::is_url(path) {
            return Ok(Source::Http(HttpSource::open(path)?));
        }

        match file_extension(path).as_str() {
            "zip" => Ok(Source::Zip(ZipSource::open(path)?)),
            "gz" | "gzip" => Ok(Source::Gzip(GzipSource::open(path)?)),
            "xz" => Ok(Source::Xz(XzSource::open(path)?)),
            "zst" | "zstd" => Ok(Source::Zstd(ZstdSource::open(path)?)),
            _ => Ok(Source::Raw(RawSource::open(path)?)),
        }
    }

    /// Declared total size in bytes. Exact for raw, zip, and HTTP sources;
    /// an estimate for the compressed variants.
    pub fn size(&self) -> u64 {
        match self {
            Source::Raw(s) => s.size,
            Source::Zip(s) => s.size,
            Source::Gzip(s) => s.size,
            Source::Xz(s) => s.size,
            Source::Zstd(s) => s.size,
            Source::Http(s) => s.size,
        }
    }

    /// Display name of the source.
    pub fn name(&self) -> &str {
        match self {
            Source::Raw(s) => &s.name,
            Source::Zip(s) => &s.name,
            Source::Gzip(s) => &s.name,
            Source::Xz(s) => &s.name,
            Source::Zstd(s) => &s.name,
            Source::Http(s) => &s.name,
        }
    }
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Source::Raw(s) => s.file.read(buf),
            Source::Zip(s) => s.reader.read(buf),
            Source::Gzip(s) => s.decoder.read(buf),
            Source::Xz(s) => s.decoder.read(buf),
            Source::Zstd(s) => s.decoder.read(buf),
            Source::Http(s) => s.response.read(buf),
        }
    }
}

// ============================================================================
// Raw files
// ============================================================================

/// Reads directly from an uncompressed image file.
pub struct RawSource {
    file: File,
    size: u64,
    name: String,
}

impl RawSource {
    fn open(path: &str) -> Result<Self> {
        let file = open_image_file(path)?;
        let size = file.metadata()?.len();
        if size == 0 {
            return Err(Error::EmptySource);
        }

        Ok(Self {
            file,
            size,
            name: base_name(path),
        })
    }
}

// ============================================================================
// ZIP archives
// ============================================================================

/// Streams the first image member out of a ZIP archive.
///
/// The member is located through the central directory, then streamed by
/// reading its data run directly off the underlying file. This sidesteps
/// the archive reader's borrowing entry handles and keeps the source a
/// plain owned value like every other variant. Only stored and deflated
/// members are supported, which covers every image-bearing archive in
/// practice.
pub struct ZipSource {
    reader: ZipEntryReader,
    size: u64,
    name: String,
}

enum ZipEntryReader {
    Stored(Take<BufReader<File>>),
    Deflated(DeflateDecoder<Take<BufReader<File>>>),
}

impl Read for ZipEntryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ZipEntryReader::Stored(r) => r.read(buf),
            ZipEntryReader::Deflated(r) => r.read(buf),
        }
    }
}

impl ZipSource {
    fn open(path: &str) -> Result<Self> {
        let file = open_image_file(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| Error::Decompression(format!("failed to open zip: {}", e)))?;

        // First non-directory member with an image extension, in archive
        // order.
        let mut selected = None;
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| Error::Decompression(format!("failed to read zip entry: {}", e)))?;
            if entry.is_dir() {
                continue;
            }
            let ext = file_extension(entry.name());
            if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                selected = Some((
                    entry.name().to_string(),
                    entry.compression(),
                    entry.data_start(),
                    entry.compressed_size(),
                    entry.size(),
                ));
                break;
            }
        }

        let Some((member_name, method, data_start, compressed_size, size)) = selected else {
            return Err(Error::NoImageInZip);
        };

        let mut file = archive.into_inner();
        file.seek(SeekFrom::Start(data_start))?;
        let data = BufReader::with_capacity(64 * 1024, file).take(compressed_size);

        let reader = match method {
            zip::CompressionMethod::Stored => ZipEntryReader::Stored(data),
            zip::CompressionMethod::Deflated => {
                ZipEntryReader::Deflated(DeflateDecoder::new(data))
            }
            other => {
                return Err(Error::Decompression(format!(
                    "unsupported zip compression method for {}: {}",
                    member_name, other
                )))
            }
        };

        Ok(Self {
            reader,
            size,
            name: base_name(&member_name),
        })
    }
}

// ============================================================================
// Gzip
// ============================================================================

/// Decompresses a gzip file on the fly.
pub struct GzipSource {
    decoder: GzDecoder<BufReader<File>>,
    size: u64,
    name: String,
}

impl GzipSource {
    fn open(path: &str) -> Result<Self> {
        let mut file = open_image_file(path)?;
        let compressed_size = file.metadata()?.len();

        check_magic(&mut file, &[0x1f, 0x8b])
            .map_err(|_| Error::Decompression("failed to read gzip header".to_string()))?;

        let size = declared_gzip_size(&mut file, compressed_size);
        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            decoder: GzDecoder::new(BufReader::with_capacity(64 * 1024, file)),
            size,
            name: stem_name(path),
        })
    }
}

/// Read the 4-byte little-endian ISIZE footer and sanity-check it.
fn declared_gzip_size(file: &mut File, compressed_size: u64) -> u64 {
    let fallback = compressed_size * 3;

    if file.seek(SeekFrom::End(-4)).is_err() {
        return fallback;
    }
    let mut footer = [0u8; 4];
    if file.read_exact(&mut footer).is_err() {
        return fallback;
    }

    validate_gzip_isize(u64::from(u32::from_le_bytes(footer)), compressed_size)
}

/// ISIZE stores the size modulo 2^32, so it wraps for images over 4 GiB.
/// A declared size below the compressed size is impossible, and a
/// compressed file over 1 GiB claiming under 1 GiB almost certainly
/// wrapped (disk images rarely compress better than 4:1). Both cases fall
/// back to a 3x estimate.
fn validate_gzip_isize(declared: u64, compressed_size: u64) -> u64 {
    if declared < compressed_size {
        return compressed_size * 3;
    }
    if compressed_size > ONE_GIB && declared < ONE_GIB {
        return compressed_size * 3;
    }
    declared
}

// ============================================================================
// Xz
// ============================================================================

/// Decompresses an xz file on the fly.
///
/// The xz container has no uncompressed size in its header, so the size is
/// estimated from a typical compression ratio.
pub struct XzSource {
    decoder: XzDecoder<BufReader<File>>,
    size: u64,
    name: String,
}

const XZ_MAGIC: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

impl XzSource {
    fn open(path: &str) -> Result<Self> {
        let mut file = open_image_file(path)?;
        let compressed_size = file.metadata()?.len();

        check_magic(&mut file, &XZ_MAGIC)
            .map_err(|_| Error::Decompression("failed to read xz header".to_string()))?;

        Ok(Self {
            decoder: XzDecoder::new(BufReader::with_capacity(64 * 1024, file)),
            size: compressed_size * 5,
            name: stem_name(path),
        })
    }
}

// ============================================================================
// Zstd
// ============================================================================

/// Decompresses a zstd file on the fly. Size is estimated like xz.
pub struct ZstdSource {
    decoder: zstd::Decoder<'static, BufReader<File>>,
    size: u64,
    name: String,
}

impl ZstdSource {
    fn open(path: &str) -> Result<Self> {
        let file = open_image_file(path)?;
        let compressed_size = file.metadata()?.len();

        let decoder = zstd::Decoder::new(file)
            .map_err(|e| Error::Decompression(format!("failed to read zstd header: {}", e)))?;

        Ok(Self {
            decoder,
            size: compressed_size * 4,
            name: stem_name(path),
        })
    }
}

// ============================================================================
// HTTP(S)
// ============================================================================

/// Streams image data from a remote URL with a single GET request.
pub struct HttpSource {
    response: reqwest::blocking::Response,
    size: u64,
    name: String,
}

impl HttpSource {
    fn open(raw_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw_url)
            .map_err(|e| Error::Network(format!("invalid URL: {}", e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::Network(format!(
                "unsupported URL scheme: {} (use http or https)",
                parsed.scheme()
            )));
        }

        // No overall timeout: bodies are streamed for as long as they take.
        // Compression stays disabled so Content-Length matches the bytes we
        // feed to the writer.
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("usbforge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| Error::Network(format!("failed to create HTTP client: {}", e)))?;

        let response = client
            .get(raw_url)
            .send()
            .map_err(|e| Error::Network(format!("failed to connect to URL: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("server returned error: {}", status)));
        }

        let size = match response.content_length() {
            Some(len) if len > 0 => len,
            _ => {
                return Err(Error::Network(
                    "server did not provide content size (Content-Length header missing or invalid)"
                        .to_string(),
                ))
            }
        };

        let content_disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (name, is_zip) = url_filename(
            raw_url,
            content_disposition.as_deref(),
            content_type.as_deref(),
        );

        // The zip central directory lives at the end of the archive and
        // needs random access, which a one-shot HTTP body cannot provide.
        if is_zip {
            return Err(Error::Network(
                "zip files from URLs are not supported (zip format requires random access); \
                 download the file first or use a direct image URL"
                    .to_string(),
            ));
        }

        Ok(Self {
            response,
            size,
            name,
        })
    }
}

/// Choose a display filename for a URL source and flag ZIP payloads.
///
/// Precedence: `Content-Disposition` filename, then the final URL path
/// segment (when it has an extension), then a `Content-Type`-based default.
fn url_filename(
    raw_url: &str,
    content_disposition: Option<&str>,
    content_type: Option<&str>,
) -> (String, bool) {
    if let Some(name) = content_disposition.and_then(disposition_filename) {
        let is_zip = file_extension(&name) == "zip";
        return (name, is_zip);
    }

    if let Ok(parsed) = url::Url::parse(raw_url) {
        if let Some(segment) = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        {
            let ext = file_extension(segment);
            if !ext.is_empty() {
                return (segment.to_string(), ext == "zip");
            }
        }
    }

    let content_type = content_type.unwrap_or("");
    if content_type.contains("application/zip") {
        ("download.zip".to_string(), true)
    } else if content_type.contains("application/x-iso9660-image") {
        ("download.iso".to_string(), false)
    } else {
        // application/octet-stream and anything unknown default to .img
        ("download.img".to_string(), false)
    }
}

/// Extract the `filename=` parameter from a Content-Disposition header.
fn disposition_filename(header: &str) -> Option<String> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("filename=") {
            let name = value.trim_matches('"').trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

// ============================================================================
// Helpers
// ============================================================================

fn open_image_file(path: &str) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::SourceNotFound(path.to_string())
        } else {
            Error::Io(e)
        }
    })
}

/// Verify leading magic bytes, restoring the read position afterwards.
fn check_magic(file: &mut File, magic: &[u8]) -> std::io::Result<()> {
    let mut header = vec![0u8; magic.len()];
    file.read_exact(&mut header)?;
    file.seek(SeekFrom::Start(0))?;
    if header != magic {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "magic mismatch",
        ));
    }
    Ok(())
}

/// Lowercased extension without the dot, empty when there is none.
fn file_extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Basename with the final (compression) extension removed.
fn stem_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| base_name(path))
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn read_all(source: &mut Source) -> Vec<u8> {
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        out
    }

    // -------------------------------------------------------------------------
    // Dispatch tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_is_url() {
        assert!(Source::is_url("http://example.com/image.img"));
        assert!(Source::is_url("https://example.com/image.img"));
        assert!(!Source::is_url("C:\\images\\disk.img"));
        assert!(!Source::is_url("ftp://example.com/image.img"));
    }

    #[test]
    fn test_open_dispatches_unknown_extension_as_raw() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("firmware.custom");
        std::fs::write(&path, b"payload").unwrap();

        let source = Source::open(path.to_str().unwrap()).unwrap();
        assert!(matches!(source, Source::Raw(_)));
    }

    // -------------------------------------------------------------------------
    // Raw source tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_raw_source_size_name_and_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("boot.img");
        let data = patterned(10_000);
        std::fs::write(&path, &data).unwrap();

        let mut source = Source::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.size(), 10_000);
        assert_eq!(source.name(), "boot.img");
        assert_eq!(read_all(&mut source), data);
    }

    #[test]
    fn test_raw_source_empty_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.img");
        std::fs::write(&path, b"").unwrap();

        let result = Source::open(path.to_str().unwrap());
        assert!(matches!(result, Err(Error::EmptySource)));
    }

    #[test]
    fn test_raw_source_not_found() {
        let result = Source::open("/nonexistent/path/disk.img");
        assert!(matches!(result, Err(Error::SourceNotFound(_))));
    }

    // -------------------------------------------------------------------------
    // Zip source tests
    // -------------------------------------------------------------------------

    fn write_zip(path: &Path, entries: &[(&str, &[u8])], method: zip::CompressionMethod) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default().compression_method(method);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_zip_source_streams_first_image_member() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("release.zip");
        let image = patterned(50_000);
        write_zip(
            &path,
            &[
                ("README.txt", b"docs first".as_slice()),
                ("images/disk.img", image.as_slice()),
                ("other.iso", b"second image".as_slice()),
            ],
            zip::CompressionMethod::Deflated,
        );

        let mut source = Source::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.name(), "disk.img");
        assert_eq!(source.size(), 50_000);
        assert_eq!(read_all(&mut source), image);
    }

    #[test]
    fn test_zip_source_stored_member() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stored.zip");
        let image = patterned(8_192);
        write_zip(
            &path,
            &[("flat.raw", image.as_slice())],
            zip::CompressionMethod::Stored,
        );

        let mut source = Source::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.size(), 8_192);
        assert_eq!(read_all(&mut source), image);
    }

    #[test]
    fn test_zip_source_without_image_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noimage.zip");
        write_zip(
            &path,
            &[("README.txt", b"nothing here".as_slice())],
            zip::CompressionMethod::Deflated,
        );

        let result = Source::open(path.to_str().unwrap());
        assert!(matches!(result, Err(Error::NoImageInZip)));
    }

    // -------------------------------------------------------------------------
    // Gzip source tests
    // -------------------------------------------------------------------------

    fn write_gzip(path: &Path, data: &[u8]) {
        let file = File::create(path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_gzip_source_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.img.gz");
        let data = patterned(100_000);
        write_gzip(&path, &data);

        let mut source = Source::open(path.to_str().unwrap()).unwrap();
        // The name strips the final extension only
        assert_eq!(source.name(), "image.img");
        // ISIZE is valid here, so the declared size is exact
        assert_eq!(source.size(), 100_000);
        assert_eq!(read_all(&mut source), data);
    }

    #[test]
    fn test_gzip_source_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.gz");
        std::fs::write(&path, b"this is not gzip data").unwrap();

        let result = Source::open(path.to_str().unwrap());
        assert!(matches!(result, Err(Error::Decompression(_))));
    }

    #[test]
    fn test_gzip_isize_below_compressed_uses_estimate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wrapped.img.gz");
        write_gzip(&path, &patterned(100_000));

        // Clobber the ISIZE footer with an impossibly small value
        let mut bytes = std::fs::read(&path).unwrap();
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&5u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let source = Source::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.size(), bytes.len() as u64 * 3);
    }

    #[test]
    fn test_validate_gzip_isize() {
        // Plausible footer passes through
        assert_eq!(validate_gzip_isize(100_000, 40_000), 100_000);

        // Declared below compressed: wrapped, use the 3x estimate
        assert_eq!(validate_gzip_isize(512, 40_000), 120_000);

        // 2 GiB compressed claiming 500 MiB decodes to a 6 GiB estimate
        let two_gib = 2 * ONE_GIB;
        let five_hundred_mib = 500 * 1024 * 1024;
        assert_eq!(validate_gzip_isize(five_hundred_mib, two_gib), 6 * ONE_GIB);

        // Declared just above a large compressed size passes through
        assert_eq!(
            validate_gzip_isize(ONE_GIB + 10, ONE_GIB + 5),
            ONE_GIB + 10
        );
    }

    // -------------------------------------------------------------------------
    // Xz source tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_xz_source_round_trip_and_estimate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.img.xz");
        let data = patterned(60_000);

        let file = File::create(&path).unwrap();
        let mut encoder = xz2::write::XzEncoder::new(file, 6);
        encoder.write_all(&data).unwrap();
        encoder.finish().unwrap();

        let compressed_size = std::fs::metadata(&path).unwrap().len();
        let mut source = Source::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.name(), "image.img");
        assert_eq!(source.size(), compressed_size * 5);
        assert_eq!(read_all(&mut source), data);
    }

    #[test]
    fn test_xz_source_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.xz");
        std::fs::write(&path, b"not xz at all").unwrap();

        let result = Source::open(path.to_str().unwrap());
        assert!(matches!(result, Err(Error::Decompression(_))));
    }

    // -------------------------------------------------------------------------
    // Zstd source tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_zstd_source_round_trip_and_estimate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.img.zst");
        let data = patterned(60_000);

        let file = File::create(&path).unwrap();
        let mut encoder = zstd::Encoder::new(file, 3).unwrap();
        encoder.write_all(&data).unwrap();
        encoder.finish().unwrap();

        let compressed_size = std::fs::metadata(&path).unwrap().len();
        let mut source = Source::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.name(), "image.img");
        assert_eq!(source.size(), compressed_size * 4);
        assert_eq!(read_all(&mut source), data);
    }

    // -------------------------------------------------------------------------
    // URL filename tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_url_filename_content_disposition_first() {
        let (name, is_zip) = url_filename(
            "https://example.com/download?id=42",
            Some("attachment; filename=\"raspios.img\""),
            Some("application/octet-stream"),
        );
        assert_eq!(name, "raspios.img");
        assert!(!is_zip);
    }

    #[test]
    fn test_url_filename_disposition_zip_flagged() {
        let (name, is_zip) = url_filename(
            "https://example.com/download",
            Some("attachment; filename=release.zip"),
            None,
        );
        assert_eq!(name, "release.zip");
        assert!(is_zip);
    }

    #[test]
    fn test_url_filename_path_segment() {
        let (name, is_zip) =
            url_filename("https://example.com/images/ubuntu.iso", None, None);
        assert_eq!(name, "ubuntu.iso");
        assert!(!is_zip);

        let (name, is_zip) = url_filename("https://example.com/files/archive.zip", None, None);
        assert_eq!(name, "archive.zip");
        assert!(is_zip);
    }

    #[test]
    fn test_url_filename_content_type_fallbacks() {
        let (name, is_zip) =
            url_filename("https://example.com/fetch", None, Some("application/zip"));
        assert_eq!(name, "download.zip");
        assert!(is_zip);

        let (name, _) = url_filename(
            "https://example.com/fetch",
            None,
            Some("application/x-iso9660-image"),
        );
        assert_eq!(name, "download.iso");

        let (name, _) = url_filename(
            "https://example.com/fetch",
            None,
            Some("application/octet-stream"),
        );
        assert_eq!(name, "download.img");

        let (name, is_zip) = url_filename("https://example.com/fetch", None, None);
        assert_eq!(name, "download.img");
        assert!(!is_zip);
    }

    #[test]
    fn test_url_filename_extensionless_segment_falls_through() {
        let (name, _) = url_filename(
            "https://example.com/latest",
            None,
            Some("application/x-iso9660-image"),
        );
        assert_eq!(name, "download.iso");
    }

    // -------------------------------------------------------------------------
    // Helper tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("disk.IMG"), "img");
        assert_eq!(file_extension("a/b/image.iso.gz"), "gz");
        assert_eq!(file_extension("noext"), "");
    }

    #[test]
    fn test_names() {
        assert_eq!(base_name("a/b/disk.img"), "disk.img");
        assert_eq!(stem_name("a/b/disk.img.xz"), "disk.img");
        assert_eq!(stem_name("disk.zst"), "disk");
    }
}
