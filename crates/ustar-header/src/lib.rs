//! Zerocopy-based USTAR header codec.
//!
//! This crate encodes and decodes the fixed 512-byte POSIX.1-1988 "ustar"
//! header block. Headers are assembled with a mutable [`HeaderBuilder`] and
//! frozen into a read-only [`Header`] once the checksum has been computed.
//! The raw layout is described by [`UstarHeader`], which uses the
//! [`zerocopy`] crate so the block can be viewed field by field without
//! copying.
//!
//! # Header Field Layout
//!
//! | Offset | Size | Field     | Encoding                                 |
//! |--------|------|-----------|------------------------------------------|
//! | 0      | 100  | name      | File name (null-terminated if < 100)     |
//! | 100    | 8    | mode      | Permission bits, octal ASCII             |
//! | 108    | 8    | uid       | Owner user ID, octal ASCII               |
//! | 116    | 8    | gid       | Owner group ID, octal ASCII              |
//! | 124    | 12   | size      | Content length, octal ASCII              |
//! | 136    | 12   | mtime     | Modification time (Unix epoch, octal)    |
//! | 148    | 8    | checksum  | Unsigned byte sum, octal ASCII           |
//! | 156    | 1    | typeflag  | Entry type (see [`EntryType`])           |
//! | 157    | 100  | linkname  | Link target                              |
//! | 257    | 6    | magic     | "ustar\0"                                |
//! | 263    | 2    | version   | "00"                                     |
//! | 265    | 32   | uname     | Owner user name                          |
//! | 297    | 32   | gname     | Owner group name                         |
//! | 329    | 8    | devmajor  | Device major number                      |
//! | 337    | 8    | devminor  | Device minor number                      |
//! | 345    | 155  | prefix    | Path prefix (unused when building)       |
//!
//! # Example
//!
//! ```
//! use ustar_header::{EntryType, HeaderBuilder};
//!
//! let mut builder = HeaderBuilder::new();
//! builder.name(b"hello.txt").unwrap().size(13).unwrap().mode(0o644).unwrap();
//! let header = builder.build();
//!
//! assert_eq!(header.path_bytes(), b"hello.txt");
//! assert_eq!(header.entry_size().unwrap(), 13);
//! assert_eq!(header.entry_type(), EntryType::Regular);
//! header.verify_checksum().unwrap();
//! ```

mod builder;
mod owner;

use std::fmt;

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub use builder::HeaderBuilder;

/// Size of a tar header block in bytes.
pub const HEADER_SIZE: usize = 512;

/// Magic string for UStar format headers ("ustar\0").
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

/// Version field for UStar format headers ("00").
pub const USTAR_VERSION: &[u8; 2] = b"00";

/// Largest content length a 12-digit octal size field can carry (64 GiB − 1).
pub const MAX_ENTRY_SIZE: u64 = (64 << 30) - 1;

/// Byte range of the checksum field.
pub(crate) const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;

/// Errors that can occur when building or parsing tar headers.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The provided data is too short to contain a header.
    #[error("insufficient data: expected {HEADER_SIZE} bytes, got {0}")]
    InsufficientData(usize),

    /// An octal field contains invalid characters.
    #[error("invalid octal field: {0:?}")]
    InvalidOctal(Vec<u8>),

    /// The header checksum does not match the computed value.
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// The checksum value stored in the header.
        expected: u64,
        /// The checksum computed from the header bytes.
        computed: u64,
    },

    /// A byte field is longer than its fixed width.
    #[error("{field} is {len} bytes, exceeds the ustar limit of {max} bytes")]
    FieldTooLong {
        /// Name of the header field.
        field: &'static str,
        /// Length of the rejected value.
        len: usize,
        /// Width of the field.
        max: usize,
    },

    /// A numeric value does not fit in its octal field.
    #[error("{field} value {value} does not fit in {width} octal digits")]
    ValueTooLarge {
        /// Name of the header field.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// Width of the field in digits.
        width: usize,
    },

    /// The content length exceeds [`MAX_ENTRY_SIZE`].
    #[error("entry is too large at {size} bytes (max {MAX_ENTRY_SIZE})")]
    SizeTooLarge {
        /// The rejected size.
        size: u64,
    },

    /// The file was last modified before the Unix epoch, which the unsigned
    /// octal mtime field cannot express.
    #[error("modification time {0} is before the Unix epoch")]
    NegativeMtime(i64),

    /// Only regular files can be described by a built header.
    #[error("only regular files can be archived")]
    NotRegularFile,

    /// The path has no final component to use as the entry name.
    #[error("path has no file name")]
    NoFileName,

    /// Reading file metadata failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for header operations.
pub type Result<T> = std::result::Result<T, HeaderError>;

// ============================================================================
// Raw Header Structs
// ============================================================================

/// Raw 512-byte tar header block.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct RawHeader {
    pub bytes: [u8; 512],
}

impl Default for RawHeader {
    fn default() -> Self {
        Self { bytes: [0u8; 512] }
    }
}

impl fmt::Debug for RawHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawHeader")
            .field("name", &String::from_utf8_lossy(truncate_null(&self.bytes[0..100])))
            .finish_non_exhaustive()
    }
}

/// UStar tar header with named fields.
///
/// See module-level documentation for the field layout table.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct UstarHeader {
    pub name: [u8; 100],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub checksum: [u8; 8],
    pub typeflag: u8,
    pub linkname: [u8; 100],
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub uname: [u8; 32],
    pub gname: [u8; 32],
    pub devmajor: [u8; 8],
    pub devminor: [u8; 8],
    pub prefix: [u8; 155],
    pub pad: [u8; 12],
}

impl Default for UstarHeader {
    fn default() -> Self {
        let mut header: Self = zerocopy::FromZeros::new_zeroed();
        header.magic.copy_from_slice(USTAR_MAGIC);
        header.version.copy_from_slice(USTAR_VERSION);
        header
    }
}

impl fmt::Debug for UstarHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UstarHeader")
            .field("name", &String::from_utf8_lossy(truncate_null(&self.name)))
            .field("mode", &String::from_utf8_lossy(truncate_null(&self.mode)))
            .field("typeflag", &self.typeflag)
            .field(
                "uname",
                &String::from_utf8_lossy(truncate_null(&self.uname)),
            )
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Entry Type
// ============================================================================

/// The typeflag byte.
///
/// Headers built from files are always [`EntryType::Regular`].  The other
/// variants are decode support: [`Header::from_bytes`] accepts blocks from
/// any ustar archive, and [`Header::entry_type`] names their flag instead of
/// folding it into [`EntryType::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// `'0'`, or NUL in pre-POSIX archives.
    Regular,
    Link,
    Symlink,
    Char,
    Block,
    Directory,
    Fifo,
    Continuous,
    Other(u8),
}

impl EntryType {
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'0' | b'\0' => EntryType::Regular,
            b'1' => EntryType::Link,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::Char,
            b'4' => EntryType::Block,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'7' => EntryType::Continuous,
            other => EntryType::Other(other),
        }
    }

    /// The byte written for this type; `Regular` is always `'0'`.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            EntryType::Regular => b'0',
            EntryType::Link => b'1',
            EntryType::Symlink => b'2',
            EntryType::Char => b'3',
            EntryType::Block => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
            EntryType::Continuous => b'7',
            EntryType::Other(b) => b,
        }
    }
}

// ============================================================================
// Frozen Header
// ============================================================================

/// A finished, read-only tar header block.
///
/// Values of this type are produced by [`HeaderBuilder::build`], which
/// computes the checksum last, or borrowed from existing bytes with
/// [`Header::from_bytes`]. There is no way to mutate a `Header`; start a new
/// builder instead.
#[derive(Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct Header {
    raw: RawHeader,
}

impl Header {
    pub(crate) fn from_ustar(ustar: &UstarHeader) -> Self {
        let mut raw = RawHeader::default();
        raw.bytes.copy_from_slice(ustar.as_bytes());
        Self { raw }
    }

    /// Build the header for the regular file at `path`.
    ///
    /// Reads the file's size, ownership, mode and modification time, resolves
    /// the owner and group names and uses the final path component as the
    /// entry name.
    ///
    /// # Errors
    ///
    /// Fails with [`HeaderError::NotRegularFile`] for anything but a regular
    /// file, with [`HeaderError::Io`] if the metadata cannot be read, and with
    /// the field errors of [`HeaderBuilder`] when a value does not fit.
    pub fn for_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(HeaderBuilder::for_path(path)?.build())
    }

    /// Get a reference to the underlying bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 512] {
        &self.raw.bytes
    }

    /// Parse a header from a byte slice.
    ///
    /// Returns a reference to the header if the slice is at least 512 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InsufficientData`] if the slice is too short.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Header> {
        if bytes.len() < HEADER_SIZE {
            return Err(HeaderError::InsufficientData(bytes.len()));
        }
        Header::ref_from_bytes(&bytes[..HEADER_SIZE])
            .map_err(|_| HeaderError::InsufficientData(bytes.len()))
    }

    /// The block viewed field by field.
    #[must_use]
    pub fn as_ustar(&self) -> &UstarHeader {
        zerocopy::transmute_ref!(&self.raw)
    }

    #[must_use]
    pub fn is_ustar(&self) -> bool {
        let ustar = self.as_ustar();
        ustar.magic == *USTAR_MAGIC && ustar.version == *USTAR_VERSION
    }

    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        EntryType::from_byte(self.as_ustar().typeflag)
    }

    /// Number of content bytes that follow the header.
    pub fn entry_size(&self) -> Result<u64> {
        parse_octal(&self.as_ustar().size)
    }

    /// Permission bits, including setuid, setgid and sticky.
    pub fn mode(&self) -> Result<u32> {
        parse_octal(&self.as_ustar().mode).map(|v| v as u32)
    }

    pub fn uid(&self) -> Result<u64> {
        parse_octal(&self.as_ustar().uid)
    }

    pub fn gid(&self) -> Result<u64> {
        parse_octal(&self.as_ustar().gid)
    }

    /// Modification time in seconds since the Unix epoch.
    pub fn mtime(&self) -> Result<u64> {
        parse_octal(&self.as_ustar().mtime)
    }

    /// The checksum as stored, which [`Header::verify_checksum`] compares
    /// against [`Header::compute_checksum`].
    pub fn checksum(&self) -> Result<u64> {
        parse_octal(&self.as_ustar().checksum)
    }

    /// Entry name, without the NUL terminator.
    #[must_use]
    pub fn path_bytes(&self) -> &[u8] {
        truncate_null(&self.as_ustar().name)
    }

    #[must_use]
    pub fn link_name_bytes(&self) -> &[u8] {
        truncate_null(&self.as_ustar().linkname)
    }

    /// Owner name; empty when the uid had no name on the producing host.
    #[must_use]
    pub fn username(&self) -> &[u8] {
        truncate_null(&self.as_ustar().uname)
    }

    /// Group name; empty when the gid had no name on the producing host.
    #[must_use]
    pub fn groupname(&self) -> &[u8] {
        truncate_null(&self.as_ustar().gname)
    }

    pub fn device_major(&self) -> Result<u32> {
        parse_octal(&self.as_ustar().devmajor).map(|v| v as u32)
    }

    pub fn device_minor(&self) -> Result<u32> {
        parse_octal(&self.as_ustar().devminor).map(|v| v as u32)
    }

    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        truncate_null(&self.as_ustar().prefix)
    }

    /// Check the stored checksum against the block's contents.
    ///
    /// # Errors
    ///
    /// [`HeaderError::ChecksumMismatch`] when they differ, or
    /// [`HeaderError::InvalidOctal`] when the stored value is not a number.
    pub fn verify_checksum(&self) -> Result<()> {
        let stored = self.checksum()?;
        let actual = self.compute_checksum();
        if stored != actual {
            return Err(HeaderError::ChecksumMismatch {
                expected: stored,
                computed: actual,
            });
        }
        Ok(())
    }

    /// Sum of all 512 bytes as unsigned values, counting the checksum field
    /// itself as eight spaces.
    #[must_use]
    pub fn compute_checksum(&self) -> u64 {
        compute_checksum(&self.raw.bytes)
    }

    /// Whether every byte is zero, as in the end-of-archive blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.bytes.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("path", &String::from_utf8_lossy(self.path_bytes()))
            .field("entry_type", &self.entry_type())
            .field("size", &self.entry_size().ok())
            .field("mode", &self.mode().ok().map(|m| format!("{m:04o}")))
            .field("checksum", &self.checksum().ok())
            .finish()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

pub(crate) fn compute_checksum(bytes: &[u8; HEADER_SIZE]) -> u64 {
    let mut sum: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        if CHECKSUM_RANGE.contains(&i) {
            sum += u64::from(b' ');
        } else {
            sum += u64::from(byte);
        }
    }
    sum
}

/// Parse an octal ASCII field into a u64.
///
/// Octal fields in tar headers are ASCII strings with optional leading
/// spaces and trailing spaces or null bytes. A field may also use its full
/// width for digits with no terminator at all. For example:
/// - `"0000644 "` -> 420 (file mode 0644)
/// - `"     123 "` -> 83
/// - `"777777777777"` -> 64 GiB − 1
///
/// # Errors
///
/// Returns [`HeaderError::InvalidOctal`] if the field contains invalid
/// characters (anything other than spaces, digits 0-7, or null bytes).
pub fn parse_octal(bytes: &[u8]) -> Result<u64> {
    let start = bytes.iter().position(|&b| b != b' ').unwrap_or(bytes.len());
    let end = bytes[start..]
        .iter()
        .position(|&b| b == b' ' || b == b'\0')
        .map_or(bytes.len(), |i| start + i);

    let trimmed = &bytes[start..end];

    if trimmed.is_empty() {
        return Ok(0);
    }

    let mut value: u64 = 0;
    for &byte in trimmed {
        if !byte.is_ascii_digit() || byte > b'7' {
            return Err(HeaderError::InvalidOctal(bytes.to_vec()));
        }
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
            .ok_or_else(|| HeaderError::InvalidOctal(bytes.to_vec()))?;
    }

    Ok(value)
}

/// Truncate a byte slice at the first null byte.
///
/// # Example
///
/// ```
/// use ustar_header::truncate_null;
///
/// assert_eq!(truncate_null(b"hello\0world"), b"hello");
/// assert_eq!(truncate_null(b"no null here"), b"no null here");
/// assert_eq!(truncate_null(b"\0empty"), b"");
/// ```
#[must_use]
pub fn truncate_null(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}
