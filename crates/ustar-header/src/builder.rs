//! Mutable header assembly and octal field encoding.

use std::{
    fs::{File, Metadata},
    os::unix::{ffi::OsStrExt, fs::MetadataExt},
    path::Path,
};

use crate::{
    compute_checksum, owner, EntryType, Header, HeaderError, Result, UstarHeader,
    CHECKSUM_RANGE, MAX_ENTRY_SIZE,
};

/// Zero-pad table: `ZEROS[..n]` is the padding for a value `n` digits short
/// of its field.
const ZEROS: &[u8; 12] = b"000000000000";

/// Enough room for the octal digits of any u64.
const OCTAL_DIGITS_MAX: usize = 22;

/// A tar header under construction.
///
/// All setters validate their input against the fixed field widths and
/// return an error instead of truncating. Calling [`HeaderBuilder::build`]
/// computes the checksum and freezes the block into a [`Header`].
#[derive(Clone, Debug)]
pub struct HeaderBuilder {
    raw: UstarHeader,
}

impl Default for HeaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderBuilder {
    /// Start a regular-file header with ustar magic and every numeric field
    /// encoded as zero.
    #[must_use]
    pub fn new() -> Self {
        let mut raw = UstarHeader::default();
        raw.typeflag = EntryType::Regular.to_byte();
        for field in [
            &mut raw.mode[..],
            &mut raw.uid[..],
            &mut raw.gid[..],
            &mut raw.size[..],
            &mut raw.mtime[..],
            &mut raw.devmajor[..],
            &mut raw.devminor[..],
        ] {
            // zero always fits
            let _ = encode_octal(field, "zero", 0);
        }
        Self { raw }
    }

    /// Read the metadata of the regular file at `path` and fill in every
    /// field from it.
    ///
    /// Symlinks are followed. The entry name is the final path component.
    pub fn for_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.file_type().is_file() {
            return Err(HeaderError::NotRegularFile);
        }
        let name = path.file_name().ok_or(HeaderError::NoFileName)?;
        Self::with_owner_names(name.as_bytes(), &metadata)
    }

    /// Fill in every field from an open file's metadata, naming the entry
    /// `name`.
    ///
    /// Using the handle rather than a path guarantees the header describes
    /// the same file whose content is later read from it.
    pub fn for_file(name: &[u8], file: &File) -> Result<Self> {
        Self::with_owner_names(name, &file.metadata()?)
    }

    fn with_owner_names(name: &[u8], metadata: &Metadata) -> Result<Self> {
        let owner = owner::user_name(metadata.uid());
        let group = owner::group_name(metadata.gid());
        Self::from_metadata(name, metadata, &owner, &group)
    }

    /// Fill in a header from already-read metadata and resolved names.
    ///
    /// Fails with [`HeaderError::NegativeMtime`] for files modified before
    /// 1970 rather than recording a wrong time.
    pub fn from_metadata(
        name: &[u8],
        metadata: &Metadata,
        owner: &[u8],
        group: &[u8],
    ) -> Result<Self> {
        if !metadata.file_type().is_file() {
            return Err(HeaderError::NotRegularFile);
        }

        let mtime = u64::try_from(metadata.mtime())
            .map_err(|_| HeaderError::NegativeMtime(metadata.mtime()))?;

        let mut builder = Self::new();
        builder
            .name(name)?
            .size(metadata.len())?
            .gid(u64::from(metadata.gid()))?
            .uid(u64::from(metadata.uid()))?
            .mtime(mtime)?
            .mode(metadata.mode())?
            .groupname(group)?
            .username(owner)?;
        Ok(builder)
    }

    /// Set the entry name (at most 100 bytes).
    pub fn name(&mut self, name: &[u8]) -> Result<&mut Self> {
        put_bytes(&mut self.raw.name, "name", name)?;
        Ok(self)
    }

    /// Set the permission bits. File type bits are dropped.
    pub fn mode(&mut self, mode: u32) -> Result<&mut Self> {
        encode_octal(&mut self.raw.mode, "mode", u64::from(mode & 0o7777))?;
        Ok(self)
    }

    /// Set the owner user ID.
    pub fn uid(&mut self, uid: u64) -> Result<&mut Self> {
        encode_octal(&mut self.raw.uid, "uid", uid)?;
        Ok(self)
    }

    /// Set the owner group ID.
    pub fn gid(&mut self, gid: u64) -> Result<&mut Self> {
        encode_octal(&mut self.raw.gid, "gid", gid)?;
        Ok(self)
    }

    /// Set the content length.
    ///
    /// # Errors
    ///
    /// Fails with [`HeaderError::SizeTooLarge`] above [`MAX_ENTRY_SIZE`].
    pub fn size(&mut self, size: u64) -> Result<&mut Self> {
        if size > MAX_ENTRY_SIZE {
            return Err(HeaderError::SizeTooLarge { size });
        }
        encode_octal(&mut self.raw.size, "size", size)?;
        Ok(self)
    }

    /// Set the modification time in seconds since the epoch.
    pub fn mtime(&mut self, mtime: u64) -> Result<&mut Self> {
        encode_octal(&mut self.raw.mtime, "mtime", mtime)?;
        Ok(self)
    }

    /// Set the type flag.
    pub fn entry_type(&mut self, entry_type: EntryType) -> &mut Self {
        self.raw.typeflag = entry_type.to_byte();
        self
    }

    /// Set the link target (at most 100 bytes).
    pub fn link_name(&mut self, link_name: &[u8]) -> Result<&mut Self> {
        put_bytes(&mut self.raw.linkname, "linkname", link_name)?;
        Ok(self)
    }

    /// Set the owner user name (at most 32 bytes).
    pub fn username(&mut self, name: &[u8]) -> Result<&mut Self> {
        put_bytes(&mut self.raw.uname, "uname", name)?;
        Ok(self)
    }

    /// Set the owner group name (at most 32 bytes).
    pub fn groupname(&mut self, name: &[u8]) -> Result<&mut Self> {
        put_bytes(&mut self.raw.gname, "gname", name)?;
        Ok(self)
    }

    /// Set the device major number.
    pub fn device_major(&mut self, major: u32) -> Result<&mut Self> {
        encode_octal(&mut self.raw.devmajor, "devmajor", u64::from(major))?;
        Ok(self)
    }

    /// Set the device minor number.
    pub fn device_minor(&mut self, minor: u32) -> Result<&mut Self> {
        encode_octal(&mut self.raw.devminor, "devminor", u64::from(minor))?;
        Ok(self)
    }

    /// Set the path prefix (at most 155 bytes).
    pub fn prefix(&mut self, prefix: &[u8]) -> Result<&mut Self> {
        put_bytes(&mut self.raw.prefix, "prefix", prefix)?;
        Ok(self)
    }

    /// Blank the checksum field to spaces, sum the block and store the sum.
    ///
    /// The octal digits are written left-aligned; the rest of the field
    /// keeps its spaces and no NUL terminator is added.
    pub fn generate_checksum(&mut self) -> &mut Self {
        self.raw.checksum = [b' '; 8];
        let mut block = [0u8; crate::HEADER_SIZE];
        block.copy_from_slice(zerocopy::IntoBytes::as_bytes(&self.raw));
        let sum = compute_checksum(&block);

        let mut buf = [0u8; OCTAL_DIGITS_MAX];
        let digits = octal_digits(sum, &mut buf);
        // 512 * 255 needs 6 digits, the field has 8
        debug_assert!(digits.len() <= CHECKSUM_RANGE.len());
        self.raw.checksum[..digits.len()].copy_from_slice(digits);
        self
    }

    /// Compute the checksum and freeze the header.
    #[must_use]
    pub fn build(mut self) -> Header {
        self.generate_checksum();
        Header::from_ustar(&self.raw)
    }
}

fn put_bytes(field: &mut [u8], name: &'static str, value: &[u8]) -> Result<()> {
    if value.len() > field.len() {
        return Err(HeaderError::FieldTooLong {
            field: name,
            len: value.len(),
            max: field.len(),
        });
    }
    field.fill(0);
    field[..value.len()].copy_from_slice(value);
    Ok(())
}

fn octal_digits(mut value: u64, buf: &mut [u8; OCTAL_DIGITS_MAX]) -> &[u8] {
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b'0' + (value & 7) as u8;
        value >>= 3;
        if value == 0 {
            break;
        }
    }
    &buf[start..]
}

/// Write `value` as zero-padded octal followed by one space.
///
/// A value needing every byte of the field is written without the space.
fn encode_octal(field: &mut [u8], name: &'static str, value: u64) -> Result<()> {
    let width = field.len();
    let mut buf = [0u8; OCTAL_DIGITS_MAX];
    let digits = octal_digits(value, &mut buf);

    if digits.len() > width {
        return Err(HeaderError::ValueTooLarge {
            field: name,
            value,
            width,
        });
    }
    if digits.len() == width {
        field.copy_from_slice(digits);
        return Ok(());
    }

    let pad = width - 1 - digits.len();
    field[..pad].copy_from_slice(&ZEROS[..pad]);
    field[pad..width - 1].copy_from_slice(digits);
    field[width - 1] = b' ';
    Ok(())
}
