//! Zero padding and the end-of-archive marker.
//!
//! All padding is sliced out of one static zero buffer, so producing it never
//! allocates or copies.

use bytes::Bytes;

use crate::BLOCK_SIZE;

/// Length of the end-of-archive marker: two zero blocks.
pub const END_OF_ARCHIVE_LEN: usize = 2 * BLOCK_SIZE;

static ZEROS: [u8; END_OF_ARCHIVE_LEN] = [0; END_OF_ARCHIVE_LEN];

/// Number of zero bytes that follow `size` bytes of content.
///
/// Always in `1..=512`: content that already ends on a block boundary is
/// still followed by a full block of zeros.
pub fn padding_len(size: u64) -> usize {
    BLOCK_SIZE - (size % BLOCK_SIZE as u64) as usize
}

/// A read-only view of `len` zero bytes.
///
/// # Panics
///
/// If `len` exceeds [`END_OF_ARCHIVE_LEN`].
pub fn zeros(len: usize) -> Bytes {
    Bytes::from_static(&ZEROS[..len])
}

/// The padding that follows `size` bytes of content.
pub fn padding_for(size: u64) -> Bytes {
    zeros(padding_len(size))
}

/// The 1024 zero bytes that terminate every archive.
pub fn end_of_archive() -> Bytes {
    Bytes::from_static(&ZEROS)
}
