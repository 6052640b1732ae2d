//! The units an archive is delivered in.

use std::{
    fmt,
    fs::File,
    io::{self, ErrorKind},
};

use bytes::Bytes;
use ustar_header::Header;

use crate::{mmap::ChunkBuffer, sink::Sink};

/// Whole-file content: an open file and the number of bytes the header
/// declared for it.
#[derive(Debug)]
pub struct FileContent {
    file: File,
    len: u64,
}

impl FileContent {
    pub fn new(file: File, len: u64) -> Self {
        Self { file, len }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move exactly `len` bytes from the start of the file into `sink`.
    ///
    /// Each call drains from offset zero with its own cursor; the file's
    /// position is never consulted.  A file that shrank since its header was
    /// built fails with [`ErrorKind::UnexpectedEof`].
    pub fn drain(&self, sink: &mut (impl Sink + ?Sized)) -> io::Result<()> {
        let mut position = 0;
        while position < self.len {
            match sink.transfer(&self.file, position, self.len - position) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("file ended after {position} of {} bytes", self.len),
                    ))
                }
                Ok(moved) => position += moved,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// One piece of the archive stream.
pub enum Segment {
    /// A 512-byte entry header.
    Header(Box<Header>),
    /// Zero bytes: block padding after content, or the end-of-archive marker.
    Padding(Bytes),
    /// A file's complete content, moved by [`Sink::transfer`].
    File(FileContent),
    /// One chunk of a memory-mapped file.
    Chunk(ChunkBuffer),
}

impl Segment {
    /// Number of bytes this segment contributes to the archive.
    pub fn len(&self) -> u64 {
        match self {
            Segment::Header(header) => header.as_bytes().len() as u64,
            Segment::Padding(zeros) => zeros.len() as u64,
            Segment::File(content) => content.len(),
            Segment::Chunk(chunk) => chunk.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_header(&self) -> bool {
        matches!(self, Segment::Header(_))
    }

    /// The segment's bytes, if they are held in memory.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Segment::Header(header) => Some(&header.as_bytes()[..]),
            Segment::Padding(zeros) => Some(&zeros[..]),
            Segment::Chunk(chunk) => Some(&chunk[..]),
            Segment::File(_) => None,
        }
    }

    /// Write the whole segment to `sink`, returning the number of bytes
    /// written.
    pub fn write_to(&self, sink: &mut (impl Sink + ?Sized)) -> io::Result<u64> {
        match self {
            Segment::File(content) => content.drain(sink)?,
            Segment::Header(header) => sink.write_all(header.as_bytes())?,
            Segment::Padding(zeros) => sink.write_all(zeros)?,
            Segment::Chunk(chunk) => sink.write_all(chunk)?,
        }
        Ok(self.len())
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Header(header) => f.debug_tuple("Header").field(header).finish(),
            Segment::Padding(zeros) => f.debug_tuple("Padding").field(&zeros.len()).finish(),
            Segment::File(content) => f.debug_tuple("File").field(&content.len()).finish(),
            Segment::Chunk(chunk) => f.debug_tuple("Chunk").field(&chunk.len()).finish(),
        }
    }
}
