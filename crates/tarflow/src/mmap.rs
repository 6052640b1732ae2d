//! Memory-mapped chunk publisher.
//!
//! [`MmapPublisher`] maps a file read-only and publishes it as a sequence of
//! [`FileChunk`]s, one per unit of demand.  Chunks borrow the mapping, so
//! no file content is copied until a chunk is written to a sink.

use std::{fmt, fs::File, ops::Deref, ops::Range, path::Path, sync::Arc};

use log::trace;
use memmap2::{Mmap, MmapOptions};

use crate::{
    error::{Error, Result},
    flow::{Publisher, Subscriber},
    BLOCK_SIZE,
};

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 4 << 20;

/// Check that `chunk_size` is usable: chunked output is only identical to
/// whole-file output when every chunk but the last is block aligned.
pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size % BLOCK_SIZE != 0 {
        return Err(Error::InvalidChunkSize(chunk_size));
    }
    Ok(())
}

/// A read-only window into a mapped file.
#[derive(Clone)]
pub struct ChunkBuffer {
    map: Arc<Mmap>,
    range: Range<usize>,
}

impl Deref for ChunkBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map[self.range.clone()]
    }
}

impl AsRef<[u8]> for ChunkBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("range", &self.range)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct FileChunk {
    pub buffer: ChunkBuffer,
    /// Zero-based position of this chunk.
    pub index: u64,
    /// Total number of chunks in the file.
    pub count: u64,
}

impl FileChunk {
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.count
    }
}

pub struct MmapPublisher {
    map: Option<Arc<Mmap>>,
    len: usize,
    chunk_size: usize,
    next: u64,
    count: u64,
    finished: bool,
}

impl fmt::Debug for MmapPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapPublisher")
            .field("len", &self.len)
            .field("chunk_size", &self.chunk_size)
            .field("next", &self.next)
            .field("count", &self.count)
            .field("finished", &self.finished)
            .finish()
    }
}

impl MmapPublisher {
    /// Map the file at `path`.
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        Self::from_file(&File::open(path)?, chunk_size)
    }

    /// Map an already open file.  The mapping stays valid after `file` is
    /// closed.
    ///
    /// The file must not be truncated while chunks are alive: access past the
    /// new end of file raises `SIGBUS`.
    pub fn from_file(file: &File, chunk_size: usize) -> Result<Self> {
        Self::map(file, file.metadata()?.len(), chunk_size)
    }

    /// Map the first `len` bytes of `file`, which must be at least that long.
    pub fn map(file: &File, len: u64, chunk_size: usize) -> Result<Self> {
        validate_chunk_size(chunk_size)?;

        let len =
            usize::try_from(len).map_err(|_| std::io::Error::other("file too large to map"))?;

        // Zero-length mappings are rejected by mmap(2)
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only; callers are told not to
            // truncate the file underneath it.
            let map = unsafe { MmapOptions::new().len(len).map(file)? };
            #[cfg(unix)]
            map.advise(memmap2::Advice::Sequential)?;
            Some(Arc::new(map))
        };

        Ok(Self {
            map,
            len,
            chunk_size,
            next: 0,
            count: len.div_ceil(chunk_size) as u64,
            finished: false,
        })
    }

    /// Number of chunks this publisher will produce in total.
    pub fn chunk_count(&self) -> u64 {
        self.count
    }

    fn chunk(&self, map: &Arc<Mmap>, index: u64) -> FileChunk {
        let start = index as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(self.len);
        FileChunk {
            buffer: ChunkBuffer {
                map: Arc::clone(map),
                range: start..end,
            },
            index,
            count: self.count,
        }
    }
}

impl Publisher for MmapPublisher {
    type Item = FileChunk;

    fn request(&mut self, n: i64, subscriber: &mut dyn Subscriber<FileChunk>) {
        if self.finished || n == 0 {
            return;
        }
        if n < 0 {
            subscriber.on_error(Error::ProtocolViolation(n));
            return;
        }

        let mut demand = n as u64;
        if let Some(map) = self.map.clone() {
            while demand > 0 && self.next < self.count {
                let chunk = self.chunk(&map, self.next);
                trace!("chunk {}/{} ({} bytes)", chunk.index + 1, self.count, chunk.buffer.len());
                self.next += 1;
                demand -= 1;
                if let Err(err) = subscriber.on_next(chunk) {
                    self.finished = true;
                    self.map = None;
                    subscriber.on_error(err);
                    return;
                }
            }
        }

        if self.next == self.count {
            self.finished = true;
            self.map = None;
            subscriber.on_complete();
        }
    }

    fn cancel(&mut self, subscriber: &mut dyn Subscriber<FileChunk>) {
        if !self.finished {
            self.finished = true;
            self.map = None;
            subscriber.on_complete();
        }
    }
}
