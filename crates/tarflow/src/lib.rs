//! Demand-driven streaming producer for POSIX USTAR archives.
//!
//! An [`ArchiveProducer`] turns a list of regular files into a sequence of
//! [`Segment`]s: a header per file, the file's content, zero padding to the
//! next 512-byte boundary and finally the 1024-byte end-of-archive marker.
//! Segments are only produced when a [`Subscriber`] asks for them, so a slow
//! consumer never causes unbounded buffering.
//!
//! File content is carried in one of two ways, selected with
//! [`ContentStrategy`]:
//!
//! - [`ContentStrategy::Transfer`]: the whole file is a single segment that is
//!   moved into the [`Sink`] with `sendfile(2)` where possible.
//! - [`ContentStrategy::Mmap`]: the file is memory-mapped and forwarded as a
//!   series of fixed-size chunks.
//!
//! Both produce byte-identical archives.

pub mod archive;
pub mod entry;
pub mod error;
pub mod executor;
pub mod flow;
pub mod forward;
pub mod mmap;
pub mod padding;
pub mod producer;
pub mod segment;
pub mod sink;

#[cfg(test)]
mod test;

pub use archive::{create_tar, create_tar_file, write_archive, ArchiveSummary, ArchiveTask};
pub use error::{Error, Result};
pub use executor::IoExecutor;
pub use flow::{Publisher, Subscriber, Subscription};
pub use producer::{ArchiveOptions, ArchiveProducer, CancelHandle, ContentStrategy, DemandPolicy};
pub use segment::Segment;
pub use sink::{Sink, WriteSink};

/// Size of a tar block.  Headers occupy exactly one block and file content is
/// padded up to a multiple of it.
pub const BLOCK_SIZE: usize = ustar_header::HEADER_SIZE;
