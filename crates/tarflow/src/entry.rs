//! One archive member: its header paired with the source of its content.

use std::{
    fs::File,
    io,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use log::debug;
use rustix::fs::{Mode, OFlags};
use ustar_header::{Header, HeaderBuilder, HeaderError};

use crate::{
    error::{Error, Result},
    mmap::MmapPublisher,
    producer::ContentStrategy,
    segment::FileContent,
};

/// Where a member's content comes from.
#[derive(Debug)]
pub enum ContentSource {
    /// The whole file, delivered as one segment.
    File(FileContent),
    /// The mapped file, delivered chunk by chunk.
    Chunks(MmapPublisher),
}

#[derive(Debug)]
pub struct Entry {
    path: PathBuf,
    header: Header,
    content: Option<ContentSource>,
}

impl Entry {
    /// Open the file at `path` and describe it.
    ///
    /// The header and the content come from the same open file, so the size
    /// in the header is the number of bytes the content will deliver.  Empty
    /// files have no content source.
    ///
    /// The file is opened non-blocking, so a path that turned into a FIFO
    /// after validation fails with [`HeaderError::NotRegularFile`] instead of
    /// waiting for a writer.
    pub fn open(path: &Path, strategy: ContentStrategy) -> Result<Self> {
        let header_error = |source: HeaderError| Error::Header {
            path: path.to_owned(),
            source,
        };

        let fd = rustix::fs::open(
            path,
            OFlags::RDONLY | OFlags::NONBLOCK | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| header_error(io::Error::from(e).into()))?;
        let file = File::from(fd);
        let name = path
            .file_name()
            .ok_or_else(|| header_error(HeaderError::NoFileName))?;
        let header = HeaderBuilder::for_file(name.as_bytes(), &file)
            .map_err(header_error)?
            .build();
        let size = header.entry_size().map_err(header_error)?;

        let content = match (size, strategy) {
            (0, _) => None,
            (_, ContentStrategy::Transfer) => {
                Some(ContentSource::File(FileContent::new(file, size)))
            }
            (_, ContentStrategy::Mmap { chunk_size }) => {
                Some(ContentSource::Chunks(MmapPublisher::map(&file, size, chunk_size)?))
            }
        };
        debug!("{}: {size} bytes", path.display());

        Ok(Self {
            path: path.to_owned(),
            header,
            content,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn size(&self) -> u64 {
        // validated in open()
        self.header.entry_size().unwrap_or_default()
    }

    pub fn into_parts(self) -> (Header, Option<ContentSource>) {
        (self.header, self.content)
    }
}
