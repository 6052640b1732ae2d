//! Destinations for archive bytes.
//!
//! A [`Sink`] accepts buffered segments through [`Sink::write_all`] and whole
//! file content through [`Sink::transfer`].  Regular-file sinks move content
//! with `sendfile(2)`; everything else goes through a bounded read buffer.

use std::{
    fs::File,
    io::{self, Write},
};

use rustix::io::{pread, Errno};

/// Largest amount of file content staged in memory by the fallback copy.
pub const TRANSFER_WINDOW: usize = 128 * 1024;

pub trait Sink {
    /// Write all of `buf`.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Move up to `len` bytes of `file`, starting at `offset`, into the sink.
    ///
    /// Returns the number of bytes moved, which may be less than `len`.  A
    /// return of zero means `file` has no data at `offset`.  The file's own
    /// position is not used or changed.
    fn transfer(&mut self, file: &File, offset: u64, len: u64) -> io::Result<u64> {
        copy_window(self, file, offset, len)
    }

    /// Flush anything the sink buffers internally.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read one window of `file` at `offset` and write it to `sink`.
pub fn copy_window<S: Sink + ?Sized>(
    sink: &mut S,
    file: &File,
    offset: u64,
    len: u64,
) -> io::Result<u64> {
    let window = usize::try_from(len).map_or(TRANSFER_WINDOW, |len| len.min(TRANSFER_WINDOW));
    let mut buf = vec![0u8; window];
    let n = loop {
        match pread(file, &mut buf[..], offset) {
            Ok(n) => break n,
            Err(Errno::INTR) => continue,
            Err(err) => return Err(err.into()),
        }
    };
    sink.write_all(&buf[..n])?;
    Ok(n as u64)
}

impl Sink for File {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    #[cfg(target_os = "linux")]
    fn transfer(&mut self, file: &File, offset: u64, len: u64) -> io::Result<u64> {
        // sendfile() moves at most 0x7ffff000 bytes per call anyway
        let count = usize::try_from(len).map_or(0x7fff_f000, |len| len.min(0x7fff_f000));
        let mut position = offset;
        loop {
            match rustix::fs::sendfile(&*self, file, Some(&mut position), count) {
                Ok(n) => return Ok(n as u64),
                Err(Errno::INTR) => continue,
                // O_APPEND targets and some filesystems refuse sendfile()
                Err(Errno::INVAL | Errno::NOSYS | Errno::OPNOTSUPP) => {
                    return copy_window(self, file, offset, len)
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}

impl Sink for Vec<u8> {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write_all(buf)
    }

    fn transfer(&mut self, file: &File, offset: u64, len: u64) -> io::Result<u64> {
        (**self).transfer(file, offset, len)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Adapts any [`Write`] (a socket, stdout, a compressor) into a [`Sink`].
#[derive(Debug, Default)]
pub struct WriteSink<W>(pub W);

impl<W> WriteSink<W> {
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write> Sink for WriteSink<W> {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use super::*;

    fn source(content: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        Write::write_all(&mut file, content).unwrap();
        file
    }

    #[test]
    fn test_vec_transfer() {
        let content: Vec<u8> = (0..=255).cycle().take(300_000).collect();
        let file = source(&content);

        let mut sink = Vec::new();
        let moved = sink.transfer(&file, 10, 1000).unwrap();
        assert_eq!(moved, 1000);
        assert_eq!(sink, &content[10..1010]);

        // the fallback never stages more than one window at a time
        let mut sink = Vec::new();
        let moved = sink.transfer(&file, 0, content.len() as u64).unwrap();
        assert_eq!(moved, TRANSFER_WINDOW as u64);

        let mut sink = Vec::new();
        assert_eq!(sink.transfer(&file, content.len() as u64, 10).unwrap(), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_file_transfer() {
        let content = b"the quick brown fox jumps over the lazy dog";
        let file = source(content);

        let mut sink = tempfile::tempfile().unwrap();
        Sink::write_all(&mut sink, b"head:").unwrap();
        let mut offset = 4;
        while offset < content.len() as u64 {
            let moved = sink
                .transfer(&file, offset, content.len() as u64 - offset)
                .unwrap();
            assert!(moved > 0);
            offset += moved;
        }

        sink.seek(SeekFrom::Start(0)).unwrap();
        let mut written = Vec::new();
        sink.read_to_end(&mut written).unwrap();
        assert_eq!(written, b"head:quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn test_write_sink() {
        let file = source(b"0123456789");
        let mut sink = WriteSink(Vec::new());
        Sink::write_all(&mut sink, b"ab").unwrap();
        assert_eq!(sink.transfer(&file, 8, 100).unwrap(), 2);
        Sink::flush(&mut sink).unwrap();
        assert_eq!(sink.into_inner(), b"ab89");
    }
}
