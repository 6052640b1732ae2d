//! Error type shared by every stage of archive production.

use std::{io, path::PathBuf};

use thiserror::Error;
use ustar_header::HeaderError;

/// Everything that can go wrong while producing an archive.
///
/// Validation failures ([`Error::is_validation`]) are detected before any
/// byte is produced.  The rest surface through [`crate::Subscriber::on_error`]
/// and end the sequence, except for a lenient [`Error::ProtocolViolation`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("{}: archiving directories is not supported", .0.display())]
    Directory(PathBuf),
    #[error("{}: no such file", .0.display())]
    NotFound(PathBuf),
    #[error("{}: not a regular file", .0.display())]
    NotRegularFile(PathBuf),
    #[error("{}: cannot build header: {source}", path.display())]
    Header {
        path: PathBuf,
        #[source]
        source: HeaderError,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("demand must be non-negative, got {0}")]
    ProtocolViolation(i64),
    #[error("chunk size {0} is not a non-zero multiple of {block}", block = crate::BLOCK_SIZE)]
    InvalidChunkSize(usize),
    #[error("archive production stopped without completing")]
    Aborted,
}

impl Error {
    /// Whether the error was caused by the caller's input rather than by the
    /// environment.
    pub fn is_validation(&self) -> bool {
        match self {
            Error::Directory(_)
            | Error::NotFound(_)
            | Error::NotRegularFile(_)
            | Error::InvalidChunkSize(_) => true,
            Error::Header { source, .. } => !matches!(source, HeaderError::Io(_)),
            Error::Io(_) | Error::ProtocolViolation(_) | Error::Aborted => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_kinds() {
        assert!(Error::Directory("/tmp".into()).is_validation());
        assert!(Error::NotFound("/nope".into()).is_validation());
        assert!(Error::NotRegularFile("/dev/null".into()).is_validation());
        assert!(Error::InvalidChunkSize(100).is_validation());
        assert!(Error::Header {
            path: "x".into(),
            source: HeaderError::NoFileName
        }
        .is_validation());

        assert!(!Error::Header {
            path: "x".into(),
            source: HeaderError::Io(io::ErrorKind::NotFound.into())
        }
        .is_validation());
        assert!(!Error::ProtocolViolation(-1).is_validation());
        assert!(!Error::Io(io::ErrorKind::BrokenPipe.into()).is_validation());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::Directory("/srv/data".into()).to_string(),
            "/srv/data: archiving directories is not supported"
        );
        assert_eq!(
            Error::InvalidChunkSize(1000).to_string(),
            "chunk size 1000 is not a non-zero multiple of 512"
        );
        assert_eq!(
            Error::ProtocolViolation(-3).to_string(),
            "demand must be non-negative, got -3"
        );
    }
}
