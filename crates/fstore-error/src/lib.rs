use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for FrankenStore fsck operations.
///
/// These are *operational* failures — the file cannot be opened, a read
/// came back short, a decoder was handed a buffer of the wrong size.
/// On-disk corruption is never reported through this type: corruption is
/// data the checker collects into per-phase records and keeps going.
#[derive(Error, Debug)]
pub enum FsckError {
    /// Input file does not exist or cannot be opened read-only.
    #[error("unable to open file: '{path}'")]
    CannotOpen { path: PathBuf },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes than requested came back from a positioned read.
    #[error("short read: expected {expected} bytes at offset {offset}, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// A raw read was requested with a size that is not a multiple of the
    /// device block size.
    #[error("read size {size} is not a multiple of the device block size")]
    BadReadSize { size: usize },

    /// A raw read was requested at an offset not aligned to the device
    /// block size.
    #[error("read offset {offset} is not device-block aligned")]
    UnalignedRead { offset: u64 },

    /// A decoder was handed a buffer smaller than the structure it
    /// parses.
    #[error("buffer too small for {what}: {len} bytes")]
    BufferTooSmall { what: &'static str, len: usize },

    /// Internal logic error (a checker bug, not a property of the file).
    #[error("internal error: {0}")]
    Internal(String),
}

impl FsckError {
    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `FsckError`.
pub type Result<T> = std::result::Result<T, FsckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings() {
        let err = FsckError::ShortRead {
            offset: 512,
            expected: 512,
            actual: 100,
        };
        assert_eq!(
            err.to_string(),
            "short read: expected 512 bytes at offset 512, got 100"
        );
        assert_eq!(
            FsckError::BadReadSize { size: 100 }.to_string(),
            "read size 100 is not a multiple of the device block size"
        );
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FsckError = io_err.into();
        assert!(matches!(err, FsckError::Io(_)));
    }

    #[test]
    fn internal_constructor() {
        let err = FsckError::internal("impossible state");
        assert_eq!(err.to_string(), "internal error: impossible state");
    }
}
