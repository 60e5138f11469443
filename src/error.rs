//! Error types for lazy-zip

use std::io;
use thiserror::Error;

/// Result type for lazy-zip operations
pub type ZipResult<T> = std::result::Result<T, ZipError>;

/// Errors that can occur while writing or reading an archive
///
/// Every error is fatal to the call that returned it. When writing, an archive
/// that produced any error is incomplete (no end of central directory record)
/// and must be discarded by the caller.
#[derive(Debug, Error)]
pub enum ZipError {
    /// A content source failed to open, or a read failed mid-entry
    #[error("Content source for entry `{name}` is unavailable")]
    SourceUnavailable {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The destination refused a write, seek or flush
    #[error("Archive sink is unavailable")]
    SinkUnavailable(#[source] io::Error),

    /// The same entry name was submitted twice to one archive
    #[error("Duplicate entry name: {0}")]
    DuplicateEntryName(String),

    /// The writer was driven out of order (data without an entry, an entry
    /// left open, use after a failure, ...)
    #[error("Archive invariant violated: {0}")]
    InvariantViolation(&'static str),

    /// I/O error while reading an archive
    #[error("I/O error")]
    Io(#[from] io::Error),

    /// Invalid ZIP format or structure
    #[error("Invalid ZIP format: {0}")]
    InvalidFormat(String),

    /// Entry not found in ZIP archive
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Unsupported compression method
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),
}

impl ZipError {
    pub(crate) fn source_unavailable(name: &str, err: io::Error) -> Self {
        ZipError::SourceUnavailable {
            name: name.to_string(),
            source: err,
        }
    }

    /// True if the error came from the caller driving the API incorrectly
    /// rather than from I/O.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ZipError::DuplicateEntryName(_) | ZipError::InvariantViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn source_error_keeps_cause() {
        let err = ZipError::source_unavailable(
            "a.txt",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(
            err.to_string(),
            "Content source for entry `a.txt` is unavailable"
        );
        assert_eq!(err.source().unwrap().to_string(), "gone");
        assert!(!err.is_caller_error());
    }

    #[test]
    fn caller_errors() {
        assert!(ZipError::DuplicateEntryName("x".into()).is_caller_error());
        assert!(ZipError::InvariantViolation("no entry started").is_caller_error());
        assert!(!ZipError::SinkUnavailable(io::ErrorKind::BrokenPipe.into()).is_caller_error());
    }
}
