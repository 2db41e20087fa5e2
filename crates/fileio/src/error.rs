use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for file I/O primitives.
pub type FileIoResult<T> = Result<T, FileIoError>;

/// Errors raised by the file I/O primitives.
#[derive(Debug, Error)]
pub enum FileIoError {
    /// An I/O error with no path context.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),

    /// Failed to open a file after retries.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Path that could not be opened.
        path: PathBuf,
        /// Underlying error from the final attempt.
        #[source]
        source: io::Error,
    },

    /// An I/O error while reading or writing a named file.
    #[error("I/O error on {path}: {source}")]
    File {
        /// Path of the file being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Could not acquire or release an advisory lock.
    #[error("lock operation failed on {path}: {source}")]
    Lock {
        /// Path of the locked file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A write stopped making progress before all bytes were written.
    #[error("short write to {path}: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Path of the destination file.
        path: PathBuf,
        /// Bytes actually written.
        written: u64,
        /// Bytes requested.
        expected: u64,
    },

    /// A line did not fit in the caller's buffer.
    #[error("line too long reading {path}")]
    LineTooLong {
        /// Path of the file being read.
        path: PathBuf,
    },

    /// Failed to create a directory or one of its parents.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory being created.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}
