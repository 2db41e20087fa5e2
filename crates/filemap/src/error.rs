use std::path::PathBuf;

use thiserror::Error;

/// Result type for manifest operations.
pub type FileMapResult<T> = Result<T, FileMapError>;

/// Errors raised by manifest persistence.
#[derive(Debug, Error)]
pub enum FileMapError {
    /// The manifest file exists but cannot be read; treated as absence by
    /// scan paths, never as corruption.
    #[error("file map is not readable: {path}")]
    Unreadable {
        /// Path that failed the readability probe.
        path: PathBuf,
    },

    /// The manifest file is present but malformed.
    #[error("file map is corrupt: {0}")]
    Parse(#[source] kvtree::KvTreeError),

    /// Underlying I/O failed while writing.
    #[error(transparent)]
    Io(#[from] fileio::FileIoError),
}
