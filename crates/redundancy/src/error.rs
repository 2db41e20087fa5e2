use std::path::PathBuf;

use thiserror::Error;

/// Result type for redundancy operations.
pub type RedundancyResult<T> = Result<T, RedundancyError>;

/// Errors raised while encoding or rebuilding.
#[derive(Debug, Error)]
pub enum RedundancyError {
    /// Underlying file I/O failed.
    #[error(transparent)]
    Io(#[from] fileio::FileIoError),

    /// Tree serialization failed.
    #[error(transparent)]
    Tree(#[from] kvtree::KvTreeError),

    /// Manifest persistence failed.
    #[error(transparent)]
    Map(#[from] filemap::FileMapError),

    /// Group communication failed.
    #[error(transparent)]
    Group(#[from] collective::CollectiveError),

    /// The XOR header carries a version this build does not understand.
    #[error("unsupported XOR header version {found} in {path}")]
    HeaderVersion {
        /// Version found in the file.
        found: i64,
        /// File the header came from.
        path: PathBuf,
    },

    /// A required header field is absent or malformed.
    #[error("XOR header in {path} is missing {field}")]
    HeaderField {
        /// File the header came from.
        path: PathBuf,
        /// Field that was expected.
        field: &'static str,
    },

    /// A reconstructed file failed its size or CRC check.
    #[error("integrity check failed for {path}: {detail}")]
    Integrity {
        /// File that failed verification.
        path: PathBuf,
        /// What mismatched.
        detail: String,
    },

    /// The set geometry arguments are inconsistent.
    #[error("invalid redundancy set: {0}")]
    Geometry(String),
}
