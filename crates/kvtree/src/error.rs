use std::path::PathBuf;

use thiserror::Error;

/// Result type for tree operations.
pub type KvTreeResult<T> = Result<T, KvTreeError>;

/// Errors raised while serializing or persisting trees.
#[derive(Debug, Error)]
pub enum KvTreeError {
    /// Underlying file I/O failed.
    #[error(transparent)]
    Io(#[from] fileio::FileIoError),

    /// The file exists but this process may not read it.
    ///
    /// Kept distinct from [`KvTreeError::Format`] so callers can treat an
    /// unreadable map as absent without mistaking corruption for absence.
    #[error("file is not readable: {path}")]
    Unreadable {
        /// Path that failed the readability probe.
        path: PathBuf,
    },

    /// The serialized form is malformed.
    #[error("malformed tree data in {context}: {detail}")]
    Format {
        /// What was being parsed (file path or "pack").
        context: String,
        /// What went wrong.
        detail: String,
    },
}

impl KvTreeError {
    pub(crate) fn format(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Format {
            context: context.into(),
            detail: detail.into(),
        }
    }
}
