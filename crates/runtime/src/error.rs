use thiserror::Error;

/// Result type for runtime entry points.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors raised by the runtime.
///
/// Entry points distinguish *failure outcomes* (a dataset that did not
/// complete, a restart candidate that did not fetch), which are ordinary
/// return values, from these hard errors, which mean the runtime itself
/// could not do its job.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// File I/O failed.
    #[error(transparent)]
    Io(#[from] fileio::FileIoError),

    /// Tree I/O failed.
    #[error(transparent)]
    Tree(#[from] kvtree::KvTreeError),

    /// Manifest I/O failed.
    #[error(transparent)]
    Map(#[from] filemap::FileMapError),

    /// Group communication failed.
    #[error(transparent)]
    Group(#[from] collective::CollectiveError),

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// Redundancy encoding or rebuild failed.
    #[error(transparent)]
    Redundancy(#[from] redundancy::RedundancyError),

    /// Index update failed.
    #[error(transparent)]
    Index(#[from] cacheindex::IndexError),

    /// Summary I/O failed.
    #[error(transparent)]
    Summary(#[from] summary::SummaryError),

    /// Scan or rebuild driver failed.
    #[error(transparent)]
    Scan(#[from] scan::ScanError),

    /// An entry point was called outside its legal window.
    #[error("invalid runtime state: {0}")]
    State(String),
}
