#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `scan` reconstructs a dataset from whatever fragments a scavenge managed
//! to pull off the surviving nodes. Given a dataset directory populated
//! with per-rank file map shards (`.scr/<rank>.scrfilemap`), user data
//! files, and XOR fragments, the driver:
//!
//! 1. **scans** every shard, admitting only files that pass the
//!    complete-on-disk checks and collecting XOR set membership from the
//!    `<k>_of_<K>_in_<set>.xor` fragment names;
//! 2. **inspects** the result, marking ranks whose files are missing and
//!    flagging structural breaks (conflicting rank counts, ranks out of
//!    range, more files than promised) as invalid;
//! 3. **decides** per XOR set: nothing to do, a single-member rebuild, or
//!    unrecoverable;
//! 4. **executes** the needed rebuilds as parallel child processes of the
//!    rebuild tool, joined before the dataset is re-scanned;
//! 5. **summarizes**: when nothing is missing or invalid afterwards, the
//!    dataset summary is written with `COMPLETE=1`.

mod driver;
mod inspect;
mod scanner;

use std::path::PathBuf;

use thiserror::Error;

pub use driver::{summarize_dataset, RebuildRunner};
pub use inspect::{inspect, DatasetPlan, SetDecision, XorSetPlan};
pub use scanner::{scan_files, Scan, ScannedDataset, SetMember};

/// Result type for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors raised by the scan and rebuild driver.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Underlying file I/O failed.
    #[error(transparent)]
    Io(#[from] fileio::FileIoError),

    /// A file map shard is present but corrupt.
    #[error(transparent)]
    Map(#[from] filemap::FileMapError),

    /// Tree I/O failed.
    #[error(transparent)]
    Tree(#[from] kvtree::KvTreeError),

    /// Summary I/O failed.
    #[error(transparent)]
    Summary(#[from] summary::SummaryError),

    /// An in-process rebuild failed.
    #[error(transparent)]
    Rebuild(#[from] redundancy::RedundancyError),

    /// A spawned rebuild child failed.
    #[error("rebuild child for {path} exited with {status}")]
    Child {
        /// Missing fragment the child was rebuilding.
        path: PathBuf,
        /// Exit status description.
        status: String,
    },

    /// The rebuild tool could not be spawned.
    #[error("failed to spawn rebuild tool {tool}: {source}")]
    Spawn {
        /// Tool path.
        tool: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
