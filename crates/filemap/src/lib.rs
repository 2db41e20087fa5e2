#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `filemap` is the per-rank manifest: which files each rank wrote for each
//! dataset, their meta records, the redundancy descriptor used to protect
//! them, the scavenge descriptor that tells offline tooling how to flush
//! them, and the expected file count that defines completeness.
//!
//! The manifest is one [`kvtree::KvTree`] holding two symmetric indices:
//!
//! ```text
//! RANK
//!   <r>
//!     DSET
//!       <d>
//!         FILES <n>
//!         FILE <relpath> META { ... }
//!         REDDESC { ... }
//!         FLUSH { PARTNER, PRESERVE, CONTAINER }
//!         DSETDESC { ... }
//! DSET
//!   <d>
//!     RANK
//!       <r>            (stub; fast enumeration only)
//! ```
//!
//! # Invariants
//!
//! - The two indices agree: a `(rank, dataset)` pair appears in one iff it
//!   appears in the other; emptying a bucket removes both stubs.
//! - `FILE` never enumerates more entries than `FILES` promises once a
//!   dataset completes.
//! - [`FileMap::extract_rank`] followed by [`FileMap::merge`] restores the
//!   original map.

mod error;
mod map;

pub use error::{FileMapError, FileMapResult};
pub use map::{FileMap, SCAVENGE_KEY_CONTAINER, SCAVENGE_KEY_PARTNER, SCAVENGE_KEY_PRESERVE};
