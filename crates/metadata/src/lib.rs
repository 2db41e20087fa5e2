#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `metadata` defines the two record types layered over [`kvtree::KvTree`]:
//!
//! - [`Meta`] describes one file a rank wrote: where it came from, how big
//!   it is, its CRC, and whether it was ever marked complete;
//! - [`Dataset`] describes one dataset the process group wrote together:
//!   its id, name, flags, and creation time.
//!
//! Both are thin wrappers that own a tree and expose typed accessors for the
//! fixed keys, so the same bytes can travel through file maps, redundancy
//! headers, summaries, and the index without translation.

mod dataset;
mod meta;

pub use dataset::{Dataset, DatasetFlags};
pub use meta::{FileKind, Meta};
