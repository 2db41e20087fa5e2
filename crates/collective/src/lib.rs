#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `collective` defines the process-group abstraction the cache layer runs
//! on. The core never assumes a particular transport; it only calls the
//! [`ProcessGroup`] trait for barriers, broadcasts, reductions, prefix
//! scans, and the neighbor exchange the XOR ring needs.
//!
//! Two implementations ship here:
//!
//! - [`SingleProcess`], the degenerate one-member group every collective is
//!   trivial on; and
//! - [`ThreadGroup`], an in-process group over crossbeam channels, used by
//!   tests to drive genuinely collective code paths (dataset id agreement,
//!   XOR ring encoding) with one thread per rank.
//!
//! The [`glue`] module broadcasts the two value types that cross rank
//! boundaries as data: [`pathseq::PathSeq`] and [`kvtree::KvTree`].

mod error;
pub mod glue;
mod group;
mod single;
mod threads;

pub use error::{CollectiveError, CollectiveResult};
pub use group::{ProcessGroup, ReduceOp};
pub use single::SingleProcess;
pub use threads::ThreadGroup;
