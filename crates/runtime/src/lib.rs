#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `runtime` is the layer applications link against. A [`Runtime`] owns the
//! process-scope state the library needs between [`Runtime::init`] and
//! [`Runtime::finalize`]: the parameter store, the rank's cache file map,
//! the process group handle, and the currently open output or restart
//! window.
//!
//! The write path: [`Runtime::need_checkpoint`] paces checkpoints,
//! [`Runtime::start_output`] allocates a dataset id the whole group agrees
//! on, [`Runtime::route_file`] translates each user filename into its
//! cache-side path, and [`Runtime::complete_output`] seals the dataset:
//! validity is all-reduced, the configured redundancy scheme runs,
//! checkpoint data is flushed to the prefix directory, the summary is
//! written, and the index is updated by rank 0 under lock.
//!
//! The read path: [`Runtime::have_restart`] asks the index for the newest
//! complete dataset that has not failed a fetch, [`Runtime::start_restart`]
//! opens it, [`Runtime::route_file`] resolves reads, and
//! [`Runtime::complete_restart`] either finishes the recovery or marks the
//! dataset failed so the next candidate is tried.

mod error;
mod runtime;

pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{Runtime, RuntimeOptions};
