#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `cli` holds the frontends behind the scavenge and rebuild binaries:
//!
//! - `scr-index` lists, adds, removes, and selects dataset directories in
//!   the prefix index, building summaries (and rebuilding lost members)
//!   for freshly scavenged directories;
//! - `scr-copy` runs on each compute node during a scavenge and copies a
//!   dataset's files from cache to the prefix directory;
//! - `scr-rebuild-xor` reconstructs one missing member of an XOR set from
//!   the surviving fragments;
//! - `scr-rebuild-partner` restores a lost rank from its partner's copies.
//!
//! Each frontend returns a process exit code; the binaries are one-line
//! wrappers.

mod copy;
mod index;
mod rebuild_partner;
mod rebuild_xor;

pub use copy::{CopyArgs, run_copy};
pub use index::{IndexArgs, run_index};
pub use rebuild_partner::{RebuildPartnerArgs, run_rebuild_partner};
pub use rebuild_xor::{RebuildXorArgs, run_rebuild_xor};

/// Installs the stderr log subscriber the tools share.
///
/// Verbosity follows `SCR_LOG` when set (an `EnvFilter` directive string),
/// defaulting to warnings only.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var("SCR_LOG").unwrap_or_else(|_| "warn".to_owned());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
