use std::path::PathBuf;

use clap::Parser;
use redundancy::xor::rebuild_offline;

/// Rebuild one missing member of an XOR set from the surviving fragments.
///
/// Runs in the dataset directory; fragment paths are interpreted relative
/// to it.
#[derive(Debug, Parser)]
#[command(name = "scr-rebuild-xor")]
pub struct RebuildXorArgs {
    /// Number of members in the XOR set.
    pub set_size: usize,

    /// Zero-based index of the missing member.
    pub missing_index: usize,

    /// Path where the missing member's fragment shall be written.
    pub missing_xor_path: PathBuf,

    /// Surviving fragments, ordered cyclically starting from the member
    /// immediately after the missing one.
    pub surviving_xor_paths: Vec<PathBuf>,
}

/// Entry point for `scr-rebuild-xor`; returns the process exit code.
#[must_use]
pub fn run_rebuild_xor(args: &RebuildXorArgs) -> i32 {
    let dataset_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            tracing::error!(error = %err, "cannot determine working directory");
            return 1;
        }
    };

    match rebuild_offline(
        &dataset_dir,
        args.set_size,
        args.missing_index,
        &args.missing_xor_path,
        &args.surviving_xor_paths,
    ) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "rebuild failed");
            1
        }
    }
}
