use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use redundancy::partner::{PartnerMode, rebuild_partner};

/// What a partner rebuild should restore.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    /// Restore data files and their maps.
    Data,
    /// Restore only the rank-scoped file maps.
    Map,
}

/// Restore a lost rank from its partner's scavenged copies.
///
/// Runs in the dataset directory; file paths are interpreted relative to
/// it.
#[derive(Debug, Parser)]
#[command(name = "scr-rebuild-partner")]
pub struct RebuildPartnerArgs {
    /// Whether to restore data files or only their maps.
    #[arg(value_enum)]
    pub mode: Mode,

    /// Scavenged partner copies: map shards plus (for data mode) the
    /// copied files.
    pub partner_files: Vec<PathBuf>,
}

/// Entry point for `scr-rebuild-partner`; returns the process exit code.
#[must_use]
pub fn run_rebuild_partner(args: &RebuildPartnerArgs) -> i32 {
    let dataset_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            tracing::error!(error = %err, "cannot determine working directory");
            return 1;
        }
    };

    let mode = match args.mode {
        Mode::Data => PartnerMode::Data,
        Mode::Map => PartnerMode::Map,
    };

    match rebuild_partner(&dataset_dir, mode, &args.partner_files) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "partner rebuild failed");
            1
        }
    }
}
