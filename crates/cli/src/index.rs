use std::path::{Path, PathBuf};

use cacheindex::Index;
use clap::Parser;
use scan::{RebuildRunner, summarize_dataset};

/// Maintain the dataset index of a prefix directory.
#[derive(Debug, Parser)]
#[command(name = "scr-index")]
pub struct IndexArgs {
    /// List indexed datasets (default behavior).
    #[arg(short, long)]
    list: bool,

    /// Add dataset directory to the index, building its summary if needed.
    #[arg(short, long, value_name = "DIR")]
    add: Option<String>,

    /// Remove dataset directory from the index (does not delete files).
    #[arg(short, long, value_name = "DIR")]
    remove: Option<String>,

    /// Select dataset directory as the restart target.
    #[arg(short, long, value_name = "DIR")]
    current: Option<String>,

    /// Prefix directory (defaults to the current working directory).
    #[arg(short, long, value_name = "DIR")]
    prefix: Option<PathBuf>,
}

/// Where the rebuild tool lives: next to this binary unless overridden.
fn rebuild_tool() -> PathBuf {
    if let Ok(path) = std::env::var("SCR_REBUILD_XOR") {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join("scr-rebuild-xor")))
        .unwrap_or_else(|| PathBuf::from("scr-rebuild-xor"))
}

fn add_dir(prefix: &Path, dir: &str) -> bool {
    let dataset_dir = prefix.join(dir);

    // an already-indexed directory is fine as it is
    let index = match Index::read(prefix) {
        Ok(index) => index,
        Err(err) => {
            tracing::error!(error = %err, "failed to read index");
            return false;
        }
    };
    if index.get_id_by_dir(dir).is_none() {
        // build (or rebuild) the summary, rebuilding lost members if the
        // fragments allow it
        let summary_ok = summary::read_summary(&dataset_dir).is_ok()
            || match summarize_dataset(&dataset_dir, &RebuildRunner::Spawn(rebuild_tool())) {
                Ok(_) => true,
                Err(err) => {
                    tracing::error!(%dir, error = %err, "scan failed");
                    false
                }
            };
        if !summary_ok {
            return false;
        }

        let summary = match summary::read_summary(&dataset_dir) {
            Ok(s) => s,
            Err(err) => {
                tracing::error!(%dir, error = %err, "no summary after scan");
                return false;
            }
        };
        let Some(id) = summary.dataset.id() else {
            tracing::error!(%dir, "summary carries no dataset id");
            return false;
        };

        let update = (|| -> Result<(), cacheindex::IndexError> {
            let (lock, mut index) = Index::load_locked(prefix)?;
            index.add(dir, &summary.dataset, summary.complete);
            index.mark_flushed(id, dir)?;
            index.store_unlock(lock)
        })();
        if let Err(err) = update {
            tracing::error!(%dir, error = %err, "failed to update index");
            return false;
        }
    }

    // exit status reports whether the directory is a usable restart source
    match Index::read(prefix) {
        Ok(index) => index
            .get_id_by_dir(dir)
            .and_then(|id| index.get_complete(id, dir))
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn list(prefix: &Path) -> bool {
    let index = match Index::read(prefix) {
        Ok(index) => index,
        Err(err) => {
            tracing::error!(error = %err, "failed to read index");
            return false;
        }
    };

    println!("   DSET VALID FLUSHED             DIRECTORY");
    for entry in index.list() {
        let star = if entry.current { "*" } else { " " };
        let valid = if entry.is_valid() { "YES  " } else { "NO   " };
        let flushed = entry.flushed.as_deref().unwrap_or("                   ");
        println!("{star}{:6} {valid} {flushed} {}", entry.id, entry.dir);
    }
    true
}

fn update_index<F>(prefix: &Path, apply: F) -> bool
where
    F: FnOnce(&mut Index) -> Result<(), cacheindex::IndexError>,
{
    let result = (|| -> Result<(), cacheindex::IndexError> {
        let (lock, mut index) = Index::load_locked(prefix)?;
        apply(&mut index)?;
        index.store_unlock(lock)
    })();
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, "index update failed");
            false
        }
    }
}

/// Entry point for `scr-index`; returns the process exit code.
#[must_use]
pub fn run_index(args: &IndexArgs) -> i32 {
    let prefix = args
        .prefix
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let ok = if args.list
        || (args.add.is_none() && args.remove.is_none() && args.current.is_none())
    {
        list(&prefix)
    } else if let Some(dir) = &args.add {
        add_dir(&prefix, dir)
    } else if let Some(dir) = &args.remove {
        update_index(&prefix, |index| index.remove_dir(dir))
    } else if let Some(dir) = &args.current {
        update_index(&prefix, |index| index.set_current(dir))
    } else {
        list(&prefix)
    };
    i32::from(!ok)
}
