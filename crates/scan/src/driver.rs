use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use metadata::Dataset;
use redundancy::xor::rebuild_offline;
use summary::{Summary, write_summary};

use crate::inspect::{DatasetPlan, SetDecision, inspect};
use crate::scanner::scan_files;
use crate::{ScanError, ScanResult};

/// How the driver runs the per-set rebuilds.
#[derive(Clone, Debug)]
pub enum RebuildRunner {
    /// Fork the rebuild tool once per set, in parallel, in the dataset
    /// directory, and reap the children.
    Spawn(
        /// Path of the rebuild tool binary.
        PathBuf,
    ),
    /// Run the rebuilds in this process; used by tests and by callers that
    /// cannot fork.
    InProcess,
}

impl RebuildRunner {
    fn execute(&self, dataset_dir: &Path, plan: &DatasetPlan) -> ScanResult<()> {
        match self {
            Self::Spawn(tool) => {
                let mut children: Vec<(Child, PathBuf)> = Vec::new();
                for set in plan.rebuilds() {
                    let SetDecision::Rebuild {
                        missing_member,
                        missing_path,
                        survivor_paths,
                    } = &set.decision
                    else {
                        continue;
                    };
                    tracing::info!(
                        set = set.set_id,
                        member = missing_member,
                        tool = %tool.display(),
                        "spawning rebuild"
                    );
                    let child = Command::new(tool)
                        .arg(set.set_size.to_string())
                        .arg((missing_member - 1).to_string())
                        .arg(missing_path)
                        .args(survivor_paths)
                        .current_dir(dataset_dir)
                        .spawn()
                        .map_err(|source| ScanError::Spawn {
                            tool: tool.clone(),
                            source,
                        })?;
                    children.push((child, PathBuf::from(missing_path)));
                }

                let mut failure = None;
                for (mut child, path) in children {
                    match child.wait() {
                        Ok(status) if status.success() => {}
                        Ok(status) => {
                            failure = Some(ScanError::Child {
                                path,
                                status: status.to_string(),
                            });
                        }
                        Err(err) => {
                            failure = Some(ScanError::Child {
                                path,
                                status: err.to_string(),
                            });
                        }
                    }
                }
                failure.map_or(Ok(()), Err)
            }
            Self::InProcess => {
                for set in plan.rebuilds() {
                    let SetDecision::Rebuild {
                        missing_member,
                        missing_path,
                        survivor_paths,
                    } = &set.decision
                    else {
                        continue;
                    };
                    let survivors: Vec<PathBuf> =
                        survivor_paths.iter().map(PathBuf::from).collect();
                    rebuild_offline(
                        dataset_dir,
                        set.set_size,
                        missing_member - 1,
                        Path::new(missing_path),
                        &survivors,
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Scans a dataset directory, rebuilds what a single lost member per XOR
/// set allows, and writes the dataset summary.
///
/// Returns whether the dataset ended up complete. The summary is written
/// either way, carrying the final `COMPLETE` flag, so the index can record
/// the dataset even when it is beyond repair.
pub fn summarize_dataset(dataset_dir: &Path, runner: &RebuildRunner) -> ScanResult<bool> {
    let mut scan = scan_files(dataset_dir)?;
    let mut plans = inspect(&scan);

    if plans.len() != 1 {
        tracing::error!(
            dir = %dataset_dir.display(),
            datasets = plans.len(),
            "dataset directory must hold exactly one dataset"
        );
        return Ok(false);
    }
    let mut plan = plans.remove(0);

    if !plan.is_complete() && !plan.invalid {
        if plan.is_unrecoverable() {
            tracing::error!(
                dataset = plan.id,
                "too many members lost; not attempting a rebuild"
            );
        } else if !plan.rebuilds().is_empty() {
            match runner.execute(dataset_dir, &plan) {
                Ok(()) => {
                    // fresh fragments and file maps are on disk now
                    scan = scan_files(dataset_dir)?;
                    plans = inspect(&scan);
                    if let Some(new_plan) = plans.into_iter().find(|p| p.id == plan.id) {
                        plan = new_plan;
                    }
                }
                Err(err) => {
                    tracing::error!(dataset = plan.id, error = %err, "rebuild failed");
                }
            }
        }
    }

    let complete = plan.is_complete();
    let entry = scan
        .datasets
        .get(&plan.id)
        .cloned()
        .unwrap_or_default();
    let summary = Summary {
        dataset: entry.dataset.unwrap_or_else(Dataset::new),
        complete,
    };
    write_summary(dataset_dir, &summary, &entry.rank2file)?;

    tracing::info!(
        dataset = plan.id,
        complete,
        missing = plan.missing.len(),
        "dataset summarized"
    );
    Ok(complete)
}
