#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `summary` writes and reads the per-dataset completeness proof stored
//! under `<dataset>/.scr/` in the prefix directory:
//!
//! - `summary.scr` carries the format version, the dataset descriptor, and
//!   the dataset-level `COMPLETE` flag;
//! - `rank2file.scr` is the top of a two-level tree of rank-to-file maps:
//!   it names one level-0 shard per group of at most 8,192 ranks, each
//!   stored as `rank2file.0.<writer>.scr` where `<writer>` is the index of
//!   the shard's first rank in write order.
//!
//! Readers either reassemble the whole map ([`read_rank2file`]) or walk the
//! shard tree for a single rank ([`read_rank`]).
//!
//! A dataset is complete in the summary iff every rank `0..N-1` appears
//! exactly once, each rank's `FILES` count matches its `FILE` entries, and
//! no file is marked incomplete.

use std::path::{Path, PathBuf};

use kvtree::{KvTree, KvTreeError, SortMode};
use metadata::Dataset;
use thiserror::Error;

/// Summary format version this build writes and accepts.
pub const SUMMARY_FILE_VERSION: i64 = 6;

/// Ranks per level-0 shard.
pub const SHARD_RANKS: usize = 8192;

/// Key for the format version.
pub const KEY_VERSION: &str = "VERSION";
/// Key for the dataset-level completeness flag.
pub const KEY_COMPLETE: &str = "COMPLETE";
/// Key for the dataset descriptor.
pub const KEY_DSET: &str = "DSET";
/// Key for the rank-to-file map.
pub const KEY_RANK2FILE: &str = "RANK2FILE";
/// Key for rank subtrees.
pub const KEY_RANK: &str = "RANK";
/// Key for the total rank count.
pub const KEY_RANKS: &str = "RANKS";
/// Key for a rank's promised file count.
pub const KEY_FILES: &str = "FILES";
/// Key for a rank's file subtrees.
pub const KEY_FILE: &str = "FILE";
/// Key for a file's size.
pub const KEY_SIZE: &str = "SIZE";
/// Key for a file's CRC32.
pub const KEY_CRC: &str = "CRC";
/// Key for the shard nesting level.
pub const KEY_LEVEL: &str = "LEVEL";
/// Key for a shard's byte offset (reserved; currently always zero).
pub const KEY_OFFSET: &str = "OFFSET";
/// Marker for files that restart must not fetch (redundancy fragments).
pub const KEY_NOFETCH: &str = "NOFETCH";

/// Result type for summary operations.
pub type SummaryResult<T> = Result<T, SummaryError>;

/// Errors raised by summary I/O.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// Underlying tree I/O failed.
    #[error(transparent)]
    Tree(#[from] KvTreeError),

    /// Underlying file I/O failed.
    #[error(transparent)]
    Io(#[from] fileio::FileIoError),

    /// The summary exists but carries an unsupported version.
    #[error("unsupported summary version {found} in {path}")]
    Version {
        /// Version found in the file.
        found: i64,
        /// Offending file.
        path: PathBuf,
    },

    /// A required key is absent.
    #[error("summary in {path} is missing {field}")]
    Field {
        /// Offending file.
        path: PathBuf,
        /// Missing key.
        field: &'static str,
    },
}

/// The dataset-level half of the summary.
#[derive(Clone, Debug)]
pub struct Summary {
    /// Dataset descriptor.
    pub dataset: Dataset,
    /// Whether the dataset was complete when the summary was written.
    pub complete: bool,
}

fn meta_dir(dataset_dir: &Path) -> PathBuf {
    dataset_dir.join(".scr")
}

fn summary_path(dataset_dir: &Path) -> PathBuf {
    meta_dir(dataset_dir).join("summary.scr")
}

fn rank2file_path(dataset_dir: &Path) -> PathBuf {
    meta_dir(dataset_dir).join("rank2file.scr")
}

fn shard_name(writer: usize) -> String {
    format!("rank2file.0.{writer}.scr")
}

/// Writes the dataset summary and the sharded rank-to-file map.
///
/// `rank2file` holds `RANK/<r>/…` leaves plus a `RANKS` count; ranks are
/// sorted and split into shards of at most [`SHARD_RANKS`] entries.
pub fn write_summary(
    dataset_dir: &Path,
    summary: &Summary,
    rank2file: &KvTree,
) -> SummaryResult<()> {
    let meta = meta_dir(dataset_dir);
    fileio::mkdir_p(&meta)?;

    // sort ranks and slice them into level-0 shards
    let mut ranks_tree = KvTree::new();
    if let Some(source) = rank2file.get(KEY_RANK) {
        ranks_tree.merge(source);
    }
    ranks_tree.sort(SortMode::AscendingInt);

    let mut top = KvTree::new();
    top.set_int(KEY_LEVEL, 1);

    let entries: Vec<(String, KvTree)> = ranks_tree
        .iter()
        .map(|(k, v)| {
            let mut copy = KvTree::new();
            copy.merge(v);
            (k.to_owned(), copy)
        })
        .collect();

    let mut max_rank: i64 = -1;
    let mut writer = 0usize;
    for shard_entries in entries.chunks(SHARD_RANKS.max(1)) {
        let mut shard = KvTree::new();
        shard.set_int(KEY_LEVEL, 0);
        shard.set_int(KEY_RANKS, shard_entries.len() as i64);
        for (rank_key, rank_tree) in shard_entries {
            if let Ok(rank) = rank_key.parse::<i64>() {
                max_rank = max_rank.max(rank);
            }
            shard
                .entry(KEY_RANK)
                .set(rank_key.clone(), rank_tree.clone());
        }

        let name = shard_name(writer);
        shard.write_file(&meta.join(&name))?;

        let entry = top.set_kv_int(KEY_RANK, writer as i64);
        entry.set_str(KEY_FILE, format!(".scr/{name}"));
        entry.set_bytecount(KEY_OFFSET, 0);

        writer += shard_entries.len();
    }

    // total ranks in the job: the map may be empty, fall back to the count
    // the caller recorded
    let total = rank2file.get_int(KEY_RANKS).unwrap_or(max_rank + 1);
    top.set_int(KEY_RANKS, total);
    top.write_file(&rank2file_path(dataset_dir))?;

    let mut head = KvTree::new();
    head.set_int(KEY_VERSION, SUMMARY_FILE_VERSION);
    head.set_int(KEY_COMPLETE, i64::from(summary.complete));
    let mut dset = KvTree::new();
    dset.merge(summary.dataset.tree());
    head.set(KEY_DSET, dset);
    head.write_file(&summary_path(dataset_dir))?;

    tracing::debug!(
        dir = %dataset_dir.display(),
        ranks = total,
        shards = top.get(KEY_RANK).map_or(0, kvtree::KvTree::len),
        "wrote dataset summary"
    );
    Ok(())
}

/// Reads `summary.scr` for a dataset directory.
pub fn read_summary(dataset_dir: &Path) -> SummaryResult<Summary> {
    let path = summary_path(dataset_dir);
    let mut tree = KvTree::new();
    tree.read_file(&path)?;

    let version = tree.get_int(KEY_VERSION).ok_or(SummaryError::Field {
        path: path.clone(),
        field: KEY_VERSION,
    })?;
    if version != SUMMARY_FILE_VERSION {
        return Err(SummaryError::Version {
            found: version,
            path,
        });
    }

    let mut dataset_tree = KvTree::new();
    dataset_tree.merge(tree.get(KEY_DSET).ok_or(SummaryError::Field {
        path: path.clone(),
        field: KEY_DSET,
    })?);

    Ok(Summary {
        dataset: Dataset::from_tree(dataset_tree),
        complete: tree.get_int(KEY_COMPLETE) == Some(1),
    })
}

/// Reassembles the full rank-to-file map from the shard tree.
pub fn read_rank2file(dataset_dir: &Path) -> SummaryResult<KvTree> {
    let top_path = rank2file_path(dataset_dir);
    let mut top = KvTree::new();
    top.read_file(&top_path)?;

    let mut map = KvTree::new();
    if let Some(total) = top.get_int(KEY_RANKS) {
        map.set_int(KEY_RANKS, total);
    }

    if let Some(writers) = top.get(KEY_RANK) {
        for (_, entry) in writers.iter() {
            let Some(file) = entry.get_str(KEY_FILE) else {
                return Err(SummaryError::Field {
                    path: top_path.clone(),
                    field: KEY_FILE,
                });
            };
            // shard names are recorded relative to the dataset directory
            let shard_path = dataset_dir.join(file);
            let mut shard = KvTree::new();
            shard.read_file(&shard_path)?;
            if let Some(ranks) = shard.get(KEY_RANK) {
                map.entry(KEY_RANK).merge(ranks);
            }
        }
    }
    Ok(map)
}

/// Reads the rank-to-file entry for one rank, walking only the shard that
/// contains it.
pub fn read_rank(dataset_dir: &Path, rank: i64) -> SummaryResult<Option<KvTree>> {
    let top_path = rank2file_path(dataset_dir);
    let mut top = KvTree::new();
    top.read_file(&top_path)?;

    let Some(writers) = top.get(KEY_RANK) else {
        return Ok(None);
    };
    for (_, entry) in writers.iter() {
        let Some(file) = entry.get_str(KEY_FILE) else {
            continue;
        };
        let mut shard = KvTree::new();
        shard.read_file(&dataset_dir.join(file))?;
        let rank_key = rank.to_string();
        if let Some(found) = shard.get_at([KEY_RANK, rank_key.as_str()]) {
            let mut copy = KvTree::new();
            copy.merge(found);
            return Ok(Some(copy));
        }
    }
    Ok(None)
}

/// Verifies the completeness rule over a reassembled rank-to-file map.
///
/// Every rank `0..ranks` must appear exactly once, each rank's `FILES`
/// count must match its `FILE` entries, and no file may be explicitly
/// marked incomplete.
#[must_use]
pub fn map_is_complete(map: &KvTree) -> bool {
    let Some(ranks) = map.get_int(KEY_RANKS) else {
        return false;
    };
    let Some(rank_tree) = map.get(KEY_RANK) else {
        return ranks == 0;
    };
    if rank_tree.len() as i64 != ranks {
        return false;
    }
    for expected in 0..ranks {
        let Some(entry) = rank_tree.get(&expected.to_string()) else {
            return false;
        };
        let Some(files) = entry.get_int(KEY_FILES) else {
            return false;
        };
        let actual = entry.get(KEY_FILE).map_or(0, KvTree::len) as i64;
        if actual != files {
            return false;
        }
        if let Some(file_tree) = entry.get(KEY_FILE) {
            for (_, file) in file_tree.iter() {
                if file.get_int(KEY_COMPLETE) == Some(0) {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank_entry(files: &[(&str, u64)]) -> KvTree {
        let mut entry = KvTree::new();
        entry.set_int(KEY_FILES, files.len() as i64);
        for (name, size) in files {
            let node = entry.entry(KEY_FILE).entry(*name);
            node.set_bytecount(KEY_SIZE, *size);
        }
        entry
    }

    fn sample_map(ranks: i64) -> KvTree {
        let mut map = KvTree::new();
        map.set_int(KEY_RANKS, ranks);
        for r in 0..ranks {
            let name = format!("ckpt.{r}.dat");
            map.entry(KEY_RANK)
                .set(r.to_string(), rank_entry(&[(&name, 100 + r as u64)]));
        }
        map
    }

    fn sample_summary() -> Summary {
        let mut dataset = Dataset::new();
        dataset.set_id(12);
        dataset.set_name("ckpt.12");
        Summary {
            dataset,
            complete: true,
        }
    }

    #[test]
    fn summary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_summary(dir.path(), &sample_summary(), &sample_map(4)).unwrap();

        let back = read_summary(dir.path()).unwrap();
        assert!(back.complete);
        assert_eq!(back.dataset.id(), Some(12));
        assert_eq!(back.dataset.name(), Some("ckpt.12"));
    }

    #[test]
    fn rank2file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let map = sample_map(5);
        write_summary(dir.path(), &sample_summary(), &map).unwrap();

        let back = read_rank2file(dir.path()).unwrap();
        assert_eq!(back.get_int(KEY_RANKS), Some(5));
        for r in 0..5 {
            let key = r.to_string();
            let entry = back.get_at([KEY_RANK, key.as_str()]).unwrap();
            assert_eq!(entry.get_int(KEY_FILES), Some(1));
        }
        assert!(map_is_complete(&back));
    }

    #[test]
    fn single_rank_lookup_walks_shards() {
        let dir = tempfile::tempdir().unwrap();
        write_summary(dir.path(), &sample_summary(), &sample_map(6)).unwrap();

        let entry = read_rank(dir.path(), 3).unwrap().unwrap();
        assert!(entry.get_at([KEY_FILE, "ckpt.3.dat"]).is_some());
        assert_eq!(read_rank(dir.path(), 17).unwrap(), None);
    }

    #[test]
    fn missing_rank_breaks_completeness() {
        let mut map = sample_map(4);
        map.get_mut(KEY_RANK).unwrap().unset("2");
        assert!(!map_is_complete(&map));
    }

    #[test]
    fn file_count_mismatch_breaks_completeness() {
        let mut map = sample_map(3);
        map.get_mut(KEY_RANK)
            .unwrap()
            .get_mut("1")
            .unwrap()
            .set_int(KEY_FILES, 2);
        assert!(!map_is_complete(&map));
    }

    #[test]
    fn incomplete_file_breaks_completeness() {
        let mut map = sample_map(2);
        map.get_mut(KEY_RANK)
            .unwrap()
            .get_mut("0")
            .unwrap()
            .get_mut(KEY_FILE)
            .unwrap()
            .get_mut("ckpt.0.dat")
            .unwrap()
            .set_int(KEY_COMPLETE, 0);
        assert!(!map_is_complete(&map));
    }

    #[test]
    fn build_then_scan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let map = sample_map(3);
        write_summary(dir.path(), &sample_summary(), &map).unwrap();

        let first = read_rank2file(dir.path()).unwrap();
        write_summary(dir.path(), &sample_summary(), &first).unwrap();
        let second = read_rank2file(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_summary(dir.path(), &sample_summary(), &sample_map(1)).unwrap();

        let path = dir.path().join(".scr/summary.scr");
        let mut tree = KvTree::new();
        tree.read_file(&path).unwrap();
        tree.set_int(KEY_VERSION, 5);
        tree.write_file(&path).unwrap();

        assert!(matches!(
            read_summary(dir.path()),
            Err(SummaryError::Version { found: 5, .. })
        ));
    }
}
