#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `cacheindex` maintains `index.scr` in the prefix directory: the record
//! of every dataset that was ever flushed there, which directory holds it,
//! whether it was complete, when it was flushed, whether a restart fetch
//! has failed from it, and which directory the next restart should prefer.
//!
//! Rank 0 is the sole writer. Updates go through
//! [`Index::load_locked`]/[`Index::store_unlock`], which hold an exclusive
//! advisory lock across the whole read-modify-write so concurrent jobs
//! sharing a prefix directory serialize.
//!
//! ```text
//! CURRENT
//!   <dirname>
//! DSET
//!   <id>
//!     DIR
//!       <dirname>
//!         COMPLETE <0|1>
//!         FLUSHED <timestamp>
//!         FAILED <timestamp>
//!         FETCHED
//!           <timestamp>
//!         DSETDESC { ... }
//! ```
//!
//! A directory is a valid restart candidate iff `COMPLETE=1` and no
//! `FAILED` mark exists.

use std::path::{Path, PathBuf};

use fileio::LockedFile;
use kvtree::{KvTree, KvTreeError, SortMode};
use metadata::Dataset;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

const KEY_CURRENT: &str = "CURRENT";
const KEY_DSET: &str = "DSET";
const KEY_DIR: &str = "DIR";
const KEY_COMPLETE: &str = "COMPLETE";
const KEY_FLUSHED: &str = "FLUSHED";
const KEY_FAILED: &str = "FAILED";
const KEY_FETCHED: &str = "FETCHED";
const KEY_DSETDESC: &str = "DSETDESC";

/// File name of the index within the prefix directory.
pub const INDEX_FILE: &str = "index.scr";

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors raised by index persistence.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying tree I/O failed.
    #[error(transparent)]
    Tree(#[from] KvTreeError),

    /// Underlying file I/O failed.
    #[error(transparent)]
    Io(#[from] fileio::FileIoError),

    /// The named directory is not in the index.
    #[error("directory {dir} is not indexed")]
    UnknownDir {
        /// Directory name that was looked up.
        dir: String,
    },
}

/// One row of [`Index::list`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    /// Dataset id.
    pub id: i64,
    /// Dataset directory name, relative to the prefix directory.
    pub dir: String,
    /// Whether the dataset was complete when indexed.
    pub complete: bool,
    /// Flush timestamp, when flushed.
    pub flushed: Option<String>,
    /// Failure timestamp, when a fetch from this directory failed.
    pub failed: Option<String>,
    /// Whether this directory is the current restart selection.
    pub current: bool,
}

impl IndexEntry {
    /// A directory is a valid restart source iff complete and never failed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.complete && self.failed.is_none()
    }
}

/// In-memory copy of `index.scr`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Index {
    tree: KvTree,
}

fn timestamp() -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "unknown".to_owned())
}

impl Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the index file under `prefix`.
    #[must_use]
    pub fn path(prefix: &Path) -> PathBuf {
        prefix.join(INDEX_FILE)
    }

    /// Reads the index from the prefix directory; an absent file yields an
    /// empty index.
    pub fn read(prefix: &Path) -> IndexResult<Self> {
        let mut tree = KvTree::new();
        match tree.read_file(&Self::path(prefix)) {
            Ok(()) | Err(KvTreeError::Unreadable { .. }) => Ok(Self { tree }),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes the index to the prefix directory without locking; callers
    /// that may race must use [`Index::load_locked`].
    pub fn write(&self, prefix: &Path) -> IndexResult<()> {
        self.tree.write_file(&Self::path(prefix))?;
        Ok(())
    }

    /// Opens the index under an exclusive lock for a read-modify-write
    /// cycle; finish with [`Index::store_unlock`].
    pub fn load_locked(prefix: &Path) -> IndexResult<(LockedFile, Self)> {
        let (lock, tree) = KvTree::lock_open_read(&Self::path(prefix))?;
        Ok((lock, Self { tree }))
    }

    /// Writes the index back through the held lock and releases it.
    pub fn store_unlock(&self, lock: LockedFile) -> IndexResult<()> {
        self.tree.write_unlock(lock)?;
        Ok(())
    }

    fn dir_node(&self, id: i64, dir: &str) -> Option<&KvTree> {
        self.tree
            .get_kv_int(KEY_DSET, id)?
            .get_kv(KEY_DIR, dir)
    }

    fn dir_node_mut(&mut self, id: i64, dir: &str) -> Option<&mut KvTree> {
        self.tree
            .get_kv_mut(KEY_DSET, &id.to_string())?
            .get_mut(KEY_DIR)?
            .get_mut(dir)
    }

    /// Records a dataset directory with its descriptor and completion flag.
    pub fn add(&mut self, dir: &str, dataset: &Dataset, complete: bool) {
        let id = dataset.id().unwrap_or(-1);
        let node = self
            .tree
            .set_kv_int(KEY_DSET, id)
            .set_kv(KEY_DIR, dir);
        node.set_int(KEY_COMPLETE, i64::from(complete));
        node.unset(KEY_DSETDESC);
        let mut desc = KvTree::new();
        desc.merge(dataset.tree());
        node.set(KEY_DSETDESC, desc);
    }

    /// Stamps the flush time for a directory.
    pub fn mark_flushed(&mut self, id: i64, dir: &str) -> IndexResult<()> {
        let ts = timestamp();
        let node = self.dir_node_mut(id, dir).ok_or(IndexError::UnknownDir {
            dir: dir.to_owned(),
        })?;
        node.set_str(KEY_FLUSHED, ts);
        Ok(())
    }

    /// Stamps a fetch failure for a directory, excluding it from restart
    /// candidates.
    pub fn mark_failed(&mut self, id: i64, dir: &str) -> IndexResult<()> {
        let ts = timestamp();
        let node = self.dir_node_mut(id, dir).ok_or(IndexError::UnknownDir {
            dir: dir.to_owned(),
        })?;
        node.set_str(KEY_FAILED, ts);
        Ok(())
    }

    /// Records a fetch from a directory at the given timestamp.
    pub fn record_fetched(&mut self, id: i64, dir: &str, ts: &str) -> IndexResult<()> {
        let node = self.dir_node_mut(id, dir).ok_or(IndexError::UnknownDir {
            dir: dir.to_owned(),
        })?;
        node.set_kv(KEY_FETCHED, ts);
        Ok(())
    }

    /// Removes a directory from the index (files are untouched); clears the
    /// current selection if it pointed there.
    pub fn remove_dir(&mut self, dir: &str) -> IndexResult<()> {
        let id = self.get_id_by_dir(dir).ok_or(IndexError::UnknownDir {
            dir: dir.to_owned(),
        })?;
        if let Some(dset) = self.tree.get_kv_mut(KEY_DSET, &id.to_string()) {
            dset.unset_kv(KEY_DIR, dir);
            if dset.is_empty() {
                self.tree.unset_kv_int(KEY_DSET, id);
            }
        }
        if self.current() == Some(dir) {
            self.tree.unset(KEY_CURRENT);
        }
        Ok(())
    }

    /// Selects the directory the next restart should prefer.
    pub fn set_current(&mut self, dir: &str) -> IndexResult<()> {
        if self.get_id_by_dir(dir).is_none() {
            return Err(IndexError::UnknownDir {
                dir: dir.to_owned(),
            });
        }
        self.tree.set_str(KEY_CURRENT, dir);
        Ok(())
    }

    /// The current restart selection, if any.
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.tree.get_str(KEY_CURRENT)
    }

    /// Finds the dataset id recorded for a directory name.
    #[must_use]
    pub fn get_id_by_dir(&self, dir: &str) -> Option<i64> {
        let dsets = self.tree.get(KEY_DSET)?;
        for (id, node) in dsets.iter() {
            if node.get_kv(KEY_DIR, dir).is_some() {
                return id.parse().ok();
            }
        }
        None
    }

    /// Completion flag for a directory, when indexed.
    #[must_use]
    pub fn get_complete(&self, id: i64, dir: &str) -> Option<bool> {
        Some(self.dir_node(id, dir)?.get_int(KEY_COMPLETE)? == 1)
    }

    /// True when a fetch from this directory has failed before.
    #[must_use]
    pub fn is_failed(&self, id: i64, dir: &str) -> bool {
        self.dir_node(id, dir)
            .is_some_and(|n| n.get_str(KEY_FAILED).is_some())
    }

    /// All entries, newest dataset first.
    #[must_use]
    pub fn list(&self) -> Vec<IndexEntry> {
        let mut dsets = KvTree::new();
        if let Some(source) = self.tree.get(KEY_DSET) {
            dsets.merge(source);
        }
        dsets.sort(SortMode::DescendingInt);

        let current = self.current().map(str::to_owned);
        let mut entries = Vec::new();
        for (id_key, node) in dsets.iter() {
            let Ok(id) = id_key.parse::<i64>() else {
                continue;
            };
            let mut dirs = KvTree::new();
            if let Some(source) = node.get(KEY_DIR) {
                dirs.merge(source);
            }
            dirs.sort(SortMode::DescendingStr);
            for (dir, info) in dirs.iter() {
                entries.push(IndexEntry {
                    id,
                    dir: dir.to_owned(),
                    complete: info.get_int(KEY_COMPLETE) == Some(1),
                    flushed: info.get_str(KEY_FLUSHED).map(str::to_owned),
                    failed: info.get_str(KEY_FAILED).map(str::to_owned),
                    current: current.as_deref() == Some(dir),
                });
            }
        }
        entries
    }

    /// Picks the directory a restart should fetch from.
    ///
    /// The current selection wins when it is still valid; otherwise the
    /// newest complete, never-failed directory is chosen.
    #[must_use]
    pub fn restart_candidate(&self) -> Option<IndexEntry> {
        let entries = self.list();
        if let Some(current) = entries.iter().find(|e| e.current) {
            if current.is_valid() {
                return Some(current.clone());
            }
        }
        entries.into_iter().find(IndexEntry::is_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(id: i64) -> Dataset {
        let mut d = Dataset::new();
        d.set_id(id);
        d.set_name(&format!("ckpt.{id}"));
        d
    }

    fn dir_name(id: i64) -> String {
        format!("scr.dataset.{id}")
    }

    fn populated() -> Index {
        let mut index = Index::new();
        for id in [10, 12, 15] {
            let dir = dir_name(id);
            index.add(&dir, &dataset(id), true);
            index.mark_flushed(id, &dir).unwrap();
        }
        index
    }

    #[test]
    fn restart_prefers_newest_valid() {
        let mut index = populated();
        assert_eq!(index.restart_candidate().unwrap().id, 15);

        // 12 failed earlier, 15 fails now; 10 is next in line
        index.mark_failed(12, &dir_name(12)).unwrap();
        index.mark_failed(15, &dir_name(15)).unwrap();
        let candidate = index.restart_candidate().unwrap();
        assert_eq!(candidate.id, 10);
    }

    #[test]
    fn incomplete_dirs_are_not_candidates() {
        let mut index = Index::new();
        index.add("d1", &dataset(1), false);
        assert!(index.restart_candidate().is_none());
    }

    #[test]
    fn current_overrides_selection() {
        let mut index = populated();
        index.set_current(&dir_name(10)).unwrap();
        assert_eq!(index.restart_candidate().unwrap().id, 10);

        // a failed current falls back to the newest valid entry
        index.mark_failed(10, &dir_name(10)).unwrap();
        assert_eq!(index.restart_candidate().unwrap().id, 15);
    }

    #[test]
    fn remove_dir_clears_current() {
        let mut index = populated();
        index.set_current(&dir_name(12)).unwrap();
        index.remove_dir(&dir_name(12)).unwrap();
        assert_eq!(index.current(), None);
        assert_eq!(index.get_id_by_dir(&dir_name(12)), None);
        assert!(index.remove_dir("absent").is_err());
    }

    #[test]
    fn list_sorts_descending_and_marks_current() {
        let mut index = populated();
        index.set_current(&dir_name(12)).unwrap();
        let entries = index.list();
        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![15, 12, 10]);
        assert!(entries[1].current);
        assert!(entries.iter().all(|e| e.flushed.is_some()));
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let index = populated();
        index.write(dir.path()).unwrap();

        let back = Index::read(dir.path()).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn absent_index_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::read(dir.path()).unwrap();
        assert!(index.list().is_empty());
    }

    #[test]
    fn locked_update_cycle() {
        let dir = tempfile::tempdir().unwrap();
        populated().write(dir.path()).unwrap();

        let (lock, mut index) = Index::load_locked(dir.path()).unwrap();
        index.mark_failed(15, &dir_name(15)).unwrap();
        index.store_unlock(lock).unwrap();

        let back = Index::read(dir.path()).unwrap();
        assert!(back.is_failed(15, &dir_name(15)));
        assert_eq!(back.restart_candidate().unwrap().id, 12);
    }

    #[test]
    fn fetch_records_accumulate() {
        let mut index = populated();
        index
            .record_fetched(15, &dir_name(15), "2026-01-01T00:00:00")
            .unwrap();
        index
            .record_fetched(15, &dir_name(15), "2026-01-02T00:00:00")
            .unwrap();
        let node = index.dir_node(15, &dir_name(15)).unwrap();
        assert_eq!(node.get(KEY_FETCHED).unwrap().len(), 2);
    }
}
