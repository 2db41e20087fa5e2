use std::path::Path;

use kvtree::{KvTree, KvTreeError};
use metadata::{Dataset, Meta};

use crate::error::{FileMapError, FileMapResult};

const KEY_RANK: &str = "RANK";
const KEY_DSET: &str = "DSET";
const KEY_FILES: &str = "FILES";
const KEY_FILE: &str = "FILE";
const KEY_REDDESC: &str = "REDDESC";
const KEY_FLUSH: &str = "FLUSH";
const KEY_DSETDESC: &str = "DSETDESC";
const KEY_META: &str = "META";

/// Scavenge descriptor key: hostname of the partner node.
pub const SCAVENGE_KEY_PARTNER: &str = "PARTNER";
/// Scavenge descriptor key: preserve user directory layout on flush.
pub const SCAVENGE_KEY_PRESERVE: &str = "PRESERVE";
/// Scavenge descriptor key: files live in containers.
pub const SCAVENGE_KEY_CONTAINER: &str = "CONTAINER";

/// The per-rank manifest of dataset files.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileMap {
    tree: KvTree,
}

impl FileMap {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows the underlying tree.
    #[must_use]
    pub fn tree(&self) -> &KvTree {
        &self.tree
    }

    fn rank_dset(&self, dset: i64, rank: i64) -> Option<&KvTree> {
        self.tree
            .get_kv_int(KEY_RANK, rank)?
            .get_kv_int(KEY_DSET, dset)
    }

    fn rank_dset_mut(&mut self, dset: i64, rank: i64) -> Option<&mut KvTree> {
        self.tree
            .get_kv_mut(KEY_RANK, &rank.to_string())?
            .get_kv_mut(KEY_DSET, &dset.to_string())
    }

    /// Creates (idempotently) the `(rank, dataset)` bucket in both indices
    /// and returns the rank-major node.
    fn ensure_rank_dset(&mut self, dset: i64, rank: i64) -> &mut KvTree {
        self.tree
            .set_kv_int(KEY_DSET, dset)
            .set_kv_int(KEY_RANK, rank);
        self.tree
            .set_kv_int(KEY_RANK, rank)
            .set_kv_int(KEY_DSET, dset)
    }

    /// Drops the `(rank, dataset)` stubs from both indices when the bucket
    /// has nothing left, and the rank/dataset nodes when they empty out.
    fn unset_if_empty(&mut self, dset: i64, rank: i64) {
        let empty = self.rank_dset(dset, rank).is_some_and(KvTree::is_empty);
        if empty {
            if let Some(r) = self.tree.get_kv_mut(KEY_RANK, &rank.to_string()) {
                r.unset_kv_int(KEY_DSET, dset);
            }
            if let Some(d) = self.tree.get_kv_mut(KEY_DSET, &dset.to_string()) {
                d.unset_kv_int(KEY_RANK, rank);
            }
        }
        let rank_empty = self
            .tree
            .get_kv_int(KEY_RANK, rank)
            .is_some_and(KvTree::is_empty);
        if rank_empty {
            self.tree.unset_kv_int(KEY_RANK, rank);
        }
        let dset_empty = self
            .tree
            .get_kv_int(KEY_DSET, dset)
            .is_some_and(KvTree::is_empty);
        if dset_empty {
            self.tree.unset_kv_int(KEY_DSET, dset);
        }
    }

    /// Associates `file` with the given dataset and rank. Idempotent.
    pub fn add_file(&mut self, dset: i64, rank: i64, file: &str) {
        self.ensure_rank_dset(dset, rank).set_kv(KEY_FILE, file);
    }

    /// Removes `file`; drops the bucket from both indices if it empties.
    pub fn remove_file(&mut self, dset: i64, rank: i64, file: &str) {
        if let Some(rd) = self.rank_dset_mut(dset, rank) {
            rd.unset_kv(KEY_FILE, file);
        }
        self.unset_if_empty(dset, rank);
    }

    /// Stores a deep copy of `meta` for an already-added file.
    ///
    /// Returns false when the file is not in the map.
    pub fn set_meta(&mut self, dset: i64, rank: i64, file: &str, meta: &Meta) -> bool {
        let Some(rd) = self.rank_dset_mut(dset, rank) else {
            return false;
        };
        let Some(node) = rd.get_kv_mut(KEY_FILE, file) else {
            return false;
        };
        node.unset(KEY_META);
        let mut copy = KvTree::new();
        copy.merge(meta.tree());
        node.set(KEY_META, copy);
        true
    }

    /// Copy of the meta record for `file`, if recorded.
    #[must_use]
    pub fn get_meta(&self, dset: i64, rank: i64, file: &str) -> Option<Meta> {
        let node = self.rank_dset(dset, rank)?.get_kv(KEY_FILE, file)?;
        let meta = node.get(KEY_META)?;
        let mut copy = KvTree::new();
        copy.merge(meta);
        Some(Meta::from_tree(copy))
    }

    /// Removes the meta record for `file`.
    pub fn unset_meta(&mut self, dset: i64, rank: i64, file: &str) {
        if let Some(rd) = self.rank_dset_mut(dset, rank) {
            if let Some(node) = rd.get_kv_mut(KEY_FILE, file) {
                node.unset(KEY_META);
            }
        }
    }

    fn set_subtree(&mut self, dset: i64, rank: i64, key: &str, value: &KvTree) {
        let rd = self.ensure_rank_dset(dset, rank);
        rd.unset(key);
        let mut copy = KvTree::new();
        copy.merge(value);
        rd.set(key, copy);
    }

    fn get_subtree(&self, dset: i64, rank: i64, key: &str) -> Option<KvTree> {
        let node = self.rank_dset(dset, rank)?.get(key)?;
        let mut copy = KvTree::new();
        copy.merge(node);
        Some(copy)
    }

    fn unset_subtree(&mut self, dset: i64, rank: i64, key: &str) {
        if let Some(rd) = self.rank_dset_mut(dset, rank) {
            rd.unset(key);
        }
        self.unset_if_empty(dset, rank);
    }

    /// Stores a deep copy of the redundancy descriptor.
    pub fn set_desc(&mut self, dset: i64, rank: i64, desc: &KvTree) {
        self.set_subtree(dset, rank, KEY_REDDESC, desc);
    }

    /// Copy of the redundancy descriptor, if recorded.
    #[must_use]
    pub fn get_desc(&self, dset: i64, rank: i64) -> Option<KvTree> {
        self.get_subtree(dset, rank, KEY_REDDESC)
    }

    /// Removes the redundancy descriptor.
    pub fn unset_desc(&mut self, dset: i64, rank: i64) {
        self.unset_subtree(dset, rank, KEY_REDDESC);
    }

    /// Stores a deep copy of the scavenge descriptor.
    pub fn set_flushdesc(&mut self, dset: i64, rank: i64, desc: &KvTree) {
        self.set_subtree(dset, rank, KEY_FLUSH, desc);
    }

    /// Copy of the scavenge descriptor, if recorded.
    #[must_use]
    pub fn get_flushdesc(&self, dset: i64, rank: i64) -> Option<KvTree> {
        self.get_subtree(dset, rank, KEY_FLUSH)
    }

    /// Removes the scavenge descriptor.
    pub fn unset_flushdesc(&mut self, dset: i64, rank: i64) {
        self.unset_subtree(dset, rank, KEY_FLUSH);
    }

    /// Stores a deep copy of the dataset descriptor.
    pub fn set_dataset(&mut self, dset: i64, rank: i64, dataset: &Dataset) {
        self.set_subtree(dset, rank, KEY_DSETDESC, dataset.tree());
    }

    /// Copy of the dataset descriptor, if recorded.
    #[must_use]
    pub fn get_dataset(&self, dset: i64, rank: i64) -> Option<Dataset> {
        self.get_subtree(dset, rank, KEY_DSETDESC).map(Dataset::from_tree)
    }

    /// Removes the dataset descriptor.
    pub fn unset_dataset(&mut self, dset: i64, rank: i64) {
        self.unset_subtree(dset, rank, KEY_DSETDESC);
    }

    /// Sets the number of files this rank promises for the dataset.
    pub fn set_expected_files(&mut self, dset: i64, rank: i64, expect: i64) {
        self.ensure_rank_dset(dset, rank).set_int(KEY_FILES, expect);
    }

    /// Promised file count, if recorded.
    #[must_use]
    pub fn get_expected_files(&self, dset: i64, rank: i64) -> Option<i64> {
        self.rank_dset(dset, rank)?.get_int(KEY_FILES)
    }

    /// Removes the promised file count.
    pub fn unset_expected_files(&mut self, dset: i64, rank: i64) {
        if let Some(rd) = self.rank_dset_mut(dset, rank) {
            rd.unset(KEY_FILES);
        }
        self.unset_if_empty(dset, rank);
    }

    /// Removes everything recorded for `rank` under `dset` from both
    /// indices.
    pub fn remove_rank_by_dataset(&mut self, dset: i64, rank: i64) {
        if let Some(r) = self.tree.get_kv_mut(KEY_RANK, &rank.to_string()) {
            r.unset_kv_int(KEY_DSET, dset);
        }
        let rank_empty = self
            .tree
            .get_kv_int(KEY_RANK, rank)
            .is_some_and(KvTree::is_empty);
        if rank_empty {
            self.tree.unset_kv_int(KEY_RANK, rank);
        }

        if let Some(d) = self.tree.get_kv_mut(KEY_DSET, &dset.to_string()) {
            d.unset_kv_int(KEY_RANK, rank);
        }
        let dset_empty = self
            .tree
            .get_kv_int(KEY_DSET, dset)
            .is_some_and(KvTree::is_empty);
        if dset_empty {
            self.tree.unset_kv_int(KEY_DSET, dset);
        }
    }

    /// Removes everything recorded for `rank`.
    pub fn remove_rank(&mut self, rank: i64) {
        for dset in self.list_datasets_by_rank(rank) {
            self.remove_rank_by_dataset(dset, rank);
        }
    }

    /// Removes everything recorded for `dset`.
    pub fn remove_dataset(&mut self, dset: i64) {
        for rank in self.list_ranks_by_dataset(dset) {
            self.remove_rank_by_dataset(dset, rank);
        }
    }

    /// Empties the whole manifest.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// True when the manifest records anything for `rank`.
    #[must_use]
    pub fn have_rank(&self, rank: i64) -> bool {
        self.tree.get_kv_int(KEY_RANK, rank).is_some()
    }

    /// True when the manifest records `rank` under `dset`.
    #[must_use]
    pub fn have_rank_by_dataset(&self, dset: i64, rank: i64) -> bool {
        self.rank_dset(dset, rank).is_some()
    }

    fn int_keys(node: Option<&KvTree>) -> Vec<i64> {
        node.map(|n| n.keys().filter_map(|k| k.parse().ok()).collect())
            .unwrap_or_default()
    }

    /// Ranks present in the manifest; order unspecified.
    #[must_use]
    pub fn list_ranks(&self) -> Vec<i64> {
        Self::int_keys(self.tree.get(KEY_RANK))
    }

    /// Datasets present in the manifest; order unspecified.
    #[must_use]
    pub fn list_datasets(&self) -> Vec<i64> {
        Self::int_keys(self.tree.get(KEY_DSET))
    }

    /// Ranks recorded under `dset`; order unspecified.
    #[must_use]
    pub fn list_ranks_by_dataset(&self, dset: i64) -> Vec<i64> {
        Self::int_keys(
            self.tree
                .get_kv_int(KEY_DSET, dset)
                .and_then(|d| d.get(KEY_RANK)),
        )
    }

    /// Datasets recorded under `rank`; order unspecified.
    #[must_use]
    pub fn list_datasets_by_rank(&self, rank: i64) -> Vec<i64> {
        Self::int_keys(
            self.tree
                .get_kv_int(KEY_RANK, rank)
                .and_then(|r| r.get(KEY_DSET)),
        )
    }

    /// File names recorded for `(dset, rank)`; order unspecified.
    #[must_use]
    pub fn list_files(&self, dset: i64, rank: i64) -> Vec<String> {
        self.rank_dset(dset, rank)
            .and_then(|rd| rd.get(KEY_FILE))
            .map(|fh| fh.keys().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Number of ranks in the manifest.
    #[must_use]
    pub fn num_ranks(&self) -> usize {
        self.tree.get(KEY_RANK).map_or(0, KvTree::len)
    }

    /// Number of ranks recorded under `dset`.
    #[must_use]
    pub fn num_ranks_by_dataset(&self, dset: i64) -> usize {
        self.tree
            .get_kv_int(KEY_DSET, dset)
            .and_then(|d| d.get(KEY_RANK))
            .map_or(0, KvTree::len)
    }

    /// Number of datasets in the manifest.
    #[must_use]
    pub fn num_datasets(&self) -> usize {
        self.tree.get(KEY_DSET).map_or(0, KvTree::len)
    }

    /// Number of files recorded for `(dset, rank)`.
    #[must_use]
    pub fn num_files(&self, dset: i64, rank: i64) -> usize {
        self.rank_dset(dset, rank)
            .and_then(|rd| rd.get(KEY_FILE))
            .map_or(0, KvTree::len)
    }

    /// Largest dataset id in the manifest.
    #[must_use]
    pub fn latest_dataset(&self) -> Option<i64> {
        self.list_datasets().into_iter().max()
    }

    /// Smallest dataset id strictly greater than `younger_than`.
    #[must_use]
    pub fn oldest_dataset(&self, younger_than: i64) -> Option<i64> {
        self.list_datasets()
            .into_iter()
            .filter(|&d| d > younger_than)
            .min()
    }

    /// Merges `other` into this manifest with deep-union semantics.
    ///
    /// `FILES` counts follow last-writer-wins at the sub-key; consumers that
    /// care about completeness recompute the count from the file list.
    pub fn merge(&mut self, other: &FileMap) {
        self.tree.merge(&other.tree);
    }

    /// Moves everything recorded for `rank` into a fresh manifest that
    /// upholds the same index invariants, removing it from this one.
    #[must_use]
    pub fn extract_rank(&mut self, rank: i64) -> FileMap {
        let mut extracted = FileMap::new();
        if let Some(r) = self.tree.get_kv_int(KEY_RANK, rank) {
            let mut rank_copy = KvTree::new();
            rank_copy.merge(r);
            let datasets = Self::int_keys(rank_copy.get(KEY_DSET));
            extracted
                .tree
                .set_kv_int(KEY_RANK, rank)
                .merge(&rank_copy);
            for dset in datasets {
                extracted
                    .tree
                    .set_kv_int(KEY_DSET, dset)
                    .set_kv_int(KEY_RANK, rank);
            }
        }
        self.remove_rank(rank);
        extracted
    }

    /// Checks one file against its meta record and the bytes on disk.
    ///
    /// The file name is interpreted relative to `base` unless absolute.
    #[must_use]
    pub fn have_file(&self, base: &Path, dset: i64, rank: i64, file: &str) -> bool {
        if file.is_empty() {
            return false;
        }
        let full = if Path::new(file).is_absolute() {
            Path::new(file).to_path_buf()
        } else {
            base.join(file)
        };
        if !fileio::is_readable(&full) {
            return false;
        }
        let Some(meta) = self.get_meta(dset, rank, file) else {
            return false;
        };
        if !meta.is_complete() {
            return false;
        }
        meta.check_filesize(fileio::file_size(&full))
    }

    /// True when the rank's promised file count matches the recorded list
    /// and every file passes the complete-on-disk check.
    #[must_use]
    pub fn have_files(&self, base: &Path, dset: i64, rank: i64) -> bool {
        let Some(expected) = self.get_expected_files(dset, rank) else {
            return false;
        };
        let files = self.list_files(dset, rank);
        if files.len() as i64 != expected {
            return false;
        }
        files.iter().all(|f| self.have_file(base, dset, rank, f))
    }

    /// Reads a manifest from `path`, merging into this one.
    pub fn read(&mut self, path: &Path) -> FileMapResult<()> {
        match self.tree.read_file(path) {
            Ok(()) => Ok(()),
            Err(KvTreeError::Unreadable { path }) => Err(FileMapError::Unreadable { path }),
            Err(err @ KvTreeError::Format { .. }) => Err(FileMapError::Parse(err)),
            Err(KvTreeError::Io(err)) => Err(FileMapError::Io(err)),
        }
    }

    /// Writes this manifest to `path`.
    pub fn write(&self, path: &Path) -> FileMapResult<()> {
        match self.tree.write_file(path) {
            Ok(()) => Ok(()),
            Err(KvTreeError::Io(err)) => Err(FileMapError::Io(err)),
            Err(err) => Err(FileMapError::Parse(err)),
        }
    }
}

impl From<KvTree> for FileMap {
    fn from(tree: KvTree) -> Self {
        Self { tree }
    }
}
