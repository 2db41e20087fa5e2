use std::collections::BTreeMap;
use std::path::Path;

use filemap::{FileMap, FileMapError};
use kvtree::KvTree;
use metadata::{Dataset, FileKind};
use redundancy::parse_xor_file_name;
use summary::{KEY_CRC, KEY_FILE, KEY_FILES, KEY_NOFETCH, KEY_RANK, KEY_RANKS, KEY_SIZE};

use crate::{ScanError, ScanResult};

/// One surviving XOR fragment, recorded by its one-based member slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetMember {
    /// Fragment path relative to the dataset directory.
    pub file: String,
    /// Rank that owned the fragment.
    pub rank: i64,
}

/// Everything the scan learned about one dataset id.
#[derive(Clone, Debug, Default)]
pub struct ScannedDataset {
    /// Dataset descriptor from the first shard that carried one.
    pub dataset: Option<Dataset>,
    /// Job size, when consistent across all admitted files.
    pub ranks: Option<i64>,
    /// True when shards disagreed about the job size.
    pub ranks_conflict: bool,
    /// Accumulated rank-to-file map in summary layout.
    pub rank2file: KvTree,
    /// XOR fragments seen, keyed by set id then one-based member slot.
    pub xor_sets: BTreeMap<i64, (usize, BTreeMap<usize, SetMember>)>,
}

/// Result of scanning a dataset directory.
#[derive(Clone, Debug, Default)]
pub struct Scan {
    /// Datasets found, keyed by id.
    pub datasets: BTreeMap<i64, ScannedDataset>,
}

/// Reads every `.scr/<rank>.scrfilemap` shard under `dataset_dir` and
/// collates the files that pass the complete-on-disk checks.
///
/// A shard that exists but cannot be read is treated as absent; a shard
/// that parses incorrectly is an error. Files failing a check are simply
/// left out, which the inspect pass then reports as missing.
pub fn scan_files(dataset_dir: &Path) -> ScanResult<Scan> {
    let meta_dir = dataset_dir.join(".scr");
    let mut scan = Scan::default();

    let entries = match std::fs::read_dir(&meta_dir) {
        Ok(entries) => entries,
        Err(err) => {
            return Err(ScanError::Io(fileio::FileIoError::File {
                path: meta_dir,
                source: err,
            }));
        }
    };

    for entry in entries {
        let entry = entry.map_err(|err| {
            ScanError::Io(fileio::FileIoError::File {
                path: meta_dir.clone(),
                source: err,
            })
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.ends_with(".scrfilemap") {
            continue;
        }

        let mut map = FileMap::new();
        match map.read(&entry.path()) {
            Ok(()) => {}
            Err(FileMapError::Unreadable { path }) => {
                tracing::debug!(path = %path.display(), "skipping unreadable file map shard");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
        scan_one_map(dataset_dir, &map, &mut scan);
    }
    Ok(scan)
}

fn scan_one_map(dataset_dir: &Path, map: &FileMap, scan: &mut Scan) {
    for dataset_id in map.list_datasets() {
        let entry = scan.datasets.entry(dataset_id).or_default();

        for rank in map.list_ranks_by_dataset(dataset_id) {
            if entry.dataset.is_none() {
                entry.dataset = map.get_dataset(dataset_id, rank);
            }

            // promise the expected count even when files fail their checks
            if let Some(expected) = map.get_expected_files(dataset_id, rank) {
                entry
                    .rank2file
                    .entry(KEY_RANK)
                    .entry(rank.to_string())
                    .set_int(KEY_FILES, expected);
            }

            for file in map.list_files(dataset_id, rank) {
                let Some(meta) = map.get_meta(dataset_id, rank, &file) else {
                    tracing::warn!(%file, rank, "file has no meta record");
                    continue;
                };
                let Some(meta_ranks) = meta.ranks() else {
                    tracing::warn!(%file, rank, "file meta carries no rank count");
                    continue;
                };
                match entry.ranks {
                    None => entry.ranks = Some(meta_ranks),
                    Some(seen) if seen != meta_ranks => {
                        tracing::warn!(
                            %file,
                            seen,
                            conflicting = meta_ranks,
                            "file maps disagree about the job size"
                        );
                        entry.ranks_conflict = true;
                    }
                    Some(_) => {}
                }

                if !map.have_file(dataset_dir, dataset_id, rank, &file) {
                    tracing::warn!(%file, rank, "file failed its on-disk check");
                    continue;
                }

                let file_node = entry
                    .rank2file
                    .entry(KEY_RANK)
                    .entry(rank.to_string())
                    .entry(KEY_FILE)
                    .entry(file.clone());
                if let Some(size) = meta.filesize() {
                    file_node.set_bytecount(KEY_SIZE, size);
                }
                if let Some(crc) = meta.crc32() {
                    file_node.set_crc32(KEY_CRC, crc);
                }

                if meta.check_kind(FileKind::Xor) {
                    file_node.entry(KEY_NOFETCH);
                    let base = Path::new(&file)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or(&file);
                    if let Some((member_index, set_size, set_id)) = parse_xor_file_name(base) {
                        let set = entry
                            .xor_sets
                            .entry(set_id)
                            .or_insert_with(|| (set_size, BTreeMap::new()));
                        set.0 = set_size;
                        set.1.insert(
                            member_index + 1,
                            SetMember {
                                file: file.clone(),
                                rank,
                            },
                        );
                    } else {
                        tracing::warn!(%file, "XOR fragment name does not match the pattern");
                    }
                }
            }
        }

        if let Some(ranks) = entry.ranks {
            entry.rank2file.set_int(KEY_RANKS, ranks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::Meta;

    fn write_shard(dir: &Path, rank: i64, files: &[(&str, &[u8], FileKind)]) {
        let scr = dir.join(".scr");
        std::fs::create_dir_all(&scr).unwrap();

        let mut dataset = Dataset::new();
        dataset.set_id(3);
        let mut map = FileMap::new();
        map.set_dataset(3, rank, &dataset);
        for (name, data, kind) in files {
            std::fs::write(dir.join(name), data).unwrap();
            let mut meta = Meta::new();
            meta.set_orig_name(name);
            meta.set_filesize(data.len() as u64);
            meta.set_kind(*kind);
            meta.set_ranks(2);
            meta.set_complete(true);
            map.add_file(3, rank, name);
            map.set_meta(3, rank, name, &meta);
        }
        map.set_expected_files(3, rank, files.len() as i64);
        map.write(&scr.join(format!("{rank}.scrfilemap"))).unwrap();
    }

    #[test]
    fn scan_admits_healthy_files() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), 0, &[("a.dat", b"aaaa", FileKind::User)]);
        write_shard(dir.path(), 1, &[("b.dat", b"bb", FileKind::User)]);

        let scan = scan_files(dir.path()).unwrap();
        let entry = &scan.datasets[&3];
        assert_eq!(entry.ranks, Some(2));
        assert!(!entry.ranks_conflict);
        assert!(
            entry
                .rank2file
                .get_at([KEY_RANK, "0", KEY_FILE, "a.dat"])
                .is_some()
        );
    }

    #[test]
    fn size_mismatch_drops_the_file_but_keeps_the_promise() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), 0, &[("a.dat", b"aaaa", FileKind::User)]);
        std::fs::write(dir.path().join("a.dat"), b"truncated!").unwrap();

        let scan = scan_files(dir.path()).unwrap();
        let entry = &scan.datasets[&3];
        let rank = entry.rank2file.get_at([KEY_RANK, "0"]).unwrap();
        assert_eq!(rank.get_int(KEY_FILES), Some(1));
        assert!(rank.get(KEY_FILE).is_none());
    }

    #[test]
    fn xor_fragments_register_set_membership() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(
            dir.path(),
            0,
            &[
                ("a.dat", b"aaaa", FileKind::User),
                ("1_of_2_in_7.xor", b"parity", FileKind::Xor),
            ],
        );

        let scan = scan_files(dir.path()).unwrap();
        let entry = &scan.datasets[&3];
        let (size, members) = &entry.xor_sets[&7];
        assert_eq!(*size, 2);
        assert_eq!(members[&1].rank, 0);
        assert!(
            entry
                .rank2file
                .get_at([KEY_RANK, "0", KEY_FILE, "1_of_2_in_7.xor", KEY_NOFETCH])
                .is_some()
        );
    }
}
