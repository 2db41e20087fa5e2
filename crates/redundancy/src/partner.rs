//! Partner-copy redundancy: mirror a rank's files to the next member of
//! its set, and restore them from those mirrors.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use collective::ProcessGroup;
use fileio::{file_size, mkdir_p, open_retry, read_reliable, write_reliable};
use filemap::FileMap;
use kvtree::KvTree;
use metadata::{Dataset, Meta};
use pathseq::PathSeq;

use crate::error::{RedundancyError, RedundancyResult};
use crate::header::MemberFiles;
use crate::xor::XorSet;

const SUB_BLOCK: u64 = 128 * 1024;

/// Directory inside a dataset cache dir that holds copies of one source
/// rank's files.
#[must_use]
pub fn partner_dir_name(source_rank: i64) -> String {
    format!("partner.{source_rank}")
}

/// Everything partner encode needs besides the group handle.
#[derive(Debug)]
pub struct PartnerContext<'a> {
    /// This rank's redundancy set; the partner is the right neighbor.
    pub set: &'a XorSet,
    /// Dataset being protected.
    pub dataset: &'a Dataset,
    /// Cache directory holding this rank's dataset files.
    pub dataset_dir: &'a Path,
    /// This rank's files: path relative to the dataset directory plus meta.
    pub files: Vec<(PathBuf, Meta)>,
}

/// Mirrors this rank's files to its right neighbor and stores the left
/// neighbor's files locally under `partner.<rank>/`.
///
/// Alongside the copies, the receiving member writes the source rank's
/// file map shard into the partner directory so offline tooling can
/// restore files without the source node.
pub fn encode<G: ProcessGroup>(
    group: &G,
    ctx: &PartnerContext<'_>,
) -> RedundancyResult<MemberFiles> {
    let n = ctx.set.size();
    if n < 2 {
        return Err(RedundancyError::Geometry(
            "partner redundancy needs at least two members".to_owned(),
        ));
    }
    let right = ctx.set.right_rank();
    let left = ctx.set.left_rank();

    // announce the file list, then stream each file's bytes
    let current = MemberFiles {
        rank: group.rank() as i64,
        files: ctx.files.iter().map(|(_, m)| m.clone()).collect(),
    };
    group.send(right, &current.to_tree().pack_to_vec())?;
    for (rel, meta) in &ctx.files {
        let full = ctx.dataset_dir.join(rel);
        let mut file = open_retry(&full, OpenOptions::new().read(true))?;
        let mut remaining = meta.filesize().unwrap_or(0);
        while remaining > 0 {
            let count = SUB_BLOCK.min(remaining) as usize;
            let mut block = vec![0u8; count];
            let n_read = read_reliable(&full, &mut file, &mut block)?;
            if n_read != count {
                return Err(RedundancyError::Integrity {
                    path: full,
                    detail: "file shrank while mirroring to partner".to_owned(),
                });
            }
            group.send(right, &block)?;
            remaining -= count as u64;
        }
    }

    // receive the left neighbor's list and bytes
    let payload = group.recv(left)?;
    let (tree, _) = KvTree::unpack(&payload)?;
    let partner = MemberFiles::from_tree(&tree, ctx.dataset_dir)?;

    let partner_dir = ctx.dataset_dir.join(partner_dir_name(partner.rank));
    mkdir_p(&partner_dir)?;

    let mut map = FileMap::new();
    let dataset_id = ctx.dataset.id().unwrap_or(-1);
    map.set_dataset(dataset_id, partner.rank, ctx.dataset);
    for meta in &partner.files {
        let name = meta
            .orig_name()
            .or_else(|| meta.orig())
            .ok_or(RedundancyError::HeaderField {
                path: partner_dir.clone(),
                field: "NAME",
            })?
            .to_owned();
        let dst = partner_dir.join(&name);
        let mut out = open_retry(
            &dst,
            OpenOptions::new().write(true).create(true).truncate(true),
        )?;
        let mut remaining = meta.filesize().unwrap_or(0);
        while remaining > 0 {
            let count = SUB_BLOCK.min(remaining) as usize;
            let block = group.recv(left)?;
            if block.len() != count {
                return Err(RedundancyError::Integrity {
                    path: dst.clone(),
                    detail: format!("partner stream sent {} bytes, expected {count}", block.len()),
                });
            }
            write_reliable(&dst, &mut out, &block)?;
            remaining -= count as u64;
        }
        out.sync_all().map_err(|err| {
            RedundancyError::Io(fileio::FileIoError::File {
                path: dst.clone(),
                source: err,
            })
        })?;

        map.add_file(dataset_id, partner.rank, &name);
        map.set_meta(dataset_id, partner.rank, &name, meta);
    }
    map.set_expected_files(dataset_id, partner.rank, partner.files.len() as i64);
    map.write(&partner_dir.join(format!("{}.scrfilemap", partner.rank)))?;

    Ok(partner)
}

/// What a partner rebuild should restore.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartnerMode {
    /// Restore data files and their maps.
    Data,
    /// Restore only the rank-scoped file maps.
    Map,
}

/// Restores a lost rank from scavenged partner copies.
///
/// `partner_files` are the scavenged copies: one or more
/// `<rank>.scrfilemap` shards written by [`encode`], plus (in
/// [`PartnerMode::Data`]) the copied data files themselves. Restored maps
/// land at `.scr/<rank>.scrfilemap` under the dataset directory; restored
/// data files land where their meta records say they belong.
pub fn rebuild_partner(
    dataset_dir: &Path,
    mode: PartnerMode,
    partner_files: &[PathBuf],
) -> RedundancyResult<()> {
    let resolve = |p: &Path| -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            dataset_dir.join(p)
        }
    };

    let map_paths: Vec<&PathBuf> = partner_files
        .iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".scrfilemap"))
        })
        .collect();
    if map_paths.is_empty() {
        return Err(RedundancyError::Geometry(
            "no partner file map among the given files".to_owned(),
        ));
    }

    let scr_dir = dataset_dir.join(".scr");
    mkdir_p(&scr_dir)?;

    let dataset_seq = {
        let mut p = PathSeq::from(dataset_dir);
        p.reduce()
            .map_err(|e| RedundancyError::Geometry(e.to_string()))?;
        p
    };

    for map_path in map_paths {
        let full_map_path = resolve(map_path);
        let mut partner_map = FileMap::new();
        partner_map.read(&full_map_path)?;

        for dataset_id in partner_map.list_datasets() {
            for rank in partner_map.list_ranks_by_dataset(dataset_id) {
                let mut restored = FileMap::new();
                if let Some(dataset) = partner_map.get_dataset(dataset_id, rank) {
                    restored.set_dataset(dataset_id, rank, &dataset);
                }
                if let Some(desc) = partner_map.get_flushdesc(dataset_id, rank) {
                    restored.set_flushdesc(dataset_id, rank, &desc);
                }

                let files = partner_map.list_files(dataset_id, rank);
                for name in &files {
                    let Some(mut meta) = partner_map.get_meta(dataset_id, rank, name) else {
                        return Err(RedundancyError::Geometry(format!(
                            "partner map {} has no meta for {name}",
                            full_map_path.display()
                        )));
                    };

                    let mut dst_rel = name.clone();
                    if let PartnerMode::Data = mode {
                        // the copy sits next to the map in the partner dir
                        let src = full_map_path
                            .parent()
                            .map(|d| d.join(name))
                            .unwrap_or_else(|| PathBuf::from(name));
                        let dst = dataset_dir.join(name);
                        if let Some(parent) = dst.parent() {
                            mkdir_p(parent)?;
                        }
                        let crc = fileio::copy_file(&src, &dst, SUB_BLOCK as usize, true)?;

                        if !meta.check_filesize(file_size(&dst)) {
                            let _ = fileio::unlink(&dst);
                            return Err(RedundancyError::Integrity {
                                path: dst,
                                detail: "restored size does not match partner meta".to_owned(),
                            });
                        }
                        match (meta.crc32(), crc) {
                            (Some(expected), Some(actual)) if expected != actual => {
                                let _ = fileio::unlink(&dst);
                                return Err(RedundancyError::Integrity {
                                    path: dst,
                                    detail: format!(
                                        "restored crc {actual:#x} != recorded {expected:#x}"
                                    ),
                                });
                            }
                            (None, Some(actual)) => meta.set_crc32(actual),
                            _ => {}
                        }

                        let mut full = dataset_seq.clone();
                        full.append_str(name);
                        full.reduce()
                            .map_err(|e| RedundancyError::Geometry(e.to_string()))?;
                        dst_rel = PathSeq::relative(&dataset_seq, &full)
                            .map_or_else(|_| name.clone(), |p| p.to_string());
                    }

                    restored.add_file(dataset_id, rank, &dst_rel);
                    restored.set_meta(dataset_id, rank, &dst_rel, &meta);
                }
                restored.set_expected_files(dataset_id, rank, files.len() as i64);

                restored.write(&scr_dir.join(format!("{rank}.scrfilemap")))?;
                tracing::info!(
                    dataset = dataset_id,
                    rank,
                    files = files.len(),
                    mode = ?mode,
                    "restored rank from partner copy"
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::FileKind;

    fn meta_for(name: &str, data: &[u8]) -> Meta {
        let mut m = Meta::new();
        m.set_orig(name);
        m.set_orig_name(name);
        m.set_filesize(data.len() as u64);
        m.set_kind(FileKind::User);
        m.set_complete(true);
        m.set_crc32(crc32fast_hash(data));
        m
    }

    fn crc32fast_hash(data: &[u8]) -> u32 {
        let mut h = crc32fast::Hasher::new();
        h.update(data);
        h.finalize()
    }

    #[test]
    fn rebuild_data_restores_files_and_map() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path();

        // simulate a scavenged partner directory for rank 3
        let partner_dir = dataset_dir.join(partner_dir_name(3));
        std::fs::create_dir_all(&partner_dir).unwrap();
        let payload = b"partner-held checkpoint bytes";
        std::fs::write(partner_dir.join("ckpt.3.dat"), payload).unwrap();

        let mut dataset = Dataset::new();
        dataset.set_id(9);
        let mut map = FileMap::new();
        map.set_dataset(9, 3, &dataset);
        map.add_file(9, 3, "ckpt.3.dat");
        map.set_meta(9, 3, "ckpt.3.dat", &meta_for("ckpt.3.dat", payload));
        map.set_expected_files(9, 3, 1);
        let map_path = partner_dir.join("3.scrfilemap");
        map.write(&map_path).unwrap();

        rebuild_partner(dataset_dir, PartnerMode::Data, &[map_path]).unwrap();

        assert_eq!(
            std::fs::read(dataset_dir.join("ckpt.3.dat")).unwrap(),
            payload
        );
        let mut restored = FileMap::new();
        restored
            .read(&dataset_dir.join(".scr/3.scrfilemap"))
            .unwrap();
        assert_eq!(restored.get_expected_files(9, 3), Some(1));
        assert!(restored.have_files(dataset_dir, 9, 3));
    }

    #[test]
    fn rebuild_map_leaves_data_alone() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path();
        let partner_dir = dataset_dir.join(partner_dir_name(1));
        std::fs::create_dir_all(&partner_dir).unwrap();

        let mut map = FileMap::new();
        map.add_file(4, 1, "out.dat");
        map.set_meta(4, 1, "out.dat", &meta_for("out.dat", b"xyz"));
        map.set_expected_files(4, 1, 1);
        let map_path = partner_dir.join("1.scrfilemap");
        map.write(&map_path).unwrap();

        rebuild_partner(dataset_dir, PartnerMode::Map, &[map_path]).unwrap();

        assert!(dataset_dir.join(".scr/1.scrfilemap").exists());
        assert!(!dataset_dir.join("out.dat").exists());
    }

    #[test]
    fn corrupt_partner_copy_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path();
        let partner_dir = dataset_dir.join(partner_dir_name(2));
        std::fs::create_dir_all(&partner_dir).unwrap();

        // copy on disk does not match the recorded CRC
        std::fs::write(partner_dir.join("f.dat"), b"corrupted").unwrap();
        let mut meta = meta_for("f.dat", b"corrupted");
        meta.set_crc32(0xBAD0_BAD0);
        let mut map = FileMap::new();
        map.add_file(2, 2, "f.dat");
        map.set_meta(2, 2, "f.dat", &meta);
        map.set_expected_files(2, 2, 1);
        let map_path = partner_dir.join("2.scrfilemap");
        map.write(&map_path).unwrap();

        let err = rebuild_partner(dataset_dir, PartnerMode::Data, &[map_path]).unwrap_err();
        assert!(matches!(err, RedundancyError::Integrity { .. }));
        assert!(!dataset_dir.join("f.dat").exists());
    }

    #[test]
    fn missing_map_argument_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = rebuild_partner(dir.path(), PartnerMode::Map, &[PathBuf::from("data.bin")])
            .unwrap_err();
        assert!(matches!(err, RedundancyError::Geometry(_)));
    }
}
