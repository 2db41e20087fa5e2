use std::path::{Path, PathBuf};

use clap::Parser;
use fileio::{copy_file, mkdir_p};
use filemap::{
    FileMap, SCAVENGE_KEY_CONTAINER, SCAVENGE_KEY_PARTNER, SCAVENGE_KEY_PRESERVE,
};
use kvtree::KvTree;
use metadata::FileKind;
use pathseq::PathSeq;

/// Copy a dataset's files from node-local cache to the prefix directory
/// during a scavenge.
#[derive(Debug, Parser)]
#[command(name = "scr-copy")]
pub struct CopyArgs {
    /// Control directory holding the node's file maps.
    #[arg(long, value_name = "DIR")]
    cntldir: PathBuf,

    /// Dataset id to copy.
    #[arg(long)]
    id: i64,

    /// Destination dataset directory in the prefix.
    #[arg(long, value_name = "DIR")]
    dstdir: PathBuf,

    /// Copy buffer size in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    buf: usize,

    /// Compute and verify CRC32 during the copy.
    #[arg(long)]
    crc: bool,

    /// Copy only partner-held files for the listed failed hosts.
    #[arg(long)]
    partner: bool,

    /// Files are stored in containers.
    #[arg(long)]
    containers: bool,

    /// Hostnames of failed nodes whose partner copies should be scavenged.
    #[arg(value_name = "FAILED_HOST")]
    failed_hosts: Vec<String>,
}

const MASTER_FILE: &str = "filemap.scrinfo";
const MASTER_KEY_FILEMAP: &str = "Filemap";

/// Merges every per-rank file map the master control file names.
fn load_node_map(cntldir: &Path) -> Option<FileMap> {
    let mut master = KvTree::new();
    if master.read_file(&cntldir.join(MASTER_FILE)).is_err() {
        tracing::error!(dir = %cntldir.display(), "cannot read master file map");
        return None;
    }

    let mut merged = FileMap::new();
    if let Some(maps) = master.get(MASTER_KEY_FILEMAP) {
        for (file, _) in maps.iter() {
            let mut one = FileMap::new();
            if one.read(Path::new(file)).is_ok() {
                merged.merge(&one);
            }
        }
    }
    Some(merged)
}

fn copy_rank(args: &CopyArgs, map: &FileMap, rank: i64, scr_dir: &Path) -> bool {
    let mut ok = true;

    let flushdesc = map.get_flushdesc(args.id, rank).unwrap_or_default();
    let partner_host = flushdesc.get_str(SCAVENGE_KEY_PARTNER).map(str::to_owned);
    let preserve = flushdesc.get_int(SCAVENGE_KEY_PRESERVE) == Some(1);
    let container = flushdesc.get_int(SCAVENGE_KEY_CONTAINER) == Some(1);

    // partner-held entries are copied only when their source host failed
    if let Some(host) = &partner_host {
        if !args.failed_hosts.iter().any(|h| h == host) {
            return true;
        }
        tracing::info!(rank, %host, "scavenging partner-held files");
    } else if args.partner {
        return true;
    }

    // nothing to do when the rank's files are not all present and whole
    if !map.have_files(Path::new("/"), args.id, rank) {
        return true;
    }

    let mut shard = FileMap::new();
    if let Some(expected) = map.get_expected_files(args.id, rank) {
        shard.set_expected_files(args.id, rank, expected);
    }
    if let Some(dataset) = map.get_dataset(args.id, rank) {
        shard.set_dataset(args.id, rank, &dataset);
    }
    let mut shard_desc = KvTree::new();
    shard_desc.set_int(SCAVENGE_KEY_PRESERVE, i64::from(preserve));
    shard_desc.set_int(SCAVENGE_KEY_CONTAINER, i64::from(container || args.containers));
    shard.set_flushdesc(args.id, rank, &shard_desc);

    let dst_seq = {
        let mut p = PathSeq::from(args.dstdir.as_path());
        if p.reduce().is_err() {
            return false;
        }
        p
    };

    for file in map.list_files(args.id, rank) {
        let Some(mut meta) = map.get_meta(args.id, rank, &file) else {
            ok = false;
            continue;
        };

        // user files land in the dataset directory (or their original
        // location when layouts are preserved); everything else goes under
        // the metadata subdirectory
        let dst_dir: PathBuf = if meta.check_kind(FileKind::User) {
            if preserve {
                match meta.orig_path() {
                    Some(orig) => PathBuf::from(orig),
                    None => {
                        tracing::error!(%file, "no original path recorded");
                        return false;
                    }
                }
            } else {
                args.dstdir.clone()
            }
        } else {
            scr_dir.to_path_buf()
        };
        if mkdir_p(&dst_dir).is_err() {
            return false;
        }

        let base = Path::new(&file)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.clone());
        let dst = dst_dir.join(&base);

        match copy_file(Path::new(&file), &dst, args.buf.max(4096), args.crc) {
            Ok(crc) => {
                if let (Some(expected), Some(actual)) = (meta.crc32(), crc) {
                    if expected != actual {
                        tracing::error!(%file, "crc mismatch while scavenging");
                        meta.set_complete(false);
                        ok = false;
                    }
                } else if let Some(actual) = crc {
                    meta.set_crc32(actual);
                }
            }
            Err(err) => {
                tracing::error!(%file, error = %err, "copy failed");
                ok = false;
                continue;
            }
        }

        // record the copy relative to the dataset directory
        let mut full = PathSeq::from(dst.as_path());
        if full.reduce().is_err() {
            return false;
        }
        let rel = PathSeq::relative(&dst_seq, &full)
            .map_or_else(|_| base.clone(), |p| p.to_string());
        shard.add_file(args.id, rank, &rel);
        shard.set_meta(args.id, rank, &rel, &meta);
    }

    if shard
        .write(&scr_dir.join(format!("{rank}.scrfilemap")))
        .is_err()
    {
        ok = false;
    }
    ok
}

/// Entry point for `scr-copy`; returns the process exit code.
#[must_use]
pub fn run_copy(args: &CopyArgs) -> i32 {
    let Some(map) = load_node_map(&args.cntldir) else {
        return 1;
    };

    if map.list_ranks_by_dataset(args.id).is_empty() {
        tracing::error!(id = args.id, "no files for dataset on this node");
        return 1;
    }

    let scr_dir = args.dstdir.join(".scr");
    if mkdir_p(&scr_dir).is_err() {
        return 1;
    }

    let mut ok = true;
    for rank in map.list_ranks_by_dataset(args.id) {
        if !copy_rank(args, &map, rank, &scr_dir) {
            ok = false;
        }
    }
    i32::from(!ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::{Dataset, Meta};

    fn meta_for(path: &Path, data: &[u8]) -> Meta {
        let mut m = Meta::new();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        m.set_orig(&name);
        m.set_orig_name(&name);
        m.set_filesize(data.len() as u64);
        m.set_kind(FileKind::User);
        m.set_ranks(1);
        m.set_complete(true);
        m
    }

    fn args(cntl: &Path, dst: &Path) -> CopyArgs {
        CopyArgs {
            cntldir: cntl.to_path_buf(),
            id: 2,
            dstdir: dst.to_path_buf(),
            buf: 4096,
            crc: true,
            partner: false,
            containers: false,
            failed_hosts: Vec::new(),
        }
    }

    #[test]
    fn scavenge_copies_cache_to_prefix() {
        let root = tempfile::tempdir().unwrap();
        let cache = root.path().join("cache");
        let cntl = root.path().join("cntl");
        let dst = root.path().join("prefix/scr.dataset.2");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::create_dir_all(&cntl).unwrap();
        std::fs::create_dir_all(&dst).unwrap();

        let data_path = cache.join("state.dat");
        std::fs::write(&data_path, b"cached bytes").unwrap();

        let mut dataset = Dataset::new();
        dataset.set_id(2);
        let mut map = FileMap::new();
        let file = data_path.to_string_lossy().to_string();
        map.set_dataset(2, 0, &dataset);
        map.add_file(2, 0, &file);
        map.set_meta(2, 0, &file, &meta_for(&data_path, b"cached bytes"));
        map.set_expected_files(2, 0, 1);
        let map_path = cntl.join("0.scrfilemap");
        map.write(&map_path).unwrap();

        let mut master = KvTree::new();
        master.set_kv(MASTER_KEY_FILEMAP, map_path.to_string_lossy());
        master.write_file(&cntl.join(MASTER_FILE)).unwrap();

        let code = run_copy(&args(&cntl, &dst));
        assert_eq!(code, 0);
        assert_eq!(std::fs::read(dst.join("state.dat")).unwrap(), b"cached bytes");

        let mut shard = FileMap::new();
        shard.read(&dst.join(".scr/0.scrfilemap")).unwrap();
        assert_eq!(shard.get_expected_files(2, 0), Some(1));
        assert!(shard.have_files(&dst, 2, 0));
    }

    #[test]
    fn partner_entries_are_skipped_unless_host_failed() {
        let root = tempfile::tempdir().unwrap();
        let cache = root.path().join("cache");
        let cntl = root.path().join("cntl");
        let dst = root.path().join("prefix/d");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::create_dir_all(&cntl).unwrap();
        std::fs::create_dir_all(&dst).unwrap();

        let copy_path = cache.join("partner_file.dat");
        std::fs::write(&copy_path, b"held for rank 3").unwrap();

        let mut map = FileMap::new();
        let file = copy_path.to_string_lossy().to_string();
        map.add_file(2, 3, &file);
        map.set_meta(2, 3, &file, &meta_for(&copy_path, b"held for rank 3"));
        map.set_expected_files(2, 3, 1);
        let mut desc = KvTree::new();
        desc.set_str(SCAVENGE_KEY_PARTNER, "rank.3");
        map.set_flushdesc(2, 3, &desc);
        let map_path = cntl.join("0.scrfilemap");
        map.write(&map_path).unwrap();

        let mut master = KvTree::new();
        master.set_kv(MASTER_KEY_FILEMAP, map_path.to_string_lossy());
        master.write_file(&cntl.join(MASTER_FILE)).unwrap();

        // rank.3 did not fail: nothing is copied
        let mut a = args(&cntl, &dst);
        a.partner = true;
        assert_eq!(run_copy(&a), 0);
        assert!(!dst.join("partner_file.dat").exists());

        // rank.3 failed: its partner-held copy is scavenged
        a.failed_hosts = vec!["rank.3".to_owned()];
        assert_eq!(run_copy(&a), 0);
        assert_eq!(
            std::fs::read(dst.join("partner_file.dat")).unwrap(),
            b"held for rank 3"
        );
    }
}
