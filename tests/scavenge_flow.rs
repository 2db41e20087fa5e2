//! The full disaster-recovery story, driven through the installed tools:
//! a job writes a cache-only XOR checkpoint, one node dies, `scr-copy`
//! scavenges the survivors into the prefix directory, and `scr-index --add`
//! rebuilds the lost member via `scr-rebuild-xor` before indexing the
//! dataset as restartable.

use std::path::Path;
use std::process::Command;
use std::thread;

use assert_cmd::prelude::*;
use cacheindex::Index;
use collective::{ProcessGroup, ThreadGroup};
use config::Params;
use metadata::DatasetFlags;
use runtime::{Runtime, RuntimeOptions};

fn payload_for(rank: usize) -> Vec<u8> {
    (0..200 * (rank + 1))
        .map(|i| (i as u8).wrapping_mul(rank as u8 + 3))
        .collect()
}

/// Writes one cache-only XOR-protected checkpoint across four ranks.
fn write_cached_checkpoint(root: &Path) {
    let n = 4usize;
    let opts = RuntimeOptions {
        prefix: root.join("prefix"),
        cache_base: root.join("cache"),
        cntl_dir: root.join("cntl"),
    };

    let handles: Vec<_> = ThreadGroup::new_group(n)
        .into_iter()
        .map(|group| {
            let opts = opts.clone();
            thread::spawn(move || {
                let rank = group.rank();
                let mut params = Params::new();
                params.set("SCR_COPY_TYPE=XOR").unwrap();
                params.set(&format!("SCR_SET_SIZE={n}")).unwrap();
                params.set("SCR_FLUSH=0").unwrap();
                let mut rt = Runtime::init(group, params, opts).unwrap();

                rt.start_output("scr.dataset.1", DatasetFlags::checkpoint())
                    .unwrap();
                let routed = rt.route_file(&format!("part_{rank}.dat")).unwrap();
                std::fs::write(&routed, payload_for(rank)).unwrap();
                assert!(rt.complete_output(true).unwrap());
                rt.finalize().unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn scavenge_rebuild_and_index_through_the_tools() {
    let root = tempfile::tempdir().unwrap();
    write_cached_checkpoint(root.path());

    // the checkpoint never reached the prefix directory
    assert!(!root.path().join("prefix/scr.dataset.1").exists());

    // node holding rank 2 dies: its cache and its file map are gone
    std::fs::remove_dir_all(root.path().join("cache/rank.2")).unwrap();
    std::fs::remove_file(root.path().join("cntl/2.scrfilemap")).unwrap();

    // scavenge the survivors into the prefix directory
    let dst = root.path().join("prefix/scr.dataset.1");
    let status = Command::cargo_bin("scr-copy")
        .unwrap()
        .args([
            "--cntldir",
            root.path().join("cntl").to_str().unwrap(),
            "--id",
            "1",
            "--dstdir",
            dst.to_str().unwrap(),
            "--crc",
        ])
        .status()
        .unwrap();
    assert!(status.success(), "scr-copy failed");

    for rank in [0usize, 1, 3] {
        assert!(dst.join(format!("part_{rank}.dat")).exists());
        assert!(dst.join(format!(".scr/{rank}.scrfilemap")).exists());
    }
    assert!(!dst.join("part_2.dat").exists());

    // indexing the directory rebuilds the lost member from parity first
    let rebuild_tool = assert_cmd::cargo::cargo_bin("scr-rebuild-xor");
    let status = Command::cargo_bin("scr-index")
        .unwrap()
        .args([
            "--add",
            "scr.dataset.1",
            "--prefix",
            root.path().join("prefix").to_str().unwrap(),
        ])
        .env("SCR_REBUILD_XOR", &rebuild_tool)
        .status()
        .unwrap();
    assert!(status.success(), "scr-index --add failed");

    // the lost rank's data is back, byte for byte
    assert_eq!(
        std::fs::read(dst.join("part_2.dat")).unwrap(),
        payload_for(2)
    );
    assert!(dst.join(".scr/2.scrfilemap").exists());

    let summary = summary::read_summary(&dst).unwrap();
    assert!(summary.complete);
    assert_eq!(summary.dataset.id(), Some(1));

    let index = Index::read(&root.path().join("prefix")).unwrap();
    assert_eq!(index.get_id_by_dir("scr.dataset.1"), Some(1));
    assert_eq!(index.get_complete(1, "scr.dataset.1"), Some(true));

    // and the listing shows a valid restart source
    let output = Command::cargo_bin("scr-index")
        .unwrap()
        .args([
            "--list",
            "--prefix",
            root.path().join("prefix").to_str().unwrap(),
        ])
        .output()
        .unwrap();
    let listing = String::from_utf8(output.stdout).unwrap();
    let row = listing
        .lines()
        .find(|l| l.contains("scr.dataset.1"))
        .expect("dataset is listed");
    assert!(row.contains("YES"), "row: {row}");
}
