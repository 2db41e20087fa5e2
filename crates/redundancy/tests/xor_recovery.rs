//! End-to-end XOR recovery: encode a set over an in-process group, lose a
//! member, and get byte-identical files back, both offline and live.

use std::path::{Path, PathBuf};
use std::thread;

use collective::ProcessGroup;
use metadata::{Dataset, FileKind, Meta};
use rand::{Rng, SeedableRng, rngs::StdRng};
use redundancy::xor::{self, DecodeContext, EncodeContext, XorSet};
use redundancy::{MemberFiles, XorHeader, xor_file_name};

fn crc(data: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(data);
    h.finalize()
}

fn meta_for(name: &str, data: &[u8], rank: i64, ranks: i64) -> Meta {
    let mut m = Meta::new();
    m.set_orig(name);
    m.set_orig_name(name);
    m.set_filesize(data.len() as u64);
    m.set_kind(FileKind::User);
    m.set_rank(rank);
    m.set_ranks(ranks);
    m.set_complete(true);
    m.set_crc32(crc(data));
    m
}

fn dataset() -> Dataset {
    let mut d = Dataset::new();
    d.set_id(1);
    d.set_name("ckpt.1");
    d
}

/// Encodes `payload_sizes.len()` ranks over a thread group into `dir`,
/// writing `rank<r>.dat` data files and `.scr/<k>_of_<K>_in_0.xor`
/// fragments. Returns the payloads.
fn encode_set(dir: &Path, payload_sizes: &[usize], chunk_size: Option<u64>) -> Vec<Vec<u8>> {
    let n = payload_sizes.len();
    let mut rng = StdRng::seed_from_u64(0x5ca1ab1e);
    let payloads: Vec<Vec<u8>> = payload_sizes
        .iter()
        .map(|&len| (0..len).map(|_| rng.r#gen()).collect())
        .collect();

    for (rank, payload) in payloads.iter().enumerate() {
        std::fs::write(dir.join(format!("rank{rank}.dat")), payload).unwrap();
    }
    std::fs::create_dir_all(dir.join(".scr")).unwrap();

    let handles: Vec<_> = collective::ThreadGroup::new_group(n)
        .into_iter()
        .map(|group| {
            let dir = dir.to_path_buf();
            let payload = payloads[group.rank()].clone();
            thread::spawn(move || {
                let rank = group.rank();
                let set = XorSet::contiguous(rank, n, n);
                let name = format!("rank{rank}.dat");
                let files = vec![(
                    PathBuf::from(&name),
                    meta_for(&name, &payload, rank as i64, n as i64),
                )];
                let xor_path = dir.join(".scr").join(xor_file_name(set.index, n, set.set_id));
                let ctx = EncodeContext {
                    set: &set,
                    ranks: n as i64,
                    dataset: &dataset(),
                    dataset_dir: &dir,
                    files,
                    xor_path: &xor_path,
                    chunk_size,
                };
                xor::encode(&group, &ctx).unwrap()
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    payloads
}

fn survivors_after(dir: &Path, n: usize, missing: usize) -> Vec<PathBuf> {
    (1..n)
        .map(|j| {
            let index = (missing + j) % n;
            dir.join(".scr").join(xor_file_name(index, n, 0))
        })
        .collect()
}

#[test]
fn offline_rebuild_restores_missing_member() {
    // four ranks, mixed sizes, chunk smaller than the files
    let dir = tempfile::tempdir().unwrap();
    let sizes = [100usize, 200, 300, 50];
    let payloads = encode_set(dir.path(), &sizes, Some(64));

    let missing = 2usize;
    std::fs::remove_file(dir.path().join("rank2.dat")).unwrap();
    std::fs::remove_file(dir.path().join(".scr").join(xor_file_name(2, 4, 0))).unwrap();

    let missing_xor = PathBuf::from(format!(".scr/{}", xor_file_name(2, 4, 0)));
    xor::rebuild_offline(
        dir.path(),
        4,
        missing,
        &missing_xor,
        &survivors_after(dir.path(), 4, missing),
    )
    .unwrap();

    let rebuilt = std::fs::read(dir.path().join("rank2.dat")).unwrap();
    assert_eq!(rebuilt, payloads[2]);
    assert_eq!(crc(&rebuilt), crc(&payloads[2]));

    // the rebuild leaves a fresh rank-scoped map behind
    let mut map = filemap::FileMap::new();
    map.read(&dir.path().join(".scr/2.scrfilemap")).unwrap();
    assert_eq!(map.get_expected_files(1, 2), Some(2));
    assert!(map.have_files(dir.path(), 1, 2));
}

#[test]
fn rebuilt_xor_fragment_matches_original() {
    let dir = tempfile::tempdir().unwrap();
    encode_set(dir.path(), &[100, 200, 300, 50], Some(64));

    let original = std::fs::read(dir.path().join(".scr").join(xor_file_name(1, 4, 0))).unwrap();
    std::fs::remove_file(dir.path().join("rank1.dat")).unwrap();
    std::fs::remove_file(dir.path().join(".scr").join(xor_file_name(1, 4, 0))).unwrap();

    let missing_xor = PathBuf::from(format!(".scr/{}", xor_file_name(1, 4, 0)));
    xor::rebuild_offline(
        dir.path(),
        4,
        1,
        &missing_xor,
        &survivors_after(dir.path(), 4, 1),
    )
    .unwrap();

    let rebuilt = std::fs::read(dir.path().join(".scr").join(xor_file_name(1, 4, 0))).unwrap();
    assert_eq!(rebuilt, original);
}

#[test]
fn every_single_member_is_recoverable() {
    // any one missing index must rebuild byte-identically
    for missing in 0..3usize {
        let dir = tempfile::tempdir().unwrap();
        let payloads = encode_set(dir.path(), &[33, 0, 129], Some(32));

        std::fs::remove_file(dir.path().join(format!("rank{missing}.dat"))).unwrap();
        std::fs::remove_file(
            dir.path()
                .join(".scr")
                .join(xor_file_name(missing, 3, 0)),
        )
        .unwrap();

        let missing_xor = PathBuf::from(format!(".scr/{}", xor_file_name(missing, 3, 0)));
        xor::rebuild_offline(
            dir.path(),
            3,
            missing,
            &missing_xor,
            &survivors_after(dir.path(), 3, missing),
        )
        .unwrap();

        let rebuilt = std::fs::read(dir.path().join(format!("rank{missing}.dat"))).unwrap();
        assert_eq!(rebuilt, payloads[missing], "missing index {missing}");
    }
}

#[test]
fn zero_byte_member_encodes_and_rebuilds() {
    let dir = tempfile::tempdir().unwrap();
    let payloads = encode_set(dir.path(), &[0, 75], Some(16));
    assert!(payloads[0].is_empty());

    std::fs::remove_file(dir.path().join("rank0.dat")).unwrap();
    std::fs::remove_file(dir.path().join(".scr").join(xor_file_name(0, 2, 0))).unwrap();

    let missing_xor = PathBuf::from(format!(".scr/{}", xor_file_name(0, 2, 0)));
    xor::rebuild_offline(
        dir.path(),
        2,
        0,
        &missing_xor,
        &survivors_after(dir.path(), 2, 0),
    )
    .unwrap();

    let rebuilt = std::fs::read(dir.path().join("rank0.dat")).unwrap();
    assert!(rebuilt.is_empty());
}

#[test]
fn derived_chunk_size_also_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let payloads = encode_set(dir.path(), &[513, 1024, 7], None);

    std::fs::remove_file(dir.path().join("rank1.dat")).unwrap();
    std::fs::remove_file(dir.path().join(".scr").join(xor_file_name(1, 3, 0))).unwrap();

    let missing_xor = PathBuf::from(format!(".scr/{}", xor_file_name(1, 3, 0)));
    xor::rebuild_offline(
        dir.path(),
        3,
        1,
        &missing_xor,
        &survivors_after(dir.path(), 3, 1),
    )
    .unwrap();

    assert_eq!(
        std::fs::read(dir.path().join("rank1.dat")).unwrap(),
        payloads[1]
    );
}

#[test]
fn corrupted_survivor_fails_crc_check() {
    let dir = tempfile::tempdir().unwrap();
    encode_set(dir.path(), &[64, 64, 64], Some(16));

    // flip a byte inside rank 1's data, then lose rank 0
    let target = dir.path().join("rank1.dat");
    let mut bytes = std::fs::read(&target).unwrap();
    bytes[10] ^= 0xFF;
    std::fs::write(&target, &bytes).unwrap();

    std::fs::remove_file(dir.path().join("rank0.dat")).unwrap();
    std::fs::remove_file(dir.path().join(".scr").join(xor_file_name(0, 3, 0))).unwrap();

    let missing_xor = PathBuf::from(format!(".scr/{}", xor_file_name(0, 3, 0)));
    let err = xor::rebuild_offline(
        dir.path(),
        3,
        0,
        &missing_xor,
        &survivors_after(dir.path(), 3, 0),
    )
    .unwrap_err();
    assert!(matches!(err, redundancy::RedundancyError::Integrity { .. }));
    // partial outputs must not linger
    assert!(!dir.path().join("rank0.dat").exists());
    assert!(
        !dir.path()
            .join(".scr")
            .join(xor_file_name(0, 3, 0))
            .exists()
    );
}

#[test]
fn live_decode_rebuilds_at_the_replacement() {
    let dir = tempfile::tempdir().unwrap();
    let n = 4usize;
    let payloads = encode_set(dir.path(), &[100, 200, 300, 50], Some(64));

    let missing = 3usize;
    std::fs::remove_file(dir.path().join("rank3.dat")).unwrap();
    std::fs::remove_file(dir.path().join(".scr").join(xor_file_name(3, 4, 0))).unwrap();

    let handles: Vec<_> = collective::ThreadGroup::new_group(n)
        .into_iter()
        .map(|group| {
            let dir = dir.path().to_path_buf();
            thread::spawn(move || {
                let rank = group.rank();
                let set = XorSet::contiguous(rank, n, n);
                let xor_path = dir.join(".scr").join(xor_file_name(set.index, n, 0));
                let ctx = DecodeContext {
                    set: &set,
                    missing_index: missing,
                    dataset_dir: &dir,
                    xor_path: &xor_path,
                };
                xor::decode(&group, &ctx).unwrap()
            })
        })
        .collect();
    let headers: Vec<XorHeader> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let rebuilt = std::fs::read(dir.path().join("rank3.dat")).unwrap();
    assert_eq!(rebuilt, payloads[3]);

    // the replacement's derived header matches what its neighbors knew
    let replacement: &MemberFiles = &headers[missing].current;
    assert_eq!(replacement.rank, missing as i64);
    assert_eq!(replacement.files.len(), 1);
    assert_eq!(replacement.files[0].filesize(), Some(50));
}
