//! XOR-set encoding, collective decoding, and offline rebuild.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use collective::ProcessGroup;
use fileio::{
    LogicalFile, crc32_file, file_size, mkdir_p, open_retry, read_pad_n, read_reliable, unlink,
    write_pad_n, write_reliable,
};
use filemap::{FileMap, SCAVENGE_KEY_PRESERVE};
use kvtree::KvTree;
use metadata::{Dataset, FileKind, Meta};
use pathseq::PathSeq;

use crate::error::{RedundancyError, RedundancyResult};
use crate::header::{MemberFiles, XorHeader};

/// Sub-block size for moving one chunk through memory.
const SUB_BLOCK: u64 = 128 * 1024;

/// Builds the canonical XOR fragment name, `<k>_of_<K>_in_<set>.xor` with a
/// one-based member index.
#[must_use]
pub fn xor_file_name(member_index: usize, set_size: usize, set_id: i64) -> String {
    format!("{}_of_{}_in_{}.xor", member_index + 1, set_size, set_id)
}

/// Parses an XOR fragment name; returns the zero-based member index, the
/// set size, and the set id.
#[must_use]
pub fn parse_xor_file_name(name: &str) -> Option<(usize, usize, i64)> {
    let rest = name.strip_suffix(".xor")?;
    let (member, rest) = rest.split_once("_of_")?;
    let (size, set) = rest.split_once("_in_")?;
    let member: usize = member.parse().ok()?;
    let size: usize = size.parse().ok()?;
    let set: i64 = set.parse().ok()?;
    if member == 0 || member > size {
        return None;
    }
    Some((member - 1, size, set))
}

/// One rank's place in an XOR redundancy set.
///
/// Members are held in cyclic order; the left and right neighbors of member
/// `i` are at `i-1` and `i+1` modulo the set size.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XorSet {
    /// Identifier shared by every member of the set.
    pub set_id: i64,
    /// Global ranks of the members in cyclic order.
    pub members: Vec<usize>,
    /// This rank's position within `members`.
    pub index: usize,
}

impl XorSet {
    /// Partitions `0..size` into contiguous sets of roughly `set_size`
    /// ranks and returns the set containing `rank`.
    ///
    /// The tail set absorbs the remainder so no set ends up with a single
    /// member.
    #[must_use]
    pub fn contiguous(rank: usize, size: usize, set_size: usize) -> Self {
        let set_size = set_size.max(2);
        let sets = (size / set_size).max(1);
        let set_id = (rank / set_size).min(sets - 1) as i64;
        let start = set_id as usize * set_size;
        let end = if set_id as usize == sets - 1 {
            size
        } else {
            start + set_size
        };
        let members: Vec<usize> = (start..end).collect();
        let index = rank - start;
        Self {
            set_id,
            members,
            index,
        }
    }

    /// Number of members.
    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Index of the member to this member's right.
    #[must_use]
    pub fn right_index(&self) -> usize {
        (self.index + 1) % self.size()
    }

    /// Index of the member to this member's left.
    #[must_use]
    pub fn left_index(&self) -> usize {
        (self.index + self.size() - 1) % self.size()
    }

    /// Global rank of the right neighbor.
    #[must_use]
    pub fn right_rank(&self) -> usize {
        self.members[self.right_index()]
    }

    /// Global rank of the left neighbor.
    #[must_use]
    pub fn left_rank(&self) -> usize {
        self.members[self.left_index()]
    }
}

/// Number of data chunks each member's logical stream spans.
#[must_use]
pub fn data_chunks(max_bytes: u64, chunk_size: u64) -> u64 {
    max_bytes.div_ceil(chunk_size.max(1))
}

/// Number of parity rounds needed to cover `chunks` data chunks per member.
#[must_use]
pub fn rounds(chunks: u64, set_size: usize) -> u64 {
    chunks.div_ceil((set_size - 1) as u64)
}

/// The chunk size the runtime derives when none is configured: one round
/// covers the largest member.
#[must_use]
pub fn derive_chunk_size(max_bytes: u64, set_size: usize) -> u64 {
    max_bytes.div_ceil((set_size - 1) as u64).max(1)
}

fn xor_into(acc: &mut [u8], other: &[u8]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a ^= b;
    }
}

fn expect_len(payload: Vec<u8>, want: usize, path: &Path) -> RedundancyResult<Vec<u8>> {
    if payload.len() == want {
        Ok(payload)
    } else {
        Err(RedundancyError::Integrity {
            path: path.to_path_buf(),
            detail: format!("ring payload was {} bytes, expected {want}", payload.len()),
        })
    }
}

/// Opens a member's data files as one logical stream, in header order.
fn open_stream(
    dataset_dir: &Path,
    files: &[(PathBuf, Meta)],
    writable: bool,
) -> RedundancyResult<Vec<LogicalFile>> {
    let mut stream = Vec::with_capacity(files.len());
    for (path, meta) in files {
        let full = if path.is_absolute() {
            path.clone()
        } else {
            dataset_dir.join(path)
        };
        let file = if writable {
            if let Some(parent) = full.parent() {
                mkdir_p(parent)?;
            }
            open_retry(
                &full,
                OpenOptions::new().write(true).create(true).truncate(true),
            )?
        } else {
            open_retry(&full, OpenOptions::new().read(true))?
        };
        let len = meta.filesize().unwrap_or(0);
        stream.push(LogicalFile::new(file, len, full));
    }
    Ok(stream)
}

/// Everything encode needs besides the group handle.
#[derive(Debug)]
pub struct EncodeContext<'a> {
    /// This rank's redundancy set.
    pub set: &'a XorSet,
    /// Size of the whole process group.
    pub ranks: i64,
    /// Dataset being protected.
    pub dataset: &'a Dataset,
    /// Cache directory holding this rank's dataset files.
    pub dataset_dir: &'a Path,
    /// This rank's files in stream order: path relative to the dataset
    /// directory plus the meta record (size must be set).
    pub files: Vec<(PathBuf, Meta)>,
    /// Where to write this rank's `.xor` fragment.
    pub xor_path: &'a Path,
    /// Chunk size override; derived from the largest member when `None`.
    pub chunk_size: Option<u64>,
}

/// Encodes one XOR set at dataset completion.
///
/// Every member of the set calls this collectively. On return the member's
/// `.xor` fragment is on disk: header first, then one parity chunk per
/// round in which this member was the parity holder.
pub fn encode<G: ProcessGroup>(group: &G, ctx: &EncodeContext<'_>) -> RedundancyResult<XorHeader> {
    let n = ctx.set.size();
    if n < 2 {
        return Err(RedundancyError::Geometry(
            "an XOR set needs at least two members".to_owned(),
        ));
    }
    let right = ctx.set.right_rank();
    let left = ctx.set.left_rank();

    // trade file lists around the ring so each member can record its left
    // neighbor's files in its header
    let current = MemberFiles {
        rank: group.rank() as i64,
        files: ctx.files.iter().map(|(_, m)| m.clone()).collect(),
    };
    let sent = current.to_tree().pack_to_vec();
    let received = group.sendrecv(right, &sent, left)?;
    let (partner_tree, _) = KvTree::unpack(&received)?;
    let partner = MemberFiles::from_tree(&partner_tree, ctx.xor_path)?;

    // agree on the largest logical stream in the set
    let mut max_bytes = current.total_bytes();
    for _ in 1..n {
        let echoed = group.sendrecv(right, &max_bytes.to_le_bytes(), left)?;
        let bytes: [u8; 8] = echoed.as_slice().try_into().map_err(|_| {
            RedundancyError::Geometry("ring size exchange returned a short payload".to_owned())
        })?;
        max_bytes = max_bytes.max(u64::from_le_bytes(bytes));
    }

    let chunk_size = ctx
        .chunk_size
        .unwrap_or_else(|| derive_chunk_size(max_bytes, n));

    let header = XorHeader {
        ranks: ctx.ranks,
        set_size: n as i64,
        chunk_size,
        dataset: ctx.dataset.clone(),
        current,
        partner,
    };

    if let Some(parent) = ctx.xor_path.parent() {
        mkdir_p(parent)?;
    }
    let mut xor_file = open_retry(
        ctx.xor_path,
        OpenOptions::new().write(true).create(true).truncate(true),
    )?;
    header.write_to(ctx.xor_path, &mut xor_file)?;

    let mut stream = open_stream(ctx.dataset_dir, &ctx.files, false)?;

    let phases = rounds(data_chunks(max_bytes, chunk_size), n) * n as u64;
    let my = ctx.set.index;
    let mut data_offset = 0u64;
    for phase in 0..phases {
        let parity = (phase % n as u64) as usize;
        let mut done = 0u64;
        while done < chunk_size {
            let count = SUB_BLOCK.min(chunk_size - done) as usize;
            if my == parity {
                // tail of the chain: the accumulated parity arrives here
                let block = expect_len(group.recv(left)?, count, ctx.xor_path)?;
                write_reliable(ctx.xor_path, &mut xor_file, &block)?;
            } else {
                let mut block = vec![0u8; count];
                read_pad_n(&mut stream, &mut block, data_offset + done)?;
                if my != (parity + 1) % n {
                    let incoming = expect_len(group.recv(left)?, count, ctx.xor_path)?;
                    xor_into(&mut block, &incoming);
                }
                group.send(right, &block)?;
            }
            done += count as u64;
        }
        if my != parity {
            data_offset += chunk_size;
        }
    }

    xor_file.sync_all().map_err(|err| {
        RedundancyError::Io(fileio::FileIoError::File {
            path: ctx.xor_path.to_path_buf(),
            source: err,
        })
    })?;
    Ok(header)
}

/// Everything collective decode needs besides the group handle.
#[derive(Debug)]
pub struct DecodeContext<'a> {
    /// This rank's redundancy set.
    pub set: &'a XorSet,
    /// Set index of the member whose files are gone; the process at that
    /// rank participates with an empty cache and receives the rebuilt data.
    pub missing_index: usize,
    /// Cache directory for this rank's dataset files.
    pub dataset_dir: &'a Path,
    /// This rank's `.xor` fragment (existing for survivors, created for the
    /// replacement).
    pub xor_path: &'a Path,
}

/// Rebuilds one missing member inside a live group.
///
/// Survivors stream their data and parity chunks around the ring; the
/// replacement member materializes its files and its `.xor` fragment at the
/// chain's tail. Returns this member's header.
pub fn decode<G: ProcessGroup>(group: &G, ctx: &DecodeContext<'_>) -> RedundancyResult<XorHeader> {
    let n = ctx.set.size();
    if n < 2 {
        return Err(RedundancyError::Geometry(
            "an XOR set needs at least two members".to_owned(),
        ));
    }
    let my = ctx.set.index;
    let missing = ctx.missing_index;
    let missing_rank = ctx.set.members[missing];
    let right_of_missing = (missing + 1) % n;
    let left_of_missing = (missing + n - 1) % n;

    let mut xor_file;
    let header;
    if my == missing {
        // neighbors forward their headers; CURRENT comes from the right
        // neighbor's PARTNER list, PARTNER from the left neighbor's CURRENT
        let right_payload = group.recv(ctx.set.members[right_of_missing])?;
        let (right_tree, _) = KvTree::unpack(&right_payload)?;
        let right_header = XorHeader::from_tree(&right_tree, ctx.xor_path)?;

        let left_payload = group.recv(ctx.set.members[left_of_missing])?;
        let (left_tree, _) = KvTree::unpack(&left_payload)?;
        let left_header = XorHeader::from_tree(&left_tree, ctx.xor_path)?;

        header = XorHeader::derive_missing(&right_header, &left_header);

        if let Some(parent) = ctx.xor_path.parent() {
            mkdir_p(parent)?;
        }
        xor_file = open_retry(
            ctx.xor_path,
            OpenOptions::new().write(true).create(true).truncate(true),
        )?;
        header.write_to(ctx.xor_path, &mut xor_file)?;
    } else {
        let mut reader = open_retry(ctx.xor_path, OpenOptions::new().read(true))?;
        header = XorHeader::read_from(ctx.xor_path, &mut reader)?;
        xor_file = reader;

        if my == right_of_missing {
            group.send(missing_rank, &header.to_tree().pack_to_vec())?;
        }
        if my == left_of_missing {
            group.send(missing_rank, &header.to_tree().pack_to_vec())?;
        }
    }

    // resolve my file paths from the header metas: files live in the
    // dataset directory under their recorded names
    let files: Vec<(PathBuf, Meta)> = header
        .current
        .files
        .iter()
        .map(|meta| {
            let name = meta
                .orig_name()
                .or_else(|| meta.orig())
                .unwrap_or_default()
                .to_owned();
            (PathBuf::from(name), meta.clone())
        })
        .collect();
    let mut stream = open_stream(ctx.dataset_dir, &files, my == missing)?;

    let chunk_size = header.chunk_size;
    // the set already agreed on the chunk count at encode time; recover the
    // round count from the largest member visible in any header
    let mut max_bytes = header.current.total_bytes().max(header.partner.total_bytes());
    for _ in 1..n {
        let echoed = group.sendrecv(
            ctx.set.right_rank(),
            &max_bytes.to_le_bytes(),
            ctx.set.left_rank(),
        )?;
        let bytes: [u8; 8] = echoed.as_slice().try_into().map_err(|_| {
            RedundancyError::Geometry("ring size exchange returned a short payload".to_owned())
        })?;
        max_bytes = max_bytes.max(u64::from_le_bytes(bytes));
    }
    let phases = rounds(data_chunks(max_bytes, chunk_size), n) * n as u64;

    let chain_head = right_of_missing;
    let mut data_offset = 0u64;
    let mut write_pos = 0u64;
    for phase in 0..phases {
        let parity = (phase % n as u64) as usize;
        let mut done = 0u64;
        while done < chunk_size {
            let count = SUB_BLOCK.min(chunk_size - done) as usize;
            if my == missing {
                let block = expect_len(
                    group.recv(ctx.set.members[left_of_missing])?,
                    count,
                    ctx.xor_path,
                )?;
                if parity == missing {
                    write_reliable(ctx.xor_path, &mut xor_file, &block)?;
                } else {
                    write_pad_n(&mut stream, &block, write_pos + done)?;
                }
            } else {
                // survivors contribute parity in their own phase, data
                // otherwise
                let mut block = vec![0u8; count];
                if my == parity {
                    let n_read = read_reliable(ctx.xor_path, &mut xor_file, &mut block)?;
                    if n_read != count {
                        return Err(RedundancyError::Integrity {
                            path: ctx.xor_path.to_path_buf(),
                            detail: "short read from parity payload".to_owned(),
                        });
                    }
                } else {
                    read_pad_n(&mut stream, &mut block, data_offset + done)?;
                }
                if my != chain_head {
                    let incoming =
                        expect_len(group.recv(ctx.set.left_rank())?, count, ctx.xor_path)?;
                    xor_into(&mut block, &incoming);
                }
                group.send(ctx.set.right_rank(), &block)?;
            }
            done += count as u64;
        }
        if my == missing {
            if parity != missing {
                write_pos += chunk_size;
            }
        } else if my != parity {
            data_offset += chunk_size;
        }
    }

    if my == missing {
        xor_file.sync_all().map_err(|err| {
            RedundancyError::Io(fileio::FileIoError::File {
                path: ctx.xor_path.to_path_buf(),
                source: err,
            })
        })?;
        drop(stream);
        verify_rebuilt(ctx.dataset_dir, &files)?;
    }
    Ok(header)
}

/// Checks size and CRC of rebuilt files against their meta records,
/// unlinking everything on the first mismatch.
fn verify_rebuilt(dataset_dir: &Path, files: &[(PathBuf, Meta)]) -> RedundancyResult<()> {
    for (path, meta) in files {
        let full = if path.is_absolute() {
            path.clone()
        } else {
            dataset_dir.join(path)
        };
        let expect = meta.filesize().unwrap_or(0);
        let actual = file_size(&full);
        if actual != expect {
            remove_all(dataset_dir, files);
            return Err(RedundancyError::Integrity {
                path: full,
                detail: format!("rebuilt size {actual} != recorded {expect}"),
            });
        }
        if let Some(expected_crc) = meta.crc32() {
            let actual_crc = crc32_file(&full)?;
            if actual_crc != expected_crc {
                remove_all(dataset_dir, files);
                return Err(RedundancyError::Integrity {
                    path: full,
                    detail: format!("rebuilt crc {actual_crc:#x} != recorded {expected_crc:#x}"),
                });
            }
        }
    }
    Ok(())
}

fn remove_all(dataset_dir: &Path, files: &[(PathBuf, Meta)]) {
    for (path, _) in files {
        let full = if path.is_absolute() {
            path.clone()
        } else {
            dataset_dir.join(path)
        };
        let _ = unlink(&full);
    }
}

/// Rebuilds one missing member entirely from surviving files on disk.
///
/// `surviving_xor_paths` are ordered cyclically starting from the member
/// immediately after the missing one. On success the missing member's data
/// files and `.xor` fragment are back on disk with verified CRCs, and a
/// fresh rank-scoped file map sits at `.scr/<rank>.scrfilemap` under the
/// dataset directory.
pub fn rebuild_offline(
    dataset_dir: &Path,
    set_size: usize,
    missing_index: usize,
    missing_xor_path: &Path,
    surviving_xor_paths: &[PathBuf],
) -> RedundancyResult<()> {
    if set_size < 2 {
        return Err(RedundancyError::Geometry(
            "an XOR set needs at least two members".to_owned(),
        ));
    }
    if missing_index >= set_size {
        return Err(RedundancyError::Geometry(format!(
            "missing index {missing_index} out of range for set of {set_size}"
        )));
    }
    if surviving_xor_paths.len() != set_size - 1 {
        return Err(RedundancyError::Geometry(format!(
            "expected {} surviving fragments, got {}",
            set_size - 1,
            surviving_xor_paths.len()
        )));
    }

    let resolve = |p: &Path| -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            dataset_dir.join(p)
        }
    };

    // open survivors and read their headers; slot j holds the member at
    // cyclic distance j from the missing one
    let mut xor_files: Vec<Option<File>> = Vec::with_capacity(set_size);
    let mut headers: Vec<Option<XorHeader>> = vec![None; set_size];
    xor_files.push(None);
    for (j, rel) in surviving_xor_paths.iter().enumerate() {
        let path = resolve(rel);
        let mut file = open_retry(&path, OpenOptions::new().read(true))?;
        headers[j + 1] = Some(XorHeader::read_from(&path, &mut file)?);
        xor_files.push(Some(file));
    }

    let right_header = headers[1].clone().unwrap_or_else(|| unreachable!());
    let left_header = headers[set_size - 1].clone().unwrap_or_else(|| unreachable!());
    let missing_header = XorHeader::derive_missing(&right_header, &left_header);
    let chunk_size = missing_header.chunk_size;
    let missing_rank = missing_header.current.rank;

    // the scavenge descriptor of the left neighbor tells us whether user
    // directory layout was preserved
    let partner_rank = left_header.current.rank;
    let mut preserve_dirs = false;
    let mut flushdesc: Option<KvTree> = None;
    let partner_map_path = dataset_dir
        .join(".scr")
        .join(format!("{partner_rank}.scrfilemap"));
    let mut partner_map = FileMap::new();
    if partner_map.read(&partner_map_path).is_ok() {
        if let Some(id) = missing_header.dataset.id() {
            if let Some(desc) = partner_map.get_flushdesc(id, partner_rank) {
                preserve_dirs = desc.get_int(SCAVENGE_KEY_PRESERVE) == Some(1);
                flushdesc = Some(desc);
            }
        }
    }
    headers[0] = Some(missing_header.clone());

    // resolve every member's data file paths and open its logical stream
    let mut streams: Vec<Vec<LogicalFile>> = Vec::with_capacity(set_size);
    let mut missing_relpaths: Vec<PathSeq> = Vec::new();
    let dataset_seq = {
        let mut p = PathSeq::from(dataset_dir);
        p.reduce().map_err(|e| RedundancyError::Geometry(e.to_string()))?;
        p
    };
    for j in 0..set_size {
        let member = headers[j].as_ref().map(|h| &h.current);
        let member = member.unwrap_or_else(|| unreachable!());
        let mut files = Vec::with_capacity(member.files.len());
        for meta in &member.files {
            let name = meta
                .orig_name()
                .or_else(|| meta.orig())
                .ok_or(RedundancyError::HeaderField {
                    path: missing_xor_path.to_path_buf(),
                    field: "NAME",
                })?;
            let mut full = if preserve_dirs {
                let base = meta.orig_path().ok_or(RedundancyError::HeaderField {
                    path: missing_xor_path.to_path_buf(),
                    field: "PATH",
                })?;
                let mut p = PathSeq::from(base);
                p.append_str(name);
                p
            } else {
                let mut p = dataset_seq.clone();
                p.append_str(name);
                p
            };
            full.reduce()
                .map_err(|e| RedundancyError::Geometry(e.to_string()))?;
            if j == 0 {
                let rel = PathSeq::relative(&dataset_seq, &full)
                    .map_err(|e| RedundancyError::Geometry(e.to_string()))?;
                missing_relpaths.push(rel);
            }
            files.push((PathBuf::from(&full), meta.clone()));
        }
        streams.push(open_stream(dataset_dir, &files, j == 0)?);
    }

    // create the missing fragment and put its header in place
    let missing_path = resolve(missing_xor_path);
    if let Some(parent) = missing_path.parent() {
        mkdir_p(parent)?;
    }
    let mut missing_xor = open_retry(
        &missing_path,
        OpenOptions::new().write(true).create(true).truncate(true),
    )?;
    missing_header.write_to(&missing_path, &mut missing_xor)?;

    // walk the phase schedule, combining the survivors' chunks
    let max_bytes = headers
        .iter()
        .flatten()
        .map(|h| h.current.total_bytes())
        .max()
        .unwrap_or(0);
    let phases = rounds(data_chunks(max_bytes, chunk_size), set_size) * set_size as u64;

    let mut data_offsets = vec![0u64; set_size];
    let mut write_pos = 0u64;
    let walk = (|| -> RedundancyResult<()> {
        for phase in 0..phases {
            let parity = (phase % set_size as u64) as usize;
            let mut done = 0u64;
            while done < chunk_size {
                let count = SUB_BLOCK.min(chunk_size - done) as usize;
                let mut acc = vec![0u8; count];
                let mut block = vec![0u8; count];
                for j in 1..set_size {
                    let absolute = (missing_index + j) % set_size;
                    if absolute == parity {
                        let file = xor_files[j].as_mut().unwrap_or_else(|| unreachable!());
                        let path = resolve(&surviving_xor_paths[j - 1]);
                        let n_read = read_reliable(&path, file, &mut block)?;
                        if n_read != count {
                            return Err(RedundancyError::Integrity {
                                path,
                                detail: "short read from parity payload".to_owned(),
                            });
                        }
                    } else {
                        read_pad_n(&mut streams[j], &mut block, data_offsets[j] + done)?;
                    }
                    xor_into(&mut acc, &block);
                }

                if parity == missing_index {
                    write_reliable(&missing_path, &mut missing_xor, &acc)?;
                } else {
                    write_pad_n(&mut streams[0], &acc, write_pos + done)?;
                }
                done += count as u64;
            }
            for j in 1..set_size {
                let absolute = (missing_index + j) % set_size;
                if absolute != parity {
                    data_offsets[j] += chunk_size;
                }
            }
            if parity != missing_index {
                write_pos += chunk_size;
            }
        }
        missing_xor.sync_all().map_err(|err| {
            RedundancyError::Io(fileio::FileIoError::File {
                path: missing_path.clone(),
                source: err,
            })
        })
    })();

    let missing_files: Vec<(PathBuf, Meta)> = missing_header
        .current
        .files
        .iter()
        .zip(&missing_relpaths)
        .map(|(meta, rel)| (PathBuf::from(rel.to_string()), meta.clone()))
        .collect();

    if let Err(err) = walk {
        drop(streams);
        remove_all(dataset_dir, &missing_files);
        let _ = unlink(&missing_path);
        return Err(err);
    }
    drop(streams);

    // verify sizes and CRCs, recording fresh CRCs where none were known
    let mut rebuilt_metas: Vec<Meta> = Vec::with_capacity(missing_files.len());
    for (rel, meta) in &missing_files {
        let full = dataset_dir.join(rel);
        let expect = meta.filesize().unwrap_or(0);
        let actual = file_size(&full);
        let mut meta = meta.clone();
        if actual != expect {
            remove_all(dataset_dir, &missing_files);
            let _ = unlink(&missing_path);
            return Err(RedundancyError::Integrity {
                path: full,
                detail: format!("rebuilt size {actual} != recorded {expect}"),
            });
        }
        let crc = crc32_file(&full)?;
        if let Some(expected_crc) = meta.crc32() {
            if crc != expected_crc {
                meta.set_complete(false);
                remove_all(dataset_dir, &missing_files);
                let _ = unlink(&missing_path);
                return Err(RedundancyError::Integrity {
                    path: full,
                    detail: format!("rebuilt crc {crc:#x} != recorded {expected_crc:#x}"),
                });
            }
        } else {
            meta.set_crc32(crc);
        }
        rebuilt_metas.push(meta);
    }

    // write the fresh rank-scoped file map next to the other shards
    let dataset_id = missing_header.dataset.id().unwrap_or(-1);
    let mut map = FileMap::new();
    map.set_dataset(dataset_id, missing_rank, &missing_header.dataset);
    for ((rel, _), meta) in missing_files.iter().zip(&rebuilt_metas) {
        let rel = rel.to_string_lossy().to_string();
        map.add_file(dataset_id, missing_rank, &rel);
        map.set_meta(dataset_id, missing_rank, &rel, meta);
    }

    let xor_rel = PathSeq::relative(&dataset_seq, &{
        let mut p = PathSeq::from(missing_path.as_path());
        p.reduce()
            .map_err(|e| RedundancyError::Geometry(e.to_string()))?;
        p
    })
    .map_or_else(|_| missing_xor_path.to_string_lossy().to_string(), |p| p.to_string());
    let mut xor_meta = Meta::new();
    xor_meta.set_orig_name(
        &missing_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    );
    xor_meta.set_kind(FileKind::Xor);
    xor_meta.set_filesize(file_size(&missing_path));
    xor_meta.set_ranks(missing_header.ranks);
    xor_meta.set_complete(true);
    xor_meta.set_crc32(crc32_file(&missing_path)?);
    map.add_file(dataset_id, missing_rank, &xor_rel);
    map.set_meta(dataset_id, missing_rank, &xor_rel, &xor_meta);

    map.set_expected_files(dataset_id, missing_rank, (missing_files.len() + 1) as i64);
    if let Some(desc) = &flushdesc {
        map.set_flushdesc(dataset_id, missing_rank, desc);
    }

    let map_dir = dataset_dir.join(".scr");
    mkdir_p(&map_dir)?;
    map.write(&map_dir.join(format!("{missing_rank}.scrfilemap")))?;

    tracing::info!(
        dataset = dataset_id,
        rank = missing_rank,
        files = missing_files.len(),
        "rebuilt missing XOR member"
    );
    Ok(())
}
