use std::io::{Read, Write};
use std::path::Path;

use kvtree::KvTree;
use metadata::{Dataset, Meta};

use crate::error::{RedundancyError, RedundancyResult};

/// Header format version this build reads and writes. Anything else is
/// rejected; there is no migration path for older layouts.
pub const XOR_HEADER_VERSION: i64 = 3;

const KEY_VERSION: &str = "VERSION";
const KEY_RANKS: &str = "RANKS";
const KEY_SET: &str = "SET";
const KEY_CHUNK: &str = "CHUNK";
const KEY_DSET: &str = "DSET";
const KEY_CURRENT: &str = "CURRENT";
const KEY_PARTNER: &str = "PARTNER";
const KEY_RANK: &str = "RANK";
const KEY_FILES: &str = "FILES";
const KEY_FILE: &str = "FILE";

/// One member's contribution to a header: its global rank and the meta
/// records of its dataset files, in logical stream order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MemberFiles {
    /// Global rank of the member.
    pub rank: i64,
    /// Meta records for the member's files, in stream order.
    pub files: Vec<Meta>,
}

impl MemberFiles {
    /// Builds the member subtree.
    #[must_use]
    pub fn to_tree(&self) -> KvTree {
        let mut t = KvTree::new();
        t.set_int(KEY_RANK, self.rank);
        t.set_int(KEY_FILES, self.files.len() as i64);
        for (index, meta) in self.files.iter().enumerate() {
            let mut copy = KvTree::new();
            copy.merge(meta.tree());
            t.entry(KEY_FILE).set(index.to_string(), copy);
        }
        t
    }

    /// Parses a member subtree read from `path`.
    pub fn from_tree(tree: &KvTree, path: &Path) -> RedundancyResult<Self> {
        let rank = tree.get_int(KEY_RANK).ok_or(RedundancyError::HeaderField {
            path: path.to_path_buf(),
            field: "RANK",
        })?;
        let count = tree.get_int(KEY_FILES).ok_or(RedundancyError::HeaderField {
            path: path.to_path_buf(),
            field: "FILES",
        })?;
        let mut files = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let meta = tree
                .get_kv_int(KEY_FILE, index)
                .ok_or(RedundancyError::HeaderField {
                    path: path.to_path_buf(),
                    field: "FILE",
                })?;
            let mut copy = KvTree::new();
            copy.merge(meta);
            files.push(Meta::from_tree(copy));
        }
        Ok(Self { rank, files })
    }

    /// Total bytes of the member's logical stream.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().filter_map(Meta::filesize).sum()
    }
}

/// The tree written at the front of every `.xor` file, ahead of the parity
/// payload.
///
/// The header owns its `CURRENT` and `PARTNER` subtrees. Because each
/// member records its left neighbor's file list as `PARTNER`, the `N-1`
/// surviving headers of a set determine the missing member's header: see
/// [`XorHeader::derive_missing`].
#[derive(Clone, Debug, PartialEq)]
pub struct XorHeader {
    /// Size of the job's process group.
    pub ranks: i64,
    /// Number of members in this XOR set.
    pub set_size: i64,
    /// Chunk size used by the traversal, in bytes.
    pub chunk_size: u64,
    /// Dataset descriptor, identical across members of the set.
    pub dataset: Dataset,
    /// This member's global rank and file list.
    pub current: MemberFiles,
    /// The left neighbor's global rank and file list.
    pub partner: MemberFiles,
}

impl XorHeader {
    /// Serializes the header tree.
    #[must_use]
    pub fn to_tree(&self) -> KvTree {
        let mut t = KvTree::new();
        t.set_int(KEY_VERSION, XOR_HEADER_VERSION);
        t.set_int(KEY_RANKS, self.ranks);
        t.set_int(KEY_SET, self.set_size);
        t.set_bytecount(KEY_CHUNK, self.chunk_size);
        let mut dset = KvTree::new();
        dset.merge(self.dataset.tree());
        t.set(KEY_DSET, dset);
        t.set(KEY_CURRENT, self.current.to_tree());
        t.set(KEY_PARTNER, self.partner.to_tree());
        t
    }

    /// Parses a header tree read from `path`.
    pub fn from_tree(tree: &KvTree, path: &Path) -> RedundancyResult<Self> {
        let version = tree
            .get_int(KEY_VERSION)
            .ok_or(RedundancyError::HeaderField {
                path: path.to_path_buf(),
                field: "VERSION",
            })?;
        if version != XOR_HEADER_VERSION {
            return Err(RedundancyError::HeaderVersion {
                found: version,
                path: path.to_path_buf(),
            });
        }

        let field = |name: &'static str| RedundancyError::HeaderField {
            path: path.to_path_buf(),
            field: name,
        };

        let mut dataset_tree = KvTree::new();
        dataset_tree.merge(tree.get(KEY_DSET).ok_or_else(|| field("DSET"))?);

        Ok(Self {
            ranks: tree.get_int(KEY_RANKS).ok_or_else(|| field("RANKS"))?,
            set_size: tree.get_int(KEY_SET).ok_or_else(|| field("SET"))?,
            chunk_size: tree.get_bytecount(KEY_CHUNK).ok_or_else(|| field("CHUNK"))?,
            dataset: Dataset::from_tree(dataset_tree),
            current: MemberFiles::from_tree(
                tree.get(KEY_CURRENT).ok_or_else(|| field("CURRENT"))?,
                path,
            )?,
            partner: MemberFiles::from_tree(
                tree.get(KEY_PARTNER).ok_or_else(|| field("PARTNER"))?,
                path,
            )?,
        })
    }

    /// Writes the header to the front of an open `.xor` file; the parity
    /// payload follows immediately after the frame.
    pub fn write_to<W: Write>(&self, path: &Path, writer: &mut W) -> RedundancyResult<()> {
        self.to_tree().write_fd(path, writer)?;
        Ok(())
    }

    /// Reads the header from the front of an open `.xor` file, leaving the
    /// stream positioned at the first parity byte.
    pub fn read_from<R: Read>(path: &Path, reader: &mut R) -> RedundancyResult<Self> {
        let mut tree = KvTree::new();
        tree.read_fd(path, reader)?;
        Self::from_tree(&tree, path)
    }

    /// Derives the missing member's header from its neighbors' headers:
    /// the missing member's own file list is its right neighbor's
    /// `PARTNER`; its partner list is its left neighbor's `CURRENT`.
    #[must_use]
    pub fn derive_missing(right: &XorHeader, left: &XorHeader) -> XorHeader {
        XorHeader {
            ranks: right.ranks,
            set_size: right.set_size,
            chunk_size: right.chunk_size,
            dataset: right.dataset.clone(),
            current: right.partner.clone(),
            partner: left.current.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::FileKind;

    fn meta(name: &str, size: u64) -> Meta {
        let mut m = Meta::new();
        m.set_orig(name);
        m.set_orig_name(name);
        m.set_filesize(size);
        m.set_kind(FileKind::User);
        m.set_complete(true);
        m
    }

    fn header(rank: i64) -> XorHeader {
        let mut dataset = Dataset::new();
        dataset.set_id(4);
        dataset.set_name("ckpt.4");
        XorHeader {
            ranks: 8,
            set_size: 4,
            chunk_size: 1024,
            dataset,
            current: MemberFiles {
                rank,
                files: vec![meta("a.dat", 100), meta("b.dat", 50)],
            },
            partner: MemberFiles {
                rank: rank - 1,
                files: vec![meta("c.dat", 10)],
            },
        }
    }

    #[test]
    fn tree_round_trip() {
        let h = header(3);
        let tree = h.to_tree();
        let back = XorHeader::from_tree(&tree, Path::new("test.xor")).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn stream_round_trip_leaves_position_at_payload() {
        let h = header(2);
        let mut buf = Vec::new();
        h.write_to(Path::new("mem"), &mut buf).unwrap();
        buf.extend_from_slice(b"PAYLOAD");

        let mut cursor = std::io::Cursor::new(buf);
        let back = XorHeader::read_from(Path::new("mem"), &mut cursor).unwrap();
        assert_eq!(back, h);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"PAYLOAD");
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut tree = header(1).to_tree();
        tree.set_int(KEY_VERSION, 2);
        assert!(matches!(
            XorHeader::from_tree(&tree, Path::new("old.xor")),
            Err(RedundancyError::HeaderVersion { found: 2, .. })
        ));
    }

    #[test]
    fn derive_missing_swaps_neighbor_lists() {
        // set of 3: member 1 is missing; right neighbor is 2, left is 0
        let h0 = header(0);
        let h2 = header(2);
        let missing = XorHeader::derive_missing(&h2, &h0);
        assert_eq!(missing.current, h2.partner);
        assert_eq!(missing.partner, h0.current);
        assert_eq!(missing.chunk_size, h2.chunk_size);
    }

    #[test]
    fn total_bytes_sums_file_sizes() {
        assert_eq!(header(0).current.total_bytes(), 150);
    }
}
