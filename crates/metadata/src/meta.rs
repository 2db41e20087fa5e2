use kvtree::KvTree;

const KEY_CKPT: &str = "CKPT";
const KEY_RANK: &str = "RANK";
const KEY_RANKS: &str = "RANKS";
const KEY_ORIG: &str = "ORIG";
const KEY_PATH: &str = "PATH";
const KEY_NAME: &str = "NAME";
const KEY_SIZE: &str = "SIZE";
const KEY_TYPE: &str = "TYPE";
const KEY_COMPLETE: &str = "COMPLETE";
const KEY_CRC: &str = "CRC";

/// What kind of file a [`Meta`] record describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// A file the application wrote.
    User,
    /// An XOR parity fragment.
    Xor,
    /// A partner copy of another rank's file.
    Partner,
}

impl FileKind {
    /// Canonical key string stored under `TYPE`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Xor => "XOR",
            Self::Partner => "PARTNER",
        }
    }

    /// Parses the canonical key string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "XOR" => Some(Self::Xor),
            "PARTNER" => Some(Self::Partner),
            _ => None,
        }
    }
}

/// Metadata for one file written by one rank.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Meta {
    tree: KvTree,
}

impl Meta {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing tree as a record.
    #[must_use]
    pub fn from_tree(tree: KvTree) -> Self {
        Self { tree }
    }

    /// Borrows the underlying tree.
    #[must_use]
    pub fn tree(&self) -> &KvTree {
        &self.tree
    }

    /// Consumes the record, returning the tree.
    #[must_use]
    pub fn into_tree(self) -> KvTree {
        self.tree
    }

    /// Clears this record and copies `other` into it.
    pub fn copy_from(&mut self, other: &Meta) {
        self.tree.clear();
        self.tree.merge(&other.tree);
    }

    /// Sets the checkpoint id.
    pub fn set_checkpoint(&mut self, ckpt: i64) {
        self.tree.set_int(KEY_CKPT, ckpt);
    }

    /// Checkpoint id, if recorded.
    #[must_use]
    pub fn checkpoint(&self) -> Option<i64> {
        self.tree.get_int(KEY_CKPT)
    }

    /// Sets the rank that wrote the file.
    pub fn set_rank(&mut self, rank: i64) {
        self.tree.set_int(KEY_RANK, rank);
    }

    /// Rank that wrote the file, if recorded.
    #[must_use]
    pub fn rank(&self) -> Option<i64> {
        self.tree.get_int(KEY_RANK)
    }

    /// Sets the size of the process group that wrote the dataset.
    pub fn set_ranks(&mut self, ranks: i64) {
        self.tree.set_int(KEY_RANKS, ranks);
    }

    /// Process group size, if recorded.
    #[must_use]
    pub fn ranks(&self) -> Option<i64> {
        self.tree.get_int(KEY_RANKS)
    }

    /// Sets the user-visible filename the application asked for.
    pub fn set_orig(&mut self, file: &str) {
        self.tree.set_str(KEY_ORIG, file);
    }

    /// User-visible filename, if recorded.
    #[must_use]
    pub fn orig(&self) -> Option<&str> {
        self.tree.get_str(KEY_ORIG)
    }

    /// Sets the absolute directory the original file lived in.
    pub fn set_orig_path(&mut self, path: &str) {
        self.tree.set_str(KEY_PATH, path);
    }

    /// Original directory, if recorded.
    #[must_use]
    pub fn orig_path(&self) -> Option<&str> {
        self.tree.get_str(KEY_PATH)
    }

    /// Sets the basename of the original file.
    pub fn set_orig_name(&mut self, name: &str) {
        self.tree.set_str(KEY_NAME, name);
    }

    /// Original basename, if recorded.
    #[must_use]
    pub fn orig_name(&self) -> Option<&str> {
        self.tree.get_str(KEY_NAME)
    }

    /// Sets the file size in bytes.
    pub fn set_filesize(&mut self, size: u64) {
        self.tree.set_bytecount(KEY_SIZE, size);
    }

    /// File size in bytes, if recorded.
    #[must_use]
    pub fn filesize(&self) -> Option<u64> {
        self.tree.get_bytecount(KEY_SIZE)
    }

    /// Sets the file kind.
    pub fn set_kind(&mut self, kind: FileKind) {
        self.tree.set_str(KEY_TYPE, kind.as_str());
    }

    /// File kind, if recorded and recognized.
    #[must_use]
    pub fn kind(&self) -> Option<FileKind> {
        self.tree.get_str(KEY_TYPE).and_then(FileKind::parse)
    }

    /// Marks the file complete or incomplete.
    pub fn set_complete(&mut self, complete: bool) {
        self.tree.set_int(KEY_COMPLETE, i64::from(complete));
    }

    /// True when the record says the file was completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tree.get_int(KEY_COMPLETE) == Some(1)
    }

    /// Records the file's CRC32.
    pub fn set_crc32(&mut self, crc: u32) {
        self.tree.set_crc32(KEY_CRC, crc);
    }

    /// CRC32, if recorded.
    #[must_use]
    pub fn crc32(&self) -> Option<u32> {
        self.tree.get_crc32(KEY_CRC)
    }

    /// True when `RANK` is recorded and equals `rank`.
    #[must_use]
    pub fn check_rank(&self, rank: i64) -> bool {
        self.rank() == Some(rank)
    }

    /// True when `RANKS` is recorded and equals `ranks`.
    #[must_use]
    pub fn check_ranks(&self, ranks: i64) -> bool {
        self.ranks() == Some(ranks)
    }

    /// True when `SIZE` is recorded and equals `size`.
    #[must_use]
    pub fn check_filesize(&self, size: u64) -> bool {
        self.filesize() == Some(size)
    }

    /// True when `TYPE` is recorded and equals `kind`.
    #[must_use]
    pub fn check_kind(&self, kind: FileKind) -> bool {
        self.kind() == Some(kind)
    }
}

impl From<KvTree> for Meta {
    fn from(tree: KvTree) -> Self {
        Self::from_tree(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_fields_round_trip() {
        let mut m = Meta::new();
        m.set_rank(3);
        m.set_ranks(64);
        m.set_filesize(4096);
        m.set_kind(FileKind::User);
        m.set_complete(true);
        m.set_crc32(0x1234_5678);
        m.set_orig("ckpt.7.dat");
        m.set_orig_path("/work/run");
        m.set_orig_name("ckpt.7.dat");

        assert_eq!(m.rank(), Some(3));
        assert_eq!(m.ranks(), Some(64));
        assert_eq!(m.filesize(), Some(4096));
        assert_eq!(m.kind(), Some(FileKind::User));
        assert!(m.is_complete());
        assert_eq!(m.crc32(), Some(0x1234_5678));
        assert_eq!(m.orig(), Some("ckpt.7.dat"));
        assert!(m.check_filesize(4096));
        assert!(!m.check_filesize(4097));
    }

    #[test]
    fn set_replaces_prior_value() {
        let mut m = Meta::new();
        m.set_filesize(1);
        m.set_filesize(2);
        assert_eq!(m.filesize(), Some(2));
        assert_eq!(m.tree().get(KEY_SIZE).unwrap().len(), 1);
    }

    #[test]
    fn copy_clears_destination() {
        let mut a = Meta::new();
        a.set_rank(1);
        a.set_kind(FileKind::Xor);

        let mut b = Meta::new();
        b.set_rank(2);
        b.copy_from(&a);

        assert_eq!(b.rank(), Some(1));
        assert_eq!(b.kind(), Some(FileKind::Xor));
    }

    #[test]
    fn incomplete_until_marked() {
        let m = Meta::new();
        assert!(!m.is_complete());

        let mut m = Meta::new();
        m.set_complete(false);
        assert!(!m.is_complete());
    }
}
