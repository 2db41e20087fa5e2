use kvtree::KvTree;

const KEY_ID: &str = "ID";
const KEY_USER: &str = "USER";
const KEY_JOBNAME: &str = "JOBNAME";
const KEY_NAME: &str = "NAME";
const KEY_SIZE: &str = "SIZE";
const KEY_FILES: &str = "FILES";
const KEY_CREATED: &str = "CREATED";
const KEY_JOBID: &str = "JOBID";
const KEY_CLUSTER: &str = "CLUSTER";
const KEY_CKPT: &str = "CKPT";
const KEY_COMPLETE: &str = "COMPLETE";
const KEY_FLAG_CKPT: &str = "FLAG_CKPT";
const KEY_FLAG_OUTPUT: &str = "FLAG_OUTPUT";

/// Which roles a dataset plays; every dataset is at least one of the two.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DatasetFlags {
    /// The dataset is restart-safe.
    pub checkpoint: bool,
    /// The dataset is application output that must reach the prefix
    /// directory.
    pub output: bool,
}

impl DatasetFlags {
    /// A checkpoint-only dataset.
    #[must_use]
    pub fn checkpoint() -> Self {
        Self {
            checkpoint: true,
            output: false,
        }
    }

    /// An output-only dataset.
    #[must_use]
    pub fn output() -> Self {
        Self {
            checkpoint: false,
            output: true,
        }
    }

    /// A dataset that is both checkpoint and output.
    #[must_use]
    pub fn both() -> Self {
        Self {
            checkpoint: true,
            output: true,
        }
    }
}

/// Descriptor for one dataset written collectively by the process group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Dataset {
    tree: KvTree,
}

impl Dataset {
    /// Creates an empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing tree as a descriptor.
    #[must_use]
    pub fn from_tree(tree: KvTree) -> Self {
        Self { tree }
    }

    /// Borrows the underlying tree.
    #[must_use]
    pub fn tree(&self) -> &KvTree {
        &self.tree
    }

    /// Consumes the descriptor, returning the tree.
    #[must_use]
    pub fn into_tree(self) -> KvTree {
        self.tree
    }

    /// Clears this descriptor and copies `other` into it.
    pub fn copy_from(&mut self, other: &Dataset) {
        self.tree.clear();
        self.tree.merge(&other.tree);
    }

    /// Sets the dataset id.
    pub fn set_id(&mut self, id: i64) {
        self.tree.set_int(KEY_ID, id);
    }

    /// Dataset id, if recorded.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.tree.get_int(KEY_ID)
    }

    /// Sets the user name that owns the job.
    pub fn set_user(&mut self, user: &str) {
        self.tree.set_str(KEY_USER, user);
    }

    /// Owning user, if recorded.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.tree.get_str(KEY_USER)
    }

    /// Sets the job name.
    pub fn set_jobname(&mut self, name: &str) {
        self.tree.set_str(KEY_JOBNAME, name);
    }

    /// Job name, if recorded.
    #[must_use]
    pub fn jobname(&self) -> Option<&str> {
        self.tree.get_str(KEY_JOBNAME)
    }

    /// Sets the user-visible dataset name.
    pub fn set_name(&mut self, name: &str) {
        self.tree.set_str(KEY_NAME, name);
    }

    /// User-visible dataset name, if recorded.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tree.get_str(KEY_NAME)
    }

    /// Sets the total dataset size in bytes.
    pub fn set_size(&mut self, size: u64) {
        self.tree.set_bytecount(KEY_SIZE, size);
    }

    /// Total dataset size, if recorded.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.tree.get_bytecount(KEY_SIZE)
    }

    /// Sets the logical file count across all ranks.
    pub fn set_files(&mut self, files: i64) {
        self.tree.set_int(KEY_FILES, files);
    }

    /// Logical file count, if recorded.
    #[must_use]
    pub fn files(&self) -> Option<i64> {
        self.tree.get_int(KEY_FILES)
    }

    /// Sets the creation time in microseconds since the epoch.
    pub fn set_created(&mut self, usecs: i64) {
        self.tree.set_int(KEY_CREATED, usecs);
    }

    /// Creation time in microseconds since the epoch, if recorded.
    #[must_use]
    pub fn created(&self) -> Option<i64> {
        self.tree.get_int(KEY_CREATED)
    }

    /// Sets the resource manager job id.
    pub fn set_jobid(&mut self, jobid: &str) {
        self.tree.set_str(KEY_JOBID, jobid);
    }

    /// Job id, if recorded.
    #[must_use]
    pub fn jobid(&self) -> Option<&str> {
        self.tree.get_str(KEY_JOBID)
    }

    /// Sets the cluster name.
    pub fn set_cluster(&mut self, name: &str) {
        self.tree.set_str(KEY_CLUSTER, name);
    }

    /// Cluster name, if recorded.
    #[must_use]
    pub fn cluster(&self) -> Option<&str> {
        self.tree.get_str(KEY_CLUSTER)
    }

    /// Sets the checkpoint index for checkpoint datasets.
    pub fn set_checkpoint(&mut self, ckpt: i64) {
        self.tree.set_int(KEY_CKPT, ckpt);
    }

    /// Checkpoint index, if recorded.
    #[must_use]
    pub fn checkpoint(&self) -> Option<i64> {
        self.tree.get_int(KEY_CKPT)
    }

    /// Marks the dataset complete or incomplete.
    pub fn set_complete(&mut self, complete: bool) {
        self.tree.set_int(KEY_COMPLETE, i64::from(complete));
    }

    /// True when the descriptor says the dataset completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tree.get_int(KEY_COMPLETE) == Some(1)
    }

    /// Records the checkpoint/output flags.
    pub fn set_flags(&mut self, flags: DatasetFlags) {
        self.tree.set_int(KEY_FLAG_CKPT, i64::from(flags.checkpoint));
        self.tree.set_int(KEY_FLAG_OUTPUT, i64::from(flags.output));
    }

    /// True when the dataset is restart-safe.
    #[must_use]
    pub fn is_ckpt(&self) -> bool {
        self.tree.get_int(KEY_FLAG_CKPT) == Some(1)
    }

    /// True when the dataset is application output.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.tree.get_int(KEY_FLAG_OUTPUT) == Some(1)
    }
}

impl From<KvTree> for Dataset {
    fn from(tree: KvTree) -> Self {
        Self::from_tree(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trip() {
        let mut d = Dataset::new();
        d.set_id(17);
        d.set_name("ckpt.17");
        d.set_flags(DatasetFlags::both());
        d.set_created(1_700_000_000_000_000);
        d.set_jobid("413921");
        d.set_cluster("quartz");
        d.set_checkpoint(17);
        d.set_files(128);
        d.set_size(1 << 30);

        assert_eq!(d.id(), Some(17));
        assert_eq!(d.name(), Some("ckpt.17"));
        assert!(d.is_ckpt());
        assert!(d.is_output());
        assert_eq!(d.checkpoint(), Some(17));
        assert_eq!(d.files(), Some(128));
        assert_eq!(d.size(), Some(1 << 30));
    }

    #[test]
    fn checkpoint_only_flags() {
        let mut d = Dataset::new();
        d.set_flags(DatasetFlags::checkpoint());
        assert!(d.is_ckpt());
        assert!(!d.is_output());
    }

    #[test]
    fn copy_replaces_contents() {
        let mut a = Dataset::new();
        a.set_id(1);
        let mut b = Dataset::new();
        b.set_id(2);
        b.set_name("old");
        b.copy_from(&a);
        assert_eq!(b.id(), Some(1));
        assert_eq!(b.name(), None);
    }
}
