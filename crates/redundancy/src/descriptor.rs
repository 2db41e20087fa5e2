use kvtree::KvTree;

const KEY_TYPE: &str = "TYPE";
const KEY_GROUPS: &str = "GROUPS";
const KEY_GROUP_ID: &str = "GROUP_ID";
const KEY_GROUP_SIZE: &str = "GROUP_SIZE";
const KEY_GROUP_RANK: &str = "GROUP_RANK";
const KEY_SET_SIZE: &str = "SET_SIZE";

/// The redundancy scheme protecting a dataset in cache.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Scheme {
    /// Cache only; loss of the node loses the files.
    #[default]
    Single,
    /// Files are mirrored to the next member of the set.
    Partner,
    /// Members share an XOR parity fragment per set.
    Xor,
}

impl Scheme {
    /// Canonical name stored under `TYPE` and accepted from configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "SINGLE",
            Self::Partner => "PARTNER",
            Self::Xor => "XOR",
        }
    }

    /// Parses the canonical name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SINGLE" => Some(Self::Single),
            "PARTNER" => Some(Self::Partner),
            "XOR" => Some(Self::Xor),
            _ => None,
        }
    }
}

/// Description of how one rank's dataset copy is protected: the scheme plus
/// the rank's place within its redundancy set.
///
/// The descriptor is stored in the file map next to the files it covers, so
/// offline tooling can reconstruct the set geometry without the original
/// process group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    /// Scheme in effect.
    pub scheme: Scheme,
    /// Number of redundancy sets across the job.
    pub groups: i64,
    /// Which set this rank belongs to.
    pub group_id: i64,
    /// Number of members in this rank's set.
    pub group_size: i64,
    /// This rank's index within its set.
    pub group_rank: i64,
    /// Configured set size (may exceed `group_size` for remainder sets).
    pub set_size: i64,
}

impl Descriptor {
    /// Descriptor for a cache-only dataset.
    #[must_use]
    pub fn single() -> Self {
        Self {
            scheme: Scheme::Single,
            groups: 1,
            group_id: 0,
            group_size: 1,
            group_rank: 0,
            set_size: 1,
        }
    }

    /// Serializes to the tree form stored in file maps.
    #[must_use]
    pub fn to_tree(&self) -> KvTree {
        let mut t = KvTree::new();
        t.set_str(KEY_TYPE, self.scheme.as_str());
        t.set_int(KEY_GROUPS, self.groups);
        t.set_int(KEY_GROUP_ID, self.group_id);
        t.set_int(KEY_GROUP_SIZE, self.group_size);
        t.set_int(KEY_GROUP_RANK, self.group_rank);
        t.set_int(KEY_SET_SIZE, self.set_size);
        t
    }

    /// Reads the tree form back; `None` when any field is absent.
    #[must_use]
    pub fn from_tree(tree: &KvTree) -> Option<Self> {
        Some(Self {
            scheme: Scheme::parse(tree.get_str(KEY_TYPE)?)?,
            groups: tree.get_int(KEY_GROUPS)?,
            group_id: tree.get_int(KEY_GROUP_ID)?,
            group_size: tree.get_int(KEY_GROUP_SIZE)?,
            group_rank: tree.get_int(KEY_GROUP_RANK)?,
            set_size: tree.get_int(KEY_SET_SIZE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_round_trip() {
        let desc = Descriptor {
            scheme: Scheme::Xor,
            groups: 4,
            group_id: 2,
            group_size: 8,
            group_rank: 5,
            set_size: 8,
        };
        let tree = desc.to_tree();
        assert_eq!(Descriptor::from_tree(&tree), Some(desc));
    }

    #[test]
    fn scheme_names_round_trip() {
        for scheme in [Scheme::Single, Scheme::Partner, Scheme::Xor] {
            assert_eq!(Scheme::parse(scheme.as_str()), Some(scheme));
        }
        assert_eq!(Scheme::parse("RAID6"), None);
    }

    #[test]
    fn partial_tree_is_rejected() {
        let mut t = KvTree::new();
        t.set_str(KEY_TYPE, "XOR");
        assert_eq!(Descriptor::from_tree(&t), None);
    }
}
