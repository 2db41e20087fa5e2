use indexmap::IndexMap;

/// Orderings that [`KvTree::sort`] can impose on a node's children.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortMode {
    /// Keys as strings, ascending.
    AscendingStr,
    /// Keys as strings, descending.
    DescendingStr,
    /// Keys parsed as integers, ascending; unparsable keys sort first.
    AscendingInt,
    /// Keys parsed as integers, descending; unparsable keys sort last.
    DescendingInt,
}

/// A recursive ordered map from string keys to child trees.
///
/// A leaf value is represented as a key whose child tree is empty, so the
/// pair `("SIZE", "1024")` is the two-level tree `SIZE -> 1024 -> {}`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KvTree {
    children: IndexMap<String, KvTree>,
}

impl KvTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of immediate children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// True when the node has no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Iterates over `(key, child)` pairs in the current order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &KvTree)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over keys in the current order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// First key of this node, if any.
    #[must_use]
    pub fn first_key(&self) -> Option<&str> {
        self.children.keys().next().map(String::as_str)
    }

    /// Child for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&KvTree> {
        self.children.get(key)
    }

    /// Mutable child for `key`, if present.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut KvTree> {
        self.children.get_mut(key)
    }

    /// Sets (or replaces) the child for `key` and returns a reference to it.
    pub fn set(&mut self, key: impl Into<String>, value: KvTree) -> &mut KvTree {
        let key = key.into();
        self.children.insert(key.clone(), value);
        self.children.get_mut(&key).unwrap_or_else(|| unreachable!())
    }

    /// Returns the child for `key`, creating an empty one if absent.
    pub fn entry(&mut self, key: impl Into<String>) -> &mut KvTree {
        self.children.entry(key.into()).or_default()
    }

    /// Removes the child for `key`. Removing an absent key is a no-op.
    pub fn unset(&mut self, key: &str) {
        self.children.shift_remove(key);
    }

    /// Removes every child.
    pub fn clear(&mut self) {
        self.children.clear();
    }

    /// Deep-merges `other` into `self`.
    ///
    /// Keys absent from `self` are created; keys present in both are merged
    /// recursively. Leaves collapse: merging `a -> b` into a tree that
    /// already holds `a -> b` changes nothing.
    pub fn merge(&mut self, other: &KvTree) {
        for (key, child) in &other.children {
            self.entry(key.clone()).merge(child);
        }
    }

    /// Shorthand for the two-level `key -> value` pattern; returns the value
    /// node, creating both levels as needed.
    pub fn set_kv(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut KvTree {
        self.entry(key).entry(value)
    }

    /// [`KvTree::set_kv`] with an integer value.
    pub fn set_kv_int(&mut self, key: impl Into<String>, value: i64) -> &mut KvTree {
        self.set_kv(key, value.to_string())
    }

    /// Value node under `key -> value`, if both levels exist.
    #[must_use]
    pub fn get_kv(&self, key: &str, value: &str) -> Option<&KvTree> {
        self.get(key)?.get(value)
    }

    /// [`KvTree::get_kv`] with an integer value.
    #[must_use]
    pub fn get_kv_int(&self, key: &str, value: i64) -> Option<&KvTree> {
        self.get_kv(key, &value.to_string())
    }

    /// Mutable value node under `key -> value`.
    pub fn get_kv_mut(&mut self, key: &str, value: &str) -> Option<&mut KvTree> {
        self.get_mut(key)?.get_mut(value)
    }

    /// Removes `value` under `key`; when that leaves `key` empty, removes
    /// `key` as well.
    pub fn unset_kv(&mut self, key: &str, value: &str) {
        if let Some(node) = self.get_mut(key) {
            node.unset(value);
            if node.is_empty() {
                self.unset(key);
            }
        }
    }

    /// [`KvTree::unset_kv`] with an integer value.
    pub fn unset_kv_int(&mut self, key: &str, value: i64) {
        self.unset_kv(key, &value.to_string());
    }

    /// First value key under `key`, treating `key -> value` as a pair.
    #[must_use]
    pub fn first_value(&self, key: &str) -> Option<&str> {
        self.get(key)?.first_key()
    }

    /// Walks a sequence of keys, creating intermediate nodes, and sets the
    /// final key's child to `value`; returns the node that was set.
    ///
    /// This is the multi-key path setter: `set_at(["RANK", "0", "DSET"], t)`
    /// builds `RANK/0/DSET -> t`.
    pub fn set_at<I, S>(&mut self, keys: I, value: KvTree) -> &mut KvTree
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let mut node = self;
        let last = keys.len().saturating_sub(1);
        for (index, key) in keys.into_iter().enumerate() {
            if index == last {
                return node.set(key, value);
            }
            node = node.entry(key);
        }
        node
    }

    /// Walks a sequence of keys; `None` when any level is missing.
    #[must_use]
    pub fn get_at<'a, I, S>(&'a self, keys: I) -> Option<&'a KvTree>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut node = self;
        for key in keys {
            node = node.get(key.as_ref())?;
        }
        Some(node)
    }

    /// Removes the node named by a sequence of keys, if present.
    pub fn unset_at<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_owned()).collect();
        let Some((last, parents)) = keys.split_last() else {
            return;
        };
        let mut node = self;
        for key in parents {
            match node.get_mut(key) {
                Some(next) => node = next,
                None => return,
            }
        }
        node.unset(last);
    }

    /// Replaces any prior value under `key` with a single integer value.
    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        let key = key.into();
        self.unset(&key);
        self.set_kv_int(key, value);
    }

    /// Integer value under `key`, when present and parsable.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.first_value(key)?.parse().ok()
    }

    /// Replaces any prior value under `key` with a byte count.
    pub fn set_bytecount(&mut self, key: impl Into<String>, value: u64) {
        let key = key.into();
        self.unset(&key);
        self.set_kv(key, value.to_string());
    }

    /// Byte count under `key`, when present and parsable.
    #[must_use]
    pub fn get_bytecount(&self, key: &str) -> Option<u64> {
        self.first_value(key)?.parse().ok()
    }

    /// Replaces any prior value under `key` with a string value.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.unset(&key);
        self.set_kv(key, value);
    }

    /// String value under `key`.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.first_value(key)
    }

    /// Replaces any prior value under `key` with a CRC32 in hex form.
    pub fn set_crc32(&mut self, key: impl Into<String>, crc: u32) {
        let key = key.into();
        self.unset(&key);
        self.set_kv(key, format!("{crc:#x}"));
    }

    /// CRC32 under `key`, accepting the canonical `0x` hex form.
    #[must_use]
    pub fn get_crc32(&self, key: &str) -> Option<u32> {
        let text = self.first_value(key)?;
        let hex = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
        u32::from_str_radix(hex, 16).ok()
    }

    /// Reorders this node's children in place.
    pub fn sort(&mut self, mode: SortMode) {
        match mode {
            SortMode::AscendingStr => self.children.sort_by(|a, _, b, _| a.cmp(b)),
            SortMode::DescendingStr => self.children.sort_by(|a, _, b, _| b.cmp(a)),
            SortMode::AscendingInt => self
                .children
                .sort_by(|a, _, b, _| int_key(a).cmp(&int_key(b))),
            SortMode::DescendingInt => self
                .children
                .sort_by(|a, _, b, _| int_key(b).cmp(&int_key(a))),
        }
    }
}

fn int_key(key: &str) -> i64 {
    key.parse().unwrap_or(i64::MIN)
}

impl<'a> IntoIterator for &'a KvTree {
    type Item = (&'a str, &'a KvTree);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a KvTree)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
