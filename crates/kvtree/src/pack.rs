use crate::error::{KvTreeError, KvTreeResult};
use crate::tree::KvTree;

impl KvTree {
    /// Number of bytes [`KvTree::pack`] will produce for this tree.
    #[must_use]
    pub fn pack_size(&self) -> usize {
        let count = self.len().to_string();
        let mut size = count.len() + 1;
        for (key, child) in self.iter() {
            size += key.len() + 1;
            size += child.pack_size();
        }
        size
    }

    /// Appends the binary pack of this tree to `buf`.
    ///
    /// Layout: the child count as a NUL-terminated ASCII decimal, then per
    /// element the NUL-terminated key followed by the child's pack.
    pub fn pack(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.len().to_string().as_bytes());
        buf.push(0);
        for (key, child) in self.iter() {
            buf.extend_from_slice(key.as_bytes());
            buf.push(0);
            child.pack(buf);
        }
    }

    /// Packs the tree into a fresh buffer.
    #[must_use]
    pub fn pack_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.pack_size());
        self.pack(&mut buf);
        buf
    }

    /// Unpacks one tree from the front of `buf`, returning it together with
    /// the number of bytes consumed.
    pub fn unpack(buf: &[u8]) -> KvTreeResult<(KvTree, usize)> {
        let mut pos = 0;
        let tree = Self::unpack_at(buf, &mut pos)?;
        Ok((tree, pos))
    }

    fn unpack_at(buf: &[u8], pos: &mut usize) -> KvTreeResult<KvTree> {
        let count_str = take_cstr(buf, pos)?;
        let count: usize = count_str
            .parse()
            .map_err(|_| KvTreeError::format("pack", format!("bad element count {count_str:?}")))?;

        let mut tree = KvTree::new();
        for _ in 0..count {
            let key = take_cstr(buf, pos)?;
            let child = Self::unpack_at(buf, pos)?;
            tree.set(key, child);
        }
        Ok(tree)
    }
}

/// Reads a NUL-terminated UTF-8 string starting at `*pos`, advancing past
/// the terminator.
fn take_cstr(buf: &[u8], pos: &mut usize) -> KvTreeResult<String> {
    let rest = buf
        .get(*pos..)
        .ok_or_else(|| KvTreeError::format("pack", "truncated buffer"))?;
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| KvTreeError::format("pack", "missing NUL terminator"))?;
    let s = std::str::from_utf8(&rest[..nul])
        .map_err(|_| KvTreeError::format("pack", "key is not valid UTF-8"))?
        .to_owned();
    *pos += nul + 1;
    Ok(s)
}
