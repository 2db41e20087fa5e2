//! Broadcast helpers for the value types that cross rank boundaries.

use kvtree::KvTree;
use pathseq::PathSeq;

use crate::error::{CollectiveError, CollectiveResult};
use crate::group::ProcessGroup;

/// Broadcasts a path from `root`.
///
/// Non-root members must pass an empty path; on return every member holds
/// the root's path. The wire form is the string rendering, so component
/// boundaries survive exactly.
pub fn bcast_path<G: ProcessGroup>(
    group: &G,
    root: usize,
    path: &mut PathSeq,
) -> CollectiveResult<()> {
    let mut payload = if group.rank() == root {
        path.to_string().into_bytes()
    } else {
        Vec::new()
    };
    group.broadcast(root, &mut payload)?;
    if group.rank() != root {
        let text = String::from_utf8(payload)
            .map_err(|_| CollectiveError::Payload("path is not valid UTF-8".to_owned()))?;
        *path = PathSeq::from(text);
    }
    Ok(())
}

/// Broadcasts a tree from `root` using the binary pack.
///
/// Non-root members receive the root's tree merged into theirs; passing an
/// empty tree yields an exact copy.
pub fn bcast_tree<G: ProcessGroup>(
    group: &G,
    root: usize,
    tree: &mut KvTree,
) -> CollectiveResult<()> {
    let mut payload = if group.rank() == root {
        tree.pack_to_vec()
    } else {
        Vec::new()
    };
    group.broadcast(root, &mut payload)?;
    if group.rank() != root {
        let (unpacked, _) = KvTree::unpack(&payload)
            .map_err(|err| CollectiveError::Payload(err.to_string()))?;
        tree.merge(&unpacked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ThreadGroup;
    use std::thread;

    #[test]
    fn path_broadcast_round_trips() {
        let handles: Vec<_> = ThreadGroup::new_group(3)
            .into_iter()
            .map(|g| {
                thread::spawn(move || {
                    let mut path = if g.rank() == 0 {
                        PathSeq::from("/cache/rank0/dataset.4")
                    } else {
                        PathSeq::new()
                    };
                    bcast_path(&g, 0, &mut path).unwrap();
                    path.to_string()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), "/cache/rank0/dataset.4");
        }
    }

    #[test]
    fn tree_broadcast_round_trips() {
        let handles: Vec<_> = ThreadGroup::new_group(4)
            .into_iter()
            .map(|g| {
                thread::spawn(move || {
                    let mut tree = KvTree::new();
                    if g.rank() == 2 {
                        tree.set_int("ID", 9);
                        tree.set_kv("TYPE", "XOR");
                    }
                    bcast_tree(&g, 2, &mut tree).unwrap();
                    (tree.get_int("ID"), tree.get_str("TYPE").map(str::to_owned))
                })
            })
            .collect();
        for h in handles {
            let (id, ty) = h.join().unwrap();
            assert_eq!(id, Some(9));
            assert_eq!(ty.as_deref(), Some("XOR"));
        }
    }
}
