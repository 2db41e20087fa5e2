#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `kvtree` defines the recursive key-value tree that is the shared in-memory
//! and on-disk representation for all cache metadata: file maps, per-file
//! meta records, dataset descriptors, redundancy headers, the prefix index,
//! and summary shards are all trees.
//!
//! Every node of a [`KvTree`] is an ordered map from string keys to child
//! trees. Keys are unique within a node and keep insertion order until
//! [`KvTree::sort`] imposes one of the explicit orders; pack, text
//! serialization, and iteration all observe the current order.
//!
//! # Serialization
//!
//! Two canonical encodings exist:
//!
//! - a **binary pack** used to move trees over the collective layer: a tree
//!   is its child count as a NUL-terminated decimal string followed by the
//!   elements, each a NUL-terminated key followed by the child's pack;
//! - a **framed text form** used on disk: the file is framed by literal
//!   `Start` and `End` lines; a tree is a `C:<count>` line followed by, for
//!   each element, the key on its own line and then the child tree.
//!
//! A zero-byte file reads as an empty tree; that is how "no metadata yet"
//! is distinguished from corruption.
//!
//! # Examples
//!
//! ```
//! use kvtree::KvTree;
//!
//! let mut t = KvTree::new();
//! t.set_kv("TYPE", "XOR");
//! t.set_int("SET_SIZE", 8);
//! assert_eq!(t.get_str("TYPE"), Some("XOR"));
//! assert_eq!(t.get_int("SET_SIZE"), Some(8));
//!
//! let packed = t.pack_to_vec();
//! let (back, used) = KvTree::unpack(&packed).unwrap();
//! assert_eq!(used, packed.len());
//! assert_eq!(back, t);
//! ```

mod error;
mod file;
mod pack;
mod tree;

pub use error::{KvTreeError, KvTreeResult};
pub use tree::{KvTree, SortMode};
