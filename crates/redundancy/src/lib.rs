#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `redundancy` encodes a rank's dataset files so the dataset survives node
//! loss, and rebuilds lost pieces afterwards. Three schemes exist:
//!
//! - `SINGLE`: cache only, no redundancy;
//! - `PARTNER`: each member's files are copied to the member on its right
//!   within the redundancy set, so one lost node is recovered by copying
//!   back from its partner;
//! - `XOR`: members hold parity fragments such that any single missing
//!   member's files (and its parity fragment) can be reconstructed from the
//!   `N-1` survivors.
//!
//! # The XOR traversal
//!
//! Every member's dataset files form one logical byte stream read through
//! the padded N-file primitives. With `N` members, chunk size `c`, and
//! `D = ceil(max_member_bytes / c)` data chunks per member, encoding walks
//! `R = ceil(D / (N-1))` rounds of `N` phases. In phase `p` the member whose
//! set index equals `p mod N` receives the parity of every other member's
//! next data chunk and appends it to its `.xor` file; everyone else advances
//! one chunk through its data stream. Decoding and offline rebuild walk the
//! identical schedule, which is what makes single-member recovery byte
//! exact for any chunk size and any mix of file sizes.
//!
//! Each `.xor` file starts with a [`XorHeader`]: a tree carrying the set
//! geometry, the chunk size, the dataset descriptor, the owner's file list,
//! and the left neighbor's file list. The headers of the `N-1` survivors
//! are sufficient to derive the missing member's header, which is how
//! [`xor::rebuild_offline`] starts from nothing but surviving files.

mod descriptor;
mod error;
mod header;
pub mod partner;
pub mod xor;

pub use descriptor::{Descriptor, Scheme};
pub use error::{RedundancyError, RedundancyResult};
pub use header::{MemberFiles, XorHeader, XOR_HEADER_VERSION};
pub use xor::{xor_file_name, parse_xor_file_name, XorSet};
