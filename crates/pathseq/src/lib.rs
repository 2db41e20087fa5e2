#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `pathseq` is a path value type that stores a path as its list of
//! components rather than as a flat string. Splitting on `/` happens exactly
//! once, when a [`PathSeq`] is built from a string; from then on every
//! operation works on whole components, so slicing, reducing, and relative
//! path computation cannot be confused by doubled separators or embedded
//! `.`/`..` segments.
//!
//! A path is *absolute* when its first component is the empty string: the
//! root directory `/` is the two-component path `["", ""]`.
//!
//! # Examples
//!
//! ```
//! use pathseq::PathSeq;
//!
//! let mut p = PathSeq::from("/a//b/./c/..");
//! p.reduce().unwrap();
//! assert_eq!(p.to_string(), "/a/b");
//!
//! let rel = PathSeq::relative(&PathSeq::from("/a/b"), &PathSeq::from("/a/b/c/d")).unwrap();
//! assert_eq!(rel.to_string(), "c/d");
//! ```

use std::fmt;

use thiserror::Error;

/// Result type for path operations.
pub type PathSeqResult<T> = Result<T, PathSeqError>;

/// Errors raised by path operations.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PathSeqError {
    /// A `..` component tried to pop above the root directory.
    #[error("cannot pop past root directory while reducing {path:?}")]
    PopPastRoot {
        /// String form of the path being reduced.
        path: String,
    },

    /// An offset fell outside the path's components.
    #[error("offset {offset} out of range for path with {len} components")]
    OffsetOutOfRange {
        /// Requested offset (negative counts from the back).
        offset: isize,
        /// Number of components in the path.
        len: usize,
    },

    /// A relative path was requested to an empty destination.
    #[error("cannot compute a path from a non-empty source to an empty destination")]
    EmptyDestination,
}

/// A path held as a sequence of string components.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct PathSeq {
    components: Vec<String>,
}

impl PathSeq {
    /// Creates an empty path with zero components.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the path has no components at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Iterates over the components in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    /// Component at `index`, if present.
    #[must_use]
    pub fn component(&self, index: usize) -> Option<&str> {
        self.components.get(index).map(String::as_str)
    }

    /// True when the first component is the empty string.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.components.first().is_some_and(|c| c.is_empty())
    }

    /// Appends all components of `other`, consuming it.
    pub fn append(&mut self, other: Self) {
        self.components.extend(other.components);
    }

    /// Appends the components of a string.
    pub fn append_str(&mut self, s: &str) {
        self.append(Self::from(s));
    }

    /// Prepends all components of `other`, consuming it.
    pub fn prepend(&mut self, other: Self) {
        let mut components = other.components;
        components.append(&mut self.components);
        self.components = components;
    }

    /// Prepends the components of a string.
    pub fn prepend_str(&mut self, s: &str) {
        self.prepend(Self::from(s));
    }

    /// Inserts `other` so its first component lands at `offset`.
    ///
    /// `offset == 0` prepends, `offset == len()` appends.
    pub fn insert(&mut self, offset: usize, other: Self) -> PathSeqResult<()> {
        if offset > self.components.len() {
            return Err(PathSeqError::OffsetOutOfRange {
                offset: offset as isize,
                len: self.components.len(),
            });
        }
        self.components.splice(offset..offset, other.components);
        Ok(())
    }

    /// Drops the last component.
    pub fn dirname(&mut self) {
        self.components.pop();
    }

    /// Keeps only the last component.
    pub fn basename(&mut self) {
        if let Some(last) = self.components.pop() {
            self.components = vec![last];
        }
    }

    /// Resolves a possibly negative offset against the component count.
    fn resolve_offset(&self, offset: isize) -> PathSeqResult<usize> {
        let len = self.components.len() as isize;
        let resolved = if offset < 0 { len + offset } else { offset };
        if resolved < 0 || resolved > len {
            return Err(PathSeqError::OffsetOutOfRange {
                offset,
                len: self.components.len(),
            });
        }
        Ok(resolved as usize)
    }

    /// Keeps up to `length` components starting at `offset`, discarding the
    /// rest. A negative `offset` counts from the back; a negative `length`
    /// keeps the remainder.
    pub fn slice(&mut self, offset: isize, length: isize) -> PathSeqResult<()> {
        let start = self.resolve_offset(offset)?;
        let end = if length < 0 {
            self.components.len()
        } else {
            (start + length as usize).min(self.components.len())
        };
        self.components = self.components[start..end].to_vec();
        Ok(())
    }

    /// Returns a copy of up to `length` components starting at `offset`.
    pub fn sub(&self, offset: isize, length: isize) -> PathSeqResult<Self> {
        let mut copy = self.clone();
        copy.slice(offset, length)?;
        Ok(copy)
    }

    /// Chops the path at `offset` and returns the tail as a new path.
    pub fn cut(&mut self, offset: isize) -> PathSeqResult<Self> {
        let at = self.resolve_offset(offset)?;
        let tail = self.components.split_off(at);
        Ok(Self { components: tail })
    }

    /// Removes empty and `.` components and applies `..` with lookback.
    ///
    /// The head component may stay empty (that is what makes the path
    /// absolute), and a leading run of `..` is preserved. A `..` that would
    /// pop the root is an error.
    pub fn reduce(&mut self) -> PathSeqResult<()> {
        // back to front: drop "." and interior empty components
        let mut index = self.components.len();
        while index > 0 {
            index -= 1;
            let c = &self.components[index];
            if c == "." || (c.is_empty() && index != 0) {
                self.components.remove(index);
            }
        }

        // front to back: apply ".." against the previous component
        let mut index = 0;
        while index < self.components.len() {
            if self.components[index] == ".." && index > 0 {
                let prev = &self.components[index - 1];
                if prev == ".." {
                    // unpoppable prefix, keep walking
                    index += 1;
                } else if prev.is_empty() {
                    return Err(PathSeqError::PopPastRoot {
                        path: self.to_string(),
                    });
                } else {
                    self.components.drain(index - 1..=index);
                    index -= 1;
                }
            } else {
                index += 1;
            }
        }
        Ok(())
    }

    /// True when `child` lies strictly inside the tree rooted at `parent`.
    #[must_use]
    pub fn is_child(parent: &Self, child: &Self) -> bool {
        if parent.is_empty() || child.is_empty() {
            return false;
        }
        if child.len() <= parent.len() {
            return false;
        }
        parent
            .components
            .iter()
            .zip(&child.components)
            .all(|(p, c)| p == c)
    }

    /// Computes the path that leads from `src` to `dst`: one `..` for each
    /// component of `src` past the common prefix, then the remainder of
    /// `dst`.
    pub fn relative(src: &Self, dst: &Self) -> PathSeqResult<Self> {
        if !src.is_empty() && dst.is_empty() {
            return Err(PathSeqError::EmptyDestination);
        }

        let common = src
            .components
            .iter()
            .zip(&dst.components)
            .take_while(|(a, b)| a == b)
            .count();

        let mut rel = Self::new();
        for _ in common..src.components.len() {
            rel.components.push("..".to_owned());
        }
        for component in &dst.components[common..] {
            rel.components.push(component.clone());
        }
        Ok(rel)
    }
}

impl From<&str> for PathSeq {
    fn from(s: &str) -> Self {
        Self {
            components: s.split('/').map(str::to_owned).collect(),
        }
    }
}

impl From<String> for PathSeq {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<&std::path::Path> for PathSeq {
    fn from(p: &std::path::Path) -> Self {
        Self::from(p.to_string_lossy().as_ref())
    }
}

impl From<&PathSeq> for std::path::PathBuf {
    fn from(p: &PathSeq) -> Self {
        Self::from(p.to_string())
    }
}

impl fmt::Display for PathSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_splits_once() {
        let p = PathSeq::from("/a//b");
        assert_eq!(p.len(), 4);
        assert!(p.is_absolute());
        assert_eq!(p.to_string(), "/a//b");
    }

    #[test]
    fn root_is_two_empty_components() {
        let p = PathSeq::from("/");
        assert_eq!(p.len(), 2);
        assert!(p.is_absolute());
        assert_eq!(p.to_string(), "/");
    }

    #[test]
    fn reduce_removes_dot_empty_and_dotdot() {
        let mut p = PathSeq::from("/a//b/./c/..");
        p.reduce().unwrap();
        assert_eq!(p.to_string(), "/a/b");
    }

    #[test]
    fn reduce_keeps_leading_dotdot() {
        let mut p = PathSeq::from("..");
        p.reduce().unwrap();
        assert_eq!(p.to_string(), "..");

        let mut p = PathSeq::from("../../x");
        p.reduce().unwrap();
        assert_eq!(p.to_string(), "../../x");
    }

    #[test]
    fn reduce_to_empty() {
        let mut p = PathSeq::from("a/./..");
        p.reduce().unwrap();
        assert_eq!(p.to_string(), "");
        assert_eq!(p.len(), 0);
    }

    #[test]
    fn reduce_past_root_fails() {
        let mut p = PathSeq::from("/a/../..");
        assert!(matches!(
            p.reduce(),
            Err(PathSeqError::PopPastRoot { .. })
        ));
    }

    #[test]
    fn relative_of_nested_paths() {
        let rel = PathSeq::relative(&PathSeq::from("/a/b"), &PathSeq::from("/a/b/c/d")).unwrap();
        assert_eq!(rel.to_string(), "c/d");
    }

    #[test]
    fn relative_walks_up_and_down() {
        let rel = PathSeq::relative(&PathSeq::from("/a/b/x"), &PathSeq::from("/a/c")).unwrap();
        assert_eq!(rel.to_string(), "../../c");
    }

    #[test]
    fn relative_append_round_trip() {
        let a = PathSeq::from("/data/run1");
        let b = PathSeq::from("sub/file.dat");
        let mut joined = a.clone();
        joined.append(b.clone());
        let mut rel = PathSeq::relative(&a, &joined).unwrap();
        rel.reduce().unwrap();
        assert_eq!(rel, b);
    }

    #[test]
    fn slice_with_negative_offset() {
        let mut p = PathSeq::from("a/b/c/d");
        p.slice(-2, -1).unwrap();
        assert_eq!(p.to_string(), "c/d");
    }

    #[test]
    fn slice_with_length() {
        let mut p = PathSeq::from("a/b/c/d");
        p.slice(1, 2).unwrap();
        assert_eq!(p.to_string(), "b/c");
    }

    #[test]
    fn cut_returns_tail() {
        let mut p = PathSeq::from("a/b/c/d");
        let tail = p.cut(2).unwrap();
        assert_eq!(p.to_string(), "a/b");
        assert_eq!(tail.to_string(), "c/d");
    }

    #[test]
    fn dirname_and_basename() {
        let mut p = PathSeq::from("/a/b/c");
        p.dirname();
        assert_eq!(p.to_string(), "/a/b");

        let mut p = PathSeq::from("/a/b/c");
        p.basename();
        assert_eq!(p.to_string(), "c");
    }

    #[test]
    fn insert_at_offset() {
        let mut p = PathSeq::from("a/d");
        p.insert(1, PathSeq::from("b/c")).unwrap();
        assert_eq!(p.to_string(), "a/b/c/d");
    }

    #[test]
    fn is_child_checks_prefix() {
        let parent = PathSeq::from("/a/b");
        let child = PathSeq::from("/a/b/c");
        assert!(PathSeq::is_child(&parent, &child));
        assert!(!PathSeq::is_child(&child, &parent));
        assert!(!PathSeq::is_child(&parent, &parent.clone()));
        assert!(!PathSeq::is_child(&parent, &PathSeq::from("/a/x/c")));
    }

    #[test]
    fn relative_to_empty_destination_fails() {
        let err = PathSeq::relative(&PathSeq::from("a"), &PathSeq::new()).unwrap_err();
        assert_eq!(err, PathSeqError::EmptyDestination);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn component() -> impl Strategy<Value = String> {
            "[a-z][a-z0-9]{0,5}".prop_map(|s| s)
        }

        fn reduced_abs_path() -> impl Strategy<Value = PathSeq> {
            proptest::collection::vec(component(), 1..6).prop_map(|parts| {
                let mut p = PathSeq::from("");
                for part in parts {
                    p.append_str(&part);
                }
                p
            })
        }

        proptest! {
            #[test]
            fn string_round_trip(p in reduced_abs_path()) {
                let s = p.to_string();
                let back = PathSeq::from(s.as_str());
                prop_assert_eq!(back, p);
            }

            #[test]
            fn relative_then_append_recovers_dst(
                a in reduced_abs_path(),
                b in proptest::collection::vec(component(), 0..4),
            ) {
                let mut dst = a.clone();
                for part in &b {
                    dst.append_str(part);
                }
                let rel = PathSeq::relative(&a, &dst).unwrap();
                let mut joined = a.clone();
                joined.append(rel);
                joined.reduce().unwrap();
                let mut reduced_dst = dst.clone();
                reduced_dst.reduce().unwrap();
                prop_assert_eq!(joined, reduced_dst);
            }
        }
    }
}
