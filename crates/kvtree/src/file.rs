use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;

use fileio::{LockedFile, is_readable, open_retry, read_line, write_reliable};

use crate::error::{KvTreeError, KvTreeResult};
use crate::tree::KvTree;

/// Longest line accepted while parsing the framed text form.
const MAX_LINE: usize = 4096;

impl KvTree {
    /// Writes the framed text form of this tree to an open stream.
    pub fn write_fd<W: Write>(&self, path: &Path, writer: &mut W) -> KvTreeResult<u64> {
        let mut out = Vec::new();
        out.extend_from_slice(b"Start\n");
        self.write_text(&mut out);
        out.extend_from_slice(b"End\n");
        write_reliable(path, writer, &out)?;
        Ok(out.len() as u64)
    }

    fn write_text(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(format!("C:{}\n", self.len()).as_bytes());
        for (key, child) in self.iter() {
            out.extend_from_slice(key.as_bytes());
            out.push(b'\n');
            child.write_text(out);
        }
    }

    /// Writes the framed text form to `path`, truncating any existing file.
    pub fn write_file(&self, path: &Path) -> KvTreeResult<()> {
        let mut file = open_retry(
            path,
            OpenOptions::new().write(true).create(true).truncate(true),
        )?;
        self.write_fd(path, &mut file)?;
        file.sync_all().map_err(|err| {
            KvTreeError::Io(fileio::FileIoError::File {
                path: path.to_path_buf(),
                source: err,
            })
        })?;
        Ok(())
    }

    /// Reads the framed text form from an open stream, merging the contents
    /// into `self`.
    ///
    /// An immediately empty stream leaves `self` untouched and succeeds;
    /// a zero-byte file means "no data yet", not corruption.
    pub fn read_fd<R: Read>(&mut self, path: &Path, reader: &mut R) -> KvTreeResult<()> {
        let first = read_line(path, reader, MAX_LINE)?;
        if first.is_empty() {
            return Ok(());
        }
        if first != "Start\n" {
            return Err(KvTreeError::format(
                path.display().to_string(),
                "missing Start tag",
            ));
        }

        let mut parsed = KvTree::new();
        parsed.read_text(path, reader)?;

        let end = read_line(path, reader, MAX_LINE)?;
        if end != "End\n" {
            return Err(KvTreeError::format(
                path.display().to_string(),
                "missing End tag",
            ));
        }

        self.merge(&parsed);
        Ok(())
    }

    fn read_text<R: Read>(&mut self, path: &Path, reader: &mut R) -> KvTreeResult<()> {
        let count_line = read_line(path, reader, MAX_LINE)?;
        let count: usize = count_line
            .strip_prefix("C:")
            .and_then(|rest| rest.trim_end_matches('\n').parse().ok())
            .ok_or_else(|| {
                KvTreeError::format(
                    path.display().to_string(),
                    format!("bad count line {count_line:?}"),
                )
            })?;

        for _ in 0..count {
            let key_line = read_line(path, reader, MAX_LINE)?;
            let Some(key) = key_line.strip_suffix('\n') else {
                return Err(KvTreeError::format(
                    path.display().to_string(),
                    "unterminated key line",
                ));
            };
            let mut child = KvTree::new();
            child.read_text(path, reader)?;
            self.set(key, child);
        }
        Ok(())
    }

    /// Reads the tree stored at `path`, merging into `self`.
    ///
    /// A path that exists but is not readable yields
    /// [`KvTreeError::Unreadable`] without logging, so callers can treat it
    /// as absence.
    pub fn read_file(&mut self, path: &Path) -> KvTreeResult<()> {
        if !is_readable(path) {
            return Err(KvTreeError::Unreadable {
                path: path.to_path_buf(),
            });
        }
        let mut file = open_retry(path, OpenOptions::new().read(true))?;
        self.read_fd(path, &mut file)
    }

    /// Reads `path` under a shared advisory lock held for the whole read.
    pub fn read_file_locked(&mut self, path: &Path) -> KvTreeResult<()> {
        if !is_readable(path) {
            return Err(KvTreeError::Unreadable {
                path: path.to_path_buf(),
            });
        }
        let mut locked = LockedFile::open_read(path)?;
        self.read_fd(path, &mut locked)
    }

    /// Opens `path` under an exclusive lock and reads any existing contents
    /// into a fresh tree, returning both.
    ///
    /// Combined with [`KvTree::write_unlock`] this forms the
    /// read-modify-write cycle used for the shared prefix files: the lock is
    /// held across the whole update so concurrent writers serialize.
    pub fn lock_open_read(path: &Path) -> KvTreeResult<(LockedFile, KvTree)> {
        let mut locked = LockedFile::open_write(path)?;
        let mut tree = KvTree::new();
        tree.read_fd(path, &mut locked)?;
        Ok((locked, tree))
    }

    /// Rewinds the locked file, writes this tree, truncates the remainder,
    /// and releases the lock by dropping the descriptor.
    pub fn write_unlock(&self, mut locked: LockedFile) -> KvTreeResult<()> {
        locked.rewind()?;
        let path = locked.path().to_path_buf();
        let written = self.write_fd(&path, &mut locked)?;
        locked.truncate(written)?;
        locked.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KvTree {
        let mut t = KvTree::new();
        t.set_int("ID", 12);
        t.set_kv("TYPE", "XOR");
        let mut ranks = KvTree::new();
        ranks.set_kv_int("0", 2);
        ranks.set_kv_int("1", 3);
        t.set("RANK", ranks);
        t
    }

    #[test]
    fn text_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.scr");
        let t = sample();
        t.write_file(&path).unwrap();

        let mut back = KvTree::new();
        back.read_file(&path).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn text_frame_is_literal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.scr");
        let mut t = KvTree::new();
        t.set_kv("A", "B");
        t.write_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Start\nC:1\nA\nC:1\nB\nC:0\nEnd\n");
    }

    #[test]
    fn zero_byte_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.scr");
        std::fs::File::create(&path).unwrap();

        let mut t = KvTree::new();
        t.read_file(&path).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn missing_frame_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.scr");
        std::fs::write(&path, "C:0\n").unwrap();

        let mut t = KvTree::new();
        assert!(matches!(
            t.read_file(&path),
            Err(KvTreeError::Format { .. })
        ));
    }

    #[test]
    fn bad_count_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.scr");
        std::fs::write(&path, "Start\nX:1\nEnd\n").unwrap();

        let mut t = KvTree::new();
        assert!(matches!(
            t.read_file(&path),
            Err(KvTreeError::Format { .. })
        ));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = KvTree::new();
        assert!(matches!(
            t.read_file(&dir.path().join("absent.scr")),
            Err(KvTreeError::Unreadable { .. })
        ));
    }

    #[test]
    fn locked_read_modify_write_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.scr");

        let (lock, mut tree) = KvTree::lock_open_read(&path).unwrap();
        assert!(tree.is_empty());
        tree.set_int("GEN", 1);
        tree.write_unlock(lock).unwrap();

        let (lock, mut tree) = KvTree::lock_open_read(&path).unwrap();
        assert_eq!(tree.get_int("GEN"), Some(1));
        tree.set_int("GEN", 2);
        tree.write_unlock(lock).unwrap();

        let mut back = KvTree::new();
        back.read_file(&path).unwrap();
        assert_eq!(back.get_int("GEN"), Some(2));
    }

    #[test]
    fn shrinking_rewrite_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrink.scr");

        let mut big = KvTree::new();
        for i in 0..50 {
            big.set_kv_int("KEY", i);
        }
        big.write_file(&path).unwrap();

        let (lock, _) = KvTree::lock_open_read(&path).unwrap();
        let small = KvTree::new();
        small.write_unlock(lock).unwrap();

        let mut back = KvTree::new();
        back.read_file(&path).unwrap();
        assert!(back.is_empty());
    }
}
