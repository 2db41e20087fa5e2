use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use crate::error::{FileIoError, FileIoResult};
use crate::rw::{read_reliable, write_reliable};

/// One member of a padded logical stream: an open file with its declared
/// length.
///
/// The declared length, not the on-disk length, defines where this file ends
/// in the logical concatenation; the redundancy engine relies on that when a
/// file is being reconstructed and is still short.
#[derive(Debug)]
pub struct LogicalFile {
    /// Open descriptor positioned anywhere; padded I/O seeks as needed.
    pub file: File,
    /// Number of bytes this file contributes to the logical stream.
    pub len: u64,
    /// Path, for diagnostics.
    pub path: PathBuf,
}

impl LogicalFile {
    /// Wraps an open file with its logical length.
    pub fn new(file: File, len: u64, path: PathBuf) -> Self {
        Self { file, len, path }
    }
}

/// Reads `buf.len()` bytes at `offset` from the in-order concatenation of
/// `files`, zero-filling any bytes past the logical end.
pub fn read_pad_n(files: &mut [LogicalFile], buf: &mut [u8], offset: u64) -> FileIoResult<()> {
    let count = buf.len() as u64;

    // skip whole files that end at or before the requested offset
    let mut index = 0;
    let mut consumed = 0u64;
    while index < files.len() && consumed + files[index].len <= offset {
        consumed += files[index].len;
        index += 1;
    }

    let mut pos_in_file = offset - consumed;
    let mut filled = 0u64;
    while filled < count && index < files.len() {
        let member = &mut files[index];
        member
            .file
            .seek(SeekFrom::Start(pos_in_file))
            .map_err(|err| FileIoError::File {
                path: member.path.clone(),
                source: err,
            })?;

        let available = member.len - pos_in_file;
        let want = available.min(count - filled) as usize;
        let start = filled as usize;
        let n = read_reliable(&member.path, &mut member.file, &mut buf[start..start + want])?;
        if n < want {
            // file is shorter on disk than its declared length
            return Err(FileIoError::File {
                path: member.path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, file ended after {}", member.len, n),
                ),
            });
        }
        filled += want as u64;
        pos_in_file = 0;
        index += 1;
    }

    // zero-pad anything past the logical end
    if filled < count {
        buf[filled as usize..].fill(0);
    }
    Ok(())
}

/// Writes `buf` at `offset` into the in-order concatenation of `files`,
/// silently discarding bytes that land past the logical end.
pub fn write_pad_n(files: &mut [LogicalFile], buf: &[u8], offset: u64) -> FileIoResult<()> {
    let count = buf.len() as u64;

    let mut index = 0;
    let mut consumed = 0u64;
    while index < files.len() && consumed + files[index].len <= offset {
        consumed += files[index].len;
        index += 1;
    }

    let mut pos_in_file = offset - consumed;
    let mut written = 0u64;
    while written < count && index < files.len() {
        let member = &mut files[index];
        member
            .file
            .seek(SeekFrom::Start(pos_in_file))
            .map_err(|err| FileIoError::File {
                path: member.path.clone(),
                source: err,
            })?;

        let available = member.len - pos_in_file;
        let want = available.min(count - written) as usize;
        let start = written as usize;
        write_reliable(&member.path, &mut member.file, &buf[start..start + want])?;
        written += want as u64;
        pos_in_file = 0;
        index += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn open_logical(dir: &std::path::Path, name: &str, data: &[u8]) -> LogicalFile {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        LogicalFile::new(file, data.len() as u64, path)
    }

    #[test]
    fn read_spans_file_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = vec![
            open_logical(dir.path(), "a", b"abcd"),
            open_logical(dir.path(), "b", b"efgh"),
        ];
        let mut buf = [0u8; 6];
        read_pad_n(&mut files, &mut buf, 2).unwrap();
        assert_eq!(&buf, b"cdefgh");
    }

    #[test]
    fn read_past_end_is_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = vec![open_logical(dir.path(), "a", b"ab")];
        let mut buf = [0xFFu8; 5];
        read_pad_n(&mut files, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"ab\0\0\0");
    }

    #[test]
    fn read_entirely_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = vec![open_logical(dir.path(), "a", b"ab")];
        let mut buf = [0xFFu8; 3];
        read_pad_n(&mut files, &mut buf, 10).unwrap();
        assert_eq!(&buf, &[0, 0, 0]);
    }

    #[test]
    fn write_discards_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = vec![
            open_logical(dir.path(), "a", b"....."),
            open_logical(dir.path(), "b", b"..."),
        ];
        write_pad_n(&mut files, b"XYZWVUTSRQ", 3).unwrap();
        assert_eq!(std::fs::read(files[0].path.clone()).unwrap(), b"...XY");
        assert_eq!(std::fs::read(files[1].path.clone()).unwrap(), b"ZWV");
    }

    #[test]
    fn zero_length_member_is_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = vec![
            open_logical(dir.path(), "a", b""),
            open_logical(dir.path(), "b", b"xy"),
        ];
        let mut buf = [0u8; 2];
        read_pad_n(&mut files, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"xy");
    }
}
