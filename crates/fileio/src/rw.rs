use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use crate::error::{FileIoError, FileIoResult};

/// How many hard errors to tolerate before giving up on a read or write.
const RETRIES: u32 = 10;

/// Reads until `buf` is full or end of file, retrying transient errors.
///
/// Returns the number of bytes read; a count smaller than `buf.len()` means
/// the reader reached end of file.
pub fn read_reliable<R: Read>(path: &Path, reader: &mut R, buf: &mut [u8]) -> FileIoResult<usize> {
    let mut total = 0;
    let mut retries = RETRIES;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if is_transient(&err) => {}
            Err(err) => {
                retries -= 1;
                if retries == 0 {
                    return Err(FileIoError::File {
                        path: path.to_path_buf(),
                        source: err,
                    });
                }
                tracing::debug!(path = %path.display(), error = %err, "retrying read");
            }
        }
    }
    Ok(total)
}

/// Writes all of `buf`, retrying transient errors.
pub fn write_reliable<W: Write>(path: &Path, writer: &mut W, buf: &[u8]) -> FileIoResult<()> {
    let mut total = 0;
    let mut retries = RETRIES;
    while total < buf.len() {
        match writer.write(&buf[total..]) {
            Ok(0) => {
                return Err(FileIoError::ShortWrite {
                    path: path.to_path_buf(),
                    written: total as u64,
                    expected: buf.len() as u64,
                });
            }
            Ok(n) => total += n,
            Err(err) if is_transient(&err) => {}
            Err(err) => {
                retries -= 1;
                if retries == 0 {
                    return Err(FileIoError::File {
                        path: path.to_path_buf(),
                        source: err,
                    });
                }
                tracing::debug!(path = %path.display(), error = %err, "retrying write");
            }
        }
    }
    Ok(())
}

/// Reads one newline-terminated line into a `String`.
///
/// The trailing newline is included, matching the framed tree format where
/// the terminator is significant. An empty string means end of file.
pub fn read_line<R: Read>(path: &Path, reader: &mut R, max: usize) -> FileIoResult<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = read_reliable(path, reader, &mut byte)?;
        if n == 0 {
            break;
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= max {
            return Err(FileIoError::LineTooLong {
                path: path.to_path_buf(),
            });
        }
    }
    String::from_utf8(line).map_err(|_| FileIoError::File {
        path: path.to_path_buf(),
        source: std::io::Error::new(ErrorKind::InvalidData, "line is not valid UTF-8"),
    })
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_fills_buffer() {
        let mut src = Cursor::new(vec![7u8; 100]);
        let mut buf = [0u8; 64];
        let n = read_reliable(Path::new("mem"), &mut src, &mut buf).unwrap();
        assert_eq!(n, 64);
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[test]
    fn read_short_at_eof() {
        let mut src = Cursor::new(vec![1u8; 10]);
        let mut buf = [0u8; 64];
        let n = read_reliable(Path::new("mem"), &mut src, &mut buf).unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn line_includes_newline() {
        let mut src = Cursor::new(b"Start\nC:0\n".to_vec());
        let line = read_line(Path::new("mem"), &mut src, 1024).unwrap();
        assert_eq!(line, "Start\n");
        let line = read_line(Path::new("mem"), &mut src, 1024).unwrap();
        assert_eq!(line, "C:0\n");
        let line = read_line(Path::new("mem"), &mut src, 1024).unwrap();
        assert_eq!(line, "");
    }
}
