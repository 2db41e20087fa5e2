use std::fs::OpenOptions;
use std::path::Path;

use crate::error::FileIoResult;
use crate::fsutil::{open_retry, unlink};
use crate::rw::{read_reliable, write_reliable};

/// Copies `src` to `dst` through a caller-sized buffer.
///
/// When `with_crc` is set, the CRC32 of the copied bytes is computed in the
/// same pass and returned. A failed copy unlinks the partial destination so
/// a later scan never mistakes it for data.
pub fn copy_file(
    src: &Path,
    dst: &Path,
    buf_size: usize,
    with_crc: bool,
) -> FileIoResult<Option<u32>> {
    let mut reader = open_retry(src, OpenOptions::new().read(true))?;
    let mut writer = match open_retry(
        dst,
        OpenOptions::new().write(true).create(true).truncate(true),
    ) {
        Ok(file) => file,
        Err(err) => return Err(err),
    };

    let mut hasher = with_crc.then(crc32fast::Hasher::new);
    let mut buf = vec![0u8; buf_size.max(1)];

    let result = (|| -> FileIoResult<()> {
        loop {
            let n = read_reliable(src, &mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            if let Some(h) = hasher.as_mut() {
                h.update(&buf[..n]);
            }
            write_reliable(dst, &mut writer, &buf[..n])?;
            if n < buf.len() {
                break;
            }
        }
        writer.sync_all().map_err(|err| crate::FileIoError::File {
            path: dst.to_path_buf(),
            source: err,
        })
    })();

    match result {
        Ok(()) => Ok(hasher.map(crc32fast::Hasher::finalize)),
        Err(err) => {
            drop(writer);
            let _ = unlink(dst);
            Err(err)
        }
    }
}
