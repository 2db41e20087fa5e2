use std::fs::OpenOptions;
use std::path::Path;

use crate::error::FileIoResult;
use crate::fsutil::open_retry;
use crate::rw::read_reliable;

/// Block size for streaming CRC computation.
const CRC_BLOCK: usize = 1024 * 1024;

/// Computes the CRC32 (zlib polynomial) of an entire file, streaming it in
/// 1 MiB blocks.
pub fn crc32_file(path: &Path) -> FileIoResult<u32> {
    let mut file = open_retry(path, OpenOptions::new().read(true))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; CRC_BLOCK];
    loop {
        let n = read_reliable(path, &mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        if n < CRC_BLOCK {
            break;
        }
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn crc_of_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::File::create(&path).unwrap();
        assert_eq!(crc32_file(&path).unwrap(), 0);
    }

    #[test]
    fn crc_matches_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"123456789").unwrap();
        drop(f);
        // Standard check value for the zlib polynomial.
        assert_eq!(crc32_file(&path).unwrap(), 0xCBF4_3926);
    }

    #[test]
    fn crc_streams_across_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let data = vec![0xA5u8; CRC_BLOCK + 4096];
        std::fs::write(&path, &data).unwrap();
        let whole = crc32fast::hash(&data);
        assert_eq!(crc32_file(&path).unwrap(), whole);
    }
}
