use std::fs::{File, OpenOptions};
use std::path::Path;
use std::thread;
use std::time::Duration;

use rustix::fs::{Access, access};

use crate::error::{FileIoError, FileIoResult};

/// Attempts to open a file a few times before giving up.
///
/// Node-local stores occasionally refuse opens while a mount settles after a
/// failure, so a failed open is retried with a short pause.
pub fn open_retry(path: &Path, options: &OpenOptions) -> FileIoResult<File> {
    const TRIES: u32 = 5;
    const PAUSE: Duration = Duration::from_millis(100);

    let mut last = match options.open(path) {
        Ok(file) => return Ok(file),
        Err(err) => err,
    };
    tracing::debug!(path = %path.display(), error = %last, "open failed, retrying");
    for _ in 1..TRIES {
        thread::sleep(PAUSE);
        match options.open(path) {
            Ok(file) => return Ok(file),
            Err(err) => last = err,
        }
    }
    Err(FileIoError::Open {
        path: path.to_path_buf(),
        source: last,
    })
}

/// Returns the size of the named file in bytes, or 0 if it cannot be stat'd.
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map_or(0, |m| m.len())
}

/// Tests whether the file or directory exists.
pub fn path_exists(path: &Path) -> bool {
    access(path, Access::EXISTS).is_ok()
}

/// Tests whether the file or directory is readable.
pub fn is_readable(path: &Path) -> bool {
    access(path, Access::READ_OK).is_ok()
}

/// Tests whether the file or directory is writable.
pub fn is_writable(path: &Path) -> bool {
    access(path, Access::WRITE_OK).is_ok()
}

/// Deletes a file, logging rather than failing when it is already gone.
pub fn unlink(path: &Path) -> FileIoResult<()> {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() == std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), "unlink of missing file");
            return Ok(());
        }
        return Err(FileIoError::File {
            path: path.to_path_buf(),
            source: err,
        });
    }
    Ok(())
}

/// Removes an empty directory.
pub fn rmdir(path: &Path) -> FileIoResult<()> {
    std::fs::remove_dir(path).map_err(|err| FileIoError::File {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Recursively creates a directory and any missing parents.
pub fn mkdir_p(path: &Path) -> FileIoResult<()> {
    std::fs::create_dir_all(path).map_err(|err| FileIoError::CreateDir {
        path: path.to_path_buf(),
        source: err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_of_missing_file_is_zero() {
        assert_eq!(file_size(Path::new("/no/such/file")), 0);
    }

    #[test]
    fn mkdir_p_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        mkdir_p(&nested).unwrap();
        mkdir_p(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn unlink_missing_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        unlink(&dir.path().join("gone")).unwrap();
    }
}
