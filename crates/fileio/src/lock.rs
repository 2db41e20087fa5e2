use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rustix::fs::{FlockOperation, flock};

use crate::error::{FileIoError, FileIoResult};
use crate::fsutil::open_retry;

/// An open file holding an advisory lock for its whole lifetime.
///
/// Readers take a shared lock, writers an exclusive lock. The lock is
/// released when the value drops, after which the descriptor closes. This is
/// the only way the prefix directory's shared files (`index.scr`, summary
/// shards) are ever opened for update.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: PathBuf,
}

impl LockedFile {
    /// Opens `path` read-only under a shared advisory lock, blocking until
    /// the lock is granted.
    pub fn open_read(path: &Path) -> FileIoResult<Self> {
        let file = open_retry(path, OpenOptions::new().read(true))?;
        flock(&file, FlockOperation::LockShared).map_err(|err| FileIoError::Lock {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Opens (creating if needed) `path` for read and write under an
    /// exclusive advisory lock, blocking until the lock is granted.
    pub fn open_write(path: &Path) -> FileIoResult<Self> {
        let file = open_retry(path, OpenOptions::new().read(true).write(true).create(true))?;
        flock(&file, FlockOperation::LockExclusive).map_err(|err| FileIoError::Lock {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path this lock was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewinds to the start of the file.
    pub fn rewind(&mut self) -> FileIoResult<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|err| FileIoError::File {
                path: self.path.clone(),
                source: err,
            })?;
        Ok(())
    }

    /// Truncates the file to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> FileIoResult<()> {
        self.file.set_len(len).map_err(|err| FileIoError::File {
            path: self.path.clone(),
            source: err,
        })
    }

    /// Flushes file contents to stable storage.
    pub fn sync(&mut self) -> FileIoResult<()> {
        self.file.sync_all().map_err(|err| FileIoError::File {
            path: self.path.clone(),
            source: err,
        })
    }
}

impl Read for LockedFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for LockedFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(err) = flock(&self.file, FlockOperation::Unlock) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release file lock");
        }
    }
}
