#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `fileio` provides the low-level file primitives the cache layer is built
//! on: reliable reads and writes that retry across interrupts, advisory file
//! locks held for the lifetime of an open descriptor, streamed CRC32, file
//! copy with integrity checking, and the padded N-file stream that lets the
//! redundancy engine treat a rank's dataset files as one logical byte
//! sequence.
//!
//! # Invariants
//!
//! - [`read_reliable`] and [`write_reliable`] never return short counts for
//!   transient errors; a short read means end of file.
//! - A [`LockedFile`] holds its advisory lock from open to drop; dropping
//!   releases the lock before the descriptor closes.
//! - [`read_pad_n`] zero-fills any bytes requested beyond the logical length;
//!   [`write_pad_n`] silently discards bytes written beyond it.
//!
//! # Errors
//!
//! All operations return [`FileIoError`], which preserves the offending path
//! where one is known. Transient conditions (`EINTR`, `EAGAIN`) are retried
//! internally and never surface.

mod copy;
mod crc;
mod error;
mod fsutil;
mod lock;
mod padded;
mod rw;

pub use copy::copy_file;
pub use crc::crc32_file;
pub use error::{FileIoError, FileIoResult};
pub use fsutil::{
    file_size, is_readable, is_writable, mkdir_p, open_retry, path_exists, rmdir, unlink,
};
pub use lock::LockedFile;
pub use padded::{read_pad_n, write_pad_n, LogicalFile};
pub use rw::{read_line, read_reliable, write_reliable};
