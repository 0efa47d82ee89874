//! Byte-range file mutation engine.
//!
//! A small, uniform set of operations for interrogating and mutating regular
//! files at arbitrary byte offsets, with one semantic contract over three
//! host substrates: Win32 handles with file mappings, POSIX descriptors with
//! `mmap`/`ftruncate`, and a portable buffered-stream fallback.
//!
//! The interesting operations are the structural ones. [`insert_file`] grows
//! a file at an interior offset and [`trim_file`] removes an interior range;
//! on the native backends both shuffle the tail in place through a writable
//! file mapping instead of staging it in memory. Reads and writes are
//! chunked under each host's per-call access limit, and interrupted POSIX
//! calls are retried up to a fixed budget before surfacing
//! [`FileError::Interrupt`].
//!
//! ```no_run
//! use rangefile::{read_file, rewrite_file, FileFlags, OFFSET_EOF};
//!
//! # fn main() -> rangefile::Result<()> {
//! rewrite_file("cache.bin", b"HelloWorld", FileFlags::empty())?;
//! let mut tail = [0u8; 5];
//! let got = read_file("cache.bin", &mut tail, OFFSET_EOF, FileFlags::empty())?;
//! assert_eq!(&tail[..got], b"World");
//! # Ok(())
//! # }
//! ```
//!
//! Concurrent operations on distinct files are safe; concurrent operations
//! on the same underlying file are undefined, as the engine takes no locks.
//! Failed mutations are not rolled back; callers needing atomicity should
//! write to a temporary file and rename it into place.

mod backend;
mod error;
mod flags;
mod ops;
mod path;

pub use backend::mem::MemFile;
#[cfg(unix)]
pub use backend::posix::PosixFile;
pub use backend::stream::StreamFile;
#[cfg(windows)]
pub use backend::win32::Win32File;
pub use backend::{AccessMode, FileBackend};
pub use error::{FileError, Result};
pub use flags::FileFlags;
pub use ops::{
    clear_file, file_size, insert_file, read_file, rewrite_file, stream_is_terminal, trim_file,
    write_file, StdStream, OFFSET_EOF,
};
