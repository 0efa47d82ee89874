//! The public operations: validate, resolve, open a session, run the range
//! primitives, close.
//!
//! Each operation runs to completion on the caller's thread and holds no
//! state across calls. The semantic checks (zero sizes, offsets against the
//! current length, the end-of-file sentinel) live here so every backend sees
//! only pre-validated ranges.

use std::path::Path;

use tracing::trace;

use crate::backend::{AccessMode, FileBackend};
use crate::error::{FileError, Result};
use crate::flags::FileFlags;
use crate::path;

#[cfg(unix)]
use crate::backend::posix as host;
#[cfg(not(any(unix, windows)))]
use crate::backend::stream as host;
#[cfg(windows)]
use crate::backend::win32 as host;

#[cfg(unix)]
type OsFile = crate::backend::posix::PosixFile;
#[cfg(not(any(unix, windows)))]
type OsFile = crate::backend::stream::StreamFile;
#[cfg(windows)]
type OsFile = crate::backend::win32::Win32File;

/// Offset value meaning "at end of file".
///
/// Writes and inserts at this offset append; clears and trims at this offset
/// operate on the trailing bytes.
pub const OFFSET_EOF: u64 = u64::MAX;

/// The process standard streams recognised by [`stream_is_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Input,
    Output,
    Error,
}

/// Returns the length in bytes of the file at `path`.
///
/// With [`FileFlags::OPEN_SYMLINK`] a symbolic link is sized itself;
/// otherwise its target is sized.
pub fn file_size(path: impl AsRef<Path>, flags: FileFlags) -> Result<u64> {
    let path = path::resolve(path.as_ref(), flags)?;
    host::size_of(&path, flags.contains(FileFlags::OPEN_SYMLINK))
}

/// Reports whether a standard stream is attached to a terminal device.
///
/// Returns `false` wherever the determination is unavailable.
pub fn stream_is_terminal(stream: StdStream) -> bool {
    host::stream_is_terminal(stream)
}

/// Reads up to `buf.len()` bytes starting at `offset` into `buf`, returning
/// the count actually read.
///
/// [`OFFSET_EOF`] reads the trailing `min(buf.len(), file length)` bytes.
/// The count is short when end of file intervenes.
pub fn read_file(
    path: impl AsRef<Path>,
    buf: &mut [u8],
    offset: u64,
    flags: FileFlags,
) -> Result<usize> {
    let path = path::resolve(path.as_ref(), flags)?;
    trace!(path = %path.display(), offset, size = buf.len(), "read_file");
    if buf.is_empty() {
        return Err(FileError::BadSize);
    }
    let mut file = OsFile::open(&path, AccessMode::Read)?;
    let out = read_session(&mut file, buf, offset);
    finish(file, out)
}

/// Writes `data` at `offset`, overwriting in place and extending the file
/// when the write ends past the current length.
///
/// With [`FileFlags::TRUNCATE`] the file is reset to empty first and the
/// write starts at offset zero. [`OFFSET_EOF`] appends.
pub fn write_file(
    path: impl AsRef<Path>,
    data: &[u8],
    offset: u64,
    flags: FileFlags,
) -> Result<()> {
    let path = path::resolve(path.as_ref(), flags)?;
    trace!(path = %path.display(), offset, size = data.len(), "write_file");
    if data.is_empty() {
        return Err(FileError::BadSize);
    }
    let mut file = OsFile::open(&path, AccessMode::ReadWrite)?;
    let out = write_session(&mut file, data, offset, flags.contains(FileFlags::TRUNCATE));
    finish(file, out)
}

/// Grows the file by `data.len()` bytes at `offset`, placing `data` there
/// and shifting the pre-existing tail right.
///
/// [`OFFSET_EOF`] (or `offset` equal to the current length) appends.
pub fn insert_file(
    path: impl AsRef<Path>,
    data: &[u8],
    offset: u64,
    flags: FileFlags,
) -> Result<()> {
    let path = path::resolve(path.as_ref(), flags)?;
    trace!(path = %path.display(), offset, size = data.len(), "insert_file");
    if data.is_empty() {
        return Err(FileError::BadSize);
    }
    let mut file = OsFile::open(&path, AccessMode::ReadWrite)?;
    let out = insert_session(&mut file, data, offset);
    finish(file, out)
}

/// Replaces the entire file with `data`, creating it if absent.
pub fn rewrite_file(path: impl AsRef<Path>, data: &[u8], flags: FileFlags) -> Result<()> {
    let path = path::resolve(path.as_ref(), flags)?;
    trace!(path = %path.display(), size = data.len(), "rewrite_file");
    if data.is_empty() {
        return Err(FileError::BadSize);
    }
    let mut file = OsFile::open(&path, AccessMode::TruncateReadWrite)?;
    let out = file.write_at(0, data);
    finish(file, out)
}

/// Zeroes `size` bytes starting at `offset` without changing the file
/// length.
///
/// [`OFFSET_EOF`] zeroes the trailing `min(size, file length)` bytes.
pub fn clear_file(path: impl AsRef<Path>, size: u64, offset: u64, flags: FileFlags) -> Result<()> {
    let path = path::resolve(path.as_ref(), flags)?;
    trace!(path = %path.display(), offset, size, "clear_file");
    if size == 0 {
        return Err(FileError::BadSize);
    }
    let mut file = OsFile::open(&path, AccessMode::ReadWrite)?;
    let out = clear_session(&mut file, size, offset);
    finish(file, out)
}

/// Removes `size` bytes starting at `offset`, shifting the tail left and
/// shrinking the file.
///
/// [`OFFSET_EOF`] drops the trailing `min(size, file length)` bytes. With
/// [`FileFlags::OVERWRITE`] the range is zeroed in place instead, exactly as
/// [`clear_file`].
pub fn trim_file(path: impl AsRef<Path>, size: u64, offset: u64, flags: FileFlags) -> Result<()> {
    let path = path::resolve(path.as_ref(), flags)?;
    trace!(path = %path.display(), offset, size, "trim_file");
    if size == 0 {
        return Err(FileError::BadSize);
    }
    let mut file = OsFile::open(&path, AccessMode::ReadWrite)?;
    let out = if flags.contains(FileFlags::OVERWRITE) {
        clear_session(&mut file, size, offset)
    } else {
        trim_session(&mut file, size, offset)
    };
    finish(file, out)
}

/// Closes the session, preferring the operation's error over a close error.
fn finish<F: FileBackend, T>(file: F, out: Result<T>) -> Result<T> {
    let closed = file.close();
    let value = out?;
    closed?;
    Ok(value)
}

pub(crate) fn read_session<F: FileBackend>(
    file: &mut F,
    buf: &mut [u8],
    offset: u64,
) -> Result<usize> {
    let len = file.len();
    if len == 0 {
        return Err(FileError::NoFile);
    }
    let offset = if offset == OFFSET_EOF {
        len - (buf.len() as u64).min(len)
    } else {
        offset
    };
    if offset >= len {
        return Err(FileError::BadOffset { offset, len });
    }
    file.read_at(offset, buf)
}

pub(crate) fn write_session<F: FileBackend>(
    file: &mut F,
    data: &[u8],
    offset: u64,
    truncate: bool,
) -> Result<()> {
    if truncate {
        file.truncate_to(0)?;
        return file.write_at(0, data);
    }
    let len = file.len();
    let offset = if offset == OFFSET_EOF { len } else { offset };
    if offset > len || data.len() as u64 > F::MAX_LEN - offset {
        return Err(FileError::BadOffset { offset, len });
    }
    file.write_at(offset, data)
}

pub(crate) fn insert_session<F: FileBackend>(
    file: &mut F,
    data: &[u8],
    offset: u64,
) -> Result<()> {
    let len = file.len();
    let offset = if offset == OFFSET_EOF { len } else { offset };
    if offset > len || data.len() as u64 > F::MAX_LEN - len {
        return Err(FileError::BadOffset { offset, len });
    }
    if offset == len {
        return file.append(data);
    }
    file.insert_range(offset, data)
}

pub(crate) fn clear_session<F: FileBackend>(file: &mut F, size: u64, offset: u64) -> Result<()> {
    let len = file.len();
    if len == 0 {
        return Err(FileError::NoFile);
    }
    let (offset, size) = if offset == OFFSET_EOF {
        let size = size.min(len);
        (len - size, size)
    } else {
        if offset >= len {
            return Err(FileError::BadOffset { offset, len });
        }
        (offset, size.min(len - offset))
    };
    file.zero_range(offset, size)
}

pub(crate) fn trim_session<F: FileBackend>(file: &mut F, size: u64, offset: u64) -> Result<()> {
    let len = file.len();
    if len == 0 {
        return Err(FileError::NoFile);
    }
    if offset == OFFSET_EOF {
        // Dropping trailing bytes is a pure truncation.
        return file.truncate_to(len - size.min(len));
    }
    if offset >= len {
        return Err(FileError::BadOffset { offset, len });
    }
    let size = size.min(len - offset);
    if offset == 0 && size == len {
        return file.truncate_to(0);
    }
    if offset + size == len {
        return file.truncate_to(offset);
    }
    file.remove_range(offset, size)
}
