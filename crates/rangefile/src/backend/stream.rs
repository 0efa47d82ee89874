//! Portable buffered-stream session, the unconditional fallback backend.
//!
//! All positioning goes through seek/tell and every transfer loops on short
//! counts, so the session works wherever `std::fs` does. Interior insert and
//! remove have no mapping to lean on here: they stage the surviving tail in a
//! heap buffer and rewrite it, which costs O(tail) memory on large files.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{FileError, Result};
use crate::ops::StdStream;

use super::{AccessMode, FileBackend, ZERO_FILL_CHUNK};

/// Retry budget for transfers failing with an interrupted-by-signal error.
const INTERRUPT_RETRIES: u32 = 64;

#[derive(Debug)]
pub struct StreamFile {
    file: std::fs::File,
    path: PathBuf,
    mode: AccessMode,
    len: u64,
}

impl StreamFile {
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        let mut options = OpenOptions::new();
        match mode {
            AccessMode::Read => options.read(true),
            AccessMode::ReadWrite => options.read(true).write(true),
            AccessMode::TruncateReadWrite => {
                options.read(true).write(true).create(true).truncate(true)
            }
        };
        let mut file = options.open(path).map_err(|err| map_io_error(&err))?;
        // Length is measured by seeking to the end; there is no host stat in
        // this backend's vocabulary.
        let len = file
            .seek(SeekFrom::End(0))
            .map_err(|err| map_io_error(&err))?;
        if len > Self::MAX_LEN {
            return Err(FileError::BadFile);
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
            len,
        })
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|err| map_io_error(&err))?;
        Ok(())
    }

    /// Re-reads the on-disk length after a mutation failed partway, so the
    /// cached length stays truthful.
    fn resync_len(&mut self) {
        match self.file.seek(SeekFrom::End(0)) {
            Ok(len) => {
                if len != self.len {
                    warn!(
                        path = %self.path.display(),
                        cached = self.len,
                        actual = len,
                        "file length re-synchronised after failed mutation"
                    );
                }
                self.len = len;
            }
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "could not re-synchronise file length"
            ),
        }
    }
}

impl FileBackend for StreamFile {
    const MAX_LEN: u64 = i64::MAX as u64;

    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.seek_to(offset)?;
        let mut done = 0;
        let mut interrupts = 0;
        while done < buf.len() {
            match self.file.read(&mut buf[done..]) {
                Ok(0) => break,
                Ok(count) => done += count,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    interrupts += 1;
                    if interrupts >= INTERRUPT_RETRIES {
                        return Err(FileError::Interrupt);
                    }
                }
                Err(err) => return Err(map_io_error(&err)),
            }
        }
        Ok(done)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.seek_to(offset)?;
        let mut done = 0;
        let mut interrupts = 0;
        while done < data.len() {
            match self.file.write(&data[done..]) {
                Ok(0) => {
                    self.resync_len();
                    return Err(FileError::BadIo);
                }
                Ok(count) => done += count,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    interrupts += 1;
                    if interrupts >= INTERRUPT_RETRIES {
                        self.resync_len();
                        return Err(FileError::Interrupt);
                    }
                }
                Err(err) => {
                    self.resync_len();
                    return Err(map_io_error(&err));
                }
            }
        }
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    fn zero_range(&mut self, offset: u64, len: u64) -> Result<()> {
        if offset >= self.len || self.len - offset < len {
            return Err(FileError::BadOffset {
                offset,
                len: self.len,
            });
        }
        let zeros = vec![0u8; ZERO_FILL_CHUNK.min(len.min(usize::MAX as u64) as usize)];
        let mut at = offset;
        let mut remaining = len;
        while remaining > 0 {
            let count = (zeros.len() as u64).min(remaining) as usize;
            self.write_at(at, &zeros[..count])?;
            at += count as u64;
            remaining -= count as u64;
        }
        Ok(())
    }

    fn insert_range(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let old_len = self.len;
        if offset > old_len {
            return Err(FileError::BadOffset {
                offset,
                len: old_len,
            });
        }
        if offset == old_len {
            return self.append(data);
        }
        let tail_len =
            usize::try_from(old_len - offset).map_err(|_| FileError::NoMemory)?;
        let mut tail = vec![0u8; tail_len];
        if self.read_at(offset, &mut tail)? != tail_len {
            return Err(FileError::BadIo);
        }
        self.write_at(offset, data)?;
        self.write_at(offset + data.len() as u64, &tail)
    }

    fn remove_range(&mut self, offset: u64, len: u64) -> Result<()> {
        let old_len = self.len;
        if offset >= old_len || old_len - offset < len {
            return Err(FileError::BadOffset {
                offset,
                len: old_len,
            });
        }
        let keep = usize::try_from(old_len - offset - len).map_err(|_| FileError::NoMemory)?;
        if keep > 0 {
            let mut tail = vec![0u8; keep];
            if self.read_at(offset + len, &mut tail)? != keep {
                return Err(FileError::BadIo);
            }
            self.write_at(offset, &tail)?;
        }
        self.truncate_to(old_len - len)
    }

    fn truncate_to(&mut self, len: u64) -> Result<()> {
        if let Err(err) = self.file.set_len(len) {
            self.resync_len();
            return Err(map_io_error(&err));
        }
        self.len = len;
        Ok(())
    }

    fn close(self) -> Result<()> {
        if self.mode != AccessMode::Read {
            self.file.sync_all().map_err(|err| map_io_error(&err))?;
        }
        Ok(())
    }
}

/// Length of the file at `path`. Symbolic links are always followed here;
/// the stream vocabulary has no way to address the link itself.
pub(crate) fn size_of(path: &Path, _open_symlink: bool) -> Result<u64> {
    let file = StreamFile::open(path, AccessMode::Read)?;
    let len = file.len();
    file.close()?;
    Ok(len)
}

/// The determination is not available through buffered streams alone.
pub(crate) fn stream_is_terminal(_stream: StdStream) -> bool {
    false
}

/// Host-error table for this backend: `io::Error` into the engine taxonomy.
fn map_io_error(err: &std::io::Error) -> FileError {
    match err.kind() {
        ErrorKind::NotFound => FileError::NoFile,
        ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => FileError::BadAccess,
        ErrorKind::AlreadyExists | ErrorKind::WouldBlock | ErrorKind::ResourceBusy => {
            FileError::InUse
        }
        ErrorKind::InvalidInput => FileError::BadRange,
        ErrorKind::TimedOut => FileError::Timeout,
        ErrorKind::WriteZero | ErrorKind::UnexpectedEof => FileError::BadIo,
        ErrorKind::Interrupted => FileError::Interrupt,
        ErrorKind::OutOfMemory => FileError::NoMemory,
        ErrorKind::Unsupported => FileError::NoSupport,
        ErrorKind::StorageFull => FileError::NoDisk,
        ErrorKind::QuotaExceeded => FileError::NoQuota,
        ErrorKind::IsADirectory | ErrorKind::FileTooLarge => FileError::BadFile,
        ErrorKind::NotADirectory => FileError::BadPath,
        ErrorKind::Deadlock => FileError::Deadlock,
        ErrorKind::NotSeekable => FileError::BadStream,
        _ => FileError::Internal,
    }
}
