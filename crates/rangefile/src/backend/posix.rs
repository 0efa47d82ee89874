//! POSIX descriptor-backed session.
//!
//! Plain transfers go through `pread`/`pwrite` in host-sized chunks with an
//! interrupt-retry loop around every interruptible call. Interior insert and
//! remove shuffle bytes in place through a shared writable `mmap` covering
//! the affected tail, so no staging buffer is needed.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{self, NonNull};

use tracing::warn;

use crate::error::{FileError, Result};
use crate::ops::StdStream;

use super::{AccessMode, FileBackend};

/// Largest byte count handed to a single `pread`/`pwrite`.
#[cfg(target_os = "linux")]
const MAX_ACCESS: usize = 0x7fff_f000;
#[cfg(target_os = "macos")]
const MAX_ACCESS: usize = libc::c_int::MAX as usize;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const MAX_ACCESS: usize = libc::ssize_t::MAX as usize;

/// Retry budget for syscalls failing with `EINTR`.
const INTERRUPT_RETRIES: u32 = 64;

pub struct PosixFile {
    fd: libc::c_int,
    path: CString,
    mode: AccessMode,
    len: u64,
}

impl PosixFile {
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        let cpath = to_cstring(path)?;
        let oflags = match mode {
            AccessMode::Read => libc::O_RDONLY,
            AccessMode::ReadWrite => libc::O_RDWR,
            AccessMode::TruncateReadWrite => libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
        } | libc::O_CLOEXEC;
        // SAFETY: `cpath` is NUL-terminated and outlives the call.
        let fd = retry_interruptible(|| {
            (unsafe { libc::open(cpath.as_ptr(), oflags, 0o644 as libc::c_uint) }) as isize
        })? as libc::c_int;

        // SAFETY: all-zero is a valid `stat`, and `fd` is open.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = map_errno(errno());
            // SAFETY: `fd` was opened above and is not used again.
            let _ = unsafe { libc::close(fd) };
            return Err(err);
        }
        if st.st_mode & libc::S_IFMT != libc::S_IFREG || st.st_size < 0 {
            // SAFETY: as above.
            let _ = unsafe { libc::close(fd) };
            return Err(FileError::BadFile);
        }
        Ok(Self {
            fd,
            path: cpath,
            mode,
            len: st.st_size as u64,
        })
    }

    fn set_file_len(&mut self, len: u64) -> Result<()> {
        let fd = self.fd;
        retry_interruptible(|| {
            // SAFETY: `fd` is open; `len` fits `off_t` by the MAX_LEN bound.
            unsafe { libc::ftruncate(fd, len as libc::off_t) as isize }
        })?;
        self.len = len;
        Ok(())
    }

    /// Re-reads the on-disk length after a mutation failed partway.
    fn resync_len(&mut self) {
        // SAFETY: all-zero is a valid `stat`, and `self.fd` is open.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(self.fd, &mut st) } == 0 && st.st_size >= 0 {
            if st.st_size as u64 != self.len {
                warn!(
                    path = %self.path.to_string_lossy(),
                    cached = self.len,
                    actual = st.st_size,
                    "file length re-synchronised after failed mutation"
                );
            }
            self.len = st.st_size as u64;
        } else {
            warn!(
                path = %self.path.to_string_lossy(),
                "could not re-synchronise file length"
            );
        }
    }
}

impl FileBackend for PosixFile {
    const MAX_LEN: u64 = libc::off_t::MAX as u64;

    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let fd = self.fd;
        let mut done = 0;
        while done < buf.len() {
            let want = (buf.len() - done).min(MAX_ACCESS);
            let at = offset + done as u64;
            let chunk = buf[done..].as_mut_ptr();
            // SAFETY: `chunk` is writable for at least `want` bytes.
            let count = retry_interruptible(|| unsafe {
                libc::pread(fd, chunk.cast(), want, at as libc::off_t)
            })?;
            if count == 0 {
                break;
            }
            done += count as usize;
        }
        Ok(done)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let fd = self.fd;
        let mut done = 0;
        while done < data.len() {
            let want = (data.len() - done).min(MAX_ACCESS);
            let at = offset + done as u64;
            let chunk = data[done..].as_ptr();
            // SAFETY: `chunk` is readable for at least `want` bytes.
            let count = match retry_interruptible(|| unsafe {
                libc::pwrite(fd, chunk.cast(), want, at as libc::off_t)
            }) {
                Ok(count) => count,
                Err(err) => {
                    self.resync_len();
                    return Err(err);
                }
            };
            if count == 0 {
                self.resync_len();
                return Err(FileError::BadIo);
            }
            done += count as usize;
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
        let count = usize::try_from(len).map_err(|_| FileError::NoMemory)?;
        let map = Mapping::new(self.fd, offset, offset + len)?;
        let at = map.offset_within(offset);
        // SAFETY: the mapping covers `[offset, offset + len)`.
        unsafe { ptr::write_bytes(map.as_mut_ptr().add(at), 0, count) };
        map.sync()
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
        let new_len = old_len + data.len() as u64;
        // Grow first; the new tail bytes are unspecified until the shuffle.
        self.set_file_len(new_len)?;

        let result = (|| {
            let map = Mapping::new(self.fd, offset, new_len)?;
            let at = map.offset_within(offset);
            let tail = (old_len - offset) as usize;
            // SAFETY: the mapping covers source and destination; the ranges
            // overlap, which `copy` permits.
            unsafe {
                let base = map.as_mut_ptr();
                ptr::copy(base.add(at), base.add(at + data.len()), tail);
                ptr::copy_nonoverlapping(data.as_ptr(), base.add(at), data.len());
            }
            map.sync()
        })();
        if result.is_err() {
            self.resync_len();
        }
        result
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
            let map = Mapping::new(self.fd, offset, old_len)?;
            let at = map.offset_within(offset);
            // SAFETY: the mapping covers `[offset, old_len)`; the ranges may
            // overlap.
            unsafe {
                let base = map.as_mut_ptr();
                ptr::copy(base.add(at + len as usize), base.add(at), keep);
            }
            map.sync()?;
        }
        self.set_file_len(old_len - len)
    }

    fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.set_file_len(len)
    }

    fn close(mut self) -> Result<()> {
        if self.mode != AccessMode::Read {
            let fd = self.fd;
            // SAFETY: `fd` is open.
            retry_interruptible(|| unsafe { libc::fsync(fd) as isize })?;
        }
        let fd = std::mem::replace(&mut self.fd, -1);
        // SAFETY: `fd` is open and ownership ends here.
        if unsafe { libc::close(fd) } != 0 {
            return Err(map_errno(errno()));
        }
        Ok(())
    }
}

impl Drop for PosixFile {
    fn drop(&mut self) {
        if self.fd >= 0 {
            // SAFETY: the descriptor is still owned by this session.
            let _ = unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}

/// A writable shared mapping of `[floor_page(from), end)` of a file.
///
/// Releases the region on drop; the page-aligned base keeps `mmap` happy
/// while `offset_within` translates file offsets into the mapped slice.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
    base: u64,
}

impl Mapping {
    fn new(fd: libc::c_int, from: u64, end: u64) -> Result<Self> {
        let base = from - from % page_size();
        let len = usize::try_from(end - base).map_err(|_| FileError::NoMemory)?;
        // SAFETY: `fd` is an open regular file whose length is at least
        // `end`; the kernel picks the address.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                base as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(map_errno(errno()));
        }
        match NonNull::new(ptr.cast::<u8>()) {
            Some(ptr) => Ok(Self { ptr, len, base }),
            None => {
                // SAFETY: the region was mapped just above.
                let _ = unsafe { libc::munmap(ptr, len) };
                Err(FileError::BadAddress)
            }
        }
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Byte position of file offset `at` inside the mapped region.
    fn offset_within(&self, at: u64) -> usize {
        (at - self.base) as usize
    }

    fn sync(&self) -> Result<()> {
        // SAFETY: the region is mapped for `self.len` bytes.
        if unsafe { libc::msync(self.ptr.as_ptr().cast(), self.len, libc::MS_SYNC) } != 0 {
            return Err(map_errno(errno()));
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: the region was mapped by `Mapping::new`.
        let _ = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
    }
}

/// Length of the file at `path`; the link itself when `open_symlink` is set,
/// its target otherwise.
pub(crate) fn size_of(path: &Path, open_symlink: bool) -> Result<u64> {
    let cpath = to_cstring(path)?;
    // SAFETY: all-zero is a valid `stat`; `cpath` is NUL-terminated.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = if open_symlink {
        unsafe { libc::lstat(cpath.as_ptr(), &mut st) }
    } else {
        unsafe { libc::stat(cpath.as_ptr(), &mut st) }
    };
    if rc != 0 {
        return Err(map_errno(errno()));
    }
    match st.st_mode & libc::S_IFMT {
        libc::S_IFREG | libc::S_IFLNK if st.st_size >= 0 => Ok(st.st_size as u64),
        _ => Err(FileError::BadFile),
    }
}

pub(crate) fn stream_is_terminal(stream: StdStream) -> bool {
    let fd = match stream {
        StdStream::Input => libc::STDIN_FILENO,
        StdStream::Output => libc::STDOUT_FILENO,
        StdStream::Error => libc::STDERR_FILENO,
    };
    // SAFETY: querying a well-known descriptor has no preconditions.
    unsafe { libc::isatty(fd) == 1 }
}

fn to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| FileError::BadPath)
}

fn page_size() -> u64 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as u64
    } else {
        4096
    }
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Runs an interruptible syscall, retrying on `EINTR` up to the budget.
fn retry_interruptible(mut call: impl FnMut() -> isize) -> Result<isize> {
    for _ in 0..INTERRUPT_RETRIES {
        let ret = call();
        if ret >= 0 {
            return Ok(ret);
        }
        let err = errno();
        if err != libc::EINTR {
            return Err(map_errno(err));
        }
    }
    warn!("syscall still interrupted after {INTERRUPT_RETRIES} attempts");
    Err(FileError::Interrupt)
}

/// Host-error table for this backend: errno into the engine taxonomy.
fn map_errno(err: i32) -> FileError {
    match err {
        libc::EACCES | libc::EPERM | libc::EROFS => FileError::BadAccess,
        libc::EFAULT => FileError::BadAddress,
        libc::EFBIG | libc::EOVERFLOW | libc::EISDIR => FileError::BadFile,
        libc::EIO => FileError::BadIo,
        libc::EINVAL => FileError::BadRange,
        libc::ENAMETOOLONG | libc::ELOOP | libc::ENOTDIR | libc::EILSEQ => FileError::BadPath,
        libc::ESPIPE | libc::EBADF => FileError::BadStream,
        libc::EDEADLK => FileError::Deadlock,
        libc::EBUSY | libc::ETXTBSY | libc::EAGAIN => FileError::InUse,
        libc::EINTR => FileError::Interrupt,
        libc::ECONNRESET | libc::ENOTCONN => FileError::NoConnection,
        libc::ENOSPC => FileError::NoDisk,
        libc::ENOENT => FileError::NoFile,
        libc::ENOLCK => FileError::NoLock,
        libc::ENOMEM => FileError::NoMemory,
        libc::EMFILE | libc::ENFILE => FileError::NoOpen,
        libc::ESRCH => FileError::NoProcess,
        libc::EDQUOT => FileError::NoQuota,
        libc::ENOSYS | libc::EOPNOTSUPP | libc::ENODEV => FileError::NoSupport,
        libc::ETIMEDOUT => FileError::Timeout,
        _ => FileError::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::map_errno;
    #[cfg(target_os = "linux")]
    use super::retry_interruptible;
    use crate::error::FileError;

    #[test]
    fn errno_table_covers_the_common_cases() {
        assert_eq!(map_errno(libc::ENOENT), FileError::NoFile);
        assert_eq!(map_errno(libc::EACCES), FileError::BadAccess);
        assert_eq!(map_errno(libc::ENOSPC), FileError::NoDisk);
        assert_eq!(map_errno(libc::EIO), FileError::BadIo);
        assert_eq!(map_errno(-1), FileError::Internal);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn retry_budget_is_finite() {
        let mut calls = 0;
        let err = retry_interruptible(|| {
            calls += 1;
            // SAFETY: setting errno through the libc location is sound.
            unsafe { *libc::__errno_location() = libc::EINTR };
            -1
        })
        .unwrap_err();
        assert_eq!(err, FileError::Interrupt);
        assert_eq!(calls, 64);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn retry_passes_through_other_errors() {
        let err = retry_interruptible(|| {
            // SAFETY: as above.
            unsafe { *libc::__errno_location() = libc::ENOSPC };
            -1
        })
        .unwrap_err();
        assert_eq!(err, FileError::NoDisk);
    }
}
