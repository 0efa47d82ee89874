//! Win32 handle-backed session.
//!
//! Transfers go through `ReadFile`/`WriteFile` with explicit `OVERLAPPED`
//! offsets, chunked to the 32-bit per-call count. Length changes use
//! `SetFileInformationByHandle`, interior insert/remove shuffle bytes through
//! a file mapping whose view base is aligned down to the allocation
//! granularity, and range zeroing asks the filesystem for sparse zeroing
//! before falling back to a plain zero-filled write.

use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use tracing::warn;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_CRC, ERROR_DIRECTORY, ERROR_DISK_FULL,
    ERROR_FILENAME_EXCED_RANGE, ERROR_FILE_NOT_FOUND, ERROR_FILE_TOO_LARGE, ERROR_HANDLE_DISK_FULL,
    ERROR_HANDLE_EOF, ERROR_INVALID_FUNCTION, ERROR_INVALID_NAME, ERROR_INVALID_PARAMETER,
    ERROR_IO_DEVICE, ERROR_LOCK_VIOLATION, ERROR_NEGATIVE_SEEK, ERROR_NOACCESS,
    ERROR_NOT_ENOUGH_MEMORY, ERROR_NOT_SUPPORTED, ERROR_OPERATION_ABORTED, ERROR_OUTOFMEMORY,
    ERROR_PATH_NOT_FOUND, ERROR_POSSIBLE_DEADLOCK, ERROR_SEM_TIMEOUT, ERROR_SHARING_VIOLATION,
    ERROR_TOO_MANY_OPEN_FILES, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FileEndOfFileInfo, FlushFileBuffers, GetFileAttributesExW, GetFileExInfoStandard,
    GetFileSizeEx, ReadFile, SetFileInformationByHandle, WriteFile, CREATE_ALWAYS,
    FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_NORMAL, FILE_ATTRIBUTE_REPARSE_POINT,
    FILE_END_OF_FILE_INFO, FILE_SHARE_READ, OPEN_EXISTING, WIN32_FILE_ATTRIBUTE_DATA,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Console::{
    GetConsoleMode, GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::Ioctl::{FILE_ZERO_DATA_INFORMATION, FSCTL_SET_ZERO_DATA};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, FlushViewOfFile, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ,
    FILE_MAP_WRITE, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows_sys::Win32::System::IO::{DeviceIoControl, OVERLAPPED};

use crate::error::{FileError, Result};
use crate::ops::StdStream;

use super::{AccessMode, FileBackend, ZERO_FILL_CHUNK};

/// Largest byte count handed to a single `ReadFile`/`WriteFile`.
const MAX_ACCESS: usize = u32::MAX as usize;

pub struct Win32File {
    handle: HANDLE,
    path: Vec<u16>,
    mode: AccessMode,
    len: u64,
}

impl Win32File {
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        let wide = to_wide(path)?;
        let (access, disposition) = match mode {
            AccessMode::Read => (GENERIC_READ, OPEN_EXISTING),
            AccessMode::ReadWrite => (GENERIC_READ | GENERIC_WRITE, OPEN_EXISTING),
            AccessMode::TruncateReadWrite => (GENERIC_READ | GENERIC_WRITE, CREATE_ALWAYS),
        };
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                access,
                FILE_SHARE_READ,
                ptr::null::<SECURITY_ATTRIBUTES>(),
                disposition,
                FILE_ATTRIBUTE_NORMAL,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error());
        }
        let mut size = 0i64;
        // SAFETY: `handle` is open and `size` is writable.
        if unsafe { GetFileSizeEx(handle, &mut size) } == 0 {
            let err = last_error();
            // SAFETY: `handle` was opened above and is not used again.
            let _ = unsafe { CloseHandle(handle) };
            return Err(err);
        }
        if size < 0 {
            // SAFETY: as above.
            let _ = unsafe { CloseHandle(handle) };
            return Err(FileError::BadFile);
        }
        Ok(Self {
            handle,
            path: wide,
            mode,
            len: size as u64,
        })
    }

    fn set_file_len(&mut self, len: u64) -> Result<()> {
        let info = FILE_END_OF_FILE_INFO { EndOfFile: len as i64 };
        // SAFETY: `info` is a valid end-of-file record for the open handle.
        let ok = unsafe {
            SetFileInformationByHandle(
                self.handle,
                FileEndOfFileInfo,
                (&info as *const FILE_END_OF_FILE_INFO).cast(),
                mem::size_of::<FILE_END_OF_FILE_INFO>() as u32,
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        self.len = len;
        Ok(())
    }

    /// Re-reads the on-disk length after a mutation failed partway.
    fn resync_len(&mut self) {
        let path = String::from_utf16_lossy(&self.path[..self.path.len().saturating_sub(1)]);
        let mut size = 0i64;
        // SAFETY: `self.handle` is open and `size` is writable.
        if unsafe { GetFileSizeEx(self.handle, &mut size) } != 0 && size >= 0 {
            if size as u64 != self.len {
                warn!(
                    path = %path,
                    cached = self.len,
                    actual = size,
                    "file length re-synchronised after failed mutation"
                );
            }
            self.len = size as u64;
        } else {
            warn!(path = %path, "could not re-synchronise file length");
        }
    }

    fn zero_by_write(&mut self, offset: u64, len: u64) -> Result<()> {
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
}

impl FileBackend for Win32File {
    const MAX_LEN: u64 = i64::MAX as u64;

    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let want = (buf.len() - done).min(MAX_ACCESS) as u32;
            let at = offset + done as u64;
            // SAFETY: all-zero is a valid OVERLAPPED; the offset arm of its
            // union is the one the transfer reads.
            let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
            unsafe {
                overlapped.Anonymous.Anonymous.Offset = at as u32;
                overlapped.Anonymous.Anonymous.OffsetHigh = (at >> 32) as u32;
            }
            let mut got = 0u32;
            // SAFETY: the buffer subrange is writable for `want` bytes and
            // `overlapped` carries the absolute offset.
            let ok = unsafe {
                ReadFile(
                    self.handle,
                    buf[done..].as_mut_ptr().cast(),
                    want,
                    &mut got,
                    &mut overlapped,
                )
            };
            if ok == 0 {
                // SAFETY: immediately after the failed call.
                let code = unsafe { GetLastError() };
                if code == ERROR_HANDLE_EOF {
                    break;
                }
                return Err(map_win32(code));
            }
            if got == 0 {
                break;
            }
            done += got as usize;
        }
        Ok(done)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let want = (data.len() - done).min(MAX_ACCESS) as u32;
            let at = offset + done as u64;
            // SAFETY: as in `read_at`.
            let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
            unsafe {
                overlapped.Anonymous.Anonymous.Offset = at as u32;
                overlapped.Anonymous.Anonymous.OffsetHigh = (at >> 32) as u32;
            }
            let mut put = 0u32;
            // SAFETY: the data subrange is readable for `want` bytes and
            // `overlapped` carries the absolute offset.
            let ok = unsafe {
                WriteFile(
                    self.handle,
                    data[done..].as_ptr().cast(),
                    want,
                    &mut put,
                    &mut overlapped,
                )
            };
            if ok == 0 {
                // SAFETY: immediately after the failed call.
                let err = map_win32(unsafe { GetLastError() });
                self.resync_len();
                return Err(err);
            }
            if put == 0 {
                self.resync_len();
                return Err(FileError::BadIo);
            }
            done += put as usize;
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
        let info = FILE_ZERO_DATA_INFORMATION {
            FileOffset: offset as i64,
            BeyondFinalZero: (offset + len) as i64,
        };
        let mut returned = 0u32;
        // SAFETY: `info` is a valid zero-data record for the open handle.
        let ok = unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_SET_ZERO_DATA,
                (&info as *const FILE_ZERO_DATA_INFORMATION).cast(),
                mem::size_of::<FILE_ZERO_DATA_INFORMATION>() as u32,
                ptr::null_mut(),
                0,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok != 0 {
            return Ok(());
        }
        warn!("sparse zeroing unavailable, falling back to a zero-filled write");
        self.zero_by_write(offset, len)
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
            let view = MappedView::new(self.handle, offset, new_len)?;
            let at = view.offset_within(offset);
            let tail = (old_len - offset) as usize;
            // SAFETY: the view covers source and destination; the ranges
            // overlap, which `copy` permits.
            unsafe {
                let base = view.as_mut_ptr();
                ptr::copy(base.add(at), base.add(at + data.len()), tail);
                ptr::copy_nonoverlapping(data.as_ptr(), base.add(at), data.len());
            }
            view.flush()
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
            let view = MappedView::new(self.handle, offset, old_len)?;
            let at = view.offset_within(offset);
            // SAFETY: the view covers `[offset, old_len)`; the ranges may
            // overlap.
            unsafe {
                let base = view.as_mut_ptr();
                ptr::copy(base.add(at + len as usize), base.add(at), keep);
            }
            view.flush()?;
        }
        self.set_file_len(old_len - len)
    }

    fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.set_file_len(len)
    }

    fn close(mut self) -> Result<()> {
        if self.mode != AccessMode::Read {
            // SAFETY: `self.handle` is open.
            if unsafe { FlushFileBuffers(self.handle) } == 0 {
                return Err(last_error());
            }
        }
        let handle = mem::replace(&mut self.handle, INVALID_HANDLE_VALUE);
        // SAFETY: `handle` is open and ownership ends here.
        if unsafe { CloseHandle(handle) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }
}

impl Drop for Win32File {
    fn drop(&mut self) {
        if self.handle != INVALID_HANDLE_VALUE && !self.handle.is_null() {
            // SAFETY: the handle is still owned by this session.
            let _ = unsafe { CloseHandle(self.handle) };
            self.handle = INVALID_HANDLE_VALUE;
        }
    }
}

/// A writable mapping object plus its view over `[floor_gran(from), end)`.
///
/// The view base is aligned down to the allocation granularity;
/// `offset_within` translates file offsets into the view. Releases the view
/// and then the mapping object on drop.
struct MappedView {
    mapping: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    len: usize,
    base: u64,
}

impl MappedView {
    fn new(handle: HANDLE, from: u64, end: u64) -> Result<Self> {
        let base = from - from % allocation_granularity();
        let len = usize::try_from(end - base).map_err(|_| FileError::NoMemory)?;
        // SAFETY: `handle` is open with write access and the file is at
        // least `end` bytes long.
        let mapping = unsafe {
            CreateFileMappingW(
                handle,
                ptr::null::<SECURITY_ATTRIBUTES>(),
                PAGE_READWRITE,
                (end >> 32) as u32,
                end as u32,
                ptr::null(),
            )
        };
        if mapping.is_null() {
            return Err(last_error());
        }
        // SAFETY: `mapping` covers `[0, end)`, so a view of `len` bytes at
        // `base` is in range.
        let view = unsafe {
            MapViewOfFile(
                mapping,
                FILE_MAP_READ | FILE_MAP_WRITE,
                (base >> 32) as u32,
                base as u32,
                len,
            )
        };
        if view.Value.is_null() {
            let err = last_error();
            // SAFETY: the mapping object was created above.
            let _ = unsafe { CloseHandle(mapping) };
            return Err(err);
        }
        Ok(Self {
            mapping,
            view,
            len,
            base,
        })
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.view.Value.cast()
    }

    /// Byte position of file offset `at` inside the view.
    fn offset_within(&self, at: u64) -> usize {
        (at - self.base) as usize
    }

    fn flush(&self) -> Result<()> {
        // SAFETY: the view is mapped for `self.len` bytes.
        if unsafe { FlushViewOfFile(self.view.Value, self.len) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }
}

impl Drop for MappedView {
    fn drop(&mut self) {
        // Release order matters: the view first, then the mapping object.
        // SAFETY: both were acquired by `MappedView::new`.
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.mapping);
        }
    }
}

/// Length of the file at `path`; the link itself when `open_symlink` is set,
/// its target otherwise.
pub(crate) fn size_of(path: &Path, open_symlink: bool) -> Result<u64> {
    let wide = to_wide(path)?;
    // SAFETY: all-zero is a valid attribute record; `wide` is NUL-terminated.
    let mut data: WIN32_FILE_ATTRIBUTE_DATA = unsafe { mem::zeroed() };
    let ok = unsafe {
        GetFileAttributesExW(
            wide.as_ptr(),
            GetFileExInfoStandard,
            (&mut data as *mut WIN32_FILE_ATTRIBUTE_DATA).cast(),
        )
    };
    if ok == 0 {
        return Err(last_error());
    }
    if data.dwFileAttributes & FILE_ATTRIBUTE_DIRECTORY != 0 {
        return Err(FileError::BadFile);
    }
    if !open_symlink && data.dwFileAttributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
        // The attribute record describes the link; open the file to follow
        // it and size the target instead.
        let file = Win32File::open(path, AccessMode::Read)?;
        let len = file.len();
        file.close()?;
        return Ok(len);
    }
    Ok((u64::from(data.nFileSizeHigh) << 32) | u64::from(data.nFileSizeLow))
}

pub(crate) fn stream_is_terminal(stream: StdStream) -> bool {
    let id = match stream {
        StdStream::Input => STD_INPUT_HANDLE,
        StdStream::Output => STD_OUTPUT_HANDLE,
        StdStream::Error => STD_ERROR_HANDLE,
    };
    // SAFETY: querying a process-standard handle has no preconditions.
    unsafe {
        let handle = GetStdHandle(id);
        if handle == INVALID_HANDLE_VALUE || handle.is_null() {
            return false;
        }
        let mut console_mode = 0u32;
        GetConsoleMode(handle, &mut console_mode) != 0
    }
}

/// Widens a path for the wide-character host calls. Interior NULs would
/// silently shorten the path, so they are rejected.
fn to_wide(path: &Path) -> Result<Vec<u16>> {
    let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
    if wide.iter().any(|&unit| unit == 0) {
        return Err(FileError::BadPath);
    }
    wide.push(0);
    Ok(wide)
}

fn allocation_granularity() -> u64 {
    // SAFETY: all-zero is a valid `SYSTEM_INFO` and the call always succeeds.
    let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    u64::from(info.dwAllocationGranularity.max(1))
}

fn last_error() -> FileError {
    // SAFETY: reading the calling thread's last-error value.
    map_win32(unsafe { GetLastError() })
}

/// Host-error table for this backend: Win32 codes into the engine taxonomy.
fn map_win32(code: u32) -> FileError {
    match code {
        ERROR_ACCESS_DENIED => FileError::BadAccess,
        ERROR_NOACCESS => FileError::BadAddress,
        ERROR_FILE_TOO_LARGE | ERROR_DIRECTORY => FileError::BadFile,
        ERROR_IO_DEVICE | ERROR_CRC => FileError::BadIo,
        ERROR_INVALID_PARAMETER | ERROR_NEGATIVE_SEEK => FileError::BadRange,
        ERROR_INVALID_NAME | ERROR_FILENAME_EXCED_RANGE | ERROR_PATH_NOT_FOUND => {
            FileError::BadPath
        }
        ERROR_POSSIBLE_DEADLOCK => FileError::Deadlock,
        ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION => FileError::InUse,
        ERROR_OPERATION_ABORTED => FileError::Interrupt,
        ERROR_DISK_FULL | ERROR_HANDLE_DISK_FULL => FileError::NoDisk,
        ERROR_FILE_NOT_FOUND => FileError::NoFile,
        ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY => FileError::NoMemory,
        ERROR_TOO_MANY_OPEN_FILES => FileError::NoOpen,
        ERROR_NOT_SUPPORTED | ERROR_INVALID_FUNCTION => FileError::NoSupport,
        ERROR_SEM_TIMEOUT => FileError::Timeout,
        _ => FileError::Internal,
    }
}
