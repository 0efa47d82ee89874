//! Path resolution for the public operations.

use std::borrow::Cow;
use std::env;
use std::path::Path;

use crate::error::{FileError, Result};
use crate::flags::FileFlags;

/// Resolves the caller's path according to the flag bits.
///
/// Absolute inputs are final. A relative input with
/// [`FileFlags::RELATIVE_TO_EXE`] set is composed against the directory
/// containing the running executable and canonicalised; without the flag it
/// is left for the host to resolve against the working directory.
pub(crate) fn resolve(path: &Path, flags: FileFlags) -> Result<Cow<'_, Path>> {
    if path.as_os_str().is_empty() || has_interior_nul(path) {
        return Err(FileError::BadPath);
    }
    if flags.contains(FileFlags::RELATIVE_TO_EXE) && path.is_relative() {
        let exe = env::current_exe().map_err(|_| FileError::NoSupport)?;
        let dir = exe.parent().ok_or(FileError::NoSupport)?;
        // Canonicalise the half that exists; the target itself may not yet,
        // so it is joined lexically onto the canonical directory.
        let dir = dir.canonicalize().map_err(|_| FileError::NoSupport)?;
        return Ok(Cow::Owned(dir.join(path)));
    }
    Ok(Cow::Borrowed(path))
}

/// An embedded NUL can silently shorten the path at the host boundary, so it
/// is rejected up front.
fn has_interior_nul(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().contains(&0)
    }
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        path.as_os_str().encode_wide().any(|unit| unit == 0)
    }
    #[cfg(not(any(unix, windows)))]
    {
        path.to_string_lossy().as_bytes().contains(&0)
    }
}
