use thiserror::Error;

/// Closed result taxonomy shared by every engine operation.
///
/// Each backend translates the host codes it observes into exactly one of
/// these kinds; no host identifier crosses this boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FileError {
    /// Unexpected host error with no better classification.
    #[error("unexpected host error")]
    Internal,
    /// Permission denied.
    #[error("permission denied")]
    BadAccess,
    /// The host rejected a memory reference.
    #[error("invalid memory reference")]
    BadAddress,
    /// An alignment argument was not a power of two.
    #[error("alignment is not a power of two")]
    BadAlignment,
    /// File too large, wrong type, or otherwise unusable.
    #[error("file is too large or of an unusable type")]
    BadFile,
    /// I/O-layer failure, e.g. an unresolved short transfer or device error.
    #[error("i/o failure")]
    BadIo,
    /// Offset outside the legal range, or `size + offset` overflow.
    #[error("offset {offset} out of range for file of length {len}")]
    BadOffset { offset: u64, len: u64 },
    /// Malformed, unsupported, or unrepresentable path.
    #[error("malformed or unsupported path")]
    BadPath,
    /// The request straddles an illegal boundary.
    #[error("request straddles an illegal boundary")]
    BadRange,
    /// Zero or too-large size.
    #[error("zero or too-large size")]
    BadSize,
    /// Stream in the wrong state.
    #[error("stream in wrong state")]
    BadStream,
    /// The host reported a deadlock.
    #[error("host reported a deadlock")]
    Deadlock,
    /// Resource busy or locked.
    #[error("resource busy or locked")]
    InUse,
    /// Interrupted beyond the retry budget.
    #[error("interrupted beyond retry budget")]
    Interrupt,
    /// A required connection is gone.
    #[error("connection unavailable")]
    NoConnection,
    /// No space left on the device.
    #[error("no space left on device")]
    NoDisk,
    /// No such file, or the file has no content to operate on.
    #[error("no such file")]
    NoFile,
    /// No lock available.
    #[error("no lock available")]
    NoLock,
    /// Memory exhausted.
    #[error("out of memory")]
    NoMemory,
    /// Too many open host objects.
    #[error("no more host objects can be opened")]
    NoOpen,
    /// No such process.
    #[error("no such process")]
    NoProcess,
    /// Quota exhausted.
    #[error("quota exhausted")]
    NoQuota,
    /// The host does not support the requested mechanism.
    #[error("not supported by host")]
    NoSupport,
    /// The host imposed a timeout.
    #[error("host-imposed timeout")]
    Timeout,
}

pub type Result<T, E = FileError> = core::result::Result<T, E>;
