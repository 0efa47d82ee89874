use bitflags::bitflags;

bitflags! {
    /// Option bits accepted by every engine operation.
    ///
    /// Unknown bits are ignored; build values from raw integers with
    /// [`FileFlags::from_bits_truncate`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u32 {
        /// Resolve a relative path against the running executable's
        /// directory instead of the working directory.
        const RELATIVE_TO_EXE = 1 << 0;
        /// Size queries report the symbolic link itself rather than its
        /// target. Meaningless for other operations.
        const OPEN_SYMLINK = 1 << 1;
        /// `write_file` resets the file to zero length first, then writes
        /// from offset zero.
        const TRUNCATE = 1 << 2;
        /// `trim_file` zeroes the range in place (keeping the length)
        /// instead of removing it.
        const OVERWRITE = 1 << 3;
    }
}
