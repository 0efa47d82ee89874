//! In-memory session.
//!
//! Implements the full operation surface over a `Vec<u8>`. Primarily the
//! reference model for the host-backed sessions in model-based tests, and
//! useful wherever file semantics are wanted without touching disk.

use crate::error::{FileError, Result};

use super::FileBackend;

#[derive(Debug, Default)]
pub struct MemFile {
    data: Vec<u8>,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl FileBackend for MemFile {
    const MAX_LEN: u64 = i64::MAX as u64;

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = (offset as usize).min(self.data.len());
        let count = buf.len().min(self.data.len() - offset);
        buf[..count].copy_from_slice(&self.data[offset..offset + count]);
        Ok(count)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let offset = offset as usize;
        let end = offset + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn zero_range(&mut self, offset: u64, len: u64) -> Result<()> {
        let total = self.data.len() as u64;
        if offset >= total || total - offset < len {
            return Err(FileError::BadOffset { offset, len: total });
        }
        let offset = offset as usize;
        self.data[offset..offset + len as usize].fill(0);
        Ok(())
    }

    fn insert_range(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let total = self.data.len() as u64;
        if offset > total {
            return Err(FileError::BadOffset { offset, len: total });
        }
        let offset = offset as usize;
        self.data.splice(offset..offset, data.iter().copied());
        Ok(())
    }

    fn remove_range(&mut self, offset: u64, len: u64) -> Result<()> {
        let total = self.data.len() as u64;
        if offset >= total || total - offset < len {
            return Err(FileError::BadOffset { offset, len: total });
        }
        let offset = offset as usize;
        self.data.drain(offset..offset + len as usize);
        Ok(())
    }

    fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}
