//! A medium held in memory whose operations complete when the test says so.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use super::Completions;
use crate::storage::{Storage, StorageError};

/// Data moves when an operation is accepted; its completion is queued and
/// handed out by [`Completions::take_completion`].
#[derive(Debug)]
pub struct RamDisk {
    block_size: u32,
    data: Vec<u8>,
    write_protected: bool,
    completions: VecDeque<Result<(), StorageError>>,
    reads: Vec<(u64, usize)>,
    writes: Vec<(u64, usize)>,
    fail_reads_at: Option<u64>,
    fail_writes_at: Option<u64>,
}

impl RamDisk {
    /// A zero filled disk of `blocks` blocks.
    pub fn new(block_size: u32, blocks: u64) -> Self {
        Self {
            block_size,
            data: vec![0; block_size as usize * blocks as usize],
            write_protected: false,
            completions: VecDeque::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            fail_reads_at: None,
            fail_writes_at: None,
        }
    }

    /// Fill the disk with bytes that differ between neighbouring blocks.
    pub fn with_pattern(mut self) -> Self {
        let block_size = self.block_size as usize;
        for (i, byte) in self.data.iter_mut().enumerate() {
            *byte = (i % 251) as u8 ^ (i / block_size) as u8;
        }
        self
    }

    pub fn write_protected(mut self, write_protected: bool) -> Self {
        self.write_protected = write_protected;
        self
    }

    /// The read whose range covers byte `position` completes with an error.
    pub fn fail_reads_at(&mut self, position: u64) {
        self.fail_reads_at = Some(position);
    }

    pub fn fail_writes_at(&mut self, position: u64) {
        self.fail_writes_at = Some(position);
    }

    pub fn has_completion(&self) -> bool {
        !self.completions.is_empty()
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Every accepted read as (position, length).
    pub fn reads(&self) -> &[(u64, usize)] {
        &self.reads
    }

    pub fn writes(&self) -> &[(u64, usize)] {
        &self.writes
    }

    fn range(&self, position: u64, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let start = usize::try_from(position).map_err(|_| StorageError::OutOfRange)?;
        let end = start.checked_add(len).ok_or(StorageError::OutOfRange)?;
        if end > self.data.len() {
            return Err(StorageError::OutOfRange);
        }
        Ok(start..end)
    }
}

fn covers(fault: Option<u64>, position: u64, len: usize) -> bool {
    fault.is_some_and(|at| (position..position + len as u64).contains(&at))
}

impl Storage for RamDisk {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.len() / self.block_size as usize) as u64
    }

    fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    fn read(&mut self, position: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let range = self.range(position, buf.len())?;
        self.reads.push((position, buf.len()));
        if covers(self.fail_reads_at, position, buf.len()) {
            self.completions.push_back(Err(StorageError::Io));
            return Ok(());
        }
        buf.copy_from_slice(&self.data[range]);
        self.completions.push_back(Ok(()));
        Ok(())
    }

    fn write(&mut self, position: u64, data: &[u8]) -> Result<(), StorageError> {
        if self.write_protected {
            return Err(StorageError::WriteProtected);
        }
        let range = self.range(position, data.len())?;
        self.writes.push((position, data.len()));
        if covers(self.fail_writes_at, position, data.len()) {
            self.completions.push_back(Err(StorageError::Io));
            return Ok(());
        }
        self.data[range].copy_from_slice(data);
        self.completions.push_back(Ok(()));
        Ok(())
    }
}

impl Completions for RamDisk {
    fn take_completion(&mut self) -> Option<Result<(), StorageError>> {
        self.completions.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn reads_copy_at_submit_and_complete_later() {
        let mut disk = RamDisk::new(512, 4).with_pattern();
        let mut buf = [0u8; 512];
        disk.read(512, &mut buf).unwrap();
        assert_eq!(&buf[..], &disk.contents()[512..1024]);
        assert!(disk.has_completion());
        assert_eq!(disk.take_completion(), Some(Ok(())));
        assert_eq!(disk.take_completion(), None);
    }

    #[test]
    pub fn faults_hit_the_covering_operation() {
        let mut disk = RamDisk::new(512, 4);
        disk.fail_writes_at(1030);
        disk.write(0, &[1; 1024]).unwrap();
        disk.write(1024, &[2; 512]).unwrap();
        assert_eq!(disk.take_completion(), Some(Ok(())));
        assert_eq!(disk.take_completion(), Some(Err(StorageError::Io)));
        assert_eq!(disk.contents()[1024], 0);
    }

    #[test]
    pub fn out_of_range_is_refused_synchronously() {
        let mut disk = RamDisk::new(512, 2);
        let mut buf = [0u8; 512];
        assert_eq!(disk.read(1024, &mut buf), Err(StorageError::OutOfRange));
        assert!(!disk.has_completion());
    }
}
