use log::debug;

use crate::scsi::sense::Sense;
use crate::storage::Storage;

/// Highest number of logical units Get Max LUN can report.
pub const MAX_LUNS: usize = 16;

/// A storage backend plus the per unit SCSI state the host can observe.
pub struct LogicalUnit<S> {
    storage: S,
    block_size: u32,
    block_count: u64,
    sense: Sense,
    removal_prevented: bool,
    ejected: bool,
}

impl<S: Storage> LogicalUnit<S> {
    pub fn new(storage: S) -> Self {
        let block_size = storage.block_size();
        let block_count = storage.block_count();
        Self {
            storage,
            block_size,
            block_count,
            sense: Sense::NONE,
            removal_prevented: false,
            ejected: false,
        }
    }

    /// Re-read the geometry from the backend, e.g. after a medium change.
    pub fn refresh(&mut self) {
        self.block_size = self.storage.block_size();
        self.block_count = self.storage.block_count();
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.block_count * self.block_size as u64
    }

    pub fn is_write_protected(&self) -> bool {
        self.storage.is_write_protected()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Current sense, left in place.
    pub fn sense(&self) -> Sense {
        self.sense
    }

    pub fn set_sense(&mut self, sense: Sense) {
        debug!("sense set: {sense}");
        self.sense = sense;
    }

    /// Read-once access used by REQUEST SENSE.
    pub fn take_sense(&mut self) -> Sense {
        core::mem::replace(&mut self.sense, Sense::NONE)
    }

    pub fn is_removal_prevented(&self) -> bool {
        self.removal_prevented
    }

    pub fn set_removal_prevented(&mut self, prevented: bool) {
        self.removal_prevented = prevented;
    }

    pub fn is_ejected(&self) -> bool {
        self.ejected
    }

    pub fn set_ejected(&mut self, ejected: bool) {
        self.ejected = ejected;
    }

    /// Convert a block range into a byte range, rejecting ranges past the
    /// end of the medium.
    pub fn byte_range(&self, lba: u64, blocks: u32) -> Result<(u64, u64), Sense> {
        let end = lba.checked_add(blocks as u64).ok_or(Sense::LBA_OUT_OF_RANGE)?;
        if end > self.block_count {
            return Err(Sense::LBA_OUT_OF_RANGE);
        }
        let block_size = self.block_size as u64;
        Ok((lba * block_size, blocks as u64 * block_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RamDisk;

    #[test]
    pub fn geometry_comes_from_storage() {
        let unit = LogicalUnit::new(RamDisk::new(512, 100));
        assert_eq!(unit.block_size(), 512);
        assert_eq!(unit.block_count(), 100);
        assert_eq!(unit.capacity_bytes(), 51200);
    }

    #[test]
    pub fn sense_is_read_once() {
        let mut unit = LogicalUnit::new(RamDisk::new(512, 8));
        unit.set_sense(Sense::INVALID_COMMAND);
        assert_eq!(unit.sense(), Sense::INVALID_COMMAND);
        assert_eq!(unit.take_sense(), Sense::INVALID_COMMAND);
        assert_eq!(unit.take_sense(), Sense::NONE);
    }

    #[test]
    pub fn byte_range_checks_bounds() {
        let unit = LogicalUnit::new(RamDisk::new(512, 8));
        assert_eq!(unit.byte_range(2, 4), Ok((1024, 2048)));
        assert_eq!(unit.byte_range(4, 4), Ok((2048, 2048)));
        assert_eq!(unit.byte_range(5, 4), Err(Sense::LBA_OUT_OF_RANGE));
        assert_eq!(unit.byte_range(u64::MAX, 1), Err(Sense::LBA_OUT_OF_RANGE));
    }
}
