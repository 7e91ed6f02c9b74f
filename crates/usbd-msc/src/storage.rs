//! Block storage behind a logical unit.

use alloc::boxed::Box;
use thiserror::Error;

use crate::scsi::sense::Sense;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage i/o failed")]
    Io,
    #[error("medium not present")]
    NotReady,
    #[error("access beyond the end of the medium")]
    OutOfRange,
    #[error("medium is write protected")]
    WriteProtected,
}

impl StorageError {
    /// Sense reported to the host when a read fails with this error.
    pub fn read_sense(self) -> Sense {
        match self {
            StorageError::Io => Sense::UNRECOVERED_READ_ERROR,
            other => other.common_sense(),
        }
    }

    /// Sense reported to the host when a write fails with this error.
    pub fn write_sense(self) -> Sense {
        match self {
            StorageError::Io => Sense::WRITE_FAULT,
            other => other.common_sense(),
        }
    }

    fn common_sense(self) -> Sense {
        match self {
            StorageError::NotReady => Sense::MEDIUM_NOT_PRESENT,
            StorageError::OutOfRange => Sense::LBA_OUT_OF_RANGE,
            StorageError::WriteProtected => Sense::WRITE_PROTECTED,
            StorageError::Io => Sense::UNRECOVERED_READ_ERROR,
        }
    }
}

/// Block interface of a medium.
///
/// `read` and `write` start an operation and return immediately. An `Ok`
/// means the operation was accepted and its result will arrive later through
/// [`Msc::storage_completed`](crate::Msc::storage_completed); an `Err` means
/// it never started. The driver keeps at most one operation outstanding and
/// does not touch the buffer region until that completion arrives.
/// Positions and lengths are in bytes and always block aligned.
pub trait Storage {
    fn block_size(&self) -> u32;

    fn block_count(&self) -> u64;

    fn is_write_protected(&self) -> bool {
        false
    }

    fn read(&mut self, position: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    fn write(&mut self, position: u64, data: &[u8]) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn is_write_protected(&self) -> bool {
        (**self).is_write_protected()
    }

    fn read(&mut self, position: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(position, buf)
    }

    fn write(&mut self, position: u64, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(position, data)
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn is_write_protected(&self) -> bool {
        (**self).is_write_protected()
    }

    fn read(&mut self, position: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(position, buf)
    }

    fn write(&mut self, position: u64, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(position, data)
    }
}
