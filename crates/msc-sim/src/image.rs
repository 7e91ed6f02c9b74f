use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use usbd_msc::sim::Completions;
use usbd_msc::{Storage, StorageError};

/// A disk image file served as a logical unit. Operations run when they are
/// accepted; their results are queued until the session collects them.
pub struct ImageDisk {
    file: File,
    block_size: u32,
    block_count: u64,
    read_only: bool,
    completions: VecDeque<Result<(), StorageError>>,
}

impl ImageDisk {
    /// Open `path`. With `create`, a missing image is created and a short
    /// one grown to `create` blocks.
    pub fn open(path: &Path, block_size: u32, create: Option<u64>, read_only: bool) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            bail!("block size {block_size} is not a power of two");
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(create.is_some() && !read_only)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening image {}", path.display()))?;

        if let Some(blocks) = create {
            let len = blocks * block_size as u64;
            if file.metadata()?.len() < len {
                debug!("growing {} to {len} bytes", path.display());
                file.set_len(len)?;
            }
        }

        let len = file.metadata()?.len();
        if len % block_size as u64 != 0 {
            warn!("image is not a whole number of {block_size} byte blocks, the tail is ignored");
        }
        let block_count = len / block_size as u64;
        if block_count == 0 {
            bail!("image {} holds no complete block", path.display());
        }

        Ok(Self {
            file,
            block_size,
            block_count,
            read_only,
            completions: VecDeque::new(),
        })
    }

    fn check(&self, position: u64, len: usize) -> Result<(), StorageError> {
        let end = position.checked_add(len as u64).ok_or(StorageError::OutOfRange)?;
        if end > self.block_count * self.block_size as u64 {
            return Err(StorageError::OutOfRange);
        }
        Ok(())
    }

    fn complete(&mut self, result: io::Result<()>) {
        let result = result.map_err(|err| {
            warn!("image i/o failed: {err}");
            StorageError::Io
        });
        self.completions.push_back(result);
    }
}

impl Storage for ImageDisk {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn is_write_protected(&self) -> bool {
        self.read_only
    }

    fn read(&mut self, position: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.check(position, buf.len())?;
        let result = self
            .file
            .seek(SeekFrom::Start(position))
            .and_then(|_| self.file.read_exact(buf));
        self.complete(result);
        Ok(())
    }

    fn write(&mut self, position: u64, data: &[u8]) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::WriteProtected);
        }
        self.check(position, data.len())?;
        let result = self
            .file
            .seek(SeekFrom::Start(position))
            .and_then(|_| self.file.write_all(data));
        self.complete(result);
        Ok(())
    }
}

impl Completions for ImageDisk {
    fn take_completion(&mut self) -> Option<Result<(), StorageError>> {
        self.completions.pop_front()
    }
}
