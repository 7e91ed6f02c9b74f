use alloc::vec;
use alloc::vec::Vec;
use thiserror::Error;
use zerocopy::IntoBytes;

use crate::MSC_DATA_EP_SIZE;
use crate::lun::MAX_LUNS;
use crate::scsi::inquiry::Identity;
use crate::transport::EndpointAddress;

/// Scratch buffer length used when none is configured.
pub const DEFAULT_SCRATCH_LEN: usize = 4096;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MscError {
    #[error("no logical units were supplied")]
    NoUnits,
    #[error("{0} logical units supplied, at most 16 are supported")]
    TooManyUnits(usize),
    #[error("packet size {0} is not a power of two between 8 and 512")]
    PacketSize(u16),
    #[error("endpoint {0} has the wrong direction")]
    EndpointDirection(EndpointAddress),
    #[error("scratch buffer of {0} bytes cannot be split into block and packet aligned halves")]
    ScratchLength(usize),
    #[error("scratch buffer is not 4-byte aligned")]
    ScratchAlignment,
    #[error("logical unit {lun} reports an unusable block size of {block_size}")]
    BlockSize { lun: usize, block_size: u32 },
}

/// Bulk endpoint pair of the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    /// Bulk OUT, host to device.
    pub rx: EndpointAddress,
    /// Bulk IN, device to host.
    pub tx: EndpointAddress,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rx: EndpointAddress(0x01),
            tx: EndpointAddress(0x81),
        }
    }
}

/// Where the pipeline's scratch buffer comes from.
#[derive(Debug)]
pub enum ScratchConfig<'b> {
    /// Allocate a word aligned buffer of this many bytes.
    Allocate(usize),
    /// Use a caller owned buffer. It is handed back by `Msc::unbind`.
    Borrowed(&'b mut [u8]),
}

impl ScratchConfig<'_> {
    pub fn len(&self) -> usize {
        match self {
            ScratchConfig::Allocate(len) => *len,
            ScratchConfig::Borrowed(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct MscConfig<'b> {
    pub interface: u8,
    pub endpoints: Endpoints,
    /// wMaxPacketSize of both bulk endpoints.
    pub packet_size: u16,
    pub scratch: ScratchConfig<'b>,
    pub identity: Identity,
}

impl Default for MscConfig<'_> {
    fn default() -> Self {
        Self {
            interface: 0,
            endpoints: Endpoints::default(),
            packet_size: MSC_DATA_EP_SIZE,
            scratch: ScratchConfig::Allocate(DEFAULT_SCRATCH_LEN),
            identity: Identity::default(),
        }
    }
}

impl MscConfig<'_> {
    /// Check the configuration against the block sizes of the units it will
    /// serve. Each half of the scratch buffer holds one query, so a half must
    /// be a whole number of blocks of every unit and of packets.
    pub fn validate(&self, block_sizes: &[u32]) -> Result<(), MscError> {
        if block_sizes.is_empty() {
            return Err(MscError::NoUnits);
        }
        if block_sizes.len() > MAX_LUNS {
            return Err(MscError::TooManyUnits(block_sizes.len()));
        }
        if !(8..=512).contains(&self.packet_size) || !self.packet_size.is_power_of_two() {
            return Err(MscError::PacketSize(self.packet_size));
        }
        if !self.endpoints.tx.is_in() {
            return Err(MscError::EndpointDirection(self.endpoints.tx));
        }
        if self.endpoints.rx.is_in() {
            return Err(MscError::EndpointDirection(self.endpoints.rx));
        }
        if let ScratchConfig::Borrowed(buf) = &self.scratch {
            if buf.as_ptr() as usize % 4 != 0 {
                return Err(MscError::ScratchAlignment);
            }
        }

        let len = self.scratch.len();
        let half = len / 2;
        if half == 0 || len % 2 != 0 || half % self.packet_size as usize != 0 {
            return Err(MscError::ScratchLength(len));
        }
        for (lun, &block_size) in block_sizes.iter().enumerate() {
            if block_size == 0 {
                return Err(MscError::BlockSize { lun, block_size });
            }
            if half % block_size as usize != 0 {
                return Err(MscError::ScratchLength(len));
            }
        }
        Ok(())
    }
}

/// The scratch buffer in use by a driver instance.
pub(crate) enum Scratch<'b> {
    Owned(Vec<u32>),
    Borrowed(&'b mut [u8]),
}

impl<'b> Scratch<'b> {
    pub(crate) fn new(config: ScratchConfig<'b>) -> Self {
        match config {
            ScratchConfig::Allocate(len) => Scratch::Owned(vec![0u32; len.div_ceil(4)]),
            ScratchConfig::Borrowed(buf) => Scratch::Borrowed(buf),
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Scratch::Owned(words) => words.as_mut_slice().as_mut_bytes(),
            Scratch::Borrowed(buf) => buf,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Scratch::Owned(words) => words.len() * 4,
            Scratch::Borrowed(buf) => buf.len(),
        }
    }

    /// Hand a caller supplied buffer back. Owned buffers are dropped.
    pub(crate) fn release(self) -> Option<&'b mut [u8]> {
        match self {
            Scratch::Owned(_) => None,
            Scratch::Borrowed(buf) => Some(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn default_config_is_valid() {
        assert_eq!(MscConfig::default().validate(&[512]), Ok(()));
    }

    #[test]
    pub fn rejects_bad_packet_sizes() {
        for packet_size in [0, 4, 48, 1024] {
            let config = MscConfig { packet_size, ..MscConfig::default() };
            assert_eq!(config.validate(&[512]), Err(MscError::PacketSize(packet_size)));
        }
    }

    #[test]
    pub fn halves_must_hold_whole_blocks() {
        let config = MscConfig {
            scratch: ScratchConfig::Allocate(1536),
            ..MscConfig::default()
        };
        assert_eq!(config.validate(&[512]), Err(MscError::ScratchLength(1536)));
        assert_eq!(config.validate(&[256]), Ok(()));

        let config = MscConfig {
            scratch: ScratchConfig::Allocate(2048),
            ..MscConfig::default()
        };
        assert_eq!(config.validate(&[512, 4096]), Err(MscError::ScratchLength(2048)));
    }

    #[test]
    pub fn unit_count_is_bounded() {
        let config = MscConfig::default();
        assert_eq!(config.validate(&[]), Err(MscError::NoUnits));
        assert_eq!(config.validate(&[512; 17]), Err(MscError::TooManyUnits(17)));
    }

    #[test]
    pub fn endpoint_directions_are_checked() {
        let config = MscConfig {
            endpoints: Endpoints { rx: EndpointAddress(0x82), tx: EndpointAddress(0x81) },
            ..MscConfig::default()
        };
        assert_eq!(
            config.validate(&[512]),
            Err(MscError::EndpointDirection(EndpointAddress(0x82)))
        );
    }

    #[test]
    pub fn borrowed_buffers_must_be_aligned() {
        let mut words = [0u32; 257];
        let bytes = words.as_mut_bytes();
        let config = MscConfig {
            scratch: ScratchConfig::Borrowed(&mut bytes[1..1025]),
            ..MscConfig::default()
        };
        assert_eq!(config.validate(&[512]), Err(MscError::ScratchAlignment));
    }

    #[test]
    pub fn owned_scratch_is_word_aligned() {
        let mut scratch = Scratch::new(ScratchConfig::Allocate(1024));
        assert_eq!(scratch.len(), 1024);
        assert_eq!(scratch.as_mut_slice().as_ptr() as usize % 4, 0);
        assert!(scratch.release().is_none());
    }
}
