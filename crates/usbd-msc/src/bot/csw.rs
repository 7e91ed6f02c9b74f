use static_assertions::const_assert_eq;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const CSW_SIGNATURE: u32 = 0x53425355;
pub const CSW_LEN: usize = 13;

/// bCSWStatus values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    Passed = 0x00,
    Failed = 0x01,
    PhaseError = 0x02,
}

impl TryFrom<u8> for CommandStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(CommandStatus::Passed),
            0x01 => Ok(CommandStatus::Failed),
            0x02 => Ok(CommandStatus::PhaseError),
            other => Err(other),
        }
    }
}

/// Command Status Wrapper, little endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Csw {
    pub signature: U32,
    pub tag: U32,
    pub data_residue: U32,
    pub status: u8,
}

const_assert_eq!(core::mem::size_of::<Csw>(), CSW_LEN);

impl Csw {
    pub fn new(tag: u32, data_residue: u32, status: CommandStatus) -> Self {
        Self {
            signature: U32::new(CSW_SIGNATURE),
            tag: U32::new(tag),
            data_residue: U32::new(data_residue),
            status: status as u8,
        }
    }

    /// Host side decoding. Returns `None` unless the packet is exactly 13
    /// bytes with the CSW signature.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let csw = Csw::read_from_bytes(bytes).ok()?;
        (csw.signature.get() == CSW_SIGNATURE).then_some(csw)
    }

    pub fn tag(&self) -> u32 {
        self.tag.get()
    }

    pub fn data_residue(&self) -> u32 {
        self.data_residue.get()
    }

    pub fn status(&self) -> Result<CommandStatus, u8> {
        CommandStatus::try_from(self.status)
    }

    pub fn to_bytes(&self) -> [u8; CSW_LEN] {
        let mut buf = [0u8; CSW_LEN];
        buf.copy_from_slice(self.as_bytes());
        buf
    }
}
