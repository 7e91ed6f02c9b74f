use static_assertions::const_assert_eq;
use thiserror::Error;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::Direction;

pub const CBW_SIGNATURE: u32 = 0x43425355;
pub const CBW_LEN: usize = 31;

const FLAG_DIRECTION_IN: u8 = 0x80;

/// A SCSI command descriptor block as carried in a CBW.
pub trait CommandBlock {
    /// Return the command bytes (CDB).
    fn to_bytes(&self) -> [u8; 16];

    /// Return the effective length of the command.
    fn len(&self) -> u8;
}

/// Raw command bytes; anything past 16 bytes is dropped.
impl CommandBlock for [u8] {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        let len = self.len().min(16);
        cdb[..len].copy_from_slice(&self[..len]);
        cdb
    }

    fn len(&self) -> u8 {
        <[u8]>::len(self).min(16) as u8
    }
}

/// Reasons a received packet is not a meaningful Command Block Wrapper.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("command block wrapper is {0} bytes long, expected 31")]
    Length(usize),
    #[error("bad command block wrapper signature {0:#010x}")]
    Signature(u32),
}

/// Command Block Wrapper, little endian on the wire.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Cbw {
    pub signature: U32,
    pub tag: U32,
    pub data_transfer_length: U32,
    pub flags: u8,
    pub lun: u8,
    pub cb_length: u8,
    pub cb: [u8; 16],
}

const_assert_eq!(core::mem::size_of::<Cbw>(), CBW_LEN);

impl Cbw {
    pub fn new<T: CommandBlock + ?Sized>(tag: u32, data_len: u32, direction: Direction, lun: u8, cmd: &T) -> Self {
        Self {
            signature: U32::new(CBW_SIGNATURE),
            tag: U32::new(tag),
            data_transfer_length: U32::new(data_len),
            flags: match direction {
                Direction::In => FLAG_DIRECTION_IN,
                Direction::Out => 0x00,
            },
            lun,
            cb_length: cmd.len(),
            cb: cmd.to_bytes(),
        }
    }

    /// Validate a received packet. Anything but exactly 31 bytes with the
    /// right signature is rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self, FramingError> {
        let cbw = Cbw::read_from_bytes(bytes).map_err(|_| FramingError::Length(bytes.len()))?;
        if cbw.signature.get() != CBW_SIGNATURE {
            return Err(FramingError::Signature(cbw.signature.get()));
        }
        Ok(cbw)
    }

    pub fn tag(&self) -> u32 {
        self.tag.get()
    }

    pub fn data_transfer_length(&self) -> u32 {
        self.data_transfer_length.get()
    }

    pub fn direction(&self) -> Direction {
        if self.flags & FLAG_DIRECTION_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn lun(&self) -> u8 {
        self.lun & 0x0F
    }

    /// The command block trimmed to its declared length, or `None` when the
    /// declared length is outside 1..=16.
    pub fn command_block(&self) -> Option<&[u8]> {
        match self.cb_length & 0x1F {
            len @ 1..=16 => Some(&self.cb[..len as usize]),
            _ => None,
        }
    }

    /// Serialize into exactly 31 bytes.
    pub fn to_bytes(&self) -> [u8; CBW_LEN] {
        let mut buf = [0u8; CBW_LEN];
        buf.copy_from_slice(self.as_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn layout_matches_wire_offsets() {
        let cbw = Cbw::new(0xA1B2C3D4, 0x200, Direction::In, 2, &[0x28, 0, 0, 0, 0, 7, 0, 0, 1, 0][..]);
        let bytes = cbw.to_bytes();

        assert_eq!(&bytes[0..4], &[0x55, 0x53, 0x42, 0x43]);
        assert_eq!(&bytes[4..8], &[0xD4, 0xC3, 0xB2, 0xA1]);
        assert_eq!(&bytes[8..12], &[0x00, 0x02, 0x00, 0x00]);
        assert_eq!(bytes[12], 0x80);
        assert_eq!(bytes[13], 2);
        assert_eq!(bytes[14], 10);
        assert_eq!(bytes[15], 0x28);
        assert_eq!(bytes[20], 7);
        assert_eq!(&bytes[25..31], &[0; 6]);
    }

    #[test]
    pub fn parse_reads_back_fields() {
        let bytes = Cbw::new(9, 36, Direction::In, 0, &[0x12, 0, 0, 0, 36, 0][..]).to_bytes();
        let cbw = Cbw::parse(&bytes).unwrap();

        assert_eq!(cbw.tag(), 9);
        assert_eq!(cbw.data_transfer_length(), 36);
        assert_eq!(cbw.direction(), Direction::In);
        assert_eq!(cbw.command_block(), Some(&[0x12, 0, 0, 0, 36, 0][..]));
    }

    #[test]
    pub fn rejects_wrong_length() {
        let bytes = Cbw::new(1, 0, Direction::Out, 0, &[0u8][..]).to_bytes();
        assert!(matches!(Cbw::parse(&bytes[..30]), Err(FramingError::Length(30))));
        let mut long = [0u8; 32];
        long[..31].copy_from_slice(&bytes);
        assert!(matches!(Cbw::parse(&long), Err(FramingError::Length(32))));
    }

    #[test]
    pub fn rejects_wrong_signature() {
        let mut bytes = Cbw::new(1, 0, Direction::Out, 0, &[0u8][..]).to_bytes();
        bytes[3] = 0x44;
        assert!(matches!(
            Cbw::parse(&bytes),
            Err(FramingError::Signature(0x44425355))
        ));
    }

    #[test]
    pub fn out_of_range_command_length_has_no_block() {
        let mut cbw = Cbw::new(1, 0, Direction::Out, 0, &[0u8][..]);
        cbw.cb_length = 0;
        assert_eq!(cbw.command_block(), None);
        cbw.cb_length = 17;
        assert_eq!(cbw.command_block(), None);
    }
}
