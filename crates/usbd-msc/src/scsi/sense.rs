use core::fmt;

use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Sense key, additional sense code and qualifier of the last failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

pub mod key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;
}

impl Sense {
    pub const NONE: Sense = Sense::new(key::NO_SENSE, 0x00, 0x00);
    pub const INVALID_COMMAND: Sense = Sense::new(key::ILLEGAL_REQUEST, 0x20, 0x00);
    pub const LBA_OUT_OF_RANGE: Sense = Sense::new(key::ILLEGAL_REQUEST, 0x21, 0x00);
    pub const INVALID_FIELD_IN_CDB: Sense = Sense::new(key::ILLEGAL_REQUEST, 0x24, 0x00);
    pub const MEDIUM_REMOVAL_PREVENTED: Sense = Sense::new(key::ILLEGAL_REQUEST, 0x53, 0x02);
    pub const MEDIUM_NOT_PRESENT: Sense = Sense::new(key::NOT_READY, 0x3A, 0x00);
    pub const WRITE_FAULT: Sense = Sense::new(key::MEDIUM_ERROR, 0x0C, 0x00);
    pub const UNRECOVERED_READ_ERROR: Sense = Sense::new(key::MEDIUM_ERROR, 0x11, 0x00);
    pub const WRITE_PROTECTED: Sense = Sense::new(key::DATA_PROTECT, 0x27, 0x00);

    pub const fn new(key: u8, asc: u8, ascq: u8) -> Self {
        Self { key, asc, ascq }
    }

    pub fn is_none(&self) -> bool {
        self.key == key::NO_SENSE
    }

    fn key_name(&self) -> &'static str {
        match self.key {
            key::NO_SENSE => "no sense",
            key::NOT_READY => "not ready",
            key::MEDIUM_ERROR => "medium error",
            key::ILLEGAL_REQUEST => "illegal request",
            key::UNIT_ATTENTION => "unit attention",
            key::DATA_PROTECT => "data protect",
            _ => "unknown sense key",
        }
    }
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (asc {:#04x}, ascq {:#04x})", self.key_name(), self.asc, self.ascq)
    }
}

pub const SENSE_DATA_LEN: usize = 18;
const RESPONSE_CODE_CURRENT: u8 = 0x70;

/// Fixed format sense data returned by REQUEST SENSE.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SenseData {
    pub response_code: u8,
    pub obsolete: u8,
    pub sense_key: u8,
    pub information: [u8; 4],
    pub additional_length: u8,
    pub command_specific: [u8; 4],
    pub asc: u8,
    pub ascq: u8,
    pub fru_code: u8,
    pub sense_key_specific: [u8; 3],
}

const_assert_eq!(core::mem::size_of::<SenseData>(), SENSE_DATA_LEN);

impl SenseData {
    pub fn new(sense: Sense) -> Self {
        Self {
            response_code: RESPONSE_CODE_CURRENT,
            obsolete: 0,
            sense_key: sense.key & 0x0F,
            information: [0; 4],
            additional_length: (SENSE_DATA_LEN - 8) as u8,
            command_specific: [0; 4],
            asc: sense.asc,
            ascq: sense.ascq,
            fru_code: 0,
            sense_key_specific: [0; 3],
        }
    }

    /// Parse fixed format sense data. Returns `None` if the buffer is too
    /// short to hold the key and codes.
    pub fn parse(buf: &[u8]) -> Option<Sense> {
        if buf.len() < 14 {
            return None;
        }
        Some(Sense::new(buf[2] & 0x0F, buf[12], buf[13]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn fixed_format_layout() {
        let data = SenseData::new(Sense::INVALID_COMMAND);
        let bytes = data.as_bytes();
        assert_eq!(bytes.len(), 18);
        assert_eq!(bytes[0], 0x70);
        assert_eq!(bytes[2], 0x05);
        assert_eq!(bytes[7], 10);
        assert_eq!(bytes[12], 0x20);
        assert_eq!(bytes[13], 0x00);
        assert_eq!(SenseData::parse(bytes), Some(Sense::INVALID_COMMAND));
    }

    #[test]
    pub fn no_sense_is_empty() {
        assert!(Sense::NONE.is_none());
        assert!(Sense::default().is_none());
        assert!(!Sense::MEDIUM_NOT_PRESENT.is_none());
    }

    #[test]
    pub fn display_names_the_key() {
        use alloc::string::ToString;
        assert_eq!(Sense::WRITE_PROTECTED.to_string(), "data protect (asc 0x27, ascq 0x00)");
    }
}
