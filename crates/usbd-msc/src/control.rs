//! Class specific requests on the default control pipe.

use thiserror::Error;

/// bmRequestType: device to host.
const DIRECTION_IN: u8 = 0x80;
const TYPE_MASK: u8 = 0x60;
const TYPE_CLASS: u8 = 0x20;
const RECIPIENT_MASK: u8 = 0x1F;
const RECIPIENT_INTERFACE: u8 = 0x01;

/// Reasons a control request is refused. The caller answers with a
/// protocol stall on endpoint zero.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    #[error("request {request:#04x} is not handled by this interface")]
    Unsupported { request: u8 },
    #[error("class request {request:#04x} has invalid wValue, wLength or direction")]
    Malformed { request: u8 },
    #[error("no room for the {0} byte data stage")]
    BufferTooSmall(usize),
}

/// The eight byte setup packet of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn parse(bytes: &[u8; 8]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// A class request addressed to `interface`.
    pub fn class_interface(device_to_host: bool, request: u8, interface: u8, length: u16) -> Self {
        Self {
            request_type: TYPE_CLASS | RECIPIENT_INTERFACE | if device_to_host { DIRECTION_IN } else { 0 },
            request,
            value: 0,
            index: interface as u16,
            length,
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let [value_lo, value_hi] = self.value.to_le_bytes();
        let [index_lo, index_hi] = self.index.to_le_bytes();
        let [length_lo, length_hi] = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value_lo,
            value_hi,
            index_lo,
            index_hi,
            length_lo,
            length_hi,
        ]
    }

    pub fn is_device_to_host(&self) -> bool {
        self.request_type & DIRECTION_IN != 0
    }

    pub fn is_class_interface(&self) -> bool {
        self.request_type & TYPE_MASK == TYPE_CLASS
            && self.request_type & RECIPIENT_MASK == RECIPIENT_INTERFACE
    }
}
