//! Bulk-Only Transport wire records and the data phase policy.
//!
//! Every command travels as a 31 byte Command Block Wrapper on the bulk OUT
//! endpoint, is optionally followed by a data phase, and ends with a 13 byte
//! Command Status Wrapper on the bulk IN endpoint.

pub mod cbw;
pub mod csw;
pub mod phase;

pub use cbw::{CBW_LEN, CBW_SIGNATURE, Cbw, CommandBlock, FramingError};
pub use csw::{CSW_LEN, CSW_SIGNATURE, CommandStatus, Csw};
pub use phase::{DevicePhase, HostPhase, Plan, Termination, resolve, terminate};

/// Class specific request: Bulk-Only Mass Storage Reset.
pub const REQUEST_RESET: u8 = 0xFF;
/// Class specific request: Get Max LUN.
pub const REQUEST_GET_MAX_LUN: u8 = 0xFE;

/// Data phase direction as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}
