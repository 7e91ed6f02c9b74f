#![doc = include_str!("../README.md")]
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod bot;
pub mod config;
pub mod control;
pub mod datapath;
pub mod descriptors;
pub mod driver;
pub mod lun;
pub mod scsi;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod storage;
pub mod transport;

pub use config::{Endpoints, MscConfig, MscError, ScratchConfig};
pub use control::{ControlError, SetupPacket};
pub use datapath::{Census, DATA_QUEUE_SIZE, QUERY_COUNT};
pub use driver::{Context, DeviceEvent, Event, Msc, Parts, State};
pub use lun::{LogicalUnit, MAX_LUNS};
pub use scsi::inquiry::Identity;
pub use storage::{Storage, StorageError};
pub use transport::{Cancellation, EndpointAddress, RequestId, RequestStatus, UsbTransport};

/// Default full speed bulk packet size.
pub const MSC_DATA_EP_SIZE: u16 = 64;
/// Bulk packet size on high speed links.
pub const MSC_DATA_EP_SIZE_HS: u16 = 512;
/// Block size the request pool is dimensioned for.
pub const MSC_BLOCK_SIZE: usize = 512;
