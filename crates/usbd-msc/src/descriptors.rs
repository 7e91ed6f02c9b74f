//! Interface and endpoint descriptors for the configuration descriptor.

use static_assertions::const_assert_eq;
use zerocopy::little_endian::U16;
use zerocopy::{Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::MscConfig;

pub const CLASS_MASS_STORAGE: u8 = 0x08;
pub const SUBCLASS_SCSI_TRANSPARENT: u8 = 0x06;
pub const PROTOCOL_BULK_ONLY: u8 = 0x50;

const DESCRIPTOR_INTERFACE: u8 = 0x04;
const DESCRIPTOR_ENDPOINT: u8 = 0x05;
const TRANSFER_BULK: u8 = 0x02;

pub const INTERFACE_DESCRIPTOR_LEN: usize = 9;
pub const ENDPOINT_DESCRIPTOR_LEN: usize = 7;
pub const DESCRIPTORS_LEN: usize = INTERFACE_DESCRIPTOR_LEN + 2 * ENDPOINT_DESCRIPTOR_LEN;

#[derive(IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct InterfaceDescriptor {
    length: u8,
    descriptor_type: u8,
    interface_number: u8,
    alternate_setting: u8,
    num_endpoints: u8,
    interface_class: u8,
    interface_sub_class: u8,
    interface_protocol: u8,
    interface: u8,
}

#[derive(IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct EndpointDescriptor {
    length: u8,
    descriptor_type: u8,
    endpoint_address: u8,
    attributes: u8,
    max_packet_size: U16,
    interval: u8,
}

const_assert_eq!(core::mem::size_of::<InterfaceDescriptor>(), INTERFACE_DESCRIPTOR_LEN);
const_assert_eq!(core::mem::size_of::<EndpointDescriptor>(), ENDPOINT_DESCRIPTOR_LEN);

fn bulk_endpoint(address: u8, packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor {
        length: ENDPOINT_DESCRIPTOR_LEN as u8,
        descriptor_type: DESCRIPTOR_ENDPOINT,
        endpoint_address: address,
        attributes: TRANSFER_BULK,
        max_packet_size: U16::new(packet_size),
        interval: 0,
    }
}

/// The interface descriptor followed by the bulk IN and bulk OUT endpoint
/// descriptors, ready to be spliced into a configuration descriptor.
pub fn interface_descriptors(config: &MscConfig<'_>) -> [u8; DESCRIPTORS_LEN] {
    let interface = InterfaceDescriptor {
        length: INTERFACE_DESCRIPTOR_LEN as u8,
        descriptor_type: DESCRIPTOR_INTERFACE,
        interface_number: config.interface,
        alternate_setting: 0,
        num_endpoints: 2,
        interface_class: CLASS_MASS_STORAGE,
        interface_sub_class: SUBCLASS_SCSI_TRANSPARENT,
        interface_protocol: PROTOCOL_BULK_ONLY,
        interface: 0,
    };

    let mut out = [0u8; DESCRIPTORS_LEN];
    let (head, rest) = out.split_at_mut(INTERFACE_DESCRIPTOR_LEN);
    head.copy_from_slice(interface.as_bytes());
    let (tx, rx) = rest.split_at_mut(ENDPOINT_DESCRIPTOR_LEN);
    tx.copy_from_slice(bulk_endpoint(config.endpoints.tx.0, config.packet_size).as_bytes());
    rx.copy_from_slice(bulk_endpoint(config.endpoints.rx.0, config.packet_size).as_bytes());
    out
}
