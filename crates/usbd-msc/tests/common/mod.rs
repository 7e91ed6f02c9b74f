#![allow(dead_code)]

use usbd_msc::sim::{Host, LoopbackTransport, RamDisk};
use usbd_msc::{EndpointAddress, LogicalUnit, Msc, MscConfig, ScratchConfig};

pub const RX: EndpointAddress = EndpointAddress(0x01);
pub const TX: EndpointAddress = EndpointAddress(0x81);

pub type Device = Msc<'static, LoopbackTransport, RamDisk>;

/// A configured driver serving `disks`, and a host attached to it.
pub fn device_with(disks: Vec<RamDisk>, scratch: usize, packet_size: u16) -> (Device, Host) {
    let config = MscConfig {
        packet_size,
        scratch: ScratchConfig::Allocate(scratch),
        ..MscConfig::default()
    };
    let mut msc = Msc::new(LoopbackTransport::new(), disks.into_iter().map(LogicalUnit::new), config).unwrap();
    let mut host = Host::attach(&msc);
    host.configure(&mut msc);
    (msc, host)
}

/// One 32 KiB patterned disk, 1 KiB of scratch and full speed packets.
pub fn device() -> (Device, Host) {
    device_with(vec![RamDisk::new(512, 64).with_pattern()], 1024, 64)
}

pub fn disk(msc: &Device, lun: usize) -> &RamDisk {
    msc.unit(lun).unwrap().storage()
}

pub fn disk_mut(msc: &mut Device, lun: usize) -> &mut RamDisk {
    msc.unit_mut(lun).unwrap().storage_mut()
}
