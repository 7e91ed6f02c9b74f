use static_assertions::const_assert_eq;
use zerocopy::big_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const READ_CAPACITY_10_LEN: usize = 8;
pub const FORMAT_CAPACITY_LIST_LEN: usize = 12;

/// READ CAPACITY (10) parameter data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCapacity10Data {
    pub last_logical_block_address: u32,
    pub block_length_bytes: u32,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct ReadCapacity10Wire {
    last_logical_block_address: U32,
    block_length_bytes: U32,
}

const_assert_eq!(core::mem::size_of::<ReadCapacity10Wire>(), READ_CAPACITY_10_LEN);

impl ReadCapacity10Data {
    /// Report a medium of `block_count` blocks. Media with more than 2^32
    /// blocks report 0xFFFFFFFF, which tells the host to use the 16 byte
    /// variant.
    pub fn new(block_count: u64, block_size: u32) -> Self {
        let last = block_count.saturating_sub(1);
        Self {
            last_logical_block_address: u32::try_from(last).unwrap_or(u32::MAX),
            block_length_bytes: block_size,
        }
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        let (wire, _) = ReadCapacity10Wire::read_from_prefix(buf).ok()?;
        Some(Self {
            last_logical_block_address: wire.last_logical_block_address.get(),
            block_length_bytes: wire.block_length_bytes.get(),
        })
    }

    pub fn to_bytes(&self) -> [u8; READ_CAPACITY_10_LEN] {
        let wire = ReadCapacity10Wire {
            last_logical_block_address: U32::new(self.last_logical_block_address),
            block_length_bytes: U32::new(self.block_length_bytes),
        };
        let mut buf = [0u8; READ_CAPACITY_10_LEN];
        buf.copy_from_slice(wire.as_bytes());
        buf
    }

    pub fn total_capacity_bytes(&self) -> u64 {
        (self.last_logical_block_address as u64 + 1) * self.block_length_bytes as u64
    }
}

const DESCRIPTOR_FORMATTED_MEDIA: u8 = 0x02;

/// READ FORMAT CAPACITIES response: a list header followed by the current
/// capacity descriptor.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FormatCapacityList {
    reserved: [u8; 3],
    list_length: u8,
    block_count: U32,
    descriptor_code: u8,
    block_length: [u8; 3],
}

const_assert_eq!(core::mem::size_of::<FormatCapacityList>(), FORMAT_CAPACITY_LIST_LEN);

impl FormatCapacityList {
    pub fn new(block_count: u64, block_size: u32) -> Self {
        let [_, high, mid, low] = block_size.to_be_bytes();
        Self {
            reserved: [0; 3],
            list_length: 8,
            block_count: U32::new(u32::try_from(block_count).unwrap_or(u32::MAX)),
            descriptor_code: DESCRIPTOR_FORMATTED_MEDIA,
            block_length: [high, mid, low],
        }
    }

    pub fn block_count(&self) -> u32 {
        self.block_count.get()
    }
}
