//! Host side command descriptor blocks.

use crate::bot::CommandBlock;
use crate::scsi::opcode;

/// TEST UNIT READY: is the medium there?
#[derive(Debug, Clone, Copy, Default)]
pub struct TestUnitReadyCommand;

impl CommandBlock for TestUnitReadyCommand {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::TEST_UNIT_READY;
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}

/// REQUEST SENSE: fetch and clear the sense of the previous command.
#[derive(Debug, Clone, Copy)]
pub struct RequestSenseCommand {
    pub alloc_len: u8,
}

impl RequestSenseCommand {
    pub fn new(alloc_len: u8) -> Self {
        Self { alloc_len }
    }
}

impl CommandBlock for RequestSenseCommand {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::REQUEST_SENSE;
        cdb[4] = self.alloc_len;
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}

/// SCSI INQUIRY command (CDB).
///
/// Requests basic device identification (vendor, product, revision,
/// and type), or a vital product data page when `page` is set.
#[derive(Debug, Clone, Copy)]
pub struct InquiryCommand {
    /// Vital product data page to request instead of the standard data.
    pub page: Option<u8>,
    /// Allocation length: how many bytes the host expects back.
    pub alloc_len: u16,
}

impl InquiryCommand {
    /// Construct a standard `INQUIRY` with the given expected response size.
    pub fn new(alloc_len: u16) -> Self {
        Self { page: None, alloc_len }
    }

    pub fn vpd(page: u8, alloc_len: u16) -> Self {
        Self { page: Some(page), alloc_len }
    }
}

impl CommandBlock for InquiryCommand {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::INQUIRY;
        if let Some(page) = self.page {
            cdb[1] = 0x01; // EVPD
            cdb[2] = page;
        }
        cdb[3..5].copy_from_slice(&self.alloc_len.to_be_bytes());
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}

/// MODE SENSE (6), all pages. Only the header matters to us.
#[derive(Debug, Clone, Copy)]
pub struct ModeSense6Command {
    pub alloc_len: u8,
}

impl ModeSense6Command {
    pub fn new(alloc_len: u8) -> Self {
        Self { alloc_len }
    }
}

impl CommandBlock for ModeSense6Command {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::MODE_SENSE_6;
        cdb[2] = crate::scsi::mode::ALL_PAGES;
        cdb[4] = self.alloc_len;
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}

/// READ FORMAT CAPACITIES, used by hosts that speak the UFI dialect.
#[derive(Debug, Clone, Copy)]
pub struct ReadFormatCapacitiesCommand {
    pub alloc_len: u16,
}

impl ReadFormatCapacitiesCommand {
    pub fn new(alloc_len: u16) -> Self {
        Self { alloc_len }
    }
}

impl CommandBlock for ReadFormatCapacitiesCommand {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::READ_FORMAT_CAPACITIES;
        cdb[7..9].copy_from_slice(&self.alloc_len.to_be_bytes());
        cdb
    }

    fn len(&self) -> u8 {
        10
    }
}

/// READ CAPACITY (10) command, returns 8 bytes of capacity data.
#[derive(Debug, Clone, Copy)]
pub struct ReadCapacity10Command {
    pub logical_unit_number: u8,
}

impl ReadCapacity10Command {
    pub fn new(logical_unit_number: u8) -> Self {
        Self { logical_unit_number }
    }
}

impl CommandBlock for ReadCapacity10Command {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::READ_CAPACITY_10;
        // Byte 1: legacy LUN field in bits 7-5
        cdb[1] = (self.logical_unit_number & 0x07) << 5;
        cdb
    }

    fn len(&self) -> u8 {
        10
    }
}

/// READ(10): read contiguous blocks starting from an LBA.
#[derive(Debug, Clone, Copy)]
pub struct Read10Command {
    pub logical_block_address: u32,
    pub logical_unit_number: u8,
    pub transfer_length: u16,
}

impl Read10Command {
    pub fn new(logical_unit_number: u8, logical_block_address: u32, transfer_length: u16) -> Self {
        Self {
            logical_block_address,
            logical_unit_number,
            transfer_length,
        }
    }
}

impl CommandBlock for Read10Command {
    fn to_bytes(&self) -> [u8; 16] {
        rw10(opcode::READ_10, self.logical_unit_number, self.logical_block_address, self.transfer_length)
    }

    fn len(&self) -> u8 {
        10
    }
}

/// WRITE(10): write contiguous blocks starting from an LBA.
#[derive(Debug, Clone, Copy)]
pub struct Write10Command {
    pub logical_block_address: u32,
    pub logical_unit_number: u8,
    pub transfer_length: u16,
}

impl Write10Command {
    pub fn new(logical_unit_number: u8, logical_block_address: u32, transfer_length: u16) -> Self {
        Self {
            logical_block_address,
            logical_unit_number,
            transfer_length,
        }
    }
}

impl CommandBlock for Write10Command {
    fn to_bytes(&self) -> [u8; 16] {
        rw10(opcode::WRITE_10, self.logical_unit_number, self.logical_block_address, self.transfer_length)
    }

    fn len(&self) -> u8 {
        10
    }
}

/// VERIFY(10) without byte comparison: the device reads the range back.
#[derive(Debug, Clone, Copy)]
pub struct Verify10Command {
    pub logical_block_address: u32,
    pub verification_length: u16,
}

impl Verify10Command {
    pub fn new(logical_block_address: u32, verification_length: u16) -> Self {
        Self {
            logical_block_address,
            verification_length,
        }
    }
}

impl CommandBlock for Verify10Command {
    fn to_bytes(&self) -> [u8; 16] {
        rw10(opcode::VERIFY_10, 0, self.logical_block_address, self.verification_length)
    }

    fn len(&self) -> u8 {
        10
    }
}

fn rw10(op: u8, logical_unit_number: u8, logical_block_address: u32, length: u16) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = op;
    cdb[1] = (logical_unit_number & 0x07) << 5;
    cdb[2..6].copy_from_slice(&logical_block_address.to_be_bytes());
    cdb[7..9].copy_from_slice(&length.to_be_bytes());
    cdb
}

/// START STOP UNIT with the LOEJ bit set: load (`start`) or eject.
#[derive(Debug, Clone, Copy)]
pub struct StartStopUnitCommand {
    pub start: bool,
}

impl StartStopUnitCommand {
    pub fn eject() -> Self {
        Self { start: false }
    }

    pub fn load() -> Self {
        Self { start: true }
    }
}

impl CommandBlock for StartStopUnitCommand {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::START_STOP_UNIT;
        cdb[4] = 0x02 | self.start as u8;
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PreventAllowMediumRemovalCommand {
    pub prevent: bool,
}

impl PreventAllowMediumRemovalCommand {
    pub fn new(prevent: bool) -> Self {
        Self { prevent }
    }
}

impl CommandBlock for PreventAllowMediumRemovalCommand {
    fn to_bytes(&self) -> [u8; 16] {
        let mut cdb = [0u8; 16];
        cdb[0] = opcode::PREVENT_ALLOW_MEDIUM_REMOVAL;
        cdb[4] = self.prevent as u8;
        cdb
    }

    fn len(&self) -> u8 {
        6
    }
}
