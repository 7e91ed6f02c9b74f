use log::debug;
use zerocopy::IntoBytes;

use super::ScsiCommand;
use super::capacity::{FormatCapacityList, READ_CAPACITY_10_LEN, ReadCapacity10Data};
use super::inquiry::{Identity, InquiryData, vpd};
use super::mode;
use super::sense::{Sense, SenseData};
use crate::bot::DevicePhase;
use crate::lun::LogicalUnit;
use crate::storage::Storage;

/// What a command needs from the transport once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No data phase; the command succeeded.
    Status,
    /// Send the first `n` bytes of the response buffer.
    Respond(usize),
    /// Read `length` bytes at byte `position` and send them to the host.
    Read { position: u64, length: u64 },
    /// Receive `length` bytes from the host and write them at `position`.
    Write { position: u64, length: u64 },
    /// Read the range back from the medium without a host data phase.
    Verify { position: u64, length: u64 },
    /// Receive and drop a parameter list.
    AcceptParameters(usize),
    Fail(Sense),
}

impl Outcome {
    pub fn device_phase(&self) -> DevicePhase {
        match *self {
            Outcome::Respond(len) => DevicePhase::In(len as u64),
            Outcome::Read { length, .. } => DevicePhase::In(length),
            Outcome::Write { length, .. } => DevicePhase::Out(length),
            Outcome::AcceptParameters(len) => DevicePhase::Out(len as u64),
            Outcome::Status | Outcome::Verify { .. } | Outcome::Fail(_) => DevicePhase::None,
        }
    }

    /// Smallest unit the data phase can be cut at.
    pub fn granule(&self, block_size: u32) -> u64 {
        match self {
            Outcome::Read { .. } | Outcome::Write { .. } => block_size as u64,
            _ => 1,
        }
    }
}

fn respond(data: &[u8], allocation_length: usize, response: &mut [u8]) -> Outcome {
    let len = data.len().min(allocation_length).min(response.len());
    response[..len].copy_from_slice(&data[..len]);
    Outcome::Respond(len)
}

/// Run a decoded command against `unit`. Response data is written to the
/// front of `response`; media access is only described, the caller moves
/// the data.
pub fn execute<S: Storage>(
    command: &ScsiCommand,
    unit: &mut LogicalUnit<S>,
    identity: &Identity,
    response: &mut [u8],
) -> Outcome {
    debug!("executing {command:?}");

    if command.needs_medium() && unit.is_ejected() {
        return Outcome::Fail(Sense::MEDIUM_NOT_PRESENT);
    }

    match *command {
        ScsiCommand::TestUnitReady => Outcome::Status,
        ScsiCommand::RequestSense { allocation_length } => {
            let data = SenseData::new(unit.take_sense());
            respond(data.as_bytes(), allocation_length as usize, response)
        }
        ScsiCommand::Inquiry { evpd: false, page_code: 0, allocation_length } => {
            let data = InquiryData::new(identity);
            respond(data.as_bytes(), allocation_length as usize, response)
        }
        ScsiCommand::Inquiry { evpd: false, .. } => Outcome::Fail(Sense::INVALID_FIELD_IN_CDB),
        ScsiCommand::Inquiry { evpd: true, page_code, allocation_length } => {
            match vpd::write_page(page_code, identity.serial, response) {
                Some(len) => Outcome::Respond(len.min(allocation_length as usize)),
                None => Outcome::Fail(Sense::INVALID_FIELD_IN_CDB),
            }
        }
        ScsiCommand::ModeSense { allocation_length, long, .. } => {
            let write_protected = unit.is_write_protected();
            if long {
                respond(&mode::header_10(write_protected), allocation_length as usize, response)
            } else {
                respond(&mode::header_6(write_protected), allocation_length as usize, response)
            }
        }
        ScsiCommand::ModeSelect { parameter_list_length } => {
            Outcome::AcceptParameters(parameter_list_length as usize)
        }
        ScsiCommand::StartStopUnit { start, load_eject } => {
            if load_eject {
                if start {
                    unit.set_ejected(false);
                    unit.refresh();
                } else if unit.is_removal_prevented() {
                    return Outcome::Fail(Sense::MEDIUM_REMOVAL_PREVENTED);
                } else {
                    unit.set_ejected(true);
                }
            }
            Outcome::Status
        }
        ScsiCommand::PreventAllowMediumRemoval { prevent } => {
            unit.set_removal_prevented(prevent);
            Outcome::Status
        }
        ScsiCommand::ReadFormatCapacities { allocation_length } => {
            let list = FormatCapacityList::new(unit.block_count(), unit.block_size());
            respond(list.as_bytes(), allocation_length as usize, response)
        }
        ScsiCommand::ReadCapacity10 => {
            let data = ReadCapacity10Data::new(unit.block_count(), unit.block_size());
            respond(&data.to_bytes(), READ_CAPACITY_10_LEN, response)
        }
        ScsiCommand::Read { lba, blocks } => match unit.byte_range(lba, blocks) {
            Ok((_, 0)) => Outcome::Status,
            Ok((position, length)) => Outcome::Read { position, length },
            Err(sense) => Outcome::Fail(sense),
        },
        ScsiCommand::Write { lba, blocks } => {
            if unit.is_write_protected() {
                return Outcome::Fail(Sense::WRITE_PROTECTED);
            }
            match unit.byte_range(lba, blocks) {
                Ok((_, 0)) => Outcome::Status,
                Ok((position, length)) => Outcome::Write { position, length },
                Err(sense) => Outcome::Fail(sense),
            }
        }
        ScsiCommand::Verify { byte_check: true, .. } => Outcome::Fail(Sense::INVALID_FIELD_IN_CDB),
        ScsiCommand::Verify { lba, blocks, .. } => match unit.byte_range(lba, blocks) {
            Ok((_, 0)) => Outcome::Status,
            Ok((position, length)) => Outcome::Verify { position, length },
            Err(sense) => Outcome::Fail(sense),
        },
    }
}
