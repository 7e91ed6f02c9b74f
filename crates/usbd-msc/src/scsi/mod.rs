//! SCSI transparent command set: decoding, response data and execution
//! against a logical unit.

pub mod capacity;
mod execute;
pub mod inquiry;
pub mod mode;
pub mod sense;

pub use execute::{Outcome, execute};
pub use sense::Sense;

pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const FORMAT_UNIT: u8 = 0x04;
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SELECT_6: u8 = 0x15;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const START_STOP_UNIT: u8 = 0x1B;
    pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
    pub const READ_FORMAT_CAPACITIES: u8 = 0x23;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const VERIFY_10: u8 = 0x2F;
    pub const MODE_SELECT_10: u8 = 0x55;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const READ_12: u8 = 0xA8;
    pub const WRITE_12: u8 = 0xAA;
}

/// A decoded command descriptor block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiCommand {
    TestUnitReady,
    RequestSense { allocation_length: u8 },
    Inquiry { evpd: bool, page_code: u8, allocation_length: u16 },
    ModeSense { page_code: u8, allocation_length: u16, long: bool },
    ModeSelect { parameter_list_length: u16 },
    StartStopUnit { start: bool, load_eject: bool },
    PreventAllowMediumRemoval { prevent: bool },
    ReadFormatCapacities { allocation_length: u16 },
    ReadCapacity10,
    Read { lba: u64, blocks: u32 },
    Write { lba: u64, blocks: u32 },
    Verify { lba: u64, blocks: u32, byte_check: bool },
}

fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// CDB length implied by the group code in the top three opcode bits.
fn cdb_length(op: u8) -> usize {
    match op >> 5 {
        0 => 6,
        1 | 2 => 10,
        4 => 16,
        5 => 12,
        _ => 6,
    }
}

impl ScsiCommand {
    pub fn parse(cb: &[u8]) -> Result<Self, Sense> {
        let Some(&op) = cb.first() else {
            return Err(Sense::INVALID_FIELD_IN_CDB);
        };
        if cb.len() < cdb_length(op) {
            return Err(Sense::INVALID_FIELD_IN_CDB);
        }

        let command = match op {
            opcode::TEST_UNIT_READY => ScsiCommand::TestUnitReady,
            opcode::REQUEST_SENSE => ScsiCommand::RequestSense {
                allocation_length: cb[4],
            },
            opcode::INQUIRY => ScsiCommand::Inquiry {
                evpd: cb[1] & 0x01 != 0,
                page_code: cb[2],
                allocation_length: be16(&cb[3..5]),
            },
            opcode::MODE_SENSE_6 => ScsiCommand::ModeSense {
                page_code: cb[2] & 0x3F,
                allocation_length: cb[4] as u16,
                long: false,
            },
            opcode::MODE_SENSE_10 => ScsiCommand::ModeSense {
                page_code: cb[2] & 0x3F,
                allocation_length: be16(&cb[7..9]),
                long: true,
            },
            opcode::MODE_SELECT_6 => ScsiCommand::ModeSelect {
                parameter_list_length: cb[4] as u16,
            },
            opcode::MODE_SELECT_10 => ScsiCommand::ModeSelect {
                parameter_list_length: be16(&cb[7..9]),
            },
            opcode::START_STOP_UNIT => ScsiCommand::StartStopUnit {
                start: cb[4] & 0x01 != 0,
                load_eject: cb[4] & 0x02 != 0,
            },
            opcode::PREVENT_ALLOW_MEDIUM_REMOVAL => ScsiCommand::PreventAllowMediumRemoval {
                prevent: cb[4] & 0x03 != 0,
            },
            opcode::READ_FORMAT_CAPACITIES => ScsiCommand::ReadFormatCapacities {
                allocation_length: be16(&cb[7..9]),
            },
            opcode::READ_CAPACITY_10 => ScsiCommand::ReadCapacity10,
            opcode::READ_6 | opcode::WRITE_6 => {
                let lba = u32::from_be_bytes([0, cb[1] & 0x1F, cb[2], cb[3]]) as u64;
                let blocks = if cb[4] == 0 { 256 } else { cb[4] as u32 };
                if op == opcode::READ_6 {
                    ScsiCommand::Read { lba, blocks }
                } else {
                    ScsiCommand::Write { lba, blocks }
                }
            }
            opcode::READ_10 => ScsiCommand::Read {
                lba: be32(&cb[2..6]) as u64,
                blocks: be16(&cb[7..9]) as u32,
            },
            opcode::WRITE_10 => ScsiCommand::Write {
                lba: be32(&cb[2..6]) as u64,
                blocks: be16(&cb[7..9]) as u32,
            },
            opcode::READ_12 => ScsiCommand::Read {
                lba: be32(&cb[2..6]) as u64,
                blocks: be32(&cb[6..10]),
            },
            opcode::WRITE_12 => ScsiCommand::Write {
                lba: be32(&cb[2..6]) as u64,
                blocks: be32(&cb[6..10]),
            },
            opcode::VERIFY_10 => ScsiCommand::Verify {
                lba: be32(&cb[2..6]) as u64,
                blocks: be16(&cb[7..9]) as u32,
                byte_check: (cb[1] >> 1) & 0x03 != 0,
            },
            _ => return Err(Sense::INVALID_COMMAND),
        };
        Ok(command)
    }

    /// Whether the command touches the medium and so needs it present.
    pub fn needs_medium(&self) -> bool {
        matches!(
            self,
            ScsiCommand::TestUnitReady
                | ScsiCommand::ReadCapacity10
                | ScsiCommand::ReadFormatCapacities { .. }
                | ScsiCommand::Read { .. }
                | ScsiCommand::Write { .. }
                | ScsiCommand::Verify { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn decodes_read_variants() {
        assert_eq!(
            ScsiCommand::parse(&[0x08, 0x1F, 0xFF, 0xFE, 0, 0]),
            Ok(ScsiCommand::Read { lba: 0x1FFFFE, blocks: 256 })
        );
        assert_eq!(
            ScsiCommand::parse(&[0x28, 0, 0, 0, 1, 0, 0, 0, 4, 0]),
            Ok(ScsiCommand::Read { lba: 256, blocks: 4 })
        );
        assert_eq!(
            ScsiCommand::parse(&[0xA8, 0, 0, 0, 0, 8, 0, 1, 0, 0, 0, 0]),
            Ok(ScsiCommand::Read { lba: 8, blocks: 65536 })
        );
    }

    #[test]
    pub fn decodes_write_variants() {
        assert_eq!(
            ScsiCommand::parse(&[0x0A, 0, 0, 3, 2, 0]),
            Ok(ScsiCommand::Write { lba: 3, blocks: 2 })
        );
        assert_eq!(
            ScsiCommand::parse(&[0x2A, 0, 0, 0, 0, 9, 0, 0, 1, 0]),
            Ok(ScsiCommand::Write { lba: 9, blocks: 1 })
        );
        assert_eq!(
            ScsiCommand::parse(&[0xAA, 0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0]),
            Ok(ScsiCommand::Write { lba: 1, blocks: 2 })
        );
    }

    #[test]
    pub fn decodes_control_commands() {
        assert_eq!(
            ScsiCommand::parse(&[0x12, 0x01, 0x80, 0, 0xFF, 0]),
            Ok(ScsiCommand::Inquiry { evpd: true, page_code: 0x80, allocation_length: 255 })
        );
        assert_eq!(
            ScsiCommand::parse(&[0x1A, 0, 0x3F, 0, 192, 0]),
            Ok(ScsiCommand::ModeSense { page_code: 0x3F, allocation_length: 192, long: false })
        );
        assert_eq!(
            ScsiCommand::parse(&[0x1B, 0, 0, 0, 0x02, 0]),
            Ok(ScsiCommand::StartStopUnit { start: false, load_eject: true })
        );
        assert_eq!(
            ScsiCommand::parse(&[0x1E, 0, 0, 0, 0x01, 0]),
            Ok(ScsiCommand::PreventAllowMediumRemoval { prevent: true })
        );
        assert_eq!(
            ScsiCommand::parse(&[0x2F, 0x02, 0, 0, 0, 0, 0, 0, 1, 0]),
            Ok(ScsiCommand::Verify { lba: 0, blocks: 1, byte_check: true })
        );
    }

    #[test]
    pub fn unknown_opcode_is_invalid_command() {
        assert_eq!(ScsiCommand::parse(&[0xFF, 0, 0, 0, 0, 0]), Err(Sense::INVALID_COMMAND));
        assert_eq!(ScsiCommand::parse(&[opcode::FORMAT_UNIT, 0, 0, 0, 0, 0]), Err(Sense::INVALID_COMMAND));
    }

    #[test]
    pub fn truncated_cdb_is_invalid_field() {
        assert_eq!(ScsiCommand::parse(&[0x28, 0, 0, 0, 0, 0]), Err(Sense::INVALID_FIELD_IN_CDB));
        assert_eq!(ScsiCommand::parse(&[]), Err(Sense::INVALID_FIELD_IN_CDB));
    }
}
