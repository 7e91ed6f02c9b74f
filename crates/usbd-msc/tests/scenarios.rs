mod common;

use common::{RX, TX, device, device_with, disk, disk_mut};
use usbd_msc::bot::{Cbw, CommandStatus, Direction};
use usbd_msc::scsi::Sense;
use usbd_msc::scsi::capacity::ReadCapacity10Data;
use usbd_msc::scsi::inquiry::InquiryData;
use usbd_msc::scsi::mode;
use usbd_msc::scsi::sense::SenseData;
use usbd_msc::sim::commands::{
    InquiryCommand, ModeSense6Command, PreventAllowMediumRemovalCommand, Read10Command, ReadCapacity10Command,
    RequestSenseCommand, StartStopUnitCommand, TestUnitReadyCommand, Verify10Command, Write10Command,
};
use usbd_msc::sim::{Host, RamDisk, SimError};
use usbd_msc::{Cancellation, ControlError, RequestStatus, State};

fn request_sense(msc: &mut common::Device, host: &mut Host, lun: u8) -> Sense {
    let response = host.read(msc, lun, &RequestSenseCommand::new(18), 18).unwrap();
    assert!(response.passed());
    SenseData::parse(&response.data).unwrap()
}

#[test]
pub fn read_streams_four_blocks() {
    let (mut msc, mut host) = device();
    let response = host.read(&mut msc, 0, &Read10Command::new(0, 0, 4), 2048).unwrap();

    assert_eq!(response.status(), Ok(CommandStatus::Passed));
    assert_eq!(response.residue(), 0);
    assert_eq!(&response.data[..], &disk(&msc, 0).contents()[..2048]);
    assert_eq!(disk(&msc, 0).reads(), [(0, 512), (512, 512), (1024, 512), (1536, 512)]);
    assert_eq!(msc.state(), &State::AwaitCommand);
}

#[test]
pub fn short_host_request_truncates_to_whole_blocks() {
    let (mut msc, mut host) = device();
    let response = host.read(&mut msc, 0, &Read10Command::new(0, 0, 4), 1024).unwrap();

    assert_eq!(response.status(), Ok(CommandStatus::Passed));
    assert_eq!(response.residue(), 0);
    assert_eq!(&response.data[..], &disk(&msc, 0).contents()[..1024]);
    assert_eq!(disk(&msc, 0).reads().len(), 2);
}

#[test]
pub fn host_expecting_more_gets_short_packet_and_residue() {
    let (mut msc, mut host) = device();
    let response = host.read(&mut msc, 0, &Read10Command::new(0, 2, 1), 1024).unwrap();

    assert_eq!(response.status(), Ok(CommandStatus::Passed));
    assert_eq!(response.residue(), 512);
    assert_eq!(&response.data[..], &disk(&msc, 0).contents()[1024..1536]);
    assert!(!response.stalled);
}

#[test]
pub fn unsupported_opcode_sets_sense_once() {
    let (mut msc, mut host) = device();
    let response = host.execute(&mut msc, 0, &[0xC0u8, 0, 0, 0, 0, 0][..]).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::Failed));
    assert_eq!(response.residue(), 0);

    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::INVALID_COMMAND);
    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::NONE);
}

#[test]
pub fn request_sense_without_data_phase_keeps_the_sense() {
    let (mut msc, mut host) = device();
    let response = host.execute(&mut msc, 0, &[0xC0u8, 0, 0, 0, 0, 0][..]).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::Failed));

    let response = host.execute(&mut msc, 0, &RequestSenseCommand::new(18)).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::PhaseError));
    host.reset_recovery(&mut msc).unwrap();

    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::INVALID_COMMAND);
    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::NONE);
}

#[test]
pub fn responses_larger_than_a_half_report_what_was_sent() {
    let (mut msc, mut host) = device_with(vec![RamDisk::new(8, 64)], 16, 8);
    let response = host.read(&mut msc, 0, &InquiryCommand::new(36), 36).unwrap();

    assert!(response.passed());
    assert_eq!(response.data.len(), 8);
    assert_eq!(response.residue(), 36 - 8);
    assert!(msc.census().is_conserved());
}

#[test]
pub fn inquiry_and_capacity() {
    let (mut msc, mut host) = device();

    let response = host.read(&mut msc, 0, &InquiryCommand::new(36), 36).unwrap();
    let inquiry = InquiryData::parse(&response.data).unwrap();
    assert_eq!(inquiry.vendor(), "usbd-msc");
    assert!(inquiry.is_removable());

    let response = host.read(&mut msc, 0, &ReadCapacity10Command::new(0), 8).unwrap();
    let capacity = ReadCapacity10Data::parse(&response.data).unwrap();
    assert_eq!(capacity.last_logical_block_address, 63);
    assert_eq!(capacity.block_length_bytes, 512);
    assert_eq!(capacity.total_capacity_bytes(), 32 * 1024);
}

#[test]
pub fn reset_mid_data_in_drains_without_status() {
    for cancellation in [Cancellation::Discarded, Cancellation::Reported] {
        let (mut msc, mut host) = device();
        msc.transport_mut().set_cancellation(cancellation);

        let cbw = Cbw::new(0x55, 2048, Direction::In, 0, &Read10Command::new(0, 0, 4));
        host.send_raw_command(&mut msc, &cbw.to_bytes()).unwrap();
        host.pump(&mut msc);
        for _ in 0..3 {
            let submission = msc.transport_mut().take_in(TX).unwrap();
            msc.usb_completed(submission.request, RequestStatus::Completed, &[]);
        }
        assert!(matches!(msc.state(), State::DataIn(context) if context.tag == 0x55));

        host.reset_recovery(&mut msc).unwrap();

        assert_eq!(msc.state(), &State::AwaitCommand, "{cancellation:?}");
        assert_eq!(msc.transport().pending_on(TX), 0);
        assert_eq!(msc.transport().pending_on(RX), 1);
        assert!(msc.census().is_conserved());

        let response = host.execute(&mut msc, 0, &TestUnitReadyCommand).unwrap();
        assert!(response.passed());
    }
}

#[test]
pub fn malformed_cbw_stalls_until_reset_recovery() {
    let (mut msc, mut host) = device();
    let mut bytes = Cbw::new(1, 0, Direction::Out, 0, &TestUnitReadyCommand).to_bytes();
    bytes[0] ^= 0xFF;
    host.send_raw_command(&mut msc, &bytes).unwrap();

    assert_eq!(msc.state(), &State::Stalled);
    assert!(msc.transport().is_halted(RX));
    assert!(msc.transport().is_halted(TX));
    assert_eq!(msc.transport().pending_on(RX), 0);
    assert_eq!(msc.transport().pending_on(TX), 0);

    host.reset_recovery(&mut msc).unwrap();
    assert_eq!(msc.state(), &State::AwaitCommand);
    assert!(!msc.transport().is_halted(RX));

    let response = host.execute(&mut msc, 0, &TestUnitReadyCommand).unwrap();
    assert!(response.passed());
}

#[test]
pub fn truncated_cbw_stalls() {
    let (mut msc, mut host) = device();
    let bytes = Cbw::new(1, 0, Direction::Out, 0, &TestUnitReadyCommand).to_bytes();
    host.send_raw_command(&mut msc, &bytes[..30]).unwrap();
    assert_eq!(msc.state(), &State::Stalled);
}

#[test]
pub fn get_max_lun_counts_units() {
    let disks = vec![RamDisk::new(512, 8), RamDisk::new(512, 16), RamDisk::new(4096, 4)];
    let (mut msc, mut host) = device_with(disks, 8192, 64);
    assert_eq!(host.get_max_lun(&mut msc), Ok(2));

    let mut stranger = Host::attach(&msc).with_interface(3);
    assert_eq!(
        stranger.get_max_lun(&mut msc),
        Err(SimError::Control(ControlError::Unsupported { request: 0xFE }))
    );
}

#[test]
pub fn units_are_addressed_by_lun() {
    let disks = vec![RamDisk::new(512, 8), RamDisk::new(512, 16).with_pattern()];
    let (mut msc, mut host) = device_with(disks, 1024, 64);

    let response = host.read(&mut msc, 1, &ReadCapacity10Command::new(1), 8).unwrap();
    let capacity = ReadCapacity10Data::parse(&response.data).unwrap();
    assert_eq!(capacity.last_logical_block_address, 15);

    let response = host.read(&mut msc, 1, &Read10Command::new(1, 15, 1), 512).unwrap();
    assert_eq!(&response.data[..], &disk(&msc, 1).contents()[15 * 512..]);
    assert!(disk(&msc, 0).reads().is_empty());
}

#[test]
pub fn missing_lun_fails_with_zero_residue() {
    let (mut msc, mut host) = device();
    let response = host.read(&mut msc, 4, &ReadCapacity10Command::new(4), 8).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::Failed));
    assert_eq!(response.residue(), 0);
    assert!(response.stalled);
}

#[test]
pub fn write_lands_and_reads_back() {
    let (mut msc, mut host) = device();
    let payload: Vec<u8> = (0..1536u32).map(|i| (i * 13 + 5) as u8).collect();

    let response = host.write(&mut msc, 0, &Write10Command::new(0, 3, 3), &payload).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::Passed));
    assert_eq!(response.residue(), 0);
    assert_eq!(&disk(&msc, 0).contents()[1536..3072], &payload[..]);
    assert_eq!(disk(&msc, 0).writes(), [(1536, 512), (2048, 512), (2560, 512)]);

    let response = host.read(&mut msc, 0, &Read10Command::new(0, 3, 3), 1536).unwrap();
    assert_eq!(response.data, payload);
}

#[test]
pub fn write_protected_unit_refuses_writes() {
    let (mut msc, mut host) = device_with(vec![RamDisk::new(512, 8).write_protected(true)], 1024, 64);

    let response = host.read(&mut msc, 0, &ModeSense6Command::new(4), 4).unwrap();
    assert_eq!(mode::is_write_protected(&response.data, false), Some(true));

    let response = host.write(&mut msc, 0, &Write10Command::new(0, 0, 1), &[0xAA; 512]).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::Failed));
    assert_eq!(response.residue(), 512);
    assert!(response.stalled);
    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::WRITE_PROTECTED);
    assert!(disk(&msc, 0).contents().iter().all(|&b| b == 0));
}

#[test]
pub fn read_failure_reports_medium_error() {
    let (mut msc, mut host) = device();
    disk_mut(&mut msc, 0).fail_reads_at(1024);

    let response = host.read(&mut msc, 0, &Read10Command::new(0, 0, 4), 2048).unwrap();

    assert_eq!(response.status(), Ok(CommandStatus::Failed));
    assert_eq!(response.residue(), 1024);
    assert!(response.stalled);
    assert_eq!(&response.data[..], &disk(&msc, 0).contents()[..1024]);
    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::UNRECOVERED_READ_ERROR);
    assert!(msc.census().is_conserved());
}

#[test]
pub fn write_failure_reports_write_fault() {
    let (mut msc, mut host) = device();
    disk_mut(&mut msc, 0).fail_writes_at(512);

    let response = host.write(&mut msc, 0, &Write10Command::new(0, 0, 2), &[0x5A; 1024]).unwrap();

    assert_eq!(response.status(), Ok(CommandStatus::Failed));
    assert_eq!(response.residue(), 1024 - 512);
    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::WRITE_FAULT);
}

#[test]
pub fn direction_mismatch_is_a_phase_error() {
    let (mut msc, mut host) = device();
    let response = host.write(&mut msc, 0, &Read10Command::new(0, 0, 1), &[0; 512]).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::PhaseError));
    assert_eq!(response.residue(), 512);
    assert!(response.stalled);

    let response = host.execute(&mut msc, 0, &Read10Command::new(0, 0, 1)).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::PhaseError));
    assert_eq!(response.residue(), 0);
}

#[test]
pub fn data_in_for_a_no_data_command_sends_zero_length_packet() {
    let (mut msc, mut host) = device();
    let response = host.read(&mut msc, 0, &TestUnitReadyCommand, 64).unwrap();
    assert!(response.passed());
    assert!(response.data.is_empty());
    assert_eq!(response.residue(), 64);
}

#[test]
pub fn verify_reads_without_data_phase() {
    let (mut msc, mut host) = device();
    let response = host.execute(&mut msc, 0, &Verify10Command::new(4, 4)).unwrap();
    assert!(response.passed());
    assert_eq!(disk(&msc, 0).reads(), [(2048, 512), (2560, 512), (3072, 512), (3584, 512)]);

    let response = host.execute(&mut msc, 0, &Verify10Command::new(62, 4)).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::Failed));
    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::LBA_OUT_OF_RANGE);
}

#[test]
pub fn eject_respects_prevent_removal() {
    let (mut msc, mut host) = device();

    let response = host.execute(&mut msc, 0, &PreventAllowMediumRemovalCommand::new(true)).unwrap();
    assert!(response.passed());
    let response = host.execute(&mut msc, 0, &StartStopUnitCommand::eject()).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::Failed));
    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::MEDIUM_REMOVAL_PREVENTED);

    host.execute(&mut msc, 0, &PreventAllowMediumRemovalCommand::new(false)).unwrap();
    let response = host.execute(&mut msc, 0, &StartStopUnitCommand::eject()).unwrap();
    assert!(response.passed());

    let response = host.execute(&mut msc, 0, &TestUnitReadyCommand).unwrap();
    assert_eq!(response.status(), Ok(CommandStatus::Failed));
    assert_eq!(request_sense(&mut msc, &mut host, 0), Sense::MEDIUM_NOT_PRESENT);

    host.execute(&mut msc, 0, &StartStopUnitCommand::load()).unwrap();
    assert!(host.execute(&mut msc, 0, &TestUnitReadyCommand).unwrap().passed());
}

#[test]
pub fn bus_reset_idles_until_configured_again() {
    let (mut msc, mut host) = device();
    msc.device_event(usbd_msc::DeviceEvent::Reset);
    assert_eq!(msc.state(), &State::Idle);
    assert_eq!(msc.transport().pending_on(RX), 0);
    assert_eq!(host.execute(&mut msc, 0, &TestUnitReadyCommand).unwrap_err(), SimError::NotArmed);

    host.configure(&mut msc);
    assert!(host.execute(&mut msc, 0, &TestUnitReadyCommand).unwrap().passed());
}
