//! A Bulk-Only Transport initiator driving an [`Msc`] over a
//! [`LoopbackTransport`].

use alloc::vec::Vec;
use log::debug;

use super::{Completions, LoopbackTransport, Payload, SimError};
use crate::bot::{Cbw, CommandBlock, CommandStatus, Csw, Direction, REQUEST_GET_MAX_LUN, REQUEST_RESET};
use crate::config::Endpoints;
use crate::control::SetupPacket;
use crate::driver::{DeviceEvent, Msc};
use crate::storage::Storage;
use crate::transport::{EndpointAddress, RequestStatus};

/// Result of one command.
#[derive(Debug, Clone)]
pub struct Response {
    /// Data phase bytes received from the device.
    pub data: Vec<u8>,
    pub csw: Csw,
    /// The device halted the data pipe before the status stage.
    pub stalled: bool,
}

impl Response {
    pub fn status(&self) -> Result<CommandStatus, u8> {
        self.csw.status()
    }

    pub fn residue(&self) -> u32 {
        self.csw.data_residue()
    }

    pub fn passed(&self) -> bool {
        self.status() == Ok(CommandStatus::Passed)
    }
}

pub struct Host {
    endpoints: Endpoints,
    interface: u8,
    packet_size: usize,
    tag: u32,
}

type Device<'m, 'b, S> = &'m mut Msc<'b, LoopbackTransport, S>;

impl Host {
    pub fn new(endpoints: &Endpoints) -> Self {
        Self {
            endpoints: *endpoints,
            interface: 0,
            packet_size: crate::MSC_DATA_EP_SIZE as usize,
            tag: 0,
        }
    }

    /// Take endpoints and packet size from a bound driver.
    pub fn attach<S: Storage>(msc: &Msc<'_, LoopbackTransport, S>) -> Self {
        Self {
            packet_size: msc.packet_size() as usize,
            ..Self::new(&msc.endpoints())
        }
    }

    pub fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    pub fn configure<S: Storage + Completions>(&mut self, msc: Device<'_, '_, S>) {
        msc.device_event(DeviceEvent::Configured);
    }

    /// Deliver every storage completion and reported cancellation the
    /// device is waiting for.
    pub fn pump<S: Storage + Completions>(&mut self, msc: Device<'_, '_, S>) {
        loop {
            let mut delivered = false;
            while let Some(request) = msc.transport_mut().take_cancelled() {
                msc.usb_completed(request, RequestStatus::Cancelled, &[]);
                delivered = true;
            }
            for lun in 0..msc.unit_count() {
                let completion = msc.unit_mut(lun).and_then(|unit| unit.storage_mut().take_completion());
                if let Some(result) = completion {
                    msc.storage_completed(result);
                    delivered = true;
                }
            }
            if !delivered {
                return;
            }
        }
    }

    /// A command with no data phase.
    pub fn execute<S, C>(&mut self, msc: Device<'_, '_, S>, lun: u8, command: &C) -> Result<Response, SimError>
    where
        S: Storage + Completions,
        C: CommandBlock + ?Sized,
    {
        let cbw = Cbw::new(self.next_tag(), 0, Direction::Out, lun, command);
        self.transact(msc, &cbw, &[])
    }

    /// A command announcing an IN data phase of `length` bytes.
    pub fn read<S, C>(&mut self, msc: Device<'_, '_, S>, lun: u8, command: &C, length: u32) -> Result<Response, SimError>
    where
        S: Storage + Completions,
        C: CommandBlock + ?Sized,
    {
        let cbw = Cbw::new(self.next_tag(), length, Direction::In, lun, command);
        self.transact(msc, &cbw, &[])
    }

    /// A command announcing an OUT data phase carrying `data`.
    pub fn write<S, C>(&mut self, msc: Device<'_, '_, S>, lun: u8, command: &C, data: &[u8]) -> Result<Response, SimError>
    where
        S: Storage + Completions,
        C: CommandBlock + ?Sized,
    {
        let cbw = Cbw::new(self.next_tag(), data.len() as u32, Direction::Out, lun, command);
        self.transact(msc, &cbw, data)
    }

    /// Run a caller built CBW. `data` is sent when the CBW announces an OUT
    /// phase.
    pub fn transact<S: Storage + Completions>(
        &mut self,
        msc: Device<'_, '_, S>,
        cbw: &Cbw,
        data: &[u8],
    ) -> Result<Response, SimError> {
        self.send_raw_command(msc, &cbw.to_bytes())?;

        let expected = cbw.data_transfer_length() as usize;
        let mut stalled = false;
        let mut received = Vec::new();
        if expected > 0 {
            stalled = match cbw.direction() {
                Direction::In => self.receive_data(msc, expected, &mut received)?,
                Direction::Out => self.send_data(msc, &data[..expected.min(data.len())])?,
            };
        }

        let csw = self.receive_status(msc)?;
        if csw.tag() != cbw.tag() {
            return Err(SimError::TagMismatch { expected: cbw.tag(), got: csw.tag() });
        }
        debug!("host: tag {:#x} {:?} residue {}", csw.tag(), csw.status(), csw.data_residue());
        Ok(Response { data: received, csw, stalled })
    }

    /// Complete the device's pending command receive with `bytes`.
    pub fn send_raw_command<S: Storage + Completions>(
        &mut self,
        msc: Device<'_, '_, S>,
        bytes: &[u8],
    ) -> Result<(), SimError> {
        self.pump(msc);
        let rx = self.endpoints.rx;
        let submission = msc.transport_mut().take_out(rx).ok_or(SimError::NotArmed)?;
        let Payload::Out(capacity) = submission.payload else {
            return Err(SimError::NotArmed);
        };
        let len = bytes.len().min(capacity);
        msc.usb_completed(submission.request, RequestStatus::Completed, &bytes[..len]);
        Ok(())
    }

    /// Collect IN packets until `expected` bytes or a short packet arrived.
    /// Returns whether the device halted the pipe.
    fn receive_data<S: Storage + Completions>(
        &mut self,
        msc: Device<'_, '_, S>,
        expected: usize,
        received: &mut Vec<u8>,
    ) -> Result<bool, SimError> {
        let tx = self.endpoints.tx;
        while received.len() < expected {
            self.pump(msc);
            if self.clear_if_halted(msc, tx) {
                return Ok(true);
            }
            let bytes = self.take_in(msc, tx)?;
            let short = bytes.len() < self.packet_size;
            received.extend_from_slice(&bytes);
            if short {
                break;
            }
        }
        Ok(self.clear_if_halted(msc, tx))
    }

    /// Offer `data` to the device's OUT requests. Returns whether the device
    /// halted the pipe.
    fn send_data<S: Storage + Completions>(&mut self, msc: Device<'_, '_, S>, data: &[u8]) -> Result<bool, SimError> {
        let rx = self.endpoints.rx;
        let mut sent = 0;
        while sent < data.len() {
            self.pump(msc);
            if self.clear_if_halted(msc, rx) {
                return Ok(true);
            }
            let Some(submission) = msc.transport_mut().take_out(rx) else {
                // The device took all it wanted and is already replying.
                break;
            };
            let Payload::Out(capacity) = submission.payload else {
                return Err(SimError::Stuck);
            };
            let end = (sent + capacity.min(self.packet_size)).min(data.len());
            msc.usb_completed(submission.request, RequestStatus::Completed, &data[sent..end]);
            sent = end;
        }
        self.pump(msc);
        Ok(self.clear_if_halted(msc, rx))
    }

    pub fn receive_status<S: Storage + Completions>(&mut self, msc: Device<'_, '_, S>) -> Result<Csw, SimError> {
        let tx = self.endpoints.tx;
        self.pump(msc);
        self.clear_if_halted(msc, tx);
        let bytes = self.take_in(msc, tx)?;
        Csw::parse(&bytes).ok_or(SimError::BadStatus(bytes.len()))
    }

    fn take_in<S: Storage + Completions>(
        &mut self,
        msc: Device<'_, '_, S>,
        endpoint: EndpointAddress,
    ) -> Result<Vec<u8>, SimError> {
        let submission = msc.transport_mut().take_in(endpoint).ok_or(SimError::Stuck)?;
        let Payload::In(bytes) = submission.payload else {
            return Err(SimError::Stuck);
        };
        msc.usb_completed(submission.request, RequestStatus::Completed, &[]);
        Ok(bytes)
    }

    fn clear_if_halted<S: Storage>(&mut self, msc: Device<'_, '_, S>, endpoint: EndpointAddress) -> bool {
        let halted = msc.transport().is_halted(endpoint);
        if halted {
            debug!("host: clearing halt on {endpoint}");
            msc.transport_mut().clear_halt(endpoint);
        }
        halted
    }

    /// Bulk-Only Mass Storage Reset followed by clearing both halts.
    pub fn reset_recovery<S: Storage + Completions>(&mut self, msc: Device<'_, '_, S>) -> Result<(), SimError> {
        let setup = SetupPacket::class_interface(false, REQUEST_RESET, self.interface, 0);
        msc.control_request(&setup, &mut [])?;
        self.pump(msc);
        for endpoint in [self.endpoints.rx, self.endpoints.tx] {
            msc.transport_mut().clear_halt(endpoint);
        }
        Ok(())
    }

    pub fn get_max_lun<S: Storage + Completions>(&mut self, msc: Device<'_, '_, S>) -> Result<u8, SimError> {
        let setup = SetupPacket::class_interface(true, REQUEST_GET_MAX_LUN, self.interface, 1);
        let mut data = [0u8; 1];
        msc.control_request(&setup, &mut data)?;
        Ok(data[0])
    }

    fn next_tag(&mut self) -> u32 {
        self.tag = self.tag.wrapping_add(1);
        self.tag
    }
}
