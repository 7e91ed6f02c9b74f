//! The Bulk-Only Transport function driver.
//!
//! [`Msc`] owns the transport, the logical units and the scratch buffer.
//! Everything it does is a reaction to an [`Event`]: a transfer or storage
//! completion, a class request, or a bus level device event. A reaction may
//! submit more work but never waits for it.

use heapless::Vec;
use log::{debug, error, warn};

use crate::bot::{
    Cbw, CommandStatus, Csw, Direction, HostPhase, Plan, REQUEST_GET_MAX_LUN, REQUEST_RESET, Termination, resolve,
    terminate,
};
use crate::config::{Endpoints, MscConfig, MscError, Scratch};
use crate::control::{ControlError, SetupPacket};
use crate::datapath::{Census, Datapath, DatapathError, Io, Progress, Transfer};
use crate::lun::{LogicalUnit, MAX_LUNS};
use crate::scsi::inquiry::Identity;
use crate::scsi::{self, Outcome, ScsiCommand, Sense};
use crate::storage::{Storage, StorageError};
use crate::transport::{EndpointAddress, RequestId, RequestStatus, UsbTransport};

/// Bus level notifications from the device stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The configuration containing the interface was selected.
    Configured,
    Deconfigured,
    /// USB bus reset.
    Reset,
    Disconnected,
}

/// Everything the driver reacts to.
#[derive(Debug)]
pub enum Event<'d> {
    UsbCompleted {
        request: RequestId,
        status: RequestStatus,
        /// Received bytes for OUT requests, empty otherwise.
        data: &'d [u8],
    },
    StorageCompleted(Result<(), StorageError>),
    /// A control request for this interface. `data` holds the OUT data
    /// stage, or receives the IN data stage.
    ControlRequest { setup: SetupPacket, data: &'d mut [u8] },
    Device(DeviceEvent),
}

/// The command currently being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub tag: u32,
    pub lun: u8,
    pub host: HostPhase,
    pub command: ScsiCommand,
}

/// Protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not configured; nothing is posted.
    Idle,
    /// A receive for the next CBW is posted.
    AwaitCommand,
    DataIn(Context),
    DataOut(Context),
    /// Medium verification; no host data moves.
    Verify(Context),
    /// The CSW, possibly preceded by response data, is on its way.
    AwaitStatus,
    /// A malformed CBW halted both endpoints until reset recovery.
    Stalled,
    /// Waiting for outstanding work to retire.
    Aborting { rearm: bool },
}

/// What `unbind` hands back.
pub struct Parts<'b, T, S> {
    pub transport: T,
    pub units: Vec<LogicalUnit<S>, MAX_LUNS>,
    /// The buffer supplied through `ScratchConfig::Borrowed`, if any.
    pub scratch: Option<&'b mut [u8]>,
}

pub struct Msc<'b, T, S> {
    transport: T,
    units: Vec<LogicalUnit<S>, MAX_LUNS>,
    scratch: Scratch<'b>,
    datapath: Datapath,
    state: State,
    /// Unit whose storage the data phase is using.
    active_lun: Option<u8>,
    configured: bool,
    interface: u8,
    endpoints: Endpoints,
    packet_size: u16,
    identity: Identity,
}

impl<'b, T: UsbTransport, S: Storage> Msc<'b, T, S> {
    /// Bind the driver. Nothing is submitted until the device is configured.
    pub fn new(
        transport: T,
        units: impl IntoIterator<Item = LogicalUnit<S>>,
        config: MscConfig<'b>,
    ) -> Result<Self, MscError> {
        let mut bound = Vec::<LogicalUnit<S>, MAX_LUNS>::new();
        let mut count = 0;
        for unit in units {
            count += 1;
            // Units past the limit are dropped; the count is reported below.
            let _ = bound.push(unit);
        }
        if count > MAX_LUNS {
            return Err(MscError::TooManyUnits(count));
        }

        let block_sizes: Vec<u32, MAX_LUNS> = bound.iter().map(LogicalUnit::block_size).collect();
        config.validate(&block_sizes)?;

        let scratch = Scratch::new(config.scratch);
        let datapath = Datapath::new(config.endpoints, config.packet_size, scratch.len());
        debug!(
            "mass storage interface {} bound with {} units, {} byte scratch",
            config.interface,
            bound.len(),
            scratch.len()
        );

        Ok(Self {
            transport,
            units: bound,
            scratch,
            datapath,
            state: State::Idle,
            active_lun: None,
            configured: false,
            interface: config.interface,
            endpoints: config.endpoints,
            packet_size: config.packet_size,
            identity: config.identity,
        })
    }

    /// Release the driver. Outstanding transfers are cancelled without
    /// waiting; an internally allocated scratch buffer is freed.
    pub fn unbind(mut self) -> Parts<'b, T, S> {
        for endpoint in [self.endpoints.rx, self.endpoints.tx] {
            self.transport.cancel_all(endpoint);
        }
        Parts {
            transport: self.transport,
            units: self.units,
            scratch: self.scratch.release(),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn census(&self) -> Census {
        self.datapath.census()
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn packet_size(&self) -> u16 {
        self.packet_size
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn unit(&self, lun: usize) -> Option<&LogicalUnit<S>> {
        self.units.get(lun)
    }

    pub fn unit_mut(&mut self, lun: usize) -> Option<&mut LogicalUnit<S>> {
        self.units.get_mut(lun)
    }

    /// Dispatch an event. Only control requests produce a value: the length
    /// of their IN data stage.
    pub fn handle_event(&mut self, event: Event<'_>) -> Result<usize, ControlError> {
        match event {
            Event::UsbCompleted { request, status, data } => self.usb_completed(request, status, data),
            Event::StorageCompleted(result) => self.storage_completed(result),
            Event::ControlRequest { setup, data } => return self.control_request(&setup, data),
            Event::Device(event) => self.device_event(event),
        }
        Ok(0)
    }

    pub fn usb_completed(&mut self, request: RequestId, status: RequestStatus, data: &[u8]) {
        let (datapath, mut io) = self.split();
        let progress = datapath.usb_completed(&mut io, request, status, data);
        self.drive(progress);
    }

    pub fn storage_completed(&mut self, result: Result<(), StorageError>) {
        let (datapath, mut io) = self.split();
        let progress = datapath.storage_completed(&mut io, result);
        self.drive(progress);
    }

    pub fn device_event(&mut self, event: DeviceEvent) {
        debug!("device event {event:?} in {:?}", self.state);
        let progress = match event {
            DeviceEvent::Configured => {
                self.configured = true;
                match self.state {
                    State::Idle => self.arm(),
                    _ => self.abort(true),
                }
            }
            DeviceEvent::Deconfigured | DeviceEvent::Reset | DeviceEvent::Disconnected => {
                self.configured = false;
                self.abort(false)
            }
        };
        self.drive(progress);
    }

    /// Handle a class request. On `Err` the caller stalls endpoint zero.
    pub fn control_request(&mut self, setup: &SetupPacket, data: &mut [u8]) -> Result<usize, ControlError> {
        let request = setup.request;
        if !setup.is_class_interface() || setup.index != self.interface as u16 {
            return Err(ControlError::Unsupported { request });
        }

        match request {
            REQUEST_RESET => {
                if setup.value != 0 || setup.length != 0 || setup.is_device_to_host() {
                    return Err(ControlError::Malformed { request });
                }
                debug!("bulk-only mass storage reset in {:?}", self.state);
                let progress = self.abort(true);
                self.drive(progress);
                Ok(0)
            }
            REQUEST_GET_MAX_LUN => {
                if setup.value != 0 || setup.length != 1 || !setup.is_device_to_host() {
                    return Err(ControlError::Malformed { request });
                }
                let max_lun = data.first_mut().ok_or(ControlError::BufferTooSmall(1))?;
                *max_lun = (self.units.len() - 1) as u8;
                Ok(1)
            }
            _ => Err(ControlError::Unsupported { request }),
        }
    }

    fn split(&mut self) -> (&mut Datapath, Io<'_, T, S>) {
        let storage = match self.active_lun {
            Some(lun) => self.units.get_mut(lun as usize).map(LogicalUnit::storage_mut),
            None => None,
        };
        (
            &mut self.datapath,
            Io {
                transport: &mut self.transport,
                storage,
                scratch: self.scratch.as_mut_slice(),
            },
        )
    }

    /// Keep reacting until the pipeline is waiting on the outside world.
    fn drive(&mut self, mut progress: Progress<'_>) {
        loop {
            progress = match progress {
                Progress::Busy => return,
                Progress::Command(bytes) => self.accept_command(bytes),
                Progress::Finished(transfer) => self.transfer_finished(transfer),
                Progress::Drained => self.drained(),
            };
        }
    }

    fn arm(&mut self) -> Progress<'static> {
        self.state = State::AwaitCommand;
        self.active_lun = None;
        let (datapath, mut io) = self.split();
        match datapath.receive_command(&mut io) {
            Progress::Finished(Transfer { result: Err(err), .. }) => {
                error!("cannot post the command receive: {err}");
                self.state = State::Idle;
                Progress::Busy
            }
            progress => progress,
        }
    }

    fn abort(&mut self, rearm: bool) -> Progress<'static> {
        self.state = State::Aborting { rearm };
        let (datapath, mut io) = self.split();
        datapath.abort(&mut io)
    }

    fn drained(&mut self) -> Progress<'static> {
        self.active_lun = None;
        match self.state {
            State::Aborting { rearm: true } if self.configured => self.arm(),
            _ => {
                self.state = State::Idle;
                Progress::Busy
            }
        }
    }

    fn stall(&mut self, endpoint: EndpointAddress) {
        debug!("stalling {endpoint}");
        if let Err(err) = self.transport.stall(endpoint) {
            warn!("stalling {endpoint} failed: {err:?}");
        }
    }

    fn stall_pipe(&mut self, direction: Direction) {
        match direction {
            Direction::In => self.stall(self.endpoints.tx),
            Direction::Out => self.stall(self.endpoints.rx),
        }
    }

    fn accept_command(&mut self, bytes: &[u8]) -> Progress<'static> {
        let cbw = match Cbw::parse(bytes) {
            Ok(cbw) => cbw,
            Err(err) => {
                warn!("{err}, halting both endpoints");
                self.stall(self.endpoints.rx);
                self.stall(self.endpoints.tx);
                self.state = State::Stalled;
                return Progress::Busy;
            }
        };
        let tag = cbw.tag();
        let host = HostPhase::from_cbw(&cbw);
        let lun = cbw.lun();

        if lun as usize >= self.units.len() {
            warn!("command {tag:#x} for missing lun {lun}");
            return self.send_status(tag, host, 0, 0, CommandStatus::Failed, 0);
        }
        let command = match cbw.command_block().map(ScsiCommand::parse) {
            Some(Ok(command)) => command,
            Some(Err(sense)) => {
                warn!("command {tag:#x}: unsupported block {:02x?}", cbw.command_block());
                return self.fail_command(tag, lun, host, sense);
            }
            None => {
                warn!("command {tag:#x}: block length {} out of range", cbw.cb_length);
                return self.fail_command(tag, lun, host, Sense::INVALID_FIELD_IN_CDB);
            }
        };
        debug!("command {tag:#x} lun {lun} {host:?} {command:?}");

        let unit = &mut self.units[lun as usize];
        let granule_block = unit.block_size();
        let pending_sense = unit.sense();
        // Responses go out of the first query's half.
        let half = self.scratch.len() / 2;
        let response = &mut self.scratch.as_mut_slice()[..half];
        let outcome = scsi::execute(&command, unit, &self.identity, response);
        let length = match resolve(host, outcome.device_phase(), outcome.granule(granule_block)) {
            Plan::Transfer { length } => length,
            Plan::PhaseError => {
                warn!("command {tag:#x}: host {host:?} cannot carry {:?}", outcome.device_phase());
                // Nothing reached the host, so REQUEST SENSE has not consumed anything.
                self.units[lun as usize].set_sense(pending_sense);
                return self.send_status(tag, host, 0, 0, CommandStatus::PhaseError, host.expected());
            }
        };

        let context = Context { tag, lun, host, command };
        match outcome {
            Outcome::Status => self.finish_command(tag, host, 0, CommandStatus::Passed),
            Outcome::Fail(sense) => self.fail_command(tag, lun, host, sense),
            Outcome::Respond(_) => {
                let response = length as usize;
                self.send_status(tag, host, response, length, CommandStatus::Passed, host.residue(length))
            }
            Outcome::Verify { position, length } => {
                self.begin_data(State::Verify(context), lun);
                let (datapath, mut io) = self.split();
                datapath.verify(&mut io, position, length)
            }
            _ if length == 0 => self.finish_command(tag, host, 0, CommandStatus::Passed),
            Outcome::Read { position, .. } => {
                self.begin_data(State::DataIn(context), lun);
                let (datapath, mut io) = self.split();
                datapath.read_and_send(&mut io, position, length)
            }
            Outcome::Write { position, .. } => {
                self.begin_data(State::DataOut(context), lun);
                let (datapath, mut io) = self.split();
                datapath.receive_and_write(&mut io, position, length)
            }
            Outcome::AcceptParameters(_) => {
                self.begin_data(State::DataOut(context), lun);
                let (datapath, mut io) = self.split();
                datapath.receive_and_discard(&mut io, length)
            }
        }
    }

    fn begin_data(&mut self, state: State, lun: u8) {
        self.state = state;
        self.active_lun = Some(lun);
    }

    fn fail_command(&mut self, tag: u32, lun: u8, host: HostPhase, sense: Sense) -> Progress<'static> {
        if let Some(unit) = self.units.get_mut(lun as usize) {
            unit.set_sense(sense);
        }
        self.finish_command(tag, host, 0, CommandStatus::Failed)
    }

    fn finish_command(&mut self, tag: u32, host: HostPhase, moved: u64, status: CommandStatus) -> Progress<'static> {
        self.send_status(tag, host, 0, moved, status, host.residue(moved))
    }

    /// Terminate the data phase as the host expects and queue the CSW behind
    /// `response` bytes of scratch data.
    fn send_status(
        &mut self,
        tag: u32,
        host: HostPhase,
        response: usize,
        moved: u64,
        status: CommandStatus,
        residue: u32,
    ) -> Progress<'static> {
        let passed = status == CommandStatus::Passed;
        let short_packet = match terminate(host, moved, passed, self.packet_size) {
            Termination::Nothing => false,
            Termination::ShortPacket => true,
            Termination::Stall(direction) => {
                self.stall_pipe(direction);
                false
            }
        };

        debug!("status {tag:#x}: {status:?}, residue {residue}");
        let csw = Csw::new(tag, residue, status);
        self.state = State::AwaitStatus;
        self.active_lun = None;
        let (datapath, mut io) = self.split();
        datapath.reply(&mut io, response, short_packet, Some(&csw))
    }

    fn transfer_finished(&mut self, transfer: Transfer) -> Progress<'static> {
        match self.state {
            State::AwaitStatus => match transfer.result {
                Ok(()) => self.arm(),
                Err(err) => {
                    warn!("status stage failed: {err}");
                    self.abort(true)
                }
            },
            State::DataIn(context) | State::DataOut(context) | State::Verify(context) => {
                let Context { tag, lun, host, .. } = context;
                match transfer.result {
                    Ok(()) => self.finish_command(tag, host, transfer.moved, CommandStatus::Passed),
                    Err(DatapathError::Storage(err)) => {
                        let sense = match self.state {
                            State::DataOut(_) => err.write_sense(),
                            _ => err.read_sense(),
                        };
                        if let Some(unit) = self.units.get_mut(lun as usize) {
                            unit.set_sense(sense);
                        }
                        self.finish_command(tag, host, transfer.moved, CommandStatus::Failed)
                    }
                    Err(DatapathError::ShortPacket) => {
                        self.finish_command(tag, host, transfer.moved, CommandStatus::PhaseError)
                    }
                    Err(DatapathError::Transport) => self.abort(true),
                }
            }
            State::AwaitCommand => {
                if let Err(err) = transfer.result {
                    warn!("command receive failed: {err}");
                }
                self.abort(true)
            }
            state => {
                warn!("transfer finished in {state:?}");
                Progress::Busy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScratchConfig;
    use crate::sim::{LoopbackTransport, RamDisk};

    fn msc() -> Msc<'static, LoopbackTransport, RamDisk> {
        let config = MscConfig {
            scratch: ScratchConfig::Allocate(1024),
            ..MscConfig::default()
        };
        Msc::new(
            LoopbackTransport::new(),
            [LogicalUnit::new(RamDisk::new(512, 16)), LogicalUnit::new(RamDisk::new(512, 32))],
            config,
        )
        .unwrap()
    }

    #[test]
    pub fn configuration_arms_command_receive() {
        let mut msc = msc();
        assert_eq!(msc.state(), &State::Idle);
        assert_eq!(msc.transport().pending_on(EndpointAddress(0x01)), 0);

        msc.device_event(DeviceEvent::Configured);
        assert_eq!(msc.state(), &State::AwaitCommand);
        assert_eq!(msc.transport().pending_on(EndpointAddress(0x01)), 1);

        msc.device_event(DeviceEvent::Reset);
        assert_eq!(msc.state(), &State::Idle);
        assert!(msc.census().is_idle());
    }

    #[test]
    pub fn get_max_lun_reports_last_index() {
        let mut msc = msc();
        let mut data = [0xAA];
        let setup = SetupPacket::class_interface(true, REQUEST_GET_MAX_LUN, 0, 1);
        assert_eq!(msc.control_request(&setup, &mut data), Ok(1));
        assert_eq!(data, [1]);
    }

    #[test]
    pub fn malformed_class_requests_are_refused() {
        let mut msc = msc();
        let mut data = [0u8; 2];

        let setup = SetupPacket::class_interface(true, REQUEST_GET_MAX_LUN, 0, 2);
        assert_eq!(
            msc.control_request(&setup, &mut data),
            Err(ControlError::Malformed { request: REQUEST_GET_MAX_LUN })
        );

        let setup = SetupPacket::class_interface(false, REQUEST_RESET, 3, 0);
        assert_eq!(
            msc.control_request(&setup, &mut data),
            Err(ControlError::Unsupported { request: REQUEST_RESET })
        );

        let setup = SetupPacket::class_interface(false, 0x42, 0, 0);
        assert_eq!(
            msc.control_request(&setup, &mut data),
            Err(ControlError::Unsupported { request: 0x42 })
        );
    }

    #[test]
    pub fn unbind_returns_borrowed_scratch() {
        let mut words = [0u32; 256];
        let config = MscConfig {
            scratch: ScratchConfig::Borrowed(zerocopy::IntoBytes::as_mut_bytes(&mut words[..])),
            ..MscConfig::default()
        };
        let msc = Msc::new(LoopbackTransport::new(), [LogicalUnit::new(RamDisk::new(512, 4))], config).unwrap();
        let parts = msc.unbind();
        assert_eq!(parts.scratch.map(|buf| buf.len()), Some(1024));
        assert_eq!(parts.units.len(), 1);
    }

    #[test]
    pub fn too_many_units_are_rejected() {
        let units = (0..17).map(|_| LogicalUnit::new(RamDisk::new(512, 4)));
        let result = Msc::new(LoopbackTransport::new(), units, MscConfig::default());
        assert!(matches!(result, Err(MscError::TooManyUnits(17))));
    }
}
