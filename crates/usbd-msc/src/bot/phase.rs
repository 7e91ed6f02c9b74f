//! Reconciles what the host announced in the CBW with what the command
//! actually produces, and decides how the data phase is terminated.

use super::{Cbw, Direction};

/// The data phase the host announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    None,
    In(u32),
    Out(u32),
}

impl HostPhase {
    pub fn from_cbw(cbw: &Cbw) -> Self {
        match (cbw.data_transfer_length(), cbw.direction()) {
            (0, _) => HostPhase::None,
            (len, Direction::In) => HostPhase::In(len),
            (len, Direction::Out) => HostPhase::Out(len),
        }
    }

    /// dCBWDataTransferLength.
    pub fn expected(&self) -> u32 {
        match *self {
            HostPhase::None => 0,
            HostPhase::In(len) | HostPhase::Out(len) => len,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            HostPhase::None => None,
            HostPhase::In(_) => Some(Direction::In),
            HostPhase::Out(_) => Some(Direction::Out),
        }
    }

    /// Bytes the host expected but did not get.
    pub fn residue(&self, moved: u64) -> u32 {
        let moved = u32::try_from(moved).unwrap_or(u32::MAX);
        self.expected().saturating_sub(moved)
    }
}

/// The data phase a command wants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePhase {
    None,
    In(u64),
    Out(u64),
}

impl DevicePhase {
    fn normalized(self) -> Self {
        match self {
            DevicePhase::In(0) | DevicePhase::Out(0) => DevicePhase::None,
            other => other,
        }
    }
}

/// Outcome of reconciling the two phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Move `length` bytes in the host's direction. Zero is valid and means
    /// the phase is terminated without data.
    Transfer { length: u64 },
    /// Host and device disagree on direction, or the host expects nothing
    /// while the device has data.
    PhaseError,
}

/// Decide how many bytes to move. `granule` is the unit the device can
/// split its data on: the block size for media access, 1 otherwise.
pub fn resolve(host: HostPhase, device: DevicePhase, granule: u64) -> Plan {
    let granule = granule.max(1);
    match (host, device.normalized()) {
        (_, DevicePhase::None) => Plan::Transfer { length: 0 },
        (HostPhase::In(h), DevicePhase::In(d)) | (HostPhase::Out(h), DevicePhase::Out(d)) => {
            let length = (h as u64).min(d);
            Plan::Transfer {
                length: length - length % granule,
            }
        }
        _ => Plan::PhaseError,
    }
}

/// What must happen on the bus before the CSW is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Nothing,
    /// A zero length packet ends an IN phase that stopped on a packet
    /// boundary short of the host's length.
    ShortPacket,
    /// Halt the endpoint in the host's direction.
    Stall(Direction),
}

/// `passed` is false for failed commands and phase errors; those halt the
/// host's pipe whenever it expected more than was moved.
pub fn terminate(host: HostPhase, moved: u64, passed: bool, packet_size: u16) -> Termination {
    let expected = host.expected() as u64;
    if moved >= expected {
        return Termination::Nothing;
    }
    match host {
        HostPhase::None => Termination::Nothing,
        HostPhase::In(_) if !passed => Termination::Stall(Direction::In),
        HostPhase::In(_) if moved % packet_size.max(1) as u64 == 0 => Termination::ShortPacket,
        HostPhase::In(_) => Termination::Nothing,
        HostPhase::Out(_) => Termination::Stall(Direction::Out),
    }
}
