//! A device controller that only records what it is asked to do.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use log::trace;
use thiserror::Error;

use crate::transport::{Cancellation, EndpointAddress, RequestId, UsbTransport};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackError {
    #[error("submission on {0} refused by fault injection")]
    Injected(EndpointAddress),
    #[error("{0} is not an endpoint of that direction")]
    Direction(EndpointAddress),
}

/// What a request carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Bytes queued for the host.
    In(Vec<u8>),
    /// Receive capacity offered to the host.
    Out(usize),
}

/// A request the driver submitted and the simulated host has not yet
/// completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub endpoint: EndpointAddress,
    pub request: RequestId,
    pub payload: Payload,
}

#[derive(Debug)]
pub struct LoopbackTransport {
    pending: VecDeque<Submission>,
    cancelled: VecDeque<RequestId>,
    halted: Vec<EndpointAddress>,
    cancellation: Cancellation,
    refuse_submits: usize,
    stalls: usize,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            cancelled: VecDeque::new(),
            halted: Vec::new(),
            cancellation: Cancellation::Discarded,
            refuse_submits: 0,
            stalls: 0,
        }
    }

    /// Choose how `cancel_all` retires outstanding requests.
    pub fn set_cancellation(&mut self, cancellation: Cancellation) {
        self.cancellation = cancellation;
    }

    /// Refuse the next `count` submissions.
    pub fn refuse_submits(&mut self, count: usize) {
        self.refuse_submits = count;
    }

    /// Oldest outstanding request on `endpoint`, removed from the queue.
    pub fn take_in(&mut self, endpoint: EndpointAddress) -> Option<Submission> {
        self.take(endpoint)
    }

    pub fn take_out(&mut self, endpoint: EndpointAddress) -> Option<Submission> {
        self.take(endpoint)
    }

    fn take(&mut self, endpoint: EndpointAddress) -> Option<Submission> {
        let index = self.pending.iter().position(|s| s.endpoint == endpoint)?;
        self.pending.remove(index)
    }

    pub fn pending_on(&self, endpoint: EndpointAddress) -> usize {
        self.pending.iter().filter(|s| s.endpoint == endpoint).count()
    }

    /// Next request whose cancellation still has to be reported.
    pub fn take_cancelled(&mut self) -> Option<RequestId> {
        self.cancelled.pop_front()
    }

    pub fn is_halted(&self, endpoint: EndpointAddress) -> bool {
        self.halted.contains(&endpoint)
    }

    /// The host's CLEAR_FEATURE(ENDPOINT_HALT).
    pub fn clear_halt(&mut self, endpoint: EndpointAddress) {
        self.halted.retain(|&ep| ep != endpoint);
    }

    /// Number of stall calls made so far.
    pub fn stalls(&self) -> usize {
        self.stalls
    }

    fn refuse(&mut self, endpoint: EndpointAddress) -> Result<(), LoopbackError> {
        if self.refuse_submits > 0 {
            self.refuse_submits -= 1;
            return Err(LoopbackError::Injected(endpoint));
        }
        Ok(())
    }
}

impl UsbTransport for LoopbackTransport {
    type Error = LoopbackError;

    fn submit_in(&mut self, endpoint: EndpointAddress, request: RequestId, data: &[u8]) -> Result<(), Self::Error> {
        if !endpoint.is_in() {
            return Err(LoopbackError::Direction(endpoint));
        }
        self.refuse(endpoint)?;
        trace!("loopback: {} bytes queued on {endpoint}", data.len());
        self.pending.push_back(Submission {
            endpoint,
            request,
            payload: Payload::In(data.to_vec()),
        });
        Ok(())
    }

    fn submit_out(&mut self, endpoint: EndpointAddress, request: RequestId, capacity: usize) -> Result<(), Self::Error> {
        if endpoint.is_in() {
            return Err(LoopbackError::Direction(endpoint));
        }
        self.refuse(endpoint)?;
        self.pending.push_back(Submission {
            endpoint,
            request,
            payload: Payload::Out(capacity),
        });
        Ok(())
    }

    fn stall(&mut self, endpoint: EndpointAddress) -> Result<(), Self::Error> {
        self.stalls += 1;
        if !self.is_halted(endpoint) {
            self.halted.push(endpoint);
        }
        Ok(())
    }

    fn cancel_all(&mut self, endpoint: EndpointAddress) -> Cancellation {
        let cancellation = self.cancellation;
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for submission in self.pending.drain(..) {
            if submission.endpoint != endpoint {
                kept.push_back(submission);
            } else if cancellation == Cancellation::Reported {
                self.cancelled.push_back(submission.request);
            }
        }
        self.pending = kept;
        cancellation
    }
}
