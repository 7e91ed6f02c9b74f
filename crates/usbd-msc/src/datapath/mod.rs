//! Double buffered data pipeline between a logical unit's storage and the
//! bulk endpoints.
//!
//! The scratch buffer is split into two halves, one per query. A query is a
//! chunk of the data phase: it is read from storage into its half and then
//! sent over USB in packet sized requests (data in), or received from USB
//! and then written to storage (data out). With two queries the storage
//! side of one chunk overlaps the USB side of the other.
//!
//! Every request and query is, at all times, a member of exactly one
//! collection: requests are free or submitted, queries are free, queued for
//! storage or queued for USB. The storage and USB queues are FIFOs, which is
//! what keeps the host's byte stream in medium order.

mod pool;

use log::{debug, trace, warn};
use thiserror::Error;
use zerocopy::IntoBytes;

use crate::bot::{CBW_LEN, CSW_LEN, Csw};
use crate::config::Endpoints;
use crate::storage::{Storage, StorageError};
use crate::transport::{Cancellation, EndpointAddress, RequestId, RequestStatus, UsbTransport};
use crate::{MSC_BLOCK_SIZE, MSC_DATA_EP_SIZE};
use pool::{Slot, SlotPool, SlotQueue};

/// Queries in flight at most. Two is enough to overlap storage with USB.
pub const QUERY_COUNT: usize = 2;
/// Transfer requests: one block worth of full speed packets plus one for a
/// zero length packet or the status.
pub const DATA_QUEUE_SIZE: usize = MSC_BLOCK_SIZE / MSC_DATA_EP_SIZE as usize + 1;

/// Free requests needed before a silent completion refills the endpoint.
const REFILL_WATERMARK: usize = DATA_QUEUE_SIZE / 2;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatapathError {
    #[error("the transport failed or cancelled a transfer")]
    Transport,
    #[error("storage operation failed")]
    Storage(#[from] StorageError),
    #[error("host ended the data phase early with a short packet")]
    ShortPacket,
}

/// Membership counts of every request and query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Census {
    pub free_requests: usize,
    pub submitted_requests: usize,
    pub free_queries: usize,
    pub storage_queries: usize,
    pub usb_queries: usize,
    pub storage_busy: bool,
    exclusive: bool,
}

impl Census {
    /// Every request and every query belongs to exactly one collection.
    pub fn is_conserved(&self) -> bool {
        self.exclusive
            && self.free_requests + self.submitted_requests == DATA_QUEUE_SIZE
            && self.free_queries + self.storage_queries + self.usb_queries == QUERY_COUNT
    }

    /// Nothing is in flight and every resource is back in its pool.
    pub fn is_idle(&self) -> bool {
        self.is_conserved()
            && self.submitted_requests == 0
            && self.free_queries == QUERY_COUNT
            && !self.storage_busy
    }
}

/// Where a transfer's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    /// Byte offset into the scratch buffer.
    Scratch(usize),
    /// Byte offset into the status wrapper.
    Status(usize),
}

impl Region {
    fn advance(self, by: usize) -> Self {
        match self {
            Region::Scratch(at) => Region::Scratch(at + by),
            Region::Status(at) => Region::Status(at + by),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Command,
    /// `last` marks the request that completes its query.
    Data { query: Slot, last: bool },
}

#[derive(Debug, Clone, Copy)]
struct Request {
    kind: RequestKind,
    endpoint: EndpointAddress,
    region: Region,
    length: usize,
}

impl Request {
    const IDLE: Request = Request {
        kind: RequestKind::Command,
        endpoint: EndpointAddress(0),
        region: Region::Scratch(0),
        length: 0,
    };
}

#[derive(Debug, Clone, Copy)]
struct Query {
    /// Byte position on the medium.
    position: u64,
    region: Region,
    capacity: usize,
    length: usize,
    /// Bytes already handed to the transport.
    offset: usize,
    /// End the query with a zero length packet.
    short_packet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Idle,
    Command,
    Reply,
    ReadAndSend,
    ReceiveAndWrite,
    Verify,
    ReceiveAndDiscard,
}

impl Flow {
    fn is_incoming(self) -> bool {
        matches!(self, Flow::ReceiveAndWrite | Flow::ReceiveAndDiscard)
    }
}

/// Result of a finished flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transfer {
    /// Host data bytes moved: sent, written to storage or discarded.
    pub moved: u64,
    pub result: Result<(), DatapathError>,
}

#[derive(Debug)]
pub(crate) enum Progress<'d> {
    Busy,
    /// A command wrapper candidate arrived.
    Command(&'d [u8]),
    Finished(Transfer),
    /// An abort retired everything.
    Drained,
}

/// Borrowed collaborators for one pipeline step.
pub(crate) struct Io<'a, T, S> {
    pub transport: &'a mut T,
    pub storage: Option<&'a mut S>,
    pub scratch: &'a mut [u8],
}

pub(crate) struct Datapath {
    endpoints: Endpoints,
    packet_size: usize,
    half: usize,
    requests: [Request; DATA_QUEUE_SIZE],
    free_requests: SlotPool<DATA_QUEUE_SIZE>,
    submitted: SlotPool<DATA_QUEUE_SIZE>,
    queries: [Query; QUERY_COUNT],
    free_queries: SlotPool<QUERY_COUNT>,
    storage_queue: SlotQueue<QUERY_COUNT>,
    usb_queue: SlotQueue<QUERY_COUNT>,
    storage_busy: bool,
    flow: Flow,
    position: u64,
    remaining: u64,
    moved: u64,
    failure: Option<DatapathError>,
    aborting: bool,
    status: [u8; CSW_LEN],
}

impl Datapath {
    pub fn new(endpoints: Endpoints, packet_size: u16, scratch_len: usize) -> Self {
        let half = scratch_len / 2;
        let mut datapath = Self {
            endpoints,
            packet_size: packet_size as usize,
            half,
            requests: [Request::IDLE; DATA_QUEUE_SIZE],
            free_requests: SlotPool::full(),
            submitted: SlotPool::empty(),
            queries: [Query {
                position: 0,
                region: Region::Scratch(0),
                capacity: half,
                length: 0,
                offset: 0,
                short_packet: false,
            }; QUERY_COUNT],
            free_queries: SlotPool::full(),
            storage_queue: SlotQueue::new(),
            usb_queue: SlotQueue::new(),
            storage_busy: false,
            flow: Flow::Idle,
            position: 0,
            remaining: 0,
            moved: 0,
            failure: None,
            aborting: false,
            status: [0; CSW_LEN],
        };
        datapath.reset_queries();
        datapath
    }

    pub fn census(&self) -> Census {
        let requests_exclusive = (0..DATA_QUEUE_SIZE as Slot).all(|slot| {
            self.free_requests.contains(slot) as u8 + self.submitted.contains(slot) as u8 == 1
        });
        let queries_exclusive = (0..QUERY_COUNT as Slot).all(|slot| {
            self.free_queries.contains(slot) as u8
                + self.storage_queue.contains(slot) as u8
                + self.usb_queue.contains(slot) as u8
                == 1
        });
        Census {
            free_requests: self.free_requests.len(),
            submitted_requests: self.submitted.len(),
            free_queries: self.free_queries.len(),
            storage_queries: self.storage_queue.len(),
            usb_queries: self.usb_queue.len(),
            storage_busy: self.storage_busy,
            exclusive: requests_exclusive && queries_exclusive,
        }
    }

    /// Post the receive for the next command wrapper.
    pub fn receive_command<T: UsbTransport, S: Storage>(&mut self, io: &mut Io<'_, T, S>) -> Progress<'static> {
        self.begin(Flow::Command, 0, 0);
        let request = Request {
            kind: RequestKind::Command,
            endpoint: self.endpoints.rx,
            region: Region::Scratch(0),
            length: CBW_LEN.next_multiple_of(self.packet_size),
        };
        if let Err(err) = self.submit(&mut *io.transport, &*io.scratch, request) {
            self.fail(err);
        }
        self.settle()
    }

    /// Send the first `response_len` bytes of the scratch buffer, then a zero
    /// length packet if `short_packet`, then `status` if given.
    pub fn reply<T: UsbTransport, S: Storage>(
        &mut self,
        io: &mut Io<'_, T, S>,
        response_len: usize,
        short_packet: bool,
        status: Option<&Csw>,
    ) -> Progress<'static> {
        self.begin(Flow::Reply, 0, 0);
        if let Some(csw) = status {
            self.status.copy_from_slice(csw.as_bytes());
        }

        let response = &mut self.queries[0];
        response.length = response_len.min(response.capacity);
        response.short_packet = short_packet;
        let status_query = &mut self.queries[1];
        status_query.region = Region::Status(0);
        status_query.capacity = CSW_LEN;
        status_query.length = if status.is_some() { CSW_LEN } else { 0 };

        self.free_queries.clear();
        for slot in 0..QUERY_COUNT as Slot {
            let query = &self.queries[slot as usize];
            if query.length > 0 || query.short_packet {
                self.usb_queue.push_back(slot);
            } else {
                self.free_queries.put(slot);
            }
        }
        self.outgoing(io);
        self.settle()
    }

    /// Read `length` bytes at `position` and send them to the host.
    pub fn read_and_send<T: UsbTransport, S: Storage>(
        &mut self,
        io: &mut Io<'_, T, S>,
        position: u64,
        length: u64,
    ) -> Progress<'static> {
        self.begin(Flow::ReadAndSend, position, length);
        self.outgoing(io);
        self.settle()
    }

    /// Read the range back from storage without sending it anywhere.
    pub fn verify<T: UsbTransport, S: Storage>(
        &mut self,
        io: &mut Io<'_, T, S>,
        position: u64,
        length: u64,
    ) -> Progress<'static> {
        self.begin(Flow::Verify, position, length);
        self.outgoing(io);
        self.settle()
    }

    /// Receive `length` bytes from the host and write them at `position`.
    pub fn receive_and_write<T: UsbTransport, S: Storage>(
        &mut self,
        io: &mut Io<'_, T, S>,
        position: u64,
        length: u64,
    ) -> Progress<'static> {
        self.begin(Flow::ReceiveAndWrite, position, length);
        self.incoming(io);
        self.settle()
    }

    /// Receive `length` bytes from the host and drop them.
    pub fn receive_and_discard<T: UsbTransport, S: Storage>(
        &mut self,
        io: &mut Io<'_, T, S>,
        length: u64,
    ) -> Progress<'static> {
        self.begin(Flow::ReceiveAndDiscard, 0, length);
        self.incoming(io);
        self.settle()
    }

    /// Cancel everything outstanding on both endpoints. Reports
    /// [`Progress::Drained`] once every request and the storage operation
    /// have retired, which may be immediately.
    pub fn abort<T: UsbTransport, S: Storage>(&mut self, io: &mut Io<'_, T, S>) -> Progress<'static> {
        debug!("aborting {:?} flow", self.flow);
        self.aborting = true;
        self.remaining = 0;
        for endpoint in [self.endpoints.rx, self.endpoints.tx] {
            self.cancel(&mut *io.transport, endpoint);
        }
        self.settle()
    }

    pub fn usb_completed<'d, T: UsbTransport, S: Storage>(
        &mut self,
        io: &mut Io<'_, T, S>,
        id: RequestId,
        status: RequestStatus,
        data: &'d [u8],
    ) -> Progress<'d> {
        let slot = id.0;
        if !self.submitted.remove(slot) {
            warn!("completion for request {slot} which is not outstanding");
            return Progress::Busy;
        }
        self.free_requests.put(slot);
        let request = self.requests[slot as usize];
        trace!("request {slot} on {} {status:?} with {} bytes", request.endpoint, data.len());

        match status {
            RequestStatus::Completed => {}
            RequestStatus::Cancelled => {
                if !self.aborting {
                    self.fail(DatapathError::Transport);
                }
                return self.settle();
            }
            RequestStatus::Error => {
                self.fail(DatapathError::Transport);
                return self.settle();
            }
        }
        if self.aborting {
            return self.settle();
        }

        let RequestKind::Data { query, last } = request.kind else {
            self.flow = Flow::Idle;
            return Progress::Command(data);
        };

        if request.endpoint.is_in() {
            if let Region::Scratch(_) = request.region {
                self.moved += request.length as u64;
            }
        } else {
            let received = data.len().min(request.length);
            if let Region::Scratch(at) = request.region {
                io.scratch[at..at + received].copy_from_slice(&data[..received]);
            }
            if self.flow == Flow::ReceiveAndDiscard {
                self.moved += received as u64;
            }
            if received < request.length {
                self.fail(DatapathError::ShortPacket);
                self.cancel(&mut *io.transport, self.endpoints.rx);
            }
        }

        if self.failure.is_none() {
            if last {
                self.retire_usb(io, query);
            } else if self.free_requests.len() >= REFILL_WATERMARK {
                self.resume(io);
            }
        }
        self.settle()
    }

    pub fn storage_completed<T: UsbTransport, S: Storage>(
        &mut self,
        io: &mut Io<'_, T, S>,
        result: Result<(), StorageError>,
    ) -> Progress<'static> {
        if !self.storage_busy {
            warn!("storage completion without an operation in flight");
            return Progress::Busy;
        }
        self.storage_busy = false;
        if self.aborting {
            return self.settle();
        }
        if let Err(err) = result {
            self.fail(err.into());
            return self.settle();
        }

        let Some(slot) = self.storage_queue.pop_front() else {
            return self.settle();
        };
        let query = self.queries[slot as usize];
        trace!("storage done for query {slot} at {:#x}", query.position);
        match self.flow {
            Flow::ReadAndSend => {
                self.usb_queue.push_back(slot);
                self.outgoing(io);
            }
            Flow::Verify => {
                self.free_queries.put(slot);
                self.outgoing(io);
            }
            Flow::ReceiveAndWrite => {
                self.moved += query.length as u64;
                self.free_queries.put(slot);
                self.incoming(io);
            }
            flow => {
                warn!("storage completion during {flow:?} flow");
                self.free_queries.put(slot);
            }
        }
        self.settle()
    }

    fn begin(&mut self, flow: Flow, position: u64, length: u64) {
        debug_assert!(self.census().is_idle(), "flow started while busy");
        self.reset_queries();
        self.flow = flow;
        self.position = position;
        self.remaining = length;
        self.moved = 0;
        self.failure = None;
        if flow != Flow::Command {
            debug!("{flow:?} of {length} bytes at {position:#x}");
        }
    }

    fn reset_queries(&mut self) {
        for (index, query) in self.queries.iter_mut().enumerate() {
            *query = Query {
                position: 0,
                region: Region::Scratch(index * self.half),
                capacity: self.half,
                length: 0,
                offset: 0,
                short_packet: false,
            };
        }
        self.storage_queue.clear();
        self.usb_queue.clear();
        self.free_queries.fill();
    }

    fn fail(&mut self, error: DatapathError) {
        if self.failure.is_none() {
            warn!("{:?} flow failed: {error}", self.flow);
            self.failure = Some(error);
        }
        self.remaining = 0;
    }

    fn cancel<T: UsbTransport>(&mut self, transport: &mut T, endpoint: EndpointAddress) {
        if transport.cancel_all(endpoint) == Cancellation::Reported {
            return;
        }
        let stranded: heapless::Vec<Slot, DATA_QUEUE_SIZE> = self
            .submitted
            .iter()
            .filter(|&slot| self.requests[slot as usize].endpoint == endpoint)
            .collect();
        for slot in stranded {
            self.submitted.remove(slot);
            self.free_requests.put(slot);
        }
    }

    /// Decide whether the current flow is over. A flow that failed only ends
    /// once nothing is in flight, so every resource comes back exactly once.
    fn settle(&mut self) -> Progress<'static> {
        debug_assert!(self.census().is_conserved(), "pool membership broken");
        let quiet = self.submitted.is_empty() && !self.storage_busy;
        if self.aborting {
            if !quiet {
                return Progress::Busy;
            }
            self.aborting = false;
            self.finish();
            debug!("pipeline drained");
            return Progress::Drained;
        }
        if self.flow == Flow::Idle || !quiet {
            return Progress::Busy;
        }

        let result = match self.failure {
            Some(err) => Err(err),
            None if self.remaining == 0 && self.free_queries.is_full() && self.flow != Flow::Command => Ok(()),
            None => return Progress::Busy,
        };
        let transfer = Transfer { moved: self.moved, result };
        self.finish();
        Progress::Finished(transfer)
    }

    fn finish(&mut self) {
        self.flow = Flow::Idle;
        self.failure = None;
        self.remaining = 0;
        self.reset_queries();
    }

    fn resume<T: UsbTransport, S: Storage>(&mut self, io: &mut Io<'_, T, S>) {
        if self.flow.is_incoming() {
            self.incoming(io);
        } else {
            self.outgoing(io);
        }
    }

    /// Data in step: read ahead into free queries, keep storage busy and
    /// feed the front of the USB queue to the transport.
    fn outgoing<T: UsbTransport, S: Storage>(&mut self, io: &mut Io<'_, T, S>) {
        if self.failure.is_some() {
            return;
        }
        if matches!(self.flow, Flow::ReadAndSend | Flow::Verify) {
            self.seed_queries(false);
        }
        self.start_storage(io);
        if let Some(slot) = self.usb_queue.front() {
            if let Err(err) = self.enqueue_in(&mut *io.transport, &*io.scratch, slot) {
                self.fail(err);
            }
        }
    }

    /// Data out step: hand free queries to USB, keep the front one receiving
    /// and write whatever has fully arrived.
    fn incoming<T: UsbTransport, S: Storage>(&mut self, io: &mut Io<'_, T, S>) {
        if self.failure.is_some() {
            return;
        }
        self.seed_queries(true);
        if let Some(slot) = self.usb_queue.front() {
            if let Err(err) = self.enqueue_out(&mut *io.transport, &*io.scratch, slot) {
                self.fail(err);
            }
        }
        if self.flow == Flow::ReceiveAndWrite {
            self.start_storage(io);
        }
    }

    /// Give every free query the next chunk of the data phase.
    fn seed_queries(&mut self, to_usb: bool) {
        while self.remaining > 0 {
            let Some(slot) = self.free_queries.take() else {
                break;
            };
            let query = &mut self.queries[slot as usize];
            let length = self.remaining.min(query.capacity as u64);
            query.position = self.position;
            query.length = length as usize;
            query.offset = 0;
            query.short_packet = false;
            self.position += length;
            self.remaining -= length;
            if to_usb {
                self.usb_queue.push_back(slot);
            } else {
                self.storage_queue.push_back(slot);
            }
        }
    }

    /// One storage operation at a time, always for the front of the queue.
    fn start_storage<T, S: Storage>(&mut self, io: &mut Io<'_, T, S>) {
        if self.storage_busy || self.failure.is_some() {
            return;
        }
        let Some(slot) = self.storage_queue.front() else {
            return;
        };
        let query = self.queries[slot as usize];
        let Region::Scratch(base) = query.region else {
            return;
        };
        let Some(storage) = io.storage.as_deref_mut() else {
            self.fail(StorageError::NotReady.into());
            return;
        };

        let buf = &mut io.scratch[base..base + query.length];
        let result = if self.flow == Flow::ReceiveAndWrite {
            storage.write(query.position, buf)
        } else {
            storage.read(query.position, buf)
        };
        match result {
            Ok(()) => {
                trace!("storage started for query {slot} at {:#x}", query.position);
                self.storage_busy = true;
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn enqueue_in<T: UsbTransport>(&mut self, transport: &mut T, scratch: &[u8], slot: Slot) -> Result<(), DatapathError> {
        let mut query = self.queries[slot as usize];
        let result = loop {
            let left = query.length - query.offset;
            if (left == 0 && !query.short_packet) || self.free_requests.is_empty() {
                break Ok(());
            }
            let length = left.min(self.packet_size);
            let zero_length = left == 0;
            let request = Request {
                kind: RequestKind::Data {
                    query: slot,
                    last: zero_length || (length == left && !query.short_packet),
                },
                endpoint: self.endpoints.tx,
                region: query.region.advance(query.offset),
                length,
            };
            if let Err(err) = self.submit(transport, scratch, request) {
                break Err(err);
            }
            query.offset += length;
            if zero_length {
                query.short_packet = false;
            }
        };
        self.queries[slot as usize] = query;
        result
    }

    fn enqueue_out<T: UsbTransport>(&mut self, transport: &mut T, scratch: &[u8], slot: Slot) -> Result<(), DatapathError> {
        let mut query = self.queries[slot as usize];
        let result = loop {
            let left = query.length - query.offset;
            if left == 0 || self.free_requests.is_empty() {
                break Ok(());
            }
            let length = left.min(self.packet_size);
            let request = Request {
                kind: RequestKind::Data {
                    query: slot,
                    last: length == left,
                },
                endpoint: self.endpoints.rx,
                region: query.region.advance(query.offset),
                length,
            };
            if let Err(err) = self.submit(transport, scratch, request) {
                break Err(err);
            }
            query.offset += length;
        };
        self.queries[slot as usize] = query;
        result
    }

    fn retire_usb<T: UsbTransport, S: Storage>(&mut self, io: &mut Io<'_, T, S>, slot: Slot) {
        let front = self.usb_queue.pop_front();
        debug_assert_eq!(front, Some(slot), "queries retired out of order");
        match self.flow {
            Flow::ReceiveAndWrite => {
                self.storage_queue.push_back(slot);
                self.incoming(io);
            }
            Flow::ReceiveAndDiscard => {
                self.free_queries.put(slot);
                self.incoming(io);
            }
            _ => {
                self.free_queries.put(slot);
                self.outgoing(io);
            }
        }
    }

    fn submit<T: UsbTransport>(&mut self, transport: &mut T, scratch: &[u8], request: Request) -> Result<(), DatapathError> {
        let Some(slot) = self.free_requests.take() else {
            return Err(DatapathError::Transport);
        };
        self.requests[slot as usize] = request;
        let id = RequestId(slot);
        let result = if request.endpoint.is_in() {
            let data = match request.region {
                Region::Scratch(at) => &scratch[at..at + request.length],
                Region::Status(at) => &self.status[at..at + request.length],
            };
            transport.submit_in(request.endpoint, id, data)
        } else {
            transport.submit_out(request.endpoint, id, request.length)
        };

        match result {
            Ok(()) => {
                trace!("request {slot} submitted on {} for {} bytes", request.endpoint, request.length);
                self.submitted.put(slot);
                Ok(())
            }
            Err(err) => {
                warn!("transport refused a request on {}: {err:?}", request.endpoint);
                self.free_requests.put(slot);
                Err(DatapathError::Transport)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::CommandStatus;
    use crate::sim::{Completions, LoopbackTransport, Payload, RamDisk};
    use std::vec::Vec;

    const PACKET: u16 = 64;

    struct Rig {
        datapath: Datapath,
        transport: LoopbackTransport,
        disk: RamDisk,
        scratch: Vec<u8>,
    }

    impl Rig {
        fn new(scratch_len: usize) -> Self {
            Self {
                datapath: Datapath::new(Endpoints::default(), PACKET, scratch_len),
                transport: LoopbackTransport::new(),
                disk: RamDisk::new(512, 16).with_pattern(),
                scratch: std::vec![0; scratch_len],
            }
        }

        fn io(&mut self) -> (&mut Datapath, Io<'_, LoopbackTransport, RamDisk>) {
            (
                &mut self.datapath,
                Io {
                    transport: &mut self.transport,
                    storage: Some(&mut self.disk),
                    scratch: &mut self.scratch,
                },
            )
        }

        fn finish_storage(&mut self) -> Option<Transfer> {
            let result = self.disk.take_completion()?;
            let (datapath, mut io) = self.io();
            settled(datapath.storage_completed(&mut io, result))
        }

        /// Complete the oldest IN submission, returning its bytes.
        fn finish_in(&mut self) -> Option<(Vec<u8>, Option<Transfer>)> {
            let submission = self.transport.take_in(EndpointAddress(0x81))?;
            let Payload::In(bytes) = submission.payload else {
                return None;
            };
            let (datapath, mut io) = self.io();
            let progress = datapath.usb_completed(&mut io, submission.request, RequestStatus::Completed, &[]);
            Some((bytes, settled(progress)))
        }

        fn assert_conserved(&self) {
            assert!(self.datapath.census().is_conserved(), "{:?}", self.datapath.census());
        }
    }

    fn settled(progress: Progress<'_>) -> Option<Transfer> {
        match progress {
            Progress::Finished(transfer) => Some(transfer),
            _ => None,
        }
    }

    /// Deliver storage completions first, then IN packets, until the flow
    /// finishes. Returns the bytes the host saw.
    fn drive_in(rig: &mut Rig) -> (Vec<u8>, Transfer) {
        let mut sent = Vec::new();
        loop {
            rig.assert_conserved();
            if let Some(transfer) = rig.finish_storage() {
                return (sent, transfer);
            }
            if rig.disk.has_completion() {
                continue;
            }
            let (bytes, transfer) = rig.finish_in().expect("pipeline stalled");
            sent.extend_from_slice(&bytes);
            if let Some(transfer) = transfer {
                return (sent, transfer);
            }
        }
    }

    #[test]
    pub fn read_and_send_streams_in_order() {
        let mut rig = Rig::new(1024);
        let (datapath, mut io) = rig.io();
        assert!(settled(datapath.read_and_send(&mut io, 512, 2048)).is_none());

        let (sent, transfer) = drive_in(&mut rig);

        assert_eq!(transfer, Transfer { moved: 2048, result: Ok(()) });
        assert_eq!(&sent[..], &rig.disk.contents()[512..2560]);
        assert!(rig.datapath.census().is_idle());
        assert_eq!(rig.disk.reads(), [(512, 512), (1024, 512), (1536, 512), (2048, 512)]);
    }

    #[test]
    pub fn request_pool_bounds_outstanding_packets() {
        let mut rig = Rig::new(2048);
        let (datapath, mut io) = rig.io();
        datapath.read_and_send(&mut io, 0, 1024);
        rig.finish_storage();

        assert_eq!(rig.transport.pending_on(EndpointAddress(0x81)), DATA_QUEUE_SIZE);
        assert_eq!(rig.datapath.census().free_requests, 0);
        rig.assert_conserved();
    }

    #[test]
    pub fn reply_sends_response_then_status() {
        let mut rig = Rig::new(1024);
        rig.scratch[..4].copy_from_slice(&[1, 2, 3, 4]);
        let csw = Csw::new(7, 0, CommandStatus::Passed);
        let (datapath, mut io) = rig.io();
        datapath.reply(&mut io, 4, false, Some(&csw));

        let (response, done) = rig.finish_in().unwrap();
        assert_eq!(response, [1, 2, 3, 4]);
        assert!(done.is_none());
        let (status, done) = rig.finish_in().unwrap();
        assert_eq!(status, csw.to_bytes());
        assert_eq!(done, Some(Transfer { moved: 4, result: Ok(()) }));
    }

    #[test]
    pub fn zero_length_packet_precedes_status() {
        let mut rig = Rig::new(1024);
        let csw = Csw::new(1, 64, CommandStatus::Passed);
        let (datapath, mut io) = rig.io();
        datapath.reply(&mut io, 0, true, Some(&csw));

        let (zlp, _) = rig.finish_in().unwrap();
        assert!(zlp.is_empty());
        let (status, done) = rig.finish_in().unwrap();
        assert_eq!(status.len(), CSW_LEN);
        assert_eq!(done, Some(Transfer { moved: 0, result: Ok(()) }));
    }

    #[test]
    pub fn storage_failure_drains_before_finishing() {
        let mut rig = Rig::new(1024);
        rig.disk.fail_reads_at(1024);
        let (datapath, mut io) = rig.io();
        datapath.read_and_send(&mut io, 0, 2048);

        // The third chunk fails while the second one is still on the bus.
        let (sent, transfer) = drive_in(&mut rig);

        assert_eq!(
            transfer,
            Transfer { moved: 1024, result: Err(DatapathError::Storage(StorageError::Io)) }
        );
        assert_eq!(&sent[..], &rig.disk.contents()[..1024]);
        assert!(rig.datapath.census().is_idle());
    }

    #[test]
    pub fn abort_waits_for_reported_cancellations() {
        let mut rig = Rig::new(1024);
        rig.transport.set_cancellation(Cancellation::Reported);
        let (datapath, mut io) = rig.io();
        datapath.read_and_send(&mut io, 0, 1024);
        rig.finish_storage();

        let (datapath, mut io) = rig.io();
        assert!(matches!(datapath.abort(&mut io), Progress::Busy));
        // The second read is still in flight.
        assert!(rig.finish_storage().is_none());

        let mut drained = false;
        while let Some(id) = rig.transport.take_cancelled() {
            let (datapath, mut io) = rig.io();
            drained = matches!(
                datapath.usb_completed(&mut io, id, RequestStatus::Cancelled, &[]),
                Progress::Drained
            );
            rig.assert_conserved();
        }
        assert!(drained);
        assert!(rig.datapath.census().is_idle());
    }

    #[test]
    pub fn abort_reclaims_discarded_requests() {
        let mut rig = Rig::new(1024);
        let (datapath, mut io) = rig.io();
        datapath.receive_command(&mut io);
        let (datapath, mut io) = rig.io();
        assert!(matches!(datapath.abort(&mut io), Progress::Drained));
        assert!(rig.datapath.census().is_idle());
    }

    #[test]
    pub fn receive_and_write_lands_on_storage() {
        let mut rig = Rig::new(1024);
        let (datapath, mut io) = rig.io();
        datapath.receive_and_write(&mut io, 1024, 1024);

        let payload: Vec<u8> = (0..1024u32).map(|i| (i * 7) as u8).collect();
        let mut sent = 0;
        let mut finished = None;
        while finished.is_none() {
            rig.assert_conserved();
            if let Some(transfer) = rig.finish_storage() {
                finished = Some(transfer);
                continue;
            }
            let submission = rig.transport.take_out(EndpointAddress(0x01)).expect("pipeline stalled");
            let Payload::Out(capacity) = submission.payload else { unreachable!() };
            let chunk = &payload[sent..sent + capacity];
            sent += capacity;
            let (datapath, mut io) = rig.io();
            finished = settled(datapath.usb_completed(&mut io, submission.request, RequestStatus::Completed, chunk));
        }

        assert_eq!(finished, Some(Transfer { moved: 1024, result: Ok(()) }));
        assert_eq!(&rig.disk.contents()[1024..2048], &payload[..]);
    }
}
