//! The USB device controller seam.
//!
//! The driver never waits on the bus. It submits requests through
//! [`UsbTransport`] and learns about their fate from completions handed to
//! [`Msc::usb_completed`](crate::Msc::usb_completed).

use core::fmt;

/// Endpoint address with the direction in bit 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    pub const fn is_in(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub const fn number(self) -> u8 {
        self.0 & 0x0F
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Identifies one of the driver's transfer requests. The transport hands it
/// back unchanged with the completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) u8);

impl RequestId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a submitted request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Completed,
    /// Retired by [`UsbTransport::cancel_all`].
    Cancelled,
    /// The controller reported a bus or hardware error.
    Error,
}

/// What became of the requests outstanding on a cancelled endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// Each one will still come back as a [`RequestStatus::Cancelled`]
    /// completion.
    Reported,
    /// They were dropped without completions. The driver reclaims them
    /// itself.
    Discarded,
}

pub trait UsbTransport {
    type Error: fmt::Debug;

    /// Queue `data` for transmission on an IN endpoint. The transport copies
    /// the bytes before returning. An empty slice is a zero length packet.
    fn submit_in(&mut self, endpoint: EndpointAddress, request: RequestId, data: &[u8]) -> Result<(), Self::Error>;

    /// Queue a receive of at most `capacity` bytes on an OUT endpoint. The
    /// received bytes come back with the completion.
    fn submit_out(&mut self, endpoint: EndpointAddress, request: RequestId, capacity: usize) -> Result<(), Self::Error>;

    /// Halt an endpoint until the host clears the feature.
    fn stall(&mut self, endpoint: EndpointAddress) -> Result<(), Self::Error>;

    /// Retire every request outstanding on `endpoint`.
    fn cancel_all(&mut self, endpoint: EndpointAddress) -> Cancellation;
}

impl<T: UsbTransport + ?Sized> UsbTransport for &mut T {
    type Error = T::Error;

    fn submit_in(&mut self, endpoint: EndpointAddress, request: RequestId, data: &[u8]) -> Result<(), Self::Error> {
        (**self).submit_in(endpoint, request, data)
    }

    fn submit_out(&mut self, endpoint: EndpointAddress, request: RequestId, capacity: usize) -> Result<(), Self::Error> {
        (**self).submit_out(endpoint, request, capacity)
    }

    fn stall(&mut self, endpoint: EndpointAddress) -> Result<(), Self::Error> {
        (**self).stall(endpoint)
    }

    fn cancel_all(&mut self, endpoint: EndpointAddress) -> Cancellation {
        (**self).cancel_all(endpoint)
    }
}
