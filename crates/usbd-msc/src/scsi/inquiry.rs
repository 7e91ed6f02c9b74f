use alloc::string::{String, ToString};
use core::fmt;

use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Identification strings reported in INQUIRY data.
///
/// Strings are padded with spaces, or truncated, to the INQUIRY field
/// widths: 8 bytes of vendor, 16 of product and 4 of revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub vendor: &'static str,
    pub product: &'static str,
    pub revision: &'static str,
    /// Reported through the unit serial number VPD page.
    pub serial: &'static str,
    /// Sets the RMB bit.
    pub removable: bool,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            vendor: "usbd-msc",
            product: "Mass Storage",
            revision: "0.1",
            serial: "000000000001",
            removable: true,
        }
    }
}

/// SCSI Peripheral Device Type field (from byte 0 of INQUIRY data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralDeviceType {
    /// Direct-access block device (e.g., disk).
    SbcDirectAccessDevice,
    /// CD/DVD device.
    CdRomDevice,
    /// Optical memory (e.g., MO disk).
    OpticalMemoryDevice,
    /// RBC direct-access device.
    RbcDirectAccessDevice,
    /// Other or unrecognized value.
    OutOfScope(u8),
}

impl From<u8> for PeripheralDeviceType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => PeripheralDeviceType::SbcDirectAccessDevice,
            0x05 => PeripheralDeviceType::CdRomDevice,
            0x07 => PeripheralDeviceType::OpticalMemoryDevice,
            0x0E => PeripheralDeviceType::RbcDirectAccessDevice,
            other => PeripheralDeviceType::OutOfScope(other),
        }
    }
}

pub const INQUIRY_DATA_LEN: usize = 36;

const RMB: u8 = 0x80;
/// SPC-2 conformance.
const VERSION_SPC2: u8 = 0x04;
const RESPONSE_DATA_FORMAT: u8 = 0x02;

/// Standard INQUIRY response data (first 36 bytes).
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct InquiryData {
    pub peripheral: u8,
    pub removable: u8,
    pub version: u8,
    pub response_format: u8,
    /// Number of bytes following byte 4.
    pub additional_length: u8,
    pub flags: [u8; 3],
    pub vendor_identification: [u8; 8],
    pub product_identification: [u8; 16],
    pub product_revision_level: [u8; 4],
}

const_assert_eq!(core::mem::size_of::<InquiryData>(), INQUIRY_DATA_LEN);

impl fmt::Debug for InquiryData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InquiryData")
            .field("peripheral_device_type", &self.peripheral_device_type())
            .field("is_removable", &self.is_removable())
            .field("additional_length", &self.additional_length)
            .field("vendor", &self.vendor())
            .field("product", &self.product())
            .field("revision", &self.revision())
            .finish()
    }
}

fn padded<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let len = text.len().min(N);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
    field
}

fn trimmed(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim().to_string()
}

impl InquiryData {
    pub fn new(identity: &Identity) -> Self {
        Self {
            peripheral: 0x00,
            removable: if identity.removable { RMB } else { 0 },
            version: VERSION_SPC2,
            response_format: RESPONSE_DATA_FORMAT,
            additional_length: (INQUIRY_DATA_LEN - 5) as u8,
            flags: [0; 3],
            vendor_identification: padded(identity.vendor),
            product_identification: padded(identity.product),
            product_revision_level: padded(identity.revision),
        }
    }

    /// Parse a standard 36-byte INQUIRY response.
    ///
    /// Returns `None` if the buffer is shorter than 36 bytes.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        InquiryData::read_from_prefix(buf).ok().map(|(data, _)| data)
    }

    pub fn peripheral_device_type(&self) -> PeripheralDeviceType {
        PeripheralDeviceType::from(self.peripheral & 0x1F)
    }

    pub fn is_removable(&self) -> bool {
        self.removable & RMB != 0
    }

    /// Vendor ID string (trimmed ASCII).
    pub fn vendor(&self) -> String {
        trimmed(&self.vendor_identification)
    }

    /// Product ID string (trimmed ASCII).
    pub fn product(&self) -> String {
        trimmed(&self.product_identification)
    }

    /// Revision string (trimmed ASCII).
    pub fn revision(&self) -> String {
        trimmed(&self.product_revision_level)
    }
}

/// Vital product data pages.
pub mod vpd {
    pub const SUPPORTED_PAGES: u8 = 0x00;
    pub const UNIT_SERIAL_NUMBER: u8 = 0x80;

    const HEADER_LEN: usize = 4;

    /// Write a VPD page into `out`, returning the number of bytes written or
    /// `None` for pages this device does not implement.
    pub fn write_page(page_code: u8, serial: &str, out: &mut [u8]) -> Option<usize> {
        let body: &[u8] = match page_code {
            SUPPORTED_PAGES => &[SUPPORTED_PAGES, UNIT_SERIAL_NUMBER],
            UNIT_SERIAL_NUMBER => {
                let len = serial.len().min(u8::MAX as usize);
                &serial.as_bytes()[..len]
            }
            _ => return None,
        };
        let total = HEADER_LEN + body.len();
        let mut page = [0u8; HEADER_LEN + u8::MAX as usize];
        page[1] = page_code;
        page[3] = body.len() as u8;
        page[HEADER_LEN..total].copy_from_slice(body);

        let len = total.min(out.len());
        out[..len].copy_from_slice(&page[..len]);
        Some(len)
    }
}
