//! MODE SENSE parameter headers. No mode pages are implemented; the host
//! only learns the write protect state from the device specific byte.

pub const MODE_PARAMETER_HEADER_6_LEN: usize = 4;
pub const MODE_PARAMETER_HEADER_10_LEN: usize = 8;

/// Return all mode pages.
pub const ALL_PAGES: u8 = 0x3F;

const WRITE_PROTECT: u8 = 0x80;

fn device_specific(write_protected: bool) -> u8 {
    if write_protected { WRITE_PROTECT } else { 0 }
}

/// Header for MODE SENSE (6). The mode data length excludes itself.
pub fn header_6(write_protected: bool) -> [u8; MODE_PARAMETER_HEADER_6_LEN] {
    [
        (MODE_PARAMETER_HEADER_6_LEN - 1) as u8,
        0x00,
        device_specific(write_protected),
        0x00,
    ]
}

/// Header for MODE SENSE (10).
pub fn header_10(write_protected: bool) -> [u8; MODE_PARAMETER_HEADER_10_LEN] {
    let [high, low] = ((MODE_PARAMETER_HEADER_10_LEN - 2) as u16).to_be_bytes();
    [high, low, 0x00, device_specific(write_protected), 0, 0, 0, 0]
}

/// Whether the device specific byte of a received header flags write
/// protection. `long` selects the 10 byte header layout.
pub fn is_write_protected(header: &[u8], long: bool) -> Option<bool> {
    let index = if long { 3 } else { 2 };
    header.get(index).map(|byte| byte & WRITE_PROTECT != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn headers() {
        assert_eq!(header_6(false), [3, 0, 0, 0]);
        assert_eq!(header_6(true), [3, 0, 0x80, 0]);
        assert_eq!(header_10(false), [0, 6, 0, 0, 0, 0, 0, 0]);
        assert_eq!(header_10(true), [0, 6, 0, 0x80, 0, 0, 0, 0]);
    }

    #[test]
    pub fn write_protect_round_trip() {
        assert_eq!(is_write_protected(&header_6(true), false), Some(true));
        assert_eq!(is_write_protected(&header_10(false), true), Some(false));
        assert_eq!(is_write_protected(&[3, 0], false), None);
    }
}
