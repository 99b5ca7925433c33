//! Vendor-specific descriptor parsing and bring-up constants.
//!
//! ## Descriptor layout
//!
//! ```text
//! length:   u8   total descriptor length
//! type:     u8   0x5F
//! version:  u16  0x0001 (LE)
//! remain:   u8   length - 2
//! records:  { key: u16 LE, len: u8, value: [u8; len] }*
//! ```
//!
//! Only key `0x0200` (maximum pixel area, u32 LE) is interpreted.

use tracing::{info, warn};

/// Descriptor type of the vendor block.
pub const VENDOR_DESCRIPTOR_TYPE: u8 = 0x5F;

/// Record key carrying the maximum pixel area.
const KEY_MAX_AREA: u16 = 0x0200;

/// Pixel limit assumed when the descriptor does not state one.
pub const DEFAULT_PIXEL_LIMIT: u32 = 2048 * 1152;

/// Vendor control request selecting the standard channel.
pub const REQUEST_CHANNEL: u8 = 0x12;

/// Key sent with [`REQUEST_CHANNEL`] before any register write.
pub const STD_CHANNEL_KEY: [u8; 16] = [
    0x57, 0xCD, 0xDC, 0xA7, 0x1C, 0x88, 0x5E, 0x15, 0x60, 0xFE, 0xC6, 0x97, 0x16, 0x3D, 0x47,
    0xF2,
];

/// Size of a base EDID block.
pub const EDID_LENGTH: usize = 128;

/// EDID reported when the monitor offers none (Sony SDM-HS53).
pub const DEFAULT_EDID: [u8; EDID_LENGTH] = [
    0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x4d, 0xd9, 0x50, 0x22, 0x01, 0x01, 0x01,
    0x01, 0x0b, 0x0e, 0x01, 0x03, 0x0c, 0x1e, 0x17, 0x78, 0xea, 0x8c, 0x3e, 0xa4, 0x58, 0x4d,
    0x91, 0x24, 0x15, 0x4f, 0x51, 0xa1, 0x08, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x64, 0x19, 0x00, 0x40, 0x41, 0x00,
    0x26, 0x30, 0x18, 0x88, 0x36, 0x00, 0x30, 0xe4, 0x10, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00,
    0xfd, 0x00, 0x39, 0x3f, 0x1c, 0x31, 0x09, 0x00, 0x0a, 0x20, 0x20, 0x20, 0x20, 0x20, 0x20,
    0x00, 0x00, 0x00, 0xfc, 0x00, 0x53, 0x44, 0x4d, 0x2d, 0x48, 0x53, 0x35, 0x33, 0x0a, 0x20,
    0x20, 0x20, 0x20, 0x00, 0x00, 0x00, 0xff, 0x00, 0x31, 0x32, 0x35, 0x33, 0x37, 0x30, 0x36,
    0x0a, 0x20, 0x20, 0x20, 0x20, 0x20, 0x00, 0xce,
];

/// Extract the maximum pixel area from a vendor descriptor.
///
/// Returns `None` when the descriptor is absent, malformed, or carries
/// no area record. A malformed descriptor is logged but never fatal.
pub fn parse_vendor_descriptor(desc: &[u8]) -> Option<u32> {
    let total_len = desc.first().copied().unwrap_or(0) as usize;
    if desc.len() <= 5 || total_len <= 5 {
        info!("vendor descriptor not available ({} bytes)", desc.len());
        return None;
    }

    let header_ok = total_len <= desc.len()
        && desc[1] == VENDOR_DESCRIPTOR_TYPE
        && desc[2] == 0x01
        && desc[3] == 0x00
        && desc[4] as usize == total_len - 2;
    if !header_ok {
        warn!("unrecognized vendor firmware descriptor");
        return None;
    }

    let mut limit = None;
    let mut cur = 5;
    while cur + 3 <= total_len {
        let key = u16::from_le_bytes([desc[cur], desc[cur + 1]]);
        let len = desc[cur + 2] as usize;
        cur += 3;
        if cur + len > total_len {
            warn!("vendor descriptor record {key:#06x} truncated");
            break;
        }
        if key == KEY_MAX_AREA && len >= 4 {
            let area = u32::from_le_bytes([desc[cur], desc[cur + 1], desc[cur + 2], desc[cur + 3]]);
            warn!("chip limited to {area} pixel modes");
            limit = Some(area);
        }
        cur += len;
    }
    limit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(records: &[u8]) -> Vec<u8> {
        let total = 5 + records.len();
        let mut d = vec![total as u8, 0x5F, 0x01, 0x00, (total - 2) as u8];
        d.extend_from_slice(records);
        d
    }

    #[test]
    fn parses_max_area() {
        let area = 1920u32 * 1080;
        let mut records = vec![0x00, 0x01, 0x01, 0xAA]; // unrelated key
        records.extend_from_slice(&[0x00, 0x02, 0x04]);
        records.extend_from_slice(&area.to_le_bytes());
        assert_eq!(parse_vendor_descriptor(&descriptor(&records)), Some(area));
    }

    #[test]
    fn missing_or_short_descriptor() {
        assert_eq!(parse_vendor_descriptor(&[]), None);
        assert_eq!(parse_vendor_descriptor(&[5, 0x5F, 1, 0, 3]), None);
    }

    #[test]
    fn rejects_bad_header() {
        let mut d = descriptor(&[0x00, 0x02, 0x04, 1, 2, 3, 4]);
        d[1] = 0x21;
        assert_eq!(parse_vendor_descriptor(&d), None);
    }

    #[test]
    fn truncated_record_is_ignored() {
        let d = descriptor(&[0x00, 0x02, 0x04, 1, 2]);
        assert_eq!(parse_vendor_descriptor(&d), None);
    }

    #[test]
    fn default_edid_header() {
        assert_eq!(&DEFAULT_EDID[..8], &[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
        let sum = DEFAULT_EDID.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(sum, 0, "EDID checksum");
    }
}
