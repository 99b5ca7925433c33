//! Pixel payload framing.
//!
//! Each bulk transfer of pixel data carries one transfer unit:
//!
//! ```text
//! page_index: u16 LE  (destination byte offset / PAGE_SIZE)
//! pixels:     [u8]    raw RGB565 bytes
//! ```

use bytes::BufMut;

/// Granularity of the destination index in the payload header.
pub const PAGE_SIZE: usize = 4096;

/// Bytes of framing in front of every pixel payload.
pub const PIXEL_HEADER_LEN: usize = 2;

/// Page index addressed by a framebuffer byte offset.
pub fn page_index(byte_offset: usize) -> u16 {
    (byte_offset / PAGE_SIZE) as u16
}

/// Append the header and pixel bytes for one transfer unit.
pub fn encode_pixels<'a, B: BufMut>(buf: &'a mut B, byte_offset: usize, pixels: &[u8]) -> &'a mut B {
    buf.put_u16_le(page_index(byte_offset));
    buf.put_slice(pixels);
    buf
}
