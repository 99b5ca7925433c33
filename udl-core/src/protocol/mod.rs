//! Wire protocol of the display controller.
//!
//! Pure byte encoders, no I/O.
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `mode`      | Timing and blanking descriptors                      |
//! | `registers` | Register writes, LFSR counters, mode-set sequences   |
//! | `pixels`    | Page-indexed pixel payload framing                   |
//! | `vendor`    | Vendor descriptor parsing, channel key, default EDID |

pub mod mode;
pub mod pixels;
pub mod registers;
pub mod vendor;

// ── Re-exports ───────────────────────────────────────────────────

pub use mode::{BYTES_PER_PIXEL, BlankMode, ModeDescriptor};
pub use pixels::{PAGE_SIZE, PIXEL_HEADER_LEN, encode_pixels, page_index};
pub use registers::{Lfsr16, lfsr16, lfsr16_inverse};
pub use vendor::{DEFAULT_EDID, DEFAULT_PIXEL_LIMIT, parse_vendor_descriptor};
