//! Register-write encoder.
//!
//! Every command is a `(register, value)` byte pair appended to a
//! [`BufMut`]. Each function returns the buffer it was given so calls
//! chain the way the device consumes them:
//!
//! ```
//! # use udl_core::protocol::registers::*;
//! # use udl_core::protocol::BlankMode;
//! let mut buf = Vec::new();
//! unlock_registers(encode_blanking(lock_registers(&mut buf), BlankMode::Normal));
//! assert_eq!(buf, [0xFF, 0x00, 0x1F, 0x01, 0xFF, 0xFF]);
//! ```
//!
//! Encoders never fail; callers guarantee the destination has room.

use bytes::BufMut;

use crate::protocol::mode::{BlankMode, ModeDescriptor};

// ── Register map ─────────────────────────────────────────────────

pub const REG_COLOR_DEPTH: u8 = 0x00;
pub const REG_XDISPLAY_START: u8 = 0x01;
pub const REG_XDISPLAY_END: u8 = 0x03;
pub const REG_YDISPLAY_START: u8 = 0x05;
pub const REG_YDISPLAY_END: u8 = 0x07;
pub const REG_XEND_COUNT: u8 = 0x09;
pub const REG_HSYNC_START: u8 = 0x0B;
pub const REG_HSYNC_END: u8 = 0x0D;
pub const REG_HPIXELS: u8 = 0x0F;
pub const REG_YEND_COUNT: u8 = 0x11;
pub const REG_VSYNC_START: u8 = 0x13;
pub const REG_VSYNC_END: u8 = 0x15;
pub const REG_VPIXELS: u8 = 0x17;
pub const REG_PIXEL_CLOCK: u8 = 0x1B;
pub const REG_BLANKING: u8 = 0x1F;
pub const REG_BASE16: u8 = 0x20;
pub const REG_BASE8: u8 = 0x26;
pub const REG_SYNC: u8 = 0xFF;

/// Color-depth selector for the 16 bpp segment.
pub const COLOR_DEPTH_16BPP: u8 = 0x00;

// ── Primitives ───────────────────────────────────────────────────

/// Append a single `(register, value)` pair.
pub fn write_register<B: BufMut>(buf: &mut B, reg: u8, val: u8) -> &mut B {
    buf.put_u8(reg);
    buf.put_u8(val);
    buf
}

/// Open an atomic register batch.
pub fn lock_registers<B: BufMut>(buf: &mut B) -> &mut B {
    write_register(buf, REG_SYNC, 0x00)
}

/// Close an atomic register batch; the device applies it now.
pub fn unlock_registers<B: BufMut>(buf: &mut B) -> &mut B {
    write_register(buf, REG_SYNC, 0xFF)
}

pub fn set_color_depth<B: BufMut>(buf: &mut B, selection: u8) -> &mut B {
    write_register(buf, REG_COLOR_DEPTH, selection)
}

fn set_base_address<B: BufMut>(buf: &mut B, reg: u8, base: u32) -> &mut B {
    write_register(buf, reg, (base >> 16) as u8);
    write_register(buf, reg + 1, (base >> 8) as u8);
    write_register(buf, reg + 2, base as u8)
}

/// Base of the 16 bpp segment, high byte first.
pub fn set_base_address16<B: BufMut>(buf: &mut B, base: u32) -> &mut B {
    set_base_address(buf, REG_BASE16, base)
}

/// Base of the 8 bpp low-color segment used by deeper modes.
pub fn set_base_address8<B: BufMut>(buf: &mut B, base: u32) -> &mut B {
    set_base_address(buf, REG_BASE8, base)
}

/// 16-bit value across `reg` (high byte) and `reg + 1` (low byte).
pub fn set_register16<B: BufMut>(buf: &mut B, reg: u8, value: u16) -> &mut B {
    write_register(buf, reg, (value >> 8) as u8);
    write_register(buf, reg + 1, value as u8)
}

/// 16-bit value across `reg` (low byte) and `reg + 1` (high byte).
///
/// Only some registers take this order; it is fixed per register.
pub fn set_register16_be<B: BufMut>(buf: &mut B, reg: u8, value: u16) -> &mut B {
    write_register(buf, reg, value as u8);
    write_register(buf, reg + 1, (value >> 8) as u8)
}

// ── LFSR ─────────────────────────────────────────────────────────

/// Value the timing counters start from.
pub const LFSR16_SEED: u16 = 0xFFFF;

/// Number of distinct states the counter walks through.
pub const LFSR16_PERIOD: usize = 65535;

/// One step of the timing-counter shift register (taps 15, 4, 2, 1).
#[inline]
pub const fn lfsr16_step(v: u16) -> u16 {
    let feedback = ((v >> 15) ^ (v >> 4) ^ (v >> 2) ^ (v >> 1)) & 1;
    (v << 1) | feedback
}

/// Counter value the hardware reaches after `n` clocks.
pub fn lfsr16(n: u16) -> u16 {
    let mut v = LFSR16_SEED;
    for _ in 0..n {
        v = lfsr16_step(v);
    }
    v
}

/// Natural count that produces `encoded`, by linear search.
pub fn lfsr16_inverse(encoded: u16) -> Option<u16> {
    Lfsr16::new()
        .take(LFSR16_PERIOD)
        .position(|v| v == encoded)
        .map(|n| n as u16)
}

/// Iterator over successive counter states, starting at the seed.
#[derive(Debug, Clone)]
pub struct Lfsr16 {
    state: u16,
}

impl Lfsr16 {
    pub const fn new() -> Self {
        Self { state: LFSR16_SEED }
    }
}

impl Default for Lfsr16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Lfsr16 {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        let current = self.state;
        self.state = lfsr16_step(current);
        Some(current)
    }
}

/// Write `lfsr16(value)` with [`set_register16`].
pub fn set_register_lfsr16<B: BufMut>(buf: &mut B, reg: u8, value: u16) -> &mut B {
    set_register16(buf, reg, lfsr16(value))
}

// ── Mode set ─────────────────────────────────────────────────────

/// Timing registers for `mode`, in the order the device latches them.
///
/// Arithmetic wraps at 16 bits like the device's comparators do.
pub fn encode_mode_set<'a, B: BufMut>(buf: &'a mut B, mode: &ModeDescriptor) -> &'a mut B {
    let xds = (mode.left_margin + mode.hsync_len) as u16;
    set_register_lfsr16(buf, REG_XDISPLAY_START, xds);
    let xde = xds.wrapping_add(mode.xres as u16);
    set_register_lfsr16(buf, REG_XDISPLAY_END, xde);

    let yds = (mode.upper_margin + mode.vsync_len) as u16;
    set_register_lfsr16(buf, REG_YDISPLAY_START, yds);
    let yde = yds.wrapping_add(mode.yres as u16);
    set_register_lfsr16(buf, REG_YDISPLAY_END, yde);

    // active + blanking - 1
    let xec = xde.wrapping_add(mode.right_margin as u16).wrapping_sub(1);
    set_register_lfsr16(buf, REG_XEND_COUNT, xec);

    // hsync start is fixed by the hardware
    set_register_lfsr16(buf, REG_HSYNC_START, 1);
    set_register_lfsr16(buf, REG_HSYNC_END, (mode.hsync_len + 1) as u16);
    set_register16(buf, REG_HPIXELS, mode.xres as u16);

    let yec = (mode.yres + mode.upper_margin + mode.lower_margin + mode.vsync_len) as u16;
    set_register_lfsr16(buf, REG_YEND_COUNT, yec);
    set_register_lfsr16(buf, REG_VSYNC_START, 0);
    set_register_lfsr16(buf, REG_VSYNC_END, mode.vsync_len as u16);
    set_register16(buf, REG_VPIXELS, mode.yres as u16);

    set_register16_be(buf, REG_PIXEL_CLOCK, mode.pixclock_5khz())
}

/// Blanking register for the abstract state.
pub fn encode_blanking<B: BufMut>(buf: &mut B, mode: BlankMode) -> &mut B {
    write_register(buf, REG_BLANKING, mode.register_value())
}

/// Complete mode-set transfer.
///
/// The 8 bpp segment is placed right after the 16 bpp framebuffer,
/// whose length is `base8`.
pub fn encode_video_mode<'a, B: BufMut>(
    buf: &'a mut B,
    mode: &ModeDescriptor,
    base8: u32,
) -> &'a mut B {
    lock_registers(buf);
    set_color_depth(buf, COLOR_DEPTH_16BPP);
    set_base_address16(buf, 0);
    set_base_address8(buf, base8);
    encode_mode_set(buf, mode);
    encode_blanking(buf, BlankMode::Unblank);
    unlock_registers(buf)
}

/// One-pixel copy command; blanking changes only take effect after a
/// render operation.
pub fn dummy_render<B: BufMut>(buf: &mut B) -> &mut B {
    buf.put_slice(&[0xAF, 0x6A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
    buf
}

/// Length of the `(register, value)` stream [`encode_video_mode`] emits.
pub const VIDEO_MODE_LEN: usize = 2 * (1 + 1 + 3 + 3 + 26 + 1 + 1);
