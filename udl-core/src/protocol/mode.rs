//! Mode and blanking descriptors consumed by the register encoder.

use serde::{Deserialize, Serialize};

/// Bytes per pixel of the only framebuffer format the encoder drives (RGB565).
pub const BYTES_PER_PIXEL: u32 = 2;

// ── ModeDescriptor ───────────────────────────────────────────────

/// Display timing supplied by mode negotiation.
///
/// Margins and sync lengths are in pixels (horizontal) or lines
/// (vertical); `pixclock` is the pixel period in picoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeDescriptor {
    pub xres: u32,
    pub yres: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub pixclock: u32,
}

impl ModeDescriptor {
    /// VESA 1024x768 @ 60 Hz, the mode used when nothing else is known.
    pub const fn vesa_1024x768_60() -> Self {
        Self {
            xres: 1024,
            yres: 768,
            left_margin: 160,
            right_margin: 24,
            upper_margin: 29,
            lower_margin: 3,
            hsync_len: 136,
            vsync_len: 6,
            pixclock: 15384,
        }
    }

    /// VESA 800x600 @ 60 Hz.
    pub const fn vesa_800x600_60() -> Self {
        Self {
            xres: 800,
            yres: 600,
            left_margin: 88,
            right_margin: 40,
            upper_margin: 23,
            lower_margin: 1,
            hsync_len: 128,
            vsync_len: 4,
            pixclock: 25000,
        }
    }

    /// Active pixel count.
    pub fn pixels(&self) -> u64 {
        self.xres as u64 * self.yres as u64
    }

    /// Bytes per scan line in the framebuffer.
    pub fn line_length(&self) -> usize {
        (self.xres * BYTES_PER_PIXEL) as usize
    }

    /// Bytes needed for one full screen.
    pub fn screen_bytes(&self) -> usize {
        self.line_length() * self.yres as usize
    }

    /// Pixel clock in 5 kHz units, as the clock register expects it.
    ///
    /// A zero `pixclock` yields zero rather than dividing by zero.
    pub fn pixclock_5khz(&self) -> u16 {
        200_000_000u32.checked_div(self.pixclock).unwrap_or(0) as u16
    }
}

impl Default for ModeDescriptor {
    fn default() -> Self {
        Self::vesa_1024x768_60()
    }
}

// ── BlankMode ────────────────────────────────────────────────────

/// Abstract blanking (DPMS) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlankMode {
    #[default]
    Unblank,
    Normal,
    VsyncSuspend,
    HsyncSuspend,
    /// Coming back from powerdown requires a fresh mode set.
    Powerdown,
}

impl BlankMode {
    /// Value written to the blanking register.
    pub const fn register_value(self) -> u8 {
        match self {
            BlankMode::Unblank => 0x00,
            BlankMode::Normal => 0x01,
            BlankMode::VsyncSuspend => 0x03,
            BlankMode::HsyncSuspend => 0x05,
            BlankMode::Powerdown => 0x07,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixclock_conversion() {
        let mode = ModeDescriptor::vesa_1024x768_60();
        // 65 MHz -> 13000 units of 5 kHz
        assert_eq!(mode.pixclock_5khz(), 13000);

        let zero = ModeDescriptor { pixclock: 0, ..mode };
        assert_eq!(zero.pixclock_5khz(), 0);
    }

    #[test]
    fn screen_geometry() {
        let mode = ModeDescriptor::vesa_800x600_60();
        assert_eq!(mode.line_length(), 1600);
        assert_eq!(mode.screen_bytes(), 1600 * 600);
        assert_eq!(mode.pixels(), 480_000);
    }

    #[test]
    fn blank_register_values() {
        let values: Vec<u8> = [
            BlankMode::Unblank,
            BlankMode::Normal,
            BlankMode::VsyncSuspend,
            BlankMode::HsyncSuspend,
            BlankMode::Powerdown,
        ]
        .iter()
        .map(|m| m.register_value())
        .collect();
        assert_eq!(values, vec![0x00, 0x01, 0x03, 0x05, 0x07]);
    }
}
