//! Host-side pixel memory.
//!
//! The screen buffer is what clients write; the optional shadow holds
//! what the device was last sent. Both live under the device's
//! framebuffer lock together with the current mode and blank state.

use tracing::{debug, info};

use crate::error::{Result, UdlError};
use crate::protocol::{BYTES_PER_PIXEL, BlankMode, ModeDescriptor, PAGE_SIZE};
use crate::render::ScreenGeometry;

pub struct Framebuffer {
    screen: Vec<u8>,
    shadow: Option<Vec<u8>>,
    want_shadow: bool,
    mode: ModeDescriptor,
    blank: BlankMode,
}

fn zeroed(len: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

impl Framebuffer {
    pub fn new(want_shadow: bool) -> Self {
        Self {
            screen: Vec::new(),
            shadow: None,
            want_shadow,
            mode: ModeDescriptor::default(),
            blank: BlankMode::Unblank,
        }
    }

    /// Size the buffers for `mode`.
    ///
    /// Only ever grows, to a page multiple, keeping old contents. A
    /// shadow that cannot be allocated is dropped rather than failing.
    pub fn realloc(&mut self, mode: &ModeDescriptor) -> Result<()> {
        let needed = mode.screen_bytes().next_multiple_of(PAGE_SIZE);
        if needed > self.screen.len() {
            let mut screen = zeroed(needed).ok_or(UdlError::AllocationFailure("framebuffer"))?;
            screen[..self.screen.len()].copy_from_slice(&self.screen);
            self.screen = screen;
            debug!("framebuffer grown to {needed} bytes");

            if self.want_shadow {
                self.shadow = zeroed(needed);
                if self.shadow.is_none() {
                    info!("no shadow buffer allocated, every line will be sent");
                }
            }
        }
        self.mode = *mode;
        Ok(())
    }

    /// Free both buffers.
    pub fn release(&mut self) {
        self.screen = Vec::new();
        self.shadow = None;
    }

    pub fn len(&self) -> usize {
        self.screen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.screen.is_empty()
    }

    pub fn has_shadow(&self) -> bool {
        self.shadow.is_some()
    }

    pub fn mode(&self) -> &ModeDescriptor {
        &self.mode
    }

    pub fn blank_mode(&self) -> BlankMode {
        self.blank
    }

    pub fn set_blank_mode(&mut self, blank: BlankMode) {
        self.blank = blank;
    }

    pub fn geometry(&self) -> ScreenGeometry {
        ScreenGeometry {
            xres: self.mode.xres,
            yres: self.mode.yres,
            line_length: self.mode.line_length(),
        }
    }

    pub fn screen(&self) -> &[u8] {
        &self.screen
    }

    /// Screen for reading plus the shadow for updating, borrowed together.
    pub fn parts(&mut self) -> (&[u8], Option<&mut [u8]>) {
        (&self.screen, self.shadow.as_deref_mut())
    }

    /// Copy `bytes` in at `offset`, truncated at the end of the buffer.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        if offset >= self.screen.len() {
            return Err(UdlError::OffsetOutOfRange {
                offset,
                len: self.screen.len(),
            });
        }
        let n = bytes.len().min(self.screen.len() - offset);
        self.screen[offset..offset + n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    /// Paint the visible screen with one RGB565 color.
    pub fn fill(&mut self, pixel: u16) {
        let visible = (self.mode.screen_bytes()).min(self.screen.len());
        let px = pixel.to_le_bytes();
        for chunk in self.screen[..visible].chunks_exact_mut(BYTES_PER_PIXEL as usize) {
            chunk.copy_from_slice(&px);
        }
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("len", &self.screen.len())
            .field("shadow", &self.shadow.is_some())
            .field("mode", &(self.mode.xres, self.mode.yres))
            .field("blank", &self.blank)
            .finish()
    }
}
