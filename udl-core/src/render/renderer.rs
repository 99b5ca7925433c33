//! Damage-to-wire renderer.
//!
//! Turns a dirty rectangle into one pixel transfer per scan line (split
//! further if a line is longer than a slot). Each line goes through the
//! pool's blocking `acquire`, so a slow device throttles rendering
//! instead of building a queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Result, UdlError};
use crate::pool::TransferPool;
use crate::protocol::{BYTES_PER_PIXEL, PAGE_SIZE, PIXEL_HEADER_LEN, encode_pixels};
use crate::render::damage::{DirtyRegion, WORD_SIZE};
use crate::render::metrics::Metrics;

/// Resolution and stride of the buffer being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub xres: u32,
    pub yres: u32,
    pub line_length: usize,
}

/// Byte counts of one render call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub bytes_rendered: u64,
    pub bytes_identical: u64,
    pub bytes_sent: u64,
    pub transfers: u64,
    /// The update stopped early (slot timeout, closed pool or disconnect).
    pub truncated: bool,
}

enum Flow {
    Continue,
    Stop,
}

pub struct Renderer {
    pool: TransferPool,
    metrics: Arc<Metrics>,
    acquire_timeout: Duration,
    word_size: u32,
}

impl Renderer {
    pub fn new(pool: TransferPool, metrics: Arc<Metrics>, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            metrics,
            acquire_timeout,
            word_size: WORD_SIZE,
        }
    }

    /// Override the alignment word. Must be a power of two.
    pub fn with_word_size(mut self, word_size: u32) -> Self {
        self.word_size = word_size;
        self
    }

    pub fn pool(&self) -> &TransferPool {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Send `region` of `source` to the device.
    ///
    /// Rejects regions outside the screen with [`UdlError::OutOfBounds`].
    /// An inactive device is not an error: the call returns with nothing
    /// sent. With a `shadow`, lines equal to it are skipped and the
    /// shadow is updated with whatever was sent. Lines whose last
    /// transfer failed are sent even when the shadow matches.
    pub async fn render(
        &self,
        region: DirtyRegion,
        geometry: ScreenGeometry,
        source: &[u8],
        mut shadow: Option<&mut [u8]>,
    ) -> Result<RenderStats> {
        if !region.fits(geometry.xres, geometry.yres) {
            return Err(UdlError::OutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                xres: geometry.xres,
                yres: geometry.yres,
            });
        }

        let aligned = region.align(self.word_size);
        let mut stats = RenderStats::default();
        if !self.pool.link().is_active() || aligned.is_empty() {
            return Ok(stats);
        }

        let started = Instant::now();
        let width_bytes = aligned.width as usize * BYTES_PER_PIXEL as usize;

        for y in aligned.y..aligned.y + aligned.height {
            if !self.pool.link().is_active() {
                stats.truncated = true;
                break;
            }

            let start = geometry.line_length * y as usize + aligned.x as usize * BYTES_PER_PIXEL as usize;
            if start >= source.len() {
                break;
            }
            // the aligned width may run past xres; never past the buffer
            let end = (start + width_bytes).min(source.len());

            let flow = self
                .send_span(start, end, source, shadow.as_deref_mut(), &mut stats)
                .await?;
            if let Flow::Stop = flow {
                stats.truncated = true;
                break;
            }
        }

        self.account(&stats, started.elapsed());
        trace!(?region, ?aligned, ?stats, "rendered damage");
        Ok(stats)
    }

    /// Send whole pages of `source`, one transfer unit per page.
    /// Used by the deferred flush, which tracks damage per page.
    pub async fn render_pages(
        &self,
        pages: &[usize],
        source: &[u8],
        mut shadow: Option<&mut [u8]>,
    ) -> Result<RenderStats> {
        let mut stats = RenderStats::default();
        if !self.pool.link().is_active() {
            return Ok(stats);
        }

        let started = Instant::now();
        for &page in pages {
            if !self.pool.link().is_active() {
                stats.truncated = true;
                break;
            }
            let start = page * PAGE_SIZE;
            if start >= source.len() {
                continue;
            }
            let end = (start + PAGE_SIZE).min(source.len());
            let flow = self
                .send_span(start, end, source, shadow.as_deref_mut(), &mut stats)
                .await?;
            if let Flow::Stop = flow {
                stats.truncated = true;
                break;
            }
        }

        self.account(&stats, started.elapsed());
        debug!("flushed {} dirty pages, {} bytes sent", pages.len(), stats.bytes_sent);
        Ok(stats)
    }

    /// Transfer `source[start..end]`, split to fit the slot size.
    async fn send_span(
        &self,
        start: usize,
        end: usize,
        source: &[u8],
        shadow: Option<&mut [u8]>,
        stats: &mut RenderStats,
    ) -> Result<Flow> {
        let span = end - start;
        stats.bytes_rendered += span as u64;

        let mut shadow = shadow.filter(|s| s.len() >= end);
        if let Some(shadow) = shadow.as_deref() {
            // a failed transfer leaves the shadow ahead of the device
            if shadow[start..end] == source[start..end] && !self.pool.has_failed_bytes(&(start..end)) {
                stats.bytes_identical += span as u64;
                return Ok(Flow::Continue);
            }
        }

        let max_payload = self.pool.slot_size().saturating_sub(PIXEL_HEADER_LEN);
        if max_payload == 0 {
            return Err(UdlError::TransferTooLarge {
                len: span + PIXEL_HEADER_LEN,
                max: self.pool.slot_size(),
            });
        }

        let mut offset = start;
        while offset < end {
            let chunk_end = (offset + max_payload).min(end);

            let mut slot = match self.pool.acquire(self.acquire_timeout).await {
                Ok(slot) => slot,
                Err(UdlError::ResourceExhausted(_) | UdlError::PoolClosed) => return Ok(Flow::Stop),
                Err(e) => return Err(e),
            };
            if !self.pool.link().is_active() {
                self.pool.recycle(slot);
                return Ok(Flow::Stop);
            }

            encode_pixels(slot.buffer_mut(), offset, &source[offset..chunk_end]);
            slot.set_origin(offset..chunk_end);
            let len = slot.buffer_mut().len();
            self.pool.submit(slot, len)?;

            stats.bytes_sent += len as u64;
            stats.transfers += 1;
            if let Some(shadow) = shadow.as_deref_mut() {
                shadow[offset..chunk_end].copy_from_slice(&source[offset..chunk_end]);
            }
            offset = chunk_end;
        }
        Ok(Flow::Continue)
    }

    fn account(&self, stats: &RenderStats, elapsed: Duration) {
        self.metrics.add_rendered(stats.bytes_rendered);
        self.metrics.add_identical(stats.bytes_identical);
        self.metrics.add_sent(stats.bytes_sent);
        self.metrics.add_cpu(elapsed);
    }
}
