//! Device lifecycle.
//!
//! One [`DeviceContext`] exists per attached adapter, shared through
//! `Arc` by every path that can reach it:
//!
//! | Holder               | Acquired            | Released                          |
//! |----------------------|---------------------|-----------------------------------|
//! | [`UsbDisplay`]       | `attach`            | `disconnect` / drop               |
//! | [`ClientHandle`]     | `open`              | handle drop                       |
//! | teardown task        | last close / unplug | after buffers and pool are freed  |
//! | deferred flush task  | `Weak` only         | upgraded per flush                |
//!
//! Disconnect clears `active` first so no new transfer reaches the bus,
//! then defers the teardown to whichever runs last: the disconnect
//! itself (no clients open) or the final client close. Teardown frees
//! the pixel buffers and drains the pool exactly once; the context is
//! freed when the last `Arc` goes.

mod config;
mod deferred;
mod framebuffer;

pub use config::DeviceConfig;
pub use deferred::DirtyPages;
pub use framebuffer::Framebuffer;

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::device::deferred::DeferredFlush;
use crate::error::{Result, UdlError};
use crate::pool::{ReleaseMode, TransferPool};
use crate::protocol::registers::{
    dummy_render, encode_blanking, encode_video_mode, lock_registers, unlock_registers,
};
use crate::protocol::vendor::{EDID_LENGTH, REQUEST_CHANNEL, STD_CHANNEL_KEY};
use crate::protocol::{BlankMode, DEFAULT_EDID, DEFAULT_PIXEL_LIMIT, ModeDescriptor, parse_vendor_descriptor};
use crate::render::{DirtyRegion, Metrics, MetricsSnapshot, RenderStats, Renderer};
use crate::transport::{BulkTransport, UsbLink};

/// RGB565 color painted on a fresh mode while nobody has the device open.
pub const GREEN_SCREEN: u16 = 0x37E6;

/// Who is opening the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// The text console.
    Console,
    /// A userspace client.
    User,
}

/// Send the vendor key that puts the chip on its standard channel.
/// Must precede any register write.
pub async fn select_std_channel(transport: &dyn BulkTransport) -> Result<()> {
    transport
        .control_out(REQUEST_CHANNEL, 0, 0, &STD_CHANNEL_KEY)
        .await
}

// ── DeviceContext ────────────────────────────────────────────────

struct Clients {
    open: usize,
    flush: Option<DeferredFlush>,
}

/// Shared state of one attached adapter.
pub struct DeviceContext {
    link: Arc<UsbLink>,
    renderer: Renderer,
    config: DeviceConfig,
    pixel_limit: u32,
    edid: Vec<u8>,
    runtime: Handle,
    /// Serializes mode changes, reallocation and every render.
    fb: tokio::sync::Mutex<Framebuffer>,
    clients: Mutex<Clients>,
    dirty: Mutex<DirtyPages>,
    virtualized: AtomicBool,
    defio_disabled: AtomicBool,
    torn_down: AtomicBool,
}

impl DeviceContext {
    fn clients(&self) -> MutexGuard<'_, Clients> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dirty(&self) -> MutexGuard<'_, DirtyPages> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.link.is_active()
    }

    /// The transport is gone but clients may still hold the context.
    pub fn is_virtualized(&self) -> bool {
        self.virtualized.load(Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn open_clients(&self) -> usize {
        self.clients().open
    }

    pub fn has_deferred_flush(&self) -> bool {
        self.clients().flush.is_some()
    }

    pub fn pixel_limit(&self) -> u32 {
        self.pixel_limit
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Monitor EDID, or the built-in default when the hardware had none.
    pub fn edid(&self) -> &[u8] {
        &self.edid
    }

    pub fn pool(&self) -> &TransferPool {
        self.renderer.pool()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.renderer.metrics().snapshot()
    }

    pub fn reset_metrics(&self) {
        self.renderer.metrics().reset();
    }

    pub fn unexpected_completions(&self) -> u64 {
        self.pool().unexpected_completions()
    }

    pub async fn mode(&self) -> ModeDescriptor {
        *self.fb.lock().await.mode()
    }

    pub async fn blank_mode(&self) -> BlankMode {
        self.fb.lock().await.blank_mode()
    }

    /// Wait until every submitted transfer has completed.
    pub async fn quiesce(&self, timeout: Duration) -> bool {
        let pool = self.pool();
        tokio::time::timeout(timeout, async {
            while pool.available() < pool.capacity() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .is_ok()
    }

    // ── Mode ─────────────────────────────────────────────────────

    /// Reject modes the chip cannot drive.
    pub fn check_mode(&self, mode: &ModeDescriptor) -> Result<()> {
        if mode.xres == 0 || mode.yres == 0 || mode.pixels() > self.pixel_limit as u64 {
            return Err(UdlError::UnsupportedMode {
                xres: mode.xres,
                yres: mode.yres,
                limit: self.pixel_limit as u64,
            });
        }
        Ok(())
    }

    /// Validate, size the framebuffer for, and program `mode`.
    ///
    /// With no client open the screen is painted [`GREEN_SCREEN`] and
    /// sent in full so the user sees the adapter is alive.
    pub async fn set_mode(&self, mode: ModeDescriptor) -> Result<()> {
        self.check_mode(&mode)?;

        let mut fb = self.fb.lock().await;
        fb.realloc(&mode)?;
        self.set_video_mode(&fb).await?;
        fb.set_blank_mode(BlankMode::Unblank);
        info!("set mode {}x{} ({} byte framebuffer)", mode.xres, mode.yres, fb.len());

        if self.open_clients() == 0 {
            fb.fill(GREEN_SCREEN);
            self.render_locked(&mut fb, DirtyRegion::full(mode.xres, mode.yres))
                .await?;
        }
        Ok(())
    }

    async fn set_video_mode(&self, fb: &Framebuffer) -> Result<()> {
        let mode = *fb.mode();
        let base8 = fb.len() as u32;
        self.send_command(move |buf| {
            encode_video_mode(buf, &mode, base8);
        })
        .await
    }

    /// Encode into one slot and submit. No-op while inactive.
    ///
    /// A slot timeout or a closed pool drops the command; the lost-pixel
    /// flag is already raised by then.
    async fn send_command<F>(&self, encode: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) + Send,
    {
        if !self.is_active() {
            return Ok(());
        }
        let pool = self.pool();
        let mut slot = match pool.acquire(self.config.acquire_timeout()).await {
            Ok(slot) => slot,
            Err(UdlError::ResourceExhausted(_) | UdlError::PoolClosed) => {
                warn!("no transfer slot, command dropped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        encode(slot.buffer_mut());
        let len = slot.buffer_mut().len();
        pool.submit(slot, len)
    }

    /// Change the blanking state.
    ///
    /// Leaving powerdown reprograms the mode before the blanking write.
    pub async fn blank(&self, mode: BlankMode) -> Result<()> {
        let mut fb = self.fb.lock().await;
        let previous = fb.blank_mode();

        if previous == BlankMode::Powerdown && mode != BlankMode::Powerdown {
            self.set_video_mode(&fb).await?;
        }
        self.send_command(move |buf| {
            unlock_registers(encode_blanking(lock_registers(buf), mode));
            dummy_render(buf);
        })
        .await?;

        fb.set_blank_mode(mode);
        info!("blank {previous:?} -> {mode:?}");
        Ok(())
    }

    // ── Damage ───────────────────────────────────────────────────

    async fn render_locked(&self, fb: &mut Framebuffer, region: DirtyRegion) -> Result<RenderStats> {
        let geometry = fb.geometry();
        let (screen, shadow) = fb.parts();
        self.renderer.render(region, geometry, screen, shadow).await
    }

    /// Copy `bytes` into the framebuffer at `offset` and send the lines
    /// it touched, starting one line above. Returns the bytes written.
    pub async fn write(&self, offset: usize, bytes: &[u8]) -> Result<usize> {
        let mut fb = self.fb.lock().await;
        let written = fb.write_at(offset, bytes)?;
        if written == 0 {
            return Ok(0);
        }

        let geometry = fb.geometry();
        let line = geometry.line_length.max(1);
        let yres = geometry.yres as usize;
        if offset / line >= yres {
            // page padding past the visible screen
            return Ok(written);
        }
        let first = (offset / line).saturating_sub(1);
        let last = ((offset + written - 1) / line).min(yres - 1);

        let region = DirtyRegion::new(0, first as u32, geometry.xres, (last - first + 1) as u32);
        self.render_locked(&mut fb, region).await?;
        Ok(written)
    }

    /// Send a client-reported rectangle.
    ///
    /// The origin is clamped to the screen; the size is not, so a
    /// rectangle hanging off the edge is rejected. Once a client reports
    /// damage itself, deferred flushing stops for the rest of the session.
    pub async fn report_damage(&self, region: DirtyRegion) -> Result<RenderStats> {
        self.disable_deferred_io();

        let mut fb = self.fb.lock().await;
        let geometry = fb.geometry();
        let region = DirtyRegion {
            x: region.x.min(geometry.xres),
            y: region.y.min(geometry.yres),
            ..region
        };
        self.render_locked(&mut fb, region).await
    }

    fn disable_deferred_io(&self) {
        if self.defio_disabled.swap(true, Ordering::AcqRel) {
            return;
        }
        let flush = self.clients().flush.take();
        if flush.is_some() {
            debug!("client reports damage, deferred flush disabled");
        }
    }

    /// Record a mapped write of `len` bytes at `offset`.
    ///
    /// With a deferred flush installed the pages are sent on the next
    /// tick; otherwise they are sent now.
    pub async fn mark_dirty(&self, offset: usize, len: usize) -> Result<()> {
        let deferred = self.clients().flush.is_some();
        if deferred {
            self.dirty().mark(offset, len);
            return Ok(());
        }

        let mut pages = DirtyPages::default();
        pages.mark(offset, len);
        let pages = pages.take();

        let mut fb = self.fb.lock().await;
        let (screen, shadow) = fb.parts();
        self.renderer.render_pages(&pages, screen, shadow).await?;
        Ok(())
    }

    pub(crate) async fn flush_dirty(&self) -> Result<RenderStats> {
        let pages = self.dirty().take();
        if pages.is_empty() {
            return Ok(RenderStats::default());
        }
        let mut fb = self.fb.lock().await;
        let (screen, shadow) = fb.parts();
        self.renderer.render_pages(&pages, screen, shadow).await
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Register a client. Fails once the transport is gone.
    pub fn open(self: &Arc<Self>, kind: ClientKind) -> Result<ClientHandle> {
        if kind == ClientKind::Console && !self.config.console {
            return Err(UdlError::ConsoleDisabled);
        }

        let mut clients = self.clients();
        if self.is_virtualized() {
            return Err(UdlError::TransportGone);
        }
        clients.open += 1;

        if kind == ClientKind::User
            && self.config.deferred_io
            && !self.defio_disabled.load(Ordering::Acquire)
            && clients.flush.is_none()
        {
            clients.flush = Some(DeferredFlush::install(self, self.config.defio_delay()));
        }
        info!("{kind:?} client opened, {} open", clients.open);

        Ok(ClientHandle {
            ctx: Arc::clone(self),
            kind,
        })
    }

    fn close(self: &Arc<Self>, kind: ClientKind) {
        let (remaining, flush) = {
            let mut clients = self.clients();
            clients.open = clients.open.saturating_sub(1);
            let flush = if clients.open == 0 { clients.flush.take() } else { None };
            (clients.open, flush)
        };
        drop(flush);
        info!("{kind:?} client closed, {remaining} open");

        if remaining == 0 && self.is_virtualized() {
            self.schedule_teardown(self.config.teardown_delay());
        }
    }

    fn handle_disconnect(self: &Arc<Self>) {
        if self.virtualized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.link.detach();

        let open = self.open_clients();
        info!("USB disconnect, {open} clients still open");
        if open == 0 {
            self.schedule_teardown(Duration::ZERO);
        }
    }

    fn schedule_teardown(self: &Arc<Self>, delay: Duration) {
        if self.is_torn_down() {
            return;
        }
        let ctx = Arc::clone(self);
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            ctx.teardown().await;
        });
        debug!("teardown scheduled in {delay:?}");
    }

    /// Free the pixel buffers and drain the pool. Runs once; later
    /// calls return `false`.
    pub(crate) async fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        let flush = self.clients().flush.take();
        drop(flush);

        self.fb.lock().await.release();
        let freed = self.pool().drain(self.config.drain_timeout()).await;
        info!("device torn down, {freed} transfer slots freed");
        true
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        info!("device context freed");
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("link", &self.link)
            .field("pixel_limit", &self.pixel_limit)
            .field("virtualized", &self.is_virtualized())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

// ── ClientHandle ─────────────────────────────────────────────────

/// An open client. Dropping it closes the client.
pub struct ClientHandle {
    ctx: Arc<DeviceContext>,
    kind: ClientKind,
}

impl ClientHandle {
    pub fn kind(&self) -> ClientKind {
        self.kind
    }
}

impl Deref for ClientHandle {
    type Target = DeviceContext;

    fn deref(&self) -> &DeviceContext {
        &self.ctx
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.ctx.close(self.kind);
    }
}

// ── UsbDisplay ───────────────────────────────────────────────────

/// The attachment of one adapter. Dropping it (or calling
/// [`disconnect`](Self::disconnect)) is the unplug event.
#[derive(Debug)]
pub struct UsbDisplay {
    ctx: Arc<DeviceContext>,
}

impl UsbDisplay {
    /// Bring up the adapter behind `transport` and program `mode`.
    ///
    /// Fails if no transfer slot could be allocated, the channel
    /// request is rejected, or `mode` exceeds the pixel limit.
    pub async fn attach(
        transport: Arc<dyn BulkTransport>,
        config: DeviceConfig,
        mode: ModeDescriptor,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| UdlError::NoRuntime)?;

        let vendor_limit = match transport.vendor_descriptor().await {
            Some(desc) => parse_vendor_descriptor(&desc),
            None => None,
        };
        let pixel_limit = match config.pixel_limit {
            Some(limit) => {
                warn!("chip pixel limit overridden to {limit}");
                limit
            }
            None => vendor_limit.unwrap_or(DEFAULT_PIXEL_LIMIT),
        };

        let edid = match transport.read_edid().await {
            Some(edid) if edid.len() >= EDID_LENGTH => edid,
            _ => {
                info!("no usable EDID from monitor, using default");
                DEFAULT_EDID.to_vec()
            }
        };

        let link = Arc::new(UsbLink::new(Arc::clone(&transport), config.bulk_out_endpoint));
        let metrics = Arc::new(Metrics::new());
        let release = if config.deferred_io {
            ReleaseMode::Deferred
        } else {
            ReleaseMode::Inline
        };
        let mut pool = TransferPool::new(Arc::clone(&link), Arc::clone(&metrics), release)?;
        if pool.initialize(config.writes_in_flight, config.max_transfer) == 0 {
            return Err(UdlError::AllocationFailure("transfer slots"));
        }

        link.activate();
        select_std_channel(transport.as_ref()).await?;

        let ctx = Arc::new(DeviceContext {
            renderer: Renderer::new(pool, metrics, config.acquire_timeout()),
            fb: tokio::sync::Mutex::new(Framebuffer::new(config.shadow)),
            link,
            pixel_limit,
            edid,
            runtime,
            clients: Mutex::new(Clients { open: 0, flush: None }),
            dirty: Mutex::new(DirtyPages::default()),
            virtualized: AtomicBool::new(false),
            defio_disabled: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            config,
        });
        ctx.set_mode(mode).await?;

        info!(
            "display attached: pixel limit {pixel_limit}, {} slots of {} bytes",
            ctx.pool().capacity(),
            ctx.pool().slot_size()
        );
        Ok(Self { ctx })
    }

    pub fn open(&self, kind: ClientKind) -> Result<ClientHandle> {
        self.ctx.open(kind)
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    pub fn downgrade(&self) -> Weak<DeviceContext> {
        Arc::downgrade(&self.ctx)
    }

    /// Unplug. Open clients keep the context until they close.
    pub fn disconnect(self) {}
}

impl Deref for UsbDisplay {
    type Target = DeviceContext;

    fn deref(&self) -> &DeviceContext {
        &self.ctx
    }
}

impl Drop for UsbDisplay {
    fn drop(&mut self) {
        self.ctx.handle_disconnect();
    }
}
