//! Bounded pool of reusable transfer buffers.
//!
//! The pool is the single point of backpressure in the pipeline:
//!
//! ```text
//! acquire(timeout) ──► TransferSlot ──► submit(slot, len) ──► bus
//!        ▲                                                      │
//!        └──── admission permit ◄── complete(slot, status) ◄────┘
//! ```
//!
//! A [`Semaphore`] holds one permit per idle slot. `acquire` is the
//! only suspension point; `submit` spawns the bus transfer and returns
//! at once. Completion puts the slot back on the idle list under a
//! short lock, then returns the permit either inline or through a
//! [`WorkQueue`] when completions may fire under the flush path's lock.

mod slot;

pub use slot::TransferSlot;

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{Result, UdlError};
use crate::render::metrics::Metrics;
use crate::task::WorkQueue;
use crate::transport::{TransferStatus, UsbLink};

/// How a completion hands the admission permit back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseMode {
    /// Release directly from the completion.
    #[default]
    Inline,
    /// Route the release through a dedicated worker task.
    Deferred,
}

// ── Shared state ─────────────────────────────────────────────────

struct PoolState {
    idle: Mutex<VecDeque<TransferSlot>>,
    available: AtomicUsize,
    capacity: AtomicUsize,
    limit: Arc<Semaphore>,
    unexpected: AtomicU64,
    /// Framebuffer bytes whose transfer failed and were not resent since.
    failed: Mutex<Vec<Range<usize>>>,
    releaser: Option<WorkQueue>,
    metrics: Arc<Metrics>,
}

impl PoolState {
    fn push_idle(&self, slot: TransferSlot) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.push_back(slot);
        let available = self.available.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(available <= self.capacity.load(Ordering::Acquire));
    }

    fn pop_idle(&self) -> Option<TransferSlot> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = idle.pop_front()?;
        self.available.fetch_sub(1, Ordering::AcqRel);
        Some(slot)
    }

    fn release_permit(&self) {
        let Some(queue) = &self.releaser else {
            self.limit.add_permits(1);
            return;
        };
        let limit = Arc::clone(&self.limit);
        if let Err(job) = queue.push(move || limit.add_permits(1)) {
            // worker gone, nothing left to re-enter
            job();
        }
    }

    fn failed(&self) -> MutexGuard<'_, Vec<Range<usize>>> {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `range` as lost, merging it with overlapping or adjacent ones.
    fn note_failed(&self, range: Range<usize>) {
        let mut merged = range;
        let mut failed = self.failed();
        failed.retain(|r| {
            if r.start <= merged.end && merged.start <= r.end {
                merged = merged.start.min(r.start)..merged.end.max(r.end);
                false
            } else {
                true
            }
        });
        failed.push(merged);
    }

    /// `range` is on its way again; drop it from the lost set.
    fn note_resent(&self, range: &Range<usize>) {
        let mut failed = self.failed();
        if failed.is_empty() {
            return;
        }
        let mut kept = Vec::with_capacity(failed.len() + 1);
        for r in failed.drain(..) {
            if r.end <= range.start || r.start >= range.end {
                kept.push(r);
                continue;
            }
            if r.start < range.start {
                kept.push(r.start..range.start);
            }
            if r.end > range.end {
                kept.push(range.end..r.end);
            }
        }
        *failed = kept;
    }

    /// Runs exactly once per submitted slot.
    fn complete(&self, mut slot: TransferSlot, status: TransferStatus) {
        if !status.is_success() && !status.is_benign() {
            error!("transfer on slot {} completed with {status:?}", slot.id());
            self.unexpected.fetch_add(1, Ordering::Relaxed);
            self.metrics.mark_lost_pixels();
            if let Some(range) = slot.origin() {
                self.note_failed(range);
            }
        }
        slot.reset();
        self.push_idle(slot);
        self.release_permit();
    }
}

// ── TransferPool ─────────────────────────────────────────────────

/// Fixed set of transfer slots behind a counting admission limit.
pub struct TransferPool {
    state: Arc<PoolState>,
    link: Arc<UsbLink>,
    runtime: Handle,
    slot_size: usize,
}

impl TransferPool {
    /// Empty pool bound to `link`. Must be called inside a tokio runtime.
    pub fn new(link: Arc<UsbLink>, metrics: Arc<Metrics>, release: ReleaseMode) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| UdlError::NoRuntime)?;
        let releaser = match release {
            ReleaseMode::Inline => None,
            ReleaseMode::Deferred => Some(WorkQueue::spawn("slot release", &runtime)),
        };
        Ok(Self {
            state: Arc::new(PoolState {
                idle: Mutex::new(VecDeque::new()),
                available: AtomicUsize::new(0),
                capacity: AtomicUsize::new(0),
                limit: Arc::new(Semaphore::new(0)),
                unexpected: AtomicU64::new(0),
                failed: Mutex::new(Vec::new()),
                releaser,
                metrics,
            }),
            link,
            runtime,
            slot_size: 0,
        })
    }

    /// Allocate up to `capacity` slots of `slot_size` bytes.
    ///
    /// Stops at the first allocation failure and returns the count
    /// actually allocated, which becomes the admission limit.
    pub fn initialize(&mut self, capacity: usize, slot_size: usize) -> usize {
        self.slot_size = slot_size;
        let base = self.state.capacity.load(Ordering::Acquire);

        let mut allocated = 0;
        for i in 0..capacity {
            let Some(slot) = TransferSlot::allocate(base + i, slot_size) else {
                warn!("transfer slot allocation stopped at {i} of {capacity}");
                break;
            };
            self.state.capacity.fetch_add(1, Ordering::AcqRel);
            self.state.push_idle(slot);
            allocated += 1;
        }
        self.state.limit.add_permits(allocated);

        info!("allocated {allocated} transfer slots of {slot_size} bytes");
        allocated
    }

    /// Wait up to `timeout` for an idle slot.
    ///
    /// On timeout the lost-pixel flag is raised and
    /// [`UdlError::ResourceExhausted`] returned; the caller drops the
    /// update and carries on.
    pub async fn acquire(&self, timeout: Duration) -> Result<TransferSlot> {
        let permit = match tokio::time::timeout(timeout, self.state.limit.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(UdlError::PoolClosed),
            Err(_) => {
                self.state.metrics.mark_lost_pixels();
                warn!(
                    "wait for transfer slot timed out after {timeout:?}, {} available",
                    self.available()
                );
                return Err(UdlError::ResourceExhausted(timeout));
            }
        };
        permit.forget();

        match self.state.pop_idle() {
            Some(slot) => Ok(slot),
            None => {
                error!("admission granted with no idle transfer slot");
                self.state.limit.add_permits(1);
                Err(UdlError::PoolClosed)
            }
        }
    }

    /// Send the first `len` bytes of `slot` and return immediately.
    ///
    /// With the link inactive the slot completes at once as
    /// [`TransferStatus::Shutdown`] and nothing reaches the bus.
    pub fn submit(&self, mut slot: TransferSlot, len: usize) -> Result<()> {
        let max = slot.size().min(slot.buffer_mut().len());
        if len > max {
            self.recycle(slot);
            return Err(UdlError::TransferTooLarge { len, max });
        }
        slot.set_transfer_len(len);

        let Some(transport) = self.link.transport() else {
            self.state.complete(slot, TransferStatus::Shutdown);
            return Ok(());
        };

        if let Some(range) = slot.origin() {
            self.state.note_resent(&range);
        }
        let endpoint = self.link.endpoint();
        let state = Arc::clone(&self.state);
        self.runtime.spawn(async move {
            let status = transport.bulk_out(endpoint, slot.payload()).await;
            state.complete(slot, status);
        });
        Ok(())
    }

    /// Return a slot that was acquired but will not be submitted.
    pub fn recycle(&self, mut slot: TransferSlot) {
        slot.reset();
        self.state.push_idle(slot);
        self.state.release_permit();
    }

    /// Reclaim and free every slot, waiting up to `timeout` for each
    /// in-flight transfer. Closes admission; later acquires fail with
    /// [`UdlError::PoolClosed`]. Returns the number of slots freed.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let capacity = self.capacity();
        let mut freed = 0;

        while freed < capacity {
            match tokio::time::timeout(timeout, self.state.limit.acquire()).await {
                Ok(Ok(permit)) => permit.forget(),
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!(
                        "{} transfer slots still in flight after {timeout:?}",
                        capacity - freed
                    );
                    break;
                }
            }
            if self.state.pop_idle().is_some() {
                freed += 1;
            }
        }

        self.state.limit.close();
        self.state.capacity.fetch_sub(freed, Ordering::AcqRel);
        debug!("drained {freed} of {capacity} transfer slots");
        freed
    }

    /// Slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.state.capacity.load(Ordering::Acquire)
    }

    /// Slots currently idle.
    pub fn available(&self) -> usize {
        self.state.available.load(Ordering::Acquire)
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Completions whose status was neither success nor a disconnect.
    pub fn unexpected_completions(&self) -> u64 {
        self.state.unexpected.load(Ordering::Relaxed)
    }

    /// Whether a failed transfer left bytes of `range` off the device.
    /// Cleared once a slot covering them is submitted again.
    pub fn has_failed_bytes(&self, range: &Range<usize>) -> bool {
        self.state
            .failed()
            .iter()
            .any(|r| r.start < range.end && range.start < r.end)
    }

    pub fn is_closed(&self) -> bool {
        self.state.limit.is_closed()
    }

    pub fn link(&self) -> &Arc<UsbLink> {
        &self.link
    }
}

impl std::fmt::Debug for TransferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("slot_size", &self.slot_size)
            .finish()
    }
}
