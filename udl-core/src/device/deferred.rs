//! Deferred I/O: page-granular damage flushed on a timer.
//!
//! Mapped writes only mark pages dirty. A background task wakes every
//! `defio_delay`, takes the dirty set and renders each page as one
//! transfer unit under the framebuffer lock. The task holds a `Weak`
//! reference so it never keeps the device alive.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::device::DeviceContext;
use crate::protocol::PAGE_SIZE;

/// Page indices touched since the last flush.
#[derive(Debug, Default)]
pub struct DirtyPages {
    pages: BTreeSet<usize>,
}

impl DirtyPages {
    /// Record `len` bytes written at `offset`.
    pub fn mark(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let first = offset / PAGE_SIZE;
        let last = (offset + len - 1) / PAGE_SIZE;
        self.pages.extend(first..=last);
    }

    /// Drain in ascending order.
    pub fn take(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.pages).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Handle to a running flush task. Dropping it stops the task after
/// one last flush.
pub(crate) struct DeferredFlush {
    token: CancellationToken,
}

impl DeferredFlush {
    pub(crate) fn install(ctx: &Arc<DeviceContext>, delay: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(ctx);

        ctx.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        flush_once(&weak).await;
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        if !flush_once(&weak).await {
                            break;
                        }
                    }
                }
            }
            debug!("deferred flush stopped");
        });

        debug!("deferred flush installed, every {delay:?}");
        Self { token }
    }
}

impl Drop for DeferredFlush {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Returns false once the device is gone.
async fn flush_once(weak: &Weak<DeviceContext>) -> bool {
    let Some(ctx) = weak.upgrade() else {
        return false;
    };
    if let Err(e) = ctx.flush_dirty().await {
        warn!("deferred flush: {e}");
    }
    true
}
