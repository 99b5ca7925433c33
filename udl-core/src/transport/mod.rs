//! The USB bus seam.
//!
//! The core never talks to a USB stack directly. It drives a
//! [`BulkTransport`], which the embedding provides:
//!
//! | Implementation    | Purpose                                          |
//! |-------------------|--------------------------------------------------|
//! | `MemoryTransport` | Records transfers; scripted status and latency   |
//! | `UdpTransport`    | Tunnels every transfer as one UDP datagram       |
//!
//! [`UsbLink`] pairs the transport handle with the `active` flag. The
//! handle is present iff the link is active.

pub mod memory;
pub mod udp;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::Result;

pub use memory::{ControlRequest, MemoryTransport, RecordedTransfer};
pub use udp::UdpTransport;

// ── TransferStatus ───────────────────────────────────────────────

/// Completion status of one bulk transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer finished; carries the number of bytes moved.
    Completed(usize),
    /// Synchronously or asynchronously unlinked by the host.
    Unlinked,
    /// Connection reset while in flight.
    ConnectionReset,
    /// Device or host controller shut down.
    Shutdown,
    /// Endpoint stalled.
    Stall,
    /// Any other failure reported by the transport.
    Failed(String),
}

impl TransferStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferStatus::Completed(_))
    }

    /// Statuses that come with unplug or teardown and are not errors.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            TransferStatus::Unlinked | TransferStatus::ConnectionReset | TransferStatus::Shutdown
        )
    }
}

// ── BulkTransport ────────────────────────────────────────────────

/// Bus operations the core consumes.
#[async_trait]
pub trait BulkTransport: Send + Sync {
    /// Send `data` to a bulk-out endpoint and resolve when the bus is done.
    async fn bulk_out(&self, endpoint: u8, data: &[u8]) -> TransferStatus;

    /// Vendor control request to the device.
    async fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()>;

    /// Raw vendor-specific descriptor, if the device exposes one.
    async fn vendor_descriptor(&self) -> Option<Vec<u8>> {
        None
    }

    /// EDID read from the attached monitor, if any.
    async fn read_edid(&self) -> Option<Vec<u8>> {
        None
    }
}

// ── UsbLink ──────────────────────────────────────────────────────

/// Transport handle plus the flag that gates every submission.
pub struct UsbLink {
    transport: RwLock<Option<Arc<dyn BulkTransport>>>,
    endpoint: u8,
    active: AtomicBool,
}

impl UsbLink {
    /// Wrap a transport. The link starts inactive until bring-up finishes.
    pub fn new(transport: Arc<dyn BulkTransport>, endpoint: u8) -> Self {
        Self {
            transport: RwLock::new(Some(transport)),
            endpoint,
            active: AtomicBool::new(false),
        }
    }

    /// Bulk-out endpoint address.
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the link usable. Ignored once the transport is gone.
    pub fn activate(&self) {
        let guard = self.transport.read().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            self.active.store(true, Ordering::Release);
        }
    }

    /// The transport, or `None` once the link went inactive.
    pub fn transport(&self) -> Option<Arc<dyn BulkTransport>> {
        if !self.is_active() {
            return None;
        }
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the transport. `active` goes false before the handle is cleared.
    pub fn detach(&self) -> Option<Arc<dyn BulkTransport>> {
        self.active.store(false, Ordering::Release);
        self.transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl std::fmt::Debug for UsbLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbLink")
            .field("endpoint", &self.endpoint)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_statuses() {
        assert!(TransferStatus::Unlinked.is_benign());
        assert!(TransferStatus::ConnectionReset.is_benign());
        assert!(TransferStatus::Shutdown.is_benign());
        assert!(!TransferStatus::Stall.is_benign());
        assert!(!TransferStatus::Completed(4).is_benign());
        assert!(TransferStatus::Completed(4).is_success());
    }

    #[test]
    fn link_gates_transport_on_active() {
        let link = UsbLink::new(Arc::new(MemoryTransport::new()), 0x01);
        assert!(!link.is_active());
        assert!(link.transport().is_none());

        link.activate();
        assert!(link.transport().is_some());

        assert!(link.detach().is_some());
        assert!(!link.is_active());
        assert!(link.transport().is_none());

        // a detached link cannot come back
        link.activate();
        assert!(!link.is_active());
    }
}
