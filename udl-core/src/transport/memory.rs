//! In-memory transport that records every transfer.
//!
//! Used by the tests and by dry runs of the bridge. Completion behaviour
//! is scriptable: a fixed status, an artificial bus latency, or a gate
//! that holds every completion until the caller releases it.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{Result, UdlError};
use crate::transport::{BulkTransport, TransferStatus};

/// One bulk-out transfer as it reached the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub endpoint: u8,
    pub data: Vec<u8>,
}

/// One vendor control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

/// Recording transport.
#[derive(Default)]
pub struct MemoryTransport {
    transfers: Mutex<Vec<RecordedTransfer>>,
    controls: Mutex<Vec<ControlRequest>>,
    status: Mutex<Option<TransferStatus>>,
    latency: Mutex<Duration>,
    gate: Option<Semaphore>,
    vendor: Option<Vec<u8>>,
    edid: Option<Vec<u8>>,
    reject_control: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completions wait for [`release`](Self::release).
    pub fn held() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn with_vendor_descriptor(mut self, desc: Vec<u8>) -> Self {
        self.vendor = Some(desc);
        self
    }

    pub fn with_edid(mut self, edid: Vec<u8>) -> Self {
        self.edid = Some(edid);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Bus time added to every later transfer.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Fail every control request.
    pub fn rejecting_control(mut self) -> Self {
        self.reject_control = true;
        self
    }

    /// Status reported for every later transfer; `None` restores success.
    pub fn set_status(&self, status: Option<TransferStatus>) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Let `n` held completions through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Snapshot of all bulk transfers in submission order.
    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn control_requests(&self) -> Vec<ControlRequest> {
        self.controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl BulkTransport for MemoryTransport {
    async fn bulk_out(&self, endpoint: u8, data: &[u8]) -> TransferStatus {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedTransfer {
                endpoint,
                data: data.to_vec(),
            });

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return TransferStatus::Shutdown,
            }
        }

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(TransferStatus::Completed(data.len()))
    }

    async fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        if self.reject_control {
            return Err(UdlError::Transport(format!(
                "control request {request:#04x} stalled"
            )));
        }
        self.controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ControlRequest {
                request,
                value,
                index,
                data: data.to_vec(),
            });
        Ok(())
    }

    async fn vendor_descriptor(&self) -> Option<Vec<u8>> {
        self.vendor.clone()
    }

    async fn read_edid(&self) -> Option<Vec<u8>> {
        self.edid.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_transfers_in_order() {
        let t = MemoryTransport::new();
        assert_eq!(t.bulk_out(1, &[1, 2, 3]).await, TransferStatus::Completed(3));
        assert_eq!(t.bulk_out(1, &[4]).await, TransferStatus::Completed(1));
        let data: Vec<Vec<u8>> = t.transfers().into_iter().map(|r| r.data).collect();
        assert_eq!(data, vec![vec![1, 2, 3], vec![4]]);
    }

    #[tokio::test]
    async fn scripted_status() {
        let t = MemoryTransport::new();
        t.set_status(Some(TransferStatus::Stall));
        assert_eq!(t.bulk_out(1, &[0]).await, TransferStatus::Stall);
        t.set_status(None);
        assert!(t.bulk_out(1, &[0]).await.is_success());
    }

    #[tokio::test]
    async fn held_completion_waits_for_release() {
        let t = std::sync::Arc::new(MemoryTransport::held());
        let pending = tokio::spawn({
            let t = t.clone();
            async move { t.bulk_out(1, &[9]).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        t.release(1);
        assert!(pending.await.unwrap().is_success());
    }
}
