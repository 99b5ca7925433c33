//! UDP tunnel for bulk and control transfers.
//!
//! Lets the pipeline drive a device attached to another host (or a
//! software sink) without a local USB stack. Every transfer becomes one
//! datagram, so a transfer must stay below the datagram limit.
//!
//! ## Wire format
//!
//! ```text
//! sequence:  u32  (4)   LE, per transport
//! kind:      u8   (1)   0 = bulk-out, 1 = control-out
//! target:    u8   (1)   endpoint (bulk) or request (control)
//! length:    u16  (2)   LE, bytes following the header
//! control only:
//!   value:   u16  (2)   LE
//!   index:   u16  (2)   LE
//! data:      [u8]
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tracing::warn;

use crate::error::{Result, UdlError};
use crate::transport::{BulkTransport, TransferStatus};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

const KIND_BULK: u8 = 0;
const KIND_CONTROL: u8 = 1;

// ── TunnelHeader ─────────────────────────────────────────────────

/// Header in front of every tunnelled transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelHeader {
    pub sequence: u32,
    pub kind: u8,
    pub target: u8,
    pub length: u16,
}

impl TunnelHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4] = self.kind;
        buf[5] = self.target;
        buf[6..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            sequence: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            kind: data[4],
            target: data[5],
            length: u16::from_le_bytes([data[6], data[7]]),
        })
    }
}

// ── UdpTransport ─────────────────────────────────────────────────

/// Transport that forwards transfers to `remote_addr`.
pub struct UdpTransport {
    socket: UdpSocket,
    remote_addr: SocketAddr,
    sequence: AtomicU32,
    /// Total bytes sent since construction, headers included.
    bytes_sent: AtomicU64,
}

impl UdpTransport {
    /// Wrap an already-bound socket targeting `remote_addr`.
    pub fn new(socket: UdpSocket, remote_addr: SocketAddr) -> Self {
        Self {
            socket,
            remote_addr,
            sequence: AtomicU32::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Bind `local` and target `remote`.
    pub async fn bind(local: SocketAddr, remote: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::new(socket, remote))
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    async fn send(&self, kind: u8, target: u8, prefix: &[u8], data: &[u8]) -> std::io::Result<usize> {
        let length = prefix.len() + data.len();
        if TunnelHeader::SIZE + length > MAX_DATAGRAM {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("transfer of {length} bytes exceeds datagram limit"),
            ));
        }

        let header = TunnelHeader {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            kind,
            target,
            length: length as u16,
        };
        let mut buf = BytesMut::with_capacity(TunnelHeader::SIZE + length);
        buf.put_slice(&header.encode());
        buf.put_slice(prefix);
        buf.put_slice(data);

        let sent = self.socket.send_to(&buf, self.remote_addr).await?;
        self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        Ok(sent)
    }
}

#[async_trait]
impl BulkTransport for UdpTransport {
    async fn bulk_out(&self, endpoint: u8, data: &[u8]) -> TransferStatus {
        match self.send(KIND_BULK, endpoint, &[], data).await {
            Ok(_) => TransferStatus::Completed(data.len()),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                TransferStatus::ConnectionReset
            }
            Err(e) => {
                warn!("UDP bulk send to {}: {e}", self.remote_addr);
                TransferStatus::Failed(e.to_string())
            }
        }
    }

    async fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        let mut prefix = [0u8; 4];
        prefix[0..2].copy_from_slice(&value.to_le_bytes());
        prefix[2..4].copy_from_slice(&index.to_le_bytes());
        self.send(KIND_CONTROL, request, &prefix, data)
            .await
            .map_err(|e| UdlError::Transport(format!("UDP control send: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = TunnelHeader {
            sequence: 7,
            kind: KIND_CONTROL,
            target: 0x12,
            length: 20,
        };
        assert_eq!(TunnelHeader::decode(&h.encode()), Some(h));
        assert_eq!(TunnelHeader::decode(&[0u8; 3]), None);
    }

    #[tokio::test]
    async fn bulk_transfer_arrives_as_datagram() {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink_addr = sink.local_addr().unwrap();
        let t = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), sink_addr)
            .await
            .unwrap();

        let status = t.bulk_out(0x01, &[0x00, 0x01, 0xAA, 0xBB]).await;
        assert_eq!(status, TransferStatus::Completed(4));

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(std::time::Duration::from_secs(5), sink.recv(&mut buf))
            .await
            .expect("timeout")
            .unwrap();
        let header = TunnelHeader::decode(&buf[..n]).unwrap();
        assert_eq!(header.kind, KIND_BULK);
        assert_eq!(header.target, 0x01);
        assert_eq!(header.length, 4);
        assert_eq!(&buf[TunnelHeader::SIZE..n], &[0x00, 0x01, 0xAA, 0xBB]);
        assert_eq!(t.bytes_sent(), n as u64);
    }

    #[tokio::test]
    async fn control_request_carries_value_and_index() {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let t = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), sink.local_addr().unwrap())
            .await
            .unwrap();
        t.control_out(0x12, 0x0102, 0x0304, &[0xEE]).await.unwrap();

        let mut buf = [0u8; 64];
        let n = sink.recv(&mut buf).await.unwrap();
        assert_eq!(n, TunnelHeader::SIZE + 5);
        assert_eq!(&buf[TunnelHeader::SIZE..n], &[0x02, 0x01, 0x04, 0x03, 0xEE]);
    }
}
