//! # udl-core
//!
//! Host-side pipeline for USB display adapters that take a register and
//! pixel command stream over bulk transfers.
//!
//! This crate contains:
//! - **Protocol**: register encoder, LFSR16 counters, mode sets, pixel framing
//! - **Pool**: `TransferPool` of reusable transfer slots with bounded admission
//! - **Render**: `Renderer` turning dirty rectangles into per-line transfers
//! - **Device**: `UsbDisplay` / `DeviceContext` lifecycle, framebuffer, deferred I/O
//! - **Transport**: `BulkTransport` seam with in-memory and UDP implementations
//! - **Task**: `WorkQueue` for releases that must not run inline
//! - **Error**: `UdlError`, a `thiserror`-based error enum

pub mod device;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod render;
pub mod task;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use device::{ClientHandle, ClientKind, DeviceConfig, DeviceContext, UsbDisplay};
pub use error::{Result, UdlError};
pub use pool::{ReleaseMode, TransferPool, TransferSlot};
pub use protocol::{BlankMode, ModeDescriptor};
pub use render::{DirtyRegion, Metrics, MetricsSnapshot, RenderStats, Renderer, ScreenGeometry};
pub use task::WorkQueue;
pub use transport::{BulkTransport, MemoryTransport, TransferStatus, UdpTransport, UsbLink};
