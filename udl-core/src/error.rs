//! Domain-specific error types for the display pipeline.
//!
//! All fallible operations return `Result<T, UdlError>`. Most of the
//! taxonomy is handled inside the pool and renderer; only boundary
//! errors and bring-up allocation failures reach external callers.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for `udl-core`.
#[derive(Debug, Error)]
pub enum UdlError {
    // ── Boundary Errors ──────────────────────────────────────────
    /// A damage region does not fit inside the current resolution.
    #[error("region {width}x{height}+{x}+{y} exceeds {xres}x{yres}")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        xres: u32,
        yres: u32,
    },

    /// A mode asks for more pixels or memory than the device can take.
    #[error("mode {xres}x{yres} exceeds device limit of {limit} pixels")]
    UnsupportedMode { xres: u32, yres: u32, limit: u64 },

    /// A write starts past the end of the framebuffer.
    #[error("offset {offset} beyond framebuffer length {len}")]
    OffsetOutOfRange { offset: usize, len: usize },

    // ── Resource Errors ──────────────────────────────────────────
    /// No transfer slot became available within the deadline.
    #[error("no transfer slot available after {0:?}")]
    ResourceExhausted(Duration),

    /// Buffer or slot allocation failed.
    #[error("allocation failure: {0}")]
    AllocationFailure(&'static str),

    /// The payload does not fit in a transfer slot.
    #[error("transfer too large: {len} bytes (max {max})")]
    TransferTooLarge { len: usize, max: usize },

    /// The pool was drained and accepts no further work.
    #[error("transfer pool closed")]
    PoolClosed,

    // ── Device Errors ────────────────────────────────────────────
    /// The USB transport disappeared.
    #[error("device disconnected")]
    TransportGone,

    /// Console clients are not allowed to bind this device.
    #[error("console binding disabled")]
    ConsoleDisabled,

    /// A control request was rejected by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Attach was called without a tokio runtime to host worker tasks.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Lower level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl UdlError {
    /// Whether the error describes a rejected region or mode.
    pub fn is_boundary(&self) -> bool {
        matches!(
            self,
            UdlError::OutOfBounds { .. }
                | UdlError::UnsupportedMode { .. }
                | UdlError::OffsetOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, UdlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = UdlError::OutOfBounds {
            x: 0,
            y: 700,
            width: 1024,
            height: 100,
            xres: 1024,
            yres: 768,
        };
        assert!(e.to_string().contains("1024x100+0+700"));
        assert!(e.is_boundary());

        let e = UdlError::TransferTooLarge { len: 70000, max: 65024 };
        assert!(e.to_string().contains("70000"));
        assert!(!e.is_boundary());
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: UdlError = io_err.into();
        assert!(matches!(e, UdlError::Io(_)));
    }
}
