//! Throughput counters.
//!
//! Counters are only ever bumped with atomic adds and read without
//! further synchronization; a snapshot taken during a render may mix
//! values from before and after it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Live counters shared by the renderer and the pool.
#[derive(Debug, Default)]
pub struct Metrics {
    bytes_rendered: AtomicU64,
    bytes_identical: AtomicU64,
    bytes_sent: AtomicU64,
    cpu_kcycles_used: AtomicU64,
    lost_pixels: AtomicBool,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Raw framebuffer bytes considered for transfer.
    pub bytes_rendered: u64,
    /// Bytes skipped because the shadow already held them.
    pub bytes_identical: u64,
    /// Bytes queued for the bus, framing included. Counted at submit,
    /// so transfers that later fail are still in here.
    pub bytes_sent: u64,
    /// Time spent rendering, in units of 1024 ns.
    pub cpu_kcycles_used: u64,
    /// Set once any update was dropped.
    pub lost_pixels: bool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rendered(&self, bytes: u64) {
        self.bytes_rendered.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_identical(&self, bytes: u64) {
        self.bytes_identical.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Charge `elapsed` wall time spent in the render loop.
    pub fn add_cpu(&self, elapsed: Duration) {
        let kcycles = (elapsed.as_nanos() >> 10) as u64;
        self.cpu_kcycles_used.fetch_add(kcycles, Ordering::Relaxed);
    }

    pub fn mark_lost_pixels(&self) {
        self.lost_pixels.store(true, Ordering::Relaxed);
    }

    pub fn lost_pixels(&self) -> bool {
        self.lost_pixels.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_rendered: self.bytes_rendered.load(Ordering::Relaxed),
            bytes_identical: self.bytes_identical.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            cpu_kcycles_used: self.cpu_kcycles_used.load(Ordering::Relaxed),
            lost_pixels: self.lost_pixels(),
        }
    }

    /// Zero the four byte/time counters. The lost-pixel flag is sticky.
    pub fn reset(&self) {
        self.bytes_rendered.store(0, Ordering::Relaxed);
        self.bytes_identical.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.cpu_kcycles_used.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_and_reset() {
        let m = Metrics::new();
        m.add_rendered(100);
        m.add_rendered(28);
        m.add_sent(130);
        m.add_identical(64);
        m.add_cpu(Duration::from_nanos(4096));
        m.mark_lost_pixels();

        let s = m.snapshot();
        assert_eq!(s.bytes_rendered, 128);
        assert_eq!(s.bytes_sent, 130);
        assert_eq!(s.bytes_identical, 64);
        assert_eq!(s.cpu_kcycles_used, 4);
        assert!(s.lost_pixels);

        m.reset();
        let s = m.snapshot();
        assert_eq!(s.bytes_rendered, 0);
        assert_eq!(s.bytes_sent, 0);
        assert_eq!(s.cpu_kcycles_used, 0);
        assert!(s.lost_pixels);
    }

    #[test]
    fn snapshot_serializes() {
        let s = MetricsSnapshot {
            bytes_sent: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"bytes_sent\":7"));
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
