//! Per-device configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options fixed at attach time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Allow console clients to open the device.
    pub console: bool,
    /// Track mapped writes per page and flush them from a background task.
    /// Also routes slot release through a worker queue.
    pub deferred_io: bool,
    /// Keep a shadow copy and skip lines it already holds.
    pub shadow: bool,
    /// Overrides the pixel limit read from the vendor descriptor.
    pub pixel_limit: Option<u32>,
    /// Transfer slots to allocate.
    pub writes_in_flight: usize,
    /// Bytes per transfer slot.
    pub max_transfer: usize,
    pub acquire_timeout_ms: u64,
    pub defio_delay_ms: u64,
    /// Delay between the last close after a disconnect and teardown.
    pub teardown_delay_ms: u64,
    /// How long teardown waits for in-flight transfers.
    pub drain_timeout_ms: u64,
    pub bulk_out_endpoint: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            console: true,
            deferred_io: true,
            shadow: true,
            pixel_limit: None,
            writes_in_flight: 4,
            // 16 pages minus one 512 byte bulk packet
            max_transfer: 16 * 4096 - 512,
            acquire_timeout_ms: 1000,
            defio_delay_ms: 50,
            teardown_delay_ms: 1000,
            drain_timeout_ms: 5000,
            bulk_out_endpoint: 0x01,
        }
    }
}

impl DeviceConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn defio_delay(&self) -> Duration {
        Duration::from_millis(self.defio_delay_ms.max(1))
    }

    pub fn teardown_delay(&self) -> Duration {
        Duration::from_millis(self.teardown_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.max_transfer, 65024);
        assert_eq!(cfg.writes_in_flight, 4);
        assert_eq!(cfg.acquire_timeout(), Duration::from_secs(1));
        assert!(cfg.pixel_limit.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: DeviceConfig = serde_json::from_str(r#"{"shadow": false, "pixel_limit": 1000}"#).unwrap();
        assert!(!cfg.shadow);
        assert_eq!(cfg.pixel_limit, Some(1000));
        assert!(cfg.console);
        assert_eq!(cfg.bulk_out_endpoint, 0x01);
    }
}
