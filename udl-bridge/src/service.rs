//! Bridge service core logic.
//!
//! Attaches one adapter over the UDP tunnel, opens a client and writes
//! frames into it at the configured rate until stopped, the frame limit
//! is reached or the frame file runs out. The adapter is disconnected
//! cleanly on every exit path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use udl_core::{ClientKind, MetricsSnapshot, UdpTransport, UsbDisplay};

use crate::config::BridgeConfig;
use crate::pattern::FrameSource;

/// How long to wait for in-flight transfers before reporting.
const QUIESCE_TIMEOUT: Duration = Duration::from_secs(5);

// ── BridgeService ────────────────────────────────────────────────

pub struct BridgeService {
    config: BridgeConfig,
    running: Arc<AtomicBool>,
}

impl BridgeService {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that stops the stream when set to `false`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Stream `source` and return the final metrics.
    pub async fn run(&self, source: FrameSource) -> Result<MetricsSnapshot, Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);

        let bind: SocketAddr = self.config.network.bind.parse()?;
        let remote: SocketAddr = self.config.network.remote.parse()?;
        let transport = Arc::new(UdpTransport::bind(bind, remote).await?);
        info!("UDP bulk tunnel {bind} → {remote}");

        let display =
            UsbDisplay::attach(transport.clone(), self.config.device.clone(), self.config.mode).await?;
        let client = display.open(ClientKind::User)?;
        let mode = client.mode().await;

        let mut ticker = tokio::time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let limit = self.config.stream.frame_limit;
        let mut frame_no = 0u64;
        while self.running.load(Ordering::SeqCst) && (limit == 0 || frame_no < limit) {
            ticker.tick().await;
            let Some(frame) = source.frame(&mode, frame_no) else {
                info!("frame source exhausted after {frame_no} frames");
                break;
            };
            if let Err(e) = client.write(0, &frame).await {
                warn!("frame {frame_no}: {e}");
            }
            frame_no += 1;
        }

        if !client.quiesce(QUIESCE_TIMEOUT).await {
            warn!("transfers still in flight after {QUIESCE_TIMEOUT:?}");
        }
        let metrics = client.metrics();
        info!(
            "streamed {frame_no} frames, {} bytes on the wire",
            transport.bytes_sent()
        );

        drop(client);
        display.disconnect();
        self.running.store(false, Ordering::SeqCst);
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use tokio::net::UdpSocket;
    use udl_core::ModeDescriptor;

    async fn test_config(sink: &UdpSocket) -> BridgeConfig {
        let mut cfg = BridgeConfig::default();
        cfg.network.bind = "127.0.0.1:0".into();
        cfg.network.remote = sink.local_addr().unwrap().to_string();
        cfg.mode = ModeDescriptor::vesa_800x600_60();
        cfg.stream.fps = 60;
        cfg.stream.frame_limit = 2;
        cfg.device.acquire_timeout_ms = 500;
        cfg
    }

    #[tokio::test]
    async fn streams_frame_limit_and_reports() {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let svc = BridgeService::new(test_config(&sink).await);

        let metrics = svc.run(FrameSource::Pattern(Pattern::Gradient)).await.unwrap();
        // green screen at attach plus two frames
        assert_eq!(metrics.bytes_rendered, 3 * 800 * 600 * 2);
        assert!(metrics.bytes_sent > 0);
        assert!(!svc.stop_handle().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn bad_remote_is_an_error() {
        let mut cfg = BridgeConfig::default();
        cfg.network.remote = "not an address".into();
        let svc = BridgeService::new(cfg);
        assert!(svc.run(FrameSource::Pattern(Pattern::Solid)).await.is_err());
    }
}
