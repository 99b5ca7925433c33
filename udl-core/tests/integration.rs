//! Integration tests: full attach / open / render / disconnect / teardown
//! cycles over the in-memory transport.

use std::sync::{Arc, Weak};
use std::time::Duration;

use udl_core::protocol::registers::VIDEO_MODE_LEN;
use udl_core::protocol::vendor::EDID_LENGTH;
use udl_core::{
    BlankMode, ClientKind, DeviceConfig, DeviceContext, DirtyRegion, MemoryTransport, Metrics,
    ModeDescriptor, ReleaseMode, TransferPool, TransferStatus, UdlError, UsbDisplay, UsbLink,
};

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ──────────────────────────────────────────────────────

fn config() -> DeviceConfig {
    DeviceConfig {
        shadow: false,
        acquire_timeout_ms: 500,
        teardown_delay_ms: 20,
        defio_delay_ms: 10,
        ..DeviceConfig::default()
    }
}

async fn attach(transport: &Arc<MemoryTransport>, config: DeviceConfig) -> UsbDisplay {
    let display = UsbDisplay::attach(transport.clone(), config, ModeDescriptor::vesa_800x600_60())
        .await
        .expect("attach");
    assert!(display.quiesce(WAIT).await);
    display
}

/// Wait for the last strong reference to go.
async fn wait_freed(weak: &Weak<DeviceContext>) {
    tokio::time::timeout(WAIT, async {
        while weak.strong_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("device context was never freed");
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_lifecycle() {
    let transport = Arc::new(MemoryTransport::new());
    let display = attach(&transport, config()).await;
    let weak = display.downgrade();

    let client = display.open(ClientKind::User).unwrap();
    assert_eq!(client.write(0, &[0xAB; 3200]).await.unwrap(), 3200);
    assert!(client.quiesce(WAIT).await);
    assert!(client.metrics().bytes_sent > 0);

    display.disconnect();
    assert!(!client.is_active());
    assert!(client.is_virtualized());

    // the open client still holds the context
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(weak.upgrade().is_some());
    assert!(!client.is_torn_down());

    drop(client);
    wait_freed(&weak).await;
}

#[tokio::test]
async fn test_disconnect_without_clients_frees_immediately() {
    let transport = Arc::new(MemoryTransport::new());
    let display = attach(&transport, config()).await;
    let weak = display.downgrade();

    display.disconnect();
    wait_freed(&weak).await;
}

#[tokio::test]
async fn test_open_after_disconnect_is_refused() {
    let transport = Arc::new(MemoryTransport::new());
    let display = attach(&transport, config()).await;
    let ctx = Arc::clone(display.context());
    let first = display.open(ClientKind::User).unwrap();

    display.disconnect();

    assert!(matches!(ctx.open(ClientKind::User), Err(UdlError::TransportGone)));
    assert_eq!(ctx.open_clients(), 1);
    let count_before = transport.transfer_count();
    let stats = first.report_damage(DirtyRegion::full(800, 600)).await.unwrap();
    assert_eq!(stats.bytes_sent, 0);
    assert_eq!(transport.transfer_count(), count_before);

    drop(first);
    tokio::time::timeout(WAIT, async {
        while !ctx.is_torn_down() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("teardown never ran");
    assert!(ctx.pool().is_closed());
    assert_eq!(ctx.pool().capacity(), 0);
}

#[tokio::test]
async fn test_clients_keep_context_alive_until_last_close() {
    let transport = Arc::new(MemoryTransport::new());
    let display = attach(&transport, config()).await;
    let weak = display.downgrade();

    let clients: Vec<_> = (0..3)
        .map(|_| display.open(ClientKind::User).unwrap())
        .collect();
    display.disconnect();

    for client in clients {
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(weak.upgrade().is_some());
        assert!(!client.is_torn_down());
        drop(client);
    }
    wait_freed(&weak).await;
}

// ── Pool backpressure ────────────────────────────────────────────

#[tokio::test]
async fn test_fifth_acquire_exhausts_pool_of_four() {
    let link = Arc::new(UsbLink::new(Arc::new(MemoryTransport::new()), 0x01));
    link.activate();
    let metrics = Arc::new(Metrics::new());
    let mut pool = TransferPool::new(link, Arc::clone(&metrics), ReleaseMode::Inline).unwrap();
    assert_eq!(pool.initialize(4, 1024), 4);

    let timeout = Duration::from_millis(30);
    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.acquire(timeout).await.unwrap());
    }

    let started = tokio::time::Instant::now();
    let err = pool.acquire(timeout).await.unwrap_err();
    assert!(started.elapsed() >= timeout);
    assert!(matches!(err, UdlError::ResourceExhausted(_)));
    assert!(metrics.lost_pixels());
    assert_eq!(pool.available(), 0);
}

// ── Rendering ────────────────────────────────────────────────────

#[test]
fn test_alignment_scenario() {
    let aligned = DirtyRegion::new(3, 0, 1024, 768).align(8);
    assert_eq!(aligned.x, 0);
    assert_eq!(aligned.width, 1032);
    assert_eq!(aligned.height, 768);
}

#[tokio::test]
async fn test_disconnect_mid_render_stops_sending() {
    let transport = Arc::new(MemoryTransport::new());
    let cfg = DeviceConfig {
        writes_in_flight: 1,
        deferred_io: false,
        ..config()
    };
    let display = attach(&transport, cfg).await;
    let client = display.open(ClientKind::User).unwrap();
    transport.clear();
    transport.set_latency(Duration::from_millis(2));

    let render = tokio::spawn(async move {
        let stats = client.report_damage(DirtyRegion::full(800, 600)).await;
        (stats, client)
    });

    tokio::time::timeout(WAIT, async {
        while transport.transfer_count() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("render never started");

    display.disconnect();
    let at_disconnect = transport.transfer_count();

    let (stats, client) = render.await.unwrap();
    let stats = stats.unwrap();
    assert!(stats.truncated);
    assert!(stats.transfers < 600);
    // one transfer may have been spawned just before the unplug
    assert!(transport.transfer_count() <= at_disconnect + 1);
    drop(client);
}

#[tokio::test]
async fn test_powerdown_to_unblank_resets_mode_first() {
    let transport = Arc::new(MemoryTransport::new());
    let display = attach(&transport, config()).await;

    display.blank(BlankMode::Powerdown).await.unwrap();
    assert!(display.quiesce(WAIT).await);
    transport.clear();

    display.blank(BlankMode::Unblank).await.unwrap();
    assert!(display.quiesce(WAIT).await);

    let sent = transport.transfers();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].data.len(), VIDEO_MODE_LEN);
    assert_eq!(
        sent[1].data,
        [0xFF, 0x00, 0x1F, 0x00, 0xFF, 0xFF, 0xAF, 0x6A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
    );
    assert_eq!(display.blank_mode().await, BlankMode::Unblank);
}

#[tokio::test]
async fn test_blank_without_powerdown_is_single_transfer() {
    let transport = Arc::new(MemoryTransport::new());
    let display = attach(&transport, config()).await;
    transport.clear();

    display.blank(BlankMode::Normal).await.unwrap();
    display.blank(BlankMode::Unblank).await.unwrap();
    assert!(display.quiesce(WAIT).await);

    let sent = transport.transfers();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[0].data[2..4], &[0x1F, 0x01]);
    assert_eq!(&sent[1].data[2..4], &[0x1F, 0x00]);
}

#[tokio::test]
async fn test_blank_with_exhausted_pool_still_records_mode() {
    let transport = Arc::new(MemoryTransport::held());
    let cfg = DeviceConfig {
        writes_in_flight: 1,
        acquire_timeout_ms: 50,
        ..config()
    };
    let display = UsbDisplay::attach(transport.clone(), cfg, ModeDescriptor::vesa_800x600_60())
        .await
        .expect("attach");

    // the mode set holds the only slot
    display.blank(BlankMode::Normal).await.unwrap();
    assert_eq!(display.blank_mode().await, BlankMode::Normal);
    assert!(display.metrics().lost_pixels);

    transport.release(1);
    assert!(display.quiesce(WAIT).await);
}

#[tokio::test]
async fn test_mode_change_with_client_open_skips_green_screen() {
    let transport = Arc::new(MemoryTransport::new());
    let display = attach(&transport, config()).await;
    let _client = display.open(ClientKind::Console).unwrap();
    transport.clear();

    display.set_mode(ModeDescriptor::vesa_1024x768_60()).await.unwrap();
    assert!(display.quiesce(WAIT).await);
    assert_eq!(transport.transfer_count(), 1);
    assert_eq!(display.mode().await.xres, 1024);
}

#[tokio::test]
async fn test_stalled_lines_are_resent_on_next_damage() {
    let transport = Arc::new(MemoryTransport::new());
    let cfg = DeviceConfig {
        shadow: true,
        deferred_io: false,
        ..config()
    };
    let display = attach(&transport, cfg).await;

    transport.set_status(Some(TransferStatus::Stall));
    display.write(1600 * 10, &[0x55; 1600]).await.unwrap();
    assert!(display.quiesce(WAIT).await);
    assert!(display.metrics().lost_pixels);
    assert_eq!(display.unexpected_completions(), 1);

    transport.set_status(None);
    transport.clear();
    let stats = display
        .report_damage(DirtyRegion::new(0, 9, 800, 2))
        .await
        .unwrap();
    assert_eq!(stats.transfers, 1);
    assert_eq!(stats.bytes_identical, 1600);
    assert!(display.quiesce(WAIT).await);

    let sent = transport.transfers();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].data[2..].iter().all(|&b| b == 0x55));

    // delivered now, so the shadow is trusted again
    let stats = display
        .report_damage(DirtyRegion::new(0, 9, 800, 2))
        .await
        .unwrap();
    assert_eq!(stats.transfers, 0);
}

// ── Metrics and EDID ─────────────────────────────────────────────

#[tokio::test]
async fn test_metrics_snapshot_and_reset() {
    let transport = Arc::new(MemoryTransport::new());
    let display = attach(&transport, config()).await;

    let snap = display.metrics();
    // green screen: 600 lines of 1600 bytes, each with a 2 byte header
    assert_eq!(snap.bytes_rendered, 600 * 1600);
    assert_eq!(snap.bytes_sent, 600 * 1602);
    assert_eq!(snap.bytes_identical, 0);
    assert!(!snap.lost_pixels);

    let json = serde_json::to_value(snap).unwrap();
    assert_eq!(json["bytes_sent"], 600 * 1602);

    display.reset_metrics();
    let snap = display.metrics();
    assert_eq!(snap.bytes_rendered, 0);
    assert_eq!(snap.bytes_sent, 0);
}

#[tokio::test]
async fn test_hardware_edid_is_preferred() {
    let mut edid = vec![0u8; EDID_LENGTH];
    edid[..8].copy_from_slice(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
    edid[8] = 0x42;
    let transport = Arc::new(MemoryTransport::new().with_edid(edid.clone()));
    let display = attach(&transport, config()).await;
    assert_eq!(display.edid(), &edid[..]);
}
