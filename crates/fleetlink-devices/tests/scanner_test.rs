//! Barcode scan loop tests
//!
//! Drives a scan loop through its idle transitions against a scripted
//! transport and counts the `/scan` requests it issues.

mod common;

use common::{extension, next_event, MockTransport, Reply, STATUS_WITH_SCANNER};
use fleetlink_core::{ConnectionStatus, ExtensionEvent};
use fleetlink_devices::{BarcodeScanLoop, ScanLoopState};
use std::time::Duration;

const IDLE: ScanLoopState = ScanLoopState {
    idle: true,
    scanning: false,
};
const SCANNING: ScanLoopState = ScanLoopState {
    idle: false,
    scanning: true,
};

fn barcode() -> Reply {
    Reply::delayed(Duration::from_millis(20), Reply::Text(200, "4901234567894"))
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_scanning_and_reconnect_resumes() {
    let transport = MockTransport::new();
    transport.reply("/status", Reply::Json(200, STATUS_WITH_SCANNER));
    transport.reply("/scan", barcode());
    let ext = extension("scanner.local", 1, transport.clone());
    let mut rx = ext.event_bus().subscribe();
    let scan_loop = BarcodeScanLoop::new(&ext, Duration::from_secs(1));

    assert!(ext.update_status(false).await);
    next_event(&mut rx, ExtensionEvent::is_scan_event).await;
    assert_eq!(scan_loop.state(), SCANNING);

    // The scan in flight still answers; the one after it is refused
    transport.reply("/scan", Reply::Refuse);
    let before = transport.request_count("/scan");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(transport.request_count("/scan") - before, 1);
    assert_eq!(ext.connection_status(), ConnectionStatus::Error);
    assert_eq!(scan_loop.state(), IDLE);

    let stopped = transport.request_count("/scan");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.request_count("/scan"), stopped);

    // Back online with a scanner
    while rx.try_recv().is_some() {}
    transport.reply("/scan", barcode());
    assert!(ext.update_status(false).await);
    next_event(&mut rx, ExtensionEvent::is_scan_event).await;
    assert_eq!(scan_loop.state(), SCANNING);
    assert!(transport.request_count("/scan") > stopped);
}

#[tokio::test(start_paused = true)]
async fn test_missing_scanner_stops_scanning() {
    let transport = MockTransport::new();
    transport.reply("/status", Reply::Json(200, STATUS_WITH_SCANNER));
    transport.reply("/scan", barcode());
    let ext = extension("scanner.local", 2, transport.clone());
    let mut rx = ext.event_bus().subscribe();
    let scan_loop = BarcodeScanLoop::new(&ext, Duration::from_secs(1));

    assert!(ext.update_status(false).await);
    next_event(&mut rx, ExtensionEvent::is_scan_event).await;

    transport.reply("/scan", Reply::Text(404, ""));
    let before = transport.request_count("/scan");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.request_count("/scan") - before, 1);
    assert!(!ext.has_barcode_scanner());
    assert!(ext.connection_status().is_connected());
    assert_eq!(scan_loop.state(), IDLE);
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_keeps_scanning() {
    let transport = MockTransport::new();
    transport.reply("/status", Reply::Json(200, STATUS_WITH_SCANNER));
    transport.reply("/scan", Reply::Hang);
    let ext = extension("scanner.local", 3, transport.clone());
    let scan_loop = BarcodeScanLoop::new(&ext, Duration::from_secs(1));

    assert!(ext.update_status(false).await);
    tokio::time::sleep(Duration::from_millis(3500)).await;

    // One long poll per second, each timing out without a disconnect
    assert_eq!(transport.request_count("/scan"), 4);
    assert!(ext.connection_status().is_connected());
    assert_eq!(scan_loop.state(), SCANNING);
}
