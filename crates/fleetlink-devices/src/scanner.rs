//! Continuous barcode polling for one extension.
//!
//! The loop is active while its extension is connected and reports a
//! scanner. Each iteration is one long-poll `/scan` request; a read barcode
//! is published as [`ExtensionEvent::BarcodeScanned`] on the extension's bus
//! and the next request is issued right away.

use crate::extension::Extension;
use fleetlink_core::{Capability, EventBus, ExtensionEvent, ExtensionId};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, trace};

/// Snapshot of a scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLoopState {
    /// No new scan will be issued.
    pub idle: bool,
    /// A scan request is in flight.
    pub scanning: bool,
}

#[derive(Debug)]
struct LoopState {
    idle: bool,
    scanning: bool,
    task: Option<AbortHandle>,
}

struct ScanLoopShared {
    id: ExtensionId,
    extension: Weak<Extension>,
    event_bus: EventBus,
    scan_timeout: Duration,
    state: Mutex<LoopState>,
}

/// Barcode scan loop of one extension.
///
/// Holds only a weak handle to the extension. Dropping the loop stops it:
/// the listener is aborted and so is a scan in flight.
pub struct BarcodeScanLoop {
    shared: Arc<ScanLoopShared>,
    listener: JoinHandle<()>,
}

impl BarcodeScanLoop {
    /// Attach a scan loop to `extension`.
    ///
    /// Scanning starts immediately if the extension is already connected
    /// with a scanner. Must be called within a Tokio runtime.
    pub fn new(extension: &Arc<Extension>, scan_timeout: Duration) -> Self {
        let shared = Arc::new(ScanLoopShared {
            id: extension.id().clone(),
            extension: Arc::downgrade(extension),
            event_bus: extension.event_bus().clone(),
            scan_timeout,
            state: Mutex::new(LoopState {
                idle: true,
                scanning: false,
                task: None,
            }),
        });

        let mut rx = extension
            .event_bus()
            .filter()
            .extension_by_id(extension.id().clone());
        let listener = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                while let Some((event, _)) = rx.recv().await {
                    match event {
                        ExtensionEvent::ConnectionStatusChanged { .. }
                        | ExtensionEvent::CapabilityChanged {
                            capability: Capability::BarcodeScanner,
                            ..
                        } => shared.reconsider(),
                        _ => {}
                    }
                }
            })
        };

        shared.reconsider();

        Self { shared, listener }
    }

    pub fn extension_id(&self) -> &ExtensionId {
        &self.shared.id
    }

    pub fn state(&self) -> ScanLoopState {
        let state = self.shared.state.lock();
        ScanLoopState {
            idle: state.idle,
            scanning: state.scanning,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().idle
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().scanning
    }
}

impl Drop for BarcodeScanLoop {
    fn drop(&mut self) {
        self.listener.abort();

        let mut state = self.shared.state.lock();
        state.idle = true;
        state.scanning = false;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        debug!(extension = %self.shared.id, "Scan loop stopped");
    }
}

impl ScanLoopShared {
    /// Start or stop scanning to match the extension's current state.
    fn reconsider(self: &Arc<Self>) {
        let active = self
            .extension
            .upgrade()
            .is_some_and(|ext| ext.connection_status().is_connected() && ext.has_barcode_scanner());

        let mut state = self.state.lock();
        if !active {
            if !state.idle {
                debug!(extension = %self.id, "Scan loop idle");
            }
            state.idle = true;
            return;
        }

        state.idle = false;
        if !state.scanning {
            debug!(extension = %self.id, "Scan loop started");
            state.scanning = true;
            let shared = Arc::clone(self);
            let task = tokio::spawn(async move { shared.run().await });
            state.task = Some(task.abort_handle());
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            let Some(ext) = self.extension.upgrade() else {
                let mut state = self.state.lock();
                state.idle = true;
                state.scanning = false;
                state.task = None;
                return;
            };
            let code = ext.scan_barcode(self.scan_timeout).await;

            // Checked under the loop lock so a concurrent reconsider cannot
            // be overwritten with a stale decision.
            let mut state = self.state.lock();
            if !(ext.connection_status().is_connected() && ext.has_barcode_scanner()) {
                if !state.idle {
                    debug!(extension = %self.id, "Scan loop idle");
                }
                state.idle = true;
            }
            drop(ext);

            if let Some(code) = code {
                if state.scanning {
                    trace!(extension = %self.id, %code, "Barcode scanned");
                    self.event_bus.publish(ExtensionEvent::BarcodeScanned {
                        extension: self.id.clone(),
                        code,
                    });
                }
            }

            if state.idle {
                state.scanning = false;
                state.task = None;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NameResolver;
    use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use std::io;
    use std::net::SocketAddr;

    /// Answers `/status` with a scanner and `/scan` with a fixed code.
    struct ScannerTransport;

    #[async_trait]
    impl Transport for ScannerTransport {
        async fn exchange(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            let body = if request.path.starts_with("/status") {
                r#"{"barcodes": ["scanner"], "printers": []}"#
            } else {
                tokio::time::sleep(Duration::from_millis(50)).await;
                "4901234567894"
            };
            Ok(TransportResponse {
                code: 200,
                headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                body: body.as_bytes().to_vec(),
            })
        }
    }

    struct NoResolver;

    #[async_trait]
    impl NameResolver for NoResolver {
        async fn lookup(&self, _hostname: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    fn extension() -> Arc<Extension> {
        Arc::new(
            Extension::builder("ext.local", 80)
                .address("192.168.0.10")
                .resolver(Arc::new(NoResolver))
                .transport(Arc::new(ScannerTransport))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let ext = extension();
        let scan_loop = BarcodeScanLoop::new(&ext, Duration::from_secs(1));
        assert_eq!(
            scan_loop.state(),
            ScanLoopState {
                idle: true,
                scanning: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scans_once_connected_with_scanner() {
        let ext = extension();
        let mut rx = ext.event_bus().filter().scan_events();
        let scan_loop = BarcodeScanLoop::new(&ext, Duration::from_secs(1));

        assert!(ext.update_status(false).await);

        let (event, _) = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ExtensionEvent::BarcodeScanned {
                extension: ext.id().clone(),
                code: "4901234567894".to_string(),
            }
        );
        assert!(!scan_loop.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_scanning() {
        let ext = extension();
        assert!(ext.update_status(false).await);

        let scan_loop = BarcodeScanLoop::new(&ext, Duration::from_secs(1));
        assert!(scan_loop.is_scanning());
        let shared = Arc::clone(&scan_loop.shared);
        drop(scan_loop);

        let state = shared.state.lock();
        assert!(state.idle);
        assert!(!state.scanning);
        assert!(state.task.is_none());
    }
}
