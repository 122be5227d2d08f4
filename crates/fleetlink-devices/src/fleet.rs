//! Fleet of extensions.
//!
//! The fleet manager owns its member extensions together with their scan
//! loops and keeps fleet-wide knowledge up to date:
//!
//! - a periodic status refresh of every member,
//! - the aggregated connection status,
//! - printer and barcode scanner availability,
//! - backoff recovery of members that lost their connection.
//!
//! Member events are forwarded by one listener task per member. Barcodes
//! scanned by members are re-published as fleet events.

use crate::extension::Extension;
use crate::scanner::{BarcodeScanLoop, ScanLoopState};
use fleetlink_core::{
    Capability, ConnectionStatus, EventBus, EventBusReceiver, ExtensionEvent, ExtensionId,
    FleetConfig, Result,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Reduce member statuses to the fleet status.
///
/// Connected if any member is connected, otherwise Error if any member
/// failed, otherwise Initialized.
pub fn aggregate_connection_status<I>(statuses: I) -> ConnectionStatus
where
    I: IntoIterator<Item = ConnectionStatus>,
{
    statuses
        .into_iter()
        .fold(ConnectionStatus::Initialized, |fleet, member| match fleet {
            ConnectionStatus::Initialized => member,
            ConnectionStatus::Connected => ConnectionStatus::Connected,
            ConnectionStatus::Error => {
                if member.is_connected() {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Error
                }
            }
        })
}

struct Member {
    extension: Arc<Extension>,
    scan_loop: BarcodeScanLoop,
    forwarder: JoinHandle<()>,
}

impl Drop for Member {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

struct FleetState {
    members: Vec<Member>,
    connection_status: ConnectionStatus,
    printer_available: bool,
    barcode_scanner_available: bool,
    recovering: HashSet<ExtensionId>,
}

struct RefreshSettings {
    interval: Duration,
    periodic: bool,
}

struct FleetInner {
    state: RwLock<FleetState>,
    settings: RwLock<RefreshSettings>,
    settings_changed: Notify,
    config: FleetConfig,
    event_bus: EventBus,
}

/// A set of extensions managed together.
///
/// Must be created within a Tokio runtime. Dropping the manager stops the
/// periodic refresh, the member listeners and the scan loops.
pub struct FleetManager {
    inner: Arc<FleetInner>,
    refresher: JoinHandle<()>,
}

impl FleetManager {
    pub fn new(config: FleetConfig) -> Result<Self> {
        Self::with_event_bus(config, EventBus::with_name("fleet"))
    }

    /// Fleet manager publishing its fleet events onto `event_bus`.
    pub fn with_event_bus(config: FleetConfig, event_bus: EventBus) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(FleetInner {
            state: RwLock::new(FleetState {
                members: Vec::new(),
                connection_status: ConnectionStatus::Initialized,
                printer_available: false,
                barcode_scanner_available: false,
                recovering: HashSet::new(),
            }),
            settings: RwLock::new(RefreshSettings {
                interval: config.update_status_interval(),
                periodic: config.periodic_refresh,
            }),
            settings_changed: Notify::new(),
            config,
            event_bus,
        });

        let refresher = tokio::spawn(run_periodic_refresh(Arc::downgrade(&inner)));

        Ok(Self { inner, refresher })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// Subscribe to fleet events.
    pub fn subscribe(&self) -> EventBusReceiver {
        self.inner.event_bus.subscribe()
    }

    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    /// Add an extension unless one with the same identity is a member.
    ///
    /// Returns `true` if the extension was added. Adding attaches a scan
    /// loop and a listener, then refreshes the whole fleet.
    pub fn add_extension(&self, extension: Arc<Extension>) -> bool {
        let inserted = {
            let mut state = self.inner.state.write();
            if state.members.iter().any(|m| m.extension.id() == extension.id()) {
                false
            } else {
                let member = self.inner.attach(extension.clone());
                state.members.push(member);
                true
            }
        };

        if inserted {
            info!(extension = %extension.id(), "Extension added to fleet");
            self.spawn_refresh_all();
            self.inner.update_connection_status();
            self.inner.update_availability();
        }

        inserted
    }

    /// Remove the member with identity `id`.
    ///
    /// Its scan loop and listener are stopped before this returns.
    pub fn remove_extension(&self, id: &ExtensionId) -> bool {
        let removed = {
            let mut state = self.inner.state.write();
            state.recovering.remove(id);
            state
                .members
                .iter()
                .position(|m| m.extension.id() == id)
                .map(|index| state.members.remove(index))
        };

        let Some(member) = removed else {
            return false;
        };
        drop(member);

        info!(extension = %id, "Extension removed from fleet");
        self.spawn_refresh_all();
        self.inner.update_connection_status();
        self.inner.update_availability();

        true
    }

    pub fn find_extension(&self, hostname: &str, port: u16) -> Option<Arc<Extension>> {
        self.inner.find(&ExtensionId::new(hostname, port))
    }

    pub fn has_extension(&self, id: &ExtensionId) -> bool {
        self.inner.find(id).is_some()
    }

    /// Members in insertion order.
    pub fn extensions(&self) -> Vec<Arc<Extension>> {
        self.inner.extensions()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn any_extension<F>(&self, predicate: F) -> bool
    where
        F: Fn(&Extension) -> bool,
    {
        let state = self.inner.state.read();
        state.members.iter().any(|m| predicate(&m.extension))
    }

    /// `true` for an empty fleet.
    pub fn all_extensions<F>(&self, predicate: F) -> bool
    where
        F: Fn(&Extension) -> bool,
    {
        let state = self.inner.state.read();
        state.members.iter().all(|m| predicate(&m.extension))
    }

    pub fn for_each_extension<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Extension>),
    {
        for extension in self.extensions() {
            f(&extension);
        }
    }

    pub fn scan_loop_state(&self, id: &ExtensionId) -> Option<ScanLoopState> {
        let state = self.inner.state.read();
        state
            .members
            .iter()
            .find(|m| m.extension.id() == id)
            .map(|m| m.scan_loop.state())
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.read().connection_status
    }

    pub fn is_printer_available(&self) -> bool {
        self.inner.state.read().printer_available
    }

    pub fn is_barcode_scanner_available(&self) -> bool {
        self.inner.state.read().barcode_scanner_available
    }

    pub fn is_recovering(&self, id: &ExtensionId) -> bool {
        self.inner.state.read().recovering.contains(id)
    }

    pub fn update_status_interval(&self) -> Duration {
        self.inner.settings.read().interval
    }

    pub fn set_update_status_interval(&self, interval: Duration) {
        self.inner.settings.write().interval = interval;
        self.inner.settings_changed.notify_one();
    }

    pub fn periodic_refresh(&self) -> bool {
        self.inner.settings.read().periodic
    }

    pub fn set_periodic_refresh(&self, enabled: bool) {
        self.inner.settings.write().periodic = enabled;
        self.inner.settings_changed.notify_one();
    }

    /// Refresh the status of every member concurrently.
    ///
    /// Completes once every member's refresh has completed. Returns how many
    /// members answered with a status payload.
    pub async fn refresh_all(&self) -> usize {
        self.inner.refresh_all().await
    }

    /// Start [`refresh_all`](Self::refresh_all) without waiting for it.
    pub fn spawn_refresh_all(&self) -> JoinHandle<usize> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.refresh_all().await })
    }
}

impl Drop for FleetManager {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}

impl FleetInner {
    fn find(&self, id: &ExtensionId) -> Option<Arc<Extension>> {
        let state = self.state.read();
        state
            .members
            .iter()
            .find(|m| m.extension.id() == id)
            .map(|m| Arc::clone(&m.extension))
    }

    fn extensions(&self) -> Vec<Arc<Extension>> {
        let state = self.state.read();
        state.members.iter().map(|m| Arc::clone(&m.extension)).collect()
    }

    fn update_status_interval(&self) -> Duration {
        self.settings.read().interval
    }

    /// Build the scan loop and event listener of a new member.
    fn attach(self: &Arc<Self>, extension: Arc<Extension>) -> Member {
        let scan_loop = BarcodeScanLoop::new(&extension, self.config.client.scan_timeout());

        let mut rx = extension
            .event_bus()
            .filter()
            .extension_by_id(extension.id().clone());
        let weak = Arc::downgrade(self);
        let forwarder = tokio::spawn(async move {
            while let Some((event, _)) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_member_event(event);
            }
        });

        Member {
            extension,
            scan_loop,
            forwarder,
        }
    }

    fn handle_member_event(self: &Arc<Self>, event: ExtensionEvent) {
        let Some(id) = event.extension().cloned() else {
            return;
        };
        if self.find(&id).is_none() {
            return;
        }

        match event {
            ExtensionEvent::ConnectionStatusChanged { new_status, .. } => {
                self.update_connection_status();
                self.update_availability();
                if !new_status.is_connected() {
                    self.schedule_recovery(id);
                }
            }
            ExtensionEvent::StatusUpdated { .. } | ExtensionEvent::CapabilityChanged { .. } => {
                self.update_availability();
            }
            ExtensionEvent::BarcodeScanned { extension, code } => {
                self.event_bus
                    .publish(ExtensionEvent::FleetBarcodeScanned { extension, code });
            }
            _ => {}
        }
    }

    async fn refresh_all(&self) -> usize {
        let extensions = self.extensions();
        debug!(count = extensions.len(), "Refreshing fleet status");

        let mut tasks = JoinSet::new();
        for extension in extensions {
            tasks.spawn(async move { extension.update_status(false).await });
        }

        let mut refreshed = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => warn!("Status refresh task failed: {}", e),
            }
        }

        self.update_connection_status();
        self.update_availability();

        refreshed
    }

    fn update_connection_status(&self) {
        let mut state = self.state.write();
        let new_status = aggregate_connection_status(
            state
                .members
                .iter()
                .map(|m| m.extension.connection_status()),
        );
        let old_status = state.connection_status;
        if new_status == old_status {
            return;
        }

        state.connection_status = new_status;
        info!(%old_status, %new_status, "Fleet connection status changed");
        self.event_bus
            .publish(ExtensionEvent::FleetConnectionStatusChanged {
                old_status,
                new_status,
            });
    }

    fn update_availability(&self) {
        let mut state = self.state.write();
        let available = |capability: Capability| {
            state.members.iter().any(|m| {
                m.extension.connection_status().is_connected()
                    && m.extension.has_capability(capability)
            })
        };
        let printer = available(Capability::Printer);
        let barcode_scanner = available(Capability::BarcodeScanner);

        if printer != state.printer_available {
            state.printer_available = printer;
            self.publish_availability(Capability::Printer, printer);
        }
        if barcode_scanner != state.barcode_scanner_available {
            state.barcode_scanner_available = barcode_scanner;
            self.publish_availability(Capability::BarcodeScanner, barcode_scanner);
        }
    }

    fn publish_availability(&self, capability: Capability, available: bool) {
        info!(%capability, available, "Fleet capability availability changed");
        self.event_bus.publish(ExtensionEvent::FleetCapabilityChanged {
            capability,
            available,
        });
    }

    /// Retry `extension` with a doubling delay until it reconnects.
    ///
    /// Gives up once the next delay would reach the update interval; the
    /// periodic refresh takes over from there.
    fn schedule_recovery(self: &Arc<Self>, id: ExtensionId) {
        if !self.state.write().recovering.insert(id.clone()) {
            return;
        }

        debug!(extension = %id, "Scheduling connection recovery");
        let weak = Arc::downgrade(self);
        let mut delay = self.config.recovery_initial_delay();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Some(extension) = inner.find(&id) else {
                    break;
                };

                debug!(extension = %id, ?delay, "Recovery attempt");
                extension.update_status(false).await;

                let next = delay * 2;
                if extension.connection_status().is_connected()
                    || next >= inner.update_status_interval()
                {
                    break;
                }
                delay = next;
            }

            if let Some(inner) = weak.upgrade() {
                inner.state.write().recovering.remove(&id);
            }
        });
    }
}

async fn run_periodic_refresh(weak: Weak<FleetInner>) {
    let mut refresh = true;
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        let periodic = inner.settings.read().periodic;
        if refresh && periodic {
            inner.refresh_all().await;
        }

        let interval = inner.update_status_interval();
        refresh = tokio::select! {
            _ = tokio::time::sleep(interval) => true,
            _ = inner.settings_changed.notified() => false,
        };
    }
}
