//! Extension discovery.
//!
//! The browser searches for two kinds of announcements: extensions, which
//! announce the port they listen on, and workstations, which run the
//! extension protocol on a fixed port. Every resolved announcement is probed
//! with a throwaway [`Extension`] before it is reported, so only live
//! extensions produce [`ExtensionEvent::ExtensionFound`].

use crate::extension::Extension;
use crate::resolver::NameResolver;
use crate::transport::Transport;
use async_trait::async_trait;
use fleetlink_core::{BrowserConfig, EventBus, EventBusReceiver, ExtensionEvent, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// A service instance seen on the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAnnouncement {
    pub name: String,
    pub service_type: String,
    pub domain: String,
}

/// Where an announced service can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub host: String,
    pub port: u16,
}

/// Network service discovery backend.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Start searching for `service_type` in `domain`.
    ///
    /// The stream ends when the search is stopped.
    fn search(
        &self,
        service_type: &str,
        domain: &str,
    ) -> Result<BoxStream<'static, ServiceAnnouncement>>;

    /// Resolve an announcement to a host and port.
    ///
    /// Implementations need not bound the lookup; the browser does.
    async fn resolve(&self, announcement: &ServiceAnnouncement) -> Result<ResolvedService>;

    /// Stop a search started by [`search`](Self::search).
    fn stop(&self, service_type: &str, domain: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceKind {
    Extension,
    Workstation,
}

struct BrowserInner {
    discovery: Arc<dyn ServiceDiscovery>,
    config: BrowserConfig,
    event_bus: EventBus,
    resolver: Option<Arc<dyn NameResolver>>,
    transport: Option<Arc<dyn Transport>>,
    in_flight: Mutex<HashSet<ServiceAnnouncement>>,
}

/// Finds live extensions on the local network.
///
/// Dropping the browser stops its searches.
pub struct ExtensionBrowser {
    inner: Arc<BrowserInner>,
    searches: Mutex<Vec<JoinHandle<()>>>,
}

impl ExtensionBrowser {
    pub fn new(discovery: Arc<dyn ServiceDiscovery>, config: BrowserConfig) -> Result<Self> {
        Self::builder(discovery).config(config).build()
    }

    pub fn builder(discovery: Arc<dyn ServiceDiscovery>) -> ExtensionBrowserBuilder {
        ExtensionBrowserBuilder::new(discovery)
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// Subscribe to discovery events.
    pub fn subscribe(&self) -> EventBusReceiver {
        self.inner.event_bus.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.searches.lock().is_empty()
    }

    /// Start both searches. Does nothing if already running.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut searches = self.searches.lock();
        if !searches.is_empty() {
            return Ok(());
        }

        let config = &self.inner.config;
        let kinds = [
            (ServiceKind::Extension, &config.extension_service_type),
            (ServiceKind::Workstation, &config.workstation_service_type),
        ];

        for (kind, service_type) in kinds {
            let stream = match self.inner.discovery.search(service_type, &config.domain) {
                Ok(stream) => stream,
                Err(e) => {
                    for search in searches.drain(..) {
                        search.abort();
                    }
                    self.inner.stop_discovery();
                    return Err(e);
                }
            };

            info!(service_type = %service_type, domain = %config.domain, "Searching for services");
            let inner = Arc::clone(&self.inner);
            searches.push(tokio::spawn(run_search(inner, kind, stream)));
        }

        Ok(())
    }

    /// Stop both searches and abandon announcements being probed.
    pub fn stop(&self) {
        let searches: Vec<_> = self.searches.lock().drain(..).collect();
        if searches.is_empty() {
            return;
        }

        for search in searches {
            search.abort();
        }
        self.inner.stop_discovery();
        self.inner.in_flight.lock().clear();
        info!("Service search stopped");
    }
}

impl Drop for ExtensionBrowser {
    fn drop(&mut self) {
        self.stop();
    }
}

impl BrowserInner {
    fn stop_discovery(&self) {
        for service_type in [
            &self.config.extension_service_type,
            &self.config.workstation_service_type,
        ] {
            if let Err(e) = self.discovery.stop(service_type, &self.config.domain) {
                warn!(service_type = %service_type, "Failed to stop service search: {}", e);
            }
        }
    }

    async fn handle(&self, kind: ServiceKind, announcement: &ServiceAnnouncement) {
        let resolve = self.discovery.resolve(announcement);
        let resolved = match tokio::time::timeout(self.config.resolve_timeout(), resolve).await {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                debug!(service = %announcement.name, "Service did not resolve: {}", e);
                return;
            }
            Err(_) => {
                debug!(service = %announcement.name, "Service resolution timed out");
                return;
            }
        };

        let host = resolved.host.trim_matches('.').to_string();
        let port = match kind {
            ServiceKind::Extension => resolved.port,
            ServiceKind::Workstation => self.config.workstation_port,
        };

        if self.probe(&host, port).await {
            info!(host = %host, port, "Extension found");
            self.event_bus
                .publish(ExtensionEvent::ExtensionFound { host, port });
        } else {
            debug!(host = %host, port, "Service is not a live extension");
        }
    }

    /// Whether `host:port` answers `/status` like an extension.
    ///
    /// Tries once, then up to `max_retry` more times.
    async fn probe(&self, host: &str, port: u16) -> bool {
        let extension = match self.probe_extension(host, port) {
            Ok(extension) => extension,
            Err(e) => {
                warn!(host, port, "Cannot probe service: {}", e);
                return false;
            }
        };

        for attempt in 0..=self.config.max_retry {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay()).await;
            }

            extension.update_status(false).await;
            if extension.connection_status().is_connected() && extension.status().is_some() {
                return true;
            }
            debug!(host, port, attempt, "Probe failed");
        }

        false
    }

    fn probe_extension(&self, host: &str, port: u16) -> Result<Extension> {
        let mut builder = Extension::builder(host, port).config(self.config.client.clone());
        if let Some(resolver) = &self.resolver {
            builder = builder.resolver(Arc::clone(resolver));
        }
        if let Some(transport) = &self.transport {
            builder = builder.transport(Arc::clone(transport));
        }
        builder.build()
    }
}

async fn run_search(
    inner: Arc<BrowserInner>,
    kind: ServiceKind,
    mut announcements: BoxStream<'static, ServiceAnnouncement>,
) {
    let mut probes = JoinSet::new();

    loop {
        tokio::select! {
            announcement = announcements.next() => {
                let Some(announcement) = announcement else {
                    break;
                };
                if !inner.in_flight.lock().insert(announcement.clone()) {
                    debug!(service = %announcement.name, "Service already being handled");
                    continue;
                }

                let inner = Arc::clone(&inner);
                probes.spawn(async move {
                    inner.handle(kind, &announcement).await;
                    inner.in_flight.lock().remove(&announcement);
                });
            }
            Some(result) = probes.join_next(), if !probes.is_empty() => {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        warn!("Service probe task failed: {}", e);
                    }
                }
            }
        }
    }

    while probes.join_next().await.is_some() {}
}

/// Builder for [`ExtensionBrowser`].
pub struct ExtensionBrowserBuilder {
    discovery: Arc<dyn ServiceDiscovery>,
    config: BrowserConfig,
    event_bus: Option<EventBus>,
    resolver: Option<Arc<dyn NameResolver>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ExtensionBrowserBuilder {
    pub fn new(discovery: Arc<dyn ServiceDiscovery>) -> Self {
        Self {
            discovery,
            config: BrowserConfig::default(),
            event_bus: None,
            resolver: None,
            transport: None,
        }
    }

    pub fn config(mut self, config: BrowserConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Resolver of the probe extensions.
    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Transport of the probe extensions.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<ExtensionBrowser> {
        self.config.validate()?;

        Ok(ExtensionBrowser {
            inner: Arc::new(BrowserInner {
                discovery: self.discovery,
                config: self.config,
                event_bus: self
                    .event_bus
                    .unwrap_or_else(|| EventBus::with_name("browser")),
                resolver: self.resolver,
                transport: self.transport,
                in_flight: Mutex::new(HashSet::new()),
            }),
            searches: Mutex::new(Vec::new()),
        })
    }
}
