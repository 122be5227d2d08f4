//! mDNS discovery backend.
//!
//! `mdns-sd` resolves instances while browsing, so an announcement is only
//! forwarded once its host and port are known and [`resolve`] is a lookup
//! in the table the browse loop maintains.
//!
//! [`resolve`]: ServiceDiscovery::resolve

use crate::browser::{ResolvedService, ServiceAnnouncement, ServiceDiscovery};
use async_trait::async_trait;
use fleetlink_core::{discovery_err, Result};
use futures::stream::{self, BoxStream, StreamExt};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// [`ServiceDiscovery`] over multicast DNS.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    /// Resolved instances by full name.
    resolved: Arc<RwLock<HashMap<String, ResolvedService>>>,
}

impl MdnsDiscovery {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| discovery_err!("failed to start mDNS daemon: {}", e))?;
        Ok(Self {
            daemon,
            resolved: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS daemon shutdown failed: {}", e);
        }
    }
}

/// `_ubiregiex._tcp.` + `local.` as the daemon expects it.
fn browse_type(service_type: &str, domain: &str) -> String {
    format!("{}{}", service_type, domain)
}

#[async_trait]
impl ServiceDiscovery for MdnsDiscovery {
    fn search(
        &self,
        service_type: &str,
        domain: &str,
    ) -> Result<BoxStream<'static, ServiceAnnouncement>> {
        let ty_domain = browse_type(service_type, domain);
        let events = self
            .daemon
            .browse(&ty_domain)
            .map_err(|e| discovery_err!("failed to browse {}: {}", ty_domain, e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let resolved = Arc::clone(&self.resolved);
        let service_type = service_type.to_string();
        let domain = domain.to_string();

        // The daemon channel is synchronous; it closes when the browse stops.
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = events.recv() {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let name = info.get_fullname().to_string();
                        trace!(service = %name, "mDNS service resolved");
                        resolved.write().insert(
                            name.clone(),
                            ResolvedService {
                                host: info.get_hostname().to_string(),
                                port: info.get_port(),
                            },
                        );
                        let announcement = ServiceAnnouncement {
                            name,
                            service_type: service_type.clone(),
                            domain: domain.clone(),
                        };
                        if tx.send(announcement).is_err() {
                            break;
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, name) => {
                        resolved.write().remove(&name);
                    }
                    ServiceEvent::SearchStopped(_) => break,
                    _ => {}
                }
            }
        });

        let announcements = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|announcement| (announcement, rx))
        });
        Ok(announcements.boxed())
    }

    async fn resolve(&self, announcement: &ServiceAnnouncement) -> Result<ResolvedService> {
        self.resolved
            .read()
            .get(&announcement.name)
            .cloned()
            .ok_or_else(|| discovery_err!("{} is not resolved", announcement.name))
    }

    fn stop(&self, service_type: &str, domain: &str) -> Result<()> {
        let ty_domain = browse_type(service_type, domain);
        self.daemon
            .stop_browse(&ty_domain)
            .map_err(|e| discovery_err!("failed to stop browsing {}: {}", ty_domain, e))
    }
}
