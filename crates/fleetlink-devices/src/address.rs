//! Per-extension address cache.
//!
//! Each extension keeps the last address its host name resolved to. A
//! lookup that fails or runs out of time falls back to that address instead
//! of failing the request, so an extension that was reachable keeps working
//! through transient name service outages. The cache is only ever replaced
//! by a newer successful lookup, never cleared.

use crate::resolver::NameResolver;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of resolving an extension's host name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The host name resolved just now.
    Fresh(SocketAddr),
    /// The lookup failed; this is the last address that worked.
    Stale(SocketAddr),
    /// The lookup failed and nothing is cached.
    NotFound,
}

impl Resolution {
    pub fn address(&self) -> Option<SocketAddr> {
        match self {
            Self::Fresh(addr) | Self::Stale(addr) => Some(*addr),
            Self::NotFound => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Pick the first IPv4 address, or the first IPv6 address if there is none.
pub fn preferred_address(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.iter().find(|addr| addr.is_ipv6()))
        .copied()
}

/// Cached address of one extension.
pub struct AddressCache {
    hostname: String,
    port: u16,
    cached: RwLock<Option<SocketAddr>>,
    resolver: Arc<dyn NameResolver>,
}

impl AddressCache {
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        initial: Option<SocketAddr>,
        resolver: Arc<dyn NameResolver>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            cached: RwLock::new(initial),
            resolver,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The last successfully resolved (or pre-seeded) address.
    pub fn cached(&self) -> Option<SocketAddr> {
        *self.cached.read()
    }

    /// Resolve the host name within `timeout`, falling back to the cache.
    pub async fn resolve(&self, timeout: Duration) -> Resolution {
        let lookup = tokio::time::timeout(timeout, self.resolver.lookup(&self.hostname, self.port));

        match lookup.await {
            Ok(Ok(addrs)) => match preferred_address(&addrs) {
                Some(addr) => {
                    *self.cached.write() = Some(addr);
                    Resolution::Fresh(addr)
                }
                None => {
                    debug!(hostname = %self.hostname, "Name resolution returned no addresses");
                    self.fallback()
                }
            },
            Ok(Err(e)) => {
                debug!(hostname = %self.hostname, "Name resolution failed: {}", e);
                self.fallback()
            }
            Err(_) => {
                debug!(hostname = %self.hostname, ?timeout, "Name resolution timed out");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> Resolution {
        match self.cached() {
            Some(addr) => Resolution::Stale(addr),
            None => Resolution::NotFound,
        }
    }
}
