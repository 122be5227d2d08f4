//! Host name resolution.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Resolves an extension host name to socket addresses.
///
/// Implementations do not need to enforce a timeout; callers bound every
/// lookup themselves.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn lookup(&self, hostname: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn lookup(&self, hostname: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((hostname, port)).await?;
        Ok(addrs.collect())
    }
}
