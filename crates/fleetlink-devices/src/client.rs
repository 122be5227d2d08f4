//! Timed request client for one extension.

use crate::address::{AddressCache, Resolution};
use crate::resolver::NameResolver;
use crate::response::{ApiError, ApiResponse, SuccessResponse};
use crate::transport::{HttpMethod, Transport, TransportRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Shortest abort delay, used when resolution already ate the whole budget.
const MIN_ABORT_DELAY: Duration = Duration::from_millis(100);

/// Issues single, timed requests against one extension.
///
/// The host name is resolved through the extension's [`AddressCache`] before
/// every request. The client never retries; retry policy belongs to callers.
pub struct ApiClient {
    hostname: String,
    port: u16,
    addresses: AddressCache,
    transport: Arc<dyn Transport>,
    resolve_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        address: Option<SocketAddr>,
        resolver: Arc<dyn NameResolver>,
        transport: Arc<dyn Transport>,
        resolve_timeout: Duration,
    ) -> Self {
        let hostname = hostname.into();
        Self {
            addresses: AddressCache::new(hostname.clone(), port, address, resolver),
            hostname,
            port,
            transport,
            resolve_timeout,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addresses(&self) -> &AddressCache {
        &self.addresses
    }

    /// Send one request and classify the outcome.
    ///
    /// The exchange is aborted once `timeout` has elapsed since the call,
    /// name resolution included.
    pub async fn send(
        &self,
        path: &str,
        query: &[(&str, &str)],
        method: HttpMethod,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> ApiResponse {
        let started_at = Instant::now();

        let resolution = self.addresses.resolve(self.resolve_timeout).await;
        let (address, fresh) = match resolution {
            Resolution::Fresh(addr) => (addr, true),
            Resolution::Stale(addr) => (addr, false),
            Resolution::NotFound => {
                debug!(hostname = %self.hostname, path, "No address for request");
                return ApiResponse::Failure(ApiError::NameResolution);
            }
        };

        let body = body.unwrap_or_default();
        let request = TransportRequest {
            address,
            path: path_with_query(path, query),
            method,
            headers: self.default_headers(fresh, method, body.len()),
            body,
        };

        let abort_after = timeout
            .saturating_sub(started_at.elapsed())
            .max(MIN_ABORT_DELAY);

        match tokio::time::timeout(abort_after, self.transport.exchange(request)).await {
            Ok(Ok(response)) => {
                debug!(hostname = %self.hostname, path, code = response.code, "Request completed");
                ApiResponse::Success(SuccessResponse::new(
                    response.code,
                    response.headers,
                    response.body,
                ))
            }
            Ok(Err(e)) => {
                debug!(hostname = %self.hostname, path, "Request failed: {}", e);
                ApiResponse::Failure(ApiError::ConnectionFailure)
            }
            Err(_) => {
                debug!(hostname = %self.hostname, path, ?timeout, "Request aborted");
                ApiResponse::Failure(ApiError::Timeout)
            }
        }
    }

    fn default_headers(
        &self,
        fresh: bool,
        method: HttpMethod,
        body_len: usize,
    ) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Connection".to_string(), "close".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];

        // A stale address may no longer belong to this host name
        if fresh {
            headers.push(("Host".to_string(), self.hostname.clone()));
        }

        if method.has_body() {
            headers.push(("Content-Length".to_string(), body_len.to_string()));
        }

        headers
    }
}

/// Append percent-encoded query parameters to `path`, in order.
pub fn path_with_query(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }

    let query = query
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", path, query)
}
