//! Single request/response exchange with an extension.
//!
//! A [`Transport`] performs exactly one exchange against an already resolved
//! socket address. It does not retry and does not time out on its own: the
//! caller bounds the exchange and aborts it by dropping the future.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether requests with this method carry a body.
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully prepared request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub address: SocketAddr,
    /// Path including the encoded query string.
    pub path: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A completed exchange, whatever its status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Transport-level failure (refused, reset, unreadable response).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Communication error: {0}")]
    Communication(String),
}

/// Performs one exchange with an extension.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError>;
}

#[cfg(feature = "http")]
pub use self::http::ReqwestTransport;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use reqwest::Client;

    /// [`Transport`] backed by `reqwest`.
    ///
    /// Idle connection pooling is disabled: every exchange asks the
    /// extension to close the connection.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            let client = Client::builder()
                .pool_max_idle_per_host(0)
                .build()
                .unwrap_or_default();
            Self { client }
        }

        pub fn with_client(client: Client) -> Self {
            Self { client }
        }
    }

    impl Default for ReqwestTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn exchange(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            let url = format!("http://{}{}", request.address, request.path);
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self.client.request(method, url);
            for (key, value) in &request.headers {
                // reqwest derives Content-Length from the body itself
                if key.eq_ignore_ascii_case("content-length") {
                    continue;
                }
                builder = builder.header(key.as_str(), value.as_str());
            }
            if request.method.has_body() {
                builder = builder.body(request.body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;

            let code = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(key, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (key.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Communication(e.to_string()))?
                .to_vec();

            Ok(TransportResponse {
                code,
                headers,
                body,
            })
        }
    }
}
