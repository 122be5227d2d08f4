//! A single extension and its connection health.
//!
//! Every completed request drives the connection state machine:
//!
//! ```text
//! Initialized ──success──▶ Connected ◀──success── Error
//!      │                      │                     ▲
//!      └────────failure───────┴───────failure───────┘
//! ```
//!
//! A timeout on a request issued with `allow_timeout` (the long-poll scan)
//! leaves the state alone. Transitions and capability flips are published on
//! the extension's event bus while its state lock is held, so subscribers see
//! them in the order they happened.

use crate::client::ApiClient;
use crate::resolver::{NameResolver, SystemResolver};
use crate::response::{ApiError, ApiResponse};
use crate::transport::{HttpMethod, Transport};
use crate::version::{ExtensionVersion, DEFAULT_VERSION};
use fleetlink_core::{
    config_err, Capability, ClientConfig, ConnectionStatus, EventBus, ExtensionEvent,
    ExtensionId, Result,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ExtensionState {
    status: Option<Value>,
    connection_status: ConnectionStatus,
    has_printer: bool,
    has_barcode_scanner: bool,
}

/// One LAN-attached extension.
pub struct Extension {
    id: ExtensionId,
    client: ApiClient,
    state: RwLock<ExtensionState>,
    /// At most one `/status` request in flight.
    status_gate: tokio::sync::Mutex<()>,
    /// At most one `/scan` request in flight.
    scan_gate: tokio::sync::Mutex<()>,
    event_bus: EventBus,
    config: ClientConfig,
}

impl Extension {
    /// Extension with the system resolver and the default transport.
    ///
    /// `address` is an optional numeric IP used until the host name resolves.
    pub fn new(hostname: impl Into<String>, port: u16, address: Option<&str>) -> Result<Self> {
        let mut builder = Self::builder(hostname, port);
        if let Some(address) = address {
            builder = builder.address(address);
        }
        builder.build()
    }

    pub fn builder(hostname: impl Into<String>, port: u16) -> ExtensionBuilder {
        ExtensionBuilder::new(hostname, port)
    }

    pub fn id(&self) -> &ExtensionId {
        &self.id
    }

    pub fn hostname(&self) -> &str {
        &self.id.hostname
    }

    pub fn port(&self) -> u16 {
        self.id.port
    }

    /// Last address the host name resolved to, or the seeded one.
    pub fn address(&self) -> Option<SocketAddr> {
        self.client.addresses().cached()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state.read().connection_status
    }

    /// Last `/status` payload, if one was received.
    pub fn status(&self) -> Option<Value> {
        self.state.read().status.clone()
    }

    pub fn has_printer(&self) -> bool {
        self.state.read().has_printer
    }

    pub fn has_barcode_scanner(&self) -> bool {
        self.state.read().has_barcode_scanner
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::Printer => self.has_printer(),
            Capability::BarcodeScanner => self.has_barcode_scanner(),
        }
    }

    /// Firmware version from the last status payload.
    ///
    /// `None` before the first payload, `1.0.0` when the payload has no
    /// version or an unparseable one.
    pub fn version(&self) -> Option<ExtensionVersion> {
        let state = self.state.read();
        let status = state.status.as_ref()?;
        let version = status
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_VERSION);

        match version.parse() {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(extension = %self.id, "Ignoring extension version: {}", e);
                Some(ExtensionVersion::default())
            }
        }
    }

    /// Send one request with an optional JSON body.
    ///
    /// The outcome drives the connection state machine. With `allow_timeout`
    /// a timed out request does not count against the extension.
    pub async fn request_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        method: HttpMethod,
        body: Option<&Value>,
        timeout: Duration,
        allow_timeout: bool,
    ) -> ApiResponse {
        let body = body.map(|json| json.to_string().into_bytes());
        let response = self.client.send(path, query, method, body, timeout).await;

        let next = match &response {
            ApiResponse::Success(_) => Some(ConnectionStatus::Connected),
            ApiResponse::Failure(ApiError::Timeout) if allow_timeout => None,
            ApiResponse::Failure(_) => Some(ConnectionStatus::Error),
        };
        if let Some(status) = next {
            self.set_connection_status(status);
        }

        response
    }

    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> ApiResponse {
        self.request_json(path, query, HttpMethod::Get, None, timeout, false)
            .await
    }

    pub async fn post_json(&self, path: &str, body: &Value, timeout: Duration) -> ApiResponse {
        self.request_json(path, &[], HttpMethod::Post, Some(body), timeout, false)
            .await
    }

    pub async fn put_json(&self, path: &str, body: &Value, timeout: Duration) -> ApiResponse {
        self.request_json(path, &[], HttpMethod::Put, Some(body), timeout, false)
            .await
    }

    pub async fn delete_json(&self, path: &str, timeout: Duration) -> ApiResponse {
        self.request_json(path, &[], HttpMethod::Delete, None, timeout, false)
            .await
    }

    /// Fetch `/status` and refresh the cached payload and capability flags.
    ///
    /// Returns `true` if an HTTP 200 response replaced the payload. Calls
    /// queue behind a status request that is already in flight.
    pub async fn update_status(&self, reload: bool) -> bool {
        let _gate = self.status_gate.lock().await;

        let timestamp = chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%z")
            .to_string();
        let reload = if reload { "true" } else { "false" };
        let query = [("timestamp", timestamp.as_str()), ("reload", reload)];

        let response = self
            .get_json("/status", &query, self.config.request_timeout())
            .await;

        let success = match response.into_success() {
            Some(success) if success.code() == 200 => success,
            Some(success) => {
                debug!(extension = %self.id, code = success.code(), "Status not refreshed");
                return false;
            }
            None => return false,
        };

        let payload = success.json_body();
        if payload.is_none() {
            warn!(extension = %self.id, "Status response is not JSON");
        }

        let mut state = self.state.write();
        let has_printer = capability_present(payload.as_ref(), Capability::Printer);
        let has_barcode_scanner = capability_present(payload.as_ref(), Capability::BarcodeScanner);
        state.status = payload;
        self.set_capability_locked(&mut state, Capability::Printer, has_printer);
        self.set_capability_locked(&mut state, Capability::BarcodeScanner, has_barcode_scanner);
        self.event_bus.publish(ExtensionEvent::StatusUpdated {
            extension: self.id.clone(),
        });

        true
    }

    /// Long-poll `/scan` for one barcode.
    ///
    /// A 404 means the extension has no scanner. A timeout is the normal
    /// outcome when nothing was scanned and does not affect the connection
    /// status. Calls queue behind a scan that is already in flight.
    pub async fn scan_barcode(&self, timeout: Duration) -> Option<String> {
        let _gate = self.scan_gate.lock().await;

        let response = self
            .request_json("/scan", &[], HttpMethod::Get, None, timeout, true)
            .await;
        let success = response.into_success()?;

        if success.code() == 404 {
            self.set_capability(Capability::BarcodeScanner, false);
            return None;
        }

        if success.is_2xx() && !success.body().is_empty() {
            self.set_capability(Capability::BarcodeScanner, true);
            return Some(success.text());
        }

        None
    }

    fn set_connection_status(&self, new_status: ConnectionStatus) {
        let mut state = self.state.write();
        let old_status = state.connection_status;
        if old_status == new_status {
            return;
        }

        state.connection_status = new_status;
        info!(extension = %self.id, %old_status, %new_status, "Connection status changed");
        self.event_bus.publish(ExtensionEvent::ConnectionStatusChanged {
            extension: self.id.clone(),
            old_status,
            new_status,
        });
    }

    fn set_capability(&self, capability: Capability, available: bool) {
        let mut state = self.state.write();
        self.set_capability_locked(&mut state, capability, available);
    }

    fn set_capability_locked(
        &self,
        state: &mut ExtensionState,
        capability: Capability,
        available: bool,
    ) {
        let flag = match capability {
            Capability::Printer => &mut state.has_printer,
            Capability::BarcodeScanner => &mut state.has_barcode_scanner,
        };
        if *flag == available {
            return;
        }

        *flag = available;
        debug!(extension = %self.id, %capability, available, "Capability changed");
        self.event_bus.publish(ExtensionEvent::CapabilityChanged {
            extension: self.id.clone(),
            capability,
            available,
        });
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id)
            .field("connection_status", &self.connection_status())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Extension {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Extension {}

fn capability_present(payload: Option<&Value>, capability: Capability) -> bool {
    payload
        .and_then(|status| status.get(capability.status_key()))
        .and_then(Value::as_array)
        .is_some_and(|entries| !entries.is_empty())
}

/// Builder for [`Extension`].
pub struct ExtensionBuilder {
    hostname: String,
    port: u16,
    address: Option<String>,
    resolver: Option<Arc<dyn NameResolver>>,
    transport: Option<Arc<dyn Transport>>,
    event_bus: Option<EventBus>,
    config: ClientConfig,
}

impl ExtensionBuilder {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            address: None,
            resolver: None,
            transport: None,
            event_bus: None,
            config: ClientConfig::default(),
        }
    }

    /// Numeric IP address to use until the host name resolves.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Publish onto an existing bus instead of a private one.
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Extension> {
        self.config.validate()?;

        let address = match &self.address {
            Some(address) => {
                let ip: IpAddr = address
                    .parse()
                    .map_err(|_| config_err!("invalid numeric address: {}", address))?;
                Some(SocketAddr::new(ip, self.port))
            }
            None => None,
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(SystemResolver) as Arc<dyn NameResolver>);

        let id = ExtensionId::new(self.hostname.clone(), self.port);
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::with_name(id.to_string()));

        Ok(Extension {
            client: ApiClient::new(
                self.hostname,
                self.port,
                address,
                resolver,
                transport,
                self.config.resolve_timeout(),
            ),
            id,
            state: RwLock::new(ExtensionState::default()),
            status_gate: tokio::sync::Mutex::new(()),
            scan_gate: tokio::sync::Mutex::new(()),
            event_bus,
            config: self.config,
        })
    }
}

#[cfg(feature = "http")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::transport::ReqwestTransport::new()))
}

#[cfg(not(feature = "http"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Err(config_err!("no transport configured and the http feature is disabled"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::io;

    struct StaticTransport(std::result::Result<(u16, &'static str), ()>);

    #[async_trait]
    impl Transport for StaticTransport {
        async fn exchange(
            &self,
            _request: TransportRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            match self.0 {
                Ok((code, body)) => Ok(TransportResponse {
                    code,
                    headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                    body: body.as_bytes().to_vec(),
                }),
                Err(()) => Err(TransportError::Connection("refused".to_string())),
            }
        }
    }

    struct NoResolver;

    #[async_trait]
    impl NameResolver for NoResolver {
        async fn lookup(&self, _hostname: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    fn extension(transport: StaticTransport) -> Extension {
        Extension::builder("ext.local", 8080)
            .address("192.168.0.10")
            .resolver(Arc::new(NoResolver))
            .transport(Arc::new(transport))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_invalid_address() {
        let result = Extension::builder("ext.local", 80)
            .address("not-an-ip")
            .transport(Arc::new(StaticTransport(Err(()))))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_capability_present() {
        let payload = json!({"printers": [{"id": 1}], "barcodes": []});
        assert!(capability_present(Some(&payload), Capability::Printer));
        assert!(!capability_present(Some(&payload), Capability::BarcodeScanner));
        assert!(!capability_present(None, Capability::Printer));
    }

    #[tokio::test]
    async fn test_update_status_sets_flags_and_version() {
        let ext = extension(StaticTransport(Ok((
            200,
            r#"{"version": "2.1", "printers": ["p"], "barcodes": ["b"]}"#,
        ))));
        assert_eq!(ext.address(), Some("192.168.0.10:8080".parse().unwrap()));
        assert!(ext.version().is_none());

        assert!(ext.update_status(false).await);
        assert_eq!(ext.connection_status(), ConnectionStatus::Connected);
        assert!(ext.has_printer());
        assert!(ext.has_barcode_scanner());
        assert_eq!(ext.version(), Some(ExtensionVersion::new(2, 1, 0)));
    }

    #[tokio::test]
    async fn test_default_version_without_field() {
        let ext = extension(StaticTransport(Ok((200, r#"{"printers": []}"#))));
        assert!(ext.update_status(true).await);
        assert_eq!(ext.version(), Some(ExtensionVersion::default()));
    }

    #[tokio::test]
    async fn test_non_200_keeps_payload() {
        let ext = extension(StaticTransport(Ok((500, "{}"))));
        assert!(!ext.update_status(false).await);
        assert!(ext.status().is_none());
        assert_eq!(ext.connection_status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_connection_failure_sets_error() {
        let ext = extension(StaticTransport(Err(())));
        let mut rx = ext.event_bus().subscribe();

        assert!(!ext.update_status(false).await);
        assert_eq!(ext.connection_status(), ConnectionStatus::Error);

        let (event, _) = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ExtensionEvent::ConnectionStatusChanged {
                extension: ExtensionId::new("ext.local", 8080),
                old_status: ConnectionStatus::Initialized,
                new_status: ConnectionStatus::Error,
            }
        );
    }
}
