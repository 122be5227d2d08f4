//! In-memory transport, resolver and discovery backends for tests.

#![allow(dead_code)]

use async_trait::async_trait;
use fleetlink_core::{
    discovery_err, ClientConfig, EventBusReceiver, EventMetadata, ExtensionEvent, FilteredReceiver,
    Result,
};
use fleetlink_devices::{
    Extension, NameResolver, ResolvedService, ServiceAnnouncement, ServiceDiscovery, Transport,
    TransportError, TransportRequest, TransportResponse,
};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const STATUS_WITH_SCANNER: &str =
    r#"{"version": "1.3.0", "printers": [], "barcodes": ["scanner"]}"#;
pub const STATUS_WITH_PRINTER: &str =
    r#"{"version": "1.3.0", "printers": ["printer"], "barcodes": []}"#;
pub const STATUS_EMPTY: &str = r#"{"printers": [], "barcodes": []}"#;

/// Scripted reply of [`MockTransport`].
#[derive(Debug, Clone)]
pub enum Reply {
    /// Response with an `application/json` content type.
    Json(u16, &'static str),
    /// Response with a `text/plain` content type.
    Text(u16, &'static str),
    /// Connection refused.
    Refuse,
    /// Never answers.
    Hang,
    /// Wait, then reply.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

/// Transport answering from per-path scripts and recording every request.
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<TransportRequest>>,
    times: Mutex<Vec<(String, Instant)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply used for `path` whenever nothing is queued.
    pub fn reply(&self, path: &str, reply: Reply) {
        self.defaults.lock().insert(path.to_string(), reply);
    }

    /// One-shot reply for the next request to `path`.
    pub fn push(&self, path: &str, reply: Reply) {
        self.queued
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| strip_query(&r.path) == path)
            .count()
    }

    /// When each request to `path` was issued.
    pub fn request_times(&self, path: &str) -> Vec<Instant> {
        self.times
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, at)| *at)
            .collect()
    }

    fn next_reply(&self, path: &str) -> Reply {
        if let Some(reply) = self.queued.lock().get_mut(path).and_then(VecDeque::pop_front) {
            return reply;
        }
        self.defaults
            .lock()
            .get(path)
            .cloned()
            .unwrap_or(Reply::Refuse)
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

fn response(code: u16, content_type: &str, body: &str) -> TransportResponse {
    TransportResponse {
        code,
        headers: vec![("Content-Type".to_string(), content_type.to_string())],
        body: body.as_bytes().to_vec(),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn exchange(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let path = strip_query(&request.path).to_string();
        let mut reply = self.next_reply(&path);
        self.times.lock().push((path, Instant::now()));
        self.requests.lock().push(request);

        loop {
            match reply {
                Reply::Json(code, body) => return Ok(response(code, "application/json", body)),
                Reply::Text(code, body) => return Ok(response(code, "text/plain", body)),
                Reply::Refuse => {
                    return Err(TransportError::Connection("connection refused".to_string()))
                }
                Reply::Hang => return std::future::pending().await,
                Reply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

/// Scripted outcome of [`MockResolver`].
#[derive(Debug, Clone)]
pub enum Lookup {
    Addrs(Vec<SocketAddr>),
    Fail,
    Hang,
}

/// Resolver answering every host name the same way.
pub struct MockResolver {
    lookup: Mutex<Lookup>,
    count: Mutex<usize>,
}

impl MockResolver {
    pub fn new(lookup: Lookup) -> Arc<Self> {
        Arc::new(Self {
            lookup: Mutex::new(lookup),
            count: Mutex::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::new(Lookup::Fail)
    }

    pub fn set(&self, lookup: Lookup) {
        *self.lookup.lock() = lookup;
    }

    pub fn lookups(&self) -> usize {
        *self.count.lock()
    }
}

#[async_trait]
impl NameResolver for MockResolver {
    async fn lookup(&self, hostname: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        *self.count.lock() += 1;
        let lookup = self.lookup.lock().clone();
        match lookup {
            Lookup::Addrs(addrs) => Ok(addrs),
            Lookup::Fail => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", hostname),
            )),
            Lookup::Hang => std::future::pending().await,
        }
    }
}

/// Discovery backend whose announcements are injected by the test.
#[derive(Default)]
pub struct MockDiscovery {
    searches: Mutex<HashMap<String, mpsc::UnboundedSender<ServiceAnnouncement>>>,
    resolutions: Mutex<HashMap<String, Option<ResolvedService>>>,
    stopped: Mutex<Vec<String>>,
}

impl MockDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `name` resolve to `host:port`, or never resolve with `None`.
    pub fn set_resolution(&self, name: &str, resolved: Option<(&str, u16)>) {
        self.resolutions.lock().insert(
            name.to_string(),
            resolved.map(|(host, port)| ResolvedService {
                host: host.to_string(),
                port,
            }),
        );
    }

    /// Announce `name` on a running search for `service_type`.
    pub fn announce(&self, service_type: &str, name: &str) -> bool {
        let searches = self.searches.lock();
        let Some(tx) = searches.get(service_type) else {
            return false;
        };
        tx.send(ServiceAnnouncement {
            name: name.to_string(),
            service_type: service_type.to_string(),
            domain: "local.".to_string(),
        })
        .is_ok()
    }

    pub fn is_searching(&self, service_type: &str) -> bool {
        self.searches.lock().contains_key(service_type)
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl ServiceDiscovery for MockDiscovery {
    fn search(
        &self,
        service_type: &str,
        _domain: &str,
    ) -> Result<BoxStream<'static, ServiceAnnouncement>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.searches.lock().insert(service_type.to_string(), tx);
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|announcement| (announcement, rx))
        })
        .boxed())
    }

    async fn resolve(&self, announcement: &ServiceAnnouncement) -> Result<ResolvedService> {
        let resolution = self.resolutions.lock().get(&announcement.name).cloned();
        match resolution {
            Some(Some(resolved)) => Ok(resolved),
            Some(None) => std::future::pending().await,
            None => Err(discovery_err!("unknown service {}", announcement.name)),
        }
    }

    fn stop(&self, service_type: &str, _domain: &str) -> Result<()> {
        self.searches.lock().remove(service_type);
        self.stopped.lock().push(service_type.to_string());
        Ok(())
    }
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// Extension at `192.168.0.<n>` whose host name never resolves.
pub fn extension(hostname: &str, n: u8, transport: Arc<MockTransport>) -> Arc<Extension> {
    Arc::new(
        Extension::builder(hostname, 8080)
            .address(format!("192.168.0.{}", n))
            .resolver(MockResolver::failing())
            .transport(transport)
            .config(ClientConfig::default())
            .build()
            .unwrap(),
    )
}

/// Event bus receivers accepted by [`next_event`].
#[allow(async_fn_in_trait)]
pub trait EventSource {
    async fn recv(&mut self) -> Option<(ExtensionEvent, EventMetadata)>;
}

impl EventSource for EventBusReceiver {
    async fn recv(&mut self) -> Option<(ExtensionEvent, EventMetadata)> {
        EventBusReceiver::recv(self).await
    }
}

impl<G> EventSource for FilteredReceiver<G>
where
    G: Fn(&ExtensionEvent) -> bool + Send,
{
    async fn recv(&mut self) -> Option<(ExtensionEvent, EventMetadata)> {
        FilteredReceiver::recv(self).await
    }
}

/// Next event matching `predicate`, failing the test after five seconds.
pub async fn next_event<R, F>(rx: &mut R, predicate: F) -> ExtensionEvent
where
    R: EventSource,
    F: Fn(&ExtensionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (event, _) = rx.recv().await.expect("event bus closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
