//! FleetLink Devices Crate
//!
//! This crate keeps track of a fleet of LAN-attached extensions that expose
//! printers and barcode scanners over a small HTTP/JSON protocol.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `http` | ✅ | `reqwest` transport used when none is configured |
//! | `discovery` | ❌ | mDNS discovery backend via `mdns-sd` |
//!
//! ## Components
//!
//! - **Extension**: one device, its connection health and capabilities
//! - **BarcodeScanLoop**: long-polls `/scan` while a scanner is available
//! - **FleetManager**: periodic refresh, aggregation and recovery
//! - **ExtensionBrowser**: finds and verifies extensions on the network
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleetlink_core::FleetConfig;
//! use fleetlink_devices::{Extension, FleetManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fleet = FleetManager::new(FleetConfig::default())?;
//!     let mut events = fleet.event_bus().filter().fleet_events();
//!
//!     let extension = Extension::new("ubiregi-ex.local", 8080, Some("192.168.0.10"))?;
//!     fleet.add_extension(Arc::new(extension));
//!
//!     while let Some((event, _)) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod browser;
pub mod client;
pub mod extension;
pub mod fleet;
pub mod resolver;
pub mod response;
pub mod scanner;
pub mod transport;
pub mod version;

#[cfg(feature = "discovery")]
pub mod mdns;

pub use address::{AddressCache, Resolution};
pub use browser::{
    ExtensionBrowser, ExtensionBrowserBuilder, ResolvedService, ServiceAnnouncement,
    ServiceDiscovery,
};
pub use client::ApiClient;
pub use extension::{Extension, ExtensionBuilder};
pub use fleet::{aggregate_connection_status, FleetManager};
pub use resolver::{NameResolver, SystemResolver};
pub use response::{ApiError, ApiResponse, SuccessResponse};
pub use scanner::{BarcodeScanLoop, ScanLoopState};
pub use transport::{HttpMethod, Transport, TransportError, TransportRequest, TransportResponse};
pub use version::ExtensionVersion;

#[cfg(feature = "http")]
pub use transport::ReqwestTransport;

#[cfg(feature = "discovery")]
pub use mdns::MdnsDiscovery;
