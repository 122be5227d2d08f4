//! Core types for FleetLink.
//!
//! This crate defines the event model, the event bus, the error type and the
//! configuration shared by the devices crate and the command-line tool.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;

pub use config::{BrowserConfig, ClientConfig, FleetConfig};
pub use error::{Error, Result};
pub use event::{Capability, ConnectionStatus, EventMetadata, ExtensionEvent, ExtensionId};
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, FilterBuilder, FilteredReceiver,
    SharedEventBus,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
