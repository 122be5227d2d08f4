//! Event types for the FleetLink event bus.
//!
//! Extensions, scan loops, the fleet manager and the discovery browser all
//! report what happened through these events. Every event is edge-triggered:
//! it is published only when the value it describes actually changed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection health of a single extension, or of the whole fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No request has completed yet.
    #[default]
    Initialized,
    /// The last request that counts received a response.
    Connected,
    /// The last request that counts failed.
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Peripheral capability an extension can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Printer,
    BarcodeScanner,
}

impl Capability {
    /// Key of the presence array in the `/status` payload.
    pub fn status_key(&self) -> &'static str {
        match self {
            Self::Printer => "printers",
            Self::BarcodeScanner => "barcodes",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Printer => write!(f, "printer"),
            Self::BarcodeScanner => write!(f, "barcode_scanner"),
        }
    }
}

/// Stable identity of an extension: its host name and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtensionId {
    pub hostname: String,
    pub port: u16,
}

impl ExtensionId {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Unified event type for FleetLink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtensionEvent {
    // ========== Extension Events ==========
    /// Connection status of one extension changed.
    ConnectionStatusChanged {
        extension: ExtensionId,
        old_status: ConnectionStatus,
        new_status: ConnectionStatus,
    },

    /// A `/status` payload was received and cached.
    StatusUpdated { extension: ExtensionId },

    /// A sticky capability flag of one extension flipped.
    CapabilityChanged {
        extension: ExtensionId,
        capability: Capability,
        available: bool,
    },

    /// The scan loop of one extension read a barcode.
    BarcodeScanned { extension: ExtensionId, code: String },

    // ========== Fleet Events ==========
    /// Aggregated fleet connection status changed.
    FleetConnectionStatusChanged {
        old_status: ConnectionStatus,
        new_status: ConnectionStatus,
    },

    /// Fleet-wide availability of a capability changed.
    FleetCapabilityChanged { capability: Capability, available: bool },

    /// A barcode was read by an extension that belongs to the fleet.
    FleetBarcodeScanned { extension: ExtensionId, code: String },

    // ========== Discovery Events ==========
    /// A network announcement was verified to be a live extension.
    ExtensionFound { host: String, port: u16 },
}

impl ExtensionEvent {
    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ConnectionStatusChanged { .. } => "ConnectionStatusChanged",
            Self::StatusUpdated { .. } => "StatusUpdated",
            Self::CapabilityChanged { .. } => "CapabilityChanged",
            Self::BarcodeScanned { .. } => "BarcodeScanned",
            Self::FleetConnectionStatusChanged { .. } => "FleetConnectionStatusChanged",
            Self::FleetCapabilityChanged { .. } => "FleetCapabilityChanged",
            Self::FleetBarcodeScanned { .. } => "FleetBarcodeScanned",
            Self::ExtensionFound { .. } => "ExtensionFound",
        }
    }

    /// The extension this event is about, if it is about a single one.
    pub fn extension(&self) -> Option<&ExtensionId> {
        match self {
            Self::ConnectionStatusChanged { extension, .. }
            | Self::StatusUpdated { extension }
            | Self::CapabilityChanged { extension, .. }
            | Self::BarcodeScanned { extension, .. }
            | Self::FleetBarcodeScanned { extension, .. } => Some(extension),
            Self::FleetConnectionStatusChanged { .. }
            | Self::FleetCapabilityChanged { .. }
            | Self::ExtensionFound { .. } => None,
        }
    }

    /// Check if this is an event published by a single extension.
    pub fn is_extension_event(&self) -> bool {
        matches!(
            self,
            Self::ConnectionStatusChanged { .. }
                | Self::StatusUpdated { .. }
                | Self::CapabilityChanged { .. }
                | Self::BarcodeScanned { .. }
        )
    }

    /// Check if this is an event published by a fleet manager.
    pub fn is_fleet_event(&self) -> bool {
        matches!(
            self,
            Self::FleetConnectionStatusChanged { .. }
                | Self::FleetCapabilityChanged { .. }
                | Self::FleetBarcodeScanned { .. }
        )
    }

    /// Check if this is a discovery event.
    pub fn is_discovery_event(&self) -> bool {
        matches!(self, Self::ExtensionFound { .. })
    }

    /// Check if this event carries a scanned barcode.
    pub fn is_scan_event(&self) -> bool {
        matches!(
            self,
            Self::BarcodeScanned { .. } | Self::FleetBarcodeScanned { .. }
        )
    }
}

/// Event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Event source (component that published)
    pub source: String,
    /// Event timestamp in milliseconds
    pub timestamp: i64,
}

impl EventMetadata {
    /// Create new event metadata.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
