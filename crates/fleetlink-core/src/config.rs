//! Configuration defaults and loading.
//!
//! Every tunable of the client, the fleet manager and the discovery browser
//! lives here with its default value, so the crates that use them do not
//! repeat constants. All structs deserialize with serde and fill missing
//! fields from the `default_*` functions; `from_env()` additionally applies
//! `FLEETLINK_*` environment overrides.

use crate::config_err;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default values.
pub mod defaults {
    /// Name resolution budget per request, in milliseconds.
    pub const RESOLVE_TIMEOUT_MS: u64 = 1_000;
    /// Timeout of ordinary JSON requests, in milliseconds.
    pub const REQUEST_TIMEOUT_MS: u64 = 5_000;
    /// Long-poll timeout of `/scan`, in milliseconds.
    pub const SCAN_TIMEOUT_MS: u64 = 20_000;
    /// Period of the fleet-wide status refresh, in seconds.
    pub const UPDATE_STATUS_INTERVAL_SECS: u64 = 30;
    /// First recovery delay after an extension leaves `Connected`, in milliseconds.
    pub const RECOVERY_INITIAL_DELAY_MS: u64 = 1_000;

    pub const EXTENSION_SERVICE_TYPE: &str = "_ubiregiex._tcp.";
    pub const WORKSTATION_SERVICE_TYPE: &str = "_workstation._tcp.";
    pub const DISCOVERY_DOMAIN: &str = "local.";
    pub const WORKSTATION_PORT: u16 = 80;
    /// Budget for resolving one announcement, in milliseconds.
    pub const DISCOVERY_RESOLVE_TIMEOUT_MS: u64 = 5_000;
    pub const PROBE_MAX_RETRY: u32 = 5;
    pub const PROBE_RETRY_DELAY_MS: u64 = 1_000;
}

/// Environment variable names.
pub mod env_vars {
    pub const RESOLVE_TIMEOUT_MS: &str = "FLEETLINK_RESOLVE_TIMEOUT_MS";
    pub const REQUEST_TIMEOUT_MS: &str = "FLEETLINK_REQUEST_TIMEOUT_MS";
    pub const SCAN_TIMEOUT_MS: &str = "FLEETLINK_SCAN_TIMEOUT_MS";
    pub const UPDATE_STATUS_INTERVAL_SECS: &str = "FLEETLINK_UPDATE_STATUS_INTERVAL_SECS";
    pub const PERIODIC_REFRESH: &str = "FLEETLINK_PERIODIC_REFRESH";
    pub const WORKSTATION_PORT: &str = "FLEETLINK_WORKSTATION_PORT";
    pub const PROBE_MAX_RETRY: &str = "FLEETLINK_PROBE_MAX_RETRY";
    pub const PROBE_RETRY_DELAY_MS: &str = "FLEETLINK_PROBE_RETRY_DELAY_MS";
    pub const LOG_JSON: &str = "FLEETLINK_LOG_JSON";

    /// Read and parse an environment variable, `None` if unset or malformed.
    pub fn parse<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
    }
}

fn default_resolve_timeout_ms() -> u64 {
    defaults::RESOLVE_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    defaults::REQUEST_TIMEOUT_MS
}

fn default_scan_timeout_ms() -> u64 {
    defaults::SCAN_TIMEOUT_MS
}

fn default_update_status_interval_secs() -> u64 {
    defaults::UPDATE_STATUS_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

fn default_recovery_initial_delay_ms() -> u64 {
    defaults::RECOVERY_INITIAL_DELAY_MS
}

fn default_extension_service_type() -> String {
    defaults::EXTENSION_SERVICE_TYPE.to_string()
}

fn default_workstation_service_type() -> String {
    defaults::WORKSTATION_SERVICE_TYPE.to_string()
}

fn default_domain() -> String {
    defaults::DISCOVERY_DOMAIN.to_string()
}

fn default_workstation_port() -> u16 {
    defaults::WORKSTATION_PORT
}

fn default_discovery_resolve_timeout_ms() -> u64 {
    defaults::DISCOVERY_RESOLVE_TIMEOUT_MS
}

fn default_max_retry() -> u32 {
    defaults::PROBE_MAX_RETRY
}

fn default_retry_delay_ms() -> u64 {
    defaults::PROBE_RETRY_DELAY_MS
}

/// Per-extension request settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_ms: default_resolve_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Defaults with `FLEETLINK_*` overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_vars::parse(env_vars::RESOLVE_TIMEOUT_MS) {
            config.resolve_timeout_ms = v;
        }
        if let Some(v) = env_vars::parse(env_vars::REQUEST_TIMEOUT_MS) {
            config.request_timeout_ms = v;
        }
        if let Some(v) = env_vars::parse(env_vars::SCAN_TIMEOUT_MS) {
            config.scan_timeout_ms = v;
        }
        config
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolve_timeout_ms == 0 {
            return Err(config_err!("resolve_timeout_ms must be positive"));
        }
        if self.request_timeout_ms == 0 || self.scan_timeout_ms == 0 {
            return Err(config_err!("request timeouts must be positive"));
        }
        Ok(())
    }
}

/// Fleet manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Period of the background status refresh.
    #[serde(default = "default_update_status_interval_secs")]
    pub update_status_interval_secs: u64,
    /// Whether the background refresh runs at all.
    #[serde(default = "default_true")]
    pub periodic_refresh: bool,
    /// First backoff delay of connection recovery; doubles per attempt.
    #[serde(default = "default_recovery_initial_delay_ms")]
    pub recovery_initial_delay_ms: u64,
    /// Settings handed to the scan loops of member extensions.
    #[serde(default)]
    pub client: ClientConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            update_status_interval_secs: default_update_status_interval_secs(),
            periodic_refresh: true,
            recovery_initial_delay_ms: default_recovery_initial_delay_ms(),
            client: ClientConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Defaults with `FLEETLINK_*` overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self {
            client: ClientConfig::from_env(),
            ..Self::default()
        };
        if let Some(v) = env_vars::parse(env_vars::UPDATE_STATUS_INTERVAL_SECS) {
            config.update_status_interval_secs = v;
        }
        if let Some(v) = env_vars::parse(env_vars::PERIODIC_REFRESH) {
            config.periodic_refresh = v;
        }
        config
    }

    pub fn update_status_interval(&self) -> Duration {
        Duration::from_secs(self.update_status_interval_secs)
    }

    pub fn recovery_initial_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_initial_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_status_interval_secs == 0 {
            return Err(config_err!("update_status_interval_secs must be positive"));
        }
        if self.recovery_initial_delay_ms == 0 {
            return Err(config_err!("recovery_initial_delay_ms must be positive"));
        }
        self.client.validate()
    }
}

/// Discovery browser settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_extension_service_type")]
    pub extension_service_type: String,
    #[serde(default = "default_workstation_service_type")]
    pub workstation_service_type: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Port the extension protocol runs on for workstation announcements.
    #[serde(default = "default_workstation_port")]
    pub workstation_port: u16,
    #[serde(default = "default_discovery_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Probe retries after the first failed attempt.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Settings of the throwaway probe extensions.
    #[serde(default)]
    pub client: ClientConfig,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            extension_service_type: default_extension_service_type(),
            workstation_service_type: default_workstation_service_type(),
            domain: default_domain(),
            workstation_port: default_workstation_port(),
            resolve_timeout_ms: default_discovery_resolve_timeout_ms(),
            max_retry: default_max_retry(),
            retry_delay_ms: default_retry_delay_ms(),
            client: ClientConfig::default(),
        }
    }
}

impl BrowserConfig {
    /// Defaults with `FLEETLINK_*` overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self {
            client: ClientConfig::from_env(),
            ..Self::default()
        };
        if let Some(v) = env_vars::parse(env_vars::WORKSTATION_PORT) {
            config.workstation_port = v;
        }
        if let Some(v) = env_vars::parse(env_vars::PROBE_MAX_RETRY) {
            config.max_retry = v;
        }
        if let Some(v) = env_vars::parse(env_vars::PROBE_RETRY_DELAY_MS) {
            config.retry_delay_ms = v;
        }
        config
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.extension_service_type.is_empty() || self.workstation_service_type.is_empty() {
            return Err(config_err!("service types must not be empty"));
        }
        if self.workstation_port == 0 {
            return Err(config_err!("workstation_port must be non-zero"));
        }
        self.client.validate()
    }
}
