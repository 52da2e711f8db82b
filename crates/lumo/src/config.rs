// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-role configuration.
//!
//! Every struct deserializes from JSON with all fields optional; missing
//! fields take the defaults below.

use serde::{Deserialize, Serialize};
use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Default UDP port for every role.
pub const DEFAULT_PORT: u16 = 5683;

/// Link-local "all CoAP nodes" group used for discovery.
pub const DISCOVERY_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfd);

/// Registration lifetime announced by a device (seconds).
pub const DEFAULT_LIFETIME_SECS: u64 = 60;

/// Short server id of the single configured management server.
pub const DEFAULT_SHORT_SERVER_ID: i64 = 101;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

fn default_server_bind() -> SocketAddr {
    SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_PORT))
}

fn default_client_bind() -> SocketAddr {
    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
}

fn default_discovery_address() -> SocketAddr {
    SocketAddr::from((DISCOVERY_GROUP, DEFAULT_PORT))
}

fn default_group() -> Ipv6Addr {
    DISCOVERY_GROUP
}

fn default_light_path() -> String {
    "/a/light".into()
}

fn default_light_name() -> String {
    "Soletta LAMP!".into()
}

fn default_power() -> i64 {
    100
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_retry_budget() -> u32 {
    crate::subscription::DEFAULT_RETRY_BUDGET
}

fn default_true() -> bool {
    true
}

fn default_endpoint_name() -> String {
    "lumo-device".into()
}

fn default_management_server() -> SocketAddr {
    SocketAddr::from((Ipv6Addr::LOCALHOST, DEFAULT_PORT))
}

fn default_lifetime() -> u64 {
    DEFAULT_LIFETIME_SECS
}

fn default_short_server_id() -> i64 {
    DEFAULT_SHORT_SERVER_ID
}

fn default_binding() -> String {
    "U".into()
}

fn default_location_tick_ms() -> u64 {
    1000
}

fn default_lease_check_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_latitude() -> String {
    "48.858093".into()
}

fn default_longitude() -> String {
    "2.294694".into()
}

fn non_zero(value: u64, name: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{} cannot be 0", name)));
    }
    Ok(())
}

fn absolute_path(path: &str, name: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') || path.len() < 2 {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be an absolute resource path, got {:?}",
            name, path
        )));
    }
    Ok(())
}

/// Light server role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightServerConfig {
    /// Local address (default: [::]:5683)
    #[serde(default = "default_server_bind")]
    pub bind: SocketAddr,

    /// Join the discovery multicast group
    #[serde(default = "default_true")]
    pub join_group: bool,

    /// Discovery multicast group (default: ff02::fd)
    #[serde(default = "default_group")]
    pub group: Ipv6Addr,

    /// Resource path (default: /a/light)
    #[serde(default = "default_light_path")]
    pub path: String,

    #[serde(default = "default_light_name")]
    pub name: String,

    #[serde(default = "default_power")]
    pub power: i64,

    /// Button debounce window in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Consecutive delivery failures before an observer is dropped (0 = never)
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

impl Default for LightServerConfig {
    fn default() -> Self {
        Self {
            bind: default_server_bind(),
            join_group: true,
            group: default_group(),
            path: default_light_path(),
            name: default_light_name(),
            power: default_power(),
            debounce_ms: default_debounce_ms(),
            retry_budget: default_retry_budget(),
        }
    }
}

impl LightServerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        absolute_path(&self.path, "path")?;
        non_zero(self.debounce_ms, "debounce_ms")?;
        if self.join_group && !self.group.is_multicast() {
            return Err(ConfigError::InvalidValue(format!(
                "group {} is not a multicast address",
                self.group
            )));
        }
        Ok(())
    }
}

/// Light switch (discovery/observe client) role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Local address (default: [::]:0)
    #[serde(default = "default_client_bind")]
    pub bind: SocketAddr,

    /// Where discovery requests go (default: [ff02::fd]:5683)
    #[serde(default = "default_discovery_address")]
    pub discovery_address: SocketAddr,

    /// Resource to discover and observe
    #[serde(default = "default_light_path")]
    pub path: String,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Re-send discovery at this interval until a peer answers (default: never)
    #[serde(default)]
    pub discovery_retry_ms: Option<u64>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            bind: default_client_bind(),
            discovery_address: default_discovery_address(),
            path: default_light_path(),
            debounce_ms: default_debounce_ms(),
            discovery_retry_ms: None,
        }
    }
}

impl SwitchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn discovery_retry(&self) -> Option<Duration> {
        self.discovery_retry_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        absolute_path(&self.path, "path")?;
        non_zero(self.debounce_ms, "debounce_ms")?;
        if let Some(retry) = self.discovery_retry_ms {
            non_zero(retry, "discovery_retry_ms")?;
        }
        Ok(())
    }
}

/// Managed device role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Local address (default: [::]:0)
    #[serde(default = "default_client_bind")]
    pub bind: SocketAddr,

    /// Endpoint name announced at registration
    #[serde(default = "default_endpoint_name")]
    pub endpoint_name: String,

    /// Management server address (default: [::1]:5683)
    #[serde(default = "default_management_server")]
    pub server: SocketAddr,

    /// Registration lifetime in seconds
    #[serde(default = "default_lifetime")]
    pub lifetime_secs: u64,

    #[serde(default = "default_short_server_id")]
    pub short_server_id: i64,

    /// Transport binding mode reported by the server object
    #[serde(default = "default_binding")]
    pub binding: String,

    /// Simulated location update period in milliseconds
    #[serde(default = "default_location_tick_ms")]
    pub location_tick_ms: u64,

    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bind: default_client_bind(),
            endpoint_name: default_endpoint_name(),
            server: default_management_server(),
            lifetime_secs: default_lifetime(),
            short_server_id: default_short_server_id(),
            binding: default_binding(),
            location_tick_ms: default_location_tick_ms(),
            retry_budget: default_retry_budget(),
        }
    }
}

impl DeviceConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }

    /// Registration updates go out at half the lifetime.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs) / 2
    }

    pub fn location_tick(&self) -> Duration {
        Duration::from_millis(self.location_tick_ms)
    }

    /// `coap://` URI of the management server, as stored in the security object.
    pub fn server_uri(&self) -> String {
        format!("coap://{}", self.server)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_name.is_empty() {
            return Err(ConfigError::InvalidValue("endpoint_name cannot be empty".into()));
        }
        non_zero(self.lifetime_secs, "lifetime_secs")?;
        non_zero(self.location_tick_ms, "location_tick_ms")?;
        if self.server.port() == 0 {
            return Err(ConfigError::InvalidValue("server port cannot be 0".into()));
        }
        Ok(())
    }
}

/// Management server role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementServerConfig {
    /// Local address (default: [::]:5683)
    #[serde(default = "default_server_bind")]
    pub bind: SocketAddr,

    /// How often expired registrations are swept, in milliseconds
    #[serde(default = "default_lease_check_ms")]
    pub lease_check_ms: u64,

    /// How long a create or observe may wait for its reply, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Latitude used when creating a missing location instance
    #[serde(default = "default_latitude")]
    pub default_latitude: String,

    /// Longitude used when creating a missing location instance
    #[serde(default = "default_longitude")]
    pub default_longitude: String,
}

impl Default for ManagementServerConfig {
    fn default() -> Self {
        Self {
            bind: default_server_bind(),
            lease_check_ms: default_lease_check_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            default_latitude: default_latitude(),
            default_longitude: default_longitude(),
        }
    }
}

impl ManagementServerConfig {
    pub fn lease_check(&self) -> Duration {
        Duration::from_millis(self.lease_check_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero(self.lease_check_ms, "lease_check_ms")?;
        non_zero(self.request_timeout_ms, "request_timeout_ms")?;
        if self.default_latitude.is_empty() || self.default_longitude.is_empty() {
            return Err(ConfigError::InvalidValue(
                "default coordinates cannot be empty".into(),
            ));
        }
        Ok(())
    }
}
