// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration file.

use lumo::config::{
    ConfigError, DeviceConfig, LightServerConfig, ManagementServerConfig, SwitchConfig,
};
use lumo::transport::DEFAULT_MAX_DATAGRAM_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One file configures every role; the subcommand picks the section used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub light_server: LightServerConfig,

    #[serde(default)]
    pub light_switch: SwitchConfig,

    #[serde(default)]
    pub management_server: ManagementServerConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    /// Largest datagram sent or received (bytes)
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

fn default_max_datagram_size() -> usize {
    DEFAULT_MAX_DATAGRAM_SIZE
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            light_server: LightServerConfig::default(),
            light_switch: SwitchConfig::default(),
            management_server: ManagementServerConfig::default(),
            device: DeviceConfig::default(),
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the shared settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_datagram_size < 64 {
            return Err(ConfigError::InvalidValue(
                "max_datagram_size must be at least 64".into(),
            ));
        }
        Ok(())
    }
}
