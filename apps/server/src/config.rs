//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use castcore::{Config as CoreConfig, DeviceConfig};

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind the HTTP server to.
    /// Override: `CASTCORE_LISTEN_HOST`
    pub listen_host: String,

    /// Port to bind the HTTP server to.
    /// Override: `CASTCORE_LISTEN_PORT`
    pub listen_port: u16,

    /// IP address to advertise to devices. If unset, auto-detected.
    /// Override: `CASTCORE_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// Seconds of inactivity before an admitted session is reclaimed.
    /// Override: `CASTCORE_REQUEST_GONE_TIMEOUT`
    pub request_gone_timeout: u64,

    /// Size in bytes of one streamed block.
    /// Override: `CASTCORE_BLOCK_SIZE`
    pub block_size: u64,

    /// Origin the block source fetches documents from.
    pub block_source_base_url: String,

    /// Configured singleton device finders (vlc/kodi/web).
    pub devices: Vec<DeviceConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = CoreConfig::default();
        Self {
            listen_host: core.listen_host,
            listen_port: core.listen_port,
            advertise_ip: None,
            request_gone_timeout: core.request_gone_timeout,
            block_size: core.block_size,
            block_source_base_url: core.block_source_base_url,
            devices: core.devices,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CASTCORE_LISTEN_HOST") {
            self.listen_host = val;
        }
        if let Ok(val) = std::env::var("CASTCORE_LISTEN_PORT") {
            if let Ok(port) = val.parse() {
                self.listen_port = port;
            }
        }
        if let Ok(val) = std::env::var("CASTCORE_ADVERTISE_IP") {
            if let Ok(ip) = val.parse() {
                self.advertise_ip = Some(ip);
            }
        }
        if let Ok(val) = std::env::var("CASTCORE_REQUEST_GONE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.request_gone_timeout = secs;
            }
        }
        if let Ok(val) = std::env::var("CASTCORE_BLOCK_SIZE") {
            if let Ok(size) = val.parse() {
                self.block_size = size;
            }
        }
    }

    /// Converts to castcore's `Config` type.
    pub fn to_core_config(&self) -> CoreConfig {
        CoreConfig {
            listen_host: self.listen_host.clone(),
            listen_port: self.listen_port,
            request_gone_timeout: self.request_gone_timeout,
            block_size: self.block_size,
            block_source_base_url: self.block_source_base_url.clone(),
            devices: self.devices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_core_config() {
        let config = ServerConfig::default();
        let core = config.to_core_config();
        assert_eq!(core.listen_port, 8080);
        assert!(core.devices.is_empty());
    }
}
