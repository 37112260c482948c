//! Core application configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CastError, CastResult};
use crate::protocol_constants::{DEFAULT_BLOCK_SIZE, DEFAULT_REQUEST_GONE_TIMEOUT_SECS};

/// One entry of the `devices[]` config list. Each variant is a singleton
/// finder — at most one of each type may appear in a single config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceConfig {
    Vlc {
        #[serde(default = "default_request_timeout")]
        request_timeout: u64,
        host: String,
        port: u16,
        password: Option<String>,
    },
    Kodi {
        #[serde(default = "default_request_timeout")]
        request_timeout: u64,
        base_url: String,
        username: Option<String>,
        password: Option<String>,
    },
    Web {
        #[serde(default = "default_request_timeout")]
        request_timeout: u64,
        password: String,
    },
}

fn default_request_timeout() -> u64 {
    5
}

impl DeviceConfig {
    fn kind(&self) -> &'static str {
        match self {
            Self::Vlc { .. } => "vlc",
            Self::Kodi { .. } => "kodi",
            Self::Web { .. } => "web",
        }
    }
}

/// Core configuration, adapted from the teacher's `state.rs::Config`: the
/// subset of server configuration that `castcore` itself needs, as opposed
/// to the CLI/YAML-loading concerns that live in `apps/server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub request_gone_timeout: u64,
    pub block_size: u64,
    /// Origin the `HttpBlockSource` fetches documents from.
    pub block_source_base_url: String,
    pub devices: Vec<DeviceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8080,
            request_gone_timeout: DEFAULT_REQUEST_GONE_TIMEOUT_SECS,
            block_size: DEFAULT_BLOCK_SIZE,
            block_source_base_url: String::new(),
            devices: Vec::new(),
        }
    }
}

impl Config {
    /// Rejects a config with more than one instance of the same singleton
    /// finder type, mirroring the source's startup `ConfigError`.
    pub fn validate(&self) -> CastResult<()> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.kind()) {
                return Err(CastError::Config(format!(
                    "duplicate '{}' entry in devices[]: only one is permitted",
                    device.kind()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_devices_and_passes_validation() {
        let config = Config::default();
        assert!(config.devices.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_vlc_entries_are_rejected() {
        let config = Config {
            devices: vec![
                DeviceConfig::Vlc {
                    request_timeout: 5,
                    host: "192.168.1.10".into(),
                    port: 4212,
                    password: None,
                },
                DeviceConfig::Vlc {
                    request_timeout: 5,
                    host: "192.168.1.11".into(),
                    port: 4212,
                    password: None,
                },
            ],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CastError::Config(_))));
    }

    #[test]
    fn distinct_device_types_pass_validation() {
        let config = Config {
            devices: vec![
                DeviceConfig::Vlc {
                    request_timeout: 5,
                    host: "192.168.1.10".into(),
                    port: 4212,
                    password: None,
                },
                DeviceConfig::Web {
                    request_timeout: 30,
                    password: "hunter2".into(),
                },
            ],
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
