//! Composition root: wires `BlockSource`, device finders, sessions, and
//! network context into an `AppState` ready to hand to `start_server`.

use std::sync::Arc;
use std::time::Duration;

use crate::api::AppState;
use crate::block_source::{HttpBlockSource, SharedBlockSource};
use crate::context::NetworkContext;
use crate::device::chromecast::ChromecastDeviceFinder;
use crate::device::kodi::{KodiDeviceFinder, KodiDeviceParams};
use crate::device::registry::DeviceRegistry;
use crate::device::upnp::{UpnpDeviceFinder, UpnpNotifyRegistry};
use crate::device::vlc::{VlcDeviceFinder, VlcDeviceParams};
use crate::device::web::{WebDeviceFinder, WebDeviceRegistry};
use crate::device::DeviceFinder;
use crate::error::{CastError, CastResult};
use crate::session::manager::SessionManager;
use crate::session::table::SessionTable;
use crate::state::{Config, DeviceConfig};

/// Errors that can occur while bootstrapping the application.
pub type BootstrapResult<T> = CastResult<T>;

pub fn bootstrap_services(config: &Config, network: NetworkContext) -> BootstrapResult<AppState> {
    config.validate()?;

    let block_source: SharedBlockSource = Arc::new(HttpBlockSource::new(config.block_source_base_url.clone()));

    let notify_registry = Arc::new(UpnpNotifyRegistry::new());
    let callback_base_url = network.url_builder().base_url();

    // UPnP and Chromecast are always-on discovery finders; VLC/Kodi/web
    // are singleton finders present only if configured.
    let mut finders: Vec<Arc<dyn DeviceFinder>> = vec![
        Arc::new(UpnpDeviceFinder::new(
            notify_registry.clone(),
            callback_base_url,
            Duration::from_secs(3),
        )),
        Arc::new(ChromecastDeviceFinder::new(Duration::from_secs(3))),
    ];

    let mut web_registry = None;

    for device in &config.devices {
        match device {
            DeviceConfig::Vlc { request_timeout, host, port, password } => {
                finders.push(Arc::new(VlcDeviceFinder::new(
                    "vlc".to_string(),
                    VlcDeviceParams {
                        host: host.clone(),
                        port: *port,
                        password: password.clone(),
                    },
                    Duration::from_secs(*request_timeout),
                )));
            }
            DeviceConfig::Kodi { request_timeout, base_url, username, password } => {
                finders.push(Arc::new(KodiDeviceFinder::new(
                    "kodi".to_string(),
                    KodiDeviceParams {
                        base_url: base_url.clone(),
                        username: username.clone(),
                        password: password.clone(),
                    },
                    Duration::from_secs(*request_timeout),
                )));
            }
            DeviceConfig::Web { request_timeout, password } => {
                let registry = Arc::new(WebDeviceRegistry::new(password.clone(), Duration::from_secs(*request_timeout)));
                finders.push(Arc::new(WebDeviceFinder::new(registry.clone())));
                web_registry = Some(registry);
            }
        }
    }

    let devices = Arc::new(DeviceRegistry::new(finders));
    let session_manager = SessionManager::new(devices.clone());
    let session_table = SessionTable::new(
        session_manager.clone(),
        Duration::from_secs(config.request_gone_timeout),
        config.block_size,
    );

    Ok(AppState {
        block_source,
        session_table,
        session_manager,
        devices,
        network,
        block_size: config.block_size,
        upnp_notify_registry: notify_registry,
        web_registry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_without_devices_wires_only_always_on_finders() {
        let config = Config::default();
        let network = NetworkContext::for_test();
        let state = bootstrap_services(&config, network).unwrap();
        assert!(state.web_registry.is_none());
    }

    #[test]
    fn bootstrap_rejects_invalid_config() {
        let config = Config {
            devices: vec![
                DeviceConfig::Web { request_timeout: 5, password: "a".into() },
                DeviceConfig::Web { request_timeout: 5, password: "b".into() },
            ],
            ..Config::default()
        };
        let network = NetworkContext::for_test();
        assert!(matches!(bootstrap_services(&config, network), Err(CastError::Config(_))));
    }

    #[test]
    fn bootstrap_with_web_device_populates_registry() {
        let config = Config {
            devices: vec![DeviceConfig::Web { request_timeout: 30, password: "hunter2".into() }],
            ..Config::default()
        };
        let network = NetworkContext::for_test();
        let state = bootstrap_services(&config, network).unwrap();
        assert!(state.web_registry.is_some());
    }
}
