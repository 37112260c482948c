//! Device abstraction: capability traits plus the concrete backends that
//! implement them.
//!
//! A cast target is one of a closed set of backends (UPnP, Chromecast, VLC,
//! Kodi, the web pseudo-device). Rather than a single `Device` trait with
//! methods some backends cannot honor, capabilities that not every backend
//! supports (pause/resume) live on their own traits; callers query for them
//! with [`Device::as_pausable`] instead of probing for a method's presence.

pub mod chromecast;
pub mod kodi;
pub mod registry;
pub mod upnp;
pub mod vlc;
pub mod web;

use async_trait::async_trait;
use std::fmt;

use crate::error::CastResult;

/// Core operations every device backend supports.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Starts playback of `url` with the given display `title`.
    async fn play(&self, url: &str, title: &str) -> CastResult<()>;

    /// Stops playback and releases any device-held transport reference.
    async fn stop(&self) -> CastResult<()>;

    /// Human-readable name shown in device-selection menus.
    fn get_device_name(&self) -> &str;

    /// Invoked when the owning session is reclaimed, regardless of whether
    /// `stop` was ever called. Releases session-scoped resources (event
    /// subscriptions, cached transport state) that `stop` does not.
    async fn on_close(&self);
}

/// Optional pause/resume capability, implemented only by backends whose
/// protocol distinguishes "paused" from "stopped".
#[async_trait]
pub trait Pausable: Send + Sync {
    async fn pause(&self) -> CastResult<()>;
    async fn resume(&self) -> CastResult<()>;
}

/// A cast target: one of the supported backend protocols.
///
/// A sum type rather than `Box<dyn DeviceControl>` because the set of
/// backends is closed and callers frequently need backend-specific
/// behavior (capability queries, `Debug`/`Display`) that a trait object
/// would have to re-expose one by one.
pub enum Device {
    Upnp(upnp::UpnpDevice),
    Chromecast(chromecast::ChromecastDevice),
    Vlc(vlc::VlcDevice),
    Kodi(kodi::KodiDevice),
    Web(web::WebDevice),
}

impl Device {
    /// Returns a pausable view of this device if its backend supports it.
    pub fn as_pausable(&self) -> Option<&dyn Pausable> {
        match self {
            Device::Upnp(d) => Some(d),
            Device::Chromecast(d) => Some(d),
            Device::Vlc(_) => None,
            Device::Kodi(_) => None,
            Device::Web(_) => None,
        }
    }

    fn control(&self) -> &dyn DeviceControl {
        match self {
            Device::Upnp(d) => d,
            Device::Chromecast(d) => d,
            Device::Vlc(d) => d,
            Device::Kodi(d) => d,
            Device::Web(d) => d,
        }
    }

    pub async fn play(&self, url: &str, title: &str) -> CastResult<()> {
        self.control().play(url, title).await
    }

    pub async fn stop(&self) -> CastResult<()> {
        self.control().stop().await
    }

    pub fn get_device_name(&self) -> &str {
        self.control().get_device_name()
    }

    pub async fn on_close(&self) {
        self.control().on_close().await
    }

    pub async fn pause(&self) -> CastResult<()> {
        match self.as_pausable() {
            Some(p) => p.pause().await,
            None => Err(crate::error::CastError::ActionNotSupported),
        }
    }

    pub async fn resume(&self) -> CastResult<()> {
        match self.as_pausable() {
            Some(p) => p.resume().await,
            None => Err(crate::error::CastError::ActionNotSupported),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device({})", self.get_device_name())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_device_name())
    }
}

/// A discovered device finder. Each backend registers one; [`registry`]
/// fans discovery out across all of them concurrently with a per-finder
/// timeout.
#[async_trait]
pub trait DeviceFinder: Send + Sync {
    /// Discovers currently reachable devices for this backend.
    async fn find(&self) -> CastResult<Vec<Device>>;

    /// Per-finder discovery timeout.
    fn request_timeout(&self) -> std::time::Duration;

    /// Additional HTTP routes this finder needs mounted on the shared
    /// router (GENA notify receivers, web pseudo-device register/poll).
    /// Most finders need none.
    fn auxiliary_routes(&self) -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[async_trait]
    impl DeviceControl for Dummy {
        async fn play(&self, _url: &str, _title: &str) -> CastResult<()> {
            Ok(())
        }
        async fn stop(&self) -> CastResult<()> {
            Ok(())
        }
        fn get_device_name(&self) -> &str {
            "dummy"
        }
        async fn on_close(&self) {}
    }

    #[test]
    fn kodi_and_web_and_vlc_are_not_pausable() {
        let vlc = Device::Vlc(vlc::VlcDevice::new(
            "vlc".into(),
            vlc::VlcDeviceParams {
                host: "127.0.0.1".into(),
                port: 4212,
                password: None,
            },
        ));
        assert!(vlc.as_pausable().is_none());
    }
}
