//! Web pseudo-device: a browser polls for a URL to play instead of a
//! protocol pushing one to it.
//!
//! Registration mints a token behind a shared password; the browser then
//! polls for a pending URL, which is handed out once and cleared
//! (`get_url_to_play` is a consuming read, not an idempotent peek).

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{CastError, CastResult};
use crate::token::secret_token;

use super::{Device, DeviceControl, DeviceFinder};

struct WebDeviceState {
    url_to_play: Mutex<Option<String>>,
    last_poll: AtomicInstant,
}

/// `Instant` has no atomic form; store millis-since-creation in an
/// `AtomicU64` so polling doesn't need a lock just to record a timestamp.
struct AtomicInstant {
    origin: Instant,
    millis_since_origin: AtomicU64,
}

impl AtomicInstant {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            millis_since_origin: AtomicU64::new(0),
        }
    }

    fn touch(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        let previous = self.millis_since_origin.swap(now, Ordering::SeqCst);
        Duration::from_millis(now.saturating_sub(previous))
    }

    fn elapsed_since_touch(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        let last = self.millis_since_origin.load(Ordering::SeqCst);
        Duration::from_millis(now.saturating_sub(last))
    }
}

pub struct WebDevice {
    name: String,
    token: u64,
    state: Arc<WebDeviceState>,
    registry: Arc<WebDeviceRegistry>,
}

impl WebDevice {
    /// `state` must be the same `Arc<WebDeviceState>` the registry hands to
    /// `poll_device`, so a `play()` call here is visible to that poll —
    /// a freshly allocated state would silently orphan the played URL.
    fn new(name: String, token: u64, state: Arc<WebDeviceState>, registry: Arc<WebDeviceRegistry>) -> Self {
        Self {
            name,
            token,
            state,
            registry,
        }
    }

    /// Marks activity and returns the time since the previous poll.
    pub fn manipulate_timestamp(&self) -> Duration {
        self.state.last_poll.touch()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn new_for_test(name: String) -> Self {
        let registry = Arc::new(WebDeviceRegistry::new(String::new(), Duration::from_secs(60)));
        let state = Arc::new(WebDeviceState {
            url_to_play: Mutex::new(None),
            last_poll: AtomicInstant::new(),
        });
        Self::new(name, 0, state, registry)
    }

    /// Consumes and returns the pending URL, if any.
    pub fn get_url_to_play(&self) -> Option<String> {
        self.state.url_to_play.lock().take()
    }
}

#[async_trait]
impl DeviceControl for WebDevice {
    async fn play(&self, url: &str, _title: &str) -> CastResult<()> {
        *self.state.url_to_play.lock() = Some(url.to_string());
        Ok(())
    }

    async fn stop(&self) -> CastResult<()> {
        *self.state.url_to_play.lock() = None;
        Ok(())
    }

    fn get_device_name(&self) -> &str {
        &self.name
    }

    async fn on_close(&self) {
        self.registry.devices.remove(&self.token);
    }
}

struct RegisteredDevice {
    state: Arc<WebDeviceState>,
    name: String,
}

/// Shared table of browsers that have registered via
/// [`register_device`], independent of the finder instance so axum route
/// handlers and [`WebDeviceFinder::find`] see the same devices.
pub struct WebDeviceRegistry {
    devices: DashMap<u64, RegisteredDevice>,
    password: String,
    request_timeout: Duration,
}

impl WebDeviceRegistry {
    pub fn new(password: String, request_timeout: Duration) -> Self {
        Self {
            devices: DashMap::new(),
            password,
            request_timeout,
        }
    }
}

pub struct WebDeviceFinder {
    registry: Arc<WebDeviceRegistry>,
}

impl WebDeviceFinder {
    pub fn new(registry: Arc<WebDeviceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DeviceFinder for WebDeviceFinder {
    async fn find(&self) -> CastResult<Vec<Device>> {
        let now_cutoff = self.registry.request_timeout;
        let mut stale = Vec::new();
        let mut devices = Vec::new();

        for entry in self.registry.devices.iter() {
            let token = *entry.key();
            let idle = entry.value().state.last_poll.elapsed_since_touch();
            if idle > now_cutoff {
                stale.push(token);
                continue;
            }
            devices.push(Device::Web(WebDevice::new(
                entry.value().name.clone(),
                token,
                entry.value().state.clone(),
                self.registry.clone(),
            )));
        }

        for token in stale {
            self.registry.devices.remove(&token);
        }

        Ok(devices)
    }

    fn request_timeout(&self) -> Duration {
        self.registry.request_timeout
    }

    fn auxiliary_routes(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("/web/api/register/{password}", "GET"),
            ("/web/api/poll/{remote_token}", "GET"),
        ]
    }
}

/// `GET /web/api/register/{password}` — mints a token for a new browser
/// behind the shared web password, or 403 if it doesn't match.
pub async fn register_device(
    State(registry): State<Arc<WebDeviceRegistry>>,
    Path(password): Path<String>,
    axum::extract::ConnectInfo(remote_addr): axum::extract::ConnectInfo<std::net::SocketAddr>,
) -> Response {
    if password != registry.password {
        return CastError::Forbidden.into_response();
    }

    let token = secret_token();
    let name = format!("web @({})", remote_addr.ip());
    registry.devices.insert(
        token,
        RegisteredDevice {
            state: Arc::new(WebDeviceState {
                url_to_play: Mutex::new(None),
                last_poll: AtomicInstant::new(),
            }),
            name,
        },
    );

    (StatusCode::OK, token.to_string()).into_response()
}

/// `GET /web/api/poll/{remote_token}` — touches the device's activity
/// timestamp and returns a pending URL with 200, or an empty 302 if none
/// is pending.
pub async fn poll_device(
    State(registry): State<Arc<WebDeviceRegistry>>,
    Path(remote_token): Path<String>,
) -> Response {
    let token: u64 = match remote_token.parse() {
        Ok(t) => t,
        Err(_) => return CastError::MalformedRequest.into_response(),
    };

    let Some(entry) = registry.devices.get(&token) else {
        return CastError::NotFound.into_response();
    };

    entry.state.last_poll.touch();
    let pending = entry.state.url_to_play.lock().take();
    match pending {
        Some(url) => (StatusCode::OK, url).into_response(),
        None => StatusCode::FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_url_to_play_consumes_the_pending_url() {
        let registry = Arc::new(WebDeviceRegistry::new("pw".into(), Duration::from_secs(60)));
        let state = Arc::new(WebDeviceState {
            url_to_play: Mutex::new(None),
            last_poll: AtomicInstant::new(),
        });
        let device = WebDevice::new("web @(1.2.3.4)".into(), 1, state, registry);
        futures::executor::block_on(device.play("http://example/a.mp4", "a")).unwrap();
        assert_eq!(
            device.get_url_to_play(),
            Some("http://example/a.mp4".to_string())
        );
        assert_eq!(device.get_url_to_play(), None);
    }

    #[tokio::test]
    async fn finder_device_shares_state_with_registered_entry_so_poll_sees_play() {
        let registry = Arc::new(WebDeviceRegistry::new("pw".into(), Duration::from_secs(60)));
        registry.devices.insert(
            1,
            RegisteredDevice {
                state: Arc::new(WebDeviceState {
                    url_to_play: Mutex::new(None),
                    last_poll: AtomicInstant::new(),
                }),
                name: "browser".into(),
            },
        );
        let finder = WebDeviceFinder::new(registry.clone());
        let devices = finder.find().await.unwrap();
        let Device::Web(device) = &devices[0] else {
            panic!("expected a web device");
        };
        device.play("http://example/a.mp4", "a").await.unwrap();

        let pending = registry.devices.get(&1).unwrap().state.url_to_play.lock().take();
        assert_eq!(pending, Some("http://example/a.mp4".to_string()));
    }

    #[tokio::test]
    async fn finder_evicts_devices_idle_past_request_timeout() {
        let registry = Arc::new(WebDeviceRegistry::new("pw".into(), Duration::from_millis(50)));
        registry.devices.insert(
            1,
            RegisteredDevice {
                state: Arc::new(WebDeviceState {
                    url_to_play: Mutex::new(None),
                    last_poll: AtomicInstant::new(),
                }),
                name: "stale".into(),
            },
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        let finder = WebDeviceFinder::new(registry.clone());
        let devices = finder.find().await.unwrap();
        assert!(devices.is_empty());
        assert!(registry.devices.is_empty());
    }
}
