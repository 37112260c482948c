//! Listen/advertise network configuration and stream URL construction.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

/// Network configuration shared across services: the host/port this
/// process listens on, and the host devices on the LAN should use to reach
/// it (which may differ, e.g. behind NAT or when binding `0.0.0.0`).
#[derive(Clone)]
pub struct NetworkContext {
    listen_host: Arc<RwLock<String>>,
    listen_port: Arc<RwLock<u16>>,
    advertise_host: Arc<RwLock<String>>,
}

impl NetworkContext {
    /// Creates a context with an explicit advertise host (server deployment:
    /// the operator knows which address devices can reach).
    pub fn explicit(listen_host: impl Into<String>, listen_port: u16, advertise_host: IpAddr) -> Self {
        Self {
            listen_host: Arc::new(RwLock::new(listen_host.into())),
            listen_port: Arc::new(RwLock::new(listen_port)),
            advertise_host: Arc::new(RwLock::new(advertise_host.to_string())),
        }
    }

    /// Creates a context that advertises the machine's auto-detected local IP.
    pub fn auto_detect(listen_host: impl Into<String>, listen_port: u16) -> Result<Self, NetworkError> {
        let ip = local_ip_address::local_ip().map_err(|e| NetworkError::Detection(e.to_string()))?;
        Ok(Self {
            listen_host: Arc::new(RwLock::new(listen_host.into())),
            listen_port: Arc::new(RwLock::new(listen_port)),
            advertise_host: Arc::new(RwLock::new(ip.to_string())),
        })
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::explicit("127.0.0.1", 8080, IpAddr::from([127, 0, 0, 1]))
    }

    pub fn listen_host(&self) -> String {
        self.listen_host.read().clone()
    }

    pub fn listen_port(&self) -> u16 {
        *self.listen_port.read()
    }

    pub fn set_listen_port(&self, port: u16) {
        *self.listen_port.write() = port;
    }

    pub fn advertise_host(&self) -> String {
        self.advertise_host.read().clone()
    }

    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder::new(self.advertise_host(), self.listen_port())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("failed to detect local IP: {0}")]
    Detection(String),
}

/// Builds the URLs devices are told to fetch from.
pub struct UrlBuilder {
    host: String,
    port: u16,
}

impl UrlBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `http://{listen_host}:{listen_port}/stream/{message_id}/{token_hex}`
    pub fn stream_url(&self, message_id: u64, token_hex: &str) -> String {
        format!("{}/stream/{}/{}", self.base_url(), message_id, token_hex)
    }

    pub fn upnp_notify_callback_url(&self, local_token: u128) -> String {
        format!("{}/upnp/notify/{:x}", self.base_url(), local_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_context_reports_configured_values() {
        let ctx = NetworkContext::explicit("0.0.0.0", 8080, IpAddr::from([192, 168, 1, 50]));
        assert_eq!(ctx.listen_host(), "0.0.0.0");
        assert_eq!(ctx.listen_port(), 8080);
        assert_eq!(ctx.advertise_host(), "192.168.1.50");
    }

    #[test]
    fn url_builder_formats_stream_url() {
        let builder = UrlBuilder::new("192.168.1.50", 8080);
        assert_eq!(
            builder.stream_url(42, "deadbeef"),
            "http://192.168.1.50:8080/stream/42/deadbeef"
        );
    }

    #[test]
    fn set_listen_port_is_visible_through_url_builder() {
        let ctx = NetworkContext::for_test();
        ctx.set_listen_port(49200);
        assert_eq!(ctx.url_builder().base_url(), "http://127.0.0.1:49200");
    }
}
