//! VLC telnet remote-control backend.
//!
//! No discovery: a VLC target is always a fixed host/port/password from
//! configuration. Control happens over VLC's line-oriented telnet interface,
//! which gates the session behind an optional password challenge.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Duration;

use crate::error::{CastError, CastResult};
use crate::protocol_constants::{VLC_AUTH_CHALLENGE, VLC_AUTH_OK, VLC_EOF};

use super::{Device, DeviceControl, DeviceFinder};

#[derive(Debug, Clone)]
pub struct VlcDeviceParams {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

pub struct VlcDevice {
    name: String,
    params: VlcDeviceParams,
}

impl VlcDevice {
    pub fn new(name: String, params: VlcDeviceParams) -> Self {
        Self { name, params }
    }

    /// Opens a connection, completes the optional password handshake, sends
    /// `method` with space-joined `args`, and closes.
    async fn call(&self, method: &str, args: &[&str]) -> CastResult<()> {
        let addr = format!("{}:{}", self.params.host, self.params.port);
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| CastError::Connection(e.to_string()))?;

        let mut banner = [0u8; 256];
        let n = stream
            .read(&mut banner)
            .await
            .map_err(|e| CastError::Connection(e.to_string()))?;
        let banner = &banner[..n];

        if banner.ends_with(VLC_AUTH_CHALLENGE) {
            let password = self.params.password.as_deref().ok_or_else(|| {
                log::error!("vlc {} requires a password but none is configured", addr);
                CastError::Config(format!("vlc target {} requires a password", addr))
            })?;

            let mut request = password.as_bytes().to_vec();
            request.extend_from_slice(VLC_EOF);
            stream
                .write_all(&request)
                .await
                .map_err(|e| CastError::Connection(e.to_string()))?;

            let mut response = [0u8; 256];
            let n = stream
                .read(&mut response)
                .await
                .map_err(|e| CastError::Connection(e.to_string()))?;
            if !response[..n].starts_with(VLC_AUTH_OK) {
                log::error!("vlc {} rejected password", addr);
                return Err(CastError::Unauthorized);
            }
        }

        let mut command = method.to_string();
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        let mut request = command.into_bytes();
        request.extend_from_slice(VLC_EOF);
        stream
            .write_all(&request)
            .await
            .map_err(|e| CastError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for VlcDevice {
    async fn play(&self, url: &str, _title: &str) -> CastResult<()> {
        self.call("add", &[url]).await?;
        self.call("play", &[]).await
    }

    async fn stop(&self) -> CastResult<()> {
        self.call("stop", &[]).await
    }

    fn get_device_name(&self) -> &str {
        &self.name
    }

    async fn on_close(&self) {}
}

/// Always returns the single statically configured VLC target; no network
/// discovery protocol exists for bare telnet interfaces.
pub struct VlcDeviceFinder {
    name: String,
    params: VlcDeviceParams,
    request_timeout: Duration,
}

impl VlcDeviceFinder {
    pub fn new(name: String, params: VlcDeviceParams, request_timeout: Duration) -> Self {
        Self {
            name,
            params,
            request_timeout,
        }
    }
}

#[async_trait]
impl DeviceFinder for VlcDeviceFinder {
    async fn find(&self) -> CastResult<Vec<Device>> {
        Ok(vec![Device::Vlc(VlcDevice::new(
            self.name.clone(),
            self.params.clone(),
        ))])
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finder_returns_single_statically_configured_device() {
        let finder = VlcDeviceFinder::new(
            "living room vlc".into(),
            VlcDeviceParams {
                host: "127.0.0.1".into(),
                port: 4212,
                password: Some("hunter2".into()),
            },
            Duration::from_secs(1),
        );
        let devices = finder.find().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].get_device_name(), "living room vlc");
    }
}
