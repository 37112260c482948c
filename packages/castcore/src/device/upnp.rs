//! UPnP/DLNA AVTransport backend.
//!
//! Control is plain SOAP (`SetAVTransportURI` / `Play` / `Stop` / `Pause`);
//! reachability is tracked via a GENA event subscription that the renderer
//! NOTIFYs with `TransportStatus` changes. Some renderers (observed on
//! Samsung TVs) silently drop subscriptions that are merely renewed, so the
//! subscription is torn down and recreated from scratch every ten seconds
//! rather than renewed in place.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Method};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::error::{CastError, CastResult};
use crate::protocol_constants::{AVTRANSPORT_SCHEMA, DLNA_VIDEO_FLAGS, UPNP_RESUBSCRIBE_INTERVAL_SECS};

use super::{Device, DeviceControl, DeviceFinder, Pausable};

const AVTRANSPORT_SEARCH_TARGET: &str = "urn:schemas-upnp-org:service:AVTransport:1";

fn build_didl_metadata(title: &str, stream_url: &str) -> String {
    let title = html_escape::encode_text(title);
    let url = html_escape::encode_text(stream_url);
    format!(
        r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"><item id="0" parentID="-1" restricted="1"><dc:title>{title}</dc:title><upnp:class>object.item.videoItem.movie</upnp:class><desc id="cdudn" nameSpace="urn:schemas-upnp-org:metadata-1-0/upnp/">SA_RINCON65031_</desc><res protocolInfo="http-get:*:video/mp4:DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS={flags}">{url}</res></item></DIDL-Lite>"#,
        flags = DLNA_VIDEO_FLAGS,
    )
}

async fn send_soap_action(
    client: &Client,
    control_url: &str,
    action: &str,
    args: &[(&str, &str)],
) -> CastResult<String> {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{schema}">"#,
        action = action,
        schema = AVTRANSPORT_SCHEMA,
    );
    for (key, value) in args {
        body.push_str(&format!("<{key}>{}</{key}>", html_escape::encode_text(value)));
    }
    body.push_str(&format!("</u:{action}></s:Body></s:Envelope>"));

    let response = client
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header(
            "SOAPAction",
            format!("\"{}#{}\"", AVTRANSPORT_SCHEMA, action),
        )
        .body(body)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| CastError::Connection(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| CastError::Connection(e.to_string()))?;

    if !status.is_success() {
        if is_safe_to_ignore_stop_fault(action, &text) {
            return Ok(text);
        }
        return Err(CastError::DeviceCommandFailure(format!(
            "{} failed: {} {}",
            action, status, text
        )));
    }
    Ok(text)
}

/// Some renderers fault a redundant `Stop` with "transition not available"
/// or "action stop failed" when already stopped; treat both as success.
fn is_safe_to_ignore_stop_fault(action: &str, fault_body: &str) -> bool {
    if action != "Stop" {
        return false;
    }
    let lower = fault_body.to_ascii_lowercase();
    lower.contains("transition not available") || lower.contains("action stop failed")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Playing,
    Error,
    Nothing,
    Stopped,
}

/// Parses a GENA `LastChange`/`TransportStatus` event body. `OK` marks the
/// renderer reachable; `STOPPED`/`ERROR_OCCURRED` short-circuit to their own
/// state regardless of reachability; anything else falls through to
/// `Playing` if an `OK` was seen, `Nothing` otherwise.
pub fn parse_transport_status(body: &str) -> TransportStatus {
    let mut reached_ok = false;
    for fragment in body.split(|c| c == '<' || c == '>') {
        if fragment.contains("val=\"OK\"") {
            reached_ok = true;
        }
        if fragment.contains("val=\"STOPPED\"") {
            return TransportStatus::Stopped;
        }
        if fragment.contains("val=\"ERROR_OCCURRED\"") {
            return TransportStatus::Error;
        }
    }
    if reached_ok {
        TransportStatus::Playing
    } else {
        TransportStatus::Nothing
    }
}

struct UpnpDeviceState {
    status: parking_lot::Mutex<TransportStatus>,
    errored: AtomicBool,
    subscribe_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

pub struct UpnpDevice {
    name: String,
    control_url: String,
    event_url: String,
    client: Client,
    state: Arc<UpnpDeviceState>,
    notify_registry: Arc<UpnpNotifyRegistry>,
    local_token: parking_lot::Mutex<Option<u128>>,
    callback_base_url: String,
}

impl UpnpDevice {
    pub fn new(
        name: String,
        control_url: String,
        event_url: String,
        notify_registry: Arc<UpnpNotifyRegistry>,
        callback_base_url: String,
    ) -> Self {
        Self {
            name,
            control_url,
            event_url,
            client: Client::new(),
            state: Arc::new(UpnpDeviceState {
                status: parking_lot::Mutex::new(TransportStatus::Nothing),
                errored: AtomicBool::new(false),
                subscribe_task: parking_lot::Mutex::new(None),
            }),
            notify_registry,
            local_token: parking_lot::Mutex::new(None),
            callback_base_url,
        }
    }

    async fn set_av_transport_uri(&self, url: &str, title: &str) -> CastResult<()> {
        let metadata = build_didl_metadata(title, url);
        send_soap_action(
            &self.client,
            &self.control_url,
            "SetAVTransportURI",
            &[
                ("InstanceID", "0"),
                ("CurrentURI", url),
                ("CurrentURIMetaData", &metadata),
            ],
        )
        .await?;
        Ok(())
    }

    async fn subscribe_and_track(self: &Arc<Self>) -> CastResult<()> {
        let token = crate::token::secret_token() as u128;
        *self.local_token.lock() = Some(token);
        self.notify_registry.register(
            token,
            self.state.clone(),
            self.client.clone(),
            self.control_url.clone(),
        );

        let callback_url = format!("{}/upnp/notify/{}", self.callback_base_url, token);
        let client = self.client.clone();
        let event_url = self.event_url.clone();

        let subscribe_once = {
            let client = client.clone();
            let event_url = event_url.clone();
            let callback_url = callback_url.clone();
            move || {
                let client = client.clone();
                let event_url = event_url.clone();
                let callback_url = callback_url.clone();
                async move {
                    let method = Method::from_bytes(b"SUBSCRIBE").unwrap();
                    let _ = client
                        .request(method, &event_url)
                        .header("CALLBACK", format!("<{}>", callback_url))
                        .header("NT", "upnp:event")
                        .header("TIMEOUT", "Second-1800")
                        .send()
                        .await;
                }
            }
        };

        subscribe_once().await;

        let weak_state = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(UPNP_RESUBSCRIBE_INTERVAL_SECS)).await;
                if weak_state.upgrade().is_none() {
                    break;
                }
                subscribe_once().await;
            }
        });
        *self.state.subscribe_task.lock() = Some(handle);
        Ok(())
    }

}

#[async_trait]
impl DeviceControl for UpnpDevice {
    async fn play(&self, url: &str, title: &str) -> CastResult<()> {
        self.set_av_transport_uri(url, title).await?;
        send_soap_action(
            &self.client,
            &self.control_url,
            "Play",
            &[("InstanceID", "0"), ("Speed", "1")],
        )
        .await?;
        Ok(())
    }

    async fn stop(&self) -> CastResult<()> {
        send_soap_action(&self.client, &self.control_url, "Stop", &[("InstanceID", "0")]).await?;
        Ok(())
    }

    fn get_device_name(&self) -> &str {
        &self.name
    }

    async fn on_close(&self) {
        if let Some(task) = self.state.subscribe_task.lock().take() {
            task.abort();
        }
        if let Some(token) = *self.local_token.lock() {
            self.notify_registry.unregister(token);
        }
    }
}

#[async_trait]
impl Pausable for UpnpDevice {
    async fn pause(&self) -> CastResult<()> {
        send_soap_action(&self.client, &self.control_url, "Pause", &[("InstanceID", "0")]).await?;
        Ok(())
    }

    async fn resume(&self) -> CastResult<()> {
        send_soap_action(
            &self.client,
            &self.control_url,
            "Play",
            &[("InstanceID", "0"), ("Speed", "1")],
        )
        .await?;
        Ok(())
    }
}

/// A subscribed device's status handle plus what's needed to re-issue
/// `Play` on it from the NOTIFY handler, which only has the local token
/// to go on.
struct NotifyEntry {
    state: Arc<UpnpDeviceState>,
    client: Client,
    control_url: String,
}

/// Registry of device status handles keyed by the local token embedded in
/// each subscription's NOTIFY callback path, mounted as the crate's single
/// `/upnp/notify/{token}` route.
pub struct UpnpNotifyRegistry {
    handles: DashMap<u128, NotifyEntry>,
}

impl UpnpNotifyRegistry {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }

    fn register(&self, token: u128, state: Arc<UpnpDeviceState>, client: Client, control_url: String) {
        self.handles.insert(token, NotifyEntry { state, client, control_url });
    }

    fn unregister(&self, token: u128) {
        self.handles.remove(&token);
    }

    /// Handles an incoming GENA NOTIFY body for `token`. Returns 400 for a
    /// non-numeric token, 403 for an unknown one. On an ERROR-to-NOTHING
    /// transition (the renderer recovered from a fault but dropped
    /// playback), re-issues `Play` to resume.
    pub async fn handle_notify(&self, token_raw: &str, body: &str) -> CastResult<()> {
        let token: u128 = token_raw.parse().map_err(|_| CastError::MalformedRequest)?;
        let (was_errored, status, client, control_url) = {
            let entry = self.handles.get(&token).ok_or(CastError::Forbidden)?;
            let status = parse_transport_status(body);
            let was_errored = entry.state.errored.swap(status == TransportStatus::Error, Ordering::SeqCst);
            *entry.state.status.lock() = status;
            (was_errored, status, entry.client.clone(), entry.control_url.clone())
        };

        if was_errored && status == TransportStatus::Nothing {
            log::info!("upnp device {} recovered from error, reconnecting", token);
            if let Err(e) =
                send_soap_action(&client, &control_url, "Play", &[("InstanceID", "0"), ("Speed", "1")]).await
            {
                log::warn!("upnp device {} reconnect failed: {}", token, e);
            }
        }
        Ok(())
    }
}

impl Default for UpnpNotifyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// SSDP-based discovery of AVTransport-capable renderers.
pub struct UpnpDeviceFinder {
    notify_registry: Arc<UpnpNotifyRegistry>,
    callback_base_url: String,
    request_timeout: Duration,
}

impl UpnpDeviceFinder {
    pub fn new(
        notify_registry: Arc<UpnpNotifyRegistry>,
        callback_base_url: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            notify_registry,
            callback_base_url,
            request_timeout,
        }
    }

    async fn search(&self) -> CastResult<Vec<(String, String)>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| CastError::Connection(e.to_string()))?;
        let search_request = format!(
            "M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nMX: 2\r\nST: {}\r\n\r\n",
            AVTRANSPORT_SEARCH_TARGET
        );
        let broadcast: SocketAddr = "239.255.255.250:1900".parse().unwrap();
        socket
            .send_to(search_request.as_bytes(), broadcast)
            .await
            .map_err(|e| CastError::Connection(e.to_string()))?;

        let mut locations = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let mut buf = [0u8; 2048];
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((n, _))) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    if let Some(location) = extract_header(&text, "LOCATION") {
                        if seen.insert(location.clone()) {
                            locations.push(location);
                        }
                    }
                }
                _ => break,
            }
        }

        Ok(locations
            .into_iter()
            .map(|location| {
                let control_url = location.replace("/description.xml", "/MediaRenderer/AVTransport/Control");
                let event_url = location.replace("/description.xml", "/MediaRenderer/AVTransport/Event");
                (control_url, event_url)
            })
            .collect())
    }
}

fn extract_header<'a>(text: &'a str, header: &str) -> Option<String> {
    text.lines()
        .find(|line| line.to_ascii_uppercase().starts_with(&format!("{}:", header)))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
}

#[async_trait]
impl DeviceFinder for UpnpDeviceFinder {
    async fn find(&self) -> CastResult<Vec<Device>> {
        let endpoints = self.search().await?;
        Ok(endpoints
            .into_iter()
            .enumerate()
            .map(|(i, (control_url, event_url))| {
                Device::Upnp(UpnpDevice::new(
                    format!("upnp device {}", i),
                    control_url,
                    event_url,
                    self.notify_registry.clone(),
                    self.callback_base_url.clone(),
                ))
            })
            .collect())
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn auxiliary_routes(&self) -> Vec<(&'static str, &'static str)> {
        vec![("/upnp/notify/{local_token}", "NOTIFY")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_without_stopped_or_error_yields_playing() {
        let body = r#"<Event><InstanceID><TransportStatus val="OK"/></InstanceID></Event>"#;
        assert_eq!(parse_transport_status(body), TransportStatus::Playing);
    }

    #[test]
    fn stopped_short_circuits_even_after_ok() {
        let body = r#"<Event><TransportStatus val="OK"/><TransportStatus val="STOPPED"/></Event>"#;
        assert_eq!(parse_transport_status(body), TransportStatus::Stopped);
    }

    #[test]
    fn error_occurred_short_circuits() {
        let body = r#"<Event><TransportStatus val="ERROR_OCCURRED"/></Event>"#;
        assert_eq!(parse_transport_status(body), TransportStatus::Error);
    }

    #[test]
    fn no_status_at_all_yields_nothing() {
        let body = r#"<Event><SomeOtherTag val="x"/></Event>"#;
        assert_eq!(parse_transport_status(body), TransportStatus::Nothing);
    }

    #[test]
    fn stop_fault_transition_not_available_is_ignored() {
        assert!(is_safe_to_ignore_stop_fault(
            "Stop",
            "<faultstring>Transition not available</faultstring>"
        ));
    }

    #[test]
    fn stop_fault_is_not_ignored_for_other_actions() {
        assert!(!is_safe_to_ignore_stop_fault(
            "Play",
            "<faultstring>Transition not available</faultstring>"
        ));
    }

    #[tokio::test]
    async fn notify_registry_rejects_unknown_token() {
        let registry = UpnpNotifyRegistry::new();
        let result = registry.handle_notify("12345", "<Event/>").await;
        assert!(matches!(result, Err(CastError::Forbidden)));
    }

    #[tokio::test]
    async fn notify_registry_rejects_non_numeric_token() {
        let registry = UpnpNotifyRegistry::new();
        let result = registry.handle_notify("not-a-number", "<Event/>").await;
        assert!(matches!(result, Err(CastError::MalformedRequest)));
    }

    #[tokio::test]
    async fn error_to_nothing_transition_reissues_play() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(tokio::sync::Mutex::new(String::new()));
        let received_clone = received.clone();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            *received_clone.lock().await = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
            socket.write_all(response).await.unwrap();
        });

        let registry = UpnpNotifyRegistry::new();
        let state = Arc::new(UpnpDeviceState {
            status: parking_lot::Mutex::new(TransportStatus::Error),
            errored: AtomicBool::new(true),
            subscribe_task: parking_lot::Mutex::new(None),
        });
        registry.register(42, state, Client::new(), format!("http://{}/control", addr));

        let error_body = r#"<Event><TransportStatus val="ERROR_OCCURRED"/></Event>"#;
        registry.handle_notify("42", error_body).await.unwrap();

        let nothing_body = r#"<Event><SomeOtherTag val="x"/></Event>"#;
        registry.handle_notify("42", nothing_body).await.unwrap();

        let request = received.lock().await.clone();
        assert!(request.contains("SOAPAction"));
        assert!(request.contains("Play"));
    }
}
