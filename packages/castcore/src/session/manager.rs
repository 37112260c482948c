//! `SessionManager`: lifecycle of `PlayingSession`s and per-user default
//! device selection.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::block_source::DocumentRef;
use crate::device::registry::DeviceRegistry;
use crate::device::Device;
use crate::session::playing::{ControlSink, LoggingControlSink, PlayingSession};
use crate::token::LocalToken;

/// A regex-free version of the source's `"on device ([^,]*)"` extraction:
/// finds the substring following `"on device "` up to the next comma.
pub fn parse_device_name(control_text: &str) -> Option<&str> {
    let start = control_text.find("on device ")? + "on device ".len();
    let rest = &control_text[start..];
    let end = rest.find(',').unwrap_or(rest.len());
    let name = rest[..end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Owns the live [`PlayingSession`]s and the last device each user
/// selected. Grounded on the source's `PlayingVideos`: a plain in-memory
/// map (no persistence across restarts — sessions are re-derived on demand
/// via [`SessionManager::reconstruct`] instead of replayed).
pub struct SessionManager {
    sessions: DashMap<LocalToken, Mutex<PlayingSession>>,
    user_defaults: DashMap<u64, Arc<Device>>,
    registry: Arc<DeviceRegistry>,
    sink: Arc<dyn ControlSink>,
}

impl SessionManager {
    pub fn new(registry: Arc<DeviceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            user_defaults: DashMap::new(),
            registry,
            sink: Arc::new(LoggingControlSink),
        })
    }

    pub fn with_sink(registry: Arc<DeviceRegistry>, sink: Arc<dyn ControlSink>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            user_defaults: DashMap::new(),
            registry,
            sink,
        })
    }

    pub fn user_device(&self, user_id: u64) -> Option<Arc<Device>> {
        self.user_defaults.get(&user_id).map(|e| e.value().clone())
    }

    pub fn set_user_device(&self, user_id: u64, device: Arc<Device>) {
        self.user_defaults.insert(user_id, device);
    }

    /// Creates a fresh session, falling back to the user's stored default
    /// device if none is given explicitly.
    pub fn new_session(
        &self,
        local_token: LocalToken,
        user_id: u64,
        control_ref: String,
        video_ref: DocumentRef,
        link_ref: Option<String>,
        device: Option<Arc<Device>>,
    ) {
        let device = device.or_else(|| self.user_device(user_id));
        let session = PlayingSession::new(local_token, user_id, control_ref, video_ref, link_ref, device);
        self.sessions.insert(local_token, Mutex::new(session));
    }

    /// Runs `f` against the session for `token`, if it exists.
    pub fn with_session<R>(&self, token: &LocalToken, f: impl FnOnce(&mut PlayingSession) -> R) -> Option<R> {
        self.sessions.get(token).map(|entry| f(&mut entry.lock()))
    }

    pub fn sink(&self) -> &dyn ControlSink {
        self.sink.as_ref()
    }

    /// Re-derives a [`PlayingSession`] for a token the in-memory map no
    /// longer holds (e.g. after a process restart), given the externally
    /// durable control message text to recover the device selection from.
    /// This is a cache-fill: the reconstructed session's block/transport
    /// observations start empty, exactly as a freshly admitted one would.
    pub async fn reconstruct(
        &self,
        local_token: LocalToken,
        user_id: u64,
        control_ref: String,
        control_text: &str,
        video_ref: DocumentRef,
        link_ref: Option<String>,
    ) {
        if self.sessions.contains_key(&local_token) {
            return;
        }
        let device_name = parse_device_name(control_text).map(str::to_string);
        let device = match device_name {
            Some(name) => self.registry.find_device_by_name(&name).await.ok(),
            None => None,
        }
        .or_else(|| self.user_device(user_id));

        self.new_session(local_token, user_id, control_ref, video_ref, link_ref, device);
    }

    /// Selects a device for `token`'s session and persists it as that
    /// session's user's new default, re-rendering the Stopped message.
    /// No-op if the token has no live session.
    pub async fn select_device(&self, token: LocalToken, device: Arc<Device>) {
        let Some(user_id) = self.with_session(&token, |session| session.user_id) else {
            return;
        };
        self.set_user_device(user_id, device.clone());
        if let Some(entry) = self.sessions.get(&token) {
            let mut session = entry.value().lock();
            session.select_device(device, self.sink.as_ref()).await;
        }
    }

    /// Drives the close path on reclamation: renders the Stopped message
    /// with the remaining percentage, calls `on_close` on the device, and
    /// removes the session.
    pub async fn close(&self, token: LocalToken, remaining_pct: f64) {
        let Some((_, session_lock)) = self.sessions.remove(&token) else {
            return;
        };
        let mut session = session_lock.into_inner();
        session.close(remaining_pct, self.sink.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_name_extracts_up_to_comma() {
        assert_eq!(
            parse_device_name("Streaming closed for file 1 on device living room tv, 42.00% remains"),
            Some("living room tv")
        );
    }

    #[test]
    fn parse_device_name_without_comma_takes_rest_of_string() {
        assert_eq!(
            parse_device_name("Playing for file 1 on device kitchen speaker"),
            Some("kitchen speaker")
        );
    }

    #[test]
    fn parse_device_name_none_returns_none() {
        assert_eq!(parse_device_name("on device NONE, 10% remains"), Some("NONE"));
    }

    #[test]
    fn parse_device_name_missing_marker_returns_none() {
        assert_eq!(parse_device_name("no device info here"), None);
    }

    #[tokio::test]
    async fn close_removes_session_and_is_idempotent() {
        let registry = Arc::new(DeviceRegistry::new(vec![]));
        let manager = SessionManager::new(registry);
        let token = LocalToken::new(1);
        manager.new_session(
            token,
            1,
            "ctl".into(),
            DocumentRef {
                message_id: 1,
                size: 100,
                filename: None,
            },
            None,
            None,
        );
        manager.close(token, 50.0).await;
        assert!(manager.with_session(&token, |_| ()).is_none());
        // closing again is a no-op, not a panic
        manager.close(token, 50.0).await;
    }
}
