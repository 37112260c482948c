//! `PlayingSession`: the token/device/control-message state machine.

use async_trait::async_trait;
use std::sync::Arc;

use crate::block_source::DocumentRef;
use crate::device::Device;
use crate::error::{CastError, CastResult};
use crate::token::LocalToken;

/// Playback state, mirroring invariant 4's transition graph: Stopped →
/// Playing on PLAY; Playing → Paused on PAUSE; Paused → Playing on RESUME;
/// {Playing, Paused} → Stopped on STOP or idle reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Playing,
    Paused,
}

/// Buttons shown under a rendered control message, matching the source's
/// {DEVICE,PLAY} / {STOP,PAUSE} / {STOP,RESUME} button sets per state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlButtons {
    StoppedIdle,
    Playing,
    Paused,
    DeviceSelect,
}

/// External collaborator that renders a session's user-visible control
/// surface (the source's editable Telegram message with inline buttons).
/// `control_ref` is the opaque id from [`crate::session::table`]'s admitted
/// session; an injected sink keeps this crate's session logic independent
/// of any particular notification channel.
#[async_trait]
pub trait ControlSink: Send + Sync {
    async fn render(&self, control_ref: &str, text: &str, buttons: ControlButtons);
}

/// Sink that only logs; used where no UI collaborator is configured.
pub struct LoggingControlSink;

#[async_trait]
impl ControlSink for LoggingControlSink {
    async fn render(&self, control_ref: &str, text: &str, _buttons: ControlButtons) {
        log::info!("control[{}]: {}", control_ref, text);
    }
}

fn device_str(device: Option<&Device>) -> String {
    match device {
        Some(d) => d.get_device_name().to_string(),
        None => "NONE".to_string(),
    }
}

pub struct PlayingSession {
    pub local_token: LocalToken,
    pub user_id: u64,
    pub control_ref: String,
    pub video_ref: DocumentRef,
    pub link_ref: Option<String>,
    pub state: SessionState,
    pub device: Option<Arc<Device>>,
}

impl PlayingSession {
    pub fn new(
        local_token: LocalToken,
        user_id: u64,
        control_ref: String,
        video_ref: DocumentRef,
        link_ref: Option<String>,
        device: Option<Arc<Device>>,
    ) -> Self {
        Self {
            local_token,
            user_id,
            control_ref,
            video_ref,
            link_ref,
            state: SessionState::Stopped,
            device,
        }
    }

    fn message_str(&self) -> String {
        format!("for file {}", self.video_ref.message_id)
    }

    async fn send_playing(&self, sink: &dyn ControlSink) {
        let text = format!("Playing {} on device {}", self.message_str(), device_str(self.device.as_deref()));
        sink.render(&self.control_ref, &text, ControlButtons::Playing).await;
    }

    async fn send_paused(&self, sink: &dyn ControlSink) {
        let text = format!("Paused {} on device {}", self.message_str(), device_str(self.device.as_deref()));
        sink.render(&self.control_ref, &text, ControlButtons::Paused).await;
    }

    async fn send_stopped(&self, sink: &dyn ControlSink, remaining_pct: Option<f64>) {
        let text = match remaining_pct {
            Some(pct) => format!(
                "Streaming closed {} on device {}, {:.2}% remains",
                self.message_str(),
                device_str(self.device.as_deref()),
                pct
            ),
            None => format!("Controller {} on device {}", self.message_str(), device_str(self.device.as_deref())),
        };
        sink.render(&self.control_ref, &text, ControlButtons::StoppedIdle).await;
    }

    /// Raises `NoDevice` before touching any session state if no device is
    /// selected (matches the source checking `self.playing_device` first).
    pub async fn play(
        &mut self,
        uri: &str,
        sink: &dyn ControlSink,
    ) -> CastResult<()> {
        let Some(device) = self.device.clone() else {
            return Err(CastError::NoDevice);
        };

        let filename = self.video_ref.display_filename();
        device.stop().await.ok();
        device.play(uri, &filename).await?;
        self.state = SessionState::Playing;
        self.send_playing(sink).await;
        Ok(())
    }

    /// Best-effort device stop; the control message is *always* rendered
    /// regardless of outcome, and a missing device is reported only after
    /// rendering.
    pub async fn stop(&mut self, sink: &dyn ControlSink) -> CastResult<()> {
        let had_device = self.device.is_some();
        if let Some(device) = &self.device {
            if let Err(e) = device.stop().await {
                log::warn!("failed to stop device {}: {}", device.get_device_name(), e);
            }
        }
        self.state = SessionState::Stopped;
        self.send_stopped(sink, None).await;
        if !had_device {
            return Err(CastError::NoDevice);
        }
        Ok(())
    }

    pub async fn pause(&mut self, sink: &dyn ControlSink) -> CastResult<()> {
        let Some(device) = self.device.clone() else {
            return Err(CastError::NoDevice);
        };
        device.pause().await?;
        self.state = SessionState::Paused;
        self.send_paused(sink).await;
        Ok(())
    }

    pub async fn resume(&mut self, sink: &dyn ControlSink) -> CastResult<()> {
        let Some(device) = self.device.clone() else {
            return Err(CastError::NoDevice);
        };
        device.resume().await?;
        self.state = SessionState::Playing;
        self.send_playing(sink).await;
        Ok(())
    }

    /// Invoked only by the reclamation path, never by an explicit `stop`:
    /// `on_close` releases session-scoped resources (a GENA subscription, a
    /// notify-handler registration) that remain valid across a
    /// stop/replay cycle but must be torn down once the session itself is
    /// destroyed.
    pub async fn close(&mut self, remaining_pct: f64, sink: &dyn ControlSink) {
        self.send_stopped(sink, Some(remaining_pct)).await;
        if let Some(device) = &self.device {
            device.on_close().await;
        }
        self.state = SessionState::Stopped;
    }

    /// Sets the device, persists it as the session's selection, and
    /// re-renders the Stopped message unconditionally (not a "device
    /// changed" notice).
    pub async fn select_device(&mut self, device: Arc<Device>, sink: &dyn ControlSink) {
        self.device = Some(device);
        self.send_stopped(sink, None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::web::WebDevice;
    use parking_lot::Mutex;

    struct RecordingSink {
        renders: Mutex<Vec<(String, ControlButtons)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                renders: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ControlSink for RecordingSink {
        async fn render(&self, _control_ref: &str, text: &str, buttons: ControlButtons) {
            self.renders.lock().push((text.to_string(), buttons));
        }
    }

    fn make_doc() -> DocumentRef {
        DocumentRef {
            message_id: 42,
            size: 1000,
            filename: Some("movie.mp4".into()),
        }
    }

    #[tokio::test]
    async fn play_without_device_raises_no_device_before_any_rendering() {
        let sink = RecordingSink::new();
        let mut session = PlayingSession::new(
            LocalToken::new(42),
            1,
            "ctl-1".into(),
            make_doc(),
            None,
            None,
        );
        let result = session.play("http://x/stream", &sink).await;
        assert!(matches!(result, Err(CastError::NoDevice)));
        assert!(sink.renders.lock().is_empty());
        assert_eq!(session.state, SessionState::Stopped);
    }

    #[tokio::test]
    async fn stop_with_no_device_still_renders_then_reports_no_device() {
        let sink = RecordingSink::new();
        let mut session = PlayingSession::new(
            LocalToken::new(42),
            1,
            "ctl-1".into(),
            make_doc(),
            None,
            None,
        );
        let result = session.stop(&sink).await;
        assert_eq!(sink.renders.lock().len(), 1);
        assert!(matches!(result, Err(CastError::NoDevice)));
    }

    #[tokio::test]
    async fn pause_without_pausable_device_reports_action_not_supported() {
        let sink = RecordingSink::new();
        let device = Arc::new(Device::Web(WebDevice::new_for_test("web @(1.2.3.4)".into())));
        let mut session = PlayingSession::new(
            LocalToken::new(42),
            1,
            "ctl-1".into(),
            make_doc(),
            None,
            Some(device),
        );
        let result = session.pause(&sink).await;
        assert!(matches!(result, Err(CastError::ActionNotSupported)));
    }

    #[tokio::test]
    async fn select_device_rerenders_stopped_message_unconditionally() {
        let sink = RecordingSink::new();
        let mut session = PlayingSession::new(
            LocalToken::new(42),
            1,
            "ctl-1".into(),
            make_doc(),
            None,
            None,
        );
        let device = Arc::new(Device::Web(WebDevice::new_for_test("tv".into())));
        session.select_device(device, &sink).await;
        let renders = sink.renders.lock();
        assert_eq!(renders.len(), 1);
        assert_eq!(renders[0].1, ControlButtons::StoppedIdle);
    }
}
