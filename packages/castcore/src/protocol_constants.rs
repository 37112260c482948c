//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the remote-document streaming protocol and
//! the inline-control callback wire format; changing them breaks compatibility
//! with already-rendered control messages and in-flight stream URLs.

/// Default fetch unit size from the remote document store (bytes).
pub const DEFAULT_BLOCK_SIZE: u64 = 1_048_576;

/// Default idle-timeout before a session with no open transports is reclaimed (seconds).
pub const DEFAULT_REQUEST_GONE_TIMEOUT_SECS: u64 = 900;

/// Callback-data prefix for video control buttons (PLAY/STOP/PAUSE/RESUME).
pub const CALLBACK_PREFIX_CONTROL: &str = "c";

/// Callback-data prefix for the device menu (REFRESH/DEVICE).
pub const CALLBACK_PREFIX_DEVICE_MENU: &str = "d";

/// Legacy callback-data prefix accepted by the device menu for backward compatibility.
pub const CALLBACK_PREFIX_DEVICE_MENU_LEGACY: &str = "c";

/// Callback-data prefix for device selection.
pub const CALLBACK_PREFIX_SELECT: &str = "s";

/// UPnP AVTransport service schema searched for via SSDP.
pub const AVTRANSPORT_SCHEMA: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// DLNA protocol-info flags used in the DIDL-Lite `res` element for video items.
pub const DLNA_VIDEO_FLAGS: &str = "21700000000000000000000000000000";

/// Interval between UPnP AVTransport event (GENA) re-subscriptions.
///
/// Shorter than a typical GENA subscription timeout on purpose: some
/// renderers (Samsung TVs, notably) do not honor `async_resubscribe_all`
/// style renewal and require a full unsubscribe/subscribe cycle.
pub const UPNP_RESUBSCRIBE_INTERVAL_SECS: u64 = 10;

/// VLC telnet auth-challenge magic: banner suffix that signals a password prompt.
pub const VLC_AUTH_CHALLENGE: &[u8] = b"\xff\xfb\x01";

/// VLC telnet auth-ok magic: response prefix that signals successful authentication.
pub const VLC_AUTH_OK: &[u8] = b"\xff\xfc\x01\r\nWelcome";

/// Line terminator VLC's telnet control protocol expects after each command.
pub const VLC_EOF: &[u8] = b"\n\r";
