//! Inline control-button callback-data parsing.
//!
//! The wire format itself is consumed by an external bot-handler
//! collaborator (out of scope here), but parsing it is a pure data-model
//! operation this crate owns and exposes for that collaborator to call.

use crate::error::{CastError, CastResult};
use crate::token::LocalToken;

/// One of the three callback prefixes: control (play/stop/pause/resume),
/// device-menu (refresh/open device picker), or select (pick a device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPrefix {
    Control,
    DeviceMenu,
    Select,
}

impl CallbackPrefix {
    /// The legacy device-menu prefix is the same literal as the control
    /// prefix (`"c"`), so buttons that predate the dedicated `"d"` prefix
    /// are told apart by their action name instead: `DEVICE`/`REFRESH`
    /// open the device menu even though the prefix reads `"c"`.
    fn parse(raw: &str, action: &str) -> Option<Self> {
        match raw {
            crate::protocol_constants::CALLBACK_PREFIX_DEVICE_MENU => Some(Self::DeviceMenu),
            crate::protocol_constants::CALLBACK_PREFIX_SELECT => Some(Self::Select),
            crate::protocol_constants::CALLBACK_PREFIX_CONTROL => {
                if action.eq_ignore_ascii_case("DEVICE") || action.eq_ignore_ascii_case("REFRESH") {
                    Some(Self::DeviceMenu)
                } else {
                    Some(Self::Control)
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCallback {
    pub prefix: CallbackPrefix,
    pub token: LocalToken,
    pub action: String,
}

/// Parses `{prefix}:{local_token_hex}:{action}`, or the legacy
/// `{prefix}:{message_id}:{token}:{action}` four-field form with the two
/// token halves given as separate decimal fields.
pub fn parse_callback(data: &str) -> CastResult<ParsedCallback> {
    let fields: Vec<&str> = data.split(':').collect();

    match fields.as_slice() {
        [prefix_raw, token_hex, action] => {
            let prefix = CallbackPrefix::parse(prefix_raw, action).ok_or(CastError::UnknownCallback)?;
            let token = LocalToken::deserialize(token_hex).map_err(|_| CastError::UnknownCallback)?;
            Ok(ParsedCallback {
                prefix,
                token,
                action: action.to_string(),
            })
        }
        [prefix_raw, message_id_raw, random_raw, action] => {
            let prefix = CallbackPrefix::parse(prefix_raw, action).ok_or(CastError::UnknownCallback)?;
            let message_id: u64 = message_id_raw.parse().map_err(|_| CastError::UnknownCallback)?;
            let random: u64 = random_raw.parse().map_err(|_| CastError::UnknownCallback)?;
            Ok(ParsedCallback {
                prefix,
                token: LocalToken::from_parts(message_id, random),
                action: action.to_string(),
            })
        }
        _ => Err(CastError::UnknownCallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_four_field_form_matches_hex_form() {
        let token = LocalToken::from_parts(12345, 67890);
        let hex = format!("c:{}:PLAY", token);
        let legacy = "c:12345:67890:PLAY";

        let from_hex = parse_callback(&hex).unwrap();
        let from_legacy = parse_callback(legacy).unwrap();

        assert_eq!(from_hex, from_legacy);
        assert_eq!(from_hex.prefix, CallbackPrefix::Control);
        assert_eq!(from_hex.token, token);
        assert_eq!(from_hex.action, "PLAY");
    }

    #[test]
    fn legacy_control_prefix_with_device_action_is_classified_as_device_menu() {
        let token = LocalToken::from_parts(1, 2);
        let data = format!("c:{}:DEVICE", token);
        let parsed = parse_callback(&data).unwrap();
        assert_eq!(parsed.prefix, CallbackPrefix::DeviceMenu);
    }

    #[test]
    fn dedicated_device_menu_prefix_is_classified_as_device_menu() {
        let token = LocalToken::from_parts(1, 2);
        let data = format!("d:{}:REFRESH", token);
        let parsed = parse_callback(&data).unwrap();
        assert_eq!(parsed.prefix, CallbackPrefix::DeviceMenu);
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        assert!(matches!(
            parse_callback("z:deadbeef:PLAY"),
            Err(CastError::UnknownCallback)
        ));
    }

    #[test]
    fn malformed_field_count_is_rejected() {
        assert!(matches!(parse_callback("c:only-two"), Err(CastError::UnknownCallback)));
    }

    #[test]
    fn non_hex_token_is_rejected() {
        assert!(matches!(
            parse_callback("c:not-hex:PLAY"),
            Err(CastError::UnknownCallback)
        ));
    }
}
