//! 128-bit session identifier.
//!
//! Composed of a `message_id` (the remote document's id) and a random
//! component, so that a token both names the document it streams and cannot
//! be guessed from the document id alone.

use rand::RngCore;
use std::fmt;

/// Opaque per-session identifier: `message_id` in the high 64 bits, a random
/// value in the low 64 bits of the combined 128-bit hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalToken {
    pub message_id: u64,
    pub random: u64,
}

impl LocalToken {
    /// Builds a token for `message_id` with a freshly generated random half.
    pub fn new(message_id: u64) -> Self {
        Self {
            message_id,
            random: secret_token(),
        }
    }

    /// Builds a token from explicit halves (used by the legacy callback format).
    pub fn from_parts(message_id: u64, random: u64) -> Self {
        Self { message_id, random }
    }

    /// Combines the two halves into the single 128-bit value used for hex
    /// serialization, equality, and hashing: `(message_id << 64) ^ random`.
    pub fn as_u128(&self) -> u128 {
        ((self.message_id as u128) << 64) ^ (self.random as u128)
    }

    /// Parses a hex string produced by [`LocalToken::to_string`] (or `Display`).
    pub fn deserialize(hex: &str) -> Result<Self, TokenParseError> {
        let value = u128::from_str_radix(hex, 16).map_err(|_| TokenParseError)?;
        let message_id = (value >> 64) as u64;
        let random = (value & u64::MAX as u128) as u64;
        Ok(Self { message_id, random })
    }
}

impl fmt::Display for LocalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.as_u128())
    }
}

impl fmt::Debug for LocalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalToken({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed local token")]
pub struct TokenParseError;

/// Generates a random 64-bit token component.
pub fn secret_token() -> u64 {
    rand::thread_rng().next_u64()
}
