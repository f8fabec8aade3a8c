//! Room ID generation and validation.
//!
//! A room ID names one peer's registration on the signaling relay. Another
//! peer types it in to send files there.
//!
//! ## ID Format
//!
//! Generated IDs are 8 characters drawn from lowercase ASCII letters and
//! digits (`a-z`, `0-9`), which gives 36^8 (about 2.8 * 10^12) IDs.
//!
//! IDs handed out by the relay itself (`GET {path}/{key}/id`) are UUIDs and
//! are accepted through [`RoomId::from_relay`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use speed_core::room::{RoomGenerator, RoomId};
//!
//! let id = RoomGenerator::new().generate();
//! println!("Your room ID: {id}");
//!
//! let id = RoomId::parse("k3x9q2ab")?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The character set used for room ID generation.
pub const ROOM_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a generated room ID.
pub const ROOM_ID_LENGTH: usize = 8;

/// Longest ID accepted from the relay.
const MAX_RELAY_ID_LENGTH: usize = 64;

/// A validated room ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId {
    id: String,
}

impl RoomId {
    /// Parse and validate a user-supplied room ID.
    ///
    /// Input is trimmed and lowercased before validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID has the wrong length or contains characters
    /// outside the room alphabet.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_lowercase();

        if normalized.len() != ROOM_ID_LENGTH {
            return Err(Error::InvalidRoomId(format!(
                "room ID must be {} characters, got {}",
                ROOM_ID_LENGTH,
                normalized.len()
            )));
        }

        if let Some(c) = normalized.bytes().find(|b| !ROOM_CHARSET.contains(b)) {
            return Err(Error::InvalidRoomId(format!(
                "invalid character '{}' in room ID",
                c as char
            )));
        }

        Ok(Self { id: normalized })
    }

    /// Accept an ID assigned by the relay.
    ///
    /// Relay IDs are not restricted to the room alphabet; anything made of
    /// ASCII alphanumerics, `-` and `_` is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is empty, too long, or has other characters.
    pub fn from_relay(input: &str) -> Result<Self> {
        let id = input.trim();
        if id.is_empty() || id.len() > MAX_RELAY_ID_LENGTH {
            return Err(Error::InvalidRoomId(format!(
                "relay assigned an unusable ID '{id}'"
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidRoomId(format!(
                "relay assigned an unusable ID '{id}'"
            )));
        }
        Ok(Self { id: id.to_string() })
    }

    /// Parse user input, falling back to relay-style IDs.
    ///
    /// Lets a sender type either a generated room ID or one the relay handed
    /// out to the receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is neither form.
    pub fn parse_any(input: &str) -> Result<Self> {
        Self::parse(input).or_else(|_| Self::from_relay(input))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::str::FromStr for RoomId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_any(s)
    }
}

/// Generator for room IDs.
#[derive(Debug, Default)]
pub struct RoomGenerator;

impl RoomGenerator {
    /// Create a new room ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generate a new random room ID.
    #[must_use]
    pub fn generate(&self) -> RoomId {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let id: String = (0..ROOM_ID_LENGTH)
            .map(|_| {
                let idx = rng.gen_range(0..ROOM_CHARSET.len());
                ROOM_CHARSET[idx] as char
            })
            .collect();

        RoomId { id }
    }
}
