//! Signaling messages exchanged through the relay.
//!
//! The relay speaks the PeerJS server dialect: every WebSocket text frame is
//! a JSON object with a `type`, and optional `src`, `dst` and `payload`.
//!
//! | Type | Direction | Meaning |
//! |---|---|---|
//! | `OPEN` | relay → peer | registration accepted |
//! | `ID-TAKEN` | relay → peer | another peer holds this ID |
//! | `ERROR` | relay → peer | registration refused, `payload.msg` says why |
//! | `HEARTBEAT` | peer → relay | keeps the registration alive |
//! | `OFFER` / `ANSWER` / `CANDIDATE` | peer ↔ peer | connection handshake |
//! | `LEAVE` | peer ↔ peer | peer is going away |
//! | `EXPIRE` | relay → peer | a queued message to `src` was never delivered |

pub mod client;

pub use client::{RelayEndpoint, SignalClient};

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Signaling message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SignalKind {
    /// Registration accepted
    Open,
    /// Requested ID already registered
    IdTaken,
    /// Registration refused
    Error,
    /// Keep-alive
    Heartbeat,
    /// Connection offer
    Offer,
    /// Connection answer
    Answer,
    /// Extra connection candidate
    Candidate,
    /// Peer left
    Leave,
    /// Undeliverable message expired
    Expire,
}

impl SignalKind {
    /// Whether the relay forwards this kind between peers.
    #[must_use]
    pub const fn is_forwarded(self) -> bool {
        matches!(
            self,
            Self::Offer | Self::Answer | Self::Candidate | Self::Leave | Self::Expire
        )
    }

    /// Whether the relay keeps this kind for an offline destination.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::Candidate)
    }
}

/// A message on the signaling socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    /// Message type
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Sending peer (filled in by the relay)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub src: Option<String>,
    /// Destination peer
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dst: Option<String>,
    /// Type-specific payload
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<serde_json::Value>,
}

impl SignalMessage {
    /// A bare message of the given kind.
    #[must_use]
    pub const fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            src: None,
            dst: None,
            payload: None,
        }
    }

    /// A keep-alive.
    #[must_use]
    pub const fn heartbeat() -> Self {
        Self::new(SignalKind::Heartbeat)
    }

    /// Relay refusal carrying a human-readable reason.
    #[must_use]
    pub fn error(msg: &str) -> Self {
        Self::new(SignalKind::Error).with_payload(serde_json::json!({ "msg": msg }))
    }

    /// An `OFFER` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn offer(dst: &str, payload: &OfferPayload) -> Result<Self> {
        Ok(Self::new(SignalKind::Offer)
            .with_dst(dst)
            .with_payload(serde_json::to_value(payload)?))
    }

    /// An `ANSWER` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn answer(dst: &str, payload: &AnswerPayload) -> Result<Self> {
        Ok(Self::new(SignalKind::Answer)
            .with_dst(dst)
            .with_payload(serde_json::to_value(payload)?))
    }

    /// Set the destination.
    #[must_use]
    pub fn with_dst(mut self, dst: &str) -> Self {
        self.dst = Some(dst.to_string());
        self
    }

    /// Set the source.
    #[must_use]
    pub fn with_src(mut self, src: &str) -> Self {
        self.src = Some(src.to_string());
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Deserialize the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the payload is missing or malformed.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let payload = self.payload.clone().ok_or_else(|| {
            Error::ProtocolError(format!("{:?} message without payload", self.kind))
        })?;
        serde_json::from_value(payload)
            .map_err(|e| Error::ProtocolError(format!("bad {:?} payload: {e}", self.kind)))
    }

    /// The `payload.msg` string of `ERROR` / `ID-TAKEN` messages.
    #[must_use]
    pub fn message_text(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("msg"))
            .and_then(serde_json::Value::as_str)
    }

    /// Encode to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the text is not a signaling message.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::ProtocolError(format!("bad signaling message: {e}")))
    }
}

/// Payload of an `OFFER`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    /// Id both sides use to match the data channel
    pub connection_id: String,
    /// Connection type, always `"data"`
    #[serde(rename = "type")]
    pub connection_type: String,
    /// Channel label
    pub label: String,
    /// Serialization of the channel
    pub serialization: String,
    /// Whether the channel is reliable and ordered
    pub reliable: bool,
}

impl OfferPayload {
    /// A data-channel offer with the given connection id.
    #[must_use]
    pub fn data(connection_id: impl Into<String>) -> Self {
        let connection_id = connection_id.into();
        Self {
            label: connection_id.clone(),
            connection_id,
            connection_type: "data".to_string(),
            serialization: "binary".to_string(),
            reliable: true,
        }
    }
}

/// Payload of an `ANSWER`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    /// Connection id copied from the offer
    pub connection_id: String,
    /// Addresses the answering peer accepts the data channel on
    pub candidates: Vec<SocketAddr>,
}
