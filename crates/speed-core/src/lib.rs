//! # Speed Core Library
//!
//! `speed-core` provides the core functionality for Speed, a peer-to-peer
//! file transfer tool built around short room IDs.
//!
//! ## Features
//!
//! - **Room IDs**: 8-character IDs registered with a signaling relay
//! - **Relay-brokered handshake**: peers find each other through a
//!   PeerJS-compatible relay that never sees file bytes
//! - **Chunked transfers**: metadata, paced 64 KiB chunks, end marker
//! - **Bundles**: several files or a directory travel as one zip archive
//!
//! ## Modules
//!
//! - [`bundle`] - Preparing the selection (single file or zip bundle)
//! - [`channel`] - Data channel establishment between two peers
//! - [`config`] - Configuration management
//! - [`mod@file`] - Safe naming of received files
//! - [`protocol`] - Data-channel wire format
//! - [`relay`] - Signaling relay server
//! - [`room`] - Room ID generation and validation
//! - [`session`] - The peer: registration, sending and receiving
//! - [`signal`] - Signaling messages and relay client
//! - [`transfer`] - Chunked transfer engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use speed_core::{config::Config, session::Peer};
//!
//! let config = Config::load()?;
//! let mut peer = Peer::open(&config).await?;
//! println!("Room ID: {}", peer.id());
//!
//! // On another machine
//! sender.send(&room_id, &["photo.jpg".into()]).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

use std::time::Duration;

pub mod bundle;
pub mod channel;
pub mod config;
pub mod error;
pub mod file;
pub mod protocol;
pub mod room;
pub mod session;
pub mod signal;
pub mod transfer;

#[cfg(feature = "relay")]
pub mod relay;

pub use bundle::BUNDLE_NAME;
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data-channel protocol version
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Default relay port (`PORT` overrides it for the relay server)
pub const DEFAULT_RELAY_PORT: u16 = 4002;

/// Default relay mount path
pub const DEFAULT_RELAY_PATH: &str = "/myapp";

/// Default relay API key
pub const DEFAULT_RELAY_KEY: &str = "peerjs";

/// Default chunk size for file transfers (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Delay between chunk sends
pub const DEFAULT_CHUNK_PACING: Duration = Duration::from_millis(5);

/// Interval between relay keep-alives
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
