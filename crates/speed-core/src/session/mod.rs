//! The peer: one registration on the relay, sending and receiving files.
//!
//! A [`Peer`] publishes two watch channels for front ends:
//!
//! - [`Status`], the one-line connection status
//! - [`TransferProgress`], bytes and percentage of the transfer in flight

use std::fmt;
use std::path::PathBuf;

use tokio::sync::watch;

use crate::bundle::{self, needs_bundle};
use crate::channel;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::room::{RoomGenerator, RoomId};
use crate::signal::{RelayEndpoint, SignalClient, SignalKind};
use crate::transfer::{self, ReceivedFile, TransferConfig, TransferProgress, TransferState};

/// Registration attempts before giving up on `ID-TAKEN`.
const MAX_REGISTER_ATTEMPTS: usize = 3;

/// Connection status of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Registering with the relay
    Initializing,
    /// Registered, idle
    Ready,
    /// Files chosen for sending
    Selected(usize),
    /// Building a multi-file bundle
    Zipping,
    /// Sending to our own room ID
    ProcessingLocal,
    /// Local transfer done
    LocalCompleted,
    /// Streaming a file to a peer
    Sending(String),
    /// File sent
    Sent,
    /// A peer connected and is sending
    Receiving,
    /// File received
    Received,
    /// Something went wrong; the text is the full status line
    Error(String),
}

impl Status {
    /// Routine statuses a front end may leave unannounced.
    #[must_use]
    pub const fn is_notice(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Sent | Self::LocalCompleted | Self::Selected(_)
        )
    }

    /// Whether this is an error status.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing..."),
            Self::Ready => write!(f, "Connected and ready"),
            Self::Selected(count) => write!(f, "{count} file(s) selected."),
            Self::Zipping => write!(f, "Zipping files..."),
            Self::ProcessingLocal => write!(f, "Processing local file(s)..."),
            Self::LocalCompleted => write!(f, "Local transfer completed"),
            Self::Sending(name) => write!(f, "Sending: {name}"),
            Self::Sent => write!(f, "Files sent successfully"),
            Self::Receiving => write!(f, "Peer connected! Receiving file(s)..."),
            Self::Received => write!(f, "Files received successfully"),
            Self::Error(line) => write!(f, "{line}"),
        }
    }
}

/// Result of [`Peer::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Streamed to another peer
    Sent {
        /// File name announced to the receiver
        name: String,
        /// Bytes sent
        size: u64,
        /// Chunks sent
        chunks: u64,
    },
    /// Receiver was our own room ID; the file never left this process
    Local(ReceivedFile),
}

/// A peer registered on the relay under a room ID.
#[derive(Debug)]
pub struct Peer {
    signal: SignalClient,
    config: TransferConfig,
    status_tx: watch::Sender<Status>,
    progress_tx: watch::Sender<TransferProgress>,
}

impl Peer {
    /// Register a freshly generated room ID with the configured relay.
    ///
    /// A taken ID is regenerated up to three times.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay is unreachable or refuses every ID.
    pub async fn open(config: &Config) -> Result<Self> {
        let endpoint = RelayEndpoint::new(config.relay.clone());
        let generator = RoomGenerator::new();

        let mut attempt = 1;
        let signal = loop {
            let id = generator.generate();
            match SignalClient::connect(&endpoint, id).await {
                Ok(signal) => break signal,
                Err(Error::IdTaken(id)) if attempt < MAX_REGISTER_ATTEMPTS => {
                    tracing::warn!("Room ID {} is taken, generating another", id);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        Ok(Self::from_signal(signal, config))
    }

    /// Register a specific room ID.
    ///
    /// # Errors
    ///
    /// Returns `Error::IdTaken` if another peer holds `id`.
    pub async fn open_as(config: &Config, id: RoomId) -> Result<Self> {
        let endpoint = RelayEndpoint::new(config.relay.clone());
        let signal = SignalClient::connect(&endpoint, id).await?;
        Ok(Self::from_signal(signal, config))
    }

    fn from_signal(signal: SignalClient, config: &Config) -> Self {
        let (status_tx, _) = watch::channel(Status::Initializing);
        let (progress_tx, _) = watch::channel(TransferProgress::default());
        status_tx.send_replace(Status::Ready);

        Self {
            signal,
            config: TransferConfig::from(&config.transfer),
            status_tx,
            progress_tx,
        }
    }

    /// Our room ID.
    #[must_use]
    pub const fn id(&self) -> &RoomId {
        self.signal.id()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    /// Subscribe to transfer progress.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress_tx.subscribe()
    }

    fn set_status(&self, status: Status) {
        tracing::debug!("Status: {}", status);
        self.status_tx.send_replace(status);
    }

    fn fail(&self, error: Error) -> Error {
        self.set_status(Status::Error(error.status()));
        self.progress_tx
            .send_modify(|p| p.state = TransferState::Failed);
        error
    }

    /// Send `paths` to the peer registered as `receiver`.
    ///
    /// Several paths, or a directory, are bundled into one zip archive.
    /// Sending to our own room ID hands the file straight back.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` if nothing is selected or `receiver` is blank
    /// - `Error::FileRead` if a file cannot be read
    /// - `Error::PeerUnavailable` if no peer holds `receiver`
    /// - any channel error from the transfer
    pub async fn send(&mut self, receiver: &str, paths: &[PathBuf]) -> Result<SendOutcome> {
        if paths.is_empty() {
            return Err(self.fail(Error::InvalidInput("no files selected".to_string())));
        }
        if receiver.trim().is_empty() {
            return Err(self.fail(Error::InvalidInput("no receiver ID given".to_string())));
        }
        let receiver = RoomId::parse_any(receiver).map_err(|e| self.fail(e))?;

        self.set_status(Status::Selected(paths.len()));
        self.progress_tx.send_replace(TransferProgress::default());

        if needs_bundle(paths) {
            self.set_status(Status::Zipping);
        }
        let file = bundle::prepare(paths).await.map_err(|e| self.fail(e))?;

        if &receiver == self.id() {
            self.set_status(Status::ProcessingLocal);
            let received = transfer::local_transfer(file, &self.progress_tx).await;
            self.set_status(Status::LocalCompleted);
            return Ok(SendOutcome::Local(received));
        }

        self.progress_tx.send_modify(|p| {
            *p = TransferProgress::new(file.name.clone(), file.data.len() as u64);
            p.state = TransferState::Connecting;
        });

        let mut channel = channel::dial(&mut self.signal, &receiver, &self.config)
            .await
            .map_err(|e| self.fail(e))?;

        self.set_status(Status::Sending(file.name.clone()));
        let chunks = transfer::send_file(&mut channel, &file, &self.config, &self.progress_tx)
            .await
            .map_err(|e| self.fail(e))?;
        channel.close().await;

        self.set_status(Status::Sent);
        Ok(SendOutcome::Sent {
            name: file.name,
            size: file.data.len() as u64,
            chunks,
        })
    }

    /// Wait for a peer to connect and receive one file.
    ///
    /// # Errors
    ///
    /// - `Error::MissingMetadata` if the sender streams data before metadata
    /// - `Error::ConnectionLost` if the channel closes mid-transfer
    /// - `Error::RelayUnreachable` if the relay connection drops
    pub async fn receive(&mut self) -> Result<ReceivedFile> {
        let offer = loop {
            let Some(message) = self.signal.recv().await else {
                return Err(self.fail(Error::RelayUnreachable(
                    "relay connection closed".to_string(),
                )));
            };
            match message.kind {
                SignalKind::Offer => break message,
                SignalKind::Error => {
                    let reason = message.message_text().unwrap_or("unknown error").to_string();
                    return Err(self.fail(Error::Relay(reason)));
                }
                other => tracing::debug!("Ignoring {:?} while waiting for a peer", other),
            }
        };

        let mut channel = channel::accept_offer(&self.signal, &offer, &self.config)
            .await
            .map_err(|e| self.fail(e))?;

        self.set_status(Status::Receiving);
        self.progress_tx.send_replace(TransferProgress::default());

        let file = transfer::receive_file(&mut channel, &self.progress_tx)
            .await
            .map_err(|e| self.fail(e))?;
        channel.close().await;

        self.set_status(Status::Received);
        Ok(file)
    }

    /// Leave the relay.
    pub async fn close(self) {
        tracing::debug!("Closing peer {}", self.id());
        self.signal.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        assert_eq!(Status::Initializing.to_string(), "Initializing...");
        assert_eq!(Status::Ready.to_string(), "Connected and ready");
        assert_eq!(Status::Selected(3).to_string(), "3 file(s) selected.");
        assert_eq!(Status::Sending("a.zip".into()).to_string(), "Sending: a.zip");
        assert_eq!(
            Status::Receiving.to_string(),
            "Peer connected! Receiving file(s)..."
        );
        assert_eq!(
            Status::Error(Error::MissingMetadata.status()).to_string(),
            "Error: Received file without metadata."
        );
    }

    #[test]
    fn test_notice_statuses() {
        assert!(Status::Ready.is_notice());
        assert!(Status::Sent.is_notice());
        assert!(Status::LocalCompleted.is_notice());
        assert!(Status::Selected(1).is_notice());
        assert!(!Status::Received.is_notice());
        assert!(!Status::Zipping.is_notice());
        assert!(Status::Error("Error: x".into()).is_error());
    }
}
