//! File transfer engine for Speed.
//!
//! A transfer is three kinds of message over one data channel:
//!
//! 1. a metadata envelope announcing name, MIME type and size,
//! 2. the file content as fixed-size binary chunks, paced by a short sleep,
//! 3. an end envelope.
//!
//! There is no acknowledgement or retry; the channel is reliable and ordered,
//! so chunks are concatenated in receipt order. The receiving side is an
//! explicit state machine ([`Assembler`]) that refuses chunks arriving before
//! any metadata.
//!
//! ## Transfer Protocol
//!
//! - Default chunk size: 64 KiB
//! - Pacing: 5 ms between sends
//! - End marker after exactly `ceil(size / chunk_size)` chunks

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::bundle::OutgoingFile;
use crate::config::TransferSettings;
use crate::error::{Error, Result};
use crate::file::{sanitize_file_name, unique_path};
use crate::protocol::{DataMessage, FileInfo, MAX_CHUNK_SIZE};

/// Attempts at claiming a fresh file name when saving.
const SAVE_ATTEMPTS: usize = 32;

/// Largest buffer reserved up front from a peer's declared size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Progress steps of a local (same room) transfer.
const LOCAL_STEP_PERCENT: u8 = 20;

/// Delay between local transfer progress steps.
const LOCAL_STEP_DELAY: Duration = Duration::from_millis(200);

/// Transfer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Preparing the selection
    Preparing,
    /// Negotiating the data channel
    Connecting,
    /// Streaming chunks
    Transferring,
    /// Transfer completed successfully
    Completed,
    /// Transfer failed
    Failed,
}

/// Progress information for a transfer.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Current state
    pub state: TransferState,
    /// Name of the file in flight
    pub file_name: String,
    /// Bytes sent or received so far
    pub bytes_transferred: u64,
    /// Declared size of the file
    pub total_bytes: u64,
    /// Progress percentage (0 - 100)
    pub percent: u8,
    /// When the transfer started
    pub started_at: Instant,
}

impl TransferProgress {
    /// Create a new progress tracker.
    #[must_use]
    pub fn new(file_name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            state: TransferState::Preparing,
            file_name: file_name.into(),
            bytes_transferred: 0,
            total_bytes,
            percent: 0,
            started_at: Instant::now(),
        }
    }

    /// Record `bytes` transferred and recompute the percentage.
    pub fn advance_to(&mut self, bytes: u64) {
        self.bytes_transferred = bytes;
        self.percent = percent(bytes, self.total_bytes);
    }

    /// Transfer speed in bytes per second since the start.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn speed_bps(&self) -> u64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.bytes_transferred as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new(String::new(), 0)
    }
}

/// Configuration for a transfer.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Delay between chunk sends
    pub pacing: Duration,
    /// How long to wait for the peer during the handshake
    pub handshake_timeout: Duration,
    /// Port to accept data channels on (0 = ephemeral)
    pub listen_port: u16,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::from(&TransferSettings::default())
    }
}

impl From<&TransferSettings> for TransferConfig {
    fn from(settings: &TransferSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size.clamp(1, MAX_CHUNK_SIZE),
            pacing: settings.pacing,
            handshake_timeout: settings.handshake_timeout,
            listen_port: settings.listen_port,
        }
    }
}

/// Number of chunks a file of `size` bytes is split into.
#[must_use]
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size.max(1) as u64)
}

/// Progress percentage, rounded and capped at 100. An empty file is done.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done as f64 / total as f64 * 100.0).round().min(100.0) as u8
}

/// Iterator over the `(offset, len)` slices of a buffer.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    total: usize,
    chunk_size: usize,
    offset: usize,
}

impl ChunkPlan {
    /// Plan chunks of `chunk_size` over `total` bytes.
    #[must_use]
    pub fn new(total: usize, chunk_size: usize) -> Self {
        Self {
            total,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }
}

impl Iterator for ChunkPlan {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.total {
            return None;
        }
        let len = self.chunk_size.min(self.total - self.offset);
        let item = (self.offset, len);
        self.offset += len;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.offset).div_ceil(self.chunk_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkPlan {}

/// The sending half of a data channel.
pub trait MessageSink: Send {
    /// Send one message.
    fn send_message(&mut self, message: &DataMessage) -> impl Future<Output = Result<()>> + Send;
}

/// The receiving half of a data channel.
pub trait MessageSource: Send {
    /// Receive the next message; `None` once the channel is closed.
    fn next_message(&mut self) -> impl Future<Output = Result<Option<DataMessage>>> + Send;
}

/// Stream `file` over `sink`: metadata, paced chunks, end marker.
///
/// Returns the number of chunks sent.
///
/// # Errors
///
/// Returns an error if the channel fails mid-transfer. No end marker is
/// sent in that case.
pub async fn send_file<S: MessageSink>(
    sink: &mut S,
    file: &OutgoingFile,
    config: &TransferConfig,
    progress: &watch::Sender<TransferProgress>,
) -> Result<u64> {
    let info = file.info();
    let total = info.size;
    let planned = chunk_count(total, config.chunk_size);

    progress.send_modify(|p| {
        *p = TransferProgress::new(info.name.clone(), total);
        p.state = TransferState::Transferring;
    });

    tracing::info!(
        "Sending {} ({} bytes, {} chunks)",
        info.name,
        total,
        planned
    );

    sink.send_message(&DataMessage::Metadata(info)).await?;

    let mut sent = 0u64;
    for (offset, len) in ChunkPlan::new(file.data.len(), config.chunk_size) {
        let chunk = file.data[offset..offset + len].to_vec();
        sink.send_message(&DataMessage::Chunk(chunk)).await?;
        sent += 1;

        let done = (offset + len) as u64;
        progress.send_modify(|p| p.advance_to(done));
        tracing::debug!("Sent chunk {}/{} ({} bytes)", sent, planned, len);

        if !config.pacing.is_zero() {
            tokio::time::sleep(config.pacing).await;
        }
    }

    if sent != planned {
        return Err(Error::Internal(format!(
            "sent {sent} of {planned} planned chunks"
        )));
    }

    sink.send_message(&DataMessage::End).await?;
    progress.send_modify(|p| {
        p.advance_to(total);
        p.state = TransferState::Completed;
    });

    tracing::info!("Finished sending {} chunks", sent);
    Ok(sent)
}

/// A fully received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// File name announced by the sender
    pub name: String,
    /// MIME type announced by the sender
    pub mime_type: String,
    /// File content
    pub data: Vec<u8>,
}

impl ReceivedFile {
    /// Write the file into `dir` under a sanitized, non-clashing name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub async fn save(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let name = sanitize_file_name(&self.name);

        for _ in 0..SAVE_ATTEMPTS {
            let path = unique_path(dir, &name);
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(&self.data).await?;
            file.flush().await?;
            tracing::info!("Saved {} to {}", self.name, path.display());
            return Ok(path);
        }

        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free file name for {name} in {}", dir.display()),
        )))
    }
}

impl From<OutgoingFile> for ReceivedFile {
    fn from(file: OutgoingFile) -> Self {
        Self {
            name: file.name,
            mime_type: file.mime_type,
            data: file.data,
        }
    }
}

/// What the assembler did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerEvent {
    /// Metadata accepted, a new file begins
    Started(FileInfo),
    /// A chunk was appended
    Progress {
        /// Bytes received so far
        received: u64,
        /// Declared size
        total: u64,
        /// Percentage, capped at 100
        percent: u8,
    },
    /// End marker received, file assembled
    Completed(ReceivedFile),
}

#[derive(Debug)]
enum AssemblerState {
    Idle,
    Receiving { info: FileInfo, data: Vec<u8> },
    Failed,
}

/// Receiver-side state machine.
///
/// Metadata moves it to receiving, chunks are appended, the end marker
/// yields the assembled file and returns it to idle. A chunk or end marker
/// without preceding metadata is `Error::MissingMetadata`, and a chunk past
/// the declared size is a protocol error; both leave the assembler failed
/// until the next metadata.
#[derive(Debug)]
pub struct Assembler {
    state: AssemblerState,
}

impl Assembler {
    /// Create an idle assembler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AssemblerState::Idle,
        }
    }

    /// Whether a file is partially received.
    #[must_use]
    pub const fn is_receiving(&self) -> bool {
        matches!(self.state, AssemblerState::Receiving { .. })
    }

    /// Whether the last chunk or end marker arrived without metadata.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.state, AssemblerState::Failed)
    }

    /// Feed one message.
    ///
    /// # Errors
    ///
    /// - `Error::MissingMetadata` for a chunk or end marker that arrives
    ///   before metadata
    /// - `Error::ProtocolError` for a chunk that overruns the declared size
    pub fn push(&mut self, message: DataMessage) -> Result<AssemblerEvent> {
        match message {
            DataMessage::Metadata(info) => {
                if let AssemblerState::Receiving { info: previous, .. } = &self.state {
                    tracing::warn!(
                        "New metadata for {} while {} was incomplete, restarting",
                        info.name,
                        previous.name
                    );
                }
                tracing::debug!("Receiving {} ({} bytes)", info.name, info.size);
                let capacity = usize::try_from(info.size.min(MAX_PREALLOC)).unwrap_or(0);
                self.state = AssemblerState::Receiving {
                    info: info.clone(),
                    data: Vec::with_capacity(capacity),
                };
                Ok(AssemblerEvent::Started(info))
            }
            DataMessage::Chunk(chunk) => match &mut self.state {
                AssemblerState::Receiving { info, data } => {
                    let received = data.len() as u64 + chunk.len() as u64;
                    if received > info.size {
                        let error = Error::ProtocolError(format!(
                            "{} declared {} bytes but more arrived",
                            info.name, info.size
                        ));
                        self.state = AssemblerState::Failed;
                        return Err(error);
                    }
                    data.extend_from_slice(&chunk);
                    let received = data.len() as u64;
                    Ok(AssemblerEvent::Progress {
                        received,
                        total: info.size,
                        percent: percent(received, info.size),
                    })
                }
                AssemblerState::Idle | AssemblerState::Failed => {
                    self.state = AssemblerState::Failed;
                    Err(Error::MissingMetadata)
                }
            },
            DataMessage::End => match std::mem::replace(&mut self.state, AssemblerState::Idle) {
                AssemblerState::Receiving { info, data } => {
                    if (data.len() as u64) < info.size {
                        tracing::warn!(
                            "{} declared {} bytes but only {} arrived",
                            info.name,
                            info.size,
                            data.len()
                        );
                    }
                    Ok(AssemblerEvent::Completed(ReceivedFile {
                        name: info.name,
                        mime_type: info.mime_type,
                        data,
                    }))
                }
                AssemblerState::Idle | AssemblerState::Failed => {
                    self.state = AssemblerState::Failed;
                    Err(Error::MissingMetadata)
                }
            },
        }
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive one file from `source`.
///
/// # Errors
///
/// - `Error::MissingMetadata` if data arrives before metadata
/// - `Error::ConnectionLost` if the channel closes before the end marker
pub async fn receive_file<S: MessageSource>(
    source: &mut S,
    progress: &watch::Sender<TransferProgress>,
) -> Result<ReceivedFile> {
    let mut assembler = Assembler::new();

    loop {
        let Some(message) = source.next_message().await? else {
            progress.send_modify(|p| p.state = TransferState::Failed);
            return Err(Error::ConnectionLost);
        };

        let event = match assembler.push(message) {
            Ok(event) => event,
            Err(e) => {
                progress.send_modify(|p| p.state = TransferState::Failed);
                return Err(e);
            }
        };

        match event {
            AssemblerEvent::Started(info) => {
                progress.send_modify(|p| {
                    *p = TransferProgress::new(info.name.clone(), info.size);
                    p.state = TransferState::Transferring;
                });
            }
            AssemblerEvent::Progress { received, .. } => {
                progress.send_modify(|p| p.advance_to(received));
            }
            AssemblerEvent::Completed(file) => {
                progress.send_modify(|p| {
                    p.percent = 100;
                    p.state = TransferState::Completed;
                });
                tracing::info!("Received {} ({} bytes)", file.name, file.data.len());
                return Ok(file);
            }
        }
    }
}

/// Hand `file` to ourselves, with stepped progress instead of a channel.
pub async fn local_transfer(
    file: OutgoingFile,
    progress: &watch::Sender<TransferProgress>,
) -> ReceivedFile {
    let total = file.data.len() as u64;
    progress.send_modify(|p| {
        *p = TransferProgress::new(file.name.clone(), total);
        p.state = TransferState::Transferring;
    });

    let mut step = 0u8;
    while step < 100 {
        tokio::time::sleep(LOCAL_STEP_DELAY).await;
        step = step.saturating_add(LOCAL_STEP_PERCENT).min(100);
        progress.send_modify(|p| {
            p.percent = step;
            p.bytes_transferred = total * u64::from(step) / 100;
        });
    }

    progress.send_modify(|p| p.state = TransferState::Completed);
    file.into()
}
