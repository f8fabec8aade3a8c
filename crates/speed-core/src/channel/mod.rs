//! Data channels between two peers.
//!
//! The relay only brokers the handshake. The dialing peer sends an `OFFER`
//! with a fresh connection id; the offered peer binds a TCP listener and
//! answers with the addresses it can be reached on; the dialing peer
//! connects to the first address that works and opens the stream with a
//! `hello` frame carrying the connection id. After that the relay is out of
//! the picture and file bytes flow directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};
use crate::protocol::{self, DataMessage, FrameKind};
use crate::room::RoomId;
use crate::signal::client::random_token;
use crate::signal::{AnswerPayload, OfferPayload, SignalClient, SignalKind, SignalMessage};
use crate::transfer::{MessageSink, MessageSource, TransferConfig};

/// Timeout for connecting to one candidate address.
const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for the hello frame on an accepted connection.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Configure TCP keep-alive on a socket.
///
/// Start probing after 10 seconds of idle time, then every 5 seconds.
fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on socket");
    Ok(())
}

/// Addresses this machine can be reached on: loopback, plus the address of
/// the interface holding the default route.
#[must_use]
pub fn local_addresses() -> Vec<IpAddr> {
    let mut addrs = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];

    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
        if socket.connect("8.8.8.8:80").is_ok() {
            if let Ok(local_addr) = socket.local_addr() {
                let ip = local_addr.ip();
                if !ip.is_loopback() && !ip.is_unspecified() {
                    addrs.push(ip);
                }
            }
        }
    }

    addrs
}

/// Dial order: LAN addresses before loopback.
fn order_candidates(candidates: &[SocketAddr]) -> Vec<SocketAddr> {
    let (mut ordered, loopback): (Vec<_>, Vec<_>) = candidates
        .iter()
        .copied()
        .partition(|addr| !addr.ip().is_loopback());
    ordered.extend(loopback);
    ordered
}

/// A reliable, ordered, bidirectional channel to one peer.
#[derive(Debug)]
pub struct DataChannel {
    stream: TcpStream,
    connection_id: String,
    peer_addr: SocketAddr,
}

impl DataChannel {
    fn new(stream: TcpStream, connection_id: String) -> Result<Self> {
        configure_tcp_keepalive(&stream)?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            connection_id,
            peer_addr,
        })
    }

    /// Id negotiated over the relay.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Remote socket address.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is broken.
    pub async fn send(&mut self, message: &DataMessage) -> Result<()> {
        protocol::write_message(&mut self.stream, message).await
    }

    /// Receive the next message. Returns `None` once the peer has closed
    /// the channel cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed frames or a broken stream.
    pub async fn recv(&mut self) -> Result<Option<DataMessage>> {
        match protocol::read_message(&mut self.stream).await {
            Ok(message) => Ok(Some(message)),
            Err(Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the channel.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

impl MessageSink for DataChannel {
    async fn send_message(&mut self, message: &DataMessage) -> Result<()> {
        self.send(message).await
    }
}

impl MessageSource for DataChannel {
    async fn next_message(&mut self) -> Result<Option<DataMessage>> {
        self.recv().await
    }
}

/// Open a data channel to `peer` through the relay.
///
/// # Errors
///
/// - `Error::PeerUnavailable` if the relay expires the offer
/// - `Error::Timeout` if the peer never answers
/// - `Error::ConnectionFailed` if no answered address accepts a connection
pub async fn dial(
    signal: &mut SignalClient,
    peer: &RoomId,
    config: &TransferConfig,
) -> Result<DataChannel> {
    let connection_id = format!("dc_{}", random_token());
    signal.send(SignalMessage::offer(
        peer.as_str(),
        &OfferPayload::data(connection_id.as_str()),
    )?)?;
    tracing::debug!("Offered {} to {}", connection_id, peer);

    let candidates = tokio::time::timeout(
        config.handshake_timeout,
        wait_for_answer(signal, peer, &connection_id),
    )
    .await
    .map_err(|_| Error::Timeout(config.handshake_timeout.as_secs()))??;

    for addr in order_candidates(&candidates) {
        let stream = match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!("Candidate {} refused: {}", addr, e);
                continue;
            }
            Err(_) => {
                tracing::debug!("Candidate {} timed out", addr);
                continue;
            }
        };

        let mut channel = DataChannel::new(stream, connection_id.clone())?;
        protocol::write_frame(
            &mut channel.stream,
            FrameKind::Hello,
            connection_id.as_bytes(),
        )
        .await?;

        tracing::info!("Data channel to {} open via {}", peer, addr);
        return Ok(channel);
    }

    Err(Error::ConnectionFailed(format!(
        "no reachable address for {peer}"
    )))
}

async fn wait_for_answer(
    signal: &mut SignalClient,
    peer: &RoomId,
    connection_id: &str,
) -> Result<Vec<SocketAddr>> {
    while let Some(message) = signal.recv().await {
        let from_peer = message.src.as_deref() == Some(peer.as_str());
        match message.kind {
            SignalKind::Answer if from_peer => {
                let answer: AnswerPayload = message.payload_as()?;
                if answer.connection_id == connection_id {
                    return Ok(answer.candidates);
                }
                tracing::debug!("Ignoring answer for {}", answer.connection_id);
            }
            SignalKind::Expire if from_peer => {
                return Err(Error::PeerUnavailable(peer.to_string()));
            }
            SignalKind::Error => {
                return Err(Error::Relay(
                    message.message_text().unwrap_or("unknown error").to_string(),
                ));
            }
            other => tracing::debug!("Ignoring {:?} while waiting for answer", other),
        }
    }

    Err(Error::RelayUnreachable(
        "relay connection closed".to_string(),
    ))
}

/// Accept an `OFFER` received through the relay.
///
/// # Errors
///
/// - `Error::ProtocolError` if the offer is malformed
/// - `Error::Timeout` if the offering peer never connects
pub async fn accept_offer(
    signal: &SignalClient,
    offer: &SignalMessage,
    config: &TransferConfig,
) -> Result<DataChannel> {
    let src = offer
        .src
        .as_deref()
        .ok_or_else(|| Error::ProtocolError("offer without source".to_string()))?;
    let payload: OfferPayload = offer.payload_as()?;

    let listener =
        TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.listen_port))
            .await?;
    let port = listener.local_addr()?.port();

    let candidates = local_addresses()
        .into_iter()
        .map(|ip| SocketAddr::new(ip, port))
        .collect();
    signal.send(SignalMessage::answer(
        src,
        &AnswerPayload {
            connection_id: payload.connection_id.clone(),
            candidates,
        },
    )?)?;
    tracing::debug!("Answered {} from {} on port {}", payload.connection_id, src, port);

    tokio::time::timeout(
        config.handshake_timeout,
        accept_matching(&listener, &payload.connection_id),
    )
    .await
    .map_err(|_| Error::Timeout(config.handshake_timeout.as_secs()))?
}

async fn accept_matching(listener: &TcpListener, connection_id: &str) -> Result<DataChannel> {
    loop {
        let (mut stream, addr) = listener.accept().await?;

        match protocol::read_frame_with_timeout(&mut stream, HELLO_TIMEOUT).await {
            Ok((header, payload))
                if header.kind == FrameKind::Hello && payload == connection_id.as_bytes() =>
            {
                tracing::info!("Data channel from {} accepted", addr);
                return DataChannel::new(stream, connection_id.to_string());
            }
            Ok(_) => tracing::warn!("Rejected connection from {}: wrong hello", addr),
            Err(e) => tracing::warn!("Rejected connection from {}: {}", addr, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FileInfo;

    async fn connected_pair() -> (DataChannel, DataChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { accept_matching(&listener, "dc_test").await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut dialer = DataChannel::new(stream, "dc_test".to_string()).unwrap();
        protocol::write_frame(&mut dialer.stream, FrameKind::Hello, b"dc_test")
            .await
            .unwrap();

        let accepted = accept.await.unwrap().unwrap();
        (dialer, accepted)
    }

    #[test]
    fn test_local_addresses_start_with_loopback() {
        let addrs = local_addresses();
        assert_eq!(addrs[0], IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(addrs.iter().skip(1).all(|ip| !ip.is_loopback()));
    }

    #[test]
    fn test_order_candidates_prefers_lan() {
        let ordered = order_candidates(&[
            "127.0.0.1:9000".parse().unwrap(),
            "192.168.1.20:9000".parse().unwrap(),
        ]);
        assert_eq!(ordered[0], "192.168.1.20:9000".parse().unwrap());
        assert!(ordered[1].ip().is_loopback());
    }

    #[tokio::test]
    async fn test_channel_carries_messages_in_order() {
        let (mut dialer, mut accepted) = connected_pair().await;
        assert_eq!(accepted.connection_id(), "dc_test");

        let info = FileInfo {
            name: "x.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size: 3,
        };
        dialer.send(&DataMessage::Metadata(info.clone())).await.unwrap();
        dialer.send(&DataMessage::Chunk(vec![1, 2, 3])).await.unwrap();
        dialer.send(&DataMessage::End).await.unwrap();
        dialer.close().await;

        assert_eq!(
            accepted.recv().await.unwrap(),
            Some(DataMessage::Metadata(info))
        );
        assert_eq!(
            accepted.recv().await.unwrap(),
            Some(DataMessage::Chunk(vec![1, 2, 3]))
        );
        assert_eq!(accepted.recv().await.unwrap(), Some(DataMessage::End));
        assert_eq!(accepted.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_hello_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { accept_matching(&listener, "dc_right").await });

        let mut intruder = TcpStream::connect(addr).await.unwrap();
        protocol::write_frame(&mut intruder, FrameKind::Hello, b"dc_wrong")
            .await
            .unwrap();

        let mut good = TcpStream::connect(addr).await.unwrap();
        protocol::write_frame(&mut good, FrameKind::Hello, b"dc_right")
            .await
            .unwrap();

        let channel = accept.await.unwrap().unwrap();
        assert_eq!(channel.connection_id(), "dc_right");
    }
}
