//! Common test utilities for `Speed` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use futures::{SinkExt, StreamExt};
use speed_core::config::{Config, RelayConfig, ServerConfig, TransferSettings};
use speed_core::relay::RelayServer;
use speed_core::signal::SignalMessage;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Raw signaling socket used to poke the relay directly.
pub type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &std::path::Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Relay settings suitable for tests: short expiry, default path and key.
pub fn test_server_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        expire_timeout: std::time::Duration::from_secs(1),
        ..ServerConfig::default()
    }
}

/// Start a relay on an ephemeral loopback port.
pub async fn start_relay(config: ServerConfig) -> (SocketAddr, JoinHandle<()>) {
    let server = RelayServer::bind_addr("127.0.0.1:0".parse().unwrap(), config)
        .await
        .expect("Failed to bind relay");
    let addr = server.local_addr().expect("Relay has no address");
    let handle = tokio::spawn(async move {
        let _ = server.serve().await;
    });
    (addr, handle)
}

/// Peer configuration pointing at a test relay.
pub fn peer_config(relay: SocketAddr) -> Config {
    Config {
        relay: RelayConfig {
            host: relay.ip().to_string(),
            port: relay.port(),
            ..RelayConfig::default()
        },
        transfer: TransferSettings {
            pacing: std::time::Duration::from_millis(1),
            handshake_timeout: std::time::Duration::from_secs(10),
            ..TransferSettings::default()
        },
        ..Config::default()
    }
}

/// Open a raw signaling socket with the given query string.
pub async fn raw_socket(relay: SocketAddr, query: &str) -> RawSocket {
    let url = format!("ws://{relay}/myapp/peerjs?{query}");
    let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("Failed to open relay socket");
    socket
}

/// Read the next signaling message, failing after five seconds.
pub async fn next_message(socket: &mut RawSocket) -> Option<SignalMessage> {
    let next = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while let Some(frame) = socket.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    return Some(SignalMessage::from_json(text.as_str()).expect("Bad relay JSON"))
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await;
    next.expect("Timed out waiting for relay message")
}

/// Send a signaling message over a raw socket.
pub async fn send_message(socket: &mut RawSocket, message: &SignalMessage) {
    socket
        .send(Message::Text(message.to_json().unwrap().into()))
        .await
        .expect("Failed to send to relay");
}
