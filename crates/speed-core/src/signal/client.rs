//! WebSocket client for the signaling relay.
//!
//! A [`SignalClient`] holds one registration on the relay. It is split into
//! two background tasks: a writer that forwards outgoing messages and sends
//! a `HEARTBEAT` every [`HEARTBEAT_INTERVAL`](crate::HEARTBEAT_INTERVAL),
//! and a reader that parses incoming frames into [`SignalMessage`]s.

use std::net::Ipv6Addr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{SignalKind, SignalMessage};
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::room::RoomId;

/// How long to wait for `OPEN` after the socket connects.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Incoming messages buffered before the reader applies backpressure.
const INCOMING_BUFFER: usize = 64;

/// URLs of a relay deployment.
#[derive(Debug, Clone)]
pub struct RelayEndpoint {
    config: RelayConfig,
}

impl RelayEndpoint {
    /// Create an endpoint from relay configuration.
    #[must_use]
    pub const fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// WebSocket URL for registering `id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configured host does not form a
    /// valid URL.
    pub fn socket_url(&self, id: &RoomId, token: &str) -> Result<Url> {
        let scheme = if self.config.secure { "wss" } else { "ws" };
        let host = match self.config.host.parse::<Ipv6Addr>() {
            Ok(addr) => format!("[{addr}]"),
            Err(_) => self.config.host.clone(),
        };

        let mut url = Url::parse(&format!("{scheme}://{host}/")).map_err(|e| {
            Error::InvalidConfig {
                key: "relay.host".to_string(),
                reason: format!("'{}': {e}", self.config.host),
            }
        })?;
        url.set_port(Some(self.config.port)).map_err(|()| Error::InvalidConfig {
            key: "relay.port".to_string(),
            reason: format!("cannot use port {}", self.config.port),
        })?;
        url.set_path(&format!(
            "{}/peerjs",
            self.config.path.trim_end_matches('/')
        ));
        url.query_pairs_mut()
            .append_pair("key", &self.config.key)
            .append_pair("id", id.as_str())
            .append_pair("token", token);

        Ok(url)
    }
}

/// A registration on the signaling relay.
#[derive(Debug)]
pub struct SignalClient {
    id: RoomId,
    outgoing: Option<mpsc::UnboundedSender<SignalMessage>>,
    incoming: mpsc::Receiver<SignalMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl SignalClient {
    /// Connect to the relay and register `id`.
    ///
    /// # Errors
    ///
    /// - `Error::RelayUnreachable` if the socket cannot be opened
    /// - `Error::IdTaken` if another peer holds `id`
    /// - `Error::Relay` if the relay refuses the registration
    /// - `Error::Timeout` if the relay never confirms
    pub async fn connect(endpoint: &RelayEndpoint, id: RoomId) -> Result<Self> {
        if endpoint.config.secure {
            // Already installed by an earlier connection.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let token = random_token();
        let url = endpoint.socket_url(&id, &token)?;
        tracing::debug!("Connecting to relay at {}", url);

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::RelayUnreachable(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let opened = tokio::time::timeout(OPEN_TIMEOUT, async {
            while let Some(frame) = stream.next().await {
                let frame = frame.map_err(|e| Error::RelayUnreachable(e.to_string()))?;
                let Message::Text(text) = frame else {
                    continue;
                };
                let message = SignalMessage::from_json(text.as_str())?;
                match message.kind {
                    SignalKind::Open => return Ok(()),
                    SignalKind::IdTaken => return Err(Error::IdTaken(id.to_string())),
                    SignalKind::Error => {
                        return Err(Error::Relay(
                            message.message_text().unwrap_or("unknown error").to_string(),
                        ))
                    }
                    other => tracing::debug!("Ignoring {:?} before OPEN", other),
                }
            }
            Err(Error::RelayUnreachable(
                "relay closed the connection".to_string(),
            ))
        })
        .await
        .map_err(|_| Error::Timeout(OPEN_TIMEOUT.as_secs()))?;

        if let Err(e) = opened {
            let _ = sink.close().await;
            return Err(e);
        }

        tracing::info!("Registered with relay as {}", id);

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_BUFFER);

        let writer = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(crate::HEARTBEAT_INTERVAL);
            heartbeat.tick().await;

            loop {
                let message = tokio::select! {
                    next = outgoing_rx.recv() => match next {
                        Some(message) => message,
                        None => break,
                    },
                    _ = heartbeat.tick() => SignalMessage::heartbeat(),
                };

                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Dropping unencodable signaling message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!("Relay socket closed while sending");
                    return;
                }
            }

            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalMessage::from_json(text.as_str()) {
                        Ok(message) => {
                            if incoming_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring malformed relay message: {}", e),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            tracing::debug!("Relay connection closed");
        });

        Ok(Self {
            id,
            outgoing: Some(outgoing_tx),
            incoming: incoming_rx,
            writer,
            reader,
        })
    }

    /// The ID this client is registered under.
    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    /// Queue a message for the relay.
    ///
    /// # Errors
    ///
    /// Returns `Error::RelayUnreachable` if the connection is closed.
    pub fn send(&self, message: SignalMessage) -> Result<()> {
        self.outgoing
            .as_ref()
            .ok_or_else(|| Error::RelayUnreachable("signaling client closed".to_string()))?
            .send(message)
            .map_err(|_| Error::RelayUnreachable("relay connection closed".to_string()))
    }

    /// Wait for the next message from the relay.
    ///
    /// Returns `None` once the relay connection is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.incoming.recv().await
    }

    /// Close the relay connection.
    pub async fn close(mut self) {
        self.outgoing.take();
        let _ = (&mut self.writer).await;
        self.reader.abort();
    }
}

impl Drop for SignalClient {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Random alphanumeric string, used for tokens and connection ids.
pub(crate) fn random_token() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str, secure: bool) -> RelayEndpoint {
        RelayEndpoint::new(RelayConfig {
            host: host.to_string(),
            port: 4002,
            path: "/myapp".to_string(),
            secure,
            key: "peerjs".to_string(),
        })
    }

    #[test]
    fn test_socket_url() {
        let id = RoomId::parse("abcd1234").unwrap();
        let url = endpoint("127.0.0.1", false).socket_url(&id, "tok").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:4002/myapp/peerjs?key=peerjs&id=abcd1234&token=tok"
        );
    }

    #[test]
    fn test_socket_url_secure_ipv6() {
        let id = RoomId::parse("abcd1234").unwrap();
        let url = endpoint("::1", true).socket_url(&id, "tok").unwrap();
        assert!(url.as_str().starts_with("wss://[::1]:4002/myapp/peerjs?"));
    }

    #[test]
    fn test_socket_url_encodes_key() {
        let mut relay = endpoint("127.0.0.1", false);
        relay.config.key = "team&id=evil".to_string();
        let id = RoomId::parse("abcd1234").unwrap();
        let url = relay.socket_url(&id, "tok").unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("key".to_string(), "team&id=evil".to_string()),
                ("id".to_string(), "abcd1234".to_string()),
                ("token".to_string(), "tok".to_string()),
            ]
        );
    }

    #[test]
    fn test_socket_url_rejects_bad_host() {
        let id = RoomId::parse("abcd1234").unwrap();
        let result = endpoint("bad host", false).socket_url(&id, "tok");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_random_token() {
        let token = random_token();
        assert_eq!(token.len(), 12);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_token(), random_token());
    }

    #[tokio::test]
    async fn test_connect_unreachable_relay() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = RelayEndpoint::new(RelayConfig {
            port,
            ..RelayConfig::default()
        });
        let result = SignalClient::connect(&endpoint, RoomId::parse("abcd1234").unwrap()).await;
        assert!(matches!(result, Err(Error::RelayUnreachable(_))));
    }
}
