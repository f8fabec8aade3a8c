//! HTTP and WebSocket handlers for the relay.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use super::error::{ApiError, ApiResult};
use super::realm::{Realm, Registration};
use crate::config::ServerConfig;
use crate::signal::{SignalKind, SignalMessage};

/// Shared relay state.
#[derive(Debug, Clone)]
pub struct RelayState {
    /// Connected peers
    pub realm: Arc<Mutex<Realm>>,
    /// Server settings
    pub config: Arc<ServerConfig>,
}

impl RelayState {
    /// Create state for `config`.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            realm: Arc::new(Mutex::new(Realm::new(config.concurrent_limit))),
            config: Arc::new(config),
        }
    }

    fn check_key(&self, key: &str) -> ApiResult<()> {
        if key == self.config.key {
            Ok(())
        } else {
            Err(ApiError::not_found("Invalid key provided"))
        }
    }
}

/// Response of the info endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayInfo {
    /// Server name
    pub name: String,
    /// What the server does
    pub description: String,
    /// Protocol home page
    pub website: String,
}

/// GET {path}/ - Describe the relay.
pub async fn info() -> Json<RelayInfo> {
    Json(RelayInfo {
        name: "Speed Relay".to_string(),
        description: "Brokers connections between Speed peers.".to_string(),
        website: "https://peerjs.com/".to_string(),
    })
}

/// GET {path}/{key}/id - Hand out a fresh client ID.
pub async fn generate_id(
    State(state): State<RelayState>,
    Path(key): Path<String>,
) -> ApiResult<String> {
    state.check_key(&key)?;
    Ok(uuid::Uuid::new_v4().to_string())
}

/// GET {path}/{key}/peers - List connected IDs, if discovery is allowed.
pub async fn list_peers(
    State(state): State<RelayState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    state.check_key(&key)?;
    if !state.config.allow_discovery {
        return Err(ApiError::unauthorized("Peer discovery is disabled"));
    }
    Ok(Json(state.realm.lock().await.ids()))
}

/// Query string of the WebSocket endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SocketParams {
    /// API key
    pub key: Option<String>,
    /// Requested client ID
    pub id: Option<String>,
    /// Token proving ownership of the ID across reconnects
    pub token: Option<String>,
}

/// GET {path}/peerjs - Upgrade to the signaling socket.
pub async fn socket(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    Query(params): Query<SocketParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn reject(mut socket: WebSocket, message: SignalMessage) {
    if let Ok(text) = message.to_json() {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.close().await;
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn handle_socket(socket: WebSocket, state: RelayState, params: SocketParams) {
    let (Some(key), Some(id), Some(token)) = (
        non_empty(params.key),
        non_empty(params.id),
        non_empty(params.token),
    ) else {
        reject(
            socket,
            SignalMessage::error("No id, token, or key supplied to websocket server"),
        )
        .await;
        return;
    };

    if key != state.config.key {
        reject(socket, SignalMessage::error("Invalid key provided")).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = tx.send(SignalMessage::new(SignalKind::Open));

    let registration = state.realm.lock().await.register(&id, &token, tx);
    let session = match registration {
        Registration::Registered { session, delivered } => {
            tracing::info!("Peer {} connected ({} queued messages)", id, delivered);
            session
        }
        Registration::IdTaken => {
            tracing::debug!("Refused {}: ID is taken", id);
            let taken = SignalMessage::new(SignalKind::IdTaken)
                .with_payload(serde_json::json!({ "msg": "ID is taken" }));
            reject(socket, taken).await;
            return;
        }
        Registration::LimitReached => {
            tracing::warn!("Refused {}: concurrent limit reached", id);
            reject(
                socket,
                SignalMessage::error("Server has reached its concurrent user limit"),
            )
            .await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    let ingest_state = state.clone();
    let ingest_id = id.clone();
    let mut ingest = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };

            let message = match SignalMessage::from_json(text.as_str()) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Ignoring message from {}: {}", ingest_id, e);
                    continue;
                }
            };

            let mut realm = ingest_state.realm.lock().await;
            realm.touch(&ingest_id);
            match message.kind {
                SignalKind::Heartbeat => {}
                kind if kind.is_forwarded() => {
                    let delivery = realm.forward(&ingest_id, message);
                    tracing::debug!("{:?} from {}: {:?}", kind, ingest_id, delivery);
                }
                other => tracing::warn!("Ignoring {:?} from {}", other, ingest_id),
            }
        }
    });

    let mut egress = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Dropping unencodable message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::select! {
        _ = &mut ingest => { egress.abort(); }
        _ = &mut egress => { ingest.abort(); }
    }

    if state.realm.lock().await.unregister(&id, session) {
        tracing::info!("Peer {} disconnected", id);
    }
}
