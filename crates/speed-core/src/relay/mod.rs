//! Signaling relay server.
//!
//! A PeerJS-compatible broker: peers register an ID over a WebSocket and
//! the relay forwards their handshake messages to each other. It never sees
//! file bytes.
//!
//! ## Routes
//!
//! All routes live under the configured path (default `/myapp`):
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /` | server info |
//! | `GET /{key}/id` | fresh client ID |
//! | `GET /{key}/peers` | connected IDs (only with discovery allowed) |
//! | `GET /peerjs?key&id&token` | signaling WebSocket |

pub mod error;
pub mod handlers;
pub mod realm;

pub use handlers::RelayState;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::error::Result;

/// How often queued messages and idle clients are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Build the relay router for `state`.
pub fn router(state: RelayState) -> Router {
    let base = state.config.path.trim_end_matches('/').to_string();

    let mut router = Router::new()
        .route(&format!("{base}/"), get(handlers::info))
        .route(&format!("{base}/{{key}}/id"), get(handlers::generate_id))
        .route(&format!("{base}/{{key}}/peers"), get(handlers::list_peers))
        .route(&format!("{base}/peerjs"), get(handlers::socket));
    if !base.is_empty() {
        router = router.route(&base, get(handlers::info));
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// A bound relay server.
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    state: RelayState,
}

impl RelayServer {
    /// Bind on all interfaces at `config.port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        Self::bind_addr(addr, config).await
    }

    /// Bind on a specific address (port `0` picks one).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind_addr(addr: SocketAddr, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: RelayState::new(config),
        })
    }

    /// Address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared state, for inspecting connected peers.
    #[must_use]
    pub const fn state(&self) -> &RelayState {
        &self.state
    }

    /// Serve until the process is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.listener.local_addr()?;
        let config = self.state.config.clone();
        tracing::info!(
            "Signaling relay listening on port {} at {}",
            addr.port(),
            if config.path.is_empty() { "/" } else { config.path.as_str() }
        );

        let sweep_state = self.state.clone();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let report = sweep_state
                    .realm
                    .lock()
                    .await
                    .sweep(config.expire_timeout, config.alive_timeout);
                if report.expired > 0 {
                    tracing::debug!("Expired {} queued messages", report.expired);
                }
                if report.dropped > 0 {
                    tracing::info!("Dropped {} silent peers", report.dropped);
                }
            }
        });

        let result = axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await;
        sweeper.abort();

        result.map_err(crate::error::Error::Io)
    }
}
