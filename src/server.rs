//! In-memory device relay.
//!
//! Stands in for the hosted relay on a local network:
//! - the band posts readings to `POST /api/receive` and polls
//!   `GET /api/command` for control commands
//! - the monitor polls `GET /api/latest` and posts to `POST /api/command`
//!
//! ```text
//! Band ──→ POST /api/receive ──→ [latest] ──→ GET /api/latest ──→ Monitor
//! Band ←── GET /api/command  ←── [command] ←── POST /api/command ←── Monitor
//! ```

use crate::device::{synthesize_spo2, DeviceReading};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: IpAddr,
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Create a configuration bound to localhost.
    pub fn new(port: u16) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        }
    }

    /// Bind to another address, e.g. `0.0.0.0` so the band can reach it.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }
}

/// Pending control command as stored by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCommand {
    pub command: String,
    /// Server time of the write, epoch milliseconds
    pub timestamp: i64,
}

/// Shared server state
#[derive(Default)]
pub struct ServerState {
    latest: RwLock<Option<DeviceReading>>,
    command: RwLock<Option<StoredCommand>>,
}

/// Body accepted by `POST /api/command`.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Acknowledgement for writes
#[derive(Serialize)]
pub struct WriteResponse {
    pub success: bool,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/receive
///
/// Stores the band's reading stamped with server time. The band does not
/// measure SpO2, so a display value is filled in when missing.
async fn receive(
    State(state): State<Arc<ServerState>>,
    Json(mut reading): Json<DeviceReading>,
) -> Json<WriteResponse> {
    if reading.spo2.is_none() {
        reading.spo2 = Some(f64::from(synthesize_spo2()));
    }
    reading.timestamp = Some(Utc::now().timestamp_millis());

    tracing::debug!(bpm = ?reading.bpm, status = ?reading.status, "Reading received");
    *state.latest.write().await = Some(reading);

    Json(WriteResponse { success: true })
}

/// GET /api/latest
async fn latest(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    let latest = state.latest.read().await;
    Json(to_json_or_empty(latest.as_ref()))
}

/// POST /api/command
async fn put_command(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<WriteResponse>, StatusCode> {
    if request.command.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    tracing::info!(command = %request.command, "Control command stored");
    *state.command.write().await = Some(StoredCommand {
        command: request.command,
        timestamp: Utc::now().timestamp_millis(),
    });

    Ok(Json(WriteResponse { success: true }))
}

/// GET /api/command
async fn get_command(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    let command = state.command.read().await;
    Json(to_json_or_empty(command.as_ref()))
}

/// Serialize a stored value, or `{}` when nothing is stored.
fn to_json_or_empty<T: Serialize>(value: Option<&T>) -> serde_json::Value {
    value
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

/// Build the relay router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/receive", post(receive))
        .route("/api/latest", get(latest))
        .route("/api/command", get(get_command).post(put_command))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(Arc::new(ServerState::default()));

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Relay listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Relay shutdown signal received");
            })
            .await
        {
            tracing::error!("Relay error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_serializes_to_empty_object() {
        assert_eq!(to_json_or_empty::<StoredCommand>(None), serde_json::json!({}));
    }

    #[test]
    fn test_stored_reading_uses_wire_names() {
        let reading = DeviceReading {
            bpm: Some(72.0),
            time_left: Some(4.0),
            ..Default::default()
        };
        let value = to_json_or_empty(Some(&reading));
        assert_eq!(value["bpm"], 72.0);
        assert_eq!(value["timeLeft"], 4.0);
    }
}
