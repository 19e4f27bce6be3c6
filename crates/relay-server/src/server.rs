//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorBody, ErrorCode};
use crate::health::{self, HealthResponse};
use crate::ingest;
use crate::shutdown::ShutdownCoordinator;
use crate::ws::broadcast::Broadcaster;
use crate::ws::connection::ConnectionId;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcaster for event fan-out.
    pub broadcaster: Arc<Broadcaster>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Renders the `/metrics` endpoint.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a new server. `metrics` is the handle from
    /// [`crate::metrics::install_recorder`]; without one the `/metrics`
    /// endpoint returns an empty body.
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            config: Arc::new(config),
            broadcaster: Arc::new(Broadcaster::new(registry.clone())),
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broadcaster: self.broadcaster.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/events", post(ingest::ingest_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with `port = 0`) and the serve
    /// task handle.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "relay server listening");

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let subscribers = state.broadcaster.registry().len().await;
    Json(health::health_check(state.start_time, subscribers))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(crate::metrics::render)
        .unwrap_or_default()
}

/// GET /ws, upgrading to a subscriber session.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return service_unavailable("server is shutting down");
    }
    let current = state.broadcaster.registry().len().await;
    if current >= state.config.max_connections {
        warn!(
            current,
            max = state.config.max_connections,
            "rejecting subscriber, connection limit reached"
        );
        return service_unavailable("connection limit reached");
    }

    let conn_id = ConnectionId::generate();
    let registry = state.broadcaster.registry().clone();
    let ping_interval = state.config.heartbeat_interval();
    let pong_timeout = state.config.heartbeat_timeout();
    let cancel = state.shutdown.token();
    let shutdown = state.shutdown.clone();

    ws.on_upgrade(move |socket| async move {
        let _ = shutdown.spawn_session(session::run_session(
            socket,
            conn_id,
            registry,
            ping_interval,
            pong_timeout,
            cancel,
        ));
    })
}

fn service_unavailable(message: &str) -> Response {
    let body = ErrorBody::new(ErrorCode::TooManyConnections, message);
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}
