//! `RelayServer`: Axum router, WebSocket upgrades and the listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::rest;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::SessionContext;
use crate::websocket::device_session::run_device_session;
use crate::websocket::ui_session::run_ui_session;
use crate::websocket::writer::WriterSettings;

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Device store and UI registry.
    pub hub: Hub,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Cancelled on shutdown; handed to every session.
    pub shutdown: CancellationToken,
    /// Server start time (for uptime).
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    fn session_context(&self) -> SessionContext {
        SessionContext {
            hub: self.hub.clone(),
            writer: WriterSettings::from(self.config.as_ref()),
            queue_capacity: self.config.send_queue_capacity,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    hub: Hub,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server with an empty hub.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            hub: Hub::new(),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            config: Arc::clone(&self.config),
            shutdown: self.shutdown.token(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws/devices", get(device_ws_handler))
            .route("/ws/ui", get(ui_ws_handler))
            .route("/rest/device/{id}", get(rest::set_device_value))
            .route("/rest/devices", get(rest::list_devices))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        info!(addr = %local_addr, "relay server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        Ok((local_addr, handle))
    }

    /// The hub shared by every session.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

async fn device_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let ctx = state.session_context();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_device_session(socket, peer, ctx))
}

async fn ui_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let ctx = state.session_context();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ui_session(socket, peer, ctx))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.devices().len(),
        state.hub.uis().len(),
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
