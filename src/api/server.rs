//! Web Server Implementation
//!
//! Router construction and server lifecycle.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use super::handlers::ApiHandlers;
use super::{ApiError, ApiResult};
use crate::config::{ServerConfig, SharedSecret};
use crate::streaming::{multipart, CameraService};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server state shared across handlers
#[derive(Clone)]
pub struct ServerState {
    pub handlers: Arc<ApiHandlers>,
    pub stream_route: Arc<str>,
}

/// Web server for the camera API
pub struct WebServer {
    state: ServerState,
    base_path: String,
    shutdown_signal: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WebServer {
    pub fn new(service: CameraService, secret: SharedSecret, config: &ServerConfig) -> Self {
        Self {
            state: ServerState {
                handlers: Arc::new(ApiHandlers::new(service, secret)),
                stream_route: Arc::from(config.stream_route()),
            },
            base_path: config.base_path.clone(),
            shutdown_signal: None,
            task: None,
        }
    }

    pub fn router(&self) -> Router {
        create_router(&self.base_path, self.state.clone())
    }

    /// Bind and serve in the background; returns the bound address
    pub async fn start(&mut self, addr: SocketAddr) -> ApiResult<SocketAddr> {
        if self.task.is_some() {
            return Err(ApiError::AlreadyRunning);
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ApiError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ApiError::Bind { addr, source })?;
        log::info!("Camera API listening on http://{}{}", local_addr, self.state.stream_route);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_signal = Some(shutdown_tx);

        let app = self.router();
        self.task = Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await;
            if let Err(e) = result {
                log::error!("Server error: {}", e);
            }
        }));

        Ok(local_addr)
    }

    /// Stop accepting requests, close the camera, then drain connections
    ///
    /// Live streams never end on their own; closing the camera ends their
    /// bodies so the graceful shutdown can complete.
    pub async fn shutdown(&mut self) -> ApiResult<()> {
        if let Some(signal) = self.shutdown_signal.take() {
            let _ = signal.send(());
        }
        self.state.handlers.service().shutdown().await;

        if let Some(task) = self.task.take() {
            match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(ApiError::Server(e.to_string())),
                Err(_) => log::warn!("Connections still open after {:?}; exiting anyway", DRAIN_TIMEOUT),
            }
        }
        Ok(())
    }
}

/// Create the Axum router with all endpoints
pub fn create_router(base_path: &str, state: ServerState) -> Router {
    let base = base_path.trim_end_matches('/');
    let route = |name: &str| format!("{}/{}", base, name);

    Router::new()
        // Live view
        .route(&route("stream/"), get(stream))
        .route("/", get(redirect_to_stream))
        .route(&format!("{}/", base), get(redirect_to_stream))
        .route(base, get(redirect_to_stream))
        // Recording control
        .route(&route("start_recording"), post(start_recording))
        .route(&route("stop_recording"), post(stop_recording))
        .route(&route("is_recording"), get(is_recording))
        .route(&route("recording_status"), get(recording_status))
        // Placeholders kept for existing clients
        .route(&route("start_streaming"), get(start_streaming))
        .route(&route("stop_streaming"), get(stop_streaming))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Live MJPEG stream, one fresh frame sequence per client
async fn stream(State(state): State<ServerState>) -> Response {
    log::info!("Stream requested");
    let frames = state.handlers.service().frame_source().frames();
    let body = Body::from_stream(multipart::multipart_stream(frames));

    (
        [
            (header::CONTENT_TYPE, multipart::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response()
}

async fn redirect_to_stream(State(state): State<ServerState>) -> Redirect {
    log::info!("Redirecting to {}", state.stream_route);
    Redirect::to(&state.stream_route)
}

async fn start_recording(State(state): State<ServerState>, body: Bytes) -> Json<Value> {
    Json(state.handlers.handle_start_recording(&body).await)
}

async fn stop_recording(State(state): State<ServerState>, body: Bytes) -> Json<Value> {
    Json(state.handlers.handle_stop_recording(&body).await)
}

async fn is_recording(State(state): State<ServerState>) -> Json<Value> {
    Json(state.handlers.handle_is_recording().await)
}

async fn recording_status(State(state): State<ServerState>) -> Json<Value> {
    Json(state.handlers.handle_recording_status().await)
}

async fn start_streaming() -> (StatusCode, &'static str) {
    log::warn!("Start streaming requested but not implemented");
    (StatusCode::NOT_FOUND, "Start streaming not yet implemented")
}

async fn stop_streaming() -> (StatusCode, &'static str) {
    log::warn!("Stop streaming requested but not implemented");
    (StatusCode::NOT_FOUND, "Stop streaming not yet implemented")
}
