//! HTTP API
//!
//! Live MJPEG stream plus password-gated recording controls, served by axum.

pub mod handlers;
pub mod server;

pub use handlers::{extract_password, ApiHandlers};
pub use server::{create_router, ServerState, WebServer};

use std::net::SocketAddr;
use thiserror::Error;

/// Result type for server lifecycle operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Server lifecycle failures
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server error: {0}")]
    Server(String),
}
