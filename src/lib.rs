pub mod api;
pub mod config;
pub mod streaming;

pub use api::WebServer;
pub use config::{ServerConfig, SharedSecret};
pub use streaming::{CameraService, StreamError, StreamResult};
