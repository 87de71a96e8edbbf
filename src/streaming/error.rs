// Streaming error types and result aliases

use thiserror::Error;

use super::capture::DriverError;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Error types for the capture-and-distribution engine
///
/// Hardware state mismatches ("already recording", "not recording") never
/// reach this type: the device session normalizes them into idempotent
/// success before they can propagate.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The camera cannot be opened
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A capture primitive was used before `acquire()` or after a reset
    #[error("Device closed: {0}")]
    DeviceClosed(String),

    /// Transient frame read fault
    #[error("Capture error: {0}")]
    Capture(String),

    /// Recordings directory missing, not creatable or not writable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Fault while writing a recording
    #[error("Recording error: {0}")]
    Recording(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Create a device unavailable error
    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    /// Create a device closed error
    pub fn device_closed(msg: impl Into<String>) -> Self {
        Self::DeviceClosed(msg.into())
    }

    /// Create a capture error
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a recording error
    pub fn recording(msg: impl Into<String>) -> Self {
        Self::Recording(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<DriverError> for StreamError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Unavailable(msg) => Self::DeviceUnavailable(msg),
            DriverError::Closed => Self::DeviceClosed("device was closed by the driver".to_string()),
            DriverError::Capture(msg) => Self::Capture(msg),
            DriverError::Io(e) => Self::Recording(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for StreamError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {}", err))
    }
}
