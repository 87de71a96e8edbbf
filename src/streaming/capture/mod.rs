// Camera driver layer
//
// The camera SDK is an opaque driver: open the device, read one encoded frame,
// record to a file, split the recording onto the next file, stop. Every call
// may block or fail; callers run them on the blocking pool.

pub mod platform;
pub mod splitter;
pub mod synthetic;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::streaming::{CaptureSettings, SplitterPort, StreamError, StreamResult};

pub use splitter::{FrameProducer, FrameSplitter, PumpedDevice};
pub use synthetic::SyntheticDriver;

/// Result type for driver calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Faults reported by a camera driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("camera is closed")]
    Closed,

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("already recording on {0}")]
    AlreadyRecording(SplitterPort),

    #[error("not recording on {0}")]
    NotRecording(SplitterPort),

    #[error("{0} is not supported by this camera")]
    Unsupported(&'static str),

    #[error("recording I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// An open camera
///
/// Implementations are internally synchronized: the live port and the record
/// port can be driven from different threads at the same time.
pub trait CameraDevice: Send + Sync {
    /// Block until the next encoded frame is available on `port`
    fn capture_frame(&self, port: SplitterPort, timeout: Duration) -> DriverResult<Bytes>;

    /// Start writing encoded video to `path` on `port`
    fn start_recording(&self, path: &Path, port: SplitterPort) -> DriverResult<()>;

    /// Continue the recording on `port` in a new file without a gap
    fn split_recording(&self, path: &Path, port: SplitterPort) -> DriverResult<()>;

    /// Hold the recording open for `timeout`, surfacing any writer fault
    fn wait_recording(&self, timeout: Duration, port: SplitterPort) -> DriverResult<()>;

    fn stop_recording(&self, port: SplitterPort) -> DriverResult<()>;

    fn is_recording(&self, port: SplitterPort) -> bool;

    /// Set or clear the text overlaid on subsequent frames
    fn set_annotation(&self, _text: Option<&str>) -> DriverResult<()> {
        Err(DriverError::Unsupported("annotation"))
    }

    /// Release the hardware; the device cannot be reopened
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Factory for camera devices
pub trait CameraDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Open the hardware and apply resolution and frame rate
    fn open(&self, settings: &CaptureSettings) -> DriverResult<Arc<dyn CameraDevice>>;
}

/// Available driver backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    V4l2,
    Synthetic,
}

impl std::str::FromStr for DriverKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v4l2" | "v4l" => Ok(Self::V4l2),
            "synthetic" | "test" => Ok(Self::Synthetic),
            other => Err(StreamError::configuration(format!(
                "Unknown camera driver '{}'. Valid options: v4l2, synthetic",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4l2 => write!(f, "v4l2"),
            Self::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Create the driver selected by configuration
pub fn create_driver(kind: DriverKind, device_path: &Path) -> StreamResult<Arc<dyn CameraDriver>> {
    match kind {
        DriverKind::Synthetic => Ok(Arc::new(SyntheticDriver::new())),
        DriverKind::V4l2 => platform::create_platform_driver(device_path),
    }
}
