// Core streaming data structures and types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Content type tag carried by every live frame
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self { width: 1200, height: 900 }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Logical channel on the shared camera hardware
///
/// Live capture and recording run on distinct ports so neither blocks the
/// other; the physical device is still a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitterPort(pub u8);

impl SplitterPort {
    pub const LIVE: SplitterPort = SplitterPort(0);
    pub const RECORD: SplitterPort = SplitterPort(2);
}

impl fmt::Display for SplitterPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// Settings applied to the device when it is opened
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub resolution: Resolution,
    pub framerate: u32,
    /// Delay between opening the device and handing it out
    pub warmup: Duration,
    /// Maximum time a single frame read may block
    pub frame_timeout: Duration,
    /// Overlay a capture timestamp on frames when the device supports it
    pub annotate: bool,
    pub live_port: SplitterPort,
    pub record_port: SplitterPort,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            framerate: 30,
            warmup: Duration::from_secs(2),
            frame_timeout: Duration::from_secs(5),
            annotate: false,
            live_port: SplitterPort::LIVE,
            record_port: SplitterPort::RECORD,
        }
    }
}

impl CaptureSettings {
    /// Nominal interval between two frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.framerate.max(1) as f64)
    }
}

/// One encoded still image
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub content_type: &'static str,
    /// Position in the sequence produced by the open device
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap JPEG bytes captured now
    pub fn jpeg(data: Bytes, sequence: u64) -> Self {
        Self {
            data,
            content_type: JPEG_CONTENT_TYPE,
            sequence,
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single recording output target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Session directory the chunk lives in
    pub directory: PathBuf,
    /// Index of the recording session within this process
    pub session: u64,
    /// Chunk number within the session, starting at 1
    pub sequence: u64,
    pub path: PathBuf,
}

/// Recorder state machine; Idle is both initial and terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    Active,
}

/// Snapshot of the recorder for status queries
#[derive(Debug, Clone, Serialize)]
pub struct RecorderStatus {
    pub state: RecordingState,
    pub port: SplitterPort,
    pub chunk_index: Option<u64>,
    pub chunk_path: Option<PathBuf>,
    /// Chunks opened in this run, counting the one still being written
    pub chunks_started: u64,
    pub started_at: Option<DateTime<Utc>>,
}
