// Camera Streaming System
//
// One camera, shared between any number of live MJPEG viewers and one
// background recorder writing fixed-length chunk files.

pub mod api;
pub mod capture;
pub mod device;
pub mod error;
pub mod frames;
pub mod multipart;
pub mod recording;
pub mod types;

pub use api::CameraService;
pub use capture::{CameraDevice, CameraDriver, DriverError, DriverKind, SyntheticDriver};
pub use device::DeviceSession;
pub use error::{StreamError, StreamResult};
pub use frames::FrameSource;
pub use recording::{ChunkAllocator, ChunkSource, Recorder, RecorderSettings, SharedChunkSource};
pub use types::*;
