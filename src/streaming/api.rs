// Camera service
//
// Owns the one device session of the process and hands it to the live frame
// sources and the recorder. Shutdown stops recording before releasing the
// camera so the last chunk is closed cleanly.

use std::sync::Arc;

use super::capture::{self, CameraDriver};
use super::device::DeviceSession;
use super::frames::FrameSource;
use super::recording::{ChunkAllocator, Recorder, RecorderSettings};
use super::{CaptureSettings, StreamResult};
use crate::config::ServerConfig;

/// Composition root of the streaming side
#[derive(Clone)]
pub struct CameraService {
    session: Arc<DeviceSession>,
    recorder: Recorder,
}

impl CameraService {
    /// Wire a service around an already constructed driver
    pub fn new(
        driver: Arc<dyn CameraDriver>,
        capture: CaptureSettings,
        allocator: ChunkAllocator,
        recording: RecorderSettings,
    ) -> Self {
        let session = Arc::new(DeviceSession::new(driver, capture));
        let recorder = Recorder::new(session.clone(), allocator, recording);
        Self { session, recorder }
    }

    /// Build the driver and everything on top of it from configuration
    pub fn from_config(config: &ServerConfig) -> StreamResult<Self> {
        let driver = capture::create_driver(config.device.driver, &config.device.path)?;
        log::info!(
            "Using {} camera driver at {} ({} @ {} fps)",
            driver.name(),
            config.device.path.display(),
            config.device.resolution(),
            config.device.framerate
        );

        Ok(Self::new(
            driver,
            config.capture_settings(),
            ChunkAllocator::new(&config.recordings_path, &config.recording.extension),
            config.recorder_settings(),
        ))
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// A new frame source for one live viewer
    pub fn frame_source(&self) -> FrameSource {
        FrameSource::new(self.session.clone())
    }

    /// Stop recording, wait for the recorder task, then close the camera
    pub async fn shutdown(&self) {
        log::info!("Shutting down camera service");
        self.recorder.shutdown().await;
        self.session.release().await;
    }
}
