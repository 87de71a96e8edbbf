// Device session
//
// Owns the single camera handle. The handle is opened lazily by the first
// viewer or recording, kept warm while anyone uses it, and dropped on release
// or when the driver reports that the hardware went away.

use chrono::Local;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::capture::{CameraDevice, CameraDriver, DriverError};
use super::recording::SharedChunkSource;
use super::{CaptureSettings, ChunkDescriptor, Frame, SplitterPort, StreamError, StreamResult};

/// Shared owner of the physical camera
pub struct DeviceSession {
    driver: Arc<dyn CameraDriver>,
    settings: CaptureSettings,
    handle: SyncMutex<Option<Arc<dyn CameraDevice>>>,
    // held across open and warm-up only; readers never wait on it
    opening: Mutex<()>,
    recording: SyncMutex<HashSet<SplitterPort>>,
    annotate: AtomicBool,
    frames: AtomicU64,
    opens: AtomicU64,
}

impl DeviceSession {
    pub fn new(driver: Arc<dyn CameraDriver>, settings: CaptureSettings) -> Self {
        let annotate = settings.annotate;
        Self {
            driver,
            settings,
            handle: SyncMutex::new(None),
            opening: Mutex::new(()),
            recording: SyncMutex::new(HashSet::new()),
            annotate: AtomicBool::new(annotate),
            frames: AtomicU64::new(0),
            opens: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Number of times this session opened the hardware
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Frames delivered to live readers since the session was created
    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Whether frames are still being timestamped
    pub fn is_annotating(&self) -> bool {
        self.annotate.load(Ordering::Relaxed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.handle.lock().as_ref(), Some(device) if !device.is_closed())
    }

    /// Ensure the camera is open and warmed up
    ///
    /// Concurrent callers queue on the opening lock, so only the first one
    /// opens the hardware and waits out the warm-up; the rest reuse it.
    pub async fn acquire(&self) -> StreamResult<Arc<dyn CameraDevice>> {
        if let Some(device) = self.open_device() {
            return Ok(device);
        }

        let _opening = self.opening.lock().await;
        if let Some(device) = self.open_device() {
            return Ok(device);
        }
        if self.handle.lock().take().is_some() {
            log::warn!("Camera handle was closed by the driver, reopening");
            self.recording.lock().clear();
        }

        log::info!(
            "Opening {} camera at {} and {} fps",
            self.driver.name(),
            self.settings.resolution,
            self.settings.framerate
        );
        let driver = self.driver.clone();
        let settings = self.settings.clone();
        let device = tokio::task::spawn_blocking(move || driver.open(&settings)).await??;

        if !self.settings.warmup.is_zero() {
            log::debug!("Letting camera warm up for {} ms", self.settings.warmup.as_millis());
            tokio::time::sleep(self.settings.warmup).await;
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.handle.lock() = Some(device.clone());
        Ok(device)
    }

    fn open_device(&self) -> Option<Arc<dyn CameraDevice>> {
        self.handle.lock().as_ref().filter(|device| !device.is_closed()).cloned()
    }

    /// The acquired device, even if the driver has since closed it
    ///
    /// A closed handle is still returned so the driver call reports why it
    /// closed, and the fault path resets the handle.
    fn device(&self) -> StreamResult<Arc<dyn CameraDevice>> {
        self.handle
            .lock()
            .clone()
            .ok_or_else(|| StreamError::device_closed("camera has not been acquired"))
    }

    /// Block until the next encoded frame on the live port
    pub async fn capture_frame(&self) -> StreamResult<Frame> {
        let device = self.device()?;
        if self.annotate.load(Ordering::Relaxed) {
            self.annotate_frame(device.as_ref());
        }

        let port = self.settings.live_port;
        let timeout = self.settings.frame_timeout;
        let capture = device.clone();
        let result = tokio::task::spawn_blocking(move || capture.capture_frame(port, timeout)).await?;

        match result {
            Ok(data) => {
                let sequence = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(Frame::jpeg(data, sequence))
            }
            Err(e) => {
                self.reset_if_closed(&device);
                Err(e.into())
            }
        }
    }

    fn annotate_frame(&self, device: &dyn CameraDevice) {
        let text = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        match device.set_annotation(Some(&text)) {
            Ok(()) => {}
            Err(DriverError::Unsupported(_)) => {
                log::info!("Camera {} cannot annotate frames, disabling timestamps", self.driver.name());
                self.annotate.store(false, Ordering::Relaxed);
            }
            Err(e) => log::debug!("Failed to annotate frame: {}", e),
        }
    }

    /// Start recording on `port` into the first chunk from `source`
    pub async fn begin_recording(
        &self,
        source: &SharedChunkSource,
        port: SplitterPort,
    ) -> StreamResult<ChunkDescriptor> {
        let device = self.device()?;

        let source = source.clone();
        let dev = device.clone();
        let result = tokio::task::spawn_blocking(move || -> StreamResult<ChunkDescriptor> {
            let chunk = source.lock().next_chunk()?;
            let path = &chunk.path;
            if dev.is_recording(port) {
                log::info!("Camera already recording on {}, moving to {}", port, path.display());
                dev.split_recording(path, port)?;
                return Ok(chunk);
            }
            match dev.start_recording(path, port) {
                Ok(()) => Ok(chunk),
                Err(DriverError::AlreadyRecording(_)) => {
                    log::info!("Camera started recording on {} concurrently, splitting", port);
                    dev.split_recording(path, port)?;
                    Ok(chunk)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        let chunk = match result {
            Ok(chunk) => chunk,
            Err(e) => {
                self.reset_if_closed(&device);
                return Err(e);
            }
        };

        self.recording.lock().insert(port);
        log::info!("Recording is on ({}): {}", port, chunk.path.display());
        Ok(chunk)
    }

    /// Continue the recording on `port` in the next chunk from `source`
    pub async fn advance_recording(
        &self,
        source: &SharedChunkSource,
        port: SplitterPort,
    ) -> StreamResult<ChunkDescriptor> {
        let device = self.device()?;

        let source = source.clone();
        let dev = device.clone();
        let result = tokio::task::spawn_blocking(move || -> StreamResult<ChunkDescriptor> {
            let chunk = source.lock().next_chunk()?;
            match dev.split_recording(&chunk.path, port) {
                Ok(()) => Ok(chunk),
                Err(DriverError::NotRecording(_)) => Err(StreamError::recording(format!(
                    "camera stopped recording on {}",
                    port
                ))),
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        match result {
            Ok(chunk) => {
                log::info!("Recording chunk {}: {}", chunk.sequence, chunk.path.display());
                Ok(chunk)
            }
            Err(e) => {
                if matches!(e, StreamError::Recording(_)) {
                    self.recording.lock().remove(&port);
                }
                self.reset_if_closed(&device);
                Err(e)
            }
        }
    }

    /// Hold the recording on `port` open for one slice
    pub async fn wait_recording(&self, slice: Duration, port: SplitterPort) -> StreamResult<()> {
        let device = self.device()?;
        let dev = device.clone();
        match tokio::task::spawn_blocking(move || dev.wait_recording(slice, port)).await? {
            Ok(()) => Ok(()),
            Err(DriverError::NotRecording(_)) => {
                self.recording.lock().remove(&port);
                Err(StreamError::recording(format!("camera stopped recording on {}", port)))
            }
            Err(e) => {
                self.recording.lock().remove(&port);
                self.reset_if_closed(&device);
                Err(e.into())
            }
        }
    }

    /// Stop recording on `port`; a no-op when nothing is recording
    pub async fn end_recording(&self, port: SplitterPort) {
        let was_flagged = self.recording.lock().remove(&port);
        let device = self.handle.lock().clone();

        let device = match device {
            Some(device) if device.is_recording(port) => device,
            _ => {
                if was_flagged {
                    log::info!("Recording is off ({})", port);
                } else {
                    log::info!("Not recording on {}, nothing to stop", port);
                }
                return;
            }
        };

        match tokio::task::spawn_blocking(move || device.stop_recording(port)).await {
            Ok(Ok(())) => log::info!("Recording is off ({})", port),
            Ok(Err(DriverError::NotRecording(_))) => {
                log::info!("Camera had already stopped recording on {}", port)
            }
            Ok(Err(e)) => log::warn!("Failed to stop recording on {}: {}", port, e),
            Err(e) => log::error!("Stop recording task failed: {}", e),
        }
    }

    /// Whether `port` is recording, reconciled against the hardware
    pub async fn is_recording(&self, port: SplitterPort) -> bool {
        if !self.recording.lock().contains(&port) {
            return false;
        }

        let device_recording = match self.handle.lock().as_ref() {
            Some(device) => device.is_recording(port),
            None => false,
        };
        if !device_recording {
            log::warn!(
                "Camera reports not recording on {} while the session was; clearing recording state",
                port
            );
            self.recording.lock().remove(&port);
        }
        device_recording
    }

    /// Stop every recording and close the camera
    pub async fn release(&self) {
        // lets an in-flight open finish so its handle is closed here too
        let _opening = self.opening.lock().await;
        let device = self.handle.lock().take();
        let ports: Vec<_> = self.recording.lock().drain().collect();

        if let Some(device) = device {
            log::info!("Releasing {} camera", self.driver.name());
            let result = tokio::task::spawn_blocking(move || {
                for port in ports {
                    if let Err(e) = device.stop_recording(port) {
                        log::debug!("Stop on release ({}): {}", port, e);
                    }
                }
                device.close();
            })
            .await;
            if let Err(e) = result {
                log::error!("Camera release task failed: {}", e);
            }
        }
    }

    /// Drop the handle if the driver closed it, so the next acquire reopens
    fn reset_if_closed(&self, device: &Arc<dyn CameraDevice>) {
        if !device.is_closed() {
            return;
        }
        let mut handle = self.handle.lock();
        let same = handle
            .as_ref()
            .map(|current| Arc::as_ptr(current) as *const () == Arc::as_ptr(device) as *const ())
            .unwrap_or(false);
        if same {
            log::warn!("Camera {} faulted, handle reset", self.driver.name());
            *handle = None;
            self.recording.lock().clear();
        }
    }
}
