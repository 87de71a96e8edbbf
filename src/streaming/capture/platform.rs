// Platform camera backends
//
// Linux cameras are driven through Video4Linux2 in MJPEG mode so the hardware
// hands out ready-encoded JPEG frames. Other platforms only offer the
// synthetic driver.

use std::path::Path;
use std::sync::Arc;

use super::CameraDriver;
use crate::streaming::StreamResult;

/// Create the native driver for this platform
pub fn create_platform_driver(device_path: &Path) -> StreamResult<Arc<dyn CameraDriver>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxCaptureBackend::new(device_path)))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(crate::streaming::StreamError::configuration(format!(
            "No native camera backend on this platform for {}; use the synthetic driver",
            device_path.display()
        )))
    }
}

#[cfg(target_os = "linux")]
pub use linux::LinuxCaptureBackend;

#[cfg(target_os = "linux")]
mod linux {
    use bytes::Bytes;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream as MmapStream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::capture::Parameters;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    use crate::streaming::capture::{
        CameraDevice, CameraDriver, DriverError, DriverResult, FrameProducer, PumpedDevice,
    };
    use crate::streaming::CaptureSettings;

    const MJPEG: &[u8; 4] = b"MJPG";
    const BUFFER_COUNT: u32 = 4;

    /// Video4Linux2 camera driver
    pub struct LinuxCaptureBackend {
        device_path: PathBuf,
    }

    impl LinuxCaptureBackend {
        pub fn new(device_path: &Path) -> Self {
            Self {
                device_path: device_path.to_path_buf(),
            }
        }

        /// Open the node and negotiate MJPEG at the requested size and rate
        fn open_device(&self, settings: &CaptureSettings) -> DriverResult<Device> {
            let unavailable = |e: std::io::Error| {
                DriverError::Unavailable(format!("{}: {}", self.device_path.display(), e))
            };

            let device = Device::with_path(&self.device_path).map_err(unavailable)?;
            let caps = device.query_caps().map_err(unavailable)?;
            log::info!("Opened {} ({}, driver {})", self.device_path.display(), caps.card, caps.driver);

            let mut format = device.format().map_err(unavailable)?;
            format.width = settings.resolution.width;
            format.height = settings.resolution.height;
            format.fourcc = FourCC::new(MJPEG);
            let format = device.set_format(&format).map_err(unavailable)?;

            if format.fourcc != FourCC::new(MJPEG) {
                return Err(DriverError::Unavailable(format!(
                    "{} does not support MJPEG capture (negotiated {})",
                    self.device_path.display(),
                    format.fourcc
                )));
            }
            if format.width != settings.resolution.width || format.height != settings.resolution.height {
                log::warn!(
                    "Camera adjusted resolution to {}x{} (requested {})",
                    format.width,
                    format.height,
                    settings.resolution
                );
            }

            if let Err(e) = device.set_params(&Parameters::with_fps(settings.framerate)) {
                log::warn!("Camera rejected frame rate {}: {}", settings.framerate, e);
            }

            Ok(device)
        }
    }

    impl CameraDriver for LinuxCaptureBackend {
        fn name(&self) -> &str {
            "v4l2"
        }

        fn open(&self, settings: &CaptureSettings) -> DriverResult<Arc<dyn CameraDevice>> {
            let device = self.open_device(settings)?;
            let device = PumpedDevice::spawn("v4l2", false, move || {
                let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|e| DriverError::Unavailable(format!("failed to map capture buffers: {}", e)))?;
                Ok(V4l2Frames { _device: device, stream })
            })?;
            Ok(device as Arc<dyn CameraDevice>)
        }
    }

    struct V4l2Frames {
        _device: Device,
        stream: MmapStream<'static>,
    }

    impl FrameProducer for V4l2Frames {
        fn next_frame(&mut self, _annotation: Option<&str>) -> DriverResult<Bytes> {
            let (buf, meta) = self
                .stream
                .next()
                .map_err(|e| DriverError::Capture(e.to_string()))?;
            let used = (meta.bytesused as usize).min(buf.len());
            Ok(Bytes::copy_from_slice(&buf[..used]))
        }
    }
}
