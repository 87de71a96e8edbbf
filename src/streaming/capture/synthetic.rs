// Synthetic camera driver
//
// Emits a tiny JPEG test pattern at the configured frame rate. Used on hosts
// without a camera and by the test suite, which also drives its fault hooks.

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CameraDevice, CameraDriver, DriverError, DriverResult, FrameProducer, PumpedDevice};
use crate::streaming::{CaptureSettings, Resolution, SplitterPort};

const SOI: [u8; 2] = [0xFF, 0xD8];
const COM: [u8; 2] = [0xFF, 0xFE];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Build a minimal JPEG whose comment segment identifies the frame
pub fn encode_test_frame(sequence: u64, resolution: Resolution, annotation: Option<&str>) -> Bytes {
    let mut comment = format!("camerapi test pattern {} #{}", resolution, sequence);
    if let Some(text) = annotation {
        comment.push(' ');
        comment.push_str(text);
    }
    let payload = &comment.as_bytes()[..comment.len().min(u16::MAX as usize - 2)];

    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    buf.put_slice(&SOI);
    buf.put_slice(&COM);
    buf.put_u16(payload.len() as u16 + 2);
    buf.put_slice(payload);
    buf.put_slice(&EOI);
    buf.freeze()
}

struct TestPattern {
    resolution: Resolution,
    interval: Duration,
    sequence: u64,
    next_due: Instant,
}

impl FrameProducer for TestPattern {
    fn next_frame(&mut self, annotation: Option<&str>) -> DriverResult<Bytes> {
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due += self.interval;
        self.sequence += 1;
        Ok(encode_test_frame(self.sequence, self.resolution, annotation))
    }
}

/// Driver producing [`encode_test_frame`] images
pub struct SyntheticDriver {
    opens: AtomicUsize,
    unavailable: AtomicBool,
    current: Mutex<Option<Arc<PumpedDevice>>>,
}

impl SyntheticDriver {
    pub fn new() -> Self {
        Self {
            opens: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    /// Number of times the hardware has been opened
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make subsequent opens fail as if the camera were unplugged
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Most recently opened device
    pub fn current_device(&self) -> Option<Arc<PumpedDevice>> {
        self.current.lock().clone()
    }

    /// Fail the open device as a hardware fault would
    pub fn inject_fault(&self, reason: &str) -> bool {
        match self.current_device() {
            Some(device) => {
                device.splitter().fail(reason);
                true
            }
            None => false,
        }
    }

    /// Stop a recording from the hardware side, behind the session's back
    pub fn interrupt_recording(&self, port: SplitterPort) -> bool {
        self.current_device()
            .map(|device| device.splitter().stop_recording(port).is_ok())
            .unwrap_or(false)
    }
}

impl Default for SyntheticDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDriver for SyntheticDriver {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self, settings: &CaptureSettings) -> DriverResult<Arc<dyn CameraDevice>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DriverError::Unavailable("synthetic camera disabled".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let resolution = settings.resolution;
        let interval = settings.frame_interval();
        let device = PumpedDevice::spawn("synthetic", true, move || {
            Ok(TestPattern {
                resolution,
                interval,
                sequence: 0,
                next_due: Instant::now(),
            })
        })?;

        *self.current.lock() = Some(device.clone());
        Ok(device as Arc<dyn CameraDevice>)
    }
}
