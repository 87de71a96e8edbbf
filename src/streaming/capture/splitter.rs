// Frame splitter
//
// One pump thread per open device reads encoded frames from the hardware and
// hands each one to the splitter. The splitter publishes the frame to live
// readers and appends it to the file of every port that is recording, so the
// live channel and the record channel never contend for a hardware buffer.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CameraDevice, DriverError, DriverResult};
use crate::streaming::SplitterPort;

/// Source of encoded frames driven by the pump thread
pub trait FrameProducer {
    /// Block until the hardware yields the next encoded frame
    fn next_frame(&mut self, annotation: Option<&str>) -> DriverResult<Bytes>;
}

struct LatestFrame {
    sequence: u64,
    data: Option<Bytes>,
}

struct RecordingSink {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u64,
    fault: Option<io::Error>,
}

impl RecordingSink {
    fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            frames: 0,
            fault: None,
        })
    }

    fn write(&mut self, frame: &[u8]) {
        if self.fault.is_some() {
            return;
        }
        match self.writer.write_all(frame) {
            Ok(()) => self.frames += 1,
            Err(e) => self.fault = Some(e),
        }
    }

    fn finish(mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("Failed to flush recording {}: {}", self.path.display(), e);
        }
        log::debug!("Closed {} after {} frames", self.path.display(), self.frames);
    }
}

/// Fan-out point between the capture pump and its consumers
pub struct FrameSplitter {
    latest: Mutex<LatestFrame>,
    frame_ready: Condvar,
    sinks: Mutex<HashMap<SplitterPort, RecordingSink>>,
    sinks_changed: Condvar,
    closed: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(LatestFrame { sequence: 0, data: None }),
            frame_ready: Condvar::new(),
            sinks: Mutex::new(HashMap::new()),
            sinks_changed: Condvar::new(),
            closed: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    /// Hand a freshly captured frame to recorders and live readers
    pub fn publish(&self, frame: Bytes) {
        {
            let mut sinks = self.sinks.lock();
            let mut faulted = false;
            for sink in sinks.values_mut() {
                sink.write(&frame);
                faulted |= sink.fault.is_some();
            }
            if faulted {
                self.sinks_changed.notify_all();
            }
        }

        let mut latest = self.latest.lock();
        latest.sequence += 1;
        latest.data = Some(frame);
        self.frame_ready.notify_all();
    }

    /// Wait for a frame newer than the one current at call time
    pub fn next_frame(&self, timeout: Duration) -> DriverResult<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut latest = self.latest.lock();
        let seen = latest.sequence;

        loop {
            if self.is_closed() {
                return Err(self.closed_error());
            }
            if latest.sequence != seen {
                if let Some(data) = &latest.data {
                    return Ok(data.clone());
                }
            }
            if self.frame_ready.wait_until(&mut latest, deadline).timed_out() {
                return Err(DriverError::Capture(format!(
                    "no frame within {} ms",
                    timeout.as_millis()
                )));
            }
        }
    }

    pub fn start_recording(&self, path: &Path, port: SplitterPort) -> DriverResult<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let mut sinks = self.sinks.lock();
        if sinks.contains_key(&port) {
            return Err(DriverError::AlreadyRecording(port));
        }
        sinks.insert(port, RecordingSink::create(path)?);
        self.sinks_changed.notify_all();
        Ok(())
    }

    pub fn split_recording(&self, path: &Path, port: SplitterPort) -> DriverResult<()> {
        let mut sinks = self.sinks.lock();
        let sink = sinks.get_mut(&port).ok_or(DriverError::NotRecording(port))?;
        let next = RecordingSink::create(path)?;
        let previous = std::mem::replace(sink, next);
        drop(sinks);
        previous.finish();
        Ok(())
    }

    pub fn wait_recording(&self, timeout: Duration, port: SplitterPort) -> DriverResult<()> {
        let deadline = Instant::now() + timeout;
        let mut sinks = self.sinks.lock();

        loop {
            if self.is_closed() {
                return Err(self.closed_error());
            }
            let sink = sinks.get_mut(&port).ok_or(DriverError::NotRecording(port))?;
            if let Some(fault) = sink.fault.take() {
                if let Some(sink) = sinks.remove(&port) {
                    sink.finish();
                }
                return Err(DriverError::Io(fault));
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            self.sinks_changed.wait_until(&mut sinks, deadline);
        }
    }

    pub fn stop_recording(&self, port: SplitterPort) -> DriverResult<()> {
        let sink = self
            .sinks
            .lock()
            .remove(&port)
            .ok_or(DriverError::NotRecording(port))?;
        self.sinks_changed.notify_all();
        sink.finish();
        Ok(())
    }

    pub fn is_recording(&self, port: SplitterPort) -> bool {
        !self.is_closed() && self.sinks.lock().contains_key(&port)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the hardware as failed; all waiters observe a capture error
    pub fn fail(&self, reason: impl Into<String>) {
        *self.fault.lock() = Some(reason.into());
        self.close();
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sinks: Vec<_> = self.sinks.lock().drain().map(|(_, sink)| sink).collect();
        for sink in sinks {
            sink.finish();
        }
        self.sinks_changed.notify_all();

        let _latest = self.latest.lock();
        self.frame_ready.notify_all();
    }

    fn closed_error(&self) -> DriverError {
        match self.fault.lock().as_ref() {
            Some(reason) => DriverError::Capture(reason.clone()),
            None => DriverError::Closed,
        }
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera device backed by a pump thread feeding a [`FrameSplitter`]
pub struct PumpedDevice {
    name: String,
    splitter: Arc<FrameSplitter>,
    annotation: Arc<Mutex<Option<String>>>,
    annotates: bool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PumpedDevice {
    /// Start the pump thread
    ///
    /// The producer is built on the pump thread so hardware handles that are
    /// not `Send` never cross threads.
    pub fn spawn<P, F>(name: &str, annotates: bool, make_producer: F) -> DriverResult<Arc<Self>>
    where
        P: FrameProducer,
        F: FnOnce() -> DriverResult<P> + Send + 'static,
    {
        let splitter = Arc::new(FrameSplitter::new());
        let annotation = Arc::new(Mutex::new(None::<String>));

        let pump_splitter = splitter.clone();
        let pump_annotation = annotation.clone();
        let pump_name = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("{}-pump", name))
            .spawn(move || {
                let mut producer = match make_producer() {
                    Ok(producer) => producer,
                    Err(e) => {
                        log::error!("Camera {} failed to start streaming: {}", pump_name, e);
                        pump_splitter.fail(e.to_string());
                        return;
                    }
                };

                while !pump_splitter.is_closed() {
                    let text = pump_annotation.lock().clone();
                    match producer.next_frame(text.as_deref()) {
                        Ok(frame) if frame.is_empty() => continue,
                        Ok(frame) => pump_splitter.publish(frame),
                        Err(e) => {
                            log::error!("Camera {} capture fault: {}", pump_name, e);
                            pump_splitter.fail(e.to_string());
                            break;
                        }
                    }
                }
                log::debug!("Capture pump for {} stopped", pump_name);
            })
            .map_err(|e| DriverError::Unavailable(format!("failed to start capture thread: {}", e)))?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            splitter,
            annotation,
            annotates,
            pump: Mutex::new(Some(handle)),
        }))
    }

    pub fn splitter(&self) -> &Arc<FrameSplitter> {
        &self.splitter
    }
}

impl CameraDevice for PumpedDevice {
    fn capture_frame(&self, _port: SplitterPort, timeout: Duration) -> DriverResult<Bytes> {
        self.splitter.next_frame(timeout)
    }

    fn start_recording(&self, path: &Path, port: SplitterPort) -> DriverResult<()> {
        self.splitter.start_recording(path, port)
    }

    fn split_recording(&self, path: &Path, port: SplitterPort) -> DriverResult<()> {
        self.splitter.split_recording(path, port)
    }

    fn wait_recording(&self, timeout: Duration, port: SplitterPort) -> DriverResult<()> {
        self.splitter.wait_recording(timeout, port)
    }

    fn stop_recording(&self, port: SplitterPort) -> DriverResult<()> {
        self.splitter.stop_recording(port)
    }

    fn is_recording(&self, port: SplitterPort) -> bool {
        self.splitter.is_recording(port)
    }

    fn set_annotation(&self, text: Option<&str>) -> DriverResult<()> {
        if !self.annotates {
            return Err(DriverError::Unsupported("annotation"));
        }
        *self.annotation.lock() = text.map(str::to_string);
        Ok(())
    }

    fn close(&self) {
        self.splitter.close();
        let handle = self.pump.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::warn!("Capture pump for {} panicked", self.name);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.splitter.is_closed()
    }
}

impl Drop for PumpedDevice {
    fn drop(&mut self) {
        self.splitter.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_frame_waits_for_new_frame() {
        let splitter = Arc::new(FrameSplitter::new());
        splitter.publish(Bytes::from_static(b"old"));

        let publisher = splitter.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.publish(Bytes::from_static(b"new"));
        });

        let frame = splitter.next_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(&frame[..], b"new");
        handle.join().unwrap();
    }

    #[test]
    fn test_next_frame_times_out() {
        let splitter = FrameSplitter::new();
        let err = splitter.next_frame(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, DriverError::Capture(_)));
    }

    #[test]
    fn test_recording_state_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let splitter = FrameSplitter::new();
        let port = SplitterPort::RECORD;

        assert!(matches!(splitter.stop_recording(port), Err(DriverError::NotRecording(_))));

        splitter.start_recording(&dir.path().join("a.mjpeg"), port).unwrap();
        assert!(matches!(
            splitter.start_recording(&dir.path().join("b.mjpeg"), port),
            Err(DriverError::AlreadyRecording(_))
        ));
        assert!(splitter.is_recording(port));
        assert!(!splitter.is_recording(SplitterPort::LIVE));

        splitter.stop_recording(port).unwrap();
        assert!(!splitter.is_recording(port));
    }

    #[test]
    fn test_frames_written_to_split_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("1.mjpeg");
        let second = dir.path().join("2.mjpeg");
        let splitter = FrameSplitter::new();
        let port = SplitterPort::RECORD;

        splitter.start_recording(&first, port).unwrap();
        splitter.publish(Bytes::from_static(b"aa"));
        splitter.split_recording(&second, port).unwrap();
        splitter.publish(Bytes::from_static(b"bbb"));
        splitter.stop_recording(port).unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), b"aa");
        assert_eq!(std::fs::read(&second).unwrap(), b"bbb");
    }

    #[test]
    fn test_fail_reports_capture_error() {
        let splitter = FrameSplitter::new();
        splitter.fail("sensor unplugged");
        assert!(splitter.is_closed());
        match splitter.next_frame(Duration::from_millis(10)) {
            Err(DriverError::Capture(msg)) => assert!(msg.contains("unplugged")),
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }
}
