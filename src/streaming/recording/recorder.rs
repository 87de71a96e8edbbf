// Background recorder
//
// Drives the device session's record primitive in bounded slices and rotates
// to a new chunk file once the chunk duration has elapsed. Stop is
// cooperative: the run's token is cancelled and the device recording is ended
// eagerly, the background task notices at its next slice boundary.

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::allocator::{self, ChunkAllocator, SharedChunkSource};
use crate::streaming::device::DeviceSession;
use crate::streaming::{
    ChunkDescriptor, RecorderStatus, RecordingState, SplitterPort, StreamResult,
};

/// Timing of the recording loop
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSettings {
    /// Length of one chunk file
    pub chunk_duration: Duration,
    /// Interval between stop checks
    pub slice: Duration,
    pub port: SplitterPort,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_secs(5 * 60),
            slice: Duration::from_millis(500),
            port: SplitterPort::RECORD,
        }
    }
}

impl RecorderSettings {
    fn slices_per_chunk(&self) -> u64 {
        let slice = self.slice.as_millis().max(1);
        ((self.chunk_duration.as_millis() / slice) as u64).max(1)
    }
}

struct RunState {
    state: RecordingState,
    generation: u64,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    recording_started: bool,
    chunk: Option<ChunkDescriptor>,
    chunks_started: u64,
    started_at: Option<DateTime<Utc>>,
}

struct RecorderInner {
    session: Arc<DeviceSession>,
    allocator: Arc<SyncMutex<ChunkAllocator>>,
    root: PathBuf,
    settings: RecorderSettings,
    run: SyncMutex<RunState>,
}

/// Start/stop control over the continuous recording
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    pub fn new(session: Arc<DeviceSession>, allocator: ChunkAllocator, settings: RecorderSettings) -> Self {
        let root = allocator.root().to_path_buf();
        Self {
            inner: Arc::new(RecorderInner {
                session,
                allocator: Arc::new(SyncMutex::new(allocator)),
                root,
                settings,
                run: SyncMutex::new(RunState {
                    state: RecordingState::Idle,
                    generation: 0,
                    token: None,
                    task: None,
                    recording_started: false,
                    chunk: None,
                    chunks_started: 0,
                    started_at: None,
                }),
            }),
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.inner.settings
    }

    /// Begin recording; a no-op while already active
    ///
    /// Fails with a storage error, and stays idle, when the recordings
    /// directory cannot be created or written.
    pub async fn start(&self) -> StreamResult<()> {
        if self.inner.run.lock().state == RecordingState::Active {
            log::info!("Recording already active");
            return Ok(());
        }

        let root = self.inner.root.clone();
        tokio::task::spawn_blocking(move || allocator::ensure_writable(&root)).await??;

        let mut run = self.inner.run.lock();
        if run.state == RecordingState::Active {
            log::info!("Recording already active");
            return Ok(());
        }

        run.generation += 1;
        let generation = run.generation;
        let token = CancellationToken::new();

        run.state = RecordingState::Active;
        run.token = Some(token.clone());
        run.recording_started = false;
        run.chunk = None;
        run.chunks_started = 0;
        run.started_at = Some(Utc::now());

        let previous = run.task.take();
        let inner = self.inner.clone();
        run.task = Some(tokio::spawn(inner.run(generation, token, previous)));

        log::info!("Recording requested on {}", self.inner.settings.port);
        Ok(())
    }

    /// Request the recording to stop; idempotent
    pub async fn stop(&self) {
        let token = {
            let mut run = self.inner.run.lock();
            if run.state == RecordingState::Idle {
                log::info!("Recording already stopped");
            }
            run.state = RecordingState::Idle;
            run.recording_started = false;
            run.token.take()
        };
        if let Some(token) = token {
            token.cancel();
        }
        self.inner.session.end_recording(self.inner.settings.port).await;
    }

    /// Active/Idle, reconciled against the device's recording state
    pub async fn is_recording(&self) -> bool {
        let (state, started, generation) = {
            let run = self.inner.run.lock();
            (run.state, run.recording_started, run.generation)
        };
        if state == RecordingState::Idle {
            return false;
        }
        if !started {
            return true;
        }
        if self.inner.session.is_recording(self.inner.settings.port).await {
            return true;
        }

        let token = {
            let mut run = self.inner.run.lock();
            if run.generation == generation && run.state == RecordingState::Active {
                log::warn!("Recorder was active but the camera is not recording; forcing idle");
                run.state = RecordingState::Idle;
                run.recording_started = false;
                run.token.take()
            } else {
                None
            }
        };
        if let Some(token) = token {
            token.cancel();
        }
        false
    }

    pub fn status(&self) -> RecorderStatus {
        let run = self.inner.run.lock();
        let active = run.state == RecordingState::Active;
        RecorderStatus {
            state: run.state,
            port: self.inner.settings.port,
            chunk_index: run.chunk.as_ref().filter(|_| active).map(|c| c.sequence),
            chunk_path: run.chunk.as_ref().filter(|_| active).map(|c| c.path.clone()),
            chunks_started: run.chunks_started,
            started_at: run.started_at.filter(|_| active),
        }
    }

    /// Stop and wait for the background task to finish
    pub async fn shutdown(&self) {
        self.stop().await;
        let task = self.inner.run.lock().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("Recording task failed during shutdown: {}", e);
            }
        }
    }
}

impl RecorderInner {
    async fn run(
        self: Arc<Self>,
        generation: u64,
        token: CancellationToken,
        previous: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                log::error!("Previous recording task failed: {}", e);
            }
        }

        match self.record(generation, &token).await {
            Ok(()) => log::info!("Recording loop finished"),
            Err(e) => log::error!("Recording stopped by fault: {}", e),
        }
        self.session.end_recording(self.settings.port).await;

        let mut run = self.run.lock();
        if run.generation == generation {
            run.state = RecordingState::Idle;
            run.recording_started = false;
            run.token = None;
        }
    }

    async fn record(&self, generation: u64, token: &CancellationToken) -> StreamResult<()> {
        if token.is_cancelled() {
            return Ok(());
        }

        self.allocator.lock().start_new_session();
        let source: SharedChunkSource = self.allocator.clone();

        self.session.acquire().await?;
        if token.is_cancelled() {
            return Ok(());
        }

        let port = self.settings.port;
        let chunk = self.session.begin_recording(&source, port).await?;
        self.note_chunk(generation, chunk, true);

        let slices = self.settings.slices_per_chunk();
        loop {
            for _ in 0..slices {
                if token.is_cancelled() {
                    return Ok(());
                }
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    waited = self.session.wait_recording(self.settings.slice, port) => waited?,
                }
            }

            let chunk = self.session.advance_recording(&source, port).await?;
            self.note_chunk(generation, chunk, false);
        }
    }

    fn note_chunk(&self, generation: u64, chunk: ChunkDescriptor, first: bool) {
        let mut run = self.run.lock();
        if run.generation != generation {
            return;
        }
        if first {
            run.recording_started = true;
        }
        run.chunks_started += 1;
        run.chunk = Some(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::capture::SyntheticDriver;
    use crate::streaming::{CaptureSettings, StreamError};

    fn recorder(root: &std::path::Path) -> (Arc<SyntheticDriver>, Recorder) {
        let driver = Arc::new(SyntheticDriver::new());
        let settings = CaptureSettings {
            framerate: 100,
            warmup: Duration::ZERO,
            ..CaptureSettings::default()
        };
        let session = Arc::new(DeviceSession::new(driver.clone(), settings));
        let recorder = Recorder::new(
            session,
            ChunkAllocator::new(root, "mjpeg"),
            RecorderSettings {
                chunk_duration: Duration::from_millis(100),
                slice: Duration::from_millis(20),
                port: SplitterPort::RECORD,
            },
        );
        (driver, recorder)
    }

    async fn wait_for_first_chunk(recorder: &Recorder) {
        for _ in 0..200 {
            if recorder.status().chunks_started > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("recorder never wrote a chunk");
    }

    #[test]
    fn test_slices_per_chunk() {
        let settings = RecorderSettings::default();
        assert_eq!(settings.slices_per_chunk(), 600);

        let tiny = RecorderSettings {
            chunk_duration: Duration::from_millis(1),
            ..RecorderSettings::default()
        };
        assert_eq!(tiny.slices_per_chunk(), 1);
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (_, recorder) = recorder(dir.path());

        recorder.stop().await;
        recorder.stop().await;
        assert!(!recorder.is_recording().await);
        assert_eq!(recorder.status().state, RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_start_twice_is_single_transition() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, recorder) = recorder(dir.path());

        recorder.start().await.unwrap();
        recorder.start().await.unwrap();
        assert!(recorder.is_recording().await);
        wait_for_first_chunk(&recorder).await;

        recorder.shutdown().await;
        assert!(!recorder.is_recording().await);
        assert_eq!(driver.open_count(), 1);
    }

    #[tokio::test]
    async fn test_chunks_rotate_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (_, recorder) = recorder(dir.path());

        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        let status = recorder.status();
        recorder.shutdown().await;

        assert!(status.chunks_started >= 2, "only {} chunks", status.chunks_started);
        assert_eq!(status.chunk_index, Some(status.chunks_started));

        let session_dir = status.chunk_path.unwrap().parent().unwrap().to_path_buf();
        let mut names: Vec<_> = std::fs::read_dir(&session_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names[0], "chunk-00001.mjpeg");
        assert_eq!(names[1], "chunk-00002.mjpeg");
    }

    #[tokio::test]
    async fn test_device_fault_forces_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, recorder) = recorder(dir.path());

        recorder.start().await.unwrap();
        wait_for_first_chunk(&recorder).await;
        assert!(driver.interrupt_recording(SplitterPort::RECORD));

        assert!(!recorder.is_recording().await);
        assert_eq!(recorder.status().state, RecordingState::Idle);
        recorder.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_warmup() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CaptureSettings {
            framerate: 100,
            warmup: Duration::from_millis(800),
            ..CaptureSettings::default()
        };
        let session = Arc::new(DeviceSession::new(Arc::new(SyntheticDriver::new()), settings));
        let recorder = Recorder::new(
            session.clone(),
            ChunkAllocator::new(dir.path(), "mjpeg"),
            RecorderSettings::default(),
        );

        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = tokio::time::timeout(Duration::from_millis(300), recorder.stop()).await;
        assert!(stopped.is_ok(), "stop blocked behind the camera warm-up");
        assert!(!recorder.is_recording().await);

        recorder.shutdown().await;
        session.release().await;
    }

    #[tokio::test]
    async fn test_storage_error_surfaces_on_start() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("file");
        std::fs::write(&root, b"x").unwrap();
        let (_, recorder) = recorder(&root);

        assert!(matches!(recorder.start().await, Err(StreamError::Storage(_))));
        assert!(!recorder.is_recording().await);
    }
}
