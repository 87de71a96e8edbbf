// Recorder lifecycle tests against the synthetic camera

use camerapi::streaming::{
    CaptureSettings, ChunkAllocator, DeviceSession, Recorder, RecorderSettings, RecordingState,
    SplitterPort, SyntheticDriver,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn recorder(root: &Path, driver: Arc<SyntheticDriver>) -> (Arc<DeviceSession>, Recorder) {
    let session = Arc::new(DeviceSession::new(
        driver,
        CaptureSettings {
            framerate: 50,
            warmup: Duration::ZERO,
            ..CaptureSettings::default()
        },
    ));
    let recorder = Recorder::new(
        session.clone(),
        ChunkAllocator::new(root, "mjpeg"),
        RecorderSettings {
            chunk_duration: Duration::from_millis(150),
            slice: Duration::from_millis(25),
            port: SplitterPort::RECORD,
        },
    );
    (session, recorder)
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn session_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<_> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

#[tokio::test]
async fn test_restart_opens_new_session_directory() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(SyntheticDriver::new());
    let (session, recorder) = recorder(dir.path(), driver.clone());

    recorder.start().await.unwrap();
    assert!(wait_until(|| recorder.status().chunks_started >= 2).await);
    let first = recorder.status().chunk_path.unwrap();
    recorder.stop().await;
    assert!(!recorder.is_recording().await);

    recorder.start().await.unwrap();
    assert!(wait_until(|| recorder.status().chunks_started >= 1).await);
    let second = recorder.status().chunk_path.unwrap();
    recorder.shutdown().await;

    assert_ne!(first.parent(), second.parent());
    assert_eq!(session_dirs(dir.path()).len(), 2);
    assert_eq!(driver.open_count(), 1);
    session.release().await;
}

#[tokio::test]
async fn test_chunks_hold_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (session, recorder) = recorder(dir.path(), Arc::new(SyntheticDriver::new()));

    recorder.start().await.unwrap();
    assert!(wait_until(|| recorder.status().chunks_started >= 2).await);
    recorder.shutdown().await;
    session.release().await;

    let sessions = session_dirs(dir.path());
    let first_chunk = sessions[0].join("chunk-00001.mjpeg");
    let bytes = std::fs::read(&first_chunk).unwrap();
    assert!(bytes.starts_with(&[0xff, 0xd8]), "chunk does not start with a JPEG frame");
}

#[tokio::test]
async fn test_stop_parity() {
    let dir = tempfile::tempdir().unwrap();
    let (session, recorder) = recorder(dir.path(), Arc::new(SyntheticDriver::new()));

    for _ in 0..3 {
        recorder.start().await.unwrap();
        assert!(recorder.is_recording().await);
        recorder.stop().await;
        recorder.stop().await;
        assert!(!recorder.is_recording().await);
        assert_eq!(recorder.status().state, RecordingState::Idle);
    }

    recorder.shutdown().await;
    assert!(!session.is_recording(SplitterPort::RECORD).await);
    session.release().await;
}

#[tokio::test]
async fn test_recovers_after_device_fault() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(SyntheticDriver::new());
    let (session, recorder) = recorder(dir.path(), driver.clone());

    recorder.start().await.unwrap();
    assert!(wait_until(|| recorder.status().chunks_started >= 1).await);
    assert!(driver.inject_fault("sensor unplugged"));

    let mut idle = false;
    for _ in 0..300 {
        if !recorder.is_recording().await {
            idle = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(idle, "recorder stayed active after the device failed");

    recorder.start().await.unwrap();
    assert!(wait_until(|| recorder.status().chunks_started >= 1 && driver.open_count() == 2).await);
    recorder.shutdown().await;
    session.release().await;
}
