// HTTP API tests against the synthetic camera

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use camerapi::config::{ServerConfig, SharedSecret};
use camerapi::streaming::{
    CameraService, CaptureSettings, ChunkAllocator, DriverKind, RecorderSettings, SyntheticDriver,
};
use camerapi::WebServer;
use futures::StreamExt;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PASSWORD: &str = "let-me-in";

struct Harness {
    _dir: tempfile::TempDir,
    recordings: std::path::PathBuf,
    service: CameraService,
    router: Router,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let recordings = dir.path().join("recordings");

    let mut config = ServerConfig::default();
    config.device.driver = DriverKind::Synthetic;
    config.recordings_path = recordings.clone();

    let service = CameraService::new(
        Arc::new(SyntheticDriver::new()),
        CaptureSettings {
            framerate: 50,
            warmup: Duration::ZERO,
            ..CaptureSettings::default()
        },
        ChunkAllocator::new(&recordings, "mjpeg"),
        RecorderSettings {
            chunk_duration: Duration::from_millis(300),
            slice: Duration::from_millis(20),
            ..RecorderSettings::default()
        },
    );
    let server = WebServer::new(service.clone(), SharedSecret::new(PASSWORD), &config);
    let router = server.router();

    Harness {
        _dir: dir,
        recordings,
        service,
        router,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn post_json(router: &Router, uri: &str, body: &str) -> Value {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

async fn get_json(router: &Router, uri: &str) -> Value {
    let (status, body) = send(router, Request::get(uri).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

async fn wait_for_chunk(recordings: &Path) -> bool {
    for _ in 0..200 {
        if let Ok(sessions) = std::fs::read_dir(recordings) {
            for session in sessions.flatten() {
                if session.path().join("chunk-00001.mjpeg").is_file() {
                    return true;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_wrong_password_does_not_record() {
    let h = harness();

    let reply = post_json(&h.router, "/camerapi/start_recording", r#"{"password": "nope"}"#).await;
    assert_eq!(reply["success"], false);

    let reply = get_json(&h.router, "/camerapi/is_recording").await;
    assert_eq!(reply["success"], false);
    assert!(!h.recordings.exists());
}

#[tokio::test]
async fn test_missing_or_malformed_body_counts_as_empty_password() {
    let h = harness();

    let reply = post_json(&h.router, "/camerapi/start_recording", "").await;
    assert_eq!(reply["success"], false);
    let reply = post_json(&h.router, "/camerapi/start_recording", "{not json").await;
    assert_eq!(reply["success"], false);
    let reply = post_json(&h.router, "/camerapi/stop_recording", "{}").await;
    assert_eq!(reply["success"], false);
}

#[tokio::test]
async fn test_record_start_and_stop() {
    let h = harness();
    let body = format!(r#"{{"password": " {} "}}"#, PASSWORD);

    let reply = post_json(&h.router, "/camerapi/start_recording", &body).await;
    assert_eq!(reply["success"], true);
    assert_eq!(get_json(&h.router, "/camerapi/is_recording").await["success"], true);
    assert!(wait_for_chunk(&h.recordings).await, "no chunk file appeared");

    let status = get_json(&h.router, "/camerapi/recording_status").await;
    assert_eq!(status["state"], "active");
    assert!(status["chunks_started"].as_u64().unwrap() >= 1);
    assert_eq!(status["chunks_started"], status["chunk_index"]);

    let reply = post_json(&h.router, "/camerapi/stop_recording", &body).await;
    assert_eq!(reply["success"], true);
    assert_eq!(get_json(&h.router, "/camerapi/is_recording").await["success"], false);

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_unwritable_recordings_path_reports_failure() {
    let h = harness();
    std::fs::write(&h.recordings, b"not a directory").unwrap();
    let body = format!(r#"{{"password": "{}"}}"#, PASSWORD);

    let reply = post_json(&h.router, "/camerapi/start_recording", &body).await;
    assert_eq!(reply["success"], false);
    assert_eq!(get_json(&h.router, "/camerapi/is_recording").await["success"], false);

    let status = get_json(&h.router, "/camerapi/recording_status").await;
    assert_eq!(status["state"], "idle");
    assert!(h.recordings.is_file());
}

#[tokio::test]
async fn test_stop_while_idle_succeeds() {
    let h = harness();
    let body = format!(r#"{{"password": "{}"}}"#, PASSWORD);

    let reply = post_json(&h.router, "/camerapi/stop_recording", &body).await;
    assert_eq!(reply["success"], true);
    let reply = post_json(&h.router, "/camerapi/stop_recording", &body).await;
    assert_eq!(reply["success"], true);
    assert_eq!(get_json(&h.router, "/camerapi/is_recording").await["success"], false);
}

#[tokio::test]
async fn test_root_and_base_redirect_to_stream() {
    let h = harness();

    for uri in ["/", "/camerapi/", "/camerapi"] {
        let response = h
            .router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_redirection(), "{} did not redirect", uri);
        assert_eq!(response.headers()[header::LOCATION], "/camerapi/stream/");
    }
}

#[tokio::test]
async fn test_streaming_placeholders_are_not_found() {
    let h = harness();

    let (status, body) = send(
        &h.router,
        Request::get("/camerapi/start_streaming").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"Start streaming not yet implemented");

    let (status, body) = send(
        &h.router,
        Request::get("/camerapi/stop_streaming").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"Stop streaming not yet implemented");
}

async fn read_parts(router: Router, wanted: usize) -> Vec<u8> {
    let response = router
        .oneshot(Request::get("/camerapi/stream/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let mut body = response.into_body().into_data_stream();
    let mut received = Vec::new();
    while count_parts(&received) < wanted {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("stream stalled")
            .expect("stream ended early")
            .unwrap();
        received.extend_from_slice(&chunk);
    }
    received
}

fn count_parts(body: &[u8]) -> usize {
    body.windows(b"--frame\r\n".len())
        .filter(|w| *w == b"--frame\r\n")
        .count()
}

#[tokio::test]
async fn test_two_viewers_receive_well_formed_parts() {
    let h = harness();

    let (a, b) = tokio::join!(read_parts(h.router.clone(), 3), read_parts(h.router.clone(), 3));
    for body in [a, b] {
        assert!(body.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8"));
        assert!(count_parts(&body) >= 3);
    }
    assert_eq!(h.service.session().open_count(), 1);

    h.service.shutdown().await;
}
