//! API Request Handlers
//!
//! Framework-independent logic behind each endpoint. The axum layer in
//! `server` only extracts inputs and shapes responses.

use serde_json::{json, Value};

use crate::config::SharedSecret;
use crate::streaming::CameraService;

/// Pull the submitted password out of a request body
///
/// Bodies that are not a JSON object, or lack the field, count as an empty
/// password. String values are used as-is; other JSON values compare by their
/// JSON text. Surrounding whitespace is ignored.
pub fn extract_password(body: &[u8]) -> String {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => return String::new(),
    };
    match value.get("password") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
        None => String::new(),
    }
}

/// API request handlers
pub struct ApiHandlers {
    service: CameraService,
    secret: SharedSecret,
}

impl ApiHandlers {
    pub fn new(service: CameraService, secret: SharedSecret) -> Self {
        Self { service, secret }
    }

    pub fn service(&self) -> &CameraService {
        &self.service
    }

    fn authorize(&self, body: &[u8]) -> bool {
        let ok = self.secret.matches(&extract_password(body));
        if ok {
            log::info!("Password correct");
        } else {
            log::info!("Password incorrect");
        }
        ok
    }

    /// Handle a start recording request
    pub async fn handle_start_recording(&self, body: &[u8]) -> Value {
        log::info!("Start recording requested");
        if !self.authorize(body) {
            return json!({ "success": false });
        }
        match self.service.recorder().start().await {
            Ok(()) => json!({ "success": true }),
            Err(e) => {
                log::error!("Cannot start recording: {}", e);
                json!({ "success": false })
            }
        }
    }

    /// Handle a stop recording request
    pub async fn handle_stop_recording(&self, body: &[u8]) -> Value {
        log::info!("Stop recording requested");
        if !self.authorize(body) {
            return json!({ "success": false });
        }
        self.service.recorder().stop().await;
        json!({ "success": true })
    }

    /// Handle a recording state query
    pub async fn handle_is_recording(&self) -> Value {
        log::info!("Is recording requested");
        json!({ "success": self.service.recorder().is_recording().await })
    }

    /// Handle a detailed recorder status query
    pub async fn handle_recording_status(&self) -> Value {
        // Reconcile first so the snapshot never reports a dead recording as active.
        self.service.recorder().is_recording().await;
        serde_json::to_value(self.service.recorder().status())
            .unwrap_or_else(|e| json!({ "error": e.to_string() }))
    }
}
