// Configuration management module
//
// Precedence (highest to lowest):
// 1. Command-line arguments
// 2. Environment variables
// 3. Configuration file
// 4. Default values

pub mod args;
pub mod error;
pub mod secret;

pub use args::{build_cli, overrides_from_matches};
pub use error::{ConfigError, ConfigResult};
pub use secret::SharedSecret;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::streaming::{CaptureSettings, DriverKind, RecorderSettings, Resolution, SplitterPort};

/// Environment variable naming the recordings directory
pub const ENV_RECORDINGS_PATH: &str = "RECORDINGS_PATH";
/// Environment variable naming the password file
pub const ENV_PASSWORD_FILE: &str = "CAMERAPI_PASSWORD_FILE";
/// Environment variable overriding the listen address
pub const ENV_BIND: &str = "CAMERAPI_BIND";

/// Validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.valid = false;
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn add_suggestion(&mut self, suggestion: impl Into<String>) {
        self.suggestions.push(suggestion.into());
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera device section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub driver: DriverKind,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub warmup_ms: u64,
    pub frame_timeout_ms: u64,
    /// Overlay the capture time on live frames
    pub annotate: bool,
    pub live_port: u8,
    pub record_port: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let capture = CaptureSettings::default();
        Self {
            driver: DriverKind::V4l2,
            path: PathBuf::from("/dev/video0"),
            width: capture.resolution.width,
            height: capture.resolution.height,
            framerate: capture.framerate,
            warmup_ms: capture.warmup.as_millis() as u64,
            frame_timeout_ms: capture.frame_timeout.as_millis() as u64,
            annotate: capture.annotate,
            live_port: capture.live_port.0,
            record_port: capture.record_port.0,
        }
    }
}

impl DeviceConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }
}

/// Chunked recording section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Length of one chunk file in seconds
    pub chunk_seconds: u64,
    /// Stop-check interval in milliseconds
    pub slice_ms: u64,
    /// File extension of chunk files
    pub extension: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let recorder = RecorderSettings::default();
        Self {
            chunk_seconds: recorder.chunk_duration.as_secs(),
            slice_ms: recorder.slice.as_millis() as u64,
            extension: "mjpeg".to_string(),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Prefix of every API route, with leading and trailing slash
    pub base_path: String,
    pub recordings_path: PathBuf,
    pub password_file: PathBuf,
    pub device: DeviceConfig,
    pub recording: RecordingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            base_path: "/camerapi/".to_string(),
            recordings_path: PathBuf::from("recordings"),
            password_file: PathBuf::from(".password"),
            device: DeviceConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

/// Values given on the command line; `None` leaves the lower layer in place
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub bind: Option<SocketAddr>,
    pub recordings_path: Option<PathBuf>,
    pub password_file: Option<PathBuf>,
    pub driver: Option<DriverKind>,
    pub device_path: Option<PathBuf>,
    pub annotate: Option<bool>,
}

impl ServerConfig {
    /// Parse configuration from TOML string
    pub fn parse_toml(content: &str) -> ConfigResult<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.base_path = normalize_base_path(&config.base_path);
        Ok(config)
    }

    /// Load configuration from file
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse_toml(&content)
    }

    /// Defaults, then the file, then the environment, then the command line
    pub async fn resolve(overrides: &ConfigOverrides) -> ConfigResult<Self> {
        let mut config = match &overrides.config_file {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::load(path).await?
            }
            None => Self::default(),
        };

        for change in config.apply_env()? {
            log::debug!("Environment override: {}", change);
        }
        for change in config.apply_overrides(overrides) {
            log::debug!("Command-line override: {}", change);
        }

        let validation = config.validate();
        for warning in &validation.warnings {
            log::warn!("{}", warning);
        }
        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.errors.join("\n")));
        }
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> ConfigResult<Vec<String>> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ConfigResult<Vec<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(path) = lookup(ENV_RECORDINGS_PATH).filter(|v| !v.trim().is_empty()) {
            self.recordings_path = PathBuf::from(path.trim());
            applied.push(format!("recordings_path = {}", self.recordings_path.display()));
        }
        if let Some(path) = lookup(ENV_PASSWORD_FILE).filter(|v| !v.trim().is_empty()) {
            self.password_file = PathBuf::from(path.trim());
            applied.push(format!("password_file = {}", self.password_file.display()));
        }
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.trim().is_empty()) {
            self.bind = bind
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid_value(ENV_BIND, format!("{}", e)))?;
            applied.push(format!("bind = {}", self.bind));
        }

        Ok(applied)
    }

    /// Apply command-line overrides, returning what changed
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Vec<String> {
        let mut applied = Vec::new();

        if let Some(bind) = overrides.bind {
            self.bind = bind;
            applied.push(format!("bind = {}", bind));
        }
        if let Some(ref path) = overrides.recordings_path {
            self.recordings_path = path.clone();
            applied.push(format!("recordings_path = {}", path.display()));
        }
        if let Some(ref path) = overrides.password_file {
            self.password_file = path.clone();
            applied.push(format!("password_file = {}", path.display()));
        }
        if let Some(driver) = overrides.driver {
            self.device.driver = driver;
            applied.push(format!("device.driver = {}", driver));
        }
        if let Some(ref path) = overrides.device_path {
            self.device.path = path.clone();
            applied.push(format!("device.path = {}", path.display()));
        }
        if let Some(annotate) = overrides.annotate {
            self.device.annotate = annotate;
            applied.push(format!("device.annotate = {}", annotate));
        }

        applied
    }

    /// Route serving the live stream
    pub fn stream_route(&self) -> String {
        format!("{}stream/", self.base_path)
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            resolution: self.device.resolution(),
            framerate: self.device.framerate,
            warmup: Duration::from_millis(self.device.warmup_ms),
            frame_timeout: Duration::from_millis(self.device.frame_timeout_ms),
            annotate: self.device.annotate,
            live_port: SplitterPort(self.device.live_port),
            record_port: SplitterPort(self.device.record_port),
        }
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            chunk_duration: Duration::from_secs(self.recording.chunk_seconds),
            slice: Duration::from_millis(self.recording.slice_ms),
            port: SplitterPort(self.device.record_port),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            result.add_error(format!(
                "base_path '{}' must start and end with '/'",
                self.base_path
            ));
        }
        if self.base_path == "/" {
            result.add_error("base_path must not be the site root");
            result.add_suggestion("Use the default base_path \"/camerapi/\"");
        }

        if self.device.width == 0 || self.device.height == 0 {
            result.add_error(format!(
                "Invalid resolution {}",
                self.device.resolution()
            ));
        }
        if self.device.framerate == 0 || self.device.framerate > 120 {
            result.add_error(format!(
                "Invalid framerate {}. Valid range: 1-120",
                self.device.framerate
            ));
        }
        if self.device.frame_timeout_ms == 0 {
            result.add_error("device.frame_timeout_ms must be greater than zero");
        }
        if self.device.live_port == self.device.record_port {
            result.add_error(format!(
                "Live and record ports must differ (both are {})",
                self.device.live_port
            ));
        }
        if self.device.driver == DriverKind::Synthetic {
            result.add_warning("Using the synthetic camera driver; no real camera will be opened");
        }

        if self.recording.chunk_seconds == 0 {
            result.add_error("recording.chunk_seconds must be greater than zero");
        }
        if self.recording.slice_ms == 0 {
            result.add_error("recording.slice_ms must be greater than zero");
        } else if self.recording.slice_ms > self.recording.chunk_seconds.saturating_mul(1000) {
            result.add_warning(format!(
                "recording.slice_ms ({}) is longer than a chunk; chunks will last one slice",
                self.recording.slice_ms
            ));
        }
        if self.recording.extension.trim_start_matches('.').is_empty() {
            result.add_error("recording.extension must not be empty");
        }

        if !self.recordings_path.exists() {
            result.add_warning(format!(
                "Recordings path does not exist and will be created: {}",
                self.recordings_path.display()
            ));
        }
        if !self.password_file.exists() {
            result.add_error(format!(
                "Password file not found: {}",
                self.password_file.display()
            ));
            result.add_suggestion(format!(
                "Create it or set {} to its location",
                ENV_PASSWORD_FILE
            ));
        }

        result
    }

    /// Generate default configuration file with comments
    pub fn generate_sample() -> String {
        r#"# CameraPi server configuration

# Listen address
bind = "0.0.0.0:5000"

# Prefix of every route
base_path = "/camerapi/"

# Root of chunk recordings (RECORDINGS_PATH overrides)
recordings_path = "recordings"

# File holding the recording password (CAMERAPI_PASSWORD_FILE overrides)
password_file = ".password"

[device]
# Options: v4l2, synthetic
driver = "v4l2"
path = "/dev/video0"
width = 1200
height = 900
framerate = 30
warmup_ms = 2000
frame_timeout_ms = 5000
annotate = false
live_port = 0
record_port = 2

[recording]
chunk_seconds = 300
slice_ms = 500
extension = "mjpeg"
"#
        .to_string()
    }
}

fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}
