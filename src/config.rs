use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CameraConfig;
use crate::encode::{DEFAULT_CAPTURE_SIZE, DEFAULT_JPEG_QUALITY};
use crate::frame::FrameSize;
use crate::hud::HudStyle;
use crate::mode::{Mode, DEFAULT_CONFIDENCE};
use crate::supervisor::ReconnectPolicy;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_TOKEN_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 125;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RENDER_INTERVAL_MS: u64 = 16;
const DEFAULT_POLL_INTERVAL_MS: u64 = 4;

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
    capture: Option<CaptureConfigFile>,
    hud: Option<HudConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    url: Option<String>,
    token_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    interval_ms: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
    request_timeout_ms: Option<u64>,
    mode: Option<Mode>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct HudConfigFile {
    render_interval_ms: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    font_path: Option<PathBuf>,
    scanline_period_ms: Option<u64>,
    show_stats: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ReconnectConfigFile {
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: ServerSettings,
    pub camera: CameraConfig,
    pub capture: CaptureSettings,
    pub hud: HudSettings,
    pub reconnect: ReconnectPolicy,
    /// Upper bound on one event-loop sleep.
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP base of the inference service; the socket URL is derived from it.
    pub url: String,
    pub token_timeout: Duration,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub interval: Duration,
    /// Size frames are resized to before encoding.
    pub size: FrameSize,
    pub jpeg_quality: u8,
    /// Deadline for one outstanding frame request.
    pub request_timeout: Duration,
    pub mode: Mode,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct HudSettings {
    pub render_interval: Duration,
    /// Overlay container size.
    pub size: FrameSize,
    pub font_path: Option<PathBuf>,
    pub style: HudStyle,
}

impl Default for ClientConfig {
    fn default() -> Self {
        // An empty file resolves to the built-in defaults and cannot fail.
        Self::from_file(ClientConfigFile::default())
    }
}

impl ClientConfig {
    /// Defaults, then the file named by `VISION_CONFIG`, then `VISION_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like `load`, but reads `path` instead of consulting `VISION_CONFIG`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClientConfigFile) -> Self {
        let server = file.server.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let hud = file.hud.unwrap_or_default();
        let reconnect = file.reconnect.unwrap_or_default();
        let policy = ReconnectPolicy::default();
        let style = HudStyle::default();

        Self {
            server: ServerSettings {
                url: server
                    .url
                    .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
                token_timeout: millis(server.token_timeout_ms, DEFAULT_TOKEN_TIMEOUT_MS),
                connect_timeout: millis(server.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS),
            },
            camera: CameraConfig {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                size: FrameSize::new(
                    camera.width.unwrap_or(DEFAULT_CAPTURE_SIZE.width),
                    camera.height.unwrap_or(DEFAULT_CAPTURE_SIZE.height),
                ),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            },
            capture: CaptureSettings {
                interval: millis(capture.interval_ms, DEFAULT_CAPTURE_INTERVAL_MS),
                size: FrameSize::new(
                    capture.width.unwrap_or(DEFAULT_CAPTURE_SIZE.width),
                    capture.height.unwrap_or(DEFAULT_CAPTURE_SIZE.height),
                ),
                jpeg_quality: capture.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                request_timeout: millis(capture.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS),
                mode: capture.mode.unwrap_or_default(),
                confidence: capture.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            },
            hud: HudSettings {
                render_interval: millis(hud.render_interval_ms, DEFAULT_RENDER_INTERVAL_MS),
                size: FrameSize::new(
                    hud.width.unwrap_or(DEFAULT_CAPTURE_SIZE.width),
                    hud.height.unwrap_or(DEFAULT_CAPTURE_SIZE.height),
                ),
                font_path: hud.font_path,
                style: HudStyle {
                    scanline_period: hud
                        .scanline_period_ms
                        .map(Duration::from_millis)
                        .unwrap_or(style.scanline_period),
                    show_stats: hud.show_stats.unwrap_or(style.show_stats),
                    ..style
                },
            },
            reconnect: ReconnectPolicy {
                initial_backoff: reconnect
                    .initial_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(policy.initial_backoff),
                max_backoff: reconnect
                    .max_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(policy.max_backoff),
                multiplier: reconnect.multiplier.unwrap_or(policy.multiplier),
                jitter: reconnect.jitter.unwrap_or(policy.jitter),
                max_attempts: reconnect.max_attempts.unwrap_or(policy.max_attempts),
            },
            poll_interval: millis(file.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("VISION_SERVER_URL") {
            if !url.trim().is_empty() {
                self.server.url = url;
            }
        }
        if let Ok(device) = std::env::var("VISION_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(mode) = std::env::var("VISION_MODE") {
            if !mode.trim().is_empty() {
                self.capture.mode = mode
                    .trim()
                    .parse()
                    .map_err(|e| anyhow!("VISION_MODE: {}", e))?;
            }
        }
        if let Ok(confidence) = std::env::var("VISION_CONFIDENCE") {
            self.capture.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("VISION_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(interval) = std::env::var("VISION_CAPTURE_INTERVAL_MS") {
            let ms: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("VISION_CAPTURE_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.capture.interval = Duration::from_millis(ms);
        }
        if let Ok(timeout) = std::env::var("VISION_REQUEST_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("VISION_REQUEST_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.capture.request_timeout = Duration::from_millis(ms);
        }
        if let Ok(path) = std::env::var("VISION_FONT_PATH") {
            if !path.trim().is_empty() {
                self.hud.font_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        crate::channel::ServerEndpoint::parse(&self.server.url)?;
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.size.is_empty() || self.capture.size.is_empty() || self.hud.size.is_empty()
        {
            return Err(anyhow!("camera, capture and hud sizes must be non-zero"));
        }
        if self.capture.interval.is_zero() {
            return Err(anyhow!("capture interval must be greater than zero"));
        }
        if self.hud.render_interval.is_zero() {
            return Err(anyhow!("render interval must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.capture.request_timeout.is_zero() {
            return Err(anyhow!("request timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if !self.capture.confidence.is_finite() || !(0.0..=1.0).contains(&self.capture.confidence)
        {
            return Err(anyhow!("confidence threshold must be within [0, 1]"));
        }
        if self.hud.style.scanline_period.is_zero() {
            return Err(anyhow!("scanline period must be greater than zero"));
        }
        let r = &self.reconnect;
        if r.initial_backoff.is_zero() || r.max_backoff < r.initial_backoff {
            return Err(anyhow!(
                "reconnect backoff must satisfy 0 < initial_backoff <= max_backoff"
            ));
        }
        if !r.multiplier.is_finite() || r.multiplier < 1.0 {
            return Err(anyhow!("reconnect multiplier must be >= 1.0"));
        }
        if !r.jitter.is_finite() || !(0.0..=1.0).contains(&r.jitter) {
            return Err(anyhow!("reconnect jitter must be within [0, 1]"));
        }
        Ok(())
    }
}

fn millis(value: Option<u64>, default: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default))
}

/// JSON by default; TOML when the file name ends in `.toml`.
fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
