use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{
    AlertMessage, ThrottlePolicy, DEFAULT_ALERT_RECIPIENT, DEFAULT_ALERT_SENDER,
    DEFAULT_ALERT_SUBJECT, DEFAULT_COOLDOWN, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DISTANCE_M,
};
use crate::detect::{
    Calibration, MotionParams, DEFAULT_BLUR_KERNEL, DEFAULT_DIFF_THRESHOLD,
    DEFAULT_DILATE_ITERATIONS, DEFAULT_FOCAL_LENGTH_PX, DEFAULT_KNOWN_WIDTH_M, DEFAULT_MIN_AREA,
};
use crate::frame::{DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};

const DEFAULT_CAMERA_URL: &str = "stub://front_camera";
const DEFAULT_WARMUP_MS: u64 = 2_000;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_DB_PATH: &str = "sentinel.db";
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_MQTT_TOPIC: &str = "sentinel/alerts";
const DEFAULT_MQTT_CLIENT_ID: &str = "motion-sentinel";
const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";

// ----------------------------------------------------------------------------
// Pipeline configuration
// ----------------------------------------------------------------------------

/// Everything one pipeline instance needs, with defaults matching the
/// documented constants.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Pause before the first read, letting the camera settle.
    pub warmup: Duration,
    pub width: u32,
    pub height: u32,
    /// Processing rate cap. Zero disables pacing.
    pub target_fps: u32,
    pub calibration: Calibration,
    pub motion: MotionParams,
    pub throttle: ThrottlePolicy,
    pub message: AlertMessage,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(DEFAULT_WARMUP_MS),
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
            calibration: Calibration::default(),
            motion: MotionParams::default(),
            throttle: ThrottlePolicy::default(),
            message: AlertMessage::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl PipelineConfig {
    /// Minimum spacing between two processed frames.
    pub fn frame_interval(&self) -> Duration {
        if self.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / self.target_fps as f64)
        }
    }
}

// ----------------------------------------------------------------------------
// Daemon configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    camera: Option<CameraConfigFile>,
    calibration: Option<CalibrationConfigFile>,
    motion: Option<MotionConfigFile>,
    alerts: Option<AlertsConfigFile>,
    storage: Option<StorageConfigFile>,
    notify: Option<NotifyConfigFile>,
    server: Option<ServerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    warmup_ms: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    known_width_m: Option<f64>,
    focal_length_px: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    blur_kernel: Option<u32>,
    diff_threshold: Option<u8>,
    dilate_iterations: Option<u8>,
    min_area: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    max_distance_m: Option<f64>,
    cooldown_secs: Option<u64>,
    subject: Option<String>,
    sender: Option<String>,
    recipient: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    db_path: Option<String>,
    media_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    mqtt_broker_addr: Option<String>,
    mqtt_topic: Option<String>,
    mqtt_client_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub camera_url: String,
    pub pipeline: PipelineConfig,
    pub storage: StorageSettings,
    pub notify: NotifySettings,
    pub server_addr: String,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub db_path: String,
    /// Root under which alert snapshots are written.
    pub media_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    /// `host:port` of the MQTT broker. `None` means log-only notifications.
    pub mqtt_broker_addr: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
}

impl SentinelConfig {
    /// Load from the file named by `SENTINEL_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SentinelConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let calibration = file.calibration.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let notify = file.notify.unwrap_or_default();
        let server = file.server.unwrap_or_default();

        let pipeline = PipelineConfig {
            warmup: Duration::from_millis(camera.warmup_ms.unwrap_or(DEFAULT_WARMUP_MS)),
            width: camera.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            calibration: Calibration {
                known_width_m: calibration.known_width_m.unwrap_or(DEFAULT_KNOWN_WIDTH_M),
                focal_length_px: calibration
                    .focal_length_px
                    .unwrap_or(DEFAULT_FOCAL_LENGTH_PX),
            },
            motion: MotionParams {
                blur_kernel: motion.blur_kernel.unwrap_or(DEFAULT_BLUR_KERNEL),
                diff_threshold: motion.diff_threshold.unwrap_or(DEFAULT_DIFF_THRESHOLD),
                dilate_iterations: motion
                    .dilate_iterations
                    .unwrap_or(DEFAULT_DILATE_ITERATIONS),
                min_area: motion.min_area.unwrap_or(DEFAULT_MIN_AREA),
            },
            throttle: ThrottlePolicy {
                max_distance_m: alerts.max_distance_m.unwrap_or(DEFAULT_MAX_DISTANCE_M),
                cooldown: alerts
                    .cooldown_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_COOLDOWN),
            },
            message: AlertMessage {
                subject: alerts
                    .subject
                    .unwrap_or_else(|| DEFAULT_ALERT_SUBJECT.to_string()),
                sender: alerts
                    .sender
                    .unwrap_or_else(|| DEFAULT_ALERT_SENDER.to_string()),
                recipient: alerts
                    .recipient
                    .unwrap_or_else(|| DEFAULT_ALERT_RECIPIENT.to_string()),
            },
            jpeg_quality: alerts.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        Self {
            camera_url: camera
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            pipeline,
            storage: StorageSettings {
                db_path: storage
                    .db_path
                    .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
                media_root: storage
                    .media_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT)),
            },
            notify: NotifySettings {
                mqtt_broker_addr: notify.mqtt_broker_addr.filter(|addr| !addr.trim().is_empty()),
                mqtt_topic: notify
                    .mqtt_topic
                    .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                mqtt_client_id: notify
                    .mqtt_client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            },
            server_addr: server
                .addr
                .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("SENTINEL_CAMERA_URL") {
            self.camera_url = url;
        }
        if let Some(addr) = non_empty_env("SENTINEL_SERVER_ADDR") {
            self.server_addr = addr;
        }
        if let Some(path) = non_empty_env("SENTINEL_DB_PATH") {
            self.storage.db_path = path;
        }
        if let Some(root) = non_empty_env("SENTINEL_MEDIA_ROOT") {
            self.storage.media_root = PathBuf::from(root);
        }
        if let Some(recipient) = non_empty_env("SENTINEL_ALERT_RECIPIENT") {
            self.pipeline.message.recipient = recipient;
        }
        if let Some(broker) = non_empty_env("SENTINEL_MQTT_BROKER") {
            self.notify.mqtt_broker_addr = Some(broker);
        }
        if let Some(cooldown) = non_empty_env("SENTINEL_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("SENTINEL_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.pipeline.throttle.cooldown = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.motion.blur_kernel == 0 || p.motion.blur_kernel % 2 == 0 {
            return Err(anyhow!(
                "motion.blur_kernel must be a positive odd number, got {}",
                p.motion.blur_kernel
            ));
        }
        if !(p.calibration.known_width_m > 0.0) || !(p.calibration.focal_length_px > 0.0) {
            return Err(anyhow!("calibration constants must be positive"));
        }
        if !(p.throttle.max_distance_m >= 0.0) {
            return Err(anyhow!("alerts.max_distance_m must be non-negative"));
        }
        if p.throttle.cooldown.is_zero() {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        if p.width == 0 || p.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if !(1..=100).contains(&p.jpeg_quality) {
            return Err(anyhow!("alerts.jpeg_quality must be within 1..=100"));
        }
        if self.camera_url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
