use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level service configuration.
///
/// Every section falls back to its defaults, so an empty file (or no file at
/// all) yields a runnable local-camera setup with only the event log enabled
/// besides the local MQTT bus.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FallwatchConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub clip: ClipConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Identifier stamped on every outgoing event and status message
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Number of fall events retained for the history query
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Remote,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Remote => "remote",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(SourceKind::Local),
            "remote" => Ok(SourceKind::Remote),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,

    /// Seconds without a frame before the source counts as not receiving
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second; also the pipeline rate used for clip sizing
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

/// Connection settings for one MQTT broker
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttEndpointConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,

    /// Mutual TLS material; plain TCP when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TlsConfig {
    pub ca_path: String,
    #[serde(default)]
    pub client_cert_path: Option<String>,
    #[serde(default)]
    pub client_key_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_broker")]
    pub broker: MqttEndpointConfig,

    /// Topic carrying `{device_id, frame, frame_id, timestamp}` payloads
    #[serde(default = "default_frame_topic")]
    pub frame_topic: String,

    /// Topic carrying edge camera status messages
    #[serde(default = "default_camera_status_topic")]
    pub status_topic: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CooldownPolicy {
    /// Suppressed detections leave history and calibration untouched
    #[default]
    KeepHistory,
    /// Suppressed detections clear the velocity history
    ClearVelocityHistory,
    /// Suppressed detections restart calibration
    Recalibrate,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Use landmarks attached to incoming frames by the edge device
    Attached,
    /// No estimator; every frame counts as having no subject
    None,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: f64,

    #[serde(default = "default_calibration_frames")]
    pub calibration_frames: usize,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Minimum mean visibility of the core points for a frame to count
    #[serde(default = "default_min_visibility")]
    pub min_visibility: f64,

    /// Downward center velocity (frame heights per second) that counts as falling
    #[serde(default = "default_velocity_threshold")]
    pub velocity_threshold: f64,

    #[serde(default)]
    pub cooldown_policy: CooldownPolicy,

    #[serde(default = "default_estimator")]
    pub estimator: EstimatorKind,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClipContainer {
    /// Concatenated JPEG stream, no encoder required
    Mjpeg,
    /// H.264 in MP4 through GStreamer
    Mp4,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClipConfig {
    #[serde(default = "default_clip_directory")]
    pub directory: String,

    #[serde(default = "default_pre_roll_seconds")]
    pub pre_roll_seconds: u32,

    #[serde(default = "default_post_roll_seconds")]
    pub post_roll_seconds: u32,

    #[serde(default = "default_clip_container")]
    pub container: ClipContainer,

    /// IANA timezone used for the wall-clock part of clip names
    #[serde(default = "default_clip_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttSinkConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_sink_broker")]
    pub broker: MqttEndpointConfig,

    /// Event topic; status goes to `<topic>/status`
    #[serde(default = "default_event_topic")]
    pub topic: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Copy clips into a local directory tree
    Directory,
    /// PUT clips to an HTTP object store
    Http,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageSinkConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// Root directory for the directory backend
    #[serde(default = "default_storage_directory")]
    pub directory: String,

    /// Base URL for the HTTP backend
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Key prefix prepended to the clip file name
    #[serde(default = "default_storage_prefix")]
    pub prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventLogSinkConfig {
    #[serde(default = "default_event_log_enabled")]
    pub enabled: bool,

    #[serde(default = "default_event_log_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationSinkConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SinksConfig {
    #[serde(default = "default_local_bus")]
    pub local_bus: MqttSinkConfig,

    #[serde(default = "default_cloud_pubsub")]
    pub cloud_pubsub: MqttSinkConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageSinkConfig,

    #[serde(default = "default_event_log")]
    pub event_log: EventLogSinkConfig,

    #[serde(default = "default_notification")]
    pub notification: NotificationSinkConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Wait for the clip and upload it before fanning the event out
    Inline,
    /// Fan out immediately and upload once the clip lands
    Background,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_seconds: u64,

    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_seconds: u64,

    /// Upper bound on waiting for in-flight dispatches at shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,

    #[serde(default = "default_upload_mode")]
    pub upload_mode: UploadMode,

    /// Per-sink queue depth for fire-and-forget sinks
    #[serde(default = "default_worker_queue_capacity")]
    pub worker_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_enabled")]
    pub enabled: bool,

    #[serde(default = "default_dashboard_ip")]
    pub ip: String,

    #[serde(default = "default_dashboard_port")]
    pub port: u16,

    /// Frame rate of the MJPEG live view
    #[serde(default = "default_dashboard_stream_fps")]
    pub stream_fps: u32,
}

impl FallwatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("fallwatch.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Environment variables override the file: `FALLWATCH_<SECTION>__<KEY>`,
    /// e.g. `FALLWATCH_DETECTION__COOLDOWN_SECONDS=8`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("FALLWATCH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: FallwatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system.device_id.trim().is_empty() {
            return Err(ConfigError::Message(
                "System device_id must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.history_limit == 0 {
            return Err(ConfigError::Message(
                "History limit must be greater than 0".to_string(),
            ));
        }

        if self.source.liveness_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Source liveness_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        let threshold = self.detection.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Message(format!(
                "Detection confidence_threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if self.detection.cooldown_seconds < 0.0 || !self.detection.cooldown_seconds.is_finite() {
            return Err(ConfigError::Message(
                "Detection cooldown_seconds must be a non-negative number".to_string(),
            ));
        }

        if self.detection.history_capacity < 5 {
            return Err(ConfigError::Message(
                "Detection history_capacity must hold at least 5 samples".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.min_visibility) {
            return Err(ConfigError::Message(
                "Detection min_visibility must be within [0, 1]".to_string(),
            ));
        }

        if self.clip.pre_roll_seconds == 0 {
            return Err(ConfigError::Message(
                "Clip pre_roll_seconds must be greater than 0".to_string(),
            ));
        }

        if self.clip.post_roll_seconds == 0 {
            return Err(ConfigError::Message(
                "Clip post_roll_seconds must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.connect_timeout_seconds == 0
            || self.dispatch.publish_timeout_seconds == 0
            || self.dispatch.upload_timeout_seconds == 0
        {
            return Err(ConfigError::Message(
                "Dispatch timeouts must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.worker_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Dispatch worker_queue_capacity must be greater than 0".to_string(),
            ));
        }

        let storage = &self.sinks.storage;
        if storage.enabled && storage.backend == StorageBackend::Http && storage.endpoint.is_none()
        {
            return Err(ConfigError::Message(
                "Storage sink uses the http backend but has no endpoint".to_string(),
            ));
        }

        if self.sinks.notification.enabled && self.sinks.notification.webhook_url.is_none() {
            return Err(ConfigError::Message(
                "Notification sink is enabled but has no webhook_url".to_string(),
            ));
        }

        if self.dashboard.enabled && self.dashboard.stream_fps == 0 {
            return Err(ConfigError::Message(
                "Dashboard stream_fps must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.source.liveness_timeout_seconds)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000u64 / self.camera.fps.max(1) as u64)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.connect_timeout_seconds)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.publish_timeout_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.drain_timeout_seconds)
    }
}

impl MqttEndpointConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            event_bus_capacity: default_event_bus_capacity(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            liveness_timeout_seconds: default_liveness_timeout(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: default_camera_index(),
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            broker: default_remote_broker(),
            frame_topic: default_frame_topic(),
            status_topic: default_camera_status_topic(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            calibration_frames: default_calibration_frames(),
            history_capacity: default_history_capacity(),
            min_visibility: default_min_visibility(),
            velocity_threshold: default_velocity_threshold(),
            cooldown_policy: CooldownPolicy::default(),
            estimator: default_estimator(),
        }
    }
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            directory: default_clip_directory(),
            pre_roll_seconds: default_pre_roll_seconds(),
            post_roll_seconds: default_post_roll_seconds(),
            container: default_clip_container(),
            timezone: default_clip_timezone(),
        }
    }
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            local_bus: default_local_bus(),
            cloud_pubsub: default_cloud_pubsub(),
            storage: default_storage(),
            event_log: default_event_log(),
            notification: default_notification(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            publish_timeout_seconds: default_publish_timeout(),
            upload_timeout_seconds: default_upload_timeout(),
            drain_timeout_seconds: default_drain_timeout(),
            upload_mode: default_upload_mode(),
            worker_queue_capacity: default_worker_queue_capacity(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: default_dashboard_enabled(),
            ip: default_dashboard_ip(),
            port: default_dashboard_port(),
            stream_fps: default_dashboard_stream_fps(),
        }
    }
}

// Default value functions
fn default_device_id() -> String {
    "fall_detector".to_string()
}
fn default_event_bus_capacity() -> usize {
    100
}
fn default_history_limit() -> usize {
    50
}

fn default_source_kind() -> SourceKind {
    SourceKind::Local
}
fn default_liveness_timeout() -> u64 {
    5
}

fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}

fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "fallwatch".to_string()
}
fn default_keep_alive() -> u64 {
    30
}
fn default_remote_broker() -> MqttEndpointConfig {
    MqttEndpointConfig {
        client_id: "fallwatch_receiver".to_string(),
        ..default_sink_broker()
    }
}
fn default_sink_broker() -> MqttEndpointConfig {
    MqttEndpointConfig {
        host: default_broker_host(),
        port: default_broker_port(),
        client_id: default_client_id(),
        keep_alive_seconds: default_keep_alive(),
        tls: None,
    }
}
fn default_frame_topic() -> String {
    "novacare/camera/frames".to_string()
}
fn default_camera_status_topic() -> String {
    "novacare/camera/status".to_string()
}

fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_cooldown_seconds() -> f64 {
    5.0
}
fn default_calibration_frames() -> usize {
    30
}
fn default_history_capacity() -> usize {
    30
}
fn default_min_visibility() -> f64 {
    0.5
}
fn default_velocity_threshold() -> f64 {
    0.5
}
fn default_estimator() -> EstimatorKind {
    EstimatorKind::Attached
}

fn default_clip_directory() -> String {
    "./clips".to_string()
}
fn default_pre_roll_seconds() -> u32 {
    3
}
fn default_post_roll_seconds() -> u32 {
    2
}
fn default_clip_container() -> ClipContainer {
    ClipContainer::Mjpeg
}
fn default_clip_timezone() -> String {
    "UTC".to_string()
}

fn default_event_topic() -> String {
    "novacare/fall".to_string()
}
fn default_local_bus() -> MqttSinkConfig {
    MqttSinkConfig {
        enabled: true,
        broker: MqttEndpointConfig {
            client_id: "fallwatch_local".to_string(),
            ..default_sink_broker()
        },
        topic: default_event_topic(),
    }
}
fn default_cloud_pubsub() -> MqttSinkConfig {
    MqttSinkConfig {
        enabled: false,
        broker: MqttEndpointConfig {
            port: 8883,
            client_id: "fallwatch_cloud".to_string(),
            ..default_sink_broker()
        },
        topic: default_event_topic(),
    }
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::Directory
}
fn default_storage_directory() -> String {
    "./uploads".to_string()
}
fn default_storage_prefix() -> String {
    "clips/".to_string()
}
fn default_storage() -> StorageSinkConfig {
    StorageSinkConfig {
        enabled: false,
        backend: default_storage_backend(),
        directory: default_storage_directory(),
        endpoint: None,
        bearer_token: None,
        prefix: default_storage_prefix(),
    }
}
fn default_event_log_enabled() -> bool {
    true
}
fn default_event_log_path() -> String {
    "./fall_events.jsonl".to_string()
}
fn default_event_log() -> EventLogSinkConfig {
    EventLogSinkConfig {
        enabled: default_event_log_enabled(),
        path: default_event_log_path(),
    }
}
fn default_notification() -> NotificationSinkConfig {
    NotificationSinkConfig {
        enabled: false,
        webhook_url: None,
    }
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_publish_timeout() -> u64 {
    5
}
fn default_upload_timeout() -> u64 {
    30
}
fn default_drain_timeout() -> u64 {
    15
}
fn default_upload_mode() -> UploadMode {
    UploadMode::Inline
}
fn default_worker_queue_capacity() -> usize {
    32
}

fn default_dashboard_enabled() -> bool {
    true
}
fn default_dashboard_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_dashboard_port() -> u16 {
    5000
}
fn default_dashboard_stream_fps() -> u32 {
    10
}
