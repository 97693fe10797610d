use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FallwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),

    #[error("Clip error: {0}")]
    Clip(#[from] ClipError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl FallwatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures of the shared MQTT connection layer
#[derive(Error, Debug)]
pub enum MqttError {
    #[error("Failed to read TLS material {path}: {source}")]
    Tls {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {endpoint} failed: {details}")]
    Connect { endpoint: String, details: String },

    #[error("Connection to {endpoint} timed out after {seconds}s")]
    ConnectTimeout { endpoint: String, seconds: u64 },

    #[error("Not connected to {endpoint}")]
    NotConnected { endpoint: String },

    #[error("Publish to {topic} timed out after {millis}ms")]
    PublishTimeout { topic: String, millis: u64 },

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source configuration error: {details}")]
    Configuration { details: String },

    #[error("Capture stream error: {details}")]
    CaptureStream { details: String },

    #[error("Malformed frame payload: {details}")]
    Payload { details: String },

    #[error(transparent)]
    Mqtt(#[from] MqttError),
}

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("Clip directory {path} is not usable: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write clip {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Clip encoding failed: {details}")]
    Encoding { details: String },

    #[error("Recording for {path} holds no frames")]
    Empty { path: PathBuf },

    #[error("Clip encoder is no longer running")]
    EncoderClosed,

    #[error("Clip {path} was not finalized within {seconds}s")]
    Timeout { path: PathBuf, seconds: u64 },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("{sink}: delivery timed out after {millis}ms")]
    Timeout { sink: String, millis: u64 },

    #[error("{sink}: delivery failed: {details}")]
    Delivery { sink: String, details: String },

    #[error("{sink}: HTTP request failed: {source}")]
    Http {
        sink: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{sink}: IO error: {source}")]
    Io {
        sink: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{sink}: {source}")]
    Mqtt {
        sink: String,
        #[source]
        source: MqttError,
    },

    #[error("{sink}: not configured: {details}")]
    Configuration { sink: String, details: String },
}

impl SinkError {
    pub fn delivery<S: Into<String>, D: Into<String>>(sink: S, details: D) -> Self {
        Self::Delivery {
            sink: sink.into(),
            details: details.into(),
        }
    }

    pub fn configuration<S: Into<String>, D: Into<String>>(sink: S, details: D) -> Self {
        Self::Configuration {
            sink: sink.into(),
            details: details.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, FallwatchError>;
