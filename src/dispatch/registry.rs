use super::sink::{ClipStore, EventSink, SinkKind};
use super::sinks::{build_clip_store, JsonlEventLog, MqttSink, WebhookNotifier};
use crate::config::{FallwatchConfig, MqttSinkConfig};
use crate::error::SinkError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Startup verdict for one sink, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SinkState {
    Enabled,
    Disabled,
    /// Configured on but could not be set up; never retried
    Unavailable(String),
}

impl SinkState {
    pub fn is_enabled(&self) -> bool {
        matches!(self, SinkState::Enabled)
    }

    pub fn label(&self) -> String {
        match self {
            SinkState::Enabled => "enabled".to_string(),
            SinkState::Disabled => "disabled".to_string(),
            SinkState::Unavailable(reason) => format!("unavailable: {}", reason),
        }
    }
}

/// Sinks resolved once at startup and consulted by kind afterwards
#[derive(Default)]
pub struct SinkRegistry {
    states: BTreeMap<SinkKind, SinkState>,
    sinks: Vec<Arc<dyn EventSink>>,
    clip_store: Option<Arc<dyn ClipStore>>,
}

impl SinkRegistry {
    /// Registry with every sink disabled
    pub fn new() -> Self {
        Self {
            states: SinkKind::ALL
                .iter()
                .map(|kind| (*kind, SinkState::Disabled))
                .collect(),
            sinks: Vec::new(),
            clip_store: None,
        }
    }

    /// Set up every configured sink; failures only mark that sink unavailable
    #[instrument(name = "sink_registry_probe", skip(config))]
    pub async fn probe(config: &FallwatchConfig) -> Self {
        let mut registry = Self::new();
        let sinks = &config.sinks;
        let device_id = &config.system.device_id;
        let connect_timeout = config.connect_timeout();
        let publish_timeout = config.publish_timeout();
        let upload_timeout = Duration::from_secs(config.dispatch.upload_timeout_seconds);

        for (kind, mqtt) in [
            (SinkKind::LocalBus, &sinks.local_bus),
            (SinkKind::CloudPubSub, &sinks.cloud_pubsub),
        ] {
            if mqtt.enabled {
                let result =
                    probe_mqtt(kind, mqtt, device_id, connect_timeout, publish_timeout).await;
                registry.register_result(kind, result);
            }
        }

        if sinks.storage.enabled {
            match build_clip_store(&sinks.storage, upload_timeout) {
                Ok(store) => registry.register_clip_store(store),
                Err(e) => registry.mark_unavailable(SinkKind::BlobStorage, e.to_string()),
            }
        }

        if sinks.event_log.enabled {
            let result = JsonlEventLog::open(&sinks.event_log.path)
                .await
                .map(|log| Arc::new(log) as Arc<dyn EventSink>);
            registry.register_result(SinkKind::EventLog, result);
        }

        if sinks.notification.enabled {
            let result = match &sinks.notification.webhook_url {
                Some(url) => WebhookNotifier::new(url, publish_timeout)
                    .map(|n| Arc::new(n) as Arc<dyn EventSink>),
                None => Err(SinkError::configuration(
                    SinkKind::Notification.as_str(),
                    "no webhook_url",
                )),
            };
            registry.register_result(SinkKind::Notification, result);
        }

        for (kind, state) in &registry.states {
            info!(sink = %kind, state = %state.label(), "Sink probed");
        }
        registry
    }

    fn register_result(&mut self, kind: SinkKind, result: Result<Arc<dyn EventSink>, SinkError>) {
        match result {
            Ok(sink) => self.register(sink),
            Err(e) => self.mark_unavailable(kind, e.to_string()),
        }
    }

    pub fn register(&mut self, sink: Arc<dyn EventSink>) {
        let kind = sink.kind();
        self.sinks.retain(|s| s.kind() != kind);
        self.sinks.push(sink);
        self.states.insert(kind, SinkState::Enabled);
    }

    pub fn register_clip_store(&mut self, store: Arc<dyn ClipStore>) {
        self.clip_store = Some(store);
        self.states.insert(SinkKind::BlobStorage, SinkState::Enabled);
    }

    pub fn mark_unavailable(&mut self, kind: SinkKind, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(sink = %kind, %reason, "Sink unavailable for this run");
        self.states.insert(kind, SinkState::Unavailable(reason));
    }

    pub fn state(&self, kind: SinkKind) -> SinkState {
        self.states
            .get(&kind)
            .cloned()
            .unwrap_or(SinkState::Disabled)
    }

    pub fn states(&self) -> &BTreeMap<SinkKind, SinkState> {
        &self.states
    }

    pub fn is_enabled(&self, kind: SinkKind) -> bool {
        self.state(kind).is_enabled()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        BTreeMap<SinkKind, SinkState>,
        Vec<Arc<dyn EventSink>>,
        Option<Arc<dyn ClipStore>>,
    ) {
        (self.states, self.sinks, self.clip_store)
    }
}

async fn probe_mqtt(
    kind: SinkKind,
    config: &MqttSinkConfig,
    device_id: &str,
    connect_timeout: Duration,
    publish_timeout: Duration,
) -> Result<Arc<dyn EventSink>, SinkError> {
    let sink = MqttSink::connect(kind, config, device_id, connect_timeout, publish_timeout).await?;
    Ok(Arc::new(sink))
}
