use crate::config::MqttSinkConfig;
use crate::dispatch::event::{FallEvent, OnlineStatus, StatusMessage};
use crate::dispatch::sink::{EventSink, SinkKind};
use crate::error::SinkError;
use crate::mqtt::{last_will, MqttLink};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Publishes events to `<topic>` and retained presence to `<topic>/status`
pub struct MqttSink {
    kind: SinkKind,
    topic: String,
    status_topic: String,
    link: MqttLink,
    publish_timeout: Duration,
}

impl MqttSink {
    /// Connect with an `offline` last will on the status topic
    pub async fn connect(
        kind: SinkKind,
        config: &MqttSinkConfig,
        device_id: &str,
        connect_timeout: Duration,
        publish_timeout: Duration,
    ) -> Result<Self, SinkError> {
        let status_topic = format!("{}/status", config.topic);
        let will = serde_json::to_vec(&StatusMessage::new(OnlineStatus::Offline, device_id))
            .map_err(|e| SinkError::delivery(kind.as_str(), e.to_string()))?;

        let link = MqttLink::connect(
            kind.as_str(),
            &config.broker,
            Vec::new(),
            None,
            Some(last_will(&status_topic, will)),
            connect_timeout,
        )
        .await
        .map_err(|source| SinkError::Mqtt {
            sink: kind.as_str().to_string(),
            source,
        })?;

        info!(sink = %kind, topic = %config.topic, "MQTT sink ready");
        Ok(Self {
            kind,
            topic: config.topic.clone(),
            status_topic,
            link,
            publish_timeout,
        })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), SinkError> {
        self.link
            .publish(topic, payload, retain, self.publish_timeout)
            .await
            .map_err(|source| SinkError::Mqtt {
                sink: self.kind.as_str().to_string(),
                source,
            })
    }
}

#[async_trait]
impl EventSink for MqttSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn deliver(&self, event: &FallEvent) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(&event.message())
            .map_err(|e| SinkError::delivery(self.kind.as_str(), e.to_string()))?;
        self.publish(&self.topic, payload, false).await
    }

    async fn publish_status(&self, status: &StatusMessage) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(status)
            .map_err(|e| SinkError::delivery(self.kind.as_str(), e.to_string()))?;
        self.publish(&self.status_topic, payload, true).await
    }

    async fn close(&self) {
        self.link.disconnect().await;
    }
}
