use crate::dispatch::event::FallEvent;
use crate::dispatch::sink::{EventSink, SinkKind};
use crate::error::SinkError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Alert body posted to the webhook
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallAlert {
    pub subject: String,
    pub message: String,
    pub device_id: String,
    pub confidence: f64,
    pub clip_url: Option<String>,
}

impl FallAlert {
    pub fn for_event(event: &FallEvent) -> Self {
        let record = event.record();
        // local path when the clip never reached storage
        let clip_url = event.clip_url().or_else(|| {
            record
                .clip_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
        });

        let mut message = format!(
            "FALL DETECTION ALERT\n\
             Time: {}\n\
             Device: {}\n\
             Confidence: {:.1}%\n",
            record.detected_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.device_id,
            record.confidence * 100.0
        );
        if let Some(url) = &clip_url {
            message.push_str(&format!("Video Clip: {}\n", url));
        }
        message.push_str("\nPlease check on the person immediately.");

        Self {
            subject: format!("Fall Detected - {}", record.device_id),
            message,
            device_id: record.device_id.clone(),
            confidence: record.confidence,
            clip_url,
        }
    }
}

/// Posts a JSON alert to a webhook
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let sink = SinkKind::Notification.as_str();
        reqwest::Url::parse(url)
            .map_err(|e| SinkError::configuration(sink, format!("invalid webhook_url: {}", e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fallwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| SinkError::Http {
                sink: sink.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl EventSink for WebhookNotifier {
    fn kind(&self) -> SinkKind {
        SinkKind::Notification
    }

    async fn deliver(&self, event: &FallEvent) -> Result<(), SinkError> {
        let http_error = |source| SinkError::Http {
            sink: self.name().to_string(),
            source,
        };

        self.client
            .post(&self.url)
            .json(&FallAlert::for_event(event))
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?;
        Ok(())
    }
}
