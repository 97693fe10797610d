//! Shared MQTT plumbing for the remote frame source and the messaging sinks.

use crate::config::MqttEndpointConfig;
use crate::error::MqttError;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Remote frames are full JPEGs
const MAX_PACKET_BYTES: usize = 10 * 1024 * 1024;
const REQUEST_QUEUE: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Callback for incoming publishes: `(topic, payload)`
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Retained status message the broker publishes if this client vanishes
pub fn last_will(topic: &str, payload: Vec<u8>) -> LastWill {
    LastWill::new(topic, payload, QoS::AtLeastOnce, true)
}

/// Client options for one endpoint, including TLS material when configured
pub fn options(config: &MqttEndpointConfig) -> Result<MqttOptions, MqttError> {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));
    options.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);

    if let Some(tls) = &config.tls {
        let read = |path: &str| {
            std::fs::read(path).map_err(|source| MqttError::Tls {
                path: path.to_string(),
                source,
            })
        };

        let ca = read(&tls.ca_path)?;
        let client_auth = match (&tls.client_cert_path, &tls.client_key_path) {
            (Some(cert), Some(key)) => Some((read(cert)?, read(key)?)),
            _ => None,
        };
        options.set_transport(Transport::tls(ca, client_auth, None));
    }

    Ok(options)
}

/// A connected MQTT client with a supervised event-loop driver.
///
/// The driver reconnects on its own after the first successful connection and
/// re-subscribes on every fresh session.
pub struct MqttLink {
    name: String,
    endpoint: String,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttLink {
    /// Connect and wait for the broker's acknowledgement, at most `timeout`
    pub async fn connect(
        name: &str,
        config: &MqttEndpointConfig,
        subscriptions: Vec<String>,
        handler: Option<MessageHandler>,
        will: Option<LastWill>,
        timeout: Duration,
    ) -> Result<Self, MqttError> {
        let endpoint = config.endpoint();
        let mut options = options(config)?;
        if let Some(will) = will {
            options.set_last_will(will);
        }

        info!("[{}] Connecting to MQTT broker {}", name, endpoint);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE);
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let driver = tokio::spawn(drive(
            name.to_string(),
            eventloop,
            client.clone(),
            subscriptions,
            handler,
            Arc::clone(&connected),
            cancel.clone(),
            ready_tx,
        ));

        let outcome = tokio::time::timeout(timeout, ready_rx).await;
        let failure = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(details))) => Some(MqttError::Connect {
                endpoint: endpoint.clone(),
                details,
            }),
            Ok(Err(_)) => Some(MqttError::Connect {
                endpoint: endpoint.clone(),
                details: "event loop ended".to_string(),
            }),
            Err(_) => Some(MqttError::ConnectTimeout {
                endpoint: endpoint.clone(),
                seconds: timeout.as_secs(),
            }),
        };

        if let Some(error) = failure {
            cancel.cancel();
            driver.abort();
            return Err(error);
        }

        info!("[{}] Connected to {}", name, endpoint);
        Ok(Self {
            name: name.to_string(),
            endpoint,
            client,
            connected,
            cancel,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Queue a QoS 1 publish, bounded by `timeout`
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                endpoint: self.endpoint.clone(),
            });
        }

        tokio::time::timeout(
            timeout,
            self.client
                .publish(topic, QoS::AtLeastOnce, retain, payload),
        )
        .await
        .map_err(|_| MqttError::PublishTimeout {
            topic: topic.to_string(),
            millis: timeout.as_millis() as u64,
        })??;

        debug!("[{}] Published to {}", self.name, topic);
        Ok(())
    }

    /// Flush pending publishes, then stop the driver
    pub async fn disconnect(&self) {
        let Some(driver) = self.driver.lock().take() else {
            return;
        };

        if let Err(e) = tokio::time::timeout(DISCONNECT_GRACE, self.client.disconnect()).await {
            debug!("[{}] Disconnect request timed out: {}", self.name, e);
        }

        if tokio::time::timeout(DISCONNECT_GRACE, driver).await.is_err() {
            debug!("[{}] Driver still running, cancelling", self.name);
        }
        self.cancel.cancel();
        self.connected.store(false, Ordering::Relaxed);
        info!("[{}] Disconnected from {}", self.name, self.endpoint);
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    name: String,
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    handler: Option<MessageHandler>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Relaxed);
                for topic in &subscriptions {
                    if let Err(e) = client.try_subscribe(topic, QoS::AtMostOnce) {
                        warn!("[{}] Failed to subscribe to {}: {}", name, topic, e);
                    } else {
                        debug!("[{}] Subscribed to {}", name, topic);
                    }
                }
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                } else {
                    info!("[{}] Reconnected", name);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Some(handler) = &handler {
                    handler(publish.topic.as_str(), publish.payload.as_ref());
                }
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                connected.store(false, Ordering::Relaxed);
                debug!("[{}] Disconnect sent", name);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::Relaxed);
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(e.to_string()));
                    break;
                }
                warn!("[{}] MQTT connection lost: {}", name, e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    debug!("[{}] MQTT driver stopped", name);
}
