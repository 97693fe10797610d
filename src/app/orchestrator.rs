use super::activity::spawn_activity_collector;
use super::monitor::DetectionMonitor;
use super::state::{SharedState, StatusQuery};
use super::types::ShutdownReason;
use crate::clip::ClipAssembler;
use crate::config::FallwatchConfig;
use crate::dispatch::{DispatchSettings, EventDispatcher, SinkRegistry};
use crate::events::EventBus;
use crate::pose::{build_estimator, ClassifierSettings, FallClassifier, PoseEstimator};
use crate::source::{build_source, FrameSource};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Builds every component once and owns their lifecycles
pub struct FallwatchOrchestrator {
    pub(super) config: FallwatchConfig,
    pub(super) event_bus: EventBus,
    pub(super) source: Arc<dyn FrameSource>,
    pub(super) assembler: Arc<ClipAssembler>,
    pub(super) dispatcher: Arc<EventDispatcher>,
    pub(super) state: Arc<SharedState>,

    pub(super) monitor: Option<DetectionMonitor>,
    pub(super) monitor_handle: Option<JoinHandle<()>>,
    pub(super) monitor_token: CancellationToken,
    pub(super) dashboard_handle: Option<JoinHandle<()>>,
    pub(super) activity_handle: Option<JoinHandle<()>>,

    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl FallwatchOrchestrator {
    /// Build from configuration, probing every sink once
    pub async fn new(config: FallwatchConfig) -> Self {
        let source = build_source(&config, config.connect_timeout());
        let registry = SinkRegistry::probe(&config).await;
        let estimator = build_estimator(config.detection.estimator);
        Self::with_components(config, source, registry, estimator)
    }

    /// Assemble around an injected source, sinks and estimator.
    ///
    /// Spawns the clip encoder and sink workers, so it must run inside a
    /// tokio runtime.
    pub fn with_components(
        config: FallwatchConfig,
        source: Arc<dyn FrameSource>,
        registry: SinkRegistry,
        estimator: Box<dyn PoseEstimator>,
    ) -> Self {
        let event_bus = EventBus::new(config.system.event_bus_capacity);

        let assembler = Arc::new(ClipAssembler::new(
            &config.clip,
            config.camera.fps,
            event_bus.clone(),
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            registry,
            DispatchSettings::from_config(&config),
            event_bus.clone(),
        ));
        let state = Arc::new(SharedState::new(config.system.history_limit));

        let monitor = DetectionMonitor::new(
            Arc::clone(&source),
            estimator,
            FallClassifier::new(ClassifierSettings::from(&config.detection)),
            Arc::clone(&assembler),
            Arc::clone(&dispatcher),
            Arc::clone(&state),
            event_bus.clone(),
            config.system.device_id.clone(),
            config.frame_interval(),
            config.camera.resolution,
        );

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let cancellation_token = CancellationToken::new();
        let activity_handle = spawn_activity_collector(
            &event_bus,
            Arc::clone(&state),
            cancellation_token.clone(),
        );

        info!(
            device_id = %config.system.device_id,
            source = config.source.kind.as_str(),
            "Orchestrator assembled"
        );

        Self {
            monitor_token: cancellation_token.child_token(),
            config,
            event_bus,
            source,
            assembler,
            dispatcher,
            state,
            monitor: Some(monitor),
            monitor_handle: None,
            dashboard_handle: None,
            activity_handle: Some(activity_handle),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token,
        }
    }

    /// Read-only handle for status, history and the latest frame
    pub fn query(&self) -> StatusQuery {
        StatusQuery::new(
            Arc::clone(&self.state),
            Arc::clone(&self.source),
            Arc::clone(&self.dispatcher),
            self.config.system.device_id.clone(),
            self.config.camera.resolution,
            self.config.camera.fps,
        )
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Ask `run` to shut down as if a signal arrived
    pub fn shutdown_handle(&mut self) -> Option<oneshot::Sender<ShutdownReason>> {
        self.shutdown_sender.take()
    }
}
