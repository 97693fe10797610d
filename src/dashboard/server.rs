use super::handlers::{
    events_handler, health_handler, index_handler, status_handler, video_feed_handler,
};
use crate::app::StatusQuery;
use crate::config::DashboardConfig;
use crate::error::{FallwatchError, Result};
use axum::{routing::get, Router};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the Axum handlers
#[derive(Clone)]
pub struct DashboardState {
    pub(crate) query: StatusQuery,
    pub(crate) frame_interval: Duration,
    pub(crate) shutdown: CancellationToken,
}

/// Read-only HTTP view over the status query
pub struct DashboardServer {
    config: DashboardConfig,
    query: StatusQuery,
}

impl DashboardServer {
    pub fn new(config: DashboardConfig, query: StatusQuery) -> Self {
        Self { config, query }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Routes bound to `shutdown`, which also ends open video streams
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = DashboardState {
            query: self.query.clone(),
            frame_interval: Duration::from_micros(
                1_000_000u64 / self.config.stream_fps.max(1) as u64,
            ),
            shutdown,
        };

        Router::new()
            .route("/", get(index_handler))
            .route("/video_feed", get(video_feed_handler))
            .route("/api/status", get(status_handler))
            .route("/api/events", get(events_handler))
            .route("/api/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.address();
        let app = self.router(shutdown.clone());

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            FallwatchError::component("dashboard", format!("bind {} failed: {}", addr, e))
        })?;
        info!("Dashboard listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Dashboard stopped");
        Ok(())
    }
}
