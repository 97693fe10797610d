use super::server::DashboardState;
use crate::app::MAX_EVENTS_QUERY;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

const DEFAULT_EVENTS_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub limit: Option<usize>,
}

pub async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.query.status())
}

/// Newest first; `limit` defaults to 20 and is capped at 50
pub async fn events_handler(
    State(state): State<DashboardState>,
    Query(params): Query<EventsParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_EVENTS_LIMIT)
        .min(MAX_EVENTS_QUERY);
    Json(state.query.events(limit))
}

pub async fn health_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().timestamp(),
        "receiving": state.query.is_receiving(),
    }))
}

/// MJPEG of the latest frame, paced at the stream rate
pub async fn video_feed_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    info!("New video feed client connected");

    let stream = async_stream::stream! {
        let mut ticker = interval(state.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_streamed = 0u64;

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(frame) = state.query.latest_frame() else {
                continue;
            };

            let part_header = format!(
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                frame.data.len()
            );
            yield Ok::<_, std::io::Error>(Bytes::from(part_header));
            yield Ok(Bytes::copy_from_slice(&frame.data));
            yield Ok(Bytes::from_static(b"\r\n"));
            frames_streamed += 1;
        }

        debug!(frames_streamed, "Video feed client finished");
    };

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                "multipart/x-mixed-replace; boundary=frame",
            ),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(stream),
    )
}

pub async fn index_handler() -> impl IntoResponse {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Fallwatch</title>
    <style>
        :root { color-scheme: dark; }
        body { margin: 0; background: #111; color: #ddd; font-family: sans-serif; }
        main { display: flex; flex-wrap: wrap; gap: 1rem; padding: 1rem; }
        img.feed { max-width: 100%; background: #000; }
        pre { font-size: 0.8rem; max-width: 40rem; overflow: auto; }
    </style>
</head>
<body>
    <main>
        <img class="feed" src="/video_feed" alt="Live view">
        <section>
            <h2>Status</h2>
            <pre id="status"></pre>
            <h2>Recent falls</h2>
            <pre id="events"></pre>
        </section>
    </main>
    <script>
        async function refresh() {
            const status = await fetch('/api/status').then(r => r.json());
            const events = await fetch('/api/events?limit=10').then(r => r.json());
            document.getElementById('status').textContent = JSON.stringify(status, null, 2);
            document.getElementById('events').textContent = JSON.stringify(events, null, 2);
        }
        refresh();
        setInterval(refresh, 2000);
    </script>
</body>
</html>
"#;
