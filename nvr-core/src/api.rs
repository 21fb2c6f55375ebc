use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

use crate::catalog::{Catalog, Recording};
use crate::config::MediaLayout;
use crate::stream::Stream;
use crate::thumbs::thumbnail_path;

const UI_INDEX: &str = include_str!("../assets/index.html");

/// Read-only view over the engine, shared with every handler.
#[derive(Clone)]
pub struct AppState {
    pub streams: Arc<Vec<Stream>>,
    pub catalog: Catalog,
    pub layout: MediaLayout,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ApiStream {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub in_err: bool,
    pub last_recording: String,
    // Consumed by the UI under this exact key.
    #[serde(rename = "Source")]
    pub source: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ApiRecording {
    pub id: String,
    pub stream_id: String,
    pub stream_name: String,
    pub start: String,
    pub end: String,
    pub path: String,
    pub thumbnail_path: String,
}

pub fn router(state: AppState) -> Router {
    let media = ServeDir::new(state.layout.root());
    Router::new()
        .route("/api/streams", get(get_streams))
        .route("/api/recordings", get(get_recordings))
        .nest_service("/media", media)
        // The UI handles routing client-side; these paths all serve its
        // entry document.
        .route("/cameras", get(ui_index))
        .route("/live-view", get(ui_index))
        .route("/recordings", get(ui_index))
        .route("/recordings/:file", get(ui_index))
        .route("/", get(ui_index))
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    token: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

async fn ui_index() -> Html<&'static str> {
    Html(UI_INDEX)
}

async fn get_streams(State(state): State<AppState>) -> Json<Vec<ApiStream>> {
    Json(state.streams.iter().map(project_stream).collect())
}

async fn get_recordings(State(state): State<AppState>) -> Json<Vec<ApiRecording>> {
    let names: HashMap<&str, &str> = state
        .streams
        .iter()
        .map(|s| (s.input.id.as_str(), s.input.name.as_str()))
        .collect();
    Json(
        state
            .catalog
            .snapshot_newest_first()
            .iter()
            .map(|recording| project_recording(recording, &names))
            .collect(),
    )
}

fn rfc3339(instant: chrono::DateTime<chrono::Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn project_stream(stream: &Stream) -> ApiStream {
    let status = &stream.status;
    ApiStream {
        id: stream.input.id.clone(),
        name: stream.input.name.clone(),
        active: status.active.load(),
        in_err: status.in_err(),
        last_recording: rfc3339(status.last_segment_closed.load()),
        source: stream.input.playlist_source(),
    }
}

pub(crate) fn project_recording(
    recording: &Recording,
    names: &HashMap<&str, &str>,
) -> ApiRecording {
    let path = recording.path.to_string_lossy();
    let thumbnail = thumbnail_path(&recording.path);
    let thumbnail = thumbnail.to_string_lossy();
    ApiRecording {
        id: recording.id.clone(),
        stream_id: recording.input_id.clone(),
        stream_name: names
            .get(recording.input_id.as_str())
            .copied()
            .unwrap_or_default()
            .to_string(),
        start: rfc3339(recording.start),
        end: rfc3339(recording.end),
        path: format!("/{}", path.trim_start_matches('/')),
        thumbnail_path: format!("/{}", thumbnail.trim_start_matches('/')),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::config::Input;
    use crate::stream::StreamStatus;

    fn doorbell() -> Input {
        Input {
            id: "doorbell".into(),
            name: "Doorbell".into(),
            url: "rtsp://h/a".into(),
            recording_age_limit_hours: 0,
            recording_size_limit_megabytes: 0,
            stream_age_limit_hours: 0,
            stream_size_limit_megabytes: 0,
        }
    }

    #[test]
    fn healthy_stream_projects_clean() {
        let status = Arc::new(StreamStatus::new());
        status.active.store(true);
        status.last_restart_in_err.store(false);
        status.last_file_opened_in_err.store(false);
        status.last_segment_opened_in_err.store(false);
        status
            .last_segment_closed
            .store(Utc.with_ymd_and_hms(2025, 4, 23, 21, 14, 5).unwrap());
        let stream = Stream {
            input: doorbell(),
            status,
        };

        let projected = project_stream(&stream);
        assert!(projected.active);
        assert!(!projected.in_err);
        assert_eq!(projected.last_recording, "2025-04-23T21:14:05Z");
        assert_eq!(projected.source, "/media/doorbell/stream/doorbell.m3u8");
    }

    #[test]
    fn inactive_or_flagged_stream_projects_in_err() {
        let status = Arc::new(StreamStatus::new());
        let stream = Stream {
            input: doorbell(),
            status,
        };
        assert!(project_stream(&stream).in_err);

        stream.status.active.store(true);
        stream.status.last_restart_in_err.store(false);
        stream.status.last_file_opened_in_err.store(false);
        stream.status.last_segment_opened_in_err.store(true);
        assert!(project_stream(&stream).in_err);
    }

    #[test]
    fn recording_projects_web_paths() {
        let names = HashMap::from([("doorbell", "Doorbell")]);
        let recording = Recording {
            id: "doorbell-2025-04-23-21-09-05.mp4".into(),
            input_id: "doorbell".into(),
            start: Utc.with_ymd_and_hms(2025, 4, 23, 21, 9, 5).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 4, 23, 21, 14, 5).unwrap(),
            path: PathBuf::from("media/doorbell/archive/doorbell-2025-04-23-21-09-05.mp4"),
        };

        let projected = project_recording(&recording, &names);
        assert_eq!(projected.stream_name, "Doorbell");
        assert_eq!(projected.start, "2025-04-23T21:09:05Z");
        assert_eq!(projected.end, "2025-04-23T21:14:05Z");
        assert_eq!(
            projected.path,
            "/media/doorbell/archive/doorbell-2025-04-23-21-09-05.mp4"
        );
        assert_eq!(
            projected.thumbnail_path,
            "/media/doorbell/archive/doorbell-2025-04-23-21-09-05.mp4.jpg"
        );
    }

    #[test]
    fn stream_json_uses_the_ui_field_names() {
        let status = Arc::new(StreamStatus::new());
        let stream = Stream {
            input: doorbell(),
            status,
        };
        let encoded = serde_json::to_value(project_stream(&stream)).unwrap();
        assert!(encoded.get("Source").is_some());
        assert!(encoded.get("in_err").is_some());
        assert!(encoded.get("last_recording").is_some());
    }
}
