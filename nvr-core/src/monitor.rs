use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::stream::{Stream, StreamStatus};

const INITIAL_DELAY: Duration = Duration::from_secs(30);
const TICK: Duration = Duration::from_secs(60);

/// Scans every stream on a schedule, raising and clearing the per-stream
/// error flags and restarting streams that have stopped writing.
///
/// First check thirty seconds after startup, then once a minute. The
/// restarted-recently flag only reports instability; the two staleness
/// flags also fire the stream's restart trigger on their rising edge.
pub async fn run(streams: Arc<Vec<Stream>>, token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(INITIAL_DELAY) => {}
    }
    loop {
        for stream in streams.iter() {
            check_stream(&stream.input.id, &stream.status, Utc::now());
        }
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(TICK) => {}
        }
    }
}

/// Evaluates the three freshness predicates for one stream at `now`,
/// handling edges and storing the new flag values.
pub fn check_stream(stream_id: &str, status: &StreamStatus, now: DateTime<Utc>) {
    let last_restart = status.last_restart.load();
    let restart_in_err = now - last_restart < chrono::Duration::minutes(5);
    match (restart_in_err, status.last_restart_in_err.load()) {
        (true, false) => {
            warn!(stream = %stream_id, last_restart = %last_restart, "stream restarted less than 5 minutes ago");
        }
        (false, true) => {
            info!(stream = %stream_id, last_restart = %last_restart, "stream has been up at least 5 minutes");
        }
        _ => {}
    }

    let last_file_opened = status.last_file_opened.load();
    let file_in_err = now - last_file_opened > chrono::Duration::minutes(3);
    match (file_in_err, status.last_file_opened_in_err.load()) {
        (true, false) => {
            warn!(stream = %stream_id, last_open = %last_file_opened, "stream has not opened a file for at least 3 minutes, restarting");
            invoke_restart(stream_id, status);
        }
        (false, true) => {
            info!(stream = %stream_id, last_open = %last_file_opened, "stream has opened a file in the last 3 minutes");
        }
        _ => {}
    }

    let last_segment_opened = status.last_segment_opened.load();
    let segment_in_err = now - last_segment_opened > chrono::Duration::minutes(15);
    match (segment_in_err, status.last_segment_opened_in_err.load()) {
        (true, false) => {
            warn!(stream = %stream_id, last_open = %last_segment_opened, "stream has not opened a segment for at least 15 minutes, restarting");
            invoke_restart(stream_id, status);
        }
        (false, true) => {
            info!(stream = %stream_id, last_open = %last_segment_opened, "stream has opened a segment in the last 15 minutes");
        }
        _ => {}
    }

    status.last_restart_in_err.store(restart_in_err);
    status.last_file_opened_in_err.store(file_in_err);
    status.last_segment_opened_in_err.store(segment_in_err);
}

fn invoke_restart(stream_id: &str, status: &StreamStatus) {
    match status.restart.load() {
        Some(restart) => restart(),
        None => warn!(stream = %stream_id, "stream restart trigger is not installed"),
    }
}
