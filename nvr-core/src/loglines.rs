use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStderr;
use tracing::{debug, error, warn};

use crate::stream::{SegmentClosedFn, StreamStatus};

const SEGMENT_OPEN_PATTERN: &str =
    r"\[segment[^\]]+\] \[info\] Opening '([^']+\.mp4)' for writing";

/// Splits a capture command's stderr into lines and derives liveness and
/// segment events from them.
///
/// Any line containing `Opening` and `for writing` refreshes
/// `last_file_opened`. Lines announcing a new archive segment additionally
/// roll `last_segment_opened`/`last_segment_opened_name` and, when a
/// previous segment exists, report it closed. Lines are also forwarded to
/// the log by their leading tag; malformed lines pass through as debug
/// output. Feeding bytes never fails.
pub struct LogTap {
    stream_id: String,
    status: Arc<StreamStatus>,
    on_segment_closed: SegmentClosedFn,
    segment_open: Regex,
    buf: Vec<u8>,
}

impl LogTap {
    pub fn new(
        stream_id: impl Into<String>,
        status: Arc<StreamStatus>,
        on_segment_closed: SegmentClosedFn,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            status,
            on_segment_closed,
            segment_open: Regex::new(SEGMENT_OPEN_PATTERN).expect("valid regex"),
            buf: Vec::new(),
        }
    }

    /// Feeds a chunk of stderr bytes. Completed lines are processed once;
    /// trailing partial bytes are held until the next chunk.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.on_line(line.trim_end_matches(['\r', '\n']));
        }
    }

    fn on_line(&self, line: &str) {
        // e.g. [segment @ 0x55e5928f9400] [info] Opening 'media/doorbell/archive/doorbell-2025-05-01-20-00-25.mp4' for writing
        //      [hls @ 0x55f7d4140740] [info] Opening 'media/doorbell/stream/doorbell.m3u8.tmp' for writing
        if line.contains("Opening") && line.contains("for writing") {
            self.status.last_file_opened.store(Utc::now());

            if let Some(captures) = self.segment_open.captures(line) {
                let previous_opened = self.status.last_segment_opened.load();
                let previous_name = self.status.last_segment_opened_name.load();
                self.status.last_segment_opened.store(Utc::now());
                self.status
                    .last_segment_opened_name
                    .store(captures[1].to_string());
                if !previous_name.is_empty() {
                    (self.on_segment_closed)(previous_opened, &previous_name);
                    self.status.last_segment_closed.store(Utc::now());
                }
            }
        }

        if line.starts_with("[fatal]") || line.starts_with("[error]") {
            error!(stream = %self.stream_id, line, "capture command error output");
        } else if line.starts_with("[warning]") {
            warn!(stream = %self.stream_id, line, "capture command warning output");
        }
        debug!(stream = %self.stream_id, line, "capture command output");
    }
}

/// Reads a child's stderr to exhaustion, feeding each chunk to the tap.
pub async fn pump_stderr(mut stderr: ChildStderr, mut tap: LogTap) {
    let mut buf = [0u8; 8192];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => tap.push(&buf[..n]),
            Err(error) => {
                debug!(%error, "capture stderr read failed");
                return;
            }
        }
    }
}
