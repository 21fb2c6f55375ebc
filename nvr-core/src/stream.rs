use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::cell::StateCell;
use crate::config::Input;

/// Stops and restarts a stream's capture process.
pub type RestartFn = Arc<dyn Fn() + Send + Sync>;

/// Invoked with the open instant and name of the previous segment once a new
/// segment has been opened, logically closing the previous one.
pub type SegmentClosedFn = Arc<dyn Fn(DateTime<Utc>, &str) + Send + Sync>;

/// Instant stored into time cells before any real event has been observed,
/// far enough in the past that every freshness check fires immediately.
pub fn distant_past() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1995, 7, 17, 0, 1, 2).unwrap()
}

/// Runtime state of one supervised stream, shared between the supervisor,
/// the log extractor, the liveness monitor, and the HTTP projection. Each
/// cell is synchronized on its own; a multi-cell read is not a consistent
/// snapshot.
pub struct StreamStatus {
    /// True while the capture command is running.
    pub active: StateCell<bool>,
    /// Set just before each capture-command start attempt.
    pub last_restart: StateCell<DateTime<Utc>>,
    /// Set when the capture command reports opening any file for writing.
    pub last_file_opened: StateCell<DateTime<Utc>>,
    /// Set when the capture command reports opening an archive segment.
    pub last_segment_opened: StateCell<DateTime<Utc>>,
    /// Name of the most recently opened archive segment; empty until the
    /// first segment of this process lifetime.
    pub last_segment_opened_name: StateCell<String>,
    /// Set when a previously opened segment is closed by its successor.
    pub last_segment_closed: StateCell<DateTime<Utc>>,
    /// Message of the most recent start or wait failure.
    pub last_err: StateCell<String>,

    /// True while `last_restart` is less than five minutes ago (the capture
    /// command could be crashlooping). Updated by the liveness monitor.
    pub last_restart_in_err: StateCell<bool>,
    /// True while `last_file_opened` is more than three minutes ago.
    pub last_file_opened_in_err: StateCell<bool>,
    /// True while `last_segment_opened` is more than fifteen minutes ago.
    pub last_segment_opened_in_err: StateCell<bool>,

    /// Kills the current capture process so the supervisor loop restarts
    /// it. Installed by the supervisor before each start attempt.
    pub restart: StateCell<Option<RestartFn>>,
}

impl StreamStatus {
    pub fn new() -> Self {
        Self {
            active: StateCell::new(false),
            last_restart: StateCell::new(distant_past()),
            last_file_opened: StateCell::new(distant_past()),
            last_segment_opened: StateCell::new(distant_past()),
            last_segment_opened_name: StateCell::new(String::new()),
            last_segment_closed: StateCell::new(distant_past()),
            last_err: StateCell::new("empty".to_string()),
            last_restart_in_err: StateCell::new(true),
            last_file_opened_in_err: StateCell::new(true),
            last_segment_opened_in_err: StateCell::new(true),
            restart: StateCell::new(None),
        }
    }

    /// Aggregate error state as reported to UI consumers.
    pub fn in_err(&self) -> bool {
        !self.active.load()
            || self.last_file_opened_in_err.load()
            || self.last_segment_opened_in_err.load()
            || self.last_restart_in_err.load()
    }
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// One supervised stream: its configuration and live status.
pub struct Stream {
    pub input: Input,
    pub status: Arc<StreamStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_every_flag_raised() {
        let status = StreamStatus::new();
        assert!(!status.active.load());
        assert!(status.last_restart_in_err.load());
        assert!(status.last_file_opened_in_err.load());
        assert!(status.last_segment_opened_in_err.load());
        assert!(status.in_err());
        assert_eq!(status.last_segment_opened_name.load(), "");
        assert_eq!(status.last_err.load(), "empty");
        assert_eq!(status.last_restart.load(), distant_past());
    }

    #[test]
    fn in_err_tracks_active_and_flags() {
        let status = StreamStatus::new();
        status.active.store(true);
        status.last_restart_in_err.store(false);
        status.last_file_opened_in_err.store(false);
        status.last_segment_opened_in_err.store(false);
        assert!(!status.in_err());

        status.last_segment_opened_in_err.store(true);
        assert!(status.in_err());

        status.last_segment_opened_in_err.store(false);
        status.active.store(false);
        assert!(status.in_err());
    }
}
