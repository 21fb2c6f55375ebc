use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Format of the 19-character timestamp carried in artifact file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

const ARCHIVE_SUFFIX: &str = ".mp4";
const THUMBNAIL_SUFFIX: &str = ".mp4.jpg";
const SEGMENT_SUFFIX: &str = ".ts";

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("file name too short to carry a timestamp: {0}")]
    TooShort(String),
    #[error("invalid timestamp in file name {name}: {source}")]
    Invalid {
        name: String,
        source: chrono::ParseError,
    },
}

fn parse_trailing_timestamp(name: &str, stem: &str) -> Result<DateTime<Utc>, TimestampError> {
    if stem.len() < 19 {
        return Err(TimestampError::TooShort(name.to_string()));
    }
    let raw = &stem[stem.len() - 19..];
    let parsed = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|source| {
        TimestampError::Invalid {
            name: name.to_string(),
            source,
        }
    })?;
    Ok(parsed.and_utc())
}

/// Parses the start instant from an archive file name like
/// `doorbell-2025-04-23-21-09-05.mp4` (or its `.mp4.jpg` thumbnail).
pub fn parse_archive_timestamp(name: &str) -> Result<DateTime<Utc>, TimestampError> {
    let stem = name
        .strip_suffix(THUMBNAIL_SUFFIX)
        .or_else(|| name.strip_suffix(ARCHIVE_SUFFIX))
        .unwrap_or(name);
    parse_trailing_timestamp(name, stem)
}

/// Parses the instant from a live segment name like
/// `doorbell-000001-2025-05-01-22-21-52.ts`.
pub fn parse_segment_timestamp(name: &str) -> Result<DateTime<Utc>, TimestampError> {
    let stem = name.strip_suffix(SEGMENT_SUFFIX).unwrap_or(name);
    parse_trailing_timestamp(name, stem)
}

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// One finished archive segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    /// Basename of the archive file.
    pub id: String,
    pub input_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub path: PathBuf,
}

enum CatalogMessage {
    Append(Recording),
    Sort,
}

/// Handle to the in-memory recording catalog.
///
/// Appends and sort requests are queued to a single writer task, so catalog
/// mutations stay serialized in submission order. Readers take the shared
/// lock and copy a point-in-time snapshot. The pruner removes entries
/// directly under the exclusive lock.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<RwLock<Vec<Recording>>>,
    tx: mpsc::UnboundedSender<CatalogMessage>,
}

impl Catalog {
    pub fn new() -> (Self, CatalogWriter) {
        let inner = Arc::new(RwLock::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let catalog = Self {
            inner: inner.clone(),
            tx,
        };
        (catalog, CatalogWriter { inner, rx })
    }

    /// Queues a recording for the writer task to push.
    pub fn append(&self, recording: Recording) {
        let _ = self.tx.send(CatalogMessage::Append(recording));
    }

    /// Queues a re-sort; processed after every append submitted before it.
    pub fn request_sort(&self) {
        let _ = self.tx.send(CatalogMessage::Sort);
    }

    /// Snapshot of the catalog, newest first.
    pub fn snapshot_newest_first(&self) -> Vec<Recording> {
        let entries = self.inner.read().unwrap();
        entries.iter().rev().cloned().collect()
    }

    /// Removes the first entry whose path equals `path`.
    pub fn remove_path(&self, path: &Path) {
        let mut entries = self.inner.write().unwrap();
        if let Some(idx) = entries.iter().position(|r| r.path == path) {
            entries.remove(idx);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

/// The catalog's single writer; owns the mutation queue.
pub struct CatalogWriter {
    inner: Arc<RwLock<Vec<Recording>>>,
    rx: mpsc::UnboundedReceiver<CatalogMessage>,
}

impl CatalogWriter {
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                CatalogMessage::Append(recording) => {
                    debug!(
                        recording = %recording.id,
                        input = %recording.input_id,
                        "new recording"
                    );
                    self.inner.write().unwrap().push(recording);
                }
                CatalogMessage::Sort => {
                    let mut entries = self.inner.write().unwrap();
                    entries.sort_by(|a, b| {
                        a.start.cmp(&b.start).then_with(|| a.path.cmp(&b.path))
                    });
                    debug!("sorted recordings");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    fn instant(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .unwrap()
            .and_utc()
    }

    fn recording(start: &str, path: &str) -> Recording {
        Recording {
            id: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            input_id: "doorbell".into(),
            start: instant(start),
            end: instant(start) + chrono::Duration::seconds(300),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn parses_archive_timestamp() {
        let parsed = parse_archive_timestamp("doorbell-2025-04-23-21-09-05.mp4").unwrap();
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2025, 4, 23, 21, 9, 5).unwrap()
        );
    }

    #[test]
    fn parses_thumbnail_timestamp() {
        let parsed = parse_archive_timestamp("doorbell-2025-04-23-21-09-05.mp4.jpg").unwrap();
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2025, 4, 23, 21, 9, 5).unwrap()
        );
    }

    #[test]
    fn parses_segment_timestamp() {
        let parsed = parse_segment_timestamp("doorbell-000001-2025-05-01-22-21-52.ts").unwrap();
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2025, 5, 1, 22, 21, 52).unwrap()
        );
    }

    #[test]
    fn timestamp_round_trips() {
        let raw = "2025-04-23-21-09-05";
        let parsed = parse_archive_timestamp(&format!("doorbell-{raw}.mp4")).unwrap();
        assert_eq!(format_timestamp(parsed), raw);
    }

    #[test]
    fn short_name_is_rejected() {
        assert!(matches!(
            parse_archive_timestamp("x.mp4"),
            Err(TimestampError::TooShort(_))
        ));
        assert!(matches!(
            parse_segment_timestamp("x.ts"),
            Err(TimestampError::TooShort(_))
        ));
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert!(matches!(
            parse_archive_timestamp("doorbell-aaaa-bb-cc-dd-ee-ff.mp4"),
            Err(TimestampError::Invalid { .. })
        ));
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn writer_appends_in_order_then_sorts() {
        let (catalog, writer) = Catalog::new();
        tokio::spawn(writer.run());

        let newer = recording("2025-04-23-21-14-05", "media/doorbell/archive/b.mp4");
        let older = recording("2025-04-23-21-09-05", "media/doorbell/archive/a.mp4");
        catalog.append(newer.clone());
        catalog.append(older.clone());
        wait_for(|| catalog.len() == 2).await;

        // Append order is preserved until a sort is requested.
        let snapshot = catalog.snapshot_newest_first();
        assert_eq!(snapshot[0], older);
        assert_eq!(snapshot[1], newer);

        catalog.request_sort();
        wait_for(|| catalog.snapshot_newest_first()[0] == newer).await;
        let snapshot = catalog.snapshot_newest_first();
        assert_eq!(snapshot, vec![newer, older]);
    }

    #[tokio::test]
    async fn sort_breaks_start_ties_by_path() {
        let (catalog, writer) = Catalog::new();
        tokio::spawn(writer.run());

        let b = recording("2025-04-23-21-09-05", "media/doorbell/archive/b.mp4");
        let a = recording("2025-04-23-21-09-05", "media/doorbell/archive/a.mp4");
        catalog.append(b.clone());
        catalog.append(a.clone());
        catalog.request_sort();
        wait_for(|| catalog.len() == 2).await;
        wait_for(|| catalog.snapshot_newest_first()[0] == b).await;
        assert_eq!(catalog.snapshot_newest_first(), vec![b, a]);
    }

    #[tokio::test]
    async fn remove_path_drops_single_entry() {
        let (catalog, writer) = Catalog::new();
        tokio::spawn(writer.run());

        let keep = recording("2025-04-23-21-09-05", "media/doorbell/archive/a.mp4");
        let gone = recording("2025-04-23-21-14-05", "media/doorbell/archive/b.mp4");
        catalog.append(keep.clone());
        catalog.append(gone.clone());
        wait_for(|| catalog.len() == 2).await;

        catalog.remove_path(Path::new("media/doorbell/archive/b.mp4"));
        assert_eq!(catalog.snapshot_newest_first(), vec![keep]);

        // Removing an unknown path is a no-op.
        catalog.remove_path(Path::new("media/doorbell/archive/b.mp4"));
        assert_eq!(catalog.len(), 1);
    }
}
