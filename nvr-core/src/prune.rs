use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::catalog::{parse_archive_timestamp, parse_segment_timestamp, Catalog, TimestampError};
use crate::config::{Input, MediaLayout};

const MIN_ARTIFACT_NAME_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("unexpected file found in {kind} directory: {path}")]
    Unexpected { kind: &'static str, path: PathBuf },
    #[error("failed to parse time from path {path}: {source}")]
    Timestamp {
        path: PathBuf,
        source: TimestampError,
    },
}

/// The two categories of managed on-disk artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactKind {
    /// Finished recordings and their thumbnails: `*.mp4` / `*.mp4.jpg`.
    Archive,
    /// Live playlist fragments: `*.ts`.
    LiveSegment,
}

impl ArtifactKind {
    fn label(self) -> &'static str {
        match self {
            ArtifactKind::Archive => "recording",
            ArtifactKind::LiveSegment => "stream segment",
        }
    }

    fn matches(self, name: &str) -> bool {
        match self {
            ArtifactKind::Archive => name.ends_with(".mp4") || name.ends_with(".mp4.jpg"),
            ArtifactKind::LiveSegment => name.ends_with(".ts"),
        }
    }

    fn timestamp(self, name: &str) -> Result<DateTime<Utc>, TimestampError> {
        match self {
            ArtifactKind::Archive => parse_archive_timestamp(name),
            ArtifactKind::LiveSegment => parse_segment_timestamp(name),
        }
    }
}

/// Enforces the per-input age and size budgets over archive files and live
/// segments.
///
/// A process-global mutex serializes passes, so the startup pass and the
/// periodic ticker never overlap. A pass never reports an error to its
/// caller: structural anomalies abort the offending budget pass for that
/// input and are logged, deletion failures are logged and the walk goes on.
///
/// Walks are sorted by file name; because every managed name embeds its
/// timestamp, that order is chronological per directory, so the size pass
/// removes oldest files first.
pub struct Pruner {
    inputs: Vec<Input>,
    layout: MediaLayout,
    catalog: Catalog,
    lock: Mutex<()>,
}

impl Pruner {
    pub fn new(inputs: Vec<Input>, layout: MediaLayout, catalog: Catalog) -> Self {
        Self {
            inputs,
            layout,
            catalog,
            lock: Mutex::new(()),
        }
    }

    /// One full prune pass: every input, all four budgets in order.
    pub async fn run(&self) {
        let _guard = self.lock.lock().await;
        debug!(unit = "prune", "performing prune");

        for input in &self.inputs {
            if input.recording_age_limit_hours > 0 {
                self.prune_by_age(
                    input,
                    ArtifactKind::Archive,
                    &self.layout.recording_directory(input),
                    input.recording_age_limit_hours,
                );
            }
            if input.recording_size_limit_megabytes > 0 {
                self.prune_by_size(
                    input,
                    ArtifactKind::Archive,
                    &self.layout.recording_directory(input),
                    input.recording_size_limit_megabytes,
                );
            }
            if input.stream_age_limit_hours > 0 {
                self.prune_by_age(
                    input,
                    ArtifactKind::LiveSegment,
                    &self.layout.stream_segment_directory(input),
                    input.stream_age_limit_hours,
                );
            }
            if input.stream_size_limit_megabytes > 0 {
                self.prune_by_size(
                    input,
                    ArtifactKind::LiveSegment,
                    &self.layout.stream_segment_directory(input),
                    input.stream_size_limit_megabytes,
                );
            }
        }
    }

    fn prune_by_age(&self, input: &Input, kind: ArtifactKind, dir: &Path, limit_hours: u32) {
        let target = Utc::now() - chrono::Duration::hours(i64::from(limit_hours));
        match self.age_pass(input, kind, dir, target) {
            Ok(()) => {
                debug!(
                    unit = "prune",
                    input = %input.id,
                    target = %target,
                    "pruned {}s by date",
                    kind.label()
                );
            }
            Err(err) => {
                error!(
                    unit = "prune",
                    input = %input.id,
                    error = %err,
                    "failed to perform {} date prune",
                    kind.label()
                );
            }
        }
    }

    /// Deletes every artifact dated at or before `target`. Visits the whole
    /// directory rather than stopping at the first kept file, so a stray
    /// out-of-order name cannot shield older files behind it.
    fn age_pass(
        &self,
        input: &Input,
        kind: ArtifactKind,
        dir: &Path,
        target: DateTime<Utc>,
    ) -> Result<(), PruneError> {
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            self.check_structure(input, kind, entry.path(), &name)?;
            let stamp = kind
                .timestamp(&name)
                .map_err(|source| PruneError::Timestamp {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
            if stamp > target {
                continue;
            }
            self.remove_artifact(input, kind, entry.path(), "date");
        }
        Ok(())
    }

    fn prune_by_size(&self, input: &Input, kind: ArtifactKind, dir: &Path, limit_megabytes: u64) {
        let target = limit_megabytes * 1_000_000;
        let size = match directory_size(dir) {
            Ok(size) => size,
            Err(err) => {
                error!(
                    unit = "prune",
                    input = %input.id,
                    error = %err,
                    "failed to get size of {} dir",
                    kind.label()
                );
                return;
            }
        };
        if size <= target {
            return;
        }
        match self.size_pass(input, kind, dir, size, target) {
            Ok(new_size) => {
                debug!(
                    unit = "prune",
                    input = %input.id,
                    target,
                    size,
                    new_size,
                    "pruned {}s by size",
                    kind.label()
                );
            }
            Err(err) => {
                error!(
                    unit = "prune",
                    input = %input.id,
                    error = %err,
                    "failed to perform {} size limit prune",
                    kind.label()
                );
            }
        }
    }

    /// Deletes oldest-first until the running estimate drops to the budget.
    /// The estimate only subtracts deleted sizes; bytes written concurrently
    /// are not seen until the next pass.
    fn size_pass(
        &self,
        input: &Input,
        kind: ArtifactKind,
        dir: &Path,
        size: u64,
        target: u64,
    ) -> Result<u64, PruneError> {
        let mut remaining = size;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            if remaining <= target {
                break;
            }
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            self.check_structure(input, kind, entry.path(), &name)?;
            let file_size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(error) => {
                    warn!(
                        unit = "prune",
                        path = %entry.path().display(),
                        %error,
                        "failed to stat file, skipping"
                    );
                    continue;
                }
            };
            if self.remove_artifact(input, kind, entry.path(), "size") {
                remaining = remaining.saturating_sub(file_size);
            }
        }
        Ok(remaining)
    }

    /// Rejects names that do not belong in a managed directory.
    fn check_structure(
        &self,
        input: &Input,
        kind: ArtifactKind,
        path: &Path,
        name: &str,
    ) -> Result<(), PruneError> {
        if !kind.matches(name) || !name.contains(&input.id) || name.len() < MIN_ARTIFACT_NAME_LEN {
            return Err(PruneError::Unexpected {
                kind: kind.label(),
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Deletes one artifact and, for archive files, drops its catalog entry.
    /// Returns whether the file was actually removed.
    fn remove_artifact(&self, input: &Input, kind: ArtifactKind, path: &Path, reason: &str) -> bool {
        if let Err(error) = fs::remove_file(path) {
            warn!(
                unit = "prune",
                path = %path.display(),
                %error,
                "failed pruning {}, skipping",
                kind.label()
            );
            return false;
        }
        debug!(
            unit = "prune",
            path = %path.display(),
            input = %input.id,
            "pruned {} due to {reason}",
            kind.label()
        );
        if kind == ArtifactKind::Archive {
            self.catalog.remove_path(path);
        }
        true
    }
}

fn directory_size(dir: &Path) -> Result<u64, walkdir::Error> {
    let mut size = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            size += metadata.len();
        }
    }
    Ok(size)
}
