use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::catalog::{parse_archive_timestamp, Catalog, Recording, TimestampError};
use crate::config::{Input, MediaLayout};
use crate::exec::{run_with_timeout, CommandExecutor, TOOL_TIMEOUT};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error("failed to parse ffprobe output: {0}")]
    ProbeOutput(#[from] serde_json::Error),
    #[error("failed to parse ffprobe duration {raw:?}: {source}")]
    ProbeDuration {
        raw: String,
        source: std::num::ParseFloatError,
    },
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: String,
}

/// One-shot startup pass that seeds the catalog from archive files already
/// on disk.
///
/// Each file is probed for its container duration to reconstruct the
/// recording's end instant. Files ffprobe cannot read (partial recordings
/// exit non-zero) are skipped with a warning; they simply do not appear in
/// the catalog. After each input's walk a sort is requested, establishing
/// chronological order over the historical entries.
pub struct CatalogLoader {
    inputs: Vec<Input>,
    layout: MediaLayout,
    catalog: Catalog,
    executor: Arc<dyn CommandExecutor>,
}

impl CatalogLoader {
    pub fn new(
        inputs: Vec<Input>,
        layout: MediaLayout,
        catalog: Catalog,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            inputs,
            layout,
            catalog,
            executor,
        }
    }

    pub async fn run(self) {
        for input in &self.inputs {
            if let Err(error) = self.load_input(input).await {
                warn!(input = %input.id, %error, "failed to parse old recordings, ignoring");
            }
            self.catalog.request_sort();
        }
    }

    async fn load_input(&self, input: &Input) -> Result<(), LoaderError> {
        let dir = self.layout.recording_directory(input);
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".mp4") || !name.contains(&input.id) {
                continue;
            }
            let start = parse_archive_timestamp(&name)?;

            let duration = match self.probe_duration(entry.path()).await {
                Ok(duration) => duration,
                Err(ProbeFailure::Command(error)) => {
                    warn!(
                        path = %entry.path().display(),
                        %error,
                        "failed to run ffprobe on old recording, will not appear in UI, ignoring"
                    );
                    continue;
                }
                Err(ProbeFailure::Output(error)) => return Err(error),
            };
            let end = start + chrono::Duration::seconds(duration.trunc() as i64);

            self.catalog.append(Recording {
                id: name.clone(),
                input_id: input.id.clone(),
                start,
                end,
                path: entry.path().to_path_buf(),
            });
            debug!(input = %input.id, recording = %name, "loaded recording");
        }
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, ProbeFailure> {
        let mut command = Command::new("ffprobe");
        command
            .arg(path)
            .arg("-v")
            .arg("quiet")
            .arg("-of")
            .arg("json")
            .arg("-show_entries")
            .arg("format");
        let output = run_with_timeout(self.executor.as_ref(), &mut command, TOOL_TIMEOUT)
            .await
            .map_err(|error| ProbeFailure::Command(error.to_string()))?;
        if !output.status.success() {
            return Err(ProbeFailure::Command(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }
        let parsed: ProbeOutput =
            serde_json::from_slice(&output.stdout).map_err(|source| {
                ProbeFailure::Output(LoaderError::ProbeOutput(source))
            })?;
        let duration = parsed
            .format
            .duration
            .parse::<f64>()
            .map_err(|source| {
                ProbeFailure::Output(LoaderError::ProbeDuration {
                    raw: parsed.format.duration.clone(),
                    source,
                })
            })?;
        Ok(duration)
    }
}

/// Splits probe failures into the recoverable kind (skip the file) and the
/// structural kind (abort this input's walk).
enum ProbeFailure {
    Command(String),
    Output(LoaderError),
}
