use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::catalog::{Catalog, Recording};
use crate::config::{Config, MediaLayout};
use crate::exec::{CommandExecutor, SystemCommandExecutor};
use crate::loader::CatalogLoader;
use crate::monitor;
use crate::prune::Pruner;
use crate::stream::{SegmentClosedFn, Stream, StreamStatus};
use crate::supervisor::{Supervisor, CAPTURE_SCRIPT};
use crate::thumbs::thumbnail_queue;

const CAPTURE_SCRIPT_SOURCE: &str = include_str!("../assets/rtsp-to-hls.sh");

/// Writes the embedded capture script to the working directory when no
/// `rtsp-to-hls.sh` is present, so a bare deployment records out of the box.
pub fn ensure_capture_script() -> io::Result<()> {
    let path = Path::new(CAPTURE_SCRIPT);
    if path.exists() {
        return Ok(());
    }
    warn!("rtsp-to-hls.sh not found, using embedded copy");
    std::fs::write(path, CAPTURE_SCRIPT_SOURCE)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Builds and starts the engine: one supervisor and thumbnail worker per
/// input, the catalog writer, the liveness monitor, the startup catalog
/// loader, and the pruner.
pub struct EngineBuilder {
    config: Config,
    layout: MediaLayout,
    executor: Arc<dyn CommandExecutor>,
    capture_script: PathBuf,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            layout: MediaLayout::default(),
            executor: Arc::new(SystemCommandExecutor),
            capture_script: PathBuf::from(CAPTURE_SCRIPT),
        }
    }

    /// Overrides where media directories live; tests use a temp dir.
    pub fn layout(mut self, layout: MediaLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Overrides how ffmpeg and ffprobe run; tests inject fakes.
    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Overrides the capture command; tests point this at a stub script.
    pub fn capture_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.capture_script = script.into();
        self
    }

    pub fn start(self, token: CancellationToken) -> Engine {
        let (catalog, writer) = Catalog::new();
        tokio::spawn(writer.run());

        let mut streams = Vec::with_capacity(self.config.inputs.len());
        for input in &self.config.inputs {
            let status = Arc::new(StreamStatus::new());

            let (thumb_tx, thumb_worker) = thumbnail_queue(self.executor.clone());
            tokio::spawn(thumb_worker.run());

            let on_segment_closed: SegmentClosedFn = {
                let catalog = catalog.clone();
                let input_id = input.id.clone();
                Arc::new(move |opened, segment: &str| {
                    catalog.append(Recording {
                        id: Path::new(segment)
                            .file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                            .unwrap_or_else(|| segment.to_string()),
                        input_id: input_id.clone(),
                        start: opened,
                        end: Utc::now(),
                        path: PathBuf::from(segment),
                    });
                    let _ = thumb_tx.send(PathBuf::from(segment));
                })
            };

            let supervisor = Supervisor::new(input.clone(), status.clone(), on_segment_closed)
                .with_script(&self.capture_script);
            tokio::spawn(supervisor.run(token.clone()));

            streams.push(Stream {
                input: input.clone(),
                status,
            });
        }
        let streams = Arc::new(streams);

        tokio::spawn(monitor::run(streams.clone(), token.clone()));

        let loader = CatalogLoader::new(
            self.config.inputs.clone(),
            self.layout.clone(),
            catalog.clone(),
            self.executor.clone(),
        );
        tokio::spawn(loader.run());

        let pruner = Arc::new(Pruner::new(
            self.config.inputs.clone(),
            self.layout.clone(),
            catalog.clone(),
        ));
        {
            let pruner = pruner.clone();
            tokio::spawn(async move { pruner.run().await });
        }
        if self.config.prune_interval_minutes > 0 {
            let interval = Duration::from_secs(self.config.prune_interval_minutes * 60);
            let pruner = pruner.clone();
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(interval) => pruner.run().await,
                    }
                }
            });
        }

        Engine {
            streams,
            catalog,
            layout: self.layout,
            pruner,
        }
    }
}

/// Handles to the running engine, consumed by the HTTP surface and tests.
pub struct Engine {
    pub streams: Arc<Vec<Stream>>,
    pub catalog: Catalog,
    pub layout: MediaLayout,
    pub pruner: Arc<Pruner>,
}
