use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::warn;

use crate::exec::{run_with_timeout, CommandExecutor, TOOL_TIMEOUT};

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg exited with status {status:?}")]
    CommandFailure { status: Option<i32> },
}

/// Thumbnail location for an archive segment: the segment path with `.jpg`
/// appended, so `doorbell-….mp4` gets `doorbell-….mp4.jpg` beside it.
pub fn thumbnail_path(segment: &Path) -> PathBuf {
    let mut name = segment.as_os_str().to_os_string();
    name.push(".jpg");
    PathBuf::from(name)
}

/// Serial queue generating a still image for each newly closed segment.
///
/// One worker runs per stream; failures are logged and dropped, since
/// thumbnails are a convenience rather than part of the recording.
pub struct ThumbnailWorker {
    executor: Arc<dyn CommandExecutor>,
    rx: mpsc::UnboundedReceiver<PathBuf>,
}

/// Creates the queue feeding a [`ThumbnailWorker`].
pub fn thumbnail_queue(
    executor: Arc<dyn CommandExecutor>,
) -> (mpsc::UnboundedSender<PathBuf>, ThumbnailWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ThumbnailWorker { executor, rx })
}

impl ThumbnailWorker {
    pub async fn run(mut self) {
        while let Some(segment) = self.rx.recv().await {
            if let Err(error) = self.generate(&segment).await {
                warn!(
                    segment = %segment.display(),
                    %error,
                    "failed to generate thumbnail, ignoring"
                );
            }
        }
    }

    /// Extracts one frame scaled to fit 256x192, preserving aspect ratio.
    async fn generate(&self, segment: &Path) -> Result<(), ThumbnailError> {
        let mut command = Command::new("ffmpeg");
        command
            .arg("-i")
            .arg(segment)
            .arg("-vframes")
            .arg("1")
            .arg("-vf")
            .arg("scale=256:192:force_original_aspect_ratio=decrease")
            .arg(thumbnail_path(segment));
        let output = run_with_timeout(self.executor.as_ref(), &mut command, TOOL_TIMEOUT).await?;
        if !output.status.success() {
            return Err(ThumbnailError::CommandFailure {
                status: output.status.code(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    #[cfg(unix)]
    use std::os::unix::process::ExitStatusExt;
    #[cfg(windows)]
    use std::os::windows::process::ExitStatusExt;

    struct RecordingExecutor {
        commands: Mutex<Vec<Vec<String>>>,
        exit_code: i32,
    }

    impl RecordingExecutor {
        fn new(exit_code: i32) -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                exit_code,
            })
        }
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
            let std_command = command.as_std();
            let mut rendered = vec![std_command.get_program().to_string_lossy().into_owned()];
            rendered.extend(
                std_command
                    .get_args()
                    .map(|arg| arg.to_string_lossy().into_owned()),
            );
            self.commands.lock().unwrap().push(rendered);
            Ok(std::process::Output {
                status: std::process::ExitStatus::from_raw(self.exit_code),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    #[test]
    fn thumbnail_sits_next_to_segment() {
        assert_eq!(
            thumbnail_path(Path::new("media/doorbell/archive/doorbell-2025-04-23-21-09-05.mp4")),
            PathBuf::from("media/doorbell/archive/doorbell-2025-04-23-21-09-05.mp4.jpg")
        );
    }

    #[tokio::test]
    async fn worker_invokes_ffmpeg_with_scale_filter() {
        let executor = RecordingExecutor::new(0);
        let (tx, worker) = thumbnail_queue(executor.clone());
        let handle = tokio::spawn(worker.run());

        tx.send(PathBuf::from("media/doorbell/archive/doorbell-2025-04-23-21-09-05.mp4"))
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        let commands = executor.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            vec![
                "ffmpeg".to_string(),
                "-i".into(),
                "media/doorbell/archive/doorbell-2025-04-23-21-09-05.mp4".into(),
                "-vframes".into(),
                "1".into(),
                "-vf".into(),
                "scale=256:192:force_original_aspect_ratio=decrease".into(),
                "media/doorbell/archive/doorbell-2025-04-23-21-09-05.mp4.jpg".into(),
            ]
        );
    }

    #[tokio::test]
    async fn failures_are_dropped_and_the_queue_keeps_going() {
        let executor = RecordingExecutor::new(1 << 8);
        let (tx, worker) = thumbnail_queue(executor.clone());
        let handle = tokio::spawn(worker.run());

        tx.send(PathBuf::from("a-2025-04-23-21-09-05.mp4")).unwrap();
        tx.send(PathBuf::from("a-2025-04-23-21-14-05.mp4")).unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(executor.commands.lock().unwrap().len(), 2);
    }
}
