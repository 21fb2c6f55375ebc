use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Input;
use crate::loglines::{pump_stderr, LogTap};
use crate::stream::{RestartFn, SegmentClosedFn, StreamStatus};

/// The capture command, looked up relative to the working directory.
pub const CAPTURE_SCRIPT: &str = "./rtsp-to-hls.sh";

const RESTART_DELAY: Duration = Duration::from_secs(30);

/// Runs one input's capture command in a restart loop.
///
/// Each iteration marks the stream inactive, stamps `last_restart`, spawns
/// the capture command in its own process group with its stderr routed into
/// a [`LogTap`], and installs a restart trigger that kills the whole group.
/// A start failure is recorded and retried immediately; a normal exit waits
/// thirty seconds first. The capture command is expected to be long-running,
/// so no backoff is applied.
pub struct Supervisor {
    input: Input,
    status: Arc<StreamStatus>,
    on_segment_closed: SegmentClosedFn,
    script: PathBuf,
}

impl Supervisor {
    pub fn new(
        input: Input,
        status: Arc<StreamStatus>,
        on_segment_closed: SegmentClosedFn,
    ) -> Self {
        Self {
            input,
            status,
            on_segment_closed,
            script: PathBuf::from(CAPTURE_SCRIPT),
        }
    }

    /// Overrides the capture command; tests point this at a stub script.
    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = script.into();
        self
    }

    pub async fn run(self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                return;
            }

            self.status.active.store(false);
            self.status.last_restart.store(Utc::now());

            let pid_slot: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
            self.install_restart_trigger(pid_slot.clone());

            let mut child = match self.spawn_capture() {
                Ok(child) => child,
                Err(error) => {
                    self.status.last_err.store(error.to_string());
                    error!(stream = %self.input.id, %error, "failed to start capture command");
                    // Retry immediately; the thirty-second delay only
                    // applies after a started command exits.
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            let pid = child.id();
            *pid_slot.lock().unwrap() = pid;
            if let Some(stderr) = child.stderr.take() {
                let tap = LogTap::new(
                    self.input.id.clone(),
                    self.status.clone(),
                    self.on_segment_closed.clone(),
                );
                tokio::spawn(pump_stderr(stderr, tap));
            }

            self.status.active.store(true);
            info!(stream = %self.input.id, "stream active");

            let wait = child.wait();
            tokio::pin!(wait);
            let mut killed = false;
            let exit = loop {
                tokio::select! {
                    exit = &mut wait => break exit,
                    _ = token.cancelled(), if !killed => {
                        // Ambient shutdown: signal the whole group, then
                        // keep waiting so the child is reaped.
                        killed = true;
                        if let Some(pid) = pid {
                            let _ = kill_capture_group(pid);
                        }
                    }
                }
            };
            match exit {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    self.status
                        .last_err
                        .store(format!("capture command exited with {status}"));
                    error!(stream = %self.input.id, %status, "capture command stopped with error");
                }
                Err(error) => {
                    self.status.last_err.store(error.to_string());
                    error!(stream = %self.input.id, %error, "failed to wait for capture command");
                }
            }

            *pid_slot.lock().unwrap() = None;
            self.status.active.store(false);
            info!(stream = %self.input.id, "stream inactive");

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(RESTART_DELAY) => {}
            }
        }
    }

    fn spawn_capture(&self) -> io::Result<tokio::process::Child> {
        let mut command = Command::new(&self.script);
        command
            .env("RTSP_SOURCE", &self.input.url)
            .env("RTSP_NAME", &self.input.id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            command.pre_exec(enter_own_process_group);
        }

        command.spawn()
    }

    /// Installs the restart trigger for the upcoming capture process. The
    /// trigger resolves the pid at invocation time and kills the whole
    /// process group; the supervisor loop then sees the exit and starts a
    /// fresh process. Holding the slot's mutex through the kill keeps
    /// concurrent invocations from racing on the same child.
    fn install_restart_trigger(&self, pid_slot: Arc<Mutex<Option<u32>>>) {
        let stream_id = self.input.id.clone();
        let trigger: RestartFn = Arc::new(move || {
            let guard = pid_slot.lock().unwrap();
            match *guard {
                Some(pid) => match kill_capture_group(pid) {
                    Ok(()) => info!(stream = %stream_id, "performed kill"),
                    Err(error) => {
                        warn!(stream = %stream_id, %error, "failed to kill capture command")
                    }
                },
                None => {
                    warn!(stream = %stream_id, "restart recording was requested, but process is not running")
                }
            }
        });
        self.status.restart.store(Some(trigger));
    }
}

#[cfg(unix)]
fn enter_own_process_group() -> io::Result<()> {
    // Runs between fork and exec; the capture script's own children
    // (ffmpeg) land in the same group so one signal reaches them all.
    if unsafe { libc::setpgid(0, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sends SIGKILL to the process group led by `pid` (best-effort).
#[cfg(unix)]
pub fn kill_capture_group(pid: u32) -> io::Result<()> {
    use std::io::ErrorKind;

    let pgid = unsafe { libc::getpgid(pid as libc::pid_t) };
    if pgid == -1 {
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::NotFound {
            return Err(err);
        }
        return Ok(());
    }
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::NotFound {
            return Err(err);
        }
    }
    Ok(())
}

/// Process-group signalling is unavailable here; the restart trigger cannot
/// reach the capture process and only the supervisor's own wait/kill applies.
#[cfg(not(unix))]
pub fn kill_capture_group(_pid: u32) -> io::Result<()> {
    Ok(())
}
