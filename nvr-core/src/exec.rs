use std::io;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

/// Timeout applied to every external tool invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs external commands; injectable so tests can fake ffmpeg and ffprobe.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<Output> {
        command.output().await
    }
}

/// Runs `command` through `executor`, killing it if it outlives `limit`.
pub async fn run_with_timeout(
    executor: &dyn CommandExecutor,
    command: &mut Command,
    limit: Duration,
) -> io::Result<Output> {
    command.kill_on_drop(true);
    match timeout(limit, executor.run(command)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("command did not finish within {}s", limit.as_secs()),
        )),
    }
}
