//! Subprocess executor for planned commands.
//!
//! Each command runs as `<shell> -o pipefail -c <command>` in its own process
//! group, so a timeout or cancellation can take down the whole pipeline:
//! SIGTERM to the group, a grace period, then SIGKILL.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ExecOutput, ShellExecutor};
use crate::config::ExecutorSettings;
use crate::domain::InterruptReason;

/// How long to wait for pipe readers once the process is gone
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Shell executor backed by real subprocesses
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    shell: String,
    pipefail: bool,
    grace_period: Duration,
    kubeconfig: Option<PathBuf>,
}

impl Default for SubprocessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessExecutor {
    /// Executor using `/bin/bash` with pipefail and a 3 second grace period
    pub fn new() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            pipefail: true,
            grace_period: Duration::from_secs(3),
            kubeconfig: None,
        }
    }

    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self {
            shell: settings.shell.clone(),
            pipefail: settings.pipefail,
            grace_period: settings.grace_period(),
            kubeconfig: settings.kubeconfig.clone(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Disable `-o pipefail` (for shells that do not support it)
    pub fn with_pipefail(mut self, pipefail: bool) -> Self {
        self.pipefail = pipefail;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    fn build_command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        if self.pipefail {
            cmd.args(["-o", "pipefail"]);
        }
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig);
        }
        cmd
    }

    /// SIGTERM the process group, wait the grace period, then SIGKILL
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                let group = Pid::from_raw(pid as i32);
                if let Err(e) = killpg(group, Signal::SIGTERM) {
                    debug!(pid, error = %e, "SIGTERM to process group failed");
                }

                let exited = tokio::time::timeout(self.grace_period, child.wait())
                    .await
                    .is_ok();
                if !exited {
                    warn!(pid, grace_ms = self.grace_period.as_millis() as u64, "Process ignored SIGTERM, killing");
                }

                // Stragglers in the group get SIGKILL either way
                let _ = killpg(group, Signal::SIGKILL);
            }
        }

        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[async_trait]
impl ShellExecutor for SubprocessExecutor {
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        let started = Instant::now();
        let mut child = self
            .build_command(command)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for command: {}", self.shell, command))?;

        debug!(pid = child.id(), command = %command, "Spawned command");

        let stdout_buf: SharedBuf = Arc::default();
        let stderr_buf: SharedBuf = Arc::default();
        let stdout_reader = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(drain(pipe, Arc::clone(&stdout_buf))));
        let stderr_reader = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(drain(pipe, Arc::clone(&stderr_buf))));

        let mut return_code = None;
        let interrupted = tokio::select! {
            status = child.wait() => {
                let status = status.with_context(|| format!("Failed to wait for command: {}", command))?;
                return_code = status.code();
                None
            }
            _ = tokio::time::sleep(timeout) => Some(InterruptReason::Timeout),
            _ = cancel.cancelled() => Some(InterruptReason::Cancelled),
        };

        if let Some(reason) = interrupted {
            warn!(command = %command, reason = ?reason, "Interrupting command");
            self.terminate(&mut child).await;
        }

        join_reader(stdout_reader).await;
        join_reader(stderr_reader).await;

        let stdout = take_text(&stdout_buf);
        let mut stderr = take_text(&stderr_buf);
        if stderr.is_empty() {
            stderr = failure_message(return_code, interrupted, timeout);
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            return_code,
            elapsed: started.elapsed(),
            interrupted,
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R, buf: SharedBuf) {
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(&chunk[..n]),
        }
    }
}

/// Wait briefly for a pipe reader; background grandchildren may hold the pipe open
async fn join_reader(reader: Option<JoinHandle<()>>) {
    if let Some(mut handle) = reader {
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut handle).await.is_err() {
            handle.abort();
        }
    }
}

fn take_text(buf: &SharedBuf) -> String {
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(|e| e.into_inner()));
    String::from_utf8_lossy(&bytes).trim().to_string()
}

/// Stand-in stderr for failures that printed nothing
fn failure_message(
    return_code: Option<i32>,
    interrupted: Option<InterruptReason>,
    timeout: Duration,
) -> String {
    match (interrupted, return_code) {
        (Some(InterruptReason::Timeout), _) => {
            format!("command timed out after {}s", timeout.as_secs_f64())
        }
        (Some(InterruptReason::Cancelled), _) => "command cancelled".to_string(),
        (None, Some(0)) => String::new(),
        (None, Some(code)) => format!("command failed with exit code {}", code),
        (None, None) => "command terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message() {
        let t = Duration::from_secs(2);
        assert_eq!(failure_message(Some(0), None, t), "");
        assert_eq!(failure_message(Some(3), None, t), "command failed with exit code 3");
        assert_eq!(failure_message(None, None, t), "command terminated by signal");
        assert_eq!(
            failure_message(None, Some(InterruptReason::Timeout), t),
            "command timed out after 2s"
        );
        assert_eq!(
            failure_message(None, Some(InterruptReason::Cancelled), t),
            "command cancelled"
        );
    }

    #[test]
    fn test_builder() {
        let executor = SubprocessExecutor::new()
            .with_shell("/bin/sh")
            .with_pipefail(false)
            .with_grace_period(Duration::from_millis(200))
            .with_kubeconfig("/tmp/kubeconfig");

        assert_eq!(executor.shell, "/bin/sh");
        assert!(!executor.pipefail);
        assert_eq!(executor.grace_period, Duration::from_millis(200));
        assert_eq!(executor.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_command() {
        let executor = SubprocessExecutor::new().with_shell("/bin/sh").with_pipefail(false);
        let out = executor
            .run("echo hello; echo oops >&2; exit 2", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "oops");
        assert_eq!(out.return_code, Some(2));
        assert!(!out.success());
    }
}
