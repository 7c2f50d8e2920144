// Tokio process runner
// Spawns rsync/ssh/fswatch with a cleared environment plus an allowlist
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use driftsync_core::application::supervisor::constants::{
    DEFAULT_INHERITED_ENV, GRACEFUL_SHUTDOWN_TIMEOUT_MS, KILL_POLL_INTERVAL,
    OUTPUT_CHANNEL_CAPACITY,
};
use driftsync_core::domain::CommandSpec;
use driftsync_core::port::process_runner::{
    ExecutionError, ExecutionResult, ExecutionStatus, OutputLine, ProcessRunner, SpawnedProcess,
};
use driftsync_core::port::TimeProvider;

/// Upper bound on waiting for output readers after the child exited
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Process runner backed by `tokio::process`
///
/// Children start with an empty environment; only allowlisted variables of
/// the current process (plus `CommandSpec::env`) are passed through.
pub struct TokioProcessRunner {
    time_provider: Arc<dyn TimeProvider>,
    env_allowlist: Vec<String>,
}

impl TokioProcessRunner {
    /// Create a new process runner
    ///
    /// # Arguments
    /// * `time_provider` - Time provider for duration tracking
    /// * `env_allowlist` - Variables inherited from the current environment
    ///
    /// # Example
    /// ```ignore
    /// let runner = TokioProcessRunner::new(
    ///     Arc::new(SystemTimeProvider),
    ///     vec!["PATH".to_string(), "HOME".to_string(), "SSH_AUTH_SOCK".to_string()],
    /// );
    /// ```
    pub fn new(time_provider: Arc<dyn TimeProvider>, env_allowlist: Vec<String>) -> Self {
        Self {
            time_provider,
            env_allowlist,
        }
    }

    /// Runner inheriting the default allowlist (PATH, HOME, SSH_AUTH_SOCK, ...)
    pub fn with_default_env(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self::new(
            time_provider,
            DEFAULT_INHERITED_ENV.iter().map(|v| v.to_string()).collect(),
        )
    }

    /// Filter environment variables to allowlist only
    fn filter_env<I>(&self, env: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        env.into_iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .collect()
    }

    fn build_command(&self, cmd: &CommandSpec) -> Command {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .env_clear()
            .envs(self.filter_env(std::env::vars()))
            .envs(&cmd.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cmd.working_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Build execution result from process output
    fn build_result(&self, output: std::process::Output, duration_ms: i64) -> ExecutionResult {
        let status = if output.status.success() {
            ExecutionStatus::Success
        } else if output.status.code().is_none() {
            ExecutionStatus::Killed
        } else {
            ExecutionStatus::Failed
        };

        ExecutionResult {
            status,
            exit_code: output.status.code(),
            duration_ms,
            stdout: Some(String::from_utf8_lossy(&output.stdout).to_string()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        }
    }

    /// Kill process with SIGTERM first, then SIGKILL if needed
    async fn kill_graceful(&self, pid: i32) -> Result<(), ExecutionError> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            info!(pid = %pid, "Sending SIGTERM for graceful shutdown");
            kill(Pid::from_raw(pid), Signal::SIGTERM)
                .map_err(|e| ExecutionError::Killed(format!("SIGTERM failed: {}", e)))?;

            let start_time = self.time_provider.now_millis();
            loop {
                tokio::time::sleep(KILL_POLL_INTERVAL).await;

                if !self.is_alive(pid) {
                    info!(pid = %pid, "Process exited gracefully after SIGTERM");
                    return Ok(());
                }

                if self.time_provider.now_millis() - start_time > GRACEFUL_SHUTDOWN_TIMEOUT_MS {
                    warn!(pid = %pid, "Process did not exit after SIGTERM, sending SIGKILL");
                    kill(Pid::from_raw(pid), Signal::SIGKILL)
                        .map_err(|e| ExecutionError::Killed(format!("SIGKILL failed: {}", e)))?;
                    return Ok(());
                }
            }
        }

        #[cfg(not(unix))]
        {
            Err(ExecutionError::Killed(format!(
                "killing pid {} is only supported on unix",
                pid
            )))
        }
    }
}

/// Forward every line of `reader` until EOF or until the receiver is gone
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<OutputLine>, wrap: fn(String) -> OutputLine)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Output stream read failed");
                break;
            }
        }
    }
}

/// SIGTERM, grace period, then SIGKILL; returns the exit code if any
async fn terminate_child(child: &mut Child) -> Option<i32> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        let grace = Duration::from_millis(GRACEFUL_SHUTDOWN_TIMEOUT_MS as u64);
        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => return status.code(),
            Ok(Err(e)) => warn!(pid = %pid, error = %e, "Waiting for child failed"),
            Err(_) => warn!(pid = %pid, "Child did not exit after SIGTERM, sending SIGKILL"),
        }
    }

    if let Err(e) = child.kill().await {
        warn!(error = %e, "Killing child failed");
    }
    child.wait().await.ok().and_then(|s| s.code())
}

/// Owns a spawned child: forwards its output and stops it on request
async fn supervise_child(
    mut child: Child,
    tx: mpsc::Sender<OutputLine>,
    kill_rx: oneshot::Receiver<()>,
    program: String,
) {
    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(forward_lines(out, tx.clone(), OutputLine::Stdout)));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(forward_lines(err, tx.clone(), OutputLine::Stderr)));

    // A dropped SpawnedProcess closes kill_rx, which also ends up here
    let exit_code = tokio::select! {
        status = child.wait() => status.ok().and_then(|s| s.code()),
        _ = kill_rx => {
            debug!(program = %program, "Terminating child");
            terminate_child(&mut child).await
        }
    };

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        if timeout(READER_DRAIN_TIMEOUT, task).await.is_err() {
            debug!(program = %program, "Output reader still open after exit (inherited pipe)");
        }
    }

    info!(program = %program, exit_code = ?exit_code, "Child exited");
    let _ = tx.send(OutputLine::Exited(exit_code)).await;
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<ExecutionResult, ExecutionError> {
        let start_time = self.time_provider.now_millis();

        debug!(
            command = %cmd.display(),
            timeout_ms = ?cmd.timeout.map(|t| t.as_millis()),
            "Starting subprocess execution"
        );

        let child = self
            .build_command(cmd)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", cmd.program, e)))?;

        let output = match cmd.timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(ExecutionError::IoError(e.to_string())),
                Err(_) => {
                    // Dropping the future drops the child, which kills it
                    warn!(program = %cmd.program, timeout_ms = limit.as_millis() as u64, "Subprocess timed out");
                    return Ok(ExecutionResult {
                        status: ExecutionStatus::Timeout,
                        duration_ms: self.time_provider.now_millis() - start_time,
                        exit_code: None,
                        stdout: None,
                        stderr: None,
                    });
                }
            },
            None => child
                .wait_with_output()
                .await
                .map_err(|e| ExecutionError::IoError(e.to_string()))?,
        };

        let duration_ms = self.time_provider.now_millis() - start_time;
        let result = self.build_result(output, duration_ms);

        debug!(
            program = %cmd.program,
            duration_ms = %duration_ms,
            exit_code = ?result.exit_code,
            status = ?result.status,
            "Subprocess execution completed"
        );

        Ok(result)
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<SpawnedProcess, ExecutionError> {
        let child = self
            .build_command(cmd)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", cmd.program, e)))?;
        let pid = child.id().map(|p| p as i32);

        info!(command = %cmd.display(), pid = ?pid, "Spawned long-running process");

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise_child(child, tx, kill_rx, cmd.program.clone()));

        Ok(SpawnedProcess::new(pid, rx, kill_tx))
    }

    async fn kill(&self, pid: i32) -> Result<(), ExecutionError> {
        self.kill_graceful(pid).await
    }

    fn is_alive(&self, pid: i32) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            // Signal 0 checks if process exists without actually sending a signal
            kill(Pid::from_raw(pid), None).is_ok()
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            false
        }
    }
}
