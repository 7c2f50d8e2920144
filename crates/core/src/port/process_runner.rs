// Process Runner Port
// Abstraction over one-shot commands (rsync, ssh) and long-running watchers (fswatch)

use crate::domain::CommandSpec;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Result of a one-shot execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Timeout,
    Killed,
}

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(i64),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// One line of output from a spawned process, or its exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
    /// Always the last item; `None` when killed by a signal
    Exited(Option<i32>),
}

/// Handle to a long-running child process
///
/// Output arrives line by line. Dropping the handle terminates the process.
pub struct SpawnedProcess {
    pid: Option<i32>,
    output: mpsc::Receiver<OutputLine>,
    kill: Option<oneshot::Sender<()>>,
}

impl SpawnedProcess {
    pub fn new(
        pid: Option<i32>,
        output: mpsc::Receiver<OutputLine>,
        kill: oneshot::Sender<()>,
    ) -> Self {
        Self {
            pid,
            output,
            kill: Some(kill),
        }
    }

    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Next output line; `None` once the stream is closed
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.output.recv().await
    }

    /// Next already-buffered line, without waiting
    pub fn try_next_line(&mut self) -> Option<OutputLine> {
        self.output.try_recv().ok()
    }

    /// Ask the runner to stop the process (idempotent)
    pub fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.kill.is_none()
    }
}

/// Process Runner trait
///
/// Implementations:
/// - TokioProcessRunner (infra-system): real child processes
/// - mocks::ScriptedRunner: scripted results for supervisor tests
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command to completion, honoring `cmd.timeout`
    ///
    /// A non-zero exit is NOT an error: it is reported through
    /// `ExecutionResult::status`. Timeouts are reported as `ExecutionStatus::Timeout`.
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the process cannot be started
    /// - ExecutionError::IoError if waiting on the process fails
    async fn run(&self, cmd: &CommandSpec) -> Result<ExecutionResult, ExecutionError>;

    /// Start a long-running command and stream its output
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the process cannot be started
    async fn spawn(&self, cmd: &CommandSpec) -> Result<SpawnedProcess, ExecutionError>;

    /// Kill a process by PID (SIGTERM, grace period, then SIGKILL)
    async fn kill(&self, pid: i32) -> Result<(), ExecutionError>;

    /// Check if a process is still alive
    fn is_alive(&self, pid: i32) -> bool;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    type Scripted = Result<ExecutionResult, ExecutionError>;

    pub fn ok_result() -> ExecutionResult {
        ExecutionResult {
            status: ExecutionStatus::Success,
            duration_ms: 1,
            exit_code: Some(0),
            stdout: Some(String::new()),
            stderr: Some(String::new()),
        }
    }

    pub fn failed_result(exit_code: i32, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            status: ExecutionStatus::Failed,
            duration_ms: 1,
            exit_code: Some(exit_code),
            stdout: Some(String::new()),
            stderr: Some(stderr.to_string()),
        }
    }

    /// Test-side end of a spawned mock process
    pub struct WatcherHandle {
        lines: mpsc::Sender<OutputLine>,
        killed: oneshot::Receiver<()>,
    }

    impl WatcherHandle {
        /// Emit a change notification (stdout line)
        pub async fn notify(&self, line: &str) {
            let _ = self.lines.send(OutputLine::Stdout(line.to_string())).await;
        }

        pub async fn stderr(&self, line: &str) {
            let _ = self.lines.send(OutputLine::Stderr(line.to_string())).await;
        }

        pub async fn exit(&self, code: Option<i32>) {
            let _ = self.lines.send(OutputLine::Exited(code)).await;
        }

        /// True once the supervisor terminated or dropped the process
        pub fn is_killed(&mut self) -> bool {
            !matches!(
                self.killed.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            )
        }
    }

    /// Runner answering from per-program scripts
    ///
    /// `run` pops the next scripted result for the program, falling back to the
    /// program's default (success unless overridden). `spawn` creates a mock
    /// process whose output the test drives through a `WatcherHandle`.
    #[derive(Default)]
    pub struct ScriptedRunner {
        scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
        defaults: Mutex<HashMap<String, Scripted>>,
        spawn_failures: Mutex<VecDeque<ExecutionError>>,
        invocations: Mutex<Vec<CommandSpec>>,
        watchers: Mutex<Vec<Option<WatcherHandle>>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_result(&self, program: &str, result: ExecutionResult) {
            self.scripts
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push_back(Ok(result));
        }

        pub fn push_error(&self, program: &str, error: ExecutionError) {
            self.scripts
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push_back(Err(error));
        }

        pub fn set_default(&self, program: &str, result: ExecutionResult) {
            self.defaults
                .lock()
                .unwrap()
                .insert(program.to_string(), Ok(result));
        }

        pub fn fail_next_spawn(&self, error: ExecutionError) {
            self.spawn_failures.lock().unwrap().push_back(error);
        }

        pub fn invocations(&self) -> Vec<CommandSpec> {
            self.invocations.lock().unwrap().clone()
        }

        pub fn count(&self, program: &str) -> usize {
            self.invocations
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.program == program)
                .count()
        }

        pub fn spawn_count(&self) -> usize {
            self.watchers.lock().unwrap().len()
        }

        /// Wait until the `index`-th (0-based) process is spawned, then take its handle
        pub async fn take_watcher(&self, index: usize) -> WatcherHandle {
            loop {
                if let Some(handle) = self
                    .watchers
                    .lock()
                    .unwrap()
                    .get_mut(index)
                    .and_then(Option::take)
                {
                    return handle;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        /// Wait until `program` has been run at least `n` times
        pub async fn wait_for_runs(&self, program: &str, n: usize) {
            while self.count(program) < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, cmd: &CommandSpec) -> Result<ExecutionResult, ExecutionError> {
            self.invocations.lock().unwrap().push(cmd.clone());

            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&cmd.program)
                .and_then(VecDeque::pop_front);
            match scripted {
                Some(result) => result,
                None => self
                    .defaults
                    .lock()
                    .unwrap()
                    .get(&cmd.program)
                    .cloned()
                    .unwrap_or_else(|| Ok(ok_result())),
            }
        }

        async fn spawn(&self, cmd: &CommandSpec) -> Result<SpawnedProcess, ExecutionError> {
            self.invocations.lock().unwrap().push(cmd.clone());

            if let Some(error) = self.spawn_failures.lock().unwrap().pop_front() {
                return Err(error);
            }

            let (line_tx, line_rx) = mpsc::channel(64);
            let (kill_tx, kill_rx) = oneshot::channel();
            self.watchers.lock().unwrap().push(Some(WatcherHandle {
                lines: line_tx,
                killed: kill_rx,
            }));
            Ok(SpawnedProcess::new(None, line_rx, kill_tx))
        }

        async fn kill(&self, _pid: i32) -> Result<(), ExecutionError> {
            Ok(())
        }

        fn is_alive(&self, _pid: i32) -> bool {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;

    #[tokio::test]
    async fn test_scripted_results_then_default() {
        let runner = ScriptedRunner::new();
        runner.push_result("rsync", failed_result(12, "boom"));

        let cmd = CommandSpec::new("rsync");
        let first = runner.run(&cmd).await.unwrap();
        let second = runner.run(&cmd).await.unwrap();

        assert_eq!(first.exit_code, Some(12));
        assert_eq!(second.status, ExecutionStatus::Success);
        assert_eq!(runner.count("rsync"), 2);
    }

    #[tokio::test]
    async fn test_spawned_process_streams_and_terminates() {
        let runner = ScriptedRunner::new();
        let mut process = runner.spawn(&CommandSpec::new("fswatch")).await.unwrap();
        let mut handle = runner.take_watcher(0).await;

        handle.notify("1").await;
        assert_eq!(
            process.next_line().await,
            Some(OutputLine::Stdout("1".to_string()))
        );
        assert_eq!(process.try_next_line(), None);

        assert!(!handle.is_killed());
        process.terminate();
        assert!(process.is_terminated());
        assert!(handle.is_killed());
    }

    #[tokio::test]
    async fn test_dropping_process_counts_as_kill() {
        let runner = ScriptedRunner::new();
        let process = runner.spawn(&CommandSpec::new("fswatch")).await.unwrap();
        let mut handle = runner.take_watcher(0).await;

        drop(process);
        assert!(handle.is_killed());
    }
}
