// Sync Worker - drives mkdir/rsync/fswatch for one service

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::supervisor::constants::MAX_BATCH_COALESCE;
use crate::domain::command::{mkdir_command, rsync_command, watch_command};
use crate::domain::{FailureDetector, FailureKind, ServiceSpec, SyncOutcome, ToolPaths};
use crate::port::{ExecutionError, OutputLine, ProcessRunner, SpawnedProcess, TimeProvider};

/// Outcome of one sync invocation with its wall time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub duration_ms: i64,
}

/// Result of draining a watcher batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Change notifications coalesced (including the one that woke us up)
    pub notifications: usize,
    /// Non-notification lines met while draining (stderr, exit)
    pub pending: Vec<OutputLine>,
}

/// Executes the external tools of one service and classifies their results
pub struct SyncWorker {
    spec: Arc<ServiceSpec>,
    tools: Arc<ToolPaths>,
    runner: Arc<dyn ProcessRunner>,
    detector: FailureDetector,
    time_provider: Arc<dyn TimeProvider>,
}

impl SyncWorker {
    pub fn new(
        spec: Arc<ServiceSpec>,
        tools: Arc<ToolPaths>,
        runner: Arc<dyn ProcessRunner>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let detector = FailureDetector::new(&spec.failure_patterns);
        Self {
            spec,
            tools,
            runner,
            detector,
            time_provider,
        }
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn detector(&self) -> &FailureDetector {
        &self.detector
    }

    /// Create the destination directory on the remote
    pub async fn prepare_remote(&self) -> SyncReport {
        let cmd = mkdir_command(&self.spec, &self.tools);
        debug!(service = %self.spec.name, command = %cmd.display(), "Preparing remote directory");
        self.run_classified(&cmd).await
    }

    /// Full-tree rsync
    pub async fn full_sync(&self) -> SyncReport {
        let cmd = rsync_command(&self.spec, &self.tools);
        debug!(service = %self.spec.name, command = %cmd.display(), "Running rsync");
        let report = self.run_classified(&cmd).await;

        match &report.outcome {
            SyncOutcome::Success => info!(
                service = %self.spec.name,
                duration_ms = report.duration_ms,
                "Sync completed"
            ),
            SyncOutcome::Partial(code) => warn!(
                service = %self.spec.name,
                exit_code = code,
                "Sync completed partially (files vanished or were unreadable)"
            ),
            SyncOutcome::Failure { kind, reason } => warn!(
                service = %self.spec.name,
                kind = %kind,
                reason = %reason,
                "Sync failed"
            ),
        }
        report
    }

    /// Spawn the file watcher
    pub async fn start_watcher(&self) -> Result<SpawnedProcess, ExecutionError> {
        let cmd = watch_command(&self.spec, &self.tools);
        info!(service = %self.spec.name, command = %cmd.display(), "Starting watcher");
        self.runner.spawn(&cmd).await
    }

    /// Coalesce change notifications already queued behind the first one
    ///
    /// Stops at the first non-stdout line so that watcher errors and exits are
    /// still seen by the caller, in order.
    pub fn drain_batch(&self, watcher: &mut SpawnedProcess) -> Batch {
        let mut batch = Batch {
            notifications: 1,
            pending: Vec::new(),
        };
        while batch.notifications < MAX_BATCH_COALESCE {
            match watcher.try_next_line() {
                Some(OutputLine::Stdout(_)) => batch.notifications += 1,
                Some(other) => {
                    batch.pending.push(other);
                    break;
                }
                None => break,
            }
        }
        batch
    }

    async fn run_classified(&self, cmd: &crate::domain::CommandSpec) -> SyncReport {
        let start = self.time_provider.now_millis();
        let outcome = match self.runner.run(cmd).await {
            Ok(result) => self.detector.classify(&result),
            Err(ExecutionError::SpawnFailed(reason)) => SyncOutcome::Failure {
                kind: FailureKind::Fatal,
                reason: format!("cannot start {}: {}", cmd.program, reason),
            },
            Err(ExecutionError::Timeout(ms)) => SyncOutcome::Failure {
                kind: FailureKind::Unreachable,
                reason: format!("{} timed out after {}ms", cmd.program, ms),
            },
            Err(e) => SyncOutcome::Failure {
                kind: FailureKind::Transient,
                reason: e.to_string(),
            },
        };
        SyncReport {
            outcome,
            duration_ms: self.time_provider.now_millis() - start,
        }
    }
}
