// Supervisor - per-service supervision loop
//
// WAITING_FOR_REMOTE -> SYNCING -> WATCHING -> (teardown) RESTARTING -> WAITING_FOR_REMOTE ...
// Shutdown at any await point ends in STOPPED; fatal failures and an exhausted
// restart budget end in FAILED.

pub mod constants;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::events::{EventBus, EventKind, StatusBoard, SupervisorEvent, SyncTrigger};
use crate::application::restart::{RestartDecision, RestartPolicy};
use crate::application::sync_worker::{SyncReport, SyncWorker};
use crate::application::watchdog::{Watchdog, WatchdogVerdict};
use crate::domain::{
    FailureKind, ServiceSpec, ServiceState, ServiceStatus, SyncOutcome, ToolPaths,
};
use crate::error::Result;
use crate::port::{
    IdProvider, OutputLine, ProcessRunner, ReachabilityProbe, SpawnedProcess, TimeProvider,
};

/// Shared dependencies of every supervisor in a fleet
#[derive(Clone)]
pub struct SupervisorContext {
    pub tools: Arc<ToolPaths>,
    pub runner: Arc<dyn ProcessRunner>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_provider: Arc<dyn IdProvider>,
    pub events: EventBus,
    pub board: StatusBoard,
}

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunEnd {
    Shutdown,
    /// Restartable: remote gone, watcher died, repeated sync failures
    Teardown(String),
    Fatal(String),
}

/// Supervises one service until shutdown or permanent failure
pub struct Supervisor {
    spec: Arc<ServiceSpec>,
    worker: SyncWorker,
    watchdog: Watchdog,
    policy: RestartPolicy,
    ctx: SupervisorContext,
    status: ServiceStatus,
}

impl Supervisor {
    pub fn new(spec: Arc<ServiceSpec>, ctx: SupervisorContext) -> Self {
        let worker = SyncWorker::new(
            Arc::clone(&spec),
            Arc::clone(&ctx.tools),
            Arc::clone(&ctx.runner),
            Arc::clone(&ctx.time_provider),
        );
        let watchdog = Watchdog::new(
            Arc::clone(&ctx.probe),
            spec.supervision.unreachable_threshold,
        );
        let policy = RestartPolicy::from_settings(&spec.supervision);
        let status = ServiceStatus::new(spec.name.clone(), ctx.time_provider.now_millis());
        ctx.board.update(status.clone());

        Self {
            spec,
            worker,
            watchdog,
            policy,
            ctx,
            status,
        }
    }

    pub fn status(&self) -> &ServiceStatus {
        &self.status
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.spec.supervision.poll_interval_ms)
    }

    /// Run the supervision loop with graceful shutdown support
    ///
    /// Returns the final status (STOPPED or FAILED). Errors are reserved for
    /// broken invariants (illegal state transitions), never for sync failures.
    pub async fn run(mut self, mut shutdown: ShutdownToken) -> Result<ServiceStatus> {
        info!(service = %self.spec.name, "Supervisor started");
        self.transition(ServiceState::WaitingForRemote)?;
        let mut attempt: u32 = 0;

        let poll_interval = self.poll_interval();

        loop {
            let reachable = self
                .watchdog
                .wait_until_reachable(&self.spec, poll_interval, &mut shutdown)
                .await;
            if !reachable {
                self.transition(ServiceState::Stopped)?;
                break;
            }

            self.status.run_id = Some(self.ctx.id_provider.generate_id());
            self.transition(ServiceState::Syncing)?;
            let run_started = self.ctx.time_provider.now_millis();

            match self.run_pipeline(&mut shutdown).await? {
                RunEnd::Shutdown => {
                    self.transition(ServiceState::Stopped)?;
                    break;
                }
                RunEnd::Fatal(reason) => {
                    error!(service = %self.spec.name, reason = %reason, "Fatal failure, giving up");
                    self.give_up(reason)?;
                    break;
                }
                RunEnd::Teardown(reason) => {
                    warn!(service = %self.spec.name, reason = %reason, "Pipeline torn down");
                    self.status.last_error = Some(reason);
                    self.transition(ServiceState::Restarting)?;

                    let ran_for = self.ctx.time_provider.now_millis() - run_started;
                    if self.policy.should_reset(ran_for) {
                        attempt = 0;
                    }

                    match self.policy.decide(&self.spec.name, attempt) {
                        RestartDecision::GiveUp => {
                            let reason = format!(
                                "restart limit reached: {}",
                                self.status.last_error.clone().unwrap_or_default()
                            );
                            self.give_up(reason)?;
                            break;
                        }
                        RestartDecision::Restart(delay_ms) => {
                            attempt += 1;
                            self.status.restarts += 1;
                            self.publish(EventKind::Restarting { attempt, delay_ms });

                            tokio::select! {
                                _ = sleep(Duration::from_millis(delay_ms)) => {},
                                _ = shutdown.wait() => {
                                    self.transition(ServiceState::Stopped)?;
                                    break;
                                }
                            }
                            self.transition(ServiceState::WaitingForRemote)?;
                        }
                    }
                }
            }
        }

        info!(
            service = %self.spec.name,
            state = %self.status.state,
            restarts = self.status.restarts,
            "Supervisor stopped"
        );
        Ok(self.status)
    }

    /// One pipeline run: initial sync, then watch until something ends it
    async fn run_pipeline(&mut self, shutdown: &mut ShutdownToken) -> Result<RunEnd> {
        let prepared = tokio::select! {
            report = self.worker.prepare_remote() => report,
            _ = shutdown.wait() => return Ok(RunEnd::Shutdown),
        };
        if let SyncOutcome::Failure { kind, reason } = prepared.outcome {
            self.publish(EventKind::SyncFailed {
                kind,
                reason: reason.clone(),
            });
            return Ok(Self::initial_failure(kind, reason));
        }

        let report = tokio::select! {
            report = self.worker.full_sync() => report,
            _ = shutdown.wait() => return Ok(RunEnd::Shutdown),
        };
        let mut sync_failures = 0;
        if let Some(end) = self.after_sync(report, SyncTrigger::Initial, &mut sync_failures) {
            return Ok(end);
        }

        self.transition(ServiceState::Watching)?;
        self.watchdog.reset();

        if !self.spec.watch.enabled {
            return Ok(self.monitor(shutdown).await);
        }

        let mut watcher = match self.worker.start_watcher().await {
            Ok(watcher) => watcher,
            Err(e) => return Ok(RunEnd::Fatal(format!("cannot start watcher: {}", e))),
        };
        let end = self.watch(&mut watcher, shutdown, &mut sync_failures).await;
        watcher.terminate();
        debug!(service = %self.spec.name, end = ?end, "Watcher terminated");
        Ok(end)
    }

    async fn watch(
        &mut self,
        watcher: &mut SpawnedProcess,
        shutdown: &mut ShutdownToken,
        sync_failures: &mut u32,
    ) -> RunEnd {
        let mut tick = interval(self.poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await; // first tick completes immediately

        loop {
            tokio::select! {
                _ = shutdown.wait() => return RunEnd::Shutdown,
                _ = tick.tick() => {
                    if let Some(end) = self.check_remote().await {
                        return end;
                    }
                }
                line = watcher.next_line() => {
                    let pending = match line {
                        Some(OutputLine::Stdout(_)) => {
                            let batch = self.worker.drain_batch(watcher);
                            debug!(
                                service = %self.spec.name,
                                notifications = batch.notifications,
                                "Change batch received"
                            );
                            let report = tokio::select! {
                                report = self.worker.full_sync() => report,
                                _ = shutdown.wait() => return RunEnd::Shutdown,
                            };
                            if let Some(end) = self.after_sync(report, SyncTrigger::Change, sync_failures) {
                                return end;
                            }
                            batch.pending.into_iter().map(Some).collect()
                        }
                        other => vec![other],
                    };
                    for line in pending {
                        if let Some(end) = self.handle_watcher_line(line) {
                            return end;
                        }
                    }
                }
            }
        }
    }

    /// Watch disabled: only the watchdog runs until the remote goes away
    async fn monitor(&mut self, shutdown: &mut ShutdownToken) -> RunEnd {
        let mut tick = interval(self.poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => return RunEnd::Shutdown,
                _ = tick.tick() => {
                    if let Some(end) = self.check_remote().await {
                        return end;
                    }
                }
            }
        }
    }

    async fn check_remote(&mut self) -> Option<RunEnd> {
        match self.watchdog.observe(&self.spec).await {
            WatchdogVerdict::Unreachable(reason) => {
                self.publish(EventKind::RemoteUnreachable {
                    reason: reason.clone(),
                });
                Some(RunEnd::Teardown(format!("remote unreachable: {}", reason)))
            }
            WatchdogVerdict::Healthy | WatchdogVerdict::Suspect(_) => None,
        }
    }

    fn handle_watcher_line(&mut self, line: Option<OutputLine>) -> Option<RunEnd> {
        match line {
            Some(OutputLine::Stdout(_)) => None,
            Some(OutputLine::Stderr(text)) => {
                match self.worker.detector().scan_line(&text) {
                    Some(hit) if hit.kind == FailureKind::Fatal => {
                        Some(RunEnd::Fatal(format!("watcher: {}", hit.line)))
                    }
                    _ => {
                        warn!(service = %self.spec.name, line = %text, "Watcher stderr");
                        None
                    }
                }
            }
            Some(OutputLine::Exited(code)) => Some(RunEnd::Teardown(format!(
                "watcher exited (code {:?})",
                code
            ))),
            None => Some(RunEnd::Teardown("watcher output closed".to_string())),
        }
    }

    fn initial_failure(kind: FailureKind, reason: String) -> RunEnd {
        match kind {
            FailureKind::Fatal => RunEnd::Fatal(reason),
            FailureKind::Unreachable | FailureKind::Transient => RunEnd::Teardown(reason),
        }
    }

    /// Record a sync result; returns how the run ends, if it does
    fn after_sync(
        &mut self,
        report: SyncReport,
        trigger: SyncTrigger,
        sync_failures: &mut u32,
    ) -> Option<RunEnd> {
        match report.outcome {
            SyncOutcome::Success | SyncOutcome::Partial(_) => {
                let partial = match report.outcome {
                    SyncOutcome::Partial(code) => Some(code),
                    _ => None,
                };
                *sync_failures = 0;
                self.status.last_sync_at = Some(self.ctx.time_provider.now_millis());
                self.status.last_error = None;
                self.publish(EventKind::SyncCompleted {
                    duration_ms: report.duration_ms,
                    trigger,
                    partial,
                });
                None
            }
            SyncOutcome::Failure { kind, reason } => {
                self.status.last_error = Some(reason.clone());
                self.publish(EventKind::SyncFailed {
                    kind,
                    reason: reason.clone(),
                });
                match (kind, trigger) {
                    (FailureKind::Fatal, _) => Some(RunEnd::Fatal(reason)),
                    (FailureKind::Unreachable, _) => Some(RunEnd::Teardown(reason)),
                    (FailureKind::Transient, SyncTrigger::Initial) => {
                        Some(RunEnd::Teardown(reason))
                    }
                    (FailureKind::Transient, SyncTrigger::Change) => {
                        *sync_failures += 1;
                        let limit = self.spec.supervision.max_consecutive_sync_failures;
                        if *sync_failures >= limit {
                            Some(RunEnd::Teardown(format!(
                                "{} consecutive sync failures, last: {}",
                                sync_failures, reason
                            )))
                        } else {
                            None
                        }
                    }
                }
            }
        }
    }

    fn give_up(&mut self, reason: String) -> Result<()> {
        self.status.last_error = Some(reason.clone());
        self.publish(EventKind::GaveUp { reason });
        self.transition(ServiceState::Failed)
    }

    fn transition(&mut self, next: ServiceState) -> Result<()> {
        let from = self.status.state;
        self.status.state.transition_to(next)?;
        info!(
            service = %self.spec.name,
            run_id = ?self.status.run_id,
            from = %from,
            to = %next,
            "State changed"
        );
        self.publish(EventKind::StateChanged { from, to: next });
        Ok(())
    }

    /// Publish an event and refresh the status board entry
    fn publish(&mut self, kind: EventKind) {
        let now = self.ctx.time_provider.now_millis();
        self.status.updated_at = now;
        self.ctx.board.update(self.status.clone());
        self.ctx.events.publish(SupervisorEvent {
            service: self.spec.name.clone(),
            run_id: self.status.run_id.clone(),
            at: now,
            kind,
        });
    }
}
