//! Fleet - runs one supervisor per configured service
//!
//! A panic or error inside one supervisor never stops the others: each service
//! runs in its own tokio task and its failure is folded into a FAILED status.

use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info, info_span, Instrument};

use crate::application::supervisor::{ShutdownToken, Supervisor, SupervisorContext};
use crate::application::sync_worker::SyncWorker;
use crate::domain::{ServiceSpec, ServiceState, ServiceStatus, SyncOutcome};
use crate::port::Reachability;

/// Result of a one-shot sync for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOnceReport {
    pub service: String,
    pub outcome: SyncOutcome,
    pub duration_ms: i64,
}

/// Reachability of one service's remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCheck {
    pub service: String,
    pub target: String,
    pub reachability: Reachability,
}

pub struct Fleet {
    specs: Vec<Arc<ServiceSpec>>,
    ctx: SupervisorContext,
}

impl Fleet {
    pub fn new(specs: Vec<ServiceSpec>, ctx: SupervisorContext) -> Self {
        Self {
            specs: specs.into_iter().map(Arc::new).collect(),
            ctx,
        }
    }

    /// Supervise every service until shutdown (or until all have failed)
    ///
    /// Returns the final status of each service, in configuration order.
    pub async fn run(&self, shutdown: ShutdownToken) -> Vec<ServiceStatus> {
        info!(services = self.specs.len(), "Starting supervisors");

        let handles: Vec<_> = self
            .specs
            .iter()
            .map(|spec| {
                let span = info_span!("service", service = %spec.name);
                let supervisor = Supervisor::new(Arc::clone(spec), self.ctx.clone());
                tokio::spawn(supervisor.run(shutdown.clone()).instrument(span))
            })
            .collect();

        let results = join_all(handles).await;

        self.specs
            .iter()
            .zip(results)
            .map(|(spec, result)| match result {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    error!(service = %spec.name, error = %e, "Supervisor failed");
                    self.mark_failed(&spec.name, e.to_string())
                }
                Err(join_err) => {
                    let reason = describe_join_error(join_err);
                    error!(service = %spec.name, reason = %reason, "Supervisor task aborted");
                    self.mark_failed(&spec.name, reason)
                }
            })
            .collect()
    }

    /// Prepare the remote and run one full sync per service, concurrently
    pub async fn sync_once(&self) -> Vec<SyncOnceReport> {
        let jobs = self.specs.iter().map(|spec| {
            let worker = SyncWorker::new(
                Arc::clone(spec),
                Arc::clone(&self.ctx.tools),
                Arc::clone(&self.ctx.runner),
                Arc::clone(&self.ctx.time_provider),
            );
            let span = info_span!("service", service = %spec.name);
            async move {
                let prepared = worker.prepare_remote().await;
                let report = if prepared.outcome.is_ok() {
                    worker.full_sync().await
                } else {
                    prepared
                };
                SyncOnceReport {
                    service: worker.spec().name.clone(),
                    outcome: report.outcome,
                    duration_ms: report.duration_ms,
                }
            }
            .instrument(span)
        });
        join_all(jobs).await
    }

    /// Probe every remote once, concurrently
    pub async fn check(&self) -> Vec<ServiceCheck> {
        let probes = self.specs.iter().map(|spec| async move {
            ServiceCheck {
                service: spec.name.clone(),
                target: spec.remote.target(),
                reachability: self.ctx.probe.check(spec).await,
            }
        });
        join_all(probes).await
    }

    fn mark_failed(&self, service: &str, reason: String) -> ServiceStatus {
        let now = self.ctx.time_provider.now_millis();
        let mut status = self
            .ctx
            .board
            .get(service)
            .unwrap_or_else(|| ServiceStatus::new(service, now));
        // The supervisor is gone; record the outcome directly
        status.state = ServiceState::Failed;
        status.last_error = Some(reason);
        status.updated_at = now;
        self.ctx.board.update(status.clone());
        status
    }
}

/// Panic payload or cancellation, as text
fn describe_join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        return "supervisor task cancelled".to_string();
    }
    let payload = err.into_panic();
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    };
    format!("supervisor panicked: {}", msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::{EventBus, StatusBoard};
    use crate::application::supervisor::shutdown_channel;
    use crate::domain::{FailureKind, RemoteEndpoint, ToolPaths};
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::process_runner::mocks::{failed_result, ScriptedRunner};
    use crate::port::reachability::mocks::ScriptedProbe;
    use crate::port::time_provider::SystemTimeProvider;
    use std::time::Duration;

    fn spec(name: &str) -> ServiceSpec {
        let mut spec = ServiceSpec::new(name, format!("/tmp/{}", name), RemoteEndpoint::new("box"), "/srv/x");
        spec.supervision.poll_interval_ms = 10;
        spec
    }

    fn context(runner: Arc<ScriptedRunner>, probe: Arc<ScriptedProbe>) -> SupervisorContext {
        SupervisorContext {
            tools: Arc::new(ToolPaths::default()),
            runner,
            probe,
            time_provider: Arc::new(SystemTimeProvider),
            id_provider: Arc::new(SequentialIdProvider::default()),
            events: EventBus::new(),
            board: StatusBoard::new(),
        }
    }

    #[tokio::test]
    async fn test_fleet_runs_all_services_until_shutdown() {
        let runner = Arc::new(ScriptedRunner::new());
        let probe = Arc::new(ScriptedProbe::reachable());
        let fleet = Arc::new(Fleet::new(
            vec![spec("api"), spec("web")],
            context(runner.clone(), probe),
        ));
        let (tx, token) = shutdown_channel();

        let running = {
            let fleet = Arc::clone(&fleet);
            tokio::spawn(async move { fleet.run(token).await })
        };
        runner.take_watcher(0).await;
        runner.take_watcher(1).await;
        tx.shutdown();

        let statuses = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        let names: Vec<_> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert!(statuses.iter().all(|s| s.state == ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_sync_once_reports_each_service() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_result("rsync", failed_result(255, "Connection refused"));
        let probe = Arc::new(ScriptedProbe::reachable());
        let fleet = Fleet::new(vec![spec("api")], context(runner.clone(), probe));

        let reports = fleet.sync_once().await;

        assert_eq!(reports.len(), 1);
        assert!(matches!(
            reports[0].outcome,
            SyncOutcome::Failure { kind: FailureKind::Unreachable, .. }
        ));
        assert_eq!(runner.count("ssh"), 1);
    }

    #[tokio::test]
    async fn test_sync_once_skips_rsync_when_mkdir_fails() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_result("ssh", failed_result(255, "Permission denied (publickey)."));
        let probe = Arc::new(ScriptedProbe::reachable());
        let fleet = Fleet::new(vec![spec("api")], context(runner.clone(), probe));

        let reports = fleet.sync_once().await;

        assert!(matches!(
            reports[0].outcome,
            SyncOutcome::Failure { kind: FailureKind::Fatal, .. }
        ));
        assert_eq!(runner.count("rsync"), 0);
    }

    #[tokio::test]
    async fn test_check_probes_every_remote() {
        let runner = Arc::new(ScriptedRunner::new());
        let probe = Arc::new(ScriptedProbe::unreachable("no route to host"));
        let fleet = Fleet::new(vec![spec("api"), spec("web")], context(runner, probe.clone()));

        let checks = fleet.check().await;

        assert_eq!(checks.len(), 2);
        assert_eq!(probe.calls(), 2);
        assert!(checks.iter().all(|c| !c.reachability.is_reachable()));
    }

    #[tokio::test]
    async fn test_describe_panic() {
        let handle = tokio::spawn(async { panic!("boom") });
        let err = handle.await.unwrap_err();
        assert_eq!(describe_join_error(err), "supervisor panicked: boom");
    }
}
