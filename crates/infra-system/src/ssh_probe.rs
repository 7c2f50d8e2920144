// Reachability probe over ssh
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use driftsync_core::domain::command::probe_command;
use driftsync_core::domain::{FailureDetector, ServiceSpec, SyncOutcome, ToolPaths};
use driftsync_core::port::{ProcessRunner, Reachability, ReachabilityProbe};

/// Runs `ssh … target true` with BatchMode and the service's connect timeout
///
/// This exercises the exact transport rsync will use, so a remote that passes
/// the probe also accepts the sync.
pub struct SshReachabilityProbe {
    runner: Arc<dyn ProcessRunner>,
    tools: Arc<ToolPaths>,
}

impl SshReachabilityProbe {
    pub fn new(runner: Arc<dyn ProcessRunner>, tools: Arc<ToolPaths>) -> Self {
        Self { runner, tools }
    }
}

#[async_trait]
impl ReachabilityProbe for SshReachabilityProbe {
    async fn check(&self, spec: &ServiceSpec) -> Reachability {
        let cmd = probe_command(spec, &self.tools);
        let result = match self.runner.run(&cmd).await {
            Ok(result) => result,
            Err(e) => return Reachability::Unreachable(e.to_string()),
        };

        let detector = FailureDetector::new(&spec.failure_patterns);
        match detector.classify(&result) {
            SyncOutcome::Success => Reachability::Reachable,
            SyncOutcome::Partial(code) => {
                Reachability::Unreachable(format!("probe exited with {}", code))
            }
            SyncOutcome::Failure { kind, reason } => {
                debug!(service = %spec.name, kind = %kind, reason = %reason, "ssh probe failed");
                Reachability::Unreachable(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::domain::RemoteEndpoint;
    use driftsync_core::port::process_runner::mocks::{failed_result, ScriptedRunner};
    use driftsync_core::port::ExecutionError;

    fn spec() -> ServiceSpec {
        let mut remote = RemoteEndpoint::new("box.local");
        remote.user = Some("deploy".to_string());
        remote.port = 2222;
        ServiceSpec::new("web", "/tmp/web", remote, "/srv/web")
    }

    fn probe(runner: Arc<ScriptedRunner>) -> SshReachabilityProbe {
        SshReachabilityProbe::new(runner, Arc::new(ToolPaths::default()))
    }

    #[tokio::test]
    async fn test_reachable_when_ssh_succeeds() {
        let runner = Arc::new(ScriptedRunner::new());

        let answer = probe(runner.clone()).check(&spec()).await;

        assert_eq!(answer, Reachability::Reachable);
        let call = &runner.invocations()[0];
        assert_eq!(call.program, "ssh");
        assert!(call.args.contains(&"2222".to_string()));
        assert_eq!(call.args[call.args.len() - 2], "deploy@box.local");
    }

    #[tokio::test]
    async fn test_unreachable_reason_is_ssh_error_line() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_result(
            "ssh",
            failed_result(255, "ssh: connect to host box.local port 2222: Connection refused\n"),
        );

        let answer = probe(runner).check(&spec()).await;

        assert_eq!(
            answer,
            Reachability::Unreachable(
                "ssh: connect to host box.local port 2222: Connection refused".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_missing_ssh_binary_is_unreachable() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_error("ssh", ExecutionError::SpawnFailed("No such file".into()));

        let answer = probe(runner).check(&spec()).await;
        assert!(!answer.is_reachable());
    }
}
