//! Terminal output: live event lines and tables

use chrono::{Local, TimeZone};
use colored::{ColoredString, Colorize};
use std::path::PathBuf;
use tabled::Tabled;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use driftsync_core::application::{EventKind, StatusBoard, SupervisorEvent, SyncTrigger};
use driftsync_core::domain::{ServiceSpec, ServiceState, ServiceStatus, SyncOutcome};
use driftsync_core::port::TimeProvider;

use crate::status_file::{self, StatusFile};

pub fn state_label(state: ServiceState) -> ColoredString {
    let text = state.to_string();
    match state {
        ServiceState::Watching => text.green().bold(),
        ServiceState::Syncing => text.cyan(),
        ServiceState::WaitingForRemote | ServiceState::Restarting => text.yellow(),
        ServiceState::Failed => text.red().bold(),
        ServiceState::Stopped => text.dimmed(),
    }
}

/// `HH:MM:SS` in local time, `-` when unset
pub fn clock(epoch_millis: Option<i64>) -> String {
    epoch_millis
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn seconds(ms: u64) -> String {
    format!("{:.1}s", ms as f64 / 1000.0)
}

/// One line per supervisor event
pub fn render_event(event: &SupervisorEvent) -> String {
    let prefix = format!("{} {}", clock(Some(event.at)).dimmed(), format!("[{}]", event.service).bold());
    let body = match &event.kind {
        EventKind::StateChanged { from, to } => {
            format!("{} → {}", from.to_string().dimmed(), state_label(*to))
        }
        EventKind::SyncCompleted {
            duration_ms,
            trigger,
            partial,
        } => {
            let what = match trigger {
                SyncTrigger::Initial => "initial sync",
                SyncTrigger::Change => "change sync",
            };
            match partial {
                Some(code) => format!(
                    "{} {} finished with partial transfer (rsync exit {}, {} ms)",
                    "⚠".yellow(),
                    what,
                    code,
                    duration_ms
                ),
                None => format!("{} {} done ({} ms)", "✓".green(), what, duration_ms),
            }
        }
        EventKind::SyncFailed { kind, reason } => {
            format!("{} sync failed ({}): {}", "✗".red(), kind, reason)
        }
        EventKind::RemoteUnreachable { reason } => {
            format!("{} {}", "remote unreachable:".yellow(), reason)
        }
        EventKind::Restarting { attempt, delay_ms } => format!(
            "{} restarting in {} (attempt {})",
            "↻".yellow(),
            seconds(*delay_ms),
            attempt
        ),
        EventKind::GaveUp { reason } => format!("{} {}", "gave up:".red().bold(), reason),
    };
    format!("{} {}", prefix, body)
}

/// Whether an event changes what the status file shows
fn touches_status(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::StateChanged { .. } | EventKind::SyncCompleted { .. } | EventKind::GaveUp { .. }
    )
}

/// Print events until the bus closes, refreshing the status file on changes
pub async fn follow_events(
    mut rx: broadcast::Receiver<SupervisorEvent>,
    board: StatusBoard,
    status_path: PathBuf,
    time_provider: std::sync::Arc<dyn TimeProvider>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                println!("{}", render_event(&event));
                if touches_status(&event.kind) {
                    let snapshot = StatusFile::new(board.snapshot(), time_provider.now_millis());
                    if let Err(e) = status_file::write(&status_path, &snapshot) {
                        warn!(error = %e, path = %status_path.display(), "Failed to write status file");
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer fell behind, some events were not shown");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Tabled)]
pub struct ServiceRow {
    #[tabled(rename = "SERVICE")]
    pub name: String,
    #[tabled(rename = "SOURCE")]
    pub source: String,
    #[tabled(rename = "REMOTE")]
    pub remote: String,
    #[tabled(rename = "DESTINATION")]
    pub destination: String,
    #[tabled(rename = "WATCH")]
    pub watch: String,
    #[tabled(rename = "EXCLUDES")]
    pub excludes: usize,
}

impl From<&ServiceSpec> for ServiceRow {
    fn from(spec: &ServiceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            source: spec.source.display().to_string(),
            remote: format!("{}:{}", spec.remote.target(), spec.remote.port),
            destination: spec.destination.clone(),
            watch: if spec.watch.enabled {
                format!("on ({} ms)", spec.watch.latency_ms)
            } else {
                "off".to_string()
            },
            excludes: spec.excludes.len(),
        }
    }
}

#[derive(Tabled)]
pub struct StatusRow {
    #[tabled(rename = "SERVICE")]
    pub name: String,
    #[tabled(rename = "STATE")]
    pub state: String,
    #[tabled(rename = "RESTARTS")]
    pub restarts: u32,
    #[tabled(rename = "LAST SYNC")]
    pub last_sync: String,
    #[tabled(rename = "LAST ERROR")]
    pub last_error: String,
}

impl From<&ServiceStatus> for StatusRow {
    fn from(status: &ServiceStatus) -> Self {
        Self {
            name: status.name.clone(),
            state: status.state.to_string(),
            restarts: status.restarts,
            last_sync: clock(status.last_sync_at),
            last_error: status.last_error.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Tabled)]
pub struct SyncRow {
    #[tabled(rename = "SERVICE")]
    pub service: String,
    #[tabled(rename = "RESULT")]
    pub result: String,
    #[tabled(rename = "DURATION")]
    pub duration: String,
}

pub fn describe_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Success => "ok".to_string(),
        SyncOutcome::Partial(code) => format!("partial (rsync exit {})", code),
        SyncOutcome::Failure { kind, reason } => format!("FAILED ({}): {}", kind, reason),
    }
}

#[derive(Tabled)]
pub struct CheckRow {
    #[tabled(rename = "SERVICE")]
    pub service: String,
    #[tabled(rename = "CHECK")]
    pub check: String,
    #[tabled(rename = "RESULT")]
    pub result: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::domain::{FailureKind, RemoteEndpoint};

    fn event(kind: EventKind) -> SupervisorEvent {
        SupervisorEvent {
            service: "web".to_string(),
            run_id: Some("run-1".to_string()),
            at: 0,
            kind,
        }
    }

    #[test]
    fn test_render_events() {
        colored::control::set_override(false);

        let line = render_event(&event(EventKind::StateChanged {
            from: ServiceState::Syncing,
            to: ServiceState::Watching,
        }));
        assert!(line.ends_with("[web] SYNCING → WATCHING"));

        let line = render_event(&event(EventKind::SyncCompleted {
            duration_ms: 120,
            trigger: SyncTrigger::Change,
            partial: Some(24),
        }));
        assert!(line.contains("change sync finished with partial transfer (rsync exit 24"));

        let line = render_event(&event(EventKind::SyncFailed {
            kind: FailureKind::Unreachable,
            reason: "Connection refused".to_string(),
        }));
        assert!(line.ends_with("sync failed (unreachable): Connection refused"));

        let line = render_event(&event(EventKind::Restarting {
            attempt: 2,
            delay_ms: 1500,
        }));
        assert!(line.ends_with("restarting in 1.5s (attempt 2)"));
    }

    #[test]
    fn test_service_row() {
        let mut remote = RemoteEndpoint::new("box");
        remote.user = Some("deploy".to_string());
        let mut spec = ServiceSpec::new("web", "/tmp/web", remote, "/srv/web");
        spec.watch.enabled = false;
        spec.excludes = vec![".git".to_string()];

        let row = ServiceRow::from(&spec);
        assert_eq!(row.remote, "deploy@box:22");
        assert_eq!(row.watch, "off");
        assert_eq!(row.excludes, 1);
    }

    #[test]
    fn test_status_row_placeholders() {
        let row = StatusRow::from(&ServiceStatus::new("web", 0));
        assert_eq!(row.state, "STOPPED");
        assert_eq!(row.last_sync, "-");
        assert_eq!(row.last_error, "-");
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(describe_outcome(&SyncOutcome::Success), "ok");
        assert_eq!(
            describe_outcome(&SyncOutcome::Failure {
                kind: FailureKind::Fatal,
                reason: "Host key verification failed.".to_string()
            }),
            "FAILED (fatal): Host key verification failed."
        );
    }
}
