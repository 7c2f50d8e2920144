//! Subcommand implementations

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tabled::Table;
use tracing::{info, warn};

use driftsync_core::application::{shutdown_channel, EventBus, Fleet, StatusBoard, SupervisorContext};
use driftsync_core::domain::{ServiceState, SyncOutcome};
use driftsync_core::port::id_provider::UuidProvider;
use driftsync_core::port::time_provider::SystemTimeProvider;
use driftsync_core::port::{ProcessRunner, Reachability, ReachabilityProbe, TimeProvider};
use driftsync_infra_config::{LoadedConfig, ProbeKind};
use driftsync_infra_system::{
    missing_tools, SshReachabilityProbe, TcpReachabilityProbe, TokioProcessRunner,
};

use crate::lock::InstanceLock;
use crate::output::{self, CheckRow, ServiceRow, StatusRow, SyncRow};
use crate::status_file::{self, StatusFile};
use crate::{paths, signals};

/// Upper bound for supervisors to stop after a shutdown signal
///
/// Covers the SIGTERM grace period of running children.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire the adapters for `config` (composition root)
pub fn build_context(config: &LoadedConfig) -> SupervisorContext {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let tools = Arc::new(config.tools.clone());
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new(
        time_provider.clone(),
        config.inherit_env.clone(),
    ));
    let probe: Arc<dyn ReachabilityProbe> = match config.probe {
        ProbeKind::Ssh => Arc::new(SshReachabilityProbe::new(runner.clone(), tools.clone())),
        ProbeKind::Tcp => Arc::new(TcpReachabilityProbe::new()),
    };

    SupervisorContext {
        tools,
        runner,
        probe,
        time_provider,
        id_provider: Arc::new(UuidProvider),
        events: EventBus::new(),
        board: StatusBoard::new(),
    }
}

pub async fn start(
    config: &LoadedConfig,
    services: &[String],
    status_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let specs = config.select_services(services)?;
    let ctx = build_context(config);

    let runner = Arc::clone(&ctx.runner);
    let _lock = InstanceLock::acquire(&paths::lock_file(), |pid| runner.is_alive(pid))?;
    let status_path = status_path.unwrap_or_else(paths::default_status_file);

    println!(
        "{} {} service(s) from {}",
        "Supervising".cyan().bold(),
        specs.len(),
        config.path.display()
    );
    println!("Press Ctrl+C to stop");

    let fleet = Arc::new(Fleet::new(specs, ctx.clone()));
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let printer = tokio::spawn(output::follow_events(
        ctx.events.subscribe(),
        ctx.board.clone(),
        status_path.clone(),
        Arc::clone(&ctx.time_provider),
    ));

    let mut running = {
        let fleet = Arc::clone(&fleet);
        tokio::spawn(async move { fleet.run(shutdown_rx).await })
    };

    let statuses = tokio::select! {
        joined = &mut running => joined.context("Supervisor fleet task failed")?,
        signal = signals::shutdown_signal() => {
            signal.context("Failed to listen for shutdown signals")?;
            info!("Shutdown signal received. Stopping supervisors...");
            println!("{}", "Stopping...".yellow());
            shutdown_tx.shutdown();

            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut running).await {
                Ok(joined) => joined.context("Supervisor fleet task failed")?,
                Err(_) => {
                    warn!("Supervisors did not stop in time");
                    running.abort();
                    ctx.board.snapshot()
                }
            }
        }
    };

    printer.abort();
    let final_status = StatusFile::new(statuses.clone(), ctx.time_provider.now_millis());
    if let Err(e) = status_file::write(&status_path, &final_status) {
        warn!(error = %e, "Failed to write final status file");
    }

    println!();
    println!("{}", Table::new(statuses.iter().map(StatusRow::from)));

    if statuses.iter().any(|s| s.state == ServiceState::Failed) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

pub async fn sync(config: &LoadedConfig, services: &[String]) -> Result<ExitCode> {
    let specs = config.select_services(services)?;
    let fleet = Fleet::new(specs, build_context(config));

    let reports = fleet.sync_once().await;
    let failed = reports
        .iter()
        .filter(|r| matches!(r.outcome, SyncOutcome::Failure { .. }))
        .count();

    let rows = reports.iter().map(|r| SyncRow {
        service: r.service.clone(),
        result: output::describe_outcome(&r.outcome),
        duration: format!("{} ms", r.duration_ms),
    });
    println!("{}", Table::new(rows));

    if failed == 0 {
        println!("{}", "✓ All services synced".green().bold());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}", format!("✗ {} service(s) failed", failed).red().bold());
        Ok(ExitCode::FAILURE)
    }
}

pub async fn check(config: &LoadedConfig, services: &[String]) -> Result<ExitCode> {
    let specs = config.select_services(services)?;
    let mut rows = Vec::new();
    let mut problems = 0;

    for tool in missing_tools(&config.tools, config.needs_watcher()) {
        problems += 1;
        rows.push(CheckRow {
            service: "-".to_string(),
            check: format!("tool {}", tool.role),
            result: format!("MISSING: {} not found on PATH", tool.program),
        });
    }

    for spec in &specs {
        let ok = spec.source.is_dir();
        if !ok {
            problems += 1;
        }
        rows.push(CheckRow {
            service: spec.name.clone(),
            check: "source".to_string(),
            result: if ok {
                "ok".to_string()
            } else {
                format!("MISSING: {} is not a directory", spec.source.display())
            },
        });
    }

    let fleet = Fleet::new(specs, build_context(config));
    for check in fleet.check().await {
        let result = match &check.reachability {
            Reachability::Reachable => "ok".to_string(),
            Reachability::Unreachable(reason) => {
                problems += 1;
                format!("UNREACHABLE: {}", reason)
            }
        };
        rows.push(CheckRow {
            service: check.service,
            check: format!("remote {}", check.target),
            result,
        });
    }

    println!("{}", Table::new(rows));
    if problems == 0 {
        println!("{}", "✓ All checks passed".green().bold());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}", format!("✗ {} problem(s) found", problems).red().bold());
        Ok(ExitCode::FAILURE)
    }
}

pub fn list(config: &LoadedConfig) -> Result<ExitCode> {
    println!("{} {}", "Config:".bold(), config.path.display());
    println!("{}", Table::new(config.services.iter().map(ServiceRow::from)));
    Ok(ExitCode::SUCCESS)
}

pub fn status(path: Option<&Path>, raw_json: bool) -> Result<ExitCode> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(paths::default_status_file);
    let status = status_file::read(&path)?;

    if raw_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
        return Ok(ExitCode::SUCCESS);
    }

    let runner = TokioProcessRunner::with_default_env(Arc::new(SystemTimeProvider));
    let alive = i32::try_from(status.pid)
        .map(|pid| runner.is_alive(pid))
        .unwrap_or(false);

    println!("{}", "driftsync status".cyan().bold());
    println!(
        "  {} {} ({})",
        "Written at:".bold(),
        output::clock(Some(status.written_at)),
        if alive {
            format!("pid {} running", status.pid).green()
        } else {
            format!("pid {} not running", status.pid).yellow()
        }
    );
    println!();
    println!("{}", Table::new(status.services.iter().map(StatusRow::from)));
    Ok(ExitCode::SUCCESS)
}
