//! driftsync.yml → LoadedConfig → Fleet, against the fake remote

mod common;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use common::{context, FakeRemote};
use driftsync_core::application::Fleet;
use driftsync_core::domain::SyncOutcome;
use driftsync_core::port::Reachability;
use driftsync_infra_config::{load_with_env, ConfigError, LoadedConfig};

fn write_config(remote: &FakeRemote) -> PathBuf {
    let tools = remote.tools();
    let body = format!(
        r#"
version: 1
options:
  tools:
    rsync: {rsync}
    ssh: {ssh}
    fswatch: {fswatch}
  inherit_env: [PATH]
  supervision:
    poll_interval_ms: 50
    connect_timeout_secs: 2
  excludes: [".git"]
services:
  site:
    src: ./src
    host: box
    user: deploy
    dest: {site_dest}
    excludes: ["*.tmp"]
  docs:
    src: ./src
    host: box
    dest: {docs_dest}
    watch: {{ enabled: false }}
"#,
        rsync = tools.rsync,
        ssh = tools.ssh,
        fswatch = tools.fswatch,
        site_dest = remote.dest("site").display(),
        docs_dest = remote.dest("docs").display(),
    );
    let path = remote.root().join("driftsync.yml");
    fs::write(&path, body).unwrap();
    path
}

fn load(remote: &FakeRemote) -> LoadedConfig {
    load_with_env(&write_config(remote), Some(HashMap::new())).unwrap()
}

#[test]
fn test_config_resolves_against_fake_remote() {
    let remote = FakeRemote::new();
    let config = load(&remote);

    assert_eq!(config.tools, remote.tools());
    assert_eq!(config.service_names(), vec!["docs", "site"]);

    let site = &config.services[1];
    assert_eq!(site.source, remote.src());
    assert_eq!(site.excludes, vec![".git", "*.tmp"]);
    assert_eq!(site.supervision.poll_interval_ms, 50);
    assert!(site.watch.enabled);
    assert!(!config.services[0].watch.enabled);
    assert!(config.needs_watcher());
}

#[tokio::test]
async fn test_sync_every_configured_service() {
    let remote = FakeRemote::new();
    fs::write(remote.src().join("README.md"), "# docs").unwrap();
    let config = load(&remote);

    let fleet = Fleet::new(config.services.clone(), context(config.tools.clone()));
    let reports = fleet.sync_once().await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.outcome == SyncOutcome::Success));
    for name in ["docs", "site"] {
        assert_eq!(
            fs::read_to_string(remote.dest(name).join("README.md")).unwrap(),
            "# docs"
        );
    }
}

#[tokio::test]
async fn test_check_follows_remote_availability() {
    let remote = FakeRemote::new();
    let config = load(&remote);
    let fleet = Fleet::new(config.select_services(&["site".to_string()]).unwrap(), context(config.tools.clone()));

    let checks = fleet.check().await;
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].target, "deploy@box");
    assert_eq!(checks[0].reachability, Reachability::Reachable);

    remote.set_down(true);
    let checks = fleet.check().await;
    assert!(matches!(
        &checks[0].reachability,
        Reachability::Unreachable(reason) if reason.contains("Connection refused")
    ));
}

#[test]
fn test_unknown_service_lists_available() {
    let remote = FakeRemote::new();
    let config = load(&remote);

    let err = config.select_services(&["api".to_string()]).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownService { .. }));
    assert_eq!(
        err.to_string(),
        "Unknown service 'api' (available: docs, site)"
    );
}
