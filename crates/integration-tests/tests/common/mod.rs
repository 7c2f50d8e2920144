//! Shared fixtures: a fake remote driven by shell-script stand-ins for
//! ssh, rsync and fswatch
//!
//! The "remote" is a local directory. `ssh` runs the remote command locally,
//! `rsync` copies with `cp -R`, and `fswatch` prints a line whenever the test
//! drops a marker file. Other markers simulate outages and host key errors.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::RecvError};

use driftsync_core::application::{EventBus, StatusBoard, SupervisorContext, SupervisorEvent};
use driftsync_core::domain::{RemoteEndpoint, ServiceSpec, ToolPaths};
use driftsync_core::port::id_provider::SequentialIdProvider;
use driftsync_core::port::time_provider::SystemTimeProvider;
use driftsync_core::port::{ProcessRunner, TimeProvider};
use driftsync_infra_system::{SshReachabilityProbe, TokioProcessRunner};

pub const WAIT: Duration = Duration::from_secs(10);

pub struct FakeRemote {
    root: TempDir,
}

impl FakeRemote {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        for dir in ["src", "remote", "bin", "state", "log"] {
            fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        let fake = Self { root };
        fake.install_tools();
        fake
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn src(&self) -> PathBuf {
        self.root().join("src")
    }

    /// Destination directory of service `name` on the fake remote
    pub fn dest(&self, name: &str) -> PathBuf {
        self.root().join("remote").join(name)
    }

    fn state(&self, marker: &str) -> PathBuf {
        self.root().join("state").join(marker)
    }

    pub fn tools(&self) -> ToolPaths {
        let bin = self.root().join("bin");
        ToolPaths {
            rsync: bin.join("rsync").display().to_string(),
            ssh: bin.join("ssh").display().to_string(),
            fswatch: bin.join("fswatch").display().to_string(),
        }
    }

    fn install_tools(&self) {
        let state = self.root().join("state").display().to_string();
        let log = self.root().join("log").display().to_string();

        let ssh = format!(
            r#"#!/bin/sh
echo "$*" >> '{log}/ssh.log'
if [ -e '{state}/down' ]; then
  echo "ssh: connect to host box port 22: Connection refused" >&2
  exit 255
fi
for last; do :; done
if [ "$last" = "true" ]; then exit 0; fi
sh -c "$last"
"#
        );
        let rsync = format!(
            r#"#!/bin/sh
echo "$*" >> '{log}/rsync.log'
if [ -e '{state}/down' ]; then
  echo "rsync: connection unexpectedly closed (0 bytes received so far) [sender]" >&2
  exit 12
fi
if [ -e '{state}/hostkey' ]; then
  echo "Host key verification failed." >&2
  echo "rsync: connection unexpectedly closed (0 bytes received so far) [sender]" >&2
  exit 12
fi
prev=""; last=""
for a in "$@"; do prev="$last"; last="$a"; done
dest="${{last#*:}}"
mkdir -p "$dest" && cp -R "$prev." "$dest"
"#
        );
        let fswatch = format!(
            r#"#!/bin/sh
while true; do
  if [ -e '{state}/changed' ]; then
    rm -f '{state}/changed'
    echo 1
  fi
  sleep 0.05
done
"#
        );

        for (name, body) in [("ssh", ssh), ("rsync", rsync), ("fswatch", fswatch)] {
            let path = self.root().join("bin").join(name);
            fs::write(&path, body).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    pub fn set_down(&self, down: bool) {
        set_marker(&self.state("down"), down);
    }

    /// Make the ssh transport inside rsync fail host key verification
    ///
    /// Probes keep succeeding, so only the next sync sees it.
    pub fn set_host_key_failure(&self, failing: bool) {
        set_marker(&self.state("hostkey"), failing);
    }

    /// Write a source file and tell the fake watcher about it
    pub fn change(&self, file: &str, content: &str) {
        fs::write(self.src().join(file), content).unwrap();
        fs::write(self.state("changed"), "").unwrap();
    }

    pub fn rsync_calls(&self) -> usize {
        fs::read_to_string(self.root().join("log").join("rsync.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    pub fn spec(&self, name: &str) -> ServiceSpec {
        let mut spec = ServiceSpec::new(
            name,
            self.src(),
            RemoteEndpoint::new("box"),
            self.dest(name).display().to_string(),
        );
        spec.watch.latency_ms = 50;
        spec.supervision.poll_interval_ms = 50;
        spec.supervision.unreachable_threshold = 1;
        spec.supervision.restart_backoff_base_ms = 20;
        spec.supervision.restart_backoff_max_ms = 100;
        spec.supervision.connect_timeout_secs = 2;
        spec.supervision.sync_timeout_ms = 10_000;
        spec
    }
}

fn set_marker(path: &Path, present: bool) {
    if present {
        fs::write(path, "").unwrap();
    } else {
        let _ = fs::remove_file(path);
    }
}

/// Real runner and ssh probe, pointed at the fake tools
pub fn context(tools: ToolPaths) -> SupervisorContext {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new(
        time_provider.clone(),
        vec!["PATH".to_string()],
    ));
    let tools = Arc::new(tools);
    let probe = Arc::new(SshReachabilityProbe::new(runner.clone(), tools.clone()));

    SupervisorContext {
        tools,
        runner,
        probe,
        time_provider,
        id_provider: Arc::new(SequentialIdProvider::default()),
        events: EventBus::new(),
        board: StatusBoard::new(),
    }
}

/// Next event matching `pred`, skipping the others
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<SupervisorEvent>,
    pred: impl Fn(&SupervisorEvent) -> bool,
) -> SupervisorEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `cond` until it holds
pub async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}
