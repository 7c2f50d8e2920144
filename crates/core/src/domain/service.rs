// Service Domain Model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::error::{DomainError, Result};
use crate::domain::failure::FailurePattern;

/// Service name (unique key in the configuration)
pub type ServiceName = String;

/// Remote side of a service: an ssh-reachable host (or container sshd)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    /// Extra `-o Key=Value` options passed to ssh
    pub ssh_options: Vec<String>,
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: 22,
            identity_file: None,
            ssh_options: Vec::new(),
        }
    }

    /// `user@host` or plain `host`
    pub fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// File watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    pub enabled: bool,
    /// Batching latency handed to the watcher
    pub latency_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_ms: 500,
        }
    }
}

/// Knobs of the per-service supervision loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionSettings {
    /// Watchdog probe interval
    pub poll_interval_ms: u64,
    /// Consecutive failed probes before the remote is declared unreachable
    pub unreachable_threshold: u32,
    pub restart_backoff_base_ms: u64,
    pub restart_backoff_max_ms: u64,
    pub backoff_factor: f64,
    /// None = restart forever
    pub max_restarts: Option<u32>,
    /// A pipeline run lasting at least this long resets the restart counter
    pub stable_after_ms: u64,
    pub sync_timeout_ms: u64,
    pub connect_timeout_secs: u64,
    pub max_consecutive_sync_failures: u32,
}

impl Default for SupervisionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            unreachable_threshold: 2,
            restart_backoff_base_ms: 1000,
            restart_backoff_max_ms: 30_000,
            backoff_factor: 2.0,
            max_restarts: None,
            stable_after_ms: 60_000,
            sync_timeout_ms: 300_000,
            connect_timeout_secs: 5,
            max_consecutive_sync_failures: 3,
        }
    }
}

/// Locations of the external tools driftsync drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub rsync: String,
    pub ssh: String,
    pub fswatch: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            rsync: "rsync".to_string(),
            ssh: "ssh".to_string(),
            fswatch: "fswatch".to_string(),
        }
    }
}

/// One local tree mirrored into one remote directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: ServiceName,
    pub source: PathBuf,
    pub remote: RemoteEndpoint,
    /// Absolute directory on the remote host
    pub destination: String,
    pub excludes: Vec<String>,
    /// Extra rsync arguments appended verbatim
    pub rsync_args: Vec<String>,
    pub delete: bool,
    pub watch: WatchSettings,
    pub supervision: SupervisionSettings,
    /// Service-specific patterns, checked before the built-in ones
    pub failure_patterns: Vec<FailurePattern>,
}

impl ServiceSpec {
    /// Create a service with default watch and supervision settings
    ///
    /// # Arguments
    ///
    /// * `name` - Unique service name
    /// * `source` - Local directory to mirror
    /// * `remote` - Remote endpoint
    /// * `destination` - Absolute directory on the remote
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        remote: RemoteEndpoint,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            remote,
            destination: destination.into(),
            excludes: Vec::new(),
            rsync_args: Vec::new(),
            delete: true,
            watch: WatchSettings::default(),
            supervision: SupervisionSettings::default(),
            failure_patterns: Vec::new(),
        }
    }

    /// Check structural invariants (does not touch the filesystem)
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DomainError::ValidationError(
                "service name must not be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(self.invalid("name may only contain [A-Za-z0-9_.-]"));
        }
        if self.source.as_os_str().is_empty() {
            return Err(self.invalid("source path must not be empty"));
        }
        if self.remote.host.trim().is_empty() {
            return Err(self.invalid("remote host must not be empty"));
        }
        if self.remote.host.starts_with('-') {
            return Err(self.invalid("remote host must not start with '-'"));
        }
        if let Some(user) = &self.remote.user {
            if user.is_empty() || user.starts_with('-') {
                return Err(self.invalid("remote user must be non-empty and not start with '-'"));
            }
        }
        if self.remote.port == 0 {
            return Err(self.invalid("remote port must not be 0"));
        }
        if !self.destination.starts_with('/') {
            return Err(self.invalid("destination must be an absolute remote path"));
        }

        let s = &self.supervision;
        if s.poll_interval_ms == 0 || s.sync_timeout_ms == 0 || s.connect_timeout_secs == 0 {
            return Err(self.invalid("intervals and timeouts must be greater than 0"));
        }
        if s.unreachable_threshold == 0 || s.max_consecutive_sync_failures == 0 {
            return Err(self.invalid("thresholds must be at least 1"));
        }
        if s.restart_backoff_base_ms > s.restart_backoff_max_ms {
            return Err(self.invalid("restart_backoff_base_ms exceeds restart_backoff_max_ms"));
        }
        if s.backoff_factor < 1.0 {
            return Err(self.invalid("backoff_factor must be >= 1.0"));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> DomainError {
        DomainError::InvalidService {
            service: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}
