// Failure detection in subprocess output streams
//
// rsync and ssh report most connectivity problems as free-form text on stderr,
// so classification is a mix of line patterns and well-known rsync exit codes.

use serde::{Deserialize, Serialize};

use crate::port::process_runner::{ExecutionResult, ExecutionStatus};

/// What the supervisor should do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Remote went away: tear down, wait for reachability, restart
    Unreachable,
    /// Retrying cannot help (auth, host key, missing binary): stop the service
    Fatal,
    /// A single sync failed; restart only after repeated failures
    Transient,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Unreachable => write!(f, "unreachable"),
            FailureKind::Fatal => write!(f, "fatal"),
            FailureKind::Transient => write!(f, "transient"),
        }
    }
}

/// Case-insensitive substring matched against a single output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub pattern: String,
    pub kind: FailureKind,
}

impl FailurePattern {
    pub fn new(pattern: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            pattern: pattern.into(),
            kind,
        }
    }
}

const UNREACHABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "operation timed out",
    "no route to host",
    "network is unreachable",
    "broken pipe",
    "connection closed by",
    "connection unexpectedly closed",
    "could not resolve hostname",
    "error in rsync protocol data stream",
    "kex_exchange_identification",
    "lost connection",
];

const FATAL_PATTERNS: &[&str] = &[
    "host key verification failed",
    "permission denied (publickey",
    "too many authentication failures",
    "rsync: command not found",
    "rsync: not found",
];

/// A pattern hit, with the offending line kept for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub kind: FailureKind,
    pub line: String,
}

/// Result of one rsync (or mkdir) invocation, as seen by the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    /// rsync exit 23/24: some files vanished or could not be transferred
    Partial(i32),
    Failure { kind: FailureKind, reason: String },
}

impl SyncOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SyncOutcome::Success | SyncOutcome::Partial(_))
    }
}

/// Ordered pattern list: service extras first, then built-ins
#[derive(Debug, Clone)]
pub struct FailureDetector {
    patterns: Vec<(String, FailureKind)>,
}

impl Default for FailureDetector {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl FailureDetector {
    pub fn new(extra: &[FailurePattern]) -> Self {
        let extras = extra
            .iter()
            .filter(|p| !p.pattern.trim().is_empty())
            .map(|p| (p.pattern.to_lowercase(), p.kind));
        let defaults = UNREACHABLE_PATTERNS
            .iter()
            .map(|p| (p.to_string(), FailureKind::Unreachable))
            .chain(
                FATAL_PATTERNS
                    .iter()
                    .map(|p| (p.to_string(), FailureKind::Fatal)),
            );

        Self {
            patterns: extras.chain(defaults).collect(),
        }
    }

    /// Match a single line against the pattern list
    pub fn scan_line(&self, line: &str) -> Option<Detection> {
        let lowered = line.to_lowercase();
        self.patterns
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern.as_str()))
            .map(|(_, kind)| Detection {
                kind: *kind,
                line: line.trim().to_string(),
            })
    }

    /// First detection in line order
    pub fn scan_output(&self, text: &str) -> Option<Detection> {
        text.lines().find_map(|line| self.scan_line(line))
    }

    /// Classify a finished rsync/ssh invocation
    pub fn classify(&self, result: &ExecutionResult) -> SyncOutcome {
        if result.status == ExecutionStatus::Success {
            return SyncOutcome::Success;
        }

        let stderr = result.stderr.as_deref().unwrap_or_default();
        let stdout = result.stdout.as_deref().unwrap_or_default();
        if let Some(hit) = self
            .scan_output(stderr)
            .or_else(|| self.scan_output(stdout))
        {
            return SyncOutcome::Failure {
                kind: hit.kind,
                reason: hit.line,
            };
        }

        if result.status == ExecutionStatus::Timeout {
            return SyncOutcome::Failure {
                kind: FailureKind::Unreachable,
                reason: format!("timed out after {}ms", result.duration_ms),
            };
        }

        let last_line = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string());

        match result.exit_code {
            Some(code @ (23 | 24)) => SyncOutcome::Partial(code),
            Some(code @ (10 | 12 | 30 | 35 | 255)) => SyncOutcome::Failure {
                kind: FailureKind::Unreachable,
                reason: last_line.unwrap_or_else(|| format!("exit code {}", code)),
            },
            Some(code @ (126 | 127)) => SyncOutcome::Failure {
                kind: FailureKind::Fatal,
                reason: last_line.unwrap_or_else(|| format!("command not runnable (exit {})", code)),
            },
            Some(code) => SyncOutcome::Failure {
                kind: FailureKind::Transient,
                reason: last_line.unwrap_or_else(|| format!("exit code {}", code)),
            },
            None => SyncOutcome::Failure {
                kind: FailureKind::Transient,
                reason: last_line.unwrap_or_else(|| "terminated by signal".to_string()),
            },
        }
    }
}
