// Supervisor constants (no magic values)
use std::time::Duration;

/// Graceful process shutdown timeout before SIGKILL (5 seconds)
pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: i64 = 5000;

/// Interval between liveness checks while waiting for a process to exit
pub const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the line channel between a watcher and its supervisor
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the supervisor event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on change notifications coalesced into one sync
pub const MAX_BATCH_COALESCE: usize = 1024;

/// Environment variables children inherit when none are configured
pub const DEFAULT_INHERITED_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SSH_AUTH_SOCK",
    "LANG",
    "LC_ALL",
    "TMPDIR",
];
