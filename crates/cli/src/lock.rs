// Single-instance lock file holding the owner's pid

use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Removed again on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock at `path`
    ///
    /// A lock whose pid is no longer alive (per `is_alive`) is stale and gets
    /// replaced; a live one makes this fail.
    pub fn acquire(path: &Path, is_alive: impl Fn(i32) -> bool) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let own_pid = std::process::id();
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", own_pid)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    debug!(path = %path.display(), pid = own_pid, "Lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = fs::read_to_string(path)
                        .ok()
                        .and_then(|s| s.trim().parse::<i32>().ok());
                    if let Some(pid) = holder {
                        if pid as u32 != own_pid && is_alive(pid) {
                            bail!(
                                "another driftsync instance is running (pid {}, lock {})",
                                pid,
                                path.display()
                            );
                        }
                    }
                    warn!(path = %path.display(), holder = ?holder, "Removing stale lock file");
                    fs::remove_file(path)
                        .with_context(|| format!("Failed to remove stale lock {}", path.display()))?;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()))
                }
            }
        }
        bail!("could not acquire lock {}", path.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}
